//! 模块描述符
//!
//! 描述符是已分词的声明集合：安装方（存储协作者）负责把持久化的
//! 清单解析成这里的结构，框架本身不读原始清单文本。所有字段都可以
//! 从 YAML/JSON 反序列化，便于测试与宿主进程投递。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::filter::AttrMap;
use crate::version::{Version, VersionRange};

/// 默认版本 0.0.0
fn default_version() -> Version {
    Version::new(0, 0, 0)
}

/// 默认接受任意版本
fn default_range() -> VersionRange {
    VersionRange::any()
}

/// 包导出声明
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDecl {
    /// 包名
    pub name: String,
    /// 导出版本
    #[serde(default = "default_version")]
    pub version: Version,
    /// uses 约束涉及的包名
    #[serde(default)]
    pub uses: Vec<String>,
    /// 强制属性名
    #[serde(default)]
    pub mandatory: Vec<String>,
    /// include 类过滤
    #[serde(default)]
    pub include: Option<String>,
    /// exclude 类过滤
    #[serde(default)]
    pub exclude: Option<String>,
    /// 附加属性
    #[serde(default)]
    pub attributes: AttrMap,
}

/// 包导入声明
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportDecl {
    /// 包名
    pub name: String,
    /// 可接受的版本区间
    #[serde(default = "default_range")]
    pub range: VersionRange,
    /// 是否可选
    #[serde(default)]
    pub optional: bool,
    /// 附加匹配属性（逐项相等约束）
    #[serde(default)]
    pub attributes: AttrMap,
}

/// require-module 声明
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequireModuleDecl {
    /// 目标模块符号名
    pub symbolic_name: String,
    /// 可接受的版本区间
    #[serde(default = "default_range")]
    pub range: VersionRange,
    /// 是否可选
    #[serde(default)]
    pub optional: bool,
    /// 可见性：`private`（默认）或 `reexport`
    #[serde(default)]
    pub visibility: Option<String>,
}

/// 片段宿主声明
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentHostDecl {
    /// 宿主模块符号名
    pub symbolic_name: String,
    /// 可接受的宿主版本区间
    #[serde(default = "default_range")]
    pub range: VersionRange,
}

/// 通用能力声明
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDecl {
    /// 命名空间
    pub namespace: String,
    /// 属性
    #[serde(default)]
    pub attributes: AttrMap,
    /// 指令
    #[serde(default)]
    pub directives: BTreeMap<String, String>,
}

/// 通用需求声明
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementDecl {
    /// 命名空间
    pub namespace: String,
    /// 过滤器文本（LDAP 风格）
    #[serde(default)]
    pub filter: Option<String>,
    /// 指令
    #[serde(default)]
    pub directives: BTreeMap<String, String>,
    /// 属性
    #[serde(default)]
    pub attributes: AttrMap,
}

/// 本地代码备选声明（按清单顺序）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeClauseDecl {
    /// 库文件路径
    pub libraries: Vec<String>,
    /// 可接受的操作系统名
    #[serde(default)]
    pub os_names: Vec<String>,
    /// 操作系统最低版本
    #[serde(default)]
    pub os_version_floor: Option<Version>,
    /// 可接受的处理器
    #[serde(default)]
    pub processors: Vec<String>,
    /// 可接受的语言
    #[serde(default)]
    pub languages: Vec<String>,
}

/// 本地代码声明
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeDecl {
    /// 备选子句，清单顺序即声明顺序
    pub clauses: Vec<NativeClauseDecl>,
    /// 末尾通配可选标记（`*`）
    #[serde(default)]
    pub optional: bool,
}

/// 模块描述符
///
/// 安装入口消费的完整声明快照。构造代次时逐项做急切校验，
/// 任何畸形声明都会让安装整体失败，不会留下半成品代次。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// 符号名
    pub symbolic_name: String,
    /// 版本
    #[serde(default = "default_version")]
    pub version: Version,
    /// 单例约束
    #[serde(default)]
    pub singleton: bool,
    /// 包导出
    #[serde(default)]
    pub exports: Vec<ExportDecl>,
    /// 包导入
    #[serde(default)]
    pub imports: Vec<ImportDecl>,
    /// require-module 需求
    #[serde(default)]
    pub require_modules: Vec<RequireModuleDecl>,
    /// 片段宿主（仅片段模块填写）
    #[serde(default)]
    pub fragment_host: Option<FragmentHostDecl>,
    /// 通用能力头
    #[serde(default)]
    pub capabilities: Vec<CapabilityDecl>,
    /// 通用需求头
    #[serde(default)]
    pub requirements: Vec<RequirementDecl>,
    /// 可接受的执行环境（任一满足即可）
    #[serde(default)]
    pub execution_environments: Vec<String>,
    /// 本地代码声明
    #[serde(default)]
    pub native: Option<NativeDecl>,
}

impl ModuleDescriptor {
    /// 最小描述符（仅符号名与版本）
    pub fn new(symbolic_name: impl Into<String>, version: Version) -> Self {
        Self {
            symbolic_name: symbolic_name.into(),
            version,
            singleton: false,
            exports: Vec::new(),
            imports: Vec::new(),
            require_modules: Vec::new(),
            fragment_host: None,
            capabilities: Vec::new(),
            requirements: Vec::new(),
            execution_environments: Vec::new(),
            native: None,
        }
    }

    /// 是否为片段模块
    pub fn is_fragment(&self) -> bool {
        self.fragment_host.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_from_yaml_defaults() {
        let yaml = r#"
symbolic_name: com.example.mod
version: "1.2.0"
exports:
  - name: com.example.api
    version: "1.2.0"
imports:
  - name: com.example.util
    range: "[1.0,2.0)"
"#;
        let desc: ModuleDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(desc.symbolic_name, "com.example.mod");
        assert!(!desc.singleton);
        assert_eq!(desc.exports.len(), 1);
        assert!(desc.exports[0].uses.is_empty());
        assert!(desc.imports[0].range.includes(&"1.5.0".parse().unwrap()));
        assert!(!desc.imports[0].optional);
        assert!(!desc.is_fragment());
    }

    #[test]
    fn test_fragment_descriptor() {
        let yaml = r#"
symbolic_name: com.example.patch
fragment_host:
  symbolic_name: com.example.mod
  range: "[1.0,2.0)"
"#;
        let desc: ModuleDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert!(desc.is_fragment());
        assert_eq!(desc.version, Version::new(0, 0, 0));
    }
}
