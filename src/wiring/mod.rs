//! 能力/需求/布线模型
//!
//! 本模块定义框架的布线数据模型：
//!
//! - [`Capability`] - 某代次声明提供的带属性事实（包、身份、本地代码等）
//! - [`Requirement`] - 某代次需要被满足的带过滤器约束
//! - [`Wire`] / [`WireTable`] - 一条需求到一条能力的已提交配对，
//!   以句柄表（而非相互引用的智能指针）存储，两侧对称登记
//!
//! 命名空间、指令名的常量也集中在这里。

pub mod capability;
pub mod requirement;
pub mod wire;

pub use capability::{Capability, CapabilityOrigin};
pub use requirement::{NativeCodeClause, NativeCodeRequirement, Requirement};
pub use requirement::host_native_attributes;
pub use wire::{Wire, WireTable};

// ============================================================================
// 句柄类型
// ============================================================================

/// 代次句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenerationId(pub u64);

/// 能力句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CapabilityId(pub u64);

/// 需求句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequirementId(pub u64);

/// 布线句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WireId(pub u64);

/// 句柄分配器
///
/// 框架实例级别的单调计数器，代次/能力/需求句柄共用一个序列，
/// 句柄在实例内全局唯一。
#[derive(Debug, Default)]
pub struct HandleAllocator {
    next: std::sync::atomic::AtomicU64,
}

impl HandleAllocator {
    /// 创建分配器（从 1 开始，0 保留给框架自身）
    pub fn new() -> Self {
        Self {
            next: std::sync::atomic::AtomicU64::new(1),
        }
    }

    fn bump(&self) -> u64 {
        self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    /// 分配代次句柄
    pub fn next_generation(&self) -> GenerationId {
        GenerationId(self.bump())
    }

    /// 分配能力句柄
    pub fn next_capability(&self) -> CapabilityId {
        CapabilityId(self.bump())
    }

    /// 分配需求句柄
    pub fn next_requirement(&self) -> RequirementId {
        RequirementId(self.bump())
    }
}

// ============================================================================
// 命名空间与指令常量
// ============================================================================

/// 保留命名空间
///
/// 这些命名空间中的能力只能由框架自身合成（系统模块 id 0）或来自
/// 代次的声明元数据，非零 id 模块的用户自定义能力头不得使用。
pub mod namespaces {
    /// 模块命名空间（require-module 需求匹配的对象）
    pub const MODULE: &str = "module";
    /// 片段宿主命名空间
    pub const HOST: &str = "host";
    /// 包命名空间
    pub const PACKAGE: &str = "package";
    /// 执行环境命名空间
    pub const EXECUTION_ENVIRONMENT: &str = "execution-environment";
    /// 身份命名空间
    pub const IDENTITY: &str = "identity";
    /// 本地代码命名空间
    pub const NATIVE: &str = "native";

    /// 判断命名空间是否保留
    pub fn is_reserved(namespace: &str) -> bool {
        matches!(
            namespace,
            MODULE | HOST | PACKAGE | EXECUTION_ENVIRONMENT | IDENTITY | NATIVE
        )
    }
}

/// 指令名常量
pub mod directives {
    /// 解析策略：`mandatory`（默认）或 `optional`
    pub const RESOLUTION: &str = "resolution";
    /// 生效阶段：`resolve`（默认）或其他（解析器跳过）
    pub const EFFECTIVE: &str = "effective";
    /// require-module 可见性：`private`（默认）或 `reexport`
    pub const VISIBILITY: &str = "visibility";
    /// 单例约束：`true` 时同符号名至多一个已解析代次
    pub const SINGLETON: &str = "singleton";
    /// 需求过滤器文本
    pub const FILTER: &str = "filter";
    /// 导出包的 uses 包列表（逗号分隔）
    pub const USES: &str = "uses";
    /// 导出包的强制属性列表（逗号分隔）
    pub const MANDATORY: &str = "mandatory";
    /// 导出包的 include 类过滤
    pub const INCLUDE: &str = "include";
    /// 导出包的 exclude 类过滤
    pub const EXCLUDE: &str = "exclude";

    /// `resolution` 指令的 `optional` 取值
    pub const RESOLUTION_OPTIONAL: &str = "optional";
    /// `effective` 指令的 `resolve` 取值
    pub const EFFECTIVE_RESOLVE: &str = "resolve";
    /// `visibility` 指令的 `reexport` 取值
    pub const VISIBILITY_REEXPORT: &str = "reexport";
}

/// 常用属性键
pub mod attributes {
    /// 包名属性（package 命名空间）
    pub const PACKAGE_NAME: &str = "package";
    /// 符号名属性（module/host/identity 命名空间）
    pub const SYMBOLIC_NAME: &str = "symbolic-name";
    /// 版本属性
    pub const VERSION: &str = "version";
    /// 身份类型属性（identity 命名空间）：`module` 或 `fragment`
    pub const IDENTITY_TYPE: &str = "type";
    /// 操作系统名（native 命名空间）
    pub const OS_NAME: &str = "osname";
    /// 操作系统版本（native 命名空间）
    pub const OS_VERSION: &str = "osversion";
    /// 处理器（native 命名空间）
    pub const PROCESSOR: &str = "processor";
    /// 语言（native 命名空间）
    pub const LANGUAGE: &str = "language";
    /// 执行环境名（execution-environment 命名空间）
    pub const EE_NAME: &str = "execution-environment";
}
