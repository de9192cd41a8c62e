//! 框架配置
//!
//! 定义框架实例的配置结构和加载逻辑。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::filter::AttrMap;
use crate::utils::{LoggerConfig, RotationStrategy};
use crate::version::Version;
use crate::wiring::host_native_attributes;

/// 宿主本地属性配置
///
/// 解析器拿这组属性评估本地代码候选。缺省取编译目标的常量。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// 操作系统名
    #[serde(default = "default_os_name")]
    pub os_name: String,

    /// 操作系统版本
    #[serde(default = "default_os_version")]
    pub os_version: Version,

    /// 处理器
    #[serde(default = "default_processor")]
    pub processor: String,

    /// 语言
    #[serde(default = "default_language")]
    pub language: String,

    /// 框架提供的执行环境
    #[serde(default)]
    pub execution_environments: Vec<String>,
}

fn default_os_name() -> String {
    std::env::consts::OS.to_string()
}

fn default_os_version() -> Version {
    Version::zero()
}

fn default_processor() -> String {
    std::env::consts::ARCH.to_string()
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            os_name: default_os_name(),
            os_version: default_os_version(),
            processor: default_processor(),
            language: default_language(),
            execution_environments: vec![],
        }
    }
}

impl HostConfig {
    /// 宿主本地能力属性快照
    pub fn native_attributes(&self) -> AttrMap {
        host_native_attributes(
            &self.os_name,
            &self.os_version,
            &self.processor,
            &self.language,
        )
    }
}

/// 生命周期配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// 刷新时等待慢停止的重试次数
    #[serde(default = "default_stop_retries")]
    pub stop_retries: u32,

    /// 每次重试之间的等待（毫秒）
    #[serde(default = "default_stop_wait_ms")]
    pub stop_wait_ms: u64,

    /// 启动级别门槛，低于它的模块不自动启动
    #[serde(default)]
    pub start_level: u32,
}

fn default_stop_retries() -> u32 {
    3
}

fn default_stop_wait_ms() -> u64 {
    500
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_retries: default_stop_retries(),
            stop_wait_ms: default_stop_wait_ms(),
            start_level: 0,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
        }
    }
}

impl LogConfig {
    /// 翻译为日志初始化配置
    pub fn to_logger_config(&self) -> LoggerConfig {
        let mut builder = LoggerConfig::builder()
            .level(self.level.clone())
            .json_format(self.json_format)
            .rotation(RotationStrategy::parse(&self.rotation));
        if self.file_output {
            if let Some(dir) = &self.log_dir {
                builder = builder.file_output(dir.clone());
            }
        }
        builder.build()
    }
}

/// 框架配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FrameworkConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 宿主本地属性
    #[serde(default)]
    pub host: HostConfig,

    /// 生命周期配置
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,
}

impl FrameworkConfig {
    /// 创建配置构建器
    pub fn builder() -> FrameworkConfigBuilder {
        FrameworkConfigBuilder::default()
    }

    /// 从文件加载配置（按扩展名区分 JSON/YAML）
    pub async fn from_file(path: impl Into<PathBuf>) -> crate::utils::Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await?;

        let mut config: FrameworkConfig =
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                serde_json::from_str(&content)
                    .map_err(|e| crate::utils::FrameworkError::ConfigLoadFailed(e.to_string()))?
            } else {
                serde_yaml::from_str(&content)?
            };
        config.config_path = Some(path);
        Ok(config)
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct FrameworkConfigBuilder {
    config: FrameworkConfig,
}

impl FrameworkConfigBuilder {
    /// 操作系统名
    pub fn os_name(mut self, name: impl Into<String>) -> Self {
        self.config.host.os_name = name.into();
        self
    }

    /// 操作系统版本
    pub fn os_version(mut self, version: Version) -> Self {
        self.config.host.os_version = version;
        self
    }

    /// 处理器
    pub fn processor(mut self, processor: impl Into<String>) -> Self {
        self.config.host.processor = processor.into();
        self
    }

    /// 语言
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.config.host.language = language.into();
        self
    }

    /// 追加执行环境
    pub fn execution_environment(mut self, ee: impl Into<String>) -> Self {
        self.config.host.execution_environments.push(ee.into());
        self
    }

    /// 停止重试次数
    pub fn stop_retries(mut self, retries: u32) -> Self {
        self.config.lifecycle.stop_retries = retries;
        self
    }

    /// 停止重试间隔（毫秒）
    pub fn stop_wait_ms(mut self, ms: u64) -> Self {
        self.config.lifecycle.stop_wait_ms = ms;
        self
    }

    /// 启动级别门槛
    pub fn start_level(mut self, level: u32) -> Self {
        self.config.lifecycle.start_level = level;
        self
    }

    /// 完成构建
    pub fn build(self) -> FrameworkConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FrameworkConfig::default();
        assert_eq!(config.lifecycle.stop_retries, 3);
        assert_eq!(config.lifecycle.stop_wait_ms, 500);
        assert_eq!(config.logging.level, "info");
        assert!(!config.host.os_name.is_empty());
    }

    #[test]
    fn test_yaml_partial_override() {
        let yaml = r#"
host:
  os_name: linux
  os_version: "5.10.0"
  language: zh
lifecycle:
  stop_retries: 5
"#;
        let config: FrameworkConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.host.os_name, "linux");
        assert_eq!(config.host.language, "zh");
        assert_eq!(config.lifecycle.stop_retries, 5);
        // 未覆盖的字段取缺省
        assert_eq!(config.lifecycle.stop_wait_ms, 500);
        assert_eq!(config.logging.rotation, "daily");
    }

    #[test]
    fn test_builder() {
        let config = FrameworkConfig::builder()
            .os_name("linux")
            .os_version("2.5.0".parse().unwrap())
            .language("zh")
            .execution_environment("rt-11")
            .stop_retries(1)
            .build();
        assert_eq!(config.host.os_name, "linux");
        assert_eq!(config.host.execution_environments, vec!["rt-11"]);

        let attrs = config.host.native_attributes();
        assert!(attrs.contains_key("osname"));
        assert!(attrs.contains_key("osversion"));
    }
}
