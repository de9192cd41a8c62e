//! 日志系统模块
//!
//! 基于 tracing 生态实现框架内核的日志功能：
//!
//! - 多级别日志支持（TRACE, DEBUG, INFO, WARN, ERROR）
//! - 结构化日志（可选 JSON 格式输出）
//! - 文件日志输出（异步非阻塞，按时间轮转）
//! - 按模块/级别过滤（EnvFilter）
//!
//! # 示例
//!
//! ```rust,no_run
//! use sunmao_core::utils::logger::{Logger, LoggerConfig, RotationStrategy};
//! use std::path::PathBuf;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LoggerConfig::builder()
//!         .level("debug")
//!         .json_format(false)
//!         .file_output(PathBuf::from("./logs"))
//!         .rotation(RotationStrategy::Daily)
//!         .build();
//!
//!     let _guard = Logger::init(config)?;
//!
//!     tracing::info!(module_id = 1, "框架已启动");
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::utils::{FrameworkError, Result};

// ============================================================================
// 日志轮转策略
// ============================================================================

/// 日志轮转策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    /// 不轮转（单个日志文件）
    Never,
    /// 每小时轮转
    Hourly,
    /// 每天轮转（默认）
    #[default]
    Daily,
}

impl RotationStrategy {
    fn to_rotation(self) -> Rotation {
        match self {
            RotationStrategy::Never => Rotation::NEVER,
            RotationStrategy::Hourly => Rotation::HOURLY,
            RotationStrategy::Daily => Rotation::DAILY,
        }
    }

    /// 从配置字符串解析
    pub fn parse(text: &str) -> Self {
        match text.to_ascii_lowercase().as_str() {
            "never" => RotationStrategy::Never,
            "hourly" => RotationStrategy::Hourly,
            _ => RotationStrategy::Daily,
        }
    }
}

// ============================================================================
// 日志配置
// ============================================================================

/// 日志配置
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// 日志级别（trace/debug/info/warn/error）
    pub level: String,
    /// 是否输出 JSON 格式
    pub json_format: bool,
    /// 文件输出目录（None 表示仅控制台）
    pub file_dir: Option<PathBuf>,
    /// 日志文件名前缀
    pub file_prefix: String,
    /// 轮转策略
    pub rotation: RotationStrategy,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            file_dir: None,
            file_prefix: "sunmao-core".to_string(),
            rotation: RotationStrategy::Daily,
        }
    }
}

impl LoggerConfig {
    /// 创建配置构建器
    pub fn builder() -> LoggerConfigBuilder {
        LoggerConfigBuilder::default()
    }
}

/// 日志配置构建器
#[derive(Debug, Default)]
pub struct LoggerConfigBuilder {
    config: LoggerConfig,
}

impl LoggerConfigBuilder {
    /// 设置日志级别
    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    /// 设置是否输出 JSON 格式
    pub fn json_format(mut self, json: bool) -> Self {
        self.config.json_format = json;
        self
    }

    /// 启用文件输出
    pub fn file_output(mut self, dir: PathBuf) -> Self {
        self.config.file_dir = Some(dir);
        self
    }

    /// 设置轮转策略
    pub fn rotation(mut self, rotation: RotationStrategy) -> Self {
        self.config.rotation = rotation;
        self
    }

    /// 构建配置
    pub fn build(self) -> LoggerConfig {
        self.config
    }
}

// ============================================================================
// 日志系统入口
// ============================================================================

/// 日志守卫
///
/// 持有异步写入器的后台线程句柄。守卫被 drop 后缓冲的日志会被刷出。
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// 日志系统
pub struct Logger;

impl Logger {
    /// 初始化全局日志订阅器
    ///
    /// 重复初始化会返回错误（tracing 全局订阅器只能设置一次）。
    pub fn init(config: LoggerConfig) -> Result<LogGuard> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

        let mut file_guard = None;

        let file_layer = if let Some(dir) = &config.file_dir {
            let appender = RollingFileAppender::new(
                config.rotation.to_rotation(),
                dir,
                &config.file_prefix,
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            file_guard = Some(guard);
            Some(fmt::layer().with_writer(writer).with_ansi(false))
        } else {
            None
        };

        let registry = tracing_subscriber::registry().with(filter).with(file_layer);

        let init_result = if config.json_format {
            registry.with(fmt::layer().json()).try_init()
        } else {
            registry.with(fmt::layer()).try_init()
        };

        init_result.map_err(|e| {
            FrameworkError::ConfigLoadFailed(format!("日志系统初始化失败: {}", e))
        })?;

        tracing::debug!(
            level = %config.level,
            json = config.json_format,
            file_output = config.file_dir.is_some(),
            "日志系统已初始化"
        );

        Ok(LogGuard {
            _file_guard: file_guard,
        })
    }
}
