//! 榫卯框架错误类型定义
//!
//! 本模块定义了框架内核中使用的所有错误类型。

use thiserror::Error;

use crate::version::Version;

/// 榫卯框架核心错误类型
#[derive(Error, Debug)]
pub enum FrameworkError {
    // ==================== 解析与布线错误 ====================

    /// 强制需求无法满足
    #[error("解析失败: 模块 {module_id} 的需求无法满足 (namespace '{namespace}', filter {filter:?})")]
    Resolution {
        /// 所属模块 ID
        module_id: u64,
        /// 需求的命名空间
        namespace: String,
        /// 需求携带的过滤器文本（若有）
        filter: Option<String>,
    },

    /// 没有任何本地代码候选匹配宿主环境
    #[error("本地代码匹配失败: 模块 {module_id} 无匹配的本地代码候选, 宿主属性: {host_attributes}")]
    NativeCode {
        /// 所属模块 ID
        module_id: u64,
        /// 宿主本地能力属性快照（用于诊断）
        host_attributes: String,
    },

    /// 单例模块冲突
    #[error("单例冲突: '{symbolic_name}' 已有版本 {existing} 处于已解析状态, 无法再解析版本 {candidate}")]
    SingletonConflict {
        /// 冲突的符号名
        symbolic_name: String,
        /// 已解析的版本
        existing: Version,
        /// 被拒绝的候选版本
        candidate: Version,
    },

    // ==================== 声明与安装错误 ====================

    /// 能力/需求声明无效
    #[error("无效声明: {0}")]
    InvalidDeclaration(String),

    /// 符号名 + 版本与已安装模块冲突
    #[error("安装冲突: '{symbolic_name}' 版本 {version} 已由模块 {existing_id} 安装")]
    InstallCollision {
        /// 冲突的符号名
        symbolic_name: String,
        /// 冲突的版本
        version: Version,
        /// 已存在的模块 ID
        existing_id: u64,
    },

    // ==================== 生命周期错误 ====================

    /// 刷新过程中模块停止超时
    #[error("生命周期超时: 模块 {module_id} 在 {retries} 次重试后仍未完成停止")]
    LifecycleTimeout {
        /// 超时的模块 ID
        module_id: u64,
        /// 已执行的重试次数
        retries: u32,
    },

    /// 在非法状态下执行操作
    #[error("非法状态: 模块 {module_id} 处于 {state} 状态, 无法执行 {operation}")]
    IllegalState {
        /// 模块 ID
        module_id: u64,
        /// 当前状态
        state: String,
        /// 被拒绝的操作
        operation: String,
    },

    /// 模块未找到
    #[error("模块未找到: id {0}")]
    ModuleNotFound(u64),

    /// 激活器执行失败
    #[error("激活器失败: 模块 {module_id} - {source}")]
    ActivatorFailed {
        /// 模块 ID
        module_id: u64,
        /// 激活器返回的错误
        #[source]
        source: anyhow::Error,
    },

    // ==================== 配置与 IO 错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 过滤器语法错误
    #[error("过滤器语法错误: {0}")]
    FilterSyntax(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 框架操作结果类型别名
pub type Result<T> = std::result::Result<T, FrameworkError>;

/// 错误码常量
pub mod error_code {
    // 解析错误 (RESOLVE-xxx)
    pub const RESOLVE_UNSATISFIED: &str = "RESOLVE-001";
    pub const RESOLVE_NATIVE_CODE: &str = "RESOLVE-002";
    pub const RESOLVE_SINGLETON: &str = "RESOLVE-003";

    // 模块错误 (MODULE-xxx)
    pub const MODULE_NOT_FOUND: &str = "MODULE-001";
    pub const MODULE_INVALID_DECLARATION: &str = "MODULE-002";
    pub const MODULE_COLLISION: &str = "MODULE-003";
    pub const MODULE_ILLEGAL_STATE: &str = "MODULE-004";
    pub const MODULE_ACTIVATOR: &str = "MODULE-005";

    // 生命周期错误 (LIFECYCLE-xxx)
    pub const LIFECYCLE_TIMEOUT: &str = "LIFECYCLE-001";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";

    // 过滤器错误 (FILTER-xxx)
    pub const FILTER_SYNTAX: &str = "FILTER-001";
}

impl FrameworkError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            FrameworkError::Resolution { .. } => error_code::RESOLVE_UNSATISFIED,
            FrameworkError::NativeCode { .. } => error_code::RESOLVE_NATIVE_CODE,
            FrameworkError::SingletonConflict { .. } => error_code::RESOLVE_SINGLETON,
            FrameworkError::InvalidDeclaration(_) => error_code::MODULE_INVALID_DECLARATION,
            FrameworkError::InstallCollision { .. } => error_code::MODULE_COLLISION,
            FrameworkError::LifecycleTimeout { .. } => error_code::LIFECYCLE_TIMEOUT,
            FrameworkError::IllegalState { .. } => error_code::MODULE_ILLEGAL_STATE,
            FrameworkError::ModuleNotFound(_) => error_code::MODULE_NOT_FOUND,
            FrameworkError::ActivatorFailed { .. } => error_code::MODULE_ACTIVATOR,
            FrameworkError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            FrameworkError::FilterSyntax(_) => error_code::FILTER_SYNTAX,
            _ => "UNKNOWN",
        }
    }

    /// 该错误是否只影响单个模块的解析尝试
    ///
    /// 解析类错误（Resolution/NativeCode/SingletonConflict）只中止当前
    /// 模块的解析，不影响其他模块已建立的布线。
    pub fn is_resolution_local(&self) -> bool {
        matches!(
            self,
            FrameworkError::Resolution { .. }
                | FrameworkError::NativeCode { .. }
                | FrameworkError::SingletonConflict { .. }
        )
    }
}
