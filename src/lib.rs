//! # Sunmao Core - 榫卯模块框架
//!
//! 榫卯是一个动态模块运行时的依赖解析与布线核心，提供以下能力：
//!
//! - **能力/需求/布线模型**: 把已安装代次的声明变成一致的布线图
//! - **包图**: 按包名登记导出方/导入方, 选择最佳提供方
//! - **解析器**: 版本区间、单例、片段、本地代码与 uses 约束
//! - **生命周期状态机**: 安装、解析、启动、停止、更新、卸载、刷新,
//!   单写者并发纪律串行化状态迁移
//! - **钩子过滤**: 受信扩展收窄模块/事件可见性
//!
//! 模块"物理上"包含什么不在本框架范围内：存储、代码装载、安全与
//! 传输都是外部协作者。
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use sunmao_core::{Framework, FrameworkConfig, ModuleDescriptor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let framework = Framework::new(FrameworkConfig::default())?;
//!
//!     let descriptor = ModuleDescriptor::new("com.example.mod", "1.0.0".parse()?);
//!     let id = framework.install("mem:example", &descriptor).await?;
//!     framework.start_module(id).await?;
//!
//!     framework.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `version` - 版本与版本区间
//! - `filter` - 属性过滤器谓词
//! - `wiring` - 能力/需求/布线模型
//! - `packages` - 包图
//! - `module` - 描述符、代次与模块
//! - `resolver` - 解析器
//! - `lifecycle` - 生命周期执行器与事件
//! - `hooks` - 钩子过滤
//! - `core` - 配置、上下文与协作者契约
//! - `api` - 公共 API 接口

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod api;
pub mod core;
pub mod filter;
pub mod hooks;
pub mod lifecycle;
pub mod module;
pub mod packages;
pub mod resolver;
pub mod utils;
pub mod version;
pub mod wiring;

// 重导出常用类型，方便使用
pub use api::{Framework, ModuleInfo};
pub use core::{
    AllowAllPolicy, FrameworkConfig, FrameworkConfigBuilder, FrameworkContext, MemoryStateStore,
    SecurityPolicy, StateStore,
};
pub use filter::{AttrMap, AttrValue, Filter};
pub use hooks::{CollisionHook, EventHook, FindHook, HookRegistry, ListenerHook, ShrinkableSet};
pub use lifecycle::{ModuleActivator, ModuleEvent, ModuleListener, RefreshEvent};
pub use module::{Generation, LifecycleState, Module, ModuleDescriptor};
pub use packages::{ExportPkg, ImportPkg, PackageRegistry, Pkg};
pub use resolver::Resolver;
pub use utils::logger::{LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
pub use utils::{error_code, FrameworkError, Result};
pub use version::{Version, VersionRange};
pub use wiring::{Capability, Requirement, Wire, WireTable};
