//! 框架核心：配置、上下文与协作者契约

pub mod collaborators;
pub mod config;
pub mod context;

pub use collaborators::{AllowAllPolicy, MemoryStateStore, SecurityPolicy, StateStore};
pub use config::{FrameworkConfig, FrameworkConfigBuilder, HostConfig, LifecycleConfig, LogConfig};
pub use context::{FrameworkContext, ModuleRegistry};
