//! 生命周期：事件、监听器与操作执行器

pub mod events;
pub mod executor;

pub use events::{EventOrdinal, ListenerRegistry, ModuleEvent, ModuleListener, RefreshEvent};
pub use executor::{LifecycleExecutor, ModuleActivator};
