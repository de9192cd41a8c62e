//! 对外接口层

pub mod framework;

pub use framework::{Framework, ModuleInfo};
