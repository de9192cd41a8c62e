//! 模块层
//!
//! 描述符（已分词的声明）→ 代次（不可变安装快照）→ 模块
//! （稳定身份 + 当前代次 + 生命周期状态）。

pub mod descriptor;
pub mod generation;
#[allow(clippy::module_inception)]
pub mod module;

pub use descriptor::{
    CapabilityDecl, ExportDecl, FragmentHostDecl, ImportDecl, ModuleDescriptor, NativeClauseDecl,
    NativeDecl, RequireModuleDecl, RequirementDecl,
};
pub use generation::Generation;
pub use module::{LifecycleState, Module};
