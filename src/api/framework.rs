//! Framework 门面
//!
//! 榫卯框架的主要对外接口。一个 [`Framework`] 就是一个独立的框架
//! 实例：安装、解析、启动、停止、更新、卸载、刷新模块，注册
//! 监听器与钩子。进程内可以并存多个互不干扰的实例。
//!
//! # 示例
//!
//! ```rust,no_run
//! use sunmao_core::{Framework, FrameworkConfig, ModuleDescriptor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = FrameworkConfig::builder()
//!         .os_name("linux")
//!         .language("zh")
//!         .build();
//!     let framework = Framework::new(config)?;
//!
//!     let descriptor = ModuleDescriptor::new("com.example.mod", "1.0.0".parse()?);
//!     let id = framework.install("mem:example", &descriptor).await?;
//!     framework.start_module(id).await?;
//!
//!     framework.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::core::collaborators::{SecurityPolicy, StateStore};
use crate::core::config::FrameworkConfig;
use crate::core::context::FrameworkContext;
use crate::hooks::{HookRegistry, ShrinkableSet};
use crate::lifecycle::{LifecycleExecutor, ModuleActivator, ModuleListener};
use crate::module::{Generation, LifecycleState, Module, ModuleDescriptor};
use crate::utils::logger::{LogGuard, Logger};
use crate::utils::{FrameworkError, Result};
use crate::version::Version;

/// 一个模块的对外快照
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    /// 模块 ID
    pub id: u64,
    /// 位置串
    pub location: String,
    /// 符号名
    pub symbolic_name: String,
    /// 版本
    pub version: Version,
    /// 生命周期状态
    pub state: LifecycleState,
}

/// 框架实例
pub struct Framework {
    ctx: Arc<FrameworkContext>,
    executor: LifecycleExecutor,
}

impl std::fmt::Debug for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framework")
            .field("modules", &self.ctx.modules.all().len())
            .finish_non_exhaustive()
    }
}

impl Framework {
    /// 用缺省协作者创建框架实例
    pub fn new(config: FrameworkConfig) -> Result<Self> {
        let ctx = Arc::new(FrameworkContext::new(config)?);
        let executor = LifecycleExecutor::new(Arc::clone(&ctx));
        info!("框架实例已创建");
        Ok(Self { ctx, executor })
    }

    /// 指定安全与持久化协作者创建框架实例
    pub fn with_collaborators(
        config: FrameworkConfig,
        security: Arc<dyn SecurityPolicy>,
        state_store: Arc<dyn StateStore>,
    ) -> Result<Self> {
        let ctx = Arc::new(FrameworkContext::with_collaborators(
            config,
            security,
            state_store,
        )?);
        let executor = LifecycleExecutor::new(Arc::clone(&ctx));
        Ok(Self { ctx, executor })
    }

    /// 按配置初始化全局日志订阅器
    ///
    /// 返回的守卫需要持有到进程退出，否则缓冲日志可能丢失。
    /// 进程内只能初始化一次，通常在创建第一个框架实例之前调用。
    pub fn init_logging(config: &FrameworkConfig) -> Result<LogGuard> {
        Logger::init(config.logging.to_logger_config())
    }

    /// 框架上下文（测试与扩展用）
    pub fn context(&self) -> &Arc<FrameworkContext> {
        &self.ctx
    }

    // ==================== 安装 ====================

    /// 安装模块
    ///
    /// 同一位置串重复安装返回既有模块 ID。符号名 + 版本与既有模块
    /// 完全重合时先过 collision 钩子, 仍有冲突则拒绝安装。
    ///
    /// # Errors
    ///
    /// 畸形声明返回 [`FrameworkError::InvalidDeclaration`]（整体失败,
    /// 不留半成品）; 冲突返回 [`FrameworkError::InstallCollision`]。
    pub async fn install(&self, location: &str, descriptor: &ModuleDescriptor) -> Result<u64> {
        if let Some(existing) = self.ctx.modules.by_location(location) {
            info!(
                module_id = existing.id(),
                location, "位置串已安装, 返回既有模块"
            );
            return Ok(existing.id());
        }

        let _guard = self.ctx.resolve_guard();

        // 符号名 + 版本完全重合视为冲突候选
        let mut collisions: Vec<u64> = Vec::new();
        for other in self.ctx.modules.by_symbolic_name(&descriptor.symbolic_name) {
            if other.current_generation().version() == &descriptor.version {
                collisions.push(other.id());
            }
        }
        let id = self.ctx.modules.allocate_id();
        if !collisions.is_empty() {
            let mut set = ShrinkableSet::new(collisions);
            self.ctx.hooks.filter_collisions(id, &mut set);
            let remaining = set.iter().next().copied();
            if let Some(existing_id) = remaining {
                return Err(FrameworkError::InstallCollision {
                    symbolic_name: descriptor.symbolic_name.clone(),
                    version: descriptor.version.clone(),
                    existing_id,
                });
            }
        }

        let generation = Generation::build(id, descriptor, &self.ctx.alloc)?;
        for export in generation.exports() {
            self.ctx
                .packages
                .get_or_create(&export.name)
                .add_exporter(Arc::clone(export));
        }
        for import in generation.imports() {
            self.ctx
                .packages
                .get_or_create(&import.name)
                .add_importer(Arc::clone(import));
        }

        let module = Arc::new(Module::new(id, location, generation));
        self.ctx.modules.insert(module);
        self.ctx
            .emit_transition(id, LifecycleState::Installed, LifecycleState::Installed);

        info!(
            module_id = id,
            symbolic_name = descriptor.symbolic_name.as_str(),
            version = %descriptor.version,
            location,
            "模块已安装"
        );
        Ok(id)
    }

    // ==================== 生命周期 ====================

    /// 解析模块（幂等）
    pub async fn resolve_module(&self, module_id: u64) -> Result<()> {
        self.executor.resolve(module_id).await
    }

    /// 启动模块（必要时先解析; 解析失败则模块保持 INSTALLED）
    pub async fn start_module(&self, module_id: u64) -> Result<()> {
        self.executor.start(module_id).await
    }

    /// 停止模块
    pub async fn stop_module(&self, module_id: u64) -> Result<()> {
        self.executor.stop(module_id).await
    }

    /// 更新模块到新描述符（原活跃则自动重启）
    pub async fn update_module(
        &self,
        module_id: u64,
        descriptor: &ModuleDescriptor,
    ) -> Result<()> {
        self.executor.update(module_id, descriptor).await
    }

    /// 卸载模块（终态）
    pub async fn uninstall_module(&self, module_id: u64) -> Result<()> {
        self.executor.uninstall(module_id).await
    }

    /// 刷新模块及其依赖闭包, 返回被刷新的模块 ID 集合
    pub async fn refresh(&self, seeds: &[u64]) -> Result<BTreeSet<u64>> {
        self.executor.refresh(seeds).await
    }

    /// 为模块登记激活器
    pub fn set_activator(&self, module_id: u64, activator: Arc<dyn ModuleActivator>) {
        self.executor.set_activator(module_id, activator);
    }

    // ==================== 查询 ====================

    /// 模块当前状态
    pub fn module_state(&self, module_id: u64) -> Result<LifecycleState> {
        self.ctx
            .modules
            .get(module_id)
            .map(|m| m.state())
            .ok_or(FrameworkError::ModuleNotFound(module_id))
    }

    /// 模块快照
    pub fn module_info(&self, module_id: u64) -> Result<ModuleInfo> {
        let module = self
            .ctx
            .modules
            .get(module_id)
            .ok_or(FrameworkError::ModuleNotFound(module_id))?;
        let generation = module.current_generation();
        Ok(ModuleInfo {
            id: module.id(),
            location: module.location().to_string(),
            symbolic_name: generation.symbolic_name().to_string(),
            version: generation.version().clone(),
            state: module.state(),
        })
    }

    /// 观察方可见的模块 ID 列表（过 find 钩子）
    pub fn visible_modules(&self, observer: u64) -> Vec<u64> {
        let ids: Vec<u64> = self.ctx.modules.all().iter().map(|m| m.id()).collect();
        let mut set = ShrinkableSet::new(ids);
        self.ctx.hooks.filter_find(observer, &mut set);
        set.into_inner()
    }

    // ==================== 监听器与钩子 ====================

    /// 注册模块事件监听器, 返回注册 id
    pub fn add_listener(&self, listener: Arc<dyn ModuleListener>) -> u64 {
        self.ctx.listeners.register(listener, &self.ctx.hooks)
    }

    /// 注销监听器
    pub fn remove_listener(&self, listener_id: u64) -> bool {
        self.ctx.listeners.unregister(listener_id, &self.ctx.hooks)
    }

    /// 钩子注册表
    pub fn hooks(&self) -> &HookRegistry {
        &self.ctx.hooks
    }

    // ==================== 启动与关停 ====================

    /// 按持久化状态自动启动模块
    ///
    /// 仅启动标记了自启动、且启动级别不超过配置门槛的模块。
    pub async fn auto_start(&self) {
        let threshold = self.ctx.config.lifecycle.start_level;
        for module in self.ctx.modules.all() {
            let id = module.id();
            if !self.ctx.state_store.autostart(id) {
                continue;
            }
            if self.ctx.state_store.start_level(id) > threshold {
                continue;
            }
            if let Err(error) = self.executor.start(id).await {
                warn!(module_id = id, %error, "自动启动失败");
            }
        }
    }

    /// 关停框架：按模块 ID 降序停止全部活跃模块
    ///
    /// 自启动标记保持不变, 下次 [`Framework::auto_start`] 按关停前
    /// 的状态恢复。
    pub async fn shutdown(&self) {
        info!("框架开始关停");
        let mut modules = self.ctx.modules.all();
        modules.sort_by_key(|m| std::cmp::Reverse(m.id()));
        for module in modules {
            if module.state().is_active() {
                if let Err(error) = self.executor.stop_transient(module.id()).await {
                    warn!(module_id = module.id(), %error, "关停时停止模块失败");
                }
            }
        }
        info!("框架已关停");
    }
}
