//! 生命周期执行器
//!
//! 串行化规则：同一模块同一时刻至多一个生命周期操作在途。闸门用
//! 模块 ID 集合记录在途操作，后来者在 Notify 上等待，完成方
//! notify_waiters 唤醒。激活器代码在独立的工作任务里执行，任务内
//! 用 task-local 标记当前操作的模块；激活器里再对同一模块发起
//! 生命周期调用会被识别为重入并拒绝，而不是造成第二个并发迁移。

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::core::context::FrameworkContext;
use crate::lifecycle::events::RefreshEvent;
use crate::module::{Generation, LifecycleState, Module, ModuleDescriptor};
use crate::resolver::Resolver;
use crate::utils::{FrameworkError, Result};

tokio::task_local! {
    /// 当前工作任务正在操作的模块 ID
    static OPERATING_MODULE: u64;
}

/// 模块激活器
///
/// 宿主为模块提供的启动/停止回调。在独立工作任务中执行，
/// 慢激活器不会卡住框架锁。
#[async_trait]
pub trait ModuleActivator: Send + Sync {
    /// 模块启动
    async fn start(&self, module_id: u64) -> anyhow::Result<()>;

    /// 模块停止
    async fn stop(&self, module_id: u64) -> anyhow::Result<()>;
}

/// 生命周期执行器
pub struct LifecycleExecutor {
    ctx: Arc<FrameworkContext>,
    /// 模块 ID → 激活器
    activators: RwLock<HashMap<u64, Arc<dyn ModuleActivator>>>,
    /// 在途操作的模块集合
    in_flight: Mutex<HashSet<u64>>,
    /// 完成通知
    notify: Notify,
}

impl std::fmt::Debug for LifecycleExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleExecutor").finish_non_exhaustive()
    }
}

impl LifecycleExecutor {
    /// 绑定上下文
    pub fn new(ctx: Arc<FrameworkContext>) -> Self {
        Self {
            ctx,
            activators: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            notify: Notify::new(),
        }
    }

    /// 为模块登记激活器
    pub fn set_activator(&self, module_id: u64, activator: Arc<dyn ModuleActivator>) {
        self.activators_write().insert(module_id, activator);
    }

    /// 移除模块的激活器
    pub fn remove_activator(&self, module_id: u64) {
        self.activators_write().remove(&module_id);
    }

    // ==================== 闸门 ====================

    /// 检测重入：当前任务是否正在操作该模块
    fn is_reentrant(module_id: u64) -> bool {
        OPERATING_MODULE
            .try_with(|id| *id == module_id)
            .unwrap_or(false)
    }

    fn try_enter(&self, module_id: u64) -> bool {
        self.in_flight_lock().insert(module_id)
    }

    /// 占用模块的操作闸门；已有在途操作则等待其完成
    async fn enter(&self, module_id: u64, operation: &str) -> Result<()> {
        if Self::is_reentrant(module_id) {
            return Err(FrameworkError::IllegalState {
                module_id,
                state: "IN-OPERATION".to_string(),
                operation: format!("{} (激活器内重入)", operation),
            });
        }
        loop {
            let notified = self.notify.notified();
            if self.try_enter(module_id) {
                return Ok(());
            }
            debug!(module_id, operation, "模块有在途操作, 等待");
            notified.await;
        }
    }

    /// 有限次重试占闸门（刷新抢占慢模块的路径）
    async fn enter_with_retries(&self, module_id: u64) -> bool {
        let retries = self.ctx.config.lifecycle.stop_retries;
        let wait = Duration::from_millis(self.ctx.config.lifecycle.stop_wait_ms);
        for _ in 0..=retries {
            if Self::is_reentrant(module_id) {
                return false;
            }
            if self.try_enter(module_id) {
                return true;
            }
            tokio::time::sleep(wait).await;
        }
        warn!(
            module_id,
            retries,
            error = %FrameworkError::LifecycleTimeout { module_id, retries },
            "等待在途操作超时, 刷新将强制推进"
        );
        false
    }

    /// 释放闸门并唤醒等待者
    fn exit(&self, module_id: u64) {
        self.in_flight_lock().remove(&module_id);
        self.notify.notify_waiters();
    }

    // ==================== 对外操作 ====================

    /// 解析模块（必要时递归解析提供方）
    pub async fn resolve(&self, module_id: u64) -> Result<()> {
        self.enter(module_id, "resolve").await?;
        let result = match self.module(module_id) {
            Ok(module) => {
                let _guard = self.ctx.resolve_guard();
                Resolver::new(&self.ctx).resolve_module(&module)
            }
            Err(error) => Err(error),
        };
        self.exit(module_id);
        result
    }

    /// 启动模块
    ///
    /// 未解析的先走解析；解析失败时模块保持 INSTALLED 并返回解析错误。
    pub async fn start(&self, module_id: u64) -> Result<()> {
        self.enter(module_id, "start").await?;
        let result = match self.module(module_id) {
            Ok(module) => {
                let result = self.do_start(&module).await;
                if result.is_ok() {
                    self.ctx.state_store.set_autostart(module_id, true);
                }
                result
            }
            Err(error) => Err(error),
        };
        self.exit(module_id);
        result
    }

    /// 停止模块（对非活跃模块是空操作）
    pub async fn stop(&self, module_id: u64) -> Result<()> {
        self.enter(module_id, "stop").await?;
        let result = match self.module(module_id) {
            Ok(module) => {
                self.ctx.state_store.set_autostart(module_id, false);
                self.do_stop(&module).await
            }
            Err(error) => Err(error),
        };
        self.exit(module_id);
        result
    }

    /// 停止模块但不动自启动标记（框架关停路径）
    ///
    /// 用户显式 stop 会清除自启动标记, 框架整体关停不会：下次
    /// 自动启动时模块应恢复到关停前的状态。
    pub async fn stop_transient(&self, module_id: u64) -> Result<()> {
        self.enter(module_id, "stop").await?;
        let result = match self.module(module_id) {
            Ok(module) => self.do_stop(&module).await,
            Err(error) => Err(error),
        };
        self.exit(module_id);
        result
    }

    /// 更新模块：停止（若活跃）、换代次、原活跃则重启
    pub async fn update(&self, module_id: u64, descriptor: &ModuleDescriptor) -> Result<()> {
        self.enter(module_id, "update").await?;
        let result = self.do_update(module_id, descriptor).await;
        self.exit(module_id);
        result
    }

    /// 卸载模块（终态）
    pub async fn uninstall(&self, module_id: u64) -> Result<()> {
        self.enter(module_id, "uninstall").await?;
        let result = self.do_uninstall(module_id).await;
        self.exit(module_id);
        result
    }

    /// 刷新：丢弃僵尸布线并让依赖闭包重新解析
    ///
    /// 返回被刷新的模块 ID 集合。闭包内原本活跃的模块会经历
    /// STOPPING → RESOLVED → STARTING → ACTIVE 的完整往返。
    pub async fn refresh(&self, seeds: &[u64]) -> Result<BTreeSet<u64>> {
        // 种子代次：当前代次 + 僵尸代次
        let mut seed_gens = Vec::new();
        for id in seeds {
            let module = self.module(*id)?;
            seed_gens.push(module.current_generation().id());
            for zombie in module.zombies() {
                seed_gens.push(zombie.id());
            }
        }

        let closure = Resolver::new(&self.ctx).closure(&seed_gens);
        let mut module_ids: BTreeSet<u64> = seeds.iter().copied().collect();
        for gen in &closure {
            if let Some(module) = self.ctx.modules.owner_of(*gen) {
                module_ids.insert(module.id());
            }
        }

        info!(modules = ?module_ids, "刷新闭包确定");

        // 升序占闸门；占不到的记为强制推进
        let mut held = Vec::new();
        let mut forced = BTreeSet::new();
        for id in &module_ids {
            if self.enter_with_retries(*id).await {
                held.push(*id);
            } else {
                forced.insert(*id);
            }
        }

        let mut was_active = BTreeSet::new();
        for id in module_ids.iter().rev() {
            let Some(module) = self.ctx.modules.get(*id) else {
                continue;
            };
            if module.state().is_active() {
                was_active.insert(*id);
                if forced.contains(id) {
                    // 抢不到闸门：强制回退状态, 不等激活器
                    let from = module.force_state(LifecycleState::Resolved);
                    self.ctx
                        .emit_transition(*id, from, LifecycleState::Resolved);
                } else if let Err(e) = self.do_stop(&module).await {
                    warn!(module_id = *id, error = %e, "刷新停止失败, 继续推进");
                }
            }
        }

        // 清布线：当前代次与僵尸代次的全部布线摘除, 僵尸代次整体出表
        for id in &module_ids {
            let Some(module) = self.ctx.modules.get(*id) else {
                continue;
            };
            let current = module.current_generation();
            self.clear_generation_wiring(&current);
            for zombie in module.drain_zombies() {
                self.clear_generation_wiring(&zombie);
                self.ctx.packages.remove_generation(zombie.id());
            }
            match module.state() {
                LifecycleState::Resolved => {
                    module.transition(LifecycleState::Installed, "refresh")?;
                    self.ctx.emit_transition(
                        *id,
                        LifecycleState::Resolved,
                        LifecycleState::Installed,
                    );
                }
                LifecycleState::Installed | LifecycleState::Uninstalled => {}
                other => {
                    let from = module.force_state(LifecycleState::Installed);
                    warn!(module_id = *id, from = %other, "刷新强制回退状态");
                    self.ctx.emit_transition(*id, from, LifecycleState::Installed);
                }
            }
        }

        // 原活跃者重启（重启内部会先重新解析）
        for id in &module_ids {
            if !was_active.contains(id) {
                continue;
            }
            let Some(module) = self.ctx.modules.get(*id) else {
                continue;
            };
            if let Err(e) = self.do_start(&module).await {
                error!(module_id = *id, error = %e, "刷新后重启失败");
            }
        }

        for id in held {
            self.exit(id);
        }

        let event = RefreshEvent {
            refreshed: module_ids.clone(),
        };
        self.ctx.listeners.dispatch_refresh(&event);
        Ok(module_ids)
    }

    // ==================== 内部流程（假定闸门已占） ====================

    async fn do_start(&self, module: &Arc<Module>) -> Result<()> {
        match module.state() {
            LifecycleState::Active => return Ok(()),
            LifecycleState::Installed => {
                // 解析失败时模块保持 INSTALLED
                let _guard = self.ctx.resolve_guard();
                Resolver::new(&self.ctx).resolve_module(module)?;
            }
            LifecycleState::Resolved => {}
            other => {
                return Err(FrameworkError::IllegalState {
                    module_id: module.id(),
                    state: other.to_string(),
                    operation: "start".to_string(),
                });
            }
        }

        if module.current_generation().is_fragment() {
            return Err(FrameworkError::IllegalState {
                module_id: module.id(),
                state: module.state().to_string(),
                operation: "start (片段不可启动)".to_string(),
            });
        }

        module.transition(LifecycleState::Starting, "start")?;
        self.ctx
            .emit_transition(module.id(), LifecycleState::Resolved, LifecycleState::Starting);

        match self.run_activator(module.id(), true).await {
            Ok(()) => {
                module.transition(LifecycleState::Active, "start")?;
                self.ctx
                    .emit_transition(module.id(), LifecycleState::Starting, LifecycleState::Active);
                info!(module_id = module.id(), "模块已启动");
                Ok(())
            }
            Err(e) => {
                module.transition(LifecycleState::Resolved, "start")?;
                self.ctx
                    .emit_transition(module.id(), LifecycleState::Starting, LifecycleState::Resolved);
                Err(e)
            }
        }
    }

    async fn do_stop(&self, module: &Arc<Module>) -> Result<()> {
        match module.state() {
            LifecycleState::Active => {}
            LifecycleState::Uninstalled => {
                return Err(FrameworkError::IllegalState {
                    module_id: module.id(),
                    state: module.state().to_string(),
                    operation: "stop".to_string(),
                });
            }
            // 非活跃：空操作
            _ => return Ok(()),
        }

        module.transition(LifecycleState::Stopping, "stop")?;
        self.ctx
            .emit_transition(module.id(), LifecycleState::Active, LifecycleState::Stopping);

        let result = self.run_activator(module.id(), false).await;

        module.transition(LifecycleState::Resolved, "stop")?;
        self.ctx
            .emit_transition(module.id(), LifecycleState::Stopping, LifecycleState::Resolved);
        info!(module_id = module.id(), "模块已停止");
        result
    }

    async fn do_update(&self, module_id: u64, descriptor: &ModuleDescriptor) -> Result<()> {
        let module = self.module(module_id)?;
        if module.state() == LifecycleState::Uninstalled {
            return Err(FrameworkError::IllegalState {
                module_id,
                state: module.state().to_string(),
                operation: "update".to_string(),
            });
        }

        let was_active = module.state().is_active();
        if was_active {
            self.do_stop(&module).await?;
        }

        // 新代次先整体构建成功, 旧代次才被取代
        let next = Generation::build(module_id, descriptor, &self.ctx.alloc)?;
        for export in next.exports() {
            self.ctx
                .packages
                .get_or_create(&export.name)
                .add_exporter(Arc::clone(export));
        }
        for import in next.imports() {
            self.ctx
                .packages
                .get_or_create(&import.name)
                .add_importer(Arc::clone(import));
        }

        let old = module.replace_generation(next);

        // 旧代次需求侧布线清除; 提供方侧布线保留（僵尸布线, 待刷新）
        self.detach_from_host(&old);
        {
            let mut wires = self.ctx.wires();
            let ids: Vec<_> = wires
                .wires_required_by(old.id())
                .iter()
                .map(|w| w.id)
                .collect();
            for id in ids {
                wires.remove_wire(id);
            }
        }
        for import in old.imports() {
            if let Some(pkg) = self.ctx.packages.get(&import.name) {
                pkg.remove_importer(old.id());
            }
        }

        if module.state() == LifecycleState::Resolved {
            module.transition(LifecycleState::Installed, "update")?;
            self.ctx
                .emit_transition(module_id, LifecycleState::Resolved, LifecycleState::Installed);
        }

        info!(
            module_id,
            version = %module.current_generation().version(),
            zombie = old.id().0,
            "模块已更新"
        );

        if was_active {
            self.do_start(&module).await?;
        }
        Ok(())
    }

    async fn do_uninstall(&self, module_id: u64) -> Result<()> {
        let module = self.module(module_id)?;
        if module.state().is_active() {
            if let Err(e) = self.do_stop(&module).await {
                warn!(module_id, error = %e, "卸载前停止失败, 继续卸载");
            }
        }

        let from = module.state();
        module.transition(LifecycleState::Uninstalled, "uninstall")?;
        self.ctx
            .emit_transition(module_id, from, LifecycleState::Uninstalled);

        // 布线与包登记两侧对称清理, 不留半条布线
        let current = module.current_generation();
        self.clear_generation_wiring(&current);
        self.ctx.packages.remove_generation(current.id());
        for zombie in module.drain_zombies() {
            self.clear_generation_wiring(&zombie);
            self.ctx.packages.remove_generation(zombie.id());
        }

        self.ctx.modules.remove(module_id);
        self.remove_activator(module_id);
        self.ctx.state_store.forget(module_id);
        info!(module_id, "模块已卸载");
        Ok(())
    }

    /// 片段出布线前, 先从宿主代次摘掉附着记录
    fn detach_from_host(&self, generation: &Arc<Generation>) {
        let Some(host_req) = generation.host_requirement() else {
            return;
        };
        let host_gen_id = {
            let wires = self.ctx.wires();
            wires.wire_of_requirement(host_req).map(|w| w.provider)
        };
        let Some(host_gen_id) = host_gen_id else {
            return;
        };
        if let Some(host) = self.ctx.modules.owner_of(host_gen_id) {
            let host_gen = host.current_generation();
            if host_gen.id() == host_gen_id {
                host_gen.detach_fragment(generation.id());
            }
        }
    }

    /// 摘除代次全部布线, 并把失去布线的导出从提供方降级
    fn clear_generation_wiring(&self, generation: &Arc<Generation>) {
        self.detach_from_host(generation);
        {
            let mut wires = self.ctx.wires();
            wires.remove_generation(generation.id());
        }
        let wires = self.ctx.wires();
        for export in generation.exports() {
            if wires.wires_of_capability(export.capability).is_empty() {
                if let Some(pkg) = self.ctx.packages.get(&export.name) {
                    pkg.remove_provider(export.capability);
                }
            }
        }
    }

    /// 在独立工作任务里执行激活器
    async fn run_activator(&self, module_id: u64, starting: bool) -> Result<()> {
        let activator = self.activators_read().get(&module_id).map(Arc::clone);
        let Some(activator) = activator else {
            return Ok(());
        };

        let handle = tokio::spawn(OPERATING_MODULE.scope(module_id, async move {
            if starting {
                activator.start(module_id).await
            } else {
                activator.stop(module_id).await
            }
        }));

        match handle.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(FrameworkError::ActivatorFailed { module_id, source }),
            Err(join_error) => Err(FrameworkError::ActivatorFailed {
                module_id,
                source: anyhow::anyhow!("激活器任务崩溃: {}", join_error),
            }),
        }
    }

    fn module(&self, module_id: u64) -> Result<Arc<Module>> {
        self.ctx
            .modules
            .get(module_id)
            .ok_or(FrameworkError::ModuleNotFound(module_id))
    }

    fn in_flight_lock(&self) -> std::sync::MutexGuard<'_, HashSet<u64>> {
        match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn activators_read(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<u64, Arc<dyn ModuleActivator>>> {
        match self.activators.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn activators_write(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<u64, Arc<dyn ModuleActivator>>> {
        match self.activators.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
