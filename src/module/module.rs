//! 模块与生命周期状态
//!
//! 模块是跨更新稳定的身份（数字 ID + 位置串）加上"当前代次"与
//! 生命周期状态的可变持有者。状态迁移在这里做合法性把关，
//! 调度与事件分发在生命周期执行器中。

use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::module::generation::Generation;
use crate::utils::{FrameworkError, Result};

/// 生命周期状态
///
/// `INSTALLED → RESOLVED → STARTING → ACTIVE → STOPPING → RESOLVED`，
/// 任意状态可进入终态 `UNINSTALLED`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// 已安装，尚未解析
    Installed,
    /// 已解析，布线就绪
    Resolved,
    /// 激活器执行中
    Starting,
    /// 运行中
    Active,
    /// 停止中
    Stopping,
    /// 已卸载（终态）
    Uninstalled,
}

impl LifecycleState {
    /// 迁移是否合法
    pub fn can_transition_to(self, to: LifecycleState) -> bool {
        use LifecycleState::*;
        if to == Uninstalled {
            return self != Uninstalled;
        }
        matches!(
            (self, to),
            (Installed, Resolved)
                | (Resolved, Starting)
                | (Resolved, Installed)
                | (Starting, Active)
                | (Starting, Resolved)
                | (Active, Stopping)
                | (Stopping, Resolved)
                | (Stopping, Installed)
        )
    }

    /// 模块是否处于活跃态（启动中或已启动）
    pub fn is_active(self) -> bool {
        matches!(self, LifecycleState::Starting | LifecycleState::Active)
    }

    /// 是否已解析（含之后的状态）
    pub fn is_resolved(self) -> bool {
        !matches!(
            self,
            LifecycleState::Installed | LifecycleState::Uninstalled
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LifecycleState::Installed => "INSTALLED",
            LifecycleState::Resolved => "RESOLVED",
            LifecycleState::Starting => "STARTING",
            LifecycleState::Active => "ACTIVE",
            LifecycleState::Stopping => "STOPPING",
            LifecycleState::Uninstalled => "UNINSTALLED",
        };
        write!(f, "{}", text)
    }
}

/// 锁内可变部分
#[derive(Debug)]
struct ModuleInner {
    /// 当前状态
    state: LifecycleState,
    /// 当前代次
    current: Arc<Generation>,
    /// 被更新取代但仍可能被布线引用的僵尸代次
    zombies: Vec<Arc<Generation>>,
    /// 下次框架启动时是否自动启动
    autostart: bool,
}

/// 模块
#[derive(Debug)]
pub struct Module {
    /// 模块 ID（单调分配，跨更新稳定）
    id: u64,
    /// 位置串（安装来源标识，跨更新稳定）
    location: String,
    /// 可变状态
    inner: RwLock<ModuleInner>,
}

impl Module {
    /// 以初始代次建立模块
    pub fn new(id: u64, location: impl Into<String>, generation: Arc<Generation>) -> Self {
        Self {
            id,
            location: location.into(),
            inner: RwLock::new(ModuleInner {
                state: LifecycleState::Installed,
                current: generation,
                zombies: Vec::new(),
                autostart: false,
            }),
        }
    }

    /// 模块 ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 位置串
    pub fn location(&self) -> &str {
        &self.location
    }

    /// 当前状态
    pub fn state(&self) -> LifecycleState {
        self.read().state
    }

    /// 当前代次
    pub fn current_generation(&self) -> Arc<Generation> {
        Arc::clone(&self.read().current)
    }

    /// 僵尸代次快照
    pub fn zombies(&self) -> Vec<Arc<Generation>> {
        self.read().zombies.clone()
    }

    /// 自启动标记
    pub fn autostart(&self) -> bool {
        self.read().autostart
    }

    /// 设置自启动标记
    pub fn set_autostart(&self, value: bool) {
        self.write().autostart = value;
    }

    /// 提交一次状态迁移
    ///
    /// # Errors
    ///
    /// 迁移不合法时返回 [`FrameworkError::IllegalState`]，状态不变。
    pub fn transition(&self, to: LifecycleState, operation: &str) -> Result<LifecycleState> {
        let mut inner = self.write();
        let from = inner.state;
        if !from.can_transition_to(to) {
            return Err(FrameworkError::IllegalState {
                module_id: self.id,
                state: from.to_string(),
                operation: operation.to_string(),
            });
        }
        inner.state = to;
        debug!(module_id = self.id, from = %from, to = %to, operation, "状态迁移");
        Ok(from)
    }

    /// 强制回退状态（刷新流程在停止超时后的兜底路径）
    pub fn force_state(&self, to: LifecycleState) -> LifecycleState {
        let mut inner = self.write();
        let from = inner.state;
        inner.state = to;
        from
    }

    /// 用新代次取代当前代次（更新）
    ///
    /// 旧代次被标记为僵尸并保留，返回旧代次供调用方清理布线。
    pub fn replace_generation(&self, generation: Arc<Generation>) -> Arc<Generation> {
        let mut inner = self.write();
        let old = std::mem::replace(&mut inner.current, generation);
        old.mark_zombie();
        inner.zombies.push(Arc::clone(&old));
        old
    }

    /// 取走全部僵尸代次（刷新丢弃僵尸布线时调用）
    pub fn drain_zombies(&self) -> Vec<Arc<Generation>> {
        std::mem::take(&mut self.write().zombies)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ModuleInner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ModuleInner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::descriptor::ModuleDescriptor;
    use crate::wiring::HandleAllocator;

    fn module(id: u64) -> Module {
        let desc = ModuleDescriptor::new("m", "1.0.0".parse().unwrap());
        let generation = Generation::build(id, &desc, &HandleAllocator::new()).unwrap();
        Module::new(id, format!("mem:{}", id), generation)
    }

    #[test]
    fn test_happy_path_transitions() {
        let m = module(1);
        assert_eq!(m.state(), LifecycleState::Installed);
        m.transition(LifecycleState::Resolved, "resolve").unwrap();
        m.transition(LifecycleState::Starting, "start").unwrap();
        m.transition(LifecycleState::Active, "start").unwrap();
        m.transition(LifecycleState::Stopping, "stop").unwrap();
        m.transition(LifecycleState::Resolved, "stop").unwrap();
        m.transition(LifecycleState::Uninstalled, "uninstall").unwrap();
        assert_eq!(m.state(), LifecycleState::Uninstalled);
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let m = module(1);
        // 未解析不能启动
        let err = m.transition(LifecycleState::Starting, "start").unwrap_err();
        assert!(matches!(err, FrameworkError::IllegalState { .. }));
        assert_eq!(m.state(), LifecycleState::Installed);

        // 终态不可离开
        m.transition(LifecycleState::Uninstalled, "uninstall").unwrap();
        assert!(m.transition(LifecycleState::Resolved, "resolve").is_err());
        assert!(m.transition(LifecycleState::Uninstalled, "uninstall").is_err());
    }

    #[test]
    fn test_uninstall_from_any_live_state() {
        for prepare in 0..3 {
            let m = module(1);
            if prepare >= 1 {
                m.transition(LifecycleState::Resolved, "resolve").unwrap();
            }
            if prepare >= 2 {
                m.transition(LifecycleState::Starting, "start").unwrap();
                m.transition(LifecycleState::Active, "start").unwrap();
            }
            m.transition(LifecycleState::Uninstalled, "uninstall").unwrap();
        }
    }

    #[test]
    fn test_replace_generation_marks_zombie() {
        let m = module(1);
        let old = m.current_generation();

        let desc = ModuleDescriptor::new("m", "2.0.0".parse().unwrap());
        let next = Generation::build(1, &desc, &HandleAllocator::new()).unwrap();
        let replaced = m.replace_generation(next);

        assert_eq!(replaced.id(), old.id());
        assert!(replaced.is_zombie());
        assert_eq!(m.current_generation().version().to_string(), "2.0.0");
        assert_eq!(m.zombies().len(), 1);
        assert_eq!(m.drain_zombies().len(), 1);
        assert!(m.zombies().is_empty());
    }
}
