//! 生命周期事件与监听器
//!
//! 每次提交的状态迁移产出一条事件记录。同一模块的事件按迁移提交
//! 顺序投递（由全框架单调序号背书），跨模块顺序不作保证。

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::hooks::{HookRegistry, ShrinkableSet};
use crate::module::LifecycleState;

/// 一条模块生命周期事件
#[derive(Debug, Clone)]
pub struct ModuleEvent {
    /// 模块 ID
    pub module_id: u64,
    /// 迁移前状态
    pub from: LifecycleState,
    /// 迁移后状态
    pub to: LifecycleState,
    /// 全框架单调序号（同一模块内保证有序）
    pub ordinal: u64,
    /// 提交时刻
    pub timestamp: DateTime<Utc>,
}

/// 一次刷新的结果记录
#[derive(Debug, Clone)]
pub struct RefreshEvent {
    /// 被刷新的模块 ID 集合
    pub refreshed: BTreeSet<u64>,
}

/// 模块事件监听器
pub trait ModuleListener: Send + Sync {
    /// 收到一条生命周期事件
    fn on_event(&self, event: &ModuleEvent);

    /// 收到一次刷新记录（缺省忽略）
    fn on_refresh(&self, _event: &RefreshEvent) {}
}

/// 事件序号发生器
#[derive(Debug, Default)]
pub struct EventOrdinal {
    next: AtomicU64,
}

impl EventOrdinal {
    /// 取下一个序号
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

/// 监听器注册记录
struct ListenerEntry {
    id: u64,
    listener: Arc<dyn ModuleListener>,
}

/// 监听器注册表
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    entries: RwLock<Vec<ListenerEntry>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry").finish_non_exhaustive()
    }
}

impl ListenerRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册监听器，返回注册 id
    pub fn register(&self, listener: Arc<dyn ModuleListener>, hooks: &HookRegistry) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.write().push(ListenerEntry { id, listener });
        hooks.notify_listeners_changed(&[id], &[]);
        id
    }

    /// 注销监听器
    pub fn unregister(&self, id: u64, hooks: &HookRegistry) -> bool {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        drop(entries);
        if removed {
            hooks.notify_listeners_changed(&[], &[id]);
        }
        removed
    }

    /// 投递一条事件，接收方集合先过 event 钩子
    pub fn dispatch(&self, event: &ModuleEvent, hooks: &HookRegistry) {
        let entries: Vec<(u64, Arc<dyn ModuleListener>)> = self
            .read()
            .iter()
            .map(|e| (e.id, Arc::clone(&e.listener)))
            .collect();

        let mut recipients = ShrinkableSet::new(entries.iter().map(|(id, _)| *id).collect());
        hooks.filter_event(event, &mut recipients);

        debug!(
            module_id = event.module_id,
            from = %event.from,
            to = %event.to,
            ordinal = event.ordinal,
            recipients = recipients.len(),
            "投递生命周期事件"
        );

        for (id, listener) in entries {
            if recipients.contains(&id) {
                listener.on_event(event);
            }
        }
    }

    /// 投递一次刷新记录（不过钩子，刷新结果面向全体监听器）
    pub fn dispatch_refresh(&self, event: &RefreshEvent) {
        let listeners: Vec<Arc<dyn ModuleListener>> =
            self.read().iter().map(|e| Arc::clone(&e.listener)).collect();
        for listener in listeners {
            listener.on_refresh(event);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<ListenerEntry>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<ListenerEntry>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
