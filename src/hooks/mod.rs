//! 钩子与可见性过滤
//!
//! 受信扩展可以在框架把结果交还调用方之前收窄可见范围：
//!
//! - find 钩子：过滤某个观察方能看到的模块集合
//! - event 钩子：过滤一次事件的接收方集合
//! - collision 钩子：过滤安装/更新时的符号名冲突候选
//! - listener 钩子：观察监听器的注册与注销
//!
//! 钩子只拿到只减不增的集合视图。钩子抛错被捕获并记日志，
//! 绝不让一个坏扩展拖垮整次分发。分发顺序：ranking 降序，
//! 相同 ranking 按注册 id 升序。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::lifecycle::ModuleEvent;

// ============================================================================
// 只减集合视图
// ============================================================================

/// 只减不增的集合视图
///
/// 钩子可以从中摘除条目，但没有任何追加入口。
#[derive(Debug)]
pub struct ShrinkableSet<T: PartialEq> {
    items: Vec<T>,
}

impl<T: PartialEq> ShrinkableSet<T> {
    /// 用候选集合建视图
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    /// 摘除一个条目，返回是否存在
    pub fn remove(&mut self, item: &T) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i != item);
        self.items.len() != before
    }

    /// 按谓词保留
    pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        self.items.retain(keep);
    }

    /// 是否包含
    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }

    /// 条目数
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 遍历
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// 取回剩余条目
    pub fn into_inner(self) -> Vec<T> {
        self.items
    }
}

// ============================================================================
// 钩子契约
// ============================================================================

/// find 钩子：过滤观察方可见的模块集合
pub trait FindHook: Send + Sync {
    /// 收窄 `candidates`（模块 ID 集合）
    fn filter_find(
        &self,
        observer: u64,
        candidates: &mut ShrinkableSet<u64>,
    ) -> anyhow::Result<()>;
}

/// event 钩子：过滤一次事件的接收方
pub trait EventHook: Send + Sync {
    /// 收窄 `recipients`（监听器 ID 集合）
    fn filter_event(
        &self,
        event: &ModuleEvent,
        recipients: &mut ShrinkableSet<u64>,
    ) -> anyhow::Result<()>;
}

/// collision 钩子：过滤安装冲突候选
///
/// 留在集合里的候选仍视为冲突；钩子清空集合即放行本次安装。
pub trait CollisionHook: Send + Sync {
    /// 收窄 `collisions`（与安装方冲突的模块 ID 集合）
    fn filter_collisions(
        &self,
        installer: u64,
        collisions: &mut ShrinkableSet<u64>,
    ) -> anyhow::Result<()>;
}

/// listener 钩子：观察监听器注册变化
pub trait ListenerHook: Send + Sync {
    /// 监听器集合发生变化
    fn listeners_changed(&self, added: &[u64], removed: &[u64]) -> anyhow::Result<()>;
}

// ============================================================================
// 钩子注册表
// ============================================================================

/// 一条注册记录
struct HookEntry<H: ?Sized> {
    id: u64,
    ranking: i32,
    hook: Arc<H>,
}

impl<H: ?Sized> Clone for HookEntry<H> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            ranking: self.ranking,
            hook: Arc::clone(&self.hook),
        }
    }
}

/// 按 ranking 降序、id 升序取分发快照
fn dispatch_order<H: ?Sized>(entries: &RwLock<Vec<HookEntry<H>>>) -> Vec<HookEntry<H>> {
    let mut snapshot = match entries.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    snapshot.sort_by(|a, b| b.ranking.cmp(&a.ranking).then(a.id.cmp(&b.id)));
    snapshot
}

fn register<H: ?Sized>(
    entries: &RwLock<Vec<HookEntry<H>>>,
    id: u64,
    ranking: i32,
    hook: Arc<H>,
) {
    let mut guard = match entries.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard.push(HookEntry { id, ranking, hook });
}

fn unregister<H: ?Sized>(entries: &RwLock<Vec<HookEntry<H>>>, id: u64) -> bool {
    let mut guard = match entries.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let before = guard.len();
    guard.retain(|e| e.id != id);
    guard.len() != before
}

/// 钩子注册表
#[derive(Default)]
pub struct HookRegistry {
    next_id: AtomicU64,
    find: RwLock<Vec<HookEntry<dyn FindHook>>>,
    event: RwLock<Vec<HookEntry<dyn EventHook>>>,
    collision: RwLock<Vec<HookEntry<dyn CollisionHook>>>,
    listener: RwLock<Vec<HookEntry<dyn ListenerHook>>>,
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry").finish_non_exhaustive()
    }
}

impl HookRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// 注册 find 钩子，返回注册 id
    pub fn register_find(&self, ranking: i32, hook: Arc<dyn FindHook>) -> u64 {
        let id = self.next_id();
        register(&self.find, id, ranking, hook);
        id
    }

    /// 注册 event 钩子
    pub fn register_event(&self, ranking: i32, hook: Arc<dyn EventHook>) -> u64 {
        let id = self.next_id();
        register(&self.event, id, ranking, hook);
        id
    }

    /// 注册 collision 钩子
    pub fn register_collision(&self, ranking: i32, hook: Arc<dyn CollisionHook>) -> u64 {
        let id = self.next_id();
        register(&self.collision, id, ranking, hook);
        id
    }

    /// 注册 listener 钩子
    pub fn register_listener(&self, ranking: i32, hook: Arc<dyn ListenerHook>) -> u64 {
        let id = self.next_id();
        register(&self.listener, id, ranking, hook);
        id
    }

    /// 注销任意种类的钩子
    pub fn unregister(&self, id: u64) -> bool {
        unregister(&self.find, id)
            || unregister(&self.event, id)
            || unregister(&self.collision, id)
            || unregister(&self.listener, id)
    }

    /// 逐个 find 钩子过滤候选集合
    pub fn filter_find(&self, observer: u64, candidates: &mut ShrinkableSet<u64>) {
        for entry in dispatch_order(&self.find) {
            if let Err(error) = entry.hook.filter_find(observer, candidates) {
                warn!(hook_id = entry.id, %error, "find 钩子失败, 跳过");
            }
        }
    }

    /// 逐个 event 钩子过滤接收方集合
    pub fn filter_event(&self, event: &ModuleEvent, recipients: &mut ShrinkableSet<u64>) {
        for entry in dispatch_order(&self.event) {
            if let Err(error) = entry.hook.filter_event(event, recipients) {
                warn!(hook_id = entry.id, %error, "event 钩子失败, 跳过");
            }
        }
    }

    /// 逐个 collision 钩子过滤冲突候选
    pub fn filter_collisions(&self, installer: u64, collisions: &mut ShrinkableSet<u64>) {
        for entry in dispatch_order(&self.collision) {
            if let Err(error) = entry.hook.filter_collisions(installer, collisions) {
                warn!(hook_id = entry.id, %error, "collision 钩子失败, 跳过");
            }
        }
    }

    /// 通知监听器集合变化
    pub fn notify_listeners_changed(&self, added: &[u64], removed: &[u64]) {
        for entry in dispatch_order(&self.listener) {
            if let Err(error) = entry.hook.listeners_changed(added, removed) {
                warn!(hook_id = entry.id, %error, "listener 钩子失败, 跳过");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RemoveHook {
        target: u64,
        log: Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
        fail: bool,
    }

    impl FindHook for RemoveHook {
        fn filter_find(
            &self,
            _observer: u64,
            candidates: &mut ShrinkableSet<u64>,
        ) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(self.name);
            if self.fail {
                anyhow::bail!("故意失败");
            }
            candidates.remove(&self.target);
            Ok(())
        }
    }

    #[test]
    fn test_shrinkable_set_remove_only() {
        let mut set = ShrinkableSet::new(vec![1u64, 2, 3]);
        assert!(set.remove(&2));
        assert!(!set.remove(&2));
        assert_eq!(set.into_inner(), vec![1, 3]);
    }

    #[test]
    fn test_dispatch_order_ranking_desc_then_id_asc() {
        let registry = HookRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        // 注册顺序：low(0), high(10), mid-a(5), mid-b(5)
        for (name, ranking) in [("low", 0), ("high", 10), ("mid-a", 5), ("mid-b", 5)] {
            registry.register_find(
                ranking,
                Arc::new(RemoveHook {
                    target: 999,
                    log: Arc::clone(&log),
                    name,
                    fail: false,
                }),
            );
        }

        let mut set = ShrinkableSet::new(vec![1u64]);
        registry.filter_find(0, &mut set);
        assert_eq!(*log.lock().unwrap(), vec!["high", "mid-a", "mid-b", "low"]);
    }

    #[test]
    fn test_failing_hook_does_not_abort_dispatch() {
        let registry = HookRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.register_find(
            10,
            Arc::new(RemoveHook {
                target: 1,
                log: Arc::clone(&log),
                name: "broken",
                fail: true,
            }),
        );
        registry.register_find(
            0,
            Arc::new(RemoveHook {
                target: 2,
                log: Arc::clone(&log),
                name: "working",
                fail: false,
            }),
        );

        let mut set = ShrinkableSet::new(vec![1u64, 2, 3]);
        registry.filter_find(0, &mut set);
        // 坏钩子的摘除没有生效，好钩子的生效了
        assert_eq!(set.into_inner(), vec![1, 3]);
        assert_eq!(*log.lock().unwrap(), vec!["broken", "working"]);
    }

    #[test]
    fn test_unregister() {
        let registry = HookRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = registry.register_find(
            0,
            Arc::new(RemoveHook {
                target: 1,
                log: Arc::clone(&log),
                name: "h",
                fail: false,
            }),
        );

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));

        let mut set = ShrinkableSet::new(vec![1u64]);
        registry.filter_find(0, &mut set);
        assert_eq!(set.len(), 1);
    }
}
