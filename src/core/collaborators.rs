//! 外部协作者契约
//!
//! 安全与持久化是框架之外的关注点，这里只定义框架消费的最小契约
//! 和开箱可用的缺省实现。

use std::collections::HashMap;
use std::sync::Mutex;

use crate::wiring::{Capability, Requirement};

/// 安全协作者
///
/// 解析器在把能力视为"可提供"、需求视为"可发起"之前各问一次。
/// 未配置时一律放行。
pub trait SecurityPolicy: Send + Sync {
    /// 能力是否可被提供
    fn can_provide(&self, capability: &Capability) -> bool;

    /// 需求是否可被发起
    fn can_require(&self, requirement: &Requirement) -> bool;
}

/// 缺省安全策略：全部放行
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllPolicy;

impl SecurityPolicy for AllowAllPolicy {
    fn can_provide(&self, _capability: &Capability) -> bool {
        true
    }

    fn can_require(&self, _requirement: &Requirement) -> bool {
        true
    }
}

/// 持久化状态协作者
///
/// 只保存每个模块的自启动标记与启动级别，只用于决定是否自动启动
/// 已解析模块，绝不影响解析本身。
pub trait StateStore: Send + Sync {
    /// 读自启动标记
    fn autostart(&self, module_id: u64) -> bool;

    /// 写自启动标记
    fn set_autostart(&self, module_id: u64, value: bool);

    /// 读启动级别
    fn start_level(&self, module_id: u64) -> u32;

    /// 写启动级别
    fn set_start_level(&self, module_id: u64, level: u32);

    /// 模块卸载后清理其记录
    fn forget(&self, module_id: u64);
}

/// 缺省持久化：进程内存表
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<u64, (bool, u32)>>,
}

impl MemoryStateStore {
    /// 创建空表
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, (bool, u32)>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl StateStore for MemoryStateStore {
    fn autostart(&self, module_id: u64) -> bool {
        self.lock().get(&module_id).map(|e| e.0).unwrap_or(false)
    }

    fn set_autostart(&self, module_id: u64, value: bool) {
        self.lock().entry(module_id).or_insert((false, 0)).0 = value;
    }

    fn start_level(&self, module_id: u64) -> u32 {
        self.lock().get(&module_id).map(|e| e.1).unwrap_or(0)
    }

    fn set_start_level(&self, module_id: u64, level: u32) {
        self.lock().entry(module_id).or_insert((false, 0)).1 = level;
    }

    fn forget(&self, module_id: u64) {
        self.lock().remove(&module_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_state_store_roundtrip() {
        let store = MemoryStateStore::new();
        assert!(!store.autostart(1));
        assert_eq!(store.start_level(1), 0);

        store.set_autostart(1, true);
        store.set_start_level(1, 3);
        assert!(store.autostart(1));
        assert_eq!(store.start_level(1), 3);

        store.forget(1);
        assert!(!store.autostart(1));
    }
}
