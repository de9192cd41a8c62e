//! 框架上下文
//!
//! 一个框架实例的全部共享状态都挂在这里：模块表、包注册表、
//! 布线表、钩子与监听器注册表、句柄与事件序号计数器。没有任何
//! 进程级全局，测试里可以并存多个互不干扰的框架实例。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;

use crate::core::collaborators::{AllowAllPolicy, MemoryStateStore, SecurityPolicy, StateStore};
use crate::core::config::FrameworkConfig;
use crate::filter::{AttrMap, AttrValue};
use crate::hooks::HookRegistry;
use crate::lifecycle::{EventOrdinal, ListenerRegistry, ModuleEvent};
use crate::module::{LifecycleState, Module};
use crate::packages::PackageRegistry;
use crate::utils::Result;
use crate::wiring::{
    attributes, namespaces, Capability, CapabilityOrigin, GenerationId, HandleAllocator, WireTable,
};

/// 模块表
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    /// 模块 ID 计数器（0 保留给框架自身）
    next_id: AtomicU64,
    /// ID → 模块
    by_id: RwLock<HashMap<u64, Arc<Module>>>,
}

impl ModuleRegistry {
    /// 创建空表
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            by_id: RwLock::new(HashMap::new()),
        }
    }

    /// 分配下一个模块 ID
    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// 登记模块
    pub fn insert(&self, module: Arc<Module>) {
        self.write().insert(module.id(), module);
    }

    /// 按 ID 查找
    pub fn get(&self, id: u64) -> Option<Arc<Module>> {
        self.read().get(&id).map(Arc::clone)
    }

    /// 按位置串查找
    pub fn by_location(&self, location: &str) -> Option<Arc<Module>> {
        self.read()
            .values()
            .find(|m| m.location() == location)
            .map(Arc::clone)
    }

    /// 摘除模块
    pub fn remove(&self, id: u64) -> Option<Arc<Module>> {
        self.write().remove(&id)
    }

    /// 全部模块快照（按 ID 升序，保证遍历确定性）
    pub fn all(&self) -> Vec<Arc<Module>> {
        let mut modules: Vec<Arc<Module>> = self.read().values().map(Arc::clone).collect();
        modules.sort_by_key(|m| m.id());
        modules
    }

    /// 当前代次符号名相同的模块（按 ID 升序）
    pub fn by_symbolic_name(&self, name: &str) -> Vec<Arc<Module>> {
        let mut modules: Vec<Arc<Module>> = self
            .read()
            .values()
            .filter(|m| m.current_generation().symbolic_name() == name)
            .map(Arc::clone)
            .collect();
        modules.sort_by_key(|m| m.id());
        modules
    }

    /// 模块是否活跃（启动中或运行中）
    pub fn is_active(&self, id: u64) -> bool {
        self.get(id).map(|m| m.state().is_active()).unwrap_or(false)
    }

    /// 按代次句柄找所属模块
    pub fn owner_of(&self, generation: GenerationId) -> Option<Arc<Module>> {
        self.read()
            .values()
            .find(|m| {
                m.current_generation().id() == generation
                    || m.zombies().iter().any(|z| z.id() == generation)
            })
            .map(Arc::clone)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<u64, Arc<Module>>> {
        match self.by_id.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<u64, Arc<Module>>> {
        match self.by_id.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// 框架上下文
pub struct FrameworkContext {
    /// 配置
    pub config: FrameworkConfig,
    /// 句柄分配器
    pub alloc: HandleAllocator,
    /// 模块表
    pub modules: ModuleRegistry,
    /// 包注册表
    pub packages: PackageRegistry,
    /// 布线表（随解析器在粗粒度锁下修改）
    pub wires: Mutex<WireTable>,
    /// 粗粒度解析锁：同一时刻只允许一次解析器调用
    pub resolve_lock: Mutex<()>,
    /// 钩子注册表
    pub hooks: HookRegistry,
    /// 监听器注册表
    pub listeners: ListenerRegistry,
    /// 事件序号
    pub ordinal: EventOrdinal,
    /// 安全协作者
    pub security: Arc<dyn SecurityPolicy>,
    /// 持久化协作者
    pub state_store: Arc<dyn StateStore>,
    /// 宿主本地属性快照
    pub host_attributes: AttrMap,
    /// 框架自身合成的能力（执行环境等，归属模块 0）
    pub system_capabilities: Vec<Capability>,
}

impl std::fmt::Debug for FrameworkContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameworkContext")
            .field("modules", &self.modules.all().len())
            .field("packages", &self.packages.len())
            .finish_non_exhaustive()
    }
}

impl FrameworkContext {
    /// 用缺省协作者建上下文
    pub fn new(config: FrameworkConfig) -> Result<Self> {
        Self::with_collaborators(
            config,
            Arc::new(AllowAllPolicy),
            Arc::new(MemoryStateStore::new()),
        )
    }

    /// 指定协作者建上下文
    pub fn with_collaborators(
        config: FrameworkConfig,
        security: Arc<dyn SecurityPolicy>,
        state_store: Arc<dyn StateStore>,
    ) -> Result<Self> {
        let alloc = HandleAllocator::new();
        let host_attributes = config.host.native_attributes();

        // 框架自身（模块 0, 代次 0）合成执行环境能力
        let mut system_capabilities = Vec::new();
        for ee in &config.host.execution_environments {
            let mut attrs = AttrMap::new();
            attrs.insert(attributes::EE_NAME.to_string(), AttrValue::from(ee.as_str()));
            system_capabilities.push(Capability::new(
                alloc.next_capability(),
                namespaces::EXECUTION_ENVIRONMENT,
                attrs,
                Default::default(),
                GenerationId(0),
                0,
                CapabilityOrigin::Synthesized,
            )?);
        }

        Ok(Self {
            config,
            alloc,
            modules: ModuleRegistry::new(),
            packages: PackageRegistry::new(),
            wires: Mutex::new(WireTable::new()),
            resolve_lock: Mutex::new(()),
            hooks: HookRegistry::new(),
            listeners: ListenerRegistry::new(),
            ordinal: EventOrdinal::default(),
            security,
            state_store,
            host_attributes,
            system_capabilities,
        })
    }

    /// 锁住布线表
    pub fn wires(&self) -> std::sync::MutexGuard<'_, WireTable> {
        match self.wires.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 占粗粒度解析锁（解析器全程同步, 不跨 await 持有）
    pub fn resolve_guard(&self) -> std::sync::MutexGuard<'_, ()> {
        match self.resolve_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 把一次已提交的状态迁移广播给监听器
    pub fn emit_transition(&self, module_id: u64, from: LifecycleState, to: LifecycleState) {
        let event = ModuleEvent {
            module_id,
            from,
            to,
            ordinal: self.ordinal.next(),
            timestamp: Utc::now(),
        };
        self.listeners.dispatch(&event, &self.hooks);
    }
}
