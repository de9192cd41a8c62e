//! 包图
//!
//! 以包名为键维护导出方/导入方登记表。每个包名对应一个 [`Pkg`]，
//! 内部用自己的互斥锁保护三张列表，调用方只需要注册表级别的锁来
//! 按名查找，不需要全局包表锁来修改单个包的簿记。
//!
//! 排序约定：导出方按版本降序，版本相同时按所属模块 ID 升序，插入
//! 走二分定位。包的扇出在实践中很小，O(n) 搬移可以接受。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, trace};

use crate::version::{Version, VersionRange};
use crate::wiring::{CapabilityId, GenerationId, RequirementId};

// ============================================================================
// 导出/导入声明
// ============================================================================

/// 一条包导出声明（随代次固定）
///
/// `zombie` 是唯一的可变位：代次被刷新替换但仍有布线时置位，
/// 标记该导出属于僵尸代次。
#[derive(Debug)]
pub struct ExportPkg {
    /// 包名
    pub name: String,
    /// 导出版本
    pub version: Version,
    /// uses 约束涉及的包名
    pub uses: Vec<String>,
    /// 强制属性名
    pub mandatory: Vec<String>,
    /// include 类过滤（逗号分隔模式）
    pub include: Option<String>,
    /// exclude 类过滤（逗号分隔模式）
    pub exclude: Option<String>,
    /// 对应的包能力句柄
    pub capability: CapabilityId,
    /// 所属代次
    pub owner: GenerationId,
    /// 所属模块 ID
    pub owner_module: u64,
    /// 僵尸标记
    zombie: AtomicBool,
}

impl ExportPkg {
    /// 构造导出声明
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        version: Version,
        uses: Vec<String>,
        mandatory: Vec<String>,
        include: Option<String>,
        exclude: Option<String>,
        capability: CapabilityId,
        owner: GenerationId,
        owner_module: u64,
    ) -> Self {
        Self {
            name: name.into(),
            version,
            uses,
            mandatory,
            include,
            exclude,
            capability,
            owner,
            owner_module,
            zombie: AtomicBool::new(false),
        }
    }

    /// 是否属于僵尸代次
    pub fn is_zombie(&self) -> bool {
        self.zombie.load(Ordering::Acquire)
    }

    /// 置僵尸标记（刷新流程调用）
    pub fn mark_zombie(&self) {
        self.zombie.store(true, Ordering::Release);
    }
}

/// 一条包导入声明（随代次固定）
#[derive(Debug, Clone)]
pub struct ImportPkg {
    /// 包名
    pub name: String,
    /// 可接受的版本区间
    pub range: VersionRange,
    /// 对应的包需求句柄
    pub requirement: RequirementId,
    /// 是否可选
    pub optional: bool,
    /// 所属代次
    pub owner: GenerationId,
    /// 所属模块 ID
    pub owner_module: u64,
}

// ============================================================================
// Pkg：单个包名的簿记
// ============================================================================

/// 锁内状态
#[derive(Debug, Default)]
struct PkgState {
    /// 全部导出方，版本降序、同版本模块 ID 升序
    exporters: Vec<Arc<ExportPkg>>,
    /// 全部导入方
    importers: Vec<Arc<ImportPkg>>,
    /// 已有 >= 1 条布线的导出方（exporters 的子集）
    providers: Vec<Arc<ExportPkg>>,
}

/// 单个包名的登记表
///
/// 所有修改操作在实例内部互斥，调用方无需额外加锁。
#[derive(Debug, Default)]
pub struct Pkg {
    /// 包名
    name: String,
    /// 锁内状态
    state: Mutex<PkgState>,
}

/// 导出方排序键：版本降序，同版本模块 ID 升序
fn exporter_rank(e: &ExportPkg) -> (std::cmp::Reverse<Version>, u64) {
    (std::cmp::Reverse(e.version.clone()), e.owner_module)
}

impl Pkg {
    /// 创建空登记表
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(PkgState::default()),
        }
    }

    /// 包名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 登记导出方（二分定位，保持排序）
    pub fn add_exporter(&self, export: Arc<ExportPkg>) {
        let mut state = self.lock();
        let key = exporter_rank(&export);
        let pos = state
            .exporters
            .binary_search_by(|probe| exporter_rank(probe).cmp(&key))
            .unwrap_or_else(|p| p);
        state.exporters.insert(pos, export);
        trace!(package = %self.name, count = state.exporters.len(), "登记导出方");
    }

    /// 摘除某代次的导出方
    ///
    /// 返回 `true` 表示该导出方当时是提供方（发生了降级），依赖它的
    /// 导入方需要重新评估。
    pub fn remove_exporter(&self, owner: GenerationId) -> bool {
        let mut state = self.lock();
        state.exporters.retain(|e| e.owner != owner);
        let before = state.providers.len();
        state.providers.retain(|e| e.owner != owner);
        let demoted = state.providers.len() != before;
        if demoted {
            debug!(package = %self.name, generation = owner.0, "提供方降级");
        }
        demoted
    }

    /// 登记导入方
    pub fn add_importer(&self, import: Arc<ImportPkg>) {
        let mut state = self.lock();
        state.importers.push(import);
    }

    /// 摘除某代次的导入方
    pub fn remove_importer(&self, owner: GenerationId) {
        let mut state = self.lock();
        state.importers.retain(|i| i.owner != owner);
    }

    /// 提升导出方为提供方（幂等，按能力句柄判重）
    pub fn add_provider(&self, export: &Arc<ExportPkg>) {
        let mut state = self.lock();
        if state
            .providers
            .iter()
            .any(|p| p.capability == export.capability)
        {
            return;
        }
        let key = exporter_rank(export);
        let pos = state
            .providers
            .binary_search_by(|probe| exporter_rank(probe).cmp(&key))
            .unwrap_or_else(|p| p);
        state.providers.insert(pos, Arc::clone(export));
        trace!(package = %self.name, generation = export.owner.0, "提升为提供方");
    }

    /// 把提供方降级回普通导出方（解析回滚路径）
    pub fn remove_provider(&self, capability: CapabilityId) {
        let mut state = self.lock();
        state.providers.retain(|p| p.capability != capability);
    }

    /// 最佳提供方
    ///
    /// 优先返回排序最前的提供方；没有提供方时，退回排序最前且所属
    /// 模块处于活跃状态的导出方（显式解析之前的自布线回退路径）。
    pub fn best_provider(&self, is_active: impl Fn(u64) -> bool) -> Option<Arc<ExportPkg>> {
        let state = self.lock();
        if let Some(p) = state.providers.first() {
            return Some(Arc::clone(p));
        }
        state
            .exporters
            .iter()
            .find(|e| is_active(e.owner_module))
            .map(Arc::clone)
    }

    /// 导出方快照（排序后）
    pub fn exporters(&self) -> Vec<Arc<ExportPkg>> {
        self.lock().exporters.clone()
    }

    /// 导入方快照
    pub fn importers(&self) -> Vec<Arc<ImportPkg>> {
        self.lock().importers.clone()
    }

    /// 提供方快照（排序后）
    pub fn providers(&self) -> Vec<Arc<ExportPkg>> {
        self.lock().providers.clone()
    }

    /// 是否已无任何登记
    pub fn is_unused(&self) -> bool {
        let state = self.lock();
        state.exporters.is_empty() && state.importers.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PkgState> {
        // 锁内无用户代码，中毒只会来自簿记自身恐慌
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ============================================================================
// 包注册表：名 -> Pkg
// ============================================================================

/// 共享的包名表
///
/// 表级锁只覆盖按名查找/建项，单个包的列表修改由 [`Pkg`] 自身互斥。
#[derive(Debug, Default)]
pub struct PackageRegistry {
    table: RwLock<HashMap<String, Arc<Pkg>>>,
}

impl PackageRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 查找或创建包登记表
    pub fn get_or_create(&self, name: &str) -> Arc<Pkg> {
        if let Some(pkg) = self.get(name) {
            return pkg;
        }
        let mut table = self.write();
        Arc::clone(
            table
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Pkg::new(name))),
        )
    }

    /// 按名查找
    pub fn get(&self, name: &str) -> Option<Arc<Pkg>> {
        self.read().get(name).map(Arc::clone)
    }

    /// 摘除某代次在所有包下的登记
    ///
    /// 返回发生提供方降级的包名列表。空登记表顺手回收。
    pub fn remove_generation(&self, owner: GenerationId) -> Vec<String> {
        let mut demoted = Vec::new();
        let mut table = self.write();
        table.retain(|name, pkg| {
            if pkg.remove_exporter(owner) {
                demoted.push(name.clone());
            }
            pkg.remove_importer(owner);
            !pkg.is_unused()
        });
        demoted
    }

    /// 当前登记的包名数量
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Pkg>>> {
        match self.table.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Pkg>>> {
        match self.table.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn export(name: &str, version: &str, module: u64, generation: u64) -> Arc<ExportPkg> {
        Arc::new(ExportPkg::new(
            name,
            version.parse().unwrap(),
            Vec::new(),
            Vec::new(),
            None,
            None,
            CapabilityId(generation * 100),
            GenerationId(generation),
            module,
        ))
    }

    #[test]
    fn test_exporters_sorted_version_desc_then_module_asc() {
        let pkg = Pkg::new("p");
        pkg.add_exporter(export("p", "1.0.0", 3, 1));
        pkg.add_exporter(export("p", "2.0.0", 5, 2));
        pkg.add_exporter(export("p", "2.0.0", 2, 3));
        pkg.add_exporter(export("p", "1.5.0", 1, 4));

        let order: Vec<(String, u64)> = pkg
            .exporters()
            .iter()
            .map(|e| (e.version.to_string(), e.owner_module))
            .collect();
        assert_eq!(
            order,
            vec![
                ("2.0.0".to_string(), 2),
                ("2.0.0".to_string(), 5),
                ("1.5.0".to_string(), 1),
                ("1.0.0".to_string(), 3),
            ]
        );
    }

    #[test]
    fn test_add_provider_idempotent() {
        let pkg = Pkg::new("p");
        let e = export("p", "1.0.0", 1, 1);
        pkg.add_exporter(Arc::clone(&e));
        pkg.add_provider(&e);
        pkg.add_provider(&e);
        assert_eq!(pkg.providers().len(), 1);
    }

    #[test]
    fn test_remove_exporter_reports_demotion() {
        let pkg = Pkg::new("p");
        let e1 = export("p", "1.0.0", 1, 1);
        let e2 = export("p", "2.0.0", 2, 2);
        pkg.add_exporter(Arc::clone(&e1));
        pkg.add_exporter(Arc::clone(&e2));
        pkg.add_provider(&e1);

        // e2 不是提供方，摘除不触发降级
        assert!(!pkg.remove_exporter(GenerationId(2)));
        // e1 是提供方，摘除触发降级
        assert!(pkg.remove_exporter(GenerationId(1)));
        assert!(pkg.providers().is_empty());
    }

    #[test]
    fn test_best_provider_prefers_wired_then_active_fallback() {
        let pkg = Pkg::new("p");
        let low = export("p", "1.0.0", 1, 1);
        let high = export("p", "2.0.0", 3, 2);
        pkg.add_exporter(Arc::clone(&low));
        pkg.add_exporter(Arc::clone(&high));

        // 无提供方：高版本模块不活跃时回退到活跃的低版本
        let best = pkg.best_provider(|m| m == 1).unwrap();
        assert_eq!(best.version.to_string(), "1.0.0");

        // 低版本成为提供方后优先于更高版本的未布线导出
        pkg.add_provider(&low);
        let best = pkg.best_provider(|_| true).unwrap();
        assert_eq!(best.version.to_string(), "1.0.0");

        // 高版本也成为提供方后按排序胜出
        pkg.add_provider(&high);
        let best = pkg.best_provider(|_| false).unwrap();
        assert_eq!(best.version.to_string(), "2.0.0");
    }

    #[test]
    fn test_registry_remove_generation_collects_and_reports() {
        let registry = PackageRegistry::new();
        let p = registry.get_or_create("p");
        let q = registry.get_or_create("q");
        let e = export("p", "1.0.0", 1, 1);
        p.add_exporter(Arc::clone(&e));
        p.add_provider(&e);
        q.add_importer(Arc::new(ImportPkg {
            name: "q".to_string(),
            range: VersionRange::any(),
            requirement: RequirementId(1),
            optional: false,
            owner: GenerationId(1),
            owner_module: 1,
        }));
        assert_eq!(registry.len(), 2);

        let demoted = registry.remove_generation(GenerationId(1));
        assert_eq!(demoted, vec!["p".to_string()]);
        // 两张空登记表均被回收
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_zombie_flag() {
        let e = export("p", "1.0.0", 1, 1);
        assert!(!e.is_zombie());
        e.mark_zombie();
        assert!(e.is_zombie());
    }
}
