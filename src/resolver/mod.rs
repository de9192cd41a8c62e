//! 解析器
//!
//! 把未解析代次变成一致布线图：为每条强制需求挑选恰好一个提供方，
//! 可选需求允许悬空。逐代次推进；某代次的任一强制需求不可满足时，
//! 该代次本轮的全部暂定布线回滚，错误点名未满足的需求，其他模块
//! 不受影响。对已解析代次重复解析是幂等空操作。
//!
//! 调用约定：解析器假定调用方已持有框架的粗粒度锁（同一时刻只有
//! 一个解析在跑），内部只再拿布线表与单包的细粒度锁。

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::context::FrameworkContext;
use crate::filter::{snapshot, AttrValue};
use crate::module::{Generation, LifecycleState, Module};
use crate::utils::{FrameworkError, Result};
use crate::version::Version;
use crate::wiring::{attributes, namespaces, Capability, GenerationId, Requirement, WireId};

/// 一个候选能力（从当前代次或框架合成能力收集，拷贝后脱离源锁）
struct Candidate {
    capability: Capability,
    owner_module: u64,
}

/// 本轮为单个代次暂定的成果，失败时整体回滚
#[derive(Default)]
struct Attempt {
    wires: Vec<WireId>,
    /// (包名, 被提升的能力) —— 回滚时若已无布线则降级
    promotions: Vec<(String, crate::wiring::CapabilityId)>,
    /// (需求句柄布线的能力, 提供方代次)，uses 一致性检查用
    package_wires: Vec<(crate::wiring::CapabilityId, GenerationId)>,
    /// (宿主代次, 片段代次) —— 回滚时摘掉宿主侧的附着记录
    attachments: Vec<(GenerationId, GenerationId)>,
}

/// 解析器
pub struct Resolver<'a> {
    ctx: &'a FrameworkContext,
}

impl<'a> Resolver<'a> {
    /// 绑定上下文
    pub fn new(ctx: &'a FrameworkContext) -> Self {
        Self { ctx }
    }

    /// 解析一个模块的当前代次
    ///
    /// 已解析则为幂等空操作。成功后模块进入 RESOLVED 并广播事件。
    pub fn resolve_module(&self, module: &Arc<Module>) -> Result<()> {
        let mut in_progress = HashSet::new();
        self.resolve_in_session(module, &mut in_progress)
    }

    fn resolve_in_session(
        &self,
        module: &Arc<Module>,
        in_progress: &mut HashSet<GenerationId>,
    ) -> Result<()> {
        match module.state() {
            LifecycleState::Uninstalled => {
                return Err(FrameworkError::IllegalState {
                    module_id: module.id(),
                    state: module.state().to_string(),
                    operation: "resolve".to_string(),
                });
            }
            LifecycleState::Installed => {}
            // 已解析（或更后）：幂等
            _ => return Ok(()),
        }

        let generation = module.current_generation();
        if in_progress.contains(&generation.id()) {
            // 解析环：当前代次已在本会话中暂定，允许相互布线
            return Ok(());
        }
        in_progress.insert(generation.id());

        let result = self.resolve_generation(module, &generation, in_progress);
        in_progress.remove(&generation.id());

        match result {
            Ok(()) => {
                module.transition(LifecycleState::Resolved, "resolve")?;
                self.ctx.emit_transition(
                    module.id(),
                    LifecycleState::Installed,
                    LifecycleState::Resolved,
                );
                info!(
                    module_id = module.id(),
                    symbolic_name = generation.symbolic_name(),
                    version = %generation.version(),
                    "代次解析完成"
                );
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    fn resolve_generation(
        &self,
        module: &Arc<Module>,
        generation: &Arc<Generation>,
        in_progress: &mut HashSet<GenerationId>,
    ) -> Result<()> {
        self.check_singleton(module, generation)?;
        self.check_native(module, generation)?;

        let mut attempt = Attempt::default();

        for requirement in generation.requirements() {
            if !requirement.is_effective_at_resolve() {
                continue;
            }
            match self.wire_requirement(requirement, in_progress, &mut attempt) {
                Ok(true) => {}
                Ok(false) => {
                    if requirement.is_optional() {
                        debug!(
                            module_id = module.id(),
                            namespace = requirement.namespace(),
                            "可选需求未满足, 保持悬空"
                        );
                        continue;
                    }
                    self.rollback(&mut attempt);
                    return Err(FrameworkError::Resolution {
                        module_id: module.id(),
                        namespace: requirement.namespace().to_string(),
                        filter: requirement.filter().map(|f| f.to_string()),
                    });
                }
                Err(error) => {
                    self.rollback(&mut attempt);
                    return Err(error);
                }
            }
        }

        if let Err(error) = self.check_uses_consistency(generation, &attempt) {
            self.rollback(&mut attempt);
            return Err(error);
        }

        Ok(())
    }

    /// 单例约束：同符号名至多一个已解析的单例代次
    fn check_singleton(&self, module: &Arc<Module>, generation: &Arc<Generation>) -> Result<()> {
        if !generation.is_singleton() {
            return Ok(());
        }
        for other in self.ctx.modules.by_symbolic_name(generation.symbolic_name()) {
            if other.id() == module.id() {
                continue;
            }
            let other_gen = other.current_generation();
            if other_gen.is_singleton() && other.state().is_resolved() {
                return Err(FrameworkError::SingletonConflict {
                    symbolic_name: generation.symbolic_name().to_string(),
                    existing: other_gen.version().clone(),
                    candidate: generation.version().clone(),
                });
            }
        }
        Ok(())
    }

    /// 本地代码检查：无候选匹配且未标记可选时解析失败
    fn check_native(&self, module: &Arc<Module>, generation: &Arc<Generation>) -> Result<()> {
        let Some(native) = generation.native() else {
            return Ok(());
        };
        if native.select(&self.ctx.host_attributes).is_none() && !native.optional {
            return Err(FrameworkError::NativeCode {
                module_id: module.id(),
                host_attributes: snapshot(&self.ctx.host_attributes),
            });
        }
        Ok(())
    }

    /// 为一条需求挑提供方并布线；返回是否成功布线
    fn wire_requirement(
        &self,
        requirement: &Requirement,
        in_progress: &mut HashSet<GenerationId>,
        attempt: &mut Attempt,
    ) -> Result<bool> {
        if !self.ctx.security.can_require(requirement) {
            return Ok(false);
        }

        let candidates = self.candidates_for(requirement);
        for candidate in candidates {
            // 提供方代次必须先就位（递归解析）；失败则换下一个候选
            if candidate.owner_module != 0 {
                let Some(owner) = self.ctx.modules.owner_of(candidate.capability.owner()) else {
                    continue;
                };
                if owner.state() == LifecycleState::Installed
                    && !in_progress.contains(&candidate.capability.owner())
                {
                    if let Err(error) = self.resolve_in_session(&owner, in_progress) {
                        debug!(
                            provider = owner.id(),
                            %error,
                            "候选提供方解析失败, 尝试下一个"
                        );
                        continue;
                    }
                }
            }

            let wire_id = {
                let mut wires = self.ctx.wires();
                wires.set_wire(requirement, &candidate.capability)?
            };
            attempt.wires.push(wire_id);

            if requirement.namespace() == namespaces::PACKAGE {
                attempt
                    .package_wires
                    .push((candidate.capability.id(), candidate.capability.owner()));
                self.promote_provider(&candidate, attempt);
            } else if requirement.namespace() == namespaces::HOST {
                self.record_attachment(requirement, &candidate, attempt);
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// 布线成功的包导出提升为提供方
    fn promote_provider(&self, candidate: &Candidate, attempt: &mut Attempt) {
        let Some(AttrValue::Str(name)) = candidate
            .capability
            .attributes()
            .get(attributes::PACKAGE_NAME)
        else {
            return;
        };
        let pkg = self.ctx.packages.get_or_create(name);
        let Some(owner) = self.ctx.modules.owner_of(candidate.capability.owner()) else {
            return;
        };
        let owner_gen = owner.current_generation();
        if let Some(export) = owner_gen
            .exports()
            .iter()
            .find(|e| e.capability == candidate.capability.id())
        {
            pkg.add_provider(export);
            attempt
                .promotions
                .push((name.clone(), candidate.capability.id()));
        }
    }

    /// 片段布线成功后在宿主代次登记附着
    fn record_attachment(
        &self,
        requirement: &Requirement,
        candidate: &Candidate,
        attempt: &mut Attempt,
    ) {
        let Some(host) = self.ctx.modules.owner_of(candidate.capability.owner()) else {
            return;
        };
        let host_gen = host.current_generation();
        if host_gen.id() != candidate.capability.owner() {
            return;
        }
        host_gen.attach_fragment(requirement.owner());
        attempt.attachments.push((host_gen.id(), requirement.owner()));
    }

    /// 收集按偏好排序的候选能力
    ///
    /// 包命名空间：已是提供方的排最前，其后版本降序、模块 ID 升序。
    /// 其他命名空间：已解析归属方优先，其后模块 ID 升序。
    fn candidates_for(&self, requirement: &Requirement) -> Vec<Candidate> {
        let mut candidates: Vec<(Candidate, (bool, std::cmp::Reverse<Version>, u64))> = Vec::new();

        let wired_providers: HashSet<crate::wiring::CapabilityId> = {
            let wires = self.ctx.wires();
            wires.iter().map(|w| w.capability).collect()
        };

        let mut consider = |capability: &Capability, owner_module: u64, resolved: bool| {
            if !requirement.matches(capability) {
                return;
            }
            if !self.ctx.security.can_provide(capability) {
                return;
            }
            let version = match capability.attributes().get(attributes::VERSION) {
                Some(AttrValue::Version(v)) => v.clone(),
                _ => Version::zero(),
            };
            let preferred = if requirement.namespace() == namespaces::PACKAGE {
                wired_providers.contains(&capability.id())
            } else {
                resolved
            };
            candidates.push((
                Candidate {
                    capability: capability.clone(),
                    owner_module,
                },
                (!preferred, std::cmp::Reverse(version), owner_module),
            ));
        };

        for capability in &self.ctx.system_capabilities {
            consider(capability, 0, true);
        }

        for module in self.ctx.modules.all() {
            if module.state() == LifecycleState::Uninstalled {
                continue;
            }
            // 自布线允许：代次可以用自己的导出满足自己的导入
            let gen = module.current_generation();
            for capability in gen.capabilities_in(requirement.namespace()) {
                consider(capability, module.id(), module.state().is_resolved());
            }
        }

        candidates.sort_by(|a, b| a.1.cmp(&b.1));
        candidates.into_iter().map(|(c, _)| c).collect()
    }

    /// uses 一致性（单轮检查，不回溯）
    ///
    /// 对每条包布线：提供方导出声明 uses 的包 q，若需求方与提供方
    /// 都能看到 q 的来源且来源不同，则本代次解析失败。
    fn check_uses_consistency(&self, generation: &Arc<Generation>, attempt: &Attempt) -> Result<()> {
        for (capability_id, provider_gen_id) in &attempt.package_wires {
            let Some(provider_module) = self.ctx.modules.owner_of(*provider_gen_id) else {
                continue;
            };
            let provider_gen = provider_module.current_generation();
            let Some(export) = provider_gen
                .exports()
                .iter()
                .find(|e| e.capability == *capability_id)
            else {
                continue;
            };

            for used in &export.uses {
                let mine = self.package_source(generation, used);
                let theirs = self.package_source(&provider_gen, used);
                if let (Some(a), Some(b)) = (mine, theirs) {
                    if a != b {
                        warn!(
                            module_id = generation.module_id(),
                            package = export.name.as_str(),
                            uses = used.as_str(),
                            "uses 约束冲突"
                        );
                        return Err(FrameworkError::Resolution {
                            module_id: generation.module_id(),
                            namespace: namespaces::PACKAGE.to_string(),
                            filter: Some(format!("uses 冲突: {} (经由 {})", used, export.name)),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// 某代次眼中包 `name` 的来源能力
    ///
    /// 导入布线优先，其次自身导出；都没有时，经由 `visibility:=reexport`
    /// 的 require-module 布线传递性可见的提供方导出也算来源。
    fn package_source(
        &self,
        generation: &Arc<Generation>,
        name: &str,
    ) -> Option<crate::wiring::CapabilityId> {
        {
            let wires = self.ctx.wires();
            for import in generation.imports() {
                if import.name == name {
                    if let Some(wire) = wires.wire_of_requirement(import.requirement) {
                        return Some(wire.capability);
                    }
                }
            }
        }
        if let Some(export) = generation.exports().iter().find(|e| e.name == name) {
            return Some(export.capability);
        }
        let mut visited = HashSet::new();
        self.reexported_source(generation, name, &mut visited)
    }

    /// 沿 reexport 模块布线传递性查找包 `name` 的导出来源
    fn reexported_source(
        &self,
        generation: &Arc<Generation>,
        name: &str,
        visited: &mut HashSet<GenerationId>,
    ) -> Option<crate::wiring::CapabilityId> {
        if !visited.insert(generation.id()) {
            return None;
        }
        let providers: Vec<GenerationId> = {
            let wires = self.ctx.wires();
            generation
                .requirements()
                .iter()
                .filter(|r| r.namespace() == namespaces::MODULE && r.is_reexport())
                .filter_map(|r| wires.wire_of_requirement(r.id()).map(|w| w.provider))
                .collect()
        };
        for provider_id in providers {
            let Some(provider) = self.ctx.modules.owner_of(provider_id) else {
                continue;
            };
            let provider_gen = provider.current_generation();
            if let Some(export) = provider_gen.exports().iter().find(|e| e.name == name) {
                return Some(export.capability);
            }
            if let Some(found) = self.reexported_source(&provider_gen, name, visited) {
                return Some(found);
            }
        }
        None
    }

    /// 回滚一次失败的代次解析：摘掉暂定布线并降级失去布线的提供方
    fn rollback(&self, attempt: &mut Attempt) {
        {
            let mut wires = self.ctx.wires();
            for wire in attempt.wires.drain(..) {
                wires.remove_wire(wire);
            }
        }
        {
            let wires = self.ctx.wires();
            for (name, capability) in attempt.promotions.drain(..) {
                if wires.wires_of_capability(capability).is_empty() {
                    if let Some(pkg) = self.ctx.packages.get(&name) {
                        pkg.remove_provider(capability);
                    }
                }
            }
        }
        for (host, fragment) in attempt.attachments.drain(..) {
            if let Some(module) = self.ctx.modules.owner_of(host) {
                let host_gen = module.current_generation();
                if host_gen.id() == host {
                    host_gen.detach_fragment(fragment);
                }
            }
        }
    }

    /// 依赖闭包
    ///
    /// 从种子代次出发，传递性并入"给成员的需求供货的代次"和
    /// "依赖成员能力的代次"，用于计算刷新波及面。
    pub fn closure(&self, seeds: &[GenerationId]) -> BTreeSet<GenerationId> {
        let wires = self.ctx.wires();
        let mut set: BTreeSet<GenerationId> = seeds.iter().copied().collect();
        let mut queue: Vec<GenerationId> = seeds.to_vec();

        while let Some(gen) = queue.pop() {
            let mut neighbors = Vec::new();
            for wire in wires.wires_provided_by(gen) {
                neighbors.push(wire.requirer);
            }
            for wire in wires.wires_required_by(gen) {
                neighbors.push(wire.provider);
            }
            for neighbor in neighbors {
                if set.insert(neighbor) {
                    queue.push(neighbor);
                }
            }
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::FrameworkConfig;
    use crate::module::{ExportDecl, ImportDecl, ModuleDescriptor};

    fn ctx() -> FrameworkContext {
        FrameworkContext::new(FrameworkConfig::default()).unwrap()
    }

    fn install(ctx: &FrameworkContext, desc: &ModuleDescriptor) -> Arc<Module> {
        let id = ctx.modules.allocate_id();
        let generation = Generation::build(id, desc, &ctx.alloc).unwrap();
        for export in generation.exports() {
            ctx.packages
                .get_or_create(&export.name)
                .add_exporter(Arc::clone(export));
        }
        for import in generation.imports() {
            ctx.packages
                .get_or_create(&import.name)
                .add_importer(Arc::clone(import));
        }
        let module = Arc::new(Module::new(
            id,
            format!("mem:{}", desc.symbolic_name),
            generation,
        ));
        ctx.modules.insert(Arc::clone(&module));
        module
    }

    fn exporter(name: &str, pkg: &str, version: &str) -> ModuleDescriptor {
        let mut desc = ModuleDescriptor::new(name, "1.0.0".parse().unwrap());
        desc.exports.push(ExportDecl {
            name: pkg.to_string(),
            version: version.parse().unwrap(),
            uses: Vec::new(),
            mandatory: Vec::new(),
            include: None,
            exclude: None,
            attributes: Default::default(),
        });
        desc
    }

    fn importer(name: &str, pkg: &str, range: &str) -> ModuleDescriptor {
        let mut desc = ModuleDescriptor::new(name, "1.0.0".parse().unwrap());
        desc.imports.push(ImportDecl {
            name: pkg.to_string(),
            range: range.parse().unwrap(),
            optional: false,
            attributes: Default::default(),
        });
        desc
    }

    #[test]
    fn test_scenario_a_import_wires_to_export() {
        let ctx = ctx();
        let m1 = install(&ctx, &exporter("m1", "p", "1.0.0"));
        let m2 = install(&ctx, &importer("m2", "p", "[1.0,2.0)"));

        Resolver::new(&ctx).resolve_module(&m2).unwrap();

        // 提供方被递归解析
        assert_eq!(m1.state(), LifecycleState::Resolved);
        assert_eq!(m2.state(), LifecycleState::Resolved);

        // 导入布线指向 m1 的导出
        let m1_export = m1.current_generation().exports()[0].capability;
        let m2_import = m2.current_generation().imports()[0].requirement;
        let wires = ctx.wires();
        assert_eq!(wires.wire_of_requirement(m2_import).unwrap().capability, m1_export);
        drop(wires);

        // 最佳提供方就是 m1 的导出
        let best = ctx
            .packages
            .get("p")
            .unwrap()
            .best_provider(|id| ctx.modules.is_active(id))
            .unwrap();
        assert_eq!(best.capability, m1_export);
    }

    #[test]
    fn test_mandatory_failure_rolls_back() {
        let ctx = ctx();
        let mut desc = importer("m", "p", "[1.0,2.0)");
        // 第二条导入无人提供
        desc.imports.push(ImportDecl {
            name: "missing".to_string(),
            range: "[1.0,2.0)".parse().unwrap(),
            optional: false,
            attributes: Default::default(),
        });
        install(&ctx, &exporter("provider", "p", "1.5.0"));
        let m = install(&ctx, &desc);

        let err = Resolver::new(&ctx).resolve_module(&m).unwrap_err();
        assert!(matches!(err, FrameworkError::Resolution { .. }));
        assert_eq!(m.state(), LifecycleState::Installed);

        // 暂定布线全部回滚
        let m_gen = m.current_generation().id();
        assert!(ctx.wires().wires_required_by(m_gen).is_empty());
    }

    #[test]
    fn test_optional_requirement_left_dangling() {
        let ctx = ctx();
        let mut desc = ModuleDescriptor::new("m", "1.0.0".parse().unwrap());
        desc.imports.push(ImportDecl {
            name: "missing".to_string(),
            range: "[1.0,2.0)".parse().unwrap(),
            optional: true,
            attributes: Default::default(),
        });
        let m = install(&ctx, &desc);

        Resolver::new(&ctx).resolve_module(&m).unwrap();
        assert_eq!(m.state(), LifecycleState::Resolved);
        assert!(ctx.wires().is_empty());
    }

    #[test]
    fn test_resolve_idempotent() {
        let ctx = ctx();
        install(&ctx, &exporter("m1", "p", "1.0.0"));
        let m2 = install(&ctx, &importer("m2", "p", "[1.0,2.0)"));

        let resolver = Resolver::new(&ctx);
        resolver.resolve_module(&m2).unwrap();
        let first: Vec<_> = {
            let wires = ctx.wires();
            let mut pairs: Vec<_> = wires
                .iter()
                .map(|w| (w.requirement, w.capability))
                .collect();
            pairs.sort_by_key(|(r, _)| r.0);
            pairs
        };

        resolver.resolve_module(&m2).unwrap();
        let second: Vec<_> = {
            let wires = ctx.wires();
            let mut pairs: Vec<_> = wires
                .iter()
                .map(|w| (w.requirement, w.capability))
                .collect();
            pairs.sort_by_key(|(r, _)| r.0);
            pairs
        };
        assert_eq!(first, second);
    }

    #[test]
    fn test_singleton_exclusivity() {
        let ctx = ctx();
        let mut a = ModuleDescriptor::new("s", "1.0.0".parse().unwrap());
        a.singleton = true;
        let mut b = ModuleDescriptor::new("s", "2.0.0".parse().unwrap());
        b.singleton = true;

        let ma = install(&ctx, &a);
        let mb = install(&ctx, &b);
        let resolver = Resolver::new(&ctx);

        resolver.resolve_module(&ma).unwrap();
        let err = resolver.resolve_module(&mb).unwrap_err();
        assert!(matches!(err, FrameworkError::SingletonConflict { .. }));
        assert_eq!(mb.state(), LifecycleState::Installed);
    }

    #[test]
    fn test_version_selection_prefers_highest() {
        let ctx = ctx();
        install(&ctx, &exporter("low", "p", "1.0.0"));
        let high = install(&ctx, &exporter("high", "p", "1.9.0"));
        let m = install(&ctx, &importer("m", "p", "[1.0,2.0)"));

        Resolver::new(&ctx).resolve_module(&m).unwrap();
        let wire_cap = {
            let wires = ctx.wires();
            wires
                .wire_of_requirement(m.current_generation().imports()[0].requirement)
                .unwrap()
                .capability
        };
        assert_eq!(wire_cap, high.current_generation().exports()[0].capability);
    }

    #[test]
    fn test_existing_provider_preferred_over_newer_exporter() {
        let ctx = ctx();
        install(&ctx, &exporter("old", "p", "1.0.0"));
        let m1 = install(&ctx, &importer("m1", "p", "[1.0,2.0)"));
        let resolver = Resolver::new(&ctx);
        resolver.resolve_module(&m1).unwrap();

        // 更高版本到货, 但已布线的提供方仍被后续解析优先复用
        install(&ctx, &exporter("new", "p", "1.5.0"));
        let m2 = install(&ctx, &importer("m2", "p", "[1.0,2.0)"));
        resolver.resolve_module(&m2).unwrap();

        let wires = ctx.wires();
        let c1 = wires
            .wire_of_requirement(m1.current_generation().imports()[0].requirement)
            .unwrap()
            .capability;
        let c2 = wires
            .wire_of_requirement(m2.current_generation().imports()[0].requirement)
            .unwrap()
            .capability;
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_require_module_wires_to_module_capability() {
        let ctx = ctx();
        let base = install(&ctx, &ModuleDescriptor::new("base", "1.5.0".parse().unwrap()));
        let mut desc = ModuleDescriptor::new("ext", "1.0.0".parse().unwrap());
        desc.require_modules.push(crate::module::RequireModuleDecl {
            symbolic_name: "base".to_string(),
            range: "[1.0,2.0)".parse().unwrap(),
            optional: false,
            visibility: None,
        });
        let ext = install(&ctx, &desc);

        Resolver::new(&ctx).resolve_module(&ext).unwrap();
        assert_eq!(base.state(), LifecycleState::Resolved);

        let base_gen = base.current_generation().id();
        let wires = ctx.wires();
        assert_eq!(wires.wires_provided_by(base_gen).len(), 1);
    }

    #[test]
    fn test_fragment_attaches_to_host() {
        let ctx = ctx();
        let host = install(&ctx, &ModuleDescriptor::new("host", "1.0.0".parse().unwrap()));
        let mut desc = ModuleDescriptor::new("patch", "1.0.0".parse().unwrap());
        desc.fragment_host = Some(crate::module::FragmentHostDecl {
            symbolic_name: "host".to_string(),
            range: "[1.0,2.0)".parse().unwrap(),
        });
        let fragment = install(&ctx, &desc);

        Resolver::new(&ctx).resolve_module(&fragment).unwrap();
        assert_eq!(fragment.state(), LifecycleState::Resolved);

        let host_req = fragment.current_generation().host_requirement().unwrap();
        {
            let wires = ctx.wires();
            let wire = wires.wire_of_requirement(host_req).unwrap();
            assert_eq!(wire.provider, host.current_generation().id());
        }

        // 宿主侧记录附着
        assert_eq!(
            host.current_generation().fragments(),
            vec![fragment.current_generation().id()]
        );
    }

    #[test]
    fn test_fragment_rollback_detaches_from_host() {
        let ctx = ctx();
        let host = install(&ctx, &ModuleDescriptor::new("host", "1.0.0".parse().unwrap()));
        let mut desc = ModuleDescriptor::new("patch", "1.0.0".parse().unwrap());
        desc.fragment_host = Some(crate::module::FragmentHostDecl {
            symbolic_name: "host".to_string(),
            range: "[1.0,2.0)".parse().unwrap(),
        });
        // 宿主需求之后才检查的执行环境需求无人满足, 触发整体回滚
        desc.execution_environments = vec!["no-such-ee".to_string()];
        let fragment = install(&ctx, &desc);

        let err = Resolver::new(&ctx).resolve_module(&fragment).unwrap_err();
        assert!(matches!(err, FrameworkError::Resolution { .. }));
        assert_eq!(fragment.state(), LifecycleState::Installed);
        assert!(host.current_generation().fragments().is_empty());
    }

    #[test]
    fn test_execution_environment_requirement() {
        let config = FrameworkConfig::builder().execution_environment("rt-11").build();
        let ctx = FrameworkContext::new(config).unwrap();

        let mut ok = ModuleDescriptor::new("ok", "1.0.0".parse().unwrap());
        ok.execution_environments = vec!["rt-11".to_string()];
        let mut bad = ModuleDescriptor::new("bad", "1.0.0".parse().unwrap());
        bad.execution_environments = vec!["rt-99".to_string()];

        let m_ok = install(&ctx, &ok);
        let m_bad = install(&ctx, &bad);
        let resolver = Resolver::new(&ctx);

        resolver.resolve_module(&m_ok).unwrap();
        let err = resolver.resolve_module(&m_bad).unwrap_err();
        assert!(matches!(
            err,
            FrameworkError::Resolution { ref namespace, .. }
                if namespace == namespaces::EXECUTION_ENVIRONMENT
        ));
    }

    #[test]
    fn test_native_code_failure_names_host_snapshot() {
        let config = FrameworkConfig::builder()
            .os_name("linux")
            .os_version("2.0.0".parse().unwrap())
            .build();
        let ctx = FrameworkContext::new(config).unwrap();

        let mut desc = ModuleDescriptor::new("n", "1.0.0".parse().unwrap());
        desc.native = Some(crate::module::NativeDecl {
            clauses: vec![crate::module::NativeClauseDecl {
                libraries: vec!["lib/a.so".to_string()],
                os_names: vec!["windows".to_string()],
                os_version_floor: None,
                processors: vec![],
                languages: vec![],
            }],
            optional: false,
        });
        let m = install(&ctx, &desc);

        let err = Resolver::new(&ctx).resolve_module(&m).unwrap_err();
        match err {
            FrameworkError::NativeCode { host_attributes, .. } => {
                assert!(host_attributes.contains("osname=linux"));
            }
            other => panic!("错误类型不对: {:?}", other),
        }
    }

    #[test]
    fn test_uses_conflict_detected() {
        let ctx = ctx();
        // q 有两个导出方
        let qa = install(&ctx, &exporter("qa", "q", "1.0.0"));
        install(&ctx, &exporter("qb", "q", "2.0.0"));

        // provider 导出 p (uses q) 且自己导入 q [1.0,1.5)，只能接受 qa
        let mut provider = exporter("provider", "p", "1.0.0");
        provider.exports[0].uses = vec!["q".to_string()];
        provider.imports.push(ImportDecl {
            name: "q".to_string(),
            range: "[1.0,1.5)".parse().unwrap(),
            optional: false,
            attributes: Default::default(),
        });
        let provider = install(&ctx, &provider);

        let resolver = Resolver::new(&ctx);
        resolver.resolve_module(&provider).unwrap();
        {
            let wires = ctx.wires();
            let wire = wires
                .wire_of_requirement(provider.current_generation().imports()[0].requirement)
                .unwrap();
            assert_eq!(wire.provider, qa.current_generation().id());
        }

        // consumer 导入 p 和 q, 但 q 只接受 [2.0,3.0) —— 与 provider 看到的 q 冲突
        let mut consumer = importer("consumer", "p", "[1.0,2.0)");
        consumer.imports.push(ImportDecl {
            name: "q".to_string(),
            range: "[2.0,3.0)".parse().unwrap(),
            optional: false,
            attributes: Default::default(),
        });
        let consumer = install(&ctx, &consumer);

        let err = resolver.resolve_module(&consumer).unwrap_err();
        assert!(matches!(err, FrameworkError::Resolution { .. }));
        assert_eq!(consumer.state(), LifecycleState::Installed);
        assert!(ctx
            .wires()
            .wires_required_by(consumer.current_generation().id())
            .is_empty());
    }

    #[test]
    fn test_uses_conflict_via_reexported_module() {
        let ctx = ctx();
        // q 有两个导出方
        let qa = install(&ctx, &exporter("qa", "q", "1.0.0"));
        install(&ctx, &exporter("qb", "q", "2.0.0"));

        // provider 导出 p (uses q) 且导入 q [1.0,1.5)，只能接受 qa
        let mut provider = exporter("provider", "p", "1.0.0");
        provider.exports[0].uses = vec!["q".to_string()];
        provider.imports.push(ImportDecl {
            name: "q".to_string(),
            range: "[1.0,1.5)".parse().unwrap(),
            optional: false,
            attributes: Default::default(),
        });
        install(&ctx, &provider);

        // consumer 导入 p, 并以 reexport 可见性 require-module qb ——
        // 经 reexport 看到的 q 与 provider 布线的 q 来源不同
        let mut consumer = importer("consumer", "p", "[1.0,2.0)");
        consumer
            .require_modules
            .push(crate::module::RequireModuleDecl {
                symbolic_name: "qb".to_string(),
                range: "[1.0,2.0)".parse().unwrap(),
                optional: false,
                visibility: Some("reexport".to_string()),
            });
        let consumer = install(&ctx, &consumer);

        let err = Resolver::new(&ctx).resolve_module(&consumer).unwrap_err();
        assert!(matches!(err, FrameworkError::Resolution { .. }));
        assert_eq!(consumer.state(), LifecycleState::Installed);
        assert!(ctx
            .wires()
            .wires_required_by(consumer.current_generation().id())
            .is_empty());

        // 既有各方不受牵连
        assert_eq!(qa.state(), LifecycleState::Resolved);
    }

    #[test]
    fn test_closure_transitive() {
        let ctx = ctx();
        let m1 = install(&ctx, &exporter("m1", "p", "1.0.0"));
        let mut mid = importer("m2", "p", "[1.0,2.0)");
        mid.exports.push(ExportDecl {
            name: "r".to_string(),
            version: "1.0.0".parse().unwrap(),
            uses: Vec::new(),
            mandatory: Vec::new(),
            include: None,
            exclude: None,
            attributes: Default::default(),
        });
        let m2 = install(&ctx, &mid);
        let m3 = install(&ctx, &importer("m3", "r", "[1.0,2.0)"));

        let resolver = Resolver::new(&ctx);
        resolver.resolve_module(&m3).unwrap();

        // closure({m1}) 必须传递性包含 m2 与 m3
        let closure = resolver.closure(&[m1.current_generation().id()]);
        assert!(closure.contains(&m2.current_generation().id()));
        assert!(closure.contains(&m3.current_generation().id()));
    }
}
