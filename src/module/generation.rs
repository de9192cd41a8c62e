//! 代次
//!
//! 代次是模块一次安装的不可变快照：从描述符急切构建出全部能力、
//! 需求与包导入导出簿记。任何畸形声明在这里被拒绝，安装整体失败，
//! 绝不留下半成品代次。更新用新代次取代旧代次，旧代次变为僵尸，
//! 在仍有布线引用期间被保留。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::filter::{AttrMap, AttrValue, Filter};
use crate::module::descriptor::{ModuleDescriptor, NativeDecl};
use crate::packages::{ExportPkg, ImportPkg};
use crate::utils::{FrameworkError, Result};
use crate::version::{Version, VersionRange};
use crate::wiring::{
    attributes, directives, namespaces, Capability, CapabilityId, CapabilityOrigin, GenerationId,
    HandleAllocator, NativeCodeClause, NativeCodeRequirement, Requirement, RequirementId,
};

/// 把版本区间翻译成属性过滤子句
///
/// 全开区间返回 `None`（无需约束）。开下界/开上界用取反表达。
fn range_clauses(key: &str, range: &VersionRange) -> Vec<Filter> {
    let mut clauses = Vec::new();
    let trivially_low = range.floor == Version::zero() && range.floor_inclusive;
    if !trivially_low {
        let floor = Filter::ge(key, range.floor.to_string());
        if range.floor_inclusive {
            clauses.push(floor);
        } else {
            clauses.push(Filter::negate(Filter::le(key, range.floor.to_string())));
        }
    }
    if let Some(ceiling) = &range.ceiling {
        if range.ceiling_inclusive {
            clauses.push(Filter::le(key, ceiling.to_string()));
        } else {
            clauses.push(Filter::negate(Filter::ge(key, ceiling.to_string())));
        }
    }
    clauses
}

/// 代次
///
/// 独占拥有自身声明的能力与需求对象；布线表只通过句柄引用它们。
#[derive(Debug)]
pub struct Generation {
    /// 代次句柄
    id: GenerationId,
    /// 所属模块 ID
    module_id: u64,
    /// 符号名
    symbolic_name: String,
    /// 版本
    version: Version,
    /// 单例约束
    singleton: bool,
    /// 是否为片段
    fragment: bool,
    /// 全部能力（含合成与声明派生）
    capabilities: Vec<Capability>,
    /// 全部需求
    requirements: Vec<Requirement>,
    /// 包导出簿记
    exports: Vec<Arc<ExportPkg>>,
    /// 包导入簿记
    imports: Vec<Arc<ImportPkg>>,
    /// 片段的宿主需求句柄
    host_requirement: Option<RequirementId>,
    /// 宿主侧记录：已附着到本代次的片段代次
    fragments: Mutex<Vec<GenerationId>>,
    /// 本地代码需求
    native: Option<NativeCodeRequirement>,
    /// 僵尸标记（被更新取代后置位）
    zombie: AtomicBool,
}

impl Generation {
    /// 从描述符急切构建代次
    ///
    /// # Errors
    ///
    /// 任一声明畸形（保留命名空间滥用、空版本区间、非法可见性取值、
    /// 过滤器语法错误）时返回 [`FrameworkError::InvalidDeclaration`]
    /// 或过滤器语法错误，调用方据此整体放弃安装。
    pub fn build(
        module_id: u64,
        descriptor: &ModuleDescriptor,
        alloc: &HandleAllocator,
    ) -> Result<Arc<Self>> {
        if descriptor.symbolic_name.trim().is_empty() {
            return Err(FrameworkError::InvalidDeclaration(
                "符号名不能为空".to_string(),
            ));
        }

        let id = alloc.next_generation();
        let fragment = descriptor.is_fragment();

        let mut capabilities = Vec::new();
        let mut requirements = Vec::new();
        let mut exports = Vec::new();
        let mut imports = Vec::new();

        Self::build_identity_capabilities(id, module_id, descriptor, fragment, alloc, &mut capabilities)?;
        Self::build_exports(id, module_id, descriptor, alloc, &mut capabilities, &mut exports)?;
        Self::build_imports(id, module_id, descriptor, alloc, &mut requirements, &mut imports)?;
        Self::build_require_modules(id, module_id, descriptor, alloc, &mut requirements)?;
        Self::build_generic_headers(id, module_id, descriptor, alloc, &mut capabilities, &mut requirements)?;

        let host_requirement = if let Some(host) = &descriptor.fragment_host {
            if host.range.is_empty() {
                return Err(FrameworkError::InvalidDeclaration(format!(
                    "片段宿主 '{}' 的版本区间为空",
                    host.symbolic_name
                )));
            }
            let rid = alloc.next_requirement();
            let mut clauses = vec![Filter::eq(attributes::SYMBOLIC_NAME, host.symbolic_name.clone())];
            clauses.extend(range_clauses(attributes::VERSION, &host.range));
            requirements.push(Requirement::new(
                rid,
                namespaces::HOST,
                AttrMap::new(),
                BTreeMap::new(),
                Some(Filter::all(clauses)),
                id,
                module_id,
            ));
            Some(rid)
        } else {
            None
        };

        if !descriptor.execution_environments.is_empty() {
            requirements.push(Requirement::new(
                alloc.next_requirement(),
                namespaces::EXECUTION_ENVIRONMENT,
                AttrMap::new(),
                BTreeMap::new(),
                Some(Filter::any(
                    descriptor
                        .execution_environments
                        .iter()
                        .map(|ee| Filter::eq(attributes::EE_NAME, ee.clone()))
                        .collect(),
                )),
                id,
                module_id,
            ));
        }

        let native = descriptor.native.as_ref().map(Self::build_native);

        Ok(Arc::new(Self {
            id,
            module_id,
            symbolic_name: descriptor.symbolic_name.clone(),
            version: descriptor.version.clone(),
            singleton: descriptor.singleton,
            fragment,
            capabilities,
            requirements,
            exports,
            imports,
            host_requirement,
            fragments: Mutex::new(Vec::new()),
            native,
            zombie: AtomicBool::new(false),
        }))
    }

    /// 合成身份/模块/宿主能力
    fn build_identity_capabilities(
        id: GenerationId,
        module_id: u64,
        descriptor: &ModuleDescriptor,
        fragment: bool,
        alloc: &HandleAllocator,
        capabilities: &mut Vec<Capability>,
    ) -> Result<()> {
        let mut identity_attrs = AttrMap::new();
        identity_attrs.insert(
            attributes::SYMBOLIC_NAME.to_string(),
            AttrValue::from(descriptor.symbolic_name.as_str()),
        );
        identity_attrs.insert(
            attributes::VERSION.to_string(),
            AttrValue::Version(descriptor.version.clone()),
        );
        identity_attrs.insert(
            attributes::IDENTITY_TYPE.to_string(),
            AttrValue::from(if fragment { "fragment" } else { "module" }),
        );
        capabilities.push(Capability::new(
            alloc.next_capability(),
            namespaces::IDENTITY,
            identity_attrs,
            BTreeMap::new(),
            id,
            module_id,
            CapabilityOrigin::Synthesized,
        )?);

        if fragment {
            return Ok(());
        }

        let mut name_attrs = AttrMap::new();
        name_attrs.insert(
            attributes::SYMBOLIC_NAME.to_string(),
            AttrValue::from(descriptor.symbolic_name.as_str()),
        );
        name_attrs.insert(
            attributes::VERSION.to_string(),
            AttrValue::Version(descriptor.version.clone()),
        );

        let mut module_dirs = BTreeMap::new();
        if descriptor.singleton {
            module_dirs.insert(directives::SINGLETON.to_string(), "true".to_string());
        }

        capabilities.push(Capability::new(
            alloc.next_capability(),
            namespaces::MODULE,
            name_attrs.clone(),
            module_dirs,
            id,
            module_id,
            CapabilityOrigin::Synthesized,
        )?);
        capabilities.push(Capability::new(
            alloc.next_capability(),
            namespaces::HOST,
            name_attrs,
            BTreeMap::new(),
            id,
            module_id,
            CapabilityOrigin::Synthesized,
        )?);
        Ok(())
    }

    /// 从导出声明派生包能力与导出簿记
    fn build_exports(
        id: GenerationId,
        module_id: u64,
        descriptor: &ModuleDescriptor,
        alloc: &HandleAllocator,
        capabilities: &mut Vec<Capability>,
        exports: &mut Vec<Arc<ExportPkg>>,
    ) -> Result<()> {
        for decl in &descriptor.exports {
            if decl.name.trim().is_empty() {
                return Err(FrameworkError::InvalidDeclaration(
                    "导出包名不能为空".to_string(),
                ));
            }

            let cap_id = alloc.next_capability();
            let mut attrs = decl.attributes.clone();
            attrs.insert(
                attributes::PACKAGE_NAME.to_string(),
                AttrValue::from(decl.name.as_str()),
            );
            attrs.insert(
                attributes::VERSION.to_string(),
                AttrValue::Version(decl.version.clone()),
            );
            attrs.insert(
                attributes::SYMBOLIC_NAME.to_string(),
                AttrValue::from(descriptor.symbolic_name.as_str()),
            );

            let mut dirs = BTreeMap::new();
            if !decl.uses.is_empty() {
                dirs.insert(directives::USES.to_string(), decl.uses.join(","));
            }
            if !decl.mandatory.is_empty() {
                dirs.insert(directives::MANDATORY.to_string(), decl.mandatory.join(","));
            }
            if let Some(include) = &decl.include {
                dirs.insert(directives::INCLUDE.to_string(), include.clone());
            }
            if let Some(exclude) = &decl.exclude {
                dirs.insert(directives::EXCLUDE.to_string(), exclude.clone());
            }

            capabilities.push(Capability::new(
                cap_id,
                namespaces::PACKAGE,
                attrs,
                dirs,
                id,
                module_id,
                CapabilityOrigin::DeclaredMetadata,
            )?);

            exports.push(Arc::new(ExportPkg::new(
                decl.name.clone(),
                decl.version.clone(),
                decl.uses.clone(),
                decl.mandatory.clone(),
                decl.include.clone(),
                decl.exclude.clone(),
                cap_id,
                id,
                module_id,
            )));
        }
        Ok(())
    }

    /// 从导入声明派生包需求与导入簿记
    fn build_imports(
        id: GenerationId,
        module_id: u64,
        descriptor: &ModuleDescriptor,
        alloc: &HandleAllocator,
        requirements: &mut Vec<Requirement>,
        imports: &mut Vec<Arc<ImportPkg>>,
    ) -> Result<()> {
        for decl in &descriptor.imports {
            if decl.name.trim().is_empty() {
                return Err(FrameworkError::InvalidDeclaration(
                    "导入包名不能为空".to_string(),
                ));
            }
            if decl.range.is_empty() {
                return Err(FrameworkError::InvalidDeclaration(format!(
                    "导入包 '{}' 的版本区间为空",
                    decl.name
                )));
            }

            let rid = alloc.next_requirement();
            let mut clauses = vec![Filter::eq(attributes::PACKAGE_NAME, decl.name.clone())];
            clauses.extend(range_clauses(attributes::VERSION, &decl.range));
            for (key, value) in &decl.attributes {
                clauses.push(Filter::eq(key.clone(), value.as_text()));
            }

            let mut dirs = BTreeMap::new();
            if decl.optional {
                dirs.insert(
                    directives::RESOLUTION.to_string(),
                    directives::RESOLUTION_OPTIONAL.to_string(),
                );
            }

            requirements.push(Requirement::new(
                rid,
                namespaces::PACKAGE,
                decl.attributes.clone(),
                dirs,
                Some(Filter::all(clauses)),
                id,
                module_id,
            ));
            imports.push(Arc::new(ImportPkg {
                name: decl.name.clone(),
                range: decl.range.clone(),
                requirement: rid,
                optional: decl.optional,
                owner: id,
                owner_module: module_id,
            }));
        }
        Ok(())
    }

    /// 从 require-module 声明派生模块需求
    fn build_require_modules(
        id: GenerationId,
        module_id: u64,
        descriptor: &ModuleDescriptor,
        alloc: &HandleAllocator,
        requirements: &mut Vec<Requirement>,
    ) -> Result<()> {
        for decl in &descriptor.require_modules {
            if decl.range.is_empty() {
                return Err(FrameworkError::InvalidDeclaration(format!(
                    "require-module '{}' 的版本区间为空",
                    decl.symbolic_name
                )));
            }

            let mut dirs = BTreeMap::new();
            if let Some(visibility) = &decl.visibility {
                if visibility != "private" && visibility != directives::VISIBILITY_REEXPORT {
                    return Err(FrameworkError::InvalidDeclaration(format!(
                        "require-module '{}' 的可见性取值非法: '{}'",
                        decl.symbolic_name, visibility
                    )));
                }
                dirs.insert(directives::VISIBILITY.to_string(), visibility.clone());
            }
            if decl.optional {
                dirs.insert(
                    directives::RESOLUTION.to_string(),
                    directives::RESOLUTION_OPTIONAL.to_string(),
                );
            }

            let mut clauses = vec![Filter::eq(
                attributes::SYMBOLIC_NAME,
                decl.symbolic_name.clone(),
            )];
            clauses.extend(range_clauses(attributes::VERSION, &decl.range));

            requirements.push(Requirement::new(
                alloc.next_requirement(),
                namespaces::MODULE,
                AttrMap::new(),
                dirs,
                Some(Filter::all(clauses)),
                id,
                module_id,
            ));
        }
        Ok(())
    }

    /// 通用能力/需求头
    fn build_generic_headers(
        id: GenerationId,
        module_id: u64,
        descriptor: &ModuleDescriptor,
        alloc: &HandleAllocator,
        capabilities: &mut Vec<Capability>,
        requirements: &mut Vec<Requirement>,
    ) -> Result<()> {
        for decl in &descriptor.capabilities {
            capabilities.push(Capability::new(
                alloc.next_capability(),
                decl.namespace.clone(),
                decl.attributes.clone(),
                decl.directives.clone(),
                id,
                module_id,
                CapabilityOrigin::UserHeader,
            )?);
        }

        for decl in &descriptor.requirements {
            let filter = match decl.filter.as_deref().or_else(|| {
                decl.directives
                    .get(directives::FILTER)
                    .map(String::as_str)
            }) {
                Some(text) => Some(Filter::parse(text)?),
                None => None,
            };
            requirements.push(Requirement::new(
                alloc.next_requirement(),
                decl.namespace.clone(),
                decl.attributes.clone(),
                decl.directives.clone(),
                filter,
                id,
                module_id,
            ));
        }
        Ok(())
    }

    /// 合成本地代码需求
    fn build_native(decl: &NativeDecl) -> NativeCodeRequirement {
        let clauses = decl
            .clauses
            .iter()
            .map(|c| {
                NativeCodeClause::from_constraints(
                    c.libraries.clone(),
                    c.os_names.clone(),
                    c.os_version_floor.clone(),
                    c.processors.clone(),
                    c.languages.clone(),
                )
            })
            .collect();
        NativeCodeRequirement::new(clauses, decl.optional)
    }

    // ==================== 只读访问 ====================

    /// 代次句柄
    pub fn id(&self) -> GenerationId {
        self.id
    }

    /// 所属模块 ID
    pub fn module_id(&self) -> u64 {
        self.module_id
    }

    /// 符号名
    pub fn symbolic_name(&self) -> &str {
        &self.symbolic_name
    }

    /// 版本
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// 是否受单例约束
    pub fn is_singleton(&self) -> bool {
        self.singleton
    }

    /// 是否为片段
    pub fn is_fragment(&self) -> bool {
        self.fragment
    }

    /// 全部能力
    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// 指定命名空间下的能力
    pub fn capabilities_in<'a>(
        &'a self,
        namespace: &'a str,
    ) -> impl Iterator<Item = &'a Capability> {
        self.capabilities
            .iter()
            .filter(move |c| c.namespace() == namespace)
    }

    /// 按句柄找能力
    pub fn capability(&self, id: CapabilityId) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.id() == id)
    }

    /// 全部需求
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// 按句柄找需求
    pub fn requirement(&self, id: RequirementId) -> Option<&Requirement> {
        self.requirements.iter().find(|r| r.id() == id)
    }

    /// 包导出簿记
    pub fn exports(&self) -> &[Arc<ExportPkg>] {
        &self.exports
    }

    /// 包导入簿记
    pub fn imports(&self) -> &[Arc<ImportPkg>] {
        &self.imports
    }

    /// 片段的宿主需求句柄
    pub fn host_requirement(&self) -> Option<RequirementId> {
        self.host_requirement
    }

    /// 宿主侧登记片段附着（幂等）
    pub fn attach_fragment(&self, fragment: GenerationId) {
        let mut fragments = self.fragments_lock();
        if !fragments.contains(&fragment) {
            fragments.push(fragment);
        }
    }

    /// 摘除片段附着记录
    pub fn detach_fragment(&self, fragment: GenerationId) {
        self.fragments_lock().retain(|f| *f != fragment);
    }

    /// 已附着到本代次的片段代次
    pub fn fragments(&self) -> Vec<GenerationId> {
        self.fragments_lock().clone()
    }

    fn fragments_lock(&self) -> std::sync::MutexGuard<'_, Vec<GenerationId>> {
        match self.fragments.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 本地代码需求
    pub fn native(&self) -> Option<&NativeCodeRequirement> {
        self.native.as_ref()
    }

    /// 是否为僵尸代次
    pub fn is_zombie(&self) -> bool {
        self.zombie.load(Ordering::Acquire)
    }

    /// 置僵尸标记，连带标记全部导出
    pub fn mark_zombie(&self) {
        self.zombie.store(true, Ordering::Release);
        for export in &self.exports {
            export.mark_zombie();
        }
    }
}
