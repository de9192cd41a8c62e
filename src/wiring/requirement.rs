//! 需求定义
//!
//! 需求是某个代次需要被满足的带过滤器约束。两类特化需求：
//!
//! - require-module 需求：匹配 `module` 命名空间，至多一个提供方，
//!   受 `visibility`/`resolution` 指令约束（数据上仍是普通 [`Requirement`]，
//!   特化逻辑在解析器中）
//! - [`NativeCodeRequirement`]：按降序特异性（处理器 > 操作系统 >
//!   最高 OS 版本下界 > 语言）选择最佳本地库候选

use std::collections::BTreeMap;

use crate::filter::{AttrMap, AttrValue, Filter};
use crate::version::Version;
use crate::wiring::{attributes, directives, Capability, GenerationId, RequirementId};

// ============================================================================
// 通用需求
// ============================================================================

/// 需求
#[derive(Debug, Clone)]
pub struct Requirement {
    /// 需求句柄
    id: RequirementId,
    /// 命名空间
    namespace: String,
    /// 属性
    attributes: AttrMap,
    /// 指令
    directives: BTreeMap<String, String>,
    /// 过滤器（构造一次，跨多次 matches 复用）
    filter: Option<Filter>,
    /// 所属代次
    owner: GenerationId,
    /// 所属模块 ID
    owner_module: u64,
}

impl Requirement {
    /// 构造需求
    pub fn new(
        id: RequirementId,
        namespace: impl Into<String>,
        attributes: AttrMap,
        directives: BTreeMap<String, String>,
        filter: Option<Filter>,
        owner: GenerationId,
        owner_module: u64,
    ) -> Self {
        Self {
            id,
            namespace: namespace.into(),
            attributes,
            directives,
            filter,
            owner,
            owner_module,
        }
    }

    /// 需求句柄
    pub fn id(&self) -> RequirementId {
        self.id
    }

    /// 命名空间
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// 属性映射
    pub fn attributes(&self) -> &AttrMap {
        &self.attributes
    }

    /// 指令映射
    pub fn directives(&self) -> &BTreeMap<String, String> {
        &self.directives
    }

    /// 过滤器
    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    /// 所属代次
    pub fn owner(&self) -> GenerationId {
        self.owner
    }

    /// 所属模块 ID
    pub fn owner_module(&self) -> u64 {
        self.owner_module
    }

    /// 判断能力是否满足本需求
    ///
    /// 命名空间相等，且（无过滤器，或过滤器接受能力的属性映射）。
    pub fn matches(&self, capability: &Capability) -> bool {
        if self.namespace != capability.namespace() {
            return false;
        }
        match &self.filter {
            None => true,
            Some(filter) => filter.matches(capability.attributes()),
        }
    }

    /// 是否可选需求（`resolution:=optional`）
    pub fn is_optional(&self) -> bool {
        self.directives
            .get(directives::RESOLUTION)
            .is_some_and(|v| v == directives::RESOLUTION_OPTIONAL)
    }

    /// 是否在解析阶段生效（`effective` 缺省或为 `resolve`）
    pub fn is_effective_at_resolve(&self) -> bool {
        match self.directives.get(directives::EFFECTIVE) {
            None => true,
            Some(v) => v == directives::EFFECTIVE_RESOLVE,
        }
    }

    /// require-module 需求是否携带 `visibility:=reexport`
    pub fn is_reexport(&self) -> bool {
        self.directives
            .get(directives::VISIBILITY)
            .is_some_and(|v| v == directives::VISIBILITY_REEXPORT)
    }
}

// ============================================================================
// 本地代码需求
// ============================================================================

/// 一条本地代码候选（清单中的一个备选分支）
///
/// 过滤器由声明的约束程序化合成（对每个属性取 AND），从不来自
/// 用户提供的过滤器文本。
#[derive(Debug, Clone)]
pub struct NativeCodeClause {
    /// 本地库路径列表
    pub libraries: Vec<String>,
    /// 合成的匹配谓词
    pub filter: Filter,
    /// 声明的最低操作系统版本下界（用于平局裁决）
    pub min_os_version: Option<Version>,
    /// 是否声明了语言约束（用于平局裁决）
    pub requires_language: bool,
}

impl NativeCodeClause {
    /// 从声明的约束合成候选
    ///
    /// 同名约束的多个取值之间取 OR，不同约束之间取 AND。
    pub fn from_constraints(
        libraries: Vec<String>,
        os_names: Vec<String>,
        os_version_floor: Option<Version>,
        processors: Vec<String>,
        languages: Vec<String>,
    ) -> Self {
        let mut clauses = Vec::new();

        if !os_names.is_empty() {
            clauses.push(Filter::any(
                os_names
                    .iter()
                    .map(|n| Filter::approx(attributes::OS_NAME, n.clone()))
                    .collect(),
            ));
        }
        if let Some(floor) = &os_version_floor {
            clauses.push(Filter::ge(attributes::OS_VERSION, floor.to_string()));
        }
        if !processors.is_empty() {
            clauses.push(Filter::any(
                processors
                    .iter()
                    .map(|p| Filter::approx(attributes::PROCESSOR, p.clone()))
                    .collect(),
            ));
        }
        let requires_language = !languages.is_empty();
        if requires_language {
            clauses.push(Filter::any(
                languages
                    .iter()
                    .map(|l| Filter::approx(attributes::LANGUAGE, l.clone()))
                    .collect(),
            ));
        }

        let filter = if clauses.is_empty() {
            // 无约束的候选匹配任何宿主
            Filter::all(vec![])
        } else {
            Filter::all(clauses)
        };

        Self {
            libraries,
            filter,
            min_os_version: os_version_floor,
            requires_language,
        }
    }
}

/// 本地代码需求
///
/// 候选按清单声明顺序保存；选择算法见 [`NativeCodeRequirement::select`]。
#[derive(Debug, Clone)]
pub struct NativeCodeRequirement {
    /// 候选列表（声明顺序）
    pub clauses: Vec<NativeCodeClause>,
    /// 是否带通配可选标记（`*`）：无候选匹配时不判为解析失败
    pub optional: bool,
}

impl NativeCodeRequirement {
    /// 构造本地代码需求
    pub fn new(clauses: Vec<NativeCodeClause>, optional: bool) -> Self {
        Self { clauses, optional }
    }

    /// 选择最佳匹配候选，返回其声明序号
    ///
    /// 算法：按声明顺序遍历候选，跳过谓词不匹配宿主属性的；在匹配的
    /// 候选中，严格按以下优先序保留当前最佳：
    /// (a) 更高的最低 OS 版本下界；否则
    /// (b) 当前最佳未要求语言匹配而候选要求时，取候选；否则
    /// (c) 完全平局时先声明者胜。
    pub fn select(&self, host: &AttrMap) -> Option<usize> {
        let mut best: Option<(usize, &NativeCodeClause)> = None;

        for (index, clause) in self.clauses.iter().enumerate() {
            if !clause.filter.matches(host) {
                continue;
            }

            match &best {
                None => best = Some((index, clause)),
                Some((_, current)) => {
                    if Self::prefers(clause, current) {
                        best = Some((index, clause));
                    }
                }
            }
        }

        best.map(|(index, _)| index)
    }

    /// 候选是否优于当前最佳
    fn prefers(candidate: &NativeCodeClause, current: &NativeCodeClause) -> bool {
        // Option 的序：None 视为最低下界
        match candidate.min_os_version.cmp(&current.min_os_version) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => {
                candidate.requires_language && !current.requires_language
            }
        }
    }
}

/// 构造宿主的本地能力属性快照
pub fn host_native_attributes(
    os_name: &str,
    os_version: &Version,
    processor: &str,
    language: &str,
) -> AttrMap {
    let mut attrs = AttrMap::new();
    attrs.insert(attributes::OS_NAME.to_string(), AttrValue::from(os_name));
    attrs.insert(
        attributes::OS_VERSION.to_string(),
        AttrValue::Version(os_version.clone()),
    );
    attrs.insert(attributes::PROCESSOR.to_string(), AttrValue::from(processor));
    attrs.insert(attributes::LANGUAGE.to_string(), AttrValue::from(language));
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wiring::{CapabilityOrigin, CapabilityId};

    fn host(os: &str, version: (u32, u32, u32), lang: &str) -> AttrMap {
        host_native_attributes(os, &Version::new(version.0, version.1, version.2), "x86-64", lang)
    }

    fn clause(
        os_floor: Option<(u32, u32, u32)>,
        languages: Vec<&str>,
    ) -> NativeCodeClause {
        NativeCodeClause::from_constraints(
            vec!["lib/native.so".to_string()],
            vec!["linux".to_string()],
            os_floor.map(|(a, b, c)| Version::new(a, b, c)),
            vec![],
            languages.into_iter().map(String::from).collect(),
        )
    }

    // ==================== Requirement 测试 ====================

    #[test]
    fn test_requirement_matches_namespace_and_filter() {
        let cap = Capability::new(
            CapabilityId(1),
            "com.example",
            [("grade".to_string(), AttrValue::Int(5))].into(),
            BTreeMap::new(),
            GenerationId(1),
            1,
            CapabilityOrigin::UserHeader,
        )
        .unwrap();

        let matching = Requirement::new(
            RequirementId(1),
            "com.example",
            AttrMap::new(),
            BTreeMap::new(),
            Some(Filter::parse("(grade>=3)").unwrap()),
            GenerationId(2),
            2,
        );
        assert!(matching.matches(&cap));

        let wrong_ns = Requirement::new(
            RequirementId(2),
            "other",
            AttrMap::new(),
            BTreeMap::new(),
            None,
            GenerationId(2),
            2,
        );
        assert!(!wrong_ns.matches(&cap));

        let failing_filter = Requirement::new(
            RequirementId(3),
            "com.example",
            AttrMap::new(),
            BTreeMap::new(),
            Some(Filter::parse("(grade>=9)").unwrap()),
            GenerationId(2),
            2,
        );
        assert!(!failing_filter.matches(&cap));
    }

    #[test]
    fn test_requirement_directive_helpers() {
        let mut dirs = BTreeMap::new();
        dirs.insert("resolution".to_string(), "optional".to_string());
        dirs.insert("effective".to_string(), "active".to_string());
        dirs.insert("visibility".to_string(), "reexport".to_string());

        let req = Requirement::new(
            RequirementId(1),
            "package",
            AttrMap::new(),
            dirs,
            None,
            GenerationId(1),
            1,
        );
        assert!(req.is_optional());
        assert!(!req.is_effective_at_resolve());
        assert!(req.is_reexport());

        let plain = Requirement::new(
            RequirementId(2),
            "package",
            AttrMap::new(),
            BTreeMap::new(),
            None,
            GenerationId(1),
            1,
        );
        assert!(!plain.is_optional());
        assert!(plain.is_effective_at_resolve());
        assert!(!plain.is_reexport());
    }

    // ==================== 本地代码选择测试 ====================

    #[test]
    fn test_native_higher_floor_beats_language_match() {
        // 场景 C：≥2.0 无语言 vs ≥1.0 带语言，宿主 2.5 + 语言匹配
        let req = NativeCodeRequirement::new(
            vec![
                clause(Some((2, 0, 0)), vec![]),
                clause(Some((1, 0, 0)), vec!["zh"]),
            ],
            false,
        );

        let selected = req.select(&host("Linux", (2, 5, 0), "zh"));
        assert_eq!(selected, Some(0));
    }

    #[test]
    fn test_native_language_breaks_floor_tie() {
        let req = NativeCodeRequirement::new(
            vec![
                clause(Some((1, 0, 0)), vec![]),
                clause(Some((1, 0, 0)), vec!["zh"]),
            ],
            false,
        );

        let selected = req.select(&host("Linux", (2, 0, 0), "zh"));
        assert_eq!(selected, Some(1));
    }

    #[test]
    fn test_native_first_declared_wins_on_full_tie() {
        let req = NativeCodeRequirement::new(
            vec![
                clause(Some((1, 0, 0)), vec!["zh"]),
                clause(Some((1, 0, 0)), vec!["zh"]),
            ],
            false,
        );

        let selected = req.select(&host("Linux", (2, 0, 0), "zh"));
        assert_eq!(selected, Some(0));
    }

    #[test]
    fn test_native_skips_non_matching() {
        let req = NativeCodeRequirement::new(
            vec![
                clause(Some((9, 0, 0)), vec![]),
                clause(Some((1, 0, 0)), vec![]),
            ],
            false,
        );

        // 宿主 2.0 不满足 ≥9.0，只剩第二个候选
        let selected = req.select(&host("Linux", (2, 0, 0), "zh"));
        assert_eq!(selected, Some(1));
    }

    #[test]
    fn test_native_no_match() {
        let req = NativeCodeRequirement::new(vec![clause(Some((9, 0, 0)), vec![])], false);
        assert_eq!(req.select(&host("Linux", (2, 0, 0), "zh")), None);
    }

    #[test]
    fn test_native_os_name_approx() {
        let c = NativeCodeClause::from_constraints(
            vec!["lib/a.so".to_string()],
            vec!["Mac OS X".to_string()],
            None,
            vec![],
            vec![],
        );
        let req = NativeCodeRequirement::new(vec![c], false);
        assert_eq!(req.select(&host("MacOSX", (10, 0, 0), "en")), Some(0));
    }

    #[test]
    fn test_native_unconstrained_clause_matches_everything() {
        let c = NativeCodeClause::from_constraints(
            vec!["lib/a.so".to_string()],
            vec![],
            None,
            vec![],
            vec![],
        );
        let req = NativeCodeRequirement::new(vec![c], false);
        assert_eq!(req.select(&host("Anything", (0, 0, 1), "xx")), Some(0));
    }
}
