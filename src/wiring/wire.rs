//! 布线与布线表
//!
//! 布线是一条需求到一条满足它的能力的已提交配对。能力侧与需求侧
//! 通过句柄互相引用同一条布线记录，存储在集中式句柄表中，避免
//! 智能指针相互引用形成的环。删除总是两侧对称进行，不会留下
//! 悬挂的半条布线。

use std::collections::HashMap;

use tracing::trace;

use crate::utils::{FrameworkError, Result};
use crate::wiring::{Capability, CapabilityId, GenerationId, Requirement, RequirementId, WireId};

/// 布线记录（不可变元组）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wire {
    /// 布线句柄
    pub id: WireId,
    /// 被满足的能力
    pub capability: CapabilityId,
    /// 发起的需求
    pub requirement: RequirementId,
    /// 提供方代次
    pub provider: GenerationId,
    /// 需求方代次
    pub requirer: GenerationId,
}

/// 布线句柄表
///
/// - 一条能力拥有可变的布线列表（仅由解析器增删）
/// - 一条需求至多拥有一条布线（解析前为零）
/// - 不变量：任意布线满足 `requirement.matches(capability)`，在
///   [`WireTable::set_wire`] 入口处校验
#[derive(Debug, Default)]
pub struct WireTable {
    /// 布线记录
    wires: HashMap<WireId, Wire>,
    /// 能力侧布线列表
    capability_wires: HashMap<CapabilityId, Vec<WireId>>,
    /// 需求侧单条布线
    requirement_wire: HashMap<RequirementId, WireId>,
    /// 按提供方代次索引
    by_provider: HashMap<GenerationId, Vec<WireId>>,
    /// 按需求方代次索引
    by_requirer: HashMap<GenerationId, Vec<WireId>>,
    /// 句柄计数器
    next_id: u64,
}

impl WireTable {
    /// 创建空表
    pub fn new() -> Self {
        Self::default()
    }

    /// 建立一条布线，两侧对称登记
    ///
    /// # Errors
    ///
    /// - 需求与能力不匹配时返回 `InvalidDeclaration`（不变量校验）
    /// - 需求已有布线时返回 `InvalidDeclaration`
    pub fn set_wire(&mut self, requirement: &Requirement, capability: &Capability) -> Result<WireId> {
        if !requirement.matches(capability) {
            return Err(FrameworkError::InvalidDeclaration(format!(
                "布线不变量被破坏: 需求 (namespace '{}') 不匹配目标能力",
                requirement.namespace()
            )));
        }
        if self.requirement_wire.contains_key(&requirement.id()) {
            return Err(FrameworkError::InvalidDeclaration(format!(
                "需求已有布线 (namespace '{}')",
                requirement.namespace()
            )));
        }

        let id = WireId(self.next_id);
        self.next_id += 1;

        let wire = Wire {
            id,
            capability: capability.id(),
            requirement: requirement.id(),
            provider: capability.owner(),
            requirer: requirement.owner(),
        };

        self.capability_wires
            .entry(capability.id())
            .or_default()
            .push(id);
        self.requirement_wire.insert(requirement.id(), id);
        self.by_provider.entry(capability.owner()).or_default().push(id);
        self.by_requirer.entry(requirement.owner()).or_default().push(id);
        self.wires.insert(id, wire);

        trace!(
            wire = id.0,
            namespace = requirement.namespace(),
            provider = capability.owner().0,
            requirer = requirement.owner().0,
            "建立布线"
        );

        Ok(id)
    }

    /// 删除一条布线（两侧对称摘除）
    pub fn remove_wire(&mut self, id: WireId) {
        let Some(wire) = self.wires.remove(&id) else {
            return;
        };

        if let Some(list) = self.capability_wires.get_mut(&wire.capability) {
            list.retain(|w| *w != id);
            if list.is_empty() {
                self.capability_wires.remove(&wire.capability);
            }
        }
        self.requirement_wire.remove(&wire.requirement);
        if let Some(list) = self.by_provider.get_mut(&wire.provider) {
            list.retain(|w| *w != id);
            if list.is_empty() {
                self.by_provider.remove(&wire.provider);
            }
        }
        if let Some(list) = self.by_requirer.get_mut(&wire.requirer) {
            list.retain(|w| *w != id);
            if list.is_empty() {
                self.by_requirer.remove(&wire.requirer);
            }
        }

        trace!(wire = id.0, "删除布线");
    }

    /// 删除某代次作为提供方或需求方的全部布线
    ///
    /// 返回被删除的布线记录，供调用方做包图善后。
    pub fn remove_generation(&mut self, generation: GenerationId) -> Vec<Wire> {
        let mut ids: Vec<WireId> = Vec::new();
        if let Some(list) = self.by_provider.get(&generation) {
            ids.extend(list.iter().copied());
        }
        if let Some(list) = self.by_requirer.get(&generation) {
            ids.extend(list.iter().copied());
        }
        ids.sort_by_key(|w| w.0);
        ids.dedup();

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(wire) = self.wires.get(&id).cloned() {
                self.remove_wire(id);
                removed.push(wire);
            }
        }
        removed
    }

    /// 查询布线记录
    pub fn get(&self, id: WireId) -> Option<&Wire> {
        self.wires.get(&id)
    }

    /// 能力侧的布线列表
    pub fn wires_of_capability(&self, capability: CapabilityId) -> Vec<&Wire> {
        self.capability_wires
            .get(&capability)
            .map(|ids| ids.iter().filter_map(|id| self.wires.get(id)).collect())
            .unwrap_or_default()
    }

    /// 需求侧的布线（至多一条）
    pub fn wire_of_requirement(&self, requirement: RequirementId) -> Option<&Wire> {
        self.requirement_wire
            .get(&requirement)
            .and_then(|id| self.wires.get(id))
    }

    /// 某代次作为提供方的布线
    pub fn wires_provided_by(&self, generation: GenerationId) -> Vec<&Wire> {
        self.by_provider
            .get(&generation)
            .map(|ids| ids.iter().filter_map(|id| self.wires.get(id)).collect())
            .unwrap_or_default()
    }

    /// 某代次作为需求方的布线
    pub fn wires_required_by(&self, generation: GenerationId) -> Vec<&Wire> {
        self.by_requirer
            .get(&generation)
            .map(|ids| ids.iter().filter_map(|id| self.wires.get(id)).collect())
            .unwrap_or_default()
    }

    /// 遍历全部布线
    pub fn iter(&self) -> impl Iterator<Item = &Wire> {
        self.wires.values()
    }

    /// 布线总数
    pub fn len(&self) -> usize {
        self.wires.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.wires.is_empty()
    }
}
