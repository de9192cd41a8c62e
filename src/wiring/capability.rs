//! 能力定义
//!
//! 能力是某个代次声明提供的带属性事实。属性在构造后不可变；
//! 保留命名空间的使用在构造时校验。

use std::collections::BTreeMap;

use crate::filter::AttrMap;
use crate::utils::{FrameworkError, Result};
use crate::wiring::{namespaces, CapabilityId, GenerationId};

/// 能力的来源
///
/// 保留命名空间中的能力只允许来自框架合成或代次声明元数据，
/// 绝不允许来自非零 id 模块的用户自定义能力头。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityOrigin {
    /// 框架自身合成（系统模块 id 0 或代次元数据派生）
    Synthesized,
    /// 代次声明元数据派生（包导出、身份等）
    DeclaredMetadata,
    /// 用户自定义的通用能力头
    UserHeader,
}

/// 能力
///
/// 归属某个代次独占所有；布线表通过句柄引用它，不形成引用环。
#[derive(Debug, Clone)]
pub struct Capability {
    /// 能力句柄
    id: CapabilityId,
    /// 命名空间
    namespace: String,
    /// 属性（构造后不可变）
    attributes: AttrMap,
    /// 指令
    directives: BTreeMap<String, String>,
    /// 所属代次
    owner: GenerationId,
    /// 所属模块 ID
    owner_module: u64,
}

impl Capability {
    /// 构造能力
    ///
    /// # Errors
    ///
    /// 非零 id 模块的用户自定义能力头使用保留命名空间时返回
    /// [`FrameworkError::InvalidDeclaration`]。
    pub fn new(
        id: CapabilityId,
        namespace: impl Into<String>,
        attributes: AttrMap,
        directives: BTreeMap<String, String>,
        owner: GenerationId,
        owner_module: u64,
        origin: CapabilityOrigin,
    ) -> Result<Self> {
        let namespace = namespace.into();

        if namespaces::is_reserved(&namespace)
            && origin == CapabilityOrigin::UserHeader
            && owner_module != 0
        {
            return Err(FrameworkError::InvalidDeclaration(format!(
                "模块 {} 的用户能力头不得使用保留命名空间 '{}'",
                owner_module, namespace
            )));
        }

        Ok(Self {
            id,
            namespace,
            attributes,
            directives,
            owner,
            owner_module,
        })
    }

    /// 能力句柄
    pub fn id(&self) -> CapabilityId {
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

    /// 读取单条指令
    pub fn directive(&self, name: &str) -> Option<&str> {
        self.directives.get(name).map(String::as_str)
    }

    /// 所属代次
    pub fn owner(&self) -> GenerationId {
        self.owner
    }

    /// 所属模块 ID
    pub fn owner_module(&self) -> u64 {
        self.owner_module
    }
}
