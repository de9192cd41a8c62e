//! 版本与版本区间
//!
//! 本模块提供模块运行时使用的四元组版本号与半开/闭区间匹配：
//!
//! - [`Version`] - 不可变的 `(major, minor, micro, qualifier)` 四元组，全序
//! - [`VersionRange`] - `[floor, ceiling)` 等区间变体，支持 `includes` 与 `intersection`
//!
//! 注意：限定符 (qualifier) 按 ASCII 字符串比较，缺省限定符视为空串，
//! 排在所有非空限定符之前（`1.0.0 < 1.0.0.beta`）。这与 semver 的
//! 预发布语义不同，因此这里不使用 semver。

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::utils::{FrameworkError, Result};

// ============================================================================
// Version
// ============================================================================

/// 四元组版本号
///
/// # 示例
///
/// ```rust
/// use sunmao_core::version::Version;
///
/// let a: Version = "1.2.3".parse().unwrap();
/// let b: Version = "1.2.3.beta".parse().unwrap();
/// assert!(a < b);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    /// 主版本号
    pub major: u32,
    /// 次版本号
    pub minor: u32,
    /// 微版本号
    pub micro: u32,
    /// 限定符（缺省为空串）
    pub qualifier: String,
}

impl Version {
    /// 零版本 `0.0.0`
    pub fn zero() -> Self {
        Version::new(0, 0, 0)
    }

    /// 创建不带限定符的版本
    pub fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            major,
            minor,
            micro,
            qualifier: String::new(),
        }
    }

    /// 创建带限定符的版本
    pub fn with_qualifier(major: u32, minor: u32, micro: u32, qualifier: impl Into<String>) -> Self {
        Self {
            major,
            minor,
            micro,
            qualifier: qualifier.into(),
        }
    }

    /// 从字符串解析版本号
    ///
    /// 接受 `"1"`、`"1.2"`、`"1.2.3"`、`"1.2.3.qualifier"` 四种形式。
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(FrameworkError::InvalidDeclaration(
                "版本号不能为空".to_string(),
            ));
        }

        let mut parts = text.splitn(4, '.');
        let major = parse_segment(parts.next().unwrap_or(""), text)?;
        let minor = match parts.next() {
            Some(p) => parse_segment(p, text)?,
            None => 0,
        };
        let micro = match parts.next() {
            Some(p) => parse_segment(p, text)?,
            None => 0,
        };
        let qualifier = parts.next().unwrap_or("").to_string();

        if !qualifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(FrameworkError::InvalidDeclaration(format!(
                "版本限定符含非法字符: '{}'",
                text
            )));
        }

        Ok(Self {
            major,
            minor,
            micro,
            qualifier,
        })
    }
}

fn parse_segment(segment: &str, full: &str) -> Result<u32> {
    segment.parse::<u32>().map_err(|_| {
        FrameworkError::InvalidDeclaration(format!("无效的版本号格式: '{}'", full))
    })
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.micro.cmp(&other.micro))
            .then_with(|| self.qualifier.cmp(&other.qualifier))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.qualifier.is_empty() {
            write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
        } else {
            write!(
                f,
                "{}.{}.{}.{}",
                self.major, self.minor, self.micro, self.qualifier
            )
        }
    }
}

impl FromStr for Version {
    type Err = FrameworkError;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Version::parse(&text).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// VersionRange
// ============================================================================

/// 版本区间
///
/// 下界总是存在（缺省为 `0.0.0`），上界可以缺省（表示无穷）。
/// 空区间（如 `[2.0,1.0)`）是合法的、永假的区间。
///
/// # 示例
///
/// ```rust
/// use sunmao_core::version::{Version, VersionRange};
///
/// let range: VersionRange = "[1.0,2.0)".parse().unwrap();
/// assert!(range.includes(&Version::new(1, 5, 0)));
/// assert!(!range.includes(&Version::new(2, 0, 0)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    /// 下界
    pub floor: Version,
    /// 下界是否包含
    pub floor_inclusive: bool,
    /// 上界（None 表示无穷）
    pub ceiling: Option<Version>,
    /// 上界是否包含
    pub ceiling_inclusive: bool,
}

impl VersionRange {
    /// 匹配任意版本的区间 `[0.0.0, ∞)`
    pub fn any() -> Self {
        Self::at_least(Version::zero())
    }

    /// 下界闭区间 `[floor, ∞)`
    pub fn at_least(floor: Version) -> Self {
        Self {
            floor,
            floor_inclusive: true,
            ceiling: None,
            ceiling_inclusive: false,
        }
    }

    /// 精确匹配单个版本的区间 `[v, v]`
    pub fn exact(version: Version) -> Self {
        Self {
            floor: version.clone(),
            floor_inclusive: true,
            ceiling: Some(version),
            ceiling_inclusive: true,
        }
    }

    /// 从字符串解析版本区间
    ///
    /// 接受两种形式：
    /// - 区间形式：`"[1.0,2.0)"`、`"(1.0,2.0]"` 等
    /// - 裸版本：`"1.0"`，等价于 `[1.0, ∞)`
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let first = text.chars().next().ok_or_else(|| {
            FrameworkError::InvalidDeclaration("版本区间不能为空".to_string())
        })?;

        if first != '[' && first != '(' {
            // 裸版本形式
            return Ok(Self::at_least(Version::parse(text)?));
        }

        let last = text.chars().last().unwrap();
        if last != ']' && last != ')' {
            return Err(FrameworkError::InvalidDeclaration(format!(
                "版本区间缺少右端点: '{}'",
                text
            )));
        }

        let inner = &text[1..text.len() - 1];
        let mut parts = inner.splitn(2, ',');
        let floor_text = parts.next().unwrap_or("");
        let ceiling_text = parts.next().ok_or_else(|| {
            FrameworkError::InvalidDeclaration(format!("版本区间缺少上界: '{}'", text))
        })?;

        Ok(Self {
            floor: Version::parse(floor_text)?,
            floor_inclusive: first == '[',
            ceiling: Some(Version::parse(ceiling_text)?),
            ceiling_inclusive: last == ']',
        })
    }

    /// 判断版本是否落在区间内
    pub fn includes(&self, version: &Version) -> bool {
        match version.cmp(&self.floor) {
            Ordering::Less => return false,
            Ordering::Equal if !self.floor_inclusive => return false,
            _ => {}
        }

        if let Some(ceiling) = &self.ceiling {
            match version.cmp(ceiling) {
                Ordering::Greater => return false,
                Ordering::Equal if !self.ceiling_inclusive => return false,
                _ => {}
            }
        }

        true
    }

    /// 判断区间是否为空（不包含任何版本）
    pub fn is_empty(&self) -> bool {
        match &self.ceiling {
            None => false,
            Some(ceiling) => match self.floor.cmp(ceiling) {
                Ordering::Greater => true,
                Ordering::Equal => !(self.floor_inclusive && self.ceiling_inclusive),
                Ordering::Less => false,
            },
        }
    }

    /// 计算两个区间的交集
    ///
    /// 交集可能为空区间（合法、永假）。
    pub fn intersection(&self, other: &VersionRange) -> VersionRange {
        // 下界取较大者
        let (floor, floor_inclusive) = match self.floor.cmp(&other.floor) {
            Ordering::Greater => (self.floor.clone(), self.floor_inclusive),
            Ordering::Less => (other.floor.clone(), other.floor_inclusive),
            Ordering::Equal => (
                self.floor.clone(),
                self.floor_inclusive && other.floor_inclusive,
            ),
        };

        // 上界取较小者
        let (ceiling, ceiling_inclusive) = match (&self.ceiling, &other.ceiling) {
            (None, None) => (None, false),
            (Some(c), None) => (Some(c.clone()), self.ceiling_inclusive),
            (None, Some(c)) => (Some(c.clone()), other.ceiling_inclusive),
            (Some(a), Some(b)) => match a.cmp(b) {
                Ordering::Less => (Some(a.clone()), self.ceiling_inclusive),
                Ordering::Greater => (Some(b.clone()), other.ceiling_inclusive),
                Ordering::Equal => (
                    Some(a.clone()),
                    self.ceiling_inclusive && other.ceiling_inclusive,
                ),
            },
        };

        VersionRange {
            floor,
            floor_inclusive,
            ceiling,
            ceiling_inclusive,
        }
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ceiling {
            None => {
                if self.floor_inclusive && self.floor == Version::zero() {
                    write!(f, "0.0.0")
                } else {
                    write!(f, "{}", self.floor)
                }
            }
            Some(ceiling) => write!(
                f,
                "{}{},{}{}",
                if self.floor_inclusive { '[' } else { '(' },
                self.floor,
                ceiling,
                if self.ceiling_inclusive { ']' } else { ')' },
            ),
        }
    }
}

impl FromStr for VersionRange {
    type Err = FrameworkError;

    fn from_str(s: &str) -> Result<Self> {
        VersionRange::parse(s)
    }
}

impl Serialize for VersionRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VersionRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        VersionRange::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Version 测试 ====================

    #[test]
    fn test_version_parse() {
        assert_eq!(Version::parse("1").unwrap(), Version::new(1, 0, 0));
        assert_eq!(Version::parse("1.2").unwrap(), Version::new(1, 2, 0));
        assert_eq!(Version::parse("1.2.3").unwrap(), Version::new(1, 2, 3));
        assert_eq!(
            Version::parse("1.2.3.rc-1").unwrap(),
            Version::with_qualifier(1, 2, 3, "rc-1")
        );
    }

    #[test]
    fn test_version_parse_invalid() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("a.b").is_err());
        assert!(Version::parse("1.2.3.含空格 的").is_err());
        assert!(Version::parse("-1.0").is_err());
    }

    #[test]
    fn test_version_ordering() {
        let v100: Version = "1.0.0".parse().unwrap();
        let v110: Version = "1.1.0".parse().unwrap();
        let v200: Version = "2.0.0".parse().unwrap();

        assert!(v100 < v110);
        assert!(v110 < v200);
        // 传递性
        assert!(v100 < v200);
    }

    #[test]
    fn test_version_qualifier_ordering() {
        let plain: Version = "1.0.0".parse().unwrap();
        let alpha: Version = "1.0.0.alpha".parse().unwrap();
        let beta: Version = "1.0.0.beta".parse().unwrap();

        // 缺省限定符排在最前
        assert!(plain < alpha);
        assert!(alpha < beta);
    }

    #[test]
    fn test_version_compare_eq_iff_equals() {
        let a = Version::with_qualifier(1, 2, 3, "x");
        let b = Version::with_qualifier(1, 2, 3, "x");
        let c = Version::new(1, 2, 3);

        assert_eq!(a.cmp(&b), Ordering::Equal);
        assert_eq!(a, b);
        assert_ne!(a.cmp(&c), Ordering::Equal);
        assert_ne!(a, c);
    }

    #[test]
    fn test_version_display_roundtrip() {
        for text in ["1.0.0", "1.2.3", "1.2.3.beta"] {
            let v = Version::parse(text).unwrap();
            assert_eq!(v.to_string(), text);
        }
    }

    // ==================== VersionRange 测试 ====================

    #[test]
    fn test_range_parse_interval() {
        let range = VersionRange::parse("[1.0,2.0)").unwrap();
        assert!(range.floor_inclusive);
        assert!(!range.ceiling_inclusive);
        assert_eq!(range.floor, Version::new(1, 0, 0));
        assert_eq!(range.ceiling, Some(Version::new(2, 0, 0)));
    }

    #[test]
    fn test_range_parse_bare_version() {
        let range = VersionRange::parse("1.5").unwrap();
        assert_eq!(range.floor, Version::new(1, 5, 0));
        assert!(range.ceiling.is_none());
        assert!(range.includes(&Version::new(99, 0, 0)));
    }

    #[test]
    fn test_range_parse_invalid() {
        assert!(VersionRange::parse("").is_err());
        assert!(VersionRange::parse("[1.0").is_err());
        assert!(VersionRange::parse("[1.0,2.0").is_err());
        assert!(VersionRange::parse("[1.0]").is_err());
    }

    #[test]
    fn test_range_includes_boundaries() {
        let range = VersionRange::parse("[1.0,2.0)").unwrap();
        assert!(range.includes(&Version::new(1, 0, 0)));
        assert!(range.includes(&Version::new(1, 9, 9)));
        assert!(!range.includes(&Version::new(2, 0, 0)));
        assert!(!range.includes(&Version::new(0, 9, 0)));

        let closed = VersionRange::parse("[1.0,2.0]").unwrap();
        assert!(closed.includes(&Version::new(2, 0, 0)));

        let open = VersionRange::parse("(1.0,2.0)").unwrap();
        assert!(!open.includes(&Version::new(1, 0, 0)));
    }

    #[test]
    fn test_range_empty() {
        let reversed = VersionRange::parse("[2.0,1.0)").unwrap();
        assert!(reversed.is_empty());
        assert!(!reversed.includes(&Version::new(1, 5, 0)));

        // 单点半开区间为空
        let point_open = VersionRange::parse("[1.0,1.0)").unwrap();
        assert!(point_open.is_empty());
        assert!(!point_open.includes(&Version::new(1, 0, 0)));

        // 单点闭区间非空
        let point_closed = VersionRange::parse("[1.0,1.0]").unwrap();
        assert!(!point_closed.is_empty());
        assert!(point_closed.includes(&Version::new(1, 0, 0)));
    }

    #[test]
    fn test_range_intersection() {
        let a = VersionRange::parse("[1.0,3.0)").unwrap();
        let b = VersionRange::parse("[2.0,4.0)").unwrap();

        let i = a.intersection(&b);
        assert!(i.includes(&Version::new(2, 5, 0)));
        assert!(!i.includes(&Version::new(1, 5, 0)));
        assert!(!i.includes(&Version::new(3, 0, 0)));
    }

    #[test]
    fn test_range_intersection_empty_never_includes() {
        let a = VersionRange::parse("[1.0,2.0)").unwrap();
        let b = VersionRange::parse("[3.0,4.0)").unwrap();

        let i = a.intersection(&b);
        assert!(i.is_empty());
        for text in ["0.0.0", "1.5.0", "2.0.0", "3.5.0", "99.0.0"] {
            assert!(!i.includes(&Version::parse(text).unwrap()));
        }
    }

    #[test]
    fn test_range_intersection_inclusivity_at_equal_bound() {
        let closed = VersionRange::parse("[1.0,2.0]").unwrap();
        let open = VersionRange::parse("[1.0,2.0)").unwrap();

        let i = closed.intersection(&open);
        assert!(!i.includes(&Version::new(2, 0, 0)));
    }

    #[test]
    fn test_range_serde_roundtrip() {
        let range = VersionRange::parse("[1.0.0,2.0.0)").unwrap();
        let yaml = serde_yaml::to_string(&range).unwrap();
        let parsed: VersionRange = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, range);
    }
}
