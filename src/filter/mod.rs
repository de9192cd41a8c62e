//! 属性过滤器
//!
//! 本模块提供需求对能力属性集的匹配谓词：
//!
//! - [`AttrValue`] - 能力属性值（字符串/版本/数值/布尔/列表）
//! - [`Filter`] - 不可变布尔表达式，从 LDAP 风格文本解析一次后可复用
//!
//! 过滤器支持 `=`（含 `*` 子串匹配）、`>=`、`<=`（版本/数值感知）、
//! `~=`（近似匹配：大小写不敏感字符串或数值强制转换），以及
//! `&`、`|`、`!` 连接词与括号分组。
//!
//! # 示例
//!
//! ```rust
//! use sunmao_core::filter::{AttrValue, Filter};
//! use std::collections::BTreeMap;
//!
//! let filter = Filter::parse("(&(pkg=demo.api)(version>=1.2))").unwrap();
//!
//! let mut attrs = BTreeMap::new();
//! attrs.insert("pkg".to_string(), AttrValue::Str("demo.api".to_string()));
//! attrs.insert("version".to_string(), AttrValue::version(1, 5, 0));
//! assert!(filter.matches(&attrs));
//! ```

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::{FrameworkError, Result};
use crate::version::Version;

// ============================================================================
// 属性值
// ============================================================================

/// 能力属性值
///
/// 属性在能力构造后不可变；比较时过滤器字面量按属性的实际类型强制转换。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// 布尔值
    Bool(bool),
    /// 整数
    Int(i64),
    /// 浮点数
    Float(f64),
    /// 版本号
    Version(Version),
    /// 字符串
    Str(String),
    /// 列表（任一元素匹配即匹配）
    List(Vec<AttrValue>),
}

/// 属性映射（键 → 值，插入顺序无关）
pub type AttrMap = BTreeMap<String, AttrValue>;

impl AttrValue {
    /// 便捷构造版本属性
    pub fn version(major: u32, minor: u32, micro: u32) -> Self {
        AttrValue::Version(Version::new(major, minor, micro))
    }

    /// 字符串形态（用于子串匹配和诊断输出）
    pub fn as_text(&self) -> String {
        match self {
            AttrValue::Bool(b) => b.to_string(),
            AttrValue::Int(i) => i.to_string(),
            AttrValue::Float(f) => f.to_string(),
            AttrValue::Version(v) => v.to_string(),
            AttrValue::Str(s) => s.clone(),
            AttrValue::List(items) => items
                .iter()
                .map(AttrValue::as_text)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

impl From<Version> for AttrValue {
    fn from(v: Version) -> Self {
        AttrValue::Version(v)
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        AttrValue::Int(i)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

/// 将属性映射格式化为诊断快照（`{k1=v1, k2=v2}`）
pub fn snapshot(attrs: &AttrMap) -> String {
    let body = attrs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v.as_text()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{}}}", body)
}

// ============================================================================
// 过滤器
// ============================================================================

/// 不可变属性过滤器
///
/// 从需求的 filter 指令文本构造一次，之后可在任意多次 `matches`
/// 调用间复用。执行环境与本地代码需求通过程序化构造器合成过滤器，
/// 从不经过用户提供的文本。
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// 所有子式均真
    And(Vec<Filter>),
    /// 任一子式为真
    Or(Vec<Filter>),
    /// 子式取反
    Not(Box<Filter>),
    /// 相等（字面量含 `*` 时为子串匹配）
    Equal {
        /// 属性键
        key: String,
        /// 字面量
        literal: String,
    },
    /// 大于等于（版本/数值感知）
    GreaterEq {
        /// 属性键
        key: String,
        /// 字面量
        literal: String,
    },
    /// 小于等于（版本/数值感知）
    LessEq {
        /// 属性键
        key: String,
        /// 字面量
        literal: String,
    },
    /// 近似匹配（大小写不敏感 / 数值强制转换）
    Approx {
        /// 属性键
        key: String,
        /// 字面量
        literal: String,
    },
    /// 属性存在（`(key=*)`）
    Present {
        /// 属性键
        key: String,
    },
}

impl Filter {
    // ==================== 程序化构造器 ====================

    /// 合取
    pub fn all(clauses: Vec<Filter>) -> Filter {
        Filter::And(clauses)
    }

    /// 析取
    pub fn any(clauses: Vec<Filter>) -> Filter {
        Filter::Or(clauses)
    }

    /// 取反
    pub fn negate(inner: Filter) -> Filter {
        Filter::Not(Box::new(inner))
    }

    /// 相等比较
    pub fn eq(key: impl Into<String>, literal: impl Into<String>) -> Filter {
        Filter::Equal {
            key: key.into(),
            literal: literal.into(),
        }
    }

    /// 大于等于比较
    pub fn ge(key: impl Into<String>, literal: impl Into<String>) -> Filter {
        Filter::GreaterEq {
            key: key.into(),
            literal: literal.into(),
        }
    }

    /// 小于等于比较
    pub fn le(key: impl Into<String>, literal: impl Into<String>) -> Filter {
        Filter::LessEq {
            key: key.into(),
            literal: literal.into(),
        }
    }

    /// 近似比较
    pub fn approx(key: impl Into<String>, literal: impl Into<String>) -> Filter {
        Filter::Approx {
            key: key.into(),
            literal: literal.into(),
        }
    }

    // ==================== 解析 ====================

    /// 从 LDAP 风格文本解析过滤器
    ///
    /// 语法：`(&(a=b)(|(v>=1.0)(!(x=y))))`。`\` 转义下一个字符。
    pub fn parse(text: &str) -> Result<Filter> {
        let chars: Vec<char> = text.trim().chars().collect();
        let mut pos = 0usize;
        let filter = parse_component(&chars, &mut pos)?;
        if pos != chars.len() {
            return Err(FrameworkError::FilterSyntax(format!(
                "位置 {} 存在多余字符: '{}'",
                pos, text
            )));
        }
        Ok(filter)
    }

    // ==================== 求值 ====================

    /// 对属性映射求值
    pub fn matches(&self, attrs: &AttrMap) -> bool {
        match self {
            Filter::And(clauses) => clauses.iter().all(|c| c.matches(attrs)),
            Filter::Or(clauses) => clauses.iter().any(|c| c.matches(attrs)),
            Filter::Not(inner) => !inner.matches(attrs),
            Filter::Present { key } => attrs.contains_key(key),
            Filter::Equal { key, literal } => {
                attrs.get(key).is_some_and(|v| eval_equal(v, literal))
            }
            Filter::GreaterEq { key, literal } => attrs
                .get(key)
                .is_some_and(|v| eval_order(v, literal, |o| o != Ordering::Less)),
            Filter::LessEq { key, literal } => attrs
                .get(key)
                .is_some_and(|v| eval_order(v, literal, |o| o != Ordering::Greater)),
            Filter::Approx { key, literal } => {
                attrs.get(key).is_some_and(|v| eval_approx(v, literal))
            }
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(clauses) => {
                write!(f, "(&")?;
                for c in clauses {
                    write!(f, "{}", c)?;
                }
                write!(f, ")")
            }
            Filter::Or(clauses) => {
                write!(f, "(|")?;
                for c in clauses {
                    write!(f, "{}", c)?;
                }
                write!(f, ")")
            }
            Filter::Not(inner) => write!(f, "(!{})", inner),
            Filter::Equal { key, literal } => write!(f, "({}={})", key, literal),
            Filter::GreaterEq { key, literal } => write!(f, "({}>={})", key, literal),
            Filter::LessEq { key, literal } => write!(f, "({}<={})", key, literal),
            Filter::Approx { key, literal } => write!(f, "({}~={})", key, literal),
            Filter::Present { key } => write!(f, "({}=*)", key),
        }
    }
}

// ============================================================================
// 解析器内部实现
// ============================================================================

fn parse_component(chars: &[char], pos: &mut usize) -> Result<Filter> {
    expect(chars, pos, '(')?;

    let filter = match chars.get(*pos) {
        Some('&') => {
            *pos += 1;
            Filter::And(parse_clause_list(chars, pos)?)
        }
        Some('|') => {
            *pos += 1;
            Filter::Or(parse_clause_list(chars, pos)?)
        }
        Some('!') => {
            *pos += 1;
            Filter::Not(Box::new(parse_component(chars, pos)?))
        }
        Some(_) => parse_comparison(chars, pos)?,
        None => {
            return Err(FrameworkError::FilterSyntax(
                "过滤器在 '(' 后意外结束".to_string(),
            ))
        }
    };

    expect(chars, pos, ')')?;
    Ok(filter)
}

fn parse_clause_list(chars: &[char], pos: &mut usize) -> Result<Vec<Filter>> {
    let mut clauses = Vec::new();
    while let Some('(') = chars.get(*pos) {
        clauses.push(parse_component(chars, pos)?);
    }
    if clauses.is_empty() {
        return Err(FrameworkError::FilterSyntax(
            "连接词缺少子式".to_string(),
        ));
    }
    Ok(clauses)
}

fn parse_comparison(chars: &[char], pos: &mut usize) -> Result<Filter> {
    // 读取属性键（到运算符为止）
    let mut key = String::new();
    loop {
        match chars.get(*pos) {
            Some('=') | Some('>') | Some('<') | Some('~') => break,
            Some(')') | Some('(') | None => {
                return Err(FrameworkError::FilterSyntax(format!(
                    "比较式缺少运算符 (位置 {})",
                    pos
                )))
            }
            Some(&c) => {
                key.push(c);
                *pos += 1;
            }
        }
    }
    let key = key.trim().to_string();
    if key.is_empty() {
        return Err(FrameworkError::FilterSyntax("属性键不能为空".to_string()));
    }

    // 运算符
    let op = match chars.get(*pos) {
        Some('=') => {
            *pos += 1;
            '='
        }
        Some(&c @ ('>' | '<' | '~')) => {
            *pos += 1;
            expect(chars, pos, '=')?;
            c
        }
        _ => unreachable!(),
    };

    // 字面量（到未转义的 ')' 为止）。转义符原样保留, 求值时区分
    // 转义字符与 '*' 通配符, 展示时可无损往返。
    let mut literal = String::new();
    loop {
        match chars.get(*pos) {
            Some(')') | None => break,
            Some('\\') => {
                *pos += 1;
                if let Some(&c) = chars.get(*pos) {
                    literal.push('\\');
                    literal.push(c);
                    *pos += 1;
                } else {
                    return Err(FrameworkError::FilterSyntax(
                        "转义符后缺少字符".to_string(),
                    ));
                }
            }
            Some(&c) => {
                literal.push(c);
                *pos += 1;
            }
        }
    }

    Ok(match op {
        '=' if literal == "*" => Filter::Present { key },
        '=' => Filter::Equal { key, literal },
        '>' => Filter::GreaterEq { key, literal },
        '<' => Filter::LessEq { key, literal },
        '~' => Filter::Approx { key, literal },
        _ => unreachable!(),
    })
}

fn expect(chars: &[char], pos: &mut usize, expected: char) -> Result<()> {
    match chars.get(*pos) {
        Some(&c) if c == expected => {
            *pos += 1;
            Ok(())
        }
        other => Err(FrameworkError::FilterSyntax(format!(
            "位置 {} 期望 '{}', 实际为 {:?}",
            pos, expected, other
        ))),
    }
}

// ============================================================================
// 比较求值
// ============================================================================

/// 字面量是否含未转义的 `*` 通配符
fn has_wildcard(literal: &str) -> bool {
    let mut chars = literal.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '*' => return true,
            _ => {}
        }
    }
    false
}

/// 还原字面量中的转义字符
fn unescape(literal: &str) -> Cow<'_, str> {
    if !literal.contains('\\') {
        return Cow::Borrowed(literal);
    }
    let mut out = String::with_capacity(literal.len());
    let mut chars = literal.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

fn eval_equal(value: &AttrValue, literal: &str) -> bool {
    if let AttrValue::List(items) = value {
        return items.iter().any(|item| eval_equal(item, literal));
    }

    if has_wildcard(literal) {
        return substring_match(&value.as_text(), literal);
    }

    let literal = unescape(literal);
    let literal = literal.as_ref();
    match value {
        AttrValue::Str(s) => s == literal,
        AttrValue::Version(v) => Version::parse(literal).map(|lv| *v == lv).unwrap_or(false),
        AttrValue::Int(i) => literal.trim().parse::<i64>().map(|l| *i == l).unwrap_or(false),
        AttrValue::Float(f) => literal
            .trim()
            .parse::<f64>()
            .map(|l| *f == l)
            .unwrap_or(false),
        AttrValue::Bool(b) => literal.trim().parse::<bool>().map(|l| *b == l).unwrap_or(false),
        AttrValue::List(_) => unreachable!(),
    }
}

fn eval_order(value: &AttrValue, literal: &str, accept: impl Fn(Ordering) -> bool + Copy) -> bool {
    if let AttrValue::List(items) = value {
        return items.iter().any(|item| eval_order(item, literal, accept));
    }
    let literal = unescape(literal);
    let literal = literal.as_ref();
    match value {
        AttrValue::List(_) => false,
        AttrValue::Version(v) => Version::parse(literal)
            .map(|lv| accept(v.cmp(&lv)))
            .unwrap_or(false),
        AttrValue::Int(i) => literal
            .trim()
            .parse::<i64>()
            .map(|l| accept(i.cmp(&l)))
            .unwrap_or(false),
        AttrValue::Float(f) => literal
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(|l| f.partial_cmp(&l))
            .map(accept)
            .unwrap_or(false),
        // 字符串退化为字典序比较
        AttrValue::Str(s) => accept(s.as_str().cmp(literal)),
        AttrValue::Bool(_) => false,
    }
}

fn eval_approx(value: &AttrValue, literal: &str) -> bool {
    if let AttrValue::List(items) = value {
        return items.iter().any(|item| eval_approx(item, literal));
    }
    let literal = unescape(literal);
    let literal = literal.as_ref();
    match value {
        AttrValue::List(_) => false,
        AttrValue::Str(s) => {
            normalize_approx(s).eq_ignore_ascii_case(&normalize_approx(literal))
        }
        AttrValue::Int(i) => literal.trim().parse::<i64>().map(|l| *i == l).unwrap_or(false),
        AttrValue::Float(f) => literal
            .trim()
            .parse::<f64>()
            .map(|l| *f == l)
            .unwrap_or(false),
        AttrValue::Bool(b) => literal
            .trim()
            .parse::<bool>()
            .map(|l| *b == l)
            .unwrap_or(false),
        AttrValue::Version(v) => Version::parse(literal.trim())
            .map(|lv| *v == lv)
            .unwrap_or(false),
    }
}

/// 近似匹配的归一化：去除空白
fn normalize_approx(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// 把通配模式按未转义的 `*` 切成字面段, 段内转义已还原
fn wildcard_segments(pattern: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '*' => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);
    segments
}

/// `*` 通配的子串匹配
fn substring_match(text: &str, pattern: &str) -> bool {
    let segments = wildcard_segments(pattern);
    let mut rest = text;

    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            // 模式不以 '*' 开头时必须前缀匹配
            if !rest.starts_with(segment.as_str()) {
                return false;
            }
            rest = &rest[segment.len()..];
        } else if i == segments.len() - 1 {
            // 模式不以 '*' 结尾时必须后缀匹配
            if !rest.ends_with(segment.as_str()) {
                return false;
            }
            rest = &rest[..rest.len() - segment.len()];
        } else {
            match rest.find(segment.as_str()) {
                Some(idx) => rest = &rest[idx + segment.len()..],
                None => return false,
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: Vec<(&str, AttrValue)>) -> AttrMap {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    // ==================== 解析测试 ====================

    #[test]
    fn test_parse_simple_equal() {
        let f = Filter::parse("(pkg=demo.api)").unwrap();
        assert_eq!(f, Filter::eq("pkg", "demo.api"));
    }

    #[test]
    fn test_parse_connectives() {
        let f = Filter::parse("(&(a=1)(|(b>=2)(!(c=3))))").unwrap();
        match f {
            Filter::And(clauses) => {
                assert_eq!(clauses.len(), 2);
                assert!(matches!(clauses[1], Filter::Or(_)));
            }
            other => panic!("期望 And, 实际 {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(Filter::parse("").is_err());
        assert!(Filter::parse("(a=1").is_err());
        assert!(Filter::parse("(a=1))").is_err());
        assert!(Filter::parse("(&)").is_err());
        assert!(Filter::parse("(=x)").is_err());
    }

    #[test]
    fn test_parse_escaped_literal() {
        let f = Filter::parse(r"(name=a\*b)").unwrap();
        // 转义后的 '*' 是普通字符，不触发子串匹配
        assert!(f.matches(&attrs(vec![("name", "a*b".into())])));
        assert!(!f.matches(&attrs(vec![("name", "axb".into())])));
    }

    #[test]
    fn test_escaped_wildcard_mixed_with_real_wildcard() {
        // 未转义的 '*' 是通配符, 转义的是段内普通字符
        let f = Filter::parse(r"(name=a\*b*)").unwrap();
        assert!(f.matches(&attrs(vec![("name", "a*b-tail".into())])));
        assert!(!f.matches(&attrs(vec![("name", "axb-tail".into())])));

        // 只有转义 '*' 的整字面量不是存在性判断
        let only_escaped = Filter::parse(r"(name=\*)").unwrap();
        assert!(matches!(only_escaped, Filter::Equal { .. }));
        assert!(only_escaped.matches(&attrs(vec![("name", "*".into())])));
        assert!(!only_escaped.matches(&attrs(vec![("name", "x".into())])));
    }

    #[test]
    fn test_escaped_literal_display_roundtrip() {
        let f = Filter::parse(r"(name=a\*b)").unwrap();
        assert_eq!(f.to_string(), r"(name=a\*b)");
        assert_eq!(Filter::parse(&f.to_string()).unwrap(), f);
    }

    #[test]
    fn test_display_roundtrip() {
        let text = "(&(pkg=demo.api)(version>=1.2))";
        let f = Filter::parse(text).unwrap();
        assert_eq!(f.to_string(), text);
        assert_eq!(Filter::parse(&f.to_string()).unwrap(), f);
    }

    // ==================== 求值测试 ====================

    #[test]
    fn test_matches_version_aware() {
        let f = Filter::parse("(&(version>=1.2)(version<=2.0))").unwrap();
        let m = attrs(vec![("version", AttrValue::version(1, 5, 0))]);
        assert!(f.matches(&m));

        let low = attrs(vec![("version", AttrValue::version(1, 0, 0))]);
        assert!(!f.matches(&low));
    }

    #[test]
    fn test_matches_numeric() {
        let f = Filter::parse("(count>=10)").unwrap();
        assert!(f.matches(&attrs(vec![("count", AttrValue::Int(15))])));
        assert!(!f.matches(&attrs(vec![("count", AttrValue::Int(5))])));
    }

    #[test]
    fn test_matches_substring() {
        let f = Filter::parse("(osname=Win*)").unwrap();
        assert!(f.matches(&attrs(vec![("osname", "Windows 10".into())])));
        assert!(!f.matches(&attrs(vec![("osname", "Linux".into())])));

        let mid = Filter::parse("(name=*core*)").unwrap();
        assert!(mid.matches(&attrs(vec![("name", "sunmao-core-lib".into())])));
    }

    #[test]
    fn test_matches_approx() {
        let f = Filter::parse("(osname~=Mac OS X)").unwrap();
        assert!(f.matches(&attrs(vec![("osname", "MacOSX".into())])));
        assert!(f.matches(&attrs(vec![("osname", "mac os x".into())])));
        assert!(!f.matches(&attrs(vec![("osname", "Linux".into())])));
    }

    #[test]
    fn test_matches_present() {
        let f = Filter::parse("(optional=*)").unwrap();
        assert!(f.matches(&attrs(vec![("optional", "anything".into())])));
        assert!(!f.matches(&attrs(vec![("other", "x".into())])));
    }

    #[test]
    fn test_matches_list_any_element() {
        let f = Filter::parse("(ee=JavaSE-1.8)").unwrap();
        let m = attrs(vec![(
            "ee",
            AttrValue::List(vec!["JavaSE-1.7".into(), "JavaSE-1.8".into()]),
        )]);
        assert!(f.matches(&m));
    }

    #[test]
    fn test_matches_missing_key() {
        let f = Filter::parse("(pkg=x)").unwrap();
        assert!(!f.matches(&AttrMap::new()));
        // Not 包住缺失键时为真
        let n = Filter::parse("(!(pkg=x))").unwrap();
        assert!(n.matches(&AttrMap::new()));
    }

    #[test]
    fn test_programmatic_construction() {
        // 本地代码/执行环境需求的程序化合成路径
        let f = Filter::any(vec![
            Filter::all(vec![
                Filter::approx("osname", "linux"),
                Filter::ge("osversion", "2.0"),
            ]),
            Filter::all(vec![
                Filter::approx("osname", "macosx"),
                Filter::ge("osversion", "10.0"),
            ]),
        ]);

        let linux = attrs(vec![
            ("osname", "Linux".into()),
            ("osversion", AttrValue::version(2, 5, 0)),
        ]);
        assert!(f.matches(&linux));

        let old_mac = attrs(vec![
            ("osname", "MacOSX".into()),
            ("osversion", AttrValue::version(9, 0, 0)),
        ]);
        assert!(!f.matches(&old_mac));
    }

    #[test]
    fn test_snapshot_format() {
        let m = attrs(vec![
            ("osname", "linux".into()),
            ("osversion", AttrValue::version(2, 5, 0)),
        ]);
        let s = snapshot(&m);
        assert!(s.contains("osname=linux"));
        assert!(s.contains("osversion=2.5.0"));
    }
}
