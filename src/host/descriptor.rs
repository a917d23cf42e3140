//! Node descriptors: the opaque queries used to reach the host tree.
//!
//! Descriptors are written in a small CSS subset:
//!
//! - a tag name (`aside`) or `*`
//! - class filters (`.Root__right-sidebar`)
//! - attribute filters: `[hidden]`, `[aria-label="Queue"]`, `[class*='scrollable']`
//! - comma-separated alternatives, tried as one selector list
//!
//! Combinators (`div > div`, descendant whitespace) are rejected; nested lookups
//! go through an explicit scope node instead.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::DescriptorError;

static COMPOUND_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9-]*|\*)?((?:\.[A-Za-z0-9_-]+|\[[^\]]+\])*)$")
        .expect("compound selector regex")
});
static PART_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"\.([A-Za-z0-9_-]+)|\[\s*([A-Za-z0-9_:-]+)\s*(?:(\*?=)\s*(?:"([^"]*)"|'([^']*)'|([^\]\s"']+)))?\s*\]"#,
    )
    .expect("selector part regex")
});

/// Read access to a node's tag and attributes, enough to evaluate a selector.
pub trait ElementView {
    fn tag(&self) -> &str;
    fn attribute(&self, name: &str) -> Option<&str>;

    fn has_class(&self, class: &str) -> bool {
        self.attribute("class")
            .map(|classes| classes.split_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttributeMatch {
    Present,
    Equals(String),
    Contains(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttributeFilter {
    name: String,
    rule: AttributeMatch,
}

/// A single compound selector (one alternative of a descriptor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    tag: Option<String>,
    classes: Vec<String>,
    attributes: Vec<AttributeFilter>,
}

impl Selector {
    fn parse(raw: &str) -> Result<Selector, DescriptorError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(DescriptorError::Empty);
        }
        let caps = COMPOUND_REGEX
            .captures(raw)
            .ok_or_else(|| DescriptorError::Unsupported(raw.to_string()))?;

        let tag = caps
            .get(1)
            .map(|m| m.as_str())
            .filter(|t| *t != "*")
            .map(|t| t.to_ascii_lowercase());

        let mut classes = Vec::new();
        let mut attributes = Vec::new();
        let rest = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let mut consumed = 0;
        for part in PART_REGEX.captures_iter(rest) {
            let whole = part.get(0).map(|m| m.as_str()).unwrap_or("");
            consumed += whole.len();
            if let Some(class) = part.get(1) {
                classes.push(class.as_str().to_string());
                continue;
            }
            let name = match part.get(2) {
                Some(name) => name.as_str().to_string(),
                None => return Err(DescriptorError::Unsupported(raw.to_string())),
            };
            let value = part
                .get(4)
                .or_else(|| part.get(5))
                .or_else(|| part.get(6))
                .map(|m| m.as_str().to_string());
            let rule = match (part.get(3).map(|m| m.as_str()), value) {
                (None, _) => AttributeMatch::Present,
                (Some("="), Some(v)) => AttributeMatch::Equals(v),
                (Some("*="), Some(v)) => AttributeMatch::Contains(v),
                _ => return Err(DescriptorError::Unsupported(raw.to_string())),
            };
            attributes.push(AttributeFilter { name, rule });
        }
        if consumed != rest.len() {
            return Err(DescriptorError::Unsupported(raw.to_string()));
        }
        if tag.is_none() && classes.is_empty() && attributes.is_empty() && !raw.starts_with('*') {
            return Err(DescriptorError::Unsupported(raw.to_string()));
        }

        Ok(Selector {
            tag,
            classes,
            attributes,
        })
    }

    /// Evaluate this selector against a single element.
    pub fn matches(&self, element: &dyn ElementView) -> bool {
        if let Some(tag) = &self.tag {
            if !element.tag().eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if !self.classes.iter().all(|c| element.has_class(c)) {
            return false;
        }
        self.attributes.iter().all(|filter| {
            match (element.attribute(&filter.name), &filter.rule) {
                (None, _) => false,
                (Some(_), AttributeMatch::Present) => true,
                (Some(actual), AttributeMatch::Equals(expected)) => actual == expected,
                (Some(actual), AttributeMatch::Contains(needle)) => actual.contains(needle.as_str()),
            }
        })
    }
}

/// A node query: one or more alternative selectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    source: String,
    alternatives: Vec<Selector>,
}

impl Descriptor {
    pub fn parse(source: &str) -> Result<Descriptor, DescriptorError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(DescriptorError::Empty);
        }
        let alternatives = split_alternatives(source)
            .into_iter()
            .map(|s| Selector::parse(&s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Descriptor {
            source: source.to_string(),
            alternatives,
        })
    }

    /// True if any alternative matches the element.
    pub fn matches(&self, element: &dyn ElementView) -> bool {
        self.alternatives.iter().any(|s| s.matches(element))
    }

    /// A descriptor reduced to its first alternative.
    pub fn primary(&self) -> Descriptor {
        let first = split_alternatives(&self.source)
            .into_iter()
            .next()
            .unwrap_or_default();
        Descriptor {
            source: first.trim().to_string(),
            alternatives: self.alternatives.iter().take(1).cloned().collect(),
        }
    }

    pub fn alternatives(&self) -> usize {
        self.alternatives.len()
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Split on top-level commas, leaving commas inside brackets or quotes alone.
fn split_alternatives(source: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for ch in source.chars() {
        match (ch, quote) {
            (c, Some(q)) if c == q => quote = None,
            (_, Some(_)) => {}
            ('"', None) | ('\'', None) => quote = Some(ch),
            ('[', None) => depth += 1,
            (']', None) => depth = depth.saturating_sub(1),
            (',', None) if depth == 0 => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    parts.push(current);
    parts
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for Descriptor {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Descriptor::parse(s)
    }
}

impl Serialize for Descriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Descriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Descriptor::parse(&raw).map_err(serde::de::Error::custom)
    }
}
