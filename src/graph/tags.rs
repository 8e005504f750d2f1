//! Tags carried by nodes and edges
//!
//! A tag is either a bare label (`vip`) or a `name=value` pair. Tag names
//! compare case-insensitively; a set keeps the order tags were first added.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: Option<String>,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: Option<String>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Bare label without a value
    pub fn label(name: impl Into<String>) -> Self {
        Self::new(name, None)
    }

    pub fn pair(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, Some(value.into()))
    }

    /// Parse `name` or `name=value`
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        match text.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                Some(Tag::pair(name.trim(), value.trim()))
            }
            Some(_) => None,
            None if text.is_empty() => None,
            None => Some(Tag::label(text)),
        }
    }

    fn folded_name(&self) -> String {
        self.name.to_lowercase()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.name, value),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Ordered tag set keyed by case-folded name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tags(IndexMap<String, Tag>);

impl Tags {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Parse a comma separated list such as `t1, name=value`
    pub fn parse(text: &str) -> Option<Self> {
        let mut tags = Tags::new();
        for part in text.split(',').filter(|p| !p.trim().is_empty()) {
            tags.set(Tag::parse(part)?);
        }
        Some(tags)
    }

    /// Insert or replace a tag by name
    pub fn set(&mut self, tag: Tag) -> Option<Tag> {
        let name = tag.folded_name();
        match self.0.get_mut(&name) {
            Some(existing) => Some(std::mem::replace(existing, tag)),
            None => {
                self.0.insert(name, tag);
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Tag> {
        self.0.get(&name.to_lowercase())
    }

    /// Value of a `name=value` tag
    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|t| t.value.as_deref())
    }

    pub fn has(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_lowercase())
    }

    pub fn remove(&mut self, name: &str) -> Option<Tag> {
        self.0.shift_remove(&name.to_lowercase())
    }

    /// Union by name; tags in `other` override same-named tags here,
    /// names only present here are retained.
    pub fn merge(&self, other: &Tags) -> Tags {
        let mut merged = self.clone();
        for tag in other.iter() {
            merged.set(tag.clone());
        }
        merged
    }

    /// True if every tag in `filter` is present here. A filter tag without a
    /// value (or with value `*`) only requires the name.
    pub fn matches(&self, filter: &Tags) -> bool {
        filter.iter().all(|wanted| match self.get(&wanted.name) {
            None => false,
            Some(found) => match wanted.value.as_deref() {
                None | Some("*") => true,
                Some(value) => found.value.as_deref() == Some(value),
            },
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Tag> for Tags {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        let mut tags = Tags::new();
        for tag in iter {
            tags.set(tag);
        }
        tags
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.iter().map(|t| t.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tags() {
        let tags = Tags::parse("t1, name=Alice,  age = 30").unwrap();
        assert_eq!(tags.len(), 3);
        assert!(tags.has("T1"));
        assert_eq!(tags.value("name"), Some("Alice"));
        assert_eq!(tags.value("age"), Some("30"));
        assert_eq!(tags.to_string(), "t1,name=Alice,age=30");

        assert!(Tags::parse("=value").is_none());
    }

    #[test]
    fn test_merge_overrides_and_retains() {
        let current = Tags::parse("t1,name=old,keep=yes").unwrap();
        let update = Tags::parse("name=new,t2").unwrap();

        let merged = current.merge(&update);
        assert_eq!(merged.value("name"), Some("new"));
        assert_eq!(merged.value("keep"), Some("yes"));
        assert!(merged.has("t1"));
        assert!(merged.has("t2"));
        assert_eq!(merged.len(), 4);
    }

    #[test]
    fn test_set_replaces_by_folded_name() {
        let mut tags = Tags::new();
        tags.set(Tag::pair("Name", "a"));
        let old = tags.set(Tag::pair("name", "b"));
        assert_eq!(old, Some(Tag::pair("Name", "a")));
        assert_eq!(tags.len(), 1);
        assert_eq!(tags.value("NAME"), Some("b"));
    }

    #[test]
    fn test_matches_filter() {
        let tags = Tags::parse("t1,name=alice").unwrap();
        assert!(tags.matches(&Tags::parse("t1").unwrap()));
        assert!(tags.matches(&Tags::parse("name").unwrap()));
        assert!(tags.matches(&Tags::parse("name=*").unwrap()));
        assert!(tags.matches(&Tags::parse("name=alice,t1").unwrap()));
        assert!(!tags.matches(&Tags::parse("name=bob").unwrap()));
        assert!(!tags.matches(&Tags::parse("t2").unwrap()));
        assert!(tags.matches(&Tags::new()));
    }

    #[test]
    fn test_equality_ignores_order() {
        let a = Tags::parse("a,b=1").unwrap();
        let b = Tags::parse("b=1,a").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_remove() {
        let mut tags = Tags::parse("a,b,c").unwrap();
        assert!(tags.remove("B").is_some());
        assert_eq!(tags.to_string(), "a,c");
        assert!(tags.remove("missing").is_none());
    }
}
