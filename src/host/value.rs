//! Values exchanged with the host scripting engine.

use crate::registry::Proxy;
use std::collections::BTreeMap;

/// A host value: what event tables are made of and what handlers return
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    /// Null / absent value
    Nil,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Integer(i64),
    /// String value
    String(String),
    /// Sequence (1-based list on the host side)
    Array(Vec<HostValue>),
    /// Keyed table
    Table(BTreeMap<String, HostValue>),
    /// Proxied native object
    Proxy(Proxy),
}

impl HostValue {
    /// Check if value is nil
    pub fn is_nil(&self) -> bool {
        matches!(self, HostValue::Nil)
    }

    /// Get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as integer
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            HostValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as array
    pub fn as_array(&self) -> Option<&Vec<HostValue>> {
        match self {
            HostValue::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Get as table
    pub fn as_table(&self) -> Option<&BTreeMap<String, HostValue>> {
        match self {
            HostValue::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Get as proxy
    pub fn as_proxy(&self) -> Option<&Proxy> {
        match self {
            HostValue::Proxy(p) => Some(p),
            _ => None,
        }
    }

    /// String conversion the host applies when text is expected: strings and numbers only
    pub fn to_text(&self) -> Option<String> {
        match self {
            HostValue::String(s) => Some(s.clone()),
            HostValue::Integer(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<i64> for HostValue {
    fn from(n: i64) -> Self {
        HostValue::Integer(n)
    }
}

impl From<i32> for HostValue {
    fn from(n: i32) -> Self {
        HostValue::Integer(n as i64)
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::String(s)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(s.to_string())
    }
}

impl From<Proxy> for HostValue {
    fn from(p: Proxy) -> Self {
        HostValue::Proxy(p)
    }
}

impl<T: Into<HostValue>> From<Vec<T>> for HostValue {
    fn from(v: Vec<T>) -> Self {
        HostValue::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(HostValue::Nil)
    }
}

impl Default for HostValue {
    fn default() -> Self {
        HostValue::Nil
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        assert_eq!(HostValue::from(5i64).as_integer(), Some(5));
        assert_eq!(HostValue::from("x").as_str(), Some("x"));
        assert!(HostValue::from(None::<String>).is_nil());
        assert_eq!(
            HostValue::from(vec!["a", "b"]),
            HostValue::Array(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn test_to_text() {
        assert_eq!(HostValue::from(42i64).to_text().as_deref(), Some("42"));
        assert_eq!(HostValue::from("v").to_text().as_deref(), Some("v"));
        assert_eq!(HostValue::Bool(true).to_text(), None);
        assert_eq!(HostValue::Nil.to_text(), None);
    }
}
