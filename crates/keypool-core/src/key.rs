//! Resource key type

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identity of a resource family, such as a table name.
///
/// Keys compare by exact string equality. Cloning is cheap, the string is
/// shared behind an `Arc`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(Arc<str>);

impl ResourceKey {
    /// Create a key from any string-like value
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    /// Get the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceKey({:?})", &*self.0)
    }
}

impl Borrow<str> for ResourceKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourceKey {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&String> for ResourceKey {
    fn from(value: &String) -> Self {
        Self::new(value)
    }
}

impl From<&ResourceKey> for ResourceKey {
    fn from(value: &ResourceKey) -> Self {
        value.clone()
    }
}

impl Serialize for ResourceKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ResourceKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_key_equality_is_exact() {
        assert_eq!(ResourceKey::from("orders"), ResourceKey::from("orders".to_string()));
        assert_ne!(ResourceKey::from("orders"), ResourceKey::from("Orders"));
        assert_ne!(ResourceKey::from("orders"), ResourceKey::from("orders "));
    }

    #[test]
    fn test_key_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(ResourceKey::from("users"), 1);
        assert_eq!(map.get("users"), Some(&1));
    }

    #[test]
    fn test_key_serializes_as_plain_string() {
        let key = ResourceKey::from("events");
        let json = serde_json::to_string(&key).expect("serialize");
        assert_eq!(json, "\"events\"");
        let back: ResourceKey = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, key);
    }
}
