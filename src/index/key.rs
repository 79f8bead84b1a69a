use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one similarity-search partition: a (tenant, source) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexKey {
    tenant_id: String,
    source_key: String,
}

impl IndexKey {
    pub fn new(tenant_id: impl Into<String>, source_key: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            source_key: source_key.into(),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn source_key(&self) -> &str {
        &self.source_key
    }

    /// Directory name for the tenant's partitions
    pub(crate) fn tenant_component(&self) -> String {
        encode_component(&self.tenant_id)
    }

    /// File stem for this partition's artifacts
    pub(crate) fn source_component(&self) -> String {
        encode_component(&self.source_key)
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.source_key)
    }
}

/// Encode an identifier as a single safe path component.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte becomes
/// `%XX`. The empty string maps to `%`, which no non-empty input can produce.
pub(crate) fn encode_component(raw: &str) -> String {
    if raw.is_empty() {
        return "%".to_string();
    }

    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_unchanged() {
        assert_eq!(encode_component("acme"), "acme");
        assert_eq!(encode_component("eng-wiki_2"), "eng-wiki_2");
    }

    #[test]
    fn test_traversal_is_neutralised() {
        let encoded = encode_component("../etc");
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains(".."));
        assert_eq!(encoded, "%2E%2E%2Fetc");
    }

    #[test]
    fn test_distinct_inputs_stay_distinct() {
        assert_ne!(encode_component(""), encode_component("%"));
        assert_ne!(encode_component("a.b"), encode_component("a%2Eb"));
    }

    #[test]
    fn test_display() {
        let key = IndexKey::new("acme", "finance");
        assert_eq!(key.to_string(), "acme/finance");
        assert_eq!(key.tenant_id(), "acme");
        assert_eq!(key.source_key(), "finance");
    }
}
