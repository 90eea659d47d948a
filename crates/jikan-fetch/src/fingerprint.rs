//! Request fingerprints.
//!
//! A fingerprint is the endpoint path plus its query parameters held in a
//! sorted map, so the same logical request always yields the same cache key
//! regardless of the order parameters were added in.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Endpoint and canonical parameters of one upstream GET request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Fingerprint {
    endpoint: String,
    params: BTreeMap<String, String>,
}

impl Fingerprint {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add a query parameter
    pub fn param(mut self, name: &str, value: impl ToString) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }

    /// Add a query parameter only when a value is present
    pub fn param_opt<V: ToString>(self, name: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.param(name, value),
            None => self,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Query pairs in canonical order
    pub fn query(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Cache key: `{endpoint}-{json params}`
    pub fn key(&self) -> String {
        // A map of strings always serializes
        let params = serde_json::to_string(&self.params).unwrap_or_default();
        format!("{}-{}", self.endpoint, params)
    }

    /// Hex SHA-256 of the key, safe to use as a file name
    pub fn digest(&self) -> String {
        digest_key(&self.key())
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// Hex SHA-256 of an arbitrary cache key
pub fn digest_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_order_does_not_matter() {
        let a = Fingerprint::new("/anime").param("q", "naruto").param("page", 2);
        let b = Fingerprint::new("/anime").param("page", 2).param("q", "naruto");

        assert_eq!(a, b);
        assert_eq!(a.key(), b.key());
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_key_format() {
        let fp = Fingerprint::new("/seasons/2024/spring").param("page", 1);
        assert_eq!(fp.key(), r#"/seasons/2024/spring-{"page":"1"}"#);
        assert_eq!(Fingerprint::new("/seasons").key(), "/seasons-{}");
    }

    #[test]
    fn test_distinct_requests_have_distinct_keys() {
        let page1 = Fingerprint::new("/top/anime").param("page", 1);
        let page2 = Fingerprint::new("/top/anime").param("page", 2);
        let manga = Fingerprint::new("/top/manga").param("page", 1);

        assert_ne!(page1.key(), page2.key());
        assert_ne!(page1.key(), manga.key());
        assert_ne!(page1.digest(), page2.digest());
    }

    #[test]
    fn test_optional_params() {
        let fp = Fingerprint::new("/top/anime")
            .param_opt("filter", None::<&str>)
            .param_opt("limit", Some(24));
        assert_eq!(fp.query(), vec![("limit".to_string(), "24".to_string())]);
    }

    #[test]
    fn test_digest_is_hex_sha256() {
        let digest = Fingerprint::new("/seasons").digest();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
