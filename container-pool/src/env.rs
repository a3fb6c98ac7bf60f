//! `KEY=VALUE` environment list parsing, merging and stable serialization.
//!
//! Determinism of [`EnvironmentMap::array`] is load-bearing: hook scripts
//! receive their environment in sorted order, and tests assert on it.

use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("malformed environment: empty string")]
    EmptyString,
    #[error("malformed environment: invalid format (not key=value): {0:?}")]
    InvalidFormat(String),
    #[error("malformed environment: empty key: {0:?}")]
    EmptyKey(String),
}

/// A merged, deterministically-ordered `KEY=VALUE` environment.
///
/// Backed by a `BTreeMap` rather than a `HashMap` so that iteration order
/// already matches [`EnvironmentMap::array`]'s sort-by-key contract.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnvironmentMap(BTreeMap<String, String>);

impl EnvironmentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses an ordered list of `KEY=VALUE` strings. Later entries win over
    /// earlier ones with the same key (last write wins within one parse).
    pub fn parse<I, S>(entries: I) -> Result<Self, EnvError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map = BTreeMap::new();

        for raw in entries {
            let raw = raw.as_ref();
            if raw.is_empty() {
                return Err(EnvError::EmptyString);
            }

            let mut tokens = raw.split('=');
            let key = tokens.next().ok_or_else(|| EnvError::InvalidFormat(raw.to_owned()))?;
            let value = match (tokens.next(), tokens.next()) {
                (Some(value), None) => value,
                _ => return Err(EnvError::InvalidFormat(raw.to_owned())),
            };

            if key.is_empty() {
                return Err(EnvError::EmptyKey(raw.to_owned()));
            }

            map.insert(key.to_owned(), value.to_owned());
        }

        Ok(Self(map))
    }

    /// Returns a new map containing all of `self`, overlaid by `other`.
    /// `other` wins on key collision.
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.0.clone();
        for (key, value) in &other.0 {
            merged.insert(key.clone(), value.clone());
        }
        Self(merged)
    }

    /// Returns `K=V` entries, sorted by key.
    pub fn array(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for EnvironmentMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl FromIterator<(String, String)> for EnvironmentMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sorts_and_dedupes() {
        let env = EnvironmentMap::parse(["b=2", "a=1", "a=3"]).unwrap();
        assert_eq!(env.array(), vec!["a=3".to_string(), "b=2".to_string()]);
    }

    #[test]
    fn parse_rejects_empty_string() {
        assert!(matches!(
            EnvironmentMap::parse([""]).unwrap_err(),
            EnvError::EmptyString
        ));
    }

    #[test]
    fn parse_rejects_missing_equals() {
        assert!(matches!(
            EnvironmentMap::parse(["novalue"]).unwrap_err(),
            EnvError::InvalidFormat(_)
        ));
    }

    #[test]
    fn parse_rejects_multiple_equals() {
        assert!(matches!(
            EnvironmentMap::parse(["a=b=c"]).unwrap_err(),
            EnvError::InvalidFormat(_)
        ));
    }

    #[test]
    fn parse_rejects_empty_key() {
        assert!(matches!(
            EnvironmentMap::parse(["=value"]).unwrap_err(),
            EnvError::EmptyKey(_)
        ));
    }

    #[test]
    fn merge_prefers_overlay() {
        let base = EnvironmentMap::parse(["var1=spec1", "var2=spec2"]).unwrap();
        let overlay = EnvironmentMap::parse(["var2=rootfs2", "var3=rootfs3"]).unwrap();
        // spec wins: base is the overlay argument to merge, since the spec
        // should win on collision per the container-create contract.
        let merged = overlay.merge(&base);
        assert_eq!(merged.get("var1"), Some("spec1"));
        assert_eq!(merged.get("var2"), Some("spec2"));
        assert_eq!(merged.get("var3"), Some("rootfs3"));
    }

    #[test]
    fn array_is_sorted_by_key() {
        let env = EnvironmentMap::parse(["zeta=1", "alpha=2", "mid=3"]).unwrap();
        assert_eq!(
            env.array(),
            vec!["alpha=2".to_string(), "mid=3".to_string(), "zeta=1".to_string()]
        );
    }
}
