//! In-memory ordered key/value snapshot backing template rendering.
//!
//! Keys are normalized on insert (leading `/`, no duplicate or trailing
//! separators) and iterate in byte-wise ascending order, so prefix and
//! glob queries are bounded range scans over a `BTreeMap`.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use glob::{MatchOptions, Pattern};
use serde::Serialize;
use thiserror::Error;

/// A single key/value pair as templates see it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct KvPair {
    pub key: String,
    pub value: String,
}

/// Errors from snapshot lookups.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("key does not exist: {0}")]
    NotFound(String),

    #[error("invalid pattern {pattern:?}: {source}")]
    BadPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// Ordered key/value snapshot owned by a single template resource.
///
/// Iteration order is stable between mutations; every query returns keys
/// in ascending byte order.
#[derive(Debug, Default)]
pub struct KvStore {
    map: BTreeMap<String, String>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite `key` (normalized) with `value`.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.map.insert(normalize_key(key), value.into());
    }

    pub fn exists(&self, key: &str) -> bool {
        self.map.contains_key(&normalize_key(key))
    }

    pub fn get(&self, key: &str) -> Result<KvPair, KvError> {
        let key = normalize_key(key);
        match self.map.get(&key) {
            Some(value) => Ok(KvPair {
                key,
                value: value.clone(),
            }),
            None => Err(KvError::NotFound(key)),
        }
    }

    /// Value stored under `key`, or `default` when the key is missing and
    /// a default was supplied.
    pub fn get_value(&self, key: &str, default: Option<&str>) -> Result<String, KvError> {
        match self.get(key) {
            Ok(pair) => Ok(pair.value),
            Err(KvError::NotFound(_)) if default.is_some() => {
                Ok(default.unwrap_or_default().to_string())
            }
            Err(err) => Err(err),
        }
    }

    /// Every pair whose full key matches the shell-style `pattern`,
    /// ascending by key. `*` does not cross `/`. No match is an empty
    /// vec, not an error.
    pub fn get_all(&self, pattern: &str) -> Result<Vec<KvPair>, KvError> {
        let compiled = Pattern::new(pattern).map_err(|source| KvError::BadPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        let options = MatchOptions {
            require_literal_separator: true,
            ..MatchOptions::new()
        };

        // Any match shares the pattern's literal prefix, which bounds the scan.
        let prefix = literal_prefix(pattern);
        let mut pairs = Vec::new();
        for (key, value) in self.scan(prefix) {
            if compiled.matches_with(key, options) {
                pairs.push(KvPair {
                    key: key.clone(),
                    value: value.clone(),
                });
            }
        }
        Ok(pairs)
    }

    /// Values of [`KvStore::get_all`] matches, in the same order.
    pub fn get_all_values(&self, pattern: &str) -> Result<Vec<String>, KvError> {
        Ok(self
            .get_all(pattern)?
            .into_iter()
            .map(|pair| pair.value)
            .collect())
    }

    /// Distinct immediate names (files and directories) under `path`,
    /// sorted ascending. A leaf key equal to `path` contributes its own
    /// basename.
    pub fn list(&self, path: &str) -> Vec<String> {
        self.list_components(path, false)
    }

    /// Immediate sub-directory names under `path`: components that have
    /// at least one further child.
    pub fn list_dir(&self, path: &str) -> Vec<String> {
        self.list_components(path, true)
    }

    pub fn purge(&mut self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn list_components(&self, path: &str, dirs_only: bool) -> Vec<String> {
        let path = normalize_key(path);
        let prefix = if path == "/" {
            path.clone()
        } else {
            format!("{path}/")
        };

        let mut names = BTreeSet::new();
        if !dirs_only && path != "/" {
            if let (true, Some(base)) = (self.map.contains_key(&path), path.rsplit('/').next()) {
                names.insert(base.to_string());
            }
        }
        for (key, _) in self.scan(&prefix) {
            let remainder = &key[prefix.len()..];
            let mut parts = remainder.splitn(2, '/');
            if let Some(component) = parts.next() {
                if !dirs_only || parts.next().is_some() {
                    names.insert(component.to_string());
                }
            }
        }
        names.into_iter().collect()
    }

    fn scan<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a String, &'a String)> {
        self.map
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(move |(key, _)| key.starts_with(prefix))
    }
}

/// Normalize a key: force a leading `/`, collapse duplicate separators,
/// strip the trailing separator unless the key is the root.
pub fn normalize_key(key: &str) -> String {
    let mut normalized = String::with_capacity(key.len() + 1);
    for segment in key.split('/').filter(|segment| !segment.is_empty()) {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

fn literal_prefix(pattern: &str) -> &str {
    match pattern.find(['*', '?', '[']) {
        Some(index) => &pattern[..index],
        None => pattern,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
