//! Reference map: source-symbol to runtime-symbol resolution.
//!
//! The map is produced at compile time by the annotation-processor toolchain
//! and shipped next to each config as a JSON document. Method symbols use the
//! form `name(desc)ret`, field symbols `name:desc`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransformError};

/// Two-level symbol mapping with a default context.
///
/// Lookup order is context-specific bucket, then the default bucket, then
/// identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RefMap {
    /// Default bucket: `{owner → {source symbol → runtime symbol}}`.
    #[serde(default)]
    mappings: HashMap<String, HashMap<String, String>>,
    /// Context-keyed buckets.
    #[serde(default)]
    data: HashMap<String, HashMap<String, HashMap<String, String>>>,
}

impl RefMap {
    /// Empty map; every lookup is identity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the JSON document form.
    pub fn parse(name: &str, json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TransformError::BadConfig {
            name: name.to_string(),
            reason: format!("refmap: {e}"),
        })
    }

    /// Serialize to the JSON document form.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Add a mapping to the default bucket.
    pub fn add(&mut self, owner: &str, symbol: &str, runtime: &str) {
        self.mappings
            .entry(owner.to_string())
            .or_default()
            .insert(symbol.to_string(), runtime.to_string());
    }

    /// Add a mapping to a context bucket.
    pub fn add_context(&mut self, context: &str, owner: &str, symbol: &str, runtime: &str) {
        self.data
            .entry(context.to_string())
            .or_default()
            .entry(owner.to_string())
            .or_default()
            .insert(symbol.to_string(), runtime.to_string());
    }

    fn bucket(&self, context: Option<&str>) -> Option<&HashMap<String, HashMap<String, String>>> {
        match context {
            Some(ctx) => self.data.get(ctx),
            None => None,
        }
    }

    fn lookup_in(
        map: &HashMap<String, HashMap<String, String>>,
        owner: Option<&str>,
        symbol: &str,
    ) -> Option<String> {
        match owner {
            Some(owner) => map.get(owner).and_then(|m| m.get(symbol)).cloned(),
            // ownerless lookup scans every bucket and takes the first hit in
            // deterministic owner order
            None => {
                let mut owners: Vec<_> = map.keys().collect();
                owners.sort();
                owners
                    .into_iter()
                    .find_map(|o| map.get(o).and_then(|m| m.get(symbol)).cloned())
            }
        }
    }

    /// Resolve `symbol`, falling back from the context bucket to the default
    /// bucket to identity.
    pub fn remap(&self, context: Option<&str>, owner: Option<&str>, symbol: &str) -> String {
        if let Some(bucket) = self.bucket(context) {
            if let Some(hit) = Self::lookup_in(bucket, owner, symbol) {
                return hit;
            }
        }
        if let Some(hit) = Self::lookup_in(&self.mappings, owner, symbol) {
            return hit;
        }
        symbol.to_string()
    }

    /// Flag whether the map holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty() && self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RefMap {
        let mut map = RefMap::new();
        map.add("game/Engine", "tick()V", "func_71407_l()V");
        map.add("game/Engine", "count:I", "field_71428_T:I");
        map.add_context("notch", "game/Engine", "tick()V", "t()V");
        map
    }

    #[test]
    fn lookup_order() {
        let map = sample();
        assert_eq!(
            map.remap(None, Some("game/Engine"), "tick()V"),
            "func_71407_l()V"
        );
        assert_eq!(map.remap(Some("notch"), Some("game/Engine"), "tick()V"), "t()V");
        // context miss falls back to the default bucket
        assert_eq!(
            map.remap(Some("notch"), Some("game/Engine"), "count:I"),
            "field_71428_T:I"
        );
        // full miss is identity
        assert_eq!(map.remap(None, Some("game/Engine"), "other()V"), "other()V");
    }

    #[test]
    fn ownerless_scan() {
        let map = sample();
        assert_eq!(map.remap(None, None, "tick()V"), "func_71407_l()V");
    }

    #[test]
    fn document_round_trip() {
        let map = sample();
        let json = map.to_json();
        let read = RefMap::parse("test.refmap.json", &json).unwrap();
        assert_eq!(read, map);
    }

    #[test]
    fn malformed_document() {
        assert!(RefMap::parse("bad.refmap.json", "{ not json").is_err());
    }
}
