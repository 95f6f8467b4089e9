//! Static model registry
//!
//! The catalog is loaded once at startup from configuration and read-only
//! thereafter. Updating it requires a restart (or an explicit reload that
//! also clears the resident cache).

use crate::types::ModelDescriptor;
use crate::{Error, Result};
use std::collections::HashMap;

/// Immutable registry of known models
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: HashMap<String, ModelDescriptor>,
}

impl ModelCatalog {
    /// Build a catalog from descriptors, rejecting duplicate ids
    pub fn new(descriptors: Vec<ModelDescriptor>) -> Result<Self> {
        let mut models = HashMap::with_capacity(descriptors.len());
        for desc in descriptors {
            if models.insert(desc.id.clone(), desc).is_some() {
                return Err(Error::config("duplicate model id in catalog"));
            }
        }
        Ok(Self { models })
    }

    /// Look up a model by id
    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.get(id)
    }

    /// Look up a model by id, erroring when absent
    pub fn require(&self, id: &str) -> Result<&ModelDescriptor> {
        self.get(id).ok_or_else(|| Error::unknown_model(id))
    }

    /// All descriptors, in no particular order
    pub fn list(&self) -> Vec<&ModelDescriptor> {
        self.models.values().collect()
    }

    /// Number of registered models
    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Descriptors for a set of model ids, sorted by footprint ascending.
    /// Unknown ids are skipped (callers validate at config load).
    pub fn by_footprint_asc<'a>(&'a self, ids: &[String]) -> Vec<&'a ModelDescriptor> {
        let mut out: Vec<&ModelDescriptor> =
            ids.iter().filter_map(|id| self.get(id)).collect();
        out.sort_by(|a, b| {
            a.footprint_gb
                .partial_cmp(&b.footprint_gb)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        out
    }

    /// Descriptors for a set of model ids, sorted by footprint descending
    pub fn by_footprint_desc<'a>(&'a self, ids: &[String]) -> Vec<&'a ModelDescriptor> {
        let mut out = self.by_footprint_asc(ids);
        out.reverse();
        out
    }

    /// Descriptors for a set of model ids, sorted by context window descending
    pub fn by_context_desc<'a>(&'a self, ids: &[String]) -> Vec<&'a ModelDescriptor> {
        let mut out: Vec<&ModelDescriptor> =
            ids.iter().filter_map(|id| self.get(id)).collect();
        out.sort_by(|a, b| b.context_window.cmp(&a.context_window));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, footprint_gb: f64, context_window: u32) -> ModelDescriptor {
        ModelDescriptor {
            id: id.to_string(),
            footprint_gb,
            cpu_eligible: true,
            cpu_speed: "medium".to_string(),
            tags: vec!["general".to_string()],
            context_window,
        }
    }

    #[test]
    fn test_lookup() {
        let catalog = ModelCatalog::new(vec![
            descriptor("gemma:2b", 1.7, 2048),
            descriptor("phi3:3.8b", 2.2, 4096),
        ])
        .unwrap();

        assert_eq!(catalog.len(), 2);
        assert!(catalog.get("gemma:2b").is_some());
        assert!(catalog.get("missing:1b").is_none());
        assert!(catalog.require("missing:1b").is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = ModelCatalog::new(vec![
            descriptor("gemma:2b", 1.7, 2048),
            descriptor("gemma:2b", 1.8, 2048),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_orderings() {
        let catalog = ModelCatalog::new(vec![
            descriptor("phi3:3.8b", 2.2, 4096),
            descriptor("gemma:2b", 1.7, 2048),
            descriptor("deepseek-coder:6.7b", 3.9, 16384),
        ])
        .unwrap();

        let ids: Vec<String> = ["gemma:2b", "phi3:3.8b", "deepseek-coder:6.7b"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let asc = catalog.by_footprint_asc(&ids);
        assert_eq!(asc[0].id, "gemma:2b");
        assert_eq!(asc[2].id, "deepseek-coder:6.7b");

        let by_ctx = catalog.by_context_desc(&ids);
        assert_eq!(by_ctx[0].id, "deepseek-coder:6.7b");

        // Unknown ids are skipped, not an error
        let sparse = catalog.by_footprint_asc(&["gemma:2b".to_string(), "nope".to_string()]);
        assert_eq!(sparse.len(), 1);
    }
}
