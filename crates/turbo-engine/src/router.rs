//! Model routing
//!
//! Combines classifier scores, the current resource snapshot, and the model
//! catalog to pick a (model, device) per request. The cascade is a
//! deterministic priority order, evaluated top to bottom, first match wins:
//! restricted-content, long-context, coding, creative, quick, then general.
//! Priority order — not a max-score pick — because some categories must take
//! precedence over a merely-higher-scoring lower-priority one.

use tracing::debug;
use turbo_core::config::{Profile, RouterThresholds};
use turbo_core::{
    Device, Error, ModelCatalog, ModelDescriptor, ResourceSnapshot, Result, TaskCategory,
    TaskScores,
};

/// Routing decision for one request
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub model_id: String,
    pub device: Device,
    /// Category of the branch that produced this selection
    pub category: TaskCategory,
}

/// Deterministic model router
#[derive(Debug, Clone)]
pub struct ModelRouter {
    thresholds: RouterThresholds,
}

impl ModelRouter {
    pub fn new(thresholds: RouterThresholds) -> Self {
        Self { thresholds }
    }

    /// Pick a (model, device) for automatically routed requests
    pub fn select(
        &self,
        scores: &TaskScores,
        snapshot: &ResourceSnapshot,
        profile: &Profile,
        catalog: &ModelCatalog,
    ) -> Result<Selection> {
        let t = &self.thresholds;

        if scores.get(TaskCategory::Restricted) > t.restricted {
            return self.pick_restricted(snapshot, profile, catalog);
        }

        if scores.get(TaskCategory::Long) > t.long_context {
            if let Some(selection) = self.pick_long_context(snapshot, profile, catalog) {
                return Ok(selection);
            }
            // No large-context model fits anywhere; continue down the cascade.
        }

        if scores.get(TaskCategory::Coding) > t.coding {
            return self.pick_coding(snapshot, profile, catalog);
        }

        if scores.get(TaskCategory::Creative) > t.creative {
            return self.pick_creative(snapshot, profile, catalog);
        }

        if scores.get(TaskCategory::Quick) > t.quick {
            return self.pick_quick(snapshot, profile, catalog);
        }

        self.pick_general(snapshot, profile, catalog)
    }

    /// Resolve an explicitly requested model.
    ///
    /// Bypasses the cascade but still passes the device-eligibility check.
    /// If the model fits nowhere this fails with `ResourceExhausted` —
    /// explicit selection is never silently substituted.
    pub fn resolve_explicit(
        &self,
        model_id: &str,
        snapshot: &ResourceSnapshot,
        profile: &Profile,
        catalog: &ModelCatalog,
    ) -> Result<Selection> {
        let desc = catalog.require(model_id)?;

        let device = if self.fits_accelerator(desc, snapshot, profile) {
            Device::Accelerator
        } else if self.fits_host(desc, snapshot) {
            Device::Cpu
        } else {
            return Err(Error::resource_exhausted(format!(
                "no device can host '{}' ({:.1}GB)",
                model_id, desc.footprint_gb
            )));
        };

        Ok(Selection {
            model_id: desc.id.clone(),
            device,
            category: TaskCategory::General,
        })
    }

    /// Accelerator admission: the footprint plus a fixed safety margin must
    /// fit both the free memory and the profile's hard budget.
    fn fits_accelerator(
        &self,
        desc: &ModelDescriptor,
        snapshot: &ResourceSnapshot,
        profile: &Profile,
    ) -> bool {
        let needed = desc.footprint_gb + self.thresholds.accelerator_margin_gb;
        needed <= snapshot.accelerator_free_gb && desc.footprint_gb <= profile.accelerator_budget_gb
    }

    /// Host admission. CPU execution needs more headroom than the
    /// accelerator because the host also runs the orchestrator; restricted-
    /// content-capable models get a relaxed threshold since they are only
    /// chosen when explicitly requested and nothing better fits.
    fn fits_host(&self, desc: &ModelDescriptor, snapshot: &ResourceSnapshot) -> bool {
        if desc.is_restricted_capable() {
            return snapshot.host_available_gb
                >= desc.footprint_gb + self.thresholds.restricted_host_margin_gb;
        }
        desc.cpu_eligible
            && snapshot.host_available_gb >= desc.footprint_gb + self.thresholds.host_margin_gb
    }

    fn allowed<'a>(&self, profile: &Profile, catalog: &'a ModelCatalog) -> Vec<&'a ModelDescriptor> {
        catalog.by_footprint_asc(&profile.allowed_models)
    }

    fn pick_restricted(
        &self,
        snapshot: &ResourceSnapshot,
        profile: &Profile,
        catalog: &ModelCatalog,
    ) -> Result<Selection> {
        let candidates = catalog.by_footprint_desc(&profile.allowed_models);

        // Largest uncensored-capable model that fits the accelerator budget
        for desc in candidates.iter().filter(|d| d.is_restricted_capable()) {
            if self.fits_accelerator(desc, snapshot, profile) {
                debug!(model = %desc.id, "restricted request routed to accelerator");
                return Ok(selection(desc, Device::Accelerator, TaskCategory::Restricted));
            }
        }

        // Then on CPU under the relaxed threshold
        for desc in candidates.iter().filter(|d| d.is_restricted_capable()) {
            if self.fits_host(desc, snapshot) {
                debug!(model = %desc.id, "restricted request routed to cpu");
                return Ok(selection(desc, Device::Cpu, TaskCategory::Restricted));
            }
        }

        // Fall back to the smallest general-purpose model on CPU
        for desc in self.allowed(profile, catalog) {
            if !desc.is_restricted_capable() && self.fits_host(desc, snapshot) {
                return Ok(selection(desc, Device::Cpu, TaskCategory::Restricted));
            }
        }

        Err(Error::resource_exhausted(
            "no model available for restricted-content request",
        ))
    }

    fn pick_long_context(
        &self,
        snapshot: &ResourceSnapshot,
        profile: &Profile,
        catalog: &ModelCatalog,
    ) -> Option<Selection> {
        let by_context = catalog.by_context_desc(&profile.allowed_models);

        for desc in &by_context {
            if self.fits_accelerator(desc, snapshot, profile) {
                return Some(selection(desc, Device::Accelerator, TaskCategory::Long));
            }
        }
        for desc in &by_context {
            if self.fits_host(desc, snapshot) {
                return Some(selection(desc, Device::Cpu, TaskCategory::Long));
            }
        }
        None
    }

    fn pick_coding(
        &self,
        snapshot: &ResourceSnapshot,
        profile: &Profile,
        catalog: &ModelCatalog,
    ) -> Result<Selection> {
        // Only the largest coding-tagged model (the specialist) competes for
        // accelerator memory. When it does not fit, the mid-size default
        // drops to CPU instead of promoting a smaller coding-capable model
        // into VRAM.
        if let Some(desc) = catalog
            .by_footprint_desc(&profile.allowed_models)
            .into_iter()
            .find(|d| d.has_tag("coding"))
        {
            if self.fits_accelerator(desc, snapshot, profile) {
                return Ok(selection(desc, Device::Accelerator, TaskCategory::Coding));
            }
        }

        if let Some(desc) = catalog.get(&profile.default_model) {
            if self.fits_host(desc, snapshot) {
                return Ok(selection(desc, Device::Cpu, TaskCategory::Coding));
            }
        }

        self.smallest_fallback(snapshot, profile, catalog, TaskCategory::Coding)
    }

    fn pick_creative(
        &self,
        snapshot: &ResourceSnapshot,
        profile: &Profile,
        catalog: &ModelCatalog,
    ) -> Result<Selection> {
        // Scaled to available budget: largest creative model that fits wins
        for desc in catalog.by_footprint_desc(&profile.allowed_models) {
            if desc.has_tag("creative") && self.fits_accelerator(desc, snapshot, profile) {
                return Ok(selection(desc, Device::Accelerator, TaskCategory::Creative));
            }
        }

        if let Some(desc) = catalog.get(&profile.default_model) {
            if self.fits_host(desc, snapshot) {
                return Ok(selection(desc, Device::Cpu, TaskCategory::Creative));
            }
        }

        self.smallest_fallback(snapshot, profile, catalog, TaskCategory::Creative)
    }

    fn pick_quick(
        &self,
        snapshot: &ResourceSnapshot,
        profile: &Profile,
        catalog: &ModelCatalog,
    ) -> Result<Selection> {
        for desc in self.allowed(profile, catalog) {
            if self.fits_host(desc, snapshot) {
                return Ok(selection(desc, Device::Cpu, TaskCategory::Quick));
            }
        }
        self.smallest_fallback(snapshot, profile, catalog, TaskCategory::Quick)
    }

    fn pick_general(
        &self,
        snapshot: &ResourceSnapshot,
        profile: &Profile,
        catalog: &ModelCatalog,
    ) -> Result<Selection> {
        if let Some(desc) = catalog.get(&profile.default_model) {
            if self.fits_accelerator(desc, snapshot, profile) {
                return Ok(selection(desc, Device::Accelerator, TaskCategory::General));
            }
            if self.fits_host(desc, snapshot) {
                return Ok(selection(desc, Device::Cpu, TaskCategory::General));
            }
        }
        self.smallest_fallback(snapshot, profile, catalog, TaskCategory::General)
    }

    /// Last tier of every branch: the smallest allowed model on whichever
    /// device admits it. Only when every tier fails does `ResourceExhausted`
    /// surface — that is a genuine capacity failure, not retried.
    fn smallest_fallback(
        &self,
        snapshot: &ResourceSnapshot,
        profile: &Profile,
        catalog: &ModelCatalog,
        category: TaskCategory,
    ) -> Result<Selection> {
        for desc in self.allowed(profile, catalog) {
            if self.fits_accelerator(desc, snapshot, profile) {
                return Ok(selection(desc, Device::Accelerator, category));
            }
        }
        for desc in self.allowed(profile, catalog) {
            if self.fits_host(desc, snapshot) {
                return Ok(selection(desc, Device::Cpu, category));
            }
        }
        Err(Error::resource_exhausted(
            "no device can host any model allowed by the active profile",
        ))
    }
}

fn selection(desc: &ModelDescriptor, device: Device, category: TaskCategory) -> Selection {
    Selection {
        model_id: desc.id.clone(),
        device,
        category,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;
    use turbo_core::config::TurboConfig;

    fn catalog() -> ModelCatalog {
        ModelCatalog::new(TurboConfig::default().models).unwrap()
    }

    fn turbo_profile() -> Profile {
        TurboConfig::default().profile("turbo").unwrap()
    }

    fn snapshot(accelerator_free_gb: f64, host_available_gb: f64) -> ResourceSnapshot {
        ResourceSnapshot {
            accelerator_used_gb: 0.0,
            accelerator_total_gb: accelerator_free_gb,
            accelerator_free_gb,
            host_available_gb,
            captured_at: Utc::now(),
        }
    }

    fn router() -> ModelRouter {
        ModelRouter::new(RouterThresholds::default())
    }

    fn scores(pairs: &[(TaskCategory, f32)]) -> TaskScores {
        let mut s = TaskScores::new();
        for (category, score) in pairs {
            s.set(*category, *score);
        }
        s
    }

    #[test]
    fn test_restricted_takes_priority_over_coding() {
        // Restricted 0.5 must win over coding 0.9: priority order, not
        // max-score.
        let mut profile = turbo_profile();
        profile.accelerator_budget_gb = 8.0;
        let s = scores(&[
            (TaskCategory::Restricted, 0.5),
            (TaskCategory::Coding, 0.9),
        ]);

        let sel = router()
            .select(&s, &snapshot(6.0, 16.0), &profile, &catalog())
            .unwrap();
        assert_eq!(sel.category, TaskCategory::Restricted);
        assert_eq!(sel.model_id, "dolphin-llama3:8b");
        assert_eq!(sel.device, Device::Accelerator);
    }

    #[test]
    fn test_restricted_relaxed_cpu_threshold() {
        // No accelerator memory, plenty of RAM: the uncensored model runs on
        // CPU under the relaxed +4GB margin despite cpu_eligible=false.
        let s = scores(&[(TaskCategory::Restricted, 0.5)]);
        let sel = router()
            .select(&s, &snapshot(0.0, 10.0), &turbo_profile(), &catalog())
            .unwrap();
        assert_eq!(sel.model_id, "dolphin-llama3:8b");
        assert_eq!(sel.device, Device::Cpu);
    }

    #[test]
    fn test_restricted_falls_back_to_general_cpu() {
        // Not enough RAM for the uncensored model (needs 8.7GB), enough for
        // the small general one.
        let s = scores(&[(TaskCategory::Restricted, 0.5)]);
        let sel = router()
            .select(&s, &snapshot(0.0, 5.0), &turbo_profile(), &catalog())
            .unwrap();
        assert_eq!(sel.model_id, "gemma:2b");
        assert_eq!(sel.device, Device::Cpu);
    }

    #[test]
    fn test_coding_model_too_big_for_budget_routes_general_cpu() {
        // Budget 3.8GB, coding model 3.9GB, free VRAM 3.5GB: the coding
        // model fits nowhere on the accelerator, so the mid-size general
        // model runs on CPU.
        let s = scores(&[(TaskCategory::Coding, 0.6)]);
        let sel = router()
            .select(&s, &snapshot(3.5, 8.0), &turbo_profile(), &catalog())
            .unwrap();
        assert_eq!(sel.model_id, "phi3:3.8b");
        assert_eq!(sel.device, Device::Cpu);
        assert_eq!(sel.category, TaskCategory::Coding);
    }

    #[test]
    fn test_smaller_coding_model_not_promoted_to_accelerator() {
        // phi3 (2.2GB, coding-tagged) would fit the free 3.5GB on its own,
        // but only the specialist competes for accelerator memory; the
        // default runs on CPU instead.
        let s = scores(&[(TaskCategory::Coding, 0.8)]);
        let sel = router()
            .select(&s, &snapshot(3.5, 8.0), &turbo_profile(), &catalog())
            .unwrap();
        assert_eq!(sel.model_id, "phi3:3.8b");
        assert_eq!(sel.device, Device::Cpu);
    }

    #[test]
    fn test_coding_model_on_accelerator_when_it_fits() {
        let mut profile = turbo_profile();
        profile.accelerator_budget_gb = 4.5;
        let s = scores(&[(TaskCategory::Coding, 0.8)]);
        let sel = router()
            .select(&s, &snapshot(4.4, 8.0), &profile, &catalog())
            .unwrap();
        assert_eq!(sel.model_id, "deepseek-coder:6.7b");
        assert_eq!(sel.device, Device::Accelerator);
    }

    #[test]
    fn test_long_context_prefers_largest_window() {
        let mut profile = turbo_profile();
        profile.accelerator_budget_gb = 8.0;
        let s = scores(&[(TaskCategory::Long, 0.9)]);
        let sel = router()
            .select(&s, &snapshot(6.0, 16.0), &profile, &catalog())
            .unwrap();
        assert_eq!(sel.model_id, "deepseek-coder:6.7b");
        assert_eq!(sel.category, TaskCategory::Long);
    }

    #[test]
    fn test_quick_routes_smallest_on_cpu() {
        let s = scores(&[(TaskCategory::Quick, 0.9)]);
        let sel = router()
            .select(&s, &snapshot(4.0, 8.0), &turbo_profile(), &catalog())
            .unwrap();
        assert_eq!(sel.model_id, "gemma:2b");
        assert_eq!(sel.device, Device::Cpu);
    }

    #[test]
    fn test_general_prefers_accelerator() {
        let s = scores(&[(TaskCategory::General, 0.1)]);
        let sel = router()
            .select(&s, &snapshot(3.5, 8.0), &turbo_profile(), &catalog())
            .unwrap();
        assert_eq!(sel.model_id, "phi3:3.8b");
        assert_eq!(sel.device, Device::Accelerator);
    }

    #[test]
    fn test_general_degrades_to_cpu_then_smallest() {
        let s = scores(&[(TaskCategory::General, 0.1)]);

        let sel = router()
            .select(&s, &snapshot(0.5, 8.0), &turbo_profile(), &catalog())
            .unwrap();
        assert_eq!(sel.model_id, "phi3:3.8b");
        assert_eq!(sel.device, Device::Cpu);

        // Too little RAM for the default model, enough for the smallest
        let sel = router()
            .select(&s, &snapshot(0.5, 4.0), &turbo_profile(), &catalog())
            .unwrap();
        assert_eq!(sel.model_id, "gemma:2b");
        assert_eq!(sel.device, Device::Cpu);
    }

    #[test]
    fn test_everything_exhausted() {
        let s = scores(&[(TaskCategory::General, 0.1)]);
        let err = router()
            .select(&s, &snapshot(0.0, 0.5), &turbo_profile(), &catalog())
            .unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(_)));
    }

    #[test]
    fn test_explicit_model_eligibility() {
        let r = router();
        let cat = catalog();
        let profile = turbo_profile();

        // Fits on the accelerator
        let sel = r
            .resolve_explicit("phi3:3.8b", &snapshot(3.5, 8.0), &profile, &cat)
            .unwrap();
        assert_eq!(sel.device, Device::Accelerator);

        // Too big for the accelerator, not CPU-eligible, insufficient RAM:
        // fails rather than substituting.
        let err = r
            .resolve_explicit("deepseek-coder:6.7b", &snapshot(1.0, 4.0), &profile, &cat)
            .unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(_)));
    }

    #[test]
    fn test_explicit_unknown_model() {
        let err = router()
            .resolve_explicit("gpt-17", &snapshot(4.0, 8.0), &turbo_profile(), &catalog())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownModel(_)));
    }
}
