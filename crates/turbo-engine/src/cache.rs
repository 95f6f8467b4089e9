//! Resident model cache
//!
//! Tracks which models are currently loaded on which device, enforces the
//! active profile's maximum-resident count and accelerator budget, evicts
//! least-recently-used entries, and auto-unloads idle entries on a timer.
//!
//! The cache is the sole owner of resident-model bookkeeping. A single mutex
//! guards the entry collection and is held only for map operations — never
//! across the backend unload call, which happens after the lock is released.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use turbo_core::config::Profile;
use turbo_core::{Device, Error, ModelCatalog, Result};

/// Best-effort signal to the backend to release a model's resources.
///
/// Absence of such a control is not an error; the cache treats unload
/// failures as advisory.
#[async_trait]
pub trait ModelUnloader: Send + Sync {
    async fn unload(&self, model_id: &str) -> Result<()>;
}

/// Public view of one resident entry
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ResidentModel {
    pub model_id: String,
    pub device: Device,
    /// Seconds since the entry was last accessed
    pub idle_secs: f64,
}

/// Outcome of an acquire call
#[derive(Debug, Clone, PartialEq)]
pub struct AcquireOutcome {
    /// The model was already resident; no reload cost
    pub reused: bool,
    /// Models evicted to make room
    pub evicted: Vec<String>,
}

struct Entry {
    model_id: String,
    device: Device,
    last_access: Instant,
}

struct CacheInner {
    /// Insertion-ordered; LRU ties broken by position
    entries: Vec<Entry>,
    profile: Profile,
}

impl CacheInner {
    fn accelerator_footprint_gb(&self, catalog: &ModelCatalog) -> f64 {
        self.entries
            .iter()
            .filter(|e| e.device == Device::Accelerator)
            .filter_map(|e| catalog.get(&e.model_id))
            .map(|d| d.footprint_gb)
            .sum()
    }

    /// Index of the least-recently-used entry, optionally restricted to one
    /// device. First minimum wins, so ties fall to insertion order.
    fn lru_index(&self, device: Option<Device>) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| device.map_or(true, |d| e.device == d))
            .min_by_key(|(_, e)| e.last_access)
            .map(|(i, _)| i)
    }
}

/// VRAM-budgeted resident model cache with LRU eviction and idle unload
pub struct ResidentCache {
    inner: Mutex<CacheInner>,
    catalog: Arc<ModelCatalog>,
    unloader: Option<Arc<dyn ModelUnloader>>,
    sweep_interval: Duration,
}

impl ResidentCache {
    pub fn new(
        catalog: Arc<ModelCatalog>,
        profile: Profile,
        unloader: Option<Arc<dyn ModelUnloader>>,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: Vec::new(),
                profile,
            }),
            catalog,
            unloader,
            sweep_interval,
        }
    }

    /// Ensure a model is resident on a device, evicting as needed.
    ///
    /// A model already resident on the same device is reused: its access
    /// time is refreshed and nothing is reloaded. Acquiring a resident model
    /// on a *different* device evicts the stale entry first.
    pub async fn acquire(&self, model_id: &str, device: Device) -> Result<AcquireOutcome> {
        let footprint = self.catalog.require(model_id)?.footprint_gb;

        let (reused, evicted) = {
            let mut inner = self.inner.lock().expect("cache lock poisoned");

            if let Some(pos) = inner.entries.iter().position(|e| e.model_id == model_id) {
                if inner.entries[pos].device == device {
                    inner.entries[pos].last_access = Instant::now();
                    debug!(model = model_id, %device, "reusing resident model");
                    (true, Vec::new())
                } else {
                    // Device changed; the old placement is stale
                    let stale = inner.entries.remove(pos);
                    let mut evicted = vec![stale.model_id];
                    evicted.extend(self.make_room(&mut inner, footprint, device)?);
                    inner.entries.push(Entry {
                        model_id: model_id.to_string(),
                        device,
                        last_access: Instant::now(),
                    });
                    (false, evicted)
                }
            } else {
                let evicted = self.make_room(&mut inner, footprint, device)?;
                inner.entries.push(Entry {
                    model_id: model_id.to_string(),
                    device,
                    last_access: Instant::now(),
                });
                (false, evicted)
            }
        };

        if !reused {
            info!(model = model_id, %device, "model marked resident");
        }
        for model in &evicted {
            self.signal_unload(model).await;
        }

        Ok(AcquireOutcome { reused, evicted })
    }

    /// Evict entries until both the resident-count and (for accelerator
    /// placements) the budget invariant admit the new footprint. Called with
    /// the lock held; returns the evicted ids for post-lock unloading.
    fn make_room(
        &self,
        inner: &mut CacheInner,
        footprint_gb: f64,
        device: Device,
    ) -> Result<Vec<String>> {
        if device == Device::Accelerator && footprint_gb > inner.profile.accelerator_budget_gb {
            return Err(Error::resource_exhausted(format!(
                "model footprint {:.1}GB exceeds accelerator budget {:.1}GB",
                footprint_gb, inner.profile.accelerator_budget_gb
            )));
        }

        let mut evicted = Vec::new();

        while inner.entries.len() >= inner.profile.max_resident {
            match inner.lru_index(None) {
                Some(i) => evicted.push(inner.entries.remove(i).model_id),
                None => break,
            }
        }

        if device == Device::Accelerator {
            while inner.accelerator_footprint_gb(&self.catalog) + footprint_gb
                > inner.profile.accelerator_budget_gb
            {
                match inner.lru_index(Some(Device::Accelerator)) {
                    Some(i) => evicted.push(inner.entries.remove(i).model_id),
                    None => {
                        return Err(Error::resource_exhausted(format!(
                            "accelerator budget {:.1}GB cannot admit {:.1}GB",
                            inner.profile.accelerator_budget_gb, footprint_gb
                        )))
                    }
                }
            }
        }

        Ok(evicted)
    }

    /// Remove one resident entry and signal the backend
    pub async fn unload(&self, model_id: &str) {
        let removed = {
            let mut inner = self.inner.lock().expect("cache lock poisoned");
            inner
                .entries
                .iter()
                .position(|e| e.model_id == model_id)
                .map(|i| inner.entries.remove(i))
        };

        if let Some(entry) = removed {
            info!(model = %entry.model_id, device = %entry.device, "unloaded model");
            self.signal_unload(&entry.model_id).await;
        }
    }

    /// Unload every resident entry
    pub async fn evict_all(&self) {
        let drained: Vec<Entry> = {
            let mut inner = self.inner.lock().expect("cache lock poisoned");
            inner.entries.drain(..).collect()
        };

        for entry in &drained {
            info!(model = %entry.model_id, "unloaded model");
            self.signal_unload(&entry.model_id).await;
        }
    }

    /// Swap the active profile. All resident entries are unloaded
    /// unconditionally first — stale entries under a different budget must
    /// never survive a profile switch.
    pub async fn switch_profile(&self, profile: Profile) {
        let drained: Vec<Entry> = {
            let mut inner = self.inner.lock().expect("cache lock poisoned");
            let drained = inner.entries.drain(..).collect();
            inner.profile = profile;
            drained
        };

        for entry in &drained {
            self.signal_unload(&entry.model_id).await;
        }
    }

    /// One idle sweep: unload entries idle longer than the profile allows.
    /// The lock covers only the scan-and-mark phase.
    pub async fn sweep_once(&self) {
        let expired: Vec<Entry> = {
            let mut inner = self.inner.lock().expect("cache lock poisoned");
            let idle_limit = inner.profile.idle_unload;
            let mut expired = Vec::new();
            let mut i = 0;
            while i < inner.entries.len() {
                if inner.entries[i].last_access.elapsed() > idle_limit {
                    expired.push(inner.entries.remove(i));
                } else {
                    i += 1;
                }
            }
            expired
        };

        for entry in &expired {
            info!(model = %entry.model_id, "auto-unloaded idle model");
            self.signal_unload(&entry.model_id).await;
        }
    }

    /// Spawn the background idle-unload loop. The caller owns the handle and
    /// aborts it at shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = self.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it.
            interval.tick().await;
            loop {
                interval.tick().await;
                cache.sweep_once().await;
            }
        })
    }

    /// Snapshot of the resident entries
    pub fn resident(&self) -> Vec<ResidentModel> {
        let inner = self.inner.lock().expect("cache lock poisoned");
        inner
            .entries
            .iter()
            .map(|e| ResidentModel {
                model_id: e.model_id.clone(),
                device: e.device,
                idle_secs: e.last_access.elapsed().as_secs_f64(),
            })
            .collect()
    }

    /// Number of resident entries
    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The active profile
    pub fn profile(&self) -> Profile {
        self.inner.lock().expect("cache lock poisoned").profile.clone()
    }

    /// Sum of accelerator-resident footprints, for invariant checks
    pub fn accelerator_footprint_gb(&self) -> f64 {
        let inner = self.inner.lock().expect("cache lock poisoned");
        inner.accelerator_footprint_gb(&self.catalog)
    }

    async fn signal_unload(&self, model_id: &str) {
        if let Some(unloader) = &self.unloader {
            if let Err(e) = unloader.unload(model_id).await {
                warn!(model = model_id, "backend unload signal failed: {}", e);
            }
        }
    }
}
