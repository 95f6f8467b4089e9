//! Turbo manager
//!
//! The orchestrator that owns the classifier, router, monitor, resident
//! cache, and backend client, and exposes the query/status/profile surface
//! the front end talks to. Capabilities (accelerator present, backend
//! reachable) are resolved once during `initialize` and never re-probed on
//! the request path.

use crate::cache::{ModelUnloader, ResidentCache, ResidentModel};
use crate::client::{ChatMessage, OllamaClient, StreamChunk, TokenStream};
use crate::monitor::{AcceleratorProbe, ResourceMonitor};
use crate::router::{ModelRouter, Selection};
use futures::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use turbo_core::config::{Profile, TurboConfig};
use turbo_core::{
    Device, Error, ModelCatalog, ModelDescriptor, ResourceSnapshot, Result, TaskCategory,
    TaskClassifier,
};

/// Manager lifecycle, advanced strictly forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Uninitialized,
    Ready,
    #[serde(rename = "shutting_down")]
    ShuttingDown,
    Closed,
}

/// Environment facts resolved once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Capabilities {
    /// An accelerator management tool was found and answered
    pub accelerator: bool,
    /// The inference backend answered a reachability probe
    pub backend_reachable: bool,
}

/// Cumulative usage counters since startup (or the last reset)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryStatsSnapshot {
    pub total_queries: u64,
    pub accelerator_queries: u64,
    pub cpu_queries: u64,
    pub failed_streams: u64,
    pub response_chars: u64,
    /// Wall time from routing to end of stream, summed over all queries
    pub total_latency_ms: u64,
    pub by_model: HashMap<String, u64>,
    pub by_category: HashMap<String, u64>,
}

impl QueryStatsSnapshot {
    /// Mean per-query latency in milliseconds, 0 when nothing ran yet
    pub fn average_latency_ms(&self) -> f64 {
        if self.total_queries == 0 {
            return 0.0;
        }
        self.total_latency_ms as f64 / self.total_queries as f64
    }
}

#[derive(Default)]
struct QueryStats {
    total: AtomicU64,
    accelerator_queries: AtomicU64,
    cpu_queries: AtomicU64,
    failed_streams: AtomicU64,
    response_chars: AtomicU64,
    total_latency_ms: AtomicU64,
    by_model: Mutex<HashMap<String, u64>>,
    by_category: Mutex<HashMap<String, u64>>,
}

impl QueryStats {
    fn record_selection(&self, selection: &Selection) {
        self.total.fetch_add(1, Ordering::Relaxed);
        match selection.device {
            Device::Accelerator => self.accelerator_queries.fetch_add(1, Ordering::Relaxed),
            Device::Cpu => self.cpu_queries.fetch_add(1, Ordering::Relaxed),
        };
        *self
            .by_model
            .lock()
            .expect("stats lock poisoned")
            .entry(selection.model_id.clone())
            .or_insert(0) += 1;
        *self
            .by_category
            .lock()
            .expect("stats lock poisoned")
            .entry(selection.category.as_str().to_string())
            .or_insert(0) += 1;
    }

    fn snapshot(&self) -> QueryStatsSnapshot {
        QueryStatsSnapshot {
            total_queries: self.total.load(Ordering::Relaxed),
            accelerator_queries: self.accelerator_queries.load(Ordering::Relaxed),
            cpu_queries: self.cpu_queries.load(Ordering::Relaxed),
            failed_streams: self.failed_streams.load(Ordering::Relaxed),
            response_chars: self.response_chars.load(Ordering::Relaxed),
            total_latency_ms: self.total_latency_ms.load(Ordering::Relaxed),
            by_model: self.by_model.lock().expect("stats lock poisoned").clone(),
            by_category: self
                .by_category
                .lock()
                .expect("stats lock poisoned")
                .clone(),
        }
    }

    fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.accelerator_queries.store(0, Ordering::Relaxed);
        self.cpu_queries.store(0, Ordering::Relaxed);
        self.failed_streams.store(0, Ordering::Relaxed);
        self.response_chars.store(0, Ordering::Relaxed);
        self.total_latency_ms.store(0, Ordering::Relaxed);
        self.by_model.lock().expect("stats lock poisoned").clear();
        self.by_category
            .lock()
            .expect("stats lock poisoned")
            .clear();
    }
}

/// Point-in-time operational report
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub state: LifecycleState,
    pub capabilities: Capabilities,
    pub profile: String,
    pub profile_display_name: String,
    pub available_profiles: Vec<String>,
    pub resident: Vec<ResidentModel>,
    pub resources: ResourceSnapshot,
    pub stats: QueryStatsSnapshot,
}

/// A routed, streaming reply
pub struct QueryResponse {
    pub model_id: String,
    pub device: Device,
    pub category: TaskCategory,
    pub stream: TokenStream,
}

impl fmt::Debug for QueryResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResponse")
            .field("model_id", &self.model_id)
            .field("device", &self.device)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

struct ManagerState {
    lifecycle: LifecycleState,
    capabilities: Capabilities,
    sweeper: Option<JoinHandle<()>>,
}

/// Top-level orchestrator for routed, cached, streaming inference
pub struct TurboManager {
    config: TurboConfig,
    catalog: Arc<ModelCatalog>,
    classifier: TaskClassifier,
    router: ModelRouter,
    monitor: ResourceMonitor,
    cache: Arc<ResidentCache>,
    client: Arc<OllamaClient>,
    stats: Arc<QueryStats>,
    state: RwLock<ManagerState>,
}

impl TurboManager {
    /// Build a manager with the default nvidia-smi probe
    pub fn new(config: TurboConfig) -> Result<Self> {
        let probe_config = config.monitor.clone();
        Self::with_probe(
            config,
            Box::new(crate::monitor::NvidiaSmiProbe::new(&probe_config)),
        )
    }

    /// Build a manager with an injected accelerator probe
    pub fn with_probe(config: TurboConfig, probe: Box<dyn AcceleratorProbe>) -> Result<Self> {
        config.validate()?;

        let catalog = Arc::new(ModelCatalog::new(config.models.clone())?);
        let profile = config.startup_profile()?;
        let client = Arc::new(OllamaClient::new(&config.backend)?);
        let cache = Arc::new(ResidentCache::new(
            Arc::clone(&catalog),
            profile,
            Some(Arc::clone(&client) as Arc<dyn ModelUnloader>),
            config.cache.sweep_interval(),
        ));
        let monitor = ResourceMonitor::with_probe(&config.monitor, probe);

        Ok(Self {
            router: ModelRouter::new(config.router.clone()),
            classifier: TaskClassifier::new(),
            catalog,
            monitor,
            cache,
            client,
            stats: Arc::new(QueryStats::default()),
            state: RwLock::new(ManagerState {
                lifecycle: LifecycleState::Uninitialized,
                capabilities: Capabilities::default(),
                sweeper: None,
            }),
            config,
        })
    }

    /// Resolve capabilities, prewarm the default model, start the idle
    /// sweeper, and become ready.
    ///
    /// Only capability *resolution* is mandatory; a dead backend or a failed
    /// prewarm leaves the manager ready and degrades the first queries
    /// instead of failing startup.
    pub async fn initialize(&self) -> Result<()> {
        {
            let state = self.state.read().expect("state lock poisoned");
            if state.lifecycle != LifecycleState::Uninitialized {
                return Err(Error::unavailable("manager is already initialized"));
            }
        }

        let accelerator = self.monitor.detect_accelerator().await;
        let backend_reachable = match self.client.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("inference backend is not reachable yet: {}", e);
                false
            }
        };

        if backend_reachable {
            // Prewarm the smallest CPU-eligible model the host can hold, for
            // a fast first response.
            let profile = self.cache.profile();
            let snapshot = self.monitor.sample().await;
            let candidate = self
                .catalog
                .by_footprint_asc(&profile.allowed_models)
                .into_iter()
                .find(|d| {
                    d.cpu_eligible
                        && snapshot.host_available_gb
                            >= d.footprint_gb + self.config.router.host_margin_gb
                })
                .map(|d| d.id.clone());

            match candidate {
                Some(model_id) => match self.client.warm(&model_id).await {
                    Ok(()) => {
                        // Prewarm counts as residency on the CPU side; the
                        // first routed query may still move it.
                        if let Err(e) = self.cache.acquire(&model_id, Device::Cpu).await {
                            warn!("prewarmed model not cacheable: {}", e);
                        }
                    }
                    Err(e) => warn!(model = %model_id, "prewarm failed: {}", e),
                },
                None => debug!("skipping prewarm, no cpu-eligible model fits host memory"),
            }
        }

        let sweeper = self.cache.spawn_sweeper();

        let mut state = self.state.write().expect("state lock poisoned");
        state.capabilities = Capabilities {
            accelerator,
            backend_reachable,
        };
        state.sweeper = Some(sweeper);
        state.lifecycle = LifecycleState::Ready;
        info!(
            accelerator,
            backend_reachable,
            profile = %self.cache.profile().name,
            "turbo manager ready"
        );
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        let state = self.state.read().expect("state lock poisoned");
        match state.lifecycle {
            LifecycleState::Ready => Ok(()),
            LifecycleState::Uninitialized => {
                Err(Error::unavailable("manager is not initialized"))
            }
            LifecycleState::ShuttingDown | LifecycleState::Closed => {
                Err(Error::unavailable("manager is shut down"))
            }
        }
    }

    /// Route a prompt and stream the reply.
    ///
    /// `explicit_model` bypasses the classifier cascade but still honors
    /// device admission; it is never silently substituted.
    pub async fn query(
        &self,
        prompt: &str,
        explicit_model: Option<&str>,
    ) -> Result<QueryResponse> {
        self.ensure_ready()?;

        let snapshot = self.monitor.sample().await;
        let profile = self.cache.profile();

        let selection = match explicit_model {
            Some(model_id) => {
                self.router
                    .resolve_explicit(model_id, &snapshot, &profile, &self.catalog)?
            }
            None => {
                let scores = self.classifier.classify(prompt);
                self.router
                    .select(&scores, &snapshot, &profile, &self.catalog)?
            }
        };

        self.cache
            .acquire(&selection.model_id, selection.device)
            .await?;
        self.stats.record_selection(&selection);
        info!(
            model = %selection.model_id,
            device = %selection.device,
            category = %selection.category,
            "routed query"
        );

        let inner = self
            .client
            .stream(&selection.model_id, vec![ChatMessage::user(prompt)]);
        let stream = self.instrument_stream(inner);

        Ok(QueryResponse {
            model_id: selection.model_id.clone(),
            device: selection.device,
            category: selection.category,
            stream,
        })
    }

    /// Route a prompt and collect the full reply as one string
    pub async fn chat(&self, prompt: &str, explicit_model: Option<&str>) -> Result<String> {
        let mut response = self.query(prompt, explicit_model).await?;
        let mut reply = String::new();
        while let Some(item) = response.stream.next().await {
            reply.push_str(&item?.content);
        }
        Ok(reply)
    }

    /// Forward a token stream while keeping the usage counters current.
    /// Latency accrues when the stream finishes (or its consumer goes away).
    fn instrument_stream(&self, mut inner: TokenStream) -> TokenStream {
        let stats = Arc::clone(&self.stats);
        let started = Instant::now();
        let (tx, rx) = mpsc::channel::<Result<StreamChunk>>(32);

        tokio::spawn(async move {
            while let Some(item) = inner.next().await {
                match &item {
                    Ok(chunk) => {
                        stats
                            .response_chars
                            .fetch_add(chunk.content.len() as u64, Ordering::Relaxed);
                    }
                    Err(_) => {
                        stats.failed_streams.fetch_add(1, Ordering::Relaxed);
                    }
                }
                if tx.send(item).await.is_err() {
                    break;
                }
            }
            stats
                .total_latency_ms
                .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);
        });

        Box::pin(ReceiverStream::new(rx))
    }

    /// Switch the active profile, unloading every resident model first
    pub async fn switch_profile(&self, name: &str) -> Result<Profile> {
        self.ensure_ready()?;
        let profile = self.config.profile(name)?;
        self.cache.switch_profile(profile.clone()).await;
        self.monitor.invalidate();
        info!(profile = name, "switched profile");
        Ok(profile)
    }

    /// The currently active profile
    pub fn active_profile(&self) -> Profile {
        self.cache.profile()
    }

    /// Names of all configured profiles
    pub fn profile_names(&self) -> Vec<String> {
        self.config
            .profile_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// All known models, sorted by footprint
    pub fn models(&self) -> Vec<ModelDescriptor> {
        let mut models: Vec<ModelDescriptor> =
            self.catalog.list().into_iter().cloned().collect();
        models.sort_by(|a, b| {
            a.footprint_gb
                .partial_cmp(&b.footprint_gb)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        models
    }

    /// Operational status report, including a fresh resource sample
    pub async fn status(&self) -> StatusReport {
        let (lifecycle, capabilities) = {
            let state = self.state.read().expect("state lock poisoned");
            (state.lifecycle, state.capabilities)
        };
        let profile = self.cache.profile();

        StatusReport {
            state: lifecycle,
            capabilities,
            profile: profile.name,
            profile_display_name: profile.display_name,
            available_profiles: self.profile_names(),
            resident: self.cache.resident(),
            resources: self.monitor.sample().await,
            stats: self.stats.snapshot(),
        }
    }

    /// Usage counters since startup or the last reset
    pub fn stats(&self) -> QueryStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Stop the sweeper, unload every resident model, and close.
    ///
    /// Idempotent; queries issued after this return `Unavailable`.
    pub async fn shutdown(&self) {
        let sweeper = {
            let mut state = self.state.write().expect("state lock poisoned");
            if state.lifecycle == LifecycleState::Closed {
                return;
            }
            state.lifecycle = LifecycleState::ShuttingDown;
            state.sweeper.take()
        };

        if let Some(handle) = sweeper {
            handle.abort();
        }
        self.cache.evict_all().await;

        let mut state = self.state.write().expect("state lock poisoned");
        state.lifecycle = LifecycleState::Closed;
        info!("turbo manager closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::AcceleratorReading;
    use async_trait::async_trait;

    struct NoAccelerator;

    #[async_trait]
    impl AcceleratorProbe for NoAccelerator {
        async fn detect(&self) -> bool {
            false
        }

        async fn read(&self) -> Result<AcceleratorReading> {
            Err(Error::unavailable("no accelerator"))
        }
    }

    fn offline_config() -> TurboConfig {
        let mut config = TurboConfig::default();
        // Nothing listens here; connection attempts fail fast.
        config.backend.endpoint = "http://127.0.0.1:9".to_string();
        config.backend.connect_timeout_secs = 1;
        config.backend.request_timeout_secs = 1;
        config
    }

    fn offline_manager() -> TurboManager {
        TurboManager::with_probe(offline_config(), Box::new(NoAccelerator)).unwrap()
    }

    #[tokio::test]
    async fn test_query_before_initialize_is_unavailable() {
        let manager = offline_manager();
        let err = manager.query("hello", None).await.unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_initialize_survives_dead_backend() {
        let manager = offline_manager();
        manager.initialize().await.unwrap();

        let status = manager.status().await;
        assert_eq!(status.state, LifecycleState::Ready);
        assert!(!status.capabilities.accelerator);
        assert!(!status.capabilities.backend_reachable);
        assert_eq!(status.profile, "turbo");
    }

    #[tokio::test]
    async fn test_double_initialize_rejected() {
        let manager = offline_manager();
        manager.initialize().await.unwrap();
        assert!(manager.initialize().await.is_err());
    }

    #[tokio::test]
    async fn test_query_after_shutdown_is_unavailable() {
        let manager = offline_manager();
        manager.initialize().await.unwrap();
        manager.shutdown().await;

        let err = manager.query("hello", None).await.unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));

        let status = manager.status().await;
        assert_eq!(status.state, LifecycleState::Closed);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let manager = offline_manager();
        manager.initialize().await.unwrap();
        manager.shutdown().await;
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_routed_query_records_stats_and_streams_terminal_error() {
        let manager = offline_manager();
        manager.initialize().await.unwrap();

        // Routing succeeds without a backend; the stream carries the failure.
        let mut response = manager.query("hi", None).await.unwrap();
        assert_eq!(response.device, Device::Cpu);

        let items: Vec<_> = {
            let mut collected = Vec::new();
            while let Some(item) = response.stream.next().await {
                collected.push(item);
            }
            collected
        };
        assert_eq!(items.len(), 1);
        assert!(matches!(
            items[0],
            Err(Error::BackendUnavailable(_)) | Err(Error::Timeout(_))
        ));

        let stats = manager.stats();
        assert_eq!(stats.total_queries, 1);
        assert_eq!(stats.failed_streams, 1);
        assert_eq!(stats.cpu_queries, 1);
        assert_eq!(stats.accelerator_queries, 0);
        assert_eq!(stats.by_category.get("quick"), Some(&1));
    }

    #[tokio::test]
    async fn test_query_response_debug_omits_stream() {
        let manager = offline_manager();
        manager.initialize().await.unwrap();

        let response = manager.query("hi", None).await.unwrap();
        let rendered = format!("{:?}", response);
        assert!(rendered.contains("model_id"));
        assert!(rendered.contains("Cpu"));
        assert!(!rendered.contains("stream"));
    }

    #[tokio::test]
    async fn test_explicit_unknown_model_rejected() {
        let manager = offline_manager();
        manager.initialize().await.unwrap();

        let err = manager.query("hello", Some("llama9:900b")).await.unwrap_err();
        assert!(matches!(err, Error::UnknownModel(_)));
    }

    #[tokio::test]
    async fn test_switch_profile() {
        let manager = offline_manager();
        manager.initialize().await.unwrap();

        let profile = manager.switch_profile("eco").await.unwrap();
        assert_eq!(profile.name, "eco");
        assert_eq!(manager.active_profile().name, "eco");
        assert!(manager.cache.is_empty());

        let err = manager.switch_profile("hyperdrive").await.unwrap_err();
        assert!(matches!(err, Error::InvalidProfile(_)));
    }

    #[tokio::test]
    async fn test_stats_reset() {
        let manager = offline_manager();
        manager.initialize().await.unwrap();

        let _ = manager.query("hi", None).await.unwrap();
        assert_eq!(manager.stats().total_queries, 1);

        manager.reset_stats();
        let stats = manager.stats();
        assert_eq!(stats.total_queries, 0);
        assert!(stats.by_model.is_empty());
    }

    #[test]
    fn test_average_latency_derivation() {
        let snapshot = QueryStatsSnapshot {
            total_queries: 4,
            accelerator_queries: 1,
            cpu_queries: 3,
            failed_streams: 0,
            response_chars: 128,
            total_latency_ms: 200,
            by_model: HashMap::new(),
            by_category: HashMap::new(),
        };
        assert_eq!(snapshot.average_latency_ms(), 50.0);

        let empty = QueryStatsSnapshot {
            total_queries: 0,
            total_latency_ms: 0,
            ..snapshot
        };
        assert_eq!(empty.average_latency_ms(), 0.0);
    }

    #[test]
    fn test_models_sorted_by_footprint() {
        let manager = offline_manager();
        let models = manager.models();
        assert_eq!(models.first().unwrap().id, "gemma:2b");
        assert_eq!(models.last().unwrap().id, "dolphin-llama3:8b");
    }
}
