//! Resource monitoring
//!
//! Samples accelerator memory through a vendor CLI probe and host RAM
//! through sysinfo. Sampling never panics and never blocks beyond the probe
//! timeout; on failure it degrades to a conservative snapshot (zero
//! accelerator memory free, last known host figure). Samples are cached for
//! a short refresh window because this is the only I/O-bound call on the
//! router's request path.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Instant;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};
use turbo_core::config::MonitorConfig;
use turbo_core::{Error, Result, ResourceSnapshot};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const MB_PER_GB: f64 = 1024.0;

/// One accelerator memory reading, in MB as reported by the vendor tool
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceleratorReading {
    pub used_mb: f64,
    pub total_mb: f64,
    pub free_mb: f64,
}

/// Interface to the accelerator's management tool
#[async_trait]
pub trait AcceleratorProbe: Send + Sync {
    /// Whether the tool is present at all. Resolved once at startup.
    async fn detect(&self) -> bool;

    /// Query current memory figures. Errors mean "treat as no accelerator".
    async fn read(&self) -> Result<AcceleratorReading>;
}

/// Probe backed by the `nvidia-smi` CLI
pub struct NvidiaSmiProbe {
    timeout: std::time::Duration,
}

impl NvidiaSmiProbe {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            timeout: config.probe_timeout(),
        }
    }
}

#[async_trait]
impl AcceleratorProbe for NvidiaSmiProbe {
    async fn detect(&self) -> bool {
        let check = Command::new("nvidia-smi").arg("--version").output();
        match timeout(self.timeout, check).await {
            Ok(Ok(output)) => output.status.success(),
            _ => false,
        }
    }

    async fn read(&self) -> Result<AcceleratorReading> {
        let query = Command::new("nvidia-smi")
            .args([
                "--query-gpu=memory.used,memory.total,memory.free",
                "--format=csv,noheader,nounits",
            ])
            .output();

        let output = timeout(self.timeout, query)
            .await
            .map_err(|_| Error::timeout("accelerator probe timed out"))?
            .map_err(|e| Error::unavailable(format!("nvidia-smi not runnable: {}", e)))?;

        if !output.status.success() {
            return Err(Error::unavailable(format!(
                "nvidia-smi exited with {}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_memory_csv(stdout.trim())
    }
}

/// Parse the comma-separated `usedMB, totalMB, freeMB` line
fn parse_memory_csv(line: &str) -> Result<AcceleratorReading> {
    // Multi-GPU hosts emit one line per device; the first is ours.
    let first = line.lines().next().unwrap_or_default();
    let fields: Vec<f64> = first
        .split(',')
        .map(|f| f.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::unavailable(format!("unparseable nvidia-smi output: {}", e)))?;

    if fields.len() != 3 {
        return Err(Error::unavailable(format!(
            "expected 3 memory fields, got {}",
            fields.len()
        )));
    }

    Ok(AcceleratorReading {
        used_mb: fields[0],
        total_mb: fields[1],
        free_mb: fields[2],
    })
}

struct CachedSample {
    snapshot: ResourceSnapshot,
    sampled_at: Instant,
}

struct MonitorState {
    cached: Option<CachedSample>,
    last_host_available_gb: f64,
}

/// Samples accelerator and host memory with a short-lived cache
pub struct ResourceMonitor {
    probe: Box<dyn AcceleratorProbe>,
    refresh_interval: std::time::Duration,
    state: Mutex<MonitorState>,
}

impl ResourceMonitor {
    pub fn new(config: &MonitorConfig) -> Self {
        Self::with_probe(config, Box::new(NvidiaSmiProbe::new(config)))
    }

    /// Construct with an injected probe (used by tests and mock setups)
    pub fn with_probe(config: &MonitorConfig, probe: Box<dyn AcceleratorProbe>) -> Self {
        Self {
            probe,
            refresh_interval: config.refresh_interval(),
            state: Mutex::new(MonitorState {
                cached: None,
                last_host_available_gb: 8.0,
            }),
        }
    }

    /// One-shot accelerator presence check, for startup capability flags
    pub async fn detect_accelerator(&self) -> bool {
        self.probe.detect().await
    }

    /// Current resource snapshot.
    ///
    /// Returns the cached snapshot when it is younger than the refresh
    /// interval; otherwise re-polls. Never fails: polling errors degrade to
    /// a conservative snapshot.
    pub async fn sample(&self) -> ResourceSnapshot {
        {
            let state = self.state.lock().expect("monitor state poisoned");
            if let Some(cached) = &state.cached {
                if cached.sampled_at.elapsed() < self.refresh_interval {
                    return cached.snapshot.clone();
                }
            }
        }

        let host_available_gb = match host_available_bytes().await {
            Some(bytes) => bytes as f64 / BYTES_PER_GB,
            None => {
                let state = self.state.lock().expect("monitor state poisoned");
                state.last_host_available_gb
            }
        };

        let snapshot = match self.probe.read().await {
            Ok(reading) => ResourceSnapshot {
                accelerator_used_gb: reading.used_mb / MB_PER_GB,
                accelerator_total_gb: reading.total_mb / MB_PER_GB,
                accelerator_free_gb: reading.free_mb / MB_PER_GB,
                host_available_gb,
                captured_at: chrono::Utc::now(),
            },
            Err(e) => {
                debug!("accelerator probe failed, using conservative snapshot: {}", e);
                ResourceSnapshot::conservative(host_available_gb)
            }
        };

        let mut state = self.state.lock().expect("monitor state poisoned");
        state.last_host_available_gb = host_available_gb;
        state.cached = Some(CachedSample {
            snapshot: snapshot.clone(),
            sampled_at: Instant::now(),
        });
        snapshot
    }

    /// Drop the cached snapshot so the next sample re-polls
    pub fn invalidate(&self) {
        let mut state = self.state.lock().expect("monitor state poisoned");
        state.cached = None;
    }
}

/// Available host RAM in bytes, or None when the query fails
async fn host_available_bytes() -> Option<u64> {
    let result = tokio::task::spawn_blocking(|| {
        let mut sys = System::new_with_specifics(
            RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
        );
        sys.refresh_memory();
        sys.available_memory()
    })
    .await;

    match result {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!("host memory query failed: {}", e);
            None
        }
    }
}
