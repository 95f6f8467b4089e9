//! # turbo-engine
//!
//! The adaptive model router and VRAM-budgeted inference cache.
//!
//! This crate wires together the pieces that sit between a conversational
//! front end and a local model-serving backend with a small, fixed
//! accelerator-memory budget:
//!
//! - **Resource monitor**: samples accelerator and host memory, with a short
//!   snapshot cache to bound polling cost
//! - **Model router**: combines classifier scores, the resource snapshot,
//!   and the catalog to pick a (model, device) per request
//! - **Resident cache**: LRU-evicting bookkeeping of loaded models under a
//!   hard memory ceiling, with idle auto-unload
//! - **Inference client**: streaming chat requests against an
//!   Ollama-compatible backend, with connect and overall timeouts
//! - **Turbo manager**: the orchestrator owning lifecycle, profile
//!   switching, and cumulative usage statistics

pub mod cache;
pub mod client;
pub mod manager;
pub mod monitor;
pub mod router;

pub use cache::{AcquireOutcome, ModelUnloader, ResidentCache, ResidentModel};
pub use client::{ChatMessage, ChatOptions, OllamaClient, StreamChunk, TokenStream};
pub use manager::{
    Capabilities, LifecycleState, QueryResponse, QueryStatsSnapshot, StatusReport, TurboManager,
};
pub use monitor::{AcceleratorProbe, AcceleratorReading, NvidiaSmiProbe, ResourceMonitor};
pub use router::{ModelRouter, Selection};

pub use turbo_core::{Error, Result};
