//! # turbo-core
//!
//! Core types and utilities for turbo - an adaptive model router and
//! VRAM-budgeted inference cache for small-memory accelerators.
//!
//! This crate provides the foundational pieces shared by the engine and CLI:
//!
//! - Core data structures for model descriptors, resource snapshots, and
//!   task scores
//! - The static model catalog
//! - Configuration schema, loading, and validation (profiles, catalog,
//!   backend endpoint, router thresholds)
//! - The canonical table-driven task classifier
//! - Error handling types and utilities

pub mod catalog;
pub mod classifier;
pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types at the crate root
pub use catalog::ModelCatalog;
pub use classifier::TaskClassifier;
pub use config::{BackendConfig, Profile, ProfileConfig, RouterThresholds, TurboConfig};
pub use error::{Error, Result};
pub use types::{Device, ModelDescriptor, ResourceSnapshot, TaskCategory, TaskScores};
