//! Core types and shared functionality for backstage.
//!
//! This crate provides:
//! - Named response caches with SQLite backend and count/age eviction
//! - Route, request and response model used to classify traffic
//! - Precache manifests and the version lifecycle state machine
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod policy;
pub mod precache;

pub use cache::{CacheDb, CachedEntry, EvictionLimits};
pub use config::AppConfig;
pub use error::Error;
pub use lifecycle::{InstallOutcome, LifecycleController, LifecycleEvent, LifecycleState, SessionId};
pub use precache::{PrecacheEntry, PrecacheManifest};
