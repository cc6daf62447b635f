//! Dynamic SSL public-key pinning service
//!
//! The service probes a configured set of FQDNs over TLS, fingerprints each
//! host's SubjectPublicKeyInfo, and publishes signed per-file JSON pin
//! manifests:
//! - `GET /api/v1/{file}`: the signed manifest for one file
//!
//! An internal ops listener exposes:
//! - `GET /metrics`: Prometheus exposition
//! - `GET /health/{liveness,readiness,startup}`: storage-backed probes
//!
//! ## Architecture
//!
//! - [`engine::PinningEngine`]: one probe worker per FQDN plus the shared
//!   pin registry; a flush ticker pushes snapshots into storage
//! - [`storage`]: pluggable persistence (memory, filesystem, Redis,
//!   PostgreSQL) behind the [`storage::PinStore`] trait
//! - [`metrics::Collector`]: probe error and certificate expiry gauges
//! - [`api`]: the two HTTP routers

pub mod api;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod storage;

pub use api::{create_ops_router, create_router, AppState};
pub use config::Config;
pub use engine::{EngineConfig, PinningEngine};
pub use metrics::Collector;
pub use storage::{FileQuery, PinStore, StorageError};
