//! Docker Registry Manager Library
//!
//! Registers Docker Registry HTTP API v2 endpoints and keeps a concurrently
//! readable cache of their repositories, tags, and manifests, refreshed on a
//! per-registry schedule. The presentation layer (web dashboard) consumes the
//! snapshots; it never triggers network calls of its own.

pub mod cli;
pub mod error;
pub mod manager;
pub mod registry;

pub use error::{RegistryError, Result};
pub use manager::{
    RegistryIdentity, RegistryManager, RegistryRecord, RegistrySettings, RegistrySnapshot,
};
pub use registry::{HttpRegistryClient, ManifestSummary, RegistryApi};
