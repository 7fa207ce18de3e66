//! Docker Registry HTTP API v2 client
//!
//! [`RegistryApi`] is the seam between the refresh machinery and the network:
//! the manager talks to registries exclusively through it, so tests can
//! substitute an instrumented implementation. [`HttpRegistryClient`] is the
//! production implementation on top of reqwest.

pub mod client;
pub mod manifest;

pub use client::{HttpRegistryClient, HttpRegistryClientBuilder};
pub use manifest::ManifestSummary;

use crate::error::Result;
use async_trait::async_trait;

/// The three read operations a refresh cycle needs from one registry endpoint
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// List every repository in the registry's catalog
    async fn list_repositories(&self) -> Result<Vec<String>>;

    /// List the tags of one repository
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>>;

    /// Fetch the manifest metadata a tag points at
    async fn manifest(&self, repository: &str, reference: &str) -> Result<ManifestSummary>;
}
