//! Wire types for the Docker Registry HTTP API v2
//!
//! Deserialization targets for the catalog, tag list, and manifest endpoints,
//! plus [`ManifestSummary`], the flattened per-tag metadata the manager caches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// Accept header for manifest requests. Index/list media types are deliberately
/// absent so the registry resolves multi-platform references to a single
/// image manifest for us.
pub const MANIFEST_ACCEPT: &str =
    "application/vnd.docker.distribution.manifest.v2+json, application/vnd.oci.image.manifest.v1+json";

/// One page of `GET /v2/_catalog`
#[derive(Debug, Deserialize)]
pub struct CatalogPage {
    pub repositories: Vec<String>,
}

/// Response of `GET /v2/{name}/tags/list`. A repository whose tags were all
/// deleted reports `"tags": null`.
#[derive(Debug, Deserialize)]
pub struct TagList {
    pub name: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// Image manifest, Docker v2 schema 2 or OCI. `mediaType` is optional on the
/// OCI side.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: Option<String>,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

/// Content descriptor shared by config and layer references
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub size: u64,
    pub digest: String,
}

/// The slice of the image config blob the dashboard cares about
#[derive(Debug, Deserialize)]
pub struct ImageConfigBlob {
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

/// Cached metadata for one tag's manifest. Sizes are raw bytes and digests
/// full strings; any human-friendly formatting happens in the presentation
/// layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestSummary {
    pub digest: String,
    pub media_type: String,
    /// Config blob size plus all layer sizes, in bytes
    pub total_size: u64,
    pub layer_sizes: Vec<u64>,
    pub created: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_docker_v2_manifest() {
        let body = r#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
            "config": {
                "mediaType": "application/vnd.docker.container.image.v1+json",
                "size": 7023,
                "digest": "sha256:b5b2b2c507a0944348e0303114d8d93aaaa081732b86451d9bce1f432a537bc7"
            },
            "layers": [
                {
                    "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                    "size": 32654,
                    "digest": "sha256:e692418e4cbaf90ca69d05a66403747baa33ee08806650b51fab815ad7fc331f"
                },
                {
                    "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                    "size": 16724,
                    "digest": "sha256:3c3a4604a545cdc127456d94e421cd355bca5b528f4a9c1905b15da2eb4a4c6b"
                }
            ]
        }"#;

        let manifest: ImageManifest = serde_json::from_str(body).unwrap();
        assert_eq!(manifest.schema_version, 2);
        assert_eq!(manifest.media_type.as_deref(), Some(MANIFEST_V2));
        assert_eq!(manifest.config.size, 7023);
        assert_eq!(manifest.layers.len(), 2);
        assert_eq!(manifest.layers[1].size, 16724);
    }

    #[test]
    fn deserializes_oci_manifest_without_media_type() {
        let body = r#"{
            "schemaVersion": 2,
            "config": {
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "size": 1024,
                "digest": "sha256:0000000000000000000000000000000000000000000000000000000000000000"
            },
            "layers": []
        }"#;

        let manifest: ImageManifest = serde_json::from_str(body).unwrap();
        assert!(manifest.media_type.is_none());
        assert!(manifest.layers.is_empty());
    }

    #[test]
    fn tag_list_tolerates_null_tags() {
        let body = r#"{"name": "library/nginx", "tags": null}"#;
        let list: TagList = serde_json::from_str(body).unwrap();
        assert_eq!(list.name, "library/nginx");
        assert!(list.tags.is_none());
    }

    #[test]
    fn config_blob_created_timestamp() {
        let body = r#"{"architecture": "amd64", "created": "2024-05-01T12:30:00Z", "os": "linux"}"#;
        let blob: ImageConfigBlob = serde_json::from_str(body).unwrap();
        let created = blob.created.unwrap();
        assert_eq!(created.to_rfc3339(), "2024-05-01T12:30:00+00:00");
    }
}
