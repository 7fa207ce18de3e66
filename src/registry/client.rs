//! reqwest-backed implementation of the registry API

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, LINK};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

use crate::error::{RegistryError, Result};
use crate::manager::record::RegistryCredentials;
use crate::registry::RegistryApi;
use crate::registry::manifest::{
    CatalogPage, ImageConfigBlob, ImageManifest, MANIFEST_ACCEPT, MANIFEST_V2, ManifestSummary,
    TagList,
};

/// Per-call timeout. Deliberately independent of (and expected to be shorter
/// than) the refresh interval, so one unreachable registry cannot stall its
/// scheduler.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_PAGE_SIZE: usize = 100;

pub struct HttpRegistryClientBuilder {
    base_url: String,
    credentials: Option<RegistryCredentials>,
    skip_tls: bool,
    timeout: Duration,
    page_size: usize,
}

impl HttpRegistryClientBuilder {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            credentials: None,
            skip_tls: false,
            timeout: DEFAULT_CALL_TIMEOUT,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<RegistryCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_skip_tls(mut self, skip_tls: bool) -> Self {
        self.skip_tls = skip_tls;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn build(self) -> Result<HttpRegistryClient> {
        let mut builder = Client::builder()
            .timeout(self.timeout)
            .connect_timeout(CONNECT_TIMEOUT);
        if self.skip_tls {
            builder = builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }
        let client = builder.build()?;

        Ok(HttpRegistryClient {
            client,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            credentials: self.credentials,
            page_size: self.page_size,
        })
    }
}

/// Extracts the `rel="next"` target from an RFC 5988 `Link` header, the
/// Docker Registry v2 catalog pagination mechanism. Registries emit the
/// target as a path relative to the root; an absolute URL is passed through.
fn next_page_url(base_url: &str, headers: &HeaderMap) -> Result<Option<String>> {
    let Some(link) = headers.get(LINK) else {
        return Ok(None);
    };
    let link = link
        .to_str()
        .map_err(|_| RegistryError::Protocol("unreadable Link header".to_string()))?;

    for part in link.split(',') {
        let mut sections = part.trim().split(';');
        let Some(target) = sections.next() else {
            continue;
        };
        let target = target.trim();
        if !(target.starts_with('<') && target.ends_with('>')) {
            continue;
        }
        let is_next = sections.any(|param| {
            let param = param.trim();
            param.eq_ignore_ascii_case(r#"rel="next""#) || param.eq_ignore_ascii_case("rel=next")
        });
        if !is_next {
            continue;
        }
        let target = &target[1..target.len() - 1];
        return Ok(Some(if target.starts_with('/') {
            format!("{base_url}{target}")
        } else {
            target.to_string()
        }));
    }
    Ok(None)
}

/// One configured endpoint's HTTP client. Basic auth is attached when
/// credentials are present; certificate verification is relaxed only when the
/// per-registry TLS policy asked for it at build time.
pub struct HttpRegistryClient {
    client: Client,
    base_url: String,
    credentials: Option<RegistryCredentials>,
    page_size: usize,
}

impl HttpRegistryClient {
    pub fn builder(base_url: String) -> HttpRegistryClientBuilder {
        HttpRegistryClientBuilder::new(base_url)
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let mut request = self.client.get(url);
        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }
        request
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::Protocol(format!(
                "registry returned {status}: {body}"
            )));
        }
        Ok(response.json::<T>().await?)
    }

    async fn config_created(
        &self,
        repository: &str,
        digest: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let url = format!("{}/v2/{}/blobs/{}", self.base_url, repository, digest);
        let response = self.get(&url).send().await?;
        let blob: ImageConfigBlob = Self::decode(response).await?;
        Ok(blob.created)
    }
}

#[async_trait]
impl RegistryApi for HttpRegistryClient {
    async fn list_repositories(&self) -> Result<Vec<String>> {
        let mut repositories = Vec::new();
        let mut url = format!("{}/v2/_catalog?n={}", self.base_url, self.page_size);
        loop {
            debug!("GET {}", url);
            let response = self.get(&url).send().await?;
            // Continuation is signalled by the Link header, not page length:
            // registries clamp `n` to their own maximum, so a short page can
            // still have a next page.
            let next = next_page_url(&self.base_url, response.headers())?;
            let page: CatalogPage = Self::decode(response).await?;
            repositories.extend(page.repositories);
            match next {
                Some(next_url) => url = next_url,
                None => break,
            }
        }
        Ok(repositories)
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let url = format!("{}/v2/{}/tags/list", self.base_url, repository);
        debug!("GET {}", url);
        let response = self.get(&url).send().await?;
        let list: TagList = Self::decode(response).await?;
        Ok(list.tags.unwrap_or_default())
    }

    async fn manifest(&self, repository: &str, reference: &str) -> Result<ManifestSummary> {
        let url = format!("{}/v2/{}/manifests/{}", self.base_url, repository, reference);
        debug!("GET {}", url);
        let response = self
            .get(&url)
            .header(ACCEPT, MANIFEST_ACCEPT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Protocol(format!(
                "manifest request for {repository}:{reference} returned {status}"
            )));
        }

        // Headers must be read before the body consumes the response.
        let digest = response
            .headers()
            .get("docker-content-digest")
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| {
                RegistryError::Protocol(format!(
                    "registry sent no content digest for {repository}:{reference}"
                ))
            })?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let manifest: ImageManifest = response.json().await?;
        let media_type = manifest
            .media_type
            .clone()
            .or(content_type)
            .unwrap_or_else(|| MANIFEST_V2.to_string());

        let created = self
            .config_created(repository, &manifest.config.digest)
            .await?;

        let layer_sizes: Vec<u64> = manifest.layers.iter().map(|layer| layer.size).collect();
        let total_size = manifest.config.size + layer_sizes.iter().sum::<u64>();

        Ok(ManifestSummary {
            digest,
            media_type,
            total_size,
            layer_sizes,
            created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    const BASE: &str = "http://localhost:5000";

    fn headers_with_link(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(LINK, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn follows_link_header_next_relation() {
        let headers =
            headers_with_link("</v2/_catalog?last=library%2Fnginx&n=100>; rel=\"next\"");
        let next = next_page_url(BASE, &headers).unwrap();
        assert_eq!(
            next.as_deref(),
            Some("http://localhost:5000/v2/_catalog?last=library%2Fnginx&n=100")
        );
    }

    #[test]
    fn absolute_link_target_is_passed_through() {
        let headers =
            headers_with_link("<http://localhost:5000/v2/_catalog?last=a&n=25>; rel=next");
        let next = next_page_url(BASE, &headers).unwrap();
        assert_eq!(
            next.as_deref(),
            Some("http://localhost:5000/v2/_catalog?last=a&n=25")
        );
    }

    #[test]
    fn absent_link_header_ends_pagination() {
        assert_eq!(next_page_url(BASE, &HeaderMap::new()).unwrap(), None);
    }

    #[test]
    fn unrelated_link_relations_are_ignored() {
        let headers = headers_with_link("</v2/_catalog?last=z&n=100>; rel=\"prev\"");
        assert_eq!(next_page_url(BASE, &headers).unwrap(), None);
    }

    #[test]
    fn picks_next_out_of_multiple_relations() {
        let headers = headers_with_link(
            "</v2/_catalog?n=100>; rel=\"prev\", </v2/_catalog?last=m&n=100>; rel=\"next\"",
        );
        let next = next_page_url(BASE, &headers).unwrap();
        assert_eq!(
            next.as_deref(),
            Some("http://localhost:5000/v2/_catalog?last=m&n=100")
        );
    }
}
