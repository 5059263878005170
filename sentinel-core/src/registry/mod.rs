//! Upstream image freshness checks against an OCI Distribution v2 registry.

mod error;

pub use error::RegistryError;

use std::time::Duration;

use regex::Regex;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use semver::Version;
use sentinel_model::enums::SemverScope;
use sentinel_model::image::{Digest, ImageReference};
use serde::Deserialize;

const MANIFEST_ACCEPT: &str = concat!(
    "application/vnd.oci.image.manifest.v1+json, ",
    "application/vnd.oci.image.index.v1+json, ",
    "application/vnd.docker.distribution.manifest.v2+json, ",
    "application/vnd.docker.distribution.manifest.list.v2+json",
);

/// Per-check tag filters, grounded on the container labels
/// (`sentinel.semver-scope`, `sentinel.tag-include`, `sentinel.tag-exclude`).
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    pub semver_scope: Option<SemverScope>,
    pub include: Option<Regex>,
    pub exclude: Option<Regex>,
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub local_digest: Option<Digest>,
    pub remote_digest: Option<Digest>,
    /// True when the upstream could not be contacted and the image is
    /// treated as locally built rather than updatable.
    pub is_local: bool,
    pub update_available: bool,
    pub newer_versions: Option<Vec<String>>,
    pub resolved_current_version: Option<String>,
    pub resolved_target_version: Option<String>,
    pub error: Option<String>,
}

impl CheckResult {
    fn local_only(local_digest: Option<Digest>, error: Option<String>) -> Self {
        Self {
            local_digest,
            remote_digest: None,
            is_local: true,
            update_available: false,
            newer_versions: None,
            resolved_current_version: None,
            resolved_target_version: None,
            error,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TagsList {
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(alias = "access_token")]
    token: String,
}

pub struct RegistryChecker {
    client: Client,
}

impl std::fmt::Debug for RegistryChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryChecker").finish_non_exhaustive()
    }
}

impl Default for RegistryChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryChecker {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("sentinel/0.1")
            .build()
            .expect("registry HTTP client builds with static TLS/config");
        Self { client }
    }

    /// Resolves whether `image` has a newer upstream representation,
    /// tolerating unreachable or unauthenticated registries
    /// by treating the image as local-only rather than failing the scan.
    pub async fn check(
        &self,
        image: &ImageReference,
        local_digest: Option<&Digest>,
        options: &CheckOptions,
    ) -> CheckResult {
        // Swarm-style digest suffixes are stripped before the registry
        // query: digests are content-addressed, so querying by digest would
        // only ever echo that same digest back and `update_available` would
        // be permanently false. Always query by tag and compare against the
        // caller-supplied `local_digest`.
        let reference = &image.tag;

        let remote = match self.fetch_manifest_digest(image, reference).await {
            Ok(digest) => digest,
            Err(err) => {
                return if local_digest.is_some() {
                    CheckResult::local_only(local_digest.cloned(), Some(err.to_string()))
                } else {
                    CheckResult {
                        local_digest: None,
                        remote_digest: None,
                        is_local: false,
                        update_available: false,
                        newer_versions: None,
                        resolved_current_version: None,
                        resolved_target_version: None,
                        error: Some(err.to_string()),
                    }
                };
            }
        };

        let update_available = local_digest.map(|ld| ld != &remote).unwrap_or(true);

        let newer_versions = self.newer_versions(image, options).await.unwrap_or(None);

        CheckResult {
            local_digest: local_digest.cloned(),
            remote_digest: Some(remote),
            is_local: false,
            update_available,
            newer_versions,
            resolved_current_version: parse_semver_tag(&image.tag),
            resolved_target_version: None,
            error: None,
        }
    }

    /// Probes a host's base endpoint purely to harvest its current
    /// rate-limit headers for `RateTracker`, independent of any one image.
    pub async fn probe(&self, host: &str) -> Option<HeaderMap> {
        let url = format!("https://{host}/v2/");
        self.client.get(&url).send().await.ok().map(|r| r.headers().clone())
    }

    async fn fetch_manifest_digest(&self, image: &ImageReference, reference: &str) -> Result<Digest, RegistryError> {
        let (host, repo) = api_host_and_repo(image);
        let url = format!("https://{host}/v2/{repo}/manifests/{reference}");

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(MANIFEST_ACCEPT));

        let response = self.client.head(&url).headers(headers.clone()).send().await?;
        let response = match response.status() {
            StatusCode::UNAUTHORIZED => {
                let token = self.bearer_token(&response, &host, &repo).await?;
                headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}")).unwrap());
                self.client.head(&url).headers(headers).send().await?
            }
            _ => response,
        };

        if response.status() == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound);
        }
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(RegistryError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(RegistryError::ApiError(format!("manifest HEAD returned {}", response.status())));
        }

        response
            .headers()
            .get("docker-content-digest")
            .and_then(|v| v.to_str().ok())
            .map(Digest::new)
            .ok_or_else(|| RegistryError::ParseError("response carried no Docker-Content-Digest header".into()))
    }

    async fn bearer_token(
        &self,
        unauthorized: &reqwest::Response,
        host: &str,
        repo: &str,
    ) -> Result<String, RegistryError> {
        let challenge = unauthorized
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .ok_or(RegistryError::InvalidCredentials)?;
        let (realm, service) = parse_bearer_challenge(challenge).ok_or_else(|| {
            RegistryError::ParseError(format!("unparseable Www-Authenticate challenge from {host}"))
        })?;

        let mut request = self.client.get(&realm).query(&[("scope", format!("repository:{repo}:pull"))]);
        if let Some(service) = service {
            request = request.query(&[("service", service)]);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RegistryError::InvalidCredentials);
        }
        let token: TokenResponse = response.json().await.map_err(|e| RegistryError::ParseError(e.to_string()))?;
        Ok(token.token)
    }

    async fn newer_versions(
        &self,
        image: &ImageReference,
        options: &CheckOptions,
    ) -> Result<Option<Vec<String>>, RegistryError> {
        let Some(current) = parse_semver_tag(&image.tag) else {
            return Ok(None);
        };
        let (host, repo) = api_host_and_repo(image);
        let url = format!("https://{host}/v2/{repo}/tags/list");

        let response = self.client.get(&url).send().await?;
        let response = if response.status() == StatusCode::UNAUTHORIZED {
            let token = self.bearer_token(&response, &host, &repo).await?;
            self.client.get(&url).bearer_auth(token).send().await?
        } else {
            response
        };
        if !response.status().is_success() {
            return Ok(None);
        }
        let body: TagsList = response.json().await.map_err(|e| RegistryError::ParseError(e.to_string()))?;

        let mut newer: Vec<(Version, String)> = body
            .tags
            .into_iter()
            .filter(|tag| options.include.as_ref().is_none_or(|re| re.is_match(tag)))
            .filter(|tag| options.exclude.as_ref().is_none_or(|re| !re.is_match(tag)))
            .filter_map(|tag| Version::parse(tag.trim_start_matches('v')).ok().map(|v| (v, tag)))
            .filter(|(v, _)| v > &current)
            .filter(|(v, _)| matches_scope(&current, v, options.semver_scope))
            .collect();
        newer.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(Some(newer.into_iter().map(|(_, tag)| tag).collect()))
    }
}

/// Maps an [`ImageReference`] onto the host/repository pair the Distribution
/// API expects, translating Docker Hub's historical aliasing the way real
/// clients do (`docker.io` → `registry-1.docker.io`, implicit `library/`).
fn api_host_and_repo(image: &ImageReference) -> (String, String) {
    if image.registry_host() == "docker.io" {
        let repo =
            if image.repository.contains('/') { image.repository.clone() } else { format!("library/{}", image.repository) };
        ("registry-1.docker.io".to_string(), repo)
    } else {
        (image.registry_host().to_string(), image.repository.clone())
    }
}

fn parse_semver_tag(tag: &str) -> Option<String> {
    Version::parse(tag.trim_start_matches('v')).ok().map(|_| tag.to_string())
}

fn matches_scope(current: &Version, candidate: &Version, scope: Option<SemverScope>) -> bool {
    match scope {
        None => true,
        Some(SemverScope::Major) => true,
        Some(SemverScope::Minor) => candidate.major == current.major,
        Some(SemverScope::Patch) => candidate.major == current.major && candidate.minor == current.minor,
    }
}

/// Parses `Bearer realm="...",service="...",scope="..."` into `(realm, service)`.
fn parse_bearer_challenge(challenge: &str) -> Option<(String, Option<String>)> {
    let rest = challenge.strip_prefix("Bearer ")?;
    let mut realm = None;
    let mut service = None;
    for part in rest.split(',') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix("realm=") {
            realm = Some(value.trim_matches('"').to_string());
        } else if let Some(value) = part.strip_prefix("service=") {
            service = Some(value.trim_matches('"').to_string());
        }
    }
    realm.map(|realm| (realm, service))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bearer_challenge_with_realm_and_service() {
        let challenge = r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/nginx:pull""#;
        let (realm, service) = parse_bearer_challenge(challenge).unwrap();
        assert_eq!(realm, "https://auth.docker.io/token");
        assert_eq!(service.as_deref(), Some("registry.docker.io"));
    }

    #[test]
    fn docker_hub_host_rewrites_to_registry_one() {
        let image = ImageReference::parse("nginx:1.25");
        let (host, repo) = api_host_and_repo(&image);
        assert_eq!(host, "registry-1.docker.io");
        assert_eq!(repo, "library/nginx");
    }

    #[test]
    fn namespaced_docker_hub_repo_is_left_alone() {
        let image = ImageReference::parse("grafana/grafana:10.0");
        let (host, repo) = api_host_and_repo(&image);
        assert_eq!(host, "registry-1.docker.io");
        assert_eq!(repo, "grafana/grafana");
    }

    #[test]
    fn third_party_registry_host_is_untouched() {
        let image = ImageReference::parse("ghcr.io/acme/app:1.0");
        let (host, repo) = api_host_and_repo(&image);
        assert_eq!(host, "ghcr.io");
        assert_eq!(repo, "acme/app");
    }

    #[test]
    fn semver_scope_filters_candidates() {
        let current = Version::parse("1.2.3").unwrap();
        assert!(matches_scope(&current, &Version::parse("1.2.4").unwrap(), Some(SemverScope::Patch)));
        assert!(!matches_scope(&current, &Version::parse("1.3.0").unwrap(), Some(SemverScope::Patch)));
        assert!(matches_scope(&current, &Version::parse("1.3.0").unwrap(), Some(SemverScope::Minor)));
        assert!(!matches_scope(&current, &Version::parse("2.0.0").unwrap(), Some(SemverScope::Minor)));
        assert!(matches_scope(&current, &Version::parse("2.0.0").unwrap(), Some(SemverScope::Major)));
    }
}
