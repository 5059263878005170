//! Image references and content digests.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A content-addressable manifest digest, e.g. `sha256:abc123...`.
///
/// Comparison is literal byte comparison of the canonical string; this type
/// never re-normalises or re-hashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest(String);

impl Digest {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Digest {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Digest {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// `[host[:port]/]repo[:tag][@digest]`, parsed into its parts.
///
/// Tag `:latest` and an empty tag are treated as equivalent everywhere a
/// policy decision depends on the tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    pub host: Option<String>,
    pub repository: String,
    pub tag: String,
    /// Swarm-style `@sha256:...` digest suffix, if the reference carried one.
    /// Stripped before any registry query.
    pub digest: Option<Digest>,
}

impl ImageReference {
    /// Parse a reference string. Never fails: anything that doesn't look
    /// like `host/repo` is treated as a bare repository on the default
    /// registry, and a missing tag defaults to `"latest"`.
    pub fn parse(raw: &str) -> Self {
        let (without_digest, digest) = match raw.split_once('@') {
            Some((rest, digest)) => (rest, Some(Digest::new(digest))),
            None => (raw, None),
        };

        // A host segment contains a `.` or `:` or is literally `localhost`;
        // this mirrors how the OCI spec disambiguates `library/nginx` (no
        // host) from `registry.example.com/nginx` (host present).
        let mut parts = without_digest.splitn(2, '/');
        let first = parts.next().unwrap_or_default();
        let rest = parts.next();

        let (host, repo_and_tag) = match rest {
            Some(rest) if first.contains('.') || first.contains(':') || first == "localhost" => {
                (Some(first.to_string()), rest)
            }
            Some(_) | None => (None, without_digest),
        };

        let (repository, tag) = match repo_and_tag.rsplit_once(':') {
            // A colon after the last `/` is a tag; a colon that is part of a
            // port number was already consumed by the host split above.
            Some((repo, tag)) if !tag.contains('/') => (repo.to_string(), tag.to_string()),
            _ => (repo_and_tag.to_string(), "latest".to_string()),
        };

        Self {
            host,
            repository,
            tag,
            digest,
        }
    }

    /// `true` for `:latest` or an empty tag.
    pub fn is_latest_tag(&self) -> bool {
        self.tag.is_empty() || self.tag == "latest"
    }

    /// Registry host this image is pulled from, defaulting to Docker Hub.
    pub fn registry_host(&self) -> &str {
        self.host.as_deref().unwrap_or("docker.io")
    }

    /// Reference string with any `@digest` suffix stripped, suitable for a
    /// distribution API query.
    pub fn without_digest(&self) -> String {
        match &self.host {
            Some(host) => format!("{host}/{}:{}", self.repository, self.tag),
            None => format!("{}:{}", self.repository, self.tag),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.without_digest())?;
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_repo_with_implicit_tag() {
        let r = ImageReference::parse("nginx");
        assert_eq!(r.host, None);
        assert_eq!(r.repository, "nginx");
        assert_eq!(r.tag, "latest");
        assert!(r.is_latest_tag());
    }

    #[test]
    fn parses_namespaced_repo_with_explicit_tag() {
        let r = ImageReference::parse("docker.io/library/nginx:1.25");
        assert_eq!(r.host.as_deref(), Some("docker.io"));
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, "1.25");
        assert!(!r.is_latest_tag());
    }

    #[test]
    fn parses_host_with_port() {
        let r = ImageReference::parse("registry.local:5000/team/app:v2");
        assert_eq!(r.host.as_deref(), Some("registry.local:5000"));
        assert_eq!(r.repository, "team/app");
        assert_eq!(r.tag, "v2");
    }

    #[test]
    fn strips_swarm_style_digest_suffix() {
        let r = ImageReference::parse("nginx:1.25@sha256:deadbeef");
        assert_eq!(r.tag, "1.25");
        assert_eq!(r.digest, Some(Digest::new("sha256:deadbeef")));
        assert_eq!(r.without_digest(), "nginx:1.25");
    }

    #[test]
    fn digest_equality_is_literal() {
        assert_eq!(Digest::new("sha256:abc"), Digest::new("sha256:abc"));
        assert_ne!(Digest::new("sha256:ABC"), Digest::new("sha256:abc"));
    }
}
