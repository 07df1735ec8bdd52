//! OCI reference parsing and registry aliasing.
//!
//! Parses references like `oci://ghcr.io/a3s-lab/packages/init:v0.1.0` into
//! structured components. Unlike Docker-style names, the first path segment is
//! always the registry.

use a3s_transfer_core::error::{OciError, Result};
use oci_distribution::Reference;

/// URL scheme accepted (and stripped) in front of references.
pub const OCI_URL_PREFIX: &str = "oci://";

/// Default tag when neither tag nor digest is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed OCI reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry host, optionally with port (e.g., "ghcr.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g., "a3s-lab/packages/init")
    pub repository: String,
    /// Tag (e.g., "latest", "v0.1.0")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse a reference string.
    ///
    /// Supports formats:
    /// - `ghcr.io/org/pkg` → ghcr.io/org/pkg:latest
    /// - `oci://localhost:5000/pkg:1.0.1` → localhost:5000/pkg:1.0.1
    /// - `ghcr.io/org/pkg@sha256:abc...` → ghcr.io/org/pkg@sha256:abc...
    /// - `ghcr.io/org/pkg:1.0@sha256:abc...` keeps both tag and digest
    pub fn parse(url: &str) -> Result<Self> {
        let trimmed = url.trim();
        let reference = trimmed.strip_prefix(OCI_URL_PREFIX).unwrap_or(trimmed);
        let invalid = |message: &str| OciError::InvalidReference {
            reference: url.to_string(),
            message: message.to_string(),
        };

        if reference.is_empty() {
            return Err(invalid("empty reference"));
        }

        let (registry, remainder) = reference
            .split_once('/')
            .ok_or_else(|| invalid("missing registry or repository"))?;
        if registry.is_empty() || registry.chars().any(char::is_whitespace) {
            return Err(invalid("invalid registry"));
        }

        // Split off digest first (@ separator)
        let (name_tag, digest) = match remainder.split_once('@') {
            Some((name_tag, digest)) => {
                let valid = digest
                    .split_once(':')
                    .map_or(false, |(alg, hex)| !alg.is_empty() && !hex.is_empty());
                if !valid {
                    return Err(invalid("invalid digest, expected algorithm:hex"));
                }
                (name_tag, Some(digest.to_string()))
            }
            None => (remainder, None),
        };

        // The registry has been removed, so any colon left separates the tag
        let (repository, tag) = match name_tag.rsplit_once(':') {
            Some((repository, tag)) => {
                if !is_valid_tag(tag) {
                    return Err(invalid("invalid tag"));
                }
                (repository, Some(tag.to_string()))
            }
            None => (name_tag, None),
        };

        if !is_valid_repository(repository) {
            return Err(invalid("invalid repository"));
        }

        let tag = if tag.is_none() && digest.is_none() {
            Some(DEFAULT_TAG.to_string())
        } else {
            tag
        };

        Ok(ImageReference {
            registry: registry.to_string(),
            repository: repository.to_string(),
            tag,
            digest,
        })
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }

    /// Convert to an oci-distribution Reference. A digest wins over a tag.
    ///
    /// Built from the parsed parts so the registry stays the first path
    /// segment; a dotless host is never re-read as a Docker Hub namespace.
    pub fn to_oci_reference(&self) -> Reference {
        match self.digest {
            Some(ref digest) => Reference::with_digest(
                self.registry.clone(),
                self.repository.clone(),
                digest.clone(),
            ),
            None => Reference::with_tag(
                self.registry.clone(),
                self.repository.clone(),
                self.tag.clone().unwrap_or_else(|| DEFAULT_TAG.to_string()),
            ),
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

fn is_valid_repository(repository: &str) -> bool {
    !repository.is_empty()
        && !repository.starts_with('/')
        && !repository.ends_with('/')
        && !repository.contains("//")
        && repository
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-' | '/'))
}

fn is_valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() || c == '_' => {}
        _ => return false,
    }
    tag.len() <= 128 && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// One registry rewrite rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasRule {
    /// Registry as written by the user
    pub alias: String,
    /// Registry to talk to instead
    pub registry: String,
    /// Namespace prepended to the repository path, if any
    pub repository_prefix: Option<String>,
}

/// Registry alias table applied to every reference a remote is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAliases {
    rules: Vec<AliasRule>,
}

impl Default for RegistryAliases {
    /// `docker.io` maps to its pull endpoint; the `a3s` and `🦄` vanity
    /// aliases map to the GHCR package namespace.
    fn default() -> Self {
        Self::empty()
            .with_rule("docker.io", "registry-1.docker.io", None)
            .with_rule("a3s", "ghcr.io", Some("a3s-lab/packages/"))
            .with_rule("🦄", "ghcr.io", Some("a3s-lab/packages/"))
    }
}

impl RegistryAliases {
    /// A table with no rules.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, alias: &str, registry: &str, repository_prefix: Option<&str>) -> Self {
        self.rules.push(AliasRule {
            alias: alias.to_string(),
            registry: registry.to_string(),
            repository_prefix: repository_prefix.map(str::to_string),
        });
        self
    }

    pub fn rules(&self) -> &[AliasRule] {
        &self.rules
    }

    /// Rewrite the reference's registry (and repository) per the first matching rule.
    pub fn apply(&self, mut reference: ImageReference) -> ImageReference {
        if let Some(rule) = self.rules.iter().find(|r| r.alias == reference.registry) {
            reference.registry = rule.registry.clone();
            if let Some(ref prefix) = rule.repository_prefix {
                reference.repository = format!("{}{}", prefix, reference.repository);
            }
        }
        reference
    }
}
