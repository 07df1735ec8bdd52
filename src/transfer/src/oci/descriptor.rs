//! Content descriptors.
//!
//! A [`Descriptor`] identifies one blob by digest and size. Descriptors that
//! represent files carry their relative path in the
//! `org.opencontainers.image.title` annotation.

use std::collections::{BTreeMap, HashSet};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Annotation key holding a layer's relative file path.
pub const ANNOTATION_TITLE: &str = "org.opencontainers.image.title";

/// Annotation key holding a manifest's tag inside an OCI layout index.
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

/// Content descriptor (OCI JSON form).
///
/// Two descriptors are equal when digest and size match; media type and
/// annotations do not take part in identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Content type (e.g., "application/vnd.oci.image.layer.v1.tar")
    #[serde(default)]
    pub media_type: String,
    /// Algorithm-qualified content hash (e.g., "sha256:abc123...")
    #[serde(default)]
    pub digest: String,
    /// Content length in bytes
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: impl Into<String>, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest: digest.into(),
            size,
            annotations: BTreeMap::new(),
        }
    }

    /// Attach a title annotation.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.annotations
            .insert(ANNOTATION_TITLE.to_string(), title.into());
        self
    }

    /// The empty descriptor, used to signal "not found".
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when digest is empty and size is zero.
    pub fn is_empty(&self) -> bool {
        self.digest.is_empty() && self.size == 0
    }

    /// Hash algorithm part of the digest (`sha256` in `sha256:abc`).
    pub fn algorithm(&self) -> &str {
        self.digest
            .split_once(':')
            .map(|(alg, _)| alg)
            .unwrap_or("")
    }

    /// Encoded part of the digest (`abc` in `sha256:abc`).
    pub fn encoded(&self) -> &str {
        self.digest
            .split_once(':')
            .map(|(_, hex)| hex)
            .unwrap_or(&self.digest)
    }

    /// Relative file path carried in the title annotation, if any.
    pub fn title(&self) -> Option<&str> {
        self.annotations
            .get(ANNOTATION_TITLE)
            .map(String::as_str)
            .filter(|t| !t.is_empty())
    }

    /// Short label for log lines: 12 digest characters plus title or media type.
    pub fn label(&self) -> String {
        let short: String = self.encoded().chars().take(12).collect();
        match self.title() {
            Some(title) => format!("{} {}", short, first30_last30(title)),
            None => format!("{} [{}]", short, self.media_type),
        }
    }
}

impl PartialEq for Descriptor {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest && self.size == other.size
    }
}

impl Eq for Descriptor {}

impl Hash for Descriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.digest.hash(state);
        self.size.hash(state);
    }
}

/// Shorten long strings to their first and last 30 characters.
pub fn first30_last30(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 60 {
        let head: String = chars[..30].iter().collect();
        let tail: String = chars[chars.len() - 30..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        s.to_string()
    }
}

/// Drop later duplicates (by digest) and empty descriptors, keeping order.
pub fn remove_duplicate_descriptors(descriptors: &[Descriptor]) -> Vec<Descriptor> {
    let mut seen = HashSet::new();
    descriptors
        .iter()
        .filter(|d| !d.is_empty())
        .filter(|d| seen.insert(d.digest.clone()))
        .cloned()
        .collect()
}

/// Insertion-ordered set of descriptors keyed by digest.
#[derive(Debug, Clone, Default)]
pub struct DescriptorSet {
    items: Vec<Descriptor>,
    digests: HashSet<String>,
}

impl DescriptorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a descriptor. Returns false if its digest was already present.
    pub fn insert(&mut self, descriptor: Descriptor) -> bool {
        if !self.digests.insert(descriptor.digest.clone()) {
            return false;
        }
        self.items.push(descriptor);
        true
    }

    pub fn contains_digest(&self, digest: &str) -> bool {
        self.digests.contains(digest)
    }

    /// True if any member has the given encoded digest (hex part only).
    pub fn contains_encoded(&self, encoded: &str) -> bool {
        self.items.iter().any(|d| d.encoded() == encoded)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<Descriptor> {
        self.items
    }
}

impl FromIterator<Descriptor> for DescriptorSet {
    fn from_iter<I: IntoIterator<Item = Descriptor>>(iter: I) -> Self {
        let mut set = DescriptorSet::new();
        for d in iter {
            set.insert(d);
        }
        set
    }
}
