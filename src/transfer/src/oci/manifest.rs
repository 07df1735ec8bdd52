//! Root manifest of an artifact and target platform.

use std::collections::BTreeMap;

use a3s_transfer_core::error::Result;
use serde::{Deserialize, Serialize};

use super::descriptor::Descriptor;

/// OS value used for multi-platform packages.
pub const MULTI_OS: &str = "multi";

/// OCI image manifest media type.
pub const MEDIA_TYPE_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// Platform an artifact is resolved for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
}

impl Platform {
    /// Multi-platform package target for the given architecture.
    pub fn for_arch(arch: impl Into<String>) -> Self {
        Self {
            os: MULTI_OS.to_string(),
            architecture: arch.into(),
        }
    }
}

/// Root of a content tree: config plus ordered layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

fn default_schema_version() -> u32 {
    2
}

impl Manifest {
    pub fn new(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(MEDIA_TYPE_IMAGE_MANIFEST.to_string()),
            config,
            layers,
            annotations: BTreeMap::new(),
        }
    }

    /// Find the first layer whose title equals `path_or_digest` or whose
    /// encoded digest equals it. Returns the empty descriptor on no match.
    ///
    /// Host path separators in the input are converted to `/` first.
    pub fn locate(&self, path_or_digest: &str) -> Descriptor {
        let wanted = to_slash(path_or_digest);
        self.layers
            .iter()
            .find(|layer| layer.title() == Some(wanted.as_str()) || layer.encoded() == path_or_digest)
            .cloned()
            .unwrap_or_default()
    }

    /// Sum of config and layer sizes.
    pub fn total_size(&self) -> u64 {
        self.config.size + self.layers.iter().map(|l| l.size).sum::<u64>()
    }

    /// OCI JSON encoding of the manifest.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Convert host path separators to `/`.
pub fn to_slash(path: &str) -> String {
    if std::path::MAIN_SEPARATOR == '/' {
        path.to_string()
    } else {
        path.replace(std::path::MAIN_SEPARATOR, "/")
    }
}
