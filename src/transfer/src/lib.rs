//! A3S Transfer - OCI artifact transfer engine.
//!
//! Registry handles, concurrent layer copy and verified selective file
//! pulls for OCI artifacts.

#![allow(clippy::result_large_err)]

pub mod oci;

// Re-export common types
pub use oci::{copy, copy_layers, pull_paths, remove_duplicate_descriptors};
pub use oci::{BlobSource, BlobTarget, ManifestSource, ManifestTarget};
pub use oci::{Descriptor, DescriptorSet, Manifest, Platform};
pub use oci::{DockerCredentialStore, ImageReference, RegistryAliases, RegistryAuth};
pub use oci::{MemoryStore, OciLayoutStore, Remote, RemoteOptions};

/// A3S Transfer version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
