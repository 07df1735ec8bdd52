//! OCI artifact transfer.
//!
//! An artifact is a root manifest (config + ordered layers) whose layers may
//! carry a relative file path in their title annotation. This module moves
//! those blobs between registries and local stores:
//!
//! - [`Remote`]: handle to one repository, with aliasing, credentials and a
//!   read-through cache
//! - [`copy`]: concurrent, cancellable layer copy with skip-if-present
//! - [`pull_paths`]: verified selective file pulls with hash-based skip
//!
//! ```text
//! ┌──────────────┐  fetch ──► pipe ──► push  ┌──────────────┐
//! │ BlobSource   │        (progress tee)      │ BlobTarget   │
//! │ Remote       │                            │ Remote       │
//! │ OciLayout    │                            │ OciLayout    │
//! │ MemoryStore  │                            │ MemoryStore  │
//! └──────────────┘                            └──────────────┘
//! ```

pub mod copy;
pub mod credentials;
pub mod descriptor;
pub mod digest;
pub mod layout;
pub mod manifest;
pub mod memory;
pub mod pull;
pub mod reference;
pub mod remote;
pub mod target;

pub use copy::{copy, copy_layers, LayerFilter};
pub use credentials::{DockerCredentialStore, RegistryAuth};
pub use descriptor::{
    remove_duplicate_descriptors, Descriptor, DescriptorSet, ANNOTATION_REF_NAME, ANNOTATION_TITLE,
};
pub use layout::OciLayoutStore;
pub use manifest::{Manifest, Platform, MULTI_OS};
pub use memory::MemoryStore;
pub use pull::{file_descriptor_exists, pull_path, pull_paths};
pub use reference::{ImageReference, RegistryAliases};
pub use remote::{Remote, RemoteOptions};
pub use target::{BlobSource, BlobTarget, ManifestSource, ManifestTarget};
