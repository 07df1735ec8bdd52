//! Remote handle for one OCI repository.
//!
//! A [`Remote`] bundles everything needed to talk to a registry endpoint:
//! the parsed (and aliased) reference, an `oci-distribution` client, resolved
//! credentials, lazily fetched bearer tokens, an optional read-through cache
//! and an optional progress sink. It implements the content target traits,
//! so the copy and pull engines can use it on either side of a transfer.

use std::path::Path;
use std::sync::Arc;

use a3s_transfer_core::config::TransferConfig;
use a3s_transfer_core::error::{OciError, Result};
use a3s_transfer_core::progress::{or_discard, ProgressSink, ProgressWriter};
use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::errors::OciDistributionError;
use oci_distribution::manifest::{ImageIndexEntry, OciDescriptor, OciImageManifest, OciManifest};
use oci_distribution::{Client, Reference, RegistryOperation};
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::copy::copy_layers;
use super::credentials::{DockerCredentialStore, RegistryAuth};
use super::descriptor::{Descriptor, DescriptorSet};
use super::digest::{VerifyingReader, VerifyingWriter};
use super::layout::OciLayoutStore;
use super::manifest::{Manifest, Platform};
use super::pull;
use super::reference::{ImageReference, RegistryAliases};
use super::target::{BlobSource, BlobTarget, ManifestSource, ManifestTarget};

/// User agent sent with blob existence probes.
pub const DEFAULT_USER_AGENT: &str = concat!("a3s-transfer/", env!("CARGO_PKG_VERSION"));

/// Upper bound for the initial push buffer allocation.
const MAX_PUSH_PREALLOC: u64 = 64 * 1024 * 1024;

/// Construction options for a [`Remote`].
#[derive(Default)]
pub struct RemoteOptions {
    /// Use `http://` instead of `https://`
    pub plain_http: bool,
    /// Accept invalid TLS certificates
    pub insecure_skip_verify: bool,
    /// User agent for blob probes (defaults to [`DEFAULT_USER_AGENT`])
    pub user_agent: Option<String>,
    /// Span the handle logs under (defaults to `remote{reference=..}`)
    pub log_span: Option<tracing::Span>,
    /// Local OCI layout consulted before the registry for blob reads
    pub cache: Option<Arc<OciLayoutStore>>,
    /// Sink that receives blob bytes as they are read
    pub progress: Option<Arc<dyn ProgressSink>>,
    /// Registry alias table
    pub aliases: RegistryAliases,
    /// Credential store (defaults to the Docker config file)
    pub credentials: Option<DockerCredentialStore>,
}

impl RemoteOptions {
    /// Options derived from a merged [`TransferConfig`].
    pub fn from_config(config: &TransferConfig) -> Result<Self> {
        let cache = match config.cache_dir {
            Some(ref dir) => Some(Arc::new(OciLayoutStore::open(dir)?)),
            None => None,
        };
        Ok(Self {
            plain_http: config.plain_http.unwrap_or(false),
            insecure_skip_verify: config.insecure_skip_verify.unwrap_or(false),
            user_agent: config.user_agent.clone(),
            cache,
            ..Default::default()
        })
    }
}

/// Handle to one repository on one registry.
pub struct Remote {
    reference: ImageReference,
    oci_ref: Reference,
    client: Arc<Client>,
    auth: RegistryAuth,
    http: reqwest::Client,
    platform: Platform,
    plain_http: bool,
    cache: Option<Arc<OciLayoutStore>>,
    progress: RwLock<Option<Arc<dyn ProgressSink>>>,
    root: RwLock<Option<Manifest>>,
    pull_token: OnceCell<Option<String>>,
    push_token: OnceCell<Option<String>>,
    span: tracing::Span,
}

impl Remote {
    /// Create a handle for `url` (`[oci://]registry/repository[:tag][@digest]`).
    ///
    /// Applies the alias table and resolves credentials before any network
    /// call is made.
    pub fn new(url: &str, platform: Platform, options: RemoteOptions) -> Result<Self> {
        let reference = options.aliases.apply(ImageReference::parse(url)?);
        let oci_ref = reference.to_oci_reference();

        let store = match options.credentials {
            Some(store) => Some(store),
            None => DockerCredentialStore::default_path().ok(),
        };
        let auth = match store {
            Some(ref store) => RegistryAuth::resolve(store, &reference.registry)?,
            None => RegistryAuth::from_env(),
        };

        let wanted = platform.clone();
        let resolver = move |manifests: &[ImageIndexEntry]| -> Option<String> {
            manifests
                .iter()
                .find(|entry| {
                    entry.platform.as_ref().map_or(false, |p| {
                        p.os == wanted.os && p.architecture == wanted.architecture
                    })
                })
                .map(|entry| entry.digest.clone())
        };
        let config = ClientConfig {
            protocol: if options.plain_http {
                ClientProtocol::Http
            } else {
                ClientProtocol::Https
            },
            accept_invalid_certificates: options.insecure_skip_verify,
            platform_resolver: Some(Box::new(resolver)),
            ..Default::default()
        };
        let client = Arc::new(Client::new(config));

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(options.insecure_skip_verify)
            .user_agent(
                options
                    .user_agent
                    .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            )
            .build()
            .map_err(|e| OciError::Network {
                registry: reference.registry.clone(),
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        let span = options
            .log_span
            .unwrap_or_else(|| tracing::info_span!("remote", reference = %reference));

        tracing::debug!(
            parent: &span,
            registry = %reference.registry,
            repository = %reference.repository,
            anonymous = auth.is_anonymous(),
            "Created remote handle"
        );

        Ok(Self {
            reference,
            oci_ref,
            client,
            auth,
            http,
            platform,
            plain_http: options.plain_http,
            cache: options.cache,
            progress: RwLock::new(options.progress),
            root: RwLock::new(None),
            pull_token: OnceCell::new(),
            push_token: OnceCell::new(),
            span,
        })
    }

    pub fn reference(&self) -> &ImageReference {
        &self.reference
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// The span this handle logs under.
    pub fn log(&self) -> &tracing::Span {
        &self.span
    }

    /// Underlying registry client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn to_oci_reference(&self) -> Reference {
        self.oci_ref.clone()
    }

    /// Report blob reads to `sink` from now on.
    pub fn set_progress(&self, sink: Arc<dyn ProgressSink>) {
        *self.progress.write() = Some(sink);
    }

    /// Stop reporting blob reads.
    pub fn clear_progress(&self) {
        *self.progress.write() = None;
    }

    fn progress(&self) -> Arc<dyn ProgressSink> {
        or_discard(self.progress.read().clone())
    }

    /// Forget the cached root manifest.
    pub fn invalidate_root(&self) {
        *self.root.write() = None;
    }

    fn map_error(&self, context: &str, err: OciDistributionError) -> OciError {
        registry_error(&self.reference.registry, context, err)
    }

    /// Bearer token for pull or push scope, fetched once per handle.
    async fn token(&self, push: bool) -> Result<Option<String>> {
        let (cell, operation) = if push {
            (&self.push_token, RegistryOperation::Push)
        } else {
            (&self.pull_token, RegistryOperation::Pull)
        };
        let token = cell
            .get_or_try_init(|| async {
                self.client
                    .auth(&self.oci_ref, &self.auth.to_oci_auth(), operation)
                    .await
                    .map_err(|e| self.map_error("Failed to authenticate", e))
            })
            .await?;
        Ok(token.clone())
    }

    /// Resolve the root manifest, reusing the cached copy when present.
    ///
    /// Multi-platform indexes are resolved to this handle's platform.
    pub async fn fetch_root(&self) -> Result<Manifest> {
        let cached = self.root.read().clone();
        if let Some(root) = cached {
            return Ok(root);
        }

        let auth = self.auth.to_oci_auth();
        let (image_manifest, digest) = self
            .client
            .pull_image_manifest(&self.oci_ref, &auth)
            .instrument(self.span.clone())
            .await
            .map_err(|e| self.map_error("Failed to pull manifest", e))?;
        let manifest = Manifest::from_json(&serde_json::to_vec(&image_manifest)?)?;

        tracing::debug!(
            parent: &self.span,
            digest = %digest,
            layers = manifest.layers.len(),
            "Resolved root manifest"
        );

        *self.root.write() = Some(manifest.clone());
        Ok(manifest)
    }

    /// Push `manifest` under this handle's reference.
    pub async fn push_root(&self, manifest: &Manifest) -> Result<()> {
        let image: OciImageManifest = serde_json::from_slice(&manifest.to_json()?)?;
        self.token(true).await?;
        let url = self
            .client
            .push_manifest(&self.oci_ref, &OciManifest::Image(image))
            .instrument(self.span.clone())
            .await
            .map_err(|e| self.map_error("Failed to push manifest", e))?;
        self.invalidate_root();

        tracing::info!(
            parent: &self.span,
            reference = %self.reference,
            url = %url,
            "Pushed root manifest"
        );
        Ok(())
    }

    /// Whether `destination_dir/<title>` already holds `desc`'s content.
    pub async fn file_descriptor_exists(&self, desc: &Descriptor, destination_dir: &Path) -> bool {
        pull::file_descriptor_exists(desc, destination_dir).await
    }

    /// Pull one file layer into `destination_dir`.
    pub async fn pull_path(
        &self,
        cancel: &CancellationToken,
        destination_dir: &Path,
        desc: &Descriptor,
    ) -> Result<()> {
        pull::pull_path(cancel, self, destination_dir, desc)
            .instrument(self.span.clone())
            .await
    }

    /// Pull the files titled by `paths` into `destination_dir`.
    pub async fn pull_paths(
        &self,
        cancel: &CancellationToken,
        destination_dir: &Path,
        paths: &[String],
    ) -> Result<Vec<Descriptor>> {
        tracing::info!(
            parent: &self.span,
            destination = %destination_dir.display(),
            paths = paths.len(),
            "Pulling files"
        );
        pull::pull_paths(cancel, self, destination_dir, paths)
            .instrument(self.span.clone())
            .await
    }

    /// Copy the listed blobs (matched by encoded digest) and the config
    /// from this repository into `target`, then store the root manifest
    /// there.
    ///
    /// Blob reads go through the read-through cache and this handle's
    /// progress sink.
    pub async fn copy_to_target<T>(
        self: Arc<Self>,
        cancel: &CancellationToken,
        layers: &[Descriptor],
        target: Arc<T>,
        concurrency: usize,
    ) -> Result<()>
    where
        T: BlobTarget + ManifestTarget + ?Sized + 'static,
    {
        let root = self.fetch_root().await?;
        let wanted: DescriptorSet = layers
            .iter()
            .filter(|d| !d.digest.is_empty())
            .cloned()
            .collect();

        let mut selected: Vec<Descriptor> = root
            .layers
            .iter()
            .filter(|l| wanted.contains_encoded(l.encoded()))
            .cloned()
            .collect();
        selected.push(root.config.clone());

        let span = self.span.clone();
        copy_layers(
            cancel,
            self,
            Arc::clone(&target),
            selected,
            concurrency,
            None,
        )
        .instrument(span)
        .await?;

        target.push_root(&root).await
    }

    fn blob_url(&self, digest: &str) -> String {
        let scheme = if self.plain_http { "http" } else { "https" };
        format!(
            "{}://{}/v2/{}/blobs/{}",
            scheme, self.reference.registry, self.reference.repository, digest
        )
    }

    /// HEAD the blob on the registry.
    async fn blob_exists(&self, desc: &Descriptor) -> Result<bool> {
        let token = self.token(false).await?;
        let mut request = self.http.head(self.blob_url(&desc.digest));
        request = match (token, self.auth.basic_credentials()) {
            (Some(token), _) => request.bearer_auth(token),
            (None, Some((username, password))) => request.basic_auth(username, Some(password)),
            (None, None) => request,
        };

        let response = request.send().await.map_err(|e| OciError::Network {
            registry: self.reference.registry.clone(),
            message: format!("Failed to check blob {}: {}", desc.digest, e),
        })?;

        let status = response.status();
        match status {
            s if s.is_success() => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Err(OciError::Unauthorized {
                    registry: self.reference.registry.clone(),
                    message: format!("Failed to check blob {}: {}", desc.digest, status),
                })
            }
            s => Err(OciError::Network {
                registry: self.reference.registry.clone(),
                message: format!("Failed to check blob {}: {}", desc.digest, s),
            }),
        }
    }
}

#[async_trait]
impl BlobSource for Remote {
    async fn exists(&self, desc: &Descriptor) -> Result<bool> {
        self.blob_exists(desc).instrument(self.span.clone()).await
    }

    async fn fetch(
        &self,
        desc: &Descriptor,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        let mut reported = ProgressWriter::new(out, self.progress());

        if let Some(ref cache) = self.cache {
            if cache.exists(desc).await.unwrap_or(false) {
                tracing::debug!(parent: &self.span, layer = %desc.label(), "Reading layer from cache");
                return cache.fetch(desc, &mut reported).await;
            }
        }

        self.token(false).await?;
        let oci_desc = to_oci_descriptor(desc)?;
        let mut writer = VerifyingWriter::new(&mut reported);
        self.client
            .pull_blob(&self.oci_ref, &oci_desc, &mut writer)
            .instrument(self.span.clone())
            .await
            .map_err(|e| self.map_error(&format!("Failed to pull blob {}", desc.digest), e))?;
        writer.flush().await?;
        writer.verifier().verify(desc)?;
        Ok(writer.verifier().size())
    }

    fn name(&self) -> String {
        self.reference.full_reference()
    }
}

#[async_trait]
impl BlobTarget for Remote {
    /// Buffers the whole blob, verifies it, then uploads it in one request.
    ///
    /// `oci-distribution` 0.11 only offers `push_blob(&[u8])`, so the pipe's
    /// backpressure stops here: memory grows with layer size times the copy
    /// concurrency.
    async fn push(
        &self,
        desc: &Descriptor,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<()> {
        let mut reader = VerifyingReader::new(content);
        let mut data = Vec::with_capacity(desc.size.min(MAX_PUSH_PREALLOC) as usize);
        reader.read_to_end(&mut data).await?;
        reader.verifier().verify(desc)?;

        self.token(true).await?;
        self.client
            .push_blob(&self.oci_ref, &data, &desc.digest)
            .instrument(self.span.clone())
            .await
            .map_err(|e| self.map_error(&format!("Failed to push blob {}", desc.digest), e))?;
        Ok(())
    }
}

#[async_trait]
impl ManifestSource for Remote {
    async fn fetch_root(&self) -> Result<Manifest> {
        Remote::fetch_root(self).await
    }
}

#[async_trait]
impl ManifestTarget for Remote {
    async fn push_root(&self, manifest: &Manifest) -> Result<()> {
        Remote::push_root(self, manifest).await
    }
}

/// Descriptor in the registry client's representation.
fn to_oci_descriptor(desc: &Descriptor) -> Result<OciDescriptor> {
    Ok(serde_json::from_value(serde_json::to_value(desc)?)?)
}

/// Map a registry client error onto the error taxonomy.
fn registry_error(registry: &str, context: &str, err: OciDistributionError) -> OciError {
    let message = format!("{}: {}", context, err);
    let unauthorized = |message: String| OciError::Unauthorized {
        registry: registry.to_string(),
        message,
    };

    match err {
        OciDistributionError::AuthenticationFailure(_)
        | OciDistributionError::UnauthorizedError { .. } => unauthorized(message),
        OciDistributionError::ImageManifestNotFoundError(_) => OciError::NotFound(message),
        OciDistributionError::ServerError { code, .. } if code == 404 => OciError::NotFound(message),
        OciDistributionError::ServerError { code, .. } if code == 401 || code == 403 => {
            unauthorized(message)
        }
        _ => {
            let lower = message.to_lowercase();
            if lower.contains("manifest_unknown")
                || lower.contains("name_unknown")
                || lower.contains("blob_unknown")
            {
                OciError::NotFound(message)
            } else if lower.contains("unauthorized") || lower.contains("denied") {
                unauthorized(message)
            } else {
                OciError::Network {
                    registry: registry.to_string(),
                    message,
                }
            }
        }
    }
}
