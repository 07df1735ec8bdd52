//! Registry credentials.
//!
//! Reads per-registry credentials from the Docker client config
//! (`$DOCKER_CONFIG/config.json` or `~/.docker/config.json`). The store is
//! read-only: logins are managed by whatever tool wrote the file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use a3s_transfer_core::error::{OciError, Result};
use base64::Engine;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use serde::Deserialize;

/// Key Docker uses for Docker Hub credentials.
const DOCKER_HUB_KEY: &str = "https://index.docker.io/v1/";

/// One `auths` entry.
#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Docker config file format (only the parts we read).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    #[serde(default)]
    creds_store: Option<String>,
    #[serde(default)]
    cred_helpers: HashMap<String, String>,
}

/// Read-only view of the Docker client credential file.
#[derive(Debug, Clone)]
pub struct DockerCredentialStore {
    path: PathBuf,
}

impl DockerCredentialStore {
    /// Store at `$DOCKER_CONFIG/config.json`, falling back to `~/.docker/config.json`.
    pub fn default_path() -> Result<Self> {
        if let Some(dir) = std::env::var_os("DOCKER_CONFIG") {
            return Ok(Self::new(PathBuf::from(dir).join("config.json")));
        }
        let home = dirs::home_dir().ok_or_else(|| {
            OciError::CredentialStore(
                "Cannot determine home directory for credential store".to_string(),
            )
        })?;
        Ok(Self::new(home.join(".docker").join("config.json")))
    }

    /// Store backed by a specific config file.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get credentials for a registry. Returns `(username, password)`.
    ///
    /// A missing file means no credentials; a file that cannot be read or
    /// parsed is an error.
    pub fn get(&self, registry: &str) -> Result<Option<(String, String)>> {
        let file = match self.load()? {
            Some(file) => file,
            None => return Ok(None),
        };

        let wanted = normalize_registry(registry);
        let entry = file
            .auths
            .iter()
            .find(|(key, _)| normalize_registry(key) == wanted)
            .map(|(_, entry)| entry);

        let Some(entry) = entry else {
            if file.cred_helpers.contains_key(registry) || file.creds_store.is_some() {
                tracing::debug!(
                    registry,
                    config = %self.path.display(),
                    "Credential helpers are not supported, using anonymous access"
                );
            }
            return Ok(None);
        };

        if let Some(ref encoded) = entry.auth {
            if !encoded.is_empty() {
                return self.decode_auth(registry, encoded).map(Some);
            }
        }

        match (&entry.username, &entry.password) {
            (Some(u), Some(p)) => Ok(Some((u.clone(), p.clone()))),
            _ => Ok(None),
        }
    }

    /// Load the config file. Returns `None` if it does not exist.
    fn load(&self) -> Result<Option<DockerConfigFile>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            OciError::CredentialStore(format!(
                "Failed to read credential store {}: {}",
                self.path.display(),
                e
            ))
        })?;
        if data.trim().is_empty() {
            return Ok(Some(DockerConfigFile::default()));
        }
        serde_json::from_str(&data).map(Some).map_err(|e| {
            OciError::CredentialStore(format!(
                "Failed to parse credential store {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn decode_auth(&self, registry: &str, encoded: &str) -> Result<(String, String)> {
        let bad = |detail: String| {
            OciError::CredentialStore(format!(
                "Invalid auth entry for {} in {}: {}",
                registry,
                self.path.display(),
                detail
            ))
        };
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| bad(e.to_string()))?;
        let decoded = String::from_utf8(decoded).map_err(|e| bad(e.to_string()))?;
        let (user, pass) = decoded
            .split_once(':')
            .ok_or_else(|| bad("expected username:password".to_string()))?;
        Ok((user.to_string(), pass.to_string()))
    }
}

/// Normalize registry names and config keys to a bare lowercase host.
///
/// Docker Hub hosts all collapse to the legacy `https://index.docker.io/v1/` key.
fn normalize_registry(registry: &str) -> String {
    let r = registry.trim().to_lowercase();
    let host = r
        .strip_prefix("https://")
        .or_else(|| r.strip_prefix("http://"))
        .unwrap_or(&r);
    let host = host.split('/').next().unwrap_or(host);
    if host == "docker.io" || host == "registry-1.docker.io" || host == "index.docker.io" {
        DOCKER_HUB_KEY.to_string()
    } else {
        host.to_string()
    }
}

/// Authentication credentials for a container registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Create authentication from environment variables.
    ///
    /// Reads `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`.
    /// Falls back to anonymous if not set.
    pub fn from_env() -> Self {
        let username = std::env::var("REGISTRY_USERNAME").ok();
        let password = std::env::var("REGISTRY_PASSWORD").ok();

        if username.is_some() && password.is_some() {
            Self { username, password }
        } else {
            Self::anonymous()
        }
    }

    /// Resolve credentials for `registry`: credential store first, then
    /// environment variables, then anonymous.
    pub fn resolve(store: &DockerCredentialStore, registry: &str) -> Result<Self> {
        if let Some((username, password)) = store.get(registry)? {
            tracing::debug!(registry, "Using stored credentials");
            return Ok(Self::basic(username, password));
        }
        Ok(Self::from_env())
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    /// Username and password when both are set.
    pub fn basic_credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some((u.as_str(), p.as_str())),
            _ => None,
        }
    }

    pub(crate) fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}
