//! Per-login session state and its on-disk form.
//!
//! The folder identity doubles as the passcode: it authenticates against the
//! server and is the input to key derivation. The session cookie returned by
//! `/login` is kept next to it so later commands can skip the login round trip.

use anyhow::Context;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use snapfile_crypto::SessionKey;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{SnapfileError, SnapfileResult};

/// Everything one logged-in client needs: where to talk, who it is, and the key.
#[derive(Clone)]
pub struct Session {
    server_url: String,
    identity: SecretString,
    key: Arc<SessionKey>,
    cookie: Option<String>,
}

impl Session {
    pub fn new(server_url: &str, identity: SecretString, key: Arc<SessionKey>) -> Self {
        Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            identity,
            key,
            cookie: None,
        }
    }

    pub fn with_cookie(mut self, cookie: Option<String>) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn identity(&self) -> &SecretString {
        &self.identity
    }

    pub fn key(&self) -> Arc<SessionKey> {
        Arc::clone(&self.key)
    }

    /// `name=value` pair to send back in the `Cookie` header
    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    pub fn set_cookie(&mut self, cookie: Option<String>) {
        self.cookie = cookie;
    }

    /// WebSocket endpoint for this server: `http` → `ws`, `https` → `wss`, plus `/ws`.
    pub fn ws_url(&self) -> SnapfileResult<String> {
        let rest = if let Some(rest) = self.server_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.server_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(SnapfileError::Config(format!(
                "server URL must start with http:// or https://: {}",
                self.server_url
            )));
        };
        Ok(format!("{rest}/ws"))
    }

    /// On-disk form of this session
    pub fn to_stored(&self) -> StoredIdentity {
        StoredIdentity {
            identity: self.identity.expose_secret().to_string(),
            cookie: self.cookie.clone(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("server_url", &self.server_url)
            .field("identity", &"[REDACTED]")
            .field("cookie", &self.cookie.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Identity file contents
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct StoredIdentity {
    pub identity: String,
    #[serde(default)]
    pub cookie: Option<String>,
}

impl std::fmt::Debug for StoredIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredIdentity")
            .field("identity", &"[REDACTED]")
            .field("cookie", &self.cookie.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// JSON file holding the identity and session cookie between runs
#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when nobody is logged in.
    pub fn load(&self) -> SnapfileResult<Option<StoredIdentity>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading identity file: {}", self.path.display()))?;
        let stored = serde_json::from_str(&content)
            .with_context(|| format!("parsing identity file: {}", self.path.display()))?;
        Ok(Some(stored))
    }

    /// Write the identity file, owner read/write only.
    pub fn save(&self, stored: &StoredIdentity) -> SnapfileResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating dir: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(stored).context("serializing identity")?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(&self.path)
            .with_context(|| format!("opening identity file: {}", self.path.display()))?;
        std::io::Write::write_all(&mut file, json.as_bytes())
            .with_context(|| format!("writing identity file: {}", self.path.display()))?;
        tracing::debug!(path = %self.path.display(), "identity saved");
        Ok(())
    }

    /// Forget the stored identity. A missing file is not an error.
    pub fn clear(&self) -> SnapfileResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "identity cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
