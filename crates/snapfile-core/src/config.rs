use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use snapfile_crypto::{ChunkCodec, KdfParams, DEFAULT_CHUNK_SIZE};

use crate::error::{SnapfileError, SnapfileResult};

/// Top-level client configuration (loaded from snapfile.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapfileConfig {
    pub server: ServerConfig,
    pub crypto: CryptoConfig,
    pub sync: SyncConfig,
    pub transfer: TransferConfig,
    pub session: SessionConfig,
    pub log: LogConfig,
}

impl SnapfileConfig {
    /// Reject settings that cannot work together. Logs a warning for settings
    /// that work but are unsafe.
    pub fn validate(&self) -> SnapfileResult<()> {
        self.server.check_tls()?;
        self.crypto.chunk_codec()?;
        if self.crypto.pbkdf2_iterations == 0 {
            return Err(SnapfileError::Config(
                "crypto.pbkdf2_iterations must be greater than zero".into(),
            ));
        }
        if self.sync.backoff_base_ms == 0 {
            return Err(SnapfileError::Config(
                "sync.backoff_base_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the snapfile server (default: http://localhost:8080)
    pub url: String,
    /// Refuse plaintext HTTP server URLs
    pub enforce_tls: bool,
}

impl ServerConfig {
    /// If `enforce_tls` is set and the URL is plain HTTP, this returns an error.
    /// Otherwise a warning is logged for non-HTTPS URLs.
    pub fn check_tls(&self) -> SnapfileResult<()> {
        if self.url.starts_with("http://") {
            if self.enforce_tls {
                return Err(SnapfileError::Config(format!(
                    "server URL uses plaintext HTTP ({}), but enforce_tls is enabled. \
                     Use an HTTPS URL or set server.enforce_tls = false for local development.",
                    self.url
                )));
            }
            tracing::warn!(
                url = %self.url,
                "server URL uses plaintext HTTP: the session cookie is sent unencrypted. \
                 Set server.enforce_tls = true and use HTTPS in production."
            );
        }
        Ok(())
    }
}

/// E2E encryption parameters. Every client of a folder must use the same values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// PBKDF2-HMAC-SHA256 iterations (default: 480000)
    pub pbkdf2_iterations: u32,
    /// Plaintext bytes per file chunk (default: 64 MiB)
    pub chunk_size: usize,
}

impl CryptoConfig {
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            iterations: self.pbkdf2_iterations,
        }
    }

    pub fn chunk_codec(&self) -> SnapfileResult<ChunkCodec> {
        Ok(ChunkCodec::new(self.chunk_size)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// First reconnect delay in milliseconds (default: 500)
    pub backoff_base_ms: u64,
    /// Automatic reconnects stop once the delay reaches this (default: 60)
    pub backoff_ceiling_secs: u64,
}

impl SyncConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_ceiling(&self) -> Duration {
        Duration::from_secs(self.backoff_ceiling_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Where downloads land when no directory is given
    pub download_dir: PathBuf,
    /// Read size for upload sources in bytes (default: 1 MiB)
    pub read_buffer_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Identity + cookie JSON file
    pub identity_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".into(),
            enforce_tls: false,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: KdfParams::default().iterations,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 500,
            backoff_ceiling_secs: 60,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("."),
            read_buffer_size: 1024 * 1024,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            identity_file: PathBuf::from("~/.local/share/snapfile/identity.json"),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[server]
url = "https://snap.example.com"
enforce_tls = true

[crypto]
pbkdf2_iterations = 600000
chunk_size = 1048576

[sync]
backoff_base_ms = 250
backoff_ceiling_secs = 30

[transfer]
download_dir = "/tmp/downloads"
read_buffer_size = 65536

[session]
identity_file = "/tmp/identity.json"

[log]
level = "debug"
format = "json"
"#;
        let config: SnapfileConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.server.url, "https://snap.example.com");
        assert!(config.server.enforce_tls);
        assert_eq!(config.crypto.pbkdf2_iterations, 600_000);
        assert_eq!(config.crypto.chunk_size, 1 << 20);
        assert_eq!(config.sync.backoff_base(), Duration::from_millis(250));
        assert_eq!(config.sync.backoff_ceiling(), Duration::from_secs(30));
        assert_eq!(config.transfer.download_dir, PathBuf::from("/tmp/downloads"));
        assert_eq!(config.transfer.read_buffer_size, 65536);
        assert_eq!(config.session.identity_file, PathBuf::from("/tmp/identity.json"));
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, "json");
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_defaults() {
        let config: SnapfileConfig = toml::from_str("").unwrap();

        assert_eq!(config.server.url, "http://localhost:8080");
        assert!(!config.server.enforce_tls);
        assert_eq!(config.crypto.pbkdf2_iterations, 480_000);
        assert_eq!(config.crypto.chunk_size, 64 * 1024 * 1024);
        assert_eq!(config.sync.backoff_base_ms, 500);
        assert_eq!(config.sync.backoff_ceiling_secs, 60);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, "text");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[crypto]
chunk_size = 4096
"#;
        let config: SnapfileConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.crypto.chunk_size, 4096);
        assert_eq!(config.crypto.chunk_codec().unwrap().chunk_size(), 4096);
        // Defaults
        assert_eq!(config.crypto.pbkdf2_iterations, 480_000);
        assert_eq!(config.server.url, "http://localhost:8080");
    }

    #[test]
    fn test_enforce_tls_rejects_http() {
        let config = SnapfileConfig {
            server: ServerConfig {
                url: "http://snap.example.com".into(),
                enforce_tls: true,
            },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SnapfileError::Config(_))));
    }

    #[test]
    fn test_http_allowed_without_enforce_tls() {
        SnapfileConfig::default().validate().unwrap();
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let config: SnapfileConfig = toml::from_str("[crypto]\nchunk_size = 0\n").unwrap();
        assert!(matches!(config.validate(), Err(SnapfileError::Config(_))));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = SnapfileConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: SnapfileConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.server.url, parsed.server.url);
        assert_eq!(config.crypto.chunk_size, parsed.crypto.chunk_size);
        assert_eq!(config.session.identity_file, parsed.session.identity_file);
    }

    #[test]
    fn test_expand_tilde_leaves_absolute_paths() {
        assert_eq!(expand_tilde(Path::new("/etc/x")), PathBuf::from("/etc/x"));
    }
}
