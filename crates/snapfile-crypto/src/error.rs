use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key material unusable or KDF parameters rejected. Fatal to the session.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// AEAD tag mismatch: wrong key, corrupted data, or tampering.
    #[error("authentication failed: wrong key, corrupted data, or tampering")]
    Authentication,

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Input ended before a complete IV was received.
    #[error("encrypted stream truncated: {buffered} byte(s) buffered, no complete IV")]
    TruncatedStream { buffered: usize },

    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
}

/// Error yielded by [`crate::EncryptingStream`] and [`crate::DecryptingStream`].
///
/// Keeps cryptographic failures apart from failures of the byte source, so a
/// download can tell "decryption failed" from "connection dropped".
#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("stream source failed: {0}")]
    Source(Box<dyn std::error::Error + Send + Sync>),
}

impl StreamError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, StreamError::Crypto(CryptoError::Authentication))
    }
}
