use snapfile_crypto::CryptoError;
use thiserror::Error;

pub type SnapfileResult<T> = Result<T, SnapfileError>;

#[derive(Debug, Error)]
pub enum SnapfileError {
    /// Passcode unusable or KDF parameters rejected. Ends the session.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// AEAD tag mismatch on a message or file chunk.
    #[error("decryption failed: {0}")]
    Authentication(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// HTTP 431: the folder's storage limit would be exceeded.
    #[error("storage quota exceeded")]
    QuotaExceeded,

    /// HTTP 413: the request body is larger than the server accepts.
    #[error("payload too large")]
    PayloadTooLarge,

    #[error("upload failed with status {status}: {message}")]
    UploadFailed { status: u16, message: String },

    #[error("unauthorized: log in again")]
    Unauthorized,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("cancelled")]
    Cancelled,

    #[error("not connected")]
    NotConnected,

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<CryptoError> for SnapfileError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::KeyDerivation(msg) => SnapfileError::KeyDerivation(msg),
            CryptoError::InvalidChunkSize => SnapfileError::Config(e.to_string()),
            CryptoError::Authentication
            | CryptoError::MalformedEnvelope(_)
            | CryptoError::TruncatedStream { .. } => SnapfileError::Authentication(e.to_string()),
        }
    }
}

impl SnapfileError {
    /// True for failures caused by the key or the ciphertext rather than the network.
    pub fn is_decryption_failure(&self) -> bool {
        matches!(self, SnapfileError::Authentication(_))
    }
}
