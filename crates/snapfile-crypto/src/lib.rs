//! snapfile-crypto: Client-side E2E encryption for snapfile
//!
//! One AES-256-GCM key per session, derived from the folder passcode:
//! ```text
//! passcode ──SHA-256[0..16]──► salt
//! passcode + salt ──PBKDF2-HMAC-SHA256 (480k)──► SessionKey
//!   ├── text envelope: base64( IV(12) ‖ ciphertext ‖ tag(16) ), fresh IV per message
//!   └── file stream:   IV(12) ‖ chunk₀ ‖ chunk₁ ‖ … ‖ chunkₙ, one IV per stream
//!                      chunkᵢ = AES-GCM(CHUNK_SIZE plaintext bytes) ‖ tag(16)
//! ```
//!
//! File streams are processed in constant memory: the encryptor and decryptor
//! hold at most one chunk plus one input fragment.

pub mod chunk;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod stream;

pub use chunk::ChunkCodec;
pub use envelope::{decrypt_text, encrypt_text};
pub use error::{CryptoError, StreamError};
pub use kdf::{derive_key, derive_salt, KdfParams, SessionKey};
pub use stream::{
    ChunkDecryptor, ChunkEncryptor, DecryptingStream, EncryptingStream, ProgressFn,
};

/// Size of a session key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM IV (96-bit)
pub const IV_LENGTH: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_LENGTH: usize = 16;

/// Size of the passcode-derived salt
pub const SALT_LENGTH: usize = 16;

/// Default plaintext bytes per file chunk (64 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024 * 1024;
