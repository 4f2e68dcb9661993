//! Per-chunk AES-256-GCM framing shared by the stream encryptor and decryptor
//!
//! Encrypted stream format (binary):
//! ```text
//! [12 bytes: IV][CHUNK_SIZE bytes ciphertext][16 bytes tag] ... [≤CHUNK_SIZE bytes ciphertext][16 bytes tag]
//! ```
//!
//! Every chunk of one stream is sealed under the same IV and no AAD. Chunk
//! position is authenticated only by the fixed-size framing, so the format
//! depends on the transport delivering the body in order and complete.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

use crate::error::CryptoError;
use crate::kdf::SessionKey;
use crate::{DEFAULT_CHUNK_SIZE, IV_LENGTH, TAG_LENGTH};

/// Chunk framing parameters for one encrypted stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkCodec {
    chunk_size: usize,
}

impl Default for ChunkCodec {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ChunkCodec {
    /// Codec with a custom plaintext chunk size. Both ends of a transfer must
    /// agree on it.
    pub fn new(chunk_size: usize) -> Result<Self, CryptoError> {
        if chunk_size == 0 {
            return Err(CryptoError::InvalidChunkSize);
        }
        Ok(Self { chunk_size })
    }

    /// Plaintext bytes per full chunk
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Ciphertext bytes per full chunk (plaintext + tag)
    pub fn encrypted_chunk_size(&self) -> usize {
        self.chunk_size + TAG_LENGTH
    }

    /// Number of chunks a plaintext of `plain_len` bytes is split into.
    pub fn chunk_count(&self, plain_len: u64) -> u64 {
        plain_len.div_ceil(self.chunk_size as u64)
    }

    /// Total encrypted stream length for a plaintext of `plain_len` bytes.
    ///
    /// Empty input produces an empty stream (no IV).
    pub fn encrypted_len(&self, plain_len: u64) -> u64 {
        if plain_len == 0 {
            return 0;
        }
        IV_LENGTH as u64 + plain_len + TAG_LENGTH as u64 * self.chunk_count(plain_len)
    }

    /// Generate a fresh random stream IV.
    pub fn generate_iv() -> [u8; IV_LENGTH] {
        let mut iv = [0u8; IV_LENGTH];
        rand::thread_rng().fill_bytes(&mut iv);
        iv
    }

    /// Encrypt one chunk. Returns `[ciphertext][16-byte tag]`.
    pub fn encrypt_chunk(
        &self,
        key: &SessionKey,
        iv: &[u8; IV_LENGTH],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        seal(key, iv, plaintext)
    }

    /// Decrypt one chunk (`[ciphertext][16-byte tag]`).
    pub fn decrypt_chunk(
        &self,
        key: &SessionKey,
        iv: &[u8; IV_LENGTH],
        encrypted: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        open(key, iv, encrypted)
    }
}

/// AES-256-GCM seal with the given IV, no AAD.
pub(crate) fn seal(
    key: &SessionKey,
    iv: &[u8; IV_LENGTH],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        // only reachable for plaintexts beyond GCM's 64 GiB per-invocation limit
        .map_err(|_| CryptoError::MalformedEnvelope("plaintext too large for AES-GCM".into()))
}

/// AES-256-GCM open with the given IV, no AAD.
pub(crate) fn open(
    key: &SessionKey,
    iv: &[u8; IV_LENGTH],
    encrypted: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if encrypted.len() < TAG_LENGTH {
        return Err(CryptoError::Authentication);
    }
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .decrypt(Nonce::from_slice(iv), encrypted)
        .map_err(|_| CryptoError::Authentication)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SessionKey {
        SessionKey::from_bytes([42u8; 32])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let codec = ChunkCodec::default();
        let iv = ChunkCodec::generate_iv();
        let plaintext = b"hello, encrypted world!";

        let encrypted = codec.encrypt_chunk(&test_key(), &iv, plaintext).unwrap();
        let decrypted = codec.decrypt_chunk(&test_key(), &iv, &encrypted).unwrap();

        assert_eq!(&decrypted, plaintext);
    }

    #[test]
    fn test_encrypted_size() {
        let codec = ChunkCodec::default();
        let iv = ChunkCodec::generate_iv();
        let encrypted = codec.encrypt_chunk(&test_key(), &iv, &[0u8; 1000]).unwrap();

        // plaintext (1000) + tag (16); the IV travels separately
        assert_eq!(encrypted.len(), 1000 + TAG_LENGTH);
    }

    #[test]
    fn test_decrypt_wrong_key() {
        let codec = ChunkCodec::default();
        let iv = ChunkCodec::generate_iv();
        let encrypted = codec.encrypt_chunk(&test_key(), &iv, b"secret").unwrap();

        let other = SessionKey::from_bytes([1u8; 32]);
        let result = codec.decrypt_chunk(&other, &iv, &encrypted);
        assert!(matches!(result, Err(CryptoError::Authentication)));
    }

    #[test]
    fn test_decrypt_wrong_iv() {
        let codec = ChunkCodec::default();
        let iv = [0u8; IV_LENGTH];
        let encrypted = codec.encrypt_chunk(&test_key(), &iv, b"secret").unwrap();

        let result = codec.decrypt_chunk(&test_key(), &[1u8; IV_LENGTH], &encrypted);
        assert!(matches!(result, Err(CryptoError::Authentication)));
    }

    #[test]
    fn test_tampered_tag() {
        let codec = ChunkCodec::default();
        let iv = ChunkCodec::generate_iv();
        let mut encrypted = codec.encrypt_chunk(&test_key(), &iv, b"secret data").unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x01;

        let result = codec.decrypt_chunk(&test_key(), &iv, &encrypted);
        assert!(matches!(result, Err(CryptoError::Authentication)));
    }

    #[test]
    fn test_shorter_than_tag() {
        let codec = ChunkCodec::default();
        let result = codec.decrypt_chunk(&test_key(), &[0u8; IV_LENGTH], &[0u8; 5]);
        assert!(matches!(result, Err(CryptoError::Authentication)));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(matches!(
            ChunkCodec::new(0),
            Err(CryptoError::InvalidChunkSize)
        ));
    }

    #[test]
    fn test_encrypted_len() {
        let codec = ChunkCodec::new(64).unwrap();
        assert_eq!(codec.encrypted_len(0), 0);
        assert_eq!(codec.encrypted_len(1), 12 + 1 + 16);
        assert_eq!(codec.encrypted_len(64), 12 + 64 + 16);
        assert_eq!(codec.encrypted_len(150), 12 + 150 + 3 * 16);
        assert_eq!(codec.chunk_count(150), 3);
    }
}
