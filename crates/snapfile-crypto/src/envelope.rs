//! One-shot text envelopes for chat messages
//!
//! Envelope format: `base64( [12 bytes: random IV][ciphertext][16 bytes tag] )`,
//! standard alphabet with padding.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::chunk::{open, seal, ChunkCodec};
use crate::error::CryptoError;
use crate::kdf::SessionKey;
use crate::{IV_LENGTH, TAG_LENGTH};

/// Encrypt a text message into a base64 envelope.
pub fn encrypt_text(key: &SessionKey, plaintext: &str) -> Result<String, CryptoError> {
    let iv = ChunkCodec::generate_iv();
    let ciphertext = seal(key, &iv, plaintext.as_bytes())?;

    let mut combined = Vec::with_capacity(IV_LENGTH + ciphertext.len());
    combined.extend_from_slice(&iv);
    combined.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(combined))
}

/// Decrypt a base64 envelope produced by [`encrypt_text`].
pub fn decrypt_text(key: &SessionKey, envelope: &str) -> Result<String, CryptoError> {
    let combined = STANDARD
        .decode(envelope.trim())
        .map_err(|e| CryptoError::MalformedEnvelope(format!("invalid base64: {e}")))?;

    if combined.len() < IV_LENGTH + TAG_LENGTH {
        return Err(CryptoError::MalformedEnvelope(format!(
            "envelope too short: {} bytes (minimum {})",
            combined.len(),
            IV_LENGTH + TAG_LENGTH
        )));
    }

    let (iv_bytes, ciphertext) = combined.split_at(IV_LENGTH);
    let mut iv = [0u8; IV_LENGTH];
    iv.copy_from_slice(iv_bytes);

    let plaintext = open(key, &iv, ciphertext)?;
    String::from_utf8(plaintext)
        .map_err(|_| CryptoError::MalformedEnvelope("plaintext is not valid UTF-8".into()))
}
