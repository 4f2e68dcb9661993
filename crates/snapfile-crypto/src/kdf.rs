//! Key derivation: passcode → PBKDF2-HMAC-SHA256 → AES-256-GCM session key

use pbkdf2::pbkdf2_hmac;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::{KEY_SIZE, SALT_LENGTH};

/// A 256-bit AES-GCM key derived from the folder passcode.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct SessionKey {
    bytes: [u8; KEY_SIZE],
}

impl SessionKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// PBKDF2 parameters
#[derive(Debug, Clone)]
pub struct KdfParams {
    /// HMAC-SHA256 iterations (default: 480000)
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: 480_000,
        }
    }
}

/// Salt for a passcode: the first 16 bytes of SHA-256(passcode).
///
/// Every client holding the passcode arrives at the same salt, so no salt has
/// to be stored or exchanged.
pub fn derive_salt(passcode: &str) -> [u8; SALT_LENGTH] {
    let digest = Sha256::digest(passcode.as_bytes());
    let mut salt = [0u8; SALT_LENGTH];
    salt.copy_from_slice(&digest[..SALT_LENGTH]);
    salt
}

/// Derive the session key from a passcode.
///
/// Deterministic: the same passcode always yields the same key. CPU-bound;
/// call from a blocking thread inside an async runtime.
pub fn derive_key(passcode: &SecretString, params: &KdfParams) -> Result<SessionKey, CryptoError> {
    let passcode = passcode.expose_secret();
    if passcode.is_empty() {
        return Err(CryptoError::KeyDerivation("passcode is empty".into()));
    }
    if params.iterations == 0 {
        return Err(CryptoError::KeyDerivation(
            "PBKDF2 iteration count must be non-zero".into(),
        ));
    }

    let mut salt = derive_salt(passcode);
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(passcode.as_bytes(), &salt, params.iterations, &mut key);
    salt.zeroize();

    tracing::debug!(iterations = params.iterations, "session key derived");
    Ok(SessionKey::from_bytes(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> KdfParams {
        KdfParams { iterations: 1_000 }
    }

    #[test]
    fn test_kdf_deterministic() {
        let passcode = SecretString::from("hunter2");

        let key1 = derive_key(&passcode, &fast()).unwrap();
        let key2 = derive_key(&passcode, &fast()).unwrap();

        assert_eq!(
            key1.as_bytes(),
            key2.as_bytes(),
            "KDF must be deterministic"
        );
    }

    #[test]
    fn test_kdf_different_passcodes() {
        let key1 = derive_key(&SecretString::from("passcode-a"), &fast()).unwrap();
        let key2 = derive_key(&SecretString::from("passcode-b"), &fast()).unwrap();

        assert_ne!(
            key1.as_bytes(),
            key2.as_bytes(),
            "different passcodes must produce different keys"
        );
    }

    #[test]
    fn test_salt_is_sha256_prefix() {
        // SHA-256("abc") = ba7816bf 8f01cfea 414140de 5dae2223 ...
        let salt = derive_salt("abc");
        assert_eq!(
            salt,
            [
                0xba, 0x78, 0x16, 0xbf, 0x8f, 0x01, 0xcf, 0xea, 0x41, 0x41, 0x40, 0xde, 0x5d, 0xae,
                0x22, 0x23
            ]
        );
    }

    #[test]
    fn test_pbkdf2_known_vector() {
        // RFC 7914 §11: PBKDF2-HMAC-SHA256("passwd", "salt", 1, 64), first 32 bytes
        let mut out = [0u8; 32];
        pbkdf2_hmac::<Sha256>(b"passwd", b"salt", 1, &mut out);
        assert_eq!(
            out[..8],
            [0x55, 0xac, 0x04, 0x6e, 0x56, 0xe3, 0x08, 0x9f]
        );
    }

    #[test]
    fn test_empty_passcode_rejected() {
        let result = derive_key(&SecretString::from(""), &fast());
        assert!(matches!(result, Err(CryptoError::KeyDerivation(_))));
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let result = derive_key(&SecretString::from("x"), &KdfParams { iterations: 0 });
        assert!(matches!(result, Err(CryptoError::KeyDerivation(_))));
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = SessionKey::from_bytes([7u8; KEY_SIZE]);
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains('7'));
    }
}
