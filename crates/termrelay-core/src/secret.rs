//! AES-256-GCM encryption for stored connection secrets.
//!
//! Ciphertext layout: `base64(nonce || ciphertext || tag)` with a random
//! 12-byte nonce. Values stored in config carry an `enc:` prefix.

use crate::error::SecretError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use rand::RngCore;

/// Prefix marking an encrypted secret in configuration.
pub const ENCRYPTED_PREFIX: &str = "enc:";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretCipher(<redacted>)")
    }
}

impl SecretCipher {
    /// Build a cipher from a passphrase-style key. Short keys are right-padded
    /// with `'0'` and long keys truncated to 32 bytes.
    pub fn from_key(key: &str) -> Result<Self, SecretError> {
        if key.is_empty() {
            return Err(SecretError::EmptyKey);
        }
        let mut bytes = key.as_bytes().to_vec();
        bytes.resize(KEY_LEN, b'0');
        let cipher = Aes256Gcm::new_from_slice(&bytes).map_err(|_| SecretError::EmptyKey)?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, SecretError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| SecretError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(B64.encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, SecretError> {
        let raw = B64.decode(encoded.trim()).map_err(|_| SecretError::Encoding)?;
        if raw.len() < NONCE_LEN {
            return Err(SecretError::Truncated);
        }
        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| SecretError::Decrypt)?;
        String::from_utf8(plain).map_err(|_| SecretError::Utf8)
    }

    /// Decrypt `stored` if it carries the `enc:` prefix, otherwise return it as is.
    pub fn reveal(cipher: Option<&SecretCipher>, stored: &str) -> Result<String, SecretError> {
        match stored.strip_prefix(ENCRYPTED_PREFIX) {
            Some(encoded) => cipher.ok_or(SecretError::EmptyKey)?.decrypt(encoded),
            None => Ok(stored.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_then_decrypt() {
        let cipher = SecretCipher::from_key("correct horse battery staple").unwrap();
        let sealed = cipher.encrypt("hunter2").unwrap();
        assert_ne!(sealed, "hunter2");
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "hunter2");
    }

    #[test]
    fn test_nonce_is_random() {
        let cipher = SecretCipher::from_key("k").unwrap();
        assert_ne!(cipher.encrypt("same").unwrap(), cipher.encrypt("same").unwrap());
    }

    #[test]
    fn test_short_key_is_padded_consistently() {
        let a = SecretCipher::from_key("short").unwrap();
        let b = SecretCipher::from_key("short000000000000000000000000000").unwrap();
        let sealed = a.encrypt("x").unwrap();
        assert_eq!(b.decrypt(&sealed).unwrap(), "x");
    }

    #[test]
    fn test_long_key_is_truncated() {
        let a = SecretCipher::from_key(&"k".repeat(40)).unwrap();
        let b = SecretCipher::from_key(&"k".repeat(32)).unwrap();
        assert_eq!(b.decrypt(&a.encrypt("x").unwrap()).unwrap(), "x");
    }

    #[test]
    fn test_wrong_key_fails() {
        let a = SecretCipher::from_key("one").unwrap();
        let b = SecretCipher::from_key("two").unwrap();
        assert_eq!(b.decrypt(&a.encrypt("x").unwrap()), Err(SecretError::Decrypt));
    }

    #[test]
    fn test_bad_ciphertext() {
        let cipher = SecretCipher::from_key("k").unwrap();
        assert_eq!(cipher.decrypt("not base64!"), Err(SecretError::Encoding));
        assert_eq!(cipher.decrypt("AAAA"), Err(SecretError::Truncated));
    }

    #[test]
    fn test_empty_key_rejected() {
        assert_eq!(SecretCipher::from_key("").unwrap_err(), SecretError::EmptyKey);
    }

    #[test]
    fn test_reveal() {
        let cipher = SecretCipher::from_key("k").unwrap();
        let stored = format!("{}{}", ENCRYPTED_PREFIX, cipher.encrypt("pw").unwrap());
        assert_eq!(SecretCipher::reveal(Some(&cipher), &stored).unwrap(), "pw");
        assert_eq!(SecretCipher::reveal(None, "plain").unwrap(), "plain");
        assert_eq!(
            SecretCipher::reveal(None, &stored),
            Err(SecretError::EmptyKey)
        );
    }
}
