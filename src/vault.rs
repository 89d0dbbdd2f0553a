//! Envelope encryption for integration credentials.
//!
//! Stored form: `base64(nonce[12] || ciphertext+tag)` under AES-256-GCM with
//! a fresh random nonce per write. The authentication tag makes the blob
//! tamper-evident: a flipped bit or a foreign key fails decryption outright
//! instead of yielding garbage plaintext.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use serde_json::{Map, Value};
use thiserror::Error;

/// Decrypted integration configuration: a string-keyed JSON object whose
/// schema is left to the provider.
pub type ConfigMap = Map<String, Value>;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption key misconfigured: {0}")]
    KeyMisconfigured(String),
    #[error("decryption failed: wrong key or tampered data")]
    DecryptionFailed,
    #[error("decrypted payload is not a config object")]
    MalformedPayload,
    #[error("encryption failed")]
    EncryptionFailed,
}

pub struct Vault {
    key: Vec<u8>,
}

impl Vault {
    /// Build a vault from configured key material. Base64 is tried first,
    /// raw bytes are the fallback; anything that is not exactly 32 bytes is
    /// rejected.
    pub fn open(key_material: &str) -> Result<Self, CryptoError> {
        if let Ok(decoded) = STANDARD.decode(key_material) {
            if decoded.len() == KEY_LEN {
                return Ok(Vault { key: decoded });
            }
        }
        let raw = key_material.as_bytes();
        if raw.len() == KEY_LEN {
            return Ok(Vault { key: raw.to_vec() });
        }
        Err(CryptoError::KeyMisconfigured(format!(
            "need {} bytes of key material, got {} raw",
            KEY_LEN,
            raw.len()
        )))
    }

    /// Encrypt a config map into its stored form.
    pub fn encrypt(&self, config: &ConfigMap) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut buf = Value::Object(config.clone()).to_string().into_bytes();
        self.aead_key()?
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut buf,
            )
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&buf);
        Ok(STANDARD.encode(combined))
    }

    /// Decrypt a stored blob back into a config map.
    pub fn decrypt(&self, blob: &str) -> Result<ConfigMap, CryptoError> {
        let combined = STANDARD
            .decode(blob)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        if combined.len() < NONCE_LEN {
            return Err(CryptoError::DecryptionFailed);
        }
        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        let mut buf = ciphertext.to_vec();
        let plain = self
            .aead_key()?
            .open_in_place(nonce, Aad::empty(), &mut buf)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        match serde_json::from_slice::<Value>(plain) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(CryptoError::MalformedPayload),
        }
    }

    fn aead_key(&self) -> Result<LessSafeKey, CryptoError> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.key)
            .map_err(|_| CryptoError::KeyMisconfigured("rejected by AES-256-GCM".into()))?;
        Ok(LessSafeKey::new(unbound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn b64_key(byte: u8) -> String {
        STANDARD.encode([byte; KEY_LEN])
    }

    fn sample_config() -> ConfigMap {
        let mut config = ConfigMap::new();
        config.insert("base_url".into(), json!("https://uisp.example.com"));
        config.insert("app_key".into(), json!("app-key-123"));
        config.insert("token".into(), json!("tok-456"));
        config
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let vault = Vault::open(&b64_key(7)).unwrap();
        let config = sample_config();
        let blob = vault.encrypt(&config).unwrap();
        assert_eq!(vault.decrypt(&blob).unwrap(), config);
    }

    #[test]
    fn raw_32_byte_key_accepted() {
        // 32 ASCII chars that also happen to decode as base64 to 24 bytes,
        // so the raw fallback is what makes this work.
        let vault = Vault::open("0123456789abcdef0123456789abcdef").unwrap();
        let config = sample_config();
        let blob = vault.encrypt(&config).unwrap();
        assert_eq!(vault.decrypt(&blob).unwrap(), config);
    }

    #[test]
    fn short_key_rejected() {
        assert!(matches!(
            Vault::open("too-short"),
            Err(CryptoError::KeyMisconfigured(_))
        ));
    }

    #[test]
    fn fresh_nonce_per_encrypt() {
        let vault = Vault::open(&b64_key(7)).unwrap();
        let config = sample_config();
        assert_ne!(
            vault.encrypt(&config).unwrap(),
            vault.encrypt(&config).unwrap()
        );
    }

    #[test]
    fn tampered_blob_rejected() {
        let vault = Vault::open(&b64_key(7)).unwrap();
        let blob = vault.encrypt(&sample_config()).unwrap();
        let mut chars: Vec<char> = blob.chars().collect();
        let mid = chars.len() / 2;
        chars[mid] = if chars[mid] == 'A' { 'B' } else { 'A' };
        let tampered: String = chars.into_iter().collect();
        assert_eq!(vault.decrypt(&tampered), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn wrong_key_rejected() {
        let blob = Vault::open(&b64_key(7))
            .unwrap()
            .encrypt(&sample_config())
            .unwrap();
        let other = Vault::open(&b64_key(8)).unwrap();
        assert_eq!(other.decrypt(&blob), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn truncated_blob_rejected() {
        let vault = Vault::open(&b64_key(7)).unwrap();
        let blob = vault.encrypt(&sample_config()).unwrap();
        assert_eq!(vault.decrypt(&blob[..8]), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn non_object_payload_rejected() {
        // Sealed by hand so the plaintext is valid JSON but not an object.
        let vault = Vault::open(&b64_key(7)).unwrap();
        let nonce = [9u8; 12];
        let mut buf = b"[1,2,3]".to_vec();
        vault
            .aead_key()
            .unwrap()
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce),
                Aad::empty(),
                &mut buf,
            )
            .unwrap();
        let mut combined = nonce.to_vec();
        combined.extend_from_slice(&buf);
        assert_eq!(
            vault.decrypt(&STANDARD.encode(combined)),
            Err(CryptoError::MalformedPayload)
        );
    }
}
