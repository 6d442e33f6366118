// Encryption of connection secrets at rest.
//
// AES-256-GCM with a key derived as SHA-256 of a single configured secret.
// Payload format: `ivHex:tagHex:cipherHex` with a 12-byte IV and 16-byte tag.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::api::middleware::AppError;
use crate::models::ConnectionConfig;

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretCipher(***)")
    }
}

impl SecretCipher {
    /// Derive the cipher key from `secret`
    pub fn from_secret(secret: &str) -> Result<Self, AppError> {
        if secret.is_empty() {
            return Err(AppError::Encryption("Encryption key must not be empty".to_string()));
        }
        let key = Sha256::digest(secret.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| AppError::Encryption(format!("Invalid key length: {}", e)))?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, AppError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| AppError::Encryption("Failed to encrypt value".to_string()))?;

        // aes-gcm appends the tag to the ciphertext
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        Ok(format!(
            "{}:{}:{}",
            hex::encode(nonce),
            hex::encode(tag),
            hex::encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, payload: &str) -> Result<String, AppError> {
        let mut parts = payload.split(':');
        let (Some(iv_hex), Some(tag_hex), Some(cipher_hex), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AppError::Encryption(
                "Encrypted value must have the form iv:tag:ciphertext".to_string(),
            ));
        };

        let iv = decode_hex(iv_hex, "IV")?;
        let tag = decode_hex(tag_hex, "auth tag")?;
        let mut sealed = decode_hex(cipher_hex, "ciphertext")?;
        if iv.len() != IV_LEN {
            return Err(AppError::Encryption(format!(
                "IV must be {} bytes, got {}",
                IV_LEN,
                iv.len()
            )));
        }
        if tag.len() != TAG_LEN {
            return Err(AppError::Encryption(format!(
                "Auth tag must be {} bytes, got {}",
                TAG_LEN,
                tag.len()
            )));
        }
        sealed.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_ref())
            .map_err(|_| {
                AppError::Encryption("Failed to decrypt value: wrong key or corrupted data".to_string())
            })?;

        String::from_utf8(plaintext)
            .map_err(|e| AppError::Encryption(format!("Decrypted value is not UTF-8: {}", e)))
    }

    /// Whether `value` has the shape of an encrypted payload
    pub fn is_encrypted(value: &str) -> bool {
        let parts: Vec<&str> = value.split(':').collect();
        parts.len() == 3
            && parts[0].len() == IV_LEN * 2
            && parts[1].len() == TAG_LEN * 2
            && parts.iter().all(|p| p.chars().all(|c| c.is_ascii_hexdigit()))
    }

    /// Copy of `config` with its secret fields encrypted
    pub fn seal_config(&self, config: &ConnectionConfig) -> Result<ConnectionConfig, AppError> {
        let mut sealed = config.clone();
        for field in secret_fields(&mut sealed) {
            if let Some(value) = field.as_deref() {
                if !Self::is_encrypted(value) {
                    *field = Some(self.encrypt(value)?);
                }
            }
        }
        Ok(sealed)
    }

    /// Copy of `config` with its secret fields decrypted
    pub fn open_config(&self, config: &ConnectionConfig) -> Result<ConnectionConfig, AppError> {
        let mut opened = config.clone();
        for field in secret_fields(&mut opened) {
            if let Some(value) = field.as_deref() {
                if Self::is_encrypted(value) {
                    *field = Some(self.decrypt(value)?);
                }
            }
        }
        Ok(opened)
    }
}

fn secret_fields(config: &mut ConnectionConfig) -> [&mut Option<String>; 3] {
    [
        &mut config.password,
        &mut config.api_key,
        &mut config.connection_string,
    ]
}

fn decode_hex(value: &str, what: &str) -> Result<Vec<u8>, AppError> {
    hex::decode(value).map_err(|e| AppError::Encryption(format!("Invalid {} hex: {}", what, e)))
}
