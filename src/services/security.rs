use crate::constants::buffers::{CRYPTO_IV_SIZE, CRYPTO_KEY_SIZE, CRYPTO_TAG_SIZE};
use crate::errors::{BrokerError, BrokerResult};
use crate::utils::fs_atomic::atomic_write_text_file;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::Aes256Gcm;
use base64::Engine;
use rand::RngCore;
use std::fs;
use std::path::Path;
use zeroize::Zeroizing;

fn decode_key(raw: &str) -> Option<Zeroizing<Vec<u8>>> {
    let trimmed = raw.trim();
    let decoded = if trimmed.len() == CRYPTO_KEY_SIZE * 2 {
        hex::decode(trimmed).ok()?
    } else if trimmed.len() == CRYPTO_KEY_SIZE {
        trimmed.as_bytes().to_vec()
    } else if trimmed.len() > CRYPTO_KEY_SIZE * 2 {
        base64::engine::general_purpose::STANDARD
            .decode(trimmed.as_bytes())
            .ok()?
    } else {
        return None;
    };
    (decoded.len() == CRYPTO_KEY_SIZE).then(|| Zeroizing::new(decoded))
}

/// AES-256-GCM sealing for values at rest. Ciphertext is `<iv>:<tag>:<data>`
/// in hex.
#[derive(Clone)]
pub struct Security {
    cipher: Aes256Gcm,
}

impl Security {
    /// Uses `env_key` when it decodes to 32 bytes, otherwise the key stored at
    /// `key_path`, otherwise generates one and writes it there (mode 0600).
    pub fn load(env_key: Option<&str>, key_path: &Path) -> BrokerResult<Self> {
        let key = Self::load_or_create_key(env_key, key_path)?;
        Ok(Self::from_key(&key))
    }

    pub fn from_key(key: &[u8]) -> Self {
        let key = aes_gcm::Key::<Aes256Gcm>::from_slice(key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    fn load_or_create_key(env_key: Option<&str>, path: &Path) -> BrokerResult<Zeroizing<Vec<u8>>> {
        if let Some(raw) = env_key {
            return decode_key(raw).ok_or_else(|| {
                BrokerError::invalid("ENCRYPTION_KEY must be 32 raw bytes, 64 hex chars or base64 of 32 bytes")
            });
        }

        if path.exists() {
            let stored = fs::read_to_string(path)
                .map_err(|err| BrokerError::store(format!("read key file {}: {}", path.display(), err)))?;
            return decode_key(&stored)
                .ok_or_else(|| BrokerError::store(format!("key file {} is malformed", path.display())));
        }

        let mut generated = Zeroizing::new(vec![0u8; CRYPTO_KEY_SIZE]);
        OsRng.fill_bytes(&mut generated);
        let encoded = Zeroizing::new(hex::encode(generated.as_slice()));
        atomic_write_text_file(path, &encoded, 0o600)
            .map_err(|err| BrokerError::store(format!("write key file {}: {}", path.display(), err)))?;
        Ok(generated)
    }

    pub fn encrypt(&self, text: &str) -> BrokerResult<String> {
        let mut iv = [0u8; CRYPTO_IV_SIZE];
        OsRng.fill_bytes(&mut iv);
        let nonce = aes_gcm::Nonce::from_slice(&iv);
        let mut ciphertext = self
            .cipher
            .encrypt(nonce, text.as_bytes())
            .map_err(|_| BrokerError::store("failed to encrypt secret payload"))?;
        if ciphertext.len() < CRYPTO_TAG_SIZE {
            return Err(BrokerError::store("failed to encrypt secret payload"));
        }
        let tag = ciphertext.split_off(ciphertext.len() - CRYPTO_TAG_SIZE);
        Ok(format!(
            "{}:{}:{}",
            hex::encode(iv),
            hex::encode(tag),
            hex::encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, payload: &str) -> BrokerResult<Zeroizing<String>> {
        let malformed = || BrokerError::store("invalid encrypted payload format");
        let parts: Vec<&str> = payload.split(':').collect();
        if parts.len() != 3 {
            return Err(malformed());
        }
        let iv = hex::decode(parts[0]).map_err(|_| malformed())?;
        let tag = hex::decode(parts[1]).map_err(|_| malformed())?;
        let data = hex::decode(parts[2]).map_err(|_| malformed())?;
        if iv.len() != CRYPTO_IV_SIZE || tag.len() != CRYPTO_TAG_SIZE {
            return Err(malformed());
        }
        let mut combined = Vec::with_capacity(data.len() + tag.len());
        combined.extend_from_slice(&data);
        combined.extend_from_slice(&tag);
        let nonce = aes_gcm::Nonce::from_slice(&iv);
        let decrypted = self.cipher.decrypt(nonce, combined.as_ref()).map_err(|_| {
            BrokerError::store(
                "failed to decrypt secret payload; ENCRYPTION_KEY (or the key file) does not match the one used to encrypt",
            )
        })?;
        String::from_utf8(decrypted)
            .map(Zeroizing::new)
            .map_err(|_| BrokerError::store("decrypted secret is not valid UTF-8"))
    }
}
