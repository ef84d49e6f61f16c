use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm,
    Nonce,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::Rng;

#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("Failed to decode key: {0}")]
    InvalidKey(String),
    #[error("Encryption failed")]
    Encrypt,
    #[error("Decryption failed")]
    Decrypt,
    #[error("Invalid encrypted data")]
    Malformed,
}

/// AES-256-GCM for OAuth tokens at rest. Output is base64(nonce || ciphertext).
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    pub fn from_base64_key(encoded_key: &str) -> Result<Self, EncryptionError> {
        let key = BASE64.decode(encoded_key.trim())
            .map_err(|e| EncryptionError::InvalidKey(e.to_string()))?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| EncryptionError::InvalidKey(format!("expected 32 bytes, got {}", key.len())))?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, token: &str) -> Result<String, EncryptionError> {
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self.cipher
            .encrypt(nonce, token.as_bytes())
            .map_err(|_| EncryptionError::Encrypt)?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(ciphertext);
        Ok(BASE64.encode(combined))
    }

    pub fn decrypt(&self, encrypted: &str) -> Result<String, EncryptionError> {
        let encrypted_data = BASE64.decode(encrypted)
            .map_err(|_| EncryptionError::Malformed)?;
        if encrypted_data.len() < 12 {
            return Err(EncryptionError::Malformed);
        }

        let (nonce_bytes, ciphertext) = encrypted_data.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| EncryptionError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|_| EncryptionError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

    #[test]
    fn encrypt_then_decrypt() {
        let cipher = TokenCipher::from_base64_key(KEY).unwrap();
        let sealed = cipher.encrypt("ya29.token").unwrap();
        assert_ne!(sealed, "ya29.token");
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "ya29.token");
    }

    #[test]
    fn nonces_differ_between_calls() {
        let cipher = TokenCipher::from_base64_key(KEY).unwrap();
        assert_ne!(cipher.encrypt("same").unwrap(), cipher.encrypt("same").unwrap());
    }

    #[test]
    fn short_key_is_rejected() {
        assert!(matches!(
            TokenCipher::from_base64_key("AAAA"),
            Err(EncryptionError::InvalidKey(_))
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let cipher = TokenCipher::from_base64_key(KEY).unwrap();
        let mut raw = BASE64.decode(cipher.encrypt("secret").unwrap()).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        assert!(matches!(cipher.decrypt(&BASE64.encode(raw)), Err(EncryptionError::Decrypt)));
        assert!(matches!(cipher.decrypt("%%%"), Err(EncryptionError::Malformed)));
    }
}
