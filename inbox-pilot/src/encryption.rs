//! Credential vault for stored mailbox app passwords
//!
//! Uses AES-256-GCM with a key derived (Argon2id) from a server secret
//! supplied through the environment. Ciphertext is stored as
//! base64(nonce || ciphertext); the GCM tag makes any tampering fail
//! decryption instead of producing a wrong plaintext.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::{Argon2, ParamsBuilder};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;
use tracing::debug;

use crate::error::AgentError;
use crate::types::MailCredential;

/// Application-specific salt for key derivation
const APP_SALT: &[u8] = b"inboxpilot.v1.credential.salt";

/// Nonce size for AES-GCM (96 bits / 12 bytes)
const NONCE_SIZE: usize = 12;

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("Failed to derive encryption key: {0}")]
    KeyDerivation(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Invalid encrypted data format: {0}")]
    InvalidFormat(String),

    #[error("Vault secret missing: {0}")]
    MissingSecret(String),
}

impl From<EncryptionError> for AgentError {
    fn from(e: EncryptionError) -> Self {
        AgentError::Credential(e.to_string())
    }
}

pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl CredentialVault {
    /// Build a vault from a raw 256-bit key.
    pub fn from_key(key: [u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    /// Derive the key from a server secret.
    pub fn from_secret(secret: &str) -> Result<Self, EncryptionError> {
        if secret.is_empty() {
            return Err(EncryptionError::MissingSecret("secret is empty".into()));
        }
        let key = Self::derive_key(secret.as_bytes())?;
        debug!("Initialized credential vault");
        Ok(Self::from_key(key))
    }

    /// Derive the key from the secret held in environment variable `var`.
    pub fn from_env(var: &str) -> Result<Self, EncryptionError> {
        let secret = std::env::var(var)
            .map_err(|_| EncryptionError::MissingSecret(format!("{} is not set", var)))?;
        Self::from_secret(&secret)
    }

    fn derive_key(secret: &[u8]) -> Result<[u8; 32], EncryptionError> {
        let mut output_key = [0u8; 32]; // AES-256 key size

        let params = ParamsBuilder::new()
            .m_cost(65536) // 64 MiB memory
            .t_cost(3)
            .p_cost(4)
            .build()
            .map_err(|e| {
                EncryptionError::KeyDerivation(format!("Failed to build Argon2 params: {}", e))
            })?;

        let argon2 = Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            params,
        );

        argon2
            .hash_password_into(secret, APP_SALT, &mut output_key)
            .map_err(|e| {
                EncryptionError::KeyDerivation(format!("Argon2 key derivation failed: {}", e))
            })?;

        Ok(output_key)
    }

    /// Encrypt a plaintext string.
    ///
    /// Returns a base64-encoded string containing: nonce || ciphertext
    pub fn encrypt(&self, plaintext: &str) -> Result<String, EncryptionError> {
        if plaintext.is_empty() {
            return Err(EncryptionError::Encryption(
                "Cannot encrypt empty plaintext".to_string(),
            ));
        }

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        use aes_gcm::aead::rand_core::RngCore;
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| EncryptionError::Encryption(format!("AES-GCM encryption failed: {}", e)))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(&combined))
    }

    /// Decrypt a base64-encoded nonce || ciphertext string.
    pub fn decrypt(&self, encrypted: &str) -> Result<String, EncryptionError> {
        if encrypted.is_empty() {
            return Err(EncryptionError::InvalidFormat(
                "Cannot decrypt empty string".to_string(),
            ));
        }

        let combined = BASE64.decode(encrypted).map_err(|e| {
            EncryptionError::InvalidFormat(format!("Invalid base64 encoding: {}", e))
        })?;

        if combined.len() <= NONCE_SIZE {
            return Err(EncryptionError::InvalidFormat(format!(
                "Encrypted data too short: {} bytes",
                combined.len()
            )));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext_bytes = self.cipher.decrypt(nonce, ciphertext).map_err(|e| {
            EncryptionError::Decryption(format!(
                "AES-GCM decryption failed (wrong key or corrupted data): {}",
                e
            ))
        })?;

        String::from_utf8(plaintext_bytes).map_err(|e| {
            EncryptionError::Decryption(format!("Decrypted data is not valid UTF-8: {}", e))
        })
    }

    /// Decrypt a stored app password into a credential for one run.
    pub fn open_credential(
        &self,
        username: &str,
        encrypted: &str,
    ) -> Result<MailCredential, EncryptionError> {
        let password = self.decrypt(encrypted)?;
        Ok(MailCredential::new(username, password))
    }
}
