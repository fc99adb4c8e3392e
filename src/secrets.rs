//! Secrets port: authenticated encryption for stored token material.
//!
//! Connection rows carry OAuth tokens only as [`Ciphertext`]; the engine
//! decrypts inside the narrow scope that hands a token to a provider call
//! and re-encrypts before anything is persisted.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};

use crate::models::Ciphertext;

/// Encrypt/decrypt opaque token blobs.
///
/// Implementations must be authenticated encryption; the engine treats the
/// ciphertext as opaque and never logs plaintext.
pub trait TokenCipher: Send + Sync {
    fn encrypt(&self, plaintext: &SecretString) -> Result<Ciphertext>;
    fn decrypt(&self, ciphertext: &Ciphertext) -> Result<SecretString>;
}

/// Passphrase-based cipher using age's scrypt recipient.
///
/// Ciphertext is the age binary stream, base64-encoded so it stores as text.
pub struct AgeTokenCipher {
    passphrase: SecretString,
}

impl AgeTokenCipher {
    pub fn new(passphrase: SecretString) -> Self {
        Self { passphrase }
    }
}

impl TokenCipher for AgeTokenCipher {
    fn encrypt(&self, plaintext: &SecretString) -> Result<Ciphertext> {
        let recipient = age::scrypt::Recipient::new(self.passphrase.clone());
        let encrypted = age::encrypt(&recipient, plaintext.expose_secret().as_bytes())
            .context("Failed to encrypt token")?;
        Ok(Ciphertext::new(BASE64.encode(encrypted)))
    }

    fn decrypt(&self, ciphertext: &Ciphertext) -> Result<SecretString> {
        let raw = BASE64
            .decode(ciphertext.as_str())
            .context("Ciphertext is not valid base64")?;
        let identity = age::scrypt::Identity::new(self.passphrase.clone());
        let decrypted = age::decrypt(&identity, &raw).context("Failed to decrypt token")?;
        let plaintext =
            String::from_utf8(decrypted).context("Decrypted token is not valid UTF-8")?;
        Ok(SecretString::new(plaintext.into()))
    }
}
