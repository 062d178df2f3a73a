//! Platform data-protection backend.
//!
//! The platform protector is treated as a capability: `protect` and
//! `unprotect`, both fallible, internals out of scope. Integrity checking
//! and key rotation are the protector's problem; this backend only wires the
//! value codec to it and pins the purpose string.

use std::sync::Arc;

use aes_gcm_siv::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    Aes256GcmSiv, Nonce,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use tracing::error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::codec::TokenData;
use crate::encryption::{decode_plaintext, Encryption};
use crate::error::{DecryptError, EncryptError};

/// Purpose string under which this backend creates its protector.
///
/// Tokens protected under this purpose are cryptographically isolated from
/// any other use of the same key material, and bumping the version suffix
/// deliberately invalidates every previously issued token when the encoding
/// scheme changes.
pub const PROTECTOR_PURPOSE: &str = "continuation-token.v2";

/// Errors produced by a [`DataProtector`].
#[derive(Debug, Error)]
pub enum ProtectorError {
    /// The payload could not be protected.
    #[error("the payload cannot be protected")]
    Protect,

    /// The protected payload is malformed, tampered with, or was protected
    /// under a different purpose or key.
    #[error("the protected payload cannot be opened")]
    Unprotect,
}

/// An opaque protect/unprotect capability.
///
/// Implementations are expected to be integrity-checked and
/// key-rotation-aware; both are outside this crate's responsibility.
pub trait DataProtector: Send + Sync {
    /// Protect a plaintext payload, yielding an opaque printable string.
    ///
    /// # Errors
    ///
    /// Returns [`ProtectorError::Protect`] if the platform call fails.
    fn protect(&self, plaintext: &[u8]) -> Result<String, ProtectorError>;

    /// Open a protected string back into the original payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtectorError::Unprotect`] on any format, integrity, or
    /// key problem.
    fn unprotect(&self, protected: &str) -> Result<Vec<u8>, ProtectorError>;
}

/// A factory for purpose-isolated [`DataProtector`] instances.
pub trait DataProtectionProvider {
    /// Create a protector whose outputs are cryptographically bound to
    /// `purpose`.
    fn create_protector(&self, purpose: &str) -> Arc<dyn DataProtector>;
}

/// Continuation-token encryption that delegates to a platform protector.
pub struct DataProtectorEncryption {
    protector: Arc<dyn DataProtector>,
}

impl DataProtectorEncryption {
    /// Create a backend, obtaining its protector under
    /// [`PROTECTOR_PURPOSE`] from the given provider.
    pub fn new(provider: &dyn DataProtectionProvider) -> Self {
        DataProtectorEncryption {
            protector: provider.create_protector(PROTECTOR_PURPOSE),
        }
    }
}

impl std::fmt::Debug for DataProtectorEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataProtectorEncryption").finish_non_exhaustive()
    }
}

#[async_trait]
impl<T: TokenData> Encryption<T> for DataProtectorEncryption {
    async fn encrypt(&self, value: Option<&T>) -> Result<String, EncryptError> {
        let Some(value) = value else {
            return Ok(String::new());
        };

        let plaintext = value.encode();
        self.protector.protect(plaintext.as_bytes()).map_err(|e| {
            error!(error = %e, "platform protector failed to protect a token payload");
            EncryptError::CipherFailure
        })
    }

    async fn decrypt(&self, ciphertext: Option<&str>) -> Result<Option<T>, DecryptError> {
        let Some(ciphertext) = ciphertext.filter(|ct| !ct.is_empty()) else {
            return Ok(None);
        };

        // Protector failures and conversion failures are distinguished in
        // logs only; the caller sees one decryption-failure kind either way.
        let plaintext = self.protector.unprotect(ciphertext).map_err(|e| {
            error!(error = %e, "platform protector failed to open a token payload");
            DecryptError::CipherFailure
        })?;

        decode_plaintext(plaintext).map(Some)
    }
}

/// Per-purpose subkey for the ephemeral provider.
#[derive(Zeroize, ZeroizeOnDrop)]
struct SubKey([u8; 32]);

/// In-process [`DataProtectionProvider`] with a random, non-persisted root
/// key, for tests and local development.
///
/// Every instance invents a fresh root key, so nothing protected by one
/// instance can ever be opened by another; production deployments supply a
/// real platform provider instead. Per-purpose subkeys are derived as
/// HMAC-SHA256(root, purpose), and payloads are sealed with AES-256-GCM-SIV
/// under a fresh random nonce as `base64(nonce || ciphertext)`.
pub struct EphemeralDataProtectionProvider {
    root: SubKey,
}

impl EphemeralDataProtectionProvider {
    /// Create a provider with a freshly generated root key.
    pub fn new() -> Self {
        let mut root = [0u8; 32];
        OsRng.fill_bytes(&mut root);
        EphemeralDataProtectionProvider { root: SubKey(root) }
    }
}

impl Default for EphemeralDataProtectionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EphemeralDataProtectionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.write_str("EphemeralDataProtectionProvider([REDACTED])")
    }
}

impl DataProtectionProvider for EphemeralDataProtectionProvider {
    fn create_protector(&self, purpose: &str) -> Arc<dyn DataProtector> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.root.0)
            .expect("HMAC accepts keys of any length");
        mac.update(purpose.as_bytes());
        let subkey: [u8; 32] = mac.finalize().into_bytes().into();
        Arc::new(EphemeralProtector { key: SubKey(subkey) })
    }
}

/// Number of nonce bytes prefixed to each ephemeral protected payload.
const NONCE_LEN: usize = 12;

struct EphemeralProtector {
    key: SubKey,
}

impl DataProtector for EphemeralProtector {
    fn protect(&self, plaintext: &[u8]) -> Result<String, ProtectorError> {
        let cipher =
            Aes256GcmSiv::new_from_slice(&self.key.0).map_err(|_| ProtectorError::Protect)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| ProtectorError::Protect)?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(payload))
    }

    fn unprotect(&self, protected: &str) -> Result<Vec<u8>, ProtectorError> {
        let payload = STANDARD
            .decode(protected)
            .map_err(|_| ProtectorError::Unprotect)?;
        if payload.len() <= NONCE_LEN {
            return Err(ProtectorError::Unprotect);
        }
        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);

        let cipher =
            Aes256GcmSiv::new_from_slice(&self.key.0).map_err(|_| ProtectorError::Unprotect)?;
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| ProtectorError::Unprotect)
    }
}
