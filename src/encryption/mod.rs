//! The [`Encryption`] contract and its three interchangeable backends.
//!
//! All backends speak the same language: a present value becomes a non-empty
//! Base64 ciphertext string, an absent value becomes the empty string, and
//! decryption inverts that mapping or fails with a
//! [`DecryptError`](crate::DecryptError). What differs is key management:
//!
//! - [`symmetric::SymmetricEncryption`] — a key derived locally from a
//!   password, salt, and iteration count.
//! - [`protector::DataProtectorEncryption`] — an opaque platform
//!   protect/unprotect capability with purpose-string isolation.
//! - [`kms::KmsEnvelopeEncryption`] — envelope encryption through an
//!   external key-management service, with each ciphertext bound to the
//!   deploying environment.
//!
//! A backend is selected once at configuration time and shared for the
//! service's lifetime (`Arc<dyn Encryption<T>>`); encrypt/decrypt calls are
//! free of shared mutable state beyond one-time key derivation.

pub mod kms;
pub mod protector;
pub mod symmetric;

use async_trait::async_trait;
use tracing::error;

use crate::codec::TokenData;
use crate::error::{DecryptError, EncryptError};

/// Encryption and decryption of continuation-token payloads.
#[async_trait]
pub trait Encryption<T: TokenData>: Send + Sync {
    /// Encrypt a value to an opaque Base64 string.
    ///
    /// An absent value maps to the empty string without touching the cipher;
    /// a successful non-empty encryption never yields the empty string.
    ///
    /// # Errors
    ///
    /// Returns [`EncryptError`] if the cipher or key-management call fails.
    async fn encrypt(&self, value: Option<&T>) -> Result<String, EncryptError>;

    /// Decrypt an opaque Base64 string back to a value.
    ///
    /// An absent or empty input maps to `Ok(None)` without touching the
    /// cipher.
    ///
    /// # Errors
    ///
    /// Returns [`DecryptError`] on any tamper, format, context, or
    /// conversion problem. Failures are never silently mapped to `None`:
    /// an invalid token must not masquerade as an empty one.
    async fn decrypt(&self, ciphertext: Option<&str>) -> Result<Option<T>, DecryptError>;
}

/// Shared tail of every backend's decrypt path: UTF-8 then codec decode,
/// with the failure logged at the point of occurrence.
pub(crate) fn decode_plaintext<T: TokenData>(plaintext: Vec<u8>) -> Result<T, DecryptError> {
    let text = String::from_utf8(plaintext).map_err(|e| {
        error!(value_type = std::any::type_name::<T>(), error = %e, "can't convert a token into a value: plaintext is not UTF-8");
        DecryptError::ConversionFailed(Box::new(e))
    })?;

    T::decode(&text).map_err(|e| {
        error!(value_type = std::any::type_name::<T>(), error = %e, "can't convert a token into a value of this type");
        DecryptError::ConversionFailed(Box::new(e))
    })
}
