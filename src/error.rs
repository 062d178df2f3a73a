//! Error taxonomy shared by the codec, the encryption backends, and the
//! binding adapter.
//!
//! Decryption failures carry enough structure for operators (logs, tests) but
//! deliberately little for callers: [`DecryptError::CipherFailure`] and
//! [`DecryptError::ContextMismatch`] render identically, and the binding
//! adapter collapses every variant into one [`InvalidToken`] message, so a
//! caller probing ciphertexts learns nothing about *why* a token failed.

use thiserror::Error;

use crate::encryption::kms::EnvelopeError;

/// Errors produced by the value codec.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The text does not parse as a value of the requested type.
    ///
    /// Types with no canonical string form cannot occur here: they simply do
    /// not implement [`TokenData`](crate::TokenData), so they are rejected
    /// when the binding is configured, not when a request arrives.
    #[error("`{input}` cannot be parsed as a value of type `{type_name}`")]
    Malformed {
        /// Name of the type that was requested.
        type_name: &'static str,
        /// The text that failed to parse.
        input: String,
        /// The parser's own error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl ConversionError {
    /// Build a [`ConversionError::Malformed`] for type `T`.
    pub(crate) fn malformed<T>(
        input: &str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConversionError::Malformed {
            type_name: std::any::type_name::<T>(),
            input: input.to_owned(),
            source: Box::new(source),
        }
    }
}

/// Errors produced when sealing a value into a token.
#[derive(Debug, Error)]
pub enum EncryptError {
    /// The local cipher call failed. Unreachable with a well-formed key.
    #[error("the value cannot be encrypted")]
    CipherFailure,

    /// The envelope-encryption service rejected the seal call.
    #[error("the value cannot be encrypted")]
    Envelope(#[source] EnvelopeError),
}

/// Errors produced when opening a token.
///
/// Malformed and forged tokens are expected adversarial input; none of these
/// variants should ever be turned into a crash or a 5xx-class failure.
#[derive(Debug, Error)]
pub enum DecryptError {
    /// The encrypted value is not valid Base64.
    #[error("the encrypted value is in a bad format")]
    BadFormat(#[source] base64::DecodeError),

    /// The cipher, protector, or key-management call failed.
    // Same message as ContextMismatch: the pair must stay indistinguishable
    // from the outside.
    #[error("the value cannot be decrypted")]
    CipherFailure,

    /// The encryption context does not name the deployed environment.
    #[error("the value cannot be decrypted")]
    ContextMismatch,

    /// The decrypted plaintext is not UTF-8 or does not parse as the
    /// requested type.
    #[error("the decrypted value cannot be converted into the requested type")]
    ConversionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// The single user-visible outcome of a failed token bind.
///
/// The underlying [`DecryptError`] is retained as a source for logging; the
/// display form never varies.
#[derive(Debug, Error)]
#[error("continuation token is invalid")]
pub struct InvalidToken(#[source] pub DecryptError);
