//! Encrypted, opaque continuation tokens.
//!
//! A service hands a [`ContinuationToken`] to an untrusted caller — as a
//! pagination cursor, say — and later accepts it back, recovering a
//! strongly-typed value the caller could not forge, tamper with, or read.
//!
//! Three interchangeable [`Encryption`] backends cover three key-management
//! strategies:
//!
//! - [`SymmetricEncryption`] — local AES-256-GCM-SIV under a
//!   PBKDF2-derived key.
//! - [`DataProtectorEncryption`] — a platform protect/unprotect capability
//!   with purpose-string isolation.
//! - [`KmsEnvelopeEncryption`] — envelope encryption via an external
//!   key-management service, with every token bound to the deploying
//!   environment.
//!
//! Pick one at configuration time, share it for the service's lifetime, and
//! use [`binding::bind`] / [`binding::issue`] at the request boundary:
//!
//! ```no_run
//! use continuation_token::{
//!     binding, ContinuationToken, DataProtectorEncryption, EphemeralDataProtectionProvider,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = EphemeralDataProtectionProvider::new();
//! let encryption = DataProtectorEncryption::new(&provider);
//!
//! // Response side: seal the cursor for the next page.
//! let cursor = binding::issue::<i64>(&encryption, Some(&42)).await?;
//!
//! // Request side: bind whatever the caller sent back.
//! let token: ContinuationToken<i64> = binding::bind(&encryption, Some(cursor.as_str())).await?;
//! assert_eq!(token.value(), Some(&42));
//! # Ok(())
//! # }
//! ```
//!
//! Decryption failures are expected adversarial input: they surface as one
//! opaque "continuation token is invalid" outcome, with the cause detailed
//! in logs only.

pub mod binding;
pub mod codec;
pub mod config;
pub mod encryption;
pub mod error;
pub mod token;

pub use codec::TokenData;
pub use config::TokenOptions;
pub use encryption::kms::{
    EnvelopeClient, EnvelopeError, EphemeralEnvelopeClient, KmsEnvelopeClient,
    KmsEnvelopeEncryption, OpenOutput, SealOutput, SealRequest, ENVIRONMENT_CONTEXT_KEY,
};
pub use encryption::protector::{
    DataProtectionProvider, DataProtector, DataProtectorEncryption,
    EphemeralDataProtectionProvider, ProtectorError, PROTECTOR_PURPOSE,
};
pub use encryption::symmetric::SymmetricEncryption;
pub use encryption::Encryption;
pub use error::{ConversionError, DecryptError, EncryptError, InvalidToken};
pub use token::ContinuationToken;
