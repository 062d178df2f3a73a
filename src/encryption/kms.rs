//! KMS envelope backend: authenticated envelope encryption with each
//! ciphertext bound to the deploying environment.
//!
//! The backend never holds raw key material. An [`EnvelopeClient`] owns key
//! wrapping and unwrapping; this module only supplies plaintext bytes and the
//! encryption context, and validates the context that comes back.
//!
//! # Envelope format
//!
//! `seal` emits a JSON envelope produced by the client itself:
//!
//! ```text
//! { "wrapped_key": <b64>, "nonce": <b64>, "context": {..}, "ciphertext": <b64> }
//! ```
//!
//! The data key is wrapped by the key-management service with the encryption
//! context, and the context is additionally bound to the local AEAD as
//! associated data, so neither half of the envelope can be swapped or edited
//! without detection. The backend itself adds only the outer Base64.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use aes_gcm_siv::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng, Payload},
    Aes256GcmSiv, Nonce,
};
use async_trait::async_trait;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::types::DataKeySpec;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;
use zeroize::Zeroizing;

use crate::codec::TokenData;
use crate::encryption::{decode_plaintext, Encryption};
use crate::error::{DecryptError, EncryptError};

/// Context key that names the environment a token was sealed in.
pub const ENVIRONMENT_CONTEXT_KEY: &str = "Environment";

/// Byte length of a data key.
const DATA_KEY_LEN: usize = 32;

/// Byte length of an AES-GCM-SIV nonce.
const NONCE_LEN: usize = 12;

/// Errors produced by an [`EnvelopeClient`].
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The key-management service call failed.
    #[error("key management service call failed")]
    Kms(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The service returned no data key material.
    #[error("key management service returned no data key")]
    MissingDataKey,

    /// The data key has the wrong length.
    #[error("data key has unexpected length: {0} bytes")]
    BadDataKey(usize),

    /// The envelope payload does not parse.
    #[error("envelope payload is malformed")]
    Malformed,

    /// Local authenticated encryption or decryption failed.
    #[error("aead operation failed")]
    Aead,
}

/// Inputs to [`EnvelopeClient::seal`].
#[derive(Debug, Clone)]
pub struct SealRequest {
    /// The plaintext to protect.
    pub plaintext: Vec<u8>,
    /// Cleartext key-value pairs cryptographically bound to the envelope.
    pub encryption_context: HashMap<String, String>,
}

/// Output of [`EnvelopeClient::seal`].
#[derive(Debug, Clone)]
pub struct SealOutput {
    /// The complete envelope, ready for transport encoding.
    pub ciphertext: Vec<u8>,
}

/// Output of [`EnvelopeClient::open`].
#[derive(Debug, Clone)]
pub struct OpenOutput {
    /// The recovered plaintext.
    pub plaintext: Vec<u8>,
    /// The authenticated encryption context the envelope was sealed with.
    pub encryption_context: HashMap<String, String>,
}

/// External envelope-encryption capability.
///
/// `open` must return the encryption context only if it is authenticated by
/// the envelope; callers rely on it for environment binding.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EnvelopeClient: Send + Sync {
    /// Seal a plaintext under a fresh wrapped data key.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError`] if key generation or encryption fails.
    async fn seal(&self, request: SealRequest) -> Result<SealOutput, EnvelopeError>;

    /// Open an envelope, recovering plaintext and authenticated context.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError`] on any format, key-unwrap, or
    /// authentication failure.
    async fn open(&self, ciphertext: Vec<u8>) -> Result<OpenOutput, EnvelopeError>;
}

/// Serialized envelope body.
#[derive(Debug, Serialize, Deserialize)]
struct EnvelopeMessage {
    wrapped_key: String,
    nonce: String,
    context: HashMap<String, String>,
    ciphertext: String,
}

impl EnvelopeMessage {
    fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|_| EnvelopeError::Malformed)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(|_| EnvelopeError::Malformed)
    }
}

/// Deterministic byte form of an encryption context, fed to the AEAD as
/// associated data. Keys are sorted so insertion order cannot matter.
fn context_aad(context: &HashMap<String, String>) -> Vec<u8> {
    let mut aad = Vec::new();
    for (key, value) in context.iter().collect::<BTreeMap<_, _>>() {
        aad.extend_from_slice(key.as_bytes());
        aad.push(0);
        aad.extend_from_slice(value.as_bytes());
        aad.push(0);
    }
    aad
}

fn aead_seal(
    key: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<([u8; NONCE_LEN], Vec<u8>), EnvelopeError> {
    let cipher = Aes256GcmSiv::new_from_slice(key).map_err(|_| EnvelopeError::BadDataKey(key.len()))?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), Payload { msg: plaintext, aad })
        .map_err(|_| EnvelopeError::Aead)?;
    Ok((nonce_bytes, ciphertext))
}

fn aead_open(
    key: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EnvelopeError> {
    if nonce.len() != NONCE_LEN {
        return Err(EnvelopeError::Malformed);
    }
    let cipher = Aes256GcmSiv::new_from_slice(key).map_err(|_| EnvelopeError::BadDataKey(key.len()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| EnvelopeError::Aead)
}

/// [`EnvelopeClient`] backed by AWS KMS.
///
/// `seal` asks KMS for a fresh AES-256 data key generated under the
/// configured key with the encryption context; the plaintext half encrypts
/// the payload locally and is zeroed, while the wrapped half travels inside
/// the envelope. `open` sends the wrapped key back to KMS together with the
/// embedded context — KMS refuses to unwrap under a different context, and
/// the local AEAD check then re-verifies the context against the payload.
#[derive(Clone)]
pub struct KmsEnvelopeClient {
    kms: aws_sdk_kms::Client,
    key_id: String,
}

impl KmsEnvelopeClient {
    /// Create a client around an existing KMS client and key identifier
    /// (key ID, key ARN, or alias).
    pub fn new(kms: aws_sdk_kms::Client, key_id: impl Into<String>) -> Self {
        KmsEnvelopeClient {
            kms,
            key_id: key_id.into(),
        }
    }

    /// Create a client using the ambient AWS configuration (credential
    /// chain, region) of the process.
    pub async fn from_env(key_id: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(aws_sdk_kms::Client::new(&config), key_id)
    }
}

impl std::fmt::Debug for KmsEnvelopeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KmsEnvelopeClient")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EnvelopeClient for KmsEnvelopeClient {
    async fn seal(&self, request: SealRequest) -> Result<SealOutput, EnvelopeError> {
        let generated = self
            .kms
            .generate_data_key()
            .key_id(&self.key_id)
            .key_spec(DataKeySpec::Aes256)
            .set_encryption_context(Some(request.encryption_context.clone()))
            .send()
            .await
            .map_err(|e| EnvelopeError::Kms(Box::new(e)))?;

        let data_key = Zeroizing::new(
            generated
                .plaintext()
                .ok_or(EnvelopeError::MissingDataKey)?
                .as_ref()
                .to_vec(),
        );
        if data_key.len() != DATA_KEY_LEN {
            return Err(EnvelopeError::BadDataKey(data_key.len()));
        }
        let wrapped_key = generated
            .ciphertext_blob()
            .ok_or(EnvelopeError::MissingDataKey)?
            .as_ref()
            .to_vec();

        let aad = context_aad(&request.encryption_context);
        let (nonce, ciphertext) = aead_seal(&data_key, &request.plaintext, &aad)?;

        let message = EnvelopeMessage {
            wrapped_key: STANDARD.encode(wrapped_key),
            nonce: STANDARD.encode(nonce),
            context: request.encryption_context,
            ciphertext: STANDARD.encode(ciphertext),
        };
        Ok(SealOutput {
            ciphertext: message.to_bytes()?,
        })
    }

    async fn open(&self, ciphertext: Vec<u8>) -> Result<OpenOutput, EnvelopeError> {
        let message = EnvelopeMessage::from_bytes(&ciphertext)?;
        let wrapped_key = STANDARD
            .decode(&message.wrapped_key)
            .map_err(|_| EnvelopeError::Malformed)?;
        let nonce = STANDARD
            .decode(&message.nonce)
            .map_err(|_| EnvelopeError::Malformed)?;
        let body = STANDARD
            .decode(&message.ciphertext)
            .map_err(|_| EnvelopeError::Malformed)?;

        let unwrapped = self
            .kms
            .decrypt()
            .key_id(&self.key_id)
            .ciphertext_blob(Blob::new(wrapped_key))
            .set_encryption_context(Some(message.context.clone()))
            .send()
            .await
            .map_err(|e| EnvelopeError::Kms(Box::new(e)))?;

        let data_key = Zeroizing::new(
            unwrapped
                .plaintext()
                .ok_or(EnvelopeError::MissingDataKey)?
                .as_ref()
                .to_vec(),
        );
        if data_key.len() != DATA_KEY_LEN {
            return Err(EnvelopeError::BadDataKey(data_key.len()));
        }

        let aad = context_aad(&message.context);
        let plaintext = aead_open(&data_key, &nonce, &body, &aad)?;

        Ok(OpenOutput {
            plaintext,
            encryption_context: message.context,
        })
    }
}

/// In-process [`EnvelopeClient`] with a random, non-persisted key-encryption
/// key, for tests and local development.
///
/// Data keys are wrapped locally under the instance's root key instead of by
/// a remote service; the envelope format and context binding are identical
/// to [`KmsEnvelopeClient`].
pub struct EphemeralEnvelopeClient {
    root: Zeroizing<[u8; DATA_KEY_LEN]>,
}

impl EphemeralEnvelopeClient {
    /// Create a client with a freshly generated key-encryption key.
    pub fn new() -> Self {
        let mut root = [0u8; DATA_KEY_LEN];
        OsRng.fill_bytes(&mut root);
        EphemeralEnvelopeClient {
            root: Zeroizing::new(root),
        }
    }
}

impl Default for EphemeralEnvelopeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EphemeralEnvelopeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.write_str("EphemeralEnvelopeClient([REDACTED])")
    }
}

#[async_trait]
impl EnvelopeClient for EphemeralEnvelopeClient {
    async fn seal(&self, request: SealRequest) -> Result<SealOutput, EnvelopeError> {
        let mut data_key = Zeroizing::new([0u8; DATA_KEY_LEN]);
        OsRng.fill_bytes(&mut data_key[..]);

        let aad = context_aad(&request.encryption_context);
        let (nonce, ciphertext) = aead_seal(&data_key[..], &request.plaintext, &aad)?;

        // Wrap the data key under the root key, context-bound like KMS does.
        let (wrap_nonce, wrapped) = aead_seal(&self.root[..], &data_key[..], &aad)?;
        let mut wrapped_key = Vec::with_capacity(NONCE_LEN + wrapped.len());
        wrapped_key.extend_from_slice(&wrap_nonce);
        wrapped_key.extend_from_slice(&wrapped);

        let message = EnvelopeMessage {
            wrapped_key: STANDARD.encode(wrapped_key),
            nonce: STANDARD.encode(nonce),
            context: request.encryption_context,
            ciphertext: STANDARD.encode(ciphertext),
        };
        Ok(SealOutput {
            ciphertext: message.to_bytes()?,
        })
    }

    async fn open(&self, ciphertext: Vec<u8>) -> Result<OpenOutput, EnvelopeError> {
        let message = EnvelopeMessage::from_bytes(&ciphertext)?;
        let wrapped_key = STANDARD
            .decode(&message.wrapped_key)
            .map_err(|_| EnvelopeError::Malformed)?;
        let nonce = STANDARD
            .decode(&message.nonce)
            .map_err(|_| EnvelopeError::Malformed)?;
        let body = STANDARD
            .decode(&message.ciphertext)
            .map_err(|_| EnvelopeError::Malformed)?;

        if wrapped_key.len() <= NONCE_LEN {
            return Err(EnvelopeError::Malformed);
        }
        let (wrap_nonce, wrapped) = wrapped_key.split_at(NONCE_LEN);

        let aad = context_aad(&message.context);
        let data_key = Zeroizing::new(aead_open(&self.root[..], wrap_nonce, wrapped, &aad)?);
        if data_key.len() != DATA_KEY_LEN {
            return Err(EnvelopeError::BadDataKey(data_key.len()));
        }

        let plaintext = aead_open(&data_key, &nonce, &body, &aad)?;
        Ok(OpenOutput {
            plaintext,
            encryption_context: message.context,
        })
    }
}

/// Continuation-token encryption via envelope encryption, with environment
/// binding.
pub struct KmsEnvelopeEncryption {
    client: Arc<dyn EnvelopeClient>,
    environment: String,
}

impl KmsEnvelopeEncryption {
    /// Create a backend around an envelope client, binding every token to
    /// `environment`.
    pub fn new(client: Arc<dyn EnvelopeClient>, environment: impl Into<String>) -> Self {
        KmsEnvelopeEncryption {
            client,
            environment: environment.into(),
        }
    }

    /// The environment name tokens are bound to.
    pub fn environment(&self) -> &str {
        &self.environment
    }
}

impl std::fmt::Debug for KmsEnvelopeEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KmsEnvelopeEncryption")
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T: TokenData> Encryption<T> for KmsEnvelopeEncryption {
    async fn encrypt(&self, value: Option<&T>) -> Result<String, EncryptError> {
        let Some(value) = value else {
            return Ok(String::new());
        };

        let plaintext = value.encode();
        let encryption_context = HashMap::from([(
            ENVIRONMENT_CONTEXT_KEY.to_owned(),
            self.environment.clone(),
        )]);

        let sealed = self
            .client
            .seal(SealRequest {
                plaintext: plaintext.into_bytes(),
                encryption_context,
            })
            .await
            .map_err(|e| {
                error!(value_type = std::any::type_name::<T>(), error = %e, "can't seal a value into a token");
                EncryptError::Envelope(e)
            })?;

        Ok(STANDARD.encode(sealed.ciphertext))
    }

    async fn decrypt(&self, ciphertext: Option<&str>) -> Result<Option<T>, DecryptError> {
        let Some(ciphertext) = ciphertext.filter(|ct| !ct.is_empty()) else {
            return Ok(None);
        };

        let cipherbytes = STANDARD.decode(ciphertext).map_err(|e| {
            error!(error = %e, "token is not valid Base64");
            DecryptError::BadFormat(e)
        })?;

        let opened = self.client.open(cipherbytes).await.map_err(|e| {
            error!(error = %e, "envelope client failed to open a token");
            DecryptError::CipherFailure
        })?;

        // A token minted in one environment must not open in another, even
        // when the cipher call itself succeeded.
        match opened.encryption_context.get(ENVIRONMENT_CONTEXT_KEY) {
            Some(environment) if environment == &self.environment => {}
            found => {
                error!(
                    environment = ?found,
                    expected = %self.environment,
                    "token's encryption context environment failed to match the deployed environment",
                );
                return Err(DecryptError::ContextMismatch);
            }
        }

        decode_plaintext(opened.plaintext).map(Some)
    }
}
