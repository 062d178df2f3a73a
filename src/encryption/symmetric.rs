//! Local symmetric-key backend: PBKDF2-derived key material and
//! AES-256-GCM-SIV.
//!
//! **Algorithm choice:** AES-256-GCM-SIV (RFC 8452) is nonce-misuse-resistant,
//! so encrypting under the fixed per-instance derived nonce is safe and
//! deterministic: the same value always yields the same token. The AEAD tag
//! also makes any ciphertext tampering a hard authentication failure rather
//! than garbage plaintext.

use std::sync::OnceLock;

use aes_gcm_siv::{
    aead::{Aead, KeyInit},
    Aes256GcmSiv, Nonce,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use tracing::error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::codec::TokenData;
use crate::config::TokenOptions;
use crate::encryption::{decode_plaintext, Encryption};
use crate::error::{DecryptError, EncryptError};

/// Byte length of the derived AES-256 key.
const KEY_LEN: usize = 32;

/// Byte length of the derived AES-GCM-SIV nonce.
const NONCE_LEN: usize = 12;

/// Key material stretched once from the password, then cached.
#[derive(Zeroize, ZeroizeOnDrop)]
struct DerivedKeys {
    key: [u8; KEY_LEN],
    nonce: [u8; NONCE_LEN],
}

impl std::fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.write_str("DerivedKeys([REDACTED])")
    }
}

/// Symmetric continuation-token encryption under a password-derived key.
///
/// Key and nonce are derived by PBKDF2-HMAC-SHA256 on first use and memoized
/// for the instance's lifetime. The `OnceLock` serializes concurrent first
/// uses; the derivation is deterministic, so whichever caller wins publishes
/// the same bits every loser would have computed.
pub struct SymmetricEncryption {
    password: String,
    salt: Vec<u8>,
    iterations: u32,
    derived: OnceLock<DerivedKeys>,
}

impl std::fmt::Debug for SymmetricEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Password and salt never appear in debug output.
        f.debug_struct("SymmetricEncryption")
            .field("iterations", &self.iterations)
            .field("derived", &self.derived)
            .finish_non_exhaustive()
    }
}

impl SymmetricEncryption {
    /// Create a backend from raw key-derivation inputs.
    pub fn new(password: impl Into<String>, salt: impl Into<Vec<u8>>, iterations: u32) -> Self {
        SymmetricEncryption {
            password: password.into(),
            salt: salt.into(),
            iterations,
            derived: OnceLock::new(),
        }
    }

    /// Create a backend from validated [`TokenOptions`].
    pub fn from_options(options: &TokenOptions) -> Self {
        Self::new(
            options.password.clone(),
            options.salt.as_bytes(),
            options.iterations,
        )
    }

    fn derived(&self) -> &DerivedKeys {
        self.derived.get_or_init(|| {
            // One 44-byte stretch, split into key and nonce, exactly once
            // per instance.
            let mut okm = [0u8; KEY_LEN + NONCE_LEN];
            pbkdf2_hmac::<Sha256>(
                self.password.as_bytes(),
                &self.salt,
                self.iterations,
                &mut okm,
            );

            let mut key = [0u8; KEY_LEN];
            let mut nonce = [0u8; NONCE_LEN];
            key.copy_from_slice(&okm[..KEY_LEN]);
            nonce.copy_from_slice(&okm[KEY_LEN..]);
            okm.zeroize();

            DerivedKeys { key, nonce }
        })
    }

    fn cipher(&self) -> Result<Aes256GcmSiv, EncryptError> {
        Aes256GcmSiv::new_from_slice(&self.derived().key).map_err(|_| EncryptError::CipherFailure)
    }
}

#[async_trait]
impl<T: TokenData> Encryption<T> for SymmetricEncryption {
    async fn encrypt(&self, value: Option<&T>) -> Result<String, EncryptError> {
        let Some(value) = value else {
            return Ok(String::new());
        };

        let plaintext = value.encode();
        let cipher = self.cipher()?;
        let nonce = Nonce::from_slice(&self.derived().nonce);
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| EncryptError::CipherFailure)?;

        Ok(STANDARD.encode(ciphertext))
    }

    async fn decrypt(&self, ciphertext: Option<&str>) -> Result<Option<T>, DecryptError> {
        let Some(ciphertext) = ciphertext.filter(|ct| !ct.is_empty()) else {
            return Ok(None);
        };

        let cipherbytes = STANDARD.decode(ciphertext).map_err(DecryptError::BadFormat)?;

        let cipher = Aes256GcmSiv::new_from_slice(&self.derived().key)
            .map_err(|_| DecryptError::CipherFailure)?;
        let nonce = Nonce::from_slice(&self.derived().nonce);
        let plaintext = cipher
            .decrypt(nonce, cipherbytes.as_ref())
            // Authentication and decryption failures collapse into one
            // variant: which stage failed is an oracle for attackers.
            .map_err(|_| {
                error!("symmetric decryption failed: ciphertext does not authenticate");
                DecryptError::CipherFailure
            })?;

        decode_plaintext(plaintext).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> SymmetricEncryption {
        SymmetricEncryption::new("correct horse", [1u8, 2, 3, 4, 5, 6, 7, 8], 4096)
    }

    #[tokio::test]
    async fn encrypts_forty_two_and_gets_it_back() {
        let enc = backend();
        let sealed = enc.encrypt(Some(&42i32)).await.unwrap();
        assert!(!sealed.is_empty());

        let opened: Option<i32> = enc.decrypt(Some(&sealed)).await.unwrap();
        assert_eq!(opened, Some(42));
    }

    #[tokio::test]
    async fn corrupting_the_last_character_fails_decryption() {
        let enc = backend();
        let sealed = enc.encrypt(Some(&42i32)).await.unwrap();

        let mut corrupted = sealed.clone();
        let last = corrupted.pop().unwrap();
        corrupted.push(if last == 'A' { 'B' } else { 'A' });

        let result = <SymmetricEncryption as Encryption<i32>>::decrypt(&enc, Some(&corrupted)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn absent_and_empty_inputs_short_circuit() {
        let enc = backend();
        assert_eq!(enc.encrypt(None::<&i32>).await.unwrap(), "");
        assert_eq!(
            <SymmetricEncryption as Encryption<i32>>::decrypt(&enc, None).await.unwrap(),
            None
        );
        assert_eq!(
            <SymmetricEncryption as Encryption<i32>>::decrypt(&enc, Some("")).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn invalid_base64_is_a_bad_format_error() {
        let enc = backend();
        let result = <SymmetricEncryption as Encryption<i32>>::decrypt(&enc, Some("!not base64!")).await;
        assert!(matches!(result, Err(DecryptError::BadFormat(_))));
    }

    #[tokio::test]
    async fn different_password_cannot_open_the_token() {
        let enc = backend();
        let other = SymmetricEncryption::new("incorrect horse", [1u8, 2, 3, 4, 5, 6, 7, 8], 4096);

        let sealed = enc.encrypt(Some(&42i32)).await.unwrap();
        let result = <SymmetricEncryption as Encryption<i32>>::decrypt(&other, Some(&sealed)).await;
        assert!(matches!(result, Err(DecryptError::CipherFailure)));
    }

    #[tokio::test]
    async fn encryption_is_deterministic_per_instance() {
        // Fixed derived nonce + GCM-SIV: the same value yields the same token.
        let enc = backend();
        let first = enc.encrypt(Some(&7i64)).await.unwrap();
        let second = enc.encrypt(Some(&7i64)).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn valid_ciphertext_of_wrong_type_is_a_conversion_failure() {
        let enc = backend();
        let sealed = enc.encrypt(Some(&"not a number".to_owned())).await.unwrap();
        let result = <SymmetricEncryption as Encryption<i32>>::decrypt(&enc, Some(&sealed)).await;
        assert!(matches!(result, Err(DecryptError::ConversionFailed(_))));
    }

    #[test]
    fn derived_keys_are_redacted_in_debug() {
        let enc = backend();
        enc.derived();
        assert!(format!("{enc:?}").contains("REDACTED"));
    }
}
