//! Framework-neutral boundary between raw request strings and
//! [`ContinuationToken`]s.
//!
//! Whatever web framework hosts this crate, the contract is the same: an
//! absent or empty parameter is the empty token, a decryptable parameter is
//! a token, and anything else is a single user-visible validation failure.
//! Malformed and forged tokens are expected adversarial input — they are
//! logged and rejected, never allowed to crash a request.

use tracing::info;

use crate::codec::TokenData;
use crate::encryption::Encryption;
use crate::error::{EncryptError, InvalidToken};
use crate::token::ContinuationToken;

/// Bind a raw request value to a [`ContinuationToken`].
///
/// # Errors
///
/// Returns [`InvalidToken`] if the value is present, non-empty, and fails to
/// decrypt for any reason. The error's display form is always exactly
/// `continuation token is invalid`; the underlying cause goes to the log and
/// the error source chain only.
pub async fn bind<T: TokenData>(
    encryption: &dyn Encryption<T>,
    raw: Option<&str>,
) -> Result<ContinuationToken<T>, InvalidToken> {
    let Some(raw) = raw.filter(|r| !r.is_empty()) else {
        return Ok(ContinuationToken::empty());
    };

    match encryption.decrypt(Some(raw)).await {
        Ok(Some(value)) => Ok(ContinuationToken::new(value, raw.to_owned())),
        // Unreachable for non-empty input; kept total rather than panicking.
        Ok(None) => Ok(ContinuationToken::empty()),
        Err(e) => {
            info!(encrypted_value = raw, error = %e, "failed to decrypt continuation token");
            Err(InvalidToken(e))
        }
    }
}

/// Seal a value into the opaque string a response should carry.
///
/// `None` yields the empty string, the canonical "no further results"
/// cursor.
///
/// # Errors
///
/// Returns [`EncryptError`] if the backend's cipher or key-management call
/// fails.
pub async fn issue<T: TokenData>(
    encryption: &dyn Encryption<T>,
    value: Option<&T>,
) -> Result<String, EncryptError> {
    encryption.encrypt(value).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption::protector::{DataProtectorEncryption, EphemeralDataProtectionProvider};

    fn backend() -> DataProtectorEncryption {
        DataProtectorEncryption::new(&EphemeralDataProtectionProvider::new())
    }

    #[tokio::test]
    async fn absent_parameter_binds_to_the_empty_token() {
        let enc = backend();
        let token: ContinuationToken<i32> = bind(&enc, None).await.unwrap();
        assert!(token.is_empty());
    }

    #[tokio::test]
    async fn empty_parameter_binds_to_the_empty_token() {
        let enc = backend();
        let token: ContinuationToken<i32> = bind(&enc, Some("")).await.unwrap();
        assert!(token.is_empty());
        assert_eq!(token.opaque(), "");
    }

    #[tokio::test]
    async fn valid_parameter_binds_and_keeps_the_opaque_string() {
        let enc = backend();
        let cursor = issue(&enc, Some(&42i32)).await.unwrap();

        let token = bind(&enc, Some(cursor.as_str())).await.unwrap();
        assert_eq!(token.value(), Some(&42));
        assert_eq!(token.opaque(), cursor);
    }

    #[tokio::test]
    async fn garbage_is_one_opaque_validation_failure() {
        let enc = backend();
        let result: Result<ContinuationToken<i32>, _> =
            bind(&enc, Some("definitely-not-a-token")).await;

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "continuation token is invalid");
    }

    #[tokio::test]
    async fn issuing_none_yields_the_empty_cursor() {
        let enc = backend();
        assert_eq!(issue::<i32>(&enc, None).await.unwrap(), "");
    }
}
