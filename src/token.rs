//! [`ContinuationToken`]: the decoded-value / opaque-string pair handed
//! back and forth across the service boundary.

use serde::{Serialize, Serializer};

use crate::codec::TokenData;

/// An encrypted continuation point of a scan of a dataset.
///
/// A token is produced in exactly two ways: the canonical empty token
/// ([`ContinuationToken::empty`]), or a successful decrypt-and-convert of a
/// caller-supplied opaque string. It is immutable afterwards.
///
/// The opaque string is retained verbatim so the token can be echoed back to
/// the caller without re-encrypting; it is never reinterpreted or re-derived.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContinuationToken<T> {
    value: Option<T>,
    opaque: String,
}

impl<T> ContinuationToken<T> {
    /// The canonical empty token: no value, and an opaque string that is
    /// exactly the empty string.
    pub fn empty() -> Self {
        ContinuationToken {
            value: None,
            opaque: String::new(),
        }
    }

    /// Construct a token from a successfully decrypted value and the opaque
    /// string that produced it.
    pub fn new(value: T, opaque: String) -> Self {
        ContinuationToken {
            value: Some(value),
            opaque,
        }
    }

    /// The decoded value, if this token is non-empty.
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Consume the token, yielding the decoded value.
    pub fn into_value(self) -> Option<T> {
        self.value
    }

    /// The original opaque string exactly as received.
    pub fn opaque(&self) -> &str {
        &self.opaque
    }

    /// `true` for the canonical empty token.
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }
}

impl<T> Default for ContinuationToken<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: TokenData> std::fmt::Display for ContinuationToken<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            Some(v) => f.write_str(&v.encode()),
            None => Ok(()),
        }
    }
}

/// Tokens serialize as their bare opaque string, so a response struct can
/// embed one directly as a JSON cursor field.
impl<T> Serialize for ContinuationToken<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.opaque)
    }
}
