//! Canonical, locale-independent string conversion for token payloads.
//!
//! Every encryption backend passes values through [`TokenData`] before
//! sealing and after opening, so the representation must be identical no
//! matter which machine or locale encodes or decodes it. Resolution is
//! static: a type is eligible for token binding exactly when it implements
//! the trait, which moves "is there a converter for `T`?" from request time
//! to compile time.

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use uuid::Uuid;

use crate::error::ConversionError;

/// A value that can ride inside a continuation token.
///
/// Law: `TokenData::decode(&v.encode()) == Ok(v)` for every representable
/// `v`. Encoding is infallible; only decoding of untrusted text can fail.
pub trait TokenData: Sized + Send + Sync {
    /// Convert the value to its canonical invariant string form.
    fn encode(&self) -> String;

    /// Parse the canonical string form back into a value.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError::Malformed`] if `text` does not parse.
    fn decode(text: &str) -> Result<Self, ConversionError>;
}

macro_rules! impl_token_data_via_str {
    ($($ty:ty),* $(,)?) => {$(
        impl TokenData for $ty {
            fn encode(&self) -> String {
                self.to_string()
            }

            fn decode(text: &str) -> Result<Self, ConversionError> {
                text.parse::<$ty>()
                    .map_err(|e| ConversionError::malformed::<$ty>(text, e))
            }
        }
    )*};
}

impl_token_data_via_str!(
    i8, i16, i32, i64, i128, u8, u16, u32, u64, u128, f32, f64, bool, char, String, Uuid,
);

// Timestamps are the one type whose "default" textual form is a trap: the
// obvious `Display` output is not guaranteed to parse back, and a lossy
// round trip here silently corrupts cursors. RFC 3339 with the full offset
// and sub-second digits is the round-trippable form.
impl TokenData for DateTime<FixedOffset> {
    fn encode(&self) -> String {
        self.to_rfc3339_opts(SecondsFormat::AutoSi, false)
    }

    fn decode(text: &str) -> Result<Self, ConversionError> {
        DateTime::parse_from_rfc3339(text)
            .map_err(|e| ConversionError::malformed::<DateTime<FixedOffset>>(text, e))
    }
}

impl TokenData for DateTime<Utc> {
    fn encode(&self) -> String {
        self.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    fn decode(text: &str) -> Result<Self, ConversionError> {
        DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| ConversionError::malformed::<DateTime<Utc>>(text, e))
    }
}
