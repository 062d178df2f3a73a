//! Cross-backend laws: every backend must round-trip every supported value,
//! treat absent input as the empty token, and reject tampered ciphertext.

use std::fmt::Debug;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, FixedOffset, TimeZone, Timelike};
use continuation_token::{
    DataProtectorEncryption, Encryption, EphemeralDataProtectionProvider, EphemeralEnvelopeClient,
    KmsEnvelopeEncryption, SymmetricEncryption, TokenData,
};
use uuid::Uuid;

fn symmetric() -> SymmetricEncryption {
    SymmetricEncryption::new("correct horse", [1u8, 2, 3, 4, 5, 6, 7, 8], 4096)
}

fn protector() -> DataProtectorEncryption {
    DataProtectorEncryption::new(&EphemeralDataProtectionProvider::new())
}

fn envelope() -> KmsEnvelopeEncryption {
    KmsEnvelopeEncryption::new(Arc::new(EphemeralEnvelopeClient::new()), "test")
}

async fn assert_round_trips<T>(enc: &dyn Encryption<T>, value: T)
where
    T: TokenData + PartialEq + Debug,
{
    let sealed = enc.encrypt(Some(&value)).await.unwrap();
    assert!(
        !sealed.is_empty(),
        "successful non-empty encryption must never yield the empty string",
    );
    let opened = enc.decrypt(Some(&sealed)).await.unwrap();
    assert_eq!(opened, Some(value));
}

async fn assert_empty_laws<T>(enc: &dyn Encryption<T>)
where
    T: TokenData + PartialEq + Debug,
{
    assert_eq!(enc.encrypt(None).await.unwrap(), "");
    assert_eq!(enc.decrypt(None).await.unwrap(), None);
    assert_eq!(enc.decrypt(Some("")).await.unwrap(), None);
}

async fn assert_tamper_sensitive<T>(enc: &dyn Encryption<T>, value: T)
where
    T: TokenData + PartialEq + Debug,
{
    let sealed = enc.encrypt(Some(&value)).await.unwrap();
    let mut bytes = STANDARD.decode(&sealed).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0x01;
    let tampered = STANDARD.encode(bytes);

    assert!(
        enc.decrypt(Some(&tampered)).await.is_err(),
        "a flipped ciphertext byte must fail decryption, not yield a value",
    );
}

#[tokio::test]
async fn symmetric_round_trips_supported_types() {
    let enc = symmetric();
    assert_round_trips(&enc, 42i32).await;
    assert_round_trips(&enc, i64::MIN).await;
    assert_round_trips(&enc, u64::MAX).await;
    assert_round_trips(&enc, true).await;
    assert_round_trips(&enc, "after-page-9".to_owned()).await;
    assert_round_trips(&enc, Uuid::new_v4()).await;
}

#[tokio::test]
async fn protector_round_trips_supported_types() {
    let enc = protector();
    assert_round_trips(&enc, 42i32).await;
    assert_round_trips(&enc, i64::MIN).await;
    assert_round_trips(&enc, u64::MAX).await;
    assert_round_trips(&enc, false).await;
    assert_round_trips(&enc, "after-page-9".to_owned()).await;
    assert_round_trips(&enc, Uuid::new_v4()).await;
}

#[tokio::test]
async fn envelope_round_trips_supported_types() {
    let enc = envelope();
    assert_round_trips(&enc, 42i32).await;
    assert_round_trips(&enc, i64::MIN).await;
    assert_round_trips(&enc, u64::MAX).await;
    assert_round_trips(&enc, true).await;
    assert_round_trips(&enc, "after-page-9".to_owned()).await;
    assert_round_trips(&enc, Uuid::new_v4()).await;
}

#[tokio::test]
async fn all_backends_honor_the_empty_input_law() {
    assert_empty_laws::<i32>(&symmetric()).await;
    assert_empty_laws::<i32>(&protector()).await;
    assert_empty_laws::<i32>(&envelope()).await;
}

#[tokio::test]
async fn all_backends_reject_tampered_ciphertext() {
    assert_tamper_sensitive(&symmetric(), 42i32).await;
    assert_tamper_sensitive(&protector(), 42i32).await;
    assert_tamper_sensitive(&envelope(), 42i32).await;
}

#[tokio::test]
async fn timestamps_keep_offset_and_subsecond_precision() {
    let offset = FixedOffset::west_opt(7 * 3600).unwrap();
    let instant: DateTime<FixedOffset> = offset
        .with_ymd_and_hms(2022, 6, 1, 23, 59, 59)
        .unwrap()
        .with_nanosecond(987_654_321)
        .unwrap();

    for enc in [
        Box::new(symmetric()) as Box<dyn Encryption<DateTime<FixedOffset>>>,
        Box::new(protector()),
        Box::new(envelope()),
    ] {
        let sealed = enc.encrypt(Some(&instant)).await.unwrap();
        let opened = enc.decrypt(Some(&sealed)).await.unwrap().unwrap();
        assert_eq!(opened, instant);
        assert_eq!(opened.offset(), instant.offset());
        assert_eq!(
            opened.timestamp_subsec_nanos(),
            instant.timestamp_subsec_nanos(),
        );
    }
}

#[tokio::test]
async fn symmetric_concrete_scenario() {
    // password "correct horse", salt [1..=8], 4096 iterations, value 42.
    let enc = symmetric();

    let sealed = enc.encrypt(Some(&42i32)).await.unwrap();
    assert!(STANDARD.decode(&sealed).is_ok(), "ciphertext is plain Base64");
    assert_eq!(enc.decrypt(Some(&sealed)).await.unwrap(), Some(42i32));

    let mut corrupted = sealed.clone();
    let last = corrupted.pop().unwrap();
    corrupted.push(if last == 'A' { 'B' } else { 'A' });
    assert!(
        <SymmetricEncryption as Encryption<i32>>::decrypt(&enc, Some(&corrupted))
            .await
            .is_err()
    );
}
