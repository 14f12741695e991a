//! Column encodings shared by the repository implementations

use crate::StoreError;
use chrono::{DateTime, NaiveDate, Utc};

/// Identifier as 16 big-endian bytes
pub(crate) fn id_to_bytes(value: u128) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// 16 big-endian bytes back to the raw identifier value
pub(crate) fn bytes_to_id(bytes: &[u8]) -> Result<u128, StoreError> {
    let arr: [u8; 16] = bytes.try_into().map_err(|_| {
        StoreError::InvalidData(format!("Expected 16 bytes for id, got {}", bytes.len()))
    })?;
    Ok(u128::from_be_bytes(arr))
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::InvalidData(format!("Timestamp out of range: {}", ms)))
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| StoreError::InvalidData(format!("Invalid date {}: {}", s, e)))
}

pub(crate) fn to_count(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::InvalidData(format!("Count too large: {}", value)))
}

pub(crate) fn from_count(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::InvalidData(format!("Negative count: {}", value)))
}

/// Parse an enum column with the type's `parse` function
pub(crate) fn parse_enum<T>(
    s: &str,
    what: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, StoreError> {
    parse(s).ok_or_else(|| StoreError::InvalidData(format!("Unknown {}: {}", what, s)))
}
