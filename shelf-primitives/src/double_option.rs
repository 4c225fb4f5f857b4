//! Serde helpers for patch fields that distinguish "absent" from "null".
//!
//! Use with `#[serde(default, skip_serializing_if = "Option::is_none", with = "...")]`:
//! a missing key is `None`, an explicit `null` is `Some(None)`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Serializes `Some(inner)` as `inner` (so `Some(None)` becomes `null`).
///
/// # Errors
///
/// Propagates serializer failures.
pub fn serialize<S, T>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Serialize,
{
    match value {
        Some(inner) => inner.serialize(serializer),
        None => serializer.serialize_none(),
    }
}

/// Deserializes a present key into `Some(..)`, mapping `null` to `Some(None)`.
///
/// # Errors
///
/// Propagates deserializer failures.
pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
