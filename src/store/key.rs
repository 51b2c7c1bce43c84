//! Region-scoped key encoding.
//!
//! Every store key is `"<region-id>/<type-string>/<canonical-key>"`, ASCII,
//! with the region id formatted as a non-zero unsigned decimal integer.
//! One store key maps to at most one live object; the encoding is
//! deterministic so equal object keys always produce equal store keys.

use crate::core::error::{TrellisError, TrellisResult};

/// The key prefix covering every object in a region.
pub fn region_prefix(region: u32) -> String {
    format!("{}/", region)
}

/// Encode a store key from its three components.
pub fn store_key(region: u32, type_string: &str, obj_key: &str) -> String {
    format!("{}/{}/{}", region, type_string, obj_key)
}

/// A parsed store key, borrowing from the encoded form.
///
/// The object key is the remainder after the second separator and may
/// itself contain `/` (canonical serializations are free-form).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedKey<'a> {
    /// Region the key is scoped to.
    pub region: u32,
    /// Type string identifying the owning cache.
    pub type_string: &'a str,
    /// Canonical object key.
    pub obj_key: &'a str,
}

/// Parse a store key into its components.
///
/// Rejects keys with a missing component or a zero/non-numeric region.
pub fn parse_store_key(key: &str) -> TrellisResult<ParsedKey<'_>> {
    let mut parts = key.splitn(3, '/');
    let region = parts
        .next()
        .and_then(|r| r.parse::<u32>().ok())
        .filter(|r| *r != 0)
        .ok_or_else(|| TrellisError::MalformedKey {
            key: key.to_string(),
        })?;
    let type_string = parts.next().filter(|t| !t.is_empty()).ok_or_else(|| {
        TrellisError::MalformedKey {
            key: key.to_string(),
        }
    })?;
    let obj_key = parts.next().filter(|k| !k.is_empty()).ok_or_else(|| {
        TrellisError::MalformedKey {
            key: key.to_string(),
        }
    })?;
    Ok(ParsedKey {
        region,
        type_string,
        obj_key,
    })
}
