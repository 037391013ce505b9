//! Content fingerprint used as the dedup/upsert key
//!
//! CRITICAL: the identity string is an on-disk format. Changing the field
//! order, the rendering of absent fields, or the `|` separator re-keys every
//! stored fact; the golden digests in the tests pin the layout.

use sha2::{Digest, Sha256};

/// Fields that define a fact's identity
#[derive(Debug, Clone, Copy)]
pub struct Identity<'a> {
    pub category: &'a str,
    pub element: &'a str,
    pub year: Option<i32>,
    pub value: Option<f64>,
    pub unit: Option<&'a str>,
    /// Resource id for API sources, file name for file sources
    pub reference: &'a str,
}

/// `category|element|year|value|unit|reference`, absent fields empty
pub fn identity_string(id: &Identity<'_>) -> String {
    let year = id.year.map(|y| y.to_string()).unwrap_or_default();
    let value = id.value.map(|v| v.to_string()).unwrap_or_default();
    [
        id.category,
        id.element,
        &year,
        &value,
        id.unit.unwrap_or(""),
        id.reference,
    ]
    .join("|")
}

/// Lowercase hex SHA-256 of the identity string (64 chars)
pub fn fingerprint(id: &Identity<'_>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identity_string(id).as_bytes());
    format!("{:x}", hasher.finalize())
}
