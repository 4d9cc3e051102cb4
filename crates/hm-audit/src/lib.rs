//! hm-audit
//!
//! Tamper stamp for accepted reports: HMAC-SHA-256 over the canonical form of
//! the submitted `checks` object.
//!
//! The key is injected once at construction. There is no default key; a
//! missing or blank secret is a configuration error and nothing is stamped.

use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StampError {
    #[error("STAMP_SECRET_MISSING: shared secret is not configured")]
    MissingSecret,
    #[error("canonical json failed: {0}")]
    Canonical(String),
}

/// Shared secret for stamping. **Value is redacted in `Debug` output.**
#[derive(Clone)]
pub struct TamperKey {
    mac: HmacSha256,
}

impl std::fmt::Debug for TamperKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TamperKey")
            .field("secret", &"<REDACTED>")
            .finish()
    }
}

impl TamperKey {
    pub fn new(secret: impl AsRef<str>) -> Result<Self, StampError> {
        let s = secret.as_ref();
        if s.trim().is_empty() {
            return Err(StampError::MissingSecret);
        }
        let mac = <HmacSha256 as Mac>::new_from_slice(s.as_bytes())
            .map_err(|_| StampError::MissingSecret)?;
        Ok(Self { mac })
    }

    /// Fail closed when the secret is absent.
    pub fn from_optional(secret: Option<&str>) -> Result<Self, StampError> {
        match secret {
            Some(s) => Self::new(s),
            None => Err(StampError::MissingSecret),
        }
    }

    /// Lower-case hex HMAC-SHA-256 over the canonical form of `checks`.
    pub fn stamp(&self, checks: &Value) -> Result<String, StampError> {
        let canonical = canonical_json(checks)?;
        let mut mac = self.mac.clone();
        mac.update(canonical.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Recompute and compare in constant time. A malformed digest is a mismatch.
    pub fn verify(&self, checks: &Value, digest_hex: &str) -> Result<bool, StampError> {
        let Ok(claimed) = hex::decode(digest_hex.trim()) else {
            return Ok(false);
        };
        let canonical = canonical_json(checks)?;
        let mut mac = self.mac.clone();
        mac.update(canonical.as_bytes());
        let computed = mac.finalize().into_bytes();
        if computed.len() != claimed.len() {
            return Ok(false);
        }
        Ok(computed.as_slice().ct_eq(&claimed).into())
    }
}

/// Compact JSON with object keys sorted recursively.
pub fn canonical_json<T: Serialize>(v: &T) -> Result<String, StampError> {
    let raw = serde_json::to_value(v).map_err(|e| StampError::Canonical(e.to_string()))?;
    let sorted = sort_keys(&raw);
    serde_json::to_string(&sorted).map_err(|e| StampError::Canonical(e.to_string()))
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Plain SHA-256 of the canonical form. Used for config fingerprints.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
