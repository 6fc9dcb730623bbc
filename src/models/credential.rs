use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub const SECONDS_PER_DAY: i64 = 24 * 3600;

/// Largest accepted `expiration`: 9999-12-31T23:59:59Z. Anything beyond this
/// (in either direction) is treated as a corrupt record.
pub const MAX_EXPIRATION: i64 = 253_402_300_799;

/// The two credentials the gateway manages. Each kind has exactly one
/// persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// Shared secret presented by inbound callers.
    GatewayAuth,
    /// Long-lived token minted by Home Assistant for outbound calls.
    UpstreamAccess,
}

impl CredentialKind {
    pub const ALL: [CredentialKind; 2] = [CredentialKind::GatewayAuth, CredentialKind::UpstreamAccess];

    /// File name of the persisted record inside the data directory.
    pub fn file_name(self) -> &'static str {
        match self {
            CredentialKind::GatewayAuth => "secret_token.json",
            CredentialKind::UpstreamAccess => "long_lived_token.json",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CredentialKind::GatewayAuth => "gateway_auth",
            CredentialKind::UpstreamAccess => "upstream_access",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted credential: the bearer value, its expiry and whatever else the
/// issuer returned. Serialized as one flat JSON object.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    #[serde(rename = "token", alias = "secret_token")]
    pub value: String,

    /// Unix timestamp in seconds. `None` means non-expiring or unknown.
    #[serde(
        default,
        deserialize_with = "deserialize_expiration",
        skip_serializing_if = "Option::is_none"
    )]
    pub expiration: Option<i64>,

    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl CredentialRecord {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expiration: None,
            metadata: Map::new(),
        }
    }

    pub fn with_expiration(mut self, expiration: i64) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Fresh gateway-auth record: 32 bytes from the OS RNG, hex encoded.
    pub fn generate() -> Self {
        use rand::RngCore;

        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let value = hex::encode(bytes);
        bytes.fill(0);
        Self::new(value)
    }

    /// Days until expiry as a fraction, negative once expired.
    pub fn days_left(&self, now: i64) -> Option<f64> {
        self.expiration
            .map(|exp| exp.saturating_sub(now) as f64 / SECONDS_PER_DAY as f64)
    }

    /// Short SHA-256 fingerprint, safe to log in place of the value.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.value)
    }
}

// Keep the bearer value out of `{:?}` output.
impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("fingerprint", &self.fingerprint())
            .field("expiration", &self.expiration)
            .field("metadata", &self.metadata.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub fn fingerprint(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(&digest[..6])
}

/// Accepts `1700000000`, `1700000000.0`, `"1700000000"` or null. Values
/// outside `±MAX_EXPIRATION` are rejected.
fn deserialize_expiration<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let raw = Option::<Value>::deserialize(deserializer)?;
    let secs = match raw {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => i,
            None => match n.as_f64() {
                Some(f) if f.is_finite() && f.abs() <= MAX_EXPIRATION as f64 => f as i64,
                _ => return Err(D::Error::custom(format!("expiration out of range: {n}"))),
            },
        },
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| D::Error::custom(format!("invalid expiration: {s}")))?,
        Some(other) => return Err(D::Error::custom(format!("invalid expiration: {other}"))),
    };

    if !(-MAX_EXPIRATION..=MAX_EXPIRATION).contains(&secs) {
        return Err(D::Error::custom(format!("expiration out of range: {secs}")));
    }
    Ok(Some(secs))
}
