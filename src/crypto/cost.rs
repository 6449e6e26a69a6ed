use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::DERIVED_LEN;
use crate::error::ConfigurationError;

/// Scrypt work factor encoded as `"<N>$<r>$<p>$"` with hexadecimal fields.
///
/// The encoded string is kept verbatim: it is used as the prefix of the
/// cost-tagged salt, so re-rendering it differently would change every
/// derived key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScryptCost {
    encoded: String,
    log_n: u8,
    r: u32,
    p: u32,
}

impl ScryptCost {
    pub fn n(&self) -> u64 {
        1u64 << self.log_n
    }

    pub fn log_n(&self) -> u8 {
        self.log_n
    }

    pub fn r(&self) -> u32 {
        self.r
    }

    pub fn p(&self) -> u32 {
        self.p
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// Approximate memory needed by one derivation, in bytes.
    pub fn memory_bytes(&self) -> u64 {
        128 * u64::from(self.r) * self.n()
    }

    pub(crate) fn params(&self) -> Result<scrypt::Params, ConfigurationError> {
        scrypt::Params::new(self.log_n, self.r, self.p, DERIVED_LEN)
            .map_err(|e| self.invalid(e.to_string()))
    }

    fn invalid(&self, reason: impl Into<String>) -> ConfigurationError {
        ConfigurationError::InvalidCost {
            cost: self.encoded.clone(),
            reason: reason.into(),
        }
    }
}

fn parse_field(cost: &str, name: &str, field: &str) -> Result<u64, ConfigurationError> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ConfigurationError::InvalidCost {
            cost: cost.to_string(),
            reason: format!("{name} must be a hexadecimal number"),
        });
    }
    u64::from_str_radix(field, 16).map_err(|e| ConfigurationError::InvalidCost {
        cost: cost.to_string(),
        reason: format!("{name}: {e}"),
    })
}

impl FromStr for ScryptCost {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigurationError::InvalidCost {
            cost: s.to_string(),
            reason: reason.to_string(),
        };

        let body = s
            .strip_suffix('$')
            .ok_or_else(|| invalid("missing trailing '$'"))?;
        let fields: Vec<&str> = body.split('$').collect();
        let [n, r, p] = fields[..] else {
            return Err(invalid("expected three '$'-terminated fields"));
        };

        let n = parse_field(s, "N", n)?;
        let r = parse_field(s, "r", r)?;
        let p = parse_field(s, "p", p)?;

        if n < 2 || !n.is_power_of_two() {
            return Err(invalid("N must be a power of two greater than 1"));
        }
        let r = u32::try_from(r).map_err(|_| invalid("r out of range"))?;
        let p = u32::try_from(p).map_err(|_| invalid("p out of range"))?;
        if r == 0 || p == 0 {
            return Err(invalid("r and p must be >= 1"));
        }

        let cost = Self {
            encoded: s.to_string(),
            log_n: n.trailing_zeros() as u8,
            r,
            p,
        };
        cost.params()?;
        Ok(cost)
    }
}

impl fmt::Display for ScryptCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl Serialize for ScryptCost {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encoded)
    }
}

impl<'de> Deserialize<'de> for ScryptCost {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
