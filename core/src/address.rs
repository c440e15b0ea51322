use std::{
    fmt::{self, Display, Formatter},
    hash::{Hash, Hasher},
    str::FromStr,
};

use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};

/// An EVM account or contract address.
///
/// The text the address was created from is preserved for display, while equality and
/// hashing use the lower case form so that checksummed and lower case spellings of the same
/// address compare equal.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Wrap the given text without validation.
    /// Use [`FromStr`] when the input comes from an untrusted source.
    pub fn new_unchecked(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The address as originally spelled.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The lower case form used for lookups and file names.
    pub fn to_lowercase(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    /// Case-insensitive comparison against any textual address.
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.matches(&other.0)
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) else {
            bail!("address must be 0x prefixed: {s}");
        };
        if hex.len() != 40 {
            return Err(anyhow!(
                "address must have 40 hex characters, found {}",
                hex.len()
            ));
        }
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("address contains non hex characters: {s}");
        }
        Ok(Self(s.to_string()))
    }
}

impl From<alloy::primitives::Address> for Address {
    fn from(value: alloy::primitives::Address) -> Self {
        Self(value.to_checksum(None))
    }
}

impl TryFrom<&Address> for alloy::primitives::Address {
    type Error = anyhow::Error;

    fn try_from(value: &Address) -> Result<Self, Self::Error> {
        alloy::primitives::Address::from_str(value.as_str())
            .map_err(|e| anyhow!("invalid address {}: {}", value, e))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    const CHECKSUMMED: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    #[test]
    fn compares_case_insensitively() {
        let a = Address::from_str(CHECKSUMMED).unwrap();
        let b = Address::from_str(&CHECKSUMMED.to_lowercase()).unwrap();
        assert_eq!(a, b);
        assert!(a.matches(&CHECKSUMMED.to_uppercase().replace("0X", "0x")));

        let set: HashSet<Address> = [a.clone(), b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn preserves_display_case() {
        let a = Address::from_str(CHECKSUMMED).unwrap();
        assert_eq!(a.to_string(), CHECKSUMMED);
        assert_eq!(a.to_lowercase(), CHECKSUMMED.to_lowercase());
    }

    #[test]
    fn rejects_malformed() {
        assert!(Address::from_str("5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").is_err());
        assert!(Address::from_str("0x1234").is_err());
        assert!(Address::from_str("0xZZAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").is_err());
    }

    #[test]
    fn converts_from_alloy() {
        let raw = alloy::primitives::Address::from_str(CHECKSUMMED).unwrap();
        let a = Address::from(raw);
        assert_eq!(a.as_str(), CHECKSUMMED);
        let back = alloy::primitives::Address::try_from(&a).unwrap();
        assert_eq!(back, raw);
    }
}
