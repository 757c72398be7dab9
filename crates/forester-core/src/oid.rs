use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// SHA-256 object identifier, rendered as 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid([u8; 32]);

impl Oid {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.to_string()
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        let raw = hex.as_bytes();
        // from_str_radix tolerates a leading sign, so gate on hex digits.
        if raw.len() != 64 || !raw.iter().all(u8::is_ascii_hexdigit) {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (slot, pair) in bytes.iter_mut().zip(raw.chunks_exact(2)) {
            let pair = std::str::from_utf8(pair).ok()?;
            *slot = u8::from_str_radix(pair, 16).ok()?;
        }
        Some(Self(bytes))
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Oid {
    type Err = crate::error::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_hex(value).ok_or_else(|| crate::error::Error::UnknownRef(value.to_string()))
    }
}

impl Serialize for Oid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Oid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Oid::from_hex(&hex).ok_or_else(|| D::Error::custom("invalid object id"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_pads_every_byte() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0x0f;
        bytes[31] = 0xa0;
        let hex = Oid::new(bytes).to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("0f"));
        assert!(hex.ends_with("a0"));
    }

    #[test]
    fn from_str_parses_and_rejects() {
        let hex = "7a".repeat(32);
        let oid: Oid = hex.parse().expect("parse");
        assert_eq!(oid.to_hex(), hex);
        // Uppercase input is accepted; output stays lowercase.
        let upper: Oid = hex.to_ascii_uppercase().parse().expect("parse upper");
        assert_eq!(upper, oid);

        assert!("7a".repeat(31).parse::<Oid>().is_err());
        assert!(Oid::from_hex(&"zz".repeat(32)).is_none());
        assert!(Oid::from_hex("").is_none());
    }

    #[test]
    fn serde_as_hex_string() {
        let oid = Oid::new([0xab; 32]);
        let json = serde_json::to_string(&oid).expect("serialize");
        assert_eq!(json, format!("\"{}\"", oid.to_hex()));
        let back: Oid = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, oid);
        assert!(serde_json::from_str::<Oid>("\"not hex\"").is_err());
    }
}
