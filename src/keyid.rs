//! Deterministic key identifier.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::key::{KeyType, PublicKey};

/// A 33-byte value binding recipients to wrapped keys. Byte 0 tags the key
/// type; bytes 1..32 are a SHA-256 digest of the key's canonical encoding.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct KeyIdentifier([u8; 33]);

const TAG_RSA: u8 = 0x01;
const TAG_EC: u8 = 0x02;

impl KeyIdentifier {
    /// `compute(pk1) == compute(pk2) ⇔ pk1 and pk2 represent the same
    /// public key`.
    pub fn compute(public_key: &PublicKey) -> Self {
        let (tag, digest) = match public_key {
            PublicKey::Rsa(rsa) => {
                // Strip leading zero bytes so every equivalent modulus
                // encoding hashes the same input.
                let n = strip_leading_zeros(&rsa.n);
                let mut hasher = Sha256::new();
                hasher.update(n);
                (TAG_RSA, hasher.finalize())
            }
            PublicKey::Ec(ec) => {
                let mut hasher = Sha256::new();
                hasher.update(ec.point.to_uncompressed());
                (TAG_EC, hasher.finalize())
            }
        };
        let mut out = [0u8; 33];
        out[0] = tag;
        out[1..].copy_from_slice(&digest);
        Self(out)
    }

    pub fn key_type(&self) -> Option<KeyType> {
        match self.0[0] {
            TAG_RSA => Some(KeyType::Rsa),
            TAG_EC => Some(KeyType::Ec),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    /// Rebuilds a key identifier from the raw 33 bytes stored in a
    /// certificate's SKID/AKID extension.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let tag = *bytes.first().ok_or_else(|| Error::Format("empty key identifier".to_string()))?;
        if tag != TAG_RSA && tag != TAG_EC {
            return Err(Error::Format(format!("unknown key identifier type {tag:#04x}")));
        }
        if bytes.len() != 33 {
            return Err(Error::Format(format!(
                "key identifier must be 33 bytes, got {}",
                bytes.len()
            )));
        }
        let mut out = [0u8; 33];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// Canonical text form: uppercase hex tag byte, then 8 groups of
    /// 4 bytes separated by `:`.
    pub fn to_text(&self) -> String {
        let mut out = format!("{:02X}", self.0[0]);
        for chunk in self.0[1..].chunks(4) {
            out.push(':');
            for byte in chunk {
                out.push_str(&format!("{byte:02X}"));
            }
        }
        out
    }

    /// Parses the canonical text form; accepts lower- or upper-case hex.
    pub fn parse(text: &str) -> Result<Self> {
        let groups: Vec<&str> = text.split(':').collect();
        if groups.len() != 9 {
            return Err(Error::Format(format!(
                "key identifier must have exactly 8 colons, got {} group(s)",
                groups.len()
            )));
        }
        if groups[0].len() != 2 {
            return Err(Error::Format(
                "key identifier type byte must be 2 hex digits".to_string(),
            ));
        }
        let tag = hex_byte(groups[0])?;
        if tag != TAG_RSA && tag != TAG_EC {
            return Err(Error::Format(format!("unknown key identifier type {tag:#04x}")));
        }
        let mut out = [0u8; 33];
        out[0] = tag;
        for (i, group) in groups[1..].iter().enumerate() {
            if group.len() != 8 {
                return Err(Error::Format(
                    "key identifier group must be 8 hex digits (4 bytes)".to_string(),
                ));
            }
            for j in 0..4 {
                out[1 + i * 4 + j] = hex_byte(&group[j * 2..j * 2 + 2])?;
            }
        }
        Ok(Self(out))
    }
}

fn hex_byte(s: &str) -> Result<u8> {
    u8::from_str_radix(s, 16)
        .map_err(|_| Error::Format(format!("invalid hex in key identifier: {s}")))
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[first_nonzero..]
}

impl fmt::Debug for KeyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyIdentifier({})", self.to_text())
    }
}

impl fmt::Display for KeyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_text())
    }
}

/// JSON mapping keys use the canonical text form.
impl serde::Serialize for KeyIdentifier {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_text())
    }
}

impl<'de> serde::Deserialize<'de> for KeyIdentifier {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}
