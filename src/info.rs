//! `EncryptionInfo` / `DataKeyInfo`: the
//! value-typed record that binds data mode, IVs, wrapped keys and the
//! optional shared ephemeral public key, with the exact JSON shape
//! recipients and senders exchange.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::keyid::KeyIdentifier;

/// How the data streams themselves were encrypted.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DataMode {
    #[serde(rename = "AES_256_CCM")]
    Aes256Ccm,
    #[serde(rename = "Unencrypted")]
    Unencrypted,
}

/// How a single recipient's data key was wrapped.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum KeyWrapMode {
    #[serde(rename = "RSA_PKCS1")]
    RsaPkcs1,
    #[serde(rename = "ECDH_KDF2_SHA256_AES_256_CCM")]
    EcdhKdf2Sha256Aes256Ccm,
}

/// A single recipient's wrapped data key.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DataKeyInfo {
    #[serde(rename = "Mode")]
    pub mode: KeyWrapMode,
    #[serde(rename = "EncryptedKey", with = "base64_bytes")]
    pub encrypted_key: Vec<u8>,
    /// Present only for EC recipients that could not use the shared
    /// ephemeral key.
    #[serde(
        rename = "MessagePublicKey",
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_opt_bytes"
    )]
    pub message_public_key: Option<Vec<u8>>,
}

/// The full record a sender attaches to a multi-recipient message.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct EncryptionInfo {
    #[serde(rename = "DataMode")]
    pub data_mode: DataMode,
    /// One IV per stream, `|IVs| == streamCount`; empty strings in
    /// `Unencrypted` mode, 13 bytes each in `AES_256_CCM` mode.
    #[serde(rename = "IVs", with = "base64_bytes_seq")]
    pub ivs: Vec<Vec<u8>>,
    #[serde(rename = "DataKeys")]
    pub data_keys: HashMap<KeyIdentifier, DataKeyInfo>,
    /// Present only when a shared ephemeral EC key pair was used.
    #[serde(
        rename = "MessagePublicKey",
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_opt_bytes"
    )]
    pub message_public_key: Option<Vec<u8>>,
}

impl EncryptionInfo {
    pub fn stream_count(&self) -> usize {
        self.ivs.len()
    }

    /// `|IVs| == streamCount`; in `Unencrypted` mode `DataKeys` is empty
    /// and the shared ephemeral key is absent; in `AES_256_CCM` mode every
    /// IV is 13 bytes and all IVs are pairwise distinct.
    pub fn is_well_formed(&self, expected_stream_count: usize) -> bool {
        if self.ivs.len() != expected_stream_count {
            return false;
        }
        match self.data_mode {
            DataMode::Unencrypted => self.data_keys.is_empty() && self.message_public_key.is_none(),
            DataMode::Aes256Ccm => {
                let all_13_bytes = self.ivs.iter().all(|iv| iv.len() == 13);
                let distinct: std::collections::HashSet<&Vec<u8>> = self.ivs.iter().collect();
                all_13_bytes && distinct.len() == self.ivs.len()
            }
        }
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        serde_json::to_string(self).map_err(|e| crate::error::Error::Format(e.to_string()))
    }

    pub fn from_json(json: &str) -> crate::error::Result<Self> {
        serde_json::from_str(json).map_err(|e| crate::error::Error::Format(e.to_string()))
    }
}

mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        BASE64.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}

mod base64_opt_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&BASE64.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let text: Option<String> = Option::deserialize(deserializer)?;
        text.map(|t| BASE64.decode(t.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}

mod base64_bytes_seq {
    use super::*;
    use serde::ser::SerializeSeq;

    pub fn serialize<S: Serializer>(ivs: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(ivs.len()))?;
        for iv in ivs {
            seq.serialize_element(&BASE64.encode(iv))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        let texts = Vec::<String>::deserialize(deserializer)?;
        texts
            .into_iter()
            .map(|t| BASE64.decode(t.as_bytes()).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> EncryptionInfo {
        let mut data_keys = HashMap::new();
        data_keys.insert(
            KeyIdentifier::parse(
                "01:00112233:44556677:8899AABB:CCDDEEFF:00112233:44556677:8899AABB:CCDDEEFF",
            )
            .unwrap(),
            DataKeyInfo {
                mode: KeyWrapMode::RsaPkcs1,
                encrypted_key: vec![0xAB; 512],
                message_public_key: None,
            },
        );
        EncryptionInfo {
            data_mode: DataMode::Aes256Ccm,
            ivs: vec![vec![1; 13], vec![2; 13]],
            data_keys,
            message_public_key: Some(vec![4, 5, 6]),
        }
    }

    #[test]
    fn round_trips_through_json() {
        let info = sample_info();
        let json = info.to_json().unwrap();
        let decoded = EncryptionInfo::from_json(&json).unwrap();
        assert_eq!(info, decoded);
    }

    #[test]
    fn json_uses_the_spec_field_names_and_string_tags() {
        let info = sample_info();
        let json = info.to_json().unwrap();
        assert!(json.contains("\"DataMode\":\"AES_256_CCM\""));
        assert!(json.contains("\"IVs\":["));
        assert!(json.contains("\"DataKeys\":{"));
        assert!(json.contains("\"Mode\":\"RSA_PKCS1\""));
        assert!(json.contains("\"EncryptedKey\":"));
        assert!(json.contains("\"MessagePublicKey\":"));
    }

    #[test]
    fn well_formed_checks_stream_count_and_distinct_ivs() {
        let info = sample_info();
        assert!(info.is_well_formed(2));
        assert!(!info.is_well_formed(3));

        let mut duplicated = info.clone();
        duplicated.ivs[1] = duplicated.ivs[0].clone();
        assert!(!duplicated.is_well_formed(2));
    }

    #[test]
    fn unencrypted_mode_requires_empty_data_keys_and_no_shared_key() {
        let info = EncryptionInfo {
            data_mode: DataMode::Unencrypted,
            ivs: vec![Vec::new(), Vec::new()],
            data_keys: HashMap::new(),
            message_public_key: None,
        };
        assert!(info.is_well_formed(2));

        let mut with_key = info.clone();
        with_key.message_public_key = Some(vec![1]);
        assert!(!with_key.is_well_formed(2));
    }
}
