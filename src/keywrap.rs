//! Key wrapping — the heart of the scheme:
//! wraps one data key per recipient, optimizing EC recipients that share a
//! curve into a single ephemeral sender key pair.
//!
//! Adapted from `jolokia/src/cipher/hpke.rs`'s ephemeral-keypair-per-
//! message idiom: HPKE derives its export secret from a single KEM
//! encapsulation, while here the KDF2-over-`(agreement‖ephemeralPub)`
//! construction and the explicit shared/individual split are spelled out
//! directly rather than delegated to an HPKE suite.

use std::collections::HashMap;

use rsa::Pkcs1v15Encrypt;
use sha2::{Digest, Sha256};

use crate::data::{aes_256_ccm_decrypt, aes_256_ccm_encrypt};
use crate::error::{Error, Result};
use crate::info::{DataKeyInfo, EncryptionInfo, KeyWrapMode};
use crate::key::{EcCurve, EcPoint, EcPublicParams, KeyPair, PrivateKey, PublicKey};
use crate::keyid::KeyIdentifier;
use crate::rand::RandomSource;

/// KDF2 / ANSI X9.63 key derivation over SHA-256. `other_info` is fixed to
/// the encoded ephemeral public key (SPEC_FULL.md §10 open question 2).
fn kdf2_sha256(shared_secret: &[u8], other_info: &[u8], output_len: usize) -> Vec<u8> {
    let mut output = Vec::with_capacity(output_len + Sha256::output_size());
    let mut counter: u32 = 1;
    while output.len() < output_len {
        let mut hasher = Sha256::new();
        hasher.update(shared_secret);
        hasher.update(counter.to_be_bytes());
        hasher.update(other_info);
        output.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    output.truncate(output_len);
    output
}

fn ecdh_agree(private: &PrivateKey, peer_public: &EcPublicParams) -> Result<Vec<u8>> {
    let ec_priv = private.as_ec()?;
    match peer_public.curve {
        EcCurve::P256 => {
            let sk = ec_priv.to_p256()?;
            let pk = peer_public.to_p256()?;
            let shared = p256::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine());
            Ok(shared.raw_secret_bytes().to_vec())
        }
        EcCurve::P384 => {
            let sk = ec_priv.to_p384()?;
            let pk = peer_public.to_p384()?;
            let shared = p384::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine());
            Ok(shared.raw_secret_bytes().to_vec())
        }
        EcCurve::P521 => {
            let sk = ec_priv.to_p521()?;
            let pk = peer_public.to_p521()?;
            let shared = p521::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine());
            Ok(shared.raw_secret_bytes().to_vec())
        }
    }
}

/// Wraps a single data key for a list of recipients.
pub struct KeyEncryptor {
    recipients: Vec<(KeyIdentifier, PublicKey)>,
    /// When true, EC recipients sharing a curve (and using named-curve,
    /// non-explicit parameters) are wrapped under one ephemeral sender key
    /// pair instead of one each.
    allow_shared_sender_key_pair: bool,
}

impl KeyEncryptor {
    pub fn new(recipients: Vec<(KeyIdentifier, PublicKey)>, allow_shared_sender_key_pair: bool) -> Self {
        Self {
            recipients,
            allow_shared_sender_key_pair,
        }
    }

    /// Wraps `data_key` for every recipient, returning the per-recipient
    /// `DataKeys` map and the shared ephemeral public key (if any EC
    /// recipient used it).
    pub fn wrap(
        &self,
        data_key: &[u8],
        random: &mut dyn RandomSource,
    ) -> Result<(HashMap<KeyIdentifier, DataKeyInfo>, Option<Vec<u8>>)> {
        let mut data_keys = HashMap::new();
        let mut ec_recipients: Vec<(&KeyIdentifier, &EcPublicParams)> = Vec::new();

        for (id, key) in &self.recipients {
            match key {
                PublicKey::Rsa(_) => {
                    let rsa_pub = key.to_rsa()?;
                    let mut rng = random.child(32);
                    let encrypted_key = rsa_pub
                        .encrypt(&mut rng, Pkcs1v15Encrypt, data_key)
                        .map_err(|e| Error::Generation(e.to_string()))?;
                    data_keys.insert(
                        id.clone(),
                        DataKeyInfo {
                            mode: KeyWrapMode::RsaPkcs1,
                            encrypted_key,
                            message_public_key: None,
                        },
                    );
                }
                PublicKey::Ec(ec) => ec_recipients.push((id, ec)),
            }
        }

        let shared_curve = self
            .allow_shared_sender_key_pair
            .then(|| shared_group_curve(&ec_recipients))
            .flatten();
        let shared_ephemeral = shared_curve
            .map(|curve| KeyPair::generate_ec(random, curve))
            .transpose()?;

        for (id, ec) in &ec_recipients {
            let in_shared_group = shared_curve == Some(ec.curve) && !ec.explicit_params;
            let info = if in_shared_group {
                let ephemeral = shared_ephemeral
                    .as_ref()
                    .expect("a shared curve always has a shared ephemeral key pair");
                wrap_for_ec_recipient(ephemeral, ec, data_key, false)?
            } else {
                let ephemeral = KeyPair::generate_ec(random, ec.curve)?;
                wrap_for_ec_recipient(&ephemeral, ec, data_key, true)?
            };
            data_keys.insert((*id).clone(), info);
        }

        let message_public_key = shared_ephemeral
            .as_ref()
            .map(|kp| kp.public.as_ec().expect("generated EC").point.to_uncompressed());
        Ok((data_keys, message_public_key))
    }
}

/// The curve shared by the largest group of named-curve (non-explicit-
/// parameter) EC recipients, if any. Explicit-parameter recipients never
/// count towards this, and never join the resulting group even when their
/// curve matches.
fn shared_group_curve(ec_recipients: &[(&KeyIdentifier, &EcPublicParams)]) -> Option<EcCurve> {
    let mut counts: HashMap<EcCurve, usize> = HashMap::new();
    for (_, ec) in ec_recipients {
        if !ec.explicit_params {
            *counts.entry(ec.curve).or_insert(0) += 1;
        }
    }
    counts.into_iter().max_by_key(|&(_, count)| count).map(|(curve, _)| curve)
}

fn wrap_for_ec_recipient(
    ephemeral: &KeyPair,
    recipient: &EcPublicParams,
    data_key: &[u8],
    include_message_public_key: bool,
) -> Result<DataKeyInfo> {
    let shared_secret = ecdh_agree(&ephemeral.private, recipient)?;
    let ephemeral_pub_encoded = ephemeral.public.as_ec()?.point.to_uncompressed();
    let derived = kdf2_sha256(&shared_secret, &ephemeral_pub_encoded, 45);
    let (key, iv) = derived.split_at(32);
    let encrypted_key = aes_256_ccm_encrypt(key, iv, data_key)?;
    Ok(DataKeyInfo {
        mode: KeyWrapMode::EcdhKdf2Sha256Aes256Ccm,
        encrypted_key,
        message_public_key: include_message_public_key.then_some(ephemeral_pub_encoded),
    })
}

/// Unwraps a data key for a single recipient's private key.
pub struct KeyDecryptor {
    private_key: PrivateKey,
}

impl KeyDecryptor {
    pub fn new(private_key: PrivateKey) -> Self {
        Self { private_key }
    }

    /// Direct form, given a single `DataKeyInfo` and — for EC entries that
    /// joined the shared group and so carry no `MessagePublicKey` of their
    /// own — the `EncryptionInfo`-level shared ephemeral public key.
    pub fn decrypt_key_info(
        &self,
        data_key_info: &DataKeyInfo,
        shared_message_public_key: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        match data_key_info.mode {
            KeyWrapMode::RsaPkcs1 => {
                let rsa_priv = self.private_key.to_rsa()?;
                rsa_priv
                    .decrypt(Pkcs1v15Encrypt, &data_key_info.encrypted_key)
                    .map_err(|_| Error::InvalidCiphertext)
            }
            KeyWrapMode::EcdhKdf2Sha256Aes256Ccm => {
                let ec_priv = self.private_key.as_ec()?;
                let ephemeral_pub_encoded = data_key_info
                    .message_public_key
                    .as_deref()
                    .or(shared_message_public_key)
                    .ok_or_else(|| {
                        Error::Precondition(
                            "no ephemeral public key available to unwrap this entry".to_string(),
                        )
                    })?;
                let ephemeral_pub = EcPublicParams {
                    curve: ec_priv.curve,
                    explicit_params: false,
                    point: EcPoint::from_uncompressed(ec_priv.curve, ephemeral_pub_encoded)?,
                };
                let shared_secret = ecdh_agree(&self.private_key, &ephemeral_pub)?;
                let derived = kdf2_sha256(&shared_secret, ephemeral_pub_encoded, 45);
                let (key, iv) = derived.split_at(32);
                aes_256_ccm_decrypt(key, iv, &data_key_info.encrypted_key)
            }
        }
    }

    /// Finds our own entry in `info.DataKeys` by key identifier and
    /// unwraps it. `None` both when we are not a recipient and when
    /// unwrapping our own entry fails — both read as "this key cannot
    /// open this message".
    pub fn decrypt_key(&self, info: &EncryptionInfo) -> Option<Vec<u8>> {
        let public = KeyPair::from_private(self.private_key.clone()).ok()?.public;
        let id = KeyIdentifier::compute(&public);
        let entry = info.data_keys.get(&id)?;
        self.decrypt_key_info(entry, info.message_public_key.as_deref()).ok()
    }
}
