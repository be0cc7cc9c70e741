//! X.509 certificates.
//!
//! Certificates are built by hand-assembling the `x509-cert` TBS structure
//! and extensions and signing the TBS DER bytes directly, rather than going
//! through `x509_cert::builder` — SKID/AKID here carry this crate's own
//! 33-byte `KeyIdentifier`, not the conventional SHA-1 SKID, so the builder's
//! assumptions don't apply anyway.

use std::fmt::Write as _;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use der::asn1::{BitString, OctetString};
use der::{Decode, Encode};
use pkcs8::{DecodePublicKey, EncodePublicKey};
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::ext::pkix::{AuthorityKeyIdentifier, BasicConstraints};
use x509_cert::ext::{Extension, Extensions};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::{Time, Validity as Asn1Validity};
use x509_cert::{Certificate as Asn1Certificate, TbsCertificate, Version};

use crate::dn::DistinguishedName;
use crate::error::{Error, Result};
use crate::key::{EcCurve, EcPublicParams, KeyType, PrivateKey, PublicKey};
use crate::keyid::KeyIdentifier;
use crate::oid;
use crate::rand::RandomSource;
use crate::signature::{hash_bytes, sign_prehash, verify_prehash, DigestAlg};

/// `[notBefore, notAfter)` validity window, UTC.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Validity {
    pub not_before: SystemTime,
    pub not_after: SystemTime,
}

impl Validity {
    pub fn for_duration(duration: Duration) -> Self {
        let not_before = SystemTime::now();
        Self {
            not_before,
            not_after: not_before + duration,
        }
    }

    pub fn explicit(not_before: SystemTime, not_after: SystemTime) -> Self {
        Self {
            not_before,
            not_after,
        }
    }

    fn contains(&self, instant: SystemTime) -> bool {
        instant >= self.not_before && instant < self.not_after
    }
}

/// Key-usage bitmask. Bit numbering follows the X.509
/// `KeyUsage` extension's named bits.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct KeyUsage(u16);

impl KeyUsage {
    pub const DIGITAL_SIGNATURE: Self = Self(1 << 0);
    pub const NON_REPUDIATION: Self = Self(1 << 1);
    pub const KEY_ENCIPHERMENT: Self = Self(1 << 2);
    pub const DATA_ENCIPHERMENT: Self = Self(1 << 3);
    pub const KEY_AGREEMENT: Self = Self(1 << 4);
    pub const KEY_CERT_SIGN: Self = Self(1 << 5);
    pub const CRL_SIGN: Self = Self(1 << 6);
    pub const ENCIPHER_ONLY: Self = Self(1 << 7);
    pub const DECIPHER_ONLY: Self = Self(1 << 8);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    fn highest_set_named_bit(self) -> Option<u32> {
        (0..=8).rev().find(|i| self.0 & (1 << i) != 0)
    }
}

impl std::ops::BitOr for KeyUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// CA basic-constraints extension content.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CaConstraint {
    pub is_ca: bool,
    pub path_len: Option<u32>,
}

/// Outcome of `Certificate::verify`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CertificateCheckOutcome {
    Valid,
    InvalidSignature,
    OutOfValidityPeriod,
    OtherError,
}

/// A value-typed X.509 certificate. Equality is byte-for-byte DER equality.
#[derive(Clone, Debug)]
pub struct Certificate {
    inner: Asn1Certificate,
    der: Vec<u8>,
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}
impl Eq for Certificate {}

#[allow(clippy::too_many_arguments)]
impl Certificate {
    /// Builds and self-signs (under `signer_private_key`) a certificate for
    /// `subject_public_key`.
    pub fn generate(
        issuer_dn: &DistinguishedName,
        signer_private_key: &PrivateKey,
        subject_dn: &DistinguishedName,
        subject_public_key: &PublicKey,
        validity: Validity,
        serial: &[u8],
        _random: &mut dyn RandomSource,
        authority_key_identifier: Option<&KeyIdentifier>,
        generate_subject_key_identifier: bool,
        key_usages: Option<KeyUsage>,
        ca_constraint: Option<CaConstraint>,
        signature_digest: Option<DigestAlg>,
    ) -> Result<Self> {
        let digest = signature_digest.unwrap_or(DigestAlg::Sha256);
        let spki = public_key_to_spki(subject_public_key)?;

        let mut extensions: Extensions = Vec::new();
        if generate_subject_key_identifier {
            let skid = KeyIdentifier::compute(subject_public_key);
            extensions.push(make_extension(
                oid::CE_SUBJECT_KEY_IDENTIFIER,
                false,
                OctetString::new(skid.as_bytes().to_vec()).map_err(der_err)?,
            )?);
        }
        if let Some(akid) = authority_key_identifier {
            let akid_value = AuthorityKeyIdentifier {
                key_identifier: Some(OctetString::new(akid.as_bytes().to_vec()).map_err(der_err)?),
                authority_cert_issuer: None,
                authority_cert_serial_number: None,
            };
            extensions.push(make_extension(
                oid::CE_AUTHORITY_KEY_IDENTIFIER,
                false,
                akid_value,
            )?);
        }
        if let Some(ku) = key_usages {
            extensions.push(make_extension(
                oid::CE_KEY_USAGE,
                true,
                key_usage_bitstring(ku)?,
            )?);
        }
        if let Some(ca) = ca_constraint {
            let bc = BasicConstraints {
                ca: ca.is_ca,
                path_len_constraint: ca.path_len,
            };
            extensions.push(make_extension(oid::CE_BASIC_CONSTRAINTS, true, bc)?);
        }

        let tbs = TbsCertificate {
            version: Version::V3,
            serial_number: SerialNumber::new(serial).map_err(der_err)?,
            signature: signature_algorithm_identifier(signer_private_key.key_type(), digest)?,
            issuer: dn_to_name(issuer_dn)?,
            validity: to_asn1_validity(validity)?,
            subject: dn_to_name(subject_dn)?,
            subject_public_key_info: spki,
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: if extensions.is_empty() {
                None
            } else {
                Some(extensions)
            },
        };

        build_and_sign(tbs, signer_private_key, digest)
    }

    pub fn to_der(&self) -> &[u8] {
        &self.der
    }

    pub fn from_der(bytes: &[u8]) -> Result<Self> {
        let inner = Asn1Certificate::from_der(bytes).map_err(der_err)?;
        Ok(Self {
            inner,
            der: bytes.to_vec(),
        })
    }

    pub fn issuer(&self) -> Result<DistinguishedName> {
        dn_from_name(&self.inner.tbs_certificate.issuer)
    }

    pub fn subject(&self) -> Result<DistinguishedName> {
        dn_from_name(&self.inner.tbs_certificate.subject)
    }

    pub fn serial(&self) -> &[u8] {
        self.inner.tbs_certificate.serial_number.as_bytes()
    }

    pub fn validity(&self) -> Validity {
        Validity {
            not_before: time_to_system(&self.inner.tbs_certificate.validity.not_before),
            not_after: time_to_system(&self.inner.tbs_certificate.validity.not_after),
        }
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        spki_to_public_key(&self.inner.tbs_certificate.subject_public_key_info)
    }

    pub fn subject_key_identifier(&self) -> Option<KeyIdentifier> {
        let bytes = extension_value(&self.inner, oid::CE_SUBJECT_KEY_IDENTIFIER)?;
        let octets = OctetString::from_der(&bytes).ok()?;
        KeyIdentifier::from_bytes(octets.as_bytes()).ok()
    }

    pub fn authority_key_identifier(&self) -> Option<KeyIdentifier> {
        let bytes = extension_value(&self.inner, oid::CE_AUTHORITY_KEY_IDENTIFIER)?;
        let akid = AuthorityKeyIdentifier::from_der(&bytes).ok()?;
        let key_id = akid.key_identifier?;
        KeyIdentifier::from_bytes(key_id.as_bytes()).ok()
    }

    pub fn key_usage(&self) -> Option<KeyUsage> {
        let bytes = extension_value(&self.inner, oid::CE_KEY_USAGE)?;
        let bit_string = BitString::from_der(&bytes).ok()?;
        Some(key_usage_from_bitstring(&bit_string))
    }

    pub fn ca_constraint(&self) -> Option<CaConstraint> {
        let bytes = extension_value(&self.inner, oid::CE_BASIC_CONSTRAINTS)?;
        let bc = BasicConstraints::from_der(&bytes).ok()?;
        Some(CaConstraint {
            is_ca: bc.ca,
            path_len: bc.path_len_constraint,
        })
    }

    fn digest_alg(&self) -> Option<DigestAlg> {
        digest_alg_from_oid(self.inner.signature_algorithm.oid)
    }

    /// `Valid` iff the signature over the TBS bytes validates under
    /// `trusted_public_key` and the current instant is within the
    /// certificate's validity window.
    pub fn verify(&self, trusted_public_key: &PublicKey) -> CertificateCheckOutcome {
        let outcome = self.verify_signature(trusted_public_key);
        if outcome != CertificateCheckOutcome::Valid {
            return outcome;
        }
        if !self.validity().contains(SystemTime::now()) {
            return CertificateCheckOutcome::OutOfValidityPeriod;
        }
        CertificateCheckOutcome::Valid
    }

    /// Same as [`verify`](Self::verify) but without the validity-window
    /// check, for callers that apply their own expiry policy.
    pub(crate) fn verify_signature(&self, trusted_public_key: &PublicKey) -> CertificateCheckOutcome {
        let Some(digest) = self.digest_alg() else {
            return CertificateCheckOutcome::OtherError;
        };
        let Ok(tbs_der) = self.inner.tbs_certificate.to_der() else {
            return CertificateCheckOutcome::OtherError;
        };
        let Some(sig_bytes) = self.inner.signature.as_bytes() else {
            return CertificateCheckOutcome::OtherError;
        };
        let prehash = hash_bytes(digest, &tbs_der);
        if verify_prehash(trusted_public_key, digest, &prehash, sig_bytes).is_err() {
            return CertificateCheckOutcome::InvalidSignature;
        }
        CertificateCheckOutcome::Valid
    }
}

pub(crate) fn build_and_sign(
    tbs: TbsCertificate,
    signer: &PrivateKey,
    digest: DigestAlg,
) -> Result<Certificate> {
    let tbs_der = tbs.to_der().map_err(der_err)?;
    let signature_algorithm = signature_algorithm_identifier(signer.key_type(), digest)?;
    let prehash = hash_bytes(digest, &tbs_der);
    let sig_bytes = sign_prehash(signer, digest, &prehash)?;
    let signature = BitString::from_bytes(&sig_bytes).map_err(der_err)?;
    let inner = Asn1Certificate {
        tbs_certificate: tbs,
        signature_algorithm,
        signature,
    };
    let der = inner.to_der().map_err(der_err)?;
    Ok(Certificate { inner, der })
}

pub(crate) fn signature_algorithm_identifier(
    key_type: KeyType,
    digest: DigestAlg,
) -> Result<AlgorithmIdentifierOwned> {
    let oid = match (key_type, digest) {
        (KeyType::Rsa, DigestAlg::Sha256) => oid::SHA_256_WITH_RSA_ENCRYPTION,
        (KeyType::Rsa, DigestAlg::Sha384) => oid::SHA_384_WITH_RSA_ENCRYPTION,
        (KeyType::Rsa, DigestAlg::Sha512) => oid::SHA_512_WITH_RSA_ENCRYPTION,
        (KeyType::Ec, DigestAlg::Sha256) => oid::ECDSA_WITH_SHA_256,
        (KeyType::Ec, DigestAlg::Sha384) => oid::ECDSA_WITH_SHA_384,
        (KeyType::Ec, DigestAlg::Sha512) => oid::ECDSA_WITH_SHA_512,
    };
    let parameters = match key_type {
        KeyType::Rsa => Some(der::Any::new(der::Tag::Null, &[][..]).map_err(der_err)?),
        KeyType::Ec => None,
    };
    Ok(AlgorithmIdentifierOwned { oid, parameters })
}

fn digest_alg_from_oid(oid: der::asn1::ObjectIdentifier) -> Option<DigestAlg> {
    if oid == oid::SHA_256_WITH_RSA_ENCRYPTION || oid == oid::ECDSA_WITH_SHA_256 {
        Some(DigestAlg::Sha256)
    } else if oid == oid::SHA_384_WITH_RSA_ENCRYPTION || oid == oid::ECDSA_WITH_SHA_384 {
        Some(DigestAlg::Sha384)
    } else if oid == oid::SHA_512_WITH_RSA_ENCRYPTION || oid == oid::ECDSA_WITH_SHA_512 {
        Some(DigestAlg::Sha512)
    } else {
        None
    }
}

pub(crate) fn der_err(e: impl std::fmt::Display) -> Error {
    Error::Format(e.to_string())
}

pub(crate) fn make_extension(
    extn_id: der::asn1::ObjectIdentifier,
    critical: bool,
    value: impl Encode,
) -> Result<Extension> {
    let bytes = value.to_der().map_err(der_err)?;
    Ok(Extension {
        extn_id,
        critical,
        extn_value: OctetString::new(bytes).map_err(der_err)?,
    })
}

fn extension_value(cert: &Asn1Certificate, oid: der::asn1::ObjectIdentifier) -> Option<Vec<u8>> {
    cert.tbs_certificate
        .extensions
        .as_ref()?
        .iter()
        .find(|ext| ext.extn_id == oid)
        .map(|ext| ext.extn_value.as_bytes().to_vec())
}

pub(crate) fn key_usage_bitstring(key_usage: KeyUsage) -> Result<BitString> {
    let Some(highest) = key_usage.highest_set_named_bit() else {
        return BitString::new(0, Vec::new()).map_err(der_err);
    };
    let num_bytes = (highest / 8 + 1) as usize;
    let mut bytes = vec![0u8; num_bytes];
    for i in 0..=highest {
        if key_usage.0 & (1 << i) != 0 {
            let byte_idx = (i / 8) as usize;
            let bit_in_byte = 7 - (i % 8);
            bytes[byte_idx] |= 1 << bit_in_byte;
        }
    }
    let unused_bits = 7 - (highest % 8);
    BitString::new(unused_bits as u8, bytes).map_err(der_err)
}

pub(crate) fn key_usage_from_bitstring(bit_string: &BitString) -> KeyUsage {
    let mut bits: u16 = 0;
    for (i, byte) in bit_string.raw_bytes().iter().enumerate() {
        for bit_in_byte in 0..8 {
            let named_bit = i as u32 * 8 + bit_in_byte;
            if named_bit > 8 {
                break;
            }
            if byte & (1 << (7 - bit_in_byte)) != 0 {
                bits |= 1 << named_bit;
            }
        }
    }
    KeyUsage(bits)
}

fn system_time_to_asn1(t: SystemTime) -> Result<Time> {
    let duration = t
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_err(|e| Error::Format(e.to_string()))?;
    let dt = der::DateTime::from_unix_duration(duration).map_err(der_err)?;
    Time::try_from(dt).map_err(der_err)
}

fn to_asn1_validity(validity: Validity) -> Result<Asn1Validity> {
    Ok(Asn1Validity {
        not_before: system_time_to_asn1(validity.not_before)?,
        not_after: system_time_to_asn1(validity.not_after)?,
    })
}

fn time_to_system(t: &Time) -> SystemTime {
    let dt = match t {
        Time::UtcTime(u) => u.to_date_time(),
        Time::GeneralTime(g) => g.to_date_time(),
    };
    SystemTime::UNIX_EPOCH + dt.unix_duration()
}

pub(crate) fn public_key_to_spki(public_key: &PublicKey) -> Result<SubjectPublicKeyInfoOwned> {
    let der_bytes: Vec<u8> = match public_key {
        PublicKey::Rsa(_) => {
            let rsa_key = public_key.to_rsa()?;
            rsa_key
                .to_public_key_der()
                .map_err(der_err)?
                .as_bytes()
                .to_vec()
        }
        PublicKey::Ec(ec) => match ec.curve {
            EcCurve::P256 => ec
                .to_p256()?
                .to_public_key_der()
                .map_err(der_err)?
                .as_bytes()
                .to_vec(),
            EcCurve::P384 => ec
                .to_p384()?
                .to_public_key_der()
                .map_err(der_err)?
                .as_bytes()
                .to_vec(),
            EcCurve::P521 => ec
                .to_p521()?
                .to_public_key_der()
                .map_err(der_err)?
                .as_bytes()
                .to_vec(),
        },
    };
    SubjectPublicKeyInfoOwned::from_der(&der_bytes).map_err(der_err)
}

pub(crate) fn spki_to_public_key(spki: &SubjectPublicKeyInfoOwned) -> Result<PublicKey> {
    let der_bytes = spki.to_der().map_err(der_err)?;
    if spki.algorithm.oid == oid::RSA_ENCRYPTION {
        let rsa_pub = rsa::RsaPublicKey::from_public_key_der(&der_bytes).map_err(der_err)?;
        return Ok(PublicKey::from_rsa(&rsa_pub));
    }
    if spki.algorithm.oid == oid::EC_PUBLIC_KEY {
        let curve_oid = spki.algorithm.parameters_oid().map_err(der_err)?;
        if curve_oid == oid::SECP256R1 {
            let pk = p256::PublicKey::from_public_key_der(&der_bytes).map_err(der_err)?;
            return Ok(PublicKey::Ec(EcPublicParams::from_p256(&pk, false)));
        }
        if curve_oid == oid::SECP384R1 {
            let pk = p384::PublicKey::from_public_key_der(&der_bytes).map_err(der_err)?;
            return Ok(PublicKey::Ec(EcPublicParams::from_p384(&pk, false)));
        }
        if curve_oid == oid::SECP521R1 {
            let pk = p521::PublicKey::from_public_key_der(&der_bytes).map_err(der_err)?;
            return Ok(PublicKey::Ec(EcPublicParams::from_p521(&pk, false)));
        }
        return Err(Error::Format(
            "unsupported EC curve in SubjectPublicKeyInfo".to_string(),
        ));
    }
    Err(Error::Format(
        "unsupported public key algorithm in SubjectPublicKeyInfo".to_string(),
    ))
}

pub(crate) fn dn_to_name(dn: &DistinguishedName) -> Result<Name> {
    let mut rfc4514 = String::new();
    for (i, (t, v)) in dn.attributes().iter().enumerate() {
        if i > 0 {
            rfc4514.push(',');
        }
        write!(rfc4514, "{}={}", t, escape_attribute_value(v)).expect("write to String");
    }
    Name::from_str(&rfc4514).map_err(|e| Error::Format(format!("invalid distinguished name: {e}")))
}

fn escape_attribute_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        if matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';')
            || (i == 0 && (c == '#' || c == ' '))
        {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub(crate) fn dn_from_name(name: &Name) -> Result<DistinguishedName> {
    let rendered = name.to_string();
    let mut dn = DistinguishedName::new();
    for part in split_unescaped(&rendered) {
        if let Some((attribute_type, value)) = part.split_once('=') {
            dn = dn.push(attribute_type.trim(), unescape_value(value));
        }
    }
    Ok(dn)
}

fn split_unescaped(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            current.push(c);
            escaped = true;
        } else if c == ',' {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

fn unescape_value(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    let mut chars = v.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
