//! PKCS#10 certificate-signing requests. Hand-assembled the same way as `cert::Certificate` rather
//! than through `x509_cert::builder::RequestBuilder`.

use der::asn1::{BitString, SetOfVec};
use der::{Decode, Encode, Sequence};

use crate::cert::{
    build_and_sign, der_err, dn_from_name, dn_to_name, key_usage_bitstring,
    key_usage_from_bitstring, make_extension, public_key_to_spki, signature_algorithm_identifier,
    spki_to_public_key, CaConstraint, Certificate, KeyUsage, Validity,
};
use crate::dn::DistinguishedName;
use crate::error::Result;
use crate::key::{KeyPair, PrivateKey, PublicKey};
use crate::keyid::KeyIdentifier;
use crate::oid;
use crate::rand::RandomSource;
use crate::signature::{hash_bytes, sign_prehash, verify_prehash, DigestAlg};

/// RFC 2986 `Attribute`: `{ type OBJECT IDENTIFIER, values SET OF ANY }`.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct Pkcs10Attribute {
    oid: der::asn1::ObjectIdentifier,
    values: SetOfVec<der::Any>,
}

impl der::DerOrd for Pkcs10Attribute {
    fn der_cmp(&self, other: &Self) -> der::Result<std::cmp::Ordering> {
        Ok(self.to_der()?.cmp(&other.to_der()?))
    }
}

/// RFC 2986 `CertificationRequestInfo`.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct CertReqInfo {
    version: u8,
    subject: x509_cert::name::Name,
    public_key: spki::SubjectPublicKeyInfoOwned,
    #[asn1(context_specific = "0", constructed = "true", tag_mode = "IMPLICIT")]
    attributes: SetOfVec<Pkcs10Attribute>,
}

/// RFC 2986 `CertificationRequest`.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct RawCsr {
    info: CertReqInfo,
    algorithm: spki::AlgorithmIdentifierOwned,
    signature: BitString,
}

/// A value-typed PKCS#10 CSR, self-signed by the subject. Equality is
/// byte-for-byte DER equality.
#[derive(Clone, Debug)]
pub struct Csr {
    inner: RawCsr,
    der: Vec<u8>,
}

impl PartialEq for Csr {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}
impl Eq for Csr {}

/// Policy governing how `Csr::generate_certificate` turns a request into a
/// certificate.
#[derive(Clone)]
pub struct CsrSigningPolicy {
    pub serial_bit_length: usize,
    pub validity: Validity,
    pub allowed_key_usage: KeyUsage,
    pub copy_requested_extensions: bool,
    pub signature_digest: Option<DigestAlg>,
}

impl Default for CsrSigningPolicy {
    fn default() -> Self {
        Self {
            serial_bit_length: 128,
            validity: Validity::for_duration(std::time::Duration::from_secs(365 * 24 * 3600)),
            allowed_key_usage: KeyUsage::default(),
            copy_requested_extensions: true,
            signature_digest: None,
        }
    }
}

impl Csr {
    /// Self-signs a CSR for `subject_key_pair`'s public key.
    pub fn generate(
        subject_dn: &DistinguishedName,
        subject_key_pair: &KeyPair,
        request_subject_key_identifier: bool,
        request_authority_key_identifier: bool,
        request_key_usages: Option<KeyUsage>,
        request_ca_basic_constraints: Option<CaConstraint>,
    ) -> Result<Self> {
        let mut extensions = Vec::new();
        if request_subject_key_identifier {
            let skid = KeyIdentifier::compute(&subject_key_pair.public);
            extensions.push(make_extension(
                oid::CE_SUBJECT_KEY_IDENTIFIER,
                false,
                der::asn1::OctetString::new(skid.as_bytes().to_vec()).map_err(der_err)?,
            )?);
        }
        if request_authority_key_identifier {
            let akid = KeyIdentifier::compute(&subject_key_pair.public);
            let akid_value = x509_cert::ext::pkix::AuthorityKeyIdentifier {
                key_identifier: Some(
                    der::asn1::OctetString::new(akid.as_bytes().to_vec()).map_err(der_err)?,
                ),
                authority_cert_issuer: None,
                authority_cert_serial_number: None,
            };
            extensions.push(make_extension(
                oid::CE_AUTHORITY_KEY_IDENTIFIER,
                false,
                akid_value,
            )?);
        }
        if let Some(ku) = request_key_usages {
            extensions.push(make_extension(
                oid::CE_KEY_USAGE,
                true,
                key_usage_bitstring(ku)?,
            )?);
        }
        if let Some(ca) = request_ca_basic_constraints {
            let bc = x509_cert::ext::pkix::BasicConstraints {
                ca: ca.is_ca,
                path_len_constraint: ca.path_len,
            };
            extensions.push(make_extension(oid::CE_BASIC_CONSTRAINTS, true, bc)?);
        }

        let mut attributes = SetOfVec::new();
        if !extensions.is_empty() {
            attributes
                .insert(extension_request_attribute(&extensions)?)
                .map_err(der_err)?;
        }

        let info = CertReqInfo {
            version: 0,
            subject: dn_to_name(subject_dn)?,
            public_key: public_key_to_spki(&subject_key_pair.public)?,
            attributes,
        };

        let digest = DigestAlg::Sha256;
        let info_der = info.to_der().map_err(der_err)?;
        let algorithm = signature_algorithm_identifier(subject_key_pair.key_type(), digest)?;
        let prehash = hash_bytes(digest, &info_der);
        let sig_bytes = sign_prehash(&subject_key_pair.private, digest, &prehash)?;
        let signature = BitString::from_bytes(&sig_bytes).map_err(der_err)?;

        let inner = RawCsr {
            info,
            algorithm,
            signature,
        };
        let der = inner.to_der().map_err(der_err)?;
        Ok(Self { inner, der })
    }

    pub fn to_der(&self) -> &[u8] {
        &self.der
    }

    pub fn from_der(bytes: &[u8]) -> Result<Self> {
        let inner = RawCsr::from_der(bytes).map_err(der_err)?;
        Ok(Self {
            inner,
            der: bytes.to_vec(),
        })
    }

    pub fn subject(&self) -> Result<DistinguishedName> {
        dn_from_name(&self.inner.info.subject)
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        spki_to_public_key(&self.inner.info.public_key)
    }

    /// `true` iff the embedded self-signature validates under the request's
    /// own public key.
    pub fn is_self_signature_valid(&self) -> Result<bool> {
        let digest = DigestAlg::Sha256;
        let info_der = self.inner.info.to_der().map_err(der_err)?;
        let prehash = hash_bytes(digest, &info_der);
        let Some(sig_bytes) = self.inner.signature.as_bytes() else {
            return Ok(false);
        };
        let public_key = self.public_key()?;
        Ok(verify_prehash(&public_key, digest, &prehash, sig_bytes).is_ok())
    }

    fn requested_extensions(&self) -> Result<Vec<x509_cert::ext::Extension>> {
        for attr in self.inner.info.attributes.iter() {
            if attr.oid == oid::PKCS9_EXTENSION_REQUEST {
                if let Some(any) = attr.values.iter().next() {
                    let ext_der = any.to_der().map_err(der_err)?;
                    let extensions =
                        Vec::<x509_cert::ext::Extension>::from_der(&ext_der).map_err(der_err)?;
                    return Ok(extensions);
                }
            }
        }
        Ok(Vec::new())
    }

    pub fn requested_subject_key_identifier(&self) -> Result<bool> {
        for ext in self.requested_extensions()? {
            if ext.extn_id == oid::CE_SUBJECT_KEY_IDENTIFIER {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn requested_key_usage(&self) -> Result<Option<KeyUsage>> {
        for ext in self.requested_extensions()? {
            if ext.extn_id == oid::CE_KEY_USAGE {
                let bit_string = BitString::from_der(ext.extn_value.as_bytes()).map_err(der_err)?;
                return Ok(Some(key_usage_from_bitstring(&bit_string)));
            }
        }
        Ok(None)
    }

    pub fn requested_ca_basic_constraints(&self) -> Result<Option<CaConstraint>> {
        for ext in self.requested_extensions()? {
            if ext.extn_id == oid::CE_BASIC_CONSTRAINTS {
                let bc = x509_cert::ext::pkix::BasicConstraints::from_der(
                    ext.extn_value.as_bytes(),
                )
                .map_err(der_err)?;
                return Ok(Some(CaConstraint {
                    is_ca: bc.ca,
                    path_len: bc.path_len_constraint,
                }));
            }
        }
        Ok(None)
    }

    /// Issues a certificate over this request's subject key, under
    /// `issuer_certificate`'s subject DN and `issuer_private_key`. The issuer DN is the issuer
    /// certificate's subject DN; the AKID, when present, is the issuer
    /// certificate's SKID.
    pub fn generate_certificate(
        &self,
        issuer_certificate: &Certificate,
        issuer_private_key: &PrivateKey,
        policy: &CsrSigningPolicy,
        random: &mut dyn RandomSource,
    ) -> Result<Certificate> {
        let subject_public_key = self.public_key()?;
        let issuer_dn = issuer_certificate.subject()?;

        let key_usage = if policy.copy_requested_extensions {
            self.requested_key_usage()?.map(|requested| {
                KeyUsage::from_bits(requested.bits() & policy.allowed_key_usage.bits())
            })
        } else {
            None
        };
        let ca_constraint = if policy.copy_requested_extensions {
            self.requested_ca_basic_constraints()?
        } else {
            None
        };
        let generate_subject_key_identifier =
            policy.copy_requested_extensions && self.requested_subject_key_identifier()?;

        let mut serial = vec![0u8; policy.serial_bit_length.div_ceil(8)];
        random.fill_bytes(&mut serial);
        serial[0] &= 0x7f; // keep the serial a positive INTEGER

        let akid = issuer_certificate.subject_key_identifier();

        Certificate::generate(
            &issuer_dn,
            issuer_private_key,
            &self.subject()?,
            &subject_public_key,
            policy.validity,
            &serial,
            random,
            akid.as_ref(),
            generate_subject_key_identifier,
            key_usage,
            ca_constraint,
            policy.signature_digest,
        )
    }
}

fn extension_request_attribute(extensions: &[x509_cert::ext::Extension]) -> Result<Pkcs10Attribute> {
    let ext_der = extensions.to_vec().to_der().map_err(der_err)?;
    let any = der::Any::from_der(&ext_der).map_err(der_err)?;
    let mut values = SetOfVec::new();
    values.insert(any).map_err(der_err)?;
    Ok(Pkcs10Attribute {
        oid: oid::PKCS9_EXTENSION_REQUEST,
        values,
    })
}
