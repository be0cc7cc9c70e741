//! Trust validators: two implementations of
//! the same `check(cert) -> bool` contract.

use std::time::SystemTime;

use crate::cert::{Certificate, CertificateCheckOutcome, KeyUsage};
use crate::key::PublicKey;
use crate::pem::{PemObject, PemReader};

/// Shared contract: does this cert check out against whatever the
/// implementation trusts?
pub trait TrustValidator {
    fn check(&self, cert: &Certificate) -> bool;
}

/// Trusts a fixed set of public keys directly. Does not require the
/// certificate's issuer DN to match anything — it simply tries every
/// stored key until one validates the certificate.
#[derive(Clone, Debug, Default)]
pub struct KeyTrustValidator {
    trusted_keys: Vec<PublicKey>,
}

impl KeyTrustValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: PublicKey) -> Self {
        self.trusted_keys.push(key);
        self
    }

    pub fn add_key(&mut self, key: PublicKey) {
        self.trusted_keys.push(key);
    }
}

impl TrustValidator for KeyTrustValidator {
    fn check(&self, cert: &Certificate) -> bool {
        self.trusted_keys
            .iter()
            .any(|key| cert.verify(key) == CertificateCheckOutcome::Valid)
    }
}

/// Trusts a fixed set of CA certificates read from a PEM source. Only CA
/// certs carrying an explicit `KeyUsage` extension with `KeyCertSign` set
/// and `isCA = true` are admitted; everything else is silently dropped.
#[derive(Clone, Debug, Default)]
pub struct CaCertTrustValidator {
    ca_certs: Vec<Certificate>,
    /// Skips the `[notBefore, notAfter)` check on the *subject* certificate
    /// when validating.
    pub ignore_validity_period: bool,
}

impl CaCertTrustValidator {
    /// Reads every `CERTIFICATE` block from `pem_source`, admitting only
    /// those that qualify as CAs. Non-certificate blocks are ignored;
    /// certificates that fail admission are dropped without error. Errors
    /// only on a malformed PEM block.
    pub fn from_pem(pem_source: &str) -> crate::error::Result<Self> {
        let mut ca_certs = Vec::new();
        for entry in PemReader::new(pem_source) {
            let entry = entry?;
            if let PemObject::Certificate(cert) = entry.object {
                if is_admissible_ca(&cert) {
                    ca_certs.push(cert);
                }
            }
        }
        Ok(Self {
            ca_certs,
            ignore_validity_period: false,
        })
    }

    pub fn ca_certificates(&self) -> &[Certificate] {
        &self.ca_certs
    }

    fn find_issuer(&self, cert: &Certificate) -> Option<&Certificate> {
        if let Some(akid) = cert.authority_key_identifier() {
            return self
                .ca_certs
                .iter()
                .find(|ca| ca.subject_key_identifier() == Some(akid));
        }
        let issuer_dn = cert.issuer().ok()?;
        self.ca_certs
            .iter()
            .find(|ca| ca.subject().ok().as_ref() == Some(&issuer_dn))
    }
}

fn is_admissible_ca(cert: &Certificate) -> bool {
    let Some(ca_constraint) = cert.ca_constraint() else {
        return false;
    };
    if !ca_constraint.is_ca {
        return false;
    }
    let Some(key_usage) = cert.key_usage() else {
        return false;
    };
    key_usage.contains(KeyUsage::KEY_CERT_SIGN)
}

impl TrustValidator for CaCertTrustValidator {
    fn check(&self, cert: &Certificate) -> bool {
        let Some(ca_cert) = self.find_issuer(cert) else {
            return false;
        };
        let Ok(ca_public_key) = ca_cert.public_key() else {
            return false;
        };
        if self.ignore_validity_period {
            cert.verify_signature(&ca_public_key) == CertificateCheckOutcome::Valid
        } else {
            cert.verify(&ca_public_key) == CertificateCheckOutcome::Valid
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{CaConstraint, Validity};
    use crate::csr::{Csr, CsrSigningPolicy};
    use crate::dn::DistinguishedName;
    use crate::key::{EcCurve, KeyPair};
    use crate::pem::PemWriter;
    use crate::rand::OsRandomSource;
    use std::time::Duration;

    fn make_ca() -> (KeyPair, Certificate) {
        let kp = KeyPair::generate_ec(&mut OsRandomSource, EcCurve::P256).unwrap();
        let dn = DistinguishedName::new().push("cn", "root-ca");
        let cert = Certificate::generate(
            &dn,
            &kp.private,
            &dn,
            &kp.public,
            Validity::for_duration(Duration::from_secs(3600)),
            &[1],
            &mut OsRandomSource,
            None,
            true,
            Some(KeyUsage::KEY_CERT_SIGN),
            Some(CaConstraint {
                is_ca: true,
                path_len: None,
            }),
            None,
        )
        .unwrap();
        (kp, cert)
    }

    #[test]
    fn key_trust_validator_accepts_a_certificate_signed_by_a_trusted_key() {
        let (kp, cert) = make_ca();
        let validator = KeyTrustValidator::new().with_key(kp.public);
        assert!(validator.check(&cert));
    }

    #[test]
    fn key_trust_validator_rejects_an_untrusted_key() {
        let (_kp, cert) = make_ca();
        let other = KeyPair::generate_ec(&mut OsRandomSource, EcCurve::P256).unwrap();
        let validator = KeyTrustValidator::new().with_key(other.public);
        assert!(!validator.check(&cert));
    }

    #[test]
    fn ca_cert_validator_admits_only_qualifying_certs_and_validates_leaves() {
        let (ca_kp, ca_cert) = make_ca();
        let leaf_kp = KeyPair::generate_ec(&mut OsRandomSource, EcCurve::P256).unwrap();
        let csr = Csr::generate(
            &DistinguishedName::new().push("cn", "leaf"),
            &leaf_kp,
            true,
            false,
            Some(KeyUsage::DIGITAL_SIGNATURE),
            None,
        )
        .unwrap();
        let policy = CsrSigningPolicy {
            allowed_key_usage: KeyUsage::DIGITAL_SIGNATURE,
            ..CsrSigningPolicy::default()
        };
        let leaf_cert = csr
            .generate_certificate(&ca_cert, &ca_kp.private, &policy, &mut OsRandomSource)
            .unwrap();

        // Not a CA: has DIGITAL_SIGNATURE but no CaConstraint at all.
        let non_ca_kp = KeyPair::generate_ec(&mut OsRandomSource, EcCurve::P256).unwrap();
        let non_ca_dn = DistinguishedName::new().push("cn", "not-a-ca");
        let non_ca_cert = Certificate::generate(
            &non_ca_dn,
            &non_ca_kp.private,
            &non_ca_dn,
            &non_ca_kp.public,
            Validity::for_duration(Duration::from_secs(3600)),
            &[2],
            &mut OsRandomSource,
            None,
            true,
            Some(KeyUsage::KEY_CERT_SIGN),
            None,
            None,
        )
        .unwrap();

        let mut writer = PemWriter::new();
        writer
            .push_certificate(&ca_cert)
            .unwrap()
            .push_certificate(&non_ca_cert)
            .unwrap();
        let validator = CaCertTrustValidator::from_pem(&writer.finish()).unwrap();

        assert_eq!(validator.ca_certificates().len(), 1);
        assert!(validator.check(&leaf_cert));
        assert_eq!(
            leaf_cert.subject_key_identifier(),
            Some(crate::keyid::KeyIdentifier::compute(&leaf_kp.public))
        );
    }

    #[test]
    fn ca_cert_without_explicit_key_usage_is_rejected_even_if_marked_ca() {
        let kp = KeyPair::generate_ec(&mut OsRandomSource, EcCurve::P256).unwrap();
        let dn = DistinguishedName::new().push("cn", "sketchy-ca");
        let cert = Certificate::generate(
            &dn,
            &kp.private,
            &dn,
            &kp.public,
            Validity::for_duration(Duration::from_secs(3600)),
            &[1],
            &mut OsRandomSource,
            None,
            false,
            None,
            Some(CaConstraint {
                is_ca: true,
                path_len: None,
            }),
            None,
        )
        .unwrap();

        let mut writer = PemWriter::new();
        writer.push_certificate(&cert).unwrap();
        let validator = CaCertTrustValidator::from_pem(&writer.finish()).unwrap();
        assert!(validator.ca_certificates().is_empty());
    }

    #[test]
    fn expired_leaf_is_rejected_unless_validity_is_ignored() {
        let (ca_kp, ca_cert) = make_ca();
        let leaf_kp = KeyPair::generate_ec(&mut OsRandomSource, EcCurve::P256).unwrap();
        let past = SystemTime::now() - Duration::from_secs(10_000);
        let leaf_cert = Certificate::generate(
            &DistinguishedName::new().push("cn", "root-ca"),
            &ca_kp.private,
            &DistinguishedName::new().push("cn", "leaf"),
            &leaf_kp.public,
            Validity::explicit(past - Duration::from_secs(1000), past),
            &[9],
            &mut OsRandomSource,
            Some(&crate::keyid::KeyIdentifier::compute(&ca_kp.public)),
            false,
            None,
            None,
            None,
        )
        .unwrap();

        let mut writer = PemWriter::new();
        writer.push_certificate(&ca_cert).unwrap();
        let mut validator = CaCertTrustValidator::from_pem(&writer.finish()).unwrap();

        assert!(!validator.check(&leaf_cert));
        validator.ignore_validity_period = true;
        assert!(validator.check(&leaf_cert));
    }
}
