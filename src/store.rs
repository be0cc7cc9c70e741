//! Certificate store: a
//! `KeyIdentifier -> Certificate` map built by ingesting a PEM source and
//! filtering through a [`TrustValidator`].

use std::collections::HashMap;

use crate::cert::Certificate;
use crate::error::Result;
use crate::key::PublicKey;
use crate::keyid::KeyIdentifier;
use crate::pem::{PemObject, PemReader};
use crate::trust::TrustValidator;

#[derive(Debug, Default)]
pub struct CertificateStore {
    by_identifier: HashMap<KeyIdentifier, Certificate>,
}

impl CertificateStore {
    /// Reads every `CERTIFICATE` block from `pem_source`, keeping only
    /// those `validator.check(cert)` accepts. Rejected certificates are
    /// not indexed. Duplicate certificates for the same key identifier are
    /// deduplicated — the first accepted wins.
    pub fn from_pem(pem_source: &str, validator: &dyn TrustValidator) -> Result<Self> {
        let mut by_identifier = HashMap::new();
        for entry in PemReader::new(pem_source) {
            let entry = entry?;
            let PemObject::Certificate(cert) = entry.object else {
                continue;
            };
            if !validator.check(&cert) {
                continue;
            }
            let Ok(public_key) = cert.public_key() else {
                continue;
            };
            let id = KeyIdentifier::compute(&public_key);
            by_identifier.entry(id).or_insert(cert);
        }
        Ok(Self { by_identifier })
    }

    pub fn lookup(&self, id: &KeyIdentifier) -> Option<&Certificate> {
        self.by_identifier.get(id)
    }

    pub fn len(&self) -> usize {
        self.by_identifier.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identifier.is_empty()
    }

    pub fn identifiers_and_public_keys(&self) -> impl Iterator<Item = (&KeyIdentifier, PublicKey)> {
        self.by_identifier
            .iter()
            .filter_map(|(id, cert)| cert.public_key().ok().map(|pk| (id, pk)))
    }

    pub fn certificates(&self) -> impl Iterator<Item = &Certificate> {
        self.by_identifier.values()
    }
}
