//! A hybrid end-to-end multi-recipient encryption core: generate or load
//! RSA/EC key material, certify it, wrap a random data key per recipient,
//! and encrypt one or more independent streams under it.

pub mod cert;
pub mod csr;
pub mod data;
pub mod dn;
pub mod error;
pub mod info;
pub mod key;
pub mod keyid;
pub mod keywrap;
pub mod oid;
pub mod pem;
pub mod rand;
pub mod signature;
pub mod store;
pub mod trust;

pub use data::{DataDecryptor, DataEncryptor};
pub use error::{Error, Result};
pub use info::{DataKeyInfo, DataMode, EncryptionInfo, KeyWrapMode};
pub use key::{EcCurve, KeyPair, KeyType, PrivateKey, PublicKey};
pub use keyid::KeyIdentifier;
pub use keywrap::{KeyDecryptor, KeyEncryptor};
pub use pem::{PemEntry, PemObject, PemReader, PemWriter};
pub use rand::{OsRandomSource, RandomSource};
pub use signature::{DigestAlg, SignatureGenerator, SignatureVerifier};
pub use store::CertificateStore;
pub use trust::{CaCertTrustValidator, KeyTrustValidator, TrustValidator};
