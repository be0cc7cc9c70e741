//! Streaming signature generator/verifier.
//!
//! Mirrors `jolokia/src/traits.rs`'s streaming `Cipher` trait shape
//! (accumulate via `processBytes`, finalize via `sign()`/`checkSignature()`),
//! adapted from encryption to signing.

use std::io::Read;

use digest::Digest as _;
use rsa::pkcs1v15::{SigningKey as RsaSigningKey, VerifyingKey as RsaVerifyingKey};
use rsa::signature::hazmat::{PrehashSigner as RsaPrehashSigner, PrehashVerifier as RsaPrehashVerifier};
use sha2::{Sha256, Sha384, Sha512};
use signature::hazmat::{PrehashSigner, PrehashVerifier};
use signature::SignatureEncoding;

use crate::error::{Error, Result};
use crate::key::{EcCurve, KeyType, PrivateKey, PublicKey};

/// Supported message digests.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DigestAlg {
    Sha256,
    Sha384,
    Sha512,
}

enum Hasher {
    Sha256(sha2::Sha256),
    Sha384(sha2::Sha384),
    Sha512(sha2::Sha512),
}

impl Hasher {
    fn new(alg: DigestAlg) -> Self {
        match alg {
            DigestAlg::Sha256 => Self::Sha256(sha2::Sha256::new()),
            DigestAlg::Sha384 => Self::Sha384(sha2::Sha384::new()),
            DigestAlg::Sha512 => Self::Sha512(sha2::Sha512::new()),
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(chunk),
            Self::Sha384(h) => h.update(chunk),
            Self::Sha512(h) => h.update(chunk),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha384(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// Streaming signature accumulator over a private key.
pub struct SignatureGenerator {
    private_key: PrivateKey,
    digest: DigestAlg,
    hasher: Hasher,
}

impl SignatureGenerator {
    pub fn new(private_key: PrivateKey, digest: DigestAlg) -> Self {
        Self {
            private_key,
            hasher: Hasher::new(digest),
            digest,
        }
    }

    pub fn process_bytes(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    pub fn consume_reader(&mut self, reader: &mut dyn Read) -> Result<()> {
        let mut buf = [0u8; 8192];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.process_bytes(&buf[..n]);
        }
        Ok(())
    }

    /// Finalizes the accumulated hash and produces a signature.
    pub fn sign(self) -> Result<Vec<u8>> {
        let prehash = self.hasher.finalize();
        sign_prehash(&self.private_key, self.digest, &prehash)
    }
}

/// Streaming signature verifier over a public key.
pub struct SignatureVerifier {
    public_key: PublicKey,
    digest: DigestAlg,
    hasher: Hasher,
}

impl SignatureVerifier {
    pub fn new(public_key: PublicKey, digest: DigestAlg) -> Self {
        Self {
            hasher: Hasher::new(digest),
            public_key,
            digest,
        }
    }

    pub fn process_bytes(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    pub fn consume_reader(&mut self, reader: &mut dyn Read) -> Result<()> {
        let mut buf = [0u8; 8192];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.process_bytes(&buf[..n]);
        }
        Ok(())
    }

    /// Returns whether `signature` validates over the accumulated bytes.
    pub fn is_valid_signature(self, signature: &[u8]) -> bool {
        let prehash = self.hasher.finalize();
        verify_prehash(&self.public_key, self.digest, &prehash, signature).is_ok()
    }

    /// Raises `Error::InvalidSignature` on failure instead of returning a
    /// bool.
    pub fn check_signature(self, signature: &[u8]) -> Result<()> {
        let prehash = self.hasher.finalize();
        verify_prehash(&self.public_key, self.digest, &prehash, signature)
    }
}

/// Hashes `data` in one shot, for callers (certificates, CSRs) that already
/// hold the full byte sequence rather than streaming it.
pub(crate) fn hash_bytes(digest: DigestAlg, data: &[u8]) -> Vec<u8> {
    let mut hasher = Hasher::new(digest);
    hasher.update(data);
    hasher.finalize()
}

pub(crate) fn sign_prehash(
    private_key: &PrivateKey,
    digest: DigestAlg,
    prehash: &[u8],
) -> Result<Vec<u8>> {
    match private_key.key_type() {
        KeyType::Rsa => {
            let rsa_key = private_key.to_rsa()?;
            let signature = match digest {
                DigestAlg::Sha256 => RsaPrehashSigner::sign_prehash(
                    &RsaSigningKey::<Sha256>::new(rsa_key),
                    prehash,
                )
                .map_err(|e| Error::Generation(e.to_string()))?
                .to_vec(),
                DigestAlg::Sha384 => RsaPrehashSigner::sign_prehash(
                    &RsaSigningKey::<Sha384>::new(rsa_key),
                    prehash,
                )
                .map_err(|e| Error::Generation(e.to_string()))?
                .to_vec(),
                DigestAlg::Sha512 => RsaPrehashSigner::sign_prehash(
                    &RsaSigningKey::<Sha512>::new(rsa_key),
                    prehash,
                )
                .map_err(|e| Error::Generation(e.to_string()))?
                .to_vec(),
            };
            Ok(signature)
        }
        KeyType::Ec => {
            let ec = private_key.as_ec()?;
            use secrecy::ExposeSecret;
            match ec.curve {
                EcCurve::P256 => {
                    let sk = p256::ecdsa::SigningKey::from_slice(ec.d.expose_secret())
                        .map_err(|e| Error::Generation(e.to_string()))?;
                    let sig: p256::ecdsa::Signature = PrehashSigner::sign_prehash(&sk, prehash)
                        .map_err(|e| Error::Generation(e.to_string()))?;
                    Ok(sig.to_der().to_bytes().to_vec())
                }
                EcCurve::P384 => {
                    let sk = p384::ecdsa::SigningKey::from_slice(ec.d.expose_secret())
                        .map_err(|e| Error::Generation(e.to_string()))?;
                    let sig: p384::ecdsa::Signature = PrehashSigner::sign_prehash(&sk, prehash)
                        .map_err(|e| Error::Generation(e.to_string()))?;
                    Ok(sig.to_der().to_bytes().to_vec())
                }
                EcCurve::P521 => {
                    let sk = p521::ecdsa::SigningKey::from_slice(ec.d.expose_secret())
                        .map_err(|e| Error::Generation(e.to_string()))?;
                    let sig: p521::ecdsa::Signature = PrehashSigner::sign_prehash(&sk, prehash)
                        .map_err(|e| Error::Generation(e.to_string()))?;
                    Ok(sig.to_der().to_bytes().to_vec())
                }
            }
        }
    }
}

pub(crate) fn verify_prehash(
    public_key: &PublicKey,
    digest: DigestAlg,
    prehash: &[u8],
    signature: &[u8],
) -> Result<()> {
    match public_key.key_type() {
        KeyType::Rsa => {
            let rsa_key = public_key.to_rsa()?;
            let ok = match digest {
                DigestAlg::Sha256 => {
                    let vk = RsaVerifyingKey::<Sha256>::new(rsa_key);
                    let sig = rsa::pkcs1v15::Signature::try_from(signature)
                        .map_err(|e| Error::Format(e.to_string()))?;
                    RsaPrehashVerifier::verify_prehash(&vk, prehash, &sig).is_ok()
                }
                DigestAlg::Sha384 => {
                    let vk = RsaVerifyingKey::<Sha384>::new(rsa_key);
                    let sig = rsa::pkcs1v15::Signature::try_from(signature)
                        .map_err(|e| Error::Format(e.to_string()))?;
                    RsaPrehashVerifier::verify_prehash(&vk, prehash, &sig).is_ok()
                }
                DigestAlg::Sha512 => {
                    let vk = RsaVerifyingKey::<Sha512>::new(rsa_key);
                    let sig = rsa::pkcs1v15::Signature::try_from(signature)
                        .map_err(|e| Error::Format(e.to_string()))?;
                    RsaPrehashVerifier::verify_prehash(&vk, prehash, &sig).is_ok()
                }
            };
            if ok {
                Ok(())
            } else {
                Err(Error::InvalidSignature)
            }
        }
        KeyType::Ec => {
            let ec = public_key.as_ec()?;
            let ok = match ec.curve {
                EcCurve::P256 => {
                    let vk = p256::ecdsa::VerifyingKey::from(&ec.to_p256()?);
                    let sig = p256::ecdsa::Signature::from_der(signature)
                        .map_err(|e| Error::Format(e.to_string()))?;
                    PrehashVerifier::verify_prehash(&vk, prehash, &sig).is_ok()
                }
                EcCurve::P384 => {
                    let vk = p384::ecdsa::VerifyingKey::from(&ec.to_p384()?);
                    let sig = p384::ecdsa::Signature::from_der(signature)
                        .map_err(|e| Error::Format(e.to_string()))?;
                    PrehashVerifier::verify_prehash(&vk, prehash, &sig).is_ok()
                }
                EcCurve::P521 => {
                    let vk = p521::ecdsa::VerifyingKey::from(&ec.to_p521()?);
                    let sig = p521::ecdsa::Signature::from_der(signature)
                        .map_err(|e| Error::Format(e.to_string()))?;
                    PrehashVerifier::verify_prehash(&vk, prehash, &sig).is_ok()
                }
            };
            if ok {
                Ok(())
            } else {
                Err(Error::InvalidSignature)
            }
        }
    }
}
