//! Key primitives.
//!
//! Public/private keys are a tagged pair `(KeyType, payload)` rather than
//! an abstract base with virtuals, mirroring the shape of
//! `jolokia/src/traits.rs`'s `GeneratedKey` enum.

use elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use elliptic_curve::{PublicKey as GenericPublicKey, SecretKey as GenericSecretKey};
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use secrecy::{ExposeSecret, SecretSlice};

use crate::error::{Error, Result};
use crate::rand::RandomSource;

/// Closed tagged union distinguishing RSA and EC keys.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum KeyType {
    Rsa,
    Ec,
}

/// Named EC curves with available pure-Rust arithmetic. secp192r1,
/// secp224r1 and secp239r1 are not supported — see SPEC_FULL.md §10.3.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EcCurve {
    P256,
    P384,
    P521,
}

impl EcCurve {
    /// Byte length of a field element / coordinate for this curve.
    pub fn field_byte_len(self) -> usize {
        match self {
            Self::P256 => 32,
            Self::P384 => 48,
            Self::P521 => 66,
        }
    }
}

/// An uncompressed EC point `Q`, coordinates left-padded to the curve's
/// field byte length.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EcPoint {
    pub x: Vec<u8>,
    pub y: Vec<u8>,
}

impl EcPoint {
    /// `0x04 ‖ X ‖ Y` uncompressed SEC1 encoding.
    pub fn to_uncompressed(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.x.len() + self.y.len());
        out.push(0x04);
        out.extend_from_slice(&self.x);
        out.extend_from_slice(&self.y);
        out
    }

    pub fn from_uncompressed(curve: EcCurve, bytes: &[u8]) -> Result<Self> {
        let n = curve.field_byte_len();
        if bytes.len() != 1 + 2 * n || bytes[0] != 0x04 {
            return Err(Error::Format(
                "expected an uncompressed EC point".to_string(),
            ));
        }
        Ok(Self {
            x: bytes[1..1 + n].to_vec(),
            y: bytes[1 + n..1 + 2 * n].to_vec(),
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RsaPublicParams {
    pub n: Vec<u8>,
    pub e: Vec<u8>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EcPublicParams {
    pub curve: EcCurve,
    /// `true` when the key was encoded with explicit curve parameters
    /// rather than the named-curve OID.
    pub explicit_params: bool,
    pub point: EcPoint,
}

/// A public key, tagged by `KeyType`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PublicKey {
    Rsa(RsaPublicParams),
    Ec(EcPublicParams),
}

impl PublicKey {
    pub fn key_type(&self) -> KeyType {
        match self {
            Self::Rsa(_) => KeyType::Rsa,
            Self::Ec(_) => KeyType::Ec,
        }
    }

    pub fn to_rsa(&self) -> Result<RsaPublicKey> {
        match self {
            Self::Rsa(p) => RsaPublicKey::new(
                BigUint::from_bytes_be(&p.n),
                BigUint::from_bytes_be(&p.e),
            )
            .map_err(|e| Error::Format(e.to_string())),
            Self::Ec(_) => Err(Error::Precondition("key is not an RSA key".to_string())),
        }
    }

    pub fn from_rsa(key: &RsaPublicKey) -> Self {
        Self::Rsa(RsaPublicParams {
            n: key.n().to_bytes_be(),
            e: key.e().to_bytes_be(),
        })
    }

    pub fn as_ec(&self) -> Result<&EcPublicParams> {
        match self {
            Self::Ec(p) => Ok(p),
            Self::Rsa(_) => Err(Error::Precondition("key is not an EC key".to_string())),
        }
    }
}

impl EcPublicParams {
    pub fn to_p256(&self) -> Result<p256::PublicKey> {
        self.require_curve(EcCurve::P256)?;
        let encoded = p256::EncodedPoint::from_affine_coordinates(
            elliptic_curve::generic_array::GenericArray::from_slice(&self.point.x),
            elliptic_curve::generic_array::GenericArray::from_slice(&self.point.y),
            false,
        );
        Option::from(p256::PublicKey::from_encoded_point(&encoded))
            .ok_or_else(|| Error::Format("point is not on curve P-256".to_string()))
    }

    pub fn to_p384(&self) -> Result<p384::PublicKey> {
        self.require_curve(EcCurve::P384)?;
        let encoded = p384::EncodedPoint::from_affine_coordinates(
            elliptic_curve::generic_array::GenericArray::from_slice(&self.point.x),
            elliptic_curve::generic_array::GenericArray::from_slice(&self.point.y),
            false,
        );
        Option::from(p384::PublicKey::from_encoded_point(&encoded))
            .ok_or_else(|| Error::Format("point is not on curve P-384".to_string()))
    }

    pub fn to_p521(&self) -> Result<p521::PublicKey> {
        self.require_curve(EcCurve::P521)?;
        let encoded = p521::EncodedPoint::from_affine_coordinates(
            elliptic_curve::generic_array::GenericArray::from_slice(&self.point.x),
            elliptic_curve::generic_array::GenericArray::from_slice(&self.point.y),
            false,
        );
        Option::from(p521::PublicKey::from_encoded_point(&encoded))
            .ok_or_else(|| Error::Format("point is not on curve P-521".to_string()))
    }

    fn require_curve(&self, curve: EcCurve) -> Result<()> {
        if self.curve != curve {
            return Err(Error::Precondition(format!(
                "key is on the wrong curve: expected {curve:?}, got {:?}",
                self.curve
            )));
        }
        Ok(())
    }

    pub fn from_p256(key: &p256::PublicKey, explicit_params: bool) -> Self {
        let encoded = key.to_encoded_point(false);
        Self {
            curve: EcCurve::P256,
            explicit_params,
            point: EcPoint {
                x: encoded.x().expect("uncompressed point has x").to_vec(),
                y: encoded.y().expect("uncompressed point has y").to_vec(),
            },
        }
    }

    pub fn from_p384(key: &p384::PublicKey, explicit_params: bool) -> Self {
        let encoded = key.to_encoded_point(false);
        Self {
            curve: EcCurve::P384,
            explicit_params,
            point: EcPoint {
                x: encoded.x().expect("uncompressed point has x").to_vec(),
                y: encoded.y().expect("uncompressed point has y").to_vec(),
            },
        }
    }

    pub fn from_p521(key: &p521::PublicKey, explicit_params: bool) -> Self {
        let encoded = key.to_encoded_point(false);
        Self {
            curve: EcCurve::P521,
            explicit_params,
            point: EcPoint {
                x: encoded.x().expect("uncompressed point has x").to_vec(),
                y: encoded.y().expect("uncompressed point has y").to_vec(),
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct RsaPrivateParams {
    pub n: Vec<u8>,
    pub e: Vec<u8>,
    pub d: SecretSlice<u8>,
    /// Prime factors (p, q, and any additional primes), as CRT parameters.
    pub primes: Vec<SecretSlice<u8>>,
}

impl PartialEq for RsaPrivateParams {
    fn eq(&self, other: &Self) -> bool {
        self.n == other.n
            && self.e == other.e
            && self.d.expose_secret() == other.d.expose_secret()
            && self.primes.len() == other.primes.len()
            && self
                .primes
                .iter()
                .zip(other.primes.iter())
                .all(|(a, b)| a.expose_secret() == b.expose_secret())
    }
}
impl Eq for RsaPrivateParams {}

#[derive(Clone, Debug)]
pub struct EcPrivateParams {
    pub curve: EcCurve,
    pub explicit_params: bool,
    pub d: SecretSlice<u8>,
}

impl PartialEq for EcPrivateParams {
    fn eq(&self, other: &Self) -> bool {
        self.curve == other.curve
            && self.explicit_params == other.explicit_params
            && self.d.expose_secret() == other.d.expose_secret()
    }
}
impl Eq for EcPrivateParams {}

impl EcPrivateParams {
    fn require_curve(&self, curve: EcCurve) -> Result<()> {
        if self.curve != curve {
            return Err(Error::Precondition(format!(
                "key is on the wrong curve: expected {curve:?}, got {:?}",
                self.curve
            )));
        }
        Ok(())
    }

    pub fn to_p256(&self) -> Result<p256::SecretKey> {
        self.require_curve(EcCurve::P256)?;
        p256::SecretKey::from_slice(self.d.expose_secret()).map_err(|e| Error::Format(e.to_string()))
    }

    pub fn to_p384(&self) -> Result<p384::SecretKey> {
        self.require_curve(EcCurve::P384)?;
        p384::SecretKey::from_slice(self.d.expose_secret()).map_err(|e| Error::Format(e.to_string()))
    }

    pub fn to_p521(&self) -> Result<p521::SecretKey> {
        self.require_curve(EcCurve::P521)?;
        p521::SecretKey::from_slice(self.d.expose_secret()).map_err(|e| Error::Format(e.to_string()))
    }
}

/// A private key, tagged by `KeyType`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PrivateKey {
    Rsa(RsaPrivateParams),
    Ec(EcPrivateParams),
}

impl PrivateKey {
    pub fn key_type(&self) -> KeyType {
        match self {
            Self::Rsa(_) => KeyType::Rsa,
            Self::Ec(_) => KeyType::Ec,
        }
    }

    pub fn to_rsa(&self) -> Result<RsaPrivateKey> {
        match self {
            Self::Rsa(p) => {
                let n = BigUint::from_bytes_be(&p.n);
                let e = BigUint::from_bytes_be(&p.e);
                let d = BigUint::from_bytes_be(p.d.expose_secret());
                let primes = p
                    .primes
                    .iter()
                    .map(|prime| BigUint::from_bytes_be(prime.expose_secret()))
                    .collect();
                let mut key = RsaPrivateKey::from_components(n, e, d, primes)
                    .map_err(|e| Error::Format(e.to_string()))?;
                key.precompute().map_err(|e| Error::Format(e.to_string()))?;
                Ok(key)
            }
            Self::Ec(_) => Err(Error::Precondition("key is not an RSA key".to_string())),
        }
    }

    pub fn from_rsa(key: &RsaPrivateKey) -> Self {
        let primes = key
            .primes()
            .iter()
            .map(|p| SecretSlice::from(p.to_bytes_be()))
            .collect();
        Self::Rsa(RsaPrivateParams {
            n: key.n().to_bytes_be(),
            e: key.e().to_bytes_be(),
            d: SecretSlice::from(key.d().to_bytes_be()),
            primes,
        })
    }

    pub fn as_ec(&self) -> Result<&EcPrivateParams> {
        match self {
            Self::Ec(p) => Ok(p),
            Self::Rsa(_) => Err(Error::Precondition("key is not an EC key".to_string())),
        }
    }

    /// Derive `Q = d·G` from an EC private key alone.
    pub fn derive_public(&self) -> Result<PublicKey> {
        let ec = self.as_ec()?;
        let public = match ec.curve {
            EcCurve::P256 => {
                let sk: GenericSecretKey<p256::NistP256> =
                    GenericSecretKey::from_slice(ec.d.expose_secret())
                        .map_err(|e| Error::Format(e.to_string()))?;
                let pk: GenericPublicKey<p256::NistP256> = sk.public_key();
                PublicKey::Ec(EcPublicParams::from_p256(&pk, ec.explicit_params))
            }
            EcCurve::P384 => {
                let sk: GenericSecretKey<p384::NistP384> =
                    GenericSecretKey::from_slice(ec.d.expose_secret())
                        .map_err(|e| Error::Format(e.to_string()))?;
                let pk: GenericPublicKey<p384::NistP384> = sk.public_key();
                PublicKey::Ec(EcPublicParams::from_p384(&pk, ec.explicit_params))
            }
            EcCurve::P521 => {
                let sk: GenericSecretKey<p521::NistP521> =
                    GenericSecretKey::from_slice(ec.d.expose_secret())
                        .map_err(|e| Error::Format(e.to_string()))?;
                let pk: GenericPublicKey<p521::NistP521> = sk.public_key();
                PublicKey::Ec(EcPublicParams::from_p521(&pk, ec.explicit_params))
            }
        };
        Ok(public)
    }
}

/// An immutable value object pairing a public and private key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyPair {
    pub public: PublicKey,
    pub private: PrivateKey,
}

impl KeyPair {
    pub fn key_type(&self) -> KeyType {
        self.public.key_type()
    }

    /// Construct a key pair from only a loaded private key, deriving the
    /// public key (EC: `Q = d·G`; RSA: from n/e already embedded).
    pub fn from_private(private: PrivateKey) -> Result<Self> {
        let public = match &private {
            PrivateKey::Rsa(p) => PublicKey::Rsa(RsaPublicParams {
                n: p.n.clone(),
                e: p.e.clone(),
            }),
            PrivateKey::Ec(_) => private.derive_public()?,
        };
        Ok(Self { public, private })
    }

    pub fn generate_rsa(rng: &mut dyn RandomSource, bits: usize) -> Result<Self> {
        let mut seeded = rng.child(32);
        let private = RsaPrivateKey::new(&mut seeded, bits)
            .map_err(|e| Error::Generation(e.to_string()))?;
        let public = PublicKey::from_rsa(&private.to_public_key());
        Ok(Self {
            public,
            private: PrivateKey::from_rsa(&private),
        })
    }

    pub fn generate_ec(rng: &mut dyn RandomSource, curve: EcCurve) -> Result<Self> {
        let mut seeded = rng.child(32);
        let (public, private) = match curve {
            EcCurve::P256 => {
                let sk = p256::SecretKey::random(&mut seeded);
                (
                    PublicKey::Ec(EcPublicParams::from_p256(&sk.public_key(), false)),
                    sk.to_bytes().to_vec(),
                )
            }
            EcCurve::P384 => {
                let sk = p384::SecretKey::random(&mut seeded);
                (
                    PublicKey::Ec(EcPublicParams::from_p384(&sk.public_key(), false)),
                    sk.to_bytes().to_vec(),
                )
            }
            EcCurve::P521 => {
                let sk = p521::SecretKey::random(&mut seeded);
                (
                    PublicKey::Ec(EcPublicParams::from_p521(&sk.public_key(), false)),
                    sk.to_bytes().to_vec(),
                )
            }
        };
        Ok(Self {
            public,
            private: PrivateKey::Ec(EcPrivateParams {
                curve,
                explicit_params: false,
                d: SecretSlice::from(private),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rand::OsRandomSource;

    #[test]
    fn ec_public_point_round_trips_uncompressed_encoding() {
        let kp = KeyPair::generate_ec(&mut OsRandomSource, EcCurve::P256).unwrap();
        let ec = kp.public.as_ec().unwrap();
        let encoded = ec.point.to_uncompressed();
        let decoded = EcPoint::from_uncompressed(EcCurve::P256, &encoded).unwrap();
        assert_eq!(ec.point, decoded);
    }

    #[test]
    fn derive_public_from_ec_private_matches_generated_public() {
        let kp = KeyPair::generate_ec(&mut OsRandomSource, EcCurve::P384).unwrap();
        let derived = kp.private.derive_public().unwrap();
        assert_eq!(derived, kp.public);
    }

    #[test]
    fn key_pair_from_private_only_derives_matching_public_ec() {
        let kp = KeyPair::generate_ec(&mut OsRandomSource, EcCurve::P521).unwrap();
        let rebuilt = KeyPair::from_private(kp.private.clone()).unwrap();
        assert_eq!(rebuilt.public, kp.public);
    }

    #[test]
    fn rsa_generate_and_round_trip_private_to_crate_type() {
        let kp = KeyPair::generate_rsa(&mut OsRandomSource, 1024).unwrap();
        let rsa_priv = kp.private.to_rsa().unwrap();
        let rsa_pub = kp.public.to_rsa().unwrap();
        assert_eq!(rsa_priv.to_public_key().n(), rsa_pub.n());
    }
}
