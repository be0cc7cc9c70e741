use std::fmt;

/// Errors surfaced by the core.
///
/// Format errors, cryptographic authentication errors and precondition
/// violations raise through this enum.
/// "No matching recipient" is modeled as `Option::None`, not a variant;
/// trust checks and certificate verification return plain enums/bools and
/// never raise.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// Malformed key identifier text, truncated PEM block, invalid
    /// Base64, or ASN.1/DER decode failure.
    Format(String),
    /// AES-CCM tag mismatch or signature mismatch.
    InvalidCiphertext,
    /// Signature did not validate.
    InvalidSignature,
    /// Stream count mismatch, wrong stream index, or an operation
    /// attempted on the wrong key type (e.g. RSA key handed to the EC
    /// wrapping path).
    Precondition(String),
    /// A key, certificate or CSR could not be generated or signed.
    Generation(String),
    /// Underlying byte-stream I/O failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Format(reason) => write!(f, "invalid format: {reason}"),
            Self::InvalidCiphertext => write!(
                f,
                "could not decrypt input; wrong key, or the data is corrupted"
            ),
            Self::InvalidSignature => write!(f, "signature does not validate"),
            Self::Precondition(reason) => write!(f, "precondition violation: {reason}"),
            Self::Generation(reason) => write!(f, "could not generate: {reason}"),
            Self::Io(reason) => write!(f, "stream I/O error: {reason}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
