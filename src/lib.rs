#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

pub mod byte_range;
pub mod crypto;
pub mod der;
pub mod pkcs7;
pub mod placeholder;
mod sign;
mod verify;
mod writer;

#[cfg(test)]
mod test_support;

use regex::bytes::Regex;
use thiserror::Error;

pub use crypto::KeyMaterial;
pub use placeholder::{add_signature_placeholder, PlaceholderOptions, DEFAULT_SIGNATURE_LENGTH};
pub use sign::{sign, sign_with_pkcs12};
pub use verify::{is_validly_signed, verify, SignatureInfo, Verdict, VerificationFailure};

/// Everything that can go wrong while preparing, signing or verifying a
/// document.
///
/// A document that is well formed but does not verify is not an error; see
/// [`Verdict`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed document")]
    Format(#[from] FormatError),
    #[error("signature needs {required} hex digits but the reserved slot only holds {available}")]
    Capacity { required: usize, available: usize },
    #[error("cryptographic failure")]
    Crypto(#[from] CryptoError),
}

/// The document, or the signature embedded in it, does not have the expected
/// shape.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("PDF parsing error")]
    Parsing(#[from] lopdf::Error),
    #[error("document does not end like a PDF file")]
    NotAPdf,
    #[error("document has no page to host the signature widget")]
    NoPage,
    #[error("could not locate the last cross-reference section")]
    MissingStartXref,
    #[error("no object numbers left for the signature objects")]
    ObjectNumberOverflow,
    #[error("streams can not be written as direct objects")]
    InlineStream,
    #[error("could not find the ByteRange placeholder")]
    MissingByteRangePlaceholder,
    #[error("could not find the /Contents field after the ByteRange")]
    MissingContents,
    #[error("the computed ByteRange does not fit in the placeholder")]
    ByteRangeTooWide,
    #[error("could not find the ByteRange declaration")]
    MissingByteRange,
    #[error("the ByteRange declaration is malformed")]
    MalformedByteRange,
    #[error("file is not signed from the beginning")]
    WrongRangeStart,
    #[error("invalid signature range")]
    InvalidRange,
    #[error("signature range does not cover the whole document")]
    IncompleteCoverage,
    #[error("the signature slot is not a hexadecimal string")]
    InvalidSignatureSlot,
    #[error("malformed signed-data structure")]
    SignedData(#[from] der::DerError),
}

/// Failures of the key material or of the cryptographic primitives.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("openssl error")]
    OpenSsl(#[from] openssl::error::ErrorStack),
    #[error("could not read the key material")]
    KeyFile(#[from] std::io::Error),
    #[error("the PKCS #12 container holds no private key")]
    MissingPrivateKey,
    #[error("the PKCS #12 container holds no certificate")]
    MissingCertificate,
    #[error("only RSA keys are supported")]
    UnsupportedKey,
}

impl From<lopdf::Error> for Error {
    fn from(err: lopdf::Error) -> Self {
        Error::Format(err.into())
    }
}

impl From<der::DerError> for Error {
    fn from(err: der::DerError) -> Self {
        Error::Format(err.into())
    }
}

impl From<openssl::error::ErrorStack> for Error {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Error::Crypto(err.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) struct ExactArrayOrNone<T, const N: usize>(pub Option<[T; N]>);

impl<T, const N: usize> FromIterator<T> for ExactArrayOrNone<T, N> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut iter = iter.into_iter();
        let result = array_init::from_iter(&mut iter);
        let result = if iter.next().is_none() { result } else { None };
        ExactArrayOrNone(result)
    }
}

lazy_static::lazy_static! {
    static ref EOF_REGEX: Regex = Regex::new(r"(?:\r\n|\r|\n)%%EOF[ \t]*(?:\r\n|\r|\n)?$").unwrap();
}

/// Tests if the PDF ends with the %%EOF marker.
pub(crate) fn pdf_ends_with_eof(pdf_bytes: &[u8]) -> bool {
    EOF_REGEX.is_match(pdf_bytes)
}

/// Position of the first occurrence of `needle` in `haystack` at or after
/// `from`.
pub(crate) fn find_bytes(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}
