use std::ops::Range;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use openssl::x509::X509;
use thiserror::Error;

use crate::byte_range::{decode_slot, ByteRange};
use crate::crypto::{common_name, content_digest, verify_signature};
use crate::der::DerError;
use crate::pkcs7::ParsedSignedData;
use crate::Result;

/// Why a well formed signature does not hold.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationFailure {
    /// The signature over the authenticated attributes does not verify with
    /// the embedded certificate.
    #[error("wrong authenticated attributes")]
    AttributeSignatureInvalid,
    /// The signed ranges do not hash to the digest the signer attested.
    #[error("wrong content digest")]
    ContentDigestMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInfo {
    /// The two spans of the file covered by the signature.
    pub signed_byte_ranges: [Range<usize>; 2],
    /// Common name of the signing certificate's subject.
    pub signer: Option<String>,
    /// Signing time claimed in the authenticated attributes.
    pub signing_time: Option<DateTime<Utc>>,
    /// The embedded signed-data structure, without padding.
    pub pkcs7_der: Vec<u8>,
}

/// Outcome of checking a well formed, signed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid(SignatureInfo),
    Invalid(VerificationFailure),
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid(_))
    }
}

/// Checks the detached signature embedded in a signed document.
///
/// Errors are reserved for documents whose signature can not be located or
/// decoded. A signature that is present but wrong is reported through
/// [`Verdict::Invalid`].
///
/// Only the cryptographic binding is checked: the certificate chain is not
/// validated and the certificate is not checked for revocation.
pub fn verify(pdf: &[u8]) -> Result<Verdict> {
    let byte_range = ByteRange::locate(pdf)?;
    let [first, second] = byte_range.signed_ranges();
    debug!("signature covers {first:?} and {second:?}");

    let pkcs7_der = decode_slot(&pdf[byte_range.slot()])?;
    let signed_data = ParsedSignedData::parse(&pkcs7_der)?;
    // The first certificate is the signer's.
    let certificate_der = signed_data
        .certificates
        .first()
        .ok_or(DerError::Missing("signer certificate"))?;
    let certificate = X509::from_der(certificate_der)?;

    let attributes_valid = verify_signature(
        &certificate,
        &signed_data.signed_attributes_der(),
        signed_data.signature,
    )?;
    if !attributes_valid {
        warn!("signature over the authenticated attributes does not verify");
        return Ok(Verdict::Invalid(VerificationFailure::AttributeSignatureInvalid));
    }

    // Only attributes the signer vouched for are read.
    let digest = content_digest([&pdf[first.clone()], &pdf[second.clone()]]);
    if signed_data.message_digest()? != digest.as_slice() {
        warn!("document content does not match the signed digest");
        return Ok(Verdict::Invalid(VerificationFailure::ContentDigestMismatch));
    }

    let signer = common_name(&certificate);
    let signing_time = signed_data.signing_time();
    info!("valid signature by {}", signer.as_deref().unwrap_or("unnamed signer"));

    Ok(Verdict::Valid(SignatureInfo {
        signed_byte_ranges: [first, second],
        signer,
        signing_time,
        pkcs7_der,
    }))
}

/// True only for a well formed document whose signature verifies.
pub fn is_validly_signed(pdf: &[u8]) -> bool {
    match verify(pdf) {
        Ok(verdict) => verdict.is_valid(),
        Err(err) => {
            debug!("document can not be verified: {err}");
            false
        }
    }
}
