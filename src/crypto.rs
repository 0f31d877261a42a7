//! OpenSSL side of the signature: key material, RSA with SHA-256, and the
//! content digest.

use std::fmt;
use std::path::Path;

use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{Id, PKey, Private};
use openssl::sha::Sha256;
use openssl::sign::{Signer, Verifier};
use openssl::x509::{X509NameEntryRef, X509NameRef, X509};

use crate::CryptoError;

/// Certificate and private key of the signer.
///
/// Load it once and share it by reference; it is never mutated after loading.
pub struct KeyMaterial {
    certificate: X509,
    certificate_der: Vec<u8>,
    private_key: PKey<Private>,
}

impl KeyMaterial {
    /// Loads the first certificate and the private key of a PKCS #12
    /// container. Only RSA keys are accepted.
    pub fn from_pkcs12(pkcs12_der: &[u8], passphrase: &str) -> Result<Self, CryptoError> {
        let parsed = Pkcs12::from_der(pkcs12_der)?.parse2(passphrase)?;
        let private_key = parsed.pkey.ok_or(CryptoError::MissingPrivateKey)?;
        let certificate = parsed.cert.ok_or(CryptoError::MissingCertificate)?;

        if private_key.id() != Id::RSA {
            return Err(CryptoError::UnsupportedKey);
        }

        let certificate_der = certificate.to_der()?;
        Ok(Self {
            certificate,
            certificate_der,
            private_key,
        })
    }

    /// Reads a PKCS #12 file from disk.
    pub fn load<P: AsRef<Path>>(path: P, passphrase: &str) -> Result<Self, CryptoError> {
        Self::from_pkcs12(&std::fs::read(path)?, passphrase)
    }

    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    /// RSA PKCS #1 v1.5 signature with SHA-256.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.private_key)?;
        signer.update(data)?;
        Ok(signer.sign_to_vec()?)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("subject", &common_name(&self.certificate))
            .finish_non_exhaustive()
    }
}

/// SHA-256 over the concatenation of the signed ranges.
pub fn content_digest(ranges: [&[u8]; 2]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for range in ranges {
        hasher.update(range);
    }
    hasher.finish()
}

/// Checks an RSA/SHA-256 signature with the certificate's public key.
pub fn verify_signature(
    certificate: &X509,
    signed: &[u8],
    signature: &[u8],
) -> Result<bool, CryptoError> {
    let public_key = certificate.public_key()?;
    if public_key.id() != Id::RSA {
        return Err(CryptoError::UnsupportedKey);
    }
    let mut verifier = Verifier::new(MessageDigest::sha256(), &public_key)?;
    verifier.update(signed)?;
    // OpenSSL reports some mismatches, like a signature of the wrong size for
    // the key, as errors rather than as a failed verification.
    Ok(verifier.verify(signature).unwrap_or(false))
}

/// The subject's common name, if there is exactly one.
pub fn common_name(certificate: &X509) -> Option<String> {
    let entry = get_only_entry(certificate.subject_name(), Nid::COMMONNAME)?;
    String::from_utf8(entry.data().as_slice().to_vec()).ok()
}

/// None if there is not exactly one entry with the given NID in the
/// distinguished name.
fn get_only_entry(name: &X509NameRef, nid: Nid) -> Option<&X509NameEntryRef> {
    let mut entries = name.entries_by_nid(nid);
    match (entries.next(), entries.next()) {
        (Some(entry), None) => Some(entry),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use openssl::ec::{EcGroup, EcKey};

    use super::*;
    use crate::test_support::{self, ALICE, BOB};

    #[test]
    fn loads_pkcs12_with_empty_passphrase() {
        let der = test_support::pkcs12_der("Carol", "");
        let key = KeyMaterial::from_pkcs12(&der, "").unwrap();
        assert_eq!(common_name(key.certificate()).as_deref(), Some("Carol"));
        assert_eq!(key.certificate_der(), key.certificate().to_der().unwrap());
    }

    #[test]
    fn wrong_passphrase_is_a_crypto_error() {
        let der = test_support::pkcs12_der("Carol", "secret");
        assert!(matches!(
            KeyMaterial::from_pkcs12(&der, ""),
            Err(CryptoError::OpenSsl(_))
        ));
        assert!(KeyMaterial::from_pkcs12(&der, "secret").is_ok());
    }

    #[test]
    fn garbage_is_a_crypto_error() {
        assert!(matches!(
            KeyMaterial::from_pkcs12(b"definitely not PKCS #12", ""),
            Err(CryptoError::OpenSsl(_))
        ));
    }

    #[test]
    fn missing_file_is_reported() {
        assert!(matches!(
            KeyMaterial::load("/nonexistent/certificate.p12", ""),
            Err(CryptoError::KeyFile(_))
        ));
    }

    #[test]
    fn rejects_non_rsa_keys() {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let pkey = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
        let der = test_support::pkcs12_der_for(&pkey, "Dave", "");
        assert!(matches!(
            KeyMaterial::from_pkcs12(&der, ""),
            Err(CryptoError::UnsupportedKey)
        ));
    }

    #[test]
    fn signature_checks_against_the_right_certificate() {
        let signature = ALICE.sign(b"authenticated attributes").unwrap();
        assert!(verify_signature(ALICE.certificate(), b"authenticated attributes", &signature).unwrap());
        assert!(!verify_signature(ALICE.certificate(), b"other attributes", &signature).unwrap());
        assert!(!verify_signature(BOB.certificate(), b"authenticated attributes", &signature).unwrap());
    }

    #[test]
    fn verification_requires_an_rsa_certificate() {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let pkey = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
        let certificate = test_support::self_signed_certificate(&pkey, "Erin");

        let mut signer = Signer::new(MessageDigest::sha256(), &pkey).unwrap();
        signer.update(b"authenticated attributes").unwrap();
        let signature = signer.sign_to_vec().unwrap();

        assert!(matches!(
            verify_signature(&certificate, b"authenticated attributes", &signature),
            Err(CryptoError::UnsupportedKey)
        ));
    }

    #[test]
    fn common_name_keeps_non_ascii_text() {
        let der = test_support::pkcs12_der("Zoë Müller", "");
        let key = KeyMaterial::from_pkcs12(&der, "").unwrap();
        assert_eq!(common_name(key.certificate()).as_deref(), Some("Zoë Müller"));
    }

    #[test]
    fn digest_spans_both_ranges() {
        let split = content_digest([b"hello ", b"world"]);
        let whole = content_digest([b"hello world", b""]);
        assert_eq!(split, whole);
        assert_eq!(
            hex::encode(whole),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn debug_output_hides_the_key() {
        let printed = format!("{:?}", *ALICE);
        assert!(printed.contains("Alice"));
        assert!(!printed.contains("private_key"));
    }
}
