//! Encoding and decoding of the detached PKCS #7 signed-data structure.
//!
//! ```text
//! ContentInfo { signedData, [0] SignedData {
//!     version 1, { sha256 }, { data },
//!     [0] { certificate },
//!     { SignerInfo {
//!         version 1, issuerAndSerialNumber, sha256,
//!         [0] { contentType, messageDigest, signingTime },
//!         rsaEncryption, signature } } } }
//! ```
//!
//! The signature value covers the DER encoding of the authenticated attributes
//! as a SET, never the content itself.

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};

use crate::der::{self, oid, DerError, Tlv};

/// The authenticated attributes of a signer, as the concatenated DER encoding
/// of each attribute. The order is kept as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedAttributes {
    content: Vec<u8>,
}

impl AuthenticatedAttributes {
    /// Content type `data`, the message digest, and the signing time, in this
    /// order.
    pub fn new(message_digest: &[u8], signing_time: DateTime<Utc>) -> Self {
        let content = [
            attribute(oid::CONTENT_TYPE, &der::encode(der::OBJECT_IDENTIFIER, &[oid::DATA])),
            attribute(
                oid::MESSAGE_DIGEST,
                &der::encode(der::OCTET_STRING, &[message_digest]),
            ),
            attribute(oid::SIGNING_TIME, &encode_time(signing_time)),
        ]
        .concat();
        Self { content }
    }

    #[cfg(test)]
    pub(crate) fn from_content(content: Vec<u8>) -> Self {
        Self { content }
    }

    /// The bytes the signer actually signs.
    pub fn to_set_der(&self) -> Vec<u8> {
        der::encode(der::SET, &[&self.content])
    }

    fn to_implicit_der(&self) -> Vec<u8> {
        der::encode(der::CONTEXT_0, &[&self.content])
    }
}

fn attribute(attr_type: &[u8], value: &[u8]) -> Vec<u8> {
    der::encode(
        der::SEQUENCE,
        &[
            &der::encode(der::OBJECT_IDENTIFIER, &[attr_type]),
            &der::encode(der::SET, &[value]),
        ],
    )
}

fn encode_time(time: DateTime<Utc>) -> Vec<u8> {
    if (1950..2050).contains(&time.year()) {
        let text = time.format("%y%m%d%H%M%SZ").to_string();
        der::encode(der::UTC_TIME, &[text.as_bytes()])
    } else {
        let text = time.format("%Y%m%d%H%M%SZ").to_string();
        der::encode(der::GENERALIZED_TIME, &[text.as_bytes()])
    }
}

fn decode_time(tlv: &Tlv) -> Option<DateTime<Utc>> {
    let text = std::str::from_utf8(tlv.content).ok()?.strip_suffix('Z')?;
    let full = match tlv.tag {
        der::UTC_TIME => {
            let year: u32 = text.get(..2)?.parse().ok()?;
            let century = if year >= 50 { "19" } else { "20" };
            format!("{century}{text}")
        }
        der::GENERALIZED_TIME => text.to_owned(),
        _ => return None,
    };
    NaiveDateTime::parse_from_str(&full, "%Y%m%d%H%M%S")
        .ok()
        .map(|t| t.and_utc())
}

/// Copies `issuerAndSerialNumber` out of a DER certificate.
fn issuer_and_serial(certificate_der: &[u8]) -> Result<Vec<u8>, DerError> {
    let (certificate, _) = Tlv::expect(certificate_der, der::SEQUENCE)?;
    let (tbs, _) = Tlv::expect(certificate.content, der::SEQUENCE)?;
    let mut fields = tbs.children()?.into_iter();

    let mut serial = fields.next().ok_or(DerError::Missing("serial number"))?;
    // The version is an explicit [0] field, absent for v1 certificates.
    if serial.tag == der::CONTEXT_0 {
        serial = fields.next().ok_or(DerError::Missing("serial number"))?;
    }
    serial.check_tag(der::INTEGER)?;
    let _signature_algorithm = fields.next().ok_or(DerError::Missing("signature algorithm"))?;
    let issuer = fields.next().ok_or(DerError::Missing("issuer"))?;
    issuer.check_tag(der::SEQUENCE)?;

    Ok(der::encode(der::SEQUENCE, &[issuer.raw, serial.raw]))
}

/// Assembles the DER ContentInfo of a detached signature.
pub fn encode_signed_data(
    certificate_der: &[u8],
    attributes: &AuthenticatedAttributes,
    signature: &[u8],
) -> Result<Vec<u8>, DerError> {
    let version = der::encode(der::INTEGER, &[&[1u8]]);
    let sha256 = der::algorithm_identifier(oid::SHA256);

    let signer_info = der::encode(
        der::SEQUENCE,
        &[
            &version,
            &issuer_and_serial(certificate_der)?,
            &sha256,
            &attributes.to_implicit_der(),
            &der::algorithm_identifier(oid::RSA_ENCRYPTION),
            &der::encode(der::OCTET_STRING, &[signature]),
        ],
    );

    let signed_data = der::encode(
        der::SEQUENCE,
        &[
            &version,
            &der::encode(der::SET, &[&sha256]),
            &der::encode(
                der::SEQUENCE,
                &[&der::encode(der::OBJECT_IDENTIFIER, &[oid::DATA])],
            ),
            &der::encode(der::CONTEXT_0, &[certificate_der]),
            &der::encode(der::SET, &[&signer_info]),
        ],
    );

    Ok(der::encode(
        der::SEQUENCE,
        &[
            &der::encode(der::OBJECT_IDENTIFIER, &[oid::SIGNED_DATA]),
            &der::encode(der::CONTEXT_0, &[&signed_data]),
        ],
    ))
}

/// The parts of a signed-data structure the verifier needs, borrowed from the
/// DER input.
#[derive(Debug)]
pub struct ParsedSignedData<'a> {
    /// DER of every embedded certificate, in order.
    pub certificates: Vec<&'a [u8]>,
    /// The `[0] IMPLICIT` authenticated attributes, exactly as received.
    pub authenticated_attributes: Tlv<'a>,
    pub signature: &'a [u8],
}

impl<'a> ParsedSignedData<'a> {
    /// Parses a ContentInfo holding signed data with a single signer.
    pub fn parse(pkcs7_der: &'a [u8]) -> Result<Self, DerError> {
        let (content_info, _) = Tlv::expect(pkcs7_der, der::SEQUENCE)?;
        let (content_type, rest) = Tlv::expect(content_info.content, der::OBJECT_IDENTIFIER)?;
        if content_type.content != oid::SIGNED_DATA {
            return Err(DerError::Unsupported("content type"));
        }
        let (explicit, _) = Tlv::expect(rest, der::CONTEXT_0)?;
        let (signed_data, _) = Tlv::expect(explicit.content, der::SEQUENCE)?;

        // The signer infos set is always the last field; certificates and
        // CRLs are optional and tagged.
        let fields = signed_data.children()?;
        let signer_infos = fields.last().ok_or(DerError::Missing("signer infos"))?;
        signer_infos.check_tag(der::SET)?;

        let certificates = match fields.iter().find(|f| f.tag == der::CONTEXT_0) {
            Some(set) => set.children()?.into_iter().map(|c| c.raw).collect(),
            None => Vec::new(),
        };

        let signer_info = signer_infos
            .children()?
            .into_iter()
            .next()
            .ok_or(DerError::Missing("signer info"))?;
        signer_info.check_tag(der::SEQUENCE)?;
        let mut fields = signer_info.children()?.into_iter();

        let _version = fields.next().ok_or(DerError::Missing("signer version"))?;
        let _issuer_and_serial = fields.next().ok_or(DerError::Missing("signer identifier"))?;
        let digest_algorithm = fields.next().ok_or(DerError::Missing("digest algorithm"))?;
        let (digest_oid, _) = Tlv::expect(digest_algorithm.content, der::OBJECT_IDENTIFIER)?;
        if digest_oid.content != oid::SHA256 {
            return Err(DerError::Unsupported("digest algorithm"));
        }

        let authenticated_attributes = fields
            .next()
            .filter(|f| f.tag == der::CONTEXT_0)
            .ok_or(DerError::Missing("authenticated attributes"))?;
        let signature_algorithm = fields.next().ok_or(DerError::Missing("signature algorithm"))?;
        let (signature_oid, _) = Tlv::expect(signature_algorithm.content, der::OBJECT_IDENTIFIER)?;
        if signature_oid.content != oid::RSA_ENCRYPTION
            && signature_oid.content != oid::SHA256_WITH_RSA_ENCRYPTION
        {
            return Err(DerError::Unsupported("signature algorithm"));
        }
        let signature = fields.next().ok_or(DerError::Missing("signature"))?;
        signature.check_tag(der::OCTET_STRING)?;

        Ok(Self {
            certificates,
            authenticated_attributes,
            signature: signature.content,
        })
    }

    /// Re-tags the authenticated attributes as a SET, keeping every other
    /// byte, to get exactly what was signed.
    pub fn signed_attributes_der(&self) -> Vec<u8> {
        let mut set = self.authenticated_attributes.raw.to_vec();
        set[0] = der::SET;
        set
    }

    /// Finds the first value of the attribute with the given type.
    fn attribute_value(&self, attr_type: &[u8]) -> Result<Option<Tlv<'a>>, DerError> {
        for attr in self.authenticated_attributes.children()? {
            attr.check_tag(der::SEQUENCE)?;
            let (found_type, values) = Tlv::expect(attr.content, der::OBJECT_IDENTIFIER)?;
            if found_type.content != attr_type {
                continue;
            }
            let (values, _) = Tlv::expect(values, der::SET)?;
            let (value, _) = Tlv::parse(values.content)?;
            return Ok(Some(value));
        }
        Ok(None)
    }

    /// The content digest claimed by the signer.
    pub fn message_digest(&self) -> Result<&'a [u8], DerError> {
        let value = self
            .attribute_value(oid::MESSAGE_DIGEST)?
            .ok_or(DerError::Missing("message digest attribute"))?;
        value.check_tag(der::OCTET_STRING)?;
        Ok(value.content)
    }

    pub fn signing_time(&self) -> Option<DateTime<Utc>> {
        self.attribute_value(oid::SIGNING_TIME)
            .ok()
            .flatten()
            .and_then(|tlv| decode_time(&tlv))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::test_support::ALICE;

    #[test]
    fn attributes_keep_declared_order() {
        let time = Utc.with_ymd_and_hms(2024, 5, 17, 10, 30, 0).unwrap();
        let attributes = AuthenticatedAttributes::new(&[7; 32], time);
        let set = attributes.to_set_der();

        let (set, _) = Tlv::expect(&set, der::SET).unwrap();
        let types = set
            .children()
            .unwrap()
            .iter()
            .map(|attr| Tlv::parse(attr.content).unwrap().0.content.to_vec())
            .collect::<Vec<_>>();
        assert_eq!(
            types,
            [oid::CONTENT_TYPE, oid::MESSAGE_DIGEST, oid::SIGNING_TIME]
        );
    }

    #[test]
    fn signing_time_encoding_depends_on_year() {
        let recent = Utc.with_ymd_and_hms(2024, 5, 17, 10, 30, 0).unwrap();
        assert_eq!(encode_time(recent), der::encode(der::UTC_TIME, &[b"240517103000Z"]));

        let far = Utc.with_ymd_and_hms(2051, 1, 2, 3, 4, 5).unwrap();
        let encoded = encode_time(far);
        assert_eq!(encoded, der::encode(der::GENERALIZED_TIME, &[b"20510102030405Z"]));
        let (tlv, _) = Tlv::parse(&encoded).unwrap();
        assert_eq!(decode_time(&tlv), Some(far));

        let old_der = der::encode(der::UTC_TIME, &[b"991231235959Z"]);
        let old = Tlv::parse(&old_der).unwrap().0;
        assert_eq!(
            decode_time(&old),
            Some(Utc.with_ymd_and_hms(1999, 12, 31, 23, 59, 59).unwrap())
        );
    }

    #[test]
    fn encoded_structure_parses_back() {
        let time = Utc.with_ymd_and_hms(2024, 5, 17, 10, 30, 0).unwrap();
        let attributes = AuthenticatedAttributes::new(&[0x42; 32], time);
        let signature = vec![0x5a; 256];
        let der = encode_signed_data(ALICE.certificate_der(), &attributes, &signature).unwrap();

        let parsed = ParsedSignedData::parse(&der).unwrap();
        assert_eq!(parsed.certificates, [ALICE.certificate_der()]);
        assert_eq!(parsed.signature, signature.as_slice());
        assert_eq!(parsed.signed_attributes_der(), attributes.to_set_der());
        assert_eq!(parsed.message_digest().unwrap(), [0x42u8; 32]);
        assert_eq!(parsed.signing_time(), Some(time));
    }

    #[test]
    fn signer_identifier_comes_from_certificate() {
        let identifier = issuer_and_serial(ALICE.certificate_der()).unwrap();
        let (identifier, _) = Tlv::expect(&identifier, der::SEQUENCE).unwrap();
        let fields = identifier.children().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].tag, der::SEQUENCE);
        assert_eq!(fields[1].tag, der::INTEGER);
        let serial = ALICE
            .certificate()
            .serial_number()
            .to_bn()
            .unwrap()
            .to_vec();
        assert_eq!(fields[1].content, serial.as_slice());
    }

    #[test]
    fn rejects_non_rsa_signature_algorithms() {
        let time = Utc.with_ymd_and_hms(2024, 5, 17, 10, 30, 0).unwrap();
        let attributes = AuthenticatedAttributes::new(&[0x42; 32], time);
        let mut der = encode_signed_data(ALICE.certificate_der(), &attributes, &[0x5a; 256]).unwrap();

        // The last rsaEncryption OID is the signer info's; the certificate
        // carries another one in its public key info.
        let pos = der
            .windows(oid::RSA_ENCRYPTION.len())
            .rposition(|w| w == oid::RSA_ENCRYPTION)
            .unwrap();
        // Now sha1WithRSAEncryption.
        der[pos + oid::RSA_ENCRYPTION.len() - 1] = 0x05;

        assert_eq!(
            ParsedSignedData::parse(&der).unwrap_err(),
            DerError::Unsupported("signature algorithm")
        );
    }

    #[test]
    fn rejects_other_content_types() {
        let der = der::encode(
            der::SEQUENCE,
            &[
                &der::encode(der::OBJECT_IDENTIFIER, &[oid::DATA]),
                &der::encode(der::CONTEXT_0, &[&der::encode(der::SEQUENCE, &[])]),
            ],
        );
        assert_eq!(
            ParsedSignedData::parse(&der).unwrap_err(),
            DerError::Unsupported("content type")
        );
    }
}
