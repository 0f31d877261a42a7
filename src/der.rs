//! Minimal DER support for the detached signed-data structure.
//!
//! Only what the signature needs: single byte tags and definite lengths. The
//! reader hands out borrowed slices of the input, so a parsed element can be
//! re-emitted byte for byte.

use thiserror::Error;

pub const INTEGER: u8 = 0x02;
pub const OCTET_STRING: u8 = 0x04;
pub const NULL: u8 = 0x05;
pub const OBJECT_IDENTIFIER: u8 = 0x06;
pub const UTC_TIME: u8 = 0x17;
pub const GENERALIZED_TIME: u8 = 0x18;
pub const SEQUENCE: u8 = 0x30;
pub const SET: u8 = 0x31;
pub const CONTEXT_0: u8 = 0xa0;

/// Encoded object identifiers (content octets only).
pub mod oid {
    /// 1.2.840.113549.1.7.1
    pub const DATA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01];
    /// 1.2.840.113549.1.7.2
    pub const SIGNED_DATA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02];
    /// 1.2.840.113549.1.9.3
    pub const CONTENT_TYPE: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x03];
    /// 1.2.840.113549.1.9.4
    pub const MESSAGE_DIGEST: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x04];
    /// 1.2.840.113549.1.9.5
    pub const SIGNING_TIME: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x05];
    /// 1.2.840.113549.1.1.1
    pub const RSA_ENCRYPTION: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01];
    /// 1.2.840.113549.1.1.11
    pub const SHA256_WITH_RSA_ENCRYPTION: &[u8] =
        &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0b];
    /// 2.16.840.1.101.3.4.2.1
    pub const SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DerError {
    #[error("unexpected end of data")]
    Truncated,
    #[error("multi-byte tags are not supported")]
    HighTagNumber,
    #[error("indefinite or oversized length")]
    UnsupportedLength,
    #[error("expected tag {expected:#04x}, found {found:#04x}")]
    UnexpectedTag { expected: u8, found: u8 },
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("unsupported {0}")]
    Unsupported(&'static str),
}

/// One tag-length-value element, borrowed from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    pub tag: u8,
    /// The whole element, header included.
    pub raw: &'a [u8],
    pub content: &'a [u8],
}

impl<'a> Tlv<'a> {
    /// Reads one element from the start of `input`, returning it and the
    /// remaining bytes.
    pub fn parse(input: &'a [u8]) -> Result<(Tlv<'a>, &'a [u8]), DerError> {
        let (&tag, rest) = input.split_first().ok_or(DerError::Truncated)?;
        if tag & 0x1f == 0x1f {
            return Err(DerError::HighTagNumber);
        }

        let (&first, rest) = rest.split_first().ok_or(DerError::Truncated)?;
        let (len, rest) = if first < 0x80 {
            (first as usize, rest)
        } else {
            let count = (first & 0x7f) as usize;
            if count == 0 || count > std::mem::size_of::<u32>() {
                return Err(DerError::UnsupportedLength);
            }
            if rest.len() < count {
                return Err(DerError::Truncated);
            }
            let len = rest[..count]
                .iter()
                .fold(0usize, |acc, &b| (acc << 8) | b as usize);
            (len, &rest[count..])
        };

        if rest.len() < len {
            return Err(DerError::Truncated);
        }
        let header_len = input.len() - rest.len();
        let tlv = Tlv {
            tag,
            raw: &input[..header_len + len],
            content: &rest[..len],
        };
        Ok((tlv, &rest[len..]))
    }

    /// Like [`Tlv::parse`], but checks the tag.
    pub fn expect(input: &'a [u8], tag: u8) -> Result<(Tlv<'a>, &'a [u8]), DerError> {
        let (tlv, rest) = Self::parse(input)?;
        tlv.check_tag(tag)?;
        Ok((tlv, rest))
    }

    pub fn check_tag(&self, expected: u8) -> Result<(), DerError> {
        if self.tag != expected {
            return Err(DerError::UnexpectedTag {
                expected,
                found: self.tag,
            });
        }
        Ok(())
    }

    /// Splits the content of a constructed element into its children.
    pub fn children(&self) -> Result<Vec<Tlv<'a>>, DerError> {
        let mut children = Vec::new();
        let mut rest = self.content;
        while !rest.is_empty() {
            let (child, tail) = Tlv::parse(rest)?;
            children.push(child);
            rest = tail;
        }
        Ok(children)
    }
}

pub fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}

/// Encodes one element whose content is the concatenation of `parts`.
pub fn encode(tag: u8, parts: &[&[u8]]) -> Vec<u8> {
    let len = parts.iter().map(|p| p.len()).sum();
    let mut out = Vec::with_capacity(len + 6);
    out.push(tag);
    encode_length(len, &mut out);
    for part in parts {
        out.extend_from_slice(part);
    }
    out
}

/// `AlgorithmIdentifier` with NULL parameters.
pub fn algorithm_identifier(oid: &[u8]) -> Vec<u8> {
    encode(
        SEQUENCE,
        &[&encode(OBJECT_IDENTIFIER, &[oid]), &encode(NULL, &[])],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_encoding_boundaries() {
        let mut out = Vec::new();
        encode_length(0x7f, &mut out);
        assert_eq!(out, [0x7f]);

        out.clear();
        encode_length(0x80, &mut out);
        assert_eq!(out, [0x81, 0x80]);

        out.clear();
        encode_length(0x100, &mut out);
        assert_eq!(out, [0x82, 0x01, 0x00]);

        out.clear();
        encode_length(70_000, &mut out);
        assert_eq!(out, [0x83, 0x01, 0x11, 0x70]);
    }

    #[test]
    fn parse_keeps_raw_bytes_and_rest() {
        let content = vec![0xab; 300];
        let mut input = encode(OCTET_STRING, &[&content]);
        input.extend_from_slice(&[0x05, 0x00]);

        let (tlv, rest) = Tlv::parse(&input).unwrap();
        assert_eq!(tlv.tag, OCTET_STRING);
        assert_eq!(tlv.content, content.as_slice());
        assert_eq!(tlv.raw, &input[..input.len() - 2]);
        assert_eq!(rest, [0x05, 0x00]);
    }

    #[test]
    fn children_of_nested_sequence() {
        let inner = algorithm_identifier(oid::SHA256);
        let outer = encode(SET, &[&inner, &inner]);

        let (set, rest) = Tlv::expect(&outer, SET).unwrap();
        assert!(rest.is_empty());
        let children = set.children().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].raw, inner.as_slice());

        let fields = children[1].children().unwrap();
        assert_eq!(fields[0].tag, OBJECT_IDENTIFIER);
        assert_eq!(fields[0].content, oid::SHA256);
        assert_eq!(fields[1].raw, [NULL, 0x00]);
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(Tlv::parse(&[]), Err(DerError::Truncated));
        assert_eq!(Tlv::parse(&[0x30]), Err(DerError::Truncated));
        assert_eq!(Tlv::parse(&[0x30, 0x05, 0x00]), Err(DerError::Truncated));
        assert_eq!(Tlv::parse(&[0x30, 0x80, 0x00, 0x00]), Err(DerError::UnsupportedLength));
        assert_eq!(Tlv::parse(&[0x1f, 0x81, 0x01]), Err(DerError::HighTagNumber));
        assert_eq!(
            Tlv::expect(&[0x02, 0x01, 0x01], SEQUENCE),
            Err(DerError::UnexpectedTag {
                expected: SEQUENCE,
                found: INTEGER
            })
        );
    }
}
