//! The byte-level wire format shared by the signer and the verifier.
//!
//! Both the `/ByteRange` field and the `/Contents` slot have a width fixed at
//! placeholder time. Signing overwrites them in place, so no other byte of
//! the file moves:
//!
//! ```text
//! /ByteRange [0 /********** /********** /**********]   placeholder
//! /ByteRange [0 840 17234 1021]                        signed, space padded
//! /Contents <000000...000000>                          2 × length hex digits
//! /Contents <3082...a1b2c3000000...00>                 DER, zero padded
//! ```

use std::ops::Range;

use regex::bytes::Regex;

use crate::der::{self, Tlv};
use crate::{find_bytes, ExactArrayOrNone, FormatError};

/// The `ByteRange` declaration written by the placeholder allocator. Each
/// placeholder token is 10 characters wide.
pub const BYTE_RANGE_PLACEHOLDER: &[u8] = b"/ByteRange [0 /********** /********** /**********]";

const BYTE_RANGE_MARKER: &[u8] = b"/ByteRange [";
const CONTENTS_MARKER: &[u8] = b"/Contents ";

lazy_static::lazy_static! {
    static ref BYTE_RANGE_REGEX: Regex =
        Regex::new(r"^/ByteRange \[(\d+) +(\d+) +(\d+) +(\d+)\]$").unwrap();
}

/// Offsets of the two fixed-width fields inside a document with a reserved,
/// unsigned signature slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderLayout {
    /// The whole `/ByteRange [...]` placeholder.
    pub byte_range_field: Range<usize>,
    /// The signature slot, including the `<` and `>` delimiters.
    pub slot: Range<usize>,
}

impl PlaceholderLayout {
    /// Finds the `ByteRange` placeholder, then the first `/Contents` entry
    /// following it, which must be a hex string of zeros.
    pub fn locate(pdf: &[u8]) -> Result<Self, FormatError> {
        let field_start = find_bytes(pdf, BYTE_RANGE_PLACEHOLDER, 0)
            .ok_or(FormatError::MissingByteRangePlaceholder)?;
        let field_end = field_start + BYTE_RANGE_PLACEHOLDER.len();

        let open = find_bytes(pdf, CONTENTS_MARKER, field_end)
            .map(|contents| contents + CONTENTS_MARKER.len())
            .filter(|&open| pdf.get(open) == Some(&b'<'))
            .ok_or(FormatError::MissingContents)?;
        let close = find_bytes(pdf, b">", open).ok_or(FormatError::MissingContents)?;
        if !pdf[open + 1..close].iter().all(|&b| b == b'0') {
            return Err(FormatError::MissingContents);
        }

        Ok(Self {
            byte_range_field: field_start..field_end,
            slot: open..close + 1,
        })
    }

    /// Number of hex digits the slot holds.
    pub fn capacity(&self) -> usize {
        self.slot.len() - 2
    }
}

/// `[start1, length1, start2, length2]`: the two spans of the document that
/// are hashed and signed, i.e. everything except the signature slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange(pub [usize; 4]);

impl ByteRange {
    /// The range covering a document of `total_len` bytes except `slot`.
    pub fn around_slot(slot: &Range<usize>, total_len: usize) -> Self {
        ByteRange([0, slot.start, slot.end, total_len - slot.end])
    }

    pub fn signed_ranges(&self) -> [Range<usize>; 2] {
        let [start1, length1, start2, length2] = self.0;
        [start1..start1 + length1, start2..start2 + length2]
    }

    /// The gap between the two signed ranges.
    pub fn slot(&self) -> Range<usize> {
        self.0[0] + self.0[1]..self.0[2]
    }

    /// Serializes the declaration, padded with spaces to exactly `width`
    /// bytes.
    pub fn to_field(&self, width: usize) -> Result<Vec<u8>, FormatError> {
        let [start1, length1, start2, length2] = self.0;
        let mut field = format!("/ByteRange [{start1} {length1} {start2} {length2}]").into_bytes();
        if field.len() > width {
            return Err(FormatError::ByteRangeTooWide);
        }
        field.resize(width, b' ');
        Ok(field)
    }

    /// Parses the first `ByteRange` declaration of a signed document and
    /// checks that it is consistent with the document.
    pub fn locate(pdf: &[u8]) -> Result<Self, FormatError> {
        let start = find_bytes(pdf, BYTE_RANGE_MARKER, 0).ok_or(FormatError::MissingByteRange)?;
        let end = find_bytes(pdf, b"]", start).ok_or(FormatError::MalformedByteRange)?;

        let captures = BYTE_RANGE_REGEX
            .captures(&pdf[start..=end])
            .ok_or(FormatError::MalformedByteRange)?;
        let values = captures
            .iter()
            .skip(1)
            .map(|m| std::str::from_utf8(m?.as_bytes()).ok()?.parse::<usize>().ok())
            .collect::<Option<ExactArrayOrNone<usize, 4>>>()
            .and_then(|values| values.0)
            .ok_or(FormatError::MalformedByteRange)?;

        let byte_range = ByteRange(values);
        byte_range.validate(pdf.len())?;

        // The declaration itself must be covered by the signature.
        if end >= byte_range.0[1] {
            return Err(FormatError::InvalidRange);
        }

        Ok(byte_range)
    }

    fn validate(&self, total_len: usize) -> Result<(), FormatError> {
        let [start1, length1, start2, length2] = self.0;

        // For soundness, the signature must cover the file since the beginning.
        if start1 != 0 {
            return Err(FormatError::WrongRangeStart);
        }

        let end2 = start2
            .checked_add(length2)
            .ok_or(FormatError::InvalidRange)?;
        if length1 > start2 || end2 > total_len {
            return Err(FormatError::InvalidRange);
        }
        if start2 - length1 < 2 {
            return Err(FormatError::InvalidSignatureSlot);
        }
        if end2 != total_len {
            return Err(FormatError::IncompleteCoverage);
        }

        Ok(())
    }
}

/// Decodes a bracketed hex slot into the DER object it holds.
///
/// The outer DER length delimits the object; everything after it must be
/// zero padding.
pub fn decode_slot(slot: &[u8]) -> Result<Vec<u8>, FormatError> {
    let hex_digits = slot
        .strip_prefix(b"<")
        .and_then(|s| s.strip_suffix(b">"))
        .ok_or(FormatError::InvalidSignatureSlot)?;
    let mut bytes = hex::decode(hex_digits).map_err(|_| FormatError::InvalidSignatureSlot)?;

    let (object, padding) = Tlv::expect(&bytes, der::SEQUENCE)?;
    if padding.iter().any(|&b| b != 0) {
        return Err(FormatError::InvalidSignatureSlot);
    }
    let object_len = object.raw.len();

    bytes.truncate(object_len);
    Ok(bytes)
}
