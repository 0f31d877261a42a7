//! Reserves a fixed-size signature slot in a document.
//!
//! The document is not rewritten. An incremental update is appended holding a
//! signature dictionary, an invisible widget on the first page, an AcroForm
//! listing that widget, and new revisions of the page and of the catalog.

use chrono::{DateTime, Utc};
use log::debug;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use regex::bytes::Regex;

use crate::byte_range::BYTE_RANGE_PLACEHOLDER;
use crate::writer::{write_literal_string, IncrementalUpdate};
use crate::{pdf_ends_with_eof, FormatError, Result};

/// Bytes reserved for the DER signature when nothing else is requested.
pub const DEFAULT_SIGNATURE_LENGTH: usize = 4096;

lazy_static::lazy_static! {
    static ref STARTXREF_REGEX: Regex = Regex::new(r"startxref\s+(\d+)\s+%%EOF").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderOptions {
    /// Size, in bytes, of the largest signature the slot can hold. The slot
    /// itself is twice as wide, as the signature is hex encoded.
    pub signature_length: usize,
    /// Partial name of the signature field.
    pub field_name: String,
    pub reason: Option<String>,
    /// Written as the `/M` entry of the signature dictionary.
    pub signing_date: Option<DateTime<Utc>>,
}

impl Default for PlaceholderOptions {
    fn default() -> Self {
        Self {
            signature_length: DEFAULT_SIGNATURE_LENGTH,
            field_name: "Signature1".to_owned(),
            reason: None,
            signing_date: None,
        }
    }
}

/// Appends an incremental update reserving an empty signature slot.
///
/// The input bytes are kept verbatim as a prefix of the output, and the
/// output ends with `%%EOF` without a trailing line terminator.
pub fn add_signature_placeholder(pdf: &[u8], options: &PlaceholderOptions) -> Result<Vec<u8>> {
    if !pdf_ends_with_eof(pdf) {
        return Err(FormatError::NotAPdf.into());
    }
    let prev_xref = last_startxref(pdf)?;

    let doc = Document::load_mem(pdf)?;
    let root_id = doc.trailer.get(b"Root")?.as_reference()?;
    let page_id = *doc
        .get_pages()
        .values()
        .next()
        .ok_or(FormatError::NoPage)?;

    let [signature_id, widget_id, form_id] = new_object_ids(&doc)?;
    debug!(
        "reserving {} bytes for the signature in object {} (widget on page object {})",
        options.signature_length, signature_id.0, page_id.0
    );

    let mut update = IncrementalUpdate::new(pdf);
    update.add_raw_object(signature_id, &signature_dictionary(options));

    let widget = dictionary! {
        "Type" => "Annot",
        "Subtype" => "Widget",
        "FT" => "Sig",
        "Rect" => vec![0.into(), 0.into(), 0.into(), 0.into()],
        "V" => signature_id,
        "T" => Object::string_literal(text_string(&options.field_name)),
        "F" => 4,
        "P" => page_id,
    };
    update.add_object(widget_id, &Object::Dictionary(widget))?;

    let catalog = doc.get_dictionary(root_id)?;
    let mut form = match catalog.get(b"AcroForm") {
        Ok(form) => doc.dereference(form)?.1.as_dict()?.clone(),
        Err(_) => Dictionary::new(),
    };
    let mut fields = inherited_array(&doc, &form, b"Fields")?;
    fields.push(widget_id.into());
    form.set("Fields", fields);
    form.set("SigFlags", 3);
    update.add_object(form_id, &Object::Dictionary(form))?;

    let mut page = doc.get_dictionary(page_id)?.clone();
    let mut annotations = inherited_array(&doc, &page, b"Annots")?;
    annotations.push(widget_id.into());
    page.set("Annots", annotations);
    update.add_object(page_id, &Object::Dictionary(page))?;

    let mut catalog = catalog.clone();
    catalog.set("AcroForm", form_id);
    update.add_object(root_id, &Object::Dictionary(catalog))?;

    let mut trailer = dictionary! {
        "Size" => i64::from(form_id.0) + 1,
        "Root" => root_id,
        "Prev" => prev_xref as i64,
    };
    for key in [b"Info".as_slice(), b"ID".as_slice()] {
        if let Ok(value) = doc.trailer.get(key) {
            trailer.set(key, value.clone());
        }
    }

    Ok(update.finish(&trailer)?)
}

/// The body of the signature dictionary. Written by hand so the `ByteRange`
/// placeholder and the zero-filled slot appear exactly as the signer expects.
fn signature_dictionary(options: &PlaceholderOptions) -> Vec<u8> {
    let mut dict = b"<<\n/Type /Sig\n/Filter /Adobe.PPKLite\n/SubFilter /adbe.pkcs7.detached\n".to_vec();
    dict.extend_from_slice(BYTE_RANGE_PLACEHOLDER);
    dict.extend_from_slice(b"\n/Contents <");
    dict.resize(dict.len() + 2 * options.signature_length, b'0');
    dict.extend_from_slice(b">\n");

    if let Some(reason) = &options.reason {
        dict.extend_from_slice(b"/Reason ");
        write_literal_string(&mut dict, &text_string(reason));
        dict.push(b'\n');
    }
    if let Some(date) = options.signing_date {
        dict.extend_from_slice(format!("/M (D:{})\n", date.format("%Y%m%d%H%M%SZ")).as_bytes());
    }

    dict.extend_from_slice(b">>");
    dict
}

/// ASCII text as is, anything else as UTF-16BE with a byte order mark.
fn text_string(text: &str) -> Vec<u8> {
    if text.is_ascii() {
        return text.as_bytes().to_vec();
    }
    [0xfe, 0xff]
        .into_iter()
        .chain(text.encode_utf16().flat_map(u16::to_be_bytes))
        .collect()
}

/// The array under `key`, direct or indirect, or an empty one.
fn inherited_array(doc: &Document, dict: &Dictionary, key: &[u8]) -> Result<Vec<Object>> {
    match dict.get(key) {
        Ok(value) => Ok(doc.dereference(value)?.1.as_array()?.clone()),
        Err(_) => Ok(Vec::new()),
    }
}

/// Numbers for the signature, widget and form objects, after both the
/// highest object found and the size declared in the trailer.
fn new_object_ids(doc: &Document) -> Result<[ObjectId; 3], FormatError> {
    let declared = doc
        .trailer
        .get(b"Size")
        .and_then(Object::as_i64)
        .ok()
        .and_then(|size| size.checked_sub(1))
        .and_then(|last| u32::try_from(last).ok())
        .unwrap_or(0);
    let last_id = declared.max(doc.max_id);

    let next = |offset: u32| {
        last_id
            .checked_add(offset)
            .map(|number| (number, 0))
            .ok_or(FormatError::ObjectNumberOverflow)
    };
    Ok([next(1)?, next(2)?, next(3)?])
}

/// Offset of the last cross-reference section, as declared at the end of the
/// file.
fn last_startxref(pdf: &[u8]) -> Result<usize, FormatError> {
    STARTXREF_REGEX
        .captures_iter(pdf)
        .last()
        .and_then(|captures| std::str::from_utf8(&captures[1]).ok()?.parse().ok())
        .ok_or(FormatError::MissingStartXref)
}
