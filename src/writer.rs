//! Byte-exact serialization of an incremental update.
//!
//! The update is appended after the original bytes, which are never touched:
//! new object bodies, a cross-reference section covering only those objects,
//! and a trailer chaining back to the previous section through `/Prev`.

use std::collections::BTreeMap;

use lopdf::{Dictionary, Object, ObjectId, StringFormat};

use crate::FormatError;

/// Writes the textual representation of a direct object.
pub fn write_object(out: &mut Vec<u8>, object: &Object) -> Result<(), FormatError> {
    match object {
        Object::Null => out.extend_from_slice(b"null"),
        Object::Boolean(true) => out.extend_from_slice(b"true"),
        Object::Boolean(false) => out.extend_from_slice(b"false"),
        Object::Integer(value) => out.extend_from_slice(value.to_string().as_bytes()),
        Object::Real(value) => out.extend_from_slice(value.to_string().as_bytes()),
        Object::Name(name) => write_name(out, name),
        Object::String(bytes, StringFormat::Literal) => write_literal_string(out, bytes),
        Object::String(bytes, StringFormat::Hexadecimal) => {
            out.push(b'<');
            out.extend_from_slice(hex::encode_upper(bytes).as_bytes());
            out.push(b'>');
        }
        Object::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b' ');
                }
                write_object(out, item)?;
            }
            out.push(b']');
        }
        Object::Dictionary(dict) => write_dictionary(out, dict)?,
        Object::Stream(_) => return Err(FormatError::InlineStream),
        Object::Reference((number, generation)) => {
            out.extend_from_slice(format!("{number} {generation} R").as_bytes())
        }
    }
    Ok(())
}

pub fn write_dictionary(out: &mut Vec<u8>, dict: &Dictionary) -> Result<(), FormatError> {
    out.extend_from_slice(b"<<");
    for (i, (key, value)) in dict.iter().enumerate() {
        if i > 0 {
            out.push(b' ');
        }
        write_name(out, key);
        out.push(b' ');
        write_object(out, value)?;
    }
    out.extend_from_slice(b">>");
    Ok(())
}

/// Names escape delimiters, `#` and anything outside the printable range as
/// `#xx`.
pub fn write_name(out: &mut Vec<u8>, name: &[u8]) {
    out.push(b'/');
    for &byte in name {
        match byte {
            b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%' | b'#' => {
                out.extend_from_slice(format!("#{byte:02X}").as_bytes())
            }
            b'!'..=b'~' => out.push(byte),
            _ => out.extend_from_slice(format!("#{byte:02X}").as_bytes()),
        }
    }
}

pub fn write_literal_string(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(b'(');
    for &byte in bytes {
        match byte {
            b'\\' | b'(' | b')' => out.extend_from_slice(&[b'\\', byte]),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            _ => out.push(byte),
        }
    }
    out.push(b')');
}

/// The original document followed by the objects of one update.
pub struct IncrementalUpdate {
    buffer: Vec<u8>,
    /// Object number to (generation, offset).
    offsets: BTreeMap<u32, (u16, usize)>,
}

impl IncrementalUpdate {
    pub fn new(original: &[u8]) -> Self {
        let mut buffer = Vec::with_capacity(original.len() + 4096);
        buffer.extend_from_slice(original);
        if !original.ends_with(b"\n") && !original.ends_with(b"\r") {
            buffer.push(b'\n');
        }
        Self {
            buffer,
            offsets: BTreeMap::new(),
        }
    }

    pub fn add_object(&mut self, id: ObjectId, object: &Object) -> Result<(), FormatError> {
        let mut body = Vec::new();
        write_object(&mut body, object)?;
        self.add_raw_object(id, &body);
        Ok(())
    }

    /// Adds an object whose body has already been serialized.
    pub fn add_raw_object(&mut self, (number, generation): ObjectId, body: &[u8]) {
        self.offsets.insert(number, (generation, self.buffer.len()));
        self.buffer
            .extend_from_slice(format!("{number} {generation} obj\n").as_bytes());
        self.buffer.extend_from_slice(body);
        self.buffer.extend_from_slice(b"\nendobj\n");
    }

    /// Writes the cross-reference section and the trailer. The result ends
    /// with `%%EOF`, without a line terminator.
    pub fn finish(mut self, trailer: &Dictionary) -> Result<Vec<u8>, FormatError> {
        let xref_offset = self.buffer.len();
        self.buffer.extend_from_slice(b"xref\n");

        // One subsection per run of consecutive object numbers.
        let mut entries = self.offsets.iter().peekable();
        while let Some(&(&first, _)) = entries.peek() {
            let mut run = Vec::new();
            let mut next = first;
            while let Some((&number, &entry)) = entries.next_if(|&(&n, _)| n == next) {
                run.push(entry);
                next = number + 1;
            }

            self.buffer
                .extend_from_slice(format!("{first} {}\n", run.len()).as_bytes());
            for (generation, offset) in run {
                // Each entry is exactly 20 bytes.
                self.buffer
                    .extend_from_slice(format!("{offset:010} {generation:05} n\r\n").as_bytes());
            }
        }

        self.buffer.extend_from_slice(b"trailer\n");
        write_dictionary(&mut self.buffer, trailer)?;
        self.buffer
            .extend_from_slice(format!("\nstartxref\n{xref_offset}\n%%EOF").as_bytes());

        Ok(self.buffer)
    }
}
