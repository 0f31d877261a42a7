use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::byte_range::{ByteRange, PlaceholderLayout};
use crate::crypto::{content_digest, KeyMaterial};
use crate::pkcs7::{encode_signed_data, AuthenticatedAttributes};
use crate::{Error, Result};

/// Signs a document prepared by
/// [`add_signature_placeholder`](crate::add_signature_placeholder).
///
/// The `ByteRange` placeholder and the slot are overwritten in place, so the
/// result has the same length as the input (minus one trailing newline, if
/// there was one) and every other byte is unchanged.
pub fn sign(pdf: &[u8], key: &KeyMaterial, now: DateTime<Utc>) -> Result<Vec<u8>> {
    let mut pdf = pdf.strip_suffix(b"\n").unwrap_or(pdf).to_vec();

    let layout = PlaceholderLayout::locate(&pdf)?;
    let byte_range = ByteRange::around_slot(&layout.slot, pdf.len());
    let field = byte_range.to_field(layout.byte_range_field.len())?;
    pdf[layout.byte_range_field.clone()].copy_from_slice(&field);
    debug!("signing byte range {:?}", byte_range.0);

    // The digest covers the final ByteRange, so it must be written first.
    let [first, second] = byte_range.signed_ranges();
    let digest = content_digest([&pdf[first], &pdf[second]]);

    let attributes = AuthenticatedAttributes::new(&digest, now);
    let signature = key.sign(&attributes.to_set_der())?;
    let pkcs7 = encode_signed_data(key.certificate_der(), &attributes, &signature)?;

    let encoded = hex::encode(&pkcs7);
    let available = layout.capacity();
    if encoded.len() > available {
        return Err(Error::Capacity {
            required: encoded.len(),
            available,
        });
    }

    let interior = &mut pdf[layout.slot.start + 1..layout.slot.end - 1];
    let (signature_hex, padding) = interior.split_at_mut(encoded.len());
    signature_hex.copy_from_slice(encoded.as_bytes());
    padding.fill(b'0');

    info!(
        "signed {} bytes, signature uses {} of {} reserved bytes",
        pdf.len(),
        pkcs7.len(),
        available / 2
    );
    Ok(pdf)
}

/// Signs with the first certificate and key of an unencrypted PKCS #12
/// container, timestamped with the current time.
pub fn sign_with_pkcs12(pdf: &[u8], pkcs12_der: &[u8]) -> Result<Vec<u8>> {
    let key = KeyMaterial::from_pkcs12(pkcs12_der, "")?;
    sign(pdf, &key, Utc::now())
}
