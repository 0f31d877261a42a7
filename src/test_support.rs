//! Fixtures generated at test time: key material and small PDF documents.

use chrono::{DateTime, TimeZone, Utc};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{HasPrivate, PKey, PKeyRef};
use openssl::rsa::Rsa;
use openssl::x509::{X509Builder, X509NameBuilder, X509};

use crate::{add_signature_placeholder, KeyMaterial, PlaceholderOptions};

/// Text drawn on the test page; tests tamper with it.
pub const PAGE_TEXT: &str = "Certificate of achievement";

lazy_static::lazy_static! {
    pub static ref ALICE: KeyMaterial = key_material("Alice");
    pub static ref BOB: KeyMaterial = key_material("Bob");
}

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 17, 10, 30, 0).unwrap()
}

pub fn key_material(common_name: &str) -> KeyMaterial {
    KeyMaterial::from_pkcs12(&pkcs12_der(common_name, ""), "").unwrap()
}

/// A PKCS #12 container with a fresh RSA key and a self-signed certificate.
pub fn pkcs12_der(common_name: &str, passphrase: &str) -> Vec<u8> {
    let pkey = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
    pkcs12_der_for(&pkey, common_name, passphrase)
}

pub fn pkcs12_der_for<T: HasPrivate>(
    pkey: &PKeyRef<T>,
    common_name: &str,
    passphrase: &str,
) -> Vec<u8> {
    let certificate = self_signed_certificate(pkey, common_name);
    let mut pkcs12 = Pkcs12::builder();
    pkcs12.name(common_name).pkey(pkey).cert(&certificate);
    pkcs12.build2(passphrase).unwrap().to_der().unwrap()
}

pub fn self_signed_certificate<T: HasPrivate>(pkey: &PKeyRef<T>, common_name: &str) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", common_name).unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();
    builder.set_pubkey(pkey).unwrap();
    builder.sign(pkey, MessageDigest::sha256()).unwrap();
    builder.build()
}

/// A one-page document with an uncompressed text stream, as a renderer would
/// produce it.
pub fn one_page_pdf() -> Vec<u8> {
    pdf_with_pages(1)
}

pub fn pdf_with_pages(page_count: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for _ in 0..page_count {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![100.into(), 600.into()]),
                Operation::new("Tj", vec![Object::string_literal(PAGE_TEXT)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => page_count as i64,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// A one-page document with a reserved signature slot.
pub fn placeholder_pdf(signature_length: usize) -> Vec<u8> {
    let options = PlaceholderOptions {
        signature_length,
        reason: Some("I am the author".to_owned()),
        signing_date: Some(fixed_now()),
        ..Default::default()
    };
    add_signature_placeholder(&one_page_pdf(), &options).unwrap()
}
