//! Shared lopdf helpers: loading, saving, object resolution, text strings,
//! inherited page attributes, and AcroForm field flags.

use crate::error::{Error, Result};
use crate::form::geometry::{PageGeometry, PdfBox, Rect};
use bitflags::bitflags;
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};

bitflags! {
    /// AcroForm field flags (`/Ff`), ISO 32000-1 tables 221, 226, 228, 230.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FieldFlags: u32 {
        const READ_ONLY = 1 << 0;
        const REQUIRED = 1 << 1;
        const NO_EXPORT = 1 << 2;
        const MULTILINE = 1 << 12;
        const PASSWORD = 1 << 13;
        const NO_TOGGLE_TO_OFF = 1 << 14;
        const RADIO = 1 << 15;
        const PUSHBUTTON = 1 << 16;
        const COMBO = 1 << 17;
        const EDIT = 1 << 18;
        const MULTI_SELECT = 1 << 21;
    }
}

/// Parent chains deeper than this are treated as cycles
const MAX_DEPTH: usize = 32;

/// Parse PDF bytes, rejecting non-PDF data and encrypted documents
pub fn load(data: &[u8]) -> Result<Document> {
    if data.len() < 4 || &data[0..4] != b"%PDF" {
        return Err(Error::InvalidPdf {
            reason: "Not a valid PDF file".to_string(),
        });
    }

    let doc = Document::load_mem(data).map_err(|e| Error::InvalidPdf {
        reason: e.to_string(),
    })?;

    if doc.is_encrypted() {
        return Err(Error::PasswordRequired);
    }

    Ok(doc)
}

pub fn save(doc: &mut Document) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    doc.save_to(&mut output).map_err(|e| Error::MalformedPdf {
        reason: format!("Failed to save PDF: {}", e),
    })?;
    Ok(output)
}

/// Follow indirect references until a direct object is reached
pub fn resolve<'a>(doc: &'a Document, mut obj: &'a Object) -> &'a Object {
    for _ in 0..MAX_DEPTH {
        match obj {
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(target) => obj = target,
                Err(_) => return &Object::Null,
            },
            _ => return obj,
        }
    }
    &Object::Null
}

pub fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    resolve(doc, obj).as_dict().ok()
}

pub fn resolve_array<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Vec<Object>> {
    resolve(doc, obj).as_array().ok()
}

pub fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(f) => Some(*f as f32),
        _ => None,
    }
}

pub fn rect_from_object(doc: &Document, obj: &Object) -> Option<Rect> {
    let arr = resolve_array(doc, obj)?;
    if arr.len() != 4 {
        return None;
    }
    let mut values = [0.0f32; 4];
    for (slot, item) in values.iter_mut().zip(arr) {
        *slot = number(resolve(doc, item))?;
    }
    Some(Rect::from_pdf_array(values))
}

pub fn real(v: f32) -> Object {
    Object::Real(v.into())
}

pub fn rect_to_object(rect: &Rect) -> Object {
    Object::Array(rect.to_pdf_array().iter().map(|v| real(*v)).collect())
}

pub fn rgb_to_object(rgb: crate::form::Rgb) -> Object {
    Object::Array(vec![real(rgb.0), real(rgb.1), real(rgb.2)])
}

/// Encode a text string: literal for printable ASCII, UTF-16BE otherwise
pub fn text_string(s: &str) -> Object {
    if s.bytes().all(|b| (0x20..0x7f).contains(&b)) {
        return Object::String(s.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in s.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

/// Decode a PDF text string (UTF-16BE with BOM, UTF-8 with BOM, or
/// single-byte PDFDocEncoding approximated as Latin-1)
pub fn decode_text(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    bytes.iter().map(|&b| b as char).collect()
}

/// Name or string object as text
pub fn object_text(doc: &Document, obj: &Object) -> Option<String> {
    match resolve(doc, obj) {
        Object::Name(name) => Some(String::from_utf8_lossy(name).into_owned()),
        Object::String(bytes, _) => Some(decode_text(bytes)),
        _ => None,
    }
}

pub fn dict_text(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<String> {
    dict.get(key).ok().and_then(|o| object_text(doc, o))
}

pub fn name_object(name: &str) -> Object {
    Object::Name(name.as_bytes().to_vec())
}

/// Look up `key` on `dict` or, failing that, on its `/Parent` chain
pub fn inherited<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    let mut current = dict;
    for _ in 0..MAX_DEPTH {
        if let Ok(value) = current.get(key) {
            return Some(resolve(doc, value));
        }
        current = current
            .get(b"Parent")
            .ok()
            .and_then(|p| resolve_dict(doc, p))?;
    }
    None
}

pub fn field_flags(doc: &Document, dict: &Dictionary) -> FieldFlags {
    inherited(doc, dict, b"Ff")
        .and_then(|o| o.as_i64().ok())
        .map(|bits| FieldFlags::from_bits_retain(bits as u32))
        .unwrap_or_default()
}

pub fn catalog_id(doc: &Document) -> Result<ObjectId> {
    doc.trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|_| Error::MalformedPdf {
            reason: "Document has no catalog reference".to_string(),
        })
}

/// Page object ids in document order
pub fn page_ids(doc: &Document) -> Vec<ObjectId> {
    doc.get_pages().into_values().collect()
}

/// Visible box and rotation of every page, in document order
pub fn page_geometries(doc: &Document) -> Vec<PageGeometry> {
    page_ids(doc)
        .into_iter()
        .enumerate()
        .map(|(index, id)| page_geometry(doc, index as u32, id))
        .collect()
}

pub fn page_geometry(doc: &Document, index: u32, page_id: ObjectId) -> PageGeometry {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return PageGeometry::new(index, PdfBox::letter(), 0);
    };

    let bounds = [b"CropBox".as_slice(), b"MediaBox".as_slice()]
        .iter()
        .find_map(|key| inherited(doc, page, key).and_then(|o| rect_from_object(doc, o)))
        .filter(|r| r.width > 0.0 && r.height > 0.0)
        .map(|r| PdfBox::new(r.x, r.y, r.right(), r.bottom()))
        .unwrap_or_else(PdfBox::letter);

    let rotation = inherited(doc, page, b"Rotate")
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(0);

    PageGeometry::new(index, bounds, rotation)
}

/// Append an annotation reference to a page's `/Annots`, materializing an
/// indirect `/Annots` array if needed
pub fn push_annotation(doc: &mut Document, page_id: ObjectId, annot_id: ObjectId) -> Result<()> {
    let annots_ref = doc
        .get_dictionary(page_id)?
        .get(b"Annots")
        .ok()
        .and_then(|o| o.as_reference().ok());

    if let Some(array_id) = annots_ref {
        if let Ok(Object::Array(arr)) = doc.get_object_mut(array_id) {
            arr.push(Object::Reference(annot_id));
            return Ok(());
        }
    }

    let page = doc.get_dictionary_mut(page_id)?;
    if let Some(Object::Array(arr)) = page.get_mut(b"Annots").ok() {
        arr.push(Object::Reference(annot_id));
    } else {
        page.set("Annots", Object::Array(vec![Object::Reference(annot_id)]));
    }
    Ok(())
}

/// Format a number for a content stream without float noise
pub fn fmt_num(v: f32) -> String {
    let s = format!("{:.3}", v);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

/// Escape a literal string for use inside a content stream
pub fn escape_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\n' | '\r' => out.push(' '),
            // WinAnsi covers Latin-1; anything beyond is replaced
            c if (c as u32) < 0x20 => {}
            c if (c as u32) <= 0xFF => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    #[test]
    fn test_text_string_round_trip() {
        for s in ["Jane Smith", "Zoë", "日本語"] {
            let obj = text_string(s);
            let Object::String(bytes, _) = &obj else {
                panic!("expected string object");
            };
            assert_eq!(decode_text(bytes), s);
        }
        assert!(matches!(
            text_string("plain"),
            Object::String(_, StringFormat::Literal)
        ));
    }

    #[test]
    fn test_latin1_fallback() {
        assert_eq!(decode_text(&[0x43, 0x61, 0x66, 0xE9]), "Café");
    }

    #[test]
    fn test_fmt_num() {
        assert_eq!(fmt_num(12.0), "12");
        assert_eq!(fmt_num(0.5), "0.5");
        assert_eq!(fmt_num(1.23456), "1.235");
        assert_eq!(fmt_num(-0.0001), "0");
    }

    #[test]
    fn test_escape_literal() {
        assert_eq!(escape_literal("a(b)c\\"), "a\\(b\\)c\\\\");
        assert_eq!(escape_literal("line\nbreak"), "line break");
    }

    #[test]
    fn test_load_rejects_garbage() {
        assert!(matches!(load(b"hello"), Err(Error::InvalidPdf { .. })));
    }

    #[test]
    fn test_inherited_attributes() {
        let mut doc = Document::with_version("1.7");
        let parent_id = doc.add_object(dictionary! {
            "FT" => "Btn",
            "Ff" => 32768,
        });
        let child = dictionary! {
            "Parent" => Object::Reference(parent_id),
        };
        assert_eq!(
            inherited(&doc, &child, b"FT").and_then(|o| o.as_name().ok()),
            Some(b"Btn".as_slice())
        );
        assert!(field_flags(&doc, &child).contains(FieldFlags::RADIO));
        assert!(inherited(&doc, &child, b"V").is_none());
    }
}
