//! PDF-level helpers shared by the form backend, plus the built-in
//! post-processors that operate on serialized PDF bytes.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use lopdf::{Document as LoDocument, Object as LoObject, ObjectId as LoObjectId, StringFormat};
use sha2::{Digest, Sha256};

use crate::cancel::Cancellation;
use crate::error::{DocBindError, PostProcessError};
use crate::postprocess::PostProcessor;

pub(crate) fn lopdf_err(err: lopdf::Error) -> DocBindError {
    DocBindError::Pdf(err.to_string())
}

/// Follows one level of indirection.
pub(crate) fn deref<'a>(doc: &'a LoDocument, obj: &'a LoObject) -> Option<&'a LoObject> {
    match obj {
        LoObject::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

pub(crate) fn number(obj: &LoObject) -> Option<f32> {
    match obj {
        LoObject::Integer(v) => Some(*v as f32),
        LoObject::Real(v) => Some(*v as f32),
        _ => None,
    }
}

/// PDF text string: literal for ASCII, UTF-16BE with BOM otherwise.
pub(crate) fn text_string(value: &str) -> LoObject {
    if value.is_ascii() {
        return LoObject::String(value.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in value.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    LoObject::String(bytes, StringFormat::Hexadecimal)
}

pub(crate) fn decode_text_string(obj: &LoObject) -> Option<String> {
    let bytes = match obj {
        LoObject::String(bytes, _) => bytes,
        LoObject::Name(bytes) => bytes,
        _ => return None,
    };
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return Some(String::from_utf16_lossy(&units));
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => Some(text.to_string()),
        Err(_) => Some(bytes.iter().map(|&b| b as char).collect()),
    }
}

pub(crate) fn is_truthy_flag(value: &str) -> bool {
    let v = value.trim().to_ascii_lowercase();
    matches!(v.as_str(), "1" | "true" | "yes" | "on" | "x" | "checked")
}

/// Resources may be inherited from an ancestor `Pages` node.
fn page_resources_dict(page: &lopdf::Dictionary, doc: &LoDocument) -> lopdf::Dictionary {
    let mut node = page;
    for _ in 0..32 {
        if let Ok(resources) = node.get(b"Resources") {
            return deref(doc, resources)
                .and_then(|o| o.as_dict().ok())
                .cloned()
                .unwrap_or_default();
        }
        let Some(parent) = node
            .get(b"Parent")
            .ok()
            .and_then(|p| deref(doc, p))
            .and_then(|o| o.as_dict().ok())
        else {
            break;
        };
        node = parent;
    }
    lopdf::Dictionary::new()
}

fn page_xobject_dict(resources: &lopdf::Dictionary, doc: &LoDocument) -> lopdf::Dictionary {
    match resources.get(b"XObject") {
        Ok(LoObject::Dictionary(d)) => d.clone(),
        Ok(LoObject::Reference(id)) => doc
            .get_object(*id)
            .ok()
            .and_then(|o| o.as_dict().ok())
            .cloned()
            .unwrap_or_default(),
        _ => lopdf::Dictionary::new(),
    }
}

/// Registers `form_id` as an XObject of the page and paints it at (dx, dy).
pub(crate) fn stamp_form_xobject(
    doc: &mut LoDocument,
    page_id: LoObjectId,
    form_id: LoObjectId,
    form_name: &str,
    dx: f32,
    dy: f32,
) -> Result<(), DocBindError> {
    let page_dict = doc
        .get_object(page_id)
        .and_then(LoObject::as_dict)
        .map_err(lopdf_err)?
        .clone();
    let mut resources = page_resources_dict(&page_dict, doc);
    let mut xobjects = page_xobject_dict(&resources, doc);
    xobjects.set(form_name.as_bytes().to_vec(), LoObject::Reference(form_id));
    resources.set("XObject", LoObject::Dictionary(xobjects));

    {
        let page_mut = doc
            .get_object_mut(page_id)
            .and_then(LoObject::as_dict_mut)
            .map_err(lopdf_err)?;
        page_mut.set("Resources", LoObject::Dictionary(resources));
    }

    let do_content = format!("q 1 0 0 1 {dx} {dy} cm /{form_name} Do Q\n").into_bytes();
    doc.add_page_contents(page_id, do_content)
        .map_err(lopdf_err)?;
    Ok(())
}

pub(crate) fn save_to_vec(doc: &mut LoDocument) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();
    doc.save_to(&mut out).map_err(|err| err.to_string())?;
    Ok(out)
}

/// Writes entries into the document information dictionary.
#[derive(Debug, Clone, Default)]
pub struct InfoStamp {
    entries: BTreeMap<String, String>,
}

impl InfoStamp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn title(self, value: impl Into<String>) -> Self {
        self.entry("Title", value)
    }

    pub fn author(self, value: impl Into<String>) -> Self {
        self.entry("Author", value)
    }

    pub fn subject(self, value: impl Into<String>) -> Self {
        self.entry("Subject", value)
    }

    pub fn producer(self, value: impl Into<String>) -> Self {
        self.entry("Producer", value)
    }
}

impl PostProcessor for InfoStamp {
    fn name(&self) -> &str {
        "info-stamp"
    }

    fn process(&self, bytes: Vec<u8>, _cancel: &Cancellation) -> Result<Vec<u8>, PostProcessError> {
        let mut doc = LoDocument::load_mem(&bytes)
            .map_err(|err| PostProcessError::new(format!("cannot parse pdf: {err}")))?;
        if doc.is_encrypted() {
            return Err(PostProcessError::new("cannot stamp an encrypted pdf"));
        }

        let info_id = match doc.trailer.get(b"Info").and_then(LoObject::as_reference) {
            Ok(id) => id,
            Err(_) => {
                let id = doc.add_object(lopdf::Dictionary::new());
                doc.trailer.set("Info", id);
                id
            }
        };
        let info = doc
            .get_object_mut(info_id)
            .and_then(LoObject::as_dict_mut)
            .map_err(|err| PostProcessError::new(format!("bad info dictionary: {err}")))?;
        for (key, value) in &self.entries {
            info.set(key.as_bytes().to_vec(), text_string(value));
        }
        save_to_vec(&mut doc).map_err(PostProcessError::new)
    }
}

const SEAL_PREFIX: &[u8] = b"%docbind-seal sha256:";

/// Terminal step appending a SHA-256 seal comment after the final `%%EOF`.
///
/// Any later byte edit breaks [`DigestSeal::verify`], which is why the seal
/// has to run last.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestSeal;

impl DigestSeal {
    pub fn verify(bytes: &[u8]) -> bool {
        let Some(pos) = bytes
            .windows(SEAL_PREFIX.len())
            .rposition(|window| window == SEAL_PREFIX)
        else {
            return false;
        };
        let recorded = String::from_utf8_lossy(&bytes[pos + SEAL_PREFIX.len()..]);
        hex_digest(&bytes[..pos]) == recorded.trim()
    }
}

impl PostProcessor for DigestSeal {
    fn name(&self) -> &str {
        "digest-seal"
    }

    fn is_terminal(&self) -> bool {
        true
    }

    fn process(
        &self,
        mut bytes: Vec<u8>,
        _cancel: &Cancellation,
    ) -> Result<Vec<u8>, PostProcessError> {
        if bytes.is_empty() {
            return Err(PostProcessError::new("nothing to seal"));
        }
        if !bytes.ends_with(b"\n") {
            bytes.push(b'\n');
        }
        let digest = hex_digest(&bytes);
        bytes.extend_from_slice(SEAL_PREFIX);
        bytes.extend_from_slice(digest.as_bytes());
        bytes.push(b'\n');
        Ok(bytes)
    }
}

pub(crate) fn hex_digest(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
