//! Fixed-field form templates backed by PDF AcroForms.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use lopdf::{
    Dictionary, Document as LoDocument, Object as LoObject, ObjectId as LoObjectId, Stream,
    dictionary,
};

use crate::error::DocBindError;
use crate::finalize::{
    decode_text_string, deref, is_truthy_flag, lopdf_err, number, save_to_vec, stamp_form_xobject,
    text_string,
};

const FLAG_MULTILINE: i64 = 1 << 12;
const FLAG_RADIO: i64 = 1 << 15;
const FLAG_PUSHBUTTON: i64 = 1 << 16;
const ANNOT_HIDDEN: i64 = 1 << 1;
const MAX_FIELD_DEPTH: usize = 32;

/// Value written into one form slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotValue {
    Text(String),
    /// Checkboxes use `checked`; text fields fall back to `text`.
    Flag { checked: bool, text: String },
}

impl SlotValue {
    pub fn text(value: impl Into<String>) -> Self {
        SlotValue::Text(value.into())
    }

    pub fn as_text(&self) -> &str {
        match self {
            SlotValue::Text(text) => text,
            SlotValue::Flag { text, .. } => text,
        }
    }
}

/// An opened form template: a mapping from slot name to settable field.
pub trait FormDocument {
    fn slot_names(&self) -> Vec<String>;

    fn has_slot(&self, name: &str) -> bool;

    /// Returns `false` when no slot carries `name`.
    fn remove_slot(&mut self, name: &str) -> Result<bool, DocBindError>;

    fn set_slot(&mut self, name: &str, value: &SlotValue) -> Result<(), DocBindError>;

    /// Turns every slot into static page content. No edits are possible afterwards.
    fn flatten(&mut self) -> Result<(), DocBindError>;

    fn to_bytes(&mut self) -> Result<Vec<u8>, DocBindError>;
}

pub trait FormBackend: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn FormDocument>, DocBindError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AcroFormBackend;

impl FormBackend for AcroFormBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn FormDocument>, DocBindError> {
        Ok(Box::new(AcroFormDocument::load(path)?))
    }
}

#[derive(Debug, Clone)]
struct FieldEntry {
    id: LoObjectId,
    parent: Option<LoObjectId>,
    widgets: Vec<LoObjectId>,
    field_type: Vec<u8>,
    flags: i64,
}

pub struct AcroFormDocument {
    doc: LoDocument,
    acroform_id: LoObjectId,
    fields: BTreeMap<String, FieldEntry>,
    font_id: Option<LoObjectId>,
    flattened: bool,
}

impl AcroFormDocument {
    pub fn load(path: &Path) -> Result<Self, DocBindError> {
        let bytes = std::fs::read(path).map_err(|err| DocBindError::TemplateLoad {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Self::parse(&bytes, path)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocBindError> {
        Self::parse(bytes, Path::new("<memory>"))
    }

    fn parse(bytes: &[u8], path: &Path) -> Result<Self, DocBindError> {
        let load_err = |message: String| DocBindError::TemplateLoad {
            path: PathBuf::from(path),
            message,
        };
        let mut doc = LoDocument::load_mem(bytes).map_err(|err| load_err(err.to_string()))?;
        if doc.is_encrypted() {
            return Err(load_err("encrypted templates are not supported".to_string()));
        }

        let catalog_id = doc
            .trailer
            .get(b"Root")
            .and_then(LoObject::as_reference)
            .map_err(|err| load_err(format!("missing document catalog: {err}")))?;
        let acroform = doc
            .get_object(catalog_id)
            .and_then(LoObject::as_dict)
            .and_then(|catalog| catalog.get(b"AcroForm"))
            .map_err(|_| load_err("document has no interactive form".to_string()))?
            .clone();
        let acroform_id = match acroform {
            LoObject::Reference(id) => id,
            LoObject::Dictionary(inline) => {
                let id = doc.add_object(inline);
                doc.get_object_mut(catalog_id)
                    .and_then(LoObject::as_dict_mut)
                    .map_err(lopdf_err)?
                    .set("AcroForm", id);
                id
            }
            _ => return Err(load_err("malformed AcroForm entry".to_string())),
        };

        let mut form = Self {
            doc,
            acroform_id,
            fields: BTreeMap::new(),
            font_id: None,
            flattened: false,
        };
        form.index_fields();
        tracing::debug!(path = %path.display(), slots = form.fields.len(), "form template opened");
        Ok(form)
    }

    fn index_fields(&mut self) {
        let roots = self
            .doc
            .get_object(self.acroform_id)
            .and_then(LoObject::as_dict)
            .ok()
            .and_then(|form| form.get(b"Fields").ok())
            .and_then(|fields| deref(&self.doc, fields))
            .and_then(|fields| fields.as_array().ok())
            .map(|fields| reference_ids(fields))
            .unwrap_or_default();

        let mut out = BTreeMap::new();
        for root in roots {
            walk_field(&self.doc, root, None, "", b"", 0, 0, &mut out);
        }
        self.fields = out;
    }

    /// Current `/V` of a slot as text.
    pub fn slot_value(&self, name: &str) -> Option<String> {
        let entry = self.fields.get(name)?;
        let field = self.doc.get_object(entry.id).and_then(LoObject::as_dict).ok()?;
        decode_text_string(field.get(b"V").ok()?)
    }

    fn ensure_editable(&self) -> Result<(), DocBindError> {
        if self.flattened {
            return Err(DocBindError::config("form has already been flattened"));
        }
        Ok(())
    }

    fn dict_mut(&mut self, id: LoObjectId) -> Result<&mut Dictionary, DocBindError> {
        self.doc
            .get_object_mut(id)
            .and_then(LoObject::as_dict_mut)
            .map_err(lopdf_err)
    }

    fn appearance_font(&mut self) -> LoObjectId {
        if let Some(id) = self.font_id {
            return id;
        }
        let id = self.doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        self.font_id = Some(id);
        id
    }

    fn write_text(&mut self, entry: &FieldEntry, text: &str) -> Result<(), DocBindError> {
        self.dict_mut(entry.id)?.set("V", text_string(text));
        let multiline = entry.flags & FLAG_MULTILINE != 0;
        let font_id = self.appearance_font();
        for widget_id in &entry.widgets {
            let (width, height, size) = {
                let widget = self
                    .doc
                    .get_object(*widget_id)
                    .and_then(LoObject::as_dict)
                    .map_err(lopdf_err)?;
                let (width, height) = widget_size(&self.doc, widget);
                let size = self.font_size(entry, widget, height, multiline);
                (width, height, size)
            };
            let content = text_appearance(text, width, height, size, multiline);
            let stream = Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Form",
                    "BBox" => vec![0.into(), 0.into(), LoObject::Real(width.into()), LoObject::Real(height.into())],
                    "Resources" => dictionary! {
                        "Font" => dictionary! { "F0" => font_id },
                    },
                },
                content,
            );
            let stream_id = self.doc.add_object(stream);
            self.dict_mut(*widget_id)?
                .set("AP", dictionary! { "N" => stream_id });
        }
        Ok(())
    }

    fn font_size(&self, entry: &FieldEntry, widget: &Dictionary, height: f32, multiline: bool) -> f32 {
        let field = self.doc.get_object(entry.id).and_then(LoObject::as_dict).ok();
        let acroform = self.doc.get_object(self.acroform_id).and_then(LoObject::as_dict).ok();
        let declared = [Some(widget), field, acroform]
            .into_iter()
            .flatten()
            .find_map(|dict| dict.get(b"DA").ok().and_then(decode_text_string))
            .and_then(|da| da_font_size(&da));
        match declared {
            Some(size) if size > 0.0 => size,
            _ if multiline => 10.0,
            _ => (height - 4.0).clamp(4.0, 12.0),
        }
    }

    fn write_checkbox(&mut self, entry: &FieldEntry, value: &SlotValue) -> Result<(), DocBindError> {
        let radio = entry.flags & FLAG_RADIO != 0;
        let mut selected: Option<Vec<u8>> = None;
        for widget_id in &entry.widgets {
            let on_state = self
                .doc
                .get_object(*widget_id)
                .and_then(LoObject::as_dict)
                .ok()
                .and_then(|widget| widget_on_state(&self.doc, widget))
                .unwrap_or_else(|| b"Yes".to_vec());
            let checked = match (radio, value) {
                (true, _) => on_state == value.as_text().as_bytes(),
                (false, SlotValue::Flag { checked, .. }) => *checked,
                (false, SlotValue::Text(text)) => is_truthy_flag(text),
            };
            let state = if checked {
                selected.get_or_insert_with(|| on_state.clone());
                on_state
            } else {
                b"Off".to_vec()
            };
            self.dict_mut(*widget_id)?.set("AS", LoObject::Name(state));
        }
        let field_value = selected.unwrap_or_else(|| b"Off".to_vec());
        self.dict_mut(entry.id)?.set("V", LoObject::Name(field_value));
        Ok(())
    }

    fn page_of_widgets(&self) -> BTreeMap<LoObjectId, LoObjectId> {
        let mut out = BTreeMap::new();
        for page_id in self.doc.get_pages().into_values() {
            let annots = self
                .doc
                .get_object(page_id)
                .and_then(LoObject::as_dict)
                .ok()
                .and_then(|page| page.get(b"Annots").ok())
                .and_then(|annots| deref(&self.doc, annots))
                .and_then(|annots| annots.as_array().ok())
                .map(|annots| reference_ids(annots))
                .unwrap_or_default();
            for annot in annots {
                out.insert(annot, page_id);
            }
        }
        out
    }

    fn drop_annotations(&mut self, widgets: &BTreeSet<LoObjectId>) -> Result<(), DocBindError> {
        let pages: Vec<LoObjectId> = self.doc.get_pages().into_values().collect();
        for page_id in pages {
            retain_refs(&mut self.doc, page_id, b"Annots", widgets)?;
        }
        Ok(())
    }

    fn set_need_appearances(&mut self) -> Result<(), DocBindError> {
        let acroform_id = self.acroform_id;
        self.dict_mut(acroform_id)?
            .set("NeedAppearances", LoObject::Boolean(true));
        Ok(())
    }
}

impl FormDocument for AcroFormDocument {
    fn slot_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    fn has_slot(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    fn remove_slot(&mut self, name: &str) -> Result<bool, DocBindError> {
        self.ensure_editable()?;
        let Some(entry) = self.fields.remove(name) else {
            return Ok(false);
        };
        let target = BTreeSet::from([entry.id]);
        match entry.parent {
            Some(parent) => retain_refs(&mut self.doc, parent, b"Kids", &target)?,
            None => retain_refs(&mut self.doc, self.acroform_id, b"Fields", &target)?,
        }
        let widgets: BTreeSet<LoObjectId> = entry.widgets.iter().copied().collect();
        self.drop_annotations(&widgets)?;
        for id in widgets.iter().chain(std::iter::once(&entry.id)) {
            self.doc.objects.remove(id);
        }
        tracing::debug!(field = name, widgets = widgets.len(), "form field removed");
        Ok(true)
    }

    fn set_slot(&mut self, name: &str, value: &SlotValue) -> Result<(), DocBindError> {
        self.ensure_editable()?;
        let entry = self
            .fields
            .get(name)
            .cloned()
            .ok_or_else(|| DocBindError::config(format!("form has no field named {name}")))?;
        match entry.field_type.as_slice() {
            b"Btn" if entry.flags & FLAG_PUSHBUTTON != 0 => {
                return Err(DocBindError::config(format!(
                    "field {name} is a push button and cannot hold a value"
                )));
            }
            b"Btn" => self.write_checkbox(&entry, value)?,
            _ => self.write_text(&entry, value.as_text())?,
        }
        self.set_need_appearances()
    }

    fn flatten(&mut self) -> Result<(), DocBindError> {
        self.ensure_editable()?;
        let pages = self.page_of_widgets();
        let mut stamped = 0usize;
        let mut widgets = BTreeSet::new();
        for entry in self.fields.values() {
            widgets.extend(entry.widgets.iter().copied());
        }

        for widget_id in &widgets {
            let placement = {
                let Ok(widget) = self.doc.get_object(*widget_id).and_then(LoObject::as_dict) else {
                    continue;
                };
                let hidden = widget
                    .get(b"F")
                    .and_then(LoObject::as_i64)
                    .map(|flags| flags & ANNOT_HIDDEN != 0)
                    .unwrap_or(false);
                let page = widget
                    .get(b"P")
                    .and_then(LoObject::as_reference)
                    .ok()
                    .or_else(|| pages.get(widget_id).copied());
                match (hidden, page, appearance_stream_id(&self.doc, widget)) {
                    (false, Some(page), Some(stream_id)) => {
                        let (x, y) = widget_origin(&self.doc, widget);
                        let (bx, by) = stream_origin(&self.doc, stream_id);
                        Some((page, stream_id, x - bx, y - by))
                    }
                    _ => None,
                }
            };
            let Some((page_id, stream_id, dx, dy)) = placement else {
                continue;
            };
            if let Ok(LoObject::Stream(stream)) = self.doc.get_object_mut(stream_id) {
                if !stream.dict.has(b"Subtype") {
                    stream.dict.set("Subtype", "Form");
                }
            }
            stamped += 1;
            stamp_form_xobject(
                &mut self.doc,
                page_id,
                stream_id,
                &format!("DBFlat{stamped}"),
                dx,
                dy,
            )?;
        }

        self.drop_annotations(&widgets)?;
        let catalog_id = self
            .doc
            .trailer
            .get(b"Root")
            .and_then(LoObject::as_reference)
            .map_err(lopdf_err)?;
        self.dict_mut(catalog_id)?.remove(b"AcroForm");
        self.doc.objects.remove(&self.acroform_id);
        self.fields.clear();
        self.flattened = true;
        tracing::debug!(widgets = widgets.len(), stamped, "form flattened");
        Ok(())
    }

    fn to_bytes(&mut self) -> Result<Vec<u8>, DocBindError> {
        self.doc.prune_objects();
        self.doc.compress();
        save_to_vec(&mut self.doc).map_err(DocBindError::Pdf)
    }
}

fn reference_ids(items: &[LoObject]) -> Vec<LoObjectId> {
    items
        .iter()
        .filter_map(|item| item.as_reference().ok())
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn walk_field(
    doc: &LoDocument,
    id: LoObjectId,
    parent: Option<LoObjectId>,
    prefix: &str,
    inherited_type: &[u8],
    inherited_flags: i64,
    depth: usize,
    out: &mut BTreeMap<String, FieldEntry>,
) {
    if depth > MAX_FIELD_DEPTH {
        return;
    }
    let Ok(field) = doc.get_object(id).and_then(LoObject::as_dict) else {
        return;
    };
    let partial = field.get(b"T").ok().and_then(decode_text_string);
    let qualified = match (&partial, prefix.is_empty()) {
        (Some(name), true) => name.clone(),
        (Some(name), false) => format!("{prefix}.{name}"),
        (None, _) => prefix.to_string(),
    };
    let field_type = field
        .get(b"FT")
        .and_then(LoObject::as_name)
        .map(|name| name.to_vec())
        .unwrap_or_else(|_| inherited_type.to_vec());
    let flags = field
        .get(b"Ff")
        .and_then(LoObject::as_i64)
        .unwrap_or(inherited_flags);

    let kids = field
        .get(b"Kids")
        .ok()
        .and_then(|kids| deref(doc, kids))
        .and_then(|kids| kids.as_array().ok())
        .map(|kids| reference_ids(kids))
        .unwrap_or_default();

    let mut widgets = Vec::new();
    for kid in kids {
        let is_field = doc
            .get_object(kid)
            .and_then(LoObject::as_dict)
            .map(|dict| dict.has(b"T"))
            .unwrap_or(false);
        if is_field {
            walk_field(doc, kid, Some(id), &qualified, &field_type, flags, depth + 1, out);
        } else {
            widgets.push(kid);
        }
    }
    if widgets.is_empty() && is_widget(field) {
        widgets.push(id);
    }

    if partial.is_some() && !widgets.is_empty() {
        out.insert(
            qualified,
            FieldEntry {
                id,
                parent,
                widgets,
                field_type,
                flags,
            },
        );
    }
}

fn is_widget(dict: &Dictionary) -> bool {
    matches!(dict.get(b"Subtype").and_then(LoObject::as_name), Ok(b"Widget")) || dict.has(b"Rect")
}

fn references_any(obj: &LoObject, ids: &BTreeSet<LoObjectId>) -> bool {
    matches!(obj, LoObject::Reference(id) if ids.contains(id))
}

/// Removes references to `drop` from the array stored under `key`, which
/// may be inline or indirect.
fn retain_refs(
    doc: &mut LoDocument,
    holder: LoObjectId,
    key: &[u8],
    drop: &BTreeSet<LoObjectId>,
) -> Result<(), DocBindError> {
    let current = doc
        .get_object(holder)
        .and_then(LoObject::as_dict)
        .map_err(lopdf_err)?
        .get(key)
        .ok()
        .cloned();
    match current {
        Some(LoObject::Reference(array_id)) => {
            if let Ok(items) = doc.get_object_mut(array_id).and_then(LoObject::as_array_mut) {
                items.retain(|item| !references_any(item, drop));
            }
        }
        Some(LoObject::Array(mut items)) => {
            items.retain(|item| !references_any(item, drop));
            doc.get_object_mut(holder)
                .and_then(LoObject::as_dict_mut)
                .map_err(lopdf_err)?
                .set(key.to_vec(), LoObject::Array(items));
        }
        _ => {}
    }
    Ok(())
}

fn rect_of(doc: &LoDocument, dict: &Dictionary, key: &[u8]) -> Option<[f32; 4]> {
    let items = deref(doc, dict.get(key).ok()?)?.as_array().ok()?;
    if items.len() != 4 {
        return None;
    }
    let mut out = [0.0f32; 4];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = number(deref(doc, item)?)?;
    }
    Some(out)
}

fn widget_size(doc: &LoDocument, widget: &Dictionary) -> (f32, f32) {
    match rect_of(doc, widget, b"Rect") {
        Some([x1, y1, x2, y2]) => ((x2 - x1).abs(), (y2 - y1).abs()),
        None => (0.0, 0.0),
    }
}

fn widget_origin(doc: &LoDocument, widget: &Dictionary) -> (f32, f32) {
    match rect_of(doc, widget, b"Rect") {
        Some([x1, y1, x2, y2]) => (x1.min(x2), y1.min(y2)),
        None => (0.0, 0.0),
    }
}

fn stream_origin(doc: &LoDocument, stream_id: LoObjectId) -> (f32, f32) {
    match doc.get_object(stream_id) {
        Ok(LoObject::Stream(stream)) => match rect_of(doc, &stream.dict, b"BBox") {
            Some([x1, y1, _, _]) => (x1, y1),
            None => (0.0, 0.0),
        },
        _ => (0.0, 0.0),
    }
}

fn widget_on_state(doc: &LoDocument, widget: &Dictionary) -> Option<Vec<u8>> {
    let ap = deref(doc, widget.get(b"AP").ok()?)?.as_dict().ok()?;
    let normal = deref(doc, ap.get(b"N").ok()?)?.as_dict().ok()?;
    normal
        .iter()
        .map(|(key, _)| key)
        .find(|key| key.as_slice() != b"Off")
        .cloned()
}

/// Normal appearance for the widget's current state.
fn appearance_stream_id(doc: &LoDocument, widget: &Dictionary) -> Option<LoObjectId> {
    let ap = deref(doc, widget.get(b"AP").ok()?)?.as_dict().ok()?;
    let state_stream = |states: &Dictionary| {
        let current = widget.get(b"AS").and_then(LoObject::as_name).ok()?;
        states.get(current).and_then(LoObject::as_reference).ok()
    };
    match ap.get(b"N").ok()? {
        LoObject::Reference(id) => match doc.get_object(*id).ok()? {
            LoObject::Stream(_) => Some(*id),
            LoObject::Dictionary(states) => state_stream(states),
            _ => None,
        },
        LoObject::Dictionary(states) => state_stream(states),
        _ => None,
    }
}

fn da_font_size(da: &str) -> Option<f32> {
    let tokens: Vec<&str> = da.split_whitespace().collect();
    let pos = tokens.iter().position(|token| *token == "Tf")?;
    tokens.get(pos.checked_sub(1)?)?.parse().ok()
}

/// WinAnsi (cp1252) byte for `ch`, if the encoding has one.
fn win_ansi_byte(ch: char) -> Option<u8> {
    let byte = match ch {
        '\u{20}'..='\u{7E}' | '\u{A0}'..='\u{FF}' => return Some(u32::from(ch) as u8),
        '€' => 0x80,
        '‚' => 0x82,
        'ƒ' => 0x83,
        '„' => 0x84,
        '…' => 0x85,
        '†' => 0x86,
        '‡' => 0x87,
        'ˆ' => 0x88,
        '‰' => 0x89,
        'Š' => 0x8A,
        '‹' => 0x8B,
        'Œ' => 0x8C,
        'Ž' => 0x8E,
        '\u{2018}' => 0x91,
        '\u{2019}' => 0x92,
        '\u{201C}' => 0x93,
        '\u{201D}' => 0x94,
        '•' => 0x95,
        '\u{2013}' => 0x96,
        '\u{2014}' => 0x97,
        '˜' => 0x98,
        '™' => 0x99,
        'š' => 0x9A,
        '›' => 0x9B,
        'œ' => 0x9C,
        'ž' => 0x9E,
        'Ÿ' => 0x9F,
        _ => return None,
    };
    Some(byte)
}

/// Hex string in WinAnsi; characters the encoding lacks become `?`.
fn win_ansi_hex(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2 + 2);
    out.push('<');
    for ch in text.chars() {
        let byte = win_ansi_byte(ch).unwrap_or(b'?');
        out.push_str(&format!("{byte:02X}"));
    }
    out.push('>');
    out
}

fn text_appearance(text: &str, width: f32, height: f32, size: f32, multiline: bool) -> Vec<u8> {
    let mut content = format!("/Tx BMC q 0 0 {width} {height} re W n BT /F0 {size} Tf 0 g ");
    if multiline {
        let leading = size * 1.15;
        let top = height - 2.0 - size;
        content.push_str(&format!("2 {top} Td "));
        for (idx, line) in text.lines().enumerate() {
            if idx > 0 {
                content.push_str(&format!("0 {} Td ", -leading));
            }
            content.push_str(&format!("{} Tj ", win_ansi_hex(line)));
        }
    } else {
        let single = text.replace(['\r', '\n'], " ");
        let baseline = ((height - size) / 2.0 + size * 0.22).max(1.0);
        content.push_str(&format!("2 {baseline} Td {} Tj ", win_ansi_hex(&single)));
    }
    content.push_str("ET Q EMC");
    content.into_bytes()
}
