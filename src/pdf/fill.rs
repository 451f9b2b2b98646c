//! Filling a surface PDF with submitted values

use crate::error::Result;
use crate::form::validate::parse_checked;
use crate::pdf::appearance::{add_form_xobject, display_size, AppearanceStyle, FONT_NAME};
use crate::pdf::inspect::{
    acroform_dict, choice_options, classify, terminal_fields, value_text, TerminalField,
};
use crate::pdf::objects::{
    self, catalog_id, decode_text, field_flags, name_object, rect_from_object, resolve,
    resolve_array, resolve_dict, text_string, FieldFlags,
};
use crate::pdf::surface::SkippedField;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// File name given to an embedded submission payload
pub const PAYLOAD_FILE_NAME: &str = "payload.json";

#[derive(Debug, Clone, Default)]
pub struct FillOptions {
    /// JSON document embedded in the filled PDF as `payload.json`
    pub embed_payload: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FillReport {
    pub fields_filled: u32,
    pub fields_skipped: Vec<SkippedField>,
    /// Required fields that are still empty after filling
    pub missing_required: Vec<String>,
    pub payload_embedded: bool,
}

/// Set field values on a PDF carrying an AcroForm
pub fn fill_surface_pdf(
    data: &[u8],
    values: &Map<String, Value>,
    options: &FillOptions,
) -> Result<(Vec<u8>, FillReport)> {
    let mut doc = objects::load(data)?;
    let fields = terminal_fields(&doc);
    let font = form_font(&doc);
    let by_name: HashMap<&str, &TerminalField> =
        fields.iter().map(|f| (f.name.as_str(), f)).collect();

    let mut report = FillReport::default();

    for (name, value) in values {
        let outcome = match by_name.get(name.as_str()) {
            Some(field) => fill_field(&mut doc, field, value, font),
            None => Err("Field not found in PDF".to_string()),
        };
        match outcome {
            Ok(()) => report.fields_filled += 1,
            Err(reason) => {
                tracing::debug!(field = %name, reason = %reason, "field skipped");
                report.fields_skipped.push(SkippedField {
                    name: name.clone(),
                    reason,
                });
            }
        }
    }

    report.missing_required = missing_required(&doc, &fields);
    set_need_appearances(&mut doc)?;

    if let Some(payload) = &options.embed_payload {
        embed_json(&mut doc, PAYLOAD_FILE_NAME, payload)?;
        report.payload_embedded = true;
    }

    let bytes = objects::save(&mut doc)?;
    Ok((bytes, report))
}

/// Fill one terminal field, or explain why it cannot be filled
fn fill_field(
    doc: &mut Document,
    field: &TerminalField,
    value: &Value,
    font: Option<ObjectId>,
) -> std::result::Result<(), String> {
    let dict = doc
        .get_dictionary(field.id)
        .map_err(|_| "Field object is missing".to_string())?
        .clone();
    let kind = classify(doc, &dict);
    let flags = field_flags(doc, &dict);

    if flags.contains(FieldFlags::READ_ONLY) {
        return Err("Field is read-only".to_string());
    }

    match kind {
        "text" => {
            let text = scalar_text(value).ok_or("Text fields take a string or number")?;
            set_field(doc, field.id, "V", text_string(&text))?;
            for widget in &field.widgets {
                refresh_appearance(doc, widget.id, font, |style, w, h| style.text(w, h, &text))?;
            }
            Ok(())
        }
        "checkbox" => {
            let checked = checkbox_value(value).ok_or("Checkbox fields take true/false or Yes/Off")?;
            let on_state = field
                .widgets
                .iter()
                .find_map(|w| w.on_states.first().cloned())
                .unwrap_or_else(|| "Yes".to_string());
            let state = if checked { on_state.as_str() } else { "Off" };
            set_field(doc, field.id, "V", name_object(state))?;
            for widget in &field.widgets {
                let widget_state = match (checked, widget.on_states.first()) {
                    (true, Some(on)) => on.as_str(),
                    (true, None) => "Yes",
                    (false, _) => "Off",
                };
                set_field(doc, widget.id, "AS", name_object(widget_state))?;
            }
            Ok(())
        }
        "radio_button" => {
            let choice = scalar_text(value).ok_or("Radio groups take the export value of one button")?;
            let off = choice.is_empty() || choice == "Off";
            if !off && !field.widgets.iter().any(|w| w.on_states.contains(&choice)) {
                let mut exports: Vec<&str> = field
                    .widgets
                    .iter()
                    .flat_map(|w| w.on_states.iter().map(String::as_str))
                    .collect();
                exports.dedup();
                return Err(format!(
                    "'{}' is not one of the radio options: {}",
                    choice,
                    exports.join(", ")
                ));
            }
            let state = if off { "Off" } else { choice.as_str() };
            set_field(doc, field.id, "V", name_object(state))?;
            for widget in &field.widgets {
                let widget_state = if widget.on_states.iter().any(|s| s == state) {
                    state
                } else {
                    "Off"
                };
                set_field(doc, widget.id, "AS", name_object(widget_state))?;
            }
            Ok(())
        }
        "combo_box" | "list_box" => {
            let options = choice_options(doc, &dict);
            let selected = choice_values(value).ok_or("Choice fields take a string or a list of strings")?;
            let free_text = kind == "combo_box" && flags.contains(FieldFlags::EDIT);
            if selected.len() > 1 && !flags.contains(FieldFlags::MULTI_SELECT) {
                return Err("Field accepts a single selection".to_string());
            }
            if !free_text {
                if let Some(bad) = selected
                    .iter()
                    .find(|s| !s.is_empty() && !options.contains(*s))
                {
                    return Err(format!(
                        "'{}' is not one of the options: {}",
                        bad,
                        options.join(", ")
                    ));
                }
            }

            let v = match selected.as_slice() {
                [] => text_string(""),
                [single] => text_string(single),
                many => Object::Array(many.iter().map(|s| text_string(s)).collect()),
            };
            set_field(doc, field.id, "V", v)?;
            for widget in &field.widgets {
                if kind == "list_box" {
                    refresh_appearance(doc, widget.id, font, |style, w, h| {
                        style.list(w, h, &options, &selected)
                    })?;
                } else {
                    let text = selected.first().cloned().unwrap_or_default();
                    refresh_appearance(doc, widget.id, font, |style, w, h| style.text(w, h, &text))?;
                }
            }
            Ok(())
        }
        "signature" => Err("Signature fields cannot be filled".to_string()),
        "push_button" => Err("Push buttons have no value".to_string()),
        _ => Err("Unsupported field type for writing".to_string()),
    }
}

fn set_field(
    doc: &mut Document,
    id: ObjectId,
    key: &str,
    value: Object,
) -> std::result::Result<(), String> {
    doc.get_dictionary_mut(id)
        .map_err(|e| format!("Failed to update field: {}", e))?
        .set(key, value);
    Ok(())
}

/// String value of a scalar; `null` clears the field
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

fn checkbox_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Null => Some(false),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => parse_checked(s),
        _ => None,
    }
}

fn choice_values(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => items.iter().map(scalar_text).collect(),
        Value::Null => Some(Vec::new()),
        other => scalar_text(other).map(|s| vec![s]),
    }
}

/// Replace a widget's normal appearance. Without a form font the appearance
/// is dropped and left to the viewer.
fn refresh_appearance<F>(
    doc: &mut Document,
    widget_id: ObjectId,
    font: Option<ObjectId>,
    draw: F,
) -> std::result::Result<(), String>
where
    F: FnOnce(&AppearanceStyle, f32, f32) -> String,
{
    let Some(font) = font else {
        if let Ok(widget) = doc.get_dictionary_mut(widget_id) {
            widget.remove(b"AP");
        }
        return Ok(());
    };

    let Ok(widget) = doc.get_dictionary(widget_id) else {
        return Ok(());
    };
    let Some(rect) = widget.get(b"Rect").ok().and_then(|r| rect_from_object(doc, r)) else {
        return Ok(());
    };
    let style = AppearanceStyle::from_widget(doc, widget);
    let rotation = widget_rotation(doc, widget);
    let (w, h) = display_size(rect.width, rect.height, rotation);
    let content = draw(&style, w, h);

    let ap = add_form_xobject(doc, content, w, h, rotation, Some(font));
    set_field(doc, widget_id, "AP", Object::Dictionary(dictionary! { "N" => Object::Reference(ap) }))
}

fn widget_rotation(doc: &Document, widget: &Dictionary) -> u16 {
    widget
        .get(b"MK")
        .ok()
        .and_then(|m| resolve_dict(doc, m))
        .and_then(|mk| mk.get(b"R").ok())
        .and_then(|r| r.as_i64().ok())
        .map(|r| r.rem_euclid(360) as u16)
        .filter(|r| r % 90 == 0)
        .unwrap_or(0)
}

fn set_need_appearances(doc: &mut Document) -> Result<()> {
    let catalog = catalog_id(doc)?;
    let entry = doc.get_dictionary(catalog)?.get(b"AcroForm").ok().cloned();
    match entry {
        Some(Object::Reference(id)) => {
            doc.get_dictionary_mut(id)?.set("NeedAppearances", true);
        }
        Some(Object::Dictionary(_)) => {
            if let Ok(Object::Dictionary(acro)) = doc.get_dictionary_mut(catalog)?.get_mut(b"AcroForm") {
                acro.set("NeedAppearances", true);
            }
        }
        _ => {}
    }
    Ok(())
}

/// Helvetica resource of the form's `/DR`, when it is an indirect font
fn form_font(doc: &Document) -> Option<ObjectId> {
    acroform_dict(doc)?
        .get(b"DR")
        .ok()
        .and_then(|dr| resolve_dict(doc, dr))?
        .get(b"Font")
        .ok()
        .and_then(|f| resolve_dict(doc, f))?
        .get(FONT_NAME.as_bytes())
        .ok()?
        .as_reference()
        .ok()
}

fn missing_required(doc: &Document, fields: &[TerminalField]) -> Vec<String> {
    fields
        .iter()
        .filter_map(|field| {
            let dict = doc.get_dictionary(field.id).ok()?;
            if !field_flags(doc, dict).contains(FieldFlags::REQUIRED) {
                return None;
            }
            let empty = value_text(doc, dict)
                .map(|v| v.trim().is_empty() || v == "Off")
                .unwrap_or(true);
            empty.then(|| field.name.clone())
        })
        .collect()
}

/// Attach a JSON document as an embedded file listed in
/// `/Names /EmbeddedFiles`, replacing any entry with the same name
pub fn embed_json(doc: &mut Document, file_name: &str, value: &Value) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let now = chrono::Utc::now().format("D:%Y%m%d%H%M%SZ").to_string();

    let file_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "EmbeddedFile",
            "Subtype" => name_object("application/json"),
            "Params" => dictionary! {
                "Size" => bytes.len() as i64,
                "ModDate" => text_string(&now),
            },
        },
        bytes,
    ));
    let spec_id = doc.add_object(dictionary! {
        "Type" => "Filespec",
        "F" => text_string(file_name),
        "UF" => text_string(file_name),
        "Desc" => text_string("Submitted form data"),
        "AFRelationship" => "Data",
        "EF" => dictionary! { "F" => Object::Reference(file_id) },
    });

    let catalog = catalog_id(doc)?;
    let names_entry = doc.get_dictionary(catalog)?.get(b"Names").ok().cloned();
    let mut names = names_entry
        .as_ref()
        .and_then(|n| resolve_dict(doc, n))
        .cloned()
        .unwrap_or_default();
    let mut tree = names
        .get(b"EmbeddedFiles")
        .ok()
        .and_then(|t| resolve_dict(doc, t))
        .cloned()
        .unwrap_or_default();

    // The tree is rewritten as a single sorted leaf, so entries that sat
    // under /Kids are pulled up and any earlier copy of `file_name` drops out
    let mut entries = name_tree_entries(doc, &tree, 0);
    entries.retain(|(key, _)| key != file_name);
    entries.push((file_name.to_string(), Object::Reference(spec_id)));
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let flat: Vec<Object> = entries
        .into_iter()
        .flat_map(|(key, value)| [text_string(&key), value])
        .collect();
    tree.remove(b"Kids");
    tree.remove(b"Limits");
    tree.set("Names", flat);
    names.set("EmbeddedFiles", tree);

    match names_entry {
        Some(Object::Reference(id)) => {
            doc.objects.insert(id, Object::Dictionary(names));
        }
        _ => doc.get_dictionary_mut(catalog)?.set("Names", names),
    }
    Ok(())
}

/// Read back an embedded JSON attachment by file name
pub fn read_embedded_json(data: &[u8], file_name: &str) -> Result<Option<Value>> {
    let doc = objects::load(data)?;
    let Some(tree) = doc
        .catalog()
        .ok()
        .and_then(|c| c.get(b"Names").ok())
        .and_then(|n| resolve_dict(&doc, n))
        .and_then(|n| n.get(b"EmbeddedFiles").ok())
        .and_then(|t| resolve_dict(&doc, t))
    else {
        return Ok(None);
    };

    let entries = name_tree_entries(&doc, tree, 0);
    for (_, spec) in entries.iter().filter(|(key, _)| key == file_name) {
        let stream = resolve_dict(&doc, spec)
            .and_then(|spec| spec.get(b"EF").ok())
            .and_then(|ef| resolve_dict(&doc, ef))
            .and_then(|ef| ef.get(b"F").ok())
            .map(|f| resolve(&doc, f));
        if let Some(Object::Stream(stream)) = stream {
            let content = stream
                .decompressed_content()
                .unwrap_or_else(|_| stream.content.clone());
            return Ok(Some(serde_json::from_slice(&content)?));
        }
    }
    Ok(None)
}

const MAX_NAME_TREE_DEPTH: usize = 32;

/// Every key/value pair of a name tree node, descending through `/Kids`
fn name_tree_entries(doc: &Document, node: &Dictionary, depth: usize) -> Vec<(String, Object)> {
    let mut entries: Vec<(String, Object)> = node
        .get(b"Names")
        .ok()
        .and_then(|n| resolve_array(doc, n))
        .map(|arr| {
            arr.chunks_exact(2)
                .filter_map(|pair| match resolve(doc, &pair[0]) {
                    Object::String(key, _) => Some((decode_text(key), pair[1].clone())),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    if depth >= MAX_NAME_TREE_DEPTH {
        tracing::warn!(depth, "name tree nested too deeply, ignoring deeper kids");
        return entries;
    }
    let kids = node
        .get(b"Kids")
        .ok()
        .and_then(|k| resolve_array(doc, k))
        .map(|k| k.as_slice())
        .unwrap_or_default();
    for kid in kids {
        if let Some(child) = resolve_dict(doc, kid) {
            entries.extend(name_tree_entries(doc, child, depth + 1));
        }
    }
    entries
}
