//! Reading AcroForm fields, page geometry and document metadata with lopdf

use crate::error::Result;
use crate::form::field::{FieldDescriptor, FieldType, FormSchema, Rgb};
use crate::form::geometry::{PageGeometry, Rect};
use crate::pdf::appearance::AppearanceStyle;
use crate::pdf::objects::{
    self, dict_text, field_flags, inherited, object_text, rect_from_object, resolve,
    resolve_array, resolve_dict, FieldFlags,
};
use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// One widget annotation belonging to a terminal field
#[derive(Debug, Clone)]
pub(crate) struct Widget {
    pub id: ObjectId,
    pub page: Option<u32>,
    pub rect: Option<Rect>,
    /// Appearance state names other than `Off`
    pub on_states: Vec<String>,
}

/// A terminal field (one with a value) and its widgets
#[derive(Debug, Clone)]
pub(crate) struct TerminalField {
    pub id: ObjectId,
    pub name: String,
    pub widgets: Vec<Widget>,
}

/// Form field as reported to clients
#[derive(Debug, Clone, Serialize)]
pub struct FormFieldInfo {
    /// Fully qualified field name
    pub name: String,
    /// text, checkbox, radio_button, combo_box, list_box, push_button, signature, unknown
    pub field_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_checked: Option<bool>,
    pub is_read_only: bool,
    pub is_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    /// Export values of the field's button widgets
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub export_values: Vec<String>,
    /// 0-based page index of the first widget
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// User-space rectangle of the first widget
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rect: Option<Rect>,
    pub widget_count: usize,
}

/// PDF document information dictionary
#[derive(Debug, Clone, Default, Serialize)]
pub struct PdfMetadataInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modification_date: Option<String>,
}

/// Field counts by kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldCounts {
    pub text: u32,
    pub checkbox: u32,
    pub radio: u32,
    pub signature: u32,
    pub choice: u32,
    pub other: u32,
}

impl FieldCounts {
    pub fn total(&self) -> u32 {
        self.text + self.checkbox + self.radio + self.signature + self.choice + self.other
    }
}

/// Document summary recorded alongside submissions
#[derive(Debug, Clone, Serialize)]
pub struct FormMetadata {
    pub info: PdfMetadataInfo,
    pub pages: u32,
    pub has_form: bool,
    pub field_count: FieldCounts,
    pub total_fields: u32,
    pub extracted_at: String,
}

/// Page geometry for every page of a PDF
pub fn page_geometries(data: &[u8]) -> Result<Vec<PageGeometry>> {
    let doc = objects::load(data)?;
    Ok(objects::page_geometries(&doc))
}

/// Map every annotation object to the page index it appears on
fn annotation_pages(doc: &Document) -> HashMap<ObjectId, u32> {
    let mut map = HashMap::new();
    for (index, page_id) in objects::page_ids(doc).into_iter().enumerate() {
        let Ok(page) = doc.get_dictionary(page_id) else {
            continue;
        };
        let Some(annots) = page.get(b"Annots").ok().and_then(|a| resolve_array(doc, a)) else {
            continue;
        };
        for annot in annots {
            if let Object::Reference(id) = annot {
                map.insert(*id, index as u32);
            }
        }
    }
    map
}

fn page_of_widget(
    widget: &Dictionary,
    widget_id: ObjectId,
    annot_pages: &HashMap<ObjectId, u32>,
    page_index: &HashMap<ObjectId, u32>,
) -> Option<u32> {
    annot_pages.get(&widget_id).copied().or_else(|| {
        widget
            .get(b"P")
            .ok()
            .and_then(|p| p.as_reference().ok())
            .and_then(|p| page_index.get(&p).copied())
    })
}

fn on_states(doc: &Document, widget: &Dictionary) -> Vec<String> {
    widget
        .get(b"AP")
        .ok()
        .and_then(|ap| resolve_dict(doc, ap))
        .and_then(|ap| ap.get(b"N").ok())
        .and_then(|n| resolve_dict(doc, n))
        .map(|n| {
            n.iter()
                .map(|(k, _)| String::from_utf8_lossy(k).into_owned())
                .filter(|k| k != "Off")
                .collect()
        })
        .unwrap_or_default()
}

/// Walk `/AcroForm /Fields` and collect terminal fields with their widgets
pub(crate) fn terminal_fields(doc: &Document) -> Vec<TerminalField> {
    let mut out = Vec::new();
    let Some(acroform) = acroform_dict(doc) else {
        return out;
    };
    let Some(fields) = acroform.get(b"Fields").ok().and_then(|f| resolve_array(doc, f)) else {
        return out;
    };

    let annot_pages = annotation_pages(doc);
    let page_index: HashMap<ObjectId, u32> = objects::page_ids(doc)
        .into_iter()
        .enumerate()
        .map(|(i, id)| (id, i as u32))
        .collect();

    let ctx = WalkContext {
        doc,
        annot_pages: &annot_pages,
        page_index: &page_index,
    };
    for field in fields {
        walk(&ctx, field, "", 0, &mut out);
    }
    out
}

struct WalkContext<'a> {
    doc: &'a Document,
    annot_pages: &'a HashMap<ObjectId, u32>,
    page_index: &'a HashMap<ObjectId, u32>,
}

const MAX_FIELD_DEPTH: usize = 32;

fn walk(
    ctx: &WalkContext<'_>,
    node: &Object,
    parent_name: &str,
    depth: usize,
    out: &mut Vec<TerminalField>,
) {
    if depth > MAX_FIELD_DEPTH {
        return;
    }
    let Object::Reference(id) = node else {
        tracing::debug!("skipping inline field dictionary");
        return;
    };
    let Ok(dict) = ctx.doc.get_dictionary(*id) else {
        return;
    };

    let partial = dict_text(ctx.doc, dict, b"T");
    let name = match (parent_name.is_empty(), partial) {
        (true, Some(p)) => p,
        (false, Some(p)) => format!("{}.{}", parent_name, p),
        (_, None) => parent_name.to_string(),
    };

    let kids: Vec<&Object> = dict
        .get(b"Kids")
        .ok()
        .and_then(|k| resolve_array(ctx.doc, k))
        .map(|k| k.iter().collect())
        .unwrap_or_default();

    let kid_is_field = |kid: &&Object| {
        resolve_dict(ctx.doc, kid).is_some_and(|d| d.has(b"T") || d.has(b"FT"))
    };

    if !kids.is_empty() && kids.iter().any(kid_is_field) {
        for kid in kids {
            walk(ctx, kid, &name, depth + 1, out);
        }
        return;
    }

    let widget_refs: Vec<ObjectId> = if kids.is_empty() {
        vec![*id]
    } else {
        kids.iter().filter_map(|k| k.as_reference().ok()).collect()
    };

    let widgets = widget_refs
        .into_iter()
        .filter_map(|wid| {
            let w = ctx.doc.get_dictionary(wid).ok()?;
            Some(Widget {
                id: wid,
                page: page_of_widget(w, wid, ctx.annot_pages, ctx.page_index),
                rect: w.get(b"Rect").ok().and_then(|r| rect_from_object(ctx.doc, r)),
                on_states: on_states(ctx.doc, w),
            })
        })
        .collect();

    out.push(TerminalField {
        id: *id,
        name,
        widgets,
    });
}

pub(crate) fn acroform_dict(doc: &Document) -> Option<&Dictionary> {
    let catalog = doc.catalog().ok()?;
    catalog
        .get(b"AcroForm")
        .ok()
        .and_then(|a| resolve_dict(doc, a))
}

/// Classify a field dictionary the way clients see it
pub(crate) fn classify(doc: &Document, dict: &Dictionary) -> &'static str {
    let kind = inherited(doc, dict, b"FT").and_then(|o| o.as_name().ok());
    let flags = field_flags(doc, dict);
    match kind {
        Some(b"Tx") => "text",
        Some(b"Btn") if flags.contains(FieldFlags::PUSHBUTTON) => "push_button",
        Some(b"Btn") if flags.contains(FieldFlags::RADIO) => "radio_button",
        Some(b"Btn") => "checkbox",
        Some(b"Ch") if flags.contains(FieldFlags::COMBO) => "combo_box",
        Some(b"Ch") => "list_box",
        Some(b"Sig") => "signature",
        _ => "unknown",
    }
}

/// Export values from `/Opt` (first element of two-element entries)
pub(crate) fn choice_options(doc: &Document, dict: &Dictionary) -> Vec<String> {
    inherited(doc, dict, b"Opt")
        .and_then(|o| o.as_array().ok())
        .map(|opts| {
            opts.iter()
                .filter_map(|o| match resolve(doc, o) {
                    Object::Array(pair) => pair.first().and_then(|e| object_text(doc, e)),
                    other => object_text(doc, other),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Field value as text; arrays (multi-select lists) are joined with ", "
pub(crate) fn value_text(doc: &Document, dict: &Dictionary) -> Option<String> {
    match inherited(doc, dict, b"V")? {
        Object::Array(items) => Some(
            items
                .iter()
                .filter_map(|i| object_text(doc, i))
                .collect::<Vec<_>>()
                .join(", "),
        ),
        other => object_text(doc, other),
    }
}

/// Read every terminal form field of a PDF
pub fn read_form_fields(data: &[u8]) -> Result<Vec<FormFieldInfo>> {
    let doc = objects::load(data)?;
    Ok(collect_field_info(&doc))
}

pub(crate) fn collect_field_info(doc: &Document) -> Vec<FormFieldInfo> {
    terminal_fields(doc)
        .into_iter()
        .filter_map(|field| {
            let dict = doc.get_dictionary(field.id).ok()?;
            let field_type = classify(doc, dict);
            let flags = field_flags(doc, dict);
            let value = value_text(doc, dict);

            let is_checked = match field_type {
                "checkbox" | "radio_button" => {
                    Some(value.as_deref().is_some_and(|v| !v.is_empty() && v != "Off"))
                }
                _ => None,
            };

            let options = match field_type {
                "combo_box" | "list_box" => Some(choice_options(doc, dict)),
                _ => None,
            };

            let mut export_values: Vec<String> = Vec::new();
            for w in &field.widgets {
                for state in &w.on_states {
                    if !export_values.contains(state) {
                        export_values.push(state.clone());
                    }
                }
            }

            let first = field.widgets.first();
            Some(FormFieldInfo {
                name: field.name.clone(),
                field_type: field_type.to_string(),
                value,
                is_checked,
                is_read_only: flags.contains(FieldFlags::READ_ONLY),
                is_required: flags.contains(FieldFlags::REQUIRED),
                options,
                export_values,
                page: first.and_then(|w| w.page),
                rect: first.and_then(|w| w.rect),
                widget_count: field.widgets.len(),
            })
        })
        .collect()
}

/// Recover a designer schema from an existing AcroForm.
///
/// Each widget becomes one descriptor; radio groups yield one radio button
/// per widget whose first option is the widget's export value. Widgets with
/// no page or rectangle are dropped.
pub fn extract_schema(data: &[u8]) -> Result<FormSchema> {
    let doc = objects::load(data)?;
    let geometries = objects::page_geometries(&doc);
    let mut fields = Vec::new();

    for field in terminal_fields(&doc) {
        let Ok(dict) = doc.get_dictionary(field.id) else {
            continue;
        };
        let Some(field_type) = schema_type(&doc, dict) else {
            continue;
        };
        let flags = field_flags(&doc, dict);
        let value = value_text(&doc, dict);
        let options = if field_type.is_choice() {
            choice_options(&doc, dict)
        } else {
            Vec::new()
        };

        for widget in &field.widgets {
            let (Some(page), Some(rect)) = (widget.page, widget.rect) else {
                continue;
            };
            let Some(geometry) = geometries.get(page as usize) else {
                continue;
            };

            let id = format!("field_{}", fields.len() + 1);
            let mut descriptor =
                FieldDescriptor::new(id, field.name.clone(), field_type, page, geometry.user_to_view(&rect));
            descriptor.required = flags.contains(FieldFlags::REQUIRED);
            descriptor.read_only = flags.contains(FieldFlags::READ_ONLY);

            match field_type {
                FieldType::Radiobutton => {
                    let export = widget.on_states.first().cloned();
                    descriptor.default_value = match (&export, &value) {
                        (Some(e), Some(v)) if e == v => Some(e.clone()),
                        _ => None,
                    };
                    descriptor.options = export.into_iter().collect();
                }
                FieldType::Checkbox => {
                    let checked = value.as_deref().is_some_and(|v| !v.is_empty() && v != "Off");
                    descriptor.default_value = checked.then(|| "true".to_string());
                }
                _ => {
                    descriptor.options = options.clone();
                    descriptor.default_value = value.clone().filter(|v| !v.is_empty());
                }
            }

            if let Ok(widget_dict) = doc.get_dictionary(widget.id) {
                if let Some(da) = inherited(&doc, widget_dict, b"DA").and_then(|o| object_text(&doc, o)) {
                    descriptor.font_size = font_size_from_da(&da);
                }
                let style = AppearanceStyle::from_widget(&doc, widget_dict);
                descriptor.border_color = style.border.map(Rgb::to_hex);
                descriptor.fill_color = style.background.map(Rgb::to_hex);
                if style.text != Rgb::BLACK {
                    descriptor.text_color = Some(style.text.to_hex());
                }
            }

            fields.push(descriptor);
        }
    }

    Ok(FormSchema::new(fields))
}

fn schema_type(doc: &Document, dict: &Dictionary) -> Option<FieldType> {
    Some(match classify(doc, dict) {
        "text" => match format_action(doc, dict).as_deref() {
            Some(js) if js.contains("AFDate") => FieldType::Date,
            Some(js) if js.contains("AFNumber") => FieldType::Number,
            _ if has_dashed_border(doc, dict) => FieldType::Signature,
            _ => FieldType::Text,
        },
        "checkbox" => FieldType::Checkbox,
        "radio_button" => FieldType::Radiobutton,
        "combo_box" => FieldType::Combobox,
        "list_box" => FieldType::Listbox,
        "signature" => FieldType::Signature,
        _ => return None,
    })
}

fn format_action(doc: &Document, dict: &Dictionary) -> Option<String> {
    let aa = dict.get(b"AA").ok().and_then(|a| resolve_dict(doc, a))?;
    let action = aa.get(b"F").ok().and_then(|f| resolve_dict(doc, f))?;
    dict_text(doc, action, b"JS")
}

fn has_dashed_border(doc: &Document, dict: &Dictionary) -> bool {
    dict.get(b"BS")
        .ok()
        .and_then(|bs| resolve_dict(doc, bs))
        .and_then(|bs| bs.get(b"S").ok())
        .and_then(|s| s.as_name().ok())
        == Some(b"D".as_slice())
}

/// Font size from a default appearance string such as `/Helv 10 Tf 0 g`
fn font_size_from_da(da: &str) -> Option<f32> {
    let tokens: Vec<&str> = da.split_whitespace().collect();
    let tf = tokens.iter().position(|t| *t == "Tf")?;
    tokens.get(tf.checked_sub(1)?)?.parse().ok()
}

/// Summarize a PDF: info dictionary, page count and form field counts
pub fn extract_pdf_metadata(data: &[u8]) -> Result<FormMetadata> {
    let doc = objects::load(data)?;
    let info = read_info(&doc);
    let pages = doc.get_pages().len() as u32;

    let mut field_count = FieldCounts::default();
    for field in collect_field_info(&doc) {
        match field.field_type.as_str() {
            "text" => field_count.text += 1,
            "checkbox" => field_count.checkbox += 1,
            "radio_button" => field_count.radio += 1,
            "signature" => field_count.signature += 1,
            "combo_box" | "list_box" => field_count.choice += 1,
            _ => field_count.other += 1,
        }
    }
    let total_fields = field_count.total();

    Ok(FormMetadata {
        info,
        pages,
        has_form: total_fields > 0,
        field_count,
        total_fields,
        extracted_at: chrono::Utc::now().to_rfc3339(),
    })
}

fn read_info(doc: &Document) -> PdfMetadataInfo {
    let Some(info) = doc
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|i| resolve_dict(doc, i))
    else {
        return PdfMetadataInfo::default();
    };

    let get = |key: &[u8]| dict_text(doc, info, key).filter(|s| !s.is_empty());
    PdfMetadataInfo {
        title: get(b"Title"),
        author: get(b"Author"),
        subject: get(b"Subject"),
        keywords: get(b"Keywords"),
        creator: get(b"Creator"),
        producer: get(b"Producer"),
        creation_date: get(b"CreationDate"),
        modification_date: get(b"ModDate"),
    }
}

/// Field type names and counts, as used in structure summaries
pub fn field_type_histogram(fields: &[FormFieldInfo]) -> BTreeMap<String, u32> {
    let mut map = BTreeMap::new();
    for f in fields {
        *map.entry(f.field_type.clone()).or_insert(0) += 1;
    }
    map
}
