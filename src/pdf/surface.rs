//! Surface PDF generation: inject a designed schema into a base PDF as an
//! AcroForm

use crate::error::Result;
use crate::form::field::{FieldDescriptor, FieldType, FormSchema};
use crate::form::geometry::Rect;
use crate::form::validate::parse_checked;
use crate::pdf::appearance::{add_form_xobject, display_size, AppearanceStyle, FONT_NAME};
use crate::pdf::inspect::terminal_fields;
use crate::pdf::objects::{
    self, catalog_id, name_object, push_annotation, real, rect_to_object, rgb_to_object,
    text_string, FieldFlags,
};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Knobs for surface generation
#[derive(Debug, Clone)]
pub struct SurfaceOptions {
    /// Widget border width in points
    pub border_width: f32,
    /// Ask viewers to regenerate appearances
    pub need_appearances: bool,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            border_width: 1.0,
            need_appearances: true,
        }
    }
}

/// A field that was not written, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedField {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SurfaceReport {
    /// Terminal fields added to `/AcroForm /Fields` (a radio group counts once)
    pub fields_added: u32,
    /// Widget annotations added to pages
    pub widgets_added: u32,
    pub fields_skipped: Vec<SkippedField>,
    pub page_count: u32,
}

/// Handles into the document's AcroForm, prepared before fields are added
struct AcroForm {
    id: ObjectId,
    font: ObjectId,
    fields: Vec<Object>,
}

/// A radio group collected across the schema
struct RadioGroup {
    parent: ObjectId,
    kids: Vec<Object>,
    flags: FieldFlags,
    selected: Option<String>,
}

/// Build a surface PDF from `base` with every field of `schema` added as an
/// interactive widget
pub fn create_surface_pdf(
    base: &[u8],
    schema: &FormSchema,
    options: &SurfaceOptions,
) -> Result<(Vec<u8>, SurfaceReport)> {
    let mut doc = objects::load(base)?;
    let geometries = objects::page_geometries(&doc);
    let page_ids = objects::page_ids(&doc);

    let existing: HashSet<String> = terminal_fields(&doc).into_iter().map(|f| f.name).collect();
    let mut acroform = prepare_acroform(&mut doc, options)?;

    let mut report = SurfaceReport {
        page_count: page_ids.len() as u32,
        ..Default::default()
    };
    let mut added_names: HashSet<&str> = HashSet::new();
    let mut radio_groups: BTreeMap<&str, RadioGroup> = BTreeMap::new();

    for field in &schema.fields {
        let name = field.name.trim();
        let skip = |reason: String| SkippedField {
            name: field.name.clone(),
            reason,
        };

        if name.is_empty() {
            report.fields_skipped.push(skip("Field has no name".to_string()));
            continue;
        }
        if existing.contains(name) {
            report
                .fields_skipped
                .push(skip("A field with this name already exists in the base PDF".to_string()));
            continue;
        }
        let is_radio = field.field_type == FieldType::Radiobutton;
        if added_names.contains(name) {
            // Radio widgets may repeat their group name, nothing else may
            if !is_radio {
                report.fields_skipped.push(skip("Duplicate field name".to_string()));
                continue;
            }
            if !radio_groups.contains_key(name) {
                report.fields_skipped.push(skip(
                    "Field name is already used by a non-radio field".to_string(),
                ));
                continue;
            }
        }
        let (Some(geometry), Some(&page_id)) = (
            geometries.get(field.page as usize),
            page_ids.get(field.page as usize),
        ) else {
            report.fields_skipped.push(skip(format!(
                "Page {} does not exist (document has {} pages)",
                field.page,
                page_ids.len()
            )));
            continue;
        };
        let rect = field.rect();
        if !rect.is_finite() || rect.width <= 0.0 || rect.height <= 0.0 {
            report
                .fields_skipped
                .push(skip("Field has an empty or invalid rectangle".to_string()));
            continue;
        }

        let user_rect = geometry.view_to_user(&rect);
        let style = AppearanceStyle::for_field(field, options.border_width);
        let mut widget = widget_dict(field, &style, &user_rect, page_id, geometry.rotation);
        let (w, h) = display_size(user_rect.width, user_rect.height, geometry.rotation);

        if is_radio {
            let group = radio_groups.entry(name).or_insert_with(|| {
                let parent = doc.new_object_id();
                acroform.fields.push(Object::Reference(parent));
                report.fields_added += 1;
                RadioGroup {
                    parent,
                    kids: Vec::new(),
                    flags: FieldFlags::empty(),
                    selected: None,
                }
            });

            let export = field.export_value().to_string();
            let on = add_form_xobject(&mut doc, style.radio_on(w, h), w, h, geometry.rotation, None);
            let off = add_form_xobject(&mut doc, style.radio_off(w, h), w, h, geometry.rotation, None);
            widget.set(
                "AP",
                dictionary! {
                    "N" => dictionary! {
                        export.as_str() => Object::Reference(on),
                        "Off" => Object::Reference(off),
                    },
                },
            );

            let selected = field
                .default_value
                .as_deref()
                .is_some_and(|v| v == export || parse_checked(v) == Some(true));
            if selected && group.selected.is_none() {
                group.selected = Some(export.clone());
                widget.set("AS", name_object(&export));
            } else {
                widget.set("AS", "Off");
            }
            widget.set("Parent", Object::Reference(group.parent));
            group.flags |= member_flags(field);

            let widget_id = doc.add_object(widget);
            group.kids.push(Object::Reference(widget_id));
            push_annotation(&mut doc, page_id, widget_id)?;
        } else {
            widget.set("T", text_string(name));
            widget.set("FT", field.field_type.acroform_kind());
            let flags = member_flags(field) | kind_flags(field.field_type);
            if !flags.is_empty() {
                widget.set("Ff", flags.bits() as i64);
            }
            apply_value(&mut doc, &mut widget, field, &style, w, h, geometry.rotation, acroform.font);

            let widget_id = doc.add_object(widget);
            acroform.fields.push(Object::Reference(widget_id));
            push_annotation(&mut doc, page_id, widget_id)?;
            report.fields_added += 1;
        }

        added_names.insert(name);
        report.widgets_added += 1;
    }

    for (name, group) in radio_groups {
        let mut parent = dictionary! {
            "FT" => "Btn",
            "T" => text_string(name),
            "Ff" => (group.flags | kind_flags(FieldType::Radiobutton)).bits() as i64,
            "Kids" => group.kids,
        };
        let value = group.selected.as_deref().map(name_object).unwrap_or_else(|| "Off".into());
        parent.set("V", value.clone());
        parent.set("DV", value);
        doc.objects.insert(group.parent, Object::Dictionary(parent));
    }

    doc.get_dictionary_mut(acroform.id)?
        .set("Fields", Object::Array(acroform.fields));

    tracing::debug!(
        fields = report.fields_added,
        widgets = report.widgets_added,
        skipped = report.fields_skipped.len(),
        "surface fields injected"
    );

    let bytes = objects::save(&mut doc)?;
    Ok((bytes, report))
}

fn member_flags(field: &FieldDescriptor) -> FieldFlags {
    let mut flags = FieldFlags::empty();
    flags.set(FieldFlags::READ_ONLY, field.read_only);
    flags.set(FieldFlags::REQUIRED, field.required);
    flags
}

fn kind_flags(field_type: FieldType) -> FieldFlags {
    match field_type {
        FieldType::Radiobutton => FieldFlags::RADIO | FieldFlags::NO_TOGGLE_TO_OFF,
        FieldType::Combobox => FieldFlags::COMBO,
        _ => FieldFlags::empty(),
    }
}

/// Widget annotation entries shared by every field kind
fn widget_dict(
    field: &FieldDescriptor,
    style: &AppearanceStyle,
    user_rect: &Rect,
    page_id: ObjectId,
    rotation: u16,
) -> Dictionary {
    let mut mk = Dictionary::new();
    if let Some(border) = style.border {
        mk.set("BC", rgb_to_object(border));
    }
    if let Some(background) = style.background {
        mk.set("BG", rgb_to_object(background));
    }
    if rotation != 0 {
        mk.set("R", rotation as i64);
    }

    let mut bs = dictionary! {
        "W" => real(style.border_width),
        "S" => if style.dashed { "D" } else { "S" },
    };
    if style.dashed {
        bs.set("D", vec![Object::Integer(3)]);
    }

    let mut widget = dictionary! {
        "Type" => "Annot",
        "Subtype" => "Widget",
        "Rect" => rect_to_object(user_rect),
        "F" => 4,
        "P" => Object::Reference(page_id),
        "MK" => mk,
        "BS" => bs,
    };
    if field.field_type != FieldType::Radiobutton {
        widget.set("DA", text_string(&style.default_appearance()));
    }
    widget
}

/// Default value, options, actions and appearance for non-radio fields
#[allow(clippy::too_many_arguments)]
fn apply_value(
    doc: &mut Document,
    widget: &mut Dictionary,
    field: &FieldDescriptor,
    style: &AppearanceStyle,
    w: f32,
    h: f32,
    rotation: u16,
    font: ObjectId,
) {
    let default = field.default_value.as_deref().filter(|v| !v.is_empty());

    match field.field_type {
        FieldType::Checkbox => {
            let checked = default.and_then(parse_checked).unwrap_or(false);
            let on = add_form_xobject(doc, style.checkbox_on(w, h), w, h, rotation, None);
            let off = add_form_xobject(doc, style.checkbox_off(w, h), w, h, rotation, None);
            widget.set(
                "AP",
                dictionary! {
                    "N" => dictionary! {
                        "Yes" => Object::Reference(on),
                        "Off" => Object::Reference(off),
                    },
                },
            );
            let state = if checked { "Yes" } else { "Off" };
            widget.set("V", state);
            widget.set("DV", state);
            widget.set("AS", state);
        }
        FieldType::Combobox | FieldType::Listbox => {
            let options: Vec<Object> = field.options.iter().map(|o| text_string(o)).collect();
            widget.set("Opt", options);
            if let Some(value) = default {
                widget.set("V", text_string(value));
                widget.set("DV", text_string(value));
            }
            let content = if field.field_type == FieldType::Listbox {
                let selected: Vec<String> = default.map(str::to_string).into_iter().collect();
                style.list(w, h, &field.options, &selected)
            } else {
                style.text(w, h, default.unwrap_or(""))
            };
            let ap = add_form_xobject(doc, content, w, h, rotation, Some(font));
            widget.set("AP", dictionary! { "N" => Object::Reference(ap) });
        }
        FieldType::Text | FieldType::Signature | FieldType::Date | FieldType::Number => {
            if let Some(value) = default {
                widget.set("V", text_string(value));
                widget.set("DV", text_string(value));
            }
            if let Some(actions) = format_actions(field.field_type) {
                widget.set("AA", actions);
            }
            let ap = add_form_xobject(doc, style.text(w, h, default.unwrap_or("")), w, h, rotation, Some(font));
            widget.set("AP", dictionary! { "N" => Object::Reference(ap) });
        }
        FieldType::Radiobutton => {}
    }
}

/// Keystroke and format actions for number and date fields
fn format_actions(field_type: FieldType) -> Option<Dictionary> {
    let (keystroke, format) = match field_type {
        FieldType::Number => (
            "AFNumber_Keystroke(2, 0, 0, 0, \"\", true);",
            "AFNumber_Format(2, 0, 0, 0, \"\", true);",
        ),
        FieldType::Date => (
            "AFDate_KeystrokeEx(\"yyyy-mm-dd\");",
            "AFDate_FormatEx(\"yyyy-mm-dd\");",
        ),
        _ => return None,
    };
    let js = |code: &str| {
        dictionary! {
            "S" => "JavaScript",
            "JS" => text_string(code),
        }
    };
    Some(dictionary! {
        "K" => js(keystroke),
        "F" => js(format),
    })
}

/// Make the catalog's `/AcroForm` an indirect dictionary with Helvetica in
/// `/DR`, and collect its current `/Fields`
fn prepare_acroform(doc: &mut Document, options: &SurfaceOptions) -> Result<AcroForm> {
    let catalog = catalog_id(doc)?;
    let current = doc.get_dictionary(catalog)?.get(b"AcroForm").ok().cloned();
    let id = match current {
        Some(Object::Reference(id)) if doc.get_dictionary(id).is_ok() => id,
        Some(Object::Dictionary(dict)) => doc.add_object(dict),
        _ => doc.add_object(Dictionary::new()),
    };
    doc.get_dictionary_mut(catalog)?
        .set("AcroForm", Object::Reference(id));

    let acro = doc.get_dictionary(id)?.clone();

    let fields = acro
        .get(b"Fields")
        .ok()
        .and_then(|f| objects::resolve_array(doc, f))
        .cloned()
        .unwrap_or_default();

    let mut resources = acro
        .get(b"DR")
        .ok()
        .and_then(|d| objects::resolve_dict(doc, d))
        .cloned()
        .unwrap_or_default();
    let mut fonts = resources
        .get(b"Font")
        .ok()
        .and_then(|f| objects::resolve_dict(doc, f))
        .cloned()
        .unwrap_or_default();

    let existing_font = fonts.get(FONT_NAME.as_bytes()).ok().cloned();
    let font = match existing_font {
        Some(Object::Reference(font_id)) => font_id,
        Some(Object::Dictionary(font)) => doc.add_object(font),
        _ => doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        }),
    };
    fonts.set(FONT_NAME, Object::Reference(font));
    resources.set("Font", fonts);

    let acro = doc.get_dictionary_mut(id)?;
    acro.set("DR", resources);
    if !acro.has(b"DA") {
        acro.set("DA", text_string(&format!("/{} 0 Tf 0 g", FONT_NAME)));
    }
    if options.need_appearances {
        acro.set("NeedAppearances", true);
    }

    Ok(AcroForm { id, font, fields })
}
