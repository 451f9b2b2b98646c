//! Field descriptors and the persisted form schema

use crate::error::{Error, Result};
use crate::form::geometry::{Point, Rect};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Kind of form field a descriptor places on the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Checkbox,
    Signature,
    Date,
    Number,
    #[serde(alias = "radio")]
    Radiobutton,
    Combobox,
    Listbox,
}

impl FieldType {
    pub const ALL: [FieldType; 8] = [
        FieldType::Text,
        FieldType::Checkbox,
        FieldType::Signature,
        FieldType::Date,
        FieldType::Number,
        FieldType::Radiobutton,
        FieldType::Combobox,
        FieldType::Listbox,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Checkbox => "checkbox",
            FieldType::Signature => "signature",
            FieldType::Date => "date",
            FieldType::Number => "number",
            FieldType::Radiobutton => "radiobutton",
            FieldType::Combobox => "combobox",
            FieldType::Listbox => "listbox",
        }
    }

    /// Parse a type name as it appears in schema JSON
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "radio" => Some(FieldType::Radiobutton),
            _ => Self::ALL.iter().copied().find(|t| t.as_str() == s),
        }
    }

    /// Value of the AcroForm `/FT` entry
    pub fn acroform_kind(&self) -> &'static str {
        match self {
            FieldType::Text
            | FieldType::Signature
            | FieldType::Date
            | FieldType::Number => "Tx",
            FieldType::Checkbox | FieldType::Radiobutton => "Btn",
            FieldType::Combobox | FieldType::Listbox => "Ch",
        }
    }

    /// Size given to a freshly placed field, in unscaled points
    pub fn default_size(&self) -> (f32, f32) {
        match self {
            FieldType::Signature => (200.0, 50.0),
            FieldType::Checkbox | FieldType::Radiobutton => (20.0, 20.0),
            _ => (100.0, 20.0),
        }
    }

    pub fn is_choice(&self) -> bool {
        matches!(self, FieldType::Combobox | FieldType::Listbox)
    }

    pub fn is_button(&self) -> bool {
        matches!(self, FieldType::Checkbox | FieldType::Radiobutton)
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One field overlaid on a page.
///
/// `x`/`y`/`width`/`height` are unscaled page points with a top-left origin
/// on the page as displayed (see [`crate::form::geometry`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldDescriptor {
    /// Assigned by [`FormSchema::assign_missing_ids`] when left out
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// 0-based page index
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
}

impl FieldDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        field_type: FieldType,
        page: u32,
        rect: Rect,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            field_type,
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            page,
            required: false,
            read_only: false,
            default_value: None,
            options: Vec::new(),
            font_size: None,
            border_color: None,
            fill_color: None,
            text_color: None,
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    pub fn set_rect(&mut self, rect: Rect) {
        self.x = rect.x;
        self.y = rect.y;
        self.width = rect.width;
        self.height = rect.height;
    }

    pub fn contains(&self, p: Point) -> bool {
        self.rect().contains(p)
    }

    /// On-state of a radio button within its group
    pub fn export_value(&self) -> &str {
        self.options.first().map(String::as_str).unwrap_or(&self.id)
    }

    pub fn font_size_or_default(&self) -> f32 {
        match self.font_size {
            Some(size) if size.is_finite() && size >= 0.0 => size,
            _ => 10.0,
        }
    }
}

/// The persisted design of one document: every field on every page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FormSchema {
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
}

impl FormSchema {
    pub fn new(fields: Vec<FieldDescriptor>) -> Self {
        Self { fields }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let mut schema: Self = serde_json::from_str(json).map_err(|e| Error::InvalidSchema {
            reason: e.to_string(),
        })?;
        schema.assign_missing_ids();
        Ok(schema)
    }

    /// Stored schemas that no longer parse load as an empty design
    pub fn from_json_lenient(json: &str) -> Self {
        match Self::from_json(json) {
            Ok(schema) => schema,
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable form schema");
                Self::default()
            }
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Give every field without an id a fresh `field_N` id
    pub fn assign_missing_ids(&mut self) {
        let taken: HashSet<String> = self
            .fields
            .iter()
            .filter(|f| !f.id.is_empty())
            .map(|f| f.id.clone())
            .collect();
        let mut n = 0;
        for field in self.fields.iter_mut().filter(|f| f.id.is_empty()) {
            field.id = loop {
                n += 1;
                let candidate = format!("field_{}", n);
                if !taken.contains(&candidate) {
                    break candidate;
                }
            };
        }
    }

    pub fn field(&self, id: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Fields on one page in z-order (bottom first)
    pub fn fields_on_page(&self, page: u32) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(move |f| f.page == page)
    }

    /// Radio buttons grouped by field name, in schema order
    pub fn radio_groups(&self) -> BTreeMap<&str, Vec<&FieldDescriptor>> {
        let mut groups: BTreeMap<&str, Vec<&FieldDescriptor>> = BTreeMap::new();
        for field in &self.fields {
            if field.field_type == FieldType::Radiobutton {
                groups.entry(field.name.as_str()).or_default().push(field);
            }
        }
        groups
    }

    pub fn page_count_hint(&self) -> u32 {
        self.fields.iter().map(|f| f.page + 1).max().unwrap_or(0)
    }
}

/// An RGB color with components in `0.0..=1.0`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb(pub f32, pub f32, pub f32);

impl Rgb {
    pub const BLACK: Rgb = Rgb(0.0, 0.0, 0.0);
    pub const WHITE: Rgb = Rgb(1.0, 1.0, 1.0);

    /// Parse `#rrggbb`, `rrggbb`, `#rgb` or a basic color name
    pub fn parse(color: &str) -> Option<Self> {
        let color = color.trim();
        let named = match color.to_ascii_lowercase().as_str() {
            "black" => Some(Self::BLACK),
            "white" => Some(Self::WHITE),
            "red" => Some(Rgb(1.0, 0.0, 0.0)),
            "green" => Some(Rgb(0.0, 0.5, 0.0)),
            "blue" => Some(Rgb(0.0, 0.0, 1.0)),
            "gray" | "grey" => Some(Rgb(0.5, 0.5, 0.5)),
            "yellow" => Some(Rgb(1.0, 1.0, 0.0)),
            _ => None,
        };
        if named.is_some() {
            return named;
        }

        let hex = color.trim_start_matches('#');
        if !hex.is_ascii() {
            return None;
        }
        let channel = |s: &str| u8::from_str_radix(s, 16).ok().map(|v| v as f32 / 255.0);
        match hex.len() {
            6 => Some(Rgb(
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
            )),
            3 => {
                let expand = |i: usize| channel(&hex[i..i + 1].repeat(2));
                Some(Rgb(expand(0)?, expand(1)?, expand(2)?))
            }
            _ => None,
        }
    }

    pub fn parse_or(color: Option<&str>, fallback: Rgb) -> Rgb {
        color.and_then(Rgb::parse).unwrap_or(fallback)
    }

    /// Components as 8-bit channels
    pub fn to_bytes(self) -> [u8; 3] {
        let c = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        [c(self.0), c(self.1), c(self.2)]
    }

    /// `#rrggbb`, the form [`Rgb::parse`] reads back
    pub fn to_hex(self) -> String {
        let [r, g, b] = self.to_bytes();
        format!("#{:02x}{:02x}{:02x}", r, g, b)
    }
}
