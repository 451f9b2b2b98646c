//! Portfolio diagnostics: record and file checks, plus a timed trial fill
//!
//! Diagnostics never fail outright. Every problem found lands in the
//! report's `errors` or `warnings`, so one call shows everything wrong with a
//! portfolio at once.

use crate::form::field::{FieldType, FormSchema};
use crate::form::validate::{validate_portfolio_value, validate_schema};
use crate::pdf::{
    extract_pdf_metadata, extract_schema, fill_surface_pdf, read_form_fields, FieldCounts,
    FillOptions, SkippedField,
};
use crate::portfolio::Portfolio;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Instant;

/// What one base or surface PDF looked like
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileCheck {
    pub valid_pdf: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<u32>,
    pub has_fields: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_counts: Option<FieldCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_fields: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidPosition {
    pub name: String,
    pub x: f64,
    pub y: f64,
}

/// Summary of the field list a portfolio was designed with
#[derive(Debug, Clone, Default, Serialize)]
pub struct FieldChecks {
    pub count: usize,
    pub by_type: BTreeMap<String, usize>,
    pub duplicate_names: Vec<String>,
    pub invalid_positions: Vec<InvalidPosition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioDiagnosis {
    pub timestamp: DateTime<Utc>,
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub info: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_file: Option<FileCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surface_file: Option<FileCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_checks: Option<FieldChecks>,
}

impl PortfolioDiagnosis {
    fn new() -> Self {
        Self {
            timestamp: Utc::now(),
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            info: Vec::new(),
            base_file: None,
            surface_file: None,
            field_checks: None,
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(message.into());
    }
}

/// Diagnose a portfolio record as posted by a client, together with the
/// base and surface PDFs it points at when they are available
pub fn diagnose_portfolio(
    record: &Value,
    base: Option<&[u8]>,
    surface: Option<&[u8]>,
) -> PortfolioDiagnosis {
    let mut diagnosis = PortfolioDiagnosis::new();
    for message in validate_portfolio_value(record).messages() {
        diagnosis.error(message);
    }

    let fields = record.get("fields").and_then(Value::as_array);
    run_checks(&mut diagnosis, fields.map(Vec::as_slice), base, surface);
    diagnosis
}

/// Diagnose a registered portfolio against the documents it owns
pub fn diagnose_registered(portfolio: &Portfolio) -> PortfolioDiagnosis {
    let mut diagnosis = PortfolioDiagnosis::new();
    for message in validate_schema(&portfolio.schema, None).messages() {
        diagnosis.error(message);
    }

    let fields = schema_fields(&portfolio.schema);
    run_checks(
        &mut diagnosis,
        Some(fields.as_slice()),
        Some(portfolio.base_pdf.as_slice()),
        Some(portfolio.surface_pdf.as_slice()),
    );
    diagnosis
}

fn schema_fields(schema: &FormSchema) -> Vec<Value> {
    match serde_json::to_value(schema) {
        Ok(Value::Object(mut obj)) => match obj.remove("fields") {
            Some(Value::Array(fields)) => fields,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn run_checks(
    diagnosis: &mut PortfolioDiagnosis,
    fields: Option<&[Value]>,
    base: Option<&[u8]>,
    surface: Option<&[u8]>,
) {
    if let Some(data) = base {
        let check = check_file(data);
        match (&check.error, check.has_fields) {
            (Some(e), _) => diagnosis.error(format!("Base file is not a valid PDF: {}", e)),
            (None, true) => diagnosis
                .warnings
                .push("Base PDF already contains form fields".to_string()),
            (None, false) => {}
        }
        diagnosis.base_file = Some(check);
    }

    if let Some(data) = surface {
        let check = check_file(data);
        if let Some(e) = &check.error {
            diagnosis.error(format!("Surface file is not a valid PDF: {}", e));
        } else if !check.has_fields {
            diagnosis.error("Surface PDF has no form fields");
        } else if let (Some(fields), Some(found)) = (fields, check.total_fields) {
            let expected = expected_form_fields(fields);
            if expected != found as usize {
                diagnosis.warnings.push(format!(
                    "Field count mismatch: Expected {}, found {}",
                    expected, found
                ));
            }
        }
        diagnosis.surface_file = Some(check);
    }

    if let Some(fields) = fields {
        let checks = check_fields(fields);
        for p in &checks.invalid_positions {
            diagnosis.warnings.push(format!(
                "Field '{}' has invalid position: ({}, {})",
                p.name, p.x, p.y
            ));
        }
        if !checks.duplicate_names.is_empty() {
            diagnosis.warnings.push(format!(
                "Found {} duplicate field names",
                checks.duplicate_names.len()
            ));
        }
        diagnosis.info.push(format!("{} fields in the design", checks.count));
        diagnosis.field_checks = Some(checks);
    }

    tracing::debug!(
        valid = diagnosis.valid,
        errors = diagnosis.errors.len(),
        warnings = diagnosis.warnings.len(),
        "portfolio diagnosed"
    );
}

fn check_file(data: &[u8]) -> FileCheck {
    match extract_pdf_metadata(data) {
        Ok(meta) => FileCheck {
            valid_pdf: true,
            pages: Some(meta.pages),
            has_fields: meta.total_fields > 0,
            total_fields: (meta.total_fields > 0).then_some(meta.total_fields),
            field_counts: (meta.total_fields > 0).then_some(meta.field_count),
            error: None,
        },
        Err(e) => FileCheck {
            error: Some(e.to_string()),
            ..FileCheck::default()
        },
    }
}

fn is_radio(field: &Value) -> bool {
    field
        .get("type")
        .and_then(Value::as_str)
        .and_then(FieldType::parse)
        == Some(FieldType::Radiobutton)
}

/// AcroForm fields a design produces: one per field, one per radio group
fn expected_form_fields(fields: &[Value]) -> usize {
    let mut radio_groups = HashSet::new();
    let mut count = 0;
    for field in fields {
        if is_radio(field) {
            let name = field.get("name").and_then(Value::as_str).unwrap_or_default();
            if radio_groups.insert(name) {
                count += 1;
            }
        } else {
            count += 1;
        }
    }
    count
}

/// Tolerant pass over raw field JSON; works on records that fail validation
fn check_fields(fields: &[Value]) -> FieldChecks {
    let mut checks = FieldChecks {
        count: fields.len(),
        ..FieldChecks::default()
    };
    let mut seen: HashSet<(&str, bool)> = HashSet::new();
    let mut seen_names: HashSet<&str> = HashSet::new();
    let mut duplicates = BTreeSet::new();

    for field in fields {
        let field_type = field
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        *checks.by_type.entry(field_type).or_insert(0) += 1;

        let name = field.get("name").and_then(Value::as_str).unwrap_or_default();
        let radio = is_radio(field);
        // Radio buttons of one group share their name
        let repeat_of_group = radio && seen.contains(&(name, true));
        if !repeat_of_group && !seen_names.insert(name) {
            duplicates.insert(name.to_string());
        }
        seen.insert((name, radio));

        let coord = |key: &str| field.get(key).and_then(Value::as_f64).unwrap_or(0.0);
        let (x, y) = (coord("x"), coord("y"));
        if x < 0.0 || y < 0.0 {
            checks.invalid_positions.push(InvalidPosition {
                name: name.to_string(),
                x,
                y,
            });
        }
    }

    checks.duplicate_names = duplicates.into_iter().collect();
    checks
}

/// Outcome of filling a surface PDF with sample values
#[derive(Debug, Clone, Serialize)]
pub struct FillTrial {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub info: Vec<String>,
    /// Values written, keyed by field name
    pub values: Map<String, Value>,
    pub fields_attempted: usize,
    pub fields_filled: usize,
    pub fields_skipped: Vec<SkippedField>,
    pub fill_time_ms: f64,
    pub fields_per_second: f64,
    #[serde(skip)]
    pub filled: Option<Vec<u8>>,
}

impl FillTrial {
    fn failed(message: String) -> Self {
        Self {
            timestamp: Utc::now(),
            success: false,
            errors: vec![message],
            warnings: Vec::new(),
            info: Vec::new(),
            values: Map::new(),
            fields_attempted: 0,
            fields_filled: 0,
            fields_skipped: Vec::new(),
            fill_time_ms: 0.0,
            fields_per_second: 0.0,
            filled: None,
        }
    }
}

/// Fill `surface` with `values`, or with a generated value for every
/// fillable field, then read the result back and count what stuck
pub fn trial_fill(surface: &[u8], values: Option<&Map<String, Value>>) -> FillTrial {
    let values = match values {
        Some(v) if !v.is_empty() => v.clone(),
        _ => match sample_values(surface) {
            Ok(v) if v.is_empty() => {
                return FillTrial::failed("No form fields found in the PDF".to_string())
            }
            Ok(v) => v,
            Err(e) => return FillTrial::failed(format!("Error reading form fields: {}", e)),
        },
    };

    let started = Instant::now();
    let (filled, report) = match fill_surface_pdf(surface, &values, &FillOptions::default()) {
        Ok(result) => result,
        Err(e) => return FillTrial::failed(format!("Error testing form filling: {}", e)),
    };
    let elapsed = started.elapsed().as_secs_f64();

    let read_back = match read_form_fields(&filled) {
        Ok(fields) => fields,
        Err(e) => return FillTrial::failed(format!("Error reading filled form: {}", e)),
    };
    let fields_filled = read_back
        .iter()
        .filter(|f| values.contains_key(&f.name))
        .filter(|f| {
            f.is_checked == Some(true)
                || f.value.as_deref().is_some_and(|v| !v.is_empty() && v != "Off")
        })
        .count();

    let attempted = values.len();
    let mut warnings = Vec::new();
    if fields_filled < attempted {
        warnings.push(format!(
            "Not all fields were filled: {}/{}",
            fields_filled, attempted
        ));
    }

    tracing::debug!(attempted, filled = fields_filled, elapsed_s = elapsed, "trial fill finished");
    FillTrial {
        timestamp: Utc::now(),
        success: true,
        errors: Vec::new(),
        warnings,
        info: vec![format!("Filled {} out of {} fields", fields_filled, attempted)],
        values,
        fields_attempted: attempted,
        fields_filled,
        fields_skipped: report.fields_skipped,
        fill_time_ms: elapsed * 1000.0,
        fields_per_second: if elapsed > 0.0 {
            attempted as f64 / elapsed
        } else {
            0.0
        },
        filled: Some(filled),
    }
}

/// One plausible value per writable field, chosen by field type.
/// Signature overlays are left for signing.
fn sample_values(surface: &[u8]) -> crate::error::Result<Map<String, Value>> {
    let schema = extract_schema(surface)?;
    let read_only: HashSet<&str> = schema
        .fields
        .iter()
        .filter(|f| f.read_only)
        .map(|f| f.name.as_str())
        .collect();

    let mut values = Map::new();
    for field in &schema.fields {
        if values.contains_key(&field.name) || read_only.contains(field.name.as_str()) {
            continue;
        }
        let value = match field.field_type {
            FieldType::Text => json!(format!("Test value for {}", field.name)),
            FieldType::Number => json!(42),
            FieldType::Date => json!(Utc::now().format("%Y-%m-%d").to_string()),
            FieldType::Checkbox => json!(true),
            FieldType::Radiobutton | FieldType::Combobox | FieldType::Listbox => {
                match field.options.first() {
                    Some(option) => json!(option),
                    None => continue,
                }
            }
            FieldType::Signature => continue,
        };
        values.insert(field.name.clone(), value);
    }
    Ok(values)
}
