//! Schema and portfolio validation
//!
//! Validation runs in two passes. The structural pass walks raw JSON so that
//! a designer posting a half-built schema gets one message per problem rather
//! than the first serde error. The semantic pass runs on the typed schema.

use crate::form::field::{FieldType, FormSchema};
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// One validation problem
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct ValidationIssue {
    /// Index of the offending field in `fields`, if the issue is field-level
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// Name of the offending field, when it has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

/// Outcome of validating a schema or portfolio
#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn messages(&self) -> Vec<String> {
        self.issues.iter().map(|i| i.message.clone()).collect()
    }

    fn general(&mut self, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            index: None,
            field: None,
            message: message.into(),
        });
    }

    fn at(&mut self, index: usize, field: Option<&str>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            index: Some(index),
            field: field.map(str::to_string),
            message: message.into(),
        });
    }
}

const COORDINATES: [&str; 4] = ["x", "y", "width", "height"];

/// Validate schema JSON as posted by a designer
pub fn validate_schema_value(value: &Value, page_count: Option<u32>) -> ValidationReport {
    let mut report = ValidationReport::default();

    let Some(obj) = value.as_object() else {
        report.general("schema must be an object");
        return report;
    };

    match obj.get("fields") {
        None => {}
        Some(fields) => check_fields_structure(fields, &mut report),
    }

    if report.is_valid() {
        check_typed(value, page_count, &mut report);
    }
    report
}

/// Semantic pass over JSON that already passed the structural checks
fn check_typed(value: &Value, page_count: Option<u32>, report: &mut ValidationReport) {
    match serde_json::from_value::<FormSchema>(value.clone()) {
        Ok(mut schema) => {
            schema.assign_missing_ids();
            report.issues.extend(validate_schema(&schema, page_count).issues);
        }
        Err(e) => report.general(format!("schema could not be read: {}", e)),
    }
}

fn check_fields_structure(fields: &Value, report: &mut ValidationReport) {
    let Some(list) = fields.as_array() else {
        report.general("fields must be a list");
        return;
    };

    for (i, field) in list.iter().enumerate() {
        let Some(obj) = field.as_object() else {
            report.at(i, None, format!("Field at index {} must be an object", i));
            continue;
        };

        let name = obj.get("name").and_then(Value::as_str);
        let label = name
            .map(|n| format!("'{}'", n))
            .unwrap_or_else(|| format!("at index {}", i));

        if obj.get("name").is_none() {
            report.at(i, None, format!("Field at index {} missing required property: name", i));
        } else if name.is_none() {
            report.at(i, None, format!("Field at index {} name must be a string", i));
        }

        if obj.get("id").is_some_and(|id| !id.is_string()) {
            report.at(i, name, format!("Field {} id must be a string", label));
        }

        match obj.get("type") {
            None => report.at(
                i,
                name,
                format!("Field at index {} missing required property: type", i),
            ),
            Some(t) => {
                let known = t.as_str().and_then(FieldType::parse).is_some();
                if !known {
                    let shown = t.as_str().map(str::to_string).unwrap_or_else(|| t.to_string());
                    report.at(
                        i,
                        name,
                        format!("Field at index {} has invalid type: {}", i, shown),
                    );
                }
            }
        }

        for coord in COORDINATES {
            match obj.get(coord) {
                None => report.at(
                    i,
                    name,
                    format!("Field {} missing required property: {}", label, coord),
                ),
                Some(v) if !v.is_number() => report.at(
                    i,
                    name,
                    format!("Field {} {} must be a number", label, coord),
                ),
                _ => {}
            }
        }

        match obj.get("page") {
            None => report.at(
                i,
                name,
                format!("Field {} missing required property: page", label),
            ),
            Some(p) if p.as_u64().map_or(true, |p| p > u32::MAX as u64) => report.at(
                i,
                name,
                format!("Field {} page must be a non-negative integer", label),
            ),
            _ => {}
        }

        if let Some(options) = obj.get("options") {
            let ok = options
                .as_array()
                .map(|a| a.iter().all(Value::is_string))
                .unwrap_or(false);
            if !ok {
                report.at(
                    i,
                    name,
                    format!("Field {} options must be a list of strings", label),
                );
            }
        }
    }
}

/// Semantic checks on a typed schema
pub fn validate_schema(schema: &FormSchema, page_count: Option<u32>) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut ids = HashSet::new();
    let mut names: HashMap<&str, FieldType> = HashMap::new();

    for (i, field) in schema.fields.iter().enumerate() {
        let name = Some(field.name.as_str());

        if field.name.trim().is_empty() {
            report.at(i, None, format!("Field at index {} has an empty name", i));
        }
        if field.id.is_empty() {
            report.at(i, name, format!("Field '{}' has an empty id", field.name));
        } else if !ids.insert(field.id.as_str()) {
            report.at(i, name, format!("Duplicate field id: {}", field.id));
        }

        match names.get(field.name.as_str()) {
            Some(FieldType::Radiobutton) if field.field_type == FieldType::Radiobutton => {}
            Some(_) if !field.name.trim().is_empty() => {
                report.at(i, name, format!("Duplicate field name: {}", field.name));
            }
            _ => {
                names.insert(field.name.as_str(), field.field_type);
            }
        }

        let rect = field.rect();
        if !rect.is_finite() {
            report.at(i, name, format!("Field '{}' has non-finite coordinates", field.name));
        } else {
            if field.width <= 0.0 || field.height <= 0.0 {
                report.at(
                    i,
                    name,
                    format!("Field '{}' must have a positive width and height", field.name),
                );
            }
            if field.x < 0.0 || field.y < 0.0 {
                report.at(
                    i,
                    name,
                    format!("Field '{}' must not start before the page origin", field.name),
                );
            }
        }

        if let Some(total) = page_count {
            if field.page >= total {
                report.at(
                    i,
                    name,
                    format!(
                        "Field '{}' is on page index {} but the document has {} page(s)",
                        field.name, field.page, total
                    ),
                );
            }
        }

        if let Some(size) = field.font_size {
            if !size.is_finite() || size < 0.0 {
                report.at(i, name, format!("Field '{}' font_size must be >= 0", field.name));
            }
        }

        check_default_value(i, field, &mut report);
    }

    report
}

fn check_default_value(
    i: usize,
    field: &crate::form::field::FieldDescriptor,
    report: &mut ValidationReport,
) {
    let name = Some(field.name.as_str());

    if field.field_type.is_choice() && field.options.is_empty() {
        report.at(
            i,
            name,
            format!("Field '{}' ({}) needs at least one option", field.name, field.field_type),
        );
    }

    let Some(default) = field.default_value.as_deref() else {
        return;
    };
    if default.is_empty() {
        return;
    }

    match field.field_type {
        FieldType::Combobox | FieldType::Listbox => {
            if !field.options.iter().any(|o| o == default) {
                report.at(
                    i,
                    name,
                    format!("Field '{}' default value is not one of its options", field.name),
                );
            }
        }
        FieldType::Checkbox => {
            if parse_checked(default).is_none() {
                report.at(
                    i,
                    name,
                    format!("Field '{}' default value must be true or false", field.name),
                );
            }
        }
        FieldType::Number => {
            if default.trim().parse::<f64>().is_err() {
                report.at(
                    i,
                    name,
                    format!("Field '{}' default value must be a number", field.name),
                );
            }
        }
        FieldType::Date => {
            if NaiveDate::parse_from_str(default.trim(), "%Y-%m-%d").is_err() {
                report.at(
                    i,
                    name,
                    format!("Field '{}' default value must be a YYYY-MM-DD date", field.name),
                );
            }
        }
        _ => {}
    }
}

/// Interpret a checkbox state written as text
pub fn parse_checked(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" | "checked" => Some(true),
        "false" | "no" | "off" | "0" | "" | "unchecked" => Some(false),
        _ => None,
    }
}

/// Validate a portfolio record (base/surface file ids, name, optional fields)
pub fn validate_portfolio_value(value: &Value) -> ValidationReport {
    let mut report = ValidationReport::default();

    let Some(obj) = value.as_object() else {
        report.general("portfolio must be an object");
        return report;
    };

    for key in ["surface_file_id", "base_file_id", "name"] {
        if !obj.contains_key(key) {
            report.general(format!("Missing required field: {}", key));
        }
    }

    for key in ["surface_file_id", "base_file_id"] {
        if let Some(v) = obj.get(key) {
            if !(v.is_i64() || v.is_u64()) {
                report.general(format!("{} must be an integer", key));
            }
        }
    }

    if let Some(name) = obj.get("name") {
        if !name.is_string() {
            report.general("name must be a string");
        }
    }

    if let Some(fields) = obj.get("fields") {
        let before = report.issues.len();
        check_fields_structure(fields, &mut report);
        if report.issues.len() == before {
            check_typed(&serde_json::json!({ "fields": fields }), None, &mut report);
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::field::FieldDescriptor;
    use crate::form::geometry::Rect;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn text_field(id: &str, name: &str) -> FieldDescriptor {
        FieldDescriptor::new(id, name, FieldType::Text, 0, Rect::new(10.0, 10.0, 100.0, 20.0))
    }

    #[test]
    fn test_valid_schema() {
        let value = json!({
            "fields": [
                {"id": "f1", "name": "a", "type": "text", "x": 1, "y": 2, "width": 50, "height": 20, "page": 0},
                {"id": "f2", "name": "b", "type": "checkbox", "x": 1, "y": 40, "width": 20, "height": 20, "page": 1}
            ]
        });
        let report = validate_schema_value(&value, Some(2));
        assert!(report.is_valid(), "{:?}", report);
    }

    #[test]
    fn test_structural_messages() {
        let value = json!({
            "fields": [
                "nope",
                {"id": "f2", "type": "slider", "x": "1", "y": 2, "width": 3, "page": -1}
            ]
        });
        let report = validate_schema_value(&value, None);
        let messages = report.messages();
        assert!(messages.contains(&"Field at index 0 must be an object".to_string()));
        assert!(messages.contains(&"Field at index 1 missing required property: name".to_string()));
        assert!(messages.contains(&"Field at index 1 has invalid type: slider".to_string()));
        assert!(messages.contains(&"Field at index 1 x must be a number".to_string()));
        assert!(messages.contains(&"Field at index 1 missing required property: height".to_string()));
        assert!(messages.contains(&"Field at index 1 page must be a non-negative integer".to_string()));
    }

    #[test]
    fn test_fields_must_be_list() {
        let report = validate_schema_value(&json!({"fields": {}}), None);
        assert_eq!(report.messages(), vec!["fields must be a list".to_string()]);
    }

    #[test]
    fn test_duplicate_names_allowed_for_radio_groups() {
        let mut a = text_field("a", "choice");
        a.field_type = FieldType::Radiobutton;
        let mut b = text_field("b", "choice");
        b.field_type = FieldType::Radiobutton;
        let c = text_field("c", "other");
        let d = text_field("d", "other");

        let report = validate_schema(&FormSchema::new(vec![a, b, c, d]), None);
        assert_eq!(report.messages(), vec!["Duplicate field name: other".to_string()]);
    }

    #[test]
    fn test_page_bounds_and_geometry() {
        let mut f = text_field("a", "name");
        f.page = 3;
        f.width = 0.0;
        let report = validate_schema(&FormSchema::new(vec![f]), Some(2));
        assert_eq!(report.issues.len(), 2);
        assert!(report.issues.iter().all(|i| i.index == Some(0)));
    }

    #[test]
    fn test_default_value_checks() {
        let mut combo = text_field("c", "country");
        combo.field_type = FieldType::Combobox;
        combo.options = vec!["NZ".into(), "AU".into()];
        combo.default_value = Some("US".into());

        let mut list = text_field("l", "colors");
        list.field_type = FieldType::Listbox;

        let mut date = text_field("d", "dob");
        date.field_type = FieldType::Date;
        date.default_value = Some("31/12/2020".into());

        let mut number = text_field("n", "qty");
        number.field_type = FieldType::Number;
        number.default_value = Some("12.5".into());

        let mut check = text_field("k", "agree");
        check.field_type = FieldType::Checkbox;
        check.default_value = Some("maybe".into());

        let report = validate_schema(&FormSchema::new(vec![combo, list, date, number, check]), None);
        let fields: Vec<_> = report.issues.iter().filter_map(|i| i.field.clone()).collect();
        assert_eq!(fields, vec!["country", "colors", "dob", "agree"]);
    }

    #[test]
    fn test_parse_checked() {
        assert_eq!(parse_checked("Yes"), Some(true));
        assert_eq!(parse_checked(" off "), Some(false));
        assert_eq!(parse_checked("maybe"), None);
    }

    #[test]
    fn test_portfolio_validation() {
        let ok = json!({"surface_file_id": 2, "base_file_id": 1, "name": "Intake", "fields": []});
        assert!(validate_portfolio_value(&ok).is_valid());

        let bad = json!({"surface_file_id": "2", "fields": "x"});
        let messages = validate_portfolio_value(&bad).messages();
        assert!(messages.contains(&"Missing required field: base_file_id".to_string()));
        assert!(messages.contains(&"Missing required field: name".to_string()));
        assert!(messages.contains(&"surface_file_id must be an integer".to_string()));
        assert!(messages.contains(&"fields must be a list".to_string()));
    }

    #[test]
    fn test_portfolio_fields_get_schema_checks() {
        let portfolio = json!({
            "surface_file_id": 2,
            "base_file_id": 1,
            "name": "Intake",
            "fields": [
                {"id": "f1", "name": "a", "type": "text", "x": 0, "y": 0, "width": 50, "height": 20, "page": 0},
                {"id": "f1", "name": "a", "type": "text", "x": 0, "y": 40, "width": -10, "height": 20, "page": 0}
            ]
        });
        let report = validate_portfolio_value(&portfolio);
        assert_eq!(
            report.messages(),
            vec![
                "Duplicate field id: f1".to_string(),
                "Duplicate field name: a".to_string(),
                "Field 'a' must have a positive width and height".to_string(),
            ]
        );
        assert!(report.issues.iter().all(|i| i.index == Some(1)));
    }

    #[test]
    fn test_field_id_is_optional() {
        let value = json!({
            "fields": [
                {"name": "a", "type": "text", "x": 0, "y": 0, "width": 50, "height": 20, "page": 0},
                {"name": "b", "type": "text", "x": 0, "y": 40, "width": 50, "height": 20, "page": 0},
                {"id": 7, "name": "c", "type": "text", "x": 0, "y": 80, "width": 50, "height": 20, "page": 0}
            ]
        });
        let report = validate_schema_value(&value, None);
        assert_eq!(report.messages(), vec!["Field 'c' id must be a string".to_string()]);

        let fields = value["fields"].as_array().unwrap()[..2].to_vec();
        assert!(validate_schema_value(&json!({ "fields": fields }), None).is_valid());
    }
}
