//! Integration tests for PDF Portfolio Server

use lopdf::{dictionary, Document, Object, Stream};
use pdf_portfolio_server::form::{
    validate_schema, CanvasBounds, DesignSession, FieldDescriptor, FieldPatch, FieldType,
    FormSchema, Point, PointerOutcome, Rect, Viewport,
};
use pdf_portfolio_server::pdf::{
    create_surface_pdf, extract_pdf_metadata, extract_schema, fill_surface_pdf, page_geometries,
    read_embedded_json, read_form_fields, FillOptions, FormFieldInfo, SurfaceOptions,
    PAYLOAD_FILE_NAME,
};
use pdf_portfolio_server::portfolio::{
    NewSubmission, PortfolioRegistry, StoredPdf, SubmissionStatus,
};
use pdf_portfolio_server::source::{resolve_cache, PdfCache, PdfKind};
use pdf_portfolio_server::Error;
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Build a PDF with `pages` blank US Letter pages, each rotated by `rotate`
fn blank_pdf(pages: usize, rotate: i64) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::new();
    for _ in 0..pages {
        let content = doc.add_object(Stream::new(dictionary! {}, b"BT ET".to_vec()));
        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content,
        };
        if rotate != 0 {
            page.set("Rotate", rotate);
        }
        kids.push(doc.add_object(page).into());
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog);
    let info = doc.add_object(dictionary! {
        "Title" => Object::string_literal("Intake form"),
        "Author" => Object::string_literal("Records office"),
    });
    doc.trailer.set("Info", info);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

fn field(id: &str, name: &str, field_type: FieldType, page: u32, rect: Rect) -> FieldDescriptor {
    FieldDescriptor::new(id, name, field_type, page, rect)
}

fn intake_schema() -> FormSchema {
    let mut name = field("field_1", "full_name", FieldType::Text, 0, Rect::new(72.0, 100.0, 200.0, 20.0));
    name.required = true;

    let agree = field("field_2", "agree", FieldType::Checkbox, 0, Rect::new(72.0, 140.0, 14.0, 14.0));

    let mut small = field("field_3", "size", FieldType::Radiobutton, 0, Rect::new(72.0, 180.0, 14.0, 14.0));
    small.options = vec!["small".into()];
    let mut large = field("field_4", "size", FieldType::Radiobutton, 0, Rect::new(100.0, 180.0, 14.0, 14.0));
    large.options = vec!["large".into()];

    let mut color = field("field_5", "color", FieldType::Combobox, 0, Rect::new(72.0, 220.0, 120.0, 20.0));
    color.options = vec!["red".into(), "green".into(), "blue".into()];

    let mut notes = field("field_6", "notes", FieldType::Text, 0, Rect::new(72.0, 260.0, 200.0, 20.0));
    notes.read_only = true;
    notes.default_value = Some("office use".into());

    let signature = field("field_7", "signature", FieldType::Signature, 0, Rect::new(72.0, 300.0, 200.0, 50.0));
    let amount = field("field_8", "amount", FieldType::Number, 0, Rect::new(300.0, 100.0, 80.0, 20.0));

    FormSchema::new(vec![name, agree, small, large, color, notes, signature, amount])
}

fn surface(base: &[u8], schema: &FormSchema) -> Vec<u8> {
    create_surface_pdf(base, schema, &SurfaceOptions::default())
        .unwrap()
        .0
}

fn values(v: Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap()
}

fn by_name(fields: &[FormFieldInfo]) -> HashMap<&str, &FormFieldInfo> {
    fields.iter().map(|f| (f.name.as_str(), f)).collect()
}

#[test]
fn test_surface_pdf_exposes_every_field() {
    let base = blank_pdf(1, 0);
    let (pdf, report) = create_surface_pdf(&base, &intake_schema(), &SurfaceOptions::default())
        .unwrap();

    assert_eq!(report.fields_added, 7);
    assert_eq!(report.widgets_added, 8);
    assert!(report.fields_skipped.is_empty());
    assert_eq!(report.page_count, 1);

    let fields = read_form_fields(&pdf).unwrap();
    let fields = by_name(&fields);
    assert_eq!(fields["full_name"].field_type, "text");
    assert!(fields["full_name"].is_required);
    assert_eq!(fields["agree"].field_type, "checkbox");
    assert_eq!(fields["agree"].is_checked, Some(false));
    assert_eq!(fields["size"].field_type, "radio_button");
    assert_eq!(fields["size"].widget_count, 2);
    assert_eq!(fields["size"].export_values, vec!["small", "large"]);
    assert_eq!(fields["color"].field_type, "combo_box");
    assert_eq!(
        fields["color"].options.as_deref(),
        Some(&["red".to_string(), "green".to_string(), "blue".to_string()][..])
    );
    assert!(fields["notes"].is_read_only);
    assert_eq!(fields["notes"].value.as_deref(), Some("office use"));
    // signature overlays are dashed text fields until a signing tool replaces them
    assert_eq!(fields["signature"].field_type, "text");
}

#[test]
fn test_widget_rect_is_flipped_into_user_space() {
    let pdf = surface(&blank_pdf(1, 0), &intake_schema());
    let fields = read_form_fields(&pdf).unwrap();
    let name = by_name(&fields)["full_name"];

    assert_eq!(name.page, Some(0));
    assert_eq!(name.rect, Some(Rect::new(72.0, 672.0, 200.0, 20.0)));
}

#[test]
fn test_rotated_page_widget_rect() {
    let schema = FormSchema::new(vec![field(
        "field_1",
        "full_name",
        FieldType::Text,
        0,
        Rect::new(72.0, 100.0, 200.0, 20.0),
    )]);
    let pdf = surface(&blank_pdf(1, 90), &schema);

    let pages = page_geometries(&pdf).unwrap();
    assert_eq!(pages[0].rotation, 90);
    assert_eq!(pages[0].view_size(), (792.0, 612.0));

    let fields = read_form_fields(&pdf).unwrap();
    assert_eq!(fields[0].rect, Some(Rect::new(100.0, 72.0, 20.0, 200.0)));

    let recovered = extract_schema(&pdf).unwrap();
    assert_eq!(recovered.fields[0].rect(), Rect::new(72.0, 100.0, 200.0, 20.0));
}

#[test]
fn test_extract_schema_recovers_design() {
    let schema = intake_schema();
    let pdf = surface(&blank_pdf(1, 0), &schema);
    let recovered = extract_schema(&pdf).unwrap();

    let original: HashMap<&str, &FieldDescriptor> =
        schema.fields.iter().map(|f| (f.name.as_str(), f)).collect();
    for field in &recovered.fields {
        let source = original[field.name.as_str()];
        assert_eq!(field.field_type, source.field_type, "type of {}", field.name);
        assert_eq!(field.page, source.page);
        if field.field_type != FieldType::Radiobutton {
            assert_eq!(field.rect(), source.rect(), "rect of {}", field.name);
            assert_eq!(field.required, source.required);
            assert_eq!(field.read_only, source.read_only);
        }
    }
    let radios = recovered
        .fields
        .iter()
        .filter(|f| f.field_type == FieldType::Radiobutton)
        .count();
    assert_eq!(radios, 2);
    assert!(validate_schema(&recovered, Some(1)).is_valid());
}

#[test]
fn test_extract_schema_recovers_colors() {
    let mut highlighted = field("field_1", "highlighted", FieldType::Text, 0, Rect::new(72.0, 100.0, 200.0, 20.0));
    highlighted.border_color = Some("#0080ff".into());
    highlighted.fill_color = Some("yellow".into());
    highlighted.text_color = Some("#ff0000".into());
    let plain = field("field_2", "plain", FieldType::Checkbox, 0, Rect::new(72.0, 140.0, 20.0, 20.0));

    let pdf = surface(&blank_pdf(1, 0), &FormSchema::new(vec![highlighted, plain]));
    let recovered = extract_schema(&pdf).unwrap();
    let by_field: HashMap<&str, &FieldDescriptor> =
        recovered.fields.iter().map(|f| (f.name.as_str(), f)).collect();

    let highlighted = by_field["highlighted"];
    assert_eq!(highlighted.border_color.as_deref(), Some("#0080ff"));
    assert_eq!(highlighted.fill_color.as_deref(), Some("#ffff00"));
    assert_eq!(highlighted.text_color.as_deref(), Some("#ff0000"));

    let plain = by_field["plain"];
    assert_eq!(plain.border_color.as_deref(), Some("#000000"));
    assert_eq!(plain.fill_color, None);
    assert_eq!(plain.text_color, None);
}

#[test]
fn test_fields_on_missing_pages_and_existing_names_are_skipped() {
    let base = surface(&blank_pdf(2, 0), &intake_schema());
    let schema = FormSchema::new(vec![
        field("field_1", "full_name", FieldType::Text, 0, Rect::new(10.0, 10.0, 50.0, 20.0)),
        field("field_2", "page_two", FieldType::Text, 1, Rect::new(10.0, 10.0, 50.0, 20.0)),
        field("field_3", "page_five", FieldType::Text, 4, Rect::new(10.0, 10.0, 50.0, 20.0)),
    ]);

    let (pdf, report) = create_surface_pdf(&base, &schema, &SurfaceOptions::default()).unwrap();
    assert_eq!(report.fields_added, 1);
    let skipped: Vec<&str> = report.fields_skipped.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(skipped, vec!["full_name", "page_five"]);

    let fields = read_form_fields(&pdf).unwrap();
    assert_eq!(fields.len(), 8);
    assert_eq!(by_name(&fields)["page_two"].page, Some(1));
}

#[rstest]
#[case::text_then_radio(FieldType::Text, FieldType::Radiobutton)]
#[case::radio_then_text(FieldType::Radiobutton, FieldType::Text)]
fn test_radio_group_and_field_cannot_share_a_name(
    #[case] first: FieldType,
    #[case] second: FieldType,
) {
    let mut fields = Vec::new();
    for (i, (field_type, option)) in [(first, "x"), (second, "y"), (second, "z")].into_iter().enumerate() {
        let mut f = field(
            &format!("field_{}", i + 1),
            "choice",
            field_type,
            0,
            Rect::new(72.0, 100.0 + 40.0 * i as f32, 20.0, 20.0),
        );
        f.options = vec![option.into()];
        fields.push(f);
    }
    let schema = FormSchema::new(fields);

    let (pdf, report) = create_surface_pdf(&blank_pdf(1, 0), &schema, &SurfaceOptions::default())
        .unwrap();
    assert_eq!(report.fields_added, 1);
    assert_eq!(report.fields_skipped.len(), 2);
    assert!(report.fields_skipped.iter().all(|s| s.name == "choice"));

    let fields = read_form_fields(&pdf).unwrap();
    let named: Vec<&FormFieldInfo> = fields.iter().filter(|f| f.name == "choice").collect();
    assert_eq!(named.len(), 1);
    let expected_kind = if first == FieldType::Radiobutton { "radio_button" } else { "text" };
    assert_eq!(named[0].field_type, expected_kind);
}

#[test]
fn test_fill_round_trip() {
    let pdf = surface(&blank_pdf(1, 0), &intake_schema());
    let (filled, report) = fill_surface_pdf(
        &pdf,
        &values(json!({
            "full_name": "Ada Lovelace",
            "agree": true,
            "size": "large",
            "color": "green",
            "amount": 42
        })),
        &FillOptions::default(),
    )
    .unwrap();

    assert_eq!(report.fields_filled, 5);
    assert!(report.fields_skipped.is_empty());
    assert!(report.missing_required.is_empty());
    assert!(!report.payload_embedded);

    let fields = read_form_fields(&filled).unwrap();
    let fields = by_name(&fields);
    assert_eq!(fields["full_name"].value.as_deref(), Some("Ada Lovelace"));
    assert_eq!(fields["agree"].is_checked, Some(true));
    assert_eq!(fields["size"].value.as_deref(), Some("large"));
    assert_eq!(fields["color"].value.as_deref(), Some("green"));
    assert_eq!(fields["amount"].value.as_deref(), Some("42"));
}

#[rstest]
#[case::read_only(json!({"notes": "changed"}), "notes")]
#[case::multiple_on_single_select(json!({"color": ["red", "green"]}), "color")]
#[case::unknown_name(json!({"nickname": "Ada"}), "nickname")]
#[case::bad_radio_value(json!({"size": "medium"}), "size")]
#[case::bad_choice_value(json!({"color": "purple"}), "color")]
fn test_fill_skips_unfillable_values(#[case] input: Value, #[case] skipped: &str) {
    let pdf = surface(&blank_pdf(1, 0), &intake_schema());
    let (_, report) = fill_surface_pdf(&pdf, &values(input), &FillOptions::default()).unwrap();

    assert_eq!(report.fields_filled, 0);
    assert_eq!(report.fields_skipped.len(), 1);
    assert_eq!(report.fields_skipped[0].name, skipped);
    assert!(!report.fields_skipped[0].reason.is_empty());
}

#[test]
fn test_fill_reports_missing_required_and_clears_with_null() {
    let pdf = surface(&blank_pdf(1, 0), &intake_schema());
    let (filled, report) = fill_surface_pdf(
        &pdf,
        &values(json!({"full_name": "Ada"})),
        &FillOptions::default(),
    )
    .unwrap();
    assert!(report.missing_required.is_empty());

    let (cleared, report) = fill_surface_pdf(
        &filled,
        &values(json!({"full_name": null})),
        &FillOptions::default(),
    )
    .unwrap();
    assert_eq!(report.missing_required, vec!["full_name".to_string()]);
    let fields = read_form_fields(&cleared).unwrap();
    assert_eq!(by_name(&fields)["full_name"].value.as_deref().unwrap_or(""), "");
}

fn need_appearances(pdf: &[u8]) -> Option<bool> {
    let doc = Document::load_mem(pdf).unwrap();
    let acroform = match doc.catalog().unwrap().get(b"AcroForm").unwrap() {
        Object::Reference(id) => doc.get_dictionary(*id).unwrap(),
        Object::Dictionary(dict) => dict,
        other => panic!("unexpected AcroForm entry {:?}", other),
    };
    acroform.get(b"NeedAppearances").ok().and_then(|v| v.as_bool().ok())
}

#[test]
fn test_fill_always_requests_appearance_regeneration() {
    let (pdf, _) = create_surface_pdf(
        &blank_pdf(1, 0),
        &intake_schema(),
        &SurfaceOptions {
            need_appearances: false,
            ..SurfaceOptions::default()
        },
    )
    .unwrap();
    assert_eq!(need_appearances(&pdf), None);

    let (filled, report) = fill_surface_pdf(
        &pdf,
        &values(json!({"nickname": "Ada"})),
        &FillOptions::default(),
    )
    .unwrap();
    assert_eq!(report.fields_filled, 0);
    assert_eq!(need_appearances(&filled), Some(true));
}

#[test]
fn test_embedded_payload_round_trip() {
    let pdf = surface(&blank_pdf(1, 0), &intake_schema());
    assert_eq!(read_embedded_json(&pdf, PAYLOAD_FILE_NAME).unwrap(), None);

    let submitted = json!({"full_name": "Ada", "agree": false});
    let (filled, report) = fill_surface_pdf(
        &pdf,
        &values(submitted.clone()),
        &FillOptions {
            embed_payload: Some(submitted.clone()),
        },
    )
    .unwrap();
    assert!(report.payload_embedded);
    assert_eq!(
        read_embedded_json(&filled, PAYLOAD_FILE_NAME).unwrap(),
        Some(submitted)
    );
}

#[test]
fn test_metadata_counts_fields_by_kind() {
    let base = blank_pdf(2, 0);
    let plain = extract_pdf_metadata(&base).unwrap();
    assert_eq!(plain.pages, 2);
    assert!(!plain.has_form);
    assert_eq!(plain.total_fields, 0);
    assert_eq!(plain.info.title.as_deref(), Some("Intake form"));

    let meta = extract_pdf_metadata(&surface(&base, &intake_schema())).unwrap();
    assert!(meta.has_form);
    assert_eq!(meta.field_count.text, 4);
    assert_eq!(meta.field_count.checkbox, 1);
    assert_eq!(meta.field_count.radio, 1);
    assert_eq!(meta.field_count.choice, 1);
    assert_eq!(meta.field_count.signature, 0);
    assert_eq!(meta.total_fields, meta.field_count.total());
}

#[test]
fn test_non_pdf_input_is_rejected() {
    let result = create_surface_pdf(b"not a pdf", &FormSchema::default(), &SurfaceOptions::default());
    assert!(result.is_err());
    assert!(fill_surface_pdf(b"", &Map::new(), &FillOptions::default()).is_err());
}

#[test]
fn test_designer_flow_produces_valid_schema() {
    let pdf = blank_pdf(1, 0);
    let pages = page_geometries(&pdf).unwrap();
    let mut session = DesignSession::new(pages.clone());
    let viewport = Viewport::new(2.0).unwrap();
    let canvas = CanvasBounds {
        left: 10.0,
        top: 20.0,
        css_width: 612.0,
        css_height: 792.0,
        pixel_width: 1224,
        pixel_height: 1584,
    };

    // screen (110, 220) -> canvas (200, 400) -> view (100, 200)
    session.begin_placing(FieldType::Text);
    let placed = session
        .pointer_down(0, canvas.screen_to_view(Point::new(110.0, 220.0), &viewport))
        .unwrap();
    let PointerOutcome::Placed(id) = placed else {
        panic!("expected a placement, got {:?}", placed);
    };
    assert_eq!(session.fields()[0].rect(), Rect::new(100.0, 200.0, 100.0, 20.0));

    // grab the bottom-right handle and stretch
    let outcome = session.pointer_down(0, Point::new(198.0, 218.0)).unwrap();
    assert_eq!(outcome, PointerOutcome::ResizeStarted(id.clone()));
    session.pointer_move(Point::new(248.0, 238.0));
    assert!(session.pointer_up());
    assert_eq!(session.fields()[0].rect(), Rect::new(100.0, 200.0, 150.0, 40.0));

    session
        .update(
            &id,
            FieldPatch {
                name: Some("full_name".into()),
                required: Some(true),
                ..FieldPatch::default()
            },
        )
        .unwrap();

    let schema = session.schema();
    assert!(validate_schema(&schema, Some(1)).is_valid());

    let pdf = surface(&pdf, &schema);
    let fields = read_form_fields(&pdf).unwrap();
    assert_eq!(fields[0].name, "full_name");
    assert_eq!(
        fields[0].rect,
        Some(pages[0].view_to_user(&Rect::new(100.0, 200.0, 150.0, 40.0)))
    );
}

#[test]
fn test_portfolio_submission_flow() {
    let cache = PdfCache::new(10, 16 * 1024 * 1024);
    let registry = PortfolioRegistry::new();

    let base = blank_pdf(1, 0);
    let surface_pdf = surface(&base, &intake_schema());
    let base_key = cache.store(PdfKind::Base, base.clone()).unwrap();
    let surface_key = cache.store(PdfKind::Surface, surface_pdf.clone()).unwrap();
    let portfolio = registry
        .create(
            "Intake",
            StoredPdf::new(base_key, base),
            StoredPdf::new(surface_key.clone(), surface_pdf),
            intake_schema(),
        )
        .unwrap();

    // the portfolio keeps its own copy once the cache lets go
    cache.remove(&surface_key);
    assert!(matches!(
        resolve_cache(&surface_key, &cache),
        Err(Error::CacheKeyNotFound { .. })
    ));
    let surface_pdf = registry.get(portfolio.id).unwrap().surface_pdf;
    let form_data = values(json!({"agree": true}));
    let (filled, report) = fill_surface_pdf(
        &surface_pdf,
        &form_data,
        &FillOptions {
            embed_payload: Some(Value::Object(form_data.clone())),
        },
    )
    .unwrap();
    let filled_key = cache.store(PdfKind::Filled, filled.clone()).unwrap();

    let submission = registry
        .record_submission(
            portfolio.id,
            NewSubmission {
                filled_cache_key: filled_key,
                form_data,
                form_metadata: extract_pdf_metadata(&filled).ok(),
                missing_required: report.missing_required,
            },
        )
        .unwrap();

    assert_eq!(submission.status, SubmissionStatus::Incomplete);
    assert_eq!(submission.missing_required, vec!["full_name".to_string()]);
    assert_eq!(registry.get(portfolio.id).unwrap().submissions.len(), 1);

    registry.archive(portfolio.id).unwrap();
    assert!(matches!(
        registry.record_submission(portfolio.id, NewSubmission::default()),
        Err(Error::PortfolioArchived { .. })
    ));
}
