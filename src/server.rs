//! MCP Server implementation using rmcp

use crate::diagnostics::{
    diagnose_portfolio, diagnose_registered, trial_fill, FillTrial, PortfolioDiagnosis,
};
use crate::error::Error;
use crate::form::{
    validate_portfolio_value, validate_schema_value, CanvasBounds, DesignSession, FieldPatch,
    FieldType, FormSchema, PageGeometry, PdfBox, Point, PointerOutcome, Rect, ValidationIssue,
    Viewport,
};
use crate::pdf::{
    create_surface_pdf, extract_pdf_metadata, extract_schema, field_type_histogram,
    fill_surface_pdf, page_geometries, read_form_fields, render_page, FillOptions, FormFieldInfo,
    FormMetadata, SkippedField, SurfaceOptions,
};
use crate::portfolio::{
    NewSubmission, Portfolio, PortfolioRegistry, PortfolioSummary, StoredPdf, Submission,
};
use crate::source::{
    resolve_base64, resolve_cache, resolve_path, PdfCache, PdfKind, ResolvedPdf, ResourceDirs,
};
use anyhow::Result;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters, model::*,
    schemars::JsonSchema, tool, tool_handler, tool_router, ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where to read a PDF from
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum PdfSource {
    /// File path (absolute or relative)
    Path {
        /// Path to the PDF file
        path: String,
    },
    /// Base64 encoded PDF data
    Base64 {
        /// Base64 encoded PDF content
        base64: String,
    },
    /// Reference to cached PDF
    CacheRef {
        /// Cache key from previous operation
        cache_key: String,
    },
}

impl<'de> serde::Deserialize<'de> for PdfSource {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;

        let Some(obj) = value.as_object() else {
            return Err(serde::de::Error::custom(format!(
                "Invalid source: expected an object with one of \"path\", \"base64\", or \"cache_key\", but got {}",
                match &value {
                    Value::Array(_) => "an array",
                    Value::String(_) => "a string",
                    Value::Number(_) => "a number",
                    Value::Bool(_) => "a boolean",
                    Value::Null => "null",
                    _ => "unknown type",
                }
            )));
        };

        for key in ["path", "base64", "cache_key"] {
            let Some(v) = obj.get(key) else {
                continue;
            };
            let Some(s) = v.as_str() else {
                return Err(serde::de::Error::custom(format!(
                    "\"{}\" must be a string",
                    key
                )));
            };
            let s = s.to_string();
            return Ok(match key {
                "path" => PdfSource::Path { path: s },
                "base64" => PdfSource::Base64 { base64: s },
                _ => PdfSource::CacheRef { cache_key: s },
            });
        }

        let keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        Err(serde::de::Error::custom(format!(
            "Invalid source: expected one of \"path\", \"base64\", or \"cache_key\", but got keys: {:?}",
            keys
        )))
    }
}

const ENV_RESOURCE_DIRS: &str = "PDF_PORTFOLIO_RESOURCE_DIRS";
const ENV_CACHE_MAX_ENTRIES: &str = "PDF_PORTFOLIO_CACHE_MAX_ENTRIES";
const ENV_CACHE_MAX_BYTES: &str = "PDF_PORTFOLIO_CACHE_MAX_BYTES";
const ENV_MAX_SCALE: &str = "PDF_PORTFOLIO_MAX_SCALE";
const ENV_OUTPUT_DIR: &str = "PDF_PORTFOLIO_OUTPUT_DIR";

/// Security and resource configuration for the server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directories path sources and output paths are confined to
    pub resource_dirs: Vec<String>,
    /// Maximum total bytes in cache (default: 512MB)
    pub cache_max_bytes: usize,
    /// Maximum number of cache entries (default: 100)
    pub cache_max_entries: usize,
    /// Largest zoom accepted for rendering and projection (default: 10.0)
    pub max_render_scale: f32,
    /// Largest canvas pixel area accepted for rendering (default: 40M)
    pub max_render_pixels: u64,
    /// Base directory for relative output paths
    pub output_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            resource_dirs: Vec::new(),
            cache_max_bytes: 512 * 1024 * 1024,
            cache_max_entries: 100,
            max_render_scale: 10.0,
            max_render_pixels: crate::pdf::MAX_RENDER_PIXELS,
            output_dir: None,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `PDF_PORTFOLIO_*` environment variables
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, raw: Option<String>, fallback: T) -> T {
            match raw {
                None => fallback,
                Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                    tracing::warn!(variable = key, value = %raw, "ignoring unparsable setting");
                    fallback
                }),
            }
        }

        let defaults = Self::default();
        let resource_dirs = get(ENV_RESOURCE_DIRS)
            .map(|raw| {
                std::env::split_paths(&raw)
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(|p| p.to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();

        let max_render_scale = parsed(ENV_MAX_SCALE, get(ENV_MAX_SCALE), defaults.max_render_scale);
        Self {
            resource_dirs,
            cache_max_bytes: parsed(
                ENV_CACHE_MAX_BYTES,
                get(ENV_CACHE_MAX_BYTES),
                defaults.cache_max_bytes,
            ),
            cache_max_entries: parsed(
                ENV_CACHE_MAX_ENTRIES,
                get(ENV_CACHE_MAX_ENTRIES),
                defaults.cache_max_entries,
            ),
            max_render_scale: if max_render_scale.is_finite() && max_render_scale > 0.0 {
                max_render_scale
            } else {
                defaults.max_render_scale
            },
            max_render_pixels: defaults.max_render_pixels,
            output_dir: get(ENV_OUTPUT_DIR).filter(|d| !d.trim().is_empty()),
        }
    }
}

/// MCP server for designing, generating, and filling surface PDFs
#[derive(Clone)]
pub struct PortfolioServer {
    cache: Arc<PdfCache>,
    portfolios: Arc<PortfolioRegistry>,
    sandbox: ResourceDirs,
    tool_router: ToolRouter<Self>,
    config: Arc<ServerConfig>,
}

// ============================================================================
// Shared response types
// ============================================================================

/// One page as the designer sees it
#[derive(Debug, Serialize)]
pub struct PageView {
    /// 0-based page index
    pub index: u32,
    /// Visible box in PDF user space
    #[serde(rename = "box")]
    pub bounds: PdfBox,
    pub rotation: u16,
    /// Displayed size in points
    pub view_width: f32,
    pub view_height: f32,
    /// Canvas size in pixels at the requested scale
    pub canvas_width: u32,
    pub canvas_height: u32,
}

impl PageView {
    fn new(page: &PageGeometry, viewport: &Viewport) -> Self {
        let (view_width, view_height) = page.view_size();
        let (canvas_width, canvas_height) = viewport.canvas_size(page);
        Self {
            index: page.index,
            bounds: page.bounds,
            rotation: page.rotation,
            view_width,
            view_height,
            canvas_width,
            canvas_height,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_scale() -> f32 {
    1.0
}

// ============================================================================
// Request/Response types for validate_form_schema
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ValidateFormSchemaParams {
    /// Form schema: an object with a "fields" array, or that object as a JSON string
    pub schema: Value,
    /// PDF the schema is meant for; enables page range checks
    #[serde(default)]
    pub source: Option<PdfSource>,
}

#[derive(Debug, Serialize)]
pub struct ValidateFormSchemaResult {
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
    pub field_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for get_page_info
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetPageInfoParams {
    /// PDF sources to inspect
    pub sources: Vec<PdfSource>,
    /// Zoom used to compute canvas sizes (default: 1.0)
    #[serde(default = "default_scale")]
    pub scale: f32,
}

#[derive(Debug, Serialize)]
pub struct GetPageInfoResult {
    pub source: String,
    pub pages: Vec<PageView>,
    pub total_pages: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for render_page
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RenderPageParams {
    /// PDF to render
    pub source: PdfSource,
    /// 0-based page index (default: 0)
    #[serde(default)]
    pub page_index: u32,
    /// Pixels per point (default: 1.0)
    #[serde(default = "default_scale")]
    pub scale: f32,
    /// Form schema whose fields are outlined on the image
    #[serde(default)]
    pub schema: Option<Value>,
    /// Password for encrypted PDFs
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RenderPageResult {
    pub source: String,
    pub page_index: u32,
    pub width: u32,
    pub height: u32,
    pub scale: f32,
    pub fields_drawn: u32,
    pub mime_type: String,
    pub data_base64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for project_fields
// ============================================================================

/// Coordinate space of design event positions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateSpace {
    /// Unscaled page points, top-left origin
    #[default]
    View,
    /// Canvas pixels at the requested scale
    Canvas,
    /// Client pixels; requires canvas_bounds
    Screen,
}

/// A designer gesture replayed against the schema
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DesignEvent {
    /// Arm placement of a new field; the next pointer_down places it
    BeginPlacing { field_type: FieldType },
    CancelPlacing,
    PointerDown { page: u32, x: f32, y: f32 },
    PointerMove { x: f32, y: f32 },
    PointerUp,
    Select { id: String },
    Remove { id: String },
    BringToFront { id: String },
    /// Edit properties of one field; omitted keys are left alone
    Update {
        id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        field_type: Option<FieldType>,
        #[serde(default)]
        required: Option<bool>,
        #[serde(default)]
        read_only: Option<bool>,
        /// `null` clears the default value
        #[serde(default, deserialize_with = "explicit_null")]
        #[schemars(with = "Option<String>")]
        default_value: Option<Option<String>>,
        #[serde(default)]
        options: Option<Vec<String>>,
        /// New geometry in view space, clamped to the page
        #[serde(default)]
        rect: Option<Rect>,
    },
}

/// Tell an explicit `null` (`Some(None)`) apart from a missing key (`None`)
fn explicit_null<'de, D>(deserializer: D) -> std::result::Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ProjectFieldsParams {
    /// PDF the fields belong to (supplies page boxes and rotation)
    pub source: PdfSource,
    /// Current form schema (empty when omitted)
    #[serde(default)]
    pub schema: Option<Value>,
    /// Canvas zoom (default: 1.0)
    #[serde(default = "default_scale")]
    pub scale: f32,
    /// Space of event x/y values (default: view)
    #[serde(default)]
    pub coordinates: CoordinateSpace,
    /// Canvas placement on screen, for screen coordinates
    #[serde(default)]
    pub canvas_bounds: Option<CanvasBounds>,
    /// Gestures applied in order before projecting
    #[serde(default)]
    pub events: Vec<DesignEvent>,
}

#[derive(Debug, Serialize)]
pub struct ProjectedField {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub page: u32,
    /// Stored rectangle (points, top-left origin)
    pub view: Rect,
    /// Rectangle on the canvas in pixels
    pub canvas: Rect,
    /// Widget rectangle in PDF user space; absent when the page does not exist
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Rect>,
}

#[derive(Debug, Serialize)]
pub struct EventOutcome {
    pub index: usize,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProjectFieldsResult {
    pub source: String,
    pub scale: f32,
    pub pages: Vec<PageView>,
    pub fields: Vec<ProjectedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventOutcome>,
    /// Schema after the events were applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<FormSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for create_surface_pdf
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateSurfacePdfParams {
    /// Base PDF the fields are overlaid on
    pub source: PdfSource,
    /// Form schema with the fields to inject
    pub schema: Value,
    /// Widget border width in points (default: 1.0)
    #[serde(default)]
    pub border_width: Option<f32>,
    /// Ask viewers to regenerate field appearances (default: true)
    #[serde(default = "default_true")]
    pub need_appearances: bool,
    /// Output file path (optional). If provided, saves the surface PDF to this path.
    #[serde(default)]
    pub output_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateSurfacePdfResult {
    pub source: String,
    /// Cache key for the surface PDF (always provided for chaining operations)
    pub output_cache_key: String,
    pub fields_added: u32,
    pub widgets_added: u32,
    pub fields_skipped: Vec<SkippedField>,
    pub page_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for fill_surface_pdf
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FillSurfacePdfParams {
    /// Surface PDF (or any PDF with an AcroForm)
    pub source: PdfSource,
    /// Values keyed by fully qualified field name
    pub values: Map<String, Value>,
    /// Attach the submitted values as payload.json (default: false)
    #[serde(default)]
    pub embed_payload: bool,
    /// Output file path (optional). If provided, saves the filled PDF to this path.
    #[serde(default)]
    pub output_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FillSurfacePdfResult {
    pub source: String,
    /// Cache key for the filled PDF (always provided for chaining operations)
    pub output_cache_key: String,
    pub fields_filled: u32,
    pub fields_skipped: Vec<SkippedField>,
    pub missing_required: Vec<String>,
    pub payload_embedded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for extract_form_fields / extract_form_schema
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExtractFormFieldsParams {
    /// PDF sources to read
    pub sources: Vec<PdfSource>,
}

#[derive(Debug, Serialize)]
pub struct ExtractFormFieldsResult {
    pub source: String,
    pub fields: Vec<FormFieldInfo>,
    pub total_fields: usize,
    pub field_types: BTreeMap<String, u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExtractFormSchemaParams {
    /// PDF with an AcroForm
    pub source: PdfSource,
}

#[derive(Debug, Serialize)]
pub struct ExtractFormSchemaResult {
    pub source: String,
    pub schema: FormSchema,
    pub field_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for extract_pdf_metadata
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExtractPdfMetadataParams {
    /// PDF sources to summarize
    pub sources: Vec<PdfSource>,
}

#[derive(Debug, Serialize)]
pub struct ExtractPdfMetadataResult {
    pub source: String,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FormMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for portfolios
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ValidatePortfolioParams {
    /// Portfolio record: name, base_file_id, surface_file_id, optional fields
    pub portfolio: Value,
}

#[derive(Debug, Serialize)]
pub struct ValidatePortfolioResult {
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreatePortfolioParams {
    /// Display name
    pub name: String,
    /// Base PDF
    pub base: PdfSource,
    /// Form schema used to build the surface PDF
    pub schema: Value,
    /// Widget border width in points (default: 1.0)
    #[serde(default)]
    pub border_width: Option<f32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdatePortfolioParams {
    /// Portfolio id
    pub id: u64,
    /// Replacement form schema; the surface PDF is rebuilt from the stored base
    pub schema: Value,
    /// Widget border width in points (default: 1.0)
    #[serde(default)]
    pub border_width: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct PortfolioSurfaceResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub portfolio: Option<PortfolioSummary>,
    pub base_cache_key: String,
    pub surface_cache_key: String,
    pub fields_added: u32,
    pub widgets_added: u32,
    pub fields_skipped: Vec<SkippedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetPortfolioParams {
    /// Portfolio id; omit to list every portfolio
    #[serde(default)]
    pub id: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct GetPortfolioResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub portfolio: Option<Portfolio>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub portfolios: Option<Vec<PortfolioSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ArchivePortfolioParams {
    /// Portfolio id
    pub id: u64,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SubmitPortfolioParams {
    /// Portfolio id
    pub id: u64,
    /// Values keyed by field name
    pub values: Map<String, Value>,
    /// Attach the submitted values as payload.json (default: true)
    #[serde(default = "default_true")]
    pub embed_payload: bool,
    /// Output file path (optional). If provided, saves the filled PDF to this path.
    #[serde(default)]
    pub output_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitPortfolioResult {
    pub portfolio_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission: Option<Submission>,
    pub fields_filled: u32,
    pub fields_skipped: Vec<SkippedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DiagnosePortfolioParams {
    /// Registered portfolio to diagnose
    #[serde(default)]
    pub id: Option<u64>,
    /// Unregistered portfolio record, checked like validate_portfolio
    #[serde(default)]
    pub portfolio: Option<Value>,
    /// Base PDF of an unregistered record
    #[serde(default)]
    pub base: Option<PdfSource>,
    /// Surface PDF of an unregistered record
    #[serde(default)]
    pub surface: Option<PdfSource>,
    /// Fill the surface PDF with sample values and time it (default: false)
    #[serde(default)]
    pub test_fill: bool,
    /// Values for the trial fill; generated per field type when omitted
    #[serde(default)]
    pub test_values: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
pub struct DiagnosePortfolioResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<PortfolioDiagnosis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill_test: Option<FillTrial>,
    /// Cache key of the trial-filled PDF
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filled_cache_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

const SOURCE_FORMAT: &str = "Source format: must be one of {\"path\": \"/absolute/path.pdf\"}, {\"base64\": \"...\"}, or {\"cache_key\": \"...\"}";

fn respond<T: Serialize>(results: &[T]) -> String {
    let response = serde_json::json!({ "results": results });
    serde_json::to_string_pretty(&response).unwrap_or_default()
}

// ============================================================================
// Tool implementations
// ============================================================================

#[tool_router]
impl PortfolioServer {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a server confined to the given resource directories
    pub fn with_resource_dirs(dirs: Vec<String>) -> Self {
        Self::with_config(ServerConfig {
            resource_dirs: dirs,
            ..ServerConfig::default()
        })
    }

    /// Create a server with full configuration
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            cache: Arc::new(PdfCache::new(config.cache_max_entries, config.cache_max_bytes)),
            portfolios: Arc::new(PortfolioRegistry::new()),
            sandbox: ResourceDirs::new(config.resource_dirs.iter().map(PathBuf::from)),
            tool_router: Self::tool_router(),
            config: Arc::new(config),
        }
    }

    #[tool(
        description = "Validate a form schema before saving it. Reports every problem at once: missing names, unknown types, non-numeric coordinates, duplicate names, options and default values that do not match the field type.

Field types: text, checkbox, signature, date, number, radiobutton (alias radio), combobox, listbox. Coordinates are PDF points with a top-left origin; page is 0-based.

When a source PDF is given, page indexes are also checked against its page count."
    )]
    async fn validate_form_schema(
        &self,
        Parameters(params): Parameters<ValidateFormSchemaParams>,
    ) -> String {
        let result = self
            .process_validate_form_schema(&params)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "validate_form_schema failed");
                ValidateFormSchemaResult {
                    valid: false,
                    issues: vec![],
                    field_count: 0,
                    page_count: None,
                    error: Some(e.client_message()),
                }
            });
        respond(&[result])
    }

    #[tool(
        description = "Get the geometry of every page: visible box in PDF user space, rotation, displayed size in points, and canvas size in pixels at the given scale. Use it to size rendering canvases and to convert between coordinate spaces."
    )]
    async fn get_page_info(&self, Parameters(params): Parameters<GetPageInfoParams>) -> String {
        let mut results = Vec::new();
        for source in &params.sources {
            let result = self
                .process_get_page_info(source, params.scale)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "get_page_info failed");
                    GetPageInfoResult {
                        source: Self::source_name(source),
                        pages: vec![],
                        total_pages: 0,
                        error: Some(e.client_message()),
                    }
                });
            results.push(result);
        }
        respond(&results)
    }

    #[tool(
        description = "Render one page to a PNG (base64) at the given scale, optionally outlining the fields of a form schema at their canvas positions. The returned width/height are the canvas size field coordinates map onto (canvas = points x scale)."
    )]
    async fn render_page(&self, Parameters(params): Parameters<RenderPageParams>) -> String {
        let result = self
            .process_render_page(&params)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "render_page failed");
                RenderPageResult {
                    source: Self::source_name(&params.source),
                    page_index: params.page_index,
                    width: 0,
                    height: 0,
                    scale: params.scale,
                    fields_drawn: 0,
                    mime_type: "image/png".to_string(),
                    data_base64: String::new(),
                    error: Some(e.client_message()),
                }
            });
        respond(&[result])
    }

    #[tool(
        description = "Apply designer gestures to a form schema and project every field into canvas pixels and PDF user space.

Events (applied in order, each with an \"action\"):
- begin_placing {field_type}: the next pointer_down places a field of that type at its default size
- pointer_down {page, x, y}: place, or start dragging/resizing the topmost field under the pointer (the bottom-right 8pt handle resizes)
- pointer_move {x, y}, pointer_up
- select/remove/bring_to_front {id}
- update {id, name?, field_type?, required?, read_only?, default_value? (null clears), options?, rect?}
- cancel_placing

x/y are in the space named by \"coordinates\": view (points), canvas (pixels at scale), or screen (client pixels, needs canvas_bounds)."
    )]
    async fn project_fields(&self, Parameters(params): Parameters<ProjectFieldsParams>) -> String {
        let result = self
            .process_project_fields(&params)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "project_fields failed");
                ProjectFieldsResult {
                    source: Self::source_name(&params.source),
                    scale: params.scale,
                    pages: vec![],
                    fields: vec![],
                    selected: None,
                    events: vec![],
                    schema: None,
                    error: Some(e.client_message()),
                }
            });
        respond(&[result])
    }

    #[tool(
        description = "Create a surface PDF: the base PDF with every schema field injected as an AcroForm widget.

Mapping: text/date/number/signature become text fields (date and number get format actions, signature a dashed border), checkbox a Yes/Off button, radiobuttons sharing a name one radio group, combobox/listbox choice fields with their options. required/read_only become field flags and default_value the initial value.

Fields on pages the PDF does not have, or whose name already exists in the base PDF, are skipped and reported. The output is always cached (output_cache_key) for chaining with fill_surface_pdf."
    )]
    async fn create_surface_pdf(
        &self,
        Parameters(params): Parameters<CreateSurfacePdfParams>,
    ) -> String {
        let result = self
            .process_create_surface_pdf(&params)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "create_surface_pdf failed");
                CreateSurfacePdfResult {
                    source: Self::source_name(&params.source),
                    output_cache_key: String::new(),
                    fields_added: 0,
                    widgets_added: 0,
                    fields_skipped: vec![],
                    page_count: 0,
                    output_path: None,
                    error: Some(e.client_message()),
                }
            });
        respond(&[result])
    }

    #[tool(
        description = "Fill the form fields of a PDF and produce a new PDF.

values maps field names (see extract_form_fields) to:
- text/number/date: a string or number
- checkbox: true/false (or \"Yes\"/\"Off\")
- radio group: the export value of the button to select
- combobox/listbox: one of the options (listbox may take a list)

Read-only fields, signature fields and unknown names are reported as skipped. Required fields left empty are listed in missing_required. The output is always cached (output_cache_key)."
    )]
    async fn fill_surface_pdf(
        &self,
        Parameters(params): Parameters<FillSurfacePdfParams>,
    ) -> String {
        let result = self
            .process_fill_surface_pdf(&params)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "fill_surface_pdf failed");
                FillSurfacePdfResult {
                    source: Self::source_name(&params.source),
                    output_cache_key: String::new(),
                    fields_filled: 0,
                    fields_skipped: vec![],
                    missing_required: vec![],
                    payload_embedded: false,
                    output_path: None,
                    error: Some(e.client_message()),
                }
            });
        respond(&[result])
    }

    #[tool(
        description = "Extract the AcroForm fields of PDF files: fully qualified name, type (text, checkbox, radio_button, combo_box, list_box, push_button, signature), current value, checked state, read-only/required flags, options, export values, page index and PDF user-space rectangle."
    )]
    async fn extract_form_fields(
        &self,
        Parameters(params): Parameters<ExtractFormFieldsParams>,
    ) -> String {
        let mut results = Vec::new();
        for source in &params.sources {
            let result = self
                .process_extract_form_fields(source)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "extract_form_fields failed");
                    ExtractFormFieldsResult {
                        source: Self::source_name(source),
                        fields: vec![],
                        total_fields: 0,
                        field_types: BTreeMap::new(),
                        error: Some(e.client_message()),
                    }
                });
            results.push(result);
        }
        respond(&results)
    }

    #[tool(
        description = "Recover a designer form schema from a PDF's AcroForm, with field rectangles converted back to points from the top-left of each displayed page. Useful to re-edit a surface PDF or to start a design from an existing form."
    )]
    async fn extract_form_schema(
        &self,
        Parameters(params): Parameters<ExtractFormSchemaParams>,
    ) -> String {
        let result = self
            .process_extract_form_schema(&params.source)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "extract_form_schema failed");
                ExtractFormSchemaResult {
                    source: Self::source_name(&params.source),
                    schema: FormSchema::default(),
                    field_count: 0,
                    error: Some(e.client_message()),
                }
            });
        respond(&[result])
    }

    #[tool(
        description = "Summarize PDF files: document info (title, author, dates...), page count, whether a form is present, and field counts by kind (text, checkbox, radio, signature, choice, other)."
    )]
    async fn extract_pdf_metadata(
        &self,
        Parameters(params): Parameters<ExtractPdfMetadataParams>,
    ) -> String {
        let mut results = Vec::new();
        for source in &params.sources {
            let result = self
                .process_extract_pdf_metadata(source)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "extract_pdf_metadata failed");
                    ExtractPdfMetadataResult {
                        source: Self::source_name(source),
                        metadata: None,
                        error: Some(e.client_message()),
                    }
                });
            results.push(result);
        }
        respond(&results)
    }

    #[tool(
        description = "Validate a portfolio record: surface_file_id and base_file_id must be integers, name a string, and fields (when present) a well-formed field list that also passes the form schema checks (unique ids and names, positive sizes, options matching the field type)."
    )]
    async fn validate_portfolio(
        &self,
        Parameters(params): Parameters<ValidatePortfolioParams>,
    ) -> String {
        let report = validate_portfolio_value(&params.portfolio);
        respond(&[ValidatePortfolioResult {
            valid: report.is_valid(),
            issues: report.issues,
        }])
    }

    #[tool(
        description = "Diagnose a portfolio and report every problem found instead of stopping at the first.

Give either id (a registered portfolio) or portfolio (a record as for validate_portfolio) with optional base and surface PDF sources. Checks: record validity, both files readable as PDF, base PDF without form fields (warning), surface PDF with form fields (error when none), surface field count against the design (radio buttons sharing a name count once), duplicate names, negative positions.

With test_fill, the surface PDF is filled with test_values (or one generated value per writable field), read back, and the fill timed; the filled PDF is cached (filled_cache_key)."
    )]
    async fn diagnose_portfolio(
        &self,
        Parameters(params): Parameters<DiagnosePortfolioParams>,
    ) -> String {
        let result = self
            .process_diagnose_portfolio(&params)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "diagnose_portfolio failed");
                DiagnosePortfolioResult {
                    diagnosis: None,
                    fill_test: None,
                    filled_cache_key: None,
                    error: Some(e.client_message()),
                }
            });
        respond(&[result])
    }

    #[tool(
        description = "Create a portfolio: cache the base PDF, build its surface PDF from the schema, and register the pair. Returns the portfolio id and both cache keys."
    )]
    async fn create_portfolio(
        &self,
        Parameters(params): Parameters<CreatePortfolioParams>,
    ) -> String {
        let result = self
            .process_create_portfolio(&params)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "create_portfolio failed");
                Self::failed_surface_result(e)
            });
        respond(&[result])
    }

    #[tool(
        description = "Replace a portfolio's form schema and rebuild its surface PDF from the base PDF the portfolio was created with."
    )]
    async fn update_portfolio(
        &self,
        Parameters(params): Parameters<UpdatePortfolioParams>,
    ) -> String {
        let result = self
            .process_update_portfolio(&params)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, portfolio = params.id, "update_portfolio failed");
                Self::failed_surface_result(e)
            });
        respond(&[result])
    }

    #[tool(description = "Get one portfolio with its schema and submissions, or list all portfolios when no id is given.")]
    async fn get_portfolio(&self, Parameters(params): Parameters<GetPortfolioParams>) -> String {
        let result = match params.id {
            Some(id) => match self.portfolios.get(id) {
                Ok(portfolio) => GetPortfolioResult {
                    portfolio: Some(portfolio),
                    portfolios: None,
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(error = %e, "get_portfolio failed");
                    GetPortfolioResult {
                        portfolio: None,
                        portfolios: None,
                        error: Some(e.client_message()),
                    }
                }
            },
            None => GetPortfolioResult {
                portfolio: None,
                portfolios: Some(self.portfolios.list()),
                error: None,
            },
        };
        respond(&[result])
    }

    #[tool(description = "Archive a portfolio so it no longer accepts submissions or schema updates.")]
    async fn archive_portfolio(
        &self,
        Parameters(params): Parameters<ArchivePortfolioParams>,
    ) -> String {
        let result = match self.portfolios.archive(params.id) {
            Ok(p) => GetPortfolioResult {
                portfolio: Some(p),
                portfolios: None,
                error: None,
            },
            Err(e) => {
                tracing::warn!(error = %e, "archive_portfolio failed");
                GetPortfolioResult {
                    portfolio: None,
                    portfolios: None,
                    error: Some(e.client_message()),
                }
            }
        };
        respond(&[result])
    }

    #[tool(
        description = "Submit values for a portfolio: fill its surface PDF, embed the values as payload.json (unless embed_payload is false), record the submission with the filled PDF's metadata, and return the submission. Required fields left empty mark the submission incomplete."
    )]
    async fn submit_portfolio(
        &self,
        Parameters(params): Parameters<SubmitPortfolioParams>,
    ) -> String {
        let result = self
            .process_submit_portfolio(&params)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, portfolio = params.id, "submit_portfolio failed");
                SubmitPortfolioResult {
                    portfolio_id: params.id,
                    submission: None,
                    fields_filled: 0,
                    fields_skipped: vec![],
                    output_path: None,
                    error: Some(e.client_message()),
                }
            });
        respond(&[result])
    }
}

impl PortfolioServer {
    fn source_name(source: &PdfSource) -> String {
        match source {
            PdfSource::Path { path } => path.clone(),
            PdfSource::Base64 { .. } => "<base64>".to_string(),
            PdfSource::CacheRef { cache_key } => format!("<cache:{}>", cache_key),
        }
    }

    fn resolve_source(&self, source: &PdfSource) -> crate::error::Result<ResolvedPdf> {
        match source {
            PdfSource::Path { path } => {
                let path = self.sandbox.check_read(path)?;
                resolve_path(path)
            }
            PdfSource::Base64 { base64 } => resolve_base64(base64),
            PdfSource::CacheRef { cache_key } => resolve_cache(cache_key, &self.cache),
        }
    }

    fn viewport(&self, scale: f32) -> crate::error::Result<Viewport> {
        let viewport = Viewport::new(scale)?;
        if scale > self.config.max_render_scale {
            return Err(Error::InvalidScale { scale });
        }
        Ok(viewport)
    }

    fn cache_output(&self, kind: PdfKind, data: &[u8]) -> crate::error::Result<String> {
        self.cache
            .store(kind, data.to_vec())
            .ok_or(Error::CacheCapacity { bytes: data.len() })
    }

    /// Write output data to a file path, with sandbox validation.
    fn write_output(
        &self,
        output_path: &Option<String>,
        data: &[u8],
    ) -> crate::error::Result<Option<String>> {
        let Some(path_str) = output_path else {
            return Ok(None);
        };

        let path = match &self.config.output_dir {
            Some(dir) if Path::new(path_str).is_relative() => Path::new(dir).join(path_str),
            _ => PathBuf::from(path_str),
        };
        let path_string = path.to_string_lossy().into_owned();
        self.sandbox.check_write(&path_string)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        std::fs::write(&path, data)?;
        tracing::info!(path = %path_string, bytes = data.len(), "wrote output PDF");
        Ok(Some(path_string))
    }

    /// Parse schema JSON (object or JSON string) after structural validation
    fn parse_schema(value: &Value, page_count: Option<u32>) -> crate::error::Result<FormSchema> {
        let parsed;
        let value = match value {
            Value::String(s) => {
                parsed = serde_json::from_str::<Value>(s).map_err(|e| Error::InvalidSchema {
                    reason: e.to_string(),
                })?;
                &parsed
            }
            other => other,
        };

        let report = validate_schema_value(value, page_count);
        if !report.is_valid() {
            return Err(Error::InvalidSchema {
                reason: report.messages().join("; "),
            });
        }
        let mut schema: FormSchema =
            serde_json::from_value(value.clone()).map_err(|e| Error::InvalidSchema {
                reason: e.to_string(),
            })?;
        schema.assign_missing_ids();
        Ok(schema)
    }

    fn failed_surface_result(e: Error) -> PortfolioSurfaceResult {
        PortfolioSurfaceResult {
            portfolio: None,
            base_cache_key: String::new(),
            surface_cache_key: String::new(),
            fields_added: 0,
            widgets_added: 0,
            fields_skipped: vec![],
            error: Some(e.client_message()),
        }
    }

    pub async fn process_validate_form_schema(
        &self,
        params: &ValidateFormSchemaParams,
    ) -> crate::error::Result<ValidateFormSchemaResult> {
        let page_count = match &params.source {
            Some(source) => {
                let data = self.resolve_source(source)?.data;
                let pages = blocking(move || page_geometries(&data)).await?;
                Some(pages.len() as u32)
            }
            None => None,
        };

        let value = match &params.schema {
            Value::String(s) => serde_json::from_str(s).map_err(|e| Error::InvalidSchema {
                reason: e.to_string(),
            })?,
            other => other.clone(),
        };

        let report = validate_schema_value(&value, page_count);
        let field_count = value
            .get("fields")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);

        Ok(ValidateFormSchemaResult {
            valid: report.is_valid(),
            issues: report.issues,
            field_count,
            page_count,
            error: None,
        })
    }

    pub async fn process_get_page_info(
        &self,
        source: &PdfSource,
        scale: f32,
    ) -> crate::error::Result<GetPageInfoResult> {
        let viewport = self.viewport(scale)?;
        let resolved = self.resolve_source(source)?;
        let data = resolved.data;
        let pages = blocking(move || page_geometries(&data)).await?;

        Ok(GetPageInfoResult {
            source: resolved.source_name,
            total_pages: pages.len() as u32,
            pages: pages.iter().map(|p| PageView::new(p, &viewport)).collect(),
            error: None,
        })
    }

    pub async fn process_render_page(
        &self,
        params: &RenderPageParams,
    ) -> crate::error::Result<RenderPageResult> {
        let viewport = self.viewport(params.scale)?;
        let overlay = params
            .schema
            .as_ref()
            .map(|s| Self::parse_schema(s, None))
            .transpose()?;
        let resolved = self.resolve_source(&params.source)?;

        let data = resolved.data;
        let password = params.password.clone();
        let page_index = params.page_index;
        let scale = viewport.scale;
        let max_pixels = self.config.max_render_pixels;
        let rendered = blocking(move || {
            render_page(
                &data,
                password.as_deref(),
                page_index,
                scale,
                max_pixels,
                overlay.as_ref(),
            )
        })
        .await?;

        Ok(RenderPageResult {
            source: resolved.source_name,
            page_index: rendered.page_index,
            width: rendered.width,
            height: rendered.height,
            scale: rendered.scale,
            fields_drawn: rendered.fields_drawn,
            mime_type: rendered.mime_type,
            data_base64: rendered.data_base64,
            error: None,
        })
    }

    pub async fn process_project_fields(
        &self,
        params: &ProjectFieldsParams,
    ) -> crate::error::Result<ProjectFieldsResult> {
        let viewport = self.viewport(params.scale)?;
        if params.coordinates == CoordinateSpace::Screen && params.canvas_bounds.is_none() {
            return Err(Error::InvalidSchema {
                reason: "screen coordinates need canvas_bounds".to_string(),
            });
        }
        let schema = match &params.schema {
            Some(value) => Self::parse_schema(value, None)?,
            None => FormSchema::default(),
        };

        let resolved = self.resolve_source(&params.source)?;
        let data = resolved.data;
        let pages = blocking(move || page_geometries(&data)).await?;

        let mut session = DesignSession::from_schema(pages.clone(), schema);
        let to_view = |x: f32, y: f32| -> Point {
            let p = Point::new(x, y);
            match (params.coordinates, &params.canvas_bounds) {
                (CoordinateSpace::View, _) => p,
                (CoordinateSpace::Canvas, _) => viewport.point_from_canvas(p),
                (CoordinateSpace::Screen, Some(bounds)) => bounds.screen_to_view(p, &viewport),
                (CoordinateSpace::Screen, None) => p,
            }
        };

        let events = params
            .events
            .iter()
            .enumerate()
            .map(|(index, event)| {
                let (outcome, error) = match apply_event(&mut session, event, &to_view) {
                    Ok(outcome) => (outcome, None),
                    Err(e) => ("rejected".to_string(), Some(e.client_message())),
                };
                EventOutcome {
                    index,
                    outcome,
                    error,
                }
            })
            .collect();

        let fields = session
            .fields()
            .iter()
            .map(|f| {
                let view = f.rect();
                ProjectedField {
                    id: f.id.clone(),
                    name: f.name.clone(),
                    field_type: f.field_type,
                    page: f.page,
                    view,
                    canvas: viewport.to_canvas(&view),
                    user: pages.get(f.page as usize).map(|p| p.view_to_user(&view)),
                }
            })
            .collect();

        Ok(ProjectFieldsResult {
            source: resolved.source_name,
            scale: viewport.scale,
            pages: pages.iter().map(|p| PageView::new(p, &viewport)).collect(),
            fields,
            selected: session.selected().map(|f| f.id.clone()),
            events,
            schema: (!params.events.is_empty()).then(|| session.schema()),
            error: None,
        })
    }

    pub async fn process_create_surface_pdf(
        &self,
        params: &CreateSurfacePdfParams,
    ) -> crate::error::Result<CreateSurfacePdfResult> {
        let schema = Self::parse_schema(&params.schema, None)?;
        let resolved = self.resolve_source(&params.source)?;
        let options = SurfaceOptions {
            border_width: params.border_width.unwrap_or(1.0).max(0.0),
            need_appearances: params.need_appearances,
        };

        let data = resolved.data;
        let (output, report) =
            blocking(move || create_surface_pdf(&data, &schema, &options)).await?;

        let output_cache_key = self.cache_output(PdfKind::Surface, &output)?;
        let output_path = self.write_output(&params.output_path, &output)?;

        tracing::info!(
            fields = report.fields_added,
            skipped = report.fields_skipped.len(),
            "surface PDF created"
        );

        Ok(CreateSurfacePdfResult {
            source: resolved.source_name,
            output_cache_key,
            fields_added: report.fields_added,
            widgets_added: report.widgets_added,
            fields_skipped: report.fields_skipped,
            page_count: report.page_count,
            output_path,
            error: None,
        })
    }

    pub async fn process_fill_surface_pdf(
        &self,
        params: &FillSurfacePdfParams,
    ) -> crate::error::Result<FillSurfacePdfResult> {
        let resolved = self.resolve_source(&params.source)?;
        let options = FillOptions {
            embed_payload: params
                .embed_payload
                .then(|| Value::Object(params.values.clone())),
        };

        let data = resolved.data;
        let values = params.values.clone();
        let (output, report) =
            blocking(move || fill_surface_pdf(&data, &values, &options)).await?;

        let output_cache_key = self.cache_output(PdfKind::Filled, &output)?;
        let output_path = self.write_output(&params.output_path, &output)?;

        Ok(FillSurfacePdfResult {
            source: resolved.source_name,
            output_cache_key,
            fields_filled: report.fields_filled,
            fields_skipped: report.fields_skipped,
            missing_required: report.missing_required,
            payload_embedded: report.payload_embedded,
            output_path,
            error: None,
        })
    }

    pub async fn process_extract_form_fields(
        &self,
        source: &PdfSource,
    ) -> crate::error::Result<ExtractFormFieldsResult> {
        let resolved = self.resolve_source(source)?;
        let data = resolved.data;
        let fields = blocking(move || read_form_fields(&data)).await?;

        Ok(ExtractFormFieldsResult {
            source: resolved.source_name,
            total_fields: fields.len(),
            field_types: field_type_histogram(&fields),
            fields,
            error: None,
        })
    }

    pub async fn process_extract_form_schema(
        &self,
        source: &PdfSource,
    ) -> crate::error::Result<ExtractFormSchemaResult> {
        let resolved = self.resolve_source(source)?;
        let data = resolved.data;
        let schema = blocking(move || extract_schema(&data)).await?;

        Ok(ExtractFormSchemaResult {
            source: resolved.source_name,
            field_count: schema.fields.len(),
            schema,
            error: None,
        })
    }

    pub async fn process_extract_pdf_metadata(
        &self,
        source: &PdfSource,
    ) -> crate::error::Result<ExtractPdfMetadataResult> {
        let resolved = self.resolve_source(source)?;
        let data = resolved.data;
        let metadata = blocking(move || extract_pdf_metadata(&data)).await?;

        Ok(ExtractPdfMetadataResult {
            source: resolved.source_name,
            metadata: Some(metadata),
            error: None,
        })
    }

    pub async fn process_create_portfolio(
        &self,
        params: &CreatePortfolioParams,
    ) -> crate::error::Result<PortfolioSurfaceResult> {
        if params.name.trim().is_empty() {
            return Err(Error::InvalidPortfolio {
                reason: "name must not be empty".to_string(),
            });
        }
        let schema = Self::parse_schema(&params.schema, None)?;
        let base = Arc::new(self.resolve_source(&params.base)?.data);
        let base_cache_key = match &params.base {
            PdfSource::CacheRef { cache_key } => cache_key.clone(),
            _ => self.cache_output(PdfKind::Base, &base)?,
        };

        let (surface, report, schema) = self
            .build_surface(Arc::clone(&base), schema, params.border_width)
            .await?;
        let portfolio = self.portfolios.create(
            &params.name,
            StoredPdf::new(base_cache_key, base),
            surface,
            schema,
        )?;

        Ok(PortfolioSurfaceResult {
            portfolio: Some(PortfolioSummary::from(&portfolio)),
            base_cache_key: portfolio.base_cache_key,
            surface_cache_key: portfolio.surface_cache_key,
            fields_added: report.fields_added,
            widgets_added: report.widgets_added,
            fields_skipped: report.fields_skipped,
            error: None,
        })
    }

    pub async fn process_update_portfolio(
        &self,
        params: &UpdatePortfolioParams,
    ) -> crate::error::Result<PortfolioSurfaceResult> {
        let existing = self.portfolios.get(params.id)?;
        let schema = Self::parse_schema(&params.schema, None)?;

        let (surface, report, schema) = self
            .build_surface(existing.base_pdf, schema, params.border_width)
            .await?;
        let portfolio = self.portfolios.update_surface(params.id, surface, schema)?;

        Ok(PortfolioSurfaceResult {
            portfolio: Some(PortfolioSummary::from(&portfolio)),
            base_cache_key: portfolio.base_cache_key,
            surface_cache_key: portfolio.surface_cache_key,
            fields_added: report.fields_added,
            widgets_added: report.widgets_added,
            fields_skipped: report.fields_skipped,
            error: None,
        })
    }

    async fn build_surface(
        &self,
        base: Arc<Vec<u8>>,
        schema: FormSchema,
        border_width: Option<f32>,
    ) -> crate::error::Result<(StoredPdf, crate::pdf::SurfaceReport, FormSchema)> {
        let options = SurfaceOptions {
            border_width: border_width.unwrap_or(1.0).max(0.0),
            ..SurfaceOptions::default()
        };
        let (output, report, schema) = blocking(move || {
            let (output, report) = create_surface_pdf(base.as_slice(), &schema, &options)?;
            Ok((output, report, schema))
        })
        .await?;
        let key = self.cache_output(PdfKind::Surface, &output)?;
        Ok((StoredPdf::new(key, output), report, schema))
    }

    pub async fn process_submit_portfolio(
        &self,
        params: &SubmitPortfolioParams,
    ) -> crate::error::Result<SubmitPortfolioResult> {
        let portfolio = self.portfolios.get(params.id)?;
        if portfolio.status == crate::portfolio::PortfolioStatus::Archived {
            return Err(Error::PortfolioArchived { id: params.id });
        }
        let surface = portfolio.surface_pdf;

        let options = FillOptions {
            embed_payload: params
                .embed_payload
                .then(|| Value::Object(params.values.clone())),
        };
        let values = params.values.clone();
        let (output, report, metadata) = blocking(move || {
            let (output, report) = fill_surface_pdf(surface.as_slice(), &values, &options)?;
            let metadata = extract_pdf_metadata(&output).ok();
            Ok((output, report, metadata))
        })
        .await?;

        let filled_cache_key = self.cache_output(PdfKind::Filled, &output)?;
        let output_path = self.write_output(&params.output_path, &output)?;

        let submission = self.portfolios.record_submission(
            params.id,
            NewSubmission {
                filled_cache_key,
                form_data: params.values.clone(),
                form_metadata: metadata,
                missing_required: report.missing_required,
            },
        )?;

        Ok(SubmitPortfolioResult {
            portfolio_id: params.id,
            submission: Some(submission),
            fields_filled: report.fields_filled,
            fields_skipped: report.fields_skipped,
            output_path,
            error: None,
        })
    }

    pub async fn process_diagnose_portfolio(
        &self,
        params: &DiagnosePortfolioParams,
    ) -> crate::error::Result<DiagnosePortfolioResult> {
        let (mut diagnosis, surface) = match (params.id, &params.portfolio) {
            (Some(id), _) => {
                let portfolio = self.portfolios.get(id)?;
                let surface = Arc::clone(&portfolio.surface_pdf);
                let diagnosis = blocking(move || Ok(diagnose_registered(&portfolio))).await?;
                (diagnosis, Some(surface))
            }
            (None, Some(record)) => {
                let mut load_errors = Vec::new();
                let base = self.load_for_diagnosis(params.base.as_ref(), "Base", &mut load_errors);
                let surface =
                    self.load_for_diagnosis(params.surface.as_ref(), "Surface", &mut load_errors);

                let record = record.clone();
                let surface_data = surface.clone();
                let mut diagnosis = blocking(move || {
                    Ok(diagnose_portfolio(
                        &record,
                        base.as_deref().map(Vec::as_slice),
                        surface_data.as_deref().map(Vec::as_slice),
                    ))
                })
                .await?;
                if !load_errors.is_empty() {
                    diagnosis.valid = false;
                    diagnosis.errors.extend(load_errors);
                }
                (diagnosis, surface)
            }
            (None, None) => {
                return Err(Error::InvalidPortfolio {
                    reason: "either id or portfolio is required".to_string(),
                })
            }
        };

        let mut fill_test = None;
        let mut filled_cache_key = None;
        if params.test_fill {
            match surface {
                Some(surface) => {
                    let values = params.test_values.clone();
                    let trial =
                        blocking(move || Ok(trial_fill(surface.as_slice(), values.as_ref())))
                            .await?;
                    if let Some(filled) = &trial.filled {
                        filled_cache_key = Some(self.cache_output(PdfKind::Filled, filled)?);
                    }
                    fill_test = Some(trial);
                }
                None => diagnosis
                    .warnings
                    .push("No surface PDF to test filling".to_string()),
            }
        }

        Ok(DiagnosePortfolioResult {
            diagnosis: Some(diagnosis),
            fill_test,
            filled_cache_key,
            error: None,
        })
    }

    /// Resolve an optional source, recording a read failure instead of failing
    fn load_for_diagnosis(
        &self,
        source: Option<&PdfSource>,
        role: &str,
        errors: &mut Vec<String>,
    ) -> Option<Arc<Vec<u8>>> {
        match self.resolve_source(source?) {
            Ok(resolved) => Some(Arc::new(resolved.data)),
            Err(e) => {
                errors.push(format!("{} file could not be read: {}", role, e.client_message()));
                None
            }
        }
    }
}

/// Run CPU-bound PDF work off the async runtime
async fn blocking<T, F>(f: F) -> crate::error::Result<T>
where
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::MalformedPdf {
            reason: format!("Task join error: {}", e),
        })?
}

/// Apply one designer gesture and describe what happened
fn apply_event<F>(
    session: &mut DesignSession,
    event: &DesignEvent,
    to_view: &F,
) -> crate::error::Result<String>
where
    F: Fn(f32, f32) -> Point,
{
    Ok(match event {
        DesignEvent::BeginPlacing { field_type } => {
            session.begin_placing(*field_type);
            format!("placing {}", field_type)
        }
        DesignEvent::CancelPlacing => {
            session.cancel_placing();
            "idle".to_string()
        }
        DesignEvent::PointerDown { page, x, y } => {
            match session.pointer_down(*page, to_view(*x, *y))? {
                PointerOutcome::Placed(id) => format!("placed {}", id),
                PointerOutcome::DragStarted(id) => format!("dragging {}", id),
                PointerOutcome::ResizeStarted(id) => format!("resizing {}", id),
                PointerOutcome::Deselected => "deselected".to_string(),
            }
        }
        DesignEvent::PointerMove { x, y } => match session.pointer_move(to_view(*x, *y)) {
            Some(field) => format!("moved {}", field.id),
            None => "ignored".to_string(),
        },
        DesignEvent::PointerUp => {
            if session.pointer_up() {
                "changed".to_string()
            } else {
                "unchanged".to_string()
            }
        }
        DesignEvent::Select { id } => {
            session.select(id)?;
            format!("selected {}", id)
        }
        DesignEvent::Remove { id } => {
            session.remove(id)?;
            format!("removed {}", id)
        }
        DesignEvent::BringToFront { id } => {
            session.bring_to_front(id)?;
            format!("raised {}", id)
        }
        DesignEvent::Update {
            id,
            name,
            field_type,
            required,
            read_only,
            default_value,
            options,
            rect,
        } => {
            let patch = FieldPatch {
                name: name.clone(),
                field_type: *field_type,
                required: *required,
                read_only: *read_only,
                default_value: default_value.clone(),
                options: options.clone(),
                rect: *rect,
            };
            session.update(id, patch)?;
            format!("updated {}", id)
        }
    })
}

impl Default for PortfolioServer {
    fn default() -> Self {
        Self::new()
    }
}

#[tool_handler]
impl ServerHandler for PortfolioServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "PDF Portfolio Server designs form overlays for PDFs and fills them. \
                 Typical flow: get_page_info / render_page to lay out pages, project_fields to \
                 place and move fields, validate_form_schema, create_surface_pdf (or \
                 create_portfolio), then fill_surface_pdf (or submit_portfolio)."
                    .into(),
            ),
        }
    }
}

/// Run the MCP server with default configuration
pub async fn run_server() -> Result<()> {
    run_server_with_config(ServerConfig::default()).await
}

/// Run the MCP server with full configuration
pub async fn run_server_with_config(config: ServerConfig) -> Result<()> {
    tracing::info!(
        resource_dirs = config.resource_dirs.len(),
        cache_max_entries = config.cache_max_entries,
        "PDF Portfolio Server ready, waiting for connections..."
    );
    let server = PortfolioServer::with_config(config);

    let service = server.serve(rmcp::transport::io::stdio()).await?;
    service.waiting().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use lopdf::{dictionary, Document, Object, Stream};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashMap;

    fn blank_pdf(pages: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let mut kids: Vec<Object> = Vec::new();
        for _ in 0..pages {
            let content = doc.add_object(Stream::new(dictionary! {}, b"BT ET".to_vec()));
            let page = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content,
            });
            kids.push(page.into());
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
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    fn base64_source(data: &[u8]) -> PdfSource {
        PdfSource::Base64 {
            base64: base64::engine::general_purpose::STANDARD.encode(data),
        }
    }

    fn sample_schema() -> Value {
        json!({
            "fields": [
                {"id": "field_1", "name": "full_name", "type": "text",
                 "x": 72, "y": 100, "width": 200, "height": 20, "page": 0, "required": true},
                {"id": "field_2", "name": "agree", "type": "checkbox",
                 "x": 72, "y": 140, "width": 20, "height": 20, "page": 0},
                {"id": "field_3", "name": "size", "type": "radiobutton",
                 "x": 72, "y": 180, "width": 20, "height": 20, "page": 0, "options": ["small"]},
                {"id": "field_4", "name": "size", "type": "radiobutton",
                 "x": 112, "y": 180, "width": 20, "height": 20, "page": 0, "options": ["large"]},
                {"id": "field_5", "name": "later", "type": "text",
                 "x": 72, "y": 100, "width": 100, "height": 20, "page": 3}
            ]
        })
    }

    #[test]
    fn test_source_name() {
        assert_eq!(
            PortfolioServer::source_name(&PdfSource::Path {
                path: "/test.pdf".to_string()
            }),
            "/test.pdf"
        );
        assert_eq!(
            PortfolioServer::source_name(&PdfSource::Base64 {
                base64: "...".to_string()
            }),
            "<base64>"
        );
        assert_eq!(
            PortfolioServer::source_name(&PdfSource::CacheRef {
                cache_key: "abc123".to_string()
            }),
            "<cache:abc123>"
        );
    }

    #[test]
    fn test_pdf_source_deserialization() {
        let source: PdfSource = serde_json::from_str(r#"{"path": "/test.pdf"}"#).unwrap();
        assert!(matches!(source, PdfSource::Path { .. }));

        let source: PdfSource = serde_json::from_str(r#"{"base64": "JVBERi0xLjQ="}"#).unwrap();
        assert!(matches!(source, PdfSource::Base64 { .. }));

        let source: PdfSource = serde_json::from_str(r#"{"cache_key": "abc123"}"#).unwrap();
        assert!(matches!(source, PdfSource::CacheRef { .. }));

        let err = serde_json::from_str::<PdfSource>(r#"{"url": "https://example.com/a.pdf"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("cache_key"));
        assert!(serde_json::from_str::<PdfSource>(r#"{"path": 3}"#).is_err());
        assert!(serde_json::from_str::<PdfSource>(r#""a.pdf""#).is_err());
    }

    #[test]
    fn test_config_from_vars() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_CACHE_MAX_ENTRIES, "7"),
            (ENV_CACHE_MAX_BYTES, "not a number"),
            (ENV_MAX_SCALE, "4.5"),
            (ENV_OUTPUT_DIR, "/tmp/out"),
        ]);
        let config = ServerConfig::from_vars(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.cache_max_entries, 7);
        assert_eq!(config.cache_max_bytes, ServerConfig::default().cache_max_bytes);
        assert_eq!(config.max_render_scale, 4.5);
        assert_eq!(config.output_dir.as_deref(), Some("/tmp/out"));
        assert!(config.resource_dirs.is_empty());
    }

    #[test]
    fn test_config_rejects_non_positive_scale() {
        let config = ServerConfig::from_vars(|k| (k == ENV_MAX_SCALE).then(|| "-1".to_string()));
        assert_eq!(config.max_render_scale, 10.0);
    }

    #[test]
    fn test_parse_schema_accepts_string_and_reports_all_issues() {
        let schema = PortfolioServer::parse_schema(
            &Value::String(r#"{"fields": []}"#.to_string()),
            None,
        )
        .unwrap();
        assert!(schema.fields.is_empty());

        let err = PortfolioServer::parse_schema(
            &json!({"fields": [{"type": "slider", "x": "a", "y": 0, "width": 1, "height": 1}]}),
            None,
        )
        .unwrap_err();
        let Error::InvalidSchema { reason } = err else {
            panic!("expected schema error");
        };
        assert!(reason.contains("name"));
        assert!(reason.contains("slider"));
    }

    #[test]
    fn test_design_event_deserialization() {
        let events: Vec<DesignEvent> = serde_json::from_value(json!([
            {"action": "begin_placing", "field_type": "checkbox"},
            {"action": "pointer_down", "page": 0, "x": 10, "y": 20},
            {"action": "update", "id": "field_1", "required": true}
        ]))
        .unwrap();
        assert!(matches!(
            events[0],
            DesignEvent::BeginPlacing {
                field_type: FieldType::Checkbox
            }
        ));
        assert!(matches!(events[2], DesignEvent::Update { required: Some(true), .. }));
    }

    #[test]
    fn test_update_event_clears_default_and_moves_field() {
        let pages = vec![PageGeometry::new(0, PdfBox::letter(), 0)];
        let mut field = crate::form::FieldDescriptor::new(
            "field_1",
            "notes",
            FieldType::Text,
            0,
            Rect::new(10.0, 10.0, 100.0, 20.0),
        );
        field.default_value = Some("draft".to_string());
        let mut session = DesignSession::from_schema(pages, FormSchema::new(vec![field]));
        let identity = |x: f32, y: f32| Point::new(x, y);

        let untouched: DesignEvent =
            serde_json::from_value(json!({"action": "update", "id": "field_1", "required": true}))
                .unwrap();
        apply_event(&mut session, &untouched, &identity).unwrap();
        assert_eq!(session.fields()[0].default_value.as_deref(), Some("draft"));

        let change: DesignEvent = serde_json::from_value(json!({
            "action": "update",
            "id": "field_1",
            "default_value": null,
            "field_type": "listbox",
            "options": ["a", "b"],
            "rect": {"x": 600, "y": 50, "width": 40, "height": 30}
        }))
        .unwrap();
        assert_eq!(apply_event(&mut session, &change, &identity).unwrap(), "updated field_1");

        let field = &session.fields()[0];
        assert_eq!(field.default_value, None);
        assert_eq!(field.field_type, FieldType::Listbox);
        assert!(field.required);
        assert_eq!(field.rect(), Rect::new(572.0, 50.0, 40.0, 30.0));
    }

    #[tokio::test]
    async fn test_get_page_info_canvas_sizes() {
        let server = PortfolioServer::new();
        let result = server
            .process_get_page_info(&base64_source(&blank_pdf(2)), 2.0)
            .await
            .unwrap();
        assert_eq!(result.total_pages, 2);
        assert_eq!(result.pages[1].canvas_width, 1224);
        assert_eq!(result.pages[1].canvas_height, 1584);

        let err = server
            .process_get_page_info(&base64_source(&blank_pdf(1)), 50.0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidScale { .. }));
    }

    #[tokio::test]
    async fn test_validate_form_schema_with_source() {
        let server = PortfolioServer::new();
        let result = server
            .process_validate_form_schema(&ValidateFormSchemaParams {
                schema: sample_schema(),
                source: Some(base64_source(&blank_pdf(1))),
            })
            .await
            .unwrap();
        assert!(!result.valid);
        assert_eq!(result.page_count, Some(1));
        assert_eq!(result.field_count, 5);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].index, Some(4));
    }

    #[tokio::test]
    async fn test_project_fields_places_and_drags() {
        let server = PortfolioServer::new();
        let params: ProjectFieldsParams = serde_json::from_value(json!({
            "source": {"base64": base64::engine::general_purpose::STANDARD.encode(blank_pdf(1))},
            "scale": 2.0,
            "coordinates": "canvas",
            "events": [
                {"action": "begin_placing", "field_type": "text"},
                {"action": "pointer_down", "page": 0, "x": 200, "y": 200},
                {"action": "pointer_up"},
                {"action": "pointer_down", "page": 0, "x": 210, "y": 210},
                {"action": "pointer_move", "x": 310, "y": 410},
                {"action": "pointer_up"}
            ]
        }))
        .unwrap();

        let result = server.process_project_fields(&params).await.unwrap();
        assert_eq!(result.events[1].outcome, "placed field_1");
        assert_eq!(result.events[3].outcome, "dragging field_1");
        assert_eq!(result.events[5].outcome, "changed");

        let field = &result.fields[0];
        assert_eq!(field.view, Rect::new(150.0, 200.0, 100.0, 20.0));
        assert_eq!(field.canvas, Rect::new(300.0, 400.0, 200.0, 40.0));
        assert_eq!(field.user, Some(Rect::new(150.0, 572.0, 100.0, 20.0)));
        assert_eq!(result.selected.as_deref(), Some("field_1"));
        assert_eq!(result.schema.map(|s| s.fields.len()), Some(1));
    }

    #[tokio::test]
    async fn test_surface_then_fill_round_trip() {
        let server = PortfolioServer::new();
        let surface = server
            .process_create_surface_pdf(&CreateSurfacePdfParams {
                source: base64_source(&blank_pdf(1)),
                schema: sample_schema(),
                border_width: None,
                need_appearances: true,
                output_path: None,
            })
            .await
            .unwrap();
        assert_eq!(surface.fields_added, 3);
        assert_eq!(surface.widgets_added, 4);
        assert_eq!(surface.fields_skipped.len(), 1);
        assert_eq!(surface.fields_skipped[0].name, "later");

        let values = json!({"full_name": "Ada Lovelace", "agree": true, "size": "large", "ghost": "x"});
        let filled = server
            .process_fill_surface_pdf(&FillSurfacePdfParams {
                source: PdfSource::CacheRef {
                    cache_key: surface.output_cache_key.clone(),
                },
                values: values.as_object().cloned().unwrap(),
                embed_payload: true,
                output_path: None,
            })
            .await
            .unwrap();
        assert_eq!(filled.fields_filled, 3);
        assert_eq!(filled.fields_skipped.len(), 1);
        assert!(filled.missing_required.is_empty());
        assert!(filled.payload_embedded);

        let fields = server
            .process_extract_form_fields(&PdfSource::CacheRef {
                cache_key: filled.output_cache_key,
            })
            .await
            .unwrap();
        let by_name: HashMap<_, _> = fields.fields.iter().map(|f| (f.name.as_str(), f)).collect();
        assert_eq!(by_name["full_name"].value.as_deref(), Some("Ada Lovelace"));
        assert_eq!(by_name["agree"].is_checked, Some(true));
        assert_eq!(by_name["size"].value.as_deref(), Some("large"));
        assert_eq!(fields.field_types["radio_button"], 1);
    }

    #[tokio::test]
    async fn test_write_output_respects_sandbox() {
        let allowed = tempfile::tempdir().unwrap();
        let server = PortfolioServer::with_resource_dirs(vec![allowed
            .path()
            .to_string_lossy()
            .into_owned()]);

        let inside = allowed.path().join("nested/out.pdf");
        let written = server
            .write_output(&Some(inside.to_string_lossy().into_owned()), b"%PDF-1.7")
            .unwrap();
        assert!(written.is_some());
        assert_eq!(std::fs::read(&inside).unwrap(), b"%PDF-1.7");

        let outside = tempfile::tempdir().unwrap();
        let denied = server.write_output(
            &Some(outside.path().join("out.pdf").to_string_lossy().into_owned()),
            b"%PDF-1.7",
        );
        assert!(matches!(denied, Err(Error::PathAccessDenied { .. })));
    }

    #[tokio::test]
    async fn test_portfolio_lifecycle() {
        let server = PortfolioServer::new();
        let created = server
            .process_create_portfolio(&CreatePortfolioParams {
                name: "Intake".to_string(),
                base: base64_source(&blank_pdf(1)),
                schema: sample_schema(),
                border_width: Some(0.5),
            })
            .await
            .unwrap();
        let id = created.portfolio.as_ref().map(|p| p.id).unwrap();
        assert!(server.cache.contains(&created.base_cache_key));
        assert!(server.cache.contains(&created.surface_cache_key));

        let submitted = server
            .process_submit_portfolio(&SubmitPortfolioParams {
                id,
                values: json!({"agree": true}).as_object().cloned().unwrap(),
                embed_payload: true,
                output_path: None,
            })
            .await
            .unwrap();
        let submission = submitted.submission.unwrap();
        assert_eq!(
            submission.status,
            crate::portfolio::SubmissionStatus::Incomplete
        );
        assert_eq!(submission.missing_required, vec!["full_name".to_string()]);
        assert_eq!(
            submission.form_metadata.as_ref().map(|m| m.has_form),
            Some(true)
        );

        server.portfolios.archive(id).unwrap();
        let err = server
            .process_submit_portfolio(&SubmitPortfolioParams {
                id,
                values: Map::new(),
                embed_payload: false,
                output_path: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PortfolioArchived { .. }));
    }

    #[tokio::test]
    async fn test_portfolio_outlives_cache_eviction() {
        let server = PortfolioServer::with_config(ServerConfig {
            cache_max_entries: 3,
            ..ServerConfig::default()
        });
        let created = server
            .process_create_portfolio(&CreatePortfolioParams {
                name: "Intake".to_string(),
                base: base64_source(&blank_pdf(1)),
                schema: sample_schema(),
                border_width: None,
            })
            .await
            .unwrap();
        let id = created.portfolio.as_ref().map(|p| p.id).unwrap();

        let submit = || SubmitPortfolioParams {
            id,
            values: json!({"full_name": "Ada"}).as_object().cloned().unwrap(),
            embed_payload: false,
            output_path: None,
        };
        for _ in 0..5 {
            server.process_submit_portfolio(&submit()).await.unwrap();
        }
        assert!(!server.cache.contains(&created.base_cache_key));
        assert!(!server.cache.contains(&created.surface_cache_key));

        let updated = server
            .process_update_portfolio(&UpdatePortfolioParams {
                id,
                schema: sample_schema(),
                border_width: None,
            })
            .await
            .unwrap();
        assert_eq!(updated.base_cache_key, created.base_cache_key);
        assert_ne!(updated.surface_cache_key, created.surface_cache_key);

        let submitted = server.process_submit_portfolio(&submit()).await.unwrap();
        assert_eq!(submitted.fields_filled, 1);
        assert_eq!(server.portfolios.get(id).unwrap().submissions.len(), 6);
    }

    #[tokio::test]
    async fn test_diagnose_registered_portfolio_with_trial_fill() {
        let server = PortfolioServer::new();
        let created = server
            .process_create_portfolio(&CreatePortfolioParams {
                name: "Intake".to_string(),
                base: base64_source(&blank_pdf(1)),
                schema: sample_schema(),
                border_width: None,
            })
            .await
            .unwrap();
        let id = created.portfolio.as_ref().map(|p| p.id).unwrap();

        let result = server
            .process_diagnose_portfolio(&DiagnosePortfolioParams {
                id: Some(id),
                portfolio: None,
                base: None,
                surface: None,
                test_fill: true,
                test_values: None,
            })
            .await
            .unwrap();

        let diagnosis = result.diagnosis.unwrap();
        assert!(diagnosis.valid, "{:?}", diagnosis.errors);
        // The page 3 field was never injected into the one-page surface
        assert_eq!(
            diagnosis.warnings,
            vec!["Field count mismatch: Expected 4, found 3".to_string()]
        );
        assert_eq!(diagnosis.surface_file.and_then(|f| f.total_fields), Some(3));

        let trial = result.fill_test.unwrap();
        assert!(trial.success);
        assert_eq!(trial.fields_attempted, 3);
        assert_eq!(trial.fields_filled, 3);
        assert_eq!(trial.values["size"], json!("small"));
        let key = result.filled_cache_key.unwrap();
        assert!(server.cache.contains(&key));
    }

    #[tokio::test]
    async fn test_diagnose_record_collects_every_problem() {
        let server = PortfolioServer::new();
        let result = server
            .process_diagnose_portfolio(&DiagnosePortfolioParams {
                id: None,
                portfolio: Some(json!({
                    "name": "Intake",
                    "base_file_id": 1,
                    "surface_file_id": "two",
                    "fields": [{"name": "a", "type": "text", "x": -4, "y": 10, "width": 50, "height": 20}]
                })),
                base: Some(PdfSource::Path {
                    path: "/nonexistent/base.pdf".to_string(),
                }),
                surface: Some(base64_source(&blank_pdf(1))),
                test_fill: true,
                test_values: None,
            })
            .await
            .unwrap();

        let diagnosis = result.diagnosis.unwrap();
        assert!(!diagnosis.valid);
        assert_eq!(diagnosis.errors.len(), 4, "{:?}", diagnosis.errors);
        assert_eq!(diagnosis.errors[0], "surface_file_id must be an integer");
        assert_eq!(diagnosis.errors[1], "Field 'a' must not start before the page origin");
        assert_eq!(diagnosis.errors[2], "Surface PDF has no form fields");
        assert!(diagnosis.errors[3].starts_with("Base file could not be read"));
        assert_eq!(
            diagnosis.warnings,
            vec!["Field 'a' has invalid position: (-4, 10)".to_string()]
        );

        let trial = result.fill_test.unwrap();
        assert!(!trial.success);
        assert!(result.filled_cache_key.is_none());

        let err = server
            .process_diagnose_portfolio(&DiagnosePortfolioParams {
                id: None,
                portfolio: None,
                base: None,
                surface: None,
                test_fill: false,
                test_values: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPortfolio { .. }));
    }

    #[tokio::test]
    async fn test_create_portfolio_rejects_blank_name() {
        let server = PortfolioServer::new();
        let err = server
            .process_create_portfolio(&CreatePortfolioParams {
                name: " ".to_string(),
                base: base64_source(&blank_pdf(1)),
                schema: json!({"fields": []}),
                border_width: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPortfolio { .. }));
        assert!(server.portfolios.is_empty());
    }
}
