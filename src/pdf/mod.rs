//! PDF processing layer
//!
//! Object-level work (AcroForm injection, filling, inspection) goes through
//! lopdf; page rasterization goes through PDFium.

mod appearance;
mod fill;
mod inspect;
mod objects;
mod render;
mod surface;

pub use fill::{fill_surface_pdf, read_embedded_json, FillOptions, FillReport, PAYLOAD_FILE_NAME};
pub use inspect::{
    extract_pdf_metadata, extract_schema, field_type_histogram, page_geometries,
    read_form_fields, FieldCounts, FormFieldInfo, FormMetadata, PdfMetadataInfo,
};
pub use objects::FieldFlags;
pub use render::{render_page, RenderedPage, MAX_RENDER_PIXELS};
pub use surface::{create_surface_pdf, SkippedField, SurfaceOptions, SurfaceReport};
