//! Form design model
//!
//! Field descriptors, coordinate spaces, validation, and the designer's
//! placement/drag/resize state machine. Nothing here touches PDF bytes.

pub mod designer;
pub mod field;
pub mod geometry;
pub mod validate;

pub use designer::{DesignSession, FieldPatch, Interaction, Mode, PointerOutcome};
pub use field::{FieldDescriptor, FieldType, FormSchema, Rgb};
pub use geometry::{CanvasBounds, PageGeometry, PdfBox, Point, Rect, Viewport};
pub use validate::{
    parse_checked, validate_portfolio_value, validate_schema, validate_schema_value,
    ValidationIssue, ValidationReport,
};
