//! Error types for PDF Portfolio Server

use thiserror::Error;

/// Result type alias for PDF Portfolio Server
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for PDF Portfolio Server
#[derive(Error, Debug)]
pub enum Error {
    /// PDF file not found
    #[error("PDF not found: {path}")]
    PdfNotFound { path: String },

    /// Invalid PDF file
    #[error("Invalid PDF file: {reason}")]
    InvalidPdf { reason: String },

    /// PDF is password protected and no password was provided
    #[error("PDF is password protected")]
    PasswordRequired,

    /// Page index out of bounds
    #[error("Page index {page} out of bounds (total: {total})")]
    PageOutOfBounds { page: u32, total: u32 },

    /// Form schema could not be parsed or failed validation
    #[error("Invalid form schema: {reason}")]
    InvalidSchema { reason: String },

    /// No field with the given id exists in the design session
    #[error("Field not found: {id}")]
    FieldNotFound { id: String },

    /// Zoom scale is not a finite positive number
    #[error("Invalid scale: {scale}")]
    InvalidScale { scale: f32 },

    /// Portfolio id is unknown
    #[error("Portfolio not found: {id}")]
    PortfolioNotFound { id: u64 },

    /// Portfolio request is missing required parts
    #[error("Invalid portfolio: {reason}")]
    InvalidPortfolio { reason: String },

    /// Portfolio exists but can no longer accept submissions
    #[error("Portfolio {id} is archived")]
    PortfolioArchived { id: u64 },

    /// Cache key not found
    #[error("Cache key not found: {key}")]
    CacheKeyNotFound { key: String },

    /// Generated PDF does not fit in the cache byte budget
    #[error("PDF of {bytes} bytes exceeds the cache budget")]
    CacheCapacity { bytes: usize },

    /// Base64 decode error
    #[error("Invalid base64 data: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// lopdf object-level error
    #[error("PDF object error: {0}")]
    Pdf(#[from] lopdf::Error),

    /// PDF structure does not match what the operation needs
    #[error("Malformed PDF structure: {reason}")]
    MalformedPdf { reason: String },

    /// PDFium error
    #[error("PDFium error: {reason}")]
    Pdfium { reason: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Path access denied (outside allowed resource directories)
    #[error("Path access denied: {path}")]
    PathAccessDenied { path: String },

    /// Image dimension exceeded
    #[error("Image dimension exceeded: {detail}")]
    ImageDimensionExceeded { detail: String },
}

impl Error {
    /// Return a sanitized error message safe to send to clients.
    /// Internal details (paths, library errors) are omitted.
    /// Full details should be logged via tracing before calling this.
    pub fn client_message(&self) -> String {
        match self {
            Error::PdfNotFound { .. } => "PDF not found".to_string(),
            Error::InvalidPdf { .. } => "Invalid PDF file".to_string(),
            Error::PasswordRequired => "PDF is password protected".to_string(),
            Error::PageOutOfBounds { page, total } => {
                format!("Page index {} out of bounds (total: {})", page, total)
            }
            Error::InvalidSchema { reason } => format!("Invalid form schema: {}", reason),
            Error::FieldNotFound { id } => format!("Field not found: {}", id),
            Error::InvalidScale { scale } => format!("Invalid scale: {}", scale),
            Error::PortfolioNotFound { id } => format!("Portfolio not found: {}", id),
            Error::InvalidPortfolio { reason } => format!("Invalid portfolio: {}", reason),
            Error::PortfolioArchived { id } => format!("Portfolio {} is archived", id),
            Error::CacheKeyNotFound { .. } => "Cache key not found".to_string(),
            Error::CacheCapacity { .. } => "PDF is too large to cache".to_string(),
            Error::Base64Decode(_) => "Invalid base64 data".to_string(),
            Error::Io(_) => "I/O error".to_string(),
            Error::Pdf(_) | Error::MalformedPdf { .. } => "PDF processing error".to_string(),
            Error::Pdfium { .. } => "PDF rendering error".to_string(),
            Error::Serialization(_) => "Serialization error".to_string(),
            Error::PathAccessDenied { .. } => "Access denied".to_string(),
            Error::ImageDimensionExceeded { detail } => {
                format!("Image dimension exceeded: {}", detail)
            }
        }
    }
}
