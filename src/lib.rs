//! PDF Portfolio Server Library
//!
//! This crate provides MCP tools for laying form fields over existing PDFs:
//! - `project_fields`: Place, drag, and resize fields and map them between
//!   screen, canvas, and PDF coordinates
//! - `create_surface_pdf`: Inject a form schema into a base PDF as AcroForm widgets
//! - `fill_surface_pdf`: Fill the fields of a surface PDF
//! - `create_portfolio` / `submit_portfolio`: Pair base and surface PDFs and
//!   record filled submissions
//! - `diagnose_portfolio`: Check a portfolio's record and files, optionally
//!   with a timed trial fill

pub mod diagnostics;
pub mod error;
pub mod form;
pub mod pdf;
pub mod portfolio;
pub mod server;
pub mod source;

pub use error::{Error, Result};
pub use form::{DesignSession, FieldDescriptor, FieldType, FormSchema};
pub use portfolio::{Portfolio, PortfolioRegistry, Submission};
pub use server::{
    run_server, run_server_with_config, DesignEvent, PdfSource, PortfolioServer, ServerConfig,
};
