//! Portfolios: a base PDF paired with its surface PDF, the design that
//! produced it, and the submissions filled from it
//!
//! The registry is in-memory. Each portfolio owns its base and surface
//! bytes; the cache keys handed to clients are a convenience and may be
//! evicted without affecting the portfolio.

use crate::error::{Error, Result};
use crate::form::field::FormSchema;
use crate::pdf::FormMetadata;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortfolioStatus {
    Active,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    /// Every required field has a value
    Complete,
    /// Filled, but some required fields are still empty
    Incomplete,
}

/// One filled copy of a portfolio's surface PDF
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub id: u64,
    pub filled_cache_key: String,
    pub form_data: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_metadata: Option<FormMetadata>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_required: Vec<String>,
    pub submitted_at: DateTime<Utc>,
    pub status: SubmissionStatus,
}

/// What a caller supplies when recording a submission
#[derive(Debug, Clone, Default)]
pub struct NewSubmission {
    pub filled_cache_key: String,
    pub form_data: Map<String, Value>,
    pub form_metadata: Option<FormMetadata>,
    pub missing_required: Vec<String>,
}

/// A PDF owned by a portfolio together with the cache key it was published
/// under
#[derive(Debug, Clone)]
pub struct StoredPdf {
    pub cache_key: String,
    pub data: Arc<Vec<u8>>,
}

impl StoredPdf {
    pub fn new(cache_key: impl Into<String>, data: impl Into<Arc<Vec<u8>>>) -> Self {
        Self {
            cache_key: cache_key.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Portfolio {
    pub id: u64,
    pub name: String,
    pub base_cache_key: String,
    pub surface_cache_key: String,
    #[serde(skip)]
    pub base_pdf: Arc<Vec<u8>>,
    #[serde(skip)]
    pub surface_pdf: Arc<Vec<u8>>,
    pub schema: FormSchema,
    pub status: PortfolioStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submissions: Vec<Submission>,
}

/// Listing entry without the schema and submission bodies
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSummary {
    pub id: u64,
    pub name: String,
    pub status: PortfolioStatus,
    pub field_count: usize,
    pub submission_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Portfolio> for PortfolioSummary {
    fn from(p: &Portfolio) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            status: p.status,
            field_count: p.schema.fields.len(),
            submission_count: p.submissions.len(),
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    last_portfolio_id: u64,
    last_submission_id: u64,
    portfolios: BTreeMap<u64, Portfolio>,
}

/// Thread-safe portfolio store shared by every tool call
#[derive(Default)]
pub struct PortfolioRegistry {
    inner: RwLock<RegistryInner>,
}

impl PortfolioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &self,
        name: &str,
        base: StoredPdf,
        surface: StoredPdf,
        schema: FormSchema,
    ) -> Result<Portfolio> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidPortfolio {
                reason: "name must not be empty".to_string(),
            });
        }

        let mut inner = self.inner.write();
        inner.last_portfolio_id += 1;
        let now = Utc::now();
        let portfolio = Portfolio {
            id: inner.last_portfolio_id,
            name: name.to_string(),
            base_cache_key: base.cache_key,
            surface_cache_key: surface.cache_key,
            base_pdf: base.data,
            surface_pdf: surface.data,
            schema,
            status: PortfolioStatus::Active,
            created_at: now,
            updated_at: now,
            submissions: Vec::new(),
        };
        inner.portfolios.insert(portfolio.id, portfolio.clone());

        tracing::info!(portfolio = portfolio.id, name = %portfolio.name, "portfolio created");
        Ok(portfolio)
    }

    pub fn get(&self, id: u64) -> Result<Portfolio> {
        self.inner
            .read()
            .portfolios
            .get(&id)
            .cloned()
            .ok_or(Error::PortfolioNotFound { id })
    }

    /// Every portfolio, oldest first
    pub fn list(&self) -> Vec<PortfolioSummary> {
        self.inner
            .read()
            .portfolios
            .values()
            .map(PortfolioSummary::from)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().portfolios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting submissions; archiving twice is a no-op
    pub fn archive(&self, id: u64) -> Result<Portfolio> {
        self.modify(id, |p| {
            if p.status != PortfolioStatus::Archived {
                p.status = PortfolioStatus::Archived;
                p.updated_at = Utc::now();
            }
            Ok(())
        })
    }

    /// Replace the surface PDF after the design was edited
    pub fn update_surface(
        &self,
        id: u64,
        surface: StoredPdf,
        schema: FormSchema,
    ) -> Result<Portfolio> {
        self.modify(id, |p| {
            ensure_active(p)?;
            p.surface_cache_key = surface.cache_key;
            p.surface_pdf = surface.data;
            p.schema = schema;
            p.updated_at = Utc::now();
            Ok(())
        })
    }

    pub fn record_submission(&self, id: u64, new: NewSubmission) -> Result<Submission> {
        let mut inner = self.inner.write();
        let submission_id = inner.last_submission_id + 1;
        let portfolio = inner
            .portfolios
            .get_mut(&id)
            .ok_or(Error::PortfolioNotFound { id })?;
        ensure_active(portfolio)?;

        let status = if new.missing_required.is_empty() {
            SubmissionStatus::Complete
        } else {
            SubmissionStatus::Incomplete
        };
        let submission = Submission {
            id: submission_id,
            filled_cache_key: new.filled_cache_key,
            form_data: new.form_data,
            form_metadata: new.form_metadata,
            missing_required: new.missing_required,
            submitted_at: Utc::now(),
            status,
        };
        portfolio.submissions.push(submission.clone());
        portfolio.updated_at = submission.submitted_at;
        inner.last_submission_id = submission_id;

        tracing::info!(
            portfolio = id,
            submission = submission_id,
            complete = status == SubmissionStatus::Complete,
            "submission recorded"
        );
        Ok(submission)
    }

    fn modify<F>(&self, id: u64, f: F) -> Result<Portfolio>
    where
        F: FnOnce(&mut Portfolio) -> Result<()>,
    {
        let mut inner = self.inner.write();
        let portfolio = inner
            .portfolios
            .get_mut(&id)
            .ok_or(Error::PortfolioNotFound { id })?;
        f(portfolio)?;
        Ok(portfolio.clone())
    }
}

fn ensure_active(portfolio: &Portfolio) -> Result<()> {
    match portfolio.status {
        PortfolioStatus::Active => Ok(()),
        PortfolioStatus::Archived => Err(Error::PortfolioArchived { id: portfolio.id }),
    }
}
