use crate::errors::AppError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Campaign as listed by the remote campaign service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "createdAt")]
    pub created_date: Option<String>,
    #[serde(default)]
    pub prospect_count: Option<u64>,
}

/// One prospect to push into a campaign.
///
/// `email` is the identity used for validation and duplicate detection;
/// everything else travels as payload.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportItem {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Custom variables, including generated content snippets.
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

impl ExportItem {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            first_name: None,
            last_name: None,
            company_name: None,
            phone: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Identity used for duplicate detection: trimmed, lowercased email.
    pub fn identity(&self) -> String {
        normalize_identity(&self.email)
    }
}

pub fn normalize_identity(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Lifecycle of a batch export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// A failed item of a batch, identified by its email.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportItemError {
    pub identity: String,
    pub error: AppError,
}

/// Aggregate outcome of a batch export.
///
/// `succeeded + failed` never exceeds `total`. Once `Completed`,
/// `succeeded + failed + skipped == total`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportResult {
    pub run_id: Uuid,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Items skipped because they already exist remotely or repeat within the batch.
    pub skipped: usize,
    pub status: ExportStatus,
    pub errors: Vec<ExportItemError>,
    /// Set only when the run could not proceed at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_error: Option<AppError>,
}

impl ExportResult {
    pub fn new(total: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            total,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            status: ExportStatus::Pending,
            errors: Vec::new(),
            pipeline_error: None,
        }
    }

    /// Items that reached a terminal outcome so far.
    pub fn resolved(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, ExportStatus::Completed | ExportStatus::Failed)
    }

    pub(crate) fn record_success(&mut self) {
        self.succeeded += 1;
    }

    pub(crate) fn record_failure(&mut self, identity: String, error: AppError) {
        self.failed += 1;
        self.errors.push(ExportItemError { identity, error });
    }

    pub(crate) fn record_skip(&mut self) {
        self.skipped += 1;
    }
}

/// Query parameters for `GET /api/v1/campaigns`.
#[derive(Debug, Default, Deserialize)]
pub struct CampaignListQuery {
    #[serde(default)]
    pub refresh: bool,
}

/// Body of `POST /api/v1/campaigns/:id/duplicates`.
#[derive(Debug, Deserialize)]
pub struct DuplicateCheckRequest {
    pub emails: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DuplicateCheckResponse {
    pub campaign_id: String,
    pub checked: usize,
    pub existing: Vec<String>,
}

/// Body of `POST /api/v1/campaigns/:id/exports`.
#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub items: Vec<ExportItem>,
}
