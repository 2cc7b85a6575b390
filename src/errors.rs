use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;

/// Broad family of a failure, used to pick retry behaviour and presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connectivity, timeouts and rate limiting.
    Network,
    /// The remote service failed (5xx or unrecognised status).
    Remote,
    /// Input was rejected, locally or by the remote side.
    Validation,
    /// Credentials missing, invalid or refused.
    Auth,
    /// Authenticated but not allowed.
    Permission,
    /// The remote side understood the request and declined it.
    Business,
    /// Anything the classifier does not recognise.
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Remote => "remote",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Permission => "permission",
            ErrorCategory::Business => "business",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

/// How loudly a failure should be presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Normalized application error.
///
/// Every failure that reaches a caller is an `AppError`. Values are never
/// mutated after construction; the builder methods consume `self` and return
/// a new error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppError {
    pub message: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub retryable: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<BTreeMap<String, String>>,
}

impl AppError {
    /// Creates a new error stamped with the current time.
    ///
    /// # Arguments
    ///
    /// * `message` - Human-readable description.
    /// * `category` - Error family.
    /// * `severity` - Presentation level.
    /// * `retryable` - Whether repeating the same operation unchanged may succeed.
    pub fn new(
        message: impl Into<String>,
        category: ErrorCategory,
        severity: ErrorSeverity,
        retryable: bool,
    ) -> Self {
        Self {
            message: message.into(),
            category,
            severity,
            code: None,
            details: None,
            retryable,
            timestamp: Utc::now(),
            context: None,
        }
    }

    /// Local input rejected before any network call.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(message, ErrorCategory::Validation, ErrorSeverity::Low, false)
    }

    /// Unexpected local failure; never retried.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(message, ErrorCategory::Unknown, ErrorSeverity::Medium, false)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Returns a copy carrying an extra context entry.
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Short message suitable for showing to an end user.
    pub fn user_message(&self) -> &'static str {
        match self.category {
            ErrorCategory::Network => {
                "Could not reach the campaign service. Check your connection and try again."
            }
            ErrorCategory::Remote => "The campaign service is having problems. Try again later.",
            ErrorCategory::Validation => "Some of the data is invalid. Review it and try again.",
            ErrorCategory::Auth => "The campaign API key was rejected. Check your credentials.",
            ErrorCategory::Permission => "You do not have permission to perform this action.",
            ErrorCategory::Business => "The campaign service declined the request.",
            ErrorCategory::Unknown => "An unexpected error occurred.",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.category {
            ErrorCategory::Auth => StatusCode::UNAUTHORIZED,
            ErrorCategory::Permission => StatusCode::FORBIDDEN,
            ErrorCategory::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCategory::Network | ErrorCategory::Remote => StatusCode::BAD_GATEWAY,
            ErrorCategory::Business => StatusCode::CONFLICT,
            ErrorCategory::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} error [{}]: {}", self.category.as_str(), code, self.message),
            None => write!(f, "{} error: {}", self.category.as_str(), self.message),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Status is chosen from the category; the body never includes raw
    /// remote payloads.
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self.severity {
            ErrorSeverity::High | ErrorSeverity::Critical => {
                tracing::error!("Request failed: {}", self)
            }
            _ => tracing::warn!("Request failed: {}", self),
        }

        let body = Json(json!({
            "error": self.message,
            "category": self.category,
            "code": self.code,
            "retryable": self.retryable,
            "user_message": self.user_message(),
        }));

        (status, body).into_response()
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Arguments
    ///
    /// * `key` - Context key (e.g. `"campaign_id"`).
    /// * `value` - Context value.
    fn context(self, key: &str, value: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, key: &str, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, key: &str, value: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| e.with_context_entry(key, value))
    }

    fn with_context<F>(self, key: &str, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context_entry(key, f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_code() {
        let err = AppError::validation("email missing").with_code("MISSING_EMAIL");
        assert_eq!(err.to_string(), "validation error [MISSING_EMAIL]: email missing");
    }

    #[test]
    fn test_context_builds_new_value() {
        let original = AppError::unknown("boom");
        let result: Result<(), AppError> = Err(original.clone());
        let err = result.context("campaign_id", "cmp_1").unwrap_err();

        assert!(original.context.is_none());
        assert_eq!(
            err.context.unwrap().get("campaign_id").map(String::as_str),
            Some("cmp_1")
        );
    }

    #[test]
    fn test_status_mapping() {
        let auth = AppError::new("no", ErrorCategory::Auth, ErrorSeverity::High, false);
        assert_eq!(auth.into_response().status(), StatusCode::UNAUTHORIZED);

        let invalid = AppError::validation("bad");
        assert_eq!(
            invalid.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_severity_ordering() {
        assert!(ErrorSeverity::Low < ErrorSeverity::High);
        assert!(ErrorSeverity::High < ErrorSeverity::Critical);
    }
}
