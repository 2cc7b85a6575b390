//! Turns raw transport failures into classified [`AppError`]s.
//!
//! `RawFailure` is the tagged result type at the transport boundary: a call
//! either yields its value or one of these variants, and [`classify`] is the
//! only place that decides what each variant means.

use crate::errors::{AppError, ErrorCategory, ErrorSeverity};
use serde_json::json;

/// Longest response body kept in `AppError::details`.
const MAX_BODY_DETAIL: usize = 512;

/// A failure as observed at the transport boundary, before classification.
#[derive(Debug, Clone)]
pub enum RawFailure {
    /// The remote answered with a non-success HTTP status.
    Response { status: u16, body: String },
    /// The request never completed (DNS, connect, reset, timeout).
    Network { message: String, timeout: bool },
    /// The remote answered 2xx but the body reports failure.
    Rejected {
        message: String,
        code: Option<String>,
    },
    /// A success response could not be decoded.
    Decode(String),
    /// Unexpected local failure.
    Local(String),
    /// Already classified; passed through unchanged.
    Classified(AppError),
}

impl From<reqwest::Error> for RawFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RawFailure::Decode(err.to_string())
        } else if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            RawFailure::Network {
                message: err.to_string(),
                timeout: err.is_timeout(),
            }
        } else if let Some(status) = err.status() {
            RawFailure::Response {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            RawFailure::Local(err.to_string())
        }
    }
}

impl From<AppError> for RawFailure {
    fn from(err: AppError) -> Self {
        RawFailure::Classified(err)
    }
}

/// Classifies a raw failure.
///
/// Rules are evaluated in order:
/// 1. 401/403 → auth, high, not retryable.
/// 2. other 4xx except 429 → validation, low, not retryable.
/// 3. 429 or any network failure → network, medium, retryable.
/// 4. 5xx or any other status → remote, high, retryable.
/// 5. 2xx rejection → business, medium, not retryable.
/// 6. everything else → unknown, medium, not retryable.
pub fn classify(raw: RawFailure) -> AppError {
    match raw {
        RawFailure::Classified(err) => err,
        RawFailure::Response { status, body } => classify_status(status, body),
        RawFailure::Network { message, timeout } => {
            let code = if timeout { "TIMEOUT" } else { "NETWORK_ERROR" };
            AppError::new(
                format!("Network failure: {}", message),
                ErrorCategory::Network,
                ErrorSeverity::Medium,
                true,
            )
            .with_code(code)
        }
        RawFailure::Rejected { message, code } => AppError::new(
            message,
            ErrorCategory::Business,
            ErrorSeverity::Medium,
            false,
        )
        .with_code(code.unwrap_or_else(|| "REJECTED".to_string())),
        RawFailure::Decode(message) => AppError::unknown(format!(
            "Failed to decode remote response: {}",
            message
        ))
        .with_code("DECODE_ERROR"),
        RawFailure::Local(message) => AppError::unknown(message).with_code("UNEXPECTED"),
    }
}

fn classify_status(status: u16, body: String) -> AppError {
    let (category, severity, retryable, code) = match status {
        401 | 403 => (
            ErrorCategory::Auth,
            ErrorSeverity::High,
            false,
            format!("HTTP_{}", status),
        ),
        429 => (
            ErrorCategory::Network,
            ErrorSeverity::Medium,
            true,
            "RATE_LIMITED".to_string(),
        ),
        400..=499 => (
            ErrorCategory::Validation,
            ErrorSeverity::Low,
            false,
            format!("HTTP_{}", status),
        ),
        _ => (
            ErrorCategory::Remote,
            ErrorSeverity::High,
            true,
            format!("HTTP_{}", status),
        ),
    };

    let mut err = AppError::new(
        format!("Campaign service returned {}", status),
        category,
        severity,
        retryable,
    )
    .with_code(code);

    let trimmed = body.trim();
    if !trimmed.is_empty() {
        let detail: String = trimmed.chars().take(MAX_BODY_DETAIL).collect();
        err = err.with_details(json!({ "status": status, "body": detail }));
    }

    err
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16) -> RawFailure {
        RawFailure::Response {
            status,
            body: String::new(),
        }
    }

    #[test]
    fn test_auth_statuses() {
        for status in [401, 403] {
            let err = classify(response(status));
            assert_eq!(err.category, ErrorCategory::Auth);
            assert_eq!(err.severity, ErrorSeverity::High);
            assert!(!err.retryable);
        }
    }

    #[test]
    fn test_client_errors_are_validation() {
        for status in [400, 404, 409, 422] {
            let err = classify(response(status));
            assert_eq!(err.category, ErrorCategory::Validation);
            assert_eq!(err.severity, ErrorSeverity::Low);
            assert!(!err.retryable);
        }
    }

    #[test]
    fn test_rate_limit_is_retryable_network() {
        let err = classify(response(429));
        assert_eq!(err.category, ErrorCategory::Network);
        assert_eq!(err.code.as_deref(), Some("RATE_LIMITED"));
        assert!(err.retryable);
    }

    #[test]
    fn test_server_errors_are_retryable() {
        let err = classify(RawFailure::Response {
            status: 503,
            body: "Service Unavailable".to_string(),
        });
        assert_eq!(err.category, ErrorCategory::Remote);
        assert_eq!(err.severity, ErrorSeverity::High);
        assert!(err.retryable);
        assert_eq!(err.details.unwrap()["body"], "Service Unavailable");
    }

    #[test]
    fn test_timeout() {
        let err = classify(RawFailure::Network {
            message: "deadline elapsed".to_string(),
            timeout: true,
        });
        assert_eq!(err.category, ErrorCategory::Network);
        assert_eq!(err.code.as_deref(), Some("TIMEOUT"));
        assert!(err.retryable);
    }

    #[test]
    fn test_rejection_is_business() {
        let err = classify(RawFailure::Rejected {
            message: "Lead already in another campaign".to_string(),
            code: None,
        });
        assert_eq!(err.category, ErrorCategory::Business);
        assert!(!err.retryable);
    }

    #[test]
    fn test_unexpected_failures_fail_closed() {
        let err = classify(RawFailure::Local("poisoned".to_string()));
        assert_eq!(err.category, ErrorCategory::Unknown);
        assert!(!err.retryable);

        let err = classify(RawFailure::Decode("expected array".to_string()));
        assert_eq!(err.code.as_deref(), Some("DECODE_ERROR"));
        assert!(!err.retryable);
    }

    #[test]
    fn test_classified_passes_through() {
        let original = AppError::validation("bad email").with_code("INVALID_EMAIL");
        assert_eq!(classify(original.clone().into()), original);
    }

    #[test]
    fn test_long_body_is_trimmed() {
        let err = classify(RawFailure::Response {
            status: 500,
            body: "x".repeat(2000),
        });
        let body = err.details.unwrap()["body"].as_str().unwrap().len();
        assert_eq!(body, MAX_BODY_DETAIL);
    }
}
