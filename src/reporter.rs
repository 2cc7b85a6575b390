use crate::errors::{AppError, ErrorSeverity};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// How a reported error should be surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Presentation {
    /// Passive, non-blocking notice.
    Notice,
    /// Blocking alert that needs acknowledgement.
    Alert,
}

/// An error together with the presentation chosen for it.
#[derive(Debug, Clone, Serialize)]
pub struct ReportedError {
    pub error: AppError,
    pub presentation: Presentation,
    pub user_message: &'static str,
}

/// Error-reporting context shared by the client and its helpers.
///
/// Cheap to clone; clones share the same bounded log. Each component gets
/// its reporter injected at construction.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    log: Arc<Mutex<VecDeque<ReportedError>>>,
    capacity: usize,
}

impl ErrorReporter {
    pub fn new(capacity: usize) -> Self {
        Self {
            log: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity: capacity.max(1),
        }
    }

    /// Presentation is driven by severity alone.
    pub fn presentation(error: &AppError) -> Presentation {
        match error.severity {
            ErrorSeverity::Low | ErrorSeverity::Medium => Presentation::Notice,
            ErrorSeverity::High | ErrorSeverity::Critical => Presentation::Alert,
        }
    }

    /// Logs the error and appends it to the recent-errors log.
    pub fn report(&self, error: &AppError) {
        match error.severity {
            ErrorSeverity::Low => tracing::debug!("{}", error),
            ErrorSeverity::Medium => tracing::warn!("{}", error),
            ErrorSeverity::High | ErrorSeverity::Critical => tracing::error!("{}", error),
        }

        let entry = ReportedError {
            error: error.clone(),
            presentation: Self::presentation(error),
            user_message: error.user_message(),
        };

        let mut log = match self.log.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if log.len() == self.capacity {
            log.pop_front();
        }
        log.push_back(entry);
    }

    /// Most recent errors, oldest first.
    pub fn recent(&self) -> Vec<ReportedError> {
        let log = match self.log.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        log.iter().cloned().collect()
    }

    pub fn clear(&self) {
        let mut log = match self.log.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        log.clear();
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new(100)
    }
}
