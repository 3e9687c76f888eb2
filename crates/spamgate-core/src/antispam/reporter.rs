//! Operational error reporting

use spamgate_common::Severity;
use tracing::{error, info, warn};

/// Sink for operational errors. Reporting never fails.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, severity: Severity, code: u32, origin: &str, message: &str);
}

/// Reports errors as tracing events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, severity: Severity, code: u32, origin: &str, message: &str) {
        match severity {
            Severity::Critical | Severity::High => {
                error!(code, origin, severity = %severity, "{}", message)
            }
            Severity::Medium => warn!(code, origin, severity = %severity, "{}", message),
            Severity::Low => info!(code, origin, severity = %severity, "{}", message),
        }
    }
}
