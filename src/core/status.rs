//! Status reporting and logging setup.
//!
//! Non-fatal conditions flow out through a user callback. Every report is
//! also emitted as a `tracing` event so a subscriber sees the same stream.

use std::fmt;
use std::sync::Arc;

use super::object::Handle;
use crate::util::DataType;

/// Severity of a status report, most severe first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    FatalError,
    Error,
    Warning,
    PerformanceWarning,
    Info,
    Debug,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FatalError => "FATAL",
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::PerformanceWarning => "PERFORMANCE",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
        };
        f.write_str(s)
    }
}

/// One status report.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusMessage {
    pub severity: Severity,
    /// Object the report concerns, if any
    pub source: Option<Handle>,
    pub source_kind: DataType,
    pub message: String,
}

/// Receiver of status reports. Called from whichever thread reports.
pub type StatusCallback = Arc<dyn Fn(&StatusMessage) + Send + Sync>;

/// Mirror a report into the tracing stream.
pub(crate) fn trace_status(msg: &StatusMessage) {
    let handle = msg.source.map(|h| h.id()).unwrap_or(0);
    let kind = msg.source_kind.name();
    match msg.severity {
        Severity::FatalError | Severity::Error => {
            tracing::error!(handle, kind, "{}", msg.message)
        }
        Severity::Warning | Severity::PerformanceWarning => {
            tracing::warn!(handle, kind, severity = %msg.severity, "{}", msg.message)
        }
        Severity::Info => tracing::info!(handle, kind, "{}", msg.message),
        Severity::Debug => tracing::debug!(handle, kind, "{}", msg.message),
    }
}

/// Install a fmt subscriber filtered by `RUST_LOG` (default `prism=info`).
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("prism=info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order() {
        assert!(Severity::FatalError < Severity::Warning);
        assert!(Severity::Warning < Severity::Debug);
        assert_eq!(Severity::PerformanceWarning.to_string(), "PERFORMANCE");
    }

    #[test]
    fn test_init_logging_twice() {
        init_logging();
        init_logging();
        trace_status(&StatusMessage {
            severity: Severity::Warning,
            source: None,
            source_kind: DataType::Unknown,
            message: "still fine".into(),
        });
    }
}
