//! Out-of-band error channel.
//!
//! Delivery failures happen on worker threads, during shutdown or under
//! memory pressure: places where the host cannot be entered. They are pushed
//! here instead (and logged), and the host drains them at its own pace.

use crate::error::ErrorCode;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// One reported failure
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    /// Category
    pub code: ErrorCode,
    /// Message in the engine callback's wording
    pub message: String,
    /// Opaque cookie of the callback that failed, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie: Option<usize>,
    /// When the failure was reported
    pub at: DateTime<Utc>,
}

/// Bounded, lock-protected error side channel
pub struct ErrorReporter {
    reports: Mutex<VecDeque<ErrorReport>>,
    capacity: usize,
    overflowed: AtomicU64,
}

impl ErrorReporter {
    /// Create a reporter retaining at most `capacity` reports
    pub fn new(capacity: usize) -> Self {
        Self {
            reports: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity: capacity.max(1),
            overflowed: AtomicU64::new(0),
        }
    }

    /// Record a failure. Never blocks on the host; oldest reports are evicted when full.
    pub fn report(&self, code: ErrorCode, message: impl Into<String>, cookie: Option<usize>) {
        let message = message.into();
        warn!(code = %code, cookie = ?cookie, "{}", message);

        let mut reports = self.reports.lock();
        if reports.len() >= self.capacity {
            reports.pop_front();
            self.overflowed.fetch_add(1, Ordering::Relaxed);
        }
        reports.push_back(ErrorReport {
            code,
            message,
            cookie,
            at: Utc::now(),
        });
    }

    /// Take all pending reports, oldest first
    pub fn drain(&self) -> Vec<ErrorReport> {
        self.reports.lock().drain(..).collect()
    }

    /// Number of pending reports
    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    /// Whether no reports are pending
    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }

    /// Reports evicted because the channel was full
    pub fn overflowed(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_and_drain() {
        let reporter = ErrorReporter::new(8);
        reporter.report(ErrorCode::ResourceExhausted, "out of memory", Some(7));
        reporter.report(ErrorCode::HostUnavailable, "gone", None);

        assert_eq!(reporter.len(), 2);
        let reports = reporter.drain();
        assert_eq!(reports[0].message, "out of memory");
        assert_eq!(reports[0].cookie, Some(7));
        assert_eq!(reports[1].code, ErrorCode::HostUnavailable);
        assert!(reporter.is_empty());
    }

    #[test]
    fn test_oldest_evicted_when_full() {
        let reporter = ErrorReporter::new(2);
        for i in 0..5 {
            reporter.report(ErrorCode::InternalError, format!("r{}", i), None);
        }
        let reports = reporter.drain();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].message, "r3");
        assert_eq!(reporter.overflowed(), 3);
    }

    #[test]
    fn test_report_from_many_threads() {
        let reporter = std::sync::Arc::new(ErrorReporter::new(1000));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let reporter = std::sync::Arc::clone(&reporter);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        reporter.report(ErrorCode::InternalError, format!("{}-{}", t, i), None);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reporter.len(), 200);
    }
}
