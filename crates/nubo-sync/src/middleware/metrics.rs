//! Request counters exposed on `/metrics`.

use crate::domain::error::ErrorCode;
use std::sync::atomic::{AtomicU64, Ordering};

/// Slots 1..=10 hold the known wire codes; slot 0 collects domain codes.
const ERROR_SLOTS: usize = 11;

/// Sync server metrics
#[derive(Default)]
pub struct SyncMetrics {
    // Request counters
    pub requests_total: AtomicU64,
    pub requests_success: AtomicU64,
    pub requests_error: AtomicU64,

    pub credentials_renewed: AtomicU64,
    pub oversized_rejected: AtomicU64,
    pub worker_failures: AtomicU64,

    errors_by_code: [AtomicU64; ERROR_SLOTS],

    // Latency tracking (simplified - in production use histograms)
    pub total_latency_ms: AtomicU64,
    pub request_count_for_latency: AtomicU64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a processed request
    pub fn record_request(&self, error: Option<ErrorCode>, latency_ms: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        match error {
            None => {
                self.requests_success.fetch_add(1, Ordering::Relaxed);
            }
            Some(code) => {
                self.requests_error.fetch_add(1, Ordering::Relaxed);
                self.errors_by_code[slot(code)].fetch_add(1, Ordering::Relaxed);
            }
        }

        self.total_latency_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
        self.request_count_for_latency
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_renewal(&self) {
        self.credentials_renewed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_oversized(&self) {
        self.oversized_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_failure(&self) {
        self.worker_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Errors reported with `code`.
    pub fn errors_for(&self, code: ErrorCode) -> u64 {
        self.errors_by_code[slot(code)].load(Ordering::Relaxed)
    }

    /// Get average latency in ms
    pub fn average_latency_ms(&self) -> f64 {
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        let count = self.request_count_for_latency.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        let errors: serde_json::Map<String, serde_json::Value> = [
            ErrorCode::Database,
            ErrorCode::IllFormed,
            ErrorCode::BadCommand,
            ErrorCode::MissingParameter,
            ErrorCode::Forbidden,
            ErrorCode::Storage,
            ErrorCode::Internal,
        ]
        .into_iter()
        .map(|code| (error_label(code).to_string(), self.errors_for(code).into()))
        .chain(std::iter::once((
            "domain".to_string(),
            self.errors_by_code[0].load(Ordering::Relaxed).into(),
        )))
        .collect();

        serde_json::json!({
            "requests": {
                "total": self.requests_total.load(Ordering::Relaxed),
                "success": self.requests_success.load(Ordering::Relaxed),
                "error": self.requests_error.load(Ordering::Relaxed),
            },
            "errors": errors,
            "credentials_renewed": self.credentials_renewed.load(Ordering::Relaxed),
            "oversized_rejected": self.oversized_rejected.load(Ordering::Relaxed),
            "worker_failures": self.worker_failures.load(Ordering::Relaxed),
            "latency": {
                "average_ms": self.average_latency_ms(),
            }
        })
    }
}

fn slot(code: ErrorCode) -> usize {
    match code.code() {
        c @ 1..=10 => c as usize,
        _ => 0,
    }
}

fn error_label(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::Database => "database",
        ErrorCode::IllFormed => "ill_formed",
        ErrorCode::BadCommand => "bad_command",
        ErrorCode::MissingParameter => "missing_parameter",
        ErrorCode::Forbidden => "forbidden",
        ErrorCode::Storage => "storage",
        ErrorCode::Internal => "internal",
        _ => "other",
    }
}
