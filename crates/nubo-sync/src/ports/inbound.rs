//! # Inbound Ports (Driving Ports)
//!
//! The API the transport layer drives.

/// Processes one raw request body into one raw response body.
///
/// Implementations never fail: every error is reported inside the encoded
/// response envelope.
pub trait SyncApi: Send + Sync {
    fn process(&self, body: &[u8]) -> Vec<u8>;

    /// Encoded response carrying only the given error, for failures that
    /// happen before `process` can run (oversized body, worker crash).
    fn error_body(&self, error: &crate::domain::error::NuboError) -> Vec<u8>;
}
