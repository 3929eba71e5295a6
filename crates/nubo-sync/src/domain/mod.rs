//! Domain types for the sync protocol.
//!
//! Envelopes, wire errors, credentials, configuration and the stored rows.
//! Nothing here performs I/O.

pub mod config;
pub mod credential;
pub mod entities;
pub mod envelope;
pub mod error;

// Re-exports for convenience
pub use config::{ConfigError, ServerConfig};
pub use credential::{AuthToken, CredentialError, PasswordRecord};
pub use entities::{ComputerCredential, ComputerRecord, FileRecord, NewComputer, Timestamp};
pub use envelope::{RequestEnvelope, ResponseMap};
pub use error::{
    ArchiveError, CodecError, ErrorCode, NuboError, NuboResult, ServerError, StoreError,
};
