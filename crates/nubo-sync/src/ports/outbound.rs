//! # Outbound Ports (Driven Ports)
//!
//! Dependencies required by the dispatcher and the command handlers.
//!
//! Production adapters live in `crate::adapters` (`SqliteStoreProvider`,
//! `FsArchiveStorage`, `MsgpackCodec`); in-memory adapters for tests live in
//! `crate::adapters::memory`.

use crate::domain::credential::CredentialError;
use crate::domain::entities::{
    ComputerCredential, ComputerRecord, FileRecord, NewComputer, Timestamp,
};
use crate::domain::envelope::RequestEnvelope;
use crate::domain::error::{ArchiveError, CodecError, StoreError};
use rand::RngCore;
use rmpv::Value;

/// Converts request bodies to values and responses back to bytes.
pub trait EnvelopeCodec: Send + Sync {
    /// Decodes the first value of `body`. Trailing bytes are ignored.
    fn decode(&self, body: &[u8]) -> Result<Value, CodecError>;

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;

    /// MIME type of the encoded body.
    fn content_type(&self) -> &'static str;

    /// Decodes and validates the request envelope shape.
    fn decode_request(&self, body: &[u8]) -> Result<RequestEnvelope, CodecError> {
        RequestEnvelope::from_value(self.decode(body)?)
    }
}

/// Opens request-scoped store handles.
pub trait StoreProvider: Send + Sync {
    /// Opens an existing, installed store.
    fn open(&self) -> Result<Box<dyn SyncStore>, StoreError>;

    /// Whether a store has been installed.
    fn is_installed(&self) -> bool;

    /// Creates a fresh store with an empty schema. Fails if one exists.
    fn install(&self) -> Result<Box<dyn SyncStore>, StoreError>;

    /// Removes an installed store. Used to undo a failed install.
    fn uninstall(&self) -> Result<(), StoreError>;
}

/// A store handle, valid for one request.
///
/// `close` must be idempotent and roll back a transaction left open.
pub trait SyncStore: Send {
    fn begin(&mut self) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;
    fn rollback(&mut self) -> Result<(), StoreError>;

    // Server configuration (`tbl_config`)
    fn config_value(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn set_config_value(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    // Computer registrations (`tbl_computer`)
    fn find_computer_by_selector(
        &self,
        selector: &str,
    ) -> Result<Option<ComputerCredential>, StoreError>;
    fn register_computer(&mut self, computer: &NewComputer) -> Result<i64, StoreError>;
    /// Returns the number of registrations removed.
    fn delete_computer_by_name(&mut self, computer: &str) -> Result<usize, StoreError>;
    fn update_validator(
        &mut self,
        computer_id: i64,
        validator_digest: &str,
        atime: Timestamp,
    ) -> Result<(), StoreError>;
    /// Clears selector and validator so the computer must run `init` again.
    fn revoke_credentials(&mut self, computer_id: i64) -> Result<(), StoreError>;
    fn delete_computer(&mut self, computer_id: i64) -> Result<bool, StoreError>;
    /// Ordered by hostname, then most recent access first.
    fn list_computers(&self) -> Result<Vec<ComputerRecord>, StoreError>;

    // File rows (`tbl_file`)
    /// Ordered by file name.
    fn list_files(&self) -> Result<Vec<FileRecord>, StoreError>;
    fn find_file(&self, filename: &str) -> Result<Option<FileRecord>, StoreError>;
    fn find_file_by_id(&self, file_id: i64) -> Result<Option<FileRecord>, StoreError>;
    fn insert_file(&mut self, filename: &str, hash: &str, mtime: i64) -> Result<i64, StoreError>;
    fn update_file(&mut self, file_id: i64, hash: &str, mtime: i64) -> Result<(), StoreError>;
    fn delete_file(&mut self, file_id: i64) -> Result<bool, StoreError>;

    /// Releases the handle.
    fn close(&mut self);
    fn is_closed(&self) -> bool;
}

/// File content storage, keyed by `tbl_file.file_id`.
pub trait ArchiveStorage: Send + Sync {
    fn write(&self, file_id: i64, content: &[u8]) -> Result<(), ArchiveError>;
    fn read(&self, file_id: i64) -> Result<Vec<u8>, ArchiveError>;
    fn remove(&self, file_id: i64) -> Result<(), ArchiveError>;
}

/// Validates presented credentials and issues their replacements.
///
/// Never sees the command name or its parameters.
pub trait CredentialManager: Send + Sync {
    /// Checks `credential` and returns the renewed one.
    fn refresh(&self, store: &mut dyn SyncStore, credential: &Value)
        -> Result<Value, CredentialError>;

    /// Registers a computer and returns its first credential.
    fn issue(
        &self,
        store: &mut dyn SyncStore,
        computer: &str,
        hostname: &str,
    ) -> Result<Value, CredentialError>;
}

/// Abstract interface for time operations (for testability).
pub trait TimeSource: Send + Sync {
    /// Get current timestamp in seconds since epoch.
    fn now(&self) -> Timestamp;
}

/// Source of random token material.
pub trait TokenSource: Send + Sync {
    /// `len` random bytes, lowercase hex encoded.
    fn hex_token(&self, len: usize) -> String;
}

// =============================================================================
// DEFAULT IMPLEMENTATIONS
// =============================================================================

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp()
    }
}

/// Thread-local CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomTokenSource;

impl TokenSource for RandomTokenSource {
    fn hex_token(&self, len: usize) -> String {
        let mut bytes = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}
