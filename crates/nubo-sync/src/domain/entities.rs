//! Rows kept by the persistent store.

/// Seconds since the Unix epoch.
pub type Timestamp = i64;

/// Config keys in `tbl_config`.
pub mod config_keys {
    pub const PASSWORD: &str = "password";
    pub const SALT: &str = "salt";
}

/// Credential columns of a registered computer, looked up by selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputerCredential {
    pub computer_id: i64,
    pub selector: String,
    /// Hex SHA-256 of the current validator. `None` once revoked.
    pub validator_digest: Option<String>,
}

/// A computer registration as listed by the admin surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputerRecord {
    pub computer_id: i64,
    pub hostname: String,
    pub computer: String,
    /// Last successful authentication.
    pub atime: Option<Timestamp>,
    /// False after a failed validator check cleared the credential.
    pub authorized: bool,
}

/// Registration written by `init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComputer {
    pub hostname: String,
    pub computer: String,
    pub selector: String,
    pub validator_digest: String,
    pub atime: Timestamp,
}

/// A synchronised file entry. Directories have an empty hash and no archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub file_id: i64,
    pub filename: String,
    pub hash: String,
    pub mtime: i64,
}

impl FileRecord {
    pub fn is_directory(&self) -> bool {
        self.hash.is_empty()
    }
}
