//! Wire error codes and the error types that cross the dispatcher boundary.
//!
//! Every failure ends up as a [`NuboError`], which the dispatcher turns into
//! `error` / `message` / `detail` fields of the response envelope. Transport
//! status is never used to report these.

use crate::domain::envelope::ResponseMap;
use rmpv::Value;
use std::fmt;

/// Stable wire error codes. Clients match on these integers.
pub mod codes {
    pub const DATABASE: i64 = 1;
    pub const ILL_FORMED: i64 = 2;
    pub const BAD_COMMAND: i64 = 3;
    pub const MISSING_PARAMETER: i64 = 4;
    pub const FORBIDDEN: i64 = 5;
    pub const STORAGE: i64 = 6;
    pub const MSGPACK: i64 = 7;
    pub const INTERNAL: i64 = 8;
    pub const API_OLD_CLIENT: i64 = 9;
    pub const API_OLD_SERVER: i64 = 10;
}

/// Error kind as it appears on the wire.
///
/// The known variants are fixed; `Domain` carries any other code raised by a
/// command handler, so the set stays open for new commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Database,
    IllFormed,
    BadCommand,
    MissingParameter,
    Forbidden,
    Storage,
    /// Reserved. Undecodable bodies are reported as `IllFormed`.
    Msgpack,
    Internal,
    /// Reserved for protocol versioning.
    ApiOldClient,
    /// Reserved for protocol versioning.
    ApiOldServer,
    Domain(i64),
}

impl ErrorCode {
    /// Integer sent in the `error` field.
    pub const fn code(&self) -> i64 {
        match self {
            ErrorCode::Database => codes::DATABASE,
            ErrorCode::IllFormed => codes::ILL_FORMED,
            ErrorCode::BadCommand => codes::BAD_COMMAND,
            ErrorCode::MissingParameter => codes::MISSING_PARAMETER,
            ErrorCode::Forbidden => codes::FORBIDDEN,
            ErrorCode::Storage => codes::STORAGE,
            ErrorCode::Msgpack => codes::MSGPACK,
            ErrorCode::Internal => codes::INTERNAL,
            ErrorCode::ApiOldClient => codes::API_OLD_CLIENT,
            ErrorCode::ApiOldServer => codes::API_OLD_SERVER,
            ErrorCode::Domain(code) => *code,
        }
    }

    /// Inverse of [`ErrorCode::code`].
    pub const fn from_code(code: i64) -> Self {
        match code {
            codes::DATABASE => ErrorCode::Database,
            codes::ILL_FORMED => ErrorCode::IllFormed,
            codes::BAD_COMMAND => ErrorCode::BadCommand,
            codes::MISSING_PARAMETER => ErrorCode::MissingParameter,
            codes::FORBIDDEN => ErrorCode::Forbidden,
            codes::STORAGE => ErrorCode::Storage,
            codes::MSGPACK => ErrorCode::Msgpack,
            codes::INTERNAL => ErrorCode::Internal,
            codes::API_OLD_CLIENT => ErrorCode::ApiOldClient,
            codes::API_OLD_SERVER => ErrorCode::ApiOldServer,
            other => ErrorCode::Domain(other),
        }
    }

    /// Human-readable text sent in the `message` field.
    pub const fn message(&self) -> &'static str {
        match self {
            ErrorCode::Database => "database not found",
            ErrorCode::IllFormed => "ill-formed query",
            ErrorCode::BadCommand => "bad command",
            ErrorCode::MissingParameter => "missing parameter",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::Storage => "storage consistency",
            ErrorCode::Msgpack => "invalid msgpack",
            ErrorCode::Internal => "internal server error",
            ErrorCode::ApiOldClient => "incompatible API, client is too old",
            ErrorCode::ApiOldServer => "incompatible API, server is too old",
            ErrorCode::Domain(_) => "command failed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

/// Error value carried through the pipeline and mapped to response fields.
#[derive(Debug, Clone, PartialEq)]
pub struct NuboError {
    pub code: ErrorCode,
    pub message: String,
    /// Optional payload sent as `detail`.
    pub detail: Option<Value>,
}

impl NuboError {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.message().to_string(),
            detail: None,
        }
    }

    pub fn with_detail(code: ErrorCode, detail: impl Into<Value>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Self::new(code)
        }
    }

    pub fn ill_formed() -> Self {
        Self::new(ErrorCode::IllFormed)
    }

    pub fn bad_command() -> Self {
        Self::new(ErrorCode::BadCommand)
    }

    pub fn forbidden() -> Self {
        Self::new(ErrorCode::Forbidden)
    }

    /// The parameter name is reported as `detail`.
    pub fn missing_parameter(name: &str) -> Self {
        Self::with_detail(ErrorCode::MissingParameter, name)
    }

    pub fn storage() -> Self {
        Self::new(ErrorCode::Storage)
    }

    pub fn database() -> Self {
        Self::new(ErrorCode::Database)
    }

    pub fn internal() -> Self {
        Self::new(ErrorCode::Internal)
    }

    /// Handler-defined error with its own code and message.
    pub fn domain(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::from_code(code),
            message: message.into(),
            detail: None,
        }
    }

    /// Response fragment for this error.
    pub fn to_fields(&self) -> ResponseMap {
        let mut fields = ResponseMap::new();
        fields.insert_if_absent("error", Value::from(self.code.code()));
        fields.insert_if_absent("message", Value::from(self.message.as_str()));
        if let Some(detail) = &self.detail {
            fields.insert_if_absent("detail", detail.clone());
        }
        fields
    }
}

impl fmt::Display for NuboError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)
    }
}

impl std::error::Error for NuboError {}

/// Result type for command handlers and the dispatcher pipeline.
pub type NuboResult<T> = Result<T, NuboError>;

/// Persistent store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The database could not be opened (missing file, not installed).
    #[error("cannot open store at {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("store query failed: {0}")]
    Query(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("store handle already closed")]
    Closed,
}

/// Archive (file content) storage failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive {file_id} not found")]
    NotFound { file_id: i64 },

    #[error("archive {file_id} I/O error: {reason}")]
    Io { file_id: i64, reason: String },
}

/// Envelope encoding failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("undecodable body: {0}")]
    Decode(String),

    #[error("envelope is not a map")]
    NotAMap,

    #[error("envelope has no string `cmd`")]
    MissingCommand,

    #[error("cannot encode response: {0}")]
    Encode(String),
}

/// Server lifecycle errors (not sent on the wire).
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server bind error: {0}")]
    Bind(String),

    #[error("server error: {0}")]
    Serve(String),
}

impl From<StoreError> for NuboError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Open { .. } => NuboError::database(),
            _ => NuboError::internal(),
        }
    }
}

impl From<ArchiveError> for NuboError {
    fn from(_: ArchiveError) -> Self {
        NuboError::storage()
    }
}

impl From<CodecError> for NuboError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Encode(_) => NuboError::internal(),
            _ => NuboError::ill_formed(),
        }
    }
}
