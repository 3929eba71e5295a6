//! Nubo sync server - a single-endpoint MessagePack command protocol.
//!
//! Clients POST one encoded envelope `{cmd, params?, auth?}` and always get
//! one encoded map back. Every protected command renews the client's
//! credential, and the renewed `auth` stays in the response even when the
//! command itself fails.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        nubo-sync                              │
//! ├───────────────────────────────────────────────────────────────┤
//! │   POST /sync      GET /health      GET /metrics               │
//! │        │                                                      │
//! │  ┌─────┴──────────────────────────────────────┐               │
//! │  │ Tracing → Fixed headers → Body limit        │               │
//! │  └─────┬──────────────────────────────────────┘               │
//! │        │ spawn_blocking                                       │
//! │  ┌─────┴──────────────────────────────────────┐               │
//! │  │ Dispatcher                                  │               │
//! │  │ decode → resolve → refresh → execute → encode│              │
//! │  └──┬──────────┬──────────────┬───────────────┘               │
//! │     │          │              │                               │
//! │  Registry  Credentials    Store session                       │
//! └─────┼──────────┼──────────────┼───────────────────────────────┘
//!       ▼          ▼              ▼
//!   handlers   tbl_computer   SQLite + archive files
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use nubo_sync::{ServerConfig, SyncService};
//!
//! let config = ServerConfig::load(None)?;
//! let mut service = SyncService::from_config(config)?;
//! let stop = service.shutdown_handle();
//! service.run().await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod admin;
pub mod credentials;
pub mod dispatch;
pub mod domain;
pub mod handlers;
pub mod middleware;
pub mod ports;
pub mod registry;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-exports
pub use adapters::{FsArchiveStorage, MsgpackCodec, SqliteStoreProvider};
pub use credentials::TokenCredentialManager;
pub use dispatch::Dispatcher;
pub use domain::{
    AuthToken, ConfigError, ErrorCode, NuboError, NuboResult, RequestEnvelope, ResponseMap,
    ServerConfig, ServerError,
};
pub use middleware::SyncMetrics;
pub use ports::{SyncApi, SyncStore, StoreProvider};
pub use registry::{CommandEntry, CommandRegistry};
pub use service::{ShutdownHandle, SyncService};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
