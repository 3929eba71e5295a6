//! Adapters for the outbound ports.
//!
//! - `msgpack` - envelope codec
//! - `sqlite` - production store
//! - `archive` - file content on disk
//! - `memory` - in-memory store and archives for tests

pub mod archive;
pub mod memory;
pub mod msgpack;
pub mod sqlite;

pub use archive::FsArchiveStorage;
pub use memory::{InMemoryArchiveStorage, InMemoryStore, InMemoryStoreProvider};
pub use msgpack::{MsgpackCodec, MSGPACK_CONTENT_TYPE};
pub use sqlite::{SqliteStore, SqliteStoreProvider};
