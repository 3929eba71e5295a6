//! # Ports Layer
//!
//! ## Hexagonal Architecture
//!
//! - `inbound.rs` - Driving ports (API exposed to the HTTP service)
//! - `outbound.rs` - Driven ports (codec, store, archives, credentials, clock)

pub mod inbound;
pub mod outbound;

pub use inbound::SyncApi;
pub use outbound::{
    ArchiveStorage, CredentialManager, EnvelopeCodec, RandomTokenSource, StoreProvider,
    SyncStore, SystemTimeSource, TimeSource, TokenSource,
};
