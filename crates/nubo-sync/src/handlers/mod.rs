//! Command handlers.
//!
//! Each handler takes the request-scoped [`CommandContext`] and the optional
//! `params` value and returns the fields to merge into the response.

pub mod echo;
pub mod files;
pub mod init;
pub mod params;

use crate::ports::outbound::{ArchiveStorage, CredentialManager, SyncStore};

pub use params::Params;

/// Collaborators available to a handler for the duration of one request.
pub struct CommandContext<'a> {
    pub store: &'a mut dyn SyncStore,
    pub archives: &'a dyn ArchiveStorage,
    pub credentials: &'a dyn CredentialManager,
}
