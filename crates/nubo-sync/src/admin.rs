//! Operator tasks behind the `nubo-server` subcommands.
//!
//! These run outside the request pipeline, each against its own store
//! handle.

use crate::domain::config::ServerConfig;
use crate::domain::credential::{PasswordError, PasswordRecord};
use crate::domain::entities::{config_keys, Timestamp};
use crate::domain::error::StoreError;
use crate::ports::outbound::{ArchiveStorage, StoreProvider, SyncStore};
use chrono::DateTime;
use rand::RngCore;
use std::path::Path;
use tracing::{debug, info, warn};

/// Length of the salt handed to clients by `init`.
pub const CLIENT_SALT_LEN: usize = 32;

/// Width of file names in listings.
pub const FILE_NAME_WIDTH: usize = 40;

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("password must be at least {min} characters")]
    PasswordTooShort { min: usize },

    #[error("already installed at {0}")]
    AlreadyInstalled(String),

    #[error("cannot create data directory {path}: {reason}")]
    DataDir { path: String, reason: String },

    #[error("no computer with id {0}")]
    UnknownComputer(i64),

    #[error("no file with id {0}")]
    UnknownFile(i64),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("password hashing failed: {0}")]
    Password(#[from] PasswordError),
}

/// One line of the computer listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputerSummary {
    pub computer_id: i64,
    pub hostname: String,
    pub computer: String,
    pub last_access: String,
    pub status: &'static str,
}

/// One line of the file listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSummary {
    pub file_id: i64,
    pub name: String,
    pub modified: String,
    pub is_directory: bool,
}

/// Creates the data directory and the database, then stores the password
/// record and the client salt. A failure after the database was created
/// removes it again.
pub fn install(
    config: &ServerConfig,
    provider: &dyn StoreProvider,
    password: &str,
) -> Result<(), AdminError> {
    let password = password.trim();
    let min = config.security.min_password_len;
    if password.chars().count() < min {
        return Err(AdminError::PasswordTooShort { min });
    }
    if provider.is_installed() {
        return Err(AdminError::AlreadyInstalled(
            config.database_path().display().to_string(),
        ));
    }

    create_data_dir(&config.storage.data_dir)?;

    let mut store = provider.install()?;
    let written = write_secrets(store.as_mut(), password, config.security.password_rounds);
    store.close();

    if let Err(err) = written {
        warn!(error = %err, "Install failed, removing database");
        if let Err(e) = provider.uninstall() {
            warn!(error = %e, "Cannot remove partial database");
        }
        return Err(err);
    }

    info!(path = %config.database_path().display(), "Installed");
    Ok(())
}

fn write_secrets(store: &mut dyn SyncStore, password: &str, rounds: u32) -> Result<(), AdminError> {
    let record = PasswordRecord::generate(password, rounds)?;
    let mut salt = [0u8; CLIENT_SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    store.begin()?;
    store.set_config_value(config_keys::PASSWORD, record.encode().as_bytes())?;
    store.set_config_value(config_keys::SALT, &salt)?;
    store.commit()?;
    Ok(())
}

fn create_data_dir(dir: &Path) -> Result<(), AdminError> {
    let dir_err = |e: std::io::Error| AdminError::DataDir {
        path: dir.display().to_string(),
        reason: e.to_string(),
    };
    std::fs::create_dir_all(dir).map_err(dir_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o770)).map_err(dir_err)?;
    }

    debug!(path = %dir.display(), "Data directory ready");
    Ok(())
}

/// Runs `f` on a fresh handle and closes it afterwards.
fn with_store<T>(
    provider: &dyn StoreProvider,
    f: impl FnOnce(&mut dyn SyncStore) -> Result<T, AdminError>,
) -> Result<T, AdminError> {
    let mut store = provider.open()?;
    let result = f(store.as_mut());
    store.close();
    result
}

pub fn list_computers(provider: &dyn StoreProvider) -> Result<Vec<ComputerSummary>, AdminError> {
    let computers = with_store(provider, |store| Ok(store.list_computers()?))?;
    Ok(computers
        .into_iter()
        .map(|c| ComputerSummary {
            computer_id: c.computer_id,
            hostname: c.hostname,
            computer: c.computer,
            last_access: c.atime.map_or_else(|| "never".to_string(), format_timestamp),
            status: if c.authorized { "OK" } else { "auth failed" },
        })
        .collect())
}

/// Deletes a registration. The computer must run `init` to come back.
pub fn revoke_computer(provider: &dyn StoreProvider, computer_id: i64) -> Result<(), AdminError> {
    with_store(provider, |store| {
        if !store.delete_computer(computer_id)? {
            return Err(AdminError::UnknownComputer(computer_id));
        }
        info!(computer_id, "Revoked computer");
        Ok(())
    })
}

pub fn list_files(provider: &dyn StoreProvider) -> Result<Vec<FileSummary>, AdminError> {
    let files = with_store(provider, |store| Ok(store.list_files()?))?;
    Ok(files
        .into_iter()
        .map(|f| FileSummary {
            file_id: f.file_id,
            is_directory: f.is_directory(),
            name: abbreviate_path(&f.filename, FILE_NAME_WIDTH),
            modified: format_timestamp(f.mtime),
        })
        .collect())
}

/// Deletes a file row and its archive.
pub fn remove_file(
    provider: &dyn StoreProvider,
    archives: &dyn ArchiveStorage,
    file_id: i64,
) -> Result<(), AdminError> {
    let file = with_store(provider, |store| {
        let file = store
            .find_file_by_id(file_id)?
            .ok_or(AdminError::UnknownFile(file_id))?;
        store.delete_file(file_id)?;
        Ok(file)
    })?;

    if !file.is_directory() {
        if let Err(e) = archives.remove(file_id) {
            warn!(error = %e, file_id, "Archive not removed");
        }
    }
    info!(file_id, name = %file.filename, "Removed file");
    Ok(())
}

/// Keeps the end of `path`, which carries the file name, within `width`
/// characters.
pub fn abbreviate_path(path: &str, width: usize) -> String {
    const ELLIPSIS: &str = "...";
    let len = path.chars().count();
    if len <= width {
        return path.to_string();
    }
    if width <= ELLIPSIS.len() {
        return path.chars().skip(len - width).collect();
    }
    let tail: String = path.chars().skip(len - (width - ELLIPSIS.len())).collect();
    format!("{ELLIPSIS}{tail}")
}

/// UTC, `YYYY-MM-DD HH:MM:SS`.
pub fn format_timestamp(ts: Timestamp) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}
