//! In-memory store and archive adapters for tests.
//!
//! All handles opened from one [`InMemoryStoreProvider`] share its state, so a
//! test can inspect what a request left behind. Transactions snapshot the
//! whole state on `begin` and restore it on `rollback`.

use crate::domain::entities::{
    ComputerCredential, ComputerRecord, FileRecord, NewComputer, Timestamp,
};
use crate::domain::error::{ArchiveError, StoreError};
use crate::ports::outbound::{ArchiveStorage, StoreProvider, SyncStore};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct ComputerRow {
    computer_id: i64,
    hostname: String,
    computer: String,
    selector: Option<String>,
    validator: Option<String>,
    atime: Option<Timestamp>,
}

#[derive(Debug, Clone, Default)]
struct StoreData {
    config: BTreeMap<String, Vec<u8>>,
    computers: Vec<ComputerRow>,
    files: Vec<FileRecord>,
    last_computer_id: i64,
    last_file_id: i64,
}

#[derive(Default)]
struct SharedState {
    /// `None` until installed.
    data: Mutex<Option<StoreData>>,
    open_handles: AtomicUsize,
    total_opens: AtomicUsize,
    failing_config_key: Mutex<Option<String>>,
}

/// Provider whose handles share one in-memory database.
#[derive(Clone, Default)]
pub struct InMemoryStoreProvider {
    state: Arc<SharedState>,
}

impl InMemoryStoreProvider {
    /// A provider with nothing installed; `open` fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider with an empty installed schema.
    pub fn installed() -> Self {
        let provider = Self::new();
        *provider.state.data.lock() = Some(StoreData::default());
        provider
    }

    /// Makes `config_value(key)` fail on every handle; `None` clears it.
    pub fn set_failing_config_key(&self, key: Option<&str>) {
        *self.state.failing_config_key.lock() = key.map(str::to_string);
    }

    /// Handles opened and not yet closed. Dropping a handle without
    /// `close` leaves it counted.
    pub fn open_handles(&self) -> usize {
        self.state.open_handles.load(Ordering::SeqCst)
    }

    pub fn total_opens(&self) -> usize {
        self.state.total_opens.load(Ordering::SeqCst)
    }

    fn handle(&self) -> Box<dyn SyncStore> {
        self.state.open_handles.fetch_add(1, Ordering::SeqCst);
        self.state.total_opens.fetch_add(1, Ordering::SeqCst);
        Box::new(InMemoryStore {
            state: Arc::clone(&self.state),
            snapshot: None,
            closed: false,
        })
    }
}

impl StoreProvider for InMemoryStoreProvider {
    fn open(&self) -> Result<Box<dyn SyncStore>, StoreError> {
        if self.state.data.lock().is_none() {
            return Err(StoreError::Open {
                path: ":memory:".into(),
                reason: "not installed".into(),
            });
        }
        Ok(self.handle())
    }

    fn is_installed(&self) -> bool {
        self.state.data.lock().is_some()
    }

    fn install(&self) -> Result<Box<dyn SyncStore>, StoreError> {
        {
            let mut data = self.state.data.lock();
            if data.is_some() {
                return Err(StoreError::Open {
                    path: ":memory:".into(),
                    reason: "already installed".into(),
                });
            }
            *data = Some(StoreData::default());
        }
        Ok(self.handle())
    }

    fn uninstall(&self) -> Result<(), StoreError> {
        *self.state.data.lock() = None;
        Ok(())
    }
}

/// Handle on an [`InMemoryStoreProvider`].
pub struct InMemoryStore {
    state: Arc<SharedState>,
    snapshot: Option<StoreData>,
    closed: bool,
}

impl InMemoryStore {
    fn read<T>(&self, f: impl FnOnce(&StoreData) -> T) -> Result<T, StoreError> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        let data = self.state.data.lock();
        data.as_ref()
            .map(f)
            .ok_or_else(|| StoreError::Query("store was uninstalled".into()))
    }

    fn write<T>(&mut self, f: impl FnOnce(&mut StoreData) -> T) -> Result<T, StoreError> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        let mut data = self.state.data.lock();
        data.as_mut()
            .map(f)
            .ok_or_else(|| StoreError::Query("store was uninstalled".into()))
    }

    fn restore_snapshot(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            let mut data = self.state.data.lock();
            if data.is_some() {
                *data = Some(snapshot);
            }
        }
    }
}

impl SyncStore for InMemoryStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        if self.snapshot.is_some() {
            return Err(StoreError::Transaction("transaction already open".into()));
        }
        self.snapshot = Some(self.read(|data| data.clone())?);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        self.snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| StoreError::Transaction("no open transaction".into()))
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        if self.snapshot.is_none() {
            return Err(StoreError::Transaction("no open transaction".into()));
        }
        self.restore_snapshot();
        Ok(())
    }

    fn config_value(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if self.state.failing_config_key.lock().as_deref() == Some(key) {
            return Err(StoreError::Query(format!("injected failure reading {key}")));
        }
        self.read(|data| data.config.get(key).cloned())
    }

    fn set_config_value(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.write(|data| {
            data.config.insert(key.to_string(), value.to_vec());
        })
    }

    fn find_computer_by_selector(
        &self,
        selector: &str,
    ) -> Result<Option<ComputerCredential>, StoreError> {
        self.read(|data| {
            data.computers
                .iter()
                .find(|row| row.selector.as_deref() == Some(selector))
                .map(|row| ComputerCredential {
                    computer_id: row.computer_id,
                    selector: selector.to_string(),
                    validator_digest: row.validator.clone(),
                })
        })
    }

    fn register_computer(&mut self, computer: &NewComputer) -> Result<i64, StoreError> {
        self.write(|data| {
            data.last_computer_id += 1;
            data.computers.push(ComputerRow {
                computer_id: data.last_computer_id,
                hostname: computer.hostname.clone(),
                computer: computer.computer.clone(),
                selector: Some(computer.selector.clone()),
                validator: Some(computer.validator_digest.clone()),
                atime: Some(computer.atime),
            });
            data.last_computer_id
        })
    }

    fn delete_computer_by_name(&mut self, computer: &str) -> Result<usize, StoreError> {
        self.write(|data| {
            let before = data.computers.len();
            data.computers.retain(|row| row.computer != computer);
            before - data.computers.len()
        })
    }

    fn update_validator(
        &mut self,
        computer_id: i64,
        validator_digest: &str,
        atime: Timestamp,
    ) -> Result<(), StoreError> {
        self.write(|data| {
            if let Some(row) = data
                .computers
                .iter_mut()
                .find(|row| row.computer_id == computer_id)
            {
                row.validator = Some(validator_digest.to_string());
                row.atime = Some(atime);
            }
        })
    }

    fn revoke_credentials(&mut self, computer_id: i64) -> Result<(), StoreError> {
        self.write(|data| {
            if let Some(row) = data
                .computers
                .iter_mut()
                .find(|row| row.computer_id == computer_id)
            {
                row.selector = None;
                row.validator = None;
            }
        })
    }

    fn delete_computer(&mut self, computer_id: i64) -> Result<bool, StoreError> {
        self.write(|data| {
            let before = data.computers.len();
            data.computers.retain(|row| row.computer_id != computer_id);
            before != data.computers.len()
        })
    }

    fn list_computers(&self) -> Result<Vec<ComputerRecord>, StoreError> {
        self.read(|data| {
            let mut rows: Vec<ComputerRecord> = data
                .computers
                .iter()
                .map(|row| ComputerRecord {
                    computer_id: row.computer_id,
                    hostname: row.hostname.clone(),
                    computer: row.computer.clone(),
                    atime: row.atime,
                    authorized: row.validator.is_some(),
                })
                .collect();
            rows.sort_by(|a, b| a.hostname.cmp(&b.hostname).then(b.atime.cmp(&a.atime)));
            rows
        })
    }

    fn list_files(&self) -> Result<Vec<FileRecord>, StoreError> {
        self.read(|data| {
            let mut files = data.files.clone();
            files.sort_by(|a, b| a.filename.cmp(&b.filename));
            files
        })
    }

    fn find_file(&self, filename: &str) -> Result<Option<FileRecord>, StoreError> {
        self.read(|data| data.files.iter().find(|f| f.filename == filename).cloned())
    }

    fn find_file_by_id(&self, file_id: i64) -> Result<Option<FileRecord>, StoreError> {
        self.read(|data| data.files.iter().find(|f| f.file_id == file_id).cloned())
    }

    fn insert_file(&mut self, filename: &str, hash: &str, mtime: i64) -> Result<i64, StoreError> {
        self.write(|data| {
            data.last_file_id += 1;
            data.files.push(FileRecord {
                file_id: data.last_file_id,
                filename: filename.to_string(),
                hash: hash.to_string(),
                mtime,
            });
            data.last_file_id
        })
    }

    fn update_file(&mut self, file_id: i64, hash: &str, mtime: i64) -> Result<(), StoreError> {
        self.write(|data| {
            if let Some(file) = data.files.iter_mut().find(|f| f.file_id == file_id) {
                file.hash = hash.to_string();
                file.mtime = mtime;
            }
        })
    }

    fn delete_file(&mut self, file_id: i64) -> Result<bool, StoreError> {
        self.write(|data| {
            let before = data.files.len();
            data.files.retain(|f| f.file_id != file_id);
            before != data.files.len()
        })
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.restore_snapshot();
        self.closed = true;
        self.state.open_handles.fetch_sub(1, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for InMemoryStore {
    fn drop(&mut self) {
        // Uncommitted work never survives the handle, closed or not.
        self.restore_snapshot();
    }
}

/// Archive storage backed by a map, with an injectable write failure.
#[derive(Default)]
pub struct InMemoryArchiveStorage {
    files: Mutex<HashMap<i64, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl InMemoryArchiveStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `write` fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, file_id: i64) -> bool {
        self.files.lock().contains_key(&file_id)
    }

    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }
}

impl ArchiveStorage for InMemoryArchiveStorage {
    fn write(&self, file_id: i64, content: &[u8]) -> Result<(), ArchiveError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ArchiveError::Io {
                file_id,
                reason: "injected write failure".into(),
            });
        }
        self.files.lock().insert(file_id, content.to_vec());
        Ok(())
    }

    fn read(&self, file_id: i64) -> Result<Vec<u8>, ArchiveError> {
        self.files
            .lock()
            .get(&file_id)
            .cloned()
            .ok_or(ArchiveError::NotFound { file_id })
    }

    fn remove(&self, file_id: i64) -> Result<(), ArchiveError> {
        self.files
            .lock()
            .remove(&file_id)
            .map(|_| ())
            .ok_or(ArchiveError::NotFound { file_id })
    }
}
