//! SQLite store adapter.
//!
//! One connection per request handle. `open` never creates the database:
//! a missing file means the server was not installed and surfaces as
//! `DATABASE` on the wire.

use crate::domain::entities::{
    ComputerCredential, ComputerRecord, FileRecord, NewComputer, Timestamp,
};
use crate::domain::error::StoreError;
use crate::ports::outbound::{StoreProvider, SyncStore};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const SCHEMA: &str = "
CREATE TABLE tbl_config (
    config_id INTEGER PRIMARY KEY AUTOINCREMENT,
    key       TEXT NOT NULL UNIQUE,
    value     BLOB
);
CREATE TABLE tbl_computer (
    computer_id INTEGER PRIMARY KEY AUTOINCREMENT,
    hostname    TEXT NOT NULL,
    computer    TEXT NOT NULL,
    selector    TEXT UNIQUE,
    validator   TEXT,
    atime       INTEGER
);
CREATE TABLE tbl_file (
    file_id  INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL UNIQUE,
    hash     TEXT NOT NULL,
    mtime    INTEGER NOT NULL
);
";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn query_err(err: rusqlite::Error) -> StoreError {
    StoreError::Query(err.to_string())
}

/// Opens connections to the database file at `path`.
#[derive(Debug, Clone)]
pub struct SqliteStoreProvider {
    path: PathBuf,
}

impl SqliteStoreProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_err(&self, reason: impl ToString) -> StoreError {
        StoreError::Open {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    fn connect(&self, flags: OpenFlags) -> Result<Connection, StoreError> {
        let conn = Connection::open_with_flags(&self.path, flags).map_err(|e| self.open_err(e))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| self.open_err(e))?;
        Ok(conn)
    }
}

impl StoreProvider for SqliteStoreProvider {
    fn open(&self) -> Result<Box<dyn SyncStore>, StoreError> {
        if !self.path.is_file() {
            return Err(self.open_err("database file does not exist"));
        }
        let conn = self.connect(OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX)?;
        Ok(Box::new(SqliteStore::new(conn)))
    }

    fn is_installed(&self) -> bool {
        self.path.is_file()
    }

    fn install(&self) -> Result<Box<dyn SyncStore>, StoreError> {
        if self.path.exists() {
            return Err(self.open_err("already installed"));
        }
        let conn = self.connect(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(SCHEMA).map_err(query_err)?;
        debug!(path = %self.path.display(), "Created database schema");
        Ok(Box::new(SqliteStore::new(conn)))
    }

    fn uninstall(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.open_err(e)),
        }
    }
}

/// A single SQLite connection.
pub struct SqliteStore {
    conn: Option<Connection>,
    in_transaction: bool,
}

impl SqliteStore {
    fn new(conn: Connection) -> Self {
        Self {
            conn: Some(conn),
            in_transaction: false,
        }
    }

    fn conn(&self) -> Result<&Connection, StoreError> {
        self.conn.as_ref().ok_or(StoreError::Closed)
    }

    fn execute(&self, sql: &str, params: impl rusqlite::Params) -> Result<usize, StoreError> {
        self.conn()?.execute(sql, params).map_err(query_err)
    }
}

impl SyncStore for SqliteStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        if self.in_transaction {
            return Err(StoreError::Transaction("transaction already open".into()));
        }
        self.conn()?
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Err(StoreError::Transaction("no open transaction".into()));
        }
        self.conn()?
            .execute_batch("COMMIT")
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Err(StoreError::Transaction("no open transaction".into()));
        }
        self.in_transaction = false;
        self.conn()?
            .execute_batch("ROLLBACK")
            .map_err(|e| StoreError::Transaction(e.to_string()))
    }

    fn config_value(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.conn()?
            .query_row(
                "SELECT value FROM tbl_config WHERE key = ?1",
                params![key],
                |row| row.get::<_, Option<Vec<u8>>>(0),
            )
            .optional()
            .map(Option::flatten)
            .map_err(query_err)
    }

    fn set_config_value(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.execute(
            "INSERT INTO tbl_config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map(|_| ())
    }

    fn find_computer_by_selector(
        &self,
        selector: &str,
    ) -> Result<Option<ComputerCredential>, StoreError> {
        self.conn()?
            .query_row(
                "SELECT computer_id, selector, validator FROM tbl_computer WHERE selector = ?1",
                params![selector],
                |row| {
                    Ok(ComputerCredential {
                        computer_id: row.get(0)?,
                        selector: row.get(1)?,
                        validator_digest: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(query_err)
    }

    fn register_computer(&mut self, computer: &NewComputer) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tbl_computer (hostname, computer, selector, validator, atime)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                computer.hostname,
                computer.computer,
                computer.selector,
                computer.validator_digest,
                computer.atime
            ],
        )
        .map_err(query_err)?;
        Ok(conn.last_insert_rowid())
    }

    fn delete_computer_by_name(&mut self, computer: &str) -> Result<usize, StoreError> {
        self.execute(
            "DELETE FROM tbl_computer WHERE computer = ?1",
            params![computer],
        )
    }

    fn update_validator(
        &mut self,
        computer_id: i64,
        validator_digest: &str,
        atime: Timestamp,
    ) -> Result<(), StoreError> {
        self.execute(
            "UPDATE tbl_computer SET validator = ?1, atime = ?2 WHERE computer_id = ?3",
            params![validator_digest, atime, computer_id],
        )
        .map(|_| ())
    }

    fn revoke_credentials(&mut self, computer_id: i64) -> Result<(), StoreError> {
        self.execute(
            "UPDATE tbl_computer SET selector = NULL, validator = NULL WHERE computer_id = ?1",
            params![computer_id],
        )
        .map(|_| ())
    }

    fn delete_computer(&mut self, computer_id: i64) -> Result<bool, StoreError> {
        self.execute(
            "DELETE FROM tbl_computer WHERE computer_id = ?1",
            params![computer_id],
        )
        .map(|n| n > 0)
    }

    fn list_computers(&self) -> Result<Vec<ComputerRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT computer_id, hostname, computer, atime, validator IS NOT NULL
                 FROM tbl_computer ORDER BY hostname ASC, atime DESC",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ComputerRecord {
                    computer_id: row.get(0)?,
                    hostname: row.get(1)?,
                    computer: row.get(2)?,
                    atime: row.get(3)?,
                    authorized: row.get(4)?,
                })
            })
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn list_files(&self) -> Result<Vec<FileRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT file_id, filename, hash, mtime FROM tbl_file ORDER BY filename")
            .map_err(query_err)?;
        let rows = stmt.query_map([], file_from_row).map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn find_file(&self, filename: &str) -> Result<Option<FileRecord>, StoreError> {
        self.conn()?
            .query_row(
                "SELECT file_id, filename, hash, mtime FROM tbl_file WHERE filename = ?1",
                params![filename],
                file_from_row,
            )
            .optional()
            .map_err(query_err)
    }

    fn find_file_by_id(&self, file_id: i64) -> Result<Option<FileRecord>, StoreError> {
        self.conn()?
            .query_row(
                "SELECT file_id, filename, hash, mtime FROM tbl_file WHERE file_id = ?1",
                params![file_id],
                file_from_row,
            )
            .optional()
            .map_err(query_err)
    }

    fn insert_file(&mut self, filename: &str, hash: &str, mtime: i64) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tbl_file (filename, hash, mtime) VALUES (?1, ?2, ?3)",
            params![filename, hash, mtime],
        )
        .map_err(query_err)?;
        Ok(conn.last_insert_rowid())
    }

    fn update_file(&mut self, file_id: i64, hash: &str, mtime: i64) -> Result<(), StoreError> {
        self.execute(
            "UPDATE tbl_file SET hash = ?1, mtime = ?2 WHERE file_id = ?3",
            params![hash, mtime, file_id],
        )
        .map(|_| ())
    }

    fn delete_file(&mut self, file_id: i64) -> Result<bool, StoreError> {
        self.execute("DELETE FROM tbl_file WHERE file_id = ?1", params![file_id])
            .map(|n| n > 0)
    }

    fn close(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.in_transaction {
            self.in_transaction = false;
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "Rollback on close failed");
            }
        }
        if let Err((_, e)) = conn.close() {
            warn!(error = %e, "Closing database connection failed");
        }
    }

    fn is_closed(&self) -> bool {
        self.conn.is_none()
    }
}

fn file_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        file_id: row.get(0)?,
        filename: row.get(1)?,
        hash: row.get(2)?,
        mtime: row.get(3)?,
    })
}
