//! Persistent storage using SQLite (rusqlite)
//!
//! This module provides:
//! - OS-standard data directory location (via `directories` crate)
//! - SQLite database with schema versioning
//! - The persisted auth session, so a user keeps their identity (and their
//!   lobby memberships) across runs

use crate::gateway::{Session, SessionStore, User};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// Current schema version. Bump this when making schema changes.
/// Version history:
/// - v1: meta and session tables
const SCHEMA_VERSION: u32 = 1;

/// Database file name inside the data directory.
pub const DB_FILE: &str = "quizrush.db";

/// Errors that can occur during storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// Database error from SQLite
    Database(rusqlite::Error),
    /// Could not determine data directory
    NoDataDirectory,
    /// Schema version mismatch (future version)
    FutureSchemaVersion { found: u32, supported: u32 },
    /// Failed to create data directory
    CreateDirFailed(std::io::Error),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Database(e) => write!(f, "database error: {}", e),
            StorageError::NoDataDirectory => write!(f, "could not determine data directory"),
            StorageError::FutureSchemaVersion { found, supported } => {
                write!(
                    f,
                    "database schema version {} is newer than supported version {}",
                    found, supported
                )
            }
            StorageError::CreateDirFailed(e) => write!(f, "failed to create data directory: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Database(e)
    }
}

/// The storage handle for Quiz Rush client data.
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open or create the database inside `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir).map_err(StorageError::CreateDirFailed)?;
        let conn = Connection::open(data_dir.join(DB_FILE))?;
        let storage = Storage { conn };
        storage.initialize_schema()?;
        Ok(storage)
    }

    /// Open an in-memory database (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let storage = Storage {
            conn: Connection::open_in_memory()?,
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    /// Get the OS-standard data directory for Quiz Rush.
    ///
    /// - Linux: `$XDG_DATA_HOME/quizrush/` or `~/.local/share/quizrush/`
    /// - macOS: `~/Library/Application Support/quizrush/`
    pub fn default_data_dir() -> Result<PathBuf, StorageError> {
        ProjectDirs::from("", "", "quizrush")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or(StorageError::NoDataDirectory)
    }

    fn initialize_schema(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (
                 id INTEGER PRIMARY KEY CHECK (id = 1),
                 schema_version INTEGER NOT NULL
             );",
        )?;

        let found: Option<u32> = self
            .conn
            .query_row("SELECT schema_version FROM meta WHERE id = 1", [], |row| row.get(0))
            .optional()?;

        match found {
            Some(version) if version > SCHEMA_VERSION => {
                return Err(StorageError::FutureSchemaVersion {
                    found: version,
                    supported: SCHEMA_VERSION,
                });
            }
            Some(_) => {}
            None => {
                self.conn.execute(
                    "INSERT INTO meta (id, schema_version) VALUES (1, ?1)",
                    params![SCHEMA_VERSION],
                )?;
            }
        }

        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS session (
                 id INTEGER PRIMARY KEY CHECK (id = 1),
                 user_id TEXT NOT NULL,
                 access_token TEXT NOT NULL,
                 refresh_token TEXT NOT NULL,
                 expires_at INTEGER NOT NULL
             );",
        )?;
        Ok(())
    }

    /// Stored schema version.
    pub fn schema_version(&self) -> Result<u32, StorageError> {
        Ok(self
            .conn
            .query_row("SELECT schema_version FROM meta WHERE id = 1", [], |row| row.get(0))?)
    }

    /// Load the saved session, if any.
    pub fn session(&self) -> Result<Option<Session>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT user_id, access_token, refresh_token, expires_at FROM session WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.and_then(|(user_id, access_token, refresh_token, expires_at)| {
            // A corrupt id is treated as no session
            let id = Uuid::parse_str(&user_id).ok()?;
            Some(Session {
                access_token,
                refresh_token,
                expires_at,
                user: User { id },
            })
        }))
    }

    /// Replace the saved session.
    pub fn set_session(&self, session: &Session) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO session (id, user_id, access_token, refresh_token, expires_at)
             VALUES (1, ?1, ?2, ?3, ?4)",
            params![
                session.user.id.to_string(),
                session.access_token,
                session.refresh_token,
                session.expires_at
            ],
        )?;
        Ok(())
    }

    /// Forget the saved session.
    pub fn clear_session(&self) -> Result<(), StorageError> {
        self.conn.execute("DELETE FROM session", [])?;
        Ok(())
    }
}

impl SessionStore for Storage {
    fn load_session(&self) -> Option<Session> {
        self.session().unwrap_or_else(|e| {
            warn!(error = %e, "failed to load saved session");
            None
        })
    }

    fn save_session(&self, session: &Session) {
        if let Err(e) = self.set_session(session) {
            warn!(error = %e, "failed to save session");
        }
    }

    fn clear_session(&self) {
        if let Err(e) = Storage::clear_session(self) {
            warn!(error = %e, "failed to clear session");
        }
    }
}
