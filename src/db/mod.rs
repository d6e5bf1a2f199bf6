//! SQLCipher-backed local store for OAuth credentials and cached preps.
//!
//! The database lives at `~/.prepassist/prepassist.db` by default and is
//! keyed with a SHA-256 digest of the configured secret, so tokens and
//! cached documents are encrypted at rest. Schema migrations run inline on
//! open and are idempotent.

use std::path::Path;

use rusqlite::Connection;
use sha2::{Digest, Sha256};

pub mod preps;
pub mod tokens;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Stored record is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub struct PrepDb {
    conn: Connection,
}

/// SQLCipher key material derived from the application secret.
fn derive_db_key(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    hex::encode(digest)
}

impl PrepDb {
    /// Open (or create) the database at the given path and apply the schema.
    pub fn open(path: &Path, secret_key: &str) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(path)?;

        // Key must be set before any other statement touches the file.
        conn.pragma_update(None, "key", derive_db_key(secret_key))?;

        // WAL for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        Self::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Open a database at an explicit path. Useful for testing.
    #[cfg(test)]
    pub(crate) fn open_at(path: std::path::PathBuf) -> Result<Self, DbError> {
        Self::open(&path, "test-secret")
    }

    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    fn run_migrations(conn: &Connection) -> Result<(), DbError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS oauth_tokens (
                user_id       TEXT NOT NULL,
                provider      TEXT NOT NULL,
                access_token  TEXT NOT NULL,
                refresh_token TEXT,
                expires_at    TEXT,
                updated_at    TEXT NOT NULL,
                PRIMARY KEY (user_id, provider)
            );
            CREATE TABLE IF NOT EXISTS meeting_preps (
                user_id      TEXT NOT NULL,
                meeting_id   TEXT NOT NULL,
                document     TEXT NOT NULL,
                generated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, meeting_id)
            );",
        )?;
        Ok(())
    }
}
