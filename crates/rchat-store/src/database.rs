//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and the data
//! directory holding the content-addressed blob namespaces. Migrations run
//! before any other operation; there is a single writer by construction
//! (the node wraps the `Database` in a mutex).

use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::error::Result;
use crate::migrations;

pub struct Database {
    conn: Connection,
    data_dir: PathBuf,
}

impl Database {
    /// Open (or create) `store.db` inside `data_dir` and ensure the blob
    /// directories exist.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        std::fs::create_dir_all(data_dir.join("files"))?;
        std::fs::create_dir_all(data_dir.join("stickers"))?;

        let db_path = data_dir.join("store.db");
        tracing::info!(path = %db_path.display(), "opening store");

        let conn = Connection::open(&db_path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn,
            data_dir: data_dir.to_path_buf(),
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Destroy all persisted state: every table emptied, both blob
    /// namespaces deleted from disk. Used by vault reset; the caller has
    /// already acknowledged the loss.
    pub fn wipe_all(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            "DELETE FROM messages;
             DELETE FROM chat_envelopes;
             DELETE FROM envelopes;
             DELETE FROM stickers;
             DELETE FROM files;
             DELETE FROM invitations;
             DELETE FROM peers;
             UPDATE profile SET alias = NULL, avatar_ref = NULL WHERE id = 1;",
        )?;
        tx.commit()?;

        for namespace in ["files", "stickers"] {
            let dir = self.data_dir.join(namespace);
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
            }
            std::fs::create_dir_all(&dir)?;
        }

        tracing::warn!("store wiped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).expect("should open");

        assert!(dir.path().join("store.db").exists());
        assert!(dir.path().join("files").is_dir());
        assert!(dir.path().join("stickers").is_dir());
        assert_eq!(db.data_dir(), dir.path());
    }

    #[test]
    fn reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        drop(Database::open(dir.path()).unwrap());
        Database::open(dir.path()).expect("second open should succeed");
    }
}
