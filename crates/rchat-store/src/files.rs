//! Content-addressed blob storage.
//!
//! Blob bytes live on disk under `files/<first two hex chars>/<hash>`
//! (stickers under `stickers/<hash>`); the `files` table holds metadata.
//! Every read re-hashes the bytes: a mismatch quarantines the blob so a
//! tampered file can never be served or re-announced.

use std::path::PathBuf;

use rusqlite::params;

use rchat_shared::constants::MAX_STICKER_SIZE;
use rchat_shared::crypto::content_hash;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{FileRecord, Sticker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobNamespace {
    Files,
    Stickers,
}

impl Database {
    pub fn blob_path(&self, hash: &str, namespace: BlobNamespace) -> PathBuf {
        match namespace {
            BlobNamespace::Files => {
                let prefix = &hash[..2.min(hash.len())];
                self.data_dir().join("files").join(prefix).join(hash)
            }
            BlobNamespace::Stickers => self.data_dir().join("stickers").join(hash),
        }
    }

    /// Path used while a transfer is in flight; renamed into place once
    /// the running hash checks out.
    pub fn partial_blob_path(&self, hash: &str, namespace: BlobNamespace) -> PathBuf {
        let mut path = self.blob_path(hash, namespace);
        path.set_extension("part");
        path
    }

    /// Store a complete blob and its metadata row. Returns the content
    /// hash; storing the same bytes twice is a no-op.
    pub fn store_blob(
        &self,
        data: &[u8],
        mime_hint: Option<&str>,
        origin: &str,
        namespace: BlobNamespace,
        now: i64,
    ) -> Result<String> {
        let hash = content_hash(data);
        let path = self.blob_path(&hash, namespace);

        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            // Write-then-rename so a crash never leaves a half-written
            // blob under its final name.
            let tmp = path.with_extension("tmp");
            std::fs::write(&tmp, data)?;
            std::fs::rename(&tmp, &path)?;
        }

        self.insert_file_record(&hash, data.len() as i64, mime_hint, &path, origin, now)?;
        Ok(hash)
    }

    pub fn insert_file_record(
        &self,
        hash: &str,
        size_bytes: i64,
        mime_hint: Option<&str>,
        local_path: &std::path::Path,
        origin: &str,
        now: i64,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO files (hash, size_bytes, mime_hint, local_path, first_seen, origin)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                hash,
                size_bytes,
                mime_hint,
                local_path.to_string_lossy(),
                now,
                origin,
            ],
        )?;
        Ok(())
    }

    pub fn get_file_record(&self, hash: &str) -> Result<FileRecord> {
        Ok(self.conn().query_row(
            "SELECT hash, size_bytes, mime_hint, local_path, first_seen, origin, quarantined
             FROM files WHERE hash = ?1",
            [hash],
            |row| {
                Ok(FileRecord {
                    hash: row.get(0)?,
                    size_bytes: row.get(1)?,
                    mime_hint: row.get(2)?,
                    local_path: row.get(3)?,
                    first_seen: row.get(4)?,
                    origin: row.get(5)?,
                    quarantined: row.get::<_, i64>(6)? != 0,
                })
            },
        )?)
    }

    /// Load a blob, verifying its content address. A mismatch quarantines
    /// the bytes and surfaces as [`StoreError::HashMismatch`].
    pub fn load_blob(&self, hash: &str) -> Result<Vec<u8>> {
        let record = self.get_file_record(hash)?;
        if record.quarantined {
            return Err(StoreError::NotFound);
        }

        let data = std::fs::read(&record.local_path)?;
        if content_hash(&data) != hash {
            tracing::warn!(hash, path = %record.local_path, "blob failed verification, quarantining");
            self.quarantine_blob(hash)?;
            return Err(StoreError::HashMismatch { hash: hash.into() });
        }
        Ok(data)
    }

    /// Mark a blob quarantined and move the bytes aside so nothing serves
    /// them again until a fresh transfer replaces the file.
    pub fn quarantine_blob(&self, hash: &str) -> Result<()> {
        let record = self.get_file_record(hash)?;
        let quarantine_path = format!("{}.quarantine", record.local_path);
        if std::path::Path::new(&record.local_path).exists() {
            let _ = std::fs::rename(&record.local_path, &quarantine_path);
        }
        self.conn().execute(
            "UPDATE files SET quarantined = 1 WHERE hash = ?1",
            [hash],
        )?;
        Ok(())
    }

    /// Clear quarantine state after a fresh, verified copy of the bytes
    /// has been written back to the blob path.
    pub fn clear_quarantine(&self, hash: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE files SET quarantined = 0 WHERE hash = ?1",
            [hash],
        )?;
        Ok(())
    }

    // -- Stickers ----------------------------------------------------------

    /// Add a sticker: WebP only, capped at 1 MiB.
    pub fn add_sticker(&self, webp_bytes: &[u8], name: &str, now: i64) -> Result<String> {
        if webp_bytes.len() as u64 > MAX_STICKER_SIZE {
            return Err(StoreError::InvalidData(format!(
                "sticker exceeds {MAX_STICKER_SIZE} bytes"
            )));
        }
        if !is_webp(webp_bytes) {
            return Err(StoreError::InvalidData("sticker must be WebP".into()));
        }

        let hash = self.store_blob(
            webp_bytes,
            Some("image/webp"),
            "self",
            BlobNamespace::Stickers,
            now,
        )?;

        self.conn().execute(
            "INSERT OR IGNORE INTO stickers (hash, name, created_at) VALUES (?1, ?2, ?3)",
            params![hash, name, now],
        )?;
        Ok(hash)
    }

    pub fn get_stickers(&self) -> Result<Vec<Sticker>> {
        let mut stmt = self.conn().prepare(
            "SELECT s.hash, s.name, f.size_bytes, s.created_at
             FROM stickers s JOIN files f ON f.hash = s.hash
             ORDER BY s.created_at DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(Sticker {
                file_hash: row.get(0)?,
                name: row.get(1)?,
                size_bytes: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;

        let mut stickers = Vec::new();
        for row in rows {
            stickers.push(row?);
        }
        Ok(stickers)
    }

    pub fn delete_sticker(&mut self, hash: &str) -> Result<()> {
        let path = self.blob_path(hash, BlobNamespace::Stickers);

        let tx = self.conn_mut().transaction()?;
        let affected = tx.execute("DELETE FROM stickers WHERE hash = ?1", [hash])?;
        tx.execute("DELETE FROM files WHERE hash = ?1", [hash])?;
        tx.commit()?;

        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        let _ = std::fs::remove_file(path);
        Ok(())
    }
}

fn is_webp(data: &[u8]) -> bool {
    data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        (dir, db)
    }

    fn fake_webp(payload: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"RIFF");
        data.extend_from_slice(&(payload.len() as u32 + 4).to_le_bytes());
        data.extend_from_slice(b"WEBP");
        data.extend_from_slice(payload);
        data
    }

    #[test]
    fn store_and_load_roundtrip() {
        let (_dir, db) = test_db();
        let data = vec![7u8; 100_000];

        let hash = db
            .store_blob(&data, Some("image/png"), "self", BlobNamespace::Files, 1)
            .unwrap();
        assert_eq!(hash, content_hash(&data));

        let loaded = db.load_blob(&hash).unwrap();
        assert_eq!(loaded, data);

        let record = db.get_file_record(&hash).unwrap();
        assert_eq!(record.size_bytes, 100_000);
        assert_eq!(record.origin, "self");
    }

    #[test]
    fn storing_same_bytes_twice_dedupes() {
        let (_dir, db) = test_db();
        let data = b"same bytes".to_vec();

        let h1 = db
            .store_blob(&data, None, "self", BlobNamespace::Files, 1)
            .unwrap();
        let h2 = db
            .store_blob(&data, None, "peer-x", BlobNamespace::Files, 2)
            .unwrap();
        assert_eq!(h1, h2);

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        // First writer's metadata wins.
        assert_eq!(db.get_file_record(&h1).unwrap().origin, "self");
    }

    #[test]
    fn tampered_blob_is_quarantined() {
        let (_dir, db) = test_db();
        let data = b"original content".to_vec();
        let hash = db
            .store_blob(&data, None, "self", BlobNamespace::Files, 1)
            .unwrap();

        // Corrupt the bytes on disk behind the store's back.
        let path = db.blob_path(&hash, BlobNamespace::Files);
        std::fs::write(&path, b"tampered content!").unwrap();

        match db.load_blob(&hash) {
            Err(StoreError::HashMismatch { hash: h }) => assert_eq!(h, hash),
            other => panic!("expected HashMismatch, got {other:?}"),
        }

        // Quarantined: bytes moved aside, further loads refuse.
        assert!(!path.exists());
        assert!(db.get_file_record(&hash).unwrap().quarantined);
        assert!(matches!(db.load_blob(&hash), Err(StoreError::NotFound)));
    }

    #[test]
    fn sticker_constraints() {
        let (_dir, db) = test_db();

        // Not WebP.
        assert!(matches!(
            db.add_sticker(b"definitely a png", "bad", 1),
            Err(StoreError::InvalidData(_))
        ));

        // Too large.
        let huge = fake_webp(&vec![0u8; (MAX_STICKER_SIZE as usize) + 1]);
        assert!(matches!(
            db.add_sticker(&huge, "huge", 1),
            Err(StoreError::InvalidData(_))
        ));

        // Valid.
        let good = fake_webp(b"tiny sticker");
        let hash = db.add_sticker(&good, "wave", 42).unwrap();

        let stickers = db.get_stickers().unwrap();
        assert_eq!(stickers.len(), 1);
        assert_eq!(stickers[0].name, "wave");
        assert_eq!(stickers[0].file_hash, hash);
        assert!(db.blob_path(&hash, BlobNamespace::Stickers).exists());
    }

    #[test]
    fn delete_sticker_removes_blob_and_rows() {
        let (_dir, mut db) = test_db();
        let hash = db.add_sticker(&fake_webp(b"gone soon"), "bye", 1).unwrap();

        db.delete_sticker(&hash).unwrap();
        assert!(db.get_stickers().unwrap().is_empty());
        assert!(!db.blob_path(&hash, BlobNamespace::Stickers).exists());
        assert!(matches!(db.get_file_record(&hash), Err(StoreError::NotFound)));
    }
}
