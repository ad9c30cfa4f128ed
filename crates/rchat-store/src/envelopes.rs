use std::collections::HashMap;

use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Envelope;

impl Database {
    pub fn create_envelope(
        &self,
        id: &str,
        name: &str,
        icon: Option<&str>,
        now: i64,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO envelopes (id, name, icon, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, name, icon, now],
        )?;
        Ok(())
    }

    pub fn update_envelope(&self, id: &str, name: &str, icon: Option<&str>) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE envelopes SET name = ?1, icon = ?2 WHERE id = ?3",
            params![name, icon, id],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Delete an envelope. Member chats fall back to the root bucket; both
    /// steps commit together.
    pub fn delete_envelope(&mut self, id: &str) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        tx.execute("DELETE FROM chat_envelopes WHERE envelope_id = ?1", [id])?;
        let affected = tx.execute("DELETE FROM envelopes WHERE id = ?1", [id])?;

        tx.commit()?;

        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn get_envelopes(&self) -> Result<Vec<Envelope>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id, name, icon, created_at FROM envelopes ORDER BY created_at ASC")?;

        let rows = stmt.query_map([], |row| {
            Ok(Envelope {
                id: row.get(0)?,
                name: row.get(1)?,
                icon: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;

        let mut envelopes = Vec::new();
        for row in rows {
            envelopes.push(row?);
        }
        Ok(envelopes)
    }

    /// Assign a chat to an envelope, or to the root bucket with `None`.
    pub fn assign_chat_to_envelope(&self, chat_id: &str, envelope_id: Option<&str>) -> Result<()> {
        match envelope_id {
            Some(env_id) => {
                let exists: bool = self.conn().query_row(
                    "SELECT EXISTS(SELECT 1 FROM envelopes WHERE id = ?1)",
                    [env_id],
                    |row| row.get(0),
                )?;
                if !exists {
                    return Err(StoreError::NotFound);
                }
                self.conn().execute(
                    "INSERT OR REPLACE INTO chat_envelopes (chat_id, envelope_id) VALUES (?1, ?2)",
                    params![chat_id, env_id],
                )?;
            }
            None => {
                self.conn()
                    .execute("DELETE FROM chat_envelopes WHERE chat_id = ?1", [chat_id])?;
            }
        }
        Ok(())
    }

    pub fn get_chat_assignments(&self) -> Result<HashMap<String, String>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT chat_id, envelope_id FROM chat_envelopes")?;

        let mut result = HashMap::new();
        let rows =
            stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        for row in rows {
            let (chat_id, envelope_id) = row?;
            result.insert(chat_id, envelope_id);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        (dir, db)
    }

    #[test]
    fn crud_roundtrip() {
        let (_dir, db) = test_db();
        db.create_envelope("e1", "Work", Some("💼"), 10).unwrap();
        db.create_envelope("e2", "Family", None, 20).unwrap();

        let envelopes = db.get_envelopes().unwrap();
        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[0].id, "e1");
        assert_eq!(envelopes[0].icon.as_deref(), Some("💼"));

        db.update_envelope("e1", "Office", None).unwrap();
        let envelopes = db.get_envelopes().unwrap();
        assert_eq!(envelopes[0].name, "Office");
        assert!(envelopes[0].icon.is_none());
    }

    #[test]
    fn duplicate_id_conflicts() {
        let (_dir, db) = test_db();
        db.create_envelope("e1", "Work", None, 10).unwrap();
        match db.create_envelope("e1", "Again", None, 11) {
            Err(StoreError::Conflict) => {}
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[test]
    fn delete_reassigns_chats_to_root() {
        let (_dir, mut db) = test_db();
        db.create_envelope("e1", "Work", None, 10).unwrap();
        db.assign_chat_to_envelope("peer-a", Some("e1")).unwrap();
        db.assign_chat_to_envelope("peer-b", Some("e1")).unwrap();

        db.delete_envelope("e1").unwrap();

        assert!(db.get_envelopes().unwrap().is_empty());
        assert!(db.get_chat_assignments().unwrap().is_empty());
    }

    #[test]
    fn assignment_to_missing_envelope_fails() {
        let (_dir, db) = test_db();
        match db.assign_chat_to_envelope("peer-a", Some("ghost")) {
            Err(StoreError::NotFound) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn move_between_envelopes_and_root() {
        let (_dir, db) = test_db();
        db.create_envelope("e1", "Work", None, 10).unwrap();
        db.create_envelope("e2", "Play", None, 20).unwrap();

        db.assign_chat_to_envelope("peer-a", Some("e1")).unwrap();
        db.assign_chat_to_envelope("peer-a", Some("e2")).unwrap();
        assert_eq!(
            db.get_chat_assignments().unwrap().get("peer-a"),
            Some(&"e2".to_string())
        );

        db.assign_chat_to_envelope("peer-a", None).unwrap();
        assert!(db.get_chat_assignments().unwrap().is_empty());
    }
}
