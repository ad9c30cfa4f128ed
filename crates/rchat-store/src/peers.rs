use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::TrustedPeer;

impl Database {
    /// Add or refresh a trusted peer. Re-adding updates the handle,
    /// public key and last-seen time but keeps pin/order state.
    pub fn upsert_peer(
        &self,
        peer_id: &str,
        handle: &str,
        public_key: &[u8],
        now: i64,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO peers (id, handle, public_key, added_at, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(id) DO UPDATE SET
                 handle = ?2,
                 public_key = ?3,
                 last_seen = ?4",
            params![peer_id, handle, public_key, now],
        )?;
        Ok(())
    }

    pub fn get_peers(&self) -> Result<Vec<TrustedPeer>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, handle, public_key, added_at, last_seen, pinned, order_index
             FROM peers
             ORDER BY pinned DESC, order_index ASC, added_at ASC",
        )?;

        let rows = stmt.query_map([], row_to_peer)?;
        let mut peers = Vec::new();
        for row in rows {
            peers.push(row?);
        }
        Ok(peers)
    }

    pub fn get_peer(&self, peer_id: &str) -> Result<TrustedPeer> {
        Ok(self.conn().query_row(
            "SELECT id, handle, public_key, added_at, last_seen, pinned, order_index
             FROM peers WHERE id = ?1",
            [peer_id],
            row_to_peer,
        )?)
    }

    /// Look a trusted peer up by its rendezvous handle.
    pub fn get_peer_by_handle(&self, handle: &str) -> Result<TrustedPeer> {
        Ok(self.conn().query_row(
            "SELECT id, handle, public_key, added_at, last_seen, pinned, order_index
             FROM peers WHERE lower(handle) = lower(?1)",
            [handle],
            row_to_peer,
        )?)
    }

    pub fn is_peer(&self, peer_id: &str) -> bool {
        self.conn()
            .query_row("SELECT 1 FROM peers WHERE id = ?1", [peer_id], |_| Ok(()))
            .is_ok()
    }

    /// Remove a peer and everything that hangs off it: the chat log and
    /// the envelope assignment, in one transaction.
    pub fn delete_peer(&mut self, peer_id: &str) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        tx.execute("DELETE FROM messages WHERE chat_id = ?1", [peer_id])?;
        tx.execute("DELETE FROM chat_envelopes WHERE chat_id = ?1", [peer_id])?;
        let affected = tx.execute("DELETE FROM peers WHERE id = ?1", [peer_id])?;

        tx.commit()?;

        if affected == 0 {
            return Err(crate::error::StoreError::NotFound);
        }
        Ok(())
    }

    pub fn set_peer_pinned(&self, peer_id: &str, pinned: bool) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE peers SET pinned = ?1 WHERE id = ?2",
            params![pinned as i64, peer_id],
        )?;
        if affected == 0 {
            return Err(crate::error::StoreError::NotFound);
        }
        Ok(())
    }

    pub fn get_pinned_peers(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id FROM peers WHERE pinned = 1 ORDER BY order_index ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(ids)
    }

    /// Manual sort position within the chat list.
    pub fn set_peer_order(&self, peer_id: &str, order_index: i64) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE peers SET order_index = ?1 WHERE id = ?2",
            params![order_index, peer_id],
        )?;
        if affected == 0 {
            return Err(crate::error::StoreError::NotFound);
        }
        Ok(())
    }

    pub fn touch_peer(&self, peer_id: &str, now: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE peers SET last_seen = ?1 WHERE id = ?2",
            params![now, peer_id],
        )?;
        Ok(())
    }
}

fn row_to_peer(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrustedPeer> {
    Ok(TrustedPeer {
        id: row.get(0)?,
        handle: row.get(1)?,
        public_key: row.get(2)?,
        added_at: row.get(3)?,
        last_seen: row.get(4)?,
        pinned: row.get::<_, i64>(5)? != 0,
        order_index: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::models::ChatMessage;
    use rchat_shared::protocol::new_msg_id;
    use rchat_shared::types::{ContentType, Direction, MessageStatus};

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        (dir, db)
    }

    #[test]
    fn upsert_and_lookup() {
        let (_dir, db) = test_db();
        db.upsert_peer("12D3KooWpeer", "alice", &[1u8; 32], 100).unwrap();

        assert!(db.is_peer("12D3KooWpeer"));
        let peer = db.get_peer("12D3KooWpeer").unwrap();
        assert_eq!(peer.handle, "alice");
        assert_eq!(peer.added_at, 100);

        let by_handle = db.get_peer_by_handle("ALICE").unwrap();
        assert_eq!(by_handle.id, "12D3KooWpeer");
    }

    #[test]
    fn upsert_keeps_pin_state() {
        let (_dir, db) = test_db();
        db.upsert_peer("p1", "alice", &[1u8; 32], 100).unwrap();
        db.set_peer_pinned("p1", true).unwrap();

        db.upsert_peer("p1", "alice-renamed", &[1u8; 32], 200).unwrap();

        let peer = db.get_peer("p1").unwrap();
        assert!(peer.pinned);
        assert_eq!(peer.handle, "alice-renamed");
        assert_eq!(peer.last_seen, 200);
        assert_eq!(peer.added_at, 100);
    }

    #[test]
    fn delete_peer_removes_chat_state() {
        let (_dir, mut db) = test_db();
        db.upsert_peer("p1", "alice", &[1u8; 32], 100).unwrap();
        db.create_envelope("env", "Work", None, 100).unwrap();
        db.assign_chat_to_envelope("p1", Some("env")).unwrap();
        db.insert_message(&ChatMessage {
            id: new_msg_id(),
            chat_id: "p1".into(),
            direction: Direction::Out,
            sender_peer_id: "me".into(),
            content_type: ContentType::Text,
            text: Some("bye".into()),
            file_hash: None,
            file_name: None,
            created_at: 100,
            status: MessageStatus::Pending,
        })
        .unwrap();

        db.delete_peer("p1").unwrap();

        assert!(!db.is_peer("p1"));
        assert!(db.get_chat_history("p1").unwrap().is_empty());
        assert!(db.get_chat_assignments().unwrap().is_empty());
    }

    #[test]
    fn delete_unknown_peer_is_not_found() {
        let (_dir, mut db) = test_db();
        match db.delete_peer("ghost") {
            Err(StoreError::NotFound) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn manual_ordering_applies() {
        let (_dir, db) = test_db();
        db.upsert_peer("p1", "a", &[0u8; 32], 1).unwrap();
        db.upsert_peer("p2", "b", &[0u8; 32], 2).unwrap();
        db.set_peer_order("p2", 0).unwrap();
        db.set_peer_order("p1", 1).unwrap();

        let peers = db.get_peers().unwrap();
        assert_eq!(peers[0].id, "p2");
        assert_eq!(peers[1].id, "p1");
    }

    #[test]
    fn pinned_list() {
        let (_dir, db) = test_db();
        db.upsert_peer("p1", "a", &[0u8; 32], 1).unwrap();
        db.upsert_peer("p2", "b", &[0u8; 32], 2).unwrap();
        db.set_peer_pinned("p2", true).unwrap();

        assert_eq!(db.get_pinned_peers().unwrap(), vec!["p2".to_string()]);

        db.set_peer_pinned("p2", false).unwrap();
        assert!(db.get_pinned_peers().unwrap().is_empty());
    }
}
