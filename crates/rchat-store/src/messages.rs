use std::collections::HashMap;

use rusqlite::params;

use rchat_shared::types::{ContentType, Direction, MessageStatus};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::ChatMessage;

impl Database {
    /// Insert a message. Idempotent on `id`: re-inserting an existing
    /// message is a no-op and returns `false`.
    pub fn insert_message(&self, msg: &ChatMessage) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO messages
                 (id, chat_id, direction, sender_peer_id, content_type,
                  text_content, file_hash, file_name, created_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                msg.id,
                msg.chat_id,
                msg.direction.as_str(),
                msg.sender_peer_id,
                msg.content_type.as_str(),
                msg.text,
                msg.file_hash,
                msg.file_name,
                msg.created_at,
                msg.status.as_str(),
            ],
        )?;
        Ok(affected > 0)
    }

    /// All messages of a chat, sorted by message id ascending (UUIDv7, so
    /// this is send-time order within each sender).
    pub fn get_chat_history(&self, chat_id: &str) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, chat_id, direction, sender_peer_id, content_type,
                    text_content, file_hash, file_name, created_at, status
             FROM messages
             WHERE chat_id = ?1
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map([chat_id], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message(&self, msg_id: &str) -> Result<ChatMessage> {
        Ok(self.conn().query_row(
            "SELECT id, chat_id, direction, sender_peer_id, content_type,
                    text_content, file_hash, file_name, created_at, status
             FROM messages WHERE id = ?1",
            [msg_id],
            row_to_message,
        )?)
    }

    /// `chat_id -> max(created_at)`, used by the UI to sort conversations.
    pub fn get_chat_latest_times(&self) -> Result<HashMap<String, i64>> {
        let mut stmt = self.conn().prepare(
            "SELECT chat_id, MAX(created_at) FROM messages GROUP BY chat_id",
        )?;

        let mut result = HashMap::new();
        let rows =
            stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (chat_id, latest) = row?;
            result.insert(chat_id, latest);
        }
        Ok(result)
    }

    /// Advance a message's status. Transitions that would move backward
    /// along `pending -> sent -> delivered -> read` are discarded (returns
    /// `false`); `failed` is accepted only from `pending`.
    pub fn update_message_status(&self, msg_id: &str, status: MessageStatus) -> Result<bool> {
        let current: String = self
            .conn()
            .query_row("SELECT status FROM messages WHERE id = ?1", [msg_id], |row| {
                row.get(0)
            })?;

        let current = MessageStatus::from_str(&current)
            .ok_or_else(|| StoreError::InvalidData(format!("bad status '{current}'")))?;

        if !current.can_advance_to(status) {
            return Ok(false);
        }

        self.conn().execute(
            "UPDATE messages SET status = ?1 WHERE id = ?2",
            params![status.as_str(), msg_id],
        )?;
        Ok(true)
    }

    /// Mark every inbound message of a chat as read; returns the ids that
    /// actually transitioned (the ones a read receipt is owed for).
    pub fn mark_chat_read(&self, chat_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn().prepare(
            "SELECT id FROM messages
             WHERE chat_id = ?1 AND direction = 'in' AND status != 'read'",
        )?;
        let ids: Vec<String> = stmt
            .query_map([chat_id], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        drop(stmt);

        if !ids.is_empty() {
            self.conn().execute(
                "UPDATE messages SET status = 'read'
                 WHERE chat_id = ?1 AND direction = 'in' AND status != 'read'",
                [chat_id],
            )?;
        }
        Ok(ids)
    }

    /// `chat_id -> count of inbound messages not yet read`.
    pub fn get_unread_counts(&self) -> Result<HashMap<String, i64>> {
        let mut stmt = self.conn().prepare(
            "SELECT chat_id, COUNT(*) FROM messages
             WHERE direction = 'in' AND status != 'read'
             GROUP BY chat_id",
        )?;

        let mut result = HashMap::new();
        let rows =
            stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (chat_id, count) = row?;
            result.insert(chat_id, count);
        }
        Ok(result)
    }

    /// Remove a message outright. Only used to roll back an insert whose
    /// enqueue was refused; user-visible deletion does not exist.
    pub fn delete_message(&self, msg_id: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM messages WHERE id = ?1", [msg_id])?;
        Ok(affected > 0)
    }

    /// Outbound messages still waiting for a session, oldest first. Used to
    /// refill the per-peer outbox after a restart.
    pub fn pending_outbound(&self, chat_id: &str) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, chat_id, direction, sender_peer_id, content_type,
                    text_content, file_hash, file_name, created_at, status
             FROM messages
             WHERE chat_id = ?1 AND direction = 'out' AND status = 'pending'
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map([chat_id], row_to_message)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let direction_str: String = row.get(2)?;
    let content_type_str: String = row.get(4)?;
    let status_str: String = row.get(9)?;

    let parse_err = |idx: usize, what: &str| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("invalid {what}").into(),
        )
    };

    Ok(ChatMessage {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        direction: Direction::from_str(&direction_str).ok_or_else(|| parse_err(2, "direction"))?,
        sender_peer_id: row.get(3)?,
        content_type: ContentType::from_str(&content_type_str)
            .ok_or_else(|| parse_err(4, "content type"))?,
        text: row.get(5)?,
        file_hash: row.get(6)?,
        file_name: row.get(7)?,
        created_at: row.get(8)?,
        status: MessageStatus::from_str(&status_str).ok_or_else(|| parse_err(9, "status"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rchat_shared::protocol::new_msg_id;
    use rchat_shared::types::now_unix;

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        (dir, db)
    }

    fn text_message(chat_id: &str, direction: Direction, text: &str) -> ChatMessage {
        ChatMessage {
            id: new_msg_id(),
            chat_id: chat_id.into(),
            direction,
            sender_peer_id: match direction {
                Direction::Out => "me".into(),
                Direction::In => chat_id.into(),
            },
            content_type: ContentType::Text,
            text: Some(text.into()),
            file_hash: None,
            file_name: None,
            created_at: now_unix(),
            status: match direction {
                Direction::Out => MessageStatus::Pending,
                Direction::In => MessageStatus::Delivered,
            },
        }
    }

    #[test]
    fn insert_is_idempotent() {
        let (_dir, db) = test_db();
        let msg = text_message("peer-a", Direction::Out, "hello");

        assert!(db.insert_message(&msg).unwrap());
        assert!(!db.insert_message(&msg).unwrap());

        let history = db.get_chat_history("peer-a").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0], msg);
    }

    #[test]
    fn history_is_sorted_by_msg_id() {
        let (_dir, db) = test_db();
        let first = text_message("peer-a", Direction::Out, "one");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = text_message("peer-a", Direction::In, "two");

        // Insert out of order.
        db.insert_message(&second).unwrap();
        db.insert_message(&first).unwrap();

        let history = db.get_chat_history("peer-a").unwrap();
        assert_eq!(history[0].text.as_deref(), Some("one"));
        assert_eq!(history[1].text.as_deref(), Some("two"));
    }

    #[test]
    fn status_moves_only_forward() {
        let (_dir, db) = test_db();
        let msg = text_message("peer-a", Direction::Out, "hi");
        db.insert_message(&msg).unwrap();

        assert!(db.update_message_status(&msg.id, MessageStatus::Sent).unwrap());
        assert!(db
            .update_message_status(&msg.id, MessageStatus::Delivered)
            .unwrap());

        // Late 'sent' receipt after 'delivered' is discarded.
        assert!(!db.update_message_status(&msg.id, MessageStatus::Sent).unwrap());
        assert_eq!(db.get_message(&msg.id).unwrap().status, MessageStatus::Delivered);

        assert!(db.update_message_status(&msg.id, MessageStatus::Read).unwrap());
        assert!(!db
            .update_message_status(&msg.id, MessageStatus::Delivered)
            .unwrap());
    }

    #[test]
    fn failed_only_from_pending() {
        let (_dir, db) = test_db();
        let msg = text_message("peer-a", Direction::Out, "hi");
        db.insert_message(&msg).unwrap();
        db.update_message_status(&msg.id, MessageStatus::Sent).unwrap();

        assert!(!db.update_message_status(&msg.id, MessageStatus::Failed).unwrap());

        let fresh = text_message("peer-a", Direction::Out, "doomed");
        db.insert_message(&fresh).unwrap();
        assert!(db.update_message_status(&fresh.id, MessageStatus::Failed).unwrap());
    }

    #[test]
    fn unknown_message_is_not_found() {
        let (_dir, db) = test_db();
        match db.update_message_status("no-such-id", MessageStatus::Sent) {
            Err(StoreError::NotFound) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn latest_times_track_inserts() {
        let (_dir, db) = test_db();
        let mut a = text_message("peer-a", Direction::Out, "x");
        a.created_at = 100;
        let mut b = text_message("peer-a", Direction::Out, "y");
        b.created_at = 200;
        let mut c = text_message("peer-b", Direction::In, "z");
        c.created_at = 150;

        db.insert_message(&a).unwrap();
        db.insert_message(&b).unwrap();
        db.insert_message(&c).unwrap();

        let times = db.get_chat_latest_times().unwrap();
        assert_eq!(times.get("peer-a"), Some(&200));
        assert_eq!(times.get("peer-b"), Some(&150));
    }

    #[test]
    fn mark_chat_read_returns_transitioned_ids() {
        let (_dir, db) = test_db();
        let inbound = text_message("peer-a", Direction::In, "unread");
        let outbound = text_message("peer-a", Direction::Out, "mine");
        db.insert_message(&inbound).unwrap();
        db.insert_message(&outbound).unwrap();

        let ids = db.mark_chat_read("peer-a").unwrap();
        assert_eq!(ids, vec![inbound.id.clone()]);
        assert_eq!(db.get_message(&inbound.id).unwrap().status, MessageStatus::Read);
        // Outbound untouched.
        assert_eq!(db.get_message(&outbound.id).unwrap().status, MessageStatus::Pending);

        // Second call has nothing left to ack.
        assert!(db.mark_chat_read("peer-a").unwrap().is_empty());
    }

    #[test]
    fn unread_counts_ignore_read_and_outbound() {
        let (_dir, db) = test_db();
        db.insert_message(&text_message("peer-a", Direction::In, "1")).unwrap();
        db.insert_message(&text_message("peer-a", Direction::In, "2")).unwrap();
        db.insert_message(&text_message("peer-a", Direction::Out, "3")).unwrap();

        let counts = db.get_unread_counts().unwrap();
        assert_eq!(counts.get("peer-a"), Some(&2));

        db.mark_chat_read("peer-a").unwrap();
        assert!(db.get_unread_counts().unwrap().is_empty());
    }

    #[test]
    fn pending_outbound_lists_queue_in_order() {
        let (_dir, db) = test_db();
        let first = text_message("peer-a", Direction::Out, "first");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = text_message("peer-a", Direction::Out, "second");
        let mut sent = text_message("peer-a", Direction::Out, "done");
        sent.status = MessageStatus::Sent;

        db.insert_message(&second).unwrap();
        db.insert_message(&first).unwrap();
        db.insert_message(&sent).unwrap();

        let pending = db.pending_outbound("peer-a").unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].text.as_deref(), Some("first"));
        assert_eq!(pending[1].text.as_deref(), Some("second"));
    }
}
