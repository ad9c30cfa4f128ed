use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::PendingInvitation;

const COLUMNS: &str =
    "nonce, invitee_handle, password_hash, offer_json, created_at, expires_at, state";

impl Database {
    /// Record a freshly generated invite password. The invitee and sealed
    /// offer are attached later by `create_invite`.
    pub fn insert_invitation(
        &self,
        nonce: &str,
        password_hash: &str,
        now: i64,
        expires_at: i64,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO invitations (nonce, password_hash, created_at, expires_at, state)
             VALUES (?1, ?2, ?3, ?4, 'pending')",
            params![nonce, password_hash, now, expires_at],
        )?;
        Ok(())
    }

    pub fn attach_invitation_offer(
        &self,
        nonce: &str,
        invitee_handle: &str,
        offer_json: &str,
    ) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE invitations SET invitee_handle = ?1, offer_json = ?2
             WHERE nonce = ?3 AND state = 'pending'",
            params![invitee_handle, offer_json, nonce],
        )?;
        if affected == 0 {
            return Err(crate::error::StoreError::NotFound);
        }
        Ok(())
    }

    pub fn find_invitation_by_password_hash(
        &self,
        password_hash: &str,
    ) -> Result<Option<PendingInvitation>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM invitations
             WHERE password_hash = ?1 AND state = 'pending'"
        ))?;
        let mut rows = stmt.query_map([password_hash], row_to_invitation)?;
        rows.next().transpose().map_err(Into::into)
    }

    pub fn find_invitation_by_nonce(&self, nonce: &str) -> Result<Option<PendingInvitation>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {COLUMNS} FROM invitations WHERE nonce = ?1"))?;
        let mut rows = stmt.query_map([nonce], row_to_invitation)?;
        rows.next().transpose().map_err(Into::into)
    }

    /// Pending, unexpired invitations whose sealed offers should keep
    /// being republished.
    pub fn publishable_invitations(&self, now: i64) -> Result<Vec<PendingInvitation>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM invitations
             WHERE state = 'pending' AND offer_json IS NOT NULL AND expires_at > ?1
             ORDER BY created_at ASC"
        ))?;

        let rows = stmt.query_map([now], row_to_invitation)?;
        let mut invites = Vec::new();
        for row in rows {
            invites.push(row?);
        }
        Ok(invites)
    }

    pub fn mark_invitation_redeemed(&self, nonce: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE invitations SET state = 'redeemed' WHERE nonce = ?1",
            [nonce],
        )?;
        Ok(())
    }

    /// Flip expired pending invitations to `expired`; returns how many.
    pub fn expire_invitations(&self, now: i64) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE invitations SET state = 'expired'
             WHERE state = 'pending' AND expires_at <= ?1",
            [now],
        )?;
        Ok(affected)
    }
}

fn row_to_invitation(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingInvitation> {
    Ok(PendingInvitation {
        nonce: row.get(0)?,
        invitee_handle: row.get(1)?,
        password_hash: row.get(2)?,
        offer_json: row.get(3)?,
        created_at: row.get(4)?,
        expires_at: row.get(5)?,
        state: row.get(6)?,
    })
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
    fn invitation_lifecycle() {
        let (_dir, db) = test_db();
        db.insert_invitation("aabb", "hash-1", 100, 1000).unwrap();

        // Not publishable until an offer is attached.
        assert!(db.publishable_invitations(150).unwrap().is_empty());

        db.attach_invitation_offer("aabb", "bob", "{\"sealed\":true}")
            .unwrap();
        let publishable = db.publishable_invitations(150).unwrap();
        assert_eq!(publishable.len(), 1);
        assert_eq!(publishable[0].invitee_handle.as_deref(), Some("bob"));

        let found = db.find_invitation_by_password_hash("hash-1").unwrap();
        assert!(found.is_some());

        db.mark_invitation_redeemed("aabb").unwrap();
        assert!(db.find_invitation_by_password_hash("hash-1").unwrap().is_none());
        assert!(db.publishable_invitations(150).unwrap().is_empty());
        assert_eq!(
            db.find_invitation_by_nonce("aabb").unwrap().unwrap().state,
            "redeemed"
        );
    }

    #[test]
    fn expiry_sweep() {
        let (_dir, db) = test_db();
        db.insert_invitation("old", "h1", 100, 500).unwrap();
        db.insert_invitation("new", "h2", 100, 5000).unwrap();

        assert_eq!(db.expire_invitations(1000).unwrap(), 1);
        assert!(db.find_invitation_by_password_hash("h1").unwrap().is_none());
        assert!(db.find_invitation_by_password_hash("h2").unwrap().is_some());
    }
}
