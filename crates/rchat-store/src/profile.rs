use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::UserProfile;

impl Database {
    pub fn get_profile(&self) -> Result<UserProfile> {
        Ok(self.conn().query_row(
            "SELECT alias, avatar_ref FROM profile WHERE id = 1",
            [],
            |row| {
                Ok(UserProfile {
                    alias: row.get(0)?,
                    avatar_ref: row.get(1)?,
                })
            },
        )?)
    }

    /// Partial update: `None` fields keep their current value.
    pub fn update_profile(&self, alias: Option<&str>, avatar_ref: Option<&str>) -> Result<()> {
        self.conn().execute(
            "UPDATE profile SET
                 alias = COALESCE(?1, alias),
                 avatar_ref = COALESCE(?2, avatar_ref)
             WHERE id = 1",
            params![alias, avatar_ref],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_partial_updates() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        assert_eq!(db.get_profile().unwrap(), UserProfile::default());

        db.update_profile(Some("ata"), None).unwrap();
        db.update_profile(None, Some("avatar-hash")).unwrap();

        let profile = db.get_profile().unwrap();
        assert_eq!(profile.alias.as_deref(), Some("ata"));
        assert_eq!(profile.avatar_ref.as_deref(), Some("avatar-hash"));

        // None does not clear.
        db.update_profile(None, None).unwrap();
        assert_eq!(db.get_profile().unwrap().alias.as_deref(), Some("ata"));
    }
}
