use rchat_store::UserProfile;

use crate::error::NodeError;
use crate::node::Node;

impl Node {
    pub async fn get_user_profile(&self) -> Result<UserProfile, NodeError> {
        Ok(self.store()?.get_profile()?)
    }

    /// Partial update; omitted fields keep their value.
    pub async fn update_user_profile(
        &self,
        alias: Option<&str>,
        avatar_ref: Option<&str>,
    ) -> Result<(), NodeError> {
        self.store()?.update_profile(alias, avatar_ref)?;
        Ok(())
    }
}
