use std::collections::HashMap;

use rchat_shared::types::now_unix;
use rchat_store::Envelope;

use crate::error::NodeError;
use crate::node::Node;

impl Node {
    pub async fn get_envelopes(&self) -> Result<Vec<Envelope>, NodeError> {
        Ok(self.store()?.get_envelopes()?)
    }

    pub async fn create_envelope(
        &self,
        id: &str,
        name: &str,
        icon: Option<&str>,
    ) -> Result<(), NodeError> {
        self.store()?.create_envelope(id, name, icon, now_unix())?;
        Ok(())
    }

    pub async fn update_envelope(
        &self,
        id: &str,
        name: &str,
        icon: Option<&str>,
    ) -> Result<(), NodeError> {
        self.store()?.update_envelope(id, name, icon)?;
        Ok(())
    }

    /// Delete an envelope; member chats return to the root bucket.
    pub async fn delete_envelope(&self, id: &str) -> Result<(), NodeError> {
        self.store()?.delete_envelope(id)?;
        Ok(())
    }

    pub async fn get_chat_assignments(&self) -> Result<HashMap<String, String>, NodeError> {
        Ok(self.store()?.get_chat_assignments()?)
    }

    pub async fn move_chat_to_envelope(
        &self,
        chat_id: &str,
        envelope_id: Option<&str>,
    ) -> Result<(), NodeError> {
        self.store()?.assign_chat_to_envelope(chat_id, envelope_id)?;
        Ok(())
    }
}
