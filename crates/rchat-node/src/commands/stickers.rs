use rchat_shared::types::now_unix;
use rchat_store::Sticker;

use crate::error::NodeError;
use crate::node::Node;

impl Node {
    pub async fn get_stickers(&self) -> Result<Vec<Sticker>, NodeError> {
        Ok(self.store()?.get_stickers()?)
    }

    /// Add a sticker to the local collection. WebP only, 1 MiB cap.
    pub async fn add_sticker(&self, webp_bytes: &[u8], name: &str) -> Result<(), NodeError> {
        self.store()?.add_sticker(webp_bytes, name, now_unix())?;
        Ok(())
    }

    pub async fn delete_sticker(&self, file_hash: &str) -> Result<(), NodeError> {
        self.store()?.delete_sticker(file_hash)?;
        Ok(())
    }

    pub async fn get_sticker_data(&self, file_hash: &str) -> Result<Vec<u8>, NodeError> {
        Ok(self.store()?.load_blob(file_hash)?)
    }
}
