use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::path::Path;

use rchat_shared::constants::MAX_FILE_SIZE;
use rchat_shared::protocol::{new_msg_id, FrameBody};
use rchat_shared::types::{now_unix, ContentType, Direction, MessageStatus, SELF_CHAT};
use rchat_store::files::BlobNamespace;
use rchat_store::ChatMessage;

use crate::error::NodeError;
use crate::events::Event;
use crate::node::Node;
use crate::session::OutboundFrame;

impl Node {
    pub async fn send_image_message(
        &self,
        peer_id: &str,
        file_path: &str,
    ) -> Result<String, NodeError> {
        self.send_file_message(peer_id, file_path, ContentType::Image)
            .await
    }

    pub async fn send_document_message(
        &self,
        peer_id: &str,
        file_path: &str,
    ) -> Result<String, NodeError> {
        self.send_file_message(peer_id, file_path, ContentType::Document)
            .await
    }

    pub async fn send_video_message(
        &self,
        peer_id: &str,
        file_path: &str,
    ) -> Result<String, NodeError> {
        self.send_file_message(peer_id, file_path, ContentType::Video)
            .await
    }

    /// Shared path for image/document/video sends: store the bytes
    /// content-addressed, record the message, announce the hash. The
    /// recipient pulls the bytes over the file protocol.
    async fn send_file_message(
        &self,
        peer_id: &str,
        file_path: &str,
        content_type: ContentType,
    ) -> Result<String, NodeError> {
        let data = std::fs::read(file_path)?;
        if data.len() as u64 > MAX_FILE_SIZE {
            return Err(NodeError::FileTooLarge);
        }

        let file_name = Path::new(file_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();
        let mime = mime_for(content_type, file_path);

        let file_hash = self.store()?.store_blob(
            &data,
            Some(mime),
            "self",
            BlobNamespace::Files,
            now_unix(),
        )?;

        if peer_id == SELF_CHAT {
            self.insert_self_message(
                content_type,
                None,
                Some(file_hash.clone()),
                Some(file_name),
            )
            .await?;
            return Ok(file_hash);
        }

        let me = self.local_peer_str().await?;
        if !self.store()?.is_peer(peer_id) {
            return Err(NodeError::UnknownPeer(peer_id.to_string()));
        }

        let msg_id = new_msg_id();
        let row = ChatMessage {
            id: msg_id.clone(),
            chat_id: peer_id.to_string(),
            direction: Direction::Out,
            sender_peer_id: me,
            content_type,
            text: None,
            file_hash: Some(file_hash.clone()),
            file_name: Some(file_name.clone()),
            created_at: now_unix(),
            status: MessageStatus::Pending,
        };
        self.store()?.insert_message(&row)?;
        self.inner.events.emit(Event::MessageStatusUpdated {
            msg_id: msg_id.clone(),
            chat_id: peer_id.to_string(),
            status: MessageStatus::Pending.as_str().to_string(),
        });

        let frame = OutboundFrame {
            msg_id: msg_id.clone(),
            chat_id: peer_id.to_string(),
            body: FrameBody::FileAnnounce {
                file_hash: file_hash.clone(),
                size: data.len() as u64,
                mime_hint: mime.to_string(),
                file_name,
                content_type,
            },
            track_status: true,
        };
        if let Err(e) = self.inner.sessions.enqueue(peer_id, frame) {
            let _ = self.store()?.delete_message(&msg_id);
            return Err(e);
        }

        Ok(file_hash)
    }

    /// A stored image as a base64 data URL for direct display.
    pub async fn get_image_data(&self, file_hash: &str) -> Result<String, NodeError> {
        self.blob_data_url(file_hash, "image/png").await
    }

    pub async fn get_video_data(&self, file_hash: &str) -> Result<String, NodeError> {
        self.blob_data_url(file_hash, "video/mp4").await
    }

    async fn blob_data_url(&self, file_hash: &str, fallback_mime: &str) -> Result<String, NodeError> {
        let store = self.store()?;
        let data = store.load_blob(file_hash)?;
        let mime = store
            .get_file_record(file_hash)?
            .mime_hint
            .unwrap_or_else(|| fallback_mime.to_string());
        Ok(format!("data:{mime};base64,{}", BASE64.encode(&data)))
    }

    /// Read an image straight from disk as a data URL (previews of files
    /// not yet sent).
    pub async fn get_image_from_path(&self, file_path: &str) -> Result<String, NodeError> {
        let data = std::fs::read(file_path)?;
        let mime = image_mime(file_path);
        Ok(format!("data:{mime};base64,{}", BASE64.encode(&data)))
    }

    pub async fn save_image_to_file(
        &self,
        file_hash: &str,
        target_path: &str,
    ) -> Result<(), NodeError> {
        self.save_blob_to_file(file_hash, target_path).await
    }

    pub async fn save_document_to_file(
        &self,
        file_hash: &str,
        target_path: &str,
    ) -> Result<(), NodeError> {
        self.save_blob_to_file(file_hash, target_path).await
    }

    async fn save_blob_to_file(&self, file_hash: &str, target_path: &str) -> Result<(), NodeError> {
        let data = self.store()?.load_blob(file_hash)?;
        std::fs::write(target_path, &data)?;
        tracing::info!(hash = %file_hash, path = %target_path, "blob exported");
        Ok(())
    }
}

fn mime_for(content_type: ContentType, file_path: &str) -> &'static str {
    match content_type {
        ContentType::Image | ContentType::Sticker => image_mime(file_path),
        ContentType::Document => document_mime(file_path),
        ContentType::Video => video_mime(file_path),
        ContentType::Text => "text/plain",
    }
}

fn extension(file_path: &str) -> Option<String> {
    Path::new(file_path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

fn image_mime(file_path: &str) -> &'static str {
    match extension(file_path).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

fn document_mime(file_path: &str) -> &'static str {
    match extension(file_path).as_deref() {
        Some("pdf") => "application/pdf",
        Some("doc") => "application/msword",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("txt") => "text/plain",
        Some("csv") => "text/csv",
        Some("xls") => "application/vnd.ms-excel",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}

fn video_mime(file_path: &str) -> &'static str {
    match extension(file_path).as_deref() {
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        _ => "video/mp4",
    }
}
