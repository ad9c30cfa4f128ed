//! Content-addressed file transfer.
//!
//! The requester drives everything: a header request opens the transfer,
//! then chunks stream with a fixed flow-control window. The running
//! BLAKE3 is checked after the final chunk; a mismatch quarantines the
//! bytes and reports `file-transfer-failed`. Transfers resume from the
//! length of a leftover partial file, and concurrent fetches of the same
//! blob from the same peer coalesce.

use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use futures::StreamExt;
use libp2p::PeerId;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use rchat_net::{RequestError, SwarmCommand};
use rchat_shared::constants::{
    CHUNK_TIMEOUT_SECS, FILE_CHUNK_SIZE, FILE_WINDOW, MAX_FILE_SIZE, MAX_STICKER_SIZE,
};
use rchat_shared::crypto::ContentHasher;
use rchat_shared::protocol::{FileRequest, FileResponse};
use rchat_shared::types::{now_unix, ContentType};
use rchat_store::files::BlobNamespace;

use crate::error::NodeError;
use crate::events::Event;
use crate::node::{lock_store, RuntimeCtx};

/// Metadata from a `file-announce` frame.
#[derive(Debug, Clone)]
pub(crate) struct Announce {
    pub file_hash: String,
    pub size: u64,
    pub mime_hint: String,
    pub file_name: String,
    pub content_type: ContentType,
}

/// Coalesces concurrent fetches per `(peer, hash)`.
pub(crate) struct TransferManager {
    active: StdMutex<HashSet<String>>,
}

impl TransferManager {
    pub fn new() -> Self {
        Self {
            active: StdMutex::new(HashSet::new()),
        }
    }

    fn begin(&self, key: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string())
    }

    fn end(&self, key: &str) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}

/// Kick off a background fetch of an announced blob.
pub(crate) fn start_fetch(
    ctx: RuntimeCtx,
    transfers: Arc<TransferManager>,
    peer: PeerId,
    announce: Announce,
) {
    tokio::spawn(async move {
        let key = format!("{peer}|{}", announce.file_hash);
        if !transfers.begin(&key) {
            debug!(hash = %announce.file_hash, "transfer already in flight, coalescing");
            return;
        }
        let hash = announce.file_hash.clone();
        if let Err(e) = fetch_file(&ctx, peer, &announce).await {
            warn!(hash = %hash, error = %e, "file transfer failed");
            ctx.events.emit(Event::FileTransferFailed {
                file_hash: hash,
                reason: e.to_string(),
            });
        }
        transfers.end(&key);
    });
}

async fn fetch_file(ctx: &RuntimeCtx, peer: PeerId, announce: &Announce) -> Result<(), NodeError> {
    // Sized caps before any I/O.
    let cap = if announce.content_type == ContentType::Sticker {
        MAX_STICKER_SIZE
    } else {
        MAX_FILE_SIZE
    };
    if announce.size > cap {
        return Err(NodeError::FileTooLarge);
    }

    let namespace = if announce.content_type == ContentType::Sticker {
        BlobNamespace::Stickers
    } else {
        BlobNamespace::Files
    };

    let (final_path, part_path, already_have) = {
        let store = lock_store(&ctx.store)?;
        let have = store.load_blob(&announce.file_hash).is_ok();
        (
            store.blob_path(&announce.file_hash, namespace),
            store.partial_blob_path(&announce.file_hash, namespace),
            have,
        )
    };

    if already_have {
        debug!(hash = %announce.file_hash, "blob already present and verified");
        ctx.events.emit(Event::FileTransferComplete {
            file_hash: announce.file_hash.clone(),
        });
        return Ok(());
    }

    // Resume from a leftover partial file if the offset lines up with a
    // chunk boundary; otherwise restart from zero.
    let mut offset = std::fs::metadata(&part_path).map(|m| m.len()).unwrap_or(0);

    let header = request(
        ctx,
        peer,
        FileRequest::Header {
            file_hash: announce.file_hash.clone(),
            offset,
        },
    )
    .await?;

    let (size, chunk_size) = match header {
        FileResponse::Header { size, chunk_size } => (size, chunk_size),
        FileResponse::NotFound => return Err(NodeError::NotFound),
        other => {
            return Err(NodeError::ProtocolViolation(format!(
                "unexpected header response: {other:?}"
            )))
        }
    };
    if size != announce.size || chunk_size == 0 || chunk_size > FILE_CHUNK_SIZE * 16 {
        return Err(NodeError::ProtocolViolation(
            "implausible transfer header".into(),
        ));
    }

    if offset % chunk_size != 0 || offset > size {
        debug!(hash = %announce.file_hash, offset, "partial file unusable, restarting");
        let _ = std::fs::remove_file(&part_path);
        offset = 0;
    }

    if let Some(parent) = part_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Seed the running hash with whatever the partial file already holds.
    let mut hasher = ContentHasher::new();
    let mut part = std::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&part_path)?;
    if offset > 0 {
        part.seek(SeekFrom::Start(0))?;
        let mut existing = Vec::with_capacity(offset as usize);
        std::io::Read::by_ref(&mut part)
            .take(offset)
            .read_to_end(&mut existing)?;
        hasher.update(&existing);
    }
    part.set_len(offset)?;
    part.seek(SeekFrom::Start(offset))?;

    let first_chunk = offset / chunk_size;
    let total_chunks = size.div_ceil(chunk_size);
    let mut bytes_done = offset;
    let mut last_progress = Instant::now() - Duration::from_secs(1);

    // Fixed window of chunk requests in flight; responses consumed in
    // order so the file and the hash advance sequentially.
    let mut chunks = futures::stream::iter(first_chunk..total_chunks)
        .map(|index| {
            let ctx = ctx.clone();
            let hash = announce.file_hash.clone();
            async move { (index, request_chunk(&ctx, peer, &hash, index).await) }
        })
        .buffered(FILE_WINDOW);

    while let Some((index, result)) = chunks.next().await {
        let bytes = result?;
        let expected = expected_chunk_len(index, total_chunks, size, chunk_size);
        if bytes.len() as u64 != expected {
            return Err(NodeError::ProtocolViolation(format!(
                "chunk {index} has {} bytes, expected {expected}",
                bytes.len()
            )));
        }

        part.write_all(&bytes)?;
        hasher.update(&bytes);
        bytes_done += bytes.len() as u64;

        // Progress events are throttled to at most 10 Hz.
        if last_progress.elapsed() >= Duration::from_millis(100) {
            last_progress = Instant::now();
            ctx.events.emit(Event::FileTransferProgress {
                file_hash: announce.file_hash.clone(),
                bytes_done,
                total: size,
            });
        }
    }
    part.flush()?;
    drop(part);

    if hasher.finalize() != announce.file_hash {
        let _ = std::fs::remove_file(&part_path);
        return Err(NodeError::ProtocolViolation(
            "transferred bytes do not match the content hash".into(),
        ));
    }

    std::fs::rename(&part_path, &final_path)?;
    {
        let store = lock_store(&ctx.store)?;
        store.insert_file_record(
            &announce.file_hash,
            size as i64,
            Some(&announce.mime_hint),
            &final_path,
            &peer.to_string(),
            now_unix(),
        )?;
        // A re-fetch after tampering replaces the quarantined bytes.
        store.clear_quarantine(&announce.file_hash)?;
    }

    ctx.events.emit(Event::FileTransferProgress {
        file_hash: announce.file_hash.clone(),
        bytes_done: size,
        total: size,
    });
    ctx.events.emit(Event::FileTransferComplete {
        file_hash: announce.file_hash.clone(),
    });
    info!(hash = %announce.file_hash, size, "file transfer complete");
    Ok(())
}

/// One chunk request with bounded retries; chunk losses are the common
/// recoverable failure on a flapping link.
async fn request_chunk(
    ctx: &RuntimeCtx,
    peer: PeerId,
    file_hash: &str,
    index: u64,
) -> Result<Vec<u8>, NodeError> {
    let mut delay = Duration::from_secs(1);
    for attempt in 0..3 {
        let response = request(
            ctx,
            peer,
            FileRequest::Chunk {
                file_hash: file_hash.to_string(),
                index,
            },
        )
        .await;

        match response {
            Ok(FileResponse::Chunk { index: got, bytes }) if got == index => return Ok(bytes),
            Ok(FileResponse::NotFound) => return Err(NodeError::NotFound),
            Ok(other) => {
                return Err(NodeError::ProtocolViolation(format!(
                    "unexpected chunk response: {other:?}"
                )))
            }
            Err(e) if attempt < 2 => {
                debug!(index, error = %e, "chunk request failed, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("retry loop returns on the final attempt")
}

async fn request(
    ctx: &RuntimeCtx,
    peer: PeerId,
    request: FileRequest,
) -> Result<FileResponse, NodeError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    ctx.cmd_tx
        .send(SwarmCommand::SendFileRequest {
            peer_id: peer,
            request,
            reply: reply_tx,
        })
        .await
        .map_err(|_| NodeError::from(RequestError::SwarmGone))?;

    match tokio::time::timeout(Duration::from_secs(CHUNK_TIMEOUT_SECS + 5), reply_rx).await {
        Ok(Ok(result)) => result.map_err(NodeError::from),
        Ok(Err(_)) => Err(RequestError::SwarmGone.into()),
        Err(_) => Err(NodeError::Timeout),
    }
}

fn expected_chunk_len(index: u64, total_chunks: u64, size: u64, chunk_size: u64) -> u64 {
    if index + 1 == total_chunks {
        size - index * chunk_size
    } else {
        chunk_size
    }
}

/// Serve an inbound `/rchat/file/1` request. Untrusted peers get
/// silence; missing or quarantined blobs get `NotFound`.
pub(crate) async fn handle_inbound_file_request(
    ctx: &RuntimeCtx,
    peer: PeerId,
    req: FileRequest,
    channel: libp2p::request_response::ResponseChannel<FileResponse>,
) {
    let peer_str = peer.to_string();
    let trusted = match lock_store(&ctx.store) {
        Ok(store) => store.is_peer(&peer_str),
        Err(_) => false,
    };
    if !trusted {
        warn!(peer = %peer_str, "dropping file request from untrusted peer");
        return;
    }

    let response = match req {
        FileRequest::Header { file_hash, offset } => serve_header(ctx, &file_hash, offset),
        FileRequest::Chunk { file_hash, index } => serve_chunk(ctx, &file_hash, index),
    };

    let _ = ctx
        .cmd_tx
        .send(SwarmCommand::RespondFile { channel, response })
        .await;
}

fn serve_header(ctx: &RuntimeCtx, file_hash: &str, offset: u64) -> FileResponse {
    let record = match lock_store(&ctx.store).ok().and_then(|s| s.get_file_record(file_hash).ok()) {
        Some(r) if !r.quarantined => r,
        _ => return FileResponse::NotFound,
    };
    let size = record.size_bytes as u64;
    if offset > size {
        // Implausible resume point; the header below still tells the
        // requester the real size, so it restarts from zero.
        tracing::debug!(hash = %file_hash, offset, size, "resume offset beyond blob size");
    }
    FileResponse::Header {
        size,
        chunk_size: FILE_CHUNK_SIZE,
    }
}

fn serve_chunk(ctx: &RuntimeCtx, file_hash: &str, index: u64) -> FileResponse {
    let record = match lock_store(&ctx.store).ok().and_then(|s| s.get_file_record(file_hash).ok()) {
        Some(r) if !r.quarantined => r,
        _ => return FileResponse::NotFound,
    };

    let size = record.size_bytes as u64;
    let start = index * FILE_CHUNK_SIZE;
    if start >= size {
        return FileResponse::NotFound;
    }
    let len = (size - start).min(FILE_CHUNK_SIZE);

    let mut file = match std::fs::File::open(&record.local_path) {
        Ok(f) => f,
        Err(_) => return FileResponse::NotFound,
    };
    if file.seek(SeekFrom::Start(start)).is_err() {
        return FileResponse::NotFound;
    }
    let mut bytes = vec![0u8; len as usize];
    if file.read_exact(&mut bytes).is_err() {
        return FileResponse::NotFound;
    }

    FileResponse::Chunk { index, bytes }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_length_math() {
        // 150 KiB file, 64 KiB chunks -> 64 + 64 + 22.
        let size: u64 = 150 * 1024;
        let chunk: u64 = 64 * 1024;
        let total = size.div_ceil(chunk);
        assert_eq!(total, 3);
        assert_eq!(expected_chunk_len(0, total, size, chunk), chunk);
        assert_eq!(expected_chunk_len(1, total, size, chunk), chunk);
        assert_eq!(expected_chunk_len(2, total, size, chunk), 22 * 1024);
    }

    #[test]
    fn exact_multiple_has_full_final_chunk() {
        let size: u64 = 128 * 1024;
        let chunk: u64 = 64 * 1024;
        let total = size.div_ceil(chunk);
        assert_eq!(total, 2);
        assert_eq!(expected_chunk_len(1, total, size, chunk), chunk);
    }
}
