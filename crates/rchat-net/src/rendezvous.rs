//! Rendezvous directory client.
//!
//! Each node publishes a single-file gist (`rchat-peer-directory` /
//! `directory.json`) holding its signed presence record and any sealed
//! invitation offers. Peers poll the directories of the handles in their
//! trust list. The store is untrusted: readers verify the Ed25519
//! signature against the embedded key and check the key derives the
//! claimed PeerID; records older than the freshness window are ignored.

use anyhow::Result;
use octocrab::Octocrab;
use tracing::debug;

use rchat_shared::protocol::{DirectoryDoc, PresenceRecord};
use rchat_shared::types::now_unix;

const DIRECTORY_GIST_DESC: &str = "rchat-peer-directory";
const DIRECTORY_FILE_NAME: &str = "directory.json";

/// Find the authenticated user's existing directory gist, if any.
async fn find_directory_gist(octocrab: &Octocrab) -> Result<Option<String>> {
    let gists = octocrab.gists().list_all_gists().send().await?;
    for gist in gists {
        if gist.description.as_deref() == Some(DIRECTORY_GIST_DESC) {
            return Ok(Some(gist.id));
        }
    }
    Ok(None)
}

/// Publish (create or rewrite) the caller's directory document.
pub async fn publish_directory(token: &str, doc: &DirectoryDoc) -> Result<()> {
    let octocrab = Octocrab::builder()
        .personal_token(token.to_string())
        .build()?;

    let content = serde_json::to_string_pretty(doc)?;

    match find_directory_gist(&octocrab).await? {
        Some(gist_id) => {
            octocrab
                .gists()
                .update(&gist_id)
                .description(DIRECTORY_GIST_DESC)
                .file(DIRECTORY_FILE_NAME)
                .with_content(content)
                .send()
                .await?;
            debug!(gist = %gist_id, "directory gist updated");
        }
        None => {
            let gist = octocrab
                .gists()
                .create()
                .description(DIRECTORY_GIST_DESC)
                .public(true)
                .file(DIRECTORY_FILE_NAME, content)
                .send()
                .await?;
            debug!(gist = %gist.id, "directory gist created");
        }
    }
    Ok(())
}

/// Fetch a handle's directory document, unauthenticated.
pub async fn fetch_directory(handle: &str) -> Result<Option<DirectoryDoc>> {
    let octocrab = Octocrab::builder().build()?;

    let gists = octocrab.gists().list_user_gists(handle).send().await?;
    for gist in gists {
        if gist.description.as_deref() != Some(DIRECTORY_GIST_DESC) {
            continue;
        }
        if let Some(file) = gist.files.get(DIRECTORY_FILE_NAME) {
            let resp = reqwest::get(file.raw_url.clone()).await?;
            if !resp.status().is_success() {
                continue;
            }
            let text = resp.text().await?;
            match serde_json::from_str::<DirectoryDoc>(&text) {
                Ok(doc) => return Ok(Some(doc)),
                Err(e) => {
                    debug!(handle, error = %e, "malformed directory document");
                    return Ok(None);
                }
            }
        }
    }
    Ok(None)
}

/// Extract the presence record of a directory document if it is signed by
/// the key it claims, that key derives the claimed PeerID, and the record
/// is within the freshness window.
pub fn verified_presence(doc: &DirectoryDoc) -> Option<&PresenceRecord> {
    let record = doc.presence.as_ref()?;
    if let Err(e) = record.verify() {
        debug!(peer = %record.peer_id, error = %e, "presence record failed verification");
        return None;
    }
    if !record.is_fresh(now_unix()) {
        debug!(peer = %record.peer_id, issued_at = record.issued_at, "presence record too old");
        return None;
    }
    Some(record)
}

/// Fetch the GitHub login of the token's owner; used as the node's
/// rendezvous handle.
pub async fn fetch_github_username(token: &str) -> Result<String> {
    let octocrab = Octocrab::builder()
        .personal_token(token.to_string())
        .build()?;
    let user: octocrab::models::Author = octocrab.get("/user", None::<&()>).await?;
    Ok(user.login)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rchat_shared::Identity;

    #[test]
    fn verified_presence_accepts_valid_and_rejects_stale() {
        let id = Identity::generate();
        let record = PresenceRecord::sign(&id, vec!["/ip4/10.1.1.1/tcp/4001".into()]);

        let doc = DirectoryDoc {
            presence: Some(record.clone()),
            invitations: vec![],
        };
        assert!(verified_presence(&doc).is_some());

        let mut stale = record;
        stale.issued_at -= 60 * 60;
        let doc = DirectoryDoc {
            presence: Some(stale),
            invitations: vec![],
        };
        assert!(verified_presence(&doc).is_none());
    }

    #[test]
    fn verified_presence_rejects_tampered_addrs() {
        let id = Identity::generate();
        let mut record = PresenceRecord::sign(&id, vec!["/ip4/10.1.1.1/tcp/4001".into()]);
        record.addrs[0] = "/ip4/6.6.6.6/tcp/666".into();

        let doc = DirectoryDoc {
            presence: Some(record),
            invitations: vec![],
        };
        assert!(verified_presence(&doc).is_none());
    }
}
