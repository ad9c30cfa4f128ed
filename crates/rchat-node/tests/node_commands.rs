//! End-to-end command-surface tests against a node rooted in a temp
//! directory. Network-dependent flows (two machines on a LAN) are out of
//! reach here; everything the node can do locally is exercised through
//! the public API exactly as the UI process would.

use rchat_node::{Node, NodeError};
use rchat_shared::crypto::KdfParams;

fn fast_kdf() -> KdfParams {
    KdfParams {
        m_cost: 8,
        t_cost: 1,
        p_cost: 1,
    }
}

async fn fresh_node(dir: &tempfile::TempDir) -> Node {
    Node::start_with_kdf(dir.path().to_path_buf(), fast_kdf())
        .await
        .expect("node should start")
}

fn fake_webp(payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(b"RIFF");
    data.extend_from_slice(&(payload.len() as u32 + 4).to_le_bytes());
    data.extend_from_slice(b"WEBP");
    data.extend_from_slice(payload);
    data
}

#[tokio::test(flavor = "multi_thread")]
async fn setup_then_unlock_across_restart() {
    let dir = tempfile::tempdir().unwrap();

    // First launch: set up the vault.
    {
        let node = fresh_node(&dir).await;
        let status = node.check_auth_status().await.unwrap();
        assert!(!status.is_setup);
        assert!(!status.is_unlocked);

        node.init_vault("correcthorse").await.unwrap();
        let status = node.check_auth_status().await.unwrap();
        assert!(status.is_setup);
        assert!(status.is_unlocked);
    }

    // "Restart": a fresh node over the same data dir.
    let node = fresh_node(&dir).await;
    let status = node.check_auth_status().await.unwrap();
    assert!(status.is_setup);
    assert!(!status.is_unlocked);

    match node.unlock_vault("wrongpass").await {
        Err(NodeError::InvalidPassword) => {}
        other => panic!("expected InvalidPassword, got {other:?}"),
    }
    assert!(!node.check_auth_status().await.unwrap().is_unlocked);

    node.unlock_vault("correcthorse").await.unwrap();
    assert!(node.check_auth_status().await.unwrap().is_unlocked);
}

#[tokio::test(flavor = "multi_thread")]
async fn double_setup_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let node = fresh_node(&dir).await;
    node.init_vault("pw").await.unwrap();
    assert!(matches!(
        node.init_vault("pw2").await,
        Err(NodeError::VaultAlreadySetUp)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn self_message_materializes_read() {
    let dir = tempfile::tempdir().unwrap();
    let node = fresh_node(&dir).await;
    node.init_vault("pw").await.unwrap();

    node.send_message_to_self("hi me").await.unwrap();

    let history = node.get_chat_history("self").await.unwrap();
    assert_eq!(history.len(), 1);
    let msg = &history[0];
    assert_eq!(msg.text.as_deref(), Some("hi me"));
    assert_eq!(msg.status.as_str(), "read");
    // Sender is this node's own PeerID (base58 Ed25519 identity).
    assert!(msg.sender_peer_id.starts_with("12D3KooW"));

    // The self chat shows up in the recency map, never in unread counts.
    let times = node.get_chat_latest_times().await.unwrap();
    assert!(times.contains_key("self"));
    assert!(node.get_unread_counts().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn self_messages_stay_ordered() {
    let dir = tempfile::tempdir().unwrap();
    let node = fresh_node(&dir).await;
    node.init_vault("pw").await.unwrap();

    for text in ["one", "two", "three"] {
        node.send_message_to_self(text).await.unwrap();
    }

    let history = node.get_chat_history("self").await.unwrap();
    let texts: Vec<_> = history.iter().filter_map(|m| m.text.as_deref()).collect();
    assert_eq!(texts, vec!["one", "two", "three"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn sending_to_unknown_peer_fails() {
    let dir = tempfile::tempdir().unwrap();
    let node = fresh_node(&dir).await;
    node.init_vault("pw").await.unwrap();

    match node.send_message("12D3KooWnobody", "hello?").await {
        Err(NodeError::UnknownPeer(_)) => {}
        other => panic!("expected UnknownPeer, got {other:?}"),
    }
    assert!(node.get_chat_history("12D3KooWnobody").await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn commands_require_unlocked_vault() {
    let dir = tempfile::tempdir().unwrap();
    let node = fresh_node(&dir).await;

    // No vault at all: messaging needs the identity.
    match node.send_message_to_self("too early").await {
        Err(NodeError::VaultLocked) => {}
        other => panic!("expected VaultLocked, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn envelope_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let node = fresh_node(&dir).await;
    node.init_vault("pw").await.unwrap();

    node.create_envelope("work", "Work", Some("💼")).await.unwrap();
    node.create_envelope("family", "Family", None).await.unwrap();
    assert!(matches!(
        node.create_envelope("work", "Work again", None).await,
        Err(NodeError::Conflict)
    ));

    node.move_chat_to_envelope("some-peer", Some("work")).await.unwrap();
    let assignments = node.get_chat_assignments().await.unwrap();
    assert_eq!(assignments.get("some-peer").map(String::as_str), Some("work"));

    // Deleting the envelope sends its chats back to the root bucket.
    node.delete_envelope("work").await.unwrap();
    assert!(node.get_chat_assignments().await.unwrap().is_empty());
    assert_eq!(node.get_envelopes().await.unwrap().len(), 1);

    assert!(matches!(
        node.move_chat_to_envelope("x", Some("ghost")).await,
        Err(NodeError::NotFound)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn profile_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let node = fresh_node(&dir).await;
    node.init_vault("pw").await.unwrap();

    assert!(node.get_user_profile().await.unwrap().alias.is_none());

    node.update_user_profile(Some("ata"), None).await.unwrap();
    node.update_user_profile(None, Some("avatar-ref")).await.unwrap();

    let profile = node.get_user_profile().await.unwrap();
    assert_eq!(profile.alias.as_deref(), Some("ata"));
    assert_eq!(profile.avatar_ref.as_deref(), Some("avatar-ref"));
}

#[tokio::test(flavor = "multi_thread")]
async fn sticker_roundtrip_and_limits() {
    let dir = tempfile::tempdir().unwrap();
    let node = fresh_node(&dir).await;
    node.init_vault("pw").await.unwrap();

    assert!(matches!(
        node.add_sticker(b"not webp at all", "bad").await,
        Err(NodeError::Store(_))
    ));

    node.add_sticker(&fake_webp(b"wave sticker"), "wave").await.unwrap();
    let stickers = node.get_stickers().await.unwrap();
    assert_eq!(stickers.len(), 1);
    assert_eq!(stickers[0].name, "wave");

    let data = node.get_sticker_data(&stickers[0].file_hash).await.unwrap();
    assert_eq!(data, fake_webp(b"wave sticker"));

    node.delete_sticker(&stickers[0].file_hash).await.unwrap();
    assert!(node.get_stickers().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn image_send_to_self_and_readback() {
    let dir = tempfile::tempdir().unwrap();
    let node = fresh_node(&dir).await;
    node.init_vault("pw").await.unwrap();

    let image_path = dir.path().join("cat.png");
    std::fs::write(&image_path, b"\x89PNG fake image bytes").unwrap();

    let hash = node
        .send_image_message("self", image_path.to_str().unwrap())
        .await
        .unwrap();

    let history = node.get_chat_history("self").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].file_hash.as_deref(), Some(hash.as_str()));
    assert_eq!(history[0].status.as_str(), "read");

    let data_url = node.get_image_data(&hash).await.unwrap();
    assert!(data_url.starts_with("data:image/png;base64,"));

    let exported = dir.path().join("out.png");
    node.save_image_to_file(&hash, exported.to_str().unwrap())
        .await
        .unwrap();
    assert_eq!(std::fs::read(exported).unwrap(), b"\x89PNG fake image bytes");
}

#[tokio::test(flavor = "multi_thread")]
async fn theme_presets_apply_and_persist() {
    let dir = tempfile::tempdir().unwrap();
    let node = fresh_node(&dir).await;

    let presets = node.list_theme_presets().await.unwrap();
    assert!(presets.len() >= 4);
    assert!(node.get_selected_preset().await.unwrap().is_none());

    let key = presets[0].key.clone();
    let applied = node.apply_preset(&key).await.unwrap();
    assert_eq!(node.get_selected_preset().await.unwrap().as_deref(), Some(key.as_str()));
    assert_eq!(node.get_theme().await.unwrap(), applied);

    // Selection survives a restart (it lives in config.toml).
    let node = fresh_node(&dir).await;
    assert_eq!(node.get_selected_preset().await.unwrap().as_deref(), Some(key.as_str()));

    assert!(matches!(
        node.apply_preset("no-such-preset").await,
        Err(NodeError::NotFound)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn invite_password_shape_and_pending_state() {
    let dir = tempfile::tempdir().unwrap();
    let node = fresh_node(&dir).await;
    node.init_vault("pw").await.unwrap();

    let password = node.generate_invite_password().await.unwrap();
    assert_eq!(password.len(), 14);
    assert!(password.bytes().all(|b| b.is_ascii_alphanumeric()));

    // Without a rendezvous handle the offer cannot be addressed.
    match node.create_invite("bob", &password).await {
        Err(NodeError::HandleNotSet) => {}
        other => panic!("expected HandleNotSet, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_vault_wipes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let node = fresh_node(&dir).await;
    node.init_vault("pw").await.unwrap();

    node.send_message_to_self("to be destroyed").await.unwrap();
    node.create_envelope("e", "Env", None).await.unwrap();
    node.add_sticker(&fake_webp(b"sticker"), "s").await.unwrap();

    node.reset_vault().await.unwrap();

    let status = node.check_auth_status().await.unwrap();
    assert!(!status.is_setup);
    assert!(!status.is_unlocked);
    assert!(node.get_chat_history("self").await.unwrap().is_empty());
    assert!(node.get_envelopes().await.unwrap().is_empty());
    assert!(node.get_stickers().await.unwrap().is_empty());

    // The node is usable again from scratch.
    node.init_vault("new-password").await.unwrap();
    node.send_message_to_self("fresh start").await.unwrap();
    assert_eq!(node.get_chat_history("self").await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn toggle_online_status_persists() {
    let dir = tempfile::tempdir().unwrap();
    let node = fresh_node(&dir).await;
    node.init_vault("pw").await.unwrap();

    assert!(!node.check_auth_status().await.unwrap().is_online);
    node.toggle_online_status(true).await.unwrap();
    assert!(node.check_auth_status().await.unwrap().is_online);

    let node = fresh_node(&dir).await;
    assert!(node.check_auth_status().await.unwrap().is_online);
}

#[tokio::test(flavor = "multi_thread")]
async fn event_stream_reports_auth_transitions() {
    let dir = tempfile::tempdir().unwrap();
    let node = fresh_node(&dir).await;
    let mut events = node.subscribe_events();

    node.init_vault("pw").await.unwrap();

    // Drain until the auth-status event shows up; other events (listen
    // addresses etc.) may interleave.
    loop {
        match events.recv().await.unwrap() {
            rchat_node::Event::AuthStatus {
                is_setup,
                is_unlocked,
                ..
            } => {
                assert!(is_setup);
                assert!(is_unlocked);
                break;
            }
            _ => continue,
        }
    }
}
