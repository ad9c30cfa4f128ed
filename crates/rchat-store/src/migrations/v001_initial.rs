//! v001 -- Initial schema creation.
//!
//! Core tables: `peers`, `envelopes`, `chat_envelopes`, `messages`,
//! `files`, `profile`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Trusted peers. A row exists only after a completed invitation.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS peers (
    id          TEXT PRIMARY KEY NOT NULL,   -- base58 PeerID
    handle      TEXT NOT NULL,               -- rendezvous username / display handle
    public_key  BLOB NOT NULL,               -- 32-byte Ed25519 pubkey
    added_at    INTEGER NOT NULL,            -- unix seconds
    last_seen   INTEGER NOT NULL DEFAULT 0,
    pinned      INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    order_index INTEGER NOT NULL DEFAULT 0
);

-- ----------------------------------------------------------------
-- Envelopes (chat folders)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS envelopes (
    id         TEXT PRIMARY KEY NOT NULL,
    name       TEXT NOT NULL,
    icon       TEXT,
    created_at INTEGER NOT NULL
);

-- A chat belongs to at most one envelope; no row means the root bucket.
CREATE TABLE IF NOT EXISTS chat_envelopes (
    chat_id     TEXT PRIMARY KEY NOT NULL,
    envelope_id TEXT NOT NULL,

    FOREIGN KEY (envelope_id) REFERENCES envelopes(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Messages. `id` is a UUIDv7 assigned by the sender, so ordering by
-- id ascending is ordering by send time within a sender.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id             TEXT PRIMARY KEY NOT NULL,
    chat_id        TEXT NOT NULL,               -- peer id or 'self'
    direction      TEXT NOT NULL,               -- 'out' | 'in'
    sender_peer_id TEXT NOT NULL,
    content_type   TEXT NOT NULL,               -- text|image|document|video|sticker
    text_content   TEXT,
    file_hash      TEXT,
    file_name      TEXT,
    created_at     INTEGER NOT NULL,
    status         TEXT NOT NULL                -- pending|sent|delivered|read|failed
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_id ON messages(chat_id, id);
CREATE INDEX IF NOT EXISTS idx_messages_status ON messages(chat_id, status);

-- ----------------------------------------------------------------
-- Content-addressed files (blob bytes live on disk)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS files (
    hash        TEXT PRIMARY KEY NOT NULL,   -- blake3 hex
    size_bytes  INTEGER NOT NULL,
    mime_hint   TEXT,
    local_path  TEXT NOT NULL,
    first_seen  INTEGER NOT NULL,
    origin      TEXT NOT NULL,               -- 'self' or a peer id
    quarantined INTEGER NOT NULL DEFAULT 0
);

-- ----------------------------------------------------------------
-- Single-row user profile
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS profile (
    id         INTEGER PRIMARY KEY CHECK (id = 1),
    alias      TEXT,
    avatar_ref TEXT
);

INSERT OR IGNORE INTO profile (id, alias, avatar_ref) VALUES (1, NULL, NULL);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
