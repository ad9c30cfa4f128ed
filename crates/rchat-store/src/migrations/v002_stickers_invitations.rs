//! v002 -- Sticker namespace and durable pending invitations.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Stickers reference a files row; the blob lives in the sticker namespace.
CREATE TABLE IF NOT EXISTS stickers (
    hash       TEXT PRIMARY KEY NOT NULL,
    name       TEXT NOT NULL,
    created_at INTEGER NOT NULL,

    FOREIGN KEY (hash) REFERENCES files(hash)
);

-- Pending invitations survive restarts so the sealed offers can be
-- republished until redeemed or expired.
CREATE TABLE IF NOT EXISTS invitations (
    nonce          TEXT PRIMARY KEY NOT NULL,  -- hex
    invitee_handle TEXT,
    password_hash  TEXT NOT NULL,              -- blake3 hex of the invite password
    offer_json     TEXT,                       -- sealed offer, ready to publish
    created_at     INTEGER NOT NULL,
    expires_at     INTEGER NOT NULL,
    state          TEXT NOT NULL DEFAULT 'pending'  -- pending|redeemed|expired
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
