use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            disabled    INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        -- One row per interest episode. Terminal rows are history and are
        -- never deleted.
        CREATE TABLE IF NOT EXISTS match_records (
            id          TEXT PRIMARY KEY,
            user_low    TEXT NOT NULL,
            user_high   TEXT NOT NULL,
            initiator   TEXT NOT NULL,
            status      TEXT NOT NULL
                CHECK (status IN ('pending', 'matched', 'dissolved', 'rejected')),
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            CHECK (user_low < user_high),
            CHECK (initiator IN (user_low, user_high))
        );

        -- At most one non-terminal record per pair.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_match_records_open_pair
            ON match_records(user_low, user_high)
            WHERE status IN ('pending', 'matched');

        CREATE INDEX IF NOT EXISTS idx_match_records_pair
            ON match_records(user_low, user_high, created_at);

        CREATE TABLE IF NOT EXISTS conversations (
            id               TEXT PRIMARY KEY,
            user_low         TEXT NOT NULL,
            user_high        TEXT NOT NULL,
            last_message     TEXT,
            last_message_at  TEXT,
            unread_low       INTEGER NOT NULL DEFAULT 0,
            unread_high      INTEGER NOT NULL DEFAULT 0,
            created_at       TEXT NOT NULL,
            CHECK (user_low < user_high),
            UNIQUE(user_low, user_high)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY,
            conversation_id  TEXT NOT NULL REFERENCES conversations(id),
            sender_id        TEXT NOT NULL,
            receiver_id      TEXT NOT NULL,
            content          TEXT NOT NULL,
            content_kind     TEXT NOT NULL CHECK (content_kind IN ('text', 'image')),
            extra_data       TEXT,
            is_read          INTEGER NOT NULL DEFAULT 0,
            created_at       TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
