use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use kindred_types::models::{
    ContentKind, Conversation, MatchRecord, MatchStatus, Message, PairKey,
};

use crate::models::UserRow;
use crate::{Database, format_ts};

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id, username, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn set_user_disabled(&self, id: &str, disabled: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE users SET disabled = ?2 WHERE id = ?1",
                (id, disabled),
            )?;
            Ok(rows > 0)
        })
    }

    /// True if the user exists and has not been disabled.
    pub fn is_active_user(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let disabled: Option<bool> = conn
                .query_row(
                    "SELECT disabled FROM users WHERE id = ?1",
                    [id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(disabled == Some(false))
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, password, disabled, created_at FROM users WHERE {column} = ?1"
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                disabled: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

// -- Match records --

const MATCH_COLUMNS: &str = "id, user_low, user_high, initiator, status, created_at, updated_at";

/// The Pending or Matched record for a pair, if any.
pub fn open_match(conn: &Connection, pair: PairKey) -> Result<Option<MatchRecord>> {
    let sql = format!(
        "SELECT {MATCH_COLUMNS} FROM match_records
         WHERE user_low = ?1 AND user_high = ?2 AND status IN ('pending', 'matched')"
    );
    let record = conn
        .query_row(&sql, pair_params(pair), match_from_row)
        .optional()?;
    Ok(record)
}

/// Most recent record for a pair regardless of status.
pub fn latest_match(conn: &Connection, pair: PairKey) -> Result<Option<MatchRecord>> {
    let sql = format!(
        "SELECT {MATCH_COLUMNS} FROM match_records
         WHERE user_low = ?1 AND user_high = ?2
         ORDER BY created_at DESC, rowid DESC
         LIMIT 1"
    );
    let record = conn
        .query_row(&sql, pair_params(pair), match_from_row)
        .optional()?;
    Ok(record)
}

/// Full history for a pair, oldest first.
pub fn match_history(conn: &Connection, pair: PairKey) -> Result<Vec<MatchRecord>> {
    let sql = format!(
        "SELECT {MATCH_COLUMNS} FROM match_records
         WHERE user_low = ?1 AND user_high = ?2
         ORDER BY created_at ASC, rowid ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(pair_params(pair), match_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn insert_match(conn: &Connection, record: &MatchRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO match_records (id, user_low, user_high, initiator, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        (
            record.id.to_string(),
            record.pair.low().to_string(),
            record.pair.high().to_string(),
            record.initiator.to_string(),
            record.status.as_str(),
            format_ts(record.created_at),
            format_ts(record.updated_at),
        ),
    )?;
    Ok(())
}

pub fn update_match_status(
    conn: &Connection,
    id: Uuid,
    status: MatchStatus,
    at: DateTime<Utc>,
) -> Result<usize> {
    let rows = conn.execute(
        "UPDATE match_records SET status = ?2, updated_at = ?3 WHERE id = ?1",
        (id.to_string(), status.as_str(), format_ts(at)),
    )?;
    Ok(rows)
}

/// Records involving `user_id`, newest first, optionally filtered by status.
pub fn matches_for_user(
    conn: &Connection,
    user_id: Uuid,
    status: Option<MatchStatus>,
) -> Result<Vec<MatchRecord>> {
    let sql = format!(
        "SELECT {MATCH_COLUMNS} FROM match_records
         WHERE (user_low = ?1 OR user_high = ?1)
           AND (?2 IS NULL OR status = ?2)
         ORDER BY updated_at DESC, rowid DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            (user_id.to_string(), status.map(MatchStatus::as_str)),
            match_from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Pending records created by `user_id` (interest sent).
pub fn pending_initiated_by(conn: &Connection, user_id: Uuid) -> Result<Vec<MatchRecord>> {
    let sql = format!(
        "SELECT {MATCH_COLUMNS} FROM match_records
         WHERE initiator = ?1 AND status = 'pending'
         ORDER BY created_at DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user_id.to_string()], match_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Pending records where someone else expressed interest in `user_id`.
pub fn pending_targeting(conn: &Connection, user_id: Uuid) -> Result<Vec<MatchRecord>> {
    let sql = format!(
        "SELECT {MATCH_COLUMNS} FROM match_records
         WHERE (user_low = ?1 OR user_high = ?1)
           AND initiator != ?1
           AND status = 'pending'
         ORDER BY created_at DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user_id.to_string()], match_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn match_from_row(row: &Row<'_>) -> rusqlite::Result<MatchRecord> {
    Ok(MatchRecord {
        id: uuid_col(row, 0)?,
        pair: PairKey::new(uuid_col(row, 1)?, uuid_col(row, 2)?),
        initiator: uuid_col(row, 3)?,
        status: parsed_col::<MatchStatus>(row, 4)?,
        created_at: ts_col(row, 5)?,
        updated_at: ts_col(row, 6)?,
    })
}

// -- Conversations --

const CONVERSATION_COLUMNS: &str =
    "id, user_low, user_high, last_message, last_message_at, unread_low, unread_high, created_at";

pub fn conversation_by_pair(conn: &Connection, pair: PairKey) -> Result<Option<Conversation>> {
    let sql = format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE user_low = ?1 AND user_high = ?2"
    );
    let conversation = conn
        .query_row(&sql, pair_params(pair), conversation_from_row)
        .optional()?;
    Ok(conversation)
}

pub fn conversation_by_id(conn: &Connection, id: Uuid) -> Result<Option<Conversation>> {
    let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1");
    let conversation = conn
        .query_row(&sql, [id.to_string()], conversation_from_row)
        .optional()?;
    Ok(conversation)
}

/// Insert unless the pair already has a conversation. Returns rows inserted.
pub fn insert_conversation_if_absent(conn: &Connection, conversation: &Conversation) -> Result<usize> {
    let rows = conn.execute(
        "INSERT INTO conversations (id, user_low, user_high, unread_low, unread_high, created_at)
         VALUES (?1, ?2, ?3, 0, 0, ?4)
         ON CONFLICT(user_low, user_high) DO NOTHING",
        (
            conversation.id.to_string(),
            conversation.pair.low().to_string(),
            conversation.pair.high().to_string(),
            format_ts(conversation.created_at),
        ),
    )?;
    Ok(rows)
}

/// Set the last-message summary and bump the recipient's unread counter.
pub fn apply_message_summary(
    conn: &Connection,
    conversation_id: Uuid,
    content: &str,
    at: DateTime<Utc>,
    recipient_is_low: bool,
) -> Result<usize> {
    let sql = if recipient_is_low {
        "UPDATE conversations
         SET last_message = ?2, last_message_at = ?3, unread_low = unread_low + 1
         WHERE id = ?1"
    } else {
        "UPDATE conversations
         SET last_message = ?2, last_message_at = ?3, unread_high = unread_high + 1
         WHERE id = ?1"
    };
    let rows = conn.execute(sql, (conversation_id.to_string(), content, format_ts(at)))?;
    Ok(rows)
}

pub fn reset_unread(conn: &Connection, conversation_id: Uuid, reader_is_low: bool) -> Result<usize> {
    let sql = if reader_is_low {
        "UPDATE conversations SET unread_low = 0 WHERE id = ?1"
    } else {
        "UPDATE conversations SET unread_high = 0 WHERE id = ?1"
    };
    let rows = conn.execute(sql, [conversation_id.to_string()])?;
    Ok(rows)
}

/// Conversations of `user_id`, most recently active first.
pub fn conversations_for_user(
    conn: &Connection,
    user_id: Uuid,
    limit: u32,
    offset: u32,
) -> Result<Vec<Conversation>> {
    let sql = format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations
         WHERE user_low = ?1 OR user_high = ?1
         ORDER BY COALESCE(last_message_at, created_at) DESC, rowid DESC
         LIMIT ?2 OFFSET ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((user_id.to_string(), limit, offset), conversation_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let last_message_at = match row.get::<_, Option<String>>(4)? {
        Some(raw) => Some(parse_ts(&raw, 4)?),
        None => None,
    };
    Ok(Conversation {
        id: uuid_col(row, 0)?,
        pair: PairKey::new(uuid_col(row, 1)?, uuid_col(row, 2)?),
        last_message: row.get(3)?,
        last_message_at,
        unread_low: row.get(5)?,
        unread_high: row.get(6)?,
        created_at: ts_col(row, 7)?,
    })
}

// -- Messages --

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, receiver_id, content, content_kind, extra_data, is_read, created_at";

pub fn insert_message(conn: &Connection, message: &Message) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, content, content_kind, extra_data, is_read, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        (
            message.id.to_string(),
            message.conversation_id.to_string(),
            message.sender_id.to_string(),
            message.receiver_id.to_string(),
            &message.content,
            message.content_kind.as_str(),
            message.extra_data.as_deref(),
            message.read,
            format_ts(message.created_at),
        ),
    )?;
    Ok(())
}

/// Page of history for a conversation, newest first. `before` is an
/// exclusive cursor naming the oldest message of the previous page; ties on
/// `created_at` are broken by insertion order so no message is skipped.
/// An id that is not in this conversation yields an empty page.
pub fn messages_for_conversation(
    conn: &Connection,
    conversation_id: Uuid,
    before: Option<Uuid>,
    limit: u32,
) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE conversation_id = ?1
           AND (?2 IS NULL OR (created_at, rowid) < (
                SELECT created_at, rowid FROM messages
                WHERE id = ?2 AND conversation_id = ?1))
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            (
                conversation_id.to_string(),
                before.map(|id| id.to_string()),
                limit,
            ),
            message_from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Flip the read flag on everything in the conversation addressed to `reader`.
pub fn mark_read_for_receiver(conn: &Connection, conversation_id: Uuid, reader: Uuid) -> Result<usize> {
    let rows = conn.execute(
        "UPDATE messages SET is_read = 1
         WHERE conversation_id = ?1 AND receiver_id = ?2 AND is_read = 0",
        (conversation_id.to_string(), reader.to_string()),
    )?;
    Ok(rows)
}

pub fn count_messages(conn: &Connection, conversation_id: Uuid) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
        [conversation_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(usize::try_from(count).unwrap_or(0))
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: uuid_col(row, 0)?,
        conversation_id: uuid_col(row, 1)?,
        sender_id: uuid_col(row, 2)?,
        receiver_id: uuid_col(row, 3)?,
        content: row.get(4)?,
        content_kind: parsed_col::<ContentKind>(row, 5)?,
        extra_data: row.get(6)?,
        read: row.get(7)?,
        created_at: ts_col(row, 8)?,
    })
}

// -- Column helpers --

fn pair_params(pair: PairKey) -> (String, String) {
    (pair.low().to_string(), pair.high().to_string())
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw, idx)
}

fn parse_ts(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parsed_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}
