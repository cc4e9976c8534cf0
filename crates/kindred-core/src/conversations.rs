use std::sync::Arc;

use rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use kindred_db::{Database, queries};
use kindred_types::models::{ContentKind, Conversation, Message, PairKey};

use crate::error::CoreError;

/// A message about to be sent. Becomes a `Message` once persisted.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub content_kind: ContentKind,
    pub extra_data: Option<String>,
}

/// Result of a read acknowledgement.
#[derive(Debug, Clone)]
pub struct ReadReceipt {
    pub conversation: Conversation,
    pub messages_marked: usize,
}

/// Owns the one-conversation-per-pair invariant and the unread counters.
///
/// Conversations are created lazily: by the first match or the first message
/// between two users, whichever comes first. Creation is an insert-or-ignore
/// against a unique `(user_low, user_high)` key, so concurrent creators
/// converge on the same row.
#[derive(Clone)]
pub struct ConversationRegistry {
    db: Arc<Database>,
}

impl ConversationRegistry {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Order-independent: `(a, b)` and `(b, a)` yield the same conversation.
    pub fn get_or_create(&self, a: Uuid, b: Uuid) -> Result<Conversation, CoreError> {
        if a == b {
            return Err(CoreError::SelfPair);
        }
        let pair = PairKey::new(a, b);
        Ok(self.db.with_tx(|tx| self.get_or_create_within(tx, pair))?)
    }

    /// Same as `get_or_create`, inside a caller-owned transaction.
    pub(crate) fn get_or_create_within(
        &self,
        conn: &Connection,
        pair: PairKey,
    ) -> anyhow::Result<Conversation> {
        if let Some(existing) = queries::conversation_by_pair(conn, pair)? {
            return Ok(existing);
        }

        let fresh = Conversation {
            id: Uuid::new_v4(),
            pair,
            last_message: None,
            last_message_at: None,
            unread_low: 0,
            unread_high: 0,
            created_at: kindred_db::now(),
        };
        if queries::insert_conversation_if_absent(conn, &fresh)? == 1 {
            info!(conversation_id = %fresh.id, pair = %pair, "Conversation created");
        }

        queries::conversation_by_pair(conn, pair)?
            .ok_or_else(|| anyhow::anyhow!("conversation for {} missing after insert", pair))
    }

    pub fn get(&self, conversation_id: Uuid) -> Result<Option<Conversation>, CoreError> {
        Ok(self
            .db
            .with_conn(|conn| queries::conversation_by_id(conn, conversation_id))?)
    }

    pub fn find(&self, a: Uuid, b: Uuid) -> Result<Option<Conversation>, CoreError> {
        let pair = PairKey::new(a, b);
        Ok(self
            .db
            .with_conn(|conn| queries::conversation_by_pair(conn, pair))?)
    }

    /// Persist a message and fold it into the conversation as one unit.
    ///
    /// Sets the last-message fields and increments the unread counter of the
    /// non-sending participant. Either the message row and the counter update
    /// both land, or neither does.
    pub fn record_message(
        &self,
        conversation_id: Uuid,
        draft: MessageDraft,
    ) -> Result<Message, CoreError> {
        let outcome = self.db.with_tx(|tx| {
            let Some(conversation) = queries::conversation_by_id(tx, conversation_id)? else {
                return Ok(Err(CoreError::NotFound("conversation")));
            };
            if conversation.pair.other(draft.sender_id) != Some(draft.receiver_id) {
                return Ok(Err(CoreError::NotParticipant {
                    user_id: draft.sender_id,
                    conversation_id,
                }));
            }

            let message = Message {
                id: Uuid::new_v4(),
                conversation_id,
                sender_id: draft.sender_id,
                receiver_id: draft.receiver_id,
                content: draft.content,
                content_kind: draft.content_kind,
                extra_data: draft.extra_data,
                read: false,
                created_at: kindred_db::now(),
            };
            queries::insert_message(tx, &message)?;

            let recipient_is_low = message.receiver_id == conversation.pair.low();
            let updated = queries::apply_message_summary(
                tx,
                conversation_id,
                &message.content,
                message.created_at,
                recipient_is_low,
            )?;
            if updated != 1 {
                anyhow::bail!("conversation {} not updated for message {}", conversation_id, message.id);
            }

            Ok(Ok(message))
        })??;

        debug!(
            message_id = %outcome.id,
            conversation_id = %conversation_id,
            "Message recorded"
        );
        Ok(outcome)
    }

    /// Reset the reader's unread counter and mark their incoming messages
    /// read. Repeating it is harmless.
    pub fn acknowledge_read(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
    ) -> Result<ReadReceipt, CoreError> {
        self.db.with_tx(|tx| {
            let Some(conversation) = queries::conversation_by_id(tx, conversation_id)? else {
                return Ok(Err(CoreError::NotFound("conversation")));
            };
            if !conversation.pair.contains(reader_id) {
                return Ok(Err(CoreError::NotParticipant {
                    user_id: reader_id,
                    conversation_id,
                }));
            }

            let reader_is_low = reader_id == conversation.pair.low();
            queries::reset_unread(tx, conversation_id, reader_is_low)?;
            let messages_marked = queries::mark_read_for_receiver(tx, conversation_id, reader_id)?;

            let conversation = queries::conversation_by_id(tx, conversation_id)?
                .ok_or_else(|| anyhow::anyhow!("conversation {} vanished", conversation_id))?;
            Ok(Ok(ReadReceipt {
                conversation,
                messages_marked,
            }))
        })?
    }

    /// Conversations of a user, most recently active first.
    pub fn list_for_user(
        &self,
        user_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Conversation>, CoreError> {
        Ok(self
            .db
            .with_conn(|conn| queries::conversations_for_user(conn, user_id, limit, offset))?)
    }

    /// Message history, newest first. Only participants may read it.
    pub fn history(
        &self,
        conversation_id: Uuid,
        viewer_id: Uuid,
        before: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<Message>, CoreError> {
        self.db.with_conn(|conn| {
            let Some(conversation) = queries::conversation_by_id(conn, conversation_id)? else {
                return Ok(Err(CoreError::NotFound("conversation")));
            };
            if !conversation.pair.contains(viewer_id) {
                return Ok(Err(CoreError::NotParticipant {
                    user_id: viewer_id,
                    conversation_id,
                }));
            }
            Ok(Ok(queries::messages_for_conversation(
                conn,
                conversation_id,
                before,
                limit,
            )?))
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (ConversationRegistry, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        (ConversationRegistry::new(db.clone()), db)
    }

    fn draft(sender: Uuid, receiver: Uuid, content: &str) -> MessageDraft {
        MessageDraft {
            sender_id: sender,
            receiver_id: receiver,
            content: content.to_string(),
            content_kind: ContentKind::Text,
            extra_data: None,
        }
    }

    #[test]
    fn get_or_create_is_order_independent() {
        let (registry, _) = registry();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let first = registry.get_or_create(a, b).unwrap();
        let second = registry.get_or_create(b, a).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.unread_low, 0);
        assert_eq!(first.unread_high, 0);
    }

    #[test]
    fn self_conversation_is_rejected() {
        let (registry, _) = registry();
        let a = Uuid::new_v4();
        assert!(matches!(registry.get_or_create(a, a), Err(CoreError::SelfPair)));
    }

    #[test]
    fn record_message_bumps_only_the_recipient_counter() {
        let (registry, _) = registry();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let conversation = registry.get_or_create(a, b).unwrap();

        let message = registry
            .record_message(conversation.id, draft(a, b, "hello"))
            .unwrap();
        assert!(!message.read);

        let after = registry.get(conversation.id).unwrap().unwrap();
        assert_eq!(after.unread_for(b), Some(1));
        assert_eq!(after.unread_for(a), Some(0));
        assert_eq!(after.last_message.as_deref(), Some("hello"));
        assert_eq!(after.last_message_at, Some(message.created_at));

        registry
            .record_message(conversation.id, draft(b, a, "hey back"))
            .unwrap();
        let after = registry.get(conversation.id).unwrap().unwrap();
        assert_eq!(after.unread_for(a), Some(1));
        assert_eq!(after.unread_for(b), Some(1));
        assert_eq!(after.last_message.as_deref(), Some("hey back"));
    }

    #[test]
    fn acknowledge_read_resets_reader_counter_idempotently() {
        let (registry, _) = registry();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let conversation = registry.get_or_create(a, b).unwrap();
        registry.record_message(conversation.id, draft(a, b, "one")).unwrap();
        registry.record_message(conversation.id, draft(a, b, "two")).unwrap();
        registry.record_message(conversation.id, draft(b, a, "three")).unwrap();

        let receipt = registry.acknowledge_read(conversation.id, b).unwrap();
        assert_eq!(receipt.messages_marked, 2);
        assert_eq!(receipt.conversation.unread_for(b), Some(0));
        // The sender side is untouched.
        assert_eq!(receipt.conversation.unread_for(a), Some(1));

        let again = registry.acknowledge_read(conversation.id, b).unwrap();
        assert_eq!(again.messages_marked, 0);
        assert_eq!(again.conversation.unread_for(b), Some(0));

        let history = registry.history(conversation.id, b, None, 50).unwrap();
        assert!(history.iter().filter(|m| m.receiver_id == b).all(|m| m.read));
        assert!(history.iter().filter(|m| m.receiver_id == a).all(|m| !m.read));
    }

    #[test]
    fn outsiders_cannot_post_or_acknowledge() {
        let (registry, _) = registry();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mallory = Uuid::new_v4();
        let conversation = registry.get_or_create(a, b).unwrap();

        let err = registry
            .record_message(conversation.id, draft(mallory, b, "hi"))
            .unwrap_err();
        assert!(matches!(err, CoreError::NotParticipant { .. }));

        let err = registry.acknowledge_read(conversation.id, mallory).unwrap_err();
        assert!(matches!(err, CoreError::NotParticipant { .. }));

        let err = registry.history(conversation.id, mallory, None, 10).unwrap_err();
        assert!(matches!(err, CoreError::NotParticipant { .. }));
    }

    #[test]
    fn failed_send_leaves_no_message_and_no_counter_change() {
        let (registry, db) = registry();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let conversation = registry.get_or_create(a, b).unwrap();

        let missing = Uuid::new_v4();
        let err = registry.record_message(missing, draft(a, b, "lost")).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));

        let count = db
            .with_conn(|conn| queries::count_messages(conn, conversation.id))
            .unwrap();
        assert_eq!(count, 0);
        let unchanged = registry.get(conversation.id).unwrap().unwrap();
        assert_eq!(unchanged, conversation);
    }

    #[test]
    fn history_pages_backwards() {
        let (registry, _) = registry();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let conversation = registry.get_or_create(a, b).unwrap();
        for i in 0..5 {
            registry
                .record_message(conversation.id, draft(a, b, &format!("m{i}")))
                .unwrap();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        let page = registry.history(conversation.id, a, None, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].content, "m4");
        assert_eq!(page[1].content, "m3");

        let older = registry
            .history(conversation.id, a, Some(page[1].id), 10)
            .unwrap();
        let contents: Vec<_> = older.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m1", "m0"]);
    }
}
