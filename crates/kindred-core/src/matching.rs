use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use kindred_db::{Database, queries};
use kindred_types::models::{Conversation, MatchRecord, MatchStatus, PairKey};

use crate::conversations::ConversationRegistry;
use crate::error::CoreError;
use crate::locks::PairLocks;

/// What an `express_interest` call observed once its transition settled.
#[derive(Debug, Clone)]
pub enum InterestOutcome {
    /// Interest is recorded and waiting on the other side.
    Pending(MatchRecord),
    /// Both sides are interested. Every caller that reaches this state, the
    /// one that completed it and any that lost a race to it, sees the same
    /// record and conversation.
    Matched {
        record: MatchRecord,
        conversation: Conversation,
    },
}

impl InterestOutcome {
    pub fn record(&self) -> &MatchRecord {
        match self {
            Self::Pending(record) => record,
            Self::Matched { record, .. } => record,
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }
}

#[derive(Debug, Clone, Copy)]
enum Closing {
    Dissolve,
    Reject,
}

impl Closing {
    fn verb(self) -> &'static str {
        match self {
            Self::Dissolve => "dissolve",
            Self::Reject => "reject",
        }
    }

    fn from_status(self) -> MatchStatus {
        match self {
            Self::Dissolve => MatchStatus::Matched,
            Self::Reject => MatchStatus::Pending,
        }
    }

    fn to_status(self) -> MatchStatus {
        match self {
            Self::Dissolve => MatchStatus::Dissolved,
            Self::Reject => MatchStatus::Rejected,
        }
    }
}

/// Mutual-interest state machine.
///
/// ```text
///   (none) --interest A->B--> Pending(A->B) --interest B->A--> Matched
///   Pending --reject--> Rejected        Matched --dissolve--> Dissolved
///   Rejected | Dissolved --interest--> new Pending record
/// ```
///
/// Every transition runs under the pair's lock and inside one transaction,
/// so reciprocal calls racing from both sides settle on a single Matched
/// record and a single conversation.
pub struct MatchEngine {
    db: Arc<Database>,
    conversations: ConversationRegistry,
    locks: PairLocks,
}

impl MatchEngine {
    pub fn new(db: Arc<Database>, conversations: ConversationRegistry) -> Self {
        Self {
            db,
            conversations,
            locks: PairLocks::new(),
        }
    }

    pub fn express_interest(&self, actor: Uuid, target: Uuid) -> Result<InterestOutcome, CoreError> {
        if actor == target {
            return Err(CoreError::SelfPair);
        }
        let pair = PairKey::new(actor, target);

        self.locks.with_lock(pair, || {
            let outcome = self.db.with_tx(|tx| {
                let now = kindred_db::now();
                match queries::open_match(tx, pair)? {
                    None => {
                        let record = MatchRecord {
                            id: Uuid::new_v4(),
                            pair,
                            initiator: actor,
                            status: MatchStatus::Pending,
                            created_at: now,
                            updated_at: now,
                        };
                        queries::insert_match(tx, &record)?;
                        info!(match_id = %record.id, %actor, %target, "Interest recorded");
                        Ok(InterestOutcome::Pending(record))
                    }
                    Some(mut record)
                        if record.status == MatchStatus::Pending && record.initiator == target =>
                    {
                        queries::update_match_status(tx, record.id, MatchStatus::Matched, now)?;
                        record.status = MatchStatus::Matched;
                        record.updated_at = now;
                        let conversation = self.conversations.get_or_create_within(tx, pair)?;
                        info!(
                            match_id = %record.id,
                            conversation_id = %conversation.id,
                            pair = %pair,
                            "Pair matched"
                        );
                        Ok(InterestOutcome::Matched {
                            record,
                            conversation,
                        })
                    }
                    // Actor repeating their own pending interest.
                    Some(record) if record.status == MatchStatus::Pending => {
                        Ok(InterestOutcome::Pending(record))
                    }
                    Some(record) => {
                        let conversation = self.conversations.get_or_create_within(tx, pair)?;
                        Ok(InterestOutcome::Matched {
                            record,
                            conversation,
                        })
                    }
                }
            })?;
            Ok(outcome)
        })
    }

    /// Matched -> Dissolved. Either participant may dissolve.
    pub fn dissolve(&self, actor: Uuid, other: Uuid) -> Result<MatchRecord, CoreError> {
        self.close(actor, other, Closing::Dissolve)
    }

    /// Pending -> Rejected. With no record at all, stores a Rejected record
    /// oriented other -> actor so the decision is kept in history.
    pub fn reject(&self, actor: Uuid, other: Uuid) -> Result<MatchRecord, CoreError> {
        self.close(actor, other, Closing::Reject)
    }

    fn close(&self, actor: Uuid, other: Uuid, closing: Closing) -> Result<MatchRecord, CoreError> {
        if actor == other {
            return Err(CoreError::SelfPair);
        }
        let pair = PairKey::new(actor, other);

        self.locks.with_lock(pair, || {
            self.db.with_tx(|tx| {
                let now = kindred_db::now();

                if let Some(mut record) = queries::open_match(tx, pair)? {
                    if record.status != closing.from_status() {
                        return Ok(Err(CoreError::InvalidTransition {
                            action: closing.verb(),
                            status: record.status,
                        }));
                    }
                    queries::update_match_status(tx, record.id, closing.to_status(), now)?;
                    record.status = closing.to_status();
                    record.updated_at = now;
                    info!(match_id = %record.id, %actor, status = ?record.status, "Match closed");
                    return Ok(Ok(record));
                }

                // Nothing open. Terminal records make the call a no-op.
                match (queries::latest_match(tx, pair)?, closing) {
                    (Some(record), _) => Ok(Ok(record)),
                    (None, Closing::Reject) => {
                        let record = MatchRecord {
                            id: Uuid::new_v4(),
                            pair,
                            initiator: other,
                            status: MatchStatus::Rejected,
                            created_at: now,
                            updated_at: now,
                        };
                        queries::insert_match(tx, &record)?;
                        info!(match_id = %record.id, %actor, %other, "Pass recorded");
                        Ok(Ok(record))
                    }
                    (None, Closing::Dissolve) => Ok(Err(CoreError::NotFound("match"))),
                }
            })?
        })
    }

    /// Most recent record between two users, terminal or not.
    pub fn between(&self, a: Uuid, b: Uuid) -> Result<Option<MatchRecord>, CoreError> {
        let pair = PairKey::new(a, b);
        Ok(self.db.with_conn(|conn| queries::latest_match(conn, pair))?)
    }

    /// Every record ever stored for the pair, oldest first.
    pub fn history(&self, a: Uuid, b: Uuid) -> Result<Vec<MatchRecord>, CoreError> {
        let pair = PairKey::new(a, b);
        Ok(self.db.with_conn(|conn| queries::match_history(conn, pair))?)
    }

    pub fn list(&self, user_id: Uuid, status: Option<MatchStatus>) -> Result<Vec<MatchRecord>, CoreError> {
        Ok(self
            .db
            .with_conn(|conn| queries::matches_for_user(conn, user_id, status))?)
    }

    /// Pending interest this user has expressed.
    pub fn interest_sent(&self, user_id: Uuid) -> Result<Vec<MatchRecord>, CoreError> {
        Ok(self
            .db
            .with_conn(|conn| queries::pending_initiated_by(conn, user_id))?)
    }

    /// Pending interest others have expressed in this user.
    pub fn interest_received(&self, user_id: Uuid) -> Result<Vec<MatchRecord>, CoreError> {
        Ok(self
            .db
            .with_conn(|conn| queries::pending_targeting(conn, user_id))?)
    }
}
