use thiserror::Error;
use uuid::Uuid;

use kindred_types::models::MatchStatus;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("both sides of a pair must be different users")]
    SelfPair,

    #[error("cannot {action} a {status:?} match")]
    InvalidTransition {
        action: &'static str,
        status: MatchStatus,
    },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("user {user_id} is not a participant of conversation {conversation_id}")]
    NotParticipant { user_id: Uuid, conversation_id: Uuid },

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}
