use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order-independent key for an unordered pair of users.
///
/// Both match records and conversations are keyed by this, and the pair
/// locks in kindred-core are scoped to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    low: Uuid,
    high: Uuid,
}

impl PairKey {
    pub fn new(a: Uuid, b: Uuid) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn low(&self) -> Uuid {
        self.low
    }

    pub fn high(&self) -> Uuid {
        self.high
    }

    pub fn contains(&self, user_id: Uuid) -> bool {
        self.low == user_id || self.high == user_id
    }

    /// The other member of the pair, or `None` if `user_id` is not a member.
    pub fn other(&self, user_id: Uuid) -> Option<Uuid> {
        if user_id == self.low {
            Some(self.high)
        } else if user_id == self.high {
            Some(self.low)
        } else {
            None
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.low, self.high)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    Matched,
    Dissolved,
    Rejected,
}

impl MatchStatus {
    /// Dissolved and Rejected records never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Dissolved | Self::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Matched => "matched",
            Self::Dissolved => "dissolved",
            Self::Rejected => "rejected",
        }
    }
}

impl FromStr for MatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "matched" => Ok(Self::Matched),
            "dissolved" => Ok(Self::Dissolved),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown match status: {other}")),
        }
    }
}

/// Mutual-interest state for one pair of users.
///
/// `initiator` is the user whose interest created the record; the record is
/// oriented initiator -> other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: Uuid,
    pub pair: PairKey,
    pub initiator: Uuid,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MatchRecord {
    pub fn target(&self) -> Uuid {
        self.pair.other(self.initiator).unwrap_or(self.initiator)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentKind {
    #[default]
    Text,
    Image,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
        }
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            other => Err(format!("unknown content kind: {other}")),
        }
    }
}

/// Conversation between the two members of a pair.
///
/// Each participant has their own unread counter: `unread_low` belongs to
/// `pair.low()`, `unread_high` to `pair.high()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub pair: PairKey,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_low: u32,
    pub unread_high: u32,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Unread count for one participant, `None` for outsiders.
    pub fn unread_for(&self, user_id: Uuid) -> Option<u32> {
        if user_id == self.pair.low() {
            Some(self.unread_low)
        } else if user_id == self.pair.high() {
            Some(self.unread_high)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub content_kind: ContentKind,
    pub extra_data: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(PairKey::new(a, b), PairKey::new(b, a));

        let key = PairKey::new(a, b);
        assert!(key.low() <= key.high());
        assert_eq!(key.other(a), Some(b));
        assert_eq!(key.other(b), Some(a));
        assert_eq!(key.other(Uuid::new_v4()), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!MatchStatus::Pending.is_terminal());
        assert!(!MatchStatus::Matched.is_terminal());
        assert!(MatchStatus::Dissolved.is_terminal());
        assert!(MatchStatus::Rejected.is_terminal());
    }

    #[test]
    fn status_parses_its_own_names() {
        for status in [
            MatchStatus::Pending,
            MatchStatus::Matched,
            MatchStatus::Dissolved,
            MatchStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<MatchStatus>(), Ok(status));
        }
        assert!("liked".parse::<MatchStatus>().is_err());
    }
}
