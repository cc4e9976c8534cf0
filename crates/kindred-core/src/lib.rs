//! Matching and conversation state for Kindred.
//!
//! `MatchEngine` owns the mutual-interest state machine per pair of users and
//! materializes a conversation through `ConversationRegistry` the moment a
//! pair becomes matched. Both are synchronous and block on SQLite; async
//! callers run them on the blocking pool.

pub mod conversations;
pub mod error;
pub mod locks;
pub mod matching;

pub use conversations::{ConversationRegistry, MessageDraft, ReadReceipt};
pub use error::CoreError;
pub use matching::{InterestOutcome, MatchEngine};
