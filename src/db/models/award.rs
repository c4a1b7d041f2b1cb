use core::fmt;

use serde::{Deserialize, Serialize};

use super::account::{CommunityId, MemberId};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct MessageId(pub String);

/// Unique key of one reversible reaction award. Presence of a row under this
/// key means the award is open and un-reversed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AwardKey {
    pub community: CommunityId,
    pub message: MessageId,
    pub reactor: MemberId,
    pub emoji: String,
}

/// What `take_award` hands back: the recorded delta and the account it was
/// applied to. Reversal negates this delta rather than recomputing it, so a
/// weight-table change between add and remove cannot skew the compensation.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TakenAward {
    pub delta: i64,
    pub target_id: MemberId,
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        MessageId(value)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        MessageId(value.to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
