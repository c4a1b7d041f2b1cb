use core::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct CommunityId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct MemberId(pub String);

/// The four mutually-exclusive groups a member can be sorted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum House {
    Gryffindor,
    Hufflepuff,
    Ravenclaw,
    Slytherin,
}

impl House {
    pub const ALL: [House; 4] = [
        House::Gryffindor,
        House::Hufflepuff,
        House::Ravenclaw,
        House::Slytherin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            House::Gryffindor => "Gryffindor",
            House::Hufflepuff => "Hufflepuff",
            House::Ravenclaw => "Ravenclaw",
            House::Slytherin => "Slytherin",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            House::Gryffindor => 0,
            House::Hufflepuff => 1,
            House::Ravenclaw => 2,
            House::Slytherin => 3,
        }
    }
}

impl FromStr for House {
    type Err = UnknownHouse;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Gryffindor" => Ok(House::Gryffindor),
            "Hufflepuff" => Ok(House::Hufflepuff),
            "Ravenclaw" => Ok(House::Ravenclaw),
            "Slytherin" => Ok(House::Slytherin),
            _ => Err(UnknownHouse),
        }
    }
}

#[derive(Debug)]
pub struct UnknownHouse;

/// Base account table model. One row per (community, member); created
/// implicitly on the first point delta or classification and never deleted.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Account {
    pub community_id: CommunityId,
    pub member_id: MemberId,
    pub house: Option<String>,
    pub points: i64,
    pub sorted_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Account {
    pub fn house(&self) -> Option<House> {
        self.house.as_deref().and_then(|h| h.parse().ok())
    }
}

/// One row of the per-community house standings (`!housecup`).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HouseStanding {
    pub house: String,
    pub total: i64,
}

impl From<String> for CommunityId {
    fn from(value: String) -> Self {
        CommunityId(value)
    }
}

impl From<&str> for CommunityId {
    fn from(value: &str) -> Self {
        CommunityId(value.to_string())
    }
}

impl From<String> for MemberId {
    fn from(value: String) -> Self {
        MemberId(value)
    }
}

impl From<&str> for MemberId {
    fn from(value: &str) -> Self {
        MemberId(value.to_string())
    }
}

impl fmt::Display for CommunityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for House {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
