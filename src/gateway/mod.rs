use core::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::models::account::{CommunityId, MemberId};
use crate::db::models::award::MessageId;
use crate::util::env::EnvErr;

pub mod rest;
pub mod socket;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl From<&str> for ChannelId {
    fn from(value: &str) -> Self {
        ChannelId(value.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(value: String) -> Self {
        ChannelId(value)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decoded platform notifications, already stripped down to the fields the
/// engines act on.
#[derive(Debug)]
pub enum GatewayEvent {
    ReactionAdded(ReactionEvent),
    ReactionRemoved(ReactionEvent),
    MessageCreated(MessageEvent),
}

/// `community` is `None` for reactions placed outside a community context
/// (direct-message channels); the award engine drops those.
#[derive(Debug, Clone)]
pub struct ReactionEvent {
    pub community: Option<CommunityId>,
    pub channel: ChannelId,
    pub message: MessageId,
    pub reactor: MemberId,
    pub emoji: String,
}

#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub community: Option<CommunityId>,
    pub channel: ChannelId,
    pub author: MemberId,
    pub author_is_bot: bool,
    pub content: String,
}

/// Author info resolved for a reacted-to message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub author: MemberId,
    pub author_is_bot: bool,
}

/// Outbound half of the platform adapter. The engines only ever need these
/// three calls; tests swap in a scripted implementation.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn fetch_message(
        &self,
        channel: &ChannelId,
        message: &MessageId,
    ) -> GatewayResult<FetchedMessage>;

    async fn send_dm(&self, member: &MemberId, text: &str) -> GatewayResult<()>;

    async fn send_channel(&self, channel: &ChannelId, text: &str) -> GatewayResult<()>;
}

pub type GatewayResult<T> = core::result::Result<T, GatewayErr>;

#[derive(Debug, Error)]
pub enum GatewayErr {
    #[error("resource not found")]
    NotFound,

    /// Covers both missing permissions and members who have disabled DMs.
    #[error("access forbidden")]
    Forbidden,

    #[error("unexpected response status {0}")]
    Status(u16),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Env(#[from] EnvErr),
}
