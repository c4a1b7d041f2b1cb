use std::collections::HashMap;

use async_trait::async_trait;
use http::HeaderMap;
use http::header::{AUTHORIZATION, HeaderValue};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::instrument;

use super::{ChannelId, ChatGateway, FetchedMessage, GatewayErr, GatewayResult};
use crate::db::models::account::MemberId;
use crate::db::models::award::MessageId;
use crate::util::env::Var;
use crate::var;

const API_BASE: &str = "https://discord.com/api/v10";

/// HTTP half of the platform adapter: message lookups and outbound sends,
/// authenticated with the bot token.
pub struct RestGateway {
    client: reqwest::Client,
    headers: HeaderMap,
    // One DM channel per member; the platform returns the same channel on
    // repeat opens, so cache it.
    dm_channels: Mutex<HashMap<MemberId, ChannelId>>,
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    author: AuthorPayload,
}

#[derive(Debug, Deserialize)]
struct AuthorPayload {
    id: String,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct DmChannelPayload {
    id: String,
}

impl RestGateway {
    pub async fn new() -> GatewayResult<Self> {
        let token = var!(Var::BotToken).await?;

        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bot {token}"))
            .map_err(|_| GatewayErr::Forbidden)?;
        headers.insert(AUTHORIZATION, auth);

        Ok(Self {
            client: reqwest::Client::new(),
            headers,
            dm_channels: Mutex::new(HashMap::new()),
        })
    }

    #[instrument(skip(self))]
    async fn get_json<T: serde::de::DeserializeOwned>(&self, uri: String) -> GatewayResult<T> {
        let response = self
            .client
            .get(uri)
            .headers(self.headers.clone())
            .send()
            .await?;

        Ok(checked(response).await?.json::<T>().await?)
    }

    #[instrument(skip(self, body))]
    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        uri: String,
        body: serde_json::Value,
    ) -> GatewayResult<T> {
        let response = self
            .client
            .post(uri)
            .headers(self.headers.clone())
            .json(&body)
            .send()
            .await?;

        Ok(checked(response).await?.json::<T>().await?)
    }

    #[instrument(skip(self))]
    async fn dm_channel(&self, member: &MemberId) -> GatewayResult<ChannelId> {
        if let Some(channel) = self.dm_channels.lock().await.get(member) {
            return Ok(channel.clone());
        }

        let opened: DmChannelPayload = self
            .post_json(
                format!("{API_BASE}/users/@me/channels"),
                json!({ "recipient_id": member.0 }),
            )
            .await?;

        let channel = ChannelId(opened.id);
        self.dm_channels
            .lock()
            .await
            .insert(member.clone(), channel.clone());

        Ok(channel)
    }
}

async fn checked(response: reqwest::Response) -> GatewayResult<reqwest::Response> {
    match response.status() {
        s if s.is_success() => Ok(response),
        reqwest::StatusCode::NOT_FOUND => Err(GatewayErr::NotFound),
        reqwest::StatusCode::FORBIDDEN | reqwest::StatusCode::UNAUTHORIZED => {
            Err(GatewayErr::Forbidden)
        }
        s => Err(GatewayErr::Status(s.as_u16())),
    }
}

#[async_trait]
impl ChatGateway for RestGateway {
    #[instrument(skip(self))]
    async fn fetch_message(
        &self,
        channel: &ChannelId,
        message: &MessageId,
    ) -> GatewayResult<FetchedMessage> {
        let payload: MessagePayload = self
            .get_json(format!("{API_BASE}/channels/{channel}/messages/{message}"))
            .await?;

        Ok(FetchedMessage {
            author: MemberId(payload.author.id),
            author_is_bot: payload.author.bot,
        })
    }

    #[instrument(skip(self, text))]
    async fn send_dm(&self, member: &MemberId, text: &str) -> GatewayResult<()> {
        let channel = self.dm_channel(member).await?;
        self.send_channel(&channel, text).await
    }

    #[instrument(skip(self, text))]
    async fn send_channel(&self, channel: &ChannelId, text: &str) -> GatewayResult<()> {
        let _: serde_json::Value = self
            .post_json(
                format!("{API_BASE}/channels/{channel}/messages"),
                json!({ "content": text }),
            )
            .await?;

        Ok(())
    }
}
