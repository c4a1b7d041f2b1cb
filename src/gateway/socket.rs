use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tracing::instrument;

use super::{ChannelId, GatewayEvent, MessageEvent, ReactionEvent};
use crate::db::models::account::{CommunityId, MemberId};
use crate::db::models::award::MessageId;
use crate::util::env::{EnvErr, Var};
use crate::var;

const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

// GUILDS | GUILD_MESSAGES | GUILD_MESSAGE_REACTIONS | DIRECT_MESSAGES | MESSAGE_CONTENT
const INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 10) | (1 << 12) | (1 << 15);

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Spawns the gateway connection task. Decoded events are pushed onto `tx`;
/// the task reconnects indefinitely on session failure.
pub async fn start_gateway(
    tx: UnboundedSender<GatewayEvent>,
) -> SocketResult<JoinHandle<()>> {
    let token = var!(Var::BotToken).await?.to_string();

    Ok(tokio::spawn(async move {
        loop {
            match run_session(&token, &tx).await {
                // a rejected identify (bad token, disallowed intents) will
                // never succeed on retry
                Err(e @ SocketErr::Rejected(_)) => {
                    tracing::error!(error = %e, "gateway rejected the session, giving up");
                    return;
                }
                Err(e) => tracing::error!(error = ?e, "gateway session ended"),
                Ok(()) => {}
            }

            tokio::time::sleep(RECONNECT_DELAY).await;
            tracing::info!("reconnecting to gateway");
        }
    }))
}

#[instrument(skip(token, tx))]
async fn run_session(token: &str, tx: &UnboundedSender<GatewayEvent>) -> SocketResult<()> {
    let (stream, _) = connect_async(GATEWAY_URL).await?;
    let (mut writer, mut reader) = stream.split();

    // the server opens with HELLO carrying the heartbeat cadence
    let hello = loop {
        match reader.next().await.ok_or(SocketErr::StreamClosed)?? {
            Message::Text(raw) => break serde_json::from_str::<Frame>(raw.as_str())?,
            Message::Close(frame) => return Err(close_err(frame)),
            _ => continue,
        }
    };

    if hello.op != 10 {
        return Err(SocketErr::Protocol("expected HELLO as first frame"));
    }

    let interval_ms = hello
        .d
        .get("heartbeat_interval")
        .and_then(Value::as_u64)
        .ok_or(SocketErr::Protocol("missing heartbeat_interval"))?;

    writer.send(identify(token)).await?;
    tracing::info!(interval_ms, "gateway session identified");

    let mut heartbeat = tokio::time::interval(Duration::from_millis(interval_ms));
    heartbeat.tick().await;

    let mut seq: Option<u64> = None;

    loop {
        tokio::select! {
            incoming = reader.next() => {
                let msg = incoming.ok_or(SocketErr::StreamClosed)??;
                match msg {
                    Message::Text(raw) => {
                        let frame: Frame = serde_json::from_str(raw.as_str())?;
                        if let Some(s) = frame.s {
                            seq = Some(s);
                        }

                        match frame.op {
                            0 => dispatch(frame, tx)?,
                            1 => writer.send(heartbeat_frame(seq)).await?,
                            7 | 9 => return Err(SocketErr::Protocol("server requested reconnect")),
                            11 => tracing::trace!("heartbeat acked"),
                            op => tracing::debug!(op, "unhandled gateway op"),
                        }
                    }

                    Message::Close(frame) => {
                        tracing::warn!(frame = ?frame, "gateway connection closed");
                        return Err(close_err(frame));
                    }

                    _ => {}
                }
            }

            _ = heartbeat.tick() => {
                writer.send(heartbeat_frame(seq)).await?;
            }
        }
    }
}

#[instrument(skip(frame, tx), fields(event = ?frame.t))]
fn dispatch(frame: Frame, tx: &UnboundedSender<GatewayEvent>) -> SocketResult<()> {
    match frame.t.as_deref() {
        Some("MESSAGE_REACTION_ADD") => {
            let payload: ReactionPayload = serde_json::from_value(frame.d)?;
            tx.send(GatewayEvent::ReactionAdded(payload.into()))?;
        }

        Some("MESSAGE_REACTION_REMOVE") => {
            let payload: ReactionPayload = serde_json::from_value(frame.d)?;
            tx.send(GatewayEvent::ReactionRemoved(payload.into()))?;
        }

        Some("MESSAGE_CREATE") => {
            let payload: MessagePayload = serde_json::from_value(frame.d)?;
            tx.send(GatewayEvent::MessageCreated(payload.into()))?;
        }

        Some("READY") => {
            tracing::info!("gateway READY received");
        }

        other => {
            tracing::trace!(event = ?other, "ignored dispatch");
        }
    }

    Ok(())
}

fn identify(token: &str) -> Message {
    Message::text(
        json!({
            "op": 2,
            "d": {
                "token": token,
                "intents": INTENTS,
                "properties": {
                    "os": "linux",
                    "browser": "hatkeeper",
                    "device": "hatkeeper",
                },
            },
        })
        .to_string(),
    )
}

fn heartbeat_frame(seq: Option<u64>) -> Message {
    Message::text(json!({ "op": 1, "d": seq }).to_string())
}

/// Maps a close frame to the session error. 4004 (authentication failed) and
/// 4013/4014 (invalid or disallowed intents) are terminal; everything else is
/// an ordinary stream drop and reconnects.
fn close_err(frame: Option<CloseFrame>) -> SocketErr {
    match frame {
        Some(frame) => match u16::from(frame.code) {
            code @ (4004 | 4013 | 4014) => SocketErr::Rejected(code),
            _ => SocketErr::StreamClosed,
        },
        None => SocketErr::StreamClosed,
    }
}

#[derive(Debug, Deserialize)]
struct Frame {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReactionPayload {
    guild_id: Option<String>,
    channel_id: String,
    message_id: String,
    user_id: String,
    emoji: EmojiPayload,
}

#[derive(Debug, Deserialize)]
struct EmojiPayload {
    name: Option<String>,
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    guild_id: Option<String>,
    channel_id: String,
    #[serde(default)]
    content: String,
    author: MessageAuthor,
}

#[derive(Debug, Deserialize)]
struct MessageAuthor {
    id: String,
    #[serde(default)]
    bot: bool,
}

impl EmojiPayload {
    /// Unicode emoji key by name; custom emoji as `name:id` so distinct
    /// uploads never collide.
    fn key(self) -> String {
        let name = self.name.unwrap_or_default();
        match self.id {
            Some(id) => format!("{name}:{id}"),
            None => name,
        }
    }
}

impl From<ReactionPayload> for ReactionEvent {
    fn from(value: ReactionPayload) -> Self {
        ReactionEvent {
            community: value.guild_id.map(CommunityId),
            channel: ChannelId(value.channel_id),
            message: MessageId(value.message_id),
            reactor: MemberId(value.user_id),
            emoji: value.emoji.key(),
        }
    }
}

impl From<MessagePayload> for MessageEvent {
    fn from(value: MessagePayload) -> Self {
        MessageEvent {
            community: value.guild_id.map(CommunityId),
            channel: ChannelId(value.channel_id),
            author: MemberId(value.author.id),
            author_is_bot: value.author.bot,
            content: value.content,
        }
    }
}

pub type SocketResult<T> = core::result::Result<T, SocketErr>;

#[derive(Debug, Error)]
pub enum SocketErr {
    #[error(transparent)]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Env(#[from] EnvErr),

    #[error(transparent)]
    Send(#[from] mpsc::error::SendError<GatewayEvent>),

    #[error("gateway stream closed")]
    StreamClosed,

    #[error("gateway rejected the session (close code {0})")]
    Rejected(u16),

    #[error("gateway protocol violation: {0}")]
    Protocol(&'static str),
}
