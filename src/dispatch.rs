use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::db::PgError;
use crate::db::ledger::Ledger;
use crate::db::models::account::{CommunityId, MemberId};
use crate::engine::quiz::{QuizEngine, QuizErr, ReplyRouter};
use crate::engine::reaction::ReactionAwardEngine;
use crate::gateway::{ChatGateway, GatewayErr, GatewayEvent, MessageEvent};

const LEADERBOARD_DEFAULT: i64 = 10;
const LEADERBOARD_MAX: i64 = 25;

/// A recognized `!`-prefixed chat command. Parsing is pure so it can be
/// tested without any transport in play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Sort,
    Resort { target: Option<MemberId> },
    PointsAdd { target: MemberId, amount: i64, reason: Option<String> },
    PointsRemove { target: MemberId, amount: i64, reason: Option<String> },
    PointsHelp,
    House { target: Option<MemberId> },
    PointsCheck { target: Option<MemberId> },
    Leaderboard { limit: i64 },
    HouseCup,
}

impl Command {
    /// `None` for anything that is not a command we know; the message is
    /// ordinary chat and gets ignored.
    pub fn parse(content: &str) -> Option<Command> {
        let mut tokens = content.split_whitespace();
        let head = tokens.next()?;

        match head {
            "!sort" => Some(Command::Sort),
            "!resort" => Some(Command::Resort {
                target: tokens.next().and_then(parse_mention),
            }),
            "!points" => Some(Self::parse_points(&mut tokens)),
            "!house" => Some(Command::House {
                target: tokens.next().and_then(parse_mention),
            }),
            "!pointscheck" => Some(Command::PointsCheck {
                target: tokens.next().and_then(parse_mention),
            }),
            "!leaderboard" => Some(Command::Leaderboard {
                limit: tokens
                    .next()
                    .and_then(|raw| raw.parse().ok())
                    .unwrap_or(LEADERBOARD_DEFAULT),
            }),
            "!housecup" => Some(Command::HouseCup),
            _ => None,
        }
    }

    fn parse_points<'a, I: Iterator<Item = &'a str>>(tokens: &mut I) -> Command {
        let sub = tokens.next();
        let negate = match sub {
            Some("add") => false,
            Some("remove") => true,
            _ => return Command::PointsHelp,
        };

        let Some(target) = tokens.next().and_then(parse_mention) else {
            return Command::PointsHelp;
        };
        let Some(amount) = tokens.next().and_then(|raw| raw.parse::<i64>().ok()) else {
            return Command::PointsHelp;
        };

        let rest: Vec<&str> = tokens.collect();
        let reason = (!rest.is_empty()).then(|| rest.join(" "));

        if negate {
            Command::PointsRemove { target, amount, reason }
        } else {
            Command::PointsAdd { target, amount, reason }
        }
    }
}

/// Accepts `<@123>` and `<@!123>` mention tokens.
pub fn parse_mention(token: &str) -> Option<MemberId> {
    let inner = token.strip_prefix("<@")?.strip_suffix('>')?;
    let id = inner.strip_prefix('!').unwrap_or(inner);

    (!id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
        .then(|| MemberId::from(id))
}

/// Fans the gateway event stream out to the engines. Each event is handled
/// on its own task so a long-running quiz never stalls reaction awards.
pub struct Dispatcher<G, L> {
    gateway: Arc<G>,
    ledger: Arc<L>,
    reactions: Arc<ReactionAwardEngine<G, L>>,
    quiz: Arc<QuizEngine<G>>,
    router: Arc<ReplyRouter>,
    admins: HashSet<MemberId>,
}

impl<G: ChatGateway + 'static, L: Ledger + 'static> Dispatcher<G, L> {
    pub fn new(
        gateway: Arc<G>,
        ledger: Arc<L>,
        reactions: Arc<ReactionAwardEngine<G, L>>,
        quiz: Arc<QuizEngine<G>>,
        router: Arc<ReplyRouter>,
        admins: HashSet<MemberId>,
    ) -> Self {
        Self {
            gateway,
            ledger,
            reactions,
            quiz,
            router,
            admins,
        }
    }

    pub fn start(self: Arc<Self>, mut events: UnboundedReceiver<GatewayEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::debug!("event dispatcher running");

            while let Some(event) = events.recv().await {
                let this = Arc::clone(&self);

                tokio::spawn(async move {
                    match event {
                        GatewayEvent::ReactionAdded(ev) => {
                            if let Err(e) = this.reactions.handle_added(&ev).await {
                                tracing::error!(error = ?e, "reaction add handling failed");
                            }
                        }
                        GatewayEvent::ReactionRemoved(ev) => {
                            if let Err(e) = this.reactions.handle_removed(&ev).await {
                                tracing::error!(error = ?e, "reaction remove handling failed");
                            }
                        }
                        GatewayEvent::MessageCreated(msg) => this.on_message(msg).await,
                    }
                });
            }

            tracing::warn!("gateway event stream ended, dispatcher stopping");
        })
    }

    async fn on_message(&self, msg: MessageEvent) {
        if msg.author_is_bot {
            return;
        }

        match &msg.community {
            // private messages are only ever quiz answers
            None => {
                if !self.router.deliver(&msg.author, msg.content.clone()) {
                    tracing::debug!(subject = %msg.author, "dropped DM with no session waiting");
                }
            }
            Some(community) => {
                let Some(command) = Command::parse(&msg.content) else {
                    return;
                };

                if let Err(e) = self.handle_command(community.clone(), &msg, command).await {
                    tracing::error!(error = ?e, author = %msg.author, "command failed");
                }
            }
        }
    }

    #[instrument(skip(self, msg), fields(author = %msg.author))]
    async fn handle_command(
        &self,
        community: CommunityId,
        msg: &MessageEvent,
        command: Command,
    ) -> DispatchResult<()> {
        match command {
            Command::Sort => {
                let account = self.ledger.get_account(&community, &msg.author).await?;
                if let Some(house) = account.and_then(|a| a.house()) {
                    return self
                        .reply(
                            msg,
                            &format!(
                                "🪄 You're already sorted into **{house}**! \
                                 An admin can `!resort` you."
                            ),
                        )
                        .await;
                }

                self.run_quiz(&community, msg, &msg.author).await
            }
            Command::Resort { target } => {
                if !self.admins.contains(&msg.author) {
                    return self
                        .reply(msg, "❌ You don't have permission for that command.")
                        .await;
                }

                let subject = target.unwrap_or_else(|| msg.author.clone());
                self.run_quiz(&community, msg, &subject).await
            }
            Command::PointsAdd { target, amount, reason } => {
                self.adjust_points(&community, msg, target, amount, false, reason)
                    .await
            }
            Command::PointsRemove { target, amount, reason } => {
                self.adjust_points(&community, msg, target, amount, true, reason)
                    .await
            }
            Command::PointsHelp => {
                self.reply(
                    msg,
                    "Usage: `!points add @member <amount> [reason]` or \
                     `!points remove @member <amount> [reason]`",
                )
                .await
            }
            Command::House { target } => {
                let subject = target.unwrap_or_else(|| msg.author.clone());
                let account = self.ledger.get_account(&community, &subject).await?;

                let text = match account.as_ref().and_then(|a| a.house()) {
                    Some(house) => format!(
                        "🏰 <@{subject}> belongs to **{house}** with **{}** points.",
                        account.map(|a| a.points).unwrap_or(0)
                    ),
                    None => format!("❓ <@{subject}> isn't sorted yet. Try `!sort`."),
                };

                self.reply(msg, &text).await
            }
            Command::PointsCheck { target } => {
                let subject = target.unwrap_or_else(|| msg.author.clone());
                let account = self.ledger.get_account(&community, &subject).await?;

                let text = match account {
                    Some(account) => {
                        let house = account
                            .house()
                            .map(|h| h.to_string())
                            .unwrap_or_else(|| "Unsorted".to_string());
                        format!("🔎 <@{subject}> has **{}** points. ({house})", account.points)
                    }
                    None => format!("❓ No record for <@{subject}> yet."),
                };

                self.reply(msg, &text).await
            }
            Command::Leaderboard { limit } => {
                let limit = limit.clamp(1, LEADERBOARD_MAX);
                let rows = self.ledger.leaderboard(&community, limit).await?;

                if rows.is_empty() {
                    return self.reply(msg, "📊 No points on the board yet.").await;
                }

                let mut text = String::from("📊 **Leaderboard**\n");
                for (i, row) in rows.iter().enumerate() {
                    let house = row
                        .house()
                        .map(|h| h.to_string())
                        .unwrap_or_else(|| "Unsorted".to_string());
                    text.push_str(&format!(
                        "**{}.** <@{}> — **{}** ({house})\n",
                        i + 1,
                        row.member_id,
                        row.points
                    ));
                }

                self.reply(msg, text.trim_end()).await
            }
            Command::HouseCup => {
                let rows = self.ledger.house_totals(&community).await?;

                if rows.is_empty() {
                    return self
                        .reply(msg, "🏆 No house totals yet. Members need to `!sort` first.")
                        .await;
                }

                let mut text = String::from("🏆 **House Cup Standings**\n");
                for (i, row) in rows.iter().enumerate() {
                    text.push_str(&format!("**{}. {}** — **{}**\n", i + 1, row.house, row.total));
                }

                self.reply(msg, text.trim_end()).await
            }
        }
    }

    async fn run_quiz(
        &self,
        community: &CommunityId,
        msg: &MessageEvent,
        subject: &MemberId,
    ) -> DispatchResult<()> {
        match self.quiz.run(subject).await {
            Ok(house) => {
                self.ledger
                    .set_classification(community, subject, house)
                    .await?;
                self.reply(
                    msg,
                    &format!("✨ The Sorting Hat has spoken! <@{subject}> joins **{house}**."),
                )
                .await
            }
            Err(QuizErr::AlreadyActive) => {
                self.reply(
                    msg,
                    &format!("🪄 A sorting is already in progress for <@{subject}>."),
                )
                .await
            }
            Err(QuizErr::Unreachable) => {
                self.reply(
                    msg,
                    &format!(
                        "❌ I can't DM <@{subject}>. Enable DMs from community members \
                         and try again."
                    ),
                )
                .await
            }
            // the subject was already told what happened over DM
            Err(QuizErr::Timeout | QuizErr::InvalidAnswer) => Ok(()),
            Err(e) => {
                tracing::error!(error = ?e, subject = %subject, "quiz session failed");
                Ok(())
            }
        }
    }

    async fn adjust_points(
        &self,
        community: &CommunityId,
        msg: &MessageEvent,
        target: MemberId,
        amount: i64,
        negate: bool,
        reason: Option<String>,
    ) -> DispatchResult<()> {
        if !self.admins.contains(&msg.author) {
            return self
                .reply(msg, "❌ You don't have permission for that command.")
                .await;
        }

        // the direction comes from the subcommand; a signed amount would
        // silently invert it
        if amount <= 0 {
            return self.reply(msg, "❌ The amount must be a positive number.").await;
        }

        let delta = if negate { -amount } else { amount };
        let reason = reason.unwrap_or_else(|| "manual adjustment".to_string());
        let total = self
            .ledger
            .add_delta(community, &target, &msg.author, delta, &reason)
            .await?;

        let verb = if delta > 0 { "Added" } else { "Removed" };
        self.reply(
            msg,
            &format!(
                "🏆 {verb} **{}** points {} <@{target}> ({reason}). New total: **{total}**.",
                delta.abs(),
                if delta > 0 { "to" } else { "from" },
            ),
        )
        .await
    }

    async fn reply(&self, msg: &MessageEvent, text: &str) -> DispatchResult<()> {
        self.gateway.send_channel(&msg.channel, text).await?;
        Ok(())
    }
}

pub type DispatchResult<T> = core::result::Result<T, DispatchErr>;

#[derive(Debug, Error)]
pub enum DispatchErr {
    #[error(transparent)]
    Ledger(#[from] PgError),

    #[error(transparent)]
    Gateway(#[from] GatewayErr),
}
