use std::sync::Arc;

use tracing::instrument;

use crate::config::AwardConfig;
use crate::db::ledger::{Ledger, LedgerResult};
use crate::db::models::account::MemberId;
use crate::db::models::award::AwardKey;
use crate::gateway::{ChatGateway, ReactionEvent};

/// Turns the reaction add/remove stream into exactly-once, reversible point
/// deltas. The award-key insert is the serialization point: duplicate
/// deliveries collide on it and change nothing.
pub struct ReactionAwardEngine<G, L> {
    gateway: Arc<G>,
    ledger: Arc<L>,
    config: AwardConfig,
    self_id: MemberId,
}

/// What one event did. `Skipped` covers every internally-handled condition;
/// callers only log these.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Awarded { delta: i64, total: i64 },
    Reversed { delta: i64, total: i64 },
    Skipped(Skip),
}

#[derive(Debug, PartialEq, Eq)]
pub enum Skip {
    NoCommunity,
    SelfReaction,
    ChannelNotAllowed,
    UnknownEmoji,
    FetchFailed,
    BotAuthor,
    OwnMessage,
    Duplicate,
    NoOutstandingAward,
}

impl<G: ChatGateway, L: Ledger> ReactionAwardEngine<G, L> {
    pub fn new(gateway: Arc<G>, ledger: Arc<L>, config: AwardConfig, self_id: MemberId) -> Self {
        Self {
            gateway,
            ledger,
            config,
            self_id,
        }
    }

    /// Preconditions run in order and short-circuit without side effects.
    /// Ledger failures propagate; a message we cannot fetch is a no-op.
    #[instrument(skip(self, ev), fields(message = %ev.message, reactor = %ev.reactor))]
    pub async fn handle_added(&self, ev: &ReactionEvent) -> LedgerResult<Outcome> {
        let Some(community) = &ev.community else {
            return Ok(Outcome::Skipped(Skip::NoCommunity));
        };

        if ev.reactor == self.self_id {
            return Ok(Outcome::Skipped(Skip::SelfReaction));
        }

        if !self.config.allowed_channels.is_empty()
            && !self.config.allowed_channels.contains(&ev.channel)
        {
            return Ok(Outcome::Skipped(Skip::ChannelNotAllowed));
        }

        let Some(&delta) = self.config.weights.get(&ev.emoji) else {
            return Ok(Outcome::Skipped(Skip::UnknownEmoji));
        };

        let message = match self.gateway.fetch_message(&ev.channel, &ev.message).await {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(error = ?e, "message fetch failed, dropping reaction");
                return Ok(Outcome::Skipped(Skip::FetchFailed));
            }
        };

        if message.author_is_bot {
            return Ok(Outcome::Skipped(Skip::BotAuthor));
        }

        if message.author == ev.reactor {
            return Ok(Outcome::Skipped(Skip::OwnMessage));
        }

        let key = AwardKey {
            community: community.clone(),
            message: ev.message.clone(),
            reactor: ev.reactor.clone(),
            emoji: ev.emoji.clone(),
        };

        // atomic insert-if-absent; a redelivered event loses the race here
        if !self
            .ledger
            .try_record_award(&key, &message.author, delta)
            .await?
        {
            return Ok(Outcome::Skipped(Skip::Duplicate));
        }

        let total = self
            .ledger
            .add_delta(
                community,
                &message.author,
                &ev.reactor,
                delta,
                &format!("reaction {} on msg {}", ev.emoji, ev.message),
            )
            .await?;

        tracing::info!(delta, total, target = %message.author, "reaction awarded");

        Ok(Outcome::Awarded { delta, total })
    }

    /// Reversal applies the negation of the *recorded* delta to the recorded
    /// target. Author/bot state is deliberately not re-checked here: the
    /// record is the authority on what was awarded, and it stays reversible
    /// even when the message is gone or the weight table has changed.
    #[instrument(skip(self, ev), fields(message = %ev.message, reactor = %ev.reactor))]
    pub async fn handle_removed(&self, ev: &ReactionEvent) -> LedgerResult<Outcome> {
        let Some(community) = &ev.community else {
            return Ok(Outcome::Skipped(Skip::NoCommunity));
        };

        if ev.reactor == self.self_id {
            return Ok(Outcome::Skipped(Skip::SelfReaction));
        }

        if !self.config.allowed_channels.is_empty()
            && !self.config.allowed_channels.contains(&ev.channel)
        {
            return Ok(Outcome::Skipped(Skip::ChannelNotAllowed));
        }

        if !self.config.weights.contains_key(&ev.emoji) {
            return Ok(Outcome::Skipped(Skip::UnknownEmoji));
        }

        let key = AwardKey {
            community: community.clone(),
            message: ev.message.clone(),
            reactor: ev.reactor.clone(),
            emoji: ev.emoji.clone(),
        };

        // a remove with nothing outstanding (never awarded, already reversed,
        // or remove delivered before its add) is the correct no-op
        let Some(taken) = self.ledger.take_award(&key).await? else {
            return Ok(Outcome::Skipped(Skip::NoOutstandingAward));
        };

        let total = self
            .ledger
            .add_delta(
                community,
                &taken.target_id,
                &ev.reactor,
                -taken.delta,
                &format!("removed reaction {} on msg {}", ev.emoji, ev.message),
            )
            .await?;

        tracing::info!(delta = -taken.delta, total, target = %taken.target_id, "award reversed");

        Ok(Outcome::Reversed {
            delta: -taken.delta,
            total,
        })
    }
}

#[cfg(test)]
mod test {
    use std::collections::{HashMap, HashSet};

    use super::*;
    use crate::config::default_weights;
    use crate::db::models::account::CommunityId;
    use crate::gateway::{ChannelId, FetchedMessage};
    use crate::testutil::{MemoryLedger, MockGateway};

    fn engine(
        gateway: Arc<MockGateway>,
        ledger: Arc<MemoryLedger>,
        weights: HashMap<String, i64>,
    ) -> ReactionAwardEngine<MockGateway, MemoryLedger> {
        ReactionAwardEngine::new(
            gateway,
            ledger,
            AwardConfig {
                weights,
                allowed_channels: HashSet::new(),
            },
            MemberId::from("bot"),
        )
    }

    fn event(emoji: &str) -> ReactionEvent {
        ReactionEvent {
            community: Some(CommunityId::from("guild")),
            channel: ChannelId::from("chan"),
            message: "msg-1".into(),
            reactor: MemberId::from("reactor"),
            emoji: emoji.to_string(),
        }
    }

    fn author_message() -> FetchedMessage {
        FetchedMessage {
            author: MemberId::from("author"),
            author_is_bot: false,
        }
    }

    #[tokio::test]
    async fn duplicate_adds_award_exactly_once() {
        let gateway = Arc::new(MockGateway::new());
        let ledger = Arc::new(MemoryLedger::new());
        gateway.put_message("chan", "msg-1", author_message());

        let engine = engine(gateway, ledger.clone(), default_weights());
        let ev = event("👍");

        assert_eq!(
            engine.handle_added(&ev).await.unwrap(),
            Outcome::Awarded { delta: 1, total: 1 }
        );

        for _ in 0..5 {
            assert_eq!(
                engine.handle_added(&ev).await.unwrap(),
                Outcome::Skipped(Skip::Duplicate)
            );
        }

        assert_eq!(ledger.points("guild", "author"), 1);
        assert_eq!(ledger.delta_count(), 1);
    }

    #[tokio::test]
    async fn remove_restores_prior_total_even_after_weight_change() {
        let gateway = Arc::new(MockGateway::new());
        let ledger = Arc::new(MemoryLedger::new());
        gateway.put_message("chan", "msg-1", author_message());

        let mut heavy = HashMap::new();
        heavy.insert("👍".to_string(), 5);

        let adder = engine(gateway.clone(), ledger.clone(), heavy);
        let ev = event("👍");

        adder.handle_added(&ev).await.unwrap();
        assert_eq!(ledger.points("guild", "author"), 5);

        // weight reconfigured between add and remove; the reversal must use
        // the recorded delta, not the new table
        let remover = engine(gateway, ledger.clone(), default_weights());
        assert_eq!(
            remover.handle_removed(&ev).await.unwrap(),
            Outcome::Reversed { delta: -5, total: 0 }
        );
        assert_eq!(ledger.points("guild", "author"), 0);
    }

    #[tokio::test]
    async fn orphan_remove_is_a_noop() {
        let gateway = Arc::new(MockGateway::new());
        let ledger = Arc::new(MemoryLedger::new());

        let engine = engine(gateway, ledger.clone(), default_weights());

        assert_eq!(
            engine.handle_removed(&event("👍")).await.unwrap(),
            Outcome::Skipped(Skip::NoOutstandingAward)
        );
        assert_eq!(ledger.delta_count(), 0);
    }

    #[tokio::test]
    async fn precondition_skips_have_no_side_effects() {
        let gateway = Arc::new(MockGateway::new());
        let ledger = Arc::new(MemoryLedger::new());
        gateway.put_message("chan", "msg-1", author_message());

        let engine = engine(gateway.clone(), ledger.clone(), default_weights());

        let mut dm = event("👍");
        dm.community = None;
        assert_eq!(
            engine.handle_added(&dm).await.unwrap(),
            Outcome::Skipped(Skip::NoCommunity)
        );

        let mut own = event("👍");
        own.reactor = MemberId::from("bot");
        assert_eq!(
            engine.handle_added(&own).await.unwrap(),
            Outcome::Skipped(Skip::SelfReaction)
        );

        assert_eq!(
            engine.handle_added(&event("🤷")).await.unwrap(),
            Outcome::Skipped(Skip::UnknownEmoji)
        );

        assert_eq!(ledger.delta_count(), 0);
    }

    #[tokio::test]
    async fn allow_list_restricts_channels() {
        let gateway = Arc::new(MockGateway::new());
        let ledger = Arc::new(MemoryLedger::new());
        gateway.put_message("chan", "msg-1", author_message());

        let mut allowed = HashSet::new();
        allowed.insert(ChannelId::from("other-chan"));

        let engine = ReactionAwardEngine::new(
            gateway,
            ledger.clone(),
            AwardConfig {
                weights: default_weights(),
                allowed_channels: allowed,
            },
            MemberId::from("bot"),
        );

        assert_eq!(
            engine.handle_added(&event("👍")).await.unwrap(),
            Outcome::Skipped(Skip::ChannelNotAllowed)
        );
    }

    #[tokio::test]
    async fn bot_authors_and_self_awards_are_ineligible() {
        let gateway = Arc::new(MockGateway::new());
        let ledger = Arc::new(MemoryLedger::new());

        gateway.put_message(
            "chan",
            "msg-1",
            FetchedMessage {
                author: MemberId::from("author"),
                author_is_bot: true,
            },
        );
        let engine = engine(gateway.clone(), ledger.clone(), default_weights());
        assert_eq!(
            engine.handle_added(&event("👍")).await.unwrap(),
            Outcome::Skipped(Skip::BotAuthor)
        );

        gateway.put_message(
            "chan",
            "msg-1",
            FetchedMessage {
                author: MemberId::from("reactor"),
                author_is_bot: false,
            },
        );
        assert_eq!(
            engine.handle_added(&event("👍")).await.unwrap(),
            Outcome::Skipped(Skip::OwnMessage)
        );

        assert_eq!(ledger.delta_count(), 0);
    }

    #[tokio::test]
    async fn fetch_failure_is_swallowed() {
        let gateway = Arc::new(MockGateway::new());
        let ledger = Arc::new(MemoryLedger::new());
        gateway.set_fail_fetch(true);

        let engine = engine(gateway, ledger.clone(), default_weights());

        assert_eq!(
            engine.handle_added(&event("👍")).await.unwrap(),
            Outcome::Skipped(Skip::FetchFailed)
        );
        assert_eq!(ledger.delta_count(), 0);
    }

    #[tokio::test]
    async fn end_to_end_award_and_reversal() {
        // member B reacts "+1"-style to A's message: A gains a point and an
        // award record exists; B un-reacts: total and record both revert
        let gateway = Arc::new(MockGateway::new());
        let ledger = Arc::new(MemoryLedger::new());
        gateway.put_message(
            "chan",
            "msg-1",
            FetchedMessage {
                author: MemberId::from("member-a"),
                author_is_bot: false,
            },
        );

        let engine = engine(gateway, ledger.clone(), default_weights());
        let mut ev = event("👍");
        ev.reactor = MemberId::from("member-b");

        engine.handle_added(&ev).await.unwrap();
        assert_eq!(ledger.points("guild", "member-a"), 1);
        assert!(ledger.has_award("guild", "msg-1", "member-b", "👍"));

        engine.handle_removed(&ev).await.unwrap();
        assert_eq!(ledger.points("guild", "member-a"), 0);
        assert!(!ledger.has_award("guild", "msg-1", "member-b", "👍"));
        assert_eq!(ledger.delta_count(), 2);
    }
}
