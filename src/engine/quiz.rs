use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tinyrand::{Rand, Seeded, StdRand};
use tinyrand_std::ClockSeed;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::timeout;
use tracing::instrument;
use uuid::Uuid;

use crate::config::QuizConfig;
use crate::db::models::account::{House, MemberId};
use crate::engine::questions::normalize_answer;
use crate::engine::score::Tally;
use crate::gateway::{ChatGateway, GatewayErr};

/// Process-wide set of members with a quiz in flight. The check-and-set runs
/// under one lock, so two near-simultaneous starts for the same subject can
/// never both acquire a session. Global, not per community: the dialogue
/// happens over the subject's private channel.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    active: Mutex<HashMap<MemberId, Uuid>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_begin(self: &Arc<Self>, subject: &MemberId) -> Option<SessionGuard> {
        let mut active = self.active.lock().expect("session registry poisoned");
        if active.contains_key(subject) {
            return None;
        }

        let id = Uuid::new_v4();
        active.insert(subject.clone(), id);

        Some(SessionGuard {
            registry: Arc::clone(self),
            subject: subject.clone(),
            id,
        })
    }

    pub fn is_active(&self, subject: &MemberId) -> bool {
        self.active
            .lock()
            .expect("session registry poisoned")
            .contains_key(subject)
    }
}

/// Releases the subject's registry slot on drop, whatever path the session
/// ended on.
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    subject: MemberId,
    pub id: Uuid,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry
            .active
            .lock()
            .expect("session registry poisoned")
            .remove(&self.subject);
    }
}

/// Hands inbound private messages to whichever quiz session is waiting on
/// that subject. At most one waiter per subject (enforced by the registry).
#[derive(Debug, Default)]
pub struct ReplyRouter {
    waiting: Mutex<HashMap<MemberId, mpsc::UnboundedSender<String>>>,
}

impl ReplyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subject: &MemberId) -> UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.waiting
            .lock()
            .expect("reply router poisoned")
            .insert(subject.clone(), tx);
        rx
    }

    pub fn unsubscribe(&self, subject: &MemberId) {
        self.waiting
            .lock()
            .expect("reply router poisoned")
            .remove(subject);
    }

    /// `false` when no session is waiting on this subject; the caller drops
    /// the message.
    pub fn deliver(&self, subject: &MemberId, text: String) -> bool {
        match self.waiting.lock().expect("reply router poisoned").get(subject) {
            Some(tx) => tx.send(text).is_ok(),
            None => false,
        }
    }
}

/// Runs the DM question sequence for one subject: single-flight per subject,
/// deadline-bounded per question, weighted tally with uniform random
/// tie-break. The caller persists the returned classification.
pub struct QuizEngine<G> {
    gateway: Arc<G>,
    registry: Arc<SessionRegistry>,
    router: Arc<ReplyRouter>,
    config: QuizConfig,
}

impl<G: ChatGateway> QuizEngine<G> {
    pub fn new(
        gateway: Arc<G>,
        registry: Arc<SessionRegistry>,
        router: Arc<ReplyRouter>,
        config: QuizConfig,
    ) -> Self {
        Self {
            gateway,
            registry,
            router,
            config,
        }
    }

    #[instrument(skip(self), fields(subject = %subject))]
    pub async fn run(&self, subject: &MemberId) -> QuizResult<House> {
        let guard = self
            .registry
            .try_begin(subject)
            .ok_or(QuizErr::AlreadyActive)?;

        let mut replies = self.router.subscribe(subject);
        tracing::info!(session = %guard.id, "quiz session started");

        let result = self.run_questions(subject, &mut replies).await;
        self.router.unsubscribe(subject);

        match &result {
            Ok(house) => tracing::info!(session = %guard.id, house = %house, "quiz completed"),
            Err(e) => tracing::info!(session = %guard.id, outcome = %e, "quiz ended unsorted"),
        }

        result
    }

    async fn run_questions(
        &self,
        subject: &MemberId,
        replies: &mut UnboundedReceiver<String>,
    ) -> QuizResult<House> {
        self.dm(
            subject,
            &format!(
                "🪄 **Sorting Hat Test**\n\
                 Reply with **A / B / C / D** for each question.\n\
                 You have **{}s** per question. Let's begin!",
                self.config.question_timeout.as_secs()
            ),
        )
        .await?;

        let mut tally = Tally::new();

        for (i, question) in self.config.questions.iter().enumerate() {
            self.dm(
                subject,
                &format!(
                    "**Q{}.** {}\n{}",
                    i + 1,
                    question.text,
                    question.render_options()
                ),
            )
            .await?;

            let reply = match timeout(self.config.question_timeout, replies.recv()).await {
                Err(_) => {
                    // best effort; the session is torn down either way
                    let _ = self
                        .dm(subject, "⌛ Time's up. Run `!sort` again when you're ready.")
                        .await;
                    return Err(QuizErr::Timeout);
                }
                Ok(None) => return Err(QuizErr::Interrupted),
                Ok(Some(text)) => text,
            };

            let option = normalize_answer(&reply).and_then(|letter| question.option(letter));
            let Some(option) = option else {
                let _ = self
                    .dm(
                        subject,
                        "❌ Please reply with **A / B / C / D** only. Run `!sort` again.",
                    )
                    .await;
                return Err(QuizErr::InvalidAnswer);
            };

            tally.apply(option);
        }

        let mut rng = StdRand::seed(ClockSeed::default().next_u64());
        let house = tally.decide(&mut rng);

        self.dm(
            subject,
            &format!("✨ The Sorting Hat has decided… **{house}**!"),
        )
        .await?;

        Ok(house)
    }

    async fn dm(&self, subject: &MemberId, text: &str) -> QuizResult<()> {
        match self.gateway.send_dm(subject, text).await {
            Ok(()) => Ok(()),
            // DMs disabled is its own outcome so the caller can word it
            Err(GatewayErr::Forbidden) => Err(QuizErr::Unreachable),
            Err(e) => Err(QuizErr::Gateway(e)),
        }
    }
}

pub type QuizResult<T> = core::result::Result<T, QuizErr>;

#[derive(Debug, Error)]
pub enum QuizErr {
    #[error("a quiz is already running for this member")]
    AlreadyActive,

    #[error("timed out waiting for an answer")]
    Timeout,

    #[error("reply was not one of the offered options")]
    InvalidAnswer,

    #[error("cannot reach this member over DM")]
    Unreachable,

    #[error("reply stream closed mid-quiz")]
    Interrupted,

    #[error(transparent)]
    Gateway(#[from] GatewayErr),
}
