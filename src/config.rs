use std::collections::{HashMap, HashSet};
use std::time::Duration;

use thiserror::Error;
use tracing::instrument;

use crate::db::models::account::MemberId;
use crate::engine::questions::{self, Question};
use crate::gateway::ChannelId;
use crate::util::env::{self, EnvErr};

/// Default weights, mirroring the reaction table the bot has always shipped
/// with. Overridable via `REACTION_WEIGHTS_PATH` (JSON object, emoji → weight).
pub fn default_weights() -> HashMap<String, i64> {
    let mut weights = HashMap::new();

    for positive in ["❤️", "❤", "😂", "🤣", "😍", "👍", "💯"] {
        weights.insert(positive.to_string(), 1);
    }
    for negative in ["😢", "😭", "👎"] {
        weights.insert(negative.to_string(), -1);
    }

    weights
}

pub const DEFAULT_QUESTION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct AwardConfig {
    /// emoji key → signed point weight; unrecognized emoji are ignored.
    pub weights: HashMap<String, i64>,
    /// Empty set means reactions count in every channel.
    pub allowed_channels: HashSet<ChannelId>,
}

#[derive(Debug, Clone)]
pub struct QuizConfig {
    pub questions: Vec<Question>,
    pub question_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub award: AwardConfig,
    pub quiz: QuizConfig,
    /// Members allowed to run `!resort` and `!points`.
    pub admins: HashSet<MemberId>,
    /// The bot's own account; its reactions never award points.
    pub self_id: MemberId,
}

impl BotConfig {
    #[instrument]
    pub async fn load() -> ConfigResult<Self> {
        let vars = env::env().await?;

        let weights = match &vars.reaction_weights_path {
            Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
            None => default_weights(),
        };

        let questions = match &vars.quiz_questions_path {
            Some(path) => questions::from_json(&std::fs::read_to_string(path)?)?,
            None => questions::default_questions(),
        };

        let question_timeout = match &vars.quiz_timeout_secs {
            Some(raw) => Duration::from_secs(
                raw.parse()
                    .map_err(|_| ConfigErr::BadValue("QUIZ_TIMEOUT_SECS"))?,
            ),
            None => DEFAULT_QUESTION_TIMEOUT,
        };

        let config = Self {
            award: AwardConfig {
                weights,
                allowed_channels: parse_id_list(vars.allowed_reaction_channels.as_deref())
                    .into_iter()
                    .map(ChannelId)
                    .collect(),
            },
            quiz: QuizConfig {
                questions,
                question_timeout,
            },
            admins: parse_id_list(vars.admin_member_ids.as_deref())
                .into_iter()
                .map(MemberId)
                .collect(),
            self_id: MemberId(vars.bot_user_id.clone()),
        };

        tracing::info!(
            emoji_count = config.award.weights.len(),
            allowed_channels = config.award.allowed_channels.len(),
            question_count = config.quiz.questions.len(),
            timeout = ?config.quiz.question_timeout,
            "configuration loaded"
        );

        Ok(config)
    }
}

fn parse_id_list(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

pub type ConfigResult<T> = core::result::Result<T, ConfigErr>;

#[derive(Debug, Error)]
pub enum ConfigErr {
    #[error(transparent)]
    Env(#[from] EnvErr),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("could not parse environment variable '{0}'")]
    BadValue(&'static str),
}
