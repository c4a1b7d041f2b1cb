use std::sync::LazyLock;

use thiserror::Error;
use tokio::sync::OnceCell;

static ENV_VARS: LazyLock<OnceCell<Env>> = LazyLock::new(OnceCell::new);

/// Returns a required variable, loading (and caching) the full environment
/// snapshot on first use.
pub async fn get_var(var: Var) -> EnvResult<&'static str> {
    let vars = env().await?;
    Ok(match var {
        Var::BotToken => &vars.bot_token,
        Var::BotUserId => &vars.bot_user_id,
        Var::DatabaseUrl => &vars.database_url,
    })
}

pub async fn env() -> EnvResult<&'static Env> {
    ENV_VARS.get_or_try_init(|| async { Env::new() }).await
}

#[derive(Debug, Clone)]
pub struct Env {
    pub bot_token: String,
    pub bot_user_id: String,
    pub database_url: String,

    pub quiz_timeout_secs: Option<String>,
    pub quiz_questions_path: Option<String>,
    pub reaction_weights_path: Option<String>,
    pub allowed_reaction_channels: Option<String>,
    pub admin_member_ids: Option<String>,
}

impl Env {
    pub fn new() -> EnvResult<Self> {
        Ok(Self {
            bot_token: required("BOT_TOKEN")?,
            bot_user_id: required("BOT_USER_ID")?,
            database_url: required("DATABASE_URL")?,

            quiz_timeout_secs: optional("QUIZ_TIMEOUT_SECS"),
            quiz_questions_path: optional("QUIZ_QUESTIONS_PATH"),
            reaction_weights_path: optional("REACTION_WEIGHTS_PATH"),
            allowed_reaction_channels: optional("ALLOWED_REACTION_CHANNELS"),
            admin_member_ids: optional("ADMIN_MEMBER_IDS"),
        })
    }
}

fn required(name: &'static str) -> EnvResult<String> {
    match dotenvy::var(name) {
        Ok(value) => Ok(value),
        // an unset variable is a configuration gap; anything else (bad .env
        // syntax, unreadable file) carries the real cause
        Err(dotenvy::Error::EnvVar(std::env::VarError::NotPresent)) => {
            Err(EnvErr::MissingValue(name))
        }
        Err(e) => Err(EnvErr::Dotenvy(e)),
    }
}

fn optional(name: &'static str) -> Option<String> {
    dotenvy::var(name).ok().filter(|v| !v.is_empty())
}

#[derive(Debug)]
pub enum Var {
    BotToken,
    BotUserId,
    DatabaseUrl,
}

#[macro_export]
macro_rules! var {
    ($ev:expr) => {
        $crate::util::env::get_var($ev)
    };
}

pub type EnvResult<T> = core::result::Result<T, EnvErr>;


#[derive(Debug, Error)]
pub enum EnvErr {
    #[error("missing required environment variable '{0}'")]
    MissingValue(&'static str),

    #[error(transparent)]
    Dotenvy(#[from] dotenvy::Error),
}
