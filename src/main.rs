use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::{BotConfig, ConfigErr};
use crate::db::PgError;
use crate::db::prelude::*;
use crate::dispatch::Dispatcher;
use crate::engine::quiz::{QuizEngine, ReplyRouter, SessionRegistry};
use crate::engine::reaction::ReactionAwardEngine;
use crate::gateway::rest::RestGateway;
use crate::gateway::socket::{self, SocketErr};
use crate::gateway::GatewayErr;

mod config;
mod db;
mod dispatch;
mod engine;
mod gateway;
#[cfg(test)]
mod testutil;
mod util;

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Config(#[from] ConfigErr),

    #[error(transparent)]
    Db(#[from] PgError),

    #[error(transparent)]
    Gateway(#[from] GatewayErr),

    #[error(transparent)]
    Socket(#[from] SocketErr),

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

#[tokio::main]
async fn main() -> Result<(), RunnerErr> {
    util::telemetry::init();

    let config = BotConfig::load().await?;

    let pool = db::db_pool().await?;
    PgLedger::migrate(pool).await?;
    let ledger = Arc::new(PgLedger::new(pool));

    let gateway = Arc::new(RestGateway::new().await?);
    let registry = Arc::new(SessionRegistry::new());
    let router = Arc::new(ReplyRouter::new());

    let reactions = Arc::new(ReactionAwardEngine::new(
        Arc::clone(&gateway),
        Arc::clone(&ledger),
        config.award.clone(),
        config.self_id.clone(),
    ));
    let quiz = Arc::new(QuizEngine::new(
        Arc::clone(&gateway),
        registry,
        Arc::clone(&router),
        config.quiz.clone(),
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        gateway,
        ledger,
        reactions,
        quiz,
        router,
        config.admins.clone(),
    ));

    let (tx, rx) = mpsc::unbounded_channel();
    let socket_handle = socket::start_gateway(tx).await?;
    let dispatch_handle = dispatcher.start(rx);

    tracing::info!("hatkeeper running");

    let (socket_res, dispatch_res) = tokio::join!(socket_handle, dispatch_handle);
    socket_res?;
    dispatch_res?;

    Ok(())
}
