use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing_subscriber::EnvFilter;

mod bot;
mod config;
mod db;
mod dialog;
mod parse;
mod report;
mod scheduler;

use config::AppConfig;
use db::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting work-hours bot...");

    // Load config
    let config = AppConfig::from_env()?;
    tracing::info!("Config loaded. Default timezone: {}", config.default_timezone);

    // Initialize database
    let db = Database::connect(&config.database_url).await?;
    db.run_migrations().await?;
    tracing::info!("Database connected and migrations applied.");

    // Create the Telegram bot and register the command menu
    let tg = Bot::new(&config.telegram_bot_token);
    tg.set_my_commands(bot::commands::BotCommand::bot_commands())
        .await?;

    // Build shared application state
    let state = Arc::new(bot::AppState {
        config,
        db,
        scheduler: scheduler::Scheduler::new(),
        dialogs: dialog::Dialogs::new(),
    });

    // Recurring reminders survive only in settings; rebuild them now.
    bot::reminders::restore_reminders(&tg, &state).await?;

    // Build the dispatcher
    let handler = bot::build_handler();

    Dispatcher::builder(tg, handler)
        .dependencies(dptree::deps![Arc::clone(&state)])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    state.scheduler.shutdown();

    Ok(())
}
