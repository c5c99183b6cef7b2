use std::sync::Arc;

use relay_bot::config::Config;
use relay_bot::db::Db;
use relay_bot::engine::Engine;
use relay_bot::store::RuleStore;
use relay_bot::transport::TelegramTransport;
use relay_bot::{bot, logging};
use teloxide::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = logging::init_logging();

    let config = Config::from_env()?;

    let db = Db::new(&config.database_url).await?;
    let bot = Bot::new(&config.bot_token);
    let transport = TelegramTransport::new(bot.clone());

    if let Some(mode) = config.default_mode {
        let mut global = db.get_global_config().await?;
        if global.default_mode != mode {
            global.default_mode = mode;
            db.save_global_config(&global).await?;
            tracing::info!(mode = mode.as_str(), "Default rule mode updated from environment");
        }
    }

    let engine = Engine::new(Arc::new(db), Arc::new(transport), config.engine_settings());
    engine.refresh().await?;

    let engine_refresh = engine.clone();
    let period = config.snapshot_refresh;
    let refresh_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if let Err(e) = engine_refresh.refresh().await {
                tracing::error!("Failed to refresh rules: {}", e);
            }
        }
    });

    let bot_task = bot::run_bot(bot, engine);

    tokio::select! {
        _ = bot_task => {
            tracing::info!("Bot dispatcher stopped");
        }
        _ = refresh_task => {
            tracing::error!("Refresh task finished unexpectedly");
        }
    }

    Ok(())
}
