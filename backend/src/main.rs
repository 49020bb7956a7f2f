//! Bot entry-point: loads settings, installs tracing, wires the services and
//! serves commands from stdin.

use std::time::Duration;

use color_eyre::eyre::{Context, Result};
use ortho_config::OrthoConfig;
use tracing::{debug, info, warn};

use invoice_backend::config::BotSettings;
use invoice_backend::domain::UserId;
use invoice_backend::from_settings;
use invoice_backend::inbound::console::ConsoleDriver;
use invoice_backend::telemetry::{LogRing, init_tracing};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let ring = LogRing::default();
    if let Err(error) = init_tracing(ring.clone()) {
        eprintln!("tracing init failed: {error}");
    }

    let settings = BotSettings::load().wrap_err("failed to load bot settings")?;
    debug!(?settings, "settings loaded");
    if !settings.has_bot_token() {
        warn!("no bot token configured; serving the console transport only");
    }

    let bot = from_settings(&settings, ring)
        .await
        .wrap_err("failed to assemble the bot")?;

    let limiter = bot.limiter.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            let purged = limiter.purge_expired();
            if purged > 0 {
                debug!(purged, "expired rate-limit entries removed");
            }
        }
    });

    let default_user = settings.seed_admin().unwrap_or(UserId::new(0));
    info!(%default_user, "reading commands from stdin");
    let driver = ConsoleDriver::new(bot.service, default_user);
    driver
        .run(
            tokio::io::BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        )
        .await
        .wrap_err("console transport failed")?;
    info!("input closed; shutting down");
    Ok(())
}
