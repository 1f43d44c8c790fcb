//! Offer Relay - Waxpeer feed to Steam trade offers
//!
//! 1. Loads configuration from the environment / `.env`
//! 2. Builds a Steam web session and watches it for expiry
//! 3. Keeps the Waxpeer websocket alive and relays its trade events

use std::sync::Arc;
use tracing::{error, info, warn, Level};

use offer_relay::session::watch_session_expiry;
use offer_relay::{
    Authenticator, ConnectionSupervisor, CookieAuthenticator, DiscordNotifier, EventRouter,
    FeedCredentials, LogNotifier, Notifier, OfferDispatcher, RelayConfig, SteamCommunityClient,
    WsTransport,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting Offer Relay...");

    let config = RelayConfig::load()?;
    info!("Steam ID: {}, feed: {}", config.steam_id, config.feed_url);

    let notifier: Arc<dyn Notifier> = match &config.discord_webhook_url {
        Some(url) => Arc::new(DiscordNotifier::new(url)?),
        None => {
            warn!("DISCORD_WEBHOOK_URL not set, notifications go to the log only");
            Arc::new(LogNotifier)
        }
    };

    let authenticator = Arc::new(CookieAuthenticator::new());
    let session = authenticator.login().await?;
    notifier.notify("Steam session started").await;

    let (steam, expired_rx) = SteamCommunityClient::new(&config.steam_api_key, session)?;
    let steam = Arc::new(steam);

    tokio::spawn(watch_session_expiry(
        authenticator,
        steam.clone(),
        notifier.clone(),
        expired_rx,
    ));

    let dispatcher =
        OfferDispatcher::new(steam, notifier.clone(), &config.steam_identity_secret);
    let router = EventRouter::new(dispatcher, notifier.clone());
    let supervisor = ConnectionSupervisor::new(
        Arc::new(WsTransport::new()),
        router,
        notifier,
        &config.feed_url,
        FeedCredentials::from_config(&config),
    );

    tokio::select! {
        result = supervisor.run() => {
            if let Err(e) = result {
                error!("Feed supervisor stopped: {}", e);
            }
            // Stay up so the alert is the operator's cue to restart
            tokio::signal::ctrl_c().await?;
        }
        _ = tokio::signal::ctrl_c() => {}
    }

    info!("Offer Relay shutting down");
    Ok(())
}
