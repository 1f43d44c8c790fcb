//! Offer Relay Library
//!
//! Relays Waxpeer "send-trade" / "cancel-trade" feed events to Steam trade
//! offers, keeping the feed connection alive across drops.

pub mod config;
pub mod dispatcher;
pub mod feed;
pub mod notify;
pub mod platform;
pub mod retry;
pub mod router;
pub mod session;
pub mod steam;
pub mod store;
pub mod supervisor;
pub mod types;

// Re-export main types for convenience
pub use config::RelayConfig;
pub use dispatcher::OfferDispatcher;
pub use feed::WsTransport;
pub use notify::{DiscordNotifier, LogNotifier, Notifier};
pub use platform::TradePlatform;
pub use retry::{retry, RetrySpec};
pub use router::{EventRouter, FeedEvent};
pub use session::{Authenticator, CookieAuthenticator, SessionHolder, WebSession};
pub use steam::SteamCommunityClient;
pub use store::OfferStore;
pub use supervisor::{
    ChannelEvent, ConnectionState, ConnectionSupervisor, FeedChannel, FeedCredentials,
    FeedTransport, FrameHandler, ReconnectBudget,
};
pub use types::*;
