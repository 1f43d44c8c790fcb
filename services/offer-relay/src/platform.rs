use async_trait::async_trait;

use crate::types::{Offer, Result, SendReceipt};

/// Trade-offer capabilities of the custody platform
#[async_trait]
pub trait TradePlatform: Send + Sync {
    /// Create the offer on the platform, returning its id and status
    async fn send(&self, offer: &Offer) -> Result<SendReceipt>;

    /// Approve a pending offer with the account's confirmation secret
    async fn confirm(&self, identity_secret: &str, offer_id: &str) -> Result<()>;

    /// Look up an offer by id. `Ok(None)` means the platform does not know it.
    async fn get_offer(&self, offer_id: &str) -> Result<Option<Offer>>;

    async fn cancel(&self, offer: &Offer) -> Result<()>;
}
