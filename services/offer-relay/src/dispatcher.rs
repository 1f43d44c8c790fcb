//! Offer dispatch: send → confirm, and cancellation of sent offers

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::notify::Notifier;
use crate::platform::TradePlatform;
use crate::retry::{retry, RetrySpec};
use crate::steam::TradeLink;
use crate::store::OfferStore;
use crate::types::*;

/// Drives offers through their lifecycle against the trade platform
///
/// Owns the `OfferStore`; nothing else writes to it.
pub struct OfferDispatcher {
    platform: Arc<dyn TradePlatform>,
    notifier: Arc<dyn Notifier>,
    identity_secret: String,
    retry_spec: RetrySpec,
    store: OfferStore,
}

impl OfferDispatcher {
    pub fn new(
        platform: Arc<dyn TradePlatform>,
        notifier: Arc<dyn Notifier>,
        identity_secret: &str,
    ) -> Self {
        Self {
            platform,
            notifier,
            identity_secret: identity_secret.to_string(),
            retry_spec: RetrySpec::default(),
            store: OfferStore::new(),
        }
    }

    pub fn store(&self) -> &OfferStore {
        &self.store
    }

    /// Send a single-item offer to `trade_link` and confirm it if required.
    ///
    /// Returns the dispatcher's final view of the offer. The stored snapshot
    /// may lag behind it: a failed confirmation leaves the store at `Sent`.
    pub async fn send_trade(&mut self, trade_link: &str, assets: Vec<Asset>) -> Offer {
        let mut offer = Offer::new(trade_link);

        if assets.len() != 1 {
            let reason = format!(
                "Trade offer should only contain one item, got {}. Skipping.",
                assets.len()
            );
            warn!("Rejected offer to {}: {}", trade_link, reason);
            self.notifier.notify(&reason).await;
            offer.state = OfferState::Rejected { reason };
            return offer;
        }

        if let Err(e) = TradeLink::parse(trade_link) {
            let reason = format!("{}. Skipping.", e);
            warn!("Rejected offer to {}: {}", trade_link, reason);
            self.notifier.notify(&reason).await;
            offer.state = OfferState::Rejected { reason };
            return offer;
        }

        for asset in assets {
            offer.attach(asset);
        }

        let platform = &self.platform;
        let pending = &offer;
        let receipt = match retry(self.retry_spec, move || platform.send(pending)).await {
            Ok(receipt) => receipt,
            Err(e) => {
                error!("Sending offer for {} failed: {}", offer.asset_ids(), e);
                self.notifier
                    .notify(&format!(
                        "Error sending offer for {}: {}. Please send it manually.",
                        offer.asset_ids(),
                        e
                    ))
                    .await;
                offer.state = OfferState::Failed {
                    stage: OfferStage::Send,
                    error: e.to_string(),
                };
                return offer;
            }
        };

        offer.id = Some(receipt.offer_id.clone());
        offer.state = OfferState::Sent;
        self.store.record(&offer);
        info!("Offer {} sent ({})", receipt.offer_id, receipt.status);

        self.notifier
            .notify(&format!("Sent offer. Status: {}.", receipt.status))
            .await;
        self.notifier
            .notify(&format!("Offer sent for {}", offer.asset_ids()))
            .await;

        if receipt.status != SendStatus::Pending {
            return offer;
        }

        offer.state = OfferState::PendingConfirmation;
        self.notifier
            .notify(&format!("Offer #{} needs confirmation.", receipt.offer_id))
            .await;

        let secret = self.identity_secret.as_str();
        let offer_id = receipt.offer_id.as_str();
        match retry(self.retry_spec, move || platform.confirm(secret, offer_id)).await {
            Ok(()) => {
                offer.state = OfferState::Confirmed;
                self.store.record(&offer);
                info!("Offer {} confirmed", offer_id);
                self.notifier
                    .notify(&format!("Offer {} confirmed", offer_id))
                    .await;
            }
            Err(e) => {
                error!("Confirming offer {} failed: {}", offer_id, e);
                self.notifier
                    .notify(&format!(
                        "Error confirming offer {}: {}. Please confirm it manually.",
                        offer_id, e
                    ))
                    .await;
                offer.state = OfferState::Failed {
                    stage: OfferStage::Confirm,
                    error: e.to_string(),
                };
            }
        }

        offer
    }

    /// Cancel a previously sent offer.
    ///
    /// All-or-nothing: on any error the store is left untouched.
    pub async fn cancel_trade(&mut self, offer_id: &str) -> Result<Offer> {
        let mut offer = match self.locate(offer_id).await {
            Ok(offer) => offer,
            Err(e) => {
                error!("Cannot cancel offer {}: {}", offer_id, e);
                self.notifier.notify(&e.to_string()).await;
                return Err(e);
            }
        };

        let previous = offer.state.clone();
        offer.state = OfferState::CancelRequested;

        if let Err(e) = self.platform.cancel(&offer).await {
            error!(
                "Cancelling offer {} failed (was {:?}): {}",
                offer_id, previous, e
            );
            self.notifier
                .notify(&format!(
                    "Error cancelling trade {}: {}. Please cancel it manually.",
                    offer_id, e
                ))
                .await;
            return Err(e);
        }

        self.store.remove(offer_id);
        offer.state = OfferState::Cancelled;
        info!("Offer {} cancelled", offer_id);
        self.notifier
            .notify(&format!("Cancelled trade {}", offer_id))
            .await;

        Ok(offer)
    }

    /// Find an offer locally, falling back to a platform lookup
    async fn locate(&self, offer_id: &str) -> Result<Offer> {
        if let Some(offer) = self.store.get(offer_id) {
            return Ok(offer.clone());
        }

        let platform = &self.platform;
        let found = retry(self.retry_spec, move || platform.get_offer(offer_id))
            .await
            .map_err(|e| {
                RelayError::Platform(format!(
                    "Offer {} lookup failed: {}. Please cancel it manually.",
                    offer_id, e
                ))
            })?;

        found.ok_or_else(|| {
            RelayError::NotFound(format!(
                "Offer {} could not be found and therefore cannot be cancelled. Please cancel it manually.",
                offer_id
            ))
        })
    }
}
