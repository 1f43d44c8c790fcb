//! Registry of offers this process has sent

use std::collections::HashMap;
use tracing::debug;

use crate::types::Offer;

/// In-memory offer registry keyed by platform offer id
///
/// Only offers that reached `Sent` are recorded. Entries leave the store
/// exactly once, when a cancellation succeeds.
#[derive(Debug, Default)]
pub struct OfferStore {
    offers: HashMap<String, Offer>,
}

impl OfferStore {
    pub fn new() -> Self {
        Self {
            offers: HashMap::new(),
        }
    }

    /// Insert or overwrite the snapshot for an offer.
    ///
    /// Offers without a platform id are ignored and `false` is returned.
    pub fn record(&mut self, offer: &Offer) -> bool {
        let Some(id) = offer.id.as_deref() else {
            return false;
        };

        match self.offers.insert(id.to_string(), offer.clone()) {
            Some(previous) => debug!(
                "Offer {} state: {:?} -> {:?}",
                id, previous.state, offer.state
            ),
            None => debug!("Recorded offer {} ({:?})", id, offer.state),
        }
        true
    }

    pub fn get(&self, offer_id: &str) -> Option<&Offer> {
        self.offers.get(offer_id)
    }

    pub fn contains(&self, offer_id: &str) -> bool {
        self.offers.contains_key(offer_id)
    }

    pub fn remove(&mut self, offer_id: &str) -> Option<Offer> {
        let removed = self.offers.remove(offer_id);
        if removed.is_some() {
            debug!("Removed offer {}", offer_id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }

    /// Ids currently tracked, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.offers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Asset, OfferState};

    fn sent_offer(id: &str) -> Offer {
        let mut offer = Offer::new("https://steamcommunity.com/tradeoffer/new/?partner=1");
        offer.attach(Asset {
            appid: "730".to_string(),
            contextid: "2".to_string(),
            amount: 1,
            assetid: "100".to_string(),
        });
        offer.id = Some(id.to_string());
        offer.state = OfferState::Sent;
        offer
    }

    #[test]
    fn test_record_and_overwrite() {
        let mut store = OfferStore::new();
        let mut offer = sent_offer("5001");

        assert!(store.record(&offer));
        assert_eq!(store.len(), 1);

        offer.state = OfferState::Confirmed;
        assert!(store.record(&offer));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("5001").unwrap().state, OfferState::Confirmed);
    }

    #[test]
    fn test_unsent_offer_not_recorded() {
        let mut store = OfferStore::new();
        let offer = Offer::new("https://steamcommunity.com/tradeoffer/new/?partner=1");

        assert!(!store.record(&offer));
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_happens_once() {
        let mut store = OfferStore::new();
        store.record(&sent_offer("5001"));
        store.record(&sent_offer("5002"));
        assert_eq!(store.ids(), vec!["5001".to_string(), "5002".to_string()]);

        assert!(store.remove("5001").is_some());
        assert!(store.remove("5001").is_none());
        assert!(!store.contains("5001"));
        assert!(store.contains("5002"));
    }
}
