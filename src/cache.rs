//! TTL result cache keyed by normalized `(query, location)` plus a
//! bounded price history per offer id.
//!
//! A `put` replaces the entry and restarts its TTL. Offers of sources that
//! failed in the writing run are carried over from the previous entry with their
//! original timestamp, so they expire on the clock they were cached under.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::CacheConfig;
use crate::offer::Offer;

/// Minimal projection of an offer kept in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedOffer {
    pub id: String,
    pub source: String,
    pub title: String,
    pub price: f64,
    pub eta_minutes: u32,
    /// When this offer was last seen live.
    pub cached_at: DateTime<Utc>,
}

impl CachedOffer {
    fn from_offer(o: &Offer, cached_at: DateTime<Utc>) -> Self {
        Self {
            id: o.id.clone(),
            source: o.source.clone(),
            title: o.title.clone(),
            price: o.total_cost,
            eta_minutes: o.eta_minutes,
            cached_at,
        }
    }

    /// Rebuild a usable offer. Fees are folded into the price, so the cached total is the base.
    pub fn to_offer(&self) -> Offer {
        Offer::new(self.source.clone(), self.title.clone(), self.price).eta(self.eta_minutes)
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub query: String,
    pub location: String,
    pub offers: Vec<CachedOffer>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryPoint {
    pub offer_id: String,
    pub price: f64,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub cached_queries: usize,
    pub active_entries: usize,
    pub expired_entries: usize,
    pub tracked_offers: usize,
    pub total_price_points: usize,
    pub ttl_secs: i64,
}

pub struct ResultCache {
    store: DashMap<String, CacheEntry>,
    history: DashMap<String, VecDeque<PriceHistoryPoint>>,
    ttl: ChronoDuration,
    history_cap: usize,
}

/// Stable key: SHA-256 of the lower-cased, trimmed query and location.
pub fn cache_key(query: &str, location: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.trim().to_lowercase().as_bytes());
    hasher.update(b":");
    hasher.update(location.trim().to_lowercase().as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

impl ResultCache {
    pub fn new(cfg: &CacheConfig) -> Self {
        Self::with_limits(cfg.ttl_secs, cfg.history_cap)
    }

    pub fn with_limits(ttl_secs: i64, history_cap: usize) -> Self {
        Self {
            store: DashMap::new(),
            history: DashMap::new(),
            ttl: ChronoDuration::seconds(ttl_secs.max(0)),
            history_cap: history_cap.max(1),
        }
    }

    fn is_fresh(&self, stamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(stamp) < self.ttl
    }

    pub fn get(&self, query: &str, location: &str) -> Option<Vec<CachedOffer>> {
        self.get_at(query, location, Utc::now())
    }

    /// Hit only while the entry is strictly younger than the TTL. Carried-over
    /// offers past their own TTL are left out.
    pub fn get_at(&self, query: &str, location: &str, now: DateTime<Utc>) -> Option<Vec<CachedOffer>> {
        let key = cache_key(query, location);
        let entry = self.store.get(&key)?;
        if !self.is_fresh(entry.created_at, now) {
            debug!(target: "cache", query, location, "cache entry expired");
            return None;
        }
        let offers: Vec<CachedOffer> = entry
            .offers
            .iter()
            .filter(|c| self.is_fresh(c.cached_at, now))
            .cloned()
            .collect();
        debug!(target: "cache", query, location, offers = offers.len(), "cache hit");
        Some(offers)
    }

    pub fn put(&self, query: &str, location: &str, offers: &[Offer]) {
        self.put_at(query, location, offers, Utc::now());
    }

    pub fn put_at(&self, query: &str, location: &str, offers: &[Offer], now: DateTime<Utc>) {
        self.put_carrying_at(query, location, offers, &HashSet::new(), now);
    }

    /// Write-through for a run in which `failed` sources produced nothing.
    pub fn put_carrying(&self, query: &str, location: &str, offers: &[Offer], failed: &HashSet<String>) {
        self.put_carrying_at(query, location, offers, failed, Utc::now());
    }

    /// Replace the entry for `(query, location)` with `offers`, keeping the still
    /// fresh cached offers of `failed` sources, and append one history point per
    /// live offer.
    pub fn put_carrying_at(
        &self,
        query: &str,
        location: &str,
        offers: &[Offer],
        failed: &HashSet<String>,
        now: DateTime<Utc>,
    ) {
        let key = cache_key(query, location);
        let mut projected: Vec<CachedOffer> =
            offers.iter().map(|o| CachedOffer::from_offer(o, now)).collect();

        let carried = if failed.is_empty() {
            0
        } else {
            let before = projected.len();
            if let Some(prev) = self.get_at(query, location, now) {
                projected.extend(prev.into_iter().filter(|c| failed.contains(&c.source)));
            }
            projected.len() - before
        };

        self.store.insert(
            key,
            CacheEntry {
                query: query.to_string(),
                location: location.to_string(),
                offers: projected,
                created_at: now,
            },
        );
        for o in offers {
            self.record_price(PriceHistoryPoint {
                offer_id: o.id.clone(),
                price: o.total_cost,
                source: o.source.clone(),
                timestamp: now,
            });
        }
        debug!(
            target: "cache",
            query,
            location,
            offers = offers.len(),
            carried,
            "cache updated"
        );
    }

    /// Append a price point, keeping only the most recent `history_cap` entries.
    pub fn record_price(&self, point: PriceHistoryPoint) {
        let mut points = self.history.entry(point.offer_id.clone()).or_default();
        points.push_back(point);
        while points.len() > self.history_cap {
            points.pop_front();
        }
    }

    /// Oldest first; empty for unknown ids.
    pub fn get_history(&self, offer_id: &str) -> Vec<PriceHistoryPoint> {
        self.history
            .get(offer_id)
            .map(|p| p.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats_at(Utc::now())
    }

    pub fn stats_at(&self, now: DateTime<Utc>) -> CacheStats {
        let (mut active_entries, mut expired_entries) = (0, 0);
        for e in self.store.iter() {
            if self.is_fresh(e.created_at, now) {
                active_entries += 1;
            } else {
                expired_entries += 1;
            }
        }
        CacheStats {
            cached_queries: active_entries + expired_entries,
            active_entries,
            expired_entries,
            tracked_offers: self.history.len(),
            total_price_points: self.history.iter().map(|e| e.len()).sum(),
            ttl_secs: self.ttl.num_seconds(),
        }
    }
}
