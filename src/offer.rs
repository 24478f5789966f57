//! The priced, timed listing every source produces.
//!
//! An `Offer` is identified by a deterministic hash of `(source, title)`, so two
//! listings with the same pair collapse into one during dedup. Once produced the
//! record is treated as immutable; only the matcher touches it afterwards (text
//! sanitization and the unit price).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::matcher::units::UnitPrice;

/// Fees charged on top of the base price.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Fees {
    #[serde(default)]
    pub delivery: f64,
    #[serde(default)]
    pub platform: f64,
    #[serde(default)]
    pub handling: f64,
}

impl Fees {
    pub fn total(&self) -> f64 {
        self.delivery + self.platform + self.handling
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: String,
    pub source: String,
    pub title: String,
    pub base_price: f64,
    pub fees: Fees,
    #[serde(default)]
    pub discount: f64,
    /// Landed cost: base + fees - discount, never negative.
    pub total_cost: f64,
    pub currency: String,
    pub currency_symbol: String,
    pub eta_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
    pub in_stock: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<UnitPrice>,
}

impl Offer {
    /// New in-stock INR offer with no fees and zero ETA; refine with the builder methods.
    pub fn new(source: impl Into<String>, title: impl Into<String>, base_price: f64) -> Self {
        let source = source.into();
        let title = title.into();
        let mut offer = Self {
            id: offer_id(&source, &title),
            source,
            title,
            base_price,
            fees: Fees::default(),
            discount: 0.0,
            total_cost: 0.0,
            currency: "INR".to_string(),
            currency_symbol: "₹".to_string(),
            eta_minutes: 0,
            rating: None,
            in_stock: true,
            url: None,
            unit_price: None,
        };
        offer.recompute_total();
        offer
    }

    pub fn fees(mut self, delivery: f64, platform: f64, handling: f64) -> Self {
        self.fees = Fees {
            delivery,
            platform,
            handling,
        };
        self.recompute_total();
        self
    }

    pub fn discount(mut self, discount: f64) -> Self {
        self.discount = discount;
        self.recompute_total();
        self
    }

    pub fn currency(mut self, code: impl Into<String>, symbol: impl Into<String>) -> Self {
        self.currency = code.into();
        self.currency_symbol = symbol.into();
        self
    }

    pub fn eta(mut self, minutes: u32) -> Self {
        self.eta_minutes = minutes;
        self
    }

    pub fn rating(mut self, rating: f32) -> Self {
        self.rating = Some(rating.clamp(0.0, 5.0));
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn in_stock(mut self, in_stock: bool) -> Self {
        self.in_stock = in_stock;
        self
    }

    fn recompute_total(&mut self) {
        self.total_cost = (self.base_price + self.fees.total() - self.discount).max(0.0);
    }
}

/// Deterministic 12-char id over `(source, title)`.
pub fn offer_id(source: &str, title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b":");
    hasher.update(title.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02X}", b);
    }
    out
}

/// Human-readable ETA: "12 Mins", "3 Hours", "2 Days".
pub fn format_eta(minutes: u32) -> String {
    if minutes < 60 {
        format!("{} Mins", minutes)
    } else if minutes < 1440 {
        format!("{} Hours", minutes / 60)
    } else {
        let days = minutes / 1440;
        format!("{} Day{}", days, if days > 1 { "s" } else { "" })
    }
}
