//! Synthetic fallback offers.
//!
//! Generated listings are anchored on a reference price derived from live data.
//! Without a reference there is nothing to anchor on, so generators return nothing.

use rand::Rng;

use crate::offer::Offer;

pub trait SyntheticGenerator: Send + Sync {
    fn generate(&self, query: &str, location: &str, reference_price: Option<f64>) -> Vec<Offer>;

    fn name(&self) -> &str {
        "synthetic"
    }
}

/// Never generates anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSynthetic;

impl SyntheticGenerator for NoSynthetic {
    fn generate(&self, _query: &str, _location: &str, _reference_price: Option<f64>) -> Vec<Offer> {
        Vec::new()
    }
}

/// Pricing and delivery profile of one simulated platform.
#[derive(Debug, Clone)]
pub struct FallbackPlatform {
    pub name: String,
    /// Multiplier band applied to the reference price.
    pub price_band: (f64, f64),
    pub eta_minutes: (u32, u32),
    /// Delivery fee is either end of this range, or zero.
    pub delivery_fee: (f64, f64),
}

impl FallbackPlatform {
    pub fn new(name: &str, price_band: (f64, f64), eta_minutes: (u32, u32), delivery_fee: (f64, f64)) -> Self {
        Self {
            name: name.to_string(),
            price_band,
            eta_minutes,
            delivery_fee,
        }
    }
}

/// One randomized offer per configured platform, priced around the reference.
#[derive(Debug, Clone)]
pub struct PlatformFallback {
    platforms: Vec<FallbackPlatform>,
}

impl PlatformFallback {
    pub fn new(platforms: Vec<FallbackPlatform>) -> Self {
        Self { platforms }
    }

    /// Indian quick-commerce and grocery delivery apps.
    pub fn quick_commerce() -> Self {
        Self::new(vec![
            FallbackPlatform::new("Blinkit", (1.00, 1.15), (8, 15), (0.0, 25.0)),
            FallbackPlatform::new("Zepto", (1.00, 1.12), (8, 12), (0.0, 20.0)),
            FallbackPlatform::new("Swiggy Instamart", (1.00, 1.10), (10, 25), (0.0, 30.0)),
            FallbackPlatform::new("BigBasket", (0.95, 1.05), (120, 240), (0.0, 40.0)),
            FallbackPlatform::new("JioMart", (0.88, 0.98), (180, 360), (0.0, 30.0)),
        ])
    }

    pub fn platforms(&self) -> &[FallbackPlatform] {
        &self.platforms
    }
}

impl SyntheticGenerator for PlatformFallback {
    fn generate(&self, query: &str, _location: &str, reference_price: Option<f64>) -> Vec<Offer> {
        let Some(reference) = reference_price.filter(|p| *p > 0.0) else {
            return Vec::new();
        };
        let title = display_title(query);
        let mut rng = rand::rng();

        self.platforms
            .iter()
            .map(|p| {
                let (lo, hi) = ordered(p.price_band.0, p.price_band.1);
                let price = round2(reference * rng.random_range(lo..=hi));
                let delivery = if rng.random_bool(0.6) {
                    if rng.random_bool(0.5) {
                        p.delivery_fee.0
                    } else {
                        p.delivery_fee.1
                    }
                } else {
                    0.0
                };
                let (eta_lo, eta_hi) = (p.eta_minutes.0.min(p.eta_minutes.1), p.eta_minutes.0.max(p.eta_minutes.1));
                let rating = (rng.random_range(3.8f32..=4.7) * 10.0).round() / 10.0;
                Offer::new(p.name.as_str(), title.as_str(), price)
                    .fees(delivery.max(0.0), 0.0, 0.0)
                    .eta(rng.random_range(eta_lo..=eta_hi))
                    .rating(rating)
            })
            .collect()
    }
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Title-cases each word of the query.
fn display_title(query: &str) -> String {
    query
        .split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
