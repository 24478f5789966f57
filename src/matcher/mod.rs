//! Matcher: turns the raw merged offer list into sanitized offers with unit
//! prices, cross-source match telemetry and equivalence groups.
//!
//! Two scores live here:
//! - `pairwise_score` (0..=100) drives grouping. Blend of fuzzy ratios with a
//!   brand and quantity boost, and a hard zero when both titles carry
//!   quantities that disagree.
//! - `title_similarity` (0..1) only feeds the match report.

pub mod fuzz;
pub mod grouping;
pub mod sanitize;
pub mod units;

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::config::MatcherConfig;
use crate::offer::Offer;
use crate::telemetry::{MatchPair, MatchReport};

pub use grouping::{group_offers, MatchGroup};
use sanitize::sanitize_offer;
use units::{extract_quantity, unit_price, Quantity};

const TITLE_PREVIEW_CHARS: usize = 50;

/// Lower-case, strip promotional noise and punctuation, collapse whitespace.
pub fn clean_title(title: &str) -> String {
    static RE_NOISE: OnceCell<Regex> = OnceCell::new();
    let re_noise = RE_NOISE.get_or_init(|| {
        Regex::new(r"\b(?:pack of|set of|combo|buy|get|free|offer|limited|edition|new|launch|sale)\b")
            .unwrap()
    });
    static RE_PUNCT: OnceCell<Regex> = OnceCell::new();
    let re_punct = RE_PUNCT.get_or_init(|| Regex::new(r"[^\p{L}\p{N}\s]+").unwrap());

    let lower = title.to_lowercase();
    let no_noise = re_noise.replace_all(&lower, " ");
    let no_punct = re_punct.replace_all(&no_noise, " ");
    no_punct.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pre-computed per-title inputs to the scoring functions.
#[derive(Debug, Clone)]
pub struct TitleFeatures {
    pub cleaned: String,
    pub brand: Option<String>,
    pub quantity: Option<Quantity>,
}

impl TitleFeatures {
    pub fn from_title(title: &str) -> Self {
        let cleaned = clean_title(title);
        let brand = cleaned.split_whitespace().next().map(str::to_string);
        Self {
            cleaned,
            brand,
            quantity: extract_quantity(title),
        }
    }
}

/// Grouping score in 0..=100.
pub fn pairwise_score(a: &TitleFeatures, b: &TitleFeatures) -> u32 {
    if let (Some(qa), Some(qb)) = (&a.quantity, &b.quantity) {
        if !qa.same_as(qb) {
            return 0;
        }
    }

    let (x, y) = (a.cleaned.as_str(), b.cleaned.as_str());
    let mut score = 0.15 * fuzz::ratio(x, y)
        + 0.20 * fuzz::partial_ratio(x, y)
        + 0.25 * fuzz::token_sort_ratio(x, y)
        + 0.40 * fuzz::token_set_ratio(x, y);

    if a.brand.is_some() && a.brand == b.brand {
        score += 5.0;
    }
    if a.quantity.is_some() && b.quantity.is_some() {
        score += 5.0;
    }
    score.clamp(0.0, 100.0) as u32
}

pub fn match_score(title_a: &str, title_b: &str) -> u32 {
    pairwise_score(&TitleFeatures::from_title(title_a), &TitleFeatures::from_title(title_b))
}

/// Report-only similarity in 0..1: edit similarity blended with word overlap.
pub fn title_similarity(a: &TitleFeatures, b: &TitleFeatures) -> f64 {
    let chars = strsim::normalized_levenshtein(&a.cleaned, &b.cleaned);
    let words = fuzz::jaccard(&a.cleaned, &b.cleaned);
    0.4 * chars + 0.6 * words
}

#[derive(Debug, Clone, Serialize)]
pub struct Normalized {
    pub offers: Vec<Offer>,
    pub groups: Vec<MatchGroup>,
    pub matches: MatchReport,
}

#[derive(Debug, Clone)]
pub struct Matcher {
    cfg: MatcherConfig,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(MatcherConfig::default())
    }
}

impl Matcher {
    pub fn new(cfg: MatcherConfig) -> Self {
        Self { cfg }
    }

    pub fn normalize(&self, mut offers: Vec<Offer>) -> Normalized {
        for o in offers.iter_mut() {
            sanitize_offer(o);
            o.unit_price = extract_quantity(&o.title)
                .and_then(|q| unit_price(o.total_cost, &o.currency_symbol, q));
        }

        let features: Vec<TitleFeatures> = offers
            .iter()
            .map(|o| TitleFeatures::from_title(&o.title))
            .collect();

        let matches = self.find_matches(&offers, &features);
        let groups = group_offers(&offers, &features, self.cfg.group_threshold);
        debug!(
            target: "matcher",
            offers = offers.len(),
            groups = groups.len(),
            matches = matches.total_matches,
            "normalized"
        );

        Normalized {
            offers,
            groups,
            matches,
        }
    }

    /// Cross-source pairs above the similarity threshold, best first.
    fn find_matches(&self, offers: &[Offer], features: &[TitleFeatures]) -> MatchReport {
        let mut pairs = Vec::new();
        for i in 0..offers.len() {
            for j in (i + 1)..offers.len() {
                if offers[i].source == offers[j].source {
                    continue;
                }
                let sim = title_similarity(&features[i], &features[j]);
                if sim > self.cfg.similarity_threshold {
                    pairs.push(MatchPair {
                        offer_a: offers[i].id.clone(),
                        source_a: offers[i].source.clone(),
                        title_a: preview(&offers[i].title),
                        offer_b: offers[j].id.clone(),
                        source_b: offers[j].source.clone(),
                        title_b: preview(&offers[j].title),
                        similarity: (sim * 1000.0).round() / 10.0,
                    });
                }
            }
        }
        pairs.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        let total_matches = pairs.len();
        pairs.truncate(self.cfg.top_matches);
        MatchReport {
            total_matches,
            top_matches: pairs,
        }
    }
}

fn preview(title: &str) -> String {
    title.chars().take(TITLE_PREVIEW_CHARS).collect()
}
