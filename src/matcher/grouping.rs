// src/matcher/grouping.rs
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::{pairwise_score, TitleFeatures};
use crate::offer::{format_eta, Offer};

/// Offers judged to be the same item, with the cheapest and the fastest picked out.
#[derive(Debug, Clone, Serialize)]
pub struct MatchGroup {
    pub group_id: String,
    pub canonical_title: String,
    pub offers: Vec<Offer>,
    pub best_price: Offer,
    pub fastest: Offer,
    /// Mean seed-to-member score, 100 for a single-offer group.
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub savings_message: Option<String>,
}

/// Greedy single pass: every unassigned offer seeds a group and pulls in each
/// later unassigned offer scoring at least `threshold` against the seed. Members
/// are never compared with each other.
pub fn group_offers(offers: &[Offer], features: &[TitleFeatures], threshold: u32) -> Vec<MatchGroup> {
    let n = offers.len().min(features.len());
    let mut assigned = vec![false; n];
    let mut groups = Vec::new();

    for seed in 0..n {
        if assigned[seed] {
            continue;
        }
        assigned[seed] = true;
        let mut members = vec![seed];
        let mut scores = Vec::new();

        for other in (seed + 1)..n {
            if assigned[other] {
                continue;
            }
            let s = pairwise_score(&features[seed], &features[other]);
            if s >= threshold {
                assigned[other] = true;
                members.push(other);
                scores.push(s);
            }
        }

        let member_offers: Vec<Offer> = members.iter().map(|&i| offers[i].clone()).collect();
        groups.push(build_group(member_offers, &scores));
    }
    groups
}

fn build_group(offers: Vec<Offer>, scores: &[u32]) -> MatchGroup {
    let seed = &offers[0];

    // min_by keeps the first of equal elements, so ties go to the earliest member.
    let best_price = offers
        .iter()
        .min_by(|a, b| a.total_cost.total_cmp(&b.total_cost))
        .unwrap_or(seed)
        .clone();
    let fastest = offers
        .iter()
        .min_by_key(|o| o.eta_minutes)
        .unwrap_or(seed)
        .clone();

    let confidence = if scores.is_empty() {
        100.0
    } else {
        let mean = scores.iter().map(|&s| s as f64).sum::<f64>() / scores.len() as f64;
        (mean * 10.0).round() / 10.0
    };

    MatchGroup {
        group_id: group_id(&seed.title),
        canonical_title: canonical_title(&seed.title),
        savings_message: savings_message(&best_price, &fastest),
        best_price,
        fastest,
        confidence,
        offers,
    }
}

fn group_id(seed_title: &str) -> String {
    let digest = Sha256::digest(seed_title.as_bytes());
    digest.iter().take(4).map(|b| format!("{:02x}", b)).collect()
}

/// Seed title cut before the first ',', '|' or " - ".
pub fn canonical_title(title: &str) -> String {
    let cut = [title.find(','), title.find('|'), title.find(" - ")]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(title.len());
    let head = title[..cut].trim();
    if head.is_empty() {
        title.trim().to_string()
    } else {
        head.to_string()
    }
}

/// Trade-off between the cheapest and the fastest offer, if they differ.
pub fn savings_message(best: &Offer, fastest: &Offer) -> Option<String> {
    if best.id == fastest.id {
        return None;
    }
    let price_diff = fastest.total_cost - best.total_cost;
    let time_diff = best.eta_minutes.saturating_sub(fastest.eta_minutes);
    if time_diff == 0 || price_diff <= 0.0 {
        return None;
    }
    let sym = &best.currency_symbol;

    if price_diff < 30.0 {
        Some(format!("Fastest is also Best Value! (+{sym}{:.0})", price_diff))
    } else if price_diff > 50.0 {
        let pct = if fastest.total_cost > 0.0 {
            price_diff / fastest.total_cost * 100.0
        } else {
            0.0
        };
        Some(format!(
            "Save {sym}{:.0} ({:.0}%) by waiting {}",
            price_diff,
            pct,
            format_eta(time_diff)
        ))
    } else if fastest.eta_minutes < 60 {
        Some(format!(
            "Pay only {sym}{:.0} extra to get it in {} mins",
            price_diff, fastest.eta_minutes
        ))
    } else {
        None
    }
}
