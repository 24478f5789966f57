//! Quantity extraction and unit pricing.
//!
//! Titles are scanned for the first recognizable quantity. Volumes normalize to
//! millilitres, weights to grams, counts to pieces.

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Ml,
    G,
    Pcs,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub unit: Unit,
}

impl Quantity {
    /// Same unit and the same normalized amount.
    pub fn same_as(&self, other: &Quantity) -> bool {
        let scale = self.value.abs().max(other.value.abs()).max(1.0);
        self.unit == other.unit && (self.value - other.value).abs() <= 1e-6 * scale
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitPrice {
    /// Price per single ml, g or piece.
    pub value: f64,
    pub unit: Unit,
    pub quantity: f64,
    pub display: String,
}

struct UnitPattern {
    re: Regex,
    factor: f64,
    unit: Unit,
}

// Order matters: the first pattern that matches wins.
fn patterns() -> &'static [UnitPattern] {
    static PATTERNS: OnceCell<Vec<UnitPattern>> = OnceCell::new();
    PATTERNS.get_or_init(|| {
        let table: [(&str, f64, Unit); 7] = [
            (r"(?i)\bpack\s+of\s+(\d+)\b", 1.0, Unit::Pcs),
            (
                r"(?i)\b(\d+(?:\.\d+)?)\s*(?:l|ltr|ltrs|litres?|liters?)\b",
                1000.0,
                Unit::Ml,
            ),
            (r"(?i)\b(\d+(?:\.\d+)?)\s*(?:ml|millilitres?|milliliters?)\b", 1.0, Unit::Ml),
            (r"(?i)\b(\d+(?:\.\d+)?)\s*(?:kg|kgs|kilos?|kilograms?)\b", 1000.0, Unit::G),
            (r"(?i)\b(\d+(?:\.\d+)?)\s*(?:g|gm|gms|grams?)\b", 1.0, Unit::G),
            (r"(?i)\b(\d+(?:\.\d+)?)\s*(?:pcs?|pieces?|units?|count)\b", 1.0, Unit::Pcs),
            (r"(?i)\b(\d+(?:\.\d+)?)\s*(?:tablets?|tabs?|capsules?)\b", 1.0, Unit::Pcs),
        ];
        table.into_iter()
            .map(|(re, factor, unit)| UnitPattern {
                re: Regex::new(re).unwrap(),
                factor,
                unit,
            })
            .collect()
    })
}

/// First quantity found in `title`, normalized to ml / g / pcs.
pub fn extract_quantity(title: &str) -> Option<Quantity> {
    patterns().iter().find_map(|p| {
        let caps = p.re.captures(title)?;
        let raw: f64 = caps.get(1)?.as_str().parse().ok()?;
        Some(Quantity {
            value: raw * p.factor,
            unit: p.unit,
        })
    })
}

/// Per-unit price plus a display string; `None` when the quantity is not positive.
pub fn unit_price(total_cost: f64, currency_symbol: &str, q: Quantity) -> Option<UnitPrice> {
    if q.value <= 0.0 {
        return None;
    }
    let up = total_cost / q.value;
    let sym = currency_symbol;
    let display = match q.unit {
        Unit::Ml if q.value >= 1000.0 => format!("{sym}{:.1}/L", up * 1000.0),
        Unit::Ml => format!("{sym}{:.2}/ml", up),
        Unit::G if q.value >= 1000.0 => format!("{sym}{:.1}/kg", up * 1000.0),
        Unit::G => format!("{sym}{:.2}/g", up),
        Unit::Pcs => format!("{sym}{:.1}/pc", up),
    };
    Some(UnitPrice {
        value: (up * 10_000.0).round() / 10_000.0,
        unit: q.unit,
        quantity: q.value,
        display,
    })
}
