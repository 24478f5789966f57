use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Deserialize;

use crate::matcher::clean_title;
use crate::offer::Offer;
use crate::sources::SourceAgent;

fn default_in_stock() -> bool {
    true
}

/// One listing as it appears in a JSON offer feed.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedItem {
    pub title: String,
    pub price: f64,
    #[serde(default)]
    pub delivery_fee: f64,
    #[serde(default)]
    pub platform_fee: f64,
    #[serde(default)]
    pub handling_fee: f64,
    #[serde(default)]
    pub discount: f64,
    #[serde(default)]
    pub eta_minutes: u32,
    #[serde(default)]
    pub rating: Option<f32>,
    #[serde(default = "default_in_stock")]
    pub in_stock: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub currency_symbol: Option<String>,
}

impl FeedItem {
    pub fn into_offer(self, source: &str) -> Offer {
        let currency = self.currency.unwrap_or_else(|| "INR".to_string());
        let symbol = self
            .currency_symbol
            .unwrap_or_else(|| symbol_for(&currency));
        let mut offer = Offer::new(source, self.title, self.price)
            .fees(self.delivery_fee, self.platform_fee, self.handling_fee)
            .discount(self.discount)
            .currency(currency, symbol)
            .eta(self.eta_minutes)
            .in_stock(self.in_stock);
        if let Some(r) = self.rating {
            offer = offer.rating(r);
        }
        if let Some(u) = self.url {
            offer = offer.url(u);
        }
        offer
    }
}

fn symbol_for(code: &str) -> String {
    match code.to_ascii_uppercase().as_str() {
        "INR" => "₹".to_string(),
        "USD" => "$".to_string(),
        "EUR" => "€".to_string(),
        "GBP" => "£".to_string(),
        other => format!("{other} "),
    }
}

/// Cleaned title split into words, with quantities split from their unit
/// ("500ml" becomes "500 ml").
fn query_words(text: &str) -> Vec<String> {
    static RE_QTY: OnceCell<Regex> = OnceCell::new();
    let re_qty = RE_QTY.get_or_init(|| Regex::new(r"(\d)(\p{L})").unwrap());
    re_qty
        .replace_all(&clean_title(text), "$1 $2")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Every query word is a whole word of the title.
pub fn matches_query(title: &str, query: &str) -> bool {
    let words = query_words(title);
    query_words(query).iter().all(|tok| words.contains(tok))
}

/// Source agent backed by a JSON array of `FeedItem`s: inline, a file re-read on
/// every call, or (with `http-sources`) an HTTP endpoint.
pub struct FeedAgent {
    name: String,
    mode: Mode,
    timeout: Option<Duration>,
}

enum Mode {
    Inline(Vec<FeedItem>),
    File(PathBuf),
    #[cfg(feature = "http-sources")]
    Http { url: String, client: reqwest::Client },
}

impl FeedAgent {
    pub fn from_items(name: &str, items: Vec<FeedItem>) -> Self {
        Self::with_mode(name, Mode::Inline(items))
    }

    pub fn from_json_str(name: &str, s: &str) -> Result<Self> {
        let items = parse_items(s.as_bytes())?;
        Ok(Self::from_items(name, items))
    }

    pub fn from_file(name: &str, path: PathBuf) -> Self {
        Self::with_mode(name, Mode::File(path))
    }

    #[cfg(feature = "http-sources")]
    pub fn from_url(name: &str, url: String) -> Self {
        let client = reqwest::Client::new();
        Self::with_mode(name, Mode::Http { url, client })
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn with_mode(name: &str, mode: Mode) -> Self {
        Self {
            name: name.to_string(),
            mode,
            timeout: None,
        }
    }

    fn to_offers(&self, items: Vec<FeedItem>, query: Option<&str>) -> Vec<Offer> {
        let out: Vec<Offer> = items
            .into_iter()
            .filter(|it| query.map_or(true, |q| matches_query(&it.title, q)))
            .map(|it| it.into_offer(&self.name))
            .collect();
        counter!("aggregator_feed_items_total", "source" => self.name.clone())
            .increment(out.len() as u64);
        out
    }
}

// Input may come from anywhere; invalid UTF-8 is decoded lossily and cleaned up by the matcher.
fn parse_items(raw: &[u8]) -> Result<Vec<FeedItem>> {
    let t0 = std::time::Instant::now();
    let text = String::from_utf8_lossy(raw);
    let items: Vec<FeedItem> = serde_json::from_str(&text).context("parsing offer feed json")?;
    histogram!("aggregator_feed_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(items)
}

#[async_trait]
impl SourceAgent for FeedAgent {
    async fn fetch(&self, query: &str, location: &str) -> Result<Vec<Offer>> {
        let offers = match &self.mode {
            Mode::Inline(items) => self.to_offers(items.clone(), Some(query)),
            Mode::File(path) => {
                let raw = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("reading offer feed {}", path.display()))?;
                self.to_offers(parse_items(&raw)?, Some(query))
            }
            #[cfg(feature = "http-sources")]
            Mode::Http { url, client } => {
                let resp = client
                    .get(url)
                    .query(&[("q", query), ("location", location)])
                    .send()
                    .await
                    .context("feed http get()")?
                    .error_for_status()
                    .context("feed http status")?;
                let body = resp.bytes().await.context("feed http body")?;
                // The endpoint does its own query matching.
                self.to_offers(parse_items(&body)?, None)
            }
        };
        tracing::debug!(
            target: "sources",
            source = %self.name,
            location,
            offers = offers.len(),
            "feed fetched"
        );
        Ok(offers)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}
