// tests/orchestrator_e2e.rs
//
// Full orchestration runs against hand-written stub agents:
// - the milk scenario (grouping + best price)
// - all sources down → synthetic health
// - circuit-open skips, timeouts, cache fallback, write-through history

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use offer_aggregator::breaker::BreakerState;
use offer_aggregator::config::AggregatorConfig;
use offer_aggregator::offer::Offer;
use offer_aggregator::orchestrator::{Orchestrator, CACHE_LOG_SOURCE};
use offer_aggregator::sources::{SourceAgent, SyntheticGenerator};
use offer_aggregator::telemetry::{DataHealth, DataSource, InvocationStatus};

struct Fixed {
    name: String,
    offers: Vec<Offer>,
    delay: Duration,
}

#[async_trait]
impl SourceAgent for Fixed {
    async fn fetch(&self, _query: &str, _location: &str) -> Result<Vec<Offer>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.offers.clone())
    }
    fn name(&self) -> &str {
        &self.name
    }
}

struct Failing {
    name: String,
    calls: AtomicUsize,
}

#[async_trait]
impl SourceAgent for Failing {
    async fn fetch(&self, _query: &str, _location: &str) -> Result<Vec<Offer>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("upstream 503"))
    }
    fn name(&self) -> &str {
        &self.name
    }
}

/// Succeeds until `down` is flipped.
struct Flaky {
    name: String,
    offer: Offer,
    down: AtomicBool,
}

#[async_trait]
impl SourceAgent for Flaky {
    async fn fetch(&self, _query: &str, _location: &str) -> Result<Vec<Offer>> {
        if self.down.load(Ordering::SeqCst) {
            Err(anyhow!("connection reset"))
        } else {
            Ok(vec![self.offer.clone()])
        }
    }
    fn name(&self) -> &str {
        &self.name
    }
}

struct StubGenerator(Vec<Offer>);

impl SyntheticGenerator for StubGenerator {
    fn generate(&self, _q: &str, _l: &str, _reference: Option<f64>) -> Vec<Offer> {
        self.0.clone()
    }
}

fn single(name: &str, title: &str, price: f64) -> Arc<dyn SourceAgent> {
    Arc::new(Fixed {
        name: name.to_string(),
        offers: vec![Offer::new(name, title, price)],
        delay: Duration::ZERO,
    })
}

fn failing(name: &str) -> Arc<Failing> {
    Arc::new(Failing {
        name: name.to_string(),
        calls: AtomicUsize::new(0),
    })
}

#[tokio::test]
async fn milk_scenario_groups_amul_and_keeps_mother_dairy_apart() {
    let orch = Orchestrator::new(&AggregatorConfig::default())
        .with_agent(single("blinkit", "Amul Taaza Milk 500ml", 29.0))
        .with_agent(single("zepto", "AMUL Taaza Milk - 500 ml", 28.0))
        .with_agent(single("instamart", "Mother Dairy Milk 500ml", 27.0));

    let agg = orch.orchestrate("milk 500ml", "110001").await;

    assert_eq!(agg.offers.len(), 3);
    assert_eq!(agg.groups.len(), 2, "groups: {:#?}", agg.groups);

    let amul = &agg.groups[0];
    assert_eq!(amul.offers.len(), 2);
    assert!(amul.confidence >= 75.0);
    assert_eq!(amul.best_price.total_cost, 28.0);
    assert_eq!(amul.best_price.source, "zepto");
    assert_eq!(amul.canonical_title, "Amul Taaza Milk 500ml");

    let md = &agg.groups[1];
    assert_eq!(md.offers.len(), 1);
    assert_eq!(md.offers[0].source, "instamart");
    assert_eq!(md.confidence, 100.0);

    let r = &agg.report;
    assert_eq!(r.data_health.overall_status, DataHealth::Healthy);
    assert_eq!(r.data_health.live_sources, 3);
    assert!(r
        .sources
        .iter()
        .all(|l| l.status == InvocationStatus::Success && l.offer_count == 1));
    assert!(r.matches.total_matches >= 1);
    assert_eq!(orch.last_report().map(|r| r.total_offers), Some(3));
}

#[tokio::test]
async fn all_sources_down_returns_exactly_the_synthetic_offers() {
    let synthetic = vec![
        Offer::new("Blinkit", "Milk 500ml", 30.0).eta(10),
        Offer::new("Zepto", "Milk 500ml", 31.0).eta(9),
    ];
    let orch = Orchestrator::new(&AggregatorConfig::default())
        .with_agent(failing("blinkit"))
        .with_agent(failing("zepto"))
        .with_synthetic(Arc::new(StubGenerator(synthetic.clone())));

    let agg = orch.orchestrate("milk", "110001").await;

    assert_eq!(agg.report.data_health.overall_status, DataHealth::Synthetic);
    let mut got: Vec<String> = agg.offers.iter().map(|o| o.id.clone()).collect();
    let mut want: Vec<String> = synthetic.iter().map(|o| o.id.clone()).collect();
    got.sort();
    want.sort();
    assert_eq!(got, want);

    let failed: Vec<_> = agg
        .report
        .sources
        .iter()
        .filter(|l| l.status == InvocationStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 2);
    assert!(failed
        .iter()
        .all(|l| l.error.as_deref() == Some("upstream 503") && l.data_source.is_none()));
    assert_eq!(agg.report.data_health.synthetic_sources, 1);
}

#[tokio::test]
async fn nothing_anywhere_is_still_a_result() {
    let orch = Orchestrator::new(&AggregatorConfig::default()).with_agent(failing("blinkit"));
    let agg = orch.orchestrate("milk", "110001").await;
    assert!(agg.offers.is_empty());
    assert!(agg.groups.is_empty());
    assert_eq!(agg.report.data_health.overall_status, DataHealth::Synthetic);
}

#[tokio::test]
async fn open_circuit_skips_the_call_and_logs_the_reason() {
    let mut cfg = AggregatorConfig::default();
    cfg.breaker.failure_threshold = 1;
    let agent = failing("blinkit");
    let orch = Orchestrator::new(&cfg).with_agent(agent.clone());

    let first = orch.orchestrate("milk", "110001").await;
    assert_eq!(first.report.sources[0].error.as_deref(), Some("upstream 503"));
    assert_eq!(orch.breaker().state("blinkit"), BreakerState::Open);

    let second = orch.orchestrate("milk", "110001").await;
    let log = &second.report.sources[0];
    assert_eq!(log.status, InvocationStatus::Failed);
    assert_eq!(log.error.as_deref(), Some("circuit open"));
    assert!(log.started_at.is_none());
    assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
    assert!(orch.breaker().status().contains_key("blinkit"));
}

#[tokio::test]
async fn slow_source_times_out_without_holding_others() {
    let mut cfg = AggregatorConfig::default();
    cfg.orchestrator.source_timeout_ms = 50;
    let slow: Arc<dyn SourceAgent> = Arc::new(Fixed {
        name: "slow".into(),
        offers: vec![Offer::new("slow", "Milk 500ml", 20.0)],
        delay: Duration::from_secs(3),
    });
    let orch = Orchestrator::new(&cfg)
        .with_agent(slow)
        .with_agent(single("zepto", "Milk 500ml", 28.0));

    let t0 = Instant::now();
    let agg = orch.orchestrate("milk", "110001").await;
    assert!(t0.elapsed() < Duration::from_secs(2));

    let slow_log = agg.report.sources.iter().find(|l| l.source == "slow").unwrap();
    assert_eq!(slow_log.status, InvocationStatus::Failed);
    assert_eq!(slow_log.error.as_deref(), Some("timed out after 50 ms"));
    assert_eq!(agg.offers.len(), 1);
    assert_eq!(orch.breaker().consecutive_failures("slow"), 1);
}

#[tokio::test]
async fn sources_run_concurrently() {
    let agent = |name: &str| -> Arc<dyn SourceAgent> {
        Arc::new(Fixed {
            name: name.to_string(),
            offers: vec![Offer::new(name, "Bread 400g", 40.0)],
            delay: Duration::from_millis(300),
        })
    };
    let orch = Orchestrator::new(&AggregatorConfig::default())
        .with_agent(agent("a"))
        .with_agent(agent("b"))
        .with_agent(agent("c"));

    let t0 = Instant::now();
    let agg = orch.orchestrate("bread", "110001").await;
    assert!(t0.elapsed() < Duration::from_millis(800));
    assert_eq!(agg.offers.len(), 3);
}

#[tokio::test]
async fn failed_source_falls_back_to_cached_offers() {
    let offer = Offer::new("zepto", "Amul Butter 100g", 58.0).eta(10);
    let flaky = Arc::new(Flaky {
        name: "zepto".into(),
        offer: offer.clone(),
        down: AtomicBool::new(false),
    });
    let orch = Orchestrator::new(&AggregatorConfig::default()).with_agent(flaky.clone());

    let warm = orch.orchestrate("butter", "110001").await;
    assert_eq!(warm.report.data_health.overall_status, DataHealth::Healthy);

    flaky.down.store(true, Ordering::SeqCst);
    let agg = orch.orchestrate("  BUTTER ", "110001").await;

    assert_eq!(agg.report.data_health.overall_status, DataHealth::Degraded);
    let cached = agg
        .report
        .sources
        .iter()
        .find(|l| l.source == CACHE_LOG_SOURCE)
        .expect("cache log present");
    assert_eq!(cached.status, InvocationStatus::Cached);
    assert_eq!(cached.data_source, Some(DataSource::Cache));
    assert_eq!(cached.offer_count, 1);

    assert_eq!(agg.offers.len(), 1);
    assert_eq!(agg.offers[0].id, offer.id);
    assert_eq!(agg.offers[0].total_cost, 58.0);
}

#[tokio::test]
async fn repeated_failure_still_restores_from_the_first_cache_write() {
    let a = Arc::new(Flaky {
        name: "a".into(),
        offer: Offer::new("a", "Tata Salt 1kg", 28.0),
        down: AtomicBool::new(false),
    });
    let orch = Orchestrator::new(&AggregatorConfig::default())
        .with_agent(a.clone())
        .with_agent(single("b", "Tata Salt 1kg", 27.0));

    assert_eq!(orch.orchestrate("salt", "110001").await.offers.len(), 2);

    a.down.store(true, Ordering::SeqCst);
    for run in 0..2 {
        let agg = orch.orchestrate("salt", "110001").await;
        let mut sources: Vec<&str> = agg.offers.iter().map(|o| o.source.as_str()).collect();
        sources.sort();
        assert_eq!(sources, vec!["a", "b"], "run {run}");
        let cached = agg
            .report
            .sources
            .iter()
            .find(|l| l.source == CACHE_LOG_SOURCE)
            .expect("cache log present");
        assert_eq!(cached.offer_count, 1);
    }
    // The restored offer is not a live observation.
    assert_eq!(orch.cache().get_history(&a.offer.id).len(), 1);
}

#[tokio::test]
async fn live_offers_are_written_through_with_history() {
    let orch = Orchestrator::new(&AggregatorConfig::default())
        .with_agent(single("zepto", "Tata Salt 1kg", 28.0));
    orch.orchestrate("salt", "110001").await;
    let agg = orch.orchestrate("salt", "110001").await;

    let id = &agg.offers[0].id;
    let history = orch.cache().get_history(id);
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|p| p.price == 28.0 && p.source == "zepto"));

    let stats = orch.cache().stats();
    assert_eq!(stats.cached_queries, 1);
    assert_eq!(stats.tracked_offers, 1);
}

#[tokio::test]
async fn duplicate_ids_across_sources_collapse() {
    // Same agent name twice is a config error, but two agents may emit the same (source, title).
    let dup: Arc<dyn SourceAgent> = Arc::new(Fixed {
        name: "mirror".into(),
        offers: vec![Offer::new("zepto", "Tata Salt 1kg", 27.0)],
        delay: Duration::ZERO,
    });
    let orch = Orchestrator::new(&AggregatorConfig::default())
        .with_agent(single("zepto", "Tata Salt 1kg", 28.0))
        .with_agent(dup);
    let agg = orch.orchestrate("salt", "110001").await;
    assert_eq!(agg.offers.len(), 1);
    assert_eq!(agg.offers[0].base_price, 27.0);
}
