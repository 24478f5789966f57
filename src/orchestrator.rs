//! # Orchestrator
//! One request, five phases:
//!
//! 1. fan out to every source agent concurrently, each gated by the circuit
//!    breaker and bounded by its timeout; failed sources fall back to the
//!    result cache when it still holds their offers
//! 2. synthetic fallback anchored on the median base price seen so far
//! 3. dedup by offer id (last write wins, first position kept)
//! 4. matcher: sanitize, unit prices, match report, groups
//! 5. telemetry report, kept as the "last report"
//!
//! Source failures never fail the request; they only show up in the report.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use anyhow::Result;
use futures_util::future::join_all;
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::breaker::CircuitBreaker;
use crate::cache::ResultCache;
use crate::config::AggregatorConfig;
use crate::matcher::{MatchGroup, Matcher};
use crate::metrics::ensure_metrics_described;
use crate::offer::Offer;
use crate::sources::{
    build_agents, fetch_with_timeout, NoSynthetic, PlatformFallback, SourceAgent, SourceError,
    SyntheticGenerator,
};
use crate::telemetry::{DataSource, InvocationStatus, Report, SourceInvocationLog};

/// Name under which cache-restored offers are logged.
pub const CACHE_LOG_SOURCE: &str = "result-cache";

#[derive(Debug, Clone, Serialize)]
pub struct Aggregation {
    pub offers: Vec<Offer>,
    pub groups: Vec<MatchGroup>,
    pub report: Report,
}

pub struct Orchestrator {
    agents: Vec<Arc<dyn SourceAgent>>,
    synthetic: Arc<dyn SyntheticGenerator>,
    breaker: Arc<CircuitBreaker>,
    cache: Arc<ResultCache>,
    matcher: Matcher,
    source_timeout: Duration,
    last_report: RwLock<Option<Report>>,
}

impl Orchestrator {
    /// No agents and no synthetic fallback; add them with the `with_*` methods.
    pub fn new(cfg: &AggregatorConfig) -> Self {
        Self {
            agents: Vec::new(),
            synthetic: Arc::new(NoSynthetic),
            breaker: Arc::new(CircuitBreaker::new(&cfg.breaker)),
            cache: Arc::new(ResultCache::new(&cfg.cache)),
            matcher: Matcher::new(cfg.matcher.clone()),
            source_timeout: cfg.orchestrator.source_timeout(),
            last_report: RwLock::new(None),
        }
    }

    /// Agents from `cfg.sources`, plus the quick-commerce fallback when enabled.
    pub fn from_config(cfg: &AggregatorConfig) -> Result<Self> {
        let mut orch = Self::new(cfg).with_agents(build_agents(&cfg.sources)?);
        if cfg.orchestrator.synthetic_fallback {
            orch = orch.with_synthetic(Arc::new(PlatformFallback::quick_commerce()));
        }
        info!(
            target: "orchestrator",
            sources = orch.agents.len(),
            synthetic = cfg.orchestrator.synthetic_fallback,
            timeout_ms = cfg.orchestrator.source_timeout_ms,
            "orchestrator configured"
        );
        Ok(orch)
    }

    pub fn with_agent(mut self, agent: Arc<dyn SourceAgent>) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn with_agents(mut self, agents: Vec<Arc<dyn SourceAgent>>) -> Self {
        self.agents.extend(agents);
        self
    }

    pub fn with_synthetic(mut self, generator: Arc<dyn SyntheticGenerator>) -> Self {
        self.synthetic = generator;
        self
    }

    /// Share a breaker across orchestrators (or drive it from a test).
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name().to_string()).collect()
    }

    pub fn last_report(&self) -> Option<Report> {
        self.last_report
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub async fn orchestrate(&self, query: &str, location: &str) -> Aggregation {
        ensure_metrics_described();
        let started = Instant::now();
        info!(
            target: "orchestrator",
            query,
            location,
            sources = self.agents.len(),
            "orchestration started"
        );

        // Phase 1: live fan-out
        let outcomes = join_all(
            self.agents
                .iter()
                .map(|a| self.invoke(a.as_ref(), query, location)),
        )
        .await;

        let mut logs = Vec::with_capacity(outcomes.len() + 2);
        let mut live = Vec::new();
        for (log, offers) in outcomes {
            logs.push(log);
            live.extend(offers);
        }

        let failed: HashSet<String> = logs
            .iter()
            .filter(|l| l.status == InvocationStatus::Failed)
            .map(|l| l.source.clone())
            .collect();
        let restored = if failed.is_empty() {
            Vec::new()
        } else {
            self.restore_from_cache(query, location, &failed, &mut logs)
        };

        if !live.is_empty() {
            self.cache.put_carrying(query, location, &live, &failed);
        }

        // Phase 2: synthetic fallback
        let reference = median_base_price(live.iter().chain(restored.iter()));
        let synthetic = self.synthetic.generate(query, location, reference);
        if !synthetic.is_empty() {
            let mut log = SourceInvocationLog::new(self.synthetic.name());
            log.start();
            log.succeed(synthetic.len(), DataSource::Synthetic);
            logs.push(log);
        }
        debug!(
            target: "orchestrator",
            reference_price = ?reference,
            synthetic = synthetic.len(),
            "synthetic phase done"
        );

        // Phase 3: dedup
        let mut merged = live;
        merged.extend(restored);
        merged.extend(synthetic);
        let deduped = dedup_by_id(merged);

        // Phase 4: normalize, match, group
        let normalized = self.matcher.normalize(deduped);

        // Phase 5: telemetry
        let report = Report::build(
            query,
            location,
            started,
            logs,
            normalized.matches,
            normalized.offers.len(),
        );
        counter!("aggregator_offers_total").increment(report.total_offers as u64);
        histogram!("aggregator_orchestrate_ms").record(report.total_time_ms);
        info!(
            target: "orchestrator",
            query,
            location,
            offers = report.total_offers,
            groups = normalized.groups.len(),
            health = ?report.data_health.overall_status,
            ms = report.total_time_ms,
            "orchestration finished"
        );

        *self
            .last_report
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(report.clone());

        Aggregation {
            offers: normalized.offers,
            groups: normalized.groups,
            report,
        }
    }

    async fn invoke(
        &self,
        agent: &dyn SourceAgent,
        query: &str,
        location: &str,
    ) -> (SourceInvocationLog, Vec<Offer>) {
        let name = agent.name();
        let mut log = SourceInvocationLog::new(name);

        if !self.breaker.can_proceed(name) {
            counter!("aggregator_circuit_skips_total", "source" => name.to_string()).increment(1);
            debug!(target: "orchestrator", source = name, "circuit open, skipping");
            log.fail(SourceError::CircuitOpen.to_string());
            return (log, Vec::new());
        }

        log.start();
        let limit = agent.timeout().unwrap_or(self.source_timeout);
        match fetch_with_timeout(agent, query, location, limit).await {
            Ok(offers) => {
                self.breaker.record_success(name);
                counter!("aggregator_source_success_total", "source" => name.to_string())
                    .increment(1);
                log.succeed(offers.len(), DataSource::Live);
                (log, offers)
            }
            Err(e) => {
                self.breaker.record_failure(name);
                counter!("aggregator_source_failures_total", "source" => name.to_string())
                    .increment(1);
                warn!(target: "orchestrator", error = ?e, source = name, "source failed");
                log.fail(e.to_string());
                (log, Vec::new())
            }
        }
    }

    /// Offers the cache still holds for the failed sources, logged as one `cached` invocation.
    fn restore_from_cache(
        &self,
        query: &str,
        location: &str,
        failed: &HashSet<String>,
        logs: &mut Vec<SourceInvocationLog>,
    ) -> Vec<Offer> {
        let Some(cached) = self.cache.get(query, location) else {
            counter!("aggregator_cache_misses_total").increment(1);
            return Vec::new();
        };
        counter!("aggregator_cache_hits_total").increment(1);

        let restored: Vec<Offer> = cached
            .iter()
            .filter(|c| failed.contains(&c.source))
            .map(|c| c.to_offer())
            .collect();
        if !restored.is_empty() {
            let mut log = SourceInvocationLog::new(CACHE_LOG_SOURCE);
            log.start();
            log.cached(restored.len());
            logs.push(log);
            info!(
                target: "orchestrator",
                restored = restored.len(),
                failed_sources = failed.len(),
                "restored offers from cache"
            );
        }
        restored
    }
}

/// Keep one offer per id: the last occurrence wins but stays at the position
/// where the id first appeared.
pub fn dedup_by_id(offers: Vec<Offer>) -> Vec<Offer> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(offers.len());
    let mut out: Vec<Offer> = Vec::with_capacity(offers.len());
    for o in offers {
        match index.get(&o.id) {
            Some(&i) => out[i] = o,
            None => {
                index.insert(o.id.clone(), out.len());
                out.push(o);
            }
        }
    }
    out
}

/// Median of the positive base prices; mean of the middle pair for even counts.
pub fn median_base_price<'a>(offers: impl IntoIterator<Item = &'a Offer>) -> Option<f64> {
    let mut prices: Vec<f64> = offers
        .into_iter()
        .map(|o| o.base_price)
        .filter(|p| p.is_finite() && *p > 0.0)
        .collect();
    if prices.is_empty() {
        return None;
    }
    prices.sort_by(|a, b| a.total_cmp(b));
    let mid = prices.len() / 2;
    Some(if prices.len() % 2 == 0 {
        (prices[mid - 1] + prices[mid]) / 2.0
    } else {
        prices[mid]
    })
}
