//! # Telemetry
//! Per-source invocation logs and the report assembled at the end of every
//! orchestration run.
//!
//! A log walks `idle → running → success | failed | cached` and is frozen once it
//! reaches a terminal state. The report is a plain serde record for the API layer.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Idle,
    Running,
    Success,
    Failed,
    Cached,
}

impl InvocationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cached)
    }
}

/// Where the offers of one invocation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Live,
    Cache,
    Synthetic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataHealth {
    Healthy,
    Degraded,
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInvocationLog {
    pub source: String,
    pub status: InvocationStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<f64>,
    pub offer_count: usize,
    /// Only set once the invocation actually produced a result.
    pub data_source: Option<DataSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceInvocationLog {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            status: InvocationStatus::Idle,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            offer_count: 0,
            data_source: None,
            error: None,
        }
    }

    pub fn start(&mut self) {
        if self.status != InvocationStatus::Idle {
            return;
        }
        self.status = InvocationStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn succeed(&mut self, offer_count: usize, data_source: DataSource) {
        self.finish(InvocationStatus::Success, offer_count, Some(data_source), None);
    }

    /// Offers restored from the result cache instead of a live call.
    pub fn cached(&mut self, offer_count: usize) {
        self.finish(
            InvocationStatus::Cached,
            offer_count,
            Some(DataSource::Cache),
            None,
        );
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.finish(InvocationStatus::Failed, 0, None, Some(error.into()));
    }

    fn finish(
        &mut self,
        status: InvocationStatus,
        offer_count: usize,
        data_source: Option<DataSource>,
        error: Option<String>,
    ) {
        if self.status.is_terminal() {
            return;
        }
        let now = Utc::now();
        self.status = status;
        self.finished_at = Some(now);
        self.duration_ms = self.started_at.map(|s| {
            let ms = now.signed_duration_since(s).num_microseconds().unwrap_or(0) as f64 / 1_000.0;
            (ms * 10.0).round() / 10.0
        });
        self.offer_count = offer_count;
        self.data_source = data_source;
        self.error = error;
    }
}

/// One cross-source pair whose titles look like the same item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchPair {
    pub offer_a: String,
    pub source_a: String,
    pub title_a: String,
    pub offer_b: String,
    pub source_b: String,
    pub title_b: String,
    /// Percent, one decimal.
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchReport {
    pub total_matches: usize,
    pub top_matches: Vec<MatchPair>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub live_sources: usize,
    pub cached_sources: usize,
    pub synthetic_sources: usize,
    pub overall_status: DataHealth,
}

/// Healthy if anything came live, degraded if something came from the cache,
/// synthetic otherwise.
pub fn classify_health(logs: &[SourceInvocationLog]) -> HealthSummary {
    let count = |ds: DataSource| logs.iter().filter(|l| l.data_source == Some(ds)).count();
    let live_sources = count(DataSource::Live);
    let cached_sources = count(DataSource::Cache);
    let synthetic_sources = count(DataSource::Synthetic);

    let overall_status = if live_sources > 0 {
        DataHealth::Healthy
    } else if cached_sources > 0 {
        DataHealth::Degraded
    } else {
        DataHealth::Synthetic
    };

    HealthSummary {
        live_sources,
        cached_sources,
        synthetic_sources,
        overall_status,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub query: String,
    pub location: String,
    pub total_offers: usize,
    pub total_time_ms: f64,
    pub timestamp: DateTime<Utc>,
    pub sources: Vec<SourceInvocationLog>,
    pub matches: MatchReport,
    pub data_health: HealthSummary,
}

impl Report {
    pub fn build(
        query: &str,
        location: &str,
        started: Instant,
        sources: Vec<SourceInvocationLog>,
        matches: MatchReport,
        total_offers: usize,
    ) -> Self {
        let total_time_ms = (started.elapsed().as_secs_f64() * 10_000.0).round() / 10.0;
        let data_health = classify_health(&sources);
        Self {
            query: query.to_string(),
            location: location.to_string(),
            total_offers,
            total_time_ms,
            timestamp: Utc::now(),
            sources,
            matches,
            data_health,
        }
    }
}
