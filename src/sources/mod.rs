//! Source agents: anything that can answer `(query, location)` with offers.
//!
//! Agents are invoked concurrently by the orchestrator, each under its own
//! timeout. They report failure through `anyhow::Result`; the orchestrator folds
//! the outcome into a `SourceError` for telemetry and the circuit breaker.

pub mod providers;
pub mod synthetic;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::SourceConfig;
use crate::offer::Offer;

pub use providers::feed::{FeedAgent, FeedItem};
pub use synthetic::{NoSynthetic, PlatformFallback, SyntheticGenerator};

#[async_trait]
pub trait SourceAgent: Send + Sync {
    async fn fetch(&self, query: &str, location: &str) -> Result<Vec<Offer>>;

    /// Stable name; keys the circuit breaker and tags telemetry.
    fn name(&self) -> &str;

    /// Per-agent override of the orchestrator's default timeout.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("circuit open")]
    CircuitOpen,
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

/// Run one fetch bounded by `limit`.
pub async fn fetch_with_timeout(
    agent: &dyn SourceAgent,
    query: &str,
    location: &str,
    limit: Duration,
) -> Result<Vec<Offer>, SourceError> {
    match tokio::time::timeout(limit, agent.fetch(query, location)).await {
        Ok(Ok(offers)) => Ok(offers),
        Ok(Err(e)) => Err(SourceError::Upstream(e)),
        Err(_) => Err(SourceError::Timeout(limit.as_millis() as u64)),
    }
}

/// Build agents for the configured sources. Names must be unique.
pub fn build_agents(sources: &[SourceConfig]) -> Result<Vec<Arc<dyn SourceAgent>>> {
    let mut out: Vec<Arc<dyn SourceAgent>> = Vec::with_capacity(sources.len());
    for source in sources {
        if out.iter().any(|a| a.name() == source.name) {
            bail!("duplicate source name {:?}", source.name);
        }
        let timeout = source.timeout_ms.map(Duration::from_millis);
        let agent = match (&source.feed_path, &source.url) {
            (Some(path), None) => FeedAgent::from_file(&source.name, path.clone()),
            #[cfg(feature = "http-sources")]
            (None, Some(url)) => FeedAgent::from_url(&source.name, url.clone()),
            #[cfg(not(feature = "http-sources"))]
            (None, Some(_)) => bail!(
                "source {:?} has a url but the http-sources feature is disabled",
                source.name
            ),
            _ => bail!("source {:?} needs exactly one of feed_path or url", source.name),
        };
        out.push(Arc::new(agent.with_timeout(timeout)));
    }
    Ok(out)
}
