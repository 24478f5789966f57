// src/config.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_CONFIG_PATH: &str = "AGGREGATOR_CONFIG_PATH";

const ENV_CB_THRESHOLD: &str = "CB_FAILURE_THRESHOLD";
const ENV_CB_COOLDOWN: &str = "CB_COOLDOWN_SECS";
const ENV_CACHE_TTL: &str = "CACHE_TTL_SECS";
const ENV_SOURCE_TIMEOUT: &str = "SOURCE_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_secs: i64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: i64,
    pub history_cap: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            history_cap: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub source_timeout_ms: u64,
    /// Use the built-in quick-commerce fallback generator when no live data is available.
    pub synthetic_fallback: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            source_timeout_ms: 8_000,
            synthetic_fallback: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Pairwise score (0..=100) an offer needs against a group seed to join it.
    pub group_threshold: u32,
    /// Combined similarity (0..1) above which a cross-source pair is reported.
    pub similarity_threshold: f64,
    pub top_matches: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            group_threshold: 75,
            similarity_threshold: 0.45,
            top_matches: 5,
        }
    }
}

/// One configured source agent. Exactly one of `feed_path` / `url` is expected.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default)]
    pub feed_path: Option<PathBuf>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub breaker: BreakerConfig,
    pub cache: CacheConfig,
    pub orchestrator: OrchestratorConfig,
    pub matcher: MatcherConfig,
    pub sources: Vec<SourceConfig>,
}

impl AggregatorConfig {
    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading aggregator config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut cfg = parse_config(&content, ext.as_str())
            .with_context(|| format!("parsing aggregator config {}", path.display()))?;
        cfg.resolve_feed_paths(path.parent());
        Ok(cfg)
    }

    /// Load using env var + fallbacks, then apply env overrides:
    /// 1) $AGGREGATOR_CONFIG_PATH
    /// 2) config/aggregator.toml
    /// 3) config/aggregator.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        let mut cfg = Self::load_file_default()?;
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    fn load_file_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        let toml_p = PathBuf::from("config/aggregator.toml");
        if toml_p.exists() {
            return Self::load_from(&toml_p);
        }
        let json_p = PathBuf::from("config/aggregator.json");
        if json_p.exists() {
            return Self::load_from(&json_p);
        }
        Ok(Self::default())
    }

    /// Env vars win over file values. Unparseable values are an error, not a silent default.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_parse::<u32>(ENV_CB_THRESHOLD)? {
            self.breaker.failure_threshold = v;
        }
        if let Some(v) = env_parse::<i64>(ENV_CB_COOLDOWN)? {
            self.breaker.cooldown_secs = v;
        }
        if let Some(v) = env_parse::<i64>(ENV_CACHE_TTL)? {
            self.cache.ttl_secs = v;
        }
        if let Some(v) = env_parse::<u64>(ENV_SOURCE_TIMEOUT)? {
            self.orchestrator.source_timeout_ms = v;
        }
        Ok(())
    }

    // Relative feed paths are taken relative to the config file.
    fn resolve_feed_paths(&mut self, base: Option<&Path>) {
        let Some(base) = base else { return };
        for s in &mut self.sources {
            if let Some(p) = s.feed_path.as_mut() {
                if p.is_relative() {
                    *p = base.join(&*p);
                }
            }
        }
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("invalid {key}={raw:?}: {e}")),
        _ => Ok(None),
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<AggregatorConfig> {
    if hint_ext == "json" {
        return serde_json::from_str(s).context("invalid JSON");
    }
    if hint_ext == "toml" {
        return toml::from_str(s).context("invalid TOML");
    }
    // No usable extension: JSON first, TOML second.
    if let Ok(v) = serde_json::from_str(s) {
        return Ok(v);
    }
    toml::from_str(s).map_err(|e| anyhow!("unsupported config format: {e}"))
}
