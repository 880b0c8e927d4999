//! vigil.toml configuration parser.
//!
//! Every field is optional; anything left out falls back to the library
//! defaults. Durations are strings such as `"500ms"`, `"10s"`, `"2m"`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use vigil_health::PollerConfig;
use vigil_webhooks::{DeliveryConfig, RetryPolicy};

pub const DEFAULT_METRICS_PORT: u16 = 9464;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VigilConfig {
    pub poller: Option<PollerSection>,
    pub webhooks: Option<WebhooksSection>,
    pub server: Option<ServerSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollerSection {
    pub interval: Option<String>,
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhooksSection {
    pub max_retries: Option<u32>,
    pub initial_delay: Option<String>,
    pub max_delay: Option<String>,
    pub timeout: Option<String>,
    pub user_agent: Option<String>,
    /// 0 never disables.
    pub disable_after_failures: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    pub metrics_port: Option<u16>,
}

impl VigilConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn poller_config(&self) -> anyhow::Result<PollerConfig> {
        let mut config = PollerConfig::default();
        let Some(section) = &self.poller else {
            return Ok(config);
        };
        if let Some(raw) = &section.interval {
            config.interval = parse_nonzero_duration("poller.interval", raw)?;
        }
        if let Some(raw) = &section.timeout {
            config.probe_timeout = parse_nonzero_duration("poller.timeout", raw)?;
        }
        Ok(config)
    }

    pub fn delivery_config(&self) -> anyhow::Result<DeliveryConfig> {
        let mut config = DeliveryConfig::default();
        let Some(section) = &self.webhooks else {
            return Ok(config);
        };

        let mut retry = RetryPolicy::default();
        if let Some(max_retries) = section.max_retries {
            if max_retries == 0 {
                bail!("webhooks.max_retries must be at least 1");
            }
            retry.max_attempts = max_retries;
        }
        if let Some(raw) = &section.initial_delay {
            retry.initial_delay = parse_duration(raw).context("webhooks.initial_delay")?;
        }
        if let Some(raw) = &section.max_delay {
            retry.max_delay = parse_duration(raw).context("webhooks.max_delay")?;
        }
        if retry.initial_delay > retry.max_delay {
            bail!("webhooks.initial_delay must not exceed webhooks.max_delay");
        }
        config.retry = retry;

        if let Some(raw) = &section.timeout {
            config.timeout = parse_nonzero_duration("webhooks.timeout", raw)?;
        }
        if let Some(agent) = &section.user_agent {
            config.user_agent = agent.clone();
        }
        config.disable_after_failures = section.disable_after_failures.filter(|n| *n > 0);
        Ok(config)
    }

    pub fn metrics_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.metrics_port)
            .unwrap_or(DEFAULT_METRICS_PORT)
    }
}

/// Parse `"250ms"`, `"10s"`, `"2m"`, `"1h"`, or a bare number of seconds.
pub fn parse_duration(raw: &str) -> anyhow::Result<Duration> {
    let s = raw.trim();
    let (digits, unit): (&str, fn(u64) -> Duration) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, |m: u64| Duration::from_secs(m.saturating_mul(60)))
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, |h: u64| Duration::from_secs(h.saturating_mul(3600)))
    } else {
        (s, Duration::from_secs)
    };
    let value: u64 = digits
        .trim()
        .parse()
        .with_context(|| format!("invalid duration {raw:?}"))?;
    Ok(unit(value))
}

pub fn parse_nonzero_duration(field: &str, raw: &str) -> anyhow::Result<Duration> {
    let duration = parse_duration(raw).with_context(|| field.to_string())?;
    if duration.is_zero() {
        bail!("{field} must be greater than zero");
    }
    Ok(duration)
}
