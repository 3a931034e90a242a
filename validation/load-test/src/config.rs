//! Configuration loading and management.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main test configuration loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Base URL every request path is appended to.
    pub host: String,
    /// Number of simulated users to run concurrently.
    pub users: u32,
    /// Users started per second during ramp-up (<= 0 starts all at once).
    #[serde(default = "default_spawn_rate")]
    pub spawn_rate: f64,
    pub duration_secs: u64,
    #[serde(default)]
    pub warmup_secs: u64,
    /// Stop after this many task invocations across all users.
    #[serde(default)]
    pub iterations: Option<u64>,
    #[serde(default)]
    pub wait_time: WaitTime,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub log_requests: bool, // Log all requests to a JSONL file for debugging
    /// Directory for request logs (default: `results`)
    #[serde(default)]
    pub results_dir: Option<PathBuf>,
}

fn default_spawn_rate() -> f64 {
    1.0
}

fn default_request_timeout() -> u64 {
    30
}

/// Seconds as a `Duration`, `None` for negative, NaN, infinite or overflowing values.
fn secs_to_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

/// Pause a simulated user takes between two task invocations.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WaitTime {
    /// Invoke the next task immediately
    #[default]
    None,
    /// Always wait the same amount
    Constant { secs: f64 },
    /// Wait a uniformly random amount in [min_secs, max_secs]
    Between { min_secs: f64, max_secs: f64 },
}

impl WaitTime {
    /// Draw the next pause. Values that are not a valid duration yield zero;
    /// `TestConfig::validate` rejects them up front.
    pub fn next_pause(&self, rng: &mut impl Rng) -> Duration {
        let secs = match *self {
            WaitTime::None => return Duration::ZERO,
            WaitTime::Constant { secs } => secs,
            WaitTime::Between { min_secs, max_secs } => {
                if !(min_secs.is_finite() && max_secs.is_finite()) || max_secs <= min_secs {
                    min_secs
                } else {
                    rng.gen_range(min_secs..=max_secs)
                }
            }
        };
        secs_to_duration(secs).unwrap_or_default()
    }

    fn validate(&self) -> anyhow::Result<()> {
        match *self {
            WaitTime::None => {}
            WaitTime::Constant { secs } => {
                if secs_to_duration(secs).is_none() {
                    anyhow::bail!("wait_time.secs must be a finite number >= 0, got {}", secs);
                }
            }
            WaitTime::Between { min_secs, max_secs } => {
                if secs_to_duration(min_secs).is_none()
                    || secs_to_duration(max_secs).is_none()
                    || max_secs < min_secs
                {
                    anyhow::bail!(
                        "wait_time requires finite 0 <= min_secs <= max_secs, got {}..{}",
                        min_secs,
                        max_secs
                    );
                }
            }
        }
        Ok(())
    }
}

impl TestConfig {
    /// Load configuration from YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TestConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Minimal configuration for a headless smoke run against `host`.
    pub fn quick(host: impl Into<String>, users: u32, requests: u64) -> Self {
        // Rough estimate: 10 req/s per user, never less than 5 seconds
        let estimated_duration = (requests as f64 / (10.0 * users.max(1) as f64)).max(5.0) as u64;

        Self {
            name: "quick".to_string(),
            description: "Quick smoke test".to_string(),
            host: host.into(),
            users,
            spawn_rate: users as f64,
            duration_secs: estimated_duration,
            warmup_secs: 0,
            iterations: Some(requests),
            wait_time: WaitTime::None,
            request_timeout_secs: default_request_timeout(),
            log_requests: false,
            results_dir: None,
        }
    }

    /// Delay between two user spawns, `None` to start every user at once.
    pub fn spawn_interval(&self) -> anyhow::Result<Option<Duration>> {
        if !self.spawn_rate.is_finite() {
            anyhow::bail!("spawn_rate must be a finite number, got {}", self.spawn_rate);
        }
        if self.spawn_rate <= 0.0 {
            return Ok(None);
        }
        secs_to_duration(1.0 / self.spawn_rate)
            .map(Some)
            .ok_or_else(|| anyhow::anyhow!("spawn_rate {} is too small", self.spawn_rate))
    }

    /// Directory request logs are written to.
    pub fn results_dir(&self) -> PathBuf {
        self.results_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("results"))
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.duration_secs == 0 {
            anyhow::bail!("duration_secs must be > 0");
        }
        if self.users == 0 {
            anyhow::bail!("users must be > 0");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be > 0");
        }
        if self.iterations == Some(0) {
            anyhow::bail!("iterations must be > 0 when set");
        }
        self.spawn_interval()?;

        let url = reqwest::Url::parse(&self.host)
            .map_err(|e| anyhow::anyhow!("invalid host '{}': {}", self.host, e))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            anyhow::bail!("host must use http or https, got '{}'", url.scheme());
        }

        self.wait_time.validate()
    }
}
