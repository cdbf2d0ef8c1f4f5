//! Acquisition configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::Strategy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Hard deadline for one strategy attempt.
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,

    /// Jobs acquired concurrently; the rest wait in FIFO order.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    #[serde(default = "default_strategies")]
    pub strategies: Vec<Strategy>,

    /// Extra tries of the same strategy after a transient error or timeout.
    #[serde(default)]
    pub same_strategy_retries: u32,

    #[serde(default)]
    pub backoff: BackoffConfig,

    #[serde(default)]
    pub downloader: DownloaderConfig,
}

fn default_attempt_timeout() -> u64 {
    300
}

fn default_max_concurrent_jobs() -> usize {
    5
}

fn default_strategies() -> Vec<Strategy> {
    Strategy::DEFAULT_ORDER.to_vec()
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_secs: default_attempt_timeout(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            strategies: default_strategies(),
            same_strategy_retries: 0,
            backoff: BackoffConfig::default(),
            downloader: DownloaderConfig::default(),
        }
    }
}

impl AcquisitionConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

/// Exponential backoff between retryable failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Add up to 25% random jitter.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_initial_backoff() -> u64 {
    2000
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl BackoffConfig {
    /// Delay before the next step after the `retry`-th consecutive failure of a
    /// strategy (0-based): `initial * multiplier^retry`, capped.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let base = self.initial_backoff_ms as f64 * self.multiplier.powi(retry as i32);
        let delay_ms = base.min(self.max_backoff_ms as f64) as u64;

        let final_delay = if self.jitter {
            let jitter = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
            delay_ms + jitter
        } else {
            delay_ms
        };
        Duration::from_millis(final_delay)
    }

    /// Longest delay `delay_for_retry` can return.
    pub fn max_delay(&self) -> Duration {
        let cap = self.max_backoff_ms;
        let jitter = if self.jitter { cap / 4 } else { 0 };
        Duration::from_millis(cap + jitter)
    }
}

/// yt-dlp process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderConfig {
    #[serde(default = "default_binary")]
    pub binary: PathBuf,
    /// Where acquired files land; result references point inside it.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Appended to every invocation.
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Each attempt sends one of these, picked at random. Empty sends none.
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,
}

fn default_binary() -> PathBuf {
    PathBuf::from("yt-dlp")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            output_dir: default_output_dir(),
            extra_args: Vec::new(),
            user_agents: default_user_agents(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            jitter: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = AcquisitionConfig::default();
        assert_eq!(config.attempt_timeout_secs, 300);
        assert_eq!(config.max_concurrent_jobs, 5);
        assert_eq!(config.strategies.len(), 5);
        assert_eq!(config.same_strategy_retries, 0);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = no_jitter();
        assert_eq!(backoff.delay_for_retry(0), Duration::from_millis(2000));
        assert_eq!(backoff.delay_for_retry(1), Duration::from_millis(4000));
        assert_eq!(backoff.delay_for_retry(2), Duration::from_millis(8000));
        assert_eq!(backoff.delay_for_retry(10), Duration::from_millis(30_000));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let backoff = BackoffConfig::default();
        for _ in 0..50 {
            let delay = backoff.delay_for_retry(0);
            assert!(delay >= Duration::from_millis(2000));
            assert!(delay <= Duration::from_millis(2500));
        }
        assert_eq!(backoff.max_delay(), Duration::from_millis(37_500));
    }

    #[test]
    fn test_deserialize_strategy_subset() {
        let toml = r#"
            attempt_timeout_secs = 120
            strategies = ["direct", "credentialed"]

            [backoff]
            initial_backoff_ms = 500
        "#;
        let config: AcquisitionConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.attempt_timeout(), Duration::from_secs(120));
        assert_eq!(
            config.strategies,
            vec![Strategy::Direct, Strategy::Credentialed]
        );
        assert_eq!(config.backoff.initial_backoff_ms, 500);
        assert_eq!(config.backoff.max_backoff_ms, 30_000);
    }
}
