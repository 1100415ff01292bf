//! Configuration loading and management

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub scraper: ScraperConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sentiment: SentimentConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize)]
pub struct ScraperConfig {
    /// Target board identifier, e.g. "pol".
    pub board: String,
    pub poll_interval_seconds: u64,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_second: u32,
    /// Worker-pool size for the per-thread fan-out.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Hard deadline for one ingestion cycle.
    #[serde(default = "default_run_timeout")]
    pub run_timeout_seconds: u64,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    pub sqlite_path: String,
}

#[derive(Debug, Deserialize)]
pub struct SentimentConfig {
    /// Replies scored per transaction by the batch job.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Deserialize)]
pub struct LogConfig {
    /// Append-only run-summary file.
    #[serde(default = "default_summary_path")]
    pub summary_path: String,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            summary_path: default_summary_path(),
        }
    }
}

fn default_rate_limit() -> u32 {
    1
}

fn default_workers() -> usize {
    8
}

fn default_run_timeout() -> u64 {
    300
}

fn default_batch_size() -> usize {
    1000
}

fn default_summary_path() -> String {
    "data/run_summary.log".to_string()
}

impl Config {
    /// Load configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config: Config = toml::from_str(
            r#"
            [scraper]
            board = "pol"
            poll_interval_seconds = 300

            [database]
            sqlite_path = "data/test.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.scraper.workers, 8);
        assert_eq!(config.scraper.rate_limit_per_second, 1);
        assert_eq!(config.scraper.run_timeout_seconds, 300);
        assert_eq!(config.sentiment.batch_size, 1000);
        assert_eq!(config.log.summary_path, "data/run_summary.log");
    }

    #[test]
    fn test_explicit_values_override_defaults() {
        let config: Config = toml::from_str(
            r#"
            [scraper]
            board = "biz"
            poll_interval_seconds = 60
            workers = 4
            run_timeout_seconds = 120

            [database]
            sqlite_path = "x.db"

            [sentiment]
            batch_size = 50

            [log]
            summary_path = "out/summary.txt"
            "#,
        )
        .unwrap();

        assert_eq!(config.scraper.board, "biz");
        assert_eq!(config.scraper.workers, 4);
        assert_eq!(config.sentiment.batch_size, 50);
        assert_eq!(config.log.summary_path, "out/summary.txt");
    }
}
