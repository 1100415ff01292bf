//! Catalog scraper - fetch, fan-out, deduplicated persistence
//!
//! One run fetches a single catalog snapshot (all pages in one request),
//! dispatches one worker per distinct thread through a bounded pool, and
//! after every worker has joined runs the end-of-run reporting: unique
//! counts for this run's stamp, the blank-reply cleanup sweep, running
//! totals, and the run summary written to the log sink and stdout.

use anyhow::{anyhow, Result};
use governor::{Quota, RateLimiter as GovRateLimiter};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::io::Write;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::clean::clean_text;
use crate::config::Config;
use crate::db::{Database, NewReply, NewThread};

const API_BASE: &str = "https://a.4cdn.org";

/// Catalog scraper and run orchestrator.
pub struct BoardScraper {
    client: Client,
    rate_limiter: GovRateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
    board: String,
    poll_interval: Duration,
    run_timeout: Duration,
    workers: usize,
    db_path: String,
    summary_path: String,
}

impl BoardScraper {
    /// Create new scraper instance from configuration.
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .gzip(true)
            .user_agent("board-pulse/0.1 (sentiment research)")
            .build()?;

        let quota =
            Quota::per_second(NonZeroU32::new(config.scraper.rate_limit_per_second.max(1)).unwrap());
        let rate_limiter = GovRateLimiter::direct(quota);

        Ok(Self {
            client,
            rate_limiter,
            board: config.scraper.board.clone(),
            poll_interval: Duration::from_secs(config.scraper.poll_interval_seconds),
            run_timeout: Duration::from_secs(config.scraper.run_timeout_seconds),
            workers: config.scraper.workers,
            db_path: config.database.sqlite_path.clone(),
            summary_path: config.log.summary_path.clone(),
        })
    }

    /// Run scrape cycles forever. A failed cycle is logged and retried on
    /// the next poll; the data it missed is picked up then.
    pub async fn run_forever(&self) -> Result<()> {
        info!("Starting catalog scraper for /{}/", self.board);
        info!("Poll interval: {}s", self.poll_interval.as_secs());

        loop {
            match self.run_once().await {
                Ok(summary) => {
                    info!(
                        "Run complete: {} new threads (total {}), {} new replies (total {}), {} failed",
                        summary.unique_threads,
                        summary.total_threads,
                        summary.unique_replies,
                        summary.total_replies,
                        summary.failed_threads,
                    );
                }
                Err(e) => {
                    warn!("Scrape cycle error: {}", e);
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Run one ingestion cycle under the per-run deadline.
    pub async fn run_once(&self) -> Result<RunSummary> {
        match tokio::time::timeout(self.run_timeout, self.run_cycle()).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "run exceeded deadline of {}s",
                self.run_timeout.as_secs()
            )),
        }
    }

    async fn run_cycle(&self) -> Result<RunSummary> {
        let start = Instant::now();
        let scrape_time = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

        // Fetch failure is fatal for the run: no workers are dispatched.
        let catalog = self.fetch_catalog().await?;

        // One dispatch per distinct thread number in the snapshot.
        let mut seen = HashSet::new();
        let threads: Vec<CatalogThread> = catalog
            .into_iter()
            .flat_map(|page| page.threads)
            .filter(|t| seen.insert(t.no))
            .collect();

        debug!("Snapshot contains {} distinct threads", threads.len());

        let outcome = ingest_threads(&self.db_path, threads, &scrape_time, self.workers).await;

        // Reporting runs strictly after the join barrier, on a fresh
        // connection, so it sees every worker's committed rows.
        let db = Database::new(&self.db_path)?;
        let unique_threads = db.unique_threads_for(&scrape_time)?;
        let unique_replies = db.unique_replies_for(&scrape_time)?;

        let swept = db.delete_blank_replies()?;
        if swept > 0 {
            info!("Cleanup sweep removed {} blank replies", swept);
        }

        let summary = RunSummary {
            completed_at: scrape_time,
            unique_threads,
            unique_replies,
            total_threads: db.total_threads()?,
            total_replies: db.total_replies()?,
            failed_threads: outcome.failed,
            elapsed: start.elapsed(),
        };

        self.write_summary(&summary)?;

        Ok(summary)
    }

    /// Fetch and decode one catalog snapshot.
    async fn fetch_catalog(&self) -> Result<Vec<CatalogPage>> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/{}/catalog.json", API_BASE, self.board);
        debug!("Fetching catalog: {}", url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow!("Catalog fetch failed: {}", response.status()));
        }

        let catalog: Vec<CatalogPage> = response.json().await?;
        Ok(catalog)
    }

    /// Append the run summary to the durable log and echo it to stdout.
    fn write_summary(&self, summary: &RunSummary) -> Result<()> {
        let report = summary.report();

        if let Some(parent) = std::path::Path::new(&self.summary_path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.summary_path)?;
        writeln!(file, "\n{}", report)?;
        writeln!(file, "{}", "-".repeat(53))?;

        println!("{}", report);
        Ok(())
    }
}

/// Outcome of the worker fan-out, counted at the join barrier.
#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub new_threads: usize,
    pub new_replies: usize,
    pub failed: usize,
}

/// Fan one worker out per thread, bounded to `workers` concurrent tasks.
///
/// Each worker opens its own database connection; a failed thread is logged
/// and skipped without aborting the others.
pub async fn ingest_threads(
    db_path: &str,
    threads: Vec<CatalogThread>,
    scrape_time: &str,
    workers: usize,
) -> IngestOutcome {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut handles = Vec::with_capacity(threads.len());

    for thread in threads {
        let semaphore = semaphore.clone();
        let db_path = db_path.to_string();
        let scrape_time = scrape_time.to_string();
        let no = thread.no;

        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await?;
            tokio::task::spawn_blocking(move || {
                let mut db = Database::new(&db_path)?;
                process_thread(&mut db, &thread, &scrape_time)
            })
            .await?
        });

        handles.push((no, handle));
    }

    let mut outcome = IngestOutcome::default();
    for (no, handle) in handles {
        match handle.await {
            Ok(Ok((t, r))) => {
                outcome.new_threads += t;
                outcome.new_replies += r;
            }
            Ok(Err(e)) => {
                outcome.failed += 1;
                warn!("Thread {} failed, retrying next run: {}", no, e);
            }
            Err(e) => {
                outcome.failed += 1;
                warn!("Worker for thread {} panicked: {}", no, e);
            }
        }
    }

    outcome
}

/// One worker invocation: normalize, check existence, stage, commit.
///
/// Replies inherit the parent thread's subject since the API gives them
/// none of their own.
fn process_thread(
    db: &mut Database,
    thread: &CatalogThread,
    scrape_time: &str,
) -> Result<(usize, usize)> {
    let mut new_threads = Vec::new();
    let mut new_replies = Vec::new();

    if !db.thread_exists(thread.no)? {
        new_threads.push(NewThread {
            no: thread.no,
            now: thread.now.clone(),
            name: thread.name.clone(),
            sub: thread.sub.clone(),
            com: clean_text(thread.com.as_deref().unwrap_or("")),
            country_name: thread.country.clone(),
            scrape_time: scrape_time.to_string(),
        });
    }

    for reply in &thread.last_replies {
        if db.reply_exists(thread.no, reply.no)? {
            continue;
        }
        new_replies.push(NewReply {
            thread_no: thread.no,
            reply_no: reply.no,
            now: reply.now.clone(),
            name: reply.name.clone(),
            thread_sub: thread.sub.clone(),
            com: clean_text(reply.com.as_deref().unwrap_or("")),
            country_name: reply.country.clone(),
            scrape_time: scrape_time.to_string(),
        });
    }

    db.commit_batch(&new_threads, &new_replies)
}

/// Summary of one completed run.
#[derive(Debug)]
pub struct RunSummary {
    pub completed_at: String,
    pub unique_threads: i64,
    pub unique_replies: i64,
    pub total_threads: i64,
    pub total_replies: i64,
    pub failed_threads: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn report(&self) -> String {
        format!(
            "Run completed at {}.\n\
             Entered {} unique thread numbers. Total = {}.\n\
             Entered {} unique reply numbers. Total = {}.\n\
             Run completed in {}.",
            self.completed_at,
            self.unique_threads,
            self.total_threads,
            self.unique_replies,
            self.total_replies,
            format_elapsed(self.elapsed),
        )
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let minutes = (secs / 60.0) as u64;
    format!("{} minutes and {:.2} seconds", minutes, secs % 60.0)
}

// === API Response Types ===
//
// Decoded eagerly so a malformed snapshot fails the run up front instead of
// deep inside a worker.

#[derive(Debug, Deserialize)]
pub struct CatalogPage {
    #[serde(default)]
    pub page: i32,
    pub threads: Vec<CatalogThread>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogThread {
    pub no: i64,
    pub now: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub com: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub last_replies: Vec<CatalogReply>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogReply {
    pub no: i64,
    pub now: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub com: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}
