//! Board Pulse
//!
//! Scrapes a discussion board's JSON catalog into SQLite with deduplicated,
//! idempotent inserts, and scores stored reply text for sentiment.
//!
//! Usage:
//!   board-pulse                # Run the scrape loop
//!   board-pulse --once        # Run a single ingestion cycle
//!   board-pulse --sentiment   # Run the sentiment scoring batch job
//!   board-pulse --stats       # Show storage statistics

use anyhow::Result;
use std::env;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod clean;
mod config;
mod db;
mod scraper;
mod sentiment;

/// Command-line arguments
struct Args {
    /// Run a single ingestion cycle instead of the loop
    once: bool,
    /// Run the sentiment scoring batch job
    sentiment: bool,
    /// Show storage statistics
    stats: bool,
    /// Config file path
    config_path: String,
    /// Show help
    help: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut result = Args {
            once: false,
            sentiment: false,
            stats: false,
            config_path: "config/settings.toml".to_string(),
            help: false,
        };

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--once" | "-1" => result.once = true,
                "--sentiment" | "-s" => result.sentiment = true,
                "--stats" | "--storage" => result.stats = true,
                "--config" | "-c" => {
                    i += 1;
                    if i < args.len() {
                        result.config_path = args[i].clone();
                    }
                }
                "--help" | "-h" => result.help = true,
                _ => {}
            }
            i += 1;
        }

        result
    }

    fn print_help() {
        println!("Board Pulse - board catalog scraping and sentiment scoring\n");
        println!("USAGE:");
        println!("  board-pulse [OPTIONS]\n");
        println!("MODES:");
        println!("  (default)         Run the scrape loop (poll interval from config)");
        println!("  --once, -1        Run a single ingestion cycle and exit");
        println!("  --sentiment, -s   Score unscored replies and exit");
        println!("  --stats           Show storage statistics\n");
        println!("OTHER:");
        println!("  --config, -c PATH Config file (default: config/settings.toml)");
        println!("  --help, -h        Show this help message");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.help {
        Args::print_help();
        return Ok(());
    }

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting board-pulse...");

    // Load configuration
    let config = config::Config::load(&args.config_path)?;
    info!("Loaded configuration for /{}/", config.scraper.board);

    // Initialize database
    let db = db::Database::new(&config.database.sqlite_path)?;
    db.run_migrations()?;
    info!("Database initialized");

    if args.stats {
        run_storage_stats(&db)
    } else if args.sentiment {
        run_sentiment_job(db, &config)
    } else if args.once {
        run_single_cycle(&config).await
    } else {
        run_scrape_loop(&config).await
    }
}

/// Show storage statistics
fn run_storage_stats(db: &db::Database) -> Result<()> {
    info!("Gathering storage statistics...");

    let stats = db.storage_stats()?;
    stats.print_report();

    Ok(())
}

/// Run the sentiment scoring batch job
fn run_sentiment_job(db: db::Database, config: &config::Config) -> Result<()> {
    info!("Starting sentiment scoring job...");

    let mut job = sentiment::SentimentJob::new(db, config.sentiment.batch_size);
    let stats = job.run()?;

    println!("\nScoring complete:");
    println!("  Replies scanned:  {}", stats.scanned);
    println!("  Newly scored:     {}", stats.scored);
    println!("  Already scored:   {}", stats.already_scored);

    Ok(())
}

/// Run exactly one ingestion cycle
async fn run_single_cycle(config: &config::Config) -> Result<()> {
    let scraper = scraper::BoardScraper::new(config)?;
    let summary = scraper.run_once().await?;

    info!(
        "Single cycle complete: {} new threads, {} new replies",
        summary.unique_threads, summary.unique_replies
    );

    Ok(())
}

/// Run the live scrape loop
async fn run_scrape_loop(config: &config::Config) -> Result<()> {
    let scraper = scraper::BoardScraper::new(config)?;

    info!(
        "Starting scrape loop with {}s interval",
        config.scraper.poll_interval_seconds
    );
    scraper.run_forever().await?;

    Ok(())
}
