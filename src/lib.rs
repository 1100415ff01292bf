//! Board Pulse Library
//!
//! Core functionality for scraping a board catalog into SQLite and scoring
//! stored replies for sentiment.

pub mod clean;
pub mod config;
pub mod db;
pub mod scraper;
pub mod sentiment;

pub use config::Config;
pub use db::Database;
pub use scraper::BoardScraper;
pub use sentiment::SentimentJob;
