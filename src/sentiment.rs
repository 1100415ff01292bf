//! VADER sentiment scoring batch job
//!
//! Scans stored replies in fixed-size, id-ordered batches, scores the ones
//! without a `vader_analysis` row, and bulk-inserts the results one batch
//! per transaction. Reruns are cheap: already-scored ids are looked up per
//! batch and skipped, so a second pass over an unchanged table inserts
//! nothing.

use anyhow::Result;
use tracing::{debug, info};
use vader_sentiment::SentimentIntensityAnalyzer;

use crate::clean::clean_for_scoring;
use crate::db::{Database, SentimentRow};

/// Batch scoring job over the replies table.
pub struct SentimentJob {
    db: Database,
    batch_size: i64,
}

/// Counters from one scoring pass.
#[derive(Debug, Default)]
pub struct ScoreStats {
    pub scanned: usize,
    pub scored: usize,
    pub already_scored: usize,
}

impl SentimentJob {
    pub fn new(db: Database, batch_size: usize) -> Self {
        Self {
            db,
            batch_size: batch_size.max(1) as i64,
        }
    }

    /// Score every unscored reply, batch by batch.
    pub fn run(&mut self) -> Result<ScoreStats> {
        let analyzer = SentimentIntensityAnalyzer::new();
        let total = self.db.total_replies()?;

        info!(
            "Scoring replies: {} stored, batch size {}",
            total, self.batch_size
        );

        let mut stats = ScoreStats::default();
        let mut offset = 0i64;

        loop {
            let batch = self.db.replies_page(offset, self.batch_size)?;
            if batch.is_empty() {
                break;
            }

            let ids: Vec<i64> = batch.iter().map(|r| r.id).collect();
            let existing = self.db.existing_sentiment_ids(&ids)?;

            let mut rows = Vec::new();
            for reply in &batch {
                if existing.contains(&reply.id) {
                    stats.already_scored += 1;
                    continue;
                }

                let cleaned = clean_for_scoring(&reply.com);
                let compound = analyzer
                    .polarity_scores(&cleaned)
                    .get("compound")
                    .copied()
                    .unwrap_or(0.0);

                rows.push(SentimentRow {
                    id: reply.id,
                    sentiment_score: compound,
                    com: cleaned,
                });
            }

            if !rows.is_empty() {
                stats.scored += self.db.insert_sentiment(&rows)?;
            }

            stats.scanned += batch.len();
            offset += self.batch_size;
            debug!("Scored {}/{} replies", stats.scanned, total);
        }

        info!(
            "Scoring complete: {} scanned, {} scored, {} already present",
            stats.scanned, stats.scored, stats.already_scored
        );

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewReply;
    use tempfile::TempDir;

    fn seed_db(dir: &TempDir, bodies: &[&str]) -> Database {
        let mut db = Database::new(dir.path().join("test.db")).unwrap();
        db.run_migrations().unwrap();

        let replies: Vec<NewReply> = bodies
            .iter()
            .enumerate()
            .map(|(i, com)| NewReply {
                thread_no: 1,
                reply_no: 100 + i as i64,
                now: "01/01/26(Thu)00:00:00".to_string(),
                name: None,
                thread_sub: None,
                com: com.to_string(),
                country_name: None,
                scrape_time: "run1".to_string(),
            })
            .collect();
        db.commit_batch(&[], &replies).unwrap();
        db
    }

    #[test]
    fn test_scoring_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let db = seed_db(&dir, &["this is great", "this is awful", "&gt;kek"]);

        let mut job = SentimentJob::new(db, 2);
        let first = job.run().unwrap();
        assert_eq!(first.scored, 3);
        assert_eq!(first.already_scored, 0);

        let second = job.run().unwrap();
        assert_eq!(second.scored, 0);
        assert_eq!(second.already_scored, 3);
        assert_eq!(job.db.total_scored().unwrap(), 3);
    }

    #[test]
    fn test_compound_score_bounds_and_polarity() {
        let analyzer = SentimentIntensityAnalyzer::new();

        let happy = analyzer
            .polarity_scores("I love this, absolutely wonderful and amazing")
            .get("compound")
            .copied()
            .unwrap_or(0.0);
        let sad = analyzer
            .polarity_scores("this is terrible, I hate it")
            .get("compound")
            .copied()
            .unwrap_or(0.0);

        assert!(happy > 0.0 && happy <= 1.0);
        assert!(sad < 0.0 && sad >= -1.0);
    }

    #[test]
    fn test_scored_text_is_url_stripped_variant() {
        let dir = TempDir::new().unwrap();
        let db = seed_db(&dir, &["nice coin https://example.com/pump"]);

        let mut job = SentimentJob::new(db, 10);
        job.run().unwrap();

        // The snapshot stored alongside the score must be the cleaned text.
        let page = job.db.replies_page(0, 10).unwrap();
        let ids: Vec<i64> = page.iter().map(|r| r.id).collect();
        assert_eq!(job.db.existing_sentiment_ids(&ids).unwrap().len(), 1);
        assert_eq!(clean_for_scoring(&page[0].com), "nice coin ");
    }
}
