//! SQLite storage - deduplicated thread/reply rows plus sentiment results
//!
//! The uniqueness constraints on `threads.no` and `replies(thread_no,
//! reply_no)` are the real duplicate guard; existence lookups before staging
//! are an optimization. All ingestion inserts go through `INSERT OR IGNORE`
//! so a lost check-then-insert race is benign.

use anyhow::Result;
use rusqlite::{params, params_from_iter, Connection, TransactionBehavior};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Database handle. One handle per concurrent worker; never shared across
/// tasks (rusqlite connections are not Sync).
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (creating if needed) the database at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL for concurrent readers; busy_timeout so concurrent worker
        // commits queue instead of failing with SQLITE_BUSY.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(Duration::from_secs(10))?;

        Ok(Self { conn })
    }

    /// Create tables and indexes if they do not exist.
    pub fn run_migrations(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- One row per thread, keyed by the board-assigned post number.
            -- Rows are written once and never updated.
            CREATE TABLE IF NOT EXISTS threads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                no INTEGER NOT NULL UNIQUE,
                now TEXT NOT NULL,               -- board's own timestamp string
                name TEXT,
                sub TEXT,
                com TEXT,                        -- cleaned body text
                country_name TEXT,
                scrape_time TEXT NOT NULL        -- shared per-run stamp
            );

            CREATE INDEX IF NOT EXISTS idx_threads_scrape_time ON threads(scrape_time);

            -- One row per reply, keyed by (parent thread, reply number).
            CREATE TABLE IF NOT EXISTS replies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_no INTEGER NOT NULL,
                reply_no INTEGER NOT NULL,
                now TEXT NOT NULL,
                name TEXT,
                thread_sub TEXT,                 -- inherited from parent thread
                com TEXT,
                country_name TEXT,
                scrape_time TEXT NOT NULL,
                UNIQUE(thread_no, reply_no)
            );

            CREATE INDEX IF NOT EXISTS idx_replies_scrape_time ON replies(scrape_time);

            -- Sentiment results, at most one per reply, never recomputed.
            CREATE TABLE IF NOT EXISTS vader_analysis (
                id INTEGER PRIMARY KEY REFERENCES replies(id),
                sentiment_score REAL,
                com TEXT                         -- cleaned text snapshot scored
            );
            "#,
        )?;

        Ok(())
    }

    /// Point lookup: has this thread been persisted (any run)?
    pub fn thread_exists(&self, no: i64) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM threads WHERE no = ?1",
            params![no],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Point lookup: has this reply been persisted (any run)?
    pub fn reply_exists(&self, thread_no: i64, reply_no: i64) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM replies WHERE thread_no = ?1 AND reply_no = ?2",
            params![thread_no, reply_no],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Commit one worker's staged rows in a single transaction.
    ///
    /// All-or-nothing: if any statement fails the transaction rolls back on
    /// drop. Returns (threads_inserted, replies_inserted); rows skipped by
    /// OR IGNORE (duplicate key lost-race) count as zero.
    pub fn commit_batch(
        &mut self,
        threads: &[NewThread],
        replies: &[NewReply],
    ) -> Result<(usize, usize)> {
        // Immediate: take the write lock up front so concurrent worker
        // commits queue on busy_timeout instead of failing mid-transaction.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut threads_inserted = 0;
        let mut replies_inserted = 0;

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO threads (no, now, name, sub, com, country_name, scrape_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for t in threads {
                threads_inserted += stmt.execute(params![
                    t.no,
                    t.now,
                    t.name,
                    t.sub,
                    t.com,
                    t.country_name,
                    t.scrape_time,
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO replies
                 (thread_no, reply_no, now, name, thread_sub, com, country_name, scrape_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for r in replies {
                replies_inserted += stmt.execute(params![
                    r.thread_no,
                    r.reply_no,
                    r.now,
                    r.name,
                    r.thread_sub,
                    r.com,
                    r.country_name,
                    r.scrape_time,
                ])?;
            }
        }

        tx.commit()?;
        Ok((threads_inserted, replies_inserted))
    }

    /// Count distinct thread numbers stamped with this run's scrape_time.
    pub fn unique_threads_for(&self, scrape_time: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(DISTINCT no) FROM threads WHERE scrape_time = ?1",
            params![scrape_time],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Count distinct reply numbers stamped with this run's scrape_time.
    pub fn unique_replies_for(&self, scrape_time: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(DISTINCT reply_no) FROM replies WHERE scrape_time = ?1",
            params![scrape_time],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Housekeeping sweep: delete replies whose cleaned body is null or
    /// all-whitespace. Unconditional, run at the end of every cycle.
    pub fn delete_blank_replies(&self) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM replies
             WHERE com IS NULL
                OR TRIM(com, ' ' || char(9) || char(10) || char(13)) = ''",
            [],
        )?;
        Ok(deleted)
    }

    /// Running total of all threads ever stored.
    pub fn total_threads(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM threads", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Running total of all replies ever stored.
    pub fn total_replies(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM replies", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Cleaned body of a stored thread, if the row exists.
    pub fn thread_body(&self, no: i64) -> Result<Option<String>> {
        let result = self.conn.query_row(
            "SELECT com FROM threads WHERE no = ?1",
            params![no],
            |row| row.get(0),
        );
        match result {
            Ok(com) => Ok(com),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Subject a reply inherited from its parent thread, if the row exists.
    pub fn reply_thread_sub(&self, thread_no: i64, reply_no: i64) -> Result<Option<String>> {
        let result = self.conn.query_row(
            "SELECT thread_sub FROM replies WHERE thread_no = ?1 AND reply_no = ?2",
            params![thread_no, reply_no],
            |row| row.get(0),
        );
        match result {
            Ok(sub) => Ok(sub),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // === Sentiment scoring job queries ===

    /// One page of replies in iteration-stable order (by surrogate id).
    pub fn replies_page(&self, offset: i64, limit: i64) -> Result<Vec<ReplyRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, com FROM replies ORDER BY id LIMIT ?1 OFFSET ?2")?;

        let rows = stmt.query_map(params![limit, offset], |row| {
            Ok(ReplyRow {
                id: row.get(0)?,
                com: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| e.into())
    }

    /// Which of these reply ids already have a sentiment row?
    pub fn existing_sentiment_ids(&self, ids: &[i64]) -> Result<HashSet<i64>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT id FROM vader_analysis WHERE id IN ({})",
            placeholders
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let rows = stmt.query_map(params_from_iter(ids.iter()), |row| row.get::<_, i64>(0))?;

        rows.collect::<std::result::Result<HashSet<_>, _>>()
            .map_err(|e| e.into())
    }

    /// Bulk-insert one page of sentiment results in a single transaction.
    pub fn insert_sentiment(&mut self, rows: &[SentimentRow]) -> Result<usize> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut inserted = 0;

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO vader_analysis (id, sentiment_score, com)
                 VALUES (?1, ?2, ?3)",
            )?;
            for row in rows {
                inserted += stmt.execute(params![row.id, row.sentiment_score, row.com])?;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    /// Running total of scored replies.
    pub fn total_scored(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM vader_analysis", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Current storage statistics for the --stats report.
    pub fn storage_stats(&self) -> Result<StorageStats> {
        let page_count: i64 = self
            .conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = self
            .conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))?;

        Ok(StorageStats {
            thread_count: self.total_threads()?,
            reply_count: self.total_replies()?,
            scored_count: self.total_scored()?,
            db_size_bytes: page_count * page_size,
        })
    }
}

/// A thread row staged for insertion.
#[derive(Debug, Clone)]
pub struct NewThread {
    pub no: i64,
    pub now: String,
    pub name: Option<String>,
    pub sub: Option<String>,
    pub com: String,
    pub country_name: Option<String>,
    pub scrape_time: String,
}

/// A reply row staged for insertion.
#[derive(Debug, Clone)]
pub struct NewReply {
    pub thread_no: i64,
    pub reply_no: i64,
    pub now: String,
    pub name: Option<String>,
    pub thread_sub: Option<String>,
    pub com: String,
    pub country_name: Option<String>,
    pub scrape_time: String,
}

/// A persisted reply as seen by the scoring job.
#[derive(Debug, Clone)]
pub struct ReplyRow {
    pub id: i64,
    pub com: String,
}

/// A sentiment result staged for insertion.
#[derive(Debug, Clone)]
pub struct SentimentRow {
    pub id: i64,
    pub sentiment_score: f64,
    pub com: String,
}

/// Totals for the --stats report.
#[derive(Debug)]
pub struct StorageStats {
    pub thread_count: i64,
    pub reply_count: i64,
    pub scored_count: i64,
    pub db_size_bytes: i64,
}

impl StorageStats {
    pub fn print_report(&self) {
        println!("\n{}", "=".repeat(50));
        println!("STORAGE STATISTICS");
        println!("{}", "=".repeat(50));
        println!("  Threads:        {:>10}", self.thread_count);
        println!("  Replies:        {:>10}", self.reply_count);
        println!(
            "  Scored replies: {:>10} ({:.1}%)",
            self.scored_count,
            self.scored_count as f64 / self.reply_count.max(1) as f64 * 100.0
        );
        println!("  Database size:  {:>10}", format_bytes(self.db_size_bytes));
    }
}

fn format_bytes(bytes: i64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / 1024.0 / 1024.0)
    } else {
        format!("{:.2} GB", bytes as f64 / 1024.0 / 1024.0 / 1024.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_db(dir: &TempDir) -> Database {
        let db = Database::new(dir.path().join("test.db")).unwrap();
        db.run_migrations().unwrap();
        db
    }

    fn thread(no: i64, com: &str, stamp: &str) -> NewThread {
        NewThread {
            no,
            now: "01/01/26(Thu)00:00:00".to_string(),
            name: Some("Anonymous".to_string()),
            sub: None,
            com: com.to_string(),
            country_name: None,
            scrape_time: stamp.to_string(),
        }
    }

    fn reply(thread_no: i64, reply_no: i64, com: &str, stamp: &str) -> NewReply {
        NewReply {
            thread_no,
            reply_no,
            now: "01/01/26(Thu)00:01:00".to_string(),
            name: Some("Anonymous".to_string()),
            thread_sub: None,
            com: com.to_string(),
            country_name: None,
            scrape_time: stamp.to_string(),
        }
    }

    #[test]
    fn test_insert_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut db = test_db(&dir);

        let threads = vec![thread(1, "hello", "run1")];
        let replies = vec![reply(1, 2, "world", "run1")];

        let (t, r) = db.commit_batch(&threads, &replies).unwrap();
        assert_eq!((t, r), (1, 1));

        // Second run against the same snapshot inserts nothing.
        let (t, r) = db.commit_batch(&threads, &replies).unwrap();
        assert_eq!((t, r), (0, 0));
        assert_eq!(db.total_threads().unwrap(), 1);
        assert_eq!(db.total_replies().unwrap(), 1);
    }

    #[test]
    fn test_existence_lookups() {
        let dir = TempDir::new().unwrap();
        let mut db = test_db(&dir);

        assert!(!db.thread_exists(1).unwrap());
        assert!(!db.reply_exists(1, 2).unwrap());

        db.commit_batch(
            &[thread(1, "hello", "run1")],
            &[reply(1, 2, "world", "run1")],
        )
        .unwrap();

        assert!(db.thread_exists(1).unwrap());
        assert!(db.reply_exists(1, 2).unwrap());
        assert!(!db.reply_exists(1, 3).unwrap());
    }

    #[test]
    fn test_unique_counts_scoped_by_run_stamp() {
        let dir = TempDir::new().unwrap();
        let mut db = test_db(&dir);

        db.commit_batch(
            &[thread(1, "a", "run1"), thread(2, "b", "run1")],
            &[reply(1, 10, "x", "run1")],
        )
        .unwrap();
        db.commit_batch(&[thread(3, "c", "run2")], &[]).unwrap();

        assert_eq!(db.unique_threads_for("run1").unwrap(), 2);
        assert_eq!(db.unique_replies_for("run1").unwrap(), 1);
        assert_eq!(db.unique_threads_for("run2").unwrap(), 1);
        assert_eq!(db.unique_replies_for("run2").unwrap(), 0);
        assert_eq!(db.total_threads().unwrap(), 3);
    }

    #[test]
    fn test_cleanup_sweep_removes_blank_replies() {
        let dir = TempDir::new().unwrap();
        let mut db = test_db(&dir);

        db.commit_batch(
            &[],
            &[
                reply(1, 10, "kept", "run1"),
                reply(1, 11, "", "run1"),
                reply(1, 12, "   ", "run1"),
                reply(1, 13, " \t\n ", "run1"),
            ],
        )
        .unwrap();

        let deleted = db.delete_blank_replies().unwrap();
        assert_eq!(deleted, 3);
        assert_eq!(db.total_replies().unwrap(), 1);

        // Sweep is idempotent.
        assert_eq!(db.delete_blank_replies().unwrap(), 0);
    }

    #[test]
    fn test_sentiment_rows_never_recomputed() {
        let dir = TempDir::new().unwrap();
        let mut db = test_db(&dir);

        db.commit_batch(&[], &[reply(1, 10, "great thread", "run1")])
            .unwrap();

        let page = db.replies_page(0, 100).unwrap();
        assert_eq!(page.len(), 1);
        let id = page[0].id;

        assert!(db.existing_sentiment_ids(&[id]).unwrap().is_empty());

        let row = SentimentRow {
            id,
            sentiment_score: 0.6,
            com: "great thread".to_string(),
        };
        assert_eq!(db.insert_sentiment(&[row.clone()]).unwrap(), 1);
        assert_eq!(db.insert_sentiment(&[row]).unwrap(), 0);
        assert!(db.existing_sentiment_ids(&[id]).unwrap().contains(&id));
        assert_eq!(db.total_scored().unwrap(), 1);
    }

    #[test]
    fn test_replies_page_order_is_stable() {
        let dir = TempDir::new().unwrap();
        let mut db = test_db(&dir);

        db.commit_batch(
            &[],
            &[
                reply(1, 10, "first", "run1"),
                reply(1, 11, "second", "run1"),
                reply(1, 12, "third", "run1"),
            ],
        )
        .unwrap();

        let first = db.replies_page(0, 2).unwrap();
        let rest = db.replies_page(2, 2).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(rest.len(), 1);
        assert!(first[0].id < first[1].id);
        assert!(first[1].id < rest[0].id);
    }
}
