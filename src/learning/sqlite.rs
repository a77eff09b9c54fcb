//! SQLite-backed pattern store
//!
//! Four tables: `debates`, `agent_positions`, `market_snapshots` and
//! `lessons_learned`. The schema is created on connect if missing.
//!
//! Validations are serialized through one async lock per store and each runs
//! in one transaction. The debate row is only updated while its status is
//! still NULL, and the pattern fold is a single `INSERT ... ON CONFLICT DO
//! UPDATE` on the unique (prediction, condition) index. Other writers on the
//! same file wait up to `BUSY_TIMEOUT` for the write lock.

use super::{
    assess, round2, AccuracyPoint, AgentPosition, Assessment, DebateDetails, DebateSummary,
    LearnedPattern, MarketSnapshot, NewDebate, PatternStore, ValidationOutcome, ValidationStats,
    ValidationStatus, DEBATE_ROUNDS,
};
use crate::error::ResearchError;
use crate::models::Stance;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: [&str; 5] = [
    r#"
    CREATE TABLE IF NOT EXISTS debates (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp DATETIME NOT NULL,
        final_recommendation TEXT,
        consensus_score REAL,
        session_cost REAL,
        debate_rounds INTEGER DEFAULT 3,
        validation_status TEXT,
        validation_date DATETIME,
        validation_accuracy REAL,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS agent_positions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        debate_id INTEGER NOT NULL,
        agent_role TEXT NOT NULL,
        round_number INTEGER NOT NULL,
        position TEXT NOT NULL,
        confidence REAL,
        reasoning TEXT,
        challenges TEXT,
        responses TEXT,
        FOREIGN KEY (debate_id) REFERENCES debates(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS market_snapshots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        debate_id INTEGER NOT NULL,
        mortgage_rate REAL,
        home_price_index REAL,
        rate_12mo_avg REAL,
        price_yoy_change REAL,
        snapshot_date DATETIME NOT NULL,
        FOREIGN KEY (debate_id) REFERENCES debates(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS lessons_learned (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        debate_id INTEGER NOT NULL,
        pattern_description TEXT NOT NULL,
        prediction_type TEXT NOT NULL,
        condition_description TEXT NOT NULL,
        accuracy_observed REAL NOT NULL,
        times_observed INTEGER NOT NULL DEFAULT 1,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        last_updated DATETIME DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY (debate_id) REFERENCES debates(id)
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_lessons_pattern
    ON lessons_learned (prediction_type, condition_description)
    "#,
];

pub struct SqlitePatternStore {
    pool: SqlitePool,
    validation_lock: Mutex<()>,
}

impl SqlitePatternStore {
    /// Connect and make sure the schema exists. `sqlite::memory:` keeps a
    /// single pinned connection so the database survives between queries.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| ResearchError::ConfigError(format!("Invalid DATABASE_URL: {}", e)))?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool_options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| ResearchError::database("Failed to open pattern store", e))?;

        let store = Self {
            pool,
            validation_lock: Mutex::new(()),
        };
        store.ensure_schema().await?;
        info!(url = %database_url, "Pattern store ready");
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| ResearchError::database("Failed to initialize pattern store schema", e))?;
        }
        Ok(())
    }

    fn summary_from_row(row: &SqliteRow) -> Result<DebateSummary> {
        let get_err = |e| ResearchError::database("Malformed debate row", e);
        let status: Option<String> = row.try_get("validation_status").map_err(get_err)?;

        Ok(DebateSummary {
            id: row.try_get("id").map_err(get_err)?,
            created_at: row.try_get("timestamp").map_err(get_err)?,
            recommendation: row
                .try_get::<Option<String>, _>("final_recommendation")
                .map_err(get_err)?
                .unwrap_or_default(),
            consensus_score: row
                .try_get::<Option<f64>, _>("consensus_score")
                .map_err(get_err)?
                .unwrap_or(0.0),
            session_cost: row
                .try_get::<Option<f64>, _>("session_cost")
                .map_err(get_err)?
                .unwrap_or(0.0),
            debate_rounds: row
                .try_get::<Option<i64>, _>("debate_rounds")
                .map_err(get_err)?
                .unwrap_or(DEBATE_ROUNDS),
            validation_status: status.as_deref().and_then(ValidationStatus::from_db),
            validation_accuracy: row.try_get("validation_accuracy").map_err(get_err)?,
            validation_date: row.try_get("validation_date").map_err(get_err)?,
        })
    }

    fn snapshot_from_row(row: &SqliteRow) -> Result<MarketSnapshot> {
        let get_err = |e| ResearchError::database("Malformed snapshot row", e);
        Ok(MarketSnapshot {
            mortgage_rate: row.try_get("mortgage_rate").map_err(get_err)?,
            home_price_index: row.try_get("home_price_index").map_err(get_err)?,
            rate_12mo_avg: row.try_get("rate_12mo_avg").map_err(get_err)?,
            price_yoy_change: row.try_get("price_yoy_change").map_err(get_err)?,
            snapshot_date: row.try_get("snapshot_date").map_err(get_err)?,
        })
    }

    fn position_from_row(row: &SqliteRow) -> Result<AgentPosition> {
        let get_err = |e| ResearchError::database("Malformed position row", e);
        Ok(AgentPosition {
            role: row.try_get("agent_role").map_err(get_err)?,
            round: row.try_get("round_number").map_err(get_err)?,
            position: row.try_get("position").map_err(get_err)?,
            confidence: row.try_get("confidence").map_err(get_err)?,
            reasoning: row.try_get("reasoning").map_err(get_err)?,
            challenges: row.try_get("challenges").map_err(get_err)?,
            responses: row.try_get("responses").map_err(get_err)?,
        })
    }

    fn pattern_from_row(row: &SqliteRow) -> Result<LearnedPattern> {
        let get_err = |e| ResearchError::database("Malformed pattern row", e);
        let prediction: String = row.try_get("prediction_type").map_err(get_err)?;
        Ok(LearnedPattern {
            description: row.try_get("pattern_description").map_err(get_err)?,
            prediction: Stance::from_text(&prediction),
            condition: row.try_get("condition_description").map_err(get_err)?,
            accuracy: row.try_get("accuracy_observed").map_err(get_err)?,
            observations: row.try_get("times_observed").map_err(get_err)?,
        })
    }
}

#[async_trait]
impl PatternStore for SqlitePatternStore {
    async fn save_debate(&self, debate: &NewDebate) -> Result<i64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ResearchError::database("Failed to begin save", e))?;

        let debate_id = sqlx::query(
            r#"
            INSERT INTO debates (timestamp, final_recommendation, consensus_score, session_cost, debate_rounds)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(Utc::now())
        .bind(&debate.recommendation)
        .bind(debate.consensus_score)
        .bind(debate.session_cost)
        .bind(DEBATE_ROUNDS)
        .execute(&mut *tx)
        .await
        .map_err(|e| ResearchError::database("Failed to insert debate", e))?
        .last_insert_rowid();

        for position in &debate.positions {
            sqlx::query(
                r#"
                INSERT INTO agent_positions (
                    debate_id, agent_role, round_number, position,
                    confidence, reasoning, challenges, responses
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(debate_id)
            .bind(&position.role)
            .bind(position.round)
            .bind(&position.position)
            .bind(position.confidence)
            .bind(&position.reasoning)
            .bind(&position.challenges)
            .bind(&position.responses)
            .execute(&mut *tx)
            .await
            .map_err(|e| ResearchError::database("Failed to insert agent position", e))?;
        }

        let snapshot = &debate.snapshot;
        sqlx::query(
            r#"
            INSERT INTO market_snapshots (
                debate_id, mortgage_rate, home_price_index,
                rate_12mo_avg, price_yoy_change, snapshot_date
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(debate_id)
        .bind(snapshot.mortgage_rate)
        .bind(snapshot.home_price_index)
        .bind(snapshot.rate_12mo_avg)
        .bind(snapshot.price_yoy_change)
        .bind(snapshot.snapshot_date)
        .execute(&mut *tx)
        .await
        .map_err(|e| ResearchError::database("Failed to insert market snapshot", e))?;

        tx.commit()
            .await
            .map_err(|e| ResearchError::database("Failed to commit debate", e))?;

        debug!(debate_id, positions = debate.positions.len(), "Debate saved");
        Ok(debate_id)
    }

    async fn debate_details(&self, debate_id: i64) -> Result<Option<DebateDetails>> {
        let Some(row) = sqlx::query("SELECT * FROM debates WHERE id = ?")
            .bind(debate_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ResearchError::database("Failed to load debate", e))?
        else {
            return Ok(None);
        };
        let debate = Self::summary_from_row(&row)?;

        let positions = sqlx::query(
            "SELECT * FROM agent_positions WHERE debate_id = ? ORDER BY round_number, id",
        )
        .bind(debate_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ResearchError::database("Failed to load agent positions", e))?
        .iter()
        .map(Self::position_from_row)
        .collect::<Result<Vec<_>>>()?;

        let snapshot = sqlx::query("SELECT * FROM market_snapshots WHERE debate_id = ? LIMIT 1")
            .bind(debate_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ResearchError::database("Failed to load market snapshot", e))?
            .as_ref()
            .map(Self::snapshot_from_row)
            .transpose()?;

        Ok(Some(DebateDetails {
            debate,
            positions,
            snapshot,
        }))
    }

    async fn recent_debates(&self, limit: usize) -> Result<Vec<DebateSummary>> {
        sqlx::query("SELECT * FROM debates ORDER BY timestamp DESC, id DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ResearchError::database("Failed to load recent debates", e))?
            .iter()
            .map(Self::summary_from_row)
            .collect()
    }

    async fn validate(&self, debate_id: i64, observed_rate: f64) -> Result<ValidationOutcome> {
        // a deferred read-then-write transaction cannot upgrade while
        // another one holds the read lock
        let _guard = self.validation_lock.lock().await;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ResearchError::database("Failed to begin validation", e))?;

        let Some(row) = sqlx::query("SELECT * FROM debates WHERE id = ?")
            .bind(debate_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| ResearchError::database("Failed to load debate", e))?
        else {
            return Ok(ValidationOutcome::insufficient_data());
        };
        let debate = Self::summary_from_row(&row)?;

        let snapshot = sqlx::query("SELECT * FROM market_snapshots WHERE debate_id = ? LIMIT 1")
            .bind(debate_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| ResearchError::database("Failed to load market snapshot", e))?
            .as_ref()
            .map(Self::snapshot_from_row)
            .transpose()?;

        let (outcome, prediction, trend) = match assess(&debate, snapshot.as_ref(), observed_rate) {
            Assessment::Insufficient => return Ok(ValidationOutcome::insufficient_data()),
            Assessment::AlreadyValidated(outcome) => return Ok(outcome),
            Assessment::Scored {
                outcome,
                prediction,
                trend,
            } => (outcome, prediction, trend),
        };

        let now: DateTime<Utc> = Utc::now();
        let updated = sqlx::query(
            r#"
            UPDATE debates
            SET validation_status = ?, validation_date = ?, validation_accuracy = ?
            WHERE id = ? AND validation_status IS NULL
            "#,
        )
        .bind(outcome.status.as_str())
        .bind(now)
        .bind(outcome.accuracy)
        .bind(debate_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| ResearchError::database("Failed to record validation", e))?
        .rows_affected();

        if updated == 0 {
            // validated concurrently; leave the pattern alone
            return Ok(ValidationOutcome {
                newly_validated: false,
                ..outcome
            });
        }

        sqlx::query(
            r#"
            INSERT INTO lessons_learned (
                debate_id, pattern_description, prediction_type,
                condition_description, accuracy_observed, times_observed, last_updated
            ) VALUES (?, ?, ?, ?, ?, 1, ?)
            ON CONFLICT (prediction_type, condition_description) DO UPDATE SET
                accuracy_observed = (lessons_learned.accuracy_observed * lessons_learned.times_observed
                                     + excluded.accuracy_observed) / (lessons_learned.times_observed + 1),
                times_observed = lessons_learned.times_observed + 1,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(debate_id)
        .bind(trend.pattern_description(prediction))
        .bind(prediction.as_str())
        .bind(trend.condition_description())
        .bind(outcome.accuracy)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| ResearchError::database("Failed to update learned pattern", e))?;

        tx.commit()
            .await
            .map_err(|e| ResearchError::database("Failed to commit validation", e))?;

        info!(
            debate_id,
            status = %outcome.status,
            accuracy = outcome.accuracy,
            "Debate validated"
        );
        Ok(outcome)
    }

    async fn top_patterns(&self, min_observations: i64, limit: usize) -> Result<Vec<LearnedPattern>> {
        sqlx::query(
            r#"
            SELECT pattern_description, prediction_type, condition_description,
                   accuracy_observed, times_observed
            FROM lessons_learned
            WHERE times_observed >= ?
            ORDER BY accuracy_observed DESC, times_observed DESC
            LIMIT ?
            "#,
        )
        .bind(min_observations)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ResearchError::database("Failed to load learned patterns", e))?
        .iter()
        .map(Self::pattern_from_row)
        .collect()
    }

    async fn validation_stats(&self) -> Result<ValidationStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_validated,
                AVG(validation_accuracy) AS avg_accuracy,
                SUM(CASE WHEN validation_status = 'correct' THEN 1 ELSE 0 END) AS correct_count
            FROM debates
            WHERE validation_status IS NOT NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ResearchError::database("Failed to load validation stats", e))?;

        let get_err = |e| ResearchError::database("Malformed stats row", e);
        let total: i64 = row.try_get("total_validated").map_err(get_err)?;
        let avg: Option<f64> = row.try_get("avg_accuracy").map_err(get_err)?;
        let correct: Option<i64> = row.try_get("correct_count").map_err(get_err)?;
        let correct = correct.unwrap_or(0);

        Ok(ValidationStats {
            total_validated: total,
            avg_accuracy: avg.map(round2).unwrap_or(0.0),
            correct_count: correct,
            accuracy_rate: if total > 0 {
                round2(correct as f64 / total as f64 * 100.0)
            } else {
                0.0
            },
        })
    }

    async fn accuracy_trend(&self) -> Result<Vec<AccuracyPoint>> {
        let rows = sqlx::query(
            r#"
            SELECT
                timestamp,
                COALESCE(validation_accuracy, 50.0) AS accuracy,
                COALESCE(validation_status, 'pending') AS status,
                final_recommendation
            FROM debates
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ResearchError::database("Failed to load accuracy trend", e))?;

        let get_err = |e| ResearchError::database("Malformed trend row", e);
        rows.iter()
            .enumerate()
            .map(|(i, row)| -> Result<AccuracyPoint> {
                Ok(AccuracyPoint {
                    debate_num: i as i64 + 1,
                    created_at: row.try_get("timestamp").map_err(get_err)?,
                    accuracy: row.try_get("accuracy").map_err(get_err)?,
                    status: row.try_get("status").map_err(get_err)?,
                    recommendation: row
                        .try_get::<Option<String>, _>("final_recommendation")
                        .map_err(get_err)?
                        .unwrap_or_default(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::fixtures::debate;

    async fn store() -> SqlitePatternStore {
        SqlitePatternStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_save_and_load_details() {
        let store = store().await;
        let id = store.save_debate(&debate(Stance::Bearish, 6.00, 5.80)).await.unwrap();

        let details = store.debate_details(id).await.unwrap().unwrap();
        assert_eq!(details.debate.id, id);
        assert!(details.debate.recommendation.starts_with("BEARISH"));
        assert_eq!(details.debate.debate_rounds, 3);
        assert!(details.debate.validation_status.is_none());
        assert_eq!(details.positions.len(), 1);
        assert_eq!(details.positions[0].confidence, Some(70.0));
        assert_eq!(details.snapshot.unwrap().mortgage_rate, Some(6.00));

        assert!(store.debate_details(id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_validation_folds_running_mean() {
        let store = store().await;
        let first = store.save_debate(&debate(Stance::Bearish, 6.00, 5.80)).await.unwrap();
        let second = store.save_debate(&debate(Stance::Bearish, 6.00, 5.80)).await.unwrap();

        let a = store.validate(first, 6.30).await.unwrap();
        assert_eq!(a.status, ValidationStatus::Correct);
        assert!((a.accuracy - 100.0).abs() < 1e-6);
        assert!(store.top_patterns(2, 5).await.unwrap().is_empty());

        let b = store.validate(second, 5.90).await.unwrap();
        assert_eq!(b.status, ValidationStatus::Incorrect);

        let patterns = store.top_patterns(2, 5).await.unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].prediction, Stance::Bearish);
        assert_eq!(patterns[0].observations, 2);
        assert!((patterns[0].accuracy - 50.0).abs() < 1e-6);
        assert_eq!(patterns[0].condition, "Market condition: rates increasing");

        let digest = store.digest_for_prompt().await.unwrap();
        assert!(digest.contains("1. BEARISH prediction when increasing"));
    }

    #[tokio::test]
    async fn test_revalidation_is_idempotent() {
        let store = store().await;
        let id = store.save_debate(&debate(Stance::Neutral, 6.00, 6.10)).await.unwrap();

        let first = store.validate(id, 6.20).await.unwrap();
        let again = store.validate(id, 6.20).await.unwrap();
        assert_eq!(first.accuracy, 50.0);
        assert!(first.newly_validated);
        assert!(!again.newly_validated);

        let patterns = store.top_patterns(1, 5).await.unwrap();
        assert_eq!(patterns[0].observations, 1);
    }

    #[tokio::test]
    async fn test_stats_trend_and_recent() {
        let store = store().await;
        let a = store.save_debate(&debate(Stance::Bearish, 6.00, 5.80)).await.unwrap();
        store.save_debate(&debate(Stance::Bullish, 6.00, 5.80)).await.unwrap();
        store.validate(a, 6.30).await.unwrap();

        let stats = store.validation_stats().await.unwrap();
        assert_eq!(stats.total_validated, 1);
        assert_eq!(stats.correct_count, 1);
        assert_eq!(stats.accuracy_rate, 100.0);

        let trend = store.accuracy_trend().await.unwrap();
        assert_eq!(trend.len(), 2);
        assert_eq!(trend[0].status, "correct");
        assert_eq!(trend[1].status, "pending");
        assert_eq!(trend[1].accuracy, 50.0);

        let recent = store.recent_debates(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].recommendation.starts_with("BULLISH"));
    }

    #[tokio::test]
    async fn test_empty_stats() {
        let store = store().await;
        assert_eq!(store.validation_stats().await.unwrap(), ValidationStats::default());
        assert_eq!(store.validate(1, 6.0).await.unwrap().status, ValidationStatus::InsufficientData);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_validations_on_file_database() {
        let path = std::env::temp_dir().join(format!("patterns-{}.db", uuid::Uuid::new_v4()));
        let url = format!("sqlite://{}", path.display());
        let store = std::sync::Arc::new(SqlitePatternStore::connect(&url).await.unwrap());

        let mut ids = Vec::new();
        for _ in 0..8 {
            ids.push(store.save_debate(&debate(Stance::Bearish, 6.00, 5.80)).await.unwrap());
        }

        let handles: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let store = store.clone();
                tokio::spawn(async move { store.validate(id, 6.30).await })
            })
            .collect();
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert!(outcome.newly_validated);
        }

        let patterns = store.top_patterns(1, 5).await.unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].observations, 8);
        assert_eq!(store.validation_stats().await.unwrap().total_validated, 8);

        drop(store);
        let _ = std::fs::remove_file(&path);
    }
}
