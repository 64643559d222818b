//! Durable report sink
//!
//! The coordinator only needs three things from durable storage: bulk insert
//! of a report batch, the most recent report of a run, and run status updates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{QueryBuilder, Row};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::domain::{Coordinate, Environment, RunStatus, Scores, StatusReport};
use crate::error::Result;

/// Insert/query sink for status reports
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Persist a batch of reports for one run in a single write
    async fn insert_batch(&self, run_id: &str, reports: &[StatusReport]) -> Result<()>;

    /// Most recent durable report of a run
    async fn latest_report(&self, run_id: &str) -> Result<Option<StatusReport>>;

    /// Record the lifecycle status of a run
    async fn update_run_status(&self, run_id: &str, status: RunStatus) -> Result<()>;
}

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresReportStore {
    pool: PgPool,
}

impl PostgresReportStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_report(row: &PgRow) -> std::result::Result<StatusReport, sqlx::Error> {
        let sequence: i64 = row.try_get("sequence")?;
        let scores: Option<sqlx::types::Json<Scores>> = row.try_get("scores")?;
        let recorded_at: DateTime<Utc> = row.try_get("recorded_at")?;

        Ok(StatusReport {
            timestamp: recorded_at,
            run_id: row.try_get("run_id")?,
            agent_id: row.try_get("agent_id")?,
            sequence: sequence.max(0) as u64,
            position: Coordinate::new(row.try_get("lat")?, row.try_get("lon")?),
            altitude_m: row.try_get("altitude_m")?,
            speed_mps: row.try_get("speed_mps")?,
            battery_pct: row.try_get("battery_pct")?,
            progress: row.try_get("progress")?,
            environment: Environment {
                temperature_c: row.try_get("temperature_c")?,
                current_a: row.try_get("current_a")?,
                voltage_v: row.try_get("voltage_v")?,
            },
            scores: scores.map(|s| s.0),
        })
    }
}

#[async_trait]
impl ReportSink for PostgresReportStore {
    #[instrument(skip(self, reports), fields(count = reports.len()))]
    async fn insert_batch(&self, run_id: &str, reports: &[StatusReport]) -> Result<()> {
        if reports.is_empty() {
            return Ok(());
        }

        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            r#"
            INSERT INTO status_reports (
                run_id, agent_id, sequence, recorded_at, lat, lon,
                altitude_m, speed_mps, battery_pct, progress,
                temperature_c, current_a, voltage_v, scores
            )
            "#,
        );

        qb.push_values(reports.iter(), |mut b, report| {
            b.push_bind(run_id)
                .push_bind(&report.agent_id)
                .push_bind(report.sequence as i64)
                .push_bind(report.timestamp)
                .push_bind(report.position.lat)
                .push_bind(report.position.lon)
                .push_bind(report.altitude_m)
                .push_bind(report.speed_mps)
                .push_bind(report.battery_pct)
                .push_bind(report.progress)
                .push_bind(report.environment.temperature_c)
                .push_bind(report.environment.current_a)
                .push_bind(report.environment.voltage_v)
                .push_bind(report.scores.as_ref().map(sqlx::types::Json));
        });

        let result = qb.build().execute(&self.pool).await?;
        debug!(run_id, rows = result.rows_affected(), "inserted report batch");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn latest_report(&self, run_id: &str) -> Result<Option<StatusReport>> {
        let row = sqlx::query(
            r#"
            SELECT run_id, agent_id, sequence, recorded_at, lat, lon,
                   altitude_m, speed_mps, battery_pct, progress,
                   temperature_c, current_a, voltage_v, scores
            FROM status_reports
            WHERE run_id = $1
            ORDER BY recorded_at DESC, sequence DESC
            LIMIT 1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::row_to_report).transpose()?)
    }

    #[instrument(skip(self))]
    async fn update_run_status(&self, run_id: &str, status: RunStatus) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO runs (id, status, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                updated_at = NOW()
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Process-local sink used when no database is configured
#[derive(Default)]
pub struct MemoryReportStore {
    reports: RwLock<HashMap<String, Vec<StatusReport>>>,
    statuses: RwLock<HashMap<String, RunStatus>>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All persisted reports of a run, oldest first
    pub async fn reports(&self, run_id: &str) -> Vec<StatusReport> {
        self.reports
            .read()
            .await
            .get(run_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn run_status(&self, run_id: &str) -> Option<RunStatus> {
        self.statuses.read().await.get(run_id).copied()
    }
}

#[async_trait]
impl ReportSink for MemoryReportStore {
    async fn insert_batch(&self, run_id: &str, reports: &[StatusReport]) -> Result<()> {
        self.reports
            .write()
            .await
            .entry(run_id.to_string())
            .or_default()
            .extend_from_slice(reports);
        Ok(())
    }

    async fn latest_report(&self, run_id: &str) -> Result<Option<StatusReport>> {
        Ok(self
            .reports
            .read()
            .await
            .get(run_id)
            .and_then(|reports| reports.last().cloned()))
    }

    async fn update_run_status(&self, run_id: &str, status: RunStatus) -> Result<()> {
        self.statuses
            .write()
            .await
            .insert(run_id.to_string(), status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(run_id: &str, sequence: u64) -> StatusReport {
        StatusReport {
            timestamp: Utc::now(),
            run_id: run_id.to_string(),
            agent_id: "agent-1".to_string(),
            sequence,
            position: Coordinate::new(0.0, 0.0),
            altitude_m: 10.0,
            speed_mps: 5.0,
            battery_pct: 90.0,
            progress: 0.1,
            environment: Environment {
                temperature_c: 20.0,
                current_a: 10.0,
                voltage_v: 22.0,
            },
            scores: None,
        }
    }

    #[tokio::test]
    async fn test_memory_store_latest_report() {
        let store = MemoryReportStore::new();
        assert!(store.latest_report("run-1").await.unwrap().is_none());

        store
            .insert_batch("run-1", &[report("run-1", 1), report("run-1", 2)])
            .await
            .unwrap();
        store.insert_batch("run-1", &[report("run-1", 3)]).await.unwrap();

        let latest = store.latest_report("run-1").await.unwrap().unwrap();
        assert_eq!(latest.sequence, 3);
        assert_eq!(store.reports("run-1").await.len(), 3);
        assert!(store.latest_report("run-2").await.unwrap().is_none());
    }

    #[test]
    fn test_memory_store_run_status() {
        let store = MemoryReportStore::new();
        tokio_test::block_on(store.update_run_status("run-1", RunStatus::Running)).unwrap();
        tokio_test::block_on(store.update_run_status("run-1", RunStatus::Completed)).unwrap();
        assert_eq!(
            tokio_test::block_on(store.run_status("run-1")),
            Some(RunStatus::Completed)
        );
        assert_eq!(tokio_test::block_on(store.run_status("run-2")), None);
    }
}
