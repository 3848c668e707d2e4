//! PostgreSQL implementations of the repositories.
//!
//! Timestamps are stored without time zone and interpreted as UTC.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use ort_core::OrtResult;
use sqlx::postgres::PgPool;
use std::sync::Arc;
use tracing::debug;

use crate::{
    ActiveOrtRun, DatabasePool, OrtRunRepository, WorkerJob, WorkerJobRepositories,
    WorkerJobRepository,
};

/// Run states that are not final.
const ACTIVE_RUN_STATES: &str = "'CREATED', 'ACTIVE'";

#[derive(Debug, sqlx::FromRow)]
struct WorkerJobRow {
    id: i64,
    ort_run_id: i64,
    created_at: NaiveDateTime,
    started_at: Option<NaiveDateTime>,
    finished_at: Option<NaiveDateTime>,
}

impl From<WorkerJobRow> for WorkerJob {
    fn from(row: WorkerJobRow) -> Self {
        Self {
            id: row.id,
            ort_run_id: row.ort_run_id,
            created_at: row.created_at.and_utc(),
            started_at: row.started_at.map(|t| t.and_utc()),
            finished_at: row.finished_at.map(|t| t.and_utc()),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ActiveRunRow {
    id: i64,
    created_at: NaiveDateTime,
    trace_id: Option<String>,
}

impl From<ActiveRunRow> for ActiveOrtRun {
    fn from(row: ActiveRunRow) -> Self {
        Self {
            run_id: row.id,
            created_at: row.created_at.and_utc(),
            trace_id: row.trace_id.unwrap_or_default(),
        }
    }
}

const ANALYZER_JOBS: &str = "analyzer_jobs";
const ADVISOR_JOBS: &str = "advisor_jobs";
const SCANNER_JOBS: &str = "scanner_jobs";
const EVALUATOR_JOBS: &str = "evaluator_jobs";
const REPORTER_JOBS: &str = "reporter_jobs";
const NOTIFIER_JOBS: &str = "notifier_jobs";

/// [`WorkerJobRepository`] reading one job table.
#[derive(Clone)]
pub struct PgWorkerJobRepository {
    pool: PgPool,
    table: &'static str,
    list_active_sql: String,
    find_for_run_sql: String,
}

impl PgWorkerJobRepository {
    fn new(pool: &DatabasePool, table: &'static str) -> Self {
        Self {
            pool: pool.inner().clone(),
            table,
            list_active_sql: list_active_sql(table),
            find_for_run_sql: find_for_run_sql(table),
        }
    }

    /// Creates the repositories of all worker types with job tables.
    #[must_use]
    pub fn all(pool: &DatabasePool) -> WorkerJobRepositories {
        let repository = |table: &'static str| -> Arc<dyn WorkerJobRepository> {
            Arc::new(Self::new(pool, table))
        };

        WorkerJobRepositories {
            analyzer: repository(ANALYZER_JOBS),
            advisor: repository(ADVISOR_JOBS),
            scanner: repository(SCANNER_JOBS),
            evaluator: repository(EVALUATOR_JOBS),
            reporter: repository(REPORTER_JOBS),
            notifier: repository(NOTIFIER_JOBS),
        }
    }
}

const JOB_COLUMNS: &str = "id, ort_run_id, created_at, started_at, finished_at";

fn list_active_sql(table: &str) -> String {
    format!(
        "SELECT {JOB_COLUMNS} FROM {table} \
         WHERE started_at IS NOT NULL AND finished_at IS NULL AND created_at <= $1 \
         ORDER BY id"
    )
}

fn find_for_run_sql(table: &str) -> String {
    format!("SELECT {JOB_COLUMNS} FROM {table} WHERE ort_run_id = $1 ORDER BY id DESC LIMIT 1")
}

#[async_trait]
impl WorkerJobRepository for PgWorkerJobRepository {
    async fn list_active(&self, before: DateTime<Utc>) -> OrtResult<Vec<WorkerJob>> {
        let rows: Vec<WorkerJobRow> = sqlx::query_as(&self.list_active_sql)
            .bind(before.naive_utc())
            .fetch_all(&self.pool)
            .await?;

        debug!(table = self.table, count = rows.len(), "Listed active jobs");
        Ok(rows.into_iter().map(WorkerJob::from).collect())
    }

    async fn find_for_run(&self, ort_run_id: i64) -> OrtResult<Option<WorkerJob>> {
        let row: Option<WorkerJobRow> = sqlx::query_as(&self.find_for_run_sql)
            .bind(ort_run_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(WorkerJob::from))
    }
}

/// [`OrtRunRepository`] reading the `ort_runs` table.
#[derive(Clone)]
pub struct PgOrtRunRepository {
    pool: PgPool,
}

impl PgOrtRunRepository {
    #[must_use]
    pub fn new(pool: &DatabasePool) -> Self {
        Self {
            pool: pool.inner().clone(),
        }
    }
}

#[async_trait]
impl OrtRunRepository for PgOrtRunRepository {
    async fn list_active_runs(&self) -> OrtResult<Vec<ActiveOrtRun>> {
        let sql = format!(
            "SELECT id, created_at, trace_id FROM ort_runs WHERE status IN ({ACTIVE_RUN_STATES}) ORDER BY id"
        );
        let rows: Vec<ActiveRunRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(ActiveOrtRun::from).collect())
    }

    async fn find_trace_id(&self, run_id: i64) -> OrtResult<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT trace_id FROM ort_runs WHERE id = $1")
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.and_then(|(trace_id,)| trace_id))
    }
}
