// SQLite JobRepository Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};
use trainwatch_core::domain::{JobId, JobStatus, PromptParams, SubjectKey, TrainingJob, UserId};
use trainwatch_core::error::{AppError, Result};
use trainwatch_core::port::JobRepository;

const JOB_COLUMNS: &str = "id, owner, provider_ref, status, model_version, model_name, \
     dataset_uri, trigger_word, gender, style_link, created_at, finished_at";

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_artifacts(conn: &mut SqliteConnection, job_id: &str) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT uri FROM job_artifacts WHERE job_id = ? ORDER BY position ASC")
            .bind(job_id)
            .fetch_all(conn)
            .await
            .map_err(map_sqlx_error)
    }

    async fn hydrate(&self, rows: Vec<JobRow>) -> Result<Vec<TrainingJob>> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let artifacts = Self::load_artifacts(&mut *conn, &row.id).await?;
            jobs.push(row.into_job(artifacts)?);
        }
        Ok(jobs)
    }

    /// Current status of `id`, or NotFound
    async fn status_of(&self, id: &JobId) -> Result<String> {
        sqlx::query_scalar::<_, String>("SELECT status FROM training_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn insert(&self, job: &TrainingJob) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            INSERT INTO training_jobs (
                id, owner, provider_ref, status, model_version, model_name,
                dataset_uri, trigger_word, gender, style_link, created_at, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.owner)
        .bind(&job.provider_ref)
        .bind(job.status.to_string())
        .bind(&job.model_version)
        .bind(&job.model_name)
        .bind(&job.dataset_uri)
        .bind(&job.prompt.trigger_word)
        .bind(&job.prompt.gender)
        .bind(&job.prompt.style_link)
        .bind(job.created_at)
        .bind(job.finished_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        for (position, uri) in job.artifacts.iter().enumerate() {
            sqlx::query(
                "INSERT INTO job_artifacts (job_id, position, uri, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(&job.id)
            .bind(position as i64)
            .bind(uri)
            .bind(job.created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<TrainingJob>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM training_jobs WHERE id = ?",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn update(&self, job: &TrainingJob) -> Result<()> {
        // Conditional: a terminal job is never rewritten
        let result = sqlx::query(
            r#"
            UPDATE training_jobs
            SET provider_ref = ?, status = ?, model_version = ?, model_name = ?, finished_at = ?
            WHERE id = ? AND status = 'STARTING'
            "#,
        )
        .bind(&job.provider_ref)
        .bind(job.status.to_string())
        .bind(&job.model_version)
        .bind(&job.model_name)
        .bind(job.finished_at)
        .bind(&job.id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            let current = self.status_of(&job.id).await?;
            return Err(AppError::InvalidState(format!(
                "Job {} is already {}",
                job.id, current
            )));
        }
        Ok(())
    }

    async fn find_non_terminal_by_subject(&self, subject: &SubjectKey) -> Result<Vec<TrainingJob>> {
        let (column, value) = match subject {
            SubjectKey::User(owner) => ("owner", owner),
            SubjectKey::Job(id) => ("id", id),
        };
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM training_jobs WHERE {} = ? AND status = 'STARTING' \
             ORDER BY created_at ASC, id ASC",
            JOB_COLUMNS, column
        ))
        .bind(value)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        self.hydrate(rows).await
    }

    async fn find_non_terminal(&self) -> Result<Vec<TrainingJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM training_jobs WHERE status = 'STARTING' ORDER BY created_at ASC, id ASC",
            JOB_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        self.hydrate(rows).await
    }

    async fn find_by_owner(&self, owner: &UserId) -> Result<Vec<TrainingJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM training_jobs WHERE owner = ? ORDER BY created_at ASC, id ASC",
            JOB_COLUMNS
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        self.hydrate(rows).await
    }

    async fn commit_success(
        &self,
        id: &JobId,
        artifact_uri: &str,
        model_version: Option<&str>,
        finished_at: i64,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // Only the caller that moves STARTING -> SUCCEEDED gets `true`
        let result = sqlx::query(
            r#"
            UPDATE training_jobs
            SET status = 'SUCCEEDED', finished_at = ?, model_version = COALESCE(?, model_version)
            WHERE id = ? AND status = 'STARTING'
            "#,
        )
        .bind(finished_at)
        .bind(model_version)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            drop(tx);
            self.status_of(id).await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO job_artifacts (job_id, position, uri, created_at)
            VALUES (?, (SELECT COUNT(*) FROM job_artifacts WHERE job_id = ?), ?, ?)
            "#,
        )
        .bind(id)
        .bind(id)
        .bind(artifact_uri)
        .bind(finished_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(true)
    }

    async fn append_artifact(&self, id: &JobId, artifact_uri: &str, created_at: i64) -> Result<bool> {
        // Single statement: the status check and the position count see the same snapshot
        let result = sqlx::query(
            r#"
            INSERT INTO job_artifacts (job_id, position, uri, created_at)
            SELECT id, (SELECT COUNT(*) FROM job_artifacts WHERE job_id = ?), ?, ?
            FROM training_jobs
            WHERE id = ? AND status = 'SUCCEEDED'
            "#,
        )
        .bind(id)
        .bind(artifact_uri)
        .bind(created_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            self.status_of(id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn mark_failed(&self, id: &JobId, finished_at: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE training_jobs SET status = 'FAILED', finished_at = ? WHERE id = ? AND status = 'STARTING'",
        )
        .bind(finished_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            self.status_of(id).await?;
            return Ok(false);
        }
        Ok(true)
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    owner: String,
    provider_ref: Option<String>,
    status: String,
    model_version: Option<String>,
    model_name: Option<String>,
    dataset_uri: String,
    trigger_word: String,
    gender: String,
    style_link: Option<String>,
    created_at: i64,
    finished_at: Option<i64>,
}

impl JobRow {
    fn into_job(self, artifacts: Vec<String>) -> Result<TrainingJob> {
        let status: JobStatus = self.status.parse()?;
        Ok(TrainingJob {
            id: self.id,
            owner: self.owner,
            provider_ref: self.provider_ref,
            status,
            model_version: self.model_version,
            model_name: self.model_name,
            dataset_uri: self.dataset_uri,
            prompt: PromptParams {
                trigger_word: self.trigger_word,
                gender: self.gender,
                style_link: self.style_link,
            },
            artifacts,
            created_at: self.created_at,
            finished_at: self.finished_at,
        })
    }
}
