// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Run history for the server's own background jobs (scheduler tick, remote
//! poll sweep, retention cleanup).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::{DbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRunStatus {
	Running,
	Succeeded,
	Failed,
	Cancelled,
}

impl JobRunStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			JobRunStatus::Running => "running",
			JobRunStatus::Succeeded => "succeeded",
			JobRunStatus::Failed => "failed",
			JobRunStatus::Cancelled => "cancelled",
		}
	}
}

impl std::str::FromStr for JobRunStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"running" => Ok(JobRunStatus::Running),
			"succeeded" => Ok(JobRunStatus::Succeeded),
			"failed" => Ok(JobRunStatus::Failed),
			"cancelled" => Ok(JobRunStatus::Cancelled),
			_ => Err(format!("unknown job run status: {s}")),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
	Schedule,
	Manual,
	Retry,
	Queue,
}

impl TriggerSource {
	pub fn as_str(&self) -> &'static str {
		match self {
			TriggerSource::Schedule => "schedule",
			TriggerSource::Manual => "manual",
			TriggerSource::Retry => "retry",
			TriggerSource::Queue => "queue",
		}
	}
}

impl std::str::FromStr for TriggerSource {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"schedule" => Ok(TriggerSource::Schedule),
			"manual" => Ok(TriggerSource::Manual),
			"retry" => Ok(TriggerSource::Retry),
			"queue" => Ok(TriggerSource::Queue),
			_ => Err(format!("unknown trigger source: {s}")),
		}
	}
}

/// A registered background job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundJob {
	pub id: String,
	pub name: String,
	pub description: String,
	/// `periodic` or `one_shot`.
	pub kind: String,
	pub interval_secs: Option<i64>,
	pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
	pub id: String,
	pub job_id: String,
	pub status: JobRunStatus,
	pub started_at: DateTime<Utc>,
	pub completed_at: Option<DateTime<Utc>>,
	pub duration_ms: Option<i64>,
	pub error_message: Option<String>,
	pub retry_count: u32,
	pub triggered_by: TriggerSource,
	pub metadata: Option<serde_json::Value>,
}

type RunRow = (
	String,
	String,
	String,
	DateTime<Utc>,
	Option<DateTime<Utc>>,
	Option<i64>,
	Option<String>,
	i64,
	String,
	Option<String>,
);

const RUN_COLUMNS: &str = "id, job_id, status, started_at, completed_at, duration_ms, \
	error_message, retry_count, triggered_by, metadata";

fn run_from_row(row: RunRow) -> Result<JobRun> {
	let (
		id,
		job_id,
		status,
		started_at,
		completed_at,
		duration_ms,
		error_message,
		retry_count,
		triggered_by,
		metadata,
	) = row;
	Ok(JobRun {
		id,
		job_id,
		status: status.parse().map_err(DbError::Internal)?,
		started_at,
		completed_at,
		duration_ms,
		error_message,
		retry_count: retry_count as u32,
		triggered_by: triggered_by.parse().map_err(DbError::Internal)?,
		metadata: metadata.as_deref().and_then(|s| serde_json::from_str(s).ok()),
	})
}

#[derive(Clone)]
pub struct JobRunRepository {
	pool: SqlitePool,
}

impl JobRunRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, job), fields(job_id = %job.id))]
	pub async fn upsert_job(&self, job: &BackgroundJob) -> Result<()> {
		let now = Utc::now();
		sqlx::query(
			r#"
			INSERT INTO background_jobs (id, name, description, kind, interval_secs, enabled, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT(id) DO UPDATE SET
				name = excluded.name,
				description = excluded.description,
				kind = excluded.kind,
				interval_secs = excluded.interval_secs,
				enabled = excluded.enabled,
				updated_at = excluded.updated_at
			"#,
		)
		.bind(&job.id)
		.bind(&job.name)
		.bind(&job.description)
		.bind(&job.kind)
		.bind(job.interval_secs)
		.bind(job.enabled)
		.bind(now)
		.bind(now)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_jobs(&self) -> Result<Vec<BackgroundJob>> {
		let rows = sqlx::query_as::<_, (String, String, String, String, Option<i64>, bool)>(
			"SELECT id, name, description, kind, interval_secs, enabled FROM background_jobs ORDER BY name",
		)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows
			.into_iter()
			.map(
				|(id, name, description, kind, interval_secs, enabled)| BackgroundJob {
					id,
					name,
					description,
					kind,
					interval_secs,
					enabled,
				},
			)
			.collect())
	}

	#[tracing::instrument(skip(self, run), fields(run_id = %run.id, job_id = %run.job_id))]
	pub async fn record_run_start(&self, run: &JobRun) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO background_job_runs (id, job_id, status, started_at, retry_count, triggered_by)
			VALUES (?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(&run.id)
		.bind(&run.job_id)
		.bind(run.status.as_str())
		.bind(run.started_at)
		.bind(run.retry_count as i64)
		.bind(run.triggered_by.as_str())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self, metadata))]
	pub async fn record_run_complete(
		&self,
		run_id: &str,
		status: JobRunStatus,
		retry_count: u32,
		error: Option<String>,
		metadata: Option<serde_json::Value>,
	) -> Result<()> {
		let now = Utc::now();
		let result = sqlx::query(
			r#"
			UPDATE background_job_runs
			SET status = ?,
				completed_at = ?,
				duration_ms = CAST((julianday(?) - julianday(started_at)) * 86400000 AS INTEGER),
				retry_count = ?,
				error_message = ?,
				metadata = ?
			WHERE id = ?
			"#,
		)
		.bind(status.as_str())
		.bind(now)
		.bind(now)
		.bind(retry_count as i64)
		.bind(error)
		.bind(metadata.map(|m| m.to_string()))
		.bind(run_id)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(run_id.to_string()));
		}
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_run(&self, run_id: &str) -> Result<Option<JobRun>> {
		let row = sqlx::query_as::<_, RunRow>(&format!(
			"SELECT {RUN_COLUMNS} FROM background_job_runs WHERE id = ?"
		))
		.bind(run_id)
		.fetch_optional(&self.pool)
		.await?;

		row.map(run_from_row).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>> {
		let row = sqlx::query_as::<_, RunRow>(&format!(
			"SELECT {RUN_COLUMNS} FROM background_job_runs WHERE job_id = ? ORDER BY started_at DESC LIMIT 1"
		))
		.bind(job_id)
		.fetch_optional(&self.pool)
		.await?;

		row.map(run_from_row).transpose()
	}

	/// Failed runs since the most recent non-failed run.
	#[tracing::instrument(skip(self))]
	pub async fn count_consecutive_failures(&self, job_id: &str) -> Result<u32> {
		let (count,): (i64,) = sqlx::query_as(
			r#"
			SELECT COUNT(*)
			FROM background_job_runs
			WHERE job_id = ?1
			  AND status = 'failed'
			  AND started_at > COALESCE(
				  (SELECT MAX(started_at) FROM background_job_runs
				   WHERE job_id = ?1 AND status NOT IN ('failed', 'running')),
				  ''
			  )
			"#,
		)
		.bind(job_id)
		.fetch_one(&self.pool)
		.await?;

		Ok(count as u32)
	}

	#[tracing::instrument(skip(self))]
	pub async fn delete_runs_before(&self, before: DateTime<Utc>) -> Result<u64> {
		let result = sqlx::query("DELETE FROM background_job_runs WHERE completed_at < ?")
			.bind(before)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}
}

#[async_trait]
pub trait JobRunStore: Send + Sync {
	async fn upsert_job(&self, job: &BackgroundJob) -> Result<()>;
	async fn record_run_start(&self, run: &JobRun) -> Result<()>;
	async fn record_run_complete(
		&self,
		run_id: &str,
		status: JobRunStatus,
		retry_count: u32,
		error: Option<String>,
		metadata: Option<serde_json::Value>,
	) -> Result<()>;
	async fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>>;
	async fn count_consecutive_failures(&self, job_id: &str) -> Result<u32>;
	async fn delete_runs_before(&self, before: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
impl JobRunStore for JobRunRepository {
	async fn upsert_job(&self, job: &BackgroundJob) -> Result<()> {
		self.upsert_job(job).await
	}

	async fn record_run_start(&self, run: &JobRun) -> Result<()> {
		self.record_run_start(run).await
	}

	async fn record_run_complete(
		&self,
		run_id: &str,
		status: JobRunStatus,
		retry_count: u32,
		error: Option<String>,
		metadata: Option<serde_json::Value>,
	) -> Result<()> {
		self
			.record_run_complete(run_id, status, retry_count, error, metadata)
			.await
	}

	async fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>> {
		self.get_last_run(job_id).await
	}

	async fn count_consecutive_failures(&self, job_id: &str) -> Result<u32> {
		self.count_consecutive_failures(job_id).await
	}

	async fn delete_runs_before(&self, before: DateTime<Utc>) -> Result<u64> {
		self.delete_runs_before(before).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_job_test_pool;
	use chrono::Duration;

	fn job(id: &str) -> BackgroundJob {
		BackgroundJob {
			id: id.to_string(),
			name: "Scheduler tick".to_string(),
			description: "Fires due schedules".to_string(),
			kind: "periodic".to_string(),
			interval_secs: Some(30),
			enabled: true,
		}
	}

	fn run(id: &str, job_id: &str, started_at: DateTime<Utc>) -> JobRun {
		JobRun {
			id: id.to_string(),
			job_id: job_id.to_string(),
			status: JobRunStatus::Running,
			started_at,
			completed_at: None,
			duration_ms: None,
			error_message: None,
			retry_count: 0,
			triggered_by: TriggerSource::Schedule,
			metadata: None,
		}
	}

	async fn repo_with_job(job_id: &str) -> JobRunRepository {
		let repo = JobRunRepository::new(create_job_test_pool().await);
		repo.upsert_job(&job(job_id)).await.unwrap();
		repo
	}

	#[tokio::test]
	async fn test_upsert_job_updates_in_place() {
		let repo = repo_with_job("scheduler-tick").await;
		let mut updated = job("scheduler-tick");
		updated.interval_secs = Some(10);
		repo.upsert_job(&updated).await.unwrap();

		let jobs = repo.list_jobs().await.unwrap();
		assert_eq!(jobs.len(), 1);
		assert_eq!(jobs[0].interval_secs, Some(10));
	}

	#[tokio::test]
	async fn test_run_lifecycle() {
		let repo = repo_with_job("scheduler-tick").await;
		repo
			.record_run_start(&run("r1", "scheduler-tick", Utc::now()))
			.await
			.unwrap();
		repo
			.record_run_complete(
				"r1",
				JobRunStatus::Succeeded,
				1,
				None,
				Some(serde_json::json!({"fired": 2})),
			)
			.await
			.unwrap();

		let stored = repo.get_run("r1").await.unwrap().unwrap();
		assert_eq!(stored.status, JobRunStatus::Succeeded);
		assert_eq!(stored.retry_count, 1);
		assert!(stored.completed_at.is_some());
		assert!(stored.duration_ms.is_some());
		assert_eq!(stored.metadata.unwrap()["fired"], 2);
	}

	#[tokio::test]
	async fn test_complete_unknown_run_is_not_found() {
		let repo = repo_with_job("scheduler-tick").await;
		let err = repo
			.record_run_complete("missing", JobRunStatus::Failed, 0, None, None)
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::NotFound(_)));
	}

	#[tokio::test]
	async fn test_consecutive_failures_reset_by_success() {
		let repo = repo_with_job("poll-sweep").await;
		let base = Utc::now() - Duration::minutes(10);
		let statuses = [
			JobRunStatus::Failed,
			JobRunStatus::Succeeded,
			JobRunStatus::Failed,
			JobRunStatus::Failed,
		];
		for (i, status) in statuses.iter().enumerate() {
			let id = format!("r{i}");
			repo
				.record_run_start(&run(&id, "poll-sweep", base + Duration::minutes(i as i64)))
				.await
				.unwrap();
			repo
				.record_run_complete(&id, *status, 0, None, None)
				.await
				.unwrap();
		}

		assert_eq!(repo.count_consecutive_failures("poll-sweep").await.unwrap(), 2);
		let last = repo.get_last_run("poll-sweep").await.unwrap().unwrap();
		assert_eq!(last.id, "r3");
	}

	#[tokio::test]
	async fn test_consecutive_failures_without_runs_is_zero() {
		let repo = repo_with_job("poll-sweep").await;
		assert_eq!(repo.count_consecutive_failures("poll-sweep").await.unwrap(), 0);
		assert!(repo.get_last_run("poll-sweep").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_delete_runs_before_cutoff() {
		let repo = repo_with_job("cleanup").await;
		repo
			.record_run_start(&run("old", "cleanup", Utc::now()))
			.await
			.unwrap();
		repo
			.record_run_complete("old", JobRunStatus::Succeeded, 0, None, None)
			.await
			.unwrap();

		let deleted = repo
			.delete_runs_before(Utc::now() - Duration::days(1))
			.await
			.unwrap();
		assert_eq!(deleted, 0);

		let deleted = repo
			.delete_runs_before(Utc::now() + Duration::seconds(1))
			.await
			.unwrap();
		assert_eq!(deleted, 1);
		assert!(repo.get_run("old").await.unwrap().is_none());
	}
}
