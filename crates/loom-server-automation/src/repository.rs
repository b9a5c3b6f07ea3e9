// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeSet;
use std::fmt::Display;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::{Sqlite, SqlitePool};
use tracing::instrument;

use loom_automation_core::{
	weekday_from_index, Approval, DefinitionId, DefinitionStats, ExecutionBackend, Execution,
	ExecutionLog, ExecutionStatus, JobDefinition, JobType, LaunchFlags, LaunchRequest, LogEntry,
	LogLevel, RemoteJobExecution, RemoteJobStatus, Schedule, ScheduleId, ScheduleKind,
	ScheduleSummary, SurveyKind, SurveyParameter, Variables,
};
use loom_server_db::DbError;

use crate::error::{AutomationServerError, Result};

/// Create the automation tables.
#[instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
	loom_server_db::apply_migration(
		pool,
		"001_automation",
		include_str!("../migrations/001_automation.sql"),
	)
	.await?;
	Ok(())
}

/// Narrows [`AutomationStore::list_executions`].
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
	pub definition_id: Option<DefinitionId>,
	pub executor: Option<String>,
	pub status: Option<ExecutionStatus>,
	pub limit: Option<u32>,
}

const DEFAULT_EXECUTION_LIMIT: u32 = 100;

/// Persistence for definitions, executions, remote jobs, logs and schedules.
#[async_trait]
pub trait AutomationStore: Send + Sync {
	// Definition operations
	async fn create_definition(&self, definition: &JobDefinition) -> Result<()>;
	/// Rewrites everything but the statistics.
	async fn update_definition(&self, definition: &JobDefinition) -> Result<()>;
	async fn get_definition(&self, id: DefinitionId) -> Result<Option<JobDefinition>>;
	async fn get_definition_by_template(&self, template_id: i64) -> Result<Option<JobDefinition>>;
	async fn list_definitions(&self, include_disabled: bool) -> Result<Vec<JobDefinition>>;
	/// Counts a finished run against the definition's statistics.
	async fn record_outcome(
		&self,
		id: DefinitionId,
		successful: bool,
		at: DateTime<Utc>,
	) -> Result<()>;
	async fn record_usage(&self, id: DefinitionId, at: DateTime<Utc>) -> Result<()>;

	// Survey parameter operations
	async fn replace_survey_parameters(
		&self,
		definition_id: DefinitionId,
		parameters: &[SurveyParameter],
	) -> Result<()>;
	async fn list_survey_parameters(
		&self,
		definition_id: DefinitionId,
	) -> Result<Vec<SurveyParameter>>;

	// Execution operations
	async fn create_execution(&self, execution: &Execution) -> Result<()>;
	/// Inserts an execution and its remote launch record in one transaction.
	async fn create_execution_with_remote_job(
		&self,
		execution: &Execution,
		job: &RemoteJobExecution,
	) -> Result<()>;
	async fn get_execution(&self, execution_id: &str) -> Result<Option<Execution>>;
	/// Compare-and-swap on status. Returns false when the stored status is no
	/// longer `expected`.
	async fn update_execution(&self, execution: &Execution, expected: ExecutionStatus)
		-> Result<bool>;
	async fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>>;
	/// Deletes completed, failed and cancelled executions finished before
	/// `cutoff`, with their logs and remote job records.
	async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

	// Remote job operations
	async fn create_remote_job(&self, job: &RemoteJobExecution) -> Result<()>;
	async fn get_remote_job(&self, execution_id: &str) -> Result<Option<RemoteJobExecution>>;
	/// Sets the remote job id unless one is already stored.
	async fn set_remote_job_id(&self, execution_id: &str, remote_job_id: i64) -> Result<bool>;
	/// Updates status, timing and output. Never touches the remote job id.
	async fn update_remote_job(&self, job: &RemoteJobExecution) -> Result<()>;
	/// Launched remote jobs that have not reached a terminal status, or whose
	/// execution has not caught up with one.
	async fn list_active_remote_jobs(&self) -> Result<Vec<RemoteJobExecution>>;

	// Execution log operations
	async fn append_log(&self, execution_id: &str, entry: &LogEntry) -> Result<()>;
	async fn list_logs(&self, execution_id: &str) -> Result<Vec<ExecutionLog>>;
	async fn delete_logs_before(&self, level: LogLevel, cutoff: DateTime<Utc>) -> Result<u64>;

	// Schedule operations
	async fn create_schedule(&self, schedule: &Schedule) -> Result<()>;
	async fn get_schedule(&self, id: ScheduleId) -> Result<Option<Schedule>>;
	async fn list_schedules(&self) -> Result<Vec<ScheduleSummary>>;
	async fn list_due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>>;
	/// Claims the run planned at `expected_next_run`. Only one caller wins.
	/// A `next_run` of `None` disables the schedule.
	async fn claim_schedule(
		&self,
		id: ScheduleId,
		expected_next_run: DateTime<Utc>,
		ran_at: DateTime<Utc>,
		next_run: Option<DateTime<Utc>>,
	) -> Result<bool>;
	async fn set_schedule_enabled(
		&self,
		id: ScheduleId,
		enabled: bool,
		next_run: Option<DateTime<Utc>>,
	) -> Result<bool>;
}

#[derive(Clone)]
pub struct SqliteAutomationRepository {
	pool: SqlitePool,
}

impl SqliteAutomationRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}
}

const DEFINITION_COLUMNS: &str = "id, name, description, category, backend, requires_approval, \
	is_dangerous, is_enabled, timeout_secs, target_servers, target_applications, default_variables, \
	required_variables, allowed_users, launch_flags, survey_enabled, execution_count, success_count, \
	last_execution, usage_count, last_used, created_at, updated_at";

const EXECUTION_COLUMNS: &str = "execution_id, definition_id, executor, variables, target_hosts, \
	status, requires_approval, approved_by, approved_at, approval_notes, started_at, completed_at, \
	return_code, stdout, stderr, created_at, updated_at";

const REMOTE_JOB_COLUMNS: &str = "execution_id, remote_job_id, template_id, status, survey_answers, \
	extra_vars, limit_hosts, job_tags, skip_tags, job_type, verbosity, started_at, finished_at, \
	elapsed, result_stdout, result_stderr, output_fetched, created_at, updated_at";

const SCHEDULE_COLUMNS: &str = "id, name, definition_id, schedule_type, scheduled_time, \
	scheduled_date, day_of_week, cron_expression, timezone, variables, last_run, next_run, \
	run_count, is_enabled, created_at, updated_at";

#[async_trait]
impl AutomationStore for SqliteAutomationRepository {
	#[instrument(skip(self, definition), fields(definition_id = %definition.id))]
	async fn create_definition(&self, definition: &JobDefinition) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO automation_definitions (
				id, name, description, category, backend, remote_template_id, requires_approval,
				is_dangerous, is_enabled, timeout_secs, target_servers, target_applications,
				default_variables, required_variables, allowed_users, launch_flags, survey_enabled,
				execution_count, success_count, last_execution, usage_count, last_used,
				created_at, updated_at
			)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(definition.id.to_string())
		.bind(&definition.name)
		.bind(&definition.description)
		.bind(&definition.category)
		.bind(serde_json::to_string(&definition.backend)?)
		.bind(definition.remote_template_id())
		.bind(definition.requires_approval)
		.bind(definition.is_dangerous)
		.bind(definition.is_enabled)
		.bind(definition.timeout_secs as i64)
		.bind(serde_json::to_string(&definition.target_servers)?)
		.bind(serde_json::to_string(&definition.target_applications)?)
		.bind(serde_json::to_string(&definition.default_variables)?)
		.bind(serde_json::to_string(&definition.required_variables)?)
		.bind(serde_json::to_string(&definition.allowed_users)?)
		.bind(serde_json::to_string(&definition.launch_flags)?)
		.bind(definition.survey_enabled)
		.bind(definition.stats.execution_count as i64)
		.bind(definition.stats.success_count as i64)
		.bind(definition.stats.last_execution)
		.bind(definition.stats.usage_count as i64)
		.bind(definition.stats.last_used)
		.bind(definition.created_at)
		.bind(definition.updated_at)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[instrument(skip(self, definition), fields(definition_id = %definition.id))]
	async fn update_definition(&self, definition: &JobDefinition) -> Result<()> {
		let result = sqlx::query(
			r#"
			UPDATE automation_definitions
			SET name = ?, description = ?, category = ?, backend = ?, remote_template_id = ?,
				requires_approval = ?, is_dangerous = ?, is_enabled = ?, timeout_secs = ?,
				target_servers = ?, target_applications = ?, default_variables = ?,
				required_variables = ?, allowed_users = ?, launch_flags = ?, survey_enabled = ?,
				updated_at = ?
			WHERE id = ?
			"#,
		)
		.bind(&definition.name)
		.bind(&definition.description)
		.bind(&definition.category)
		.bind(serde_json::to_string(&definition.backend)?)
		.bind(definition.remote_template_id())
		.bind(definition.requires_approval)
		.bind(definition.is_dangerous)
		.bind(definition.is_enabled)
		.bind(definition.timeout_secs as i64)
		.bind(serde_json::to_string(&definition.target_servers)?)
		.bind(serde_json::to_string(&definition.target_applications)?)
		.bind(serde_json::to_string(&definition.default_variables)?)
		.bind(serde_json::to_string(&definition.required_variables)?)
		.bind(serde_json::to_string(&definition.allowed_users)?)
		.bind(serde_json::to_string(&definition.launch_flags)?)
		.bind(definition.survey_enabled)
		.bind(definition.updated_at)
		.bind(definition.id.to_string())
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(AutomationServerError::not_found(format!(
				"definition {}",
				definition.id
			)));
		}
		Ok(())
	}

	#[instrument(skip(self), fields(definition_id = %id))]
	async fn get_definition(&self, id: DefinitionId) -> Result<Option<JobDefinition>> {
		let row = sqlx::query_as::<_, DefinitionRow>(&format!(
			"SELECT {DEFINITION_COLUMNS} FROM automation_definitions WHERE id = ?"
		))
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(JobDefinition::try_from).transpose()
	}

	#[instrument(skip(self))]
	async fn get_definition_by_template(&self, template_id: i64) -> Result<Option<JobDefinition>> {
		let row = sqlx::query_as::<_, DefinitionRow>(&format!(
			"SELECT {DEFINITION_COLUMNS} FROM automation_definitions WHERE remote_template_id = ?"
		))
		.bind(template_id)
		.fetch_optional(&self.pool)
		.await?;

		row.map(JobDefinition::try_from).transpose()
	}

	#[instrument(skip(self))]
	async fn list_definitions(&self, include_disabled: bool) -> Result<Vec<JobDefinition>> {
		let rows = sqlx::query_as::<_, DefinitionRow>(&format!(
			"SELECT {DEFINITION_COLUMNS} FROM automation_definitions \
			 WHERE ? OR is_enabled = 1 ORDER BY category, name"
		))
		.bind(include_disabled)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(JobDefinition::try_from).collect()
	}

	#[instrument(skip(self), fields(definition_id = %id))]
	async fn record_outcome(
		&self,
		id: DefinitionId,
		successful: bool,
		at: DateTime<Utc>,
	) -> Result<()> {
		sqlx::query(
			r#"
			UPDATE automation_definitions
			SET execution_count = execution_count + 1,
				success_count = success_count + CASE WHEN ? THEN 1 ELSE 0 END,
				last_execution = ?
			WHERE id = ?
			"#,
		)
		.bind(successful)
		.bind(at)
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[instrument(skip(self), fields(definition_id = %id))]
	async fn record_usage(&self, id: DefinitionId, at: DateTime<Utc>) -> Result<()> {
		sqlx::query(
			"UPDATE automation_definitions SET usage_count = usage_count + 1, last_used = ? WHERE id = ?",
		)
		.bind(at)
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[instrument(skip(self, parameters), fields(definition_id = %definition_id, count = parameters.len()))]
	async fn replace_survey_parameters(
		&self,
		definition_id: DefinitionId,
		parameters: &[SurveyParameter],
	) -> Result<()> {
		let mut tx = self.pool.begin().await?;

		sqlx::query("DELETE FROM automation_survey_parameters WHERE definition_id = ?")
			.bind(definition_id.to_string())
			.execute(&mut *tx)
			.await?;

		for parameter in parameters {
			sqlx::query(
				r#"
				INSERT INTO automation_survey_parameters (
					id, definition_id, variable, question_name, question_description, kind,
					required, default_value, min_value, max_value, choices, sort_order
				)
				VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
				"#,
			)
			.bind(parameter.id.to_string())
			.bind(definition_id.to_string())
			.bind(&parameter.variable)
			.bind(&parameter.question_name)
			.bind(&parameter.question_description)
			.bind(parameter.kind.as_str())
			.bind(parameter.required)
			.bind(parameter.default.as_ref().map(|d| d.to_string()))
			.bind(parameter.min)
			.bind(parameter.max)
			.bind(serde_json::to_string(&parameter.choices)?)
			.bind(parameter.order as i64)
			.execute(&mut *tx)
			.await?;
		}

		tx.commit().await?;
		Ok(())
	}

	#[instrument(skip(self), fields(definition_id = %definition_id))]
	async fn list_survey_parameters(
		&self,
		definition_id: DefinitionId,
	) -> Result<Vec<SurveyParameter>> {
		let rows = sqlx::query_as::<_, SurveyParameterRow>(
			r#"
			SELECT id, definition_id, variable, question_name, question_description, kind,
				required, default_value, min_value, max_value, choices, sort_order
			FROM automation_survey_parameters
			WHERE definition_id = ?
			ORDER BY sort_order, variable
			"#,
		)
		.bind(definition_id.to_string())
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(SurveyParameter::try_from).collect()
	}

	#[instrument(skip(self, execution), fields(execution_id = %execution.execution_id, definition_id = %execution.definition_id))]
	async fn create_execution(&self, execution: &Execution) -> Result<()> {
		insert_execution(&self.pool, execution).await
	}

	#[instrument(skip(self, execution, job), fields(execution_id = %execution.execution_id, template_id = job.template_id))]
	async fn create_execution_with_remote_job(
		&self,
		execution: &Execution,
		job: &RemoteJobExecution,
	) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		insert_execution(&mut *tx, execution).await?;
		insert_remote_job(&mut *tx, job).await?;
		tx.commit().await?;
		Ok(())
	}

	#[instrument(skip(self))]
	async fn get_execution(&self, execution_id: &str) -> Result<Option<Execution>> {
		let row = sqlx::query_as::<_, ExecutionRow>(&format!(
			"SELECT {EXECUTION_COLUMNS} FROM automation_executions WHERE execution_id = ?"
		))
		.bind(execution_id)
		.fetch_optional(&self.pool)
		.await?;

		row.map(Execution::try_from).transpose()
	}

	#[instrument(skip(self, execution), fields(execution_id = %execution.execution_id, from = %expected, to = %execution.status))]
	async fn update_execution(
		&self,
		execution: &Execution,
		expected: ExecutionStatus,
	) -> Result<bool> {
		if expected.is_terminal() {
			return Ok(false);
		}

		let approval = execution.approval.as_ref();
		let result = sqlx::query(
			r#"
			UPDATE automation_executions
			SET status = ?, approved_by = ?, approved_at = ?, approval_notes = ?,
				started_at = ?, completed_at = ?, return_code = ?, stdout = ?, stderr = ?,
				updated_at = ?
			WHERE execution_id = ? AND status = ?
			"#,
		)
		.bind(execution.status.as_str())
		.bind(approval.map(|a| a.approved_by.clone()))
		.bind(approval.map(|a| a.approved_at))
		.bind(approval.and_then(|a| a.notes.clone()))
		.bind(execution.started_at)
		.bind(execution.completed_at)
		.bind(execution.return_code)
		.bind(&execution.stdout)
		.bind(&execution.stderr)
		.bind(execution.updated_at)
		.bind(&execution.execution_id)
		.bind(expected.as_str())
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	#[instrument(skip(self, filter))]
	async fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>> {
		let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
			"SELECT {EXECUTION_COLUMNS} FROM automation_executions \
			 WHERE (?1 IS NULL OR definition_id = ?1) \
			   AND (?2 IS NULL OR executor = ?2) \
			   AND (?3 IS NULL OR status = ?3) \
			 ORDER BY created_at DESC LIMIT ?4"
		))
		.bind(filter.definition_id.map(|id| id.to_string()))
		.bind(filter.executor.as_deref())
		.bind(filter.status.map(|s| s.as_str()))
		.bind(filter.limit.unwrap_or(DEFAULT_EXECUTION_LIMIT) as i64)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(Execution::try_from).collect()
	}

	#[instrument(skip(self))]
	async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
		const FINISHED: &str = "SELECT execution_id FROM automation_executions \
			WHERE status IN ('completed', 'failed', 'cancelled') AND completed_at < ?";

		let mut tx = self.pool.begin().await?;

		sqlx::query(&format!(
			"DELETE FROM automation_execution_logs WHERE execution_id IN ({FINISHED})"
		))
		.bind(cutoff)
		.execute(&mut *tx)
		.await?;

		sqlx::query(&format!(
			"DELETE FROM automation_remote_jobs WHERE execution_id IN ({FINISHED})"
		))
		.bind(cutoff)
		.execute(&mut *tx)
		.await?;

		let result = sqlx::query(
			"DELETE FROM automation_executions \
			 WHERE status IN ('completed', 'failed', 'cancelled') AND completed_at < ?",
		)
		.bind(cutoff)
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;
		Ok(result.rows_affected())
	}

	#[instrument(skip(self, job), fields(execution_id = %job.execution_id, template_id = job.template_id))]
	async fn create_remote_job(&self, job: &RemoteJobExecution) -> Result<()> {
		insert_remote_job(&self.pool, job).await
	}

	#[instrument(skip(self))]
	async fn get_remote_job(&self, execution_id: &str) -> Result<Option<RemoteJobExecution>> {
		let row = sqlx::query_as::<_, RemoteJobRow>(&format!(
			"SELECT {REMOTE_JOB_COLUMNS} FROM automation_remote_jobs WHERE execution_id = ?"
		))
		.bind(execution_id)
		.fetch_optional(&self.pool)
		.await?;

		row.map(RemoteJobExecution::try_from).transpose()
	}

	#[instrument(skip(self))]
	async fn set_remote_job_id(&self, execution_id: &str, remote_job_id: i64) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE automation_remote_jobs
			SET remote_job_id = ?, updated_at = ?
			WHERE execution_id = ? AND remote_job_id IS NULL
			"#,
		)
		.bind(remote_job_id)
		.bind(Utc::now())
		.bind(execution_id)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	#[instrument(skip(self, job), fields(execution_id = %job.execution_id, remote_job_id = ?job.remote_job_id, status = %job.status))]
	async fn update_remote_job(&self, job: &RemoteJobExecution) -> Result<()> {
		let result = sqlx::query(
			r#"
			UPDATE automation_remote_jobs
			SET status = ?, started_at = ?, finished_at = ?, elapsed = ?,
				result_stdout = ?, result_stderr = ?, output_fetched = ?, updated_at = ?
			WHERE execution_id = ?
			"#,
		)
		.bind(job.status.as_str())
		.bind(job.started_at)
		.bind(job.finished_at)
		.bind(job.elapsed)
		.bind(&job.result_stdout)
		.bind(&job.result_stderr)
		.bind(job.output_fetched)
		.bind(job.updated_at)
		.bind(&job.execution_id)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(AutomationServerError::not_found(format!(
				"remote job for execution {}",
				job.execution_id
			)));
		}
		Ok(())
	}

	#[instrument(skip(self))]
	async fn list_active_remote_jobs(&self) -> Result<Vec<RemoteJobExecution>> {
		let rows = sqlx::query_as::<_, RemoteJobRow>(&format!(
			"SELECT {REMOTE_JOB_COLUMNS} FROM automation_remote_jobs \
			 WHERE remote_job_id IS NOT NULL \
			   AND (status NOT IN ('successful', 'failed', 'error', 'canceled') \
			    OR execution_id IN (SELECT execution_id FROM automation_executions \
			                        WHERE status IN ('approved', 'running'))) \
			 ORDER BY created_at"
		))
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(RemoteJobExecution::try_from).collect()
	}

	#[instrument(skip(self, entry), fields(level = %entry.level))]
	async fn append_log(&self, execution_id: &str, entry: &LogEntry) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO automation_execution_logs (
				execution_id, level, message, host, task, play, extra_data, created_at
			)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(execution_id)
		.bind(entry.level.as_str())
		.bind(&entry.message)
		.bind(&entry.host)
		.bind(&entry.task)
		.bind(&entry.play)
		.bind(entry.extra_data.as_ref().map(|v| v.to_string()))
		.bind(Utc::now())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[instrument(skip(self))]
	async fn list_logs(&self, execution_id: &str) -> Result<Vec<ExecutionLog>> {
		let rows = sqlx::query_as::<_, LogRow>(
			r#"
			SELECT id, execution_id, level, message, host, task, play, extra_data, created_at
			FROM automation_execution_logs
			WHERE execution_id = ?
			ORDER BY id
			"#,
		)
		.bind(execution_id)
		.fetch_all(&self.pool)
		.await?;

		rows
			.into_iter()
			.map(
				|(id, execution_id, level, message, host, task, play, extra_data, created_at)|
				 -> Result<ExecutionLog> {
					Ok(ExecutionLog {
						id,
						execution_id,
						entry: LogEntry {
							level: parse(&level, "log level")?,
							message,
							host,
							task,
							play,
							extra_data: extra_data.map(|s| serde_json::from_str(&s)).transpose()?,
						},
						created_at,
					})
				},
			)
			.collect()
	}

	#[instrument(skip(self))]
	async fn delete_logs_before(&self, level: LogLevel, cutoff: DateTime<Utc>) -> Result<u64> {
		let result =
			sqlx::query("DELETE FROM automation_execution_logs WHERE level = ? AND created_at < ?")
				.bind(level.as_str())
				.bind(cutoff)
				.execute(&self.pool)
				.await?;

		Ok(result.rows_affected())
	}

	#[instrument(skip(self, schedule), fields(schedule_id = %schedule.id, definition_id = %schedule.definition_id))]
	async fn create_schedule(&self, schedule: &Schedule) -> Result<()> {
		let columns = ScheduleColumns::from_kind(&schedule.kind);
		sqlx::query(&format!(
			"INSERT INTO automation_schedules ({SCHEDULE_COLUMNS}) \
			 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
		))
		.bind(schedule.id.to_string())
		.bind(&schedule.name)
		.bind(schedule.definition_id.to_string())
		.bind(schedule.kind.type_name())
		.bind(columns.scheduled_time)
		.bind(columns.scheduled_date)
		.bind(columns.day_of_week)
		.bind(columns.cron_expression)
		.bind(&schedule.timezone)
		.bind(serde_json::to_string(&schedule.variables)?)
		.bind(schedule.last_run)
		.bind(schedule.next_run)
		.bind(schedule.run_count as i64)
		.bind(schedule.is_enabled)
		.bind(schedule.created_at)
		.bind(schedule.updated_at)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[instrument(skip(self), fields(schedule_id = %id))]
	async fn get_schedule(&self, id: ScheduleId) -> Result<Option<Schedule>> {
		let row = sqlx::query_as::<_, ScheduleRow>(&format!(
			"SELECT {SCHEDULE_COLUMNS} FROM automation_schedules WHERE id = ?"
		))
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(Schedule::try_from).transpose()
	}

	#[instrument(skip(self))]
	async fn list_schedules(&self) -> Result<Vec<ScheduleSummary>> {
		let rows = sqlx::query_as::<_, ScheduleSummaryRow>(
			r#"
			SELECT s.id, s.name, s.definition_id, d.name, s.schedule_type, s.timezone,
				s.next_run, s.last_run, s.run_count, s.is_enabled
			FROM automation_schedules s
			JOIN automation_definitions d ON d.id = s.definition_id
			ORDER BY s.next_run IS NULL, s.next_run, s.name
			"#,
		)
		.fetch_all(&self.pool)
		.await?;

		rows
			.into_iter()
			.map(
				|(
					id,
					name,
					definition_id,
					definition_name,
					schedule_type,
					timezone,
					next_run,
					last_run,
					run_count,
					is_enabled,
				)|
				 -> Result<ScheduleSummary> {
					Ok(ScheduleSummary {
						id: parse(&id, "schedule id")?,
						name,
						definition_id: parse(&definition_id, "definition id")?,
						definition_name,
						schedule_type,
						timezone,
						next_run,
						last_run,
						run_count: run_count as u64,
						is_enabled,
					})
				},
			)
			.collect()
	}

	#[instrument(skip(self))]
	async fn list_due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>> {
		let rows = sqlx::query_as::<_, ScheduleRow>(&format!(
			"SELECT {SCHEDULE_COLUMNS} FROM automation_schedules \
			 WHERE is_enabled = 1 AND next_run IS NOT NULL AND next_run <= ? \
			 ORDER BY next_run"
		))
		.bind(now)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(Schedule::try_from).collect()
	}

	#[instrument(skip(self), fields(schedule_id = %id))]
	async fn claim_schedule(
		&self,
		id: ScheduleId,
		expected_next_run: DateTime<Utc>,
		ran_at: DateTime<Utc>,
		next_run: Option<DateTime<Utc>>,
	) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE automation_schedules
			SET last_run = ?, run_count = run_count + 1, next_run = ?, is_enabled = ?,
				updated_at = ?
			WHERE id = ? AND next_run = ? AND is_enabled = 1
			"#,
		)
		.bind(ran_at)
		.bind(next_run)
		.bind(next_run.is_some())
		.bind(ran_at)
		.bind(id.to_string())
		.bind(expected_next_run)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	#[instrument(skip(self), fields(schedule_id = %id))]
	async fn set_schedule_enabled(
		&self,
		id: ScheduleId,
		enabled: bool,
		next_run: Option<DateTime<Utc>>,
	) -> Result<bool> {
		let result = sqlx::query(
			"UPDATE automation_schedules SET is_enabled = ?, next_run = ?, updated_at = ? WHERE id = ?",
		)
		.bind(enabled)
		.bind(next_run)
		.bind(Utc::now())
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}
}

fn parse<T>(value: &str, what: &str) -> Result<T>
where
	T: FromStr,
	T::Err: Display,
{
	value
		.parse()
		.map_err(|e| AutomationServerError::Internal(format!("invalid {what} '{value}': {e}")))
}

// Database row types for sqlx

#[derive(sqlx::FromRow)]
struct DefinitionRow {
	id: String,
	name: String,
	description: String,
	category: Option<String>,
	backend: String,
	requires_approval: bool,
	is_dangerous: bool,
	is_enabled: bool,
	timeout_secs: i64,
	target_servers: String,
	target_applications: String,
	default_variables: String,
	required_variables: String,
	allowed_users: String,
	launch_flags: String,
	survey_enabled: bool,
	execution_count: i64,
	success_count: i64,
	last_execution: Option<DateTime<Utc>>,
	usage_count: i64,
	last_used: Option<DateTime<Utc>>,
	created_at: DateTime<Utc>,
	updated_at: DateTime<Utc>,
}

impl TryFrom<DefinitionRow> for JobDefinition {
	type Error = AutomationServerError;

	fn try_from(row: DefinitionRow) -> Result<Self> {
		let backend: ExecutionBackend = serde_json::from_str(&row.backend)?;
		let target_servers: BTreeSet<String> = serde_json::from_str(&row.target_servers)?;
		let target_applications: BTreeSet<String> =
			serde_json::from_str(&row.target_applications)?;
		let default_variables: Variables = serde_json::from_str(&row.default_variables)?;
		let required_variables: Vec<String> = serde_json::from_str(&row.required_variables)?;
		let allowed_users: BTreeSet<String> = serde_json::from_str(&row.allowed_users)?;
		let launch_flags: LaunchFlags = serde_json::from_str(&row.launch_flags)?;

		Ok(JobDefinition {
			id: parse(&row.id, "definition id")?,
			name: row.name,
			description: row.description,
			category: row.category,
			backend,
			requires_approval: row.requires_approval,
			is_dangerous: row.is_dangerous,
			is_enabled: row.is_enabled,
			timeout_secs: row.timeout_secs.max(0) as u64,
			target_servers,
			target_applications,
			default_variables,
			required_variables,
			allowed_users,
			launch_flags,
			survey_enabled: row.survey_enabled,
			stats: DefinitionStats {
				execution_count: row.execution_count.max(0) as u64,
				success_count: row.success_count.max(0) as u64,
				last_execution: row.last_execution,
				usage_count: row.usage_count.max(0) as u64,
				last_used: row.last_used,
			},
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
	}
}

#[derive(sqlx::FromRow)]
struct SurveyParameterRow {
	id: String,
	definition_id: String,
	variable: String,
	question_name: String,
	question_description: String,
	kind: String,
	required: bool,
	default_value: Option<String>,
	min_value: Option<i64>,
	max_value: Option<i64>,
	choices: String,
	sort_order: i64,
}

impl TryFrom<SurveyParameterRow> for SurveyParameter {
	type Error = AutomationServerError;

	fn try_from(row: SurveyParameterRow) -> Result<Self> {
		let kind: SurveyKind = parse(&row.kind, "survey kind")?;
		Ok(SurveyParameter {
			id: parse(&row.id, "survey parameter id")?,
			definition_id: parse(&row.definition_id, "definition id")?,
			variable: row.variable,
			question_name: row.question_name,
			question_description: row.question_description,
			kind,
			required: row.required,
			default: row
				.default_value
				.map(|d| serde_json::from_str(&d))
				.transpose()?,
			min: row.min_value,
			max: row.max_value,
			choices: serde_json::from_str(&row.choices)?,
			order: row.sort_order.max(0) as u32,
		})
	}
}

#[derive(sqlx::FromRow)]
struct ExecutionRow {
	execution_id: String,
	definition_id: String,
	executor: String,
	variables: String,
	target_hosts: String,
	status: String,
	requires_approval: bool,
	approved_by: Option<String>,
	approved_at: Option<DateTime<Utc>>,
	approval_notes: Option<String>,
	started_at: Option<DateTime<Utc>>,
	completed_at: Option<DateTime<Utc>>,
	return_code: Option<i32>,
	stdout: String,
	stderr: String,
	created_at: DateTime<Utc>,
	updated_at: DateTime<Utc>,
}

impl TryFrom<ExecutionRow> for Execution {
	type Error = AutomationServerError;

	fn try_from(row: ExecutionRow) -> Result<Self> {
		let approval = match (row.approved_by, row.approved_at) {
			(Some(approved_by), Some(approved_at)) => Some(Approval {
				approved_by,
				approved_at,
				notes: row.approval_notes,
			}),
			_ => None,
		};

		Ok(Execution {
			definition_id: parse(&row.definition_id, "definition id")?,
			status: parse(&row.status, "execution status")?,
			execution_id: row.execution_id,
			executor: row.executor,
			variables: serde_json::from_str(&row.variables)?,
			target_hosts: serde_json::from_str(&row.target_hosts)?,
			requires_approval: row.requires_approval,
			approval,
			started_at: row.started_at,
			completed_at: row.completed_at,
			return_code: row.return_code,
			stdout: row.stdout,
			stderr: row.stderr,
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
	}
}

#[derive(sqlx::FromRow)]
struct RemoteJobRow {
	execution_id: String,
	remote_job_id: Option<i64>,
	template_id: i64,
	status: String,
	survey_answers: String,
	extra_vars: String,
	limit_hosts: Option<String>,
	job_tags: Option<String>,
	skip_tags: Option<String>,
	job_type: Option<String>,
	verbosity: Option<i64>,
	started_at: Option<DateTime<Utc>>,
	finished_at: Option<DateTime<Utc>>,
	elapsed: Option<f64>,
	result_stdout: String,
	result_stderr: String,
	output_fetched: bool,
	created_at: DateTime<Utc>,
	updated_at: DateTime<Utc>,
}

impl TryFrom<RemoteJobRow> for RemoteJobExecution {
	type Error = AutomationServerError;

	fn try_from(row: RemoteJobRow) -> Result<Self> {
		let status: RemoteJobStatus = parse(&row.status, "remote job status")?;
		let job_type = row
			.job_type
			.as_deref()
			.map(|t| parse::<JobType>(t, "job type"))
			.transpose()?;

		Ok(RemoteJobExecution {
			execution_id: row.execution_id,
			remote_job_id: row.remote_job_id,
			template_id: row.template_id,
			status,
			request: LaunchRequest {
				survey_answers: serde_json::from_str(&row.survey_answers)?,
				extra_vars: serde_json::from_str(&row.extra_vars)?,
				limit: row.limit_hosts,
				job_tags: row.job_tags,
				skip_tags: row.skip_tags,
				job_type,
				verbosity: row.verbosity.map(|v| v.clamp(0, u8::MAX as i64) as u8),
			},
			started_at: row.started_at,
			finished_at: row.finished_at,
			elapsed: row.elapsed,
			result_stdout: row.result_stdout,
			result_stderr: row.result_stderr,
			output_fetched: row.output_fetched,
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
	}
}

type LogRow = (
	i64,
	String,
	String,
	String,
	Option<String>,
	Option<String>,
	Option<String>,
	Option<String>,
	DateTime<Utc>,
);

type ScheduleSummaryRow = (
	String,
	String,
	String,
	String,
	String,
	String,
	Option<DateTime<Utc>>,
	Option<DateTime<Utc>>,
	i64,
	bool,
);

/// Column encoding of a [`ScheduleKind`]. Times are stored as `HH:MM`.
struct ScheduleColumns {
	scheduled_time: Option<String>,
	scheduled_date: Option<String>,
	day_of_week: Option<i64>,
	cron_expression: Option<String>,
}

impl ScheduleColumns {
	fn from_kind(kind: &ScheduleKind) -> Self {
		let mut columns = ScheduleColumns {
			scheduled_time: kind.time().map(|t| t.format("%H:%M").to_string()),
			scheduled_date: None,
			day_of_week: None,
			cron_expression: None,
		};
		match kind {
			ScheduleKind::Once { date, .. } => {
				columns.scheduled_date = Some(date.format("%Y-%m-%d").to_string());
			}
			ScheduleKind::Weekly { day, .. } => {
				columns.day_of_week = Some(day.num_days_from_monday() as i64);
			}
			ScheduleKind::Cron { expression } => {
				columns.cron_expression = Some(expression.clone());
			}
			ScheduleKind::Daily { .. } | ScheduleKind::Monthly { .. } => {}
		}
		columns
	}
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
	id: String,
	name: String,
	definition_id: String,
	schedule_type: String,
	scheduled_time: Option<String>,
	scheduled_date: Option<String>,
	day_of_week: Option<i64>,
	cron_expression: Option<String>,
	timezone: String,
	variables: String,
	last_run: Option<DateTime<Utc>>,
	next_run: Option<DateTime<Utc>>,
	run_count: i64,
	is_enabled: bool,
	created_at: DateTime<Utc>,
	updated_at: DateTime<Utc>,
}

impl ScheduleRow {
	fn kind(&self) -> Result<ScheduleKind> {
		let time = || -> Result<NaiveTime> {
			let raw = self.scheduled_time.as_deref().ok_or_else(|| {
				AutomationServerError::Internal(format!("schedule {} has no scheduled_time", self.id))
			})?;
			NaiveTime::parse_from_str(raw, "%H:%M")
				.or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
				.map_err(|e| {
					AutomationServerError::Internal(format!("invalid scheduled_time '{raw}': {e}"))
				})
		};

		Ok(match self.schedule_type.as_str() {
			"once" => {
				let raw = self.scheduled_date.as_deref().ok_or_else(|| {
					AutomationServerError::Internal(format!("schedule {} has no scheduled_date", self.id))
				})?;
				let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
					AutomationServerError::Internal(format!("invalid scheduled_date '{raw}': {e}"))
				})?;
				ScheduleKind::Once { date, time: time()? }
			}
			"daily" => ScheduleKind::Daily { time: time()? },
			"weekly" => {
				let index = self.day_of_week.unwrap_or(0);
				let day = u8::try_from(index)
					.ok()
					.and_then(weekday_from_index)
					.ok_or_else(|| {
						AutomationServerError::Internal(format!("invalid day_of_week {index}"))
					})?;
				ScheduleKind::Weekly { day, time: time()? }
			}
			"monthly" => ScheduleKind::Monthly { time: time()? },
			"cron" => ScheduleKind::Cron {
				expression: self.cron_expression.clone().ok_or_else(|| {
					AutomationServerError::Internal(format!("schedule {} has no cron_expression", self.id))
				})?,
			},
			other => {
				return Err(AutomationServerError::Internal(format!(
					"unknown schedule type: {other}"
				)))
			}
		})
	}
}

impl TryFrom<ScheduleRow> for Schedule {
	type Error = AutomationServerError;

	fn try_from(row: ScheduleRow) -> Result<Self> {
		let kind = row.kind()?;
		Ok(Schedule {
			id: parse(&row.id, "schedule id")?,
			name: row.name,
			definition_id: parse(&row.definition_id, "definition id")?,
			kind,
			timezone: row.timezone,
			variables: serde_json::from_str(&row.variables)?,
			last_run: row.last_run,
			next_run: row.next_run,
			run_count: row.run_count.max(0) as u64,
			is_enabled: row.is_enabled,
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
	}
}

async fn insert_execution<'e, E>(executor: E, execution: &Execution) -> Result<()>
where
	E: sqlx::Executor<'e, Database = Sqlite>,
{
	let approval = execution.approval.as_ref();
	let result = sqlx::query(&format!(
		"INSERT INTO automation_executions ({EXECUTION_COLUMNS}) \
		 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
	))
	.bind(&execution.execution_id)
	.bind(execution.definition_id.to_string())
	.bind(&execution.executor)
	.bind(serde_json::to_string(&execution.variables)?)
	.bind(serde_json::to_string(&execution.target_hosts)?)
	.bind(execution.status.as_str())
	.bind(execution.requires_approval)
	.bind(approval.map(|a| a.approved_by.clone()))
	.bind(approval.map(|a| a.approved_at))
	.bind(approval.and_then(|a| a.notes.clone()))
	.bind(execution.started_at)
	.bind(execution.completed_at)
	.bind(execution.return_code)
	.bind(&execution.stdout)
	.bind(&execution.stderr)
	.bind(execution.created_at)
	.bind(execution.updated_at)
	.execute(executor)
	.await;

	match result {
		Ok(_) => Ok(()),
		Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(DbError::Conflict(
			format!("execution {} already exists", execution.execution_id),
		)
		.into()),
		Err(e) => Err(e.into()),
	}
}

async fn insert_remote_job<'e, E>(executor: E, job: &RemoteJobExecution) -> Result<()>
where
	E: sqlx::Executor<'e, Database = Sqlite>,
{
	let request = &job.request;
	sqlx::query(&format!(
		"INSERT INTO automation_remote_jobs ({REMOTE_JOB_COLUMNS}) \
		 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
	))
	.bind(&job.execution_id)
	.bind(job.remote_job_id)
	.bind(job.template_id)
	.bind(job.status.as_str())
	.bind(serde_json::to_string(&request.survey_answers)?)
	.bind(serde_json::to_string(&request.extra_vars)?)
	.bind(&request.limit)
	.bind(&request.job_tags)
	.bind(&request.skip_tags)
	.bind(request.job_type.map(|t| t.as_str()))
	.bind(request.verbosity.map(i64::from))
	.bind(job.started_at)
	.bind(job.finished_at)
	.bind(job.elapsed)
	.bind(&job.result_stdout)
	.bind(&job.result_stderr)
	.bind(job.output_fetched)
	.bind(job.created_at)
	.bind(job.updated_at)
	.execute(executor)
	.await?;

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{create_automation_test_pool, local_definition, remote_definition};
	use chrono::{Duration, TimeZone, Weekday};
	use loom_automation_core::{ExecutionOutcome, Transition};
	use serde_json::json;

	async fn repo() -> SqliteAutomationRepository {
		SqliteAutomationRepository::new(create_automation_test_pool().await)
	}

	async fn stored_definition(repo: &SqliteAutomationRepository, requires_approval: bool) -> JobDefinition {
		let mut definition = local_definition("deploy");
		definition.requires_approval = requires_approval;
		definition.target_servers.insert("web-1".to_string());
		definition
			.default_variables
			.insert("region".to_string(), json!("eu-west-1"));
		definition.required_variables.push("region".to_string());
		repo.create_definition(&definition).await.unwrap();
		definition
	}

	#[tokio::test]
	async fn test_definition_roundtrip_preserves_fields() {
		let repo = repo().await;
		let definition = stored_definition(&repo, true).await;

		let loaded = repo.get_definition(definition.id).await.unwrap().unwrap();
		assert_eq!(loaded.name, "deploy");
		assert_eq!(loaded.backend, definition.backend);
		assert!(loaded.target_servers.contains("web-1"));
		assert_eq!(loaded.required_variables, vec!["region".to_string()]);
		assert_eq!(loaded.default_variables.get("region"), Some(&json!("eu-west-1")));
	}

	#[tokio::test]
	async fn test_definition_lookup_by_template() {
		let repo = repo().await;
		let definition = remote_definition("Deploy API", 42);
		repo.create_definition(&definition).await.unwrap();

		let found = repo.get_definition_by_template(42).await.unwrap().unwrap();
		assert_eq!(found.id, definition.id);
		assert!(repo.get_definition_by_template(7).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_list_definitions_hides_disabled() {
		let repo = repo().await;
		let enabled = local_definition("enabled");
		let mut disabled = local_definition("disabled");
		disabled.is_enabled = false;
		repo.create_definition(&enabled).await.unwrap();
		repo.create_definition(&disabled).await.unwrap();

		assert_eq!(repo.list_definitions(false).await.unwrap().len(), 1);
		assert_eq!(repo.list_definitions(true).await.unwrap().len(), 2);
	}

	#[tokio::test]
	async fn test_record_outcome_updates_statistics() {
		let repo = repo().await;
		let definition = stored_definition(&repo, false).await;
		let now = Utc::now();

		repo.record_outcome(definition.id, true, now).await.unwrap();
		repo.record_outcome(definition.id, false, now).await.unwrap();
		repo.record_outcome(definition.id, true, now).await.unwrap();
		repo.record_usage(definition.id, now).await.unwrap();

		let stats = repo.get_definition(definition.id).await.unwrap().unwrap().stats;
		assert_eq!(stats.execution_count, 3);
		assert_eq!(stats.success_count, 2);
		assert_eq!(stats.usage_count, 1);
		assert!(stats.last_execution.is_some());
		assert_eq!(stats.success_rate(), 66.7);
	}

	#[tokio::test]
	async fn test_replace_survey_parameters() {
		let repo = repo().await;
		let definition = stored_definition(&repo, false).await;

		let mut env = SurveyParameter::new(definition.id, "env", SurveyKind::SingleChoice);
		env.choices = vec!["dev".to_string(), "prod".to_string()];
		env.default = Some(json!("dev"));
		env.order = 1;
		let mut count = SurveyParameter::new(definition.id, "count", SurveyKind::Integer);
		count.min = Some(1);
		count.max = Some(10);
		repo
			.replace_survey_parameters(definition.id, &[env.clone(), count.clone()])
			.await
			.unwrap();

		let loaded = repo.list_survey_parameters(definition.id).await.unwrap();
		assert_eq!(loaded, vec![count, env]);

		repo.replace_survey_parameters(definition.id, &[]).await.unwrap();
		assert!(repo.list_survey_parameters(definition.id).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_update_execution_is_compare_and_swap() {
		let repo = repo().await;
		let definition = stored_definition(&repo, false).await;
		let now = Utc::now();
		let execution = Execution::submit("exec-1", &definition, "alice", Variables::new(), vec![], now);
		repo.create_execution(&execution).await.unwrap();

		let mut running = execution.clone();
		running.apply(Transition::Start, now).unwrap();
		assert!(repo
			.update_execution(&running, ExecutionStatus::Approved)
			.await
			.unwrap());

		// A second writer still holding the Approved snapshot loses.
		let mut stale = execution.clone();
		stale.apply(Transition::Cancel, now).unwrap();
		assert!(!repo
			.update_execution(&stale, ExecutionStatus::Approved)
			.await
			.unwrap());

		let stored = repo.get_execution("exec-1").await.unwrap().unwrap();
		assert_eq!(stored.status, ExecutionStatus::Running);
		assert!(stored.started_at.is_some());
	}

	#[tokio::test]
	async fn test_terminal_executions_are_never_updated() {
		let repo = repo().await;
		let definition = stored_definition(&repo, false).await;
		let now = Utc::now();
		let mut execution =
			Execution::submit("exec-1", &definition, "alice", Variables::new(), vec![], now);
		execution.apply(Transition::Start, now).unwrap();
		execution
			.apply(
				Transition::Finish(ExecutionOutcome::from_exit(0, "ok".into(), String::new())),
				now,
			)
			.unwrap();
		repo.create_execution(&execution).await.unwrap();

		assert!(!repo
			.update_execution(&execution, ExecutionStatus::Completed)
			.await
			.unwrap());
	}

	#[tokio::test]
	async fn test_approval_check_constraint() {
		let repo = repo().await;
		let definition = stored_definition(&repo, true).await;
		let now = Utc::now();
		let mut execution =
			Execution::submit("exec-1", &definition, "alice", Variables::new(), vec![], now);
		execution.approval = Some(Approval {
			approved_by: "bob".to_string(),
			approved_at: now,
			notes: None,
		});

		assert!(repo.create_execution(&execution).await.is_err());
	}

	#[tokio::test]
	async fn test_duplicate_execution_id_is_reported() {
		let repo = repo().await;
		let definition = stored_definition(&repo, false).await;
		let execution = Execution::submit(
			"scheduled-1",
			&definition,
			"alice",
			Variables::new(),
			vec![],
			Utc::now(),
		);
		repo.create_execution(&execution).await.unwrap();

		let err = repo.create_execution(&execution).await.unwrap_err();
		assert!(err.is_duplicate());
	}

	#[tokio::test]
	async fn test_execution_roundtrip_with_approval() {
		let repo = repo().await;
		let definition = stored_definition(&repo, true).await;
		let now = Utc::now();
		let mut execution = Execution::submit(
			"exec-1",
			&definition,
			"alice",
			json!({"region": "us-east-1"}).as_object().cloned().unwrap(),
			vec!["db-1".to_string()],
			now,
		);
		repo.create_execution(&execution).await.unwrap();

		execution
			.apply(
				Transition::Approve(Approval {
					approved_by: "bob".to_string(),
					approved_at: now,
					notes: Some("ok".to_string()),
				}),
				now,
			)
			.unwrap();
		assert!(repo
			.update_execution(&execution, ExecutionStatus::Pending)
			.await
			.unwrap());

		let stored = repo.get_execution("exec-1").await.unwrap().unwrap();
		assert_eq!(stored.status, ExecutionStatus::Approved);
		assert_eq!(stored.approval.unwrap().notes.as_deref(), Some("ok"));
		assert_eq!(stored.target_hosts, vec!["db-1".to_string()]);
		assert_eq!(stored.variables.get("region"), Some(&json!("us-east-1")));
	}

	#[tokio::test]
	async fn test_list_executions_filters() {
		let repo = repo().await;
		let definition = stored_definition(&repo, true).await;
		let now = Utc::now();
		for (id, executor) in [("a", "alice"), ("b", "bob"), ("c", "alice")] {
			let execution = Execution::submit(id, &definition, executor, Variables::new(), vec![], now);
			repo.create_execution(&execution).await.unwrap();
		}

		let alice = repo
			.list_executions(&ExecutionFilter {
				executor: Some("alice".to_string()),
				..Default::default()
			})
			.await
			.unwrap();
		assert_eq!(alice.len(), 2);

		let pending = repo
			.list_executions(&ExecutionFilter {
				definition_id: Some(definition.id),
				status: Some(ExecutionStatus::Pending),
				limit: Some(1),
				..Default::default()
			})
			.await
			.unwrap();
		assert_eq!(pending.len(), 1);
	}

	#[tokio::test]
	async fn test_delete_finished_before_keeps_active_and_timeout() {
		let repo = repo().await;
		let definition = stored_definition(&repo, false).await;
		let old = Utc::now() - Duration::days(40);

		let outcomes = [
			("done", Some(ExecutionOutcome::from_exit(0, String::new(), String::new()))),
			("broken", Some(ExecutionOutcome::from_exit(2, String::new(), String::new()))),
			("slow", Some(ExecutionOutcome::timeout(String::new(), String::new()))),
			("active", None),
		];
		for (id, outcome) in outcomes {
			let mut execution =
				Execution::submit(id, &definition, "alice", Variables::new(), vec![], old);
			execution.apply(Transition::Start, old).unwrap();
			if let Some(outcome) = outcome {
				execution.apply(Transition::Finish(outcome), old).unwrap();
			}
			repo.create_execution(&execution).await.unwrap();
			repo.append_log(id, &LogEntry::info("hello")).await.unwrap();
		}

		let deleted = repo
			.delete_finished_before(Utc::now() - Duration::days(30))
			.await
			.unwrap();
		assert_eq!(deleted, 2);
		assert!(repo.get_execution("done").await.unwrap().is_none());
		assert!(repo.list_logs("done").await.unwrap().is_empty());
		assert!(repo.get_execution("slow").await.unwrap().is_some());
		assert!(repo.get_execution("active").await.unwrap().is_some());
	}

	#[tokio::test]
	async fn test_failed_remote_insert_rolls_back_execution() {
		let repo = repo().await;
		let definition = remote_definition("Deploy", 9);
		repo.create_definition(&definition).await.unwrap();

		let first =
			Execution::submit("exec-1", &definition, "alice", Variables::new(), vec![], Utc::now());
		let job = RemoteJobExecution::new("exec-1", 9, LaunchRequest::default(), Utc::now());
		repo.create_execution_with_remote_job(&first, &job).await.unwrap();

		// The launch record collides with exec-1's, so exec-2 must not survive.
		let second =
			Execution::submit("exec-2", &definition, "alice", Variables::new(), vec![], Utc::now());
		assert!(repo
			.create_execution_with_remote_job(&second, &job)
			.await
			.is_err());

		assert!(repo.get_execution("exec-2").await.unwrap().is_none());
		assert!(repo.get_execution("exec-1").await.unwrap().is_some());
		assert!(repo.get_remote_job("exec-1").await.unwrap().is_some());
	}

	#[tokio::test]
	async fn test_remote_job_id_is_never_overwritten() {
		let repo = repo().await;
		let definition = remote_definition("Deploy", 9);
		repo.create_definition(&definition).await.unwrap();
		let execution =
			Execution::submit("exec-1", &definition, "alice", Variables::new(), vec![], Utc::now());
		repo.create_execution(&execution).await.unwrap();

		let request = LaunchRequest {
			limit: Some("web*".to_string()),
			job_type: Some(JobType::Check),
			verbosity: Some(2),
			..Default::default()
		};
		let job = RemoteJobExecution::new("exec-1", 9, request.clone(), Utc::now());
		repo.create_remote_job(&job).await.unwrap();

		assert!(repo.set_remote_job_id("exec-1", 100).await.unwrap());
		assert!(!repo.set_remote_job_id("exec-1", 200).await.unwrap());

		// A full update with a stale in-memory copy leaves the id alone.
		let mut stale = job.clone();
		stale.status = RemoteJobStatus::Running;
		repo.update_remote_job(&stale).await.unwrap();

		let stored = repo.get_remote_job("exec-1").await.unwrap().unwrap();
		assert_eq!(stored.remote_job_id, Some(100));
		assert_eq!(stored.status, RemoteJobStatus::Running);
		assert_eq!(stored.request, request);
	}

	#[tokio::test]
	async fn test_list_active_remote_jobs() {
		let repo = repo().await;
		let definition = remote_definition("Deploy", 9);
		repo.create_definition(&definition).await.unwrap();

		for (id, remote_job_id, status) in [
			("unlaunched", None, RemoteJobStatus::Waiting),
			("running", Some(1), RemoteJobStatus::Running),
			("finished", Some(2), RemoteJobStatus::Successful),
		] {
			let execution =
				Execution::submit(id, &definition, "alice", Variables::new(), vec![], Utc::now());
			repo.create_execution(&execution).await.unwrap();
			let mut job = RemoteJobExecution::new(id, 9, LaunchRequest::default(), Utc::now());
			job.remote_job_id = remote_job_id;
			job.status = status;
			repo.create_remote_job(&job).await.unwrap();
		}

		// "finished" stays listed while its execution is still approved.
		let mut active: Vec<_> = repo
			.list_active_remote_jobs()
			.await
			.unwrap()
			.into_iter()
			.map(|job| job.execution_id)
			.collect();
		active.sort();
		assert_eq!(active, vec!["finished".to_string(), "running".to_string()]);

		let mut done = repo.get_execution("finished").await.unwrap().unwrap();
		done.apply(Transition::Start, Utc::now()).unwrap();
		done
			.apply(
				Transition::Finish(ExecutionOutcome::from_exit(0, String::new(), String::new())),
				Utc::now(),
			)
			.unwrap();
		assert!(repo
			.update_execution(&done, ExecutionStatus::Approved)
			.await
			.unwrap());

		let active = repo.list_active_remote_jobs().await.unwrap();
		assert_eq!(active.len(), 1);
		assert_eq!(active[0].execution_id, "running");
	}

	#[tokio::test]
	async fn test_logs_append_and_cleanup_by_level() {
		let repo = repo().await;
		let definition = stored_definition(&repo, false).await;
		let execution =
			Execution::submit("exec-1", &definition, "alice", Variables::new(), vec![], Utc::now());
		repo.create_execution(&execution).await.unwrap();

		repo
			.append_log(
				"exec-1",
				&LogEntry::error("task failed")
					.with_host("web-1")
					.with_task("restart")
					.with_play("site")
					.with_extra(json!({"rc": 2})),
			)
			.await
			.unwrap();
		repo
			.append_log("exec-1", &LogEntry::new(LogLevel::Debug, "noise"))
			.await
			.unwrap();

		let logs = repo.list_logs("exec-1").await.unwrap();
		assert_eq!(logs.len(), 2);
		assert_eq!(logs[0].entry.host.as_deref(), Some("web-1"));
		assert_eq!(logs[0].entry.extra_data, Some(json!({"rc": 2})));

		let future = Utc::now() + Duration::minutes(1);
		assert_eq!(repo.delete_logs_before(LogLevel::Debug, future).await.unwrap(), 1);
		let logs = repo.list_logs("exec-1").await.unwrap();
		assert_eq!(logs.len(), 1);
		assert_eq!(logs[0].entry.level, LogLevel::Error);
	}

	fn at(h: u32, m: u32) -> NaiveTime {
		NaiveTime::from_hms_opt(h, m, 0).unwrap()
	}

	#[tokio::test]
	async fn test_schedule_roundtrip_for_every_kind() {
		let repo = repo().await;
		let definition = stored_definition(&repo, false).await;
		let kinds = [
			ScheduleKind::Once {
				date: NaiveDate::from_ymd_opt(2030, 1, 2).unwrap(),
				time: at(9, 30),
			},
			ScheduleKind::Daily { time: at(9, 0) },
			ScheduleKind::Weekly {
				day: Weekday::Fri,
				time: at(18, 15),
			},
			ScheduleKind::Monthly { time: at(3, 0) },
			ScheduleKind::Cron {
				expression: "*/5 * * * *".to_string(),
			},
		];

		for kind in kinds {
			let mut schedule = Schedule::new("nightly", definition.id, kind.clone());
			schedule.timezone = "Europe/Istanbul".to_string();
			schedule.variables.insert("dry_run".to_string(), json!(true));
			repo.create_schedule(&schedule).await.unwrap();

			let loaded = repo.get_schedule(schedule.id).await.unwrap().unwrap();
			assert_eq!(loaded.kind, kind);
			assert_eq!(loaded.timezone, "Europe/Istanbul");
			assert_eq!(loaded.variables.get("dry_run"), Some(&json!(true)));
		}

		let summaries = repo.list_schedules().await.unwrap();
		assert_eq!(summaries.len(), 5);
		assert!(summaries.iter().all(|s| s.definition_name == "deploy"));
	}

	#[tokio::test]
	async fn test_claim_schedule_has_one_winner() {
		let repo = repo().await;
		let definition = stored_definition(&repo, false).await;
		let due = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
		let mut schedule = Schedule::new("daily", definition.id, ScheduleKind::Daily { time: at(9, 0) });
		schedule.next_run = Some(due);
		repo.create_schedule(&schedule).await.unwrap();

		let now = due + Duration::seconds(5);
		assert_eq!(repo.list_due_schedules(now).await.unwrap().len(), 1);
		assert!(repo.list_due_schedules(due - Duration::seconds(1)).await.unwrap().is_empty());

		let next = Some(due + Duration::days(1));
		assert!(repo.claim_schedule(schedule.id, due, now, next).await.unwrap());
		assert!(!repo.claim_schedule(schedule.id, due, now, next).await.unwrap());

		let stored = repo.get_schedule(schedule.id).await.unwrap().unwrap();
		assert_eq!(stored.run_count, 1);
		assert_eq!(stored.next_run, next);
		assert_eq!(stored.last_run, Some(now));
		assert!(repo.list_due_schedules(now).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_claim_without_next_run_disables() {
		let repo = repo().await;
		let definition = stored_definition(&repo, false).await;
		let due = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
		let mut schedule = Schedule::new(
			"once",
			definition.id,
			ScheduleKind::Once {
				date: due.date_naive(),
				time: at(9, 0),
			},
		);
		schedule.next_run = Some(due);
		repo.create_schedule(&schedule).await.unwrap();

		assert!(repo.claim_schedule(schedule.id, due, due, None).await.unwrap());
		let stored = repo.get_schedule(schedule.id).await.unwrap().unwrap();
		assert!(!stored.is_enabled);
		assert!(stored.next_run.is_none());
	}

	#[tokio::test]
	async fn test_migrations_are_idempotent() {
		let repo = repo().await;
		run_migrations(repo.pool()).await.unwrap();
		run_migrations(repo.pool()).await.unwrap();
	}
}
