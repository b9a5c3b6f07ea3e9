// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Caller-facing automation operations.
//!
//! [`AutomationService`] checks permissions and validates input before any
//! state is written, then hands approved executions to the dispatcher.

use std::sync::Arc;

use chrono::Utc;
use loom_automation_core::{
	calculate_next_run, can_execute, check_approver, check_canceller, effective_variables,
	validate, validate_cron_expression, validate_timezone, Approval, AutomationError, DefinitionId,
	Execution, ExecutionLog, ExecutionSnapshot, ExecutionStatus, JobDefinition, LaunchRequest,
	LogEntry, RemoteJobExecution, RemoteJobStatus, Schedule, ScheduleId, ScheduleKind,
	ScheduleSummary, Transition,
};
use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::dispatch::ExecutionDispatcher;
use crate::error::{AutomationServerError, Result};
use crate::remote::RemoteAdapter;
use crate::repository::{AutomationStore, ExecutionFilter};
use crate::state::{create_execution, dispatch, record_log, transition};

#[derive(Clone)]
pub struct AutomationService {
	store: Arc<dyn AutomationStore>,
	dispatcher: Arc<dyn ExecutionDispatcher>,
	remote: Option<Arc<RemoteAdapter>>,
}

impl AutomationService {
	pub fn new(store: Arc<dyn AutomationStore>, dispatcher: Arc<dyn ExecutionDispatcher>) -> Self {
		Self {
			store,
			dispatcher,
			remote: None,
		}
	}

	pub fn with_remote(mut self, adapter: Arc<RemoteAdapter>) -> Self {
		self.remote = Some(adapter);
		self
	}

	pub fn store(&self) -> &Arc<dyn AutomationStore> {
		&self.store
	}

	pub fn remote(&self) -> Option<&Arc<RemoteAdapter>> {
		self.remote.as_ref()
	}

	// Definitions

	pub async fn list_definitions(&self, include_disabled: bool) -> Result<Vec<JobDefinition>> {
		self.store.list_definitions(include_disabled).await
	}

	pub async fn get_definition(&self, id: DefinitionId) -> Result<JobDefinition> {
		self.store
			.get_definition(id)
			.await?
			.ok_or_else(|| AutomationServerError::not_found(format!("definition {id}")))
	}

	// Executions

	/// Creates an execution and returns its id.
	///
	/// Definitions that do not require approval are dispatched immediately.
	#[instrument(skip(self, variables, target_hosts), fields(definition_id = %definition_id))]
	pub async fn submit_execution(
		&self,
		definition_id: DefinitionId,
		executor: &str,
		variables: &Value,
		target_hosts: Vec<String>,
	) -> Result<String> {
		let definition = self.get_definition(definition_id).await?;
		if !can_execute(&definition, executor) {
			return Err(AutomationServerError::permission(format!(
				"{executor} may not execute {}",
				definition.name
			)));
		}

		let parameters = self.store.list_survey_parameters(definition.id).await?;
		let supplied =
			validate(&definition, &parameters, variables).map_err(AutomationError::Validation)?;
		let variables = effective_variables(&definition, &parameters, &supplied);

		let execution = Execution::submit(
			Uuid::new_v4().to_string(),
			&definition,
			executor,
			variables,
			target_hosts,
			Utc::now(),
		);
		create_execution(self.store.as_ref(), &definition, &execution, None).await?;
		info!(
			execution_id = %execution.execution_id,
			status = %execution.status,
			"execution submitted"
		);

		if execution.status == ExecutionStatus::Approved {
			dispatch(
				self.store.as_ref(),
				self.dispatcher.as_ref(),
				&execution,
				&definition,
			)
			.await?;
		}
		Ok(execution.execution_id)
	}

	pub async fn get_execution(&self, execution_id: &str) -> Result<Execution> {
		self.store
			.get_execution(execution_id)
			.await?
			.ok_or_else(|| AutomationServerError::not_found(format!("execution {execution_id}")))
	}

	pub async fn get_execution_status(&self, execution_id: &str) -> Result<ExecutionSnapshot> {
		let execution = self.get_execution(execution_id).await?;
		let name = self
			.store
			.get_definition(execution.definition_id)
			.await?
			.map(|d| d.name)
			.unwrap_or_default();
		Ok(execution.snapshot(name))
	}

	pub async fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>> {
		self.store.list_executions(filter).await
	}

	/// Approves a pending execution and dispatches it.
	#[instrument(skip(self, notes))]
	pub async fn approve_execution(
		&self,
		execution_id: &str,
		approver: &str,
		notes: Option<String>,
	) -> Result<Execution> {
		let mut execution = self.get_execution(execution_id).await?;
		let definition = self.get_definition(execution.definition_id).await?;
		check_approver(&definition, &execution, approver)?;

		let approval = Approval {
			approved_by: approver.to_string(),
			approved_at: Utc::now(),
			notes,
		};
		transition(
			self.store.as_ref(),
			&mut execution,
			Transition::Approve(approval),
		)
		.await?;
		record_log(
			self.store.as_ref(),
			execution_id,
			LogEntry::info(format!("approved by {approver}")),
		)
		.await;
		info!(execution_id, approver, "execution approved");

		dispatch(
			self.store.as_ref(),
			self.dispatcher.as_ref(),
			&execution,
			&definition,
		)
		.await?;
		Ok(execution)
	}

	/// Cancels an execution that has not finished.
	///
	/// Only the executor, or a user on the definition's allow list, may cancel.
	/// Running remote jobs are cancelled on the orchestrator. A running local
	/// process cannot be cancelled.
	#[instrument(skip(self))]
	pub async fn cancel_execution(&self, execution_id: &str, user: &str) -> Result<Execution> {
		let store = self.store.as_ref();
		let mut execution = self.get_execution(execution_id).await?;
		let definition = self.get_definition(execution.definition_id).await?;
		check_canceller(&definition, &execution, user)?;
		if execution.status.is_terminal() {
			return Err(AutomationServerError::conflict(
				execution_id,
				execution.status,
				ExecutionStatus::Cancelled,
			));
		}

		let remote_job = store.get_remote_job(execution_id).await?;
		if execution.status == ExecutionStatus::Running {
			return match remote_job {
				Some(job) if job.is_launched() => {
					let adapter = self.remote.as_ref().ok_or(AutomationServerError::RemoteDisabled)?;
					adapter.cancel(execution_id).await?;
					self.get_execution(execution_id).await
				}
				_ => Err(AutomationServerError::invalid_state(format!(
					"execution {execution_id} is running locally and cannot be cancelled"
				))),
			};
		}

		transition(store, &mut execution, Transition::Cancel).await?;
		if let Some(mut job) = remote_job.filter(|job| !job.is_launched()) {
			let now = Utc::now();
			job.status = RemoteJobStatus::Canceled;
			job.finished_at = Some(now);
			job.updated_at = now;
			store.update_remote_job(&job).await?;
		}
		record_log(
			store,
			execution_id,
			LogEntry::warning(format!("execution cancelled by {user}")),
		)
		.await;
		info!(execution_id, user, "execution cancelled");
		Ok(execution)
	}

	pub async fn execution_logs(&self, execution_id: &str) -> Result<Vec<ExecutionLog>> {
		self.get_execution(execution_id).await?;
		self.store.list_logs(execution_id).await
	}

	/// Submits a launch of a remote definition with launch-time overrides.
	///
	/// Survey answers are validated and coerced before anything is stored.
	#[instrument(skip(self, request), fields(definition_id = %definition_id))]
	pub async fn launch_remote(
		&self,
		definition_id: DefinitionId,
		user: &str,
		mut request: LaunchRequest,
	) -> Result<RemoteJobExecution> {
		if self.remote.is_none() {
			return Err(AutomationServerError::RemoteDisabled);
		}
		let definition = self.get_definition(definition_id).await?;
		if !definition.backend.is_remote() {
			return Err(AutomationServerError::invalid_state(format!(
				"definition {} does not run on the orchestrator",
				definition.name
			)));
		}
		if !can_execute(&definition, user) {
			return Err(AutomationServerError::permission(format!(
				"{user} may not launch {}",
				definition.name
			)));
		}

		let parameters = self.store.list_survey_parameters(definition.id).await?;
		let supplied = Value::Object(request.merged_extra_vars());
		let coerced =
			validate(&definition, &parameters, &supplied).map_err(AutomationError::Validation)?;
		for (key, value) in request.survey_answers.iter_mut() {
			if let Some(coerced) = coerced.get(key) {
				*value = coerced.clone();
			}
		}

		let target_hosts = request
			.limit
			.as_deref()
			.map(|limit| {
				limit
					.split(',')
					.map(str::trim)
					.filter(|h| !h.is_empty())
					.map(String::from)
					.collect()
			})
			.unwrap_or_default();
		let execution = Execution::submit(
			Uuid::new_v4().to_string(),
			&definition,
			user,
			effective_variables(&definition, &parameters, &coerced),
			target_hosts,
			Utc::now(),
		);
		create_execution(
			self.store.as_ref(),
			&definition,
			&execution,
			Some(request),
		)
		.await?;

		if execution.status == ExecutionStatus::Approved {
			dispatch(
				self.store.as_ref(),
				self.dispatcher.as_ref(),
				&execution,
				&definition,
			)
			.await?;
		}
		self.store
			.get_remote_job(&execution.execution_id)
			.await?
			.ok_or_else(|| {
				AutomationServerError::not_found(format!(
					"remote job for execution {}",
					execution.execution_id
				))
			})
	}

	// Schedules

	pub async fn list_schedules(&self) -> Result<Vec<ScheduleSummary>> {
		self.store.list_schedules().await
	}

	pub async fn get_schedule(&self, id: ScheduleId) -> Result<Schedule> {
		self.store
			.get_schedule(id)
			.await?
			.ok_or_else(|| AutomationServerError::not_found(format!("schedule {id}")))
	}

	/// Stores a new schedule with its first `next_run` computed.
	#[instrument(skip(self, schedule), fields(schedule_id = %schedule.id, definition_id = %schedule.definition_id))]
	pub async fn create_schedule(&self, mut schedule: Schedule) -> Result<Schedule> {
		validate_timezone(&schedule.timezone)?;
		if let ScheduleKind::Cron { expression } = &schedule.kind {
			validate_cron_expression(expression)?;
		}
		self.get_definition(schedule.definition_id).await?;

		let now = Utc::now();
		schedule.next_run = calculate_next_run(&schedule, now)?;
		if schedule.next_run.is_none() {
			return Err(AutomationError::InvalidSchedule(format!(
				"schedule {} never fires after {now}",
				schedule.name
			))
			.into());
		}
		schedule.is_enabled = true;
		schedule.created_at = now;
		schedule.updated_at = now;
		self.store.create_schedule(&schedule).await?;
		info!(next_run = ?schedule.next_run, "schedule created");
		Ok(schedule)
	}

	/// Enables or disables a schedule. Enabling recomputes `next_run` from now.
	#[instrument(skip(self))]
	pub async fn set_schedule_enabled(&self, id: ScheduleId, enabled: bool) -> Result<Schedule> {
		let schedule = self.get_schedule(id).await?;
		let next_run = if enabled {
			let next = calculate_next_run(&schedule, Utc::now())?;
			if next.is_none() {
				return Err(AutomationError::InvalidSchedule(format!(
					"schedule {} has no future run",
					schedule.name
				))
				.into());
			}
			next
		} else {
			None
		};

		self.store.set_schedule_enabled(id, enabled, next_run).await?;
		self.get_schedule(id).await
	}
}
