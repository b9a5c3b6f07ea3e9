// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Drives job template runs on the remote orchestrator.
//!
//! The adapter owns the [`RemoteJobExecution`] record of an execution and
//! mirrors the orchestrator's view of the job onto the local [`Execution`].
//! A launch happens at most once per execution: the remote job id is stored
//! with a guarded update and a record that already has one is never
//! launched again.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use loom_automation_core::{
	can_execute, Execution, ExecutionOutcome, ExecutionStatus, JobDefinition, LaunchRequest,
	LogEntry, RemoteJobExecution, RemoteJobStatus, Transition, SYSTEM_APPROVER,
};
use loom_automation_tower::{JobEvent, LaunchPayload, TowerClient, TowerCredentials};
use loom_common_http::RetryConfig;
use loom_server_config::{TowerAuth, TowerConfig};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::error::{AutomationServerError, Result};
use crate::notify::{notify_finished, ExecutionNotifier, Notifier};
use crate::repository::AutomationStore;
use crate::state::{fail_unstarted, finish, record_log, transition};

pub struct RemoteAdapter {
	client: TowerClient,
	store: Arc<dyn AutomationStore>,
	notifier: Arc<dyn ExecutionNotifier>,
}

impl RemoteAdapter {
	pub fn new(client: TowerClient, store: Arc<dyn AutomationStore>) -> Self {
		let notifier = Arc::new(Notifier::new(store.clone()));
		Self {
			client,
			store,
			notifier,
		}
	}

	pub fn with_notifier(mut self, notifier: Arc<dyn ExecutionNotifier>) -> Self {
		self.notifier = notifier;
		self
	}

	/// Builds the orchestrator client from configuration.
	///
	/// `max_retries` counts retries, so reads are attempted `max_retries + 1`
	/// times in total.
	pub fn from_config(config: &TowerConfig, store: Arc<dyn AutomationStore>) -> Result<Self> {
		let credentials = match &config.auth {
			TowerAuth::Token(token) => TowerCredentials::Token(token.clone()),
			TowerAuth::Basic { username, password } => TowerCredentials::Basic {
				username: username.clone(),
				password: password.clone(),
			},
		};

		let client = TowerClient::builder()
			.base_url(&config.url)
			.credentials(credentials)
			.request_timeout(Duration::from_secs(config.timeout_secs))
			.verify_tls(config.verify_tls)
			.retry_config(RetryConfig {
				max_attempts: config.max_retries.saturating_add(1),
				..RetryConfig::default()
			})
			.build()?;

		Ok(Self::new(client, store))
	}

	pub fn client(&self) -> &TowerClient {
		&self.client
	}

	pub fn store(&self) -> &dyn AutomationStore {
		self.store.as_ref()
	}

	/// Launches the job template for an approved execution.
	///
	/// `request` is used when the execution has no remote record yet. A
	/// record that already carries a remote job id is returned unchanged.
	#[instrument(skip(self, definition, request), fields(definition_id = %definition.id))]
	pub async fn launch(
		&self,
		definition: &JobDefinition,
		user: &str,
		execution_id: &str,
		request: Option<LaunchRequest>,
	) -> Result<RemoteJobExecution> {
		let store = self.store.as_ref();
		let template_id = definition.remote_template_id().ok_or_else(|| {
			AutomationServerError::invalid_state(format!(
				"definition {} is not bound to a job template",
				definition.name
			))
		})?;

		let mut execution = store
			.get_execution(execution_id)
			.await?
			.ok_or_else(|| AutomationServerError::not_found(format!("execution {execution_id}")))?;
		if !may_launch(definition, user, &execution) {
			return Err(AutomationServerError::permission(format!(
				"{user} may not launch {}",
				definition.name
			)));
		}

		let mut job = match store.get_remote_job(execution_id).await? {
			Some(job) => job,
			None => {
				let request = request.unwrap_or_else(|| default_request(&execution));
				let job = RemoteJobExecution::new(execution_id, template_id, request, Utc::now());
				store.create_remote_job(&job).await?;
				job
			}
		};

		if let Some(remote_job_id) = job.remote_job_id {
			debug!(execution_id, remote_job_id, "remote job already launched");
			return Ok(job);
		}
		if execution.status != ExecutionStatus::Approved {
			return Err(AutomationServerError::conflict(
				execution_id,
				execution.status,
				ExecutionStatus::Running,
			));
		}

		let payload = LaunchPayload {
			extra_vars: job.request.merged_extra_vars(),
			limit: job.request.limit.clone(),
			job_tags: job.request.job_tags.clone(),
			skip_tags: job.request.skip_tags.clone(),
			job_type: job.request.job_type.map(|t| t.to_string()),
			verbosity: job.request.verbosity,
		};
		let remote_job_id = match self.client.launch(template_id, &payload).await {
			Ok(id) => id,
			Err(e) => {
				record_log(
					store,
					execution_id,
					LogEntry::error(format!("launch of job template {template_id} failed: {e}")),
				)
				.await;
				return Err(e.into());
			}
		};

		if !store.set_remote_job_id(execution_id, remote_job_id).await? {
			warn!(execution_id, remote_job_id, "remote job id was stored by another launch");
			return store.get_remote_job(execution_id).await?.ok_or_else(|| {
				AutomationServerError::not_found(format!("remote job for execution {execution_id}"))
			});
		}

		let now = Utc::now();
		job.remote_job_id = Some(remote_job_id);
		job.status = RemoteJobStatus::Pending;
		job.updated_at = now;
		store.update_remote_job(&job).await?;
		store.record_usage(definition.id, now).await?;
		transition(store, &mut execution, Transition::Start).await?;

		record_log(
			store,
			execution_id,
			LogEntry::info(format!(
				"launched job template {template_id} as remote job {remote_job_id}"
			))
			.with_extra(json!({
				"template_id": template_id,
				"remote_job_id": remote_job_id,
				"limit": job.request.limit,
			})),
		)
		.await;
		info!(execution_id, remote_job_id, "remote job launched");
		Ok(job)
	}

	/// Ends an execution whose launch will not be retried again.
	#[instrument(skip(self))]
	pub async fn mark_launch_failed(&self, execution_id: &str, message: &str) -> Result<()> {
		fail_unstarted(
			self.store.as_ref(),
			execution_id,
			&format!("remote launch gave up: {message}"),
		)
		.await
	}

	/// Refreshes the remote job and mirrors a terminal status onto the execution.
	///
	/// Output is fetched once, on the first poll that sees a terminal status.
	/// Polling a finished record only re-applies its outcome to an execution
	/// that has not finished yet.
	#[instrument(skip(self))]
	pub async fn poll_status(&self, execution_id: &str) -> Result<RemoteJobExecution> {
		let store = self.store.as_ref();
		let mut job = store.get_remote_job(execution_id).await?.ok_or_else(|| {
			AutomationServerError::not_found(format!("remote job for execution {execution_id}"))
		})?;
		let Some(remote_job_id) = job.remote_job_id else {
			return Ok(job);
		};
		if job.status.is_terminal() {
			if let Some(outcome) = job
				.status
				.outcome(job.result_stdout.clone(), job.result_stderr.clone())
			{
				self.project(execution_id, outcome).await?;
			}
			return Ok(job);
		}

		let remote = self.client.job(remote_job_id).await?;
		let previous = job.status;
		let status = RemoteJobStatus::from_remote(&remote.status);
		job.status = status;
		if remote.started.is_some() {
			job.started_at = remote.started;
		}
		if remote.finished.is_some() {
			job.finished_at = remote.finished;
		}

		let mut error_events = Vec::new();
		if status.is_terminal() && !job.output_fetched {
			job.result_stdout = self.client.stdout(remote_job_id).await?;
			error_events = self
				.client
				.job_events(remote_job_id)
				.await?
				.into_iter()
				.filter(JobEvent::is_error)
				.collect();
			job.result_stderr = error_events
				.iter()
				.map(|e| e.stdout.as_str())
				.collect::<Vec<_>>()
				.join("\n");
			job.elapsed = remote.elapsed;
			job.output_fetched = true;
			job.finished_at.get_or_insert_with(Utc::now);
		}
		job.updated_at = Utc::now();
		store.update_remote_job(&job).await?;

		for event in &error_events {
			record_log(store, execution_id, event_entry(event)).await;
		}
		if status != previous {
			debug!(execution_id, remote_job_id, from = %previous, to = %status, "remote status changed");
			record_log(
				store,
				execution_id,
				LogEntry::info(format!(
					"remote job {remote_job_id} is now {status} (was {previous})"
				)),
			)
			.await;
		}

		if let Some(outcome) = status.outcome(job.result_stdout.clone(), job.result_stderr.clone()) {
			self.project(execution_id, outcome).await?;
		}
		Ok(job)
	}

	/// Cancels a launched job that has not finished.
	#[instrument(skip(self))]
	pub async fn cancel(&self, execution_id: &str) -> Result<RemoteJobExecution> {
		let store = self.store.as_ref();
		let mut job = store.get_remote_job(execution_id).await?.ok_or_else(|| {
			AutomationServerError::not_found(format!("remote job for execution {execution_id}"))
		})?;
		let remote_job_id = match job.remote_job_id {
			Some(id) if job.status.is_cancellable() => id,
			_ => {
				return Err(AutomationServerError::invalid_state(format!(
					"remote job for execution {execution_id} cannot be cancelled while {}",
					job.status
				)))
			}
		};

		self.client.cancel(remote_job_id).await?;

		let now = Utc::now();
		job.status = RemoteJobStatus::Canceled;
		job.finished_at = Some(now);
		job.updated_at = now;
		store.update_remote_job(&job).await?;

		if let Some(mut execution) = store.get_execution(execution_id).await? {
			if !execution.status.is_terminal() {
				transition(store, &mut execution, Transition::Cancel).await?;
			}
		}
		record_log(
			store,
			execution_id,
			LogEntry::warning(format!("remote job {remote_job_id} cancelled")),
		)
		.await;
		Ok(job)
	}

	async fn project(&self, execution_id: &str, outcome: ExecutionOutcome) -> Result<()> {
		let store = self.store.as_ref();
		let mut execution = store
			.get_execution(execution_id)
			.await?
			.ok_or_else(|| AutomationServerError::not_found(format!("execution {execution_id}")))?;
		if execution.status.is_terminal() {
			return Ok(());
		}

		let skips_running = matches!(
			outcome.status,
			ExecutionStatus::Error | ExecutionStatus::Cancelled
		);
		if execution.status == ExecutionStatus::Approved && !skips_running {
			transition(store, &mut execution, Transition::Start).await?;
		}
		finish(store, &mut execution, outcome).await?;
		notify_finished(self.notifier.as_ref(), store, &execution, None).await;
		Ok(())
	}
}

/// The approval gate, plus runs the scheduler approved on a user's behalf.
fn may_launch(definition: &JobDefinition, user: &str, execution: &Execution) -> bool {
	if can_execute(definition, user) {
		return true;
	}
	definition.is_enabled
		&& execution
			.approval
			.as_ref()
			.is_some_and(|a| a.approved_by == SYSTEM_APPROVER)
}

fn default_request(execution: &Execution) -> LaunchRequest {
	LaunchRequest {
		extra_vars: execution.variables.clone(),
		limit: (!execution.target_hosts.is_empty()).then(|| execution.target_hosts.join(",")),
		..Default::default()
	}
}

fn event_entry(event: &JobEvent) -> LogEntry {
	let mut entry = LogEntry::error(event.stdout.clone());
	if let Some(host) = &event.host_name {
		entry = entry.with_host(host.clone());
	}
	if let Some(task) = &event.task {
		entry = entry.with_task(task.clone());
	}
	if let Some(play) = &event.play {
		entry = entry.with_play(play.clone());
	}
	entry.with_extra(json!({ "event": event.event }))
}
