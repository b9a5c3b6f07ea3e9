// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persisted lifecycle transitions.
//!
//! Every status change goes through [`transition`], which applies the change
//! in memory and then writes it with a compare-and-swap on the previous
//! status. Two writers racing on the same execution cannot both win.

use chrono::Utc;
use loom_automation_core::{
	Execution, ExecutionOutcome, ExecutionStatus, JobDefinition, LaunchRequest, LogEntry,
	RemoteJobExecution, RemoteJobStatus, Transition,
};
use tracing::{debug, warn};

use crate::dispatch::ExecutionDispatcher;
use crate::error::{AutomationServerError, Result};
use crate::repository::AutomationStore;

/// Applies `change` and persists it. On success `execution` holds the new state.
pub async fn transition(
	store: &dyn AutomationStore,
	execution: &mut Execution,
	change: Transition,
) -> Result<()> {
	let target = change.target();
	let expected = execution.status;
	let mut next = execution.clone();
	next.apply(change, Utc::now())?;

	if !store.update_execution(&next, expected).await? {
		let current = store
			.get_execution(&execution.execution_id)
			.await?
			.map(|e| e.status)
			.unwrap_or(expected);
		return Err(AutomationServerError::conflict(
			&execution.execution_id,
			current,
			target,
		));
	}

	debug!(
		execution_id = %execution.execution_id,
		from = %expected,
		to = %target,
		"execution transitioned"
	);
	*execution = next;
	Ok(())
}

/// Moves a running execution to its terminal status and counts the run.
pub async fn finish(
	store: &dyn AutomationStore,
	execution: &mut Execution,
	outcome: ExecutionOutcome,
) -> Result<()> {
	transition(store, execution, Transition::Finish(outcome)).await?;
	store
		.record_outcome(
			execution.definition_id,
			execution.is_successful(),
			execution.completed_at.unwrap_or_else(Utc::now),
		)
		.await
}

/// Appends a log line. Failures are logged and otherwise ignored.
pub async fn record_log(store: &dyn AutomationStore, execution_id: &str, entry: LogEntry) {
	if let Err(e) = store.append_log(execution_id, &entry).await {
		warn!(execution_id, error = %e, "failed to write execution log");
	}
}

/// Persists a new execution. Remote definitions also get their launch record.
///
/// Without an explicit `request` the remote launch uses the execution's
/// variables as extra vars and its target hosts as the limit.
pub async fn create_execution(
	store: &dyn AutomationStore,
	definition: &JobDefinition,
	execution: &Execution,
	request: Option<LaunchRequest>,
) -> Result<()> {
	if let Some(template_id) = definition.remote_template_id() {
		let request = request.unwrap_or_else(|| LaunchRequest {
			extra_vars: execution.variables.clone(),
			limit: (!execution.target_hosts.is_empty()).then(|| execution.target_hosts.join(",")),
			..Default::default()
		});
		let job = RemoteJobExecution::new(
			&execution.execution_id,
			template_id,
			request,
			execution.created_at,
		);
		store.create_execution_with_remote_job(execution, &job).await?;
	} else {
		store.create_execution(execution).await?;
	}

	record_log(
		store,
		&execution.execution_id,
		LogEntry::info(format!(
			"execution submitted by {} ({})",
			execution.executor, execution.status
		)),
	)
	.await;
	Ok(())
}

/// Hands an approved execution to `dispatcher`.
///
/// When the dispatcher refuses, the execution is finished as an error so it
/// does not stay approved with nothing to run it. The dispatch error is
/// still returned.
pub async fn dispatch(
	store: &dyn AutomationStore,
	dispatcher: &dyn ExecutionDispatcher,
	execution: &Execution,
	definition: &JobDefinition,
) -> Result<()> {
	let Err(e) = dispatcher.dispatch(execution, definition).await else {
		return Ok(());
	};
	let message = format!("dispatch failed: {e}");
	if let Err(fail_err) = fail_unstarted(store, &execution.execution_id, &message).await {
		warn!(
			execution_id = %execution.execution_id,
			error = %fail_err,
			"failed to record dispatch failure"
		);
	}
	Err(e)
}

/// Finishes an approved execution that never started as an error.
///
/// An unlaunched remote record is closed with it. Executions that already
/// moved on are left alone.
pub async fn fail_unstarted(
	store: &dyn AutomationStore,
	execution_id: &str,
	message: &str,
) -> Result<()> {
	let now = Utc::now();
	if let Some(mut job) = store.get_remote_job(execution_id).await? {
		if !job.is_launched() && !job.status.is_terminal() {
			job.status = RemoteJobStatus::Error;
			job.result_stderr = message.to_string();
			job.finished_at = Some(now);
			job.updated_at = now;
			store.update_remote_job(&job).await?;
		}
	}

	let Some(mut execution) = store.get_execution(execution_id).await? else {
		return Ok(());
	};
	if execution.status == ExecutionStatus::Approved {
		finish(store, &mut execution, ExecutionOutcome::error(message)).await?;
		record_log(store, execution_id, LogEntry::error(message)).await;
	}
	Ok(())
}
