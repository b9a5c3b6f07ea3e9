// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Status polling for launched remote jobs.
//!
//! The sweep runs on the scheduler and fans out one [`RemotePollJob`] per
//! active remote job onto the task queue. A failed poll is not retried in
//! place; the next sweep picks the job up again.

use std::sync::Arc;

use async_trait::async_trait;
use loom_server_automation::RemoteAdapter;
use loom_server_jobs::{Job, JobContext, JobError, JobOutput, QueueError, TaskQueueHandle};
use serde_json::json;
use tracing::{debug, warn};

use super::job_error;

pub struct RemotePollSweepJob {
	adapter: Arc<RemoteAdapter>,
	queue: TaskQueueHandle,
}

impl RemotePollSweepJob {
	pub fn new(adapter: Arc<RemoteAdapter>, queue: TaskQueueHandle) -> Self {
		Self { adapter, queue }
	}
}

#[async_trait]
impl Job for RemotePollSweepJob {
	fn id(&self) -> &str {
		"remote-poll-sweep"
	}

	fn name(&self) -> &str {
		"Remote Job Poll"
	}

	fn description(&self) -> &str {
		"Queues a status refresh for every active remote job"
	}

	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let active = self
			.adapter
			.store()
			.list_active_remote_jobs()
			.await
			.map_err(job_error)?;

		let mut queued = 0usize;
		for job in &active {
			let task = Arc::new(RemotePollJob::new(&job.execution_id, self.adapter.clone()));
			match self.queue.try_enqueue(task) {
				Ok(()) => queued += 1,
				Err(QueueError::Full) => {
					warn!(
						active = active.len(),
						queued, "task queue full, deferring remaining polls"
					);
					break;
				}
				Err(QueueError::Closed) => return Err(JobError::Cancelled),
			}
		}

		debug!(active = active.len(), queued, "remote poll sweep finished");
		Ok(
			JobOutput::message(format!("Queued {queued} of {} remote polls", active.len()))
				.with_metadata(json!({
					"active": active.len(),
					"queued": queued,
				})),
		)
	}
}

/// Refreshes the status of one remote job.
pub struct RemotePollJob {
	id: String,
	execution_id: String,
	adapter: Arc<RemoteAdapter>,
}

impl RemotePollJob {
	pub fn new(execution_id: impl Into<String>, adapter: Arc<RemoteAdapter>) -> Self {
		let execution_id = execution_id.into();
		Self {
			id: format!("remote-poll-{execution_id}"),
			execution_id,
			adapter,
		}
	}
}

#[async_trait]
impl Job for RemotePollJob {
	fn id(&self) -> &str {
		&self.id
	}

	fn name(&self) -> &str {
		"Remote Job Status"
	}

	fn description(&self) -> &str {
		"Mirrors the remote job status onto its execution"
	}

	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let job = self
			.adapter
			.poll_status(&self.execution_id)
			.await
			.map_err(|e| JobError::fatal(e.to_string()))?;
		Ok(JobOutput::message(format!(
			"remote job for {} is {}",
			self.execution_id, job.status
		)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;
	use loom_automation_core::{Execution, LaunchRequest, RemoteJobExecution};
	use loom_automation_tower::TowerClient;
	use loom_common_secret::Secret;
	use loom_server_automation::testing::{create_automation_test_pool, remote_definition};
	use loom_server_automation::{AutomationStore, SqliteAutomationRepository};
	use loom_server_db::TriggerSource;
	use loom_server_jobs::TaskQueue;

	async fn launched_job(repo: &SqliteAutomationRepository, n: i64) {
		let definition = remote_definition(&format!("deploy-{n}"), n);
		repo.create_definition(&definition).await.unwrap();
		let execution = Execution::submit(
			format!("exec-{n}"),
			&definition,
			"alice",
			Default::default(),
			vec![],
			Utc::now(),
		);
		repo.create_execution(&execution).await.unwrap();
		let job = RemoteJobExecution::new(
			&execution.execution_id,
			n,
			LaunchRequest::default(),
			Utc::now(),
		);
		repo.create_remote_job(&job).await.unwrap();
		assert!(repo
			.set_remote_job_id(&execution.execution_id, 100 + n)
			.await
			.unwrap());
	}

	fn adapter(repo: Arc<SqliteAutomationRepository>) -> Arc<RemoteAdapter> {
		let client = TowerClient::builder()
			.base_url("http://tower.invalid")
			.token(Secret::new("t".to_string()))
			.build()
			.unwrap();
		Arc::new(RemoteAdapter::new(client, repo))
	}

	#[tokio::test]
	async fn test_sweep_defers_when_queue_is_full() {
		let repo = Arc::new(SqliteAutomationRepository::new(
			create_automation_test_pool().await,
		));
		for n in 1..=3 {
			launched_job(&repo, n).await;
		}

		// The worker cannot pull until the test yields, so the sweep sees a full queue.
		let queue = TaskQueue::start(1, 2);
		let sweep = RemotePollSweepJob::new(adapter(repo), queue.handle());
		let output = sweep
			.run(&JobContext::new("run", TriggerSource::Schedule))
			.await
			.unwrap();

		let metadata = output.metadata.unwrap();
		assert_eq!(metadata["active"], 3);
		assert_eq!(metadata["queued"], 2);
	}

	#[tokio::test]
	async fn test_sweep_with_nothing_active() {
		let repo = Arc::new(SqliteAutomationRepository::new(
			create_automation_test_pool().await,
		));
		let queue = TaskQueue::start(1, 4);
		let sweep = RemotePollSweepJob::new(adapter(repo), queue.handle());
		let output = sweep
			.run(&JobContext::new("run", TriggerSource::Schedule))
			.await
			.unwrap();
		assert_eq!(output.metadata.unwrap()["queued"], 0);
	}

	#[tokio::test]
	async fn test_poll_of_unknown_execution_is_fatal() {
		let repo = Arc::new(SqliteAutomationRepository::new(
			create_automation_test_pool().await,
		));
		let job = RemotePollJob::new("missing", adapter(repo));
		let err = job
			.run(&JobContext::new("run", TriggerSource::Queue))
			.await
			.unwrap_err();
		assert!(!err.is_retryable());
	}
}
