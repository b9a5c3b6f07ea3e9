// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use loom_server_automation::{AutomationServerError, RemoteAdapter};
use loom_server_jobs::{Job, JobContext, JobError, JobOutput};
use serde_json::json;
use tracing::{error, warn};

use super::job_error;

/// Launches the job template for one approved remote execution.
///
/// Retries reuse the stored launch record, so a job that reached the
/// orchestrator is never launched twice. When the last attempt fails the
/// execution ends in Error.
pub struct RemoteLaunchJob {
	id: String,
	execution_id: String,
	adapter: Arc<RemoteAdapter>,
}

impl RemoteLaunchJob {
	pub fn new(execution_id: impl Into<String>, adapter: Arc<RemoteAdapter>) -> Self {
		let execution_id = execution_id.into();
		Self {
			id: format!("remote-launch-{execution_id}"),
			execution_id,
			adapter,
		}
	}

	async fn launch(&self) -> Result<i64, AutomationServerError> {
		let store = self.adapter.store();
		let execution = store.get_execution(&self.execution_id).await?.ok_or_else(|| {
			AutomationServerError::not_found(format!("execution {}", self.execution_id))
		})?;
		let definition = store
			.get_definition(execution.definition_id)
			.await?
			.ok_or_else(|| {
				AutomationServerError::not_found(format!(
					"definition {}",
					execution.definition_id
				))
			})?;

		let job = self
			.adapter
			.launch(&definition, &execution.executor, &self.execution_id, None)
			.await?;
		job.remote_job_id.ok_or_else(|| {
			AutomationServerError::Internal(format!(
				"launch of {} returned no remote job id",
				self.execution_id
			))
		})
	}
}

#[async_trait]
impl Job for RemoteLaunchJob {
	fn id(&self) -> &str {
		&self.id
	}

	fn name(&self) -> &str {
		"Remote Job Launch"
	}

	fn description(&self) -> &str {
		"Launches a job template on the remote orchestrator"
	}

	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.is_cancelled() {
			return Err(JobError::Cancelled);
		}
		if ctx.attempt > 0 {
			warn!(execution_id = %self.execution_id, attempt = ctx.attempt, "retrying remote launch");
		}

		let remote_job_id = self.launch().await.map_err(job_error)?;
		Ok(
			JobOutput::message(format!("launched remote job {remote_job_id}")).with_metadata(json!({
				"execution_id": self.execution_id,
				"remote_job_id": remote_job_id,
			})),
		)
	}

	async fn on_exhausted(&self, error: &JobError) {
		if let Err(e) = self
			.adapter
			.mark_launch_failed(&self.execution_id, &error.to_string())
			.await
		{
			error!(execution_id = %self.execution_id, error = %e, "failed to record launch failure");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use loom_automation_core::{Execution, ExecutionStatus, RemoteJobStatus};
	use loom_automation_tower::TowerClient;
	use loom_server_automation::state::create_execution;
	use loom_server_automation::testing::{create_automation_test_pool, remote_definition};
	use loom_server_automation::{AutomationStore, SqliteAutomationRepository};
	use loom_server_db::TriggerSource;

	async fn setup() -> (Arc<SqliteAutomationRepository>, Arc<RemoteAdapter>, String) {
		let repo = Arc::new(SqliteAutomationRepository::new(
			create_automation_test_pool().await,
		));
		let definition = remote_definition("patch", 3);
		repo.create_definition(&definition).await.unwrap();
		let execution = Execution::submit(
			"exec-1",
			&definition,
			"alice",
			Default::default(),
			vec![],
			chrono::Utc::now(),
		);
		create_execution(repo.as_ref(), &definition, &execution, None)
			.await
			.unwrap();

		// Nothing listens on this port, so every launch fails to connect.
		let client = TowerClient::builder()
			.base_url("http://127.0.0.1:9")
			.token(loom_common_secret::Secret::new("t".to_string()))
			.build()
			.unwrap();
		let adapter = Arc::new(RemoteAdapter::new(client, repo.clone()));
		(repo, adapter, execution.execution_id)
	}

	#[tokio::test]
	async fn test_exhausted_launch_marks_execution_error() {
		let (repo, adapter, execution_id) = setup().await;
		let job = RemoteLaunchJob::new(&execution_id, adapter);

		let err = job
			.run(&JobContext::new("run", TriggerSource::Queue))
			.await
			.unwrap_err();
		assert!(err.is_retryable());

		job.on_exhausted(&err).await;

		let execution = repo.get_execution(&execution_id).await.unwrap().unwrap();
		assert_eq!(execution.status, ExecutionStatus::Error);
		assert!(execution.stderr.contains("job failed"));
		let remote = repo.get_remote_job(&execution_id).await.unwrap().unwrap();
		assert_eq!(remote.status, RemoteJobStatus::Error);
		assert!(remote.remote_job_id.is_none());
	}

	#[tokio::test]
	async fn test_missing_execution_is_fatal() {
		let (_repo, adapter, _) = setup().await;
		let job = RemoteLaunchJob::new("missing", adapter);

		let err = job
			.run(&JobContext::new("run", TriggerSource::Queue))
			.await
			.unwrap_err();
		assert!(!err.is_retryable());
	}
}
