// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use loom_server_automation::LocalRunner;
use loom_server_jobs::{Job, JobContext, JobError, JobOutput};
use serde_json::json;
use tracing::error;

use super::job_error;

/// Runs one approved local execution to completion.
pub struct LocalRunJob {
	id: String,
	execution_id: String,
	runner: Arc<LocalRunner>,
}

impl LocalRunJob {
	pub fn new(execution_id: impl Into<String>, runner: Arc<LocalRunner>) -> Self {
		let execution_id = execution_id.into();
		Self {
			id: format!("local-run-{execution_id}"),
			execution_id,
			runner,
		}
	}
}

#[async_trait]
impl Job for LocalRunJob {
	fn id(&self) -> &str {
		&self.id
	}

	fn name(&self) -> &str {
		"Local Playbook Run"
	}

	fn description(&self) -> &str {
		"Runs a playbook for one execution"
	}

	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let execution = self
			.runner
			.execute(&self.execution_id)
			.await
			.map_err(job_error)?;
		Ok(JobOutput::message(format!(
			"execution {} finished as {}",
			execution.execution_id, execution.status
		))
		.with_metadata(json!({
			"execution_id": execution.execution_id,
			"status": execution.status,
			"return_code": execution.return_code,
		})))
	}

	async fn on_exhausted(&self, error: &JobError) {
		if let Err(e) = self
			.runner
			.abandon(&self.execution_id, &error.to_string())
			.await
		{
			error!(execution_id = %self.execution_id, error = %e, "failed to record run failure");
		}
	}
}
