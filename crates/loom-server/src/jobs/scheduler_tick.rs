// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::Utc;
use loom_server_automation::ScheduleTrigger;
use loom_server_jobs::{Job, JobContext, JobError, JobOutput};

use super::job_error;

/// Fires due schedules on every tick.
pub struct SchedulerTickJob {
	trigger: ScheduleTrigger,
}

impl SchedulerTickJob {
	pub fn new(trigger: ScheduleTrigger) -> Self {
		Self { trigger }
	}
}

#[async_trait]
impl Job for SchedulerTickJob {
	fn id(&self) -> &str {
		"automation-scheduler-tick"
	}

	fn name(&self) -> &str {
		"Automation Scheduler"
	}

	fn description(&self) -> &str {
		"Creates executions for schedules that are due"
	}

	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let report = self.trigger.run_due(Utc::now()).await.map_err(job_error)?;
		let metadata = serde_json::to_value(report).map_err(|e| JobError::fatal(e.to_string()))?;
		Ok(JobOutput::message(format!(
			"{} schedules claimed, {} executions created",
			report.claimed, report.created
		))
		.with_metadata(metadata))
	}
}
