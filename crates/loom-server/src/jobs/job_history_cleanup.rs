// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use loom_server_jobs::{Job, JobContext, JobError, JobOutput};
use loom_server_db::JobRunStore;

pub struct JobHistoryCleanupJob {
	store: Arc<dyn JobRunStore>,
	retention_days: u32,
}

impl JobHistoryCleanupJob {
	pub fn new(store: Arc<dyn JobRunStore>, retention_days: u32) -> Self {
		Self {
			store,
			retention_days,
		}
	}
}

#[async_trait]
impl Job for JobHistoryCleanupJob {
	fn id(&self) -> &str {
		"job-history-cleanup"
	}

	fn name(&self) -> &str {
		"Job History Cleanup"
	}

	fn description(&self) -> &str {
		"Removes old background job run history"
	}

	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let cutoff = Utc::now() - Duration::days(i64::from(self.retention_days));
		let deleted = self.store.delete_runs_before(cutoff).await?;
		tracing::info!(
			deleted,
			retention_days = self.retention_days,
			"job history cleanup completed"
		);
		Ok(
			JobOutput::message(format!("Cleaned up {deleted} old job run records")).with_metadata(
				serde_json::json!({
					"deleted_count": deleted,
					"retention_days": self.retention_days,
				}),
			),
		)
	}
}
