// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Retention for finished executions and their logs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use loom_automation_core::LogLevel;
use loom_server_automation::AutomationStore;
use loom_server_jobs::{Job, JobContext, JobError, JobOutput};
use serde_json::json;
use tracing::info;

use super::job_error;

/// Deletes completed, failed and cancelled executions past retention.
pub struct ExecutionCleanupJob {
	store: Arc<dyn AutomationStore>,
	retention_days: u32,
}

impl ExecutionCleanupJob {
	pub fn new(store: Arc<dyn AutomationStore>, retention_days: u32) -> Self {
		Self {
			store,
			retention_days,
		}
	}
}

#[async_trait]
impl Job for ExecutionCleanupJob {
	fn id(&self) -> &str {
		"execution-cleanup"
	}

	fn name(&self) -> &str {
		"Execution Cleanup"
	}

	fn description(&self) -> &str {
		"Removes finished executions older than the retention period"
	}

	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let cutoff = Utc::now() - Duration::days(i64::from(self.retention_days));
		let deleted = self
			.store
			.delete_finished_before(cutoff)
			.await
			.map_err(job_error)?;
		info!(deleted, retention_days = self.retention_days, "execution cleanup completed");
		Ok(
			JobOutput::message(format!("Deleted {deleted} finished executions")).with_metadata(
				json!({
					"deleted_count": deleted,
					"retention_days": self.retention_days,
				}),
			),
		)
	}
}

/// Deletes debug and info log lines past their retention. Warnings and errors
/// live as long as their execution.
pub struct LogCleanupJob {
	store: Arc<dyn AutomationStore>,
	debug_retention_days: u32,
	info_retention_days: u32,
}

impl LogCleanupJob {
	pub fn new(
		store: Arc<dyn AutomationStore>,
		debug_retention_days: u32,
		info_retention_days: u32,
	) -> Self {
		Self {
			store,
			debug_retention_days,
			info_retention_days,
		}
	}
}

#[async_trait]
impl Job for LogCleanupJob {
	fn id(&self) -> &str {
		"execution-log-cleanup"
	}

	fn name(&self) -> &str {
		"Execution Log Cleanup"
	}

	fn description(&self) -> &str {
		"Removes old debug and info execution log lines"
	}

	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let now = Utc::now();
		let mut deleted = 0;
		for (level, days) in [
			(LogLevel::Debug, self.debug_retention_days),
			(LogLevel::Info, self.info_retention_days),
		] {
			let cutoff = now - Duration::days(i64::from(days));
			deleted += self
				.store
				.delete_logs_before(level, cutoff)
				.await
				.map_err(job_error)?;
		}

		info!(deleted, "execution log cleanup completed");
		Ok(JobOutput::message(format!("Deleted {deleted} log lines"))
			.with_metadata(json!({ "deleted_count": deleted })))
	}
}
