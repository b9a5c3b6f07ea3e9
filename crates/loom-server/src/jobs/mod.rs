// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background jobs.
//!
//! Periodic jobs are registered with the [`loom_server_jobs::JobScheduler`].
//! Per-execution tasks ([`LocalRunJob`], [`RemoteLaunchJob`],
//! [`RemotePollJob`]) go through the [`loom_server_jobs::TaskQueue`].

mod job_history_cleanup;
mod local_run;
mod remote_launch;
mod remote_poll;
mod retention;
mod scheduler_tick;

pub use job_history_cleanup::JobHistoryCleanupJob;
pub use local_run::LocalRunJob;
pub use remote_launch::RemoteLaunchJob;
pub use remote_poll::{RemotePollJob, RemotePollSweepJob};
pub use retention::{ExecutionCleanupJob, LogCleanupJob};
pub use scheduler_tick::SchedulerTickJob;

use loom_server_automation::AutomationServerError;
use loom_server_jobs::JobError;

/// Transient failures are retried by the queue. Everything else is final.
pub(crate) fn job_error(e: AutomationServerError) -> JobError {
	if e.is_transient() {
		JobError::retryable(e.to_string())
	} else {
		JobError::fatal(e.to_string())
	}
}
