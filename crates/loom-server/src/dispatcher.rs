// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use loom_automation_core::{Execution, ExecutionBackend, JobDefinition};
use loom_server_automation::{
	AutomationServerError, ExecutionDispatcher, LocalRunner, RemoteAdapter, Result,
};
use loom_server_jobs::{Job, TaskQueueHandle};
use tracing::info;

use crate::jobs::{LocalRunJob, RemoteLaunchJob};

/// Queues approved executions onto the worker pool.
///
/// Local definitions become a [`LocalRunJob`], remote ones a
/// [`RemoteLaunchJob`].
pub struct QueueDispatcher {
	queue: TaskQueueHandle,
	runner: Arc<LocalRunner>,
	remote: Option<Arc<RemoteAdapter>>,
}

impl QueueDispatcher {
	pub fn new(
		queue: TaskQueueHandle,
		runner: Arc<LocalRunner>,
		remote: Option<Arc<RemoteAdapter>>,
	) -> Self {
		Self {
			queue,
			runner,
			remote,
		}
	}
}

#[async_trait]
impl ExecutionDispatcher for QueueDispatcher {
	async fn dispatch(&self, execution: &Execution, definition: &JobDefinition) -> Result<()> {
		let id = execution.execution_id.as_str();
		let task: Arc<dyn Job> = match &definition.backend {
			ExecutionBackend::Local { .. } => Arc::new(LocalRunJob::new(id, self.runner.clone())),
			ExecutionBackend::Remote { .. } => {
				let adapter = self
					.remote
					.as_ref()
					.ok_or(AutomationServerError::RemoteDisabled)?;
				Arc::new(RemoteLaunchJob::new(id, adapter.clone()))
			}
		};

		self
			.queue
			.enqueue(task)
			.await
			.map_err(|e| AutomationServerError::Dispatch(e.to_string()))?;
		info!(
			execution_id = id,
			backend = definition.backend.kind(),
			pending = self.queue.pending(),
			"execution queued"
		);
		Ok(())
	}
}
