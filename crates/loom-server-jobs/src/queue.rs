// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fixed-size worker pool for one-off tasks.
//!
//! Workers pull from a shared bounded channel and run each task with the
//! same retry policy as the [`crate::JobScheduler`]. When a task fails for the
//! last time its [`Job::on_exhausted`] hook runs. Tasks keep their state in the
//! database, so nothing is shared between workers.

use std::sync::Arc;

use loom_server_db::TriggerSource;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::context::CancellationToken;
use crate::error::JobError;
use crate::job::Job;
use crate::retry::run_with_retry;

type Task = Arc<dyn Job>;

#[derive(Debug, Error)]
pub enum QueueError {
	#[error("task queue is shut down")]
	Closed,

	#[error("task queue is full")]
	Full,
}

/// Cloneable producer side of a [`TaskQueue`].
#[derive(Clone)]
pub struct TaskQueueHandle {
	sender: mpsc::Sender<Task>,
}

impl TaskQueueHandle {
	/// Waits for capacity, then enqueues.
	pub async fn enqueue(&self, task: Task) -> Result<(), QueueError> {
		let task_id = task.id().to_string();
		self
			.sender
			.send(task)
			.await
			.map_err(|_| QueueError::Closed)?;
		debug!(task_id = %task_id, "task enqueued");
		Ok(())
	}

	/// Enqueues without waiting.
	pub fn try_enqueue(&self, task: Task) -> Result<(), QueueError> {
		self.sender.try_send(task).map_err(|e| match e {
			mpsc::error::TrySendError::Full(_) => QueueError::Full,
			mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
		})
	}

	/// Tasks waiting for a worker.
	pub fn pending(&self) -> usize {
		self.sender.max_capacity() - self.sender.capacity()
	}
}

pub struct TaskQueue {
	handle: TaskQueueHandle,
	shutdown_tx: broadcast::Sender<()>,
	cancellation_token: CancellationToken,
	workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskQueue {
	/// Spawns `workers` workers over a channel holding up to `capacity` tasks.
	pub fn start(workers: usize, capacity: usize) -> Self {
		let workers = workers.max(1);
		let (sender, receiver) = mpsc::channel::<Task>(capacity.max(1));
		let receiver = Arc::new(Mutex::new(receiver));
		let (shutdown_tx, _) = broadcast::channel(1);
		let cancellation_token = CancellationToken::new();

		let handles = (0..workers)
			.map(|worker| {
				tokio::spawn(worker_loop(
					worker,
					Arc::clone(&receiver),
					shutdown_tx.subscribe(),
					cancellation_token.clone(),
				))
			})
			.collect();

		info!(workers, capacity, "task queue started");
		Self {
			handle: TaskQueueHandle { sender },
			shutdown_tx,
			cancellation_token,
			workers: Mutex::new(handles),
		}
	}

	pub fn handle(&self) -> TaskQueueHandle {
		self.handle.clone()
	}

	/// Stops the workers. In-flight tasks finish their current attempt and are
	/// not retried; queued tasks are dropped.
	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		self.cancellation_token.cancel();
		let _ = self.shutdown_tx.send(());

		let mut workers = self.workers.lock().await;
		for worker in workers.drain(..) {
			let _ = worker.await;
		}

		let dropped = self.handle.pending();
		if dropped > 0 {
			warn!(dropped, "task queue shut down with queued tasks");
		}
		info!("task queue shut down");
	}
}

async fn worker_loop(
	worker: usize,
	receiver: Arc<Mutex<mpsc::Receiver<Task>>>,
	mut shutdown_rx: broadcast::Receiver<()>,
	cancellation_token: CancellationToken,
) {
	loop {
		let next = tokio::select! {
			task = async { receiver.lock().await.recv().await } => task,
			_ = shutdown_rx.recv() => break,
		};
		let Some(task) = next else {
			break;
		};
		run_task(worker, task, &cancellation_token).await;
	}
	debug!(worker, "task queue worker stopped");
}

async fn run_task(worker: usize, task: Task, cancellation_token: &CancellationToken) {
	let run_id = uuid::Uuid::new_v4().to_string();
	let attempted = run_with_retry(
		task.as_ref(),
		&run_id,
		TriggerSource::Queue,
		cancellation_token,
	)
	.await;

	match attempted.result {
		Ok(output) => {
			debug!(
				worker,
				task_id = %task.id(),
				retry_count = attempted.retry_count,
				message = %output.message,
				"task completed"
			);
		}
		Err(JobError::Cancelled) => {
			info!(worker, task_id = %task.id(), "task cancelled");
		}
		Err(e) => {
			warn!(
				worker,
				task_id = %task.id(),
				retry_count = attempted.retry_count,
				error = %e,
				"task failed"
			);
			task.on_exhausted(&e).await;
		}
	}
}
