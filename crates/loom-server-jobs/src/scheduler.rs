// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use loom_server_db::{BackgroundJob, JobRun, JobRunStatus, JobRunStore, TriggerSource};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::context::CancellationToken;
use crate::error::{JobError, Result};
use crate::health::{HealthState, JobHealthStatus, JobsHealthStatus};
use crate::job::Job;
use crate::retry::run_with_retry;
use crate::types::JobKind;

struct RegisteredJob {
	job: Arc<dyn Job>,
	kind: JobKind,
	cancellation_token: CancellationToken,
}

/// Runs registered periodic jobs and keeps their run history.
pub struct JobScheduler {
	jobs: HashMap<String, RegisteredJob>,
	store: Arc<dyn JobRunStore>,
	shutdown_tx: broadcast::Sender<()>,
	handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
	pub fn new(store: Arc<dyn JobRunStore>) -> Self {
		let (shutdown_tx, _) = broadcast::channel(1);
		Self {
			jobs: HashMap::new(),
			store,
			shutdown_tx,
			handles: Mutex::new(Vec::new()),
		}
	}

	pub fn register_periodic(&mut self, job: Arc<dyn Job>, interval: Duration) {
		self.register(job, JobKind::Periodic { interval });
	}

	/// Registers a job that only runs through [`JobScheduler::trigger_job`].
	pub fn register_one_shot(&mut self, job: Arc<dyn Job>) {
		self.register(job, JobKind::OneShot);
	}

	fn register(&mut self, job: Arc<dyn Job>, kind: JobKind) {
		let id = job.id().to_string();
		self.jobs.insert(
			id,
			RegisteredJob {
				job,
				kind,
				cancellation_token: CancellationToken::new(),
			},
		);
	}

	#[instrument(skip(self))]
	pub async fn start(&self) -> Result<()> {
		let mut handles = self.handles.lock().await;

		for (job_id, registered) in &self.jobs {
			self
				.store
				.upsert_job(&BackgroundJob {
					id: job_id.clone(),
					name: registered.job.name().to_string(),
					description: registered.job.description().to_string(),
					kind: registered.kind.as_str().to_string(),
					interval_secs: registered.kind.interval_secs(),
					enabled: true,
				})
				.await?;

			let JobKind::Periodic { interval } = registered.kind else {
				continue;
			};
			let job = Arc::clone(&registered.job);
			let store = Arc::clone(&self.store);
			let mut shutdown_rx = self.shutdown_tx.subscribe();
			let cancellation_token = registered.cancellation_token.clone();
			let job_id = job_id.clone();

			handles.push(tokio::spawn(async move {
				loop {
					tokio::select! {
						_ = tokio::time::sleep(interval) => {
							if cancellation_token.is_cancelled() {
								continue;
							}
							let _ = run_recorded(
								&job,
								store.as_ref(),
								TriggerSource::Schedule,
								&cancellation_token,
							)
							.await;
						}
						_ = shutdown_rx.recv() => {
							info!(job_id = %job_id, "shutting down periodic job");
							break;
						}
					}
				}
			}));
		}

		info!(job_count = handles.len(), "job scheduler started");
		Ok(())
	}

	/// Runs a registered job now and returns the run id.
	#[instrument(skip(self))]
	pub async fn trigger_job(&self, job_id: &str, triggered_by: TriggerSource) -> Result<String> {
		let registered = self
			.jobs
			.get(job_id)
			.ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

		run_recorded(
			&registered.job,
			self.store.as_ref(),
			triggered_by,
			&registered.cancellation_token,
		)
		.await
	}

	#[instrument(skip(self))]
	pub async fn cancel_job(&self, job_id: &str) -> Result<()> {
		let registered = self
			.jobs
			.get(job_id)
			.ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

		registered.cancellation_token.cancel();
		Ok(())
	}

	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		let _ = self.shutdown_tx.send(());

		let mut handles = self.handles.lock().await;
		for handle in handles.drain(..) {
			let _ = handle.await;
		}

		info!("job scheduler shut down");
	}

	pub fn job_ids(&self) -> Vec<String> {
		self.jobs.keys().cloned().collect()
	}

	#[instrument(skip(self))]
	pub async fn job_status(&self, job_id: &str) -> Option<JobHealthStatus> {
		let registered = self.jobs.get(job_id)?;

		let last_run = self.store.get_last_run(job_id).await.ok().flatten();
		let consecutive_failures = self
			.store
			.count_consecutive_failures(job_id)
			.await
			.unwrap_or(0);

		Some(JobHealthStatus {
			job_id: job_id.to_string(),
			name: registered.job.name().to_string(),
			status: HealthState::from_last_run(last_run.as_ref(), consecutive_failures),
			last_run: last_run.map(Into::into),
			consecutive_failures,
		})
	}

	#[instrument(skip(self))]
	pub async fn health_status(&self) -> JobsHealthStatus {
		let mut jobs = Vec::with_capacity(self.jobs.len());
		for job_id in self.jobs.keys() {
			if let Some(status) = self.job_status(job_id).await {
				jobs.push(status);
			}
		}
		jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));
		JobsHealthStatus::from_jobs(jobs)
	}
}

/// One run with retries, recorded as a single history row.
async fn run_recorded(
	job: &Arc<dyn Job>,
	store: &dyn JobRunStore,
	triggered_by: TriggerSource,
	cancellation_token: &CancellationToken,
) -> Result<String> {
	let run_id = uuid::Uuid::new_v4().to_string();
	store
		.record_run_start(&JobRun {
			id: run_id.clone(),
			job_id: job.id().to_string(),
			status: JobRunStatus::Running,
			started_at: Utc::now(),
			completed_at: None,
			duration_ms: None,
			error_message: None,
			retry_count: 0,
			triggered_by,
			metadata: None,
		})
		.await?;

	let attempted = run_with_retry(job.as_ref(), &run_id, triggered_by, cancellation_token).await;
	let retry_count = attempted.retry_count;

	match attempted.result {
		Ok(output) => {
			store
				.record_run_complete(
					&run_id,
					JobRunStatus::Succeeded,
					retry_count,
					None,
					output.metadata,
				)
				.await?;
			info!(job_id = %job.id(), run_id = %run_id, message = %output.message, "job completed");
			Ok(run_id)
		}
		Err(JobError::Cancelled) => {
			store
				.record_run_complete(&run_id, JobRunStatus::Cancelled, retry_count, None, None)
				.await?;
			info!(job_id = %job.id(), run_id = %run_id, "job cancelled");
			Err(JobError::Cancelled)
		}
		Err(e) => {
			let message = e.to_string();
			store
				.record_run_complete(
					&run_id,
					JobRunStatus::Failed,
					retry_count,
					Some(message.clone()),
					None,
				)
				.await?;
			warn!(job_id = %job.id(), run_id = %run_id, error = %message, "job failed");
			job.on_exhausted(&e).await;
			Err(e)
		}
	}
}
