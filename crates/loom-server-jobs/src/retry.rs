// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Retry policy shared by scheduled jobs and queued tasks.

use std::time::Duration;

use loom_server_db::TriggerSource;
use tracing::warn;

use crate::context::{CancellationToken, JobContext};
use crate::error::{JobError, Result};
use crate::job::Job;
use crate::types::JobOutput;

const BASE_RETRY_DELAY_SECS: u64 = 1;
const MAX_RETRY_DELAY_SECS: u64 = 60;
const RETRY_FACTOR: f64 = 2.0;
pub const MAX_RETRIES: u32 = 3;

/// Seconds to wait before retry number `retry_count` (1-based).
pub fn calculate_backoff_delay(retry_count: u32) -> u64 {
	let exponent = retry_count.saturating_sub(1).min(32) as i32;
	let delay = BASE_RETRY_DELAY_SECS as f64 * RETRY_FACTOR.powi(exponent);
	(delay as u64).min(MAX_RETRY_DELAY_SECS)
}

pub(crate) struct Attempted {
	pub result: Result<JobOutput>,
	pub retry_count: u32,
}

/// Runs `job` until it succeeds, fails without `retryable`, is cancelled, or
/// uses up [`MAX_RETRIES`].
pub(crate) async fn run_with_retry(
	job: &dyn Job,
	run_id: &str,
	triggered_by: TriggerSource,
	cancellation_token: &CancellationToken,
) -> Attempted {
	let mut retry_count = 0u32;

	loop {
		let ctx = JobContext {
			run_id: run_id.to_string(),
			triggered_by: if retry_count > 0 {
				TriggerSource::Retry
			} else {
				triggered_by
			},
			attempt: retry_count,
			cancellation_token: cancellation_token.clone(),
		};

		let result = job.run(&ctx).await;
		let retry = matches!(&result, Err(e) if e.is_retryable())
			&& retry_count < MAX_RETRIES
			&& !cancellation_token.is_cancelled();
		if !retry {
			return Attempted {
				result,
				retry_count,
			};
		}

		retry_count += 1;
		let delay_secs = calculate_backoff_delay(retry_count);
		if let Err(e) = &result {
			warn!(
				job_id = %job.id(),
				run_id = %run_id,
				retry_count,
				delay_secs,
				error = %e,
				"job failed, retrying"
			);
		}
		tokio::time::sleep(Duration::from_secs(delay_secs)).await;

		if cancellation_token.is_cancelled() {
			return Attempted {
				result: Err(JobError::Cancelled),
				retry_count,
			};
		}
	}
}
