// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use loom_server_db::TriggerSource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Passed to every [`crate::Job::run`] invocation.
pub struct JobContext {
	pub run_id: String,
	pub triggered_by: TriggerSource,
	/// Zero on the first attempt.
	pub attempt: u32,
	pub cancellation_token: CancellationToken,
}

impl JobContext {
	pub fn new(run_id: impl Into<String>, triggered_by: TriggerSource) -> Self {
		Self {
			run_id: run_id.into(),
			triggered_by,
			attempt: 0,
			cancellation_token: CancellationToken::new(),
		}
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancellation_token.is_cancelled()
	}
}

#[derive(Clone, Debug)]
pub struct CancellationToken {
	cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
	pub fn new() -> Self {
		Self {
			cancelled: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn cancel(&self) {
		self.cancelled.store(true, Ordering::SeqCst);
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::SeqCst)
	}
}

impl Default for CancellationToken {
	fn default() -> Self {
		Self::new()
	}
}
