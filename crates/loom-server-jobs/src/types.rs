// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum JobKind {
	Periodic { interval: Duration },
	OneShot,
}

impl JobKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			JobKind::Periodic { .. } => "periodic",
			JobKind::OneShot => "one_shot",
		}
	}

	pub fn interval_secs(&self) -> Option<i64> {
		match self {
			JobKind::Periodic { interval } => Some(interval.as_secs() as i64),
			JobKind::OneShot => None,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutput {
	pub message: String,
	pub metadata: Option<serde_json::Value>,
}

impl JobOutput {
	pub fn message(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			metadata: None,
		}
	}

	pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
		self.metadata = Some(metadata);
		self
	}
}
