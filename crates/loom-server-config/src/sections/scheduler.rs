// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
	pub tick_interval_secs: u64,
	pub poll_interval_secs: u64,
	pub workers: usize,
	pub queue_capacity: usize,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		SchedulerConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchedulerConfigLayer {
	#[serde(default)]
	pub tick_interval_secs: Option<u64>,
	#[serde(default)]
	pub poll_interval_secs: Option<u64>,
	#[serde(default)]
	pub workers: Option<usize>,
	#[serde(default)]
	pub queue_capacity: Option<usize>,
}

impl SchedulerConfigLayer {
	pub fn merge(&mut self, other: SchedulerConfigLayer) {
		if other.tick_interval_secs.is_some() {
			self.tick_interval_secs = other.tick_interval_secs;
		}
		if other.poll_interval_secs.is_some() {
			self.poll_interval_secs = other.poll_interval_secs;
		}
		if other.workers.is_some() {
			self.workers = other.workers;
		}
		if other.queue_capacity.is_some() {
			self.queue_capacity = other.queue_capacity;
		}
	}

	pub fn finalize(self) -> SchedulerConfig {
		SchedulerConfig {
			tick_interval_secs: self.tick_interval_secs.unwrap_or(30).max(1),
			poll_interval_secs: self.poll_interval_secs.unwrap_or(15).max(1),
			workers: self.workers.unwrap_or(4).max(1),
			queue_capacity: self.queue_capacity.unwrap_or(256).max(1),
		}
	}
}
