// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Retention and cleanup settings for background jobs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobsConfigLayer {
	pub history_retention_days: Option<u32>,
	pub execution_retention_days: Option<u32>,
	pub debug_log_retention_days: Option<u32>,
	pub info_log_retention_days: Option<u32>,
	pub cleanup_interval_secs: Option<u64>,
}

impl JobsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.history_retention_days.is_some() {
			self.history_retention_days = other.history_retention_days;
		}
		if other.execution_retention_days.is_some() {
			self.execution_retention_days = other.execution_retention_days;
		}
		if other.debug_log_retention_days.is_some() {
			self.debug_log_retention_days = other.debug_log_retention_days;
		}
		if other.info_log_retention_days.is_some() {
			self.info_log_retention_days = other.info_log_retention_days;
		}
		if other.cleanup_interval_secs.is_some() {
			self.cleanup_interval_secs = other.cleanup_interval_secs;
		}
	}

	pub fn finalize(self) -> JobsConfig {
		let defaults = JobsConfig::default();
		JobsConfig {
			history_retention_days: self
				.history_retention_days
				.unwrap_or(defaults.history_retention_days),
			execution_retention_days: self
				.execution_retention_days
				.unwrap_or(defaults.execution_retention_days),
			debug_log_retention_days: self
				.debug_log_retention_days
				.unwrap_or(defaults.debug_log_retention_days),
			info_log_retention_days: self
				.info_log_retention_days
				.unwrap_or(defaults.info_log_retention_days),
			cleanup_interval_secs: self
				.cleanup_interval_secs
				.unwrap_or(defaults.cleanup_interval_secs),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobsConfig {
	pub history_retention_days: u32,
	pub execution_retention_days: u32,
	pub debug_log_retention_days: u32,
	pub info_log_retention_days: u32,
	pub cleanup_interval_secs: u64,
}

impl Default for JobsConfig {
	fn default() -> Self {
		Self {
			history_retention_days: 90,
			execution_retention_days: 30,
			debug_log_retention_days: 7,
			info_log_retention_days: 30,
			cleanup_interval_secs: 86400, // 24 hours
		}
	}
}
