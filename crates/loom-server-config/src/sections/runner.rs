// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

use serde::Deserialize;

/// Local playbook runner settings.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
	pub ansible_path: String,
	/// Used when a definition has no timeout of its own.
	pub default_timeout_minutes: u64,
	/// Captured stdout and stderr are each cut to this many bytes.
	pub max_output_bytes: usize,
	/// Parent directory for per-run temp dirs. System temp dir when unset.
	pub work_dir: Option<PathBuf>,
	/// Check that the playbook is a readable YAML file before running it.
	pub validate_playbooks: bool,
}

impl Default for RunnerConfig {
	fn default() -> Self {
		RunnerConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunnerConfigLayer {
	#[serde(default)]
	pub ansible_path: Option<String>,
	#[serde(default)]
	pub default_timeout_minutes: Option<u64>,
	#[serde(default)]
	pub max_output_bytes: Option<usize>,
	#[serde(default)]
	pub work_dir: Option<PathBuf>,
	#[serde(default)]
	pub validate_playbooks: Option<bool>,
}

impl RunnerConfigLayer {
	pub fn merge(&mut self, other: RunnerConfigLayer) {
		if other.ansible_path.is_some() {
			self.ansible_path = other.ansible_path;
		}
		if other.default_timeout_minutes.is_some() {
			self.default_timeout_minutes = other.default_timeout_minutes;
		}
		if other.max_output_bytes.is_some() {
			self.max_output_bytes = other.max_output_bytes;
		}
		if other.work_dir.is_some() {
			self.work_dir = other.work_dir;
		}
		if other.validate_playbooks.is_some() {
			self.validate_playbooks = other.validate_playbooks;
		}
	}

	pub fn finalize(self) -> RunnerConfig {
		RunnerConfig {
			ansible_path: self
				.ansible_path
				.unwrap_or_else(|| "ansible-playbook".to_string()),
			default_timeout_minutes: self.default_timeout_minutes.unwrap_or(30),
			max_output_bytes: self.max_output_bytes.unwrap_or(1024 * 1024),
			work_dir: self.work_dir,
			validate_playbooks: self.validate_playbooks.unwrap_or(true),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = RunnerConfig::default();
		assert_eq!(config.ansible_path, "ansible-playbook");
		assert_eq!(config.default_timeout_minutes, 30);
		assert_eq!(config.max_output_bytes, 1024 * 1024);
		assert!(config.work_dir.is_none());
		assert!(config.validate_playbooks);
	}

	#[test]
	fn test_merge_can_turn_off_validation() {
		let mut layer = RunnerConfigLayer::default();
		layer.merge(RunnerConfigLayer {
			validate_playbooks: Some(false),
			..Default::default()
		});
		assert!(!layer.finalize().validate_playbooks);
	}
}
