// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::Deserialize;

/// Where finished-execution notifications go besides the execution log.
#[derive(Debug, Clone)]
pub struct NotificationsConfig {
	/// JSON notifications are POSTed here when set.
	pub webhook_url: Option<String>,
	pub timeout_secs: u64,
}

impl Default for NotificationsConfig {
	fn default() -> Self {
		NotificationsConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationsConfigLayer {
	#[serde(default)]
	pub webhook_url: Option<String>,
	#[serde(default)]
	pub timeout_secs: Option<u64>,
}

impl NotificationsConfigLayer {
	pub fn merge(&mut self, other: NotificationsConfigLayer) {
		if other.webhook_url.is_some() {
			self.webhook_url = other.webhook_url;
		}
		if other.timeout_secs.is_some() {
			self.timeout_secs = other.timeout_secs;
		}
	}

	pub fn finalize(self) -> NotificationsConfig {
		NotificationsConfig {
			webhook_url: self.webhook_url.filter(|url| !url.trim().is_empty()),
			timeout_secs: self.timeout_secs.unwrap_or(10),
		}
	}
}
