// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Remote orchestrator (Tower/AWX) configuration section.

use loom_common_secret::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TowerAuth {
	Token(SecretString),
	Basic {
		username: String,
		password: SecretString,
	},
}

/// Resolved orchestrator settings. Absent when the integration is disabled.
#[derive(Debug, Clone)]
pub struct TowerConfig {
	pub url: String,
	pub auth: TowerAuth,
	pub verify_tls: bool,
	pub timeout_secs: u64,
	pub max_retries: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TowerConfigLayer {
	#[serde(default)]
	pub enabled: Option<bool>,
	#[serde(default)]
	pub url: Option<String>,
	#[serde(default)]
	pub username: Option<String>,
	#[serde(default)]
	pub password: Option<SecretString>,
	#[serde(default)]
	pub token: Option<SecretString>,
	#[serde(default)]
	pub verify_tls: Option<bool>,
	#[serde(default)]
	pub timeout_secs: Option<u64>,
	#[serde(default)]
	pub max_retries: Option<u32>,
}

impl TowerConfigLayer {
	pub fn merge(&mut self, other: TowerConfigLayer) {
		if other.enabled.is_some() {
			self.enabled = other.enabled;
		}
		if other.url.is_some() {
			self.url = other.url;
		}
		if other.username.is_some() {
			self.username = other.username;
		}
		if other.password.is_some() {
			self.password = other.password;
		}
		if other.token.is_some() {
			self.token = other.token;
		}
		if other.verify_tls.is_some() {
			self.verify_tls = other.verify_tls;
		}
		if other.timeout_secs.is_some() {
			self.timeout_secs = other.timeout_secs;
		}
		if other.max_retries.is_some() {
			self.max_retries = other.max_retries;
		}
	}

	/// A token wins over username and password.
	pub fn finalize(self) -> Result<Option<TowerConfig>, ConfigError> {
		let enabled = self.enabled.unwrap_or(self.url.is_some());
		if !enabled {
			return Ok(None);
		}

		let url = self.url.ok_or_else(|| {
			ConfigError::Validation("tower.enabled is set but tower.url is missing".to_string())
		})?;

		let auth = match (self.token, self.username, self.password) {
			(Some(token), _, _) => TowerAuth::Token(token),
			(None, Some(username), Some(password)) => TowerAuth::Basic { username, password },
			_ => {
				return Err(ConfigError::Validation(
					"tower requires either a token or a username and password".to_string(),
				))
			}
		};

		Ok(Some(TowerConfig {
			url: url.trim_end_matches('/').to_string(),
			auth,
			verify_tls: self.verify_tls.unwrap_or(true),
			timeout_secs: self.timeout_secs.unwrap_or(30),
			max_retries: self.max_retries.unwrap_or(3),
		}))
	}
}
