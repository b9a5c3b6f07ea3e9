// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Sanity checks on local playbook files.

use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlaybookError {
	#[error("playbook {0} does not exist")]
	Missing(String),

	#[error("playbook {0} must be a .yml or .yaml file")]
	NotYaml(String),

	#[error("playbook {path} could not be read: {message}")]
	Unreadable { path: String, message: String },

	#[error("playbook {path} is not valid YAML: {message}")]
	InvalidYaml { path: String, message: String },
}

/// Result of checking a playbook, as reported to API callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybookCheck {
	pub is_valid: bool,
	pub message: String,
}

impl From<std::result::Result<(), PlaybookError>> for PlaybookCheck {
	fn from(result: std::result::Result<(), PlaybookError>) -> Self {
		match result {
			Ok(()) => Self {
				is_valid: true,
				message: "playbook is valid".to_string(),
			},
			Err(e) => Self {
				is_valid: false,
				message: e.to_string(),
			},
		}
	}
}

/// Checks that `path` exists, has a YAML extension and parses as YAML.
pub async fn validate_playbook_file(path: &Path) -> std::result::Result<(), PlaybookError> {
	let display = path.display().to_string();
	let text = match tokio::fs::read_to_string(path).await {
		Ok(text) => text,
		Err(e) if e.kind() == ErrorKind::NotFound => return Err(PlaybookError::Missing(display)),
		Err(e) => {
			return Err(PlaybookError::Unreadable {
				path: display,
				message: e.to_string(),
			})
		}
	};

	let is_yaml = path
		.extension()
		.and_then(|ext| ext.to_str())
		.is_some_and(|ext| ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml"));
	if !is_yaml {
		return Err(PlaybookError::NotYaml(display));
	}

	serde_yaml::from_str::<serde_yaml::Value>(&text).map_err(|e| PlaybookError::InvalidYaml {
		path: display,
		message: e.to_string(),
	})?;
	Ok(())
}
