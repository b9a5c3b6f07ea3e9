// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Playbook file checks.

use std::path::PathBuf;

use axum::Json;
use loom_server_automation::{validate_playbook_file, PlaybookCheck};
use serde::Deserialize;

use crate::auth::Caller;
use crate::error::ServerError;

#[derive(Debug, Deserialize)]
pub struct ValidatePlaybookRequest {
	#[serde(default)]
	pub playbook_path: String,
}

/// POST /api/automation/playbooks/validate
pub async fn validate_playbook(
	_caller: Caller,
	Json(request): Json<ValidatePlaybookRequest>,
) -> Result<Json<PlaybookCheck>, ServerError> {
	let path = request.playbook_path.trim();
	if path.is_empty() {
		return Err(ServerError::BadRequest(
			"playbook_path is required".to_string(),
		));
	}
	let result = validate_playbook_file(&PathBuf::from(path)).await;
	Ok(Json(PlaybookCheck::from(result)))
}
