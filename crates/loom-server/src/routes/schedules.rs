// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Schedule HTTP handlers.

use axum::{
	extract::{Path, State},
	http::StatusCode,
	Json,
};
use loom_automation_core::{
	DefinitionId, Schedule, ScheduleId, ScheduleKind, ScheduleSummary, Variables, DEFAULT_TIMEZONE,
};
use serde::Deserialize;
use tracing::instrument;

use crate::api::AppState;
use crate::auth::Caller;
use crate::error::ServerError;

/// `kind` is flattened, so the body carries `"type": "daily"` and the
/// fields of that schedule type alongside the rest.
#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
	pub name: String,
	pub definition_id: DefinitionId,
	#[serde(flatten)]
	pub kind: ScheduleKind,
	pub timezone: Option<String>,
	#[serde(default)]
	pub variables: Variables,
}

/// GET /api/automation/schedules
pub async fn list_schedules(
	State(state): State<AppState>,
	_caller: Caller,
) -> Result<Json<Vec<ScheduleSummary>>, ServerError> {
	Ok(Json(state.service.list_schedules().await?))
}

/// POST /api/automation/schedules
#[instrument(skip(state, request), fields(user = %caller.name()))]
pub async fn create_schedule(
	State(state): State<AppState>,
	caller: Caller,
	Json(request): Json<CreateScheduleRequest>,
) -> Result<(StatusCode, Json<Schedule>), ServerError> {
	if request.name.trim().is_empty() {
		return Err(ServerError::BadRequest("schedule name is required".to_string()));
	}

	let mut schedule = Schedule::new(request.name, request.definition_id, request.kind);
	schedule.timezone = request
		.timezone
		.unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
	schedule.variables = request.variables;

	let schedule = state.service.create_schedule(schedule).await?;
	Ok((StatusCode::CREATED, Json(schedule)))
}

/// POST /api/automation/schedules/{id}/enable
pub async fn enable_schedule(
	State(state): State<AppState>,
	_caller: Caller,
	Path(id): Path<ScheduleId>,
) -> Result<Json<Schedule>, ServerError> {
	Ok(Json(state.service.set_schedule_enabled(id, true).await?))
}

/// POST /api/automation/schedules/{id}/disable
pub async fn disable_schedule(
	State(state): State<AppState>,
	_caller: Caller,
	Path(id): Path<ScheduleId>,
) -> Result<Json<Schedule>, ServerError> {
	Ok(Json(state.service.set_schedule_enabled(id, false).await?))
}
