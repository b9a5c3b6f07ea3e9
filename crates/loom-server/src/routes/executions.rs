// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Execution HTTP handlers.

use axum::{
	extract::{Path, Query, State},
	http::StatusCode,
	Json,
};
use loom_automation_core::{
	DefinitionId, Execution, ExecutionLog, ExecutionSnapshot, ExecutionStatus,
};
use loom_server_automation::ExecutionFilter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::api::AppState;
use crate::auth::Caller;
use crate::error::ServerError;

#[derive(Debug, Deserialize)]
pub struct SubmitExecutionRequest {
	pub definition_id: DefinitionId,
	#[serde(default = "empty_object")]
	pub variables: Value,
	#[serde(default)]
	pub target_hosts: Vec<String>,
}

fn empty_object() -> Value {
	Value::Object(Default::default())
}

#[derive(Debug, Serialize)]
pub struct SubmitExecutionResponse {
	pub execution_id: String,
	pub status: ExecutionStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveRequest {
	pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListExecutionsParams {
	pub definition_id: Option<DefinitionId>,
	pub executor: Option<String>,
	pub status: Option<String>,
	pub limit: Option<u32>,
}

/// POST /api/automation/executions
#[instrument(skip(state, request), fields(user = %caller.name()))]
pub async fn submit_execution(
	State(state): State<AppState>,
	caller: Caller,
	Json(request): Json<SubmitExecutionRequest>,
) -> Result<(StatusCode, Json<SubmitExecutionResponse>), ServerError> {
	let execution_id = state
		.service
		.submit_execution(
			request.definition_id,
			caller.name(),
			&request.variables,
			request.target_hosts,
		)
		.await?;
	let execution = state.service.get_execution(&execution_id).await?;
	Ok((
		StatusCode::CREATED,
		Json(SubmitExecutionResponse {
			execution_id,
			status: execution.status,
		}),
	))
}

/// GET /api/automation/executions
pub async fn list_executions(
	State(state): State<AppState>,
	_caller: Caller,
	Query(params): Query<ListExecutionsParams>,
) -> Result<Json<Vec<Execution>>, ServerError> {
	let status = params
		.status
		.as_deref()
		.map(str::parse::<ExecutionStatus>)
		.transpose()
		.map_err(ServerError::BadRequest)?;
	let filter = ExecutionFilter {
		definition_id: params.definition_id,
		executor: params.executor,
		status,
		limit: params.limit,
	};
	Ok(Json(state.service.list_executions(&filter).await?))
}

/// GET /api/automation/executions/{id}
pub async fn get_execution_status(
	State(state): State<AppState>,
	_caller: Caller,
	Path(id): Path<String>,
) -> Result<Json<ExecutionSnapshot>, ServerError> {
	Ok(Json(state.service.get_execution_status(&id).await?))
}

/// POST /api/automation/executions/{id}/approve
#[instrument(skip(state, request), fields(user = %caller.name()))]
pub async fn approve_execution(
	State(state): State<AppState>,
	caller: Caller,
	Path(id): Path<String>,
	request: Option<Json<ApproveRequest>>,
) -> Result<Json<ExecutionSnapshot>, ServerError> {
	let notes = request.and_then(|Json(r)| r.notes);
	state
		.service
		.approve_execution(&id, caller.name(), notes)
		.await?;
	Ok(Json(state.service.get_execution_status(&id).await?))
}

/// POST /api/automation/executions/{id}/cancel
#[instrument(skip(state), fields(user = %caller.name()))]
pub async fn cancel_execution(
	State(state): State<AppState>,
	caller: Caller,
	Path(id): Path<String>,
) -> Result<Json<ExecutionSnapshot>, ServerError> {
	state.service.cancel_execution(&id, caller.name()).await?;
	Ok(Json(state.service.get_execution_status(&id).await?))
}

/// GET /api/automation/executions/{id}/logs
pub async fn execution_logs(
	State(state): State<AppState>,
	_caller: Caller,
	Path(id): Path<String>,
) -> Result<Json<Vec<ExecutionLog>>, ServerError> {
	Ok(Json(state.service.execution_logs(&id).await?))
}
