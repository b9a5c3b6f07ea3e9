// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job definition HTTP handlers.

use axum::{
	extract::{Path, Query, State},
	http::StatusCode,
	Json,
};
use loom_automation_core::{
	launchable_fields, DefinitionId, JobDefinition, LaunchRequest, LaunchableField,
	RemoteJobExecution, SurveyParameter,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::AppState;
use crate::auth::Caller;
use crate::error::ServerError;

#[derive(Debug, Default, Deserialize)]
pub struct ListDefinitionsParams {
	#[serde(default)]
	pub include_disabled: bool,
}

#[derive(Debug, Serialize)]
pub struct DefinitionDetail {
	#[serde(flatten)]
	pub definition: JobDefinition,
	pub survey: Vec<SurveyParameter>,
	pub launchable_fields: Vec<LaunchableField>,
}

/// GET /api/automation/definitions
pub async fn list_definitions(
	State(state): State<AppState>,
	_caller: Caller,
	Query(params): Query<ListDefinitionsParams>,
) -> Result<Json<Vec<JobDefinition>>, ServerError> {
	Ok(Json(
		state
			.service
			.list_definitions(params.include_disabled)
			.await?,
	))
}

/// GET /api/automation/definitions/{id}
pub async fn get_definition(
	State(state): State<AppState>,
	_caller: Caller,
	Path(id): Path<DefinitionId>,
) -> Result<Json<DefinitionDetail>, ServerError> {
	let definition = state.service.get_definition(id).await?;
	let survey = state.service.store().list_survey_parameters(id).await?;
	let launchable_fields = launchable_fields(&definition, &survey);
	Ok(Json(DefinitionDetail {
		definition,
		survey,
		launchable_fields,
	}))
}

/// POST /api/automation/definitions/{id}/launch
#[instrument(skip(state, request), fields(user = %caller.name()))]
pub async fn launch_definition(
	State(state): State<AppState>,
	caller: Caller,
	Path(id): Path<DefinitionId>,
	Json(request): Json<LaunchRequest>,
) -> Result<(StatusCode, Json<RemoteJobExecution>), ServerError> {
	let job = state
		.service
		.launch_remote(id, caller.name(), request)
		.await?;
	Ok((StatusCode::ACCEPTED, Json(job)))
}
