// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Health HTTP handler.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use loom_server_jobs::{HealthState, JobsHealthStatus};
use serde::Serialize;

use crate::api::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
	pub status: HealthState,
	pub timestamp: String,
	pub version: &'static str,
	pub remote_enabled: bool,
	/// Absent until the background scheduler has started.
	pub jobs: Option<JobsHealthStatus>,
}

/// GET /health - background job health.
///
/// Degraded jobs still answer 200; an unhealthy job answers 503.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
	let jobs = match &state.job_scheduler {
		Some(scheduler) => Some(scheduler.health_status().await),
		None => None,
	};
	let status = jobs
		.as_ref()
		.map(|j| j.status)
		.unwrap_or(HealthState::Healthy);

	let response = HealthResponse {
		status,
		timestamp: chrono::Utc::now().to_rfc3339(),
		version: env!("CARGO_PKG_VERSION"),
		remote_enabled: state.service.remote().is_some(),
		jobs,
	};

	let http_status = match status {
		HealthState::Healthy | HealthState::Degraded => StatusCode::OK,
		HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
	};
	(http_status, Json(response))
}
