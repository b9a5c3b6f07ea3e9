// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP error mapping.

use axum::{
	http::StatusCode,
	response::{IntoResponse, Response},
	Json,
};
use loom_automation_core::{AutomationError, Violation};
use loom_server_automation::AutomationServerError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
	#[error("unauthorized: {0}")]
	Unauthorized(String),

	#[error("bad request: {0}")]
	BadRequest(String),

	#[error(transparent)]
	Automation(#[from] AutomationServerError),
}

impl From<AutomationError> for ServerError {
	fn from(e: AutomationError) -> Self {
		ServerError::Automation(e.into())
	}
}

/// Body of every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
	pub error: String,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub violations: Option<Vec<Violation>>,
}

impl ServerError {
	pub fn status_code(&self) -> StatusCode {
		match self {
			ServerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
			ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
			ServerError::Automation(e) => automation_status(e),
		}
	}

	fn code(&self) -> &'static str {
		match self.status_code() {
			StatusCode::UNAUTHORIZED => "unauthorized",
			StatusCode::BAD_REQUEST => "bad_request",
			StatusCode::UNPROCESSABLE_ENTITY => "validation_failed",
			StatusCode::FORBIDDEN => "forbidden",
			StatusCode::NOT_FOUND => "not_found",
			StatusCode::CONFLICT => "conflict",
			StatusCode::BAD_GATEWAY => "remote_error",
			_ => "internal_error",
		}
	}
}

fn automation_status(e: &AutomationServerError) -> StatusCode {
	match e {
		AutomationServerError::Automation(inner) => match inner {
			AutomationError::Validation(_)
			| AutomationError::InvalidSchedule(_)
			| AutomationError::InvalidCronExpression(_)
			| AutomationError::InvalidTimezone(_) => StatusCode::UNPROCESSABLE_ENTITY,
			AutomationError::Permission(_) => StatusCode::FORBIDDEN,
			AutomationError::NotFound(_) => StatusCode::NOT_FOUND,
			AutomationError::StateConflict { .. } | AutomationError::InvalidState(_) => {
				StatusCode::CONFLICT
			}
		},
		AutomationServerError::Tower(_) | AutomationServerError::RemoteDisabled => {
			StatusCode::BAD_GATEWAY
		}
		_ => StatusCode::INTERNAL_SERVER_ERROR,
	}
}

impl IntoResponse for ServerError {
	fn into_response(self) -> Response {
		let status = self.status_code();
		if status.is_server_error() {
			tracing::error!(error = %self, "request failed");
		}

		let message = match (&self, status) {
			(_, StatusCode::INTERNAL_SERVER_ERROR) => "internal server error".to_string(),
			_ => self.to_string(),
		};
		let violations = match &self {
			ServerError::Automation(e) => e.violations().map(<[Violation]>::to_vec),
			_ => None,
		};

		let body = ErrorResponse {
			error: self.code().to_string(),
			message,
			violations,
		};
		(status, Json(body)).into_response()
	}
}
