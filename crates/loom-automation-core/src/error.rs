// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for automation domain operations.

use thiserror::Error;

use crate::execution::ExecutionStatus;
use crate::validation::Violation;

/// Result type for automation domain operations.
pub type Result<T> = std::result::Result<T, AutomationError>;

/// Errors raised by the automation domain model.
#[derive(Debug, Error)]
pub enum AutomationError {
	#[error("validation failed: {}", join_violations(.0))]
	Validation(Vec<Violation>),

	#[error("permission denied: {0}")]
	Permission(String),

	#[error("execution {execution_id} cannot move from {from} to {to}")]
	StateConflict {
		execution_id: String,
		from: ExecutionStatus,
		to: ExecutionStatus,
	},

	#[error("invalid state: {0}")]
	InvalidState(String),

	#[error("not found: {0}")]
	NotFound(String),

	#[error("invalid schedule: {0}")]
	InvalidSchedule(String),

	#[error("invalid cron expression: {0}")]
	InvalidCronExpression(String),

	#[error("invalid timezone: {0}")]
	InvalidTimezone(String),
}

fn join_violations(violations: &[Violation]) -> String {
	violations
		.iter()
		.map(|v| v.to_string())
		.collect::<Vec<_>>()
		.join("; ")
}
