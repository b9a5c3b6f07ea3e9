// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use loom_automation_core::{AutomationError, ExecutionStatus, Violation};
use loom_automation_tower::TowerError;
use loom_server_db::DbError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AutomationServerError>;

#[derive(Debug, Error)]
pub enum AutomationServerError {
	#[error(transparent)]
	Automation(#[from] AutomationError),

	#[error("remote orchestrator error: {0}")]
	Tower(#[from] TowerError),

	#[error(transparent)]
	Db(#[from] DbError),

	#[error("database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("remote orchestrator is not configured")]
	RemoteDisabled,

	#[error("dispatch failed: {0}")]
	Dispatch(String),

	#[error("internal error: {0}")]
	Internal(String),
}

impl AutomationServerError {
	pub fn not_found(what: impl Into<String>) -> Self {
		AutomationError::NotFound(what.into()).into()
	}

	pub fn permission(message: impl Into<String>) -> Self {
		AutomationError::Permission(message.into()).into()
	}

	pub fn invalid_state(message: impl Into<String>) -> Self {
		AutomationError::InvalidState(message.into()).into()
	}

	pub fn conflict(execution_id: impl Into<String>, from: ExecutionStatus, to: ExecutionStatus) -> Self {
		AutomationError::StateConflict {
			execution_id: execution_id.into(),
			from,
			to,
		}
		.into()
	}

	/// Violations when this is a validation failure.
	pub fn violations(&self) -> Option<&[Violation]> {
		match self {
			AutomationServerError::Automation(AutomationError::Validation(v)) => Some(v),
			_ => None,
		}
	}

	/// Whether a UNIQUE constraint rejected an insert.
	pub fn is_duplicate(&self) -> bool {
		match self {
			AutomationServerError::Db(e) => e.is_unique_violation(),
			AutomationServerError::Sqlx(sqlx::Error::Database(db)) => db.is_unique_violation(),
			_ => false,
		}
	}

	/// Whether retrying the same operation later could succeed.
	pub fn is_transient(&self) -> bool {
		match self {
			AutomationServerError::Tower(e) => e.is_transient(),
			AutomationServerError::Sqlx(e) | AutomationServerError::Db(DbError::Sqlx(e)) => {
				!matches!(e, sqlx::Error::Database(_))
			}
			AutomationServerError::Io(_) => true,
			_ => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use loom_automation_core::ViolationKind;

	#[test]
	fn test_violations_are_exposed() {
		let err: AutomationServerError = AutomationError::Validation(vec![Violation::new(
			"region",
			ViolationKind::Missing,
		)])
		.into();
		assert_eq!(err.violations().map(|v| v.len()), Some(1));
		assert!(AutomationServerError::not_found("x").violations().is_none());
	}

	#[test]
	fn test_transient_classification() {
		let transient = AutomationServerError::Tower(TowerError::Transient {
			status: 503,
			message: "unavailable".to_string(),
		});
		assert!(transient.is_transient());

		let fatal = AutomationServerError::Tower(TowerError::Fatal {
			status: 400,
			message: "bad template".to_string(),
		});
		assert!(!fatal.is_transient());
		assert!(!AutomationServerError::permission("no").is_transient());
	}
}
