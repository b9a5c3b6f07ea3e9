// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Execution records and their lifecycle state machine.
//!
//! ```text
//! Pending ──approve──▶ Approved ──start──▶ Running ──finish──▶ Completed | Failed | Timeout | Error
//!    │                    │  └──finish(error)──▶ Error            │
//!    └──cancel──▶ Cancelled ◀──cancel──┘          Cancelled ◀──cancel (remote only)
//! ```
//!
//! All mutation goes through [`Execution::apply`], so the persistence layer
//! only needs to compare-and-swap on the previous status.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::approval::initial_status;
use crate::definition::JobDefinition;
use crate::error::{AutomationError, Result};
use crate::ids::DefinitionId;
use crate::Variables;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
	Pending,
	Approved,
	Running,
	Completed,
	Failed,
	Cancelled,
	Timeout,
	Error,
}

impl ExecutionStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			ExecutionStatus::Pending => "pending",
			ExecutionStatus::Approved => "approved",
			ExecutionStatus::Running => "running",
			ExecutionStatus::Completed => "completed",
			ExecutionStatus::Failed => "failed",
			ExecutionStatus::Cancelled => "cancelled",
			ExecutionStatus::Timeout => "timeout",
			ExecutionStatus::Error => "error",
		}
	}

	pub fn all() -> &'static [ExecutionStatus] {
		&[
			ExecutionStatus::Pending,
			ExecutionStatus::Approved,
			ExecutionStatus::Running,
			ExecutionStatus::Completed,
			ExecutionStatus::Failed,
			ExecutionStatus::Cancelled,
			ExecutionStatus::Timeout,
			ExecutionStatus::Error,
		]
	}

	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			ExecutionStatus::Completed
				| ExecutionStatus::Failed
				| ExecutionStatus::Cancelled
				| ExecutionStatus::Timeout
				| ExecutionStatus::Error
		)
	}

	/// Edges of the lifecycle graph.
	pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
		use ExecutionStatus::*;
		matches!(
			(self, next),
			(Pending, Approved)
				| (Pending, Cancelled)
				| (Approved, Running)
				| (Approved, Cancelled)
				| (Approved, Error)
				| (Running, Completed)
				| (Running, Failed)
				| (Running, Timeout)
				| (Running, Error)
				| (Running, Cancelled)
		)
	}
}

impl fmt::Display for ExecutionStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ExecutionStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"pending" => Ok(ExecutionStatus::Pending),
			"approved" => Ok(ExecutionStatus::Approved),
			"running" => Ok(ExecutionStatus::Running),
			"completed" => Ok(ExecutionStatus::Completed),
			"failed" => Ok(ExecutionStatus::Failed),
			"cancelled" => Ok(ExecutionStatus::Cancelled),
			"timeout" => Ok(ExecutionStatus::Timeout),
			"error" => Ok(ExecutionStatus::Error),
			_ => Err(format!("unknown execution status: {s}")),
		}
	}
}

/// Who approved a run and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
	pub approved_by: String,
	pub approved_at: DateTime<Utc>,
	pub notes: Option<String>,
}

/// Result of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
	pub status: ExecutionStatus,
	pub return_code: Option<i32>,
	pub stdout: String,
	pub stderr: String,
}

impl ExecutionOutcome {
	/// Completed on return code 0, Failed otherwise.
	pub fn from_exit(return_code: i32, stdout: String, stderr: String) -> Self {
		let status = if return_code == 0 {
			ExecutionStatus::Completed
		} else {
			ExecutionStatus::Failed
		};
		Self {
			status,
			return_code: Some(return_code),
			stdout,
			stderr,
		}
	}

	pub fn timeout(stdout: String, stderr: String) -> Self {
		Self {
			status: ExecutionStatus::Timeout,
			return_code: None,
			stdout,
			stderr,
		}
	}

	pub fn failed(message: impl Into<String>) -> Self {
		Self {
			status: ExecutionStatus::Failed,
			return_code: None,
			stdout: String::new(),
			stderr: message.into(),
		}
	}

	pub fn error(message: impl Into<String>) -> Self {
		Self {
			status: ExecutionStatus::Error,
			return_code: None,
			stdout: String::new(),
			stderr: message.into(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
	Approve(Approval),
	Start,
	Finish(ExecutionOutcome),
	Cancel,
}

impl Transition {
	pub fn target(&self) -> ExecutionStatus {
		match self {
			Transition::Approve(_) => ExecutionStatus::Approved,
			Transition::Start => ExecutionStatus::Running,
			Transition::Finish(outcome) => outcome.status,
			Transition::Cancel => ExecutionStatus::Cancelled,
		}
	}
}

/// One concrete run of a job definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
	pub execution_id: String,
	pub definition_id: DefinitionId,
	pub executor: String,
	pub variables: Variables,
	pub target_hosts: Vec<String>,
	pub status: ExecutionStatus,
	/// Snapshot of the definition policy at submission time.
	pub requires_approval: bool,
	pub approval: Option<Approval>,
	pub started_at: Option<DateTime<Utc>>,
	pub completed_at: Option<DateTime<Utc>>,
	pub return_code: Option<i32>,
	pub stdout: String,
	pub stderr: String,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Execution {
	/// A user submission. Starts Pending when the definition requires approval.
	pub fn submit(
		execution_id: impl Into<String>,
		definition: &JobDefinition,
		executor: impl Into<String>,
		variables: Variables,
		target_hosts: Vec<String>,
		now: DateTime<Utc>,
	) -> Self {
		Self {
			execution_id: execution_id.into(),
			definition_id: definition.id,
			executor: executor.into(),
			variables,
			target_hosts,
			status: initial_status(definition),
			requires_approval: definition.requires_approval,
			approval: None,
			started_at: None,
			completed_at: None,
			return_code: None,
			stdout: String::new(),
			stderr: String::new(),
			created_at: now,
			updated_at: now,
		}
	}

	/// A run created on behalf of a user by a trusted component (the scheduler).
	/// The approval is recorded up front so the start guard still holds.
	pub fn pre_approved(
		execution_id: impl Into<String>,
		definition: &JobDefinition,
		executor: impl Into<String>,
		variables: Variables,
		approval: Approval,
		now: DateTime<Utc>,
	) -> Self {
		let mut execution = Self::submit(
			execution_id,
			definition,
			executor,
			variables,
			Vec::new(),
			now,
		);
		execution.status = ExecutionStatus::Approved;
		execution.approval = Some(approval);
		execution
	}

	/// Apply a lifecycle transition. On error the execution is left untouched.
	pub fn apply(&mut self, transition: Transition, now: DateTime<Utc>) -> Result<()> {
		let target = transition.target();
		if !self.status.can_transition_to(target) {
			return Err(self.conflict(target));
		}
		// Finish only ever lands on a terminal status.
		if matches!(transition, Transition::Finish(_)) && !target.is_terminal() {
			return Err(self.conflict(target));
		}

		match transition {
			Transition::Approve(approval) => {
				self.approval = Some(approval);
			}
			Transition::Start => {
				if !self.may_start() {
					return Err(self.conflict(target));
				}
				self.started_at = Some(now);
			}
			Transition::Finish(outcome) => {
				self.return_code = outcome.return_code;
				self.stdout = outcome.stdout;
				self.stderr = outcome.stderr;
				self.completed_at = Some(now);
			}
			Transition::Cancel => {
				self.completed_at = Some(now);
			}
		}

		self.status = target;
		self.updated_at = now;
		Ok(())
	}

	/// Running requires either no approval policy or a recorded approval.
	pub fn may_start(&self) -> bool {
		!self.requires_approval || self.approval.is_some()
	}

	pub fn duration(&self) -> Option<Duration> {
		match (self.started_at, self.completed_at) {
			(Some(started), Some(completed)) => Some(completed - started),
			_ => None,
		}
	}

	pub fn is_successful(&self) -> bool {
		self.status == ExecutionStatus::Completed && self.return_code == Some(0)
	}

	pub fn snapshot(&self, name: impl Into<String>) -> ExecutionSnapshot {
		ExecutionSnapshot {
			execution_id: self.execution_id.clone(),
			definition_id: self.definition_id,
			name: name.into(),
			status: self.status,
			started_at: self.started_at,
			completed_at: self.completed_at,
			duration_secs: self.duration().map(|d| d.num_milliseconds() as f64 / 1000.0),
			return_code: self.return_code,
			is_successful: self.is_successful(),
		}
	}

	fn conflict(&self, to: ExecutionStatus) -> AutomationError {
		AutomationError::StateConflict {
			execution_id: self.execution_id.clone(),
			from: self.status,
			to,
		}
	}
}

/// Caller-facing status view of an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
	pub execution_id: String,
	pub definition_id: DefinitionId,
	pub name: String,
	pub status: ExecutionStatus,
	pub started_at: Option<DateTime<Utc>>,
	pub completed_at: Option<DateTime<Utc>>,
	pub duration_secs: Option<f64>,
	pub return_code: Option<i32>,
	pub is_successful: bool,
}
