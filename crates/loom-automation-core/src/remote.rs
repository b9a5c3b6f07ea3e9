// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bookkeeping for runs delegated to a remote orchestrator (Tower/AWX).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::definition::JobType;
use crate::execution::{ExecutionOutcome, ExecutionStatus};
use crate::Variables;

/// Job status as reported by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteJobStatus {
	Pending,
	Waiting,
	Running,
	Successful,
	Failed,
	Error,
	Canceled,
}

impl RemoteJobStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			RemoteJobStatus::Pending => "pending",
			RemoteJobStatus::Waiting => "waiting",
			RemoteJobStatus::Running => "running",
			RemoteJobStatus::Successful => "successful",
			RemoteJobStatus::Failed => "failed",
			RemoteJobStatus::Error => "error",
			RemoteJobStatus::Canceled => "canceled",
		}
	}

	/// Maps a status string from the orchestrator. Anything unrecognised is an error.
	pub fn from_remote(s: &str) -> Self {
		match s {
			"new" | "pending" => RemoteJobStatus::Pending,
			"waiting" => RemoteJobStatus::Waiting,
			"running" => RemoteJobStatus::Running,
			"successful" => RemoteJobStatus::Successful,
			"failed" => RemoteJobStatus::Failed,
			"canceled" => RemoteJobStatus::Canceled,
			_ => RemoteJobStatus::Error,
		}
	}

	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			RemoteJobStatus::Successful
				| RemoteJobStatus::Failed
				| RemoteJobStatus::Error
				| RemoteJobStatus::Canceled
		)
	}

	/// Remote cancel is only meaningful before the job finishes.
	pub fn is_cancellable(&self) -> bool {
		matches!(
			self,
			RemoteJobStatus::Pending | RemoteJobStatus::Waiting | RemoteJobStatus::Running
		)
	}

	/// Projects a terminal remote status onto the local execution outcome.
	pub fn outcome(&self, stdout: String, stderr: String) -> Option<ExecutionOutcome> {
		let (status, return_code) = match self {
			RemoteJobStatus::Successful => (ExecutionStatus::Completed, Some(0)),
			RemoteJobStatus::Failed => (ExecutionStatus::Failed, Some(1)),
			RemoteJobStatus::Error => (ExecutionStatus::Error, None),
			RemoteJobStatus::Canceled => (ExecutionStatus::Cancelled, None),
			_ => return None,
		};
		Some(ExecutionOutcome {
			status,
			return_code,
			stdout,
			stderr,
		})
	}
}

impl fmt::Display for RemoteJobStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for RemoteJobStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"pending" => Ok(RemoteJobStatus::Pending),
			"waiting" => Ok(RemoteJobStatus::Waiting),
			"running" => Ok(RemoteJobStatus::Running),
			"successful" => Ok(RemoteJobStatus::Successful),
			"failed" => Ok(RemoteJobStatus::Failed),
			"error" => Ok(RemoteJobStatus::Error),
			"canceled" => Ok(RemoteJobStatus::Canceled),
			_ => Err(format!("unknown remote job status: {s}")),
		}
	}
}

/// Launch-time overrides sent to the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaunchRequest {
	#[serde(default)]
	pub survey_answers: Variables,
	#[serde(default)]
	pub extra_vars: Variables,
	pub limit: Option<String>,
	pub job_tags: Option<String>,
	pub skip_tags: Option<String>,
	pub job_type: Option<JobType>,
	pub verbosity: Option<u8>,
}

impl LaunchRequest {
	/// Survey answers overlaid with explicit extra vars; extra vars win on collision.
	pub fn merged_extra_vars(&self) -> Variables {
		let mut merged = self.survey_answers.clone();
		for (key, value) in &self.extra_vars {
			merged.insert(key.clone(), value.clone());
		}
		merged
	}
}

/// Local record of a job running on the orchestrator. One per execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteJobExecution {
	pub execution_id: String,
	/// Set once by the launch and never overwritten.
	pub remote_job_id: Option<i64>,
	pub template_id: i64,
	pub status: RemoteJobStatus,
	pub request: LaunchRequest,
	pub started_at: Option<DateTime<Utc>>,
	pub finished_at: Option<DateTime<Utc>>,
	pub elapsed: Option<f64>,
	pub result_stdout: String,
	pub result_stderr: String,
	pub output_fetched: bool,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl RemoteJobExecution {
	pub fn new(
		execution_id: impl Into<String>,
		template_id: i64,
		request: LaunchRequest,
		now: DateTime<Utc>,
	) -> Self {
		Self {
			execution_id: execution_id.into(),
			remote_job_id: None,
			template_id,
			status: RemoteJobStatus::Waiting,
			request,
			started_at: None,
			finished_at: None,
			elapsed: None,
			result_stdout: String::new(),
			result_stderr: String::new(),
			output_fetched: false,
			created_at: now,
			updated_at: now,
		}
	}

	pub fn is_launched(&self) -> bool {
		self.remote_job_id.is_some()
	}

	/// True while there is something left to learn from the orchestrator.
	pub fn needs_poll(&self) -> bool {
		self.is_launched() && !self.status.is_terminal()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_unknown_remote_status_maps_to_error() {
		assert_eq!(RemoteJobStatus::from_remote("mystery"), RemoteJobStatus::Error);
		assert_eq!(RemoteJobStatus::from_remote("new"), RemoteJobStatus::Pending);
		assert_eq!(
			RemoteJobStatus::from_remote("successful"),
			RemoteJobStatus::Successful
		);
	}

	#[test]
	fn test_terminal_projection() {
		let done = RemoteJobStatus::Successful
			.outcome("out".into(), String::new())
			.unwrap();
		assert_eq!(done.status, ExecutionStatus::Completed);
		assert_eq!(done.return_code, Some(0));

		let failed = RemoteJobStatus::Failed
			.outcome(String::new(), String::new())
			.unwrap();
		assert_eq!(failed.status, ExecutionStatus::Failed);
		assert_eq!(failed.return_code, Some(1));

		assert_eq!(
			RemoteJobStatus::Canceled
				.outcome(String::new(), String::new())
				.unwrap()
				.status,
			ExecutionStatus::Cancelled
		);
		assert!(RemoteJobStatus::Running
			.outcome(String::new(), String::new())
			.is_none());
	}

	#[test]
	fn test_extra_vars_win_over_survey_answers() {
		let request = LaunchRequest {
			survey_answers: json!({"region": "eu", "size": 2}).as_object().cloned().unwrap(),
			extra_vars: json!({"region": "us"}).as_object().cloned().unwrap(),
			..Default::default()
		};
		let merged = request.merged_extra_vars();
		assert_eq!(merged["region"], "us");
		assert_eq!(merged["size"], 2);
	}

	#[test]
	fn test_new_record_waits_for_launch() {
		let record = RemoteJobExecution::new("e1", 5, LaunchRequest::default(), Utc::now());
		assert_eq!(record.status, RemoteJobStatus::Waiting);
		assert!(!record.is_launched());
		assert!(!record.needs_poll());
	}
}
