// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for Loom automation job orchestration.
//!
//! This crate holds the storage-independent parts of the automation system:
//!
//! - [`JobDefinition`] and [`SurveyParameter`]: the catalog of runnable jobs
//! - [`Execution`]: one run of a definition and its lifecycle state machine
//! - [`RemoteJobExecution`]: bookkeeping for runs delegated to Tower/AWX
//! - [`validate`]: survey and required-variable validation
//! - [`can_execute`]: the approval gate
//! - [`calculate_next_run`]: recurring schedule evaluation

pub mod approval;
pub mod definition;
pub mod error;
pub mod execution;
pub mod ids;
pub mod log;
pub mod remote;
pub mod schedule;
pub mod validation;

pub use approval::{
	can_execute, check_approver, check_canceller, initial_status, SYSTEM_APPROVER,
};
pub use definition::{
	DefinitionStats, ExecutionBackend, JobDefinition, JobType, LaunchFlags, SurveyKind,
	SurveyParameter, DEFAULT_TIMEOUT_SECS,
};
pub use error::{AutomationError, Result};
pub use execution::{
	Approval, Execution, ExecutionOutcome, ExecutionSnapshot, ExecutionStatus, Transition,
};
pub use ids::{DefinitionId, ScheduleId, SurveyParameterId};
pub use log::{ExecutionLog, LogEntry, LogLevel};
pub use remote::{LaunchRequest, RemoteJobExecution, RemoteJobStatus};
pub use schedule::{
	calculate_next_run, validate_cron_expression, validate_timezone, weekday_from_index, Schedule,
	ScheduleKind, ScheduleSummary, DEFAULT_TIMEZONE,
};
pub use validation::{
	effective_variables, launchable_fields, parse_variables, survey_defaults, validate,
	LaunchableField, Violation, ViolationKind,
};

/// Free-form job variables as passed to the automation engine.
pub type Variables = serde_json::Map<String, serde_json::Value>;
