// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job definitions and their survey parameters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::ids::{DefinitionId, SurveyParameterId};
use crate::Variables;

/// Default run timeout for a definition (30 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 30 * 60;

/// Job type passed to the remote orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
	#[default]
	Run,
	Check,
}

impl JobType {
	pub fn as_str(&self) -> &'static str {
		match self {
			JobType::Run => "run",
			JobType::Check => "check",
		}
	}
}

impl fmt::Display for JobType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for JobType {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"run" => Ok(JobType::Run),
			"check" => Ok(JobType::Check),
			_ => Err(format!("unknown job type: {s}")),
		}
	}
}

/// Where a definition actually runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionBackend {
	/// Run `ansible-playbook` locally against a generated inventory.
	Local { playbook_path: String },
	/// Launch a job template on the remote orchestrator.
	Remote {
		template_id: i64,
		job_type: JobType,
		verbosity: u8,
	},
}

impl ExecutionBackend {
	pub fn kind(&self) -> &'static str {
		match self {
			ExecutionBackend::Local { .. } => "local",
			ExecutionBackend::Remote { .. } => "remote",
		}
	}

	pub fn is_remote(&self) -> bool {
		matches!(self, ExecutionBackend::Remote { .. })
	}
}

/// Per-field "ask on launch" flags mirrored from the orchestrator template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchFlags {
	pub ask_variables: bool,
	pub ask_limit: bool,
	pub ask_tags: bool,
	pub ask_skip_tags: bool,
	pub ask_job_type: bool,
	pub ask_verbosity: bool,
	pub ask_inventory: bool,
	pub ask_credential: bool,
}

/// Denormalized run statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionStats {
	pub execution_count: u64,
	pub success_count: u64,
	pub last_execution: Option<DateTime<Utc>>,
	pub usage_count: u64,
	pub last_used: Option<DateTime<Utc>>,
}

impl DefinitionStats {
	/// Success percentage rounded to one decimal place.
	pub fn success_rate(&self) -> f64 {
		if self.execution_count == 0 {
			return 0.0;
		}
		let rate = self.success_count as f64 / self.execution_count as f64 * 100.0;
		(rate * 10.0).round() / 10.0
	}
}

/// A reusable automation task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
	pub id: DefinitionId,
	pub name: String,
	pub description: String,
	pub category: Option<String>,
	pub backend: ExecutionBackend,
	pub requires_approval: bool,
	pub is_dangerous: bool,
	pub is_enabled: bool,
	pub timeout_secs: u64,
	pub target_servers: BTreeSet<String>,
	pub target_applications: BTreeSet<String>,
	pub default_variables: Variables,
	pub required_variables: Vec<String>,
	/// Empty means any authenticated user.
	pub allowed_users: BTreeSet<String>,
	pub launch_flags: LaunchFlags,
	pub survey_enabled: bool,
	pub stats: DefinitionStats,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl JobDefinition {
	/// A new enabled definition that requires approval, with a 30 minute timeout.
	pub fn new(name: impl Into<String>, backend: ExecutionBackend) -> Self {
		let now = Utc::now();
		Self {
			id: DefinitionId::new(),
			name: name.into(),
			description: String::new(),
			category: None,
			backend,
			requires_approval: true,
			is_dangerous: false,
			is_enabled: true,
			timeout_secs: DEFAULT_TIMEOUT_SECS,
			target_servers: BTreeSet::new(),
			target_applications: BTreeSet::new(),
			default_variables: Variables::new(),
			required_variables: Vec::new(),
			allowed_users: BTreeSet::new(),
			launch_flags: LaunchFlags::default(),
			survey_enabled: false,
			stats: DefinitionStats::default(),
			created_at: now,
			updated_at: now,
		}
	}

	pub fn timeout(&self) -> Duration {
		if self.timeout_secs == 0 {
			Duration::from_secs(DEFAULT_TIMEOUT_SECS)
		} else {
			Duration::from_secs(self.timeout_secs)
		}
	}

	pub fn remote_template_id(&self) -> Option<i64> {
		match self.backend {
			ExecutionBackend::Remote { template_id, .. } => Some(template_id),
			ExecutionBackend::Local { .. } => None,
		}
	}
}

/// Survey question types understood by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurveyKind {
	Text,
	Textarea,
	Password,
	Integer,
	Float,
	#[serde(rename = "multiplechoice")]
	SingleChoice,
	#[serde(rename = "multiselect")]
	MultiSelect,
}

impl SurveyKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			SurveyKind::Text => "text",
			SurveyKind::Textarea => "textarea",
			SurveyKind::Password => "password",
			SurveyKind::Integer => "integer",
			SurveyKind::Float => "float",
			SurveyKind::SingleChoice => "multiplechoice",
			SurveyKind::MultiSelect => "multiselect",
		}
	}

	pub fn is_textual(&self) -> bool {
		matches!(
			self,
			SurveyKind::Text | SurveyKind::Textarea | SurveyKind::Password
		)
	}
}

impl fmt::Display for SurveyKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for SurveyKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"text" => Ok(SurveyKind::Text),
			"textarea" => Ok(SurveyKind::Textarea),
			"password" => Ok(SurveyKind::Password),
			"integer" => Ok(SurveyKind::Integer),
			"float" => Ok(SurveyKind::Float),
			"multiplechoice" => Ok(SurveyKind::SingleChoice),
			"multiselect" => Ok(SurveyKind::MultiSelect),
			_ => Err(format!("unknown survey type: {s}")),
		}
	}
}

/// A typed input declared by a definition and collected at launch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyParameter {
	pub id: SurveyParameterId,
	pub definition_id: DefinitionId,
	pub variable: String,
	pub question_name: String,
	pub question_description: String,
	pub kind: SurveyKind,
	pub required: bool,
	pub default: Option<serde_json::Value>,
	/// Numeric bound for Integer/Float, length bound for textual kinds.
	pub min: Option<i64>,
	pub max: Option<i64>,
	pub choices: Vec<String>,
	pub order: u32,
}

impl SurveyParameter {
	pub fn new(definition_id: DefinitionId, variable: impl Into<String>, kind: SurveyKind) -> Self {
		let variable = variable.into();
		Self {
			id: SurveyParameterId::new(),
			definition_id,
			question_name: variable.clone(),
			variable,
			question_description: String::new(),
			kind,
			required: false,
			default: None,
			min: None,
			max: None,
			choices: Vec::new(),
			order: 0,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_success_rate_zero_executions() {
		let stats = DefinitionStats::default();
		assert_eq!(stats.success_rate(), 0.0);
	}

	#[test]
	fn test_success_rate_rounds_to_one_decimal() {
		let stats = DefinitionStats {
			execution_count: 3,
			success_count: 2,
			..Default::default()
		};
		assert_eq!(stats.success_rate(), 66.7);
	}

	#[test]
	fn test_zero_timeout_falls_back_to_default() {
		let mut def = JobDefinition::new(
			"noop",
			ExecutionBackend::Local {
				playbook_path: "site.yml".to_string(),
			},
		);
		def.timeout_secs = 0;
		assert_eq!(def.timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
	}

	#[test]
	fn test_survey_kind_wire_names() {
		for kind in [
			SurveyKind::Text,
			SurveyKind::Textarea,
			SurveyKind::Password,
			SurveyKind::Integer,
			SurveyKind::Float,
			SurveyKind::SingleChoice,
			SurveyKind::MultiSelect,
		] {
			assert_eq!(kind.as_str().parse::<SurveyKind>().unwrap(), kind);
			let json = serde_json::to_string(&kind).unwrap();
			assert_eq!(json, format!("\"{}\"", kind.as_str()));
		}
		assert!("checkbox".parse::<SurveyKind>().is_err());
	}

	#[test]
	fn test_backend_serializes_with_kind_tag() {
		let backend = ExecutionBackend::Remote {
			template_id: 7,
			job_type: JobType::Check,
			verbosity: 2,
		};
		let json = serde_json::to_value(&backend).unwrap();
		assert_eq!(json["kind"], "remote");
		assert_eq!(json["job_type"], "check");
	}
}
