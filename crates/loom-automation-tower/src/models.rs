// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wire types for the orchestrator API. Only the fields we read are modelled;
//! everything else in the payloads is ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of `POST /job_templates/{id}/launch/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LaunchPayload {
	pub extra_vars: Map<String, Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub limit: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub job_tags: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub skip_tags: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub job_type: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub verbosity: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LaunchResponse {
	pub id: i64,
	#[serde(default)]
	pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteJob {
	pub id: i64,
	pub status: String,
	#[serde(default)]
	pub started: Option<DateTime<Utc>>,
	#[serde(default)]
	pub finished: Option<DateTime<Utc>>,
	#[serde(default)]
	pub elapsed: Option<f64>,
	#[serde(default)]
	pub failed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobEvent {
	#[serde(default)]
	pub event: String,
	#[serde(default)]
	pub failed: bool,
	#[serde(default)]
	pub stdout: String,
	#[serde(default)]
	pub host_name: Option<String>,
	#[serde(default)]
	pub task: Option<String>,
	#[serde(default)]
	pub play: Option<String>,
}

impl JobEvent {
	pub fn is_error(&self) -> bool {
		self.event == "error" || self.failed
	}
}

/// One page of a list endpoint. `next` is a path relative to the server root.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
	#[serde(default)]
	pub count: u64,
	#[serde(default)]
	pub next: Option<String>,
	#[serde(default = "Vec::new")]
	pub results: Vec<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NamedSummary {
	#[serde(default)]
	pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummaryFields {
	#[serde(default)]
	pub project: Option<NamedSummary>,
	#[serde(default)]
	pub inventory: Option<NamedSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobTemplate {
	pub id: i64,
	pub name: String,
	#[serde(default)]
	pub description: String,
	#[serde(default)]
	pub playbook: String,
	#[serde(default = "default_job_type")]
	pub job_type: String,
	#[serde(default)]
	pub verbosity: u8,
	#[serde(default)]
	pub survey_enabled: bool,
	#[serde(default)]
	pub ask_variables_on_launch: bool,
	#[serde(default)]
	pub ask_limit_on_launch: bool,
	#[serde(default)]
	pub ask_tags_on_launch: bool,
	#[serde(default)]
	pub ask_skip_tags_on_launch: bool,
	#[serde(default)]
	pub ask_job_type_on_launch: bool,
	#[serde(default)]
	pub ask_verbosity_on_launch: bool,
	#[serde(default)]
	pub ask_inventory_on_launch: bool,
	#[serde(default)]
	pub ask_credential_on_launch: bool,
	#[serde(default)]
	pub summary_fields: SummaryFields,
}

fn default_job_type() -> String {
	"run".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SurveySpec {
	#[serde(default)]
	pub name: String,
	#[serde(default)]
	pub description: String,
	#[serde(default)]
	pub spec: Vec<SurveyQuestion>,
}

/// Survey choices arrive either as a list or as one newline-separated string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Choices {
	List(Vec<String>),
	Text(String),
}

impl Default for Choices {
	fn default() -> Self {
		Choices::List(Vec::new())
	}
}

impl Choices {
	pub fn into_vec(self) -> Vec<String> {
		match self {
			Choices::List(items) => items,
			Choices::Text(text) => text
				.lines()
				.map(str::trim)
				.filter(|s| !s.is_empty())
				.map(str::to_string)
				.collect(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct SurveyQuestion {
	pub variable: String,
	#[serde(default)]
	pub question_name: String,
	#[serde(default)]
	pub question_description: String,
	#[serde(rename = "type", default = "default_question_type")]
	pub kind: String,
	#[serde(default)]
	pub required: bool,
	#[serde(default)]
	pub default: Option<Value>,
	#[serde(default)]
	pub min: Option<i64>,
	#[serde(default)]
	pub max: Option<i64>,
	#[serde(default)]
	pub choices: Choices,
}

fn default_question_type() -> String {
	"text".to_string()
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn launch_payload_omits_unset_options() {
		let mut extra_vars = Map::new();
		extra_vars.insert("region".into(), json!("eu-west-1"));
		let payload = LaunchPayload {
			extra_vars,
			limit: Some("web*".into()),
			verbosity: Some(0),
			..Default::default()
		};
		let value = serde_json::to_value(&payload).unwrap();
		assert_eq!(
			value,
			json!({"extra_vars": {"region": "eu-west-1"}, "limit": "web*", "verbosity": 0})
		);
	}

	#[test]
	fn choices_accept_both_shapes() {
		let q: SurveyQuestion = serde_json::from_value(json!({
			"variable": "env",
			"type": "multiplechoice",
			"choices": "dev\nstaging\n\nprod"
		}))
		.unwrap();
		assert_eq!(q.choices.into_vec(), vec!["dev", "staging", "prod"]);

		let q: SurveyQuestion = serde_json::from_value(json!({
			"variable": "env",
			"choices": ["a", "b"]
		}))
		.unwrap();
		assert_eq!(q.kind, "text");
		assert_eq!(q.choices.into_vec(), vec!["a", "b"]);
	}

	#[test]
	fn job_parses_awx_timestamps() {
		let job: RemoteJob = serde_json::from_value(json!({
			"id": 7,
			"status": "successful",
			"started": "2025-03-01T10:00:00.123456Z",
			"finished": "2025-03-01T10:02:00Z",
			"elapsed": 120.5,
			"failed": false,
			"unrelated": {"nested": true}
		}))
		.unwrap();
		assert_eq!(job.id, 7);
		assert!(job.started.is_some());
		assert_eq!(job.elapsed, Some(120.5));
	}

	#[test]
	fn template_defaults_missing_fields() {
		let template: JobTemplate =
			serde_json::from_value(json!({"id": 3, "name": "Deploy"})).unwrap();
		assert_eq!(template.job_type, "run");
		assert!(!template.survey_enabled);
		assert!(template.summary_fields.project.is_none());
	}
}
