// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Imports job templates from the orchestrator as remote definitions.

use std::sync::Arc;

use chrono::Utc;
use loom_automation_core::{
	DefinitionId, ExecutionBackend, JobDefinition, JobType, LaunchFlags, SurveyKind,
	SurveyParameter,
};
use loom_automation_tower::{JobTemplate, SurveyQuestion, TowerClient};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::repository::AutomationStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
	pub created: u32,
	pub updated: u32,
	pub errors: u32,
}

enum Change {
	Created,
	Updated,
	Unchanged,
}

pub struct TemplateSync {
	client: TowerClient,
	store: Arc<dyn AutomationStore>,
	category: Option<String>,
}

impl TemplateSync {
	pub fn new(client: TowerClient, store: Arc<dyn AutomationStore>) -> Self {
		Self {
			client,
			store,
			category: None,
		}
	}

	/// Category assigned to every synced definition.
	pub fn with_category(mut self, category: impl Into<String>) -> Self {
		self.category = Some(category.into());
		self
	}

	/// Creates or updates one remote definition per job template.
	///
	/// A dry run only reports what would change. Failures on a single template
	/// are counted and do not stop the sync.
	#[instrument(skip(self))]
	pub async fn sync_templates(&self, dry_run: bool) -> Result<SyncReport> {
		let templates = self.client.job_templates().await?;
		let mut report = SyncReport::default();

		for template in &templates {
			match self.sync_template(template, dry_run).await {
				Ok(Change::Created) => report.created += 1,
				Ok(Change::Updated) => report.updated += 1,
				Ok(Change::Unchanged) => {}
				Err(e) => {
					warn!(template_id = template.id, error = %e, "failed to sync job template");
					report.errors += 1;
				}
			}
		}

		info!(
			templates = templates.len(),
			created = report.created,
			updated = report.updated,
			errors = report.errors,
			dry_run,
			"job template sync finished"
		);
		Ok(report)
	}

	async fn sync_template(&self, template: &JobTemplate, dry_run: bool) -> Result<Change> {
		let existing = self.store.get_definition_by_template(template.id).await?;
		if dry_run {
			return Ok(match existing {
				Some(_) => Change::Updated,
				None => Change::Created,
			});
		}

		let (definition, change) = match existing {
			Some(mut definition) => {
				let before = definition.clone();
				self.apply_template(&mut definition, template);
				if definition == before {
					(definition, Change::Unchanged)
				} else {
					definition.updated_at = Utc::now();
					self.store.update_definition(&definition).await?;
					(definition, Change::Updated)
				}
			}
			None => {
				let mut definition = JobDefinition::new(&template.name, backend_for(template));
				self.apply_template(&mut definition, template);
				self.store.create_definition(&definition).await?;
				(definition, Change::Created)
			}
		};

		if definition.survey_enabled {
			self.sync_survey(definition.id, template.id).await;
		}
		Ok(change)
	}

	fn apply_template(&self, definition: &mut JobDefinition, template: &JobTemplate) {
		definition.name = template.name.clone();
		definition.description = template.description.clone();
		definition.backend = backend_for(template);
		definition.survey_enabled = template.survey_enabled;
		definition.launch_flags = LaunchFlags {
			ask_variables: template.ask_variables_on_launch,
			ask_limit: template.ask_limit_on_launch,
			ask_tags: template.ask_tags_on_launch,
			ask_skip_tags: template.ask_skip_tags_on_launch,
			ask_job_type: template.ask_job_type_on_launch,
			ask_verbosity: template.ask_verbosity_on_launch,
			ask_inventory: template.ask_inventory_on_launch,
			ask_credential: template.ask_credential_on_launch,
		};
		if let Some(category) = &self.category {
			definition.category = Some(category.clone());
		}
	}

	async fn sync_survey(&self, definition_id: DefinitionId, template_id: i64) {
		let spec = match self.client.survey_spec(template_id).await {
			Ok(Some(spec)) => spec,
			Ok(None) => return,
			Err(e) => {
				warn!(template_id, error = %e, "failed to fetch survey");
				return;
			}
		};

		let parameters: Vec<SurveyParameter> = spec
			.spec
			.into_iter()
			.enumerate()
			.map(|(order, question)| survey_parameter(definition_id, order as u32, question))
			.collect();
		if let Err(e) = self
			.store
			.replace_survey_parameters(definition_id, &parameters)
			.await
		{
			warn!(template_id, error = %e, "failed to store survey parameters");
		}
	}
}

fn backend_for(template: &JobTemplate) -> ExecutionBackend {
	ExecutionBackend::Remote {
		template_id: template.id,
		job_type: template.job_type.parse().unwrap_or(JobType::Run),
		verbosity: template.verbosity,
	}
}

fn survey_parameter(
	definition_id: DefinitionId,
	order: u32,
	question: SurveyQuestion,
) -> SurveyParameter {
	let kind = question.kind.parse().unwrap_or(SurveyKind::Text);
	let mut parameter = SurveyParameter::new(definition_id, question.variable, kind);
	if !question.question_name.is_empty() {
		parameter.question_name = question.question_name;
	}
	parameter.question_description = question.question_description;
	parameter.required = question.required;
	parameter.default = question.default.filter(|d| match d {
		Value::Null => false,
		Value::String(s) => !s.is_empty(),
		_ => true,
	});
	parameter.min = question.min;
	parameter.max = question.max;
	parameter.choices = question.choices.into_vec();
	parameter.order = order;
	parameter
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::repository::SqliteAutomationRepository;
	use crate::testing::{create_automation_test_pool, remote_definition};
	use loom_common_secret::Secret;
	use serde_json::json;
	use wiremock::matchers::{method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	async fn setup() -> (MockServer, Arc<SqliteAutomationRepository>, TemplateSync) {
		let server = MockServer::start().await;
		let client = TowerClient::builder()
			.base_url(server.uri())
			.token(Secret::new("t".to_string()))
			.build()
			.unwrap();
		let repo = Arc::new(SqliteAutomationRepository::new(
			create_automation_test_pool().await,
		));
		let sync = TemplateSync::new(client, repo.clone()).with_category("tower");
		(server, repo, sync)
	}

	async fn mount_templates(server: &MockServer) {
		Mock::given(method("GET"))
			.and(path("/api/v2/job_templates/"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"count": 2,
				"next": null,
				"results": [
					{"id": 1, "name": "Deploy API", "description": "rolls out the API",
					 "job_type": "check", "verbosity": 2, "ask_limit_on_launch": true},
					{"id": 2, "name": "Rotate keys", "survey_enabled": true,
					 "job_type": "mystery"},
				],
			})))
			.mount(server)
			.await;
		Mock::given(method("GET"))
			.and(path("/api/v2/job_templates/2/survey_spec/"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"name": "", "description": "",
				"spec": [
					{"variable": "env", "question_name": "Environment", "type": "multiplechoice",
					 "required": true, "choices": "dev\nprod", "default": "dev"},
					{"variable": "reason", "type": "textarea", "default": ""},
					{"variable": "odd", "type": "slider"},
				],
			})))
			.mount(server)
			.await;
	}

	#[tokio::test]
	async fn test_sync_creates_and_updates_definitions() {
		let (server, repo, sync) = setup().await;
		mount_templates(&server).await;
		let mut existing = remote_definition("Old name", 1);
		existing.requires_approval = false;
		repo.create_definition(&existing).await.unwrap();

		let report = sync.sync_templates(false).await.unwrap();
		assert_eq!(
			report,
			SyncReport {
				created: 1,
				updated: 1,
				errors: 0
			}
		);

		let updated = repo.get_definition(existing.id).await.unwrap().unwrap();
		assert_eq!(updated.name, "Deploy API");
		assert_eq!(updated.category.as_deref(), Some("tower"));
		assert!(updated.launch_flags.ask_limit);
		assert!(!updated.requires_approval);
		assert_eq!(
			updated.backend,
			ExecutionBackend::Remote {
				template_id: 1,
				job_type: JobType::Check,
				verbosity: 2
			}
		);

		let created = repo.get_definition_by_template(2).await.unwrap().unwrap();
		assert!(created.requires_approval);
		assert!(created.survey_enabled);
		assert_eq!(created.backend.kind(), "remote");

		let parameters = repo.list_survey_parameters(created.id).await.unwrap();
		assert_eq!(parameters.len(), 3);
		assert_eq!(parameters[0].variable, "env");
		assert_eq!(parameters[0].question_name, "Environment");
		assert_eq!(parameters[0].kind, SurveyKind::SingleChoice);
		assert_eq!(parameters[0].choices, vec!["dev", "prod"]);
		assert_eq!(parameters[0].default, Some(json!("dev")));
		assert_eq!(parameters[1].kind, SurveyKind::Textarea);
		assert!(parameters[1].default.is_none());
		assert_eq!(parameters[2].kind, SurveyKind::Text);
	}

	#[tokio::test]
	async fn test_second_sync_reports_nothing_changed() {
		let (server, _repo, sync) = setup().await;
		mount_templates(&server).await;

		sync.sync_templates(false).await.unwrap();
		let report = sync.sync_templates(false).await.unwrap();
		assert_eq!(report, SyncReport::default());
	}

	#[tokio::test]
	async fn test_dry_run_writes_nothing() {
		let (server, repo, sync) = setup().await;
		mount_templates(&server).await;

		let report = sync.sync_templates(true).await.unwrap();
		assert_eq!(report.created, 2);
		assert!(repo.list_definitions(true).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_listing_failure_is_an_error() {
		let (server, _repo, sync) = setup().await;
		Mock::given(method("GET"))
			.and(path("/api/v2/job_templates/"))
			.respond_with(ResponseTemplate::new(401))
			.mount(&server)
			.await;

		assert!(sync.sync_templates(false).await.is_err());
	}
}
