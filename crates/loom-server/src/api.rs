// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use axum::{
	routing::{get, post},
	Router,
};
use loom_server_automation::AutomationService;
use loom_server_jobs::JobScheduler;

use crate::routes;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
	pub service: AutomationService,
	/// Set once the background scheduler is running.
	pub job_scheduler: Option<Arc<JobScheduler>>,
}

impl AppState {
	pub fn new(service: AutomationService) -> Self {
		Self {
			service,
			job_scheduler: None,
		}
	}

	pub fn with_scheduler(mut self, scheduler: Arc<JobScheduler>) -> Self {
		self.job_scheduler = Some(scheduler);
		self
	}
}

pub fn create_router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(routes::health::health_check))
		.nest("/api/automation", automation_routes())
		.with_state(state)
}

fn automation_routes() -> Router<AppState> {
	Router::new()
		.route(
			"/definitions",
			get(routes::definitions::list_definitions),
		)
		.route(
			"/definitions/{id}",
			get(routes::definitions::get_definition),
		)
		.route(
			"/definitions/{id}/launch",
			post(routes::definitions::launch_definition),
		)
		.route(
			"/executions",
			get(routes::executions::list_executions).post(routes::executions::submit_execution),
		)
		.route(
			"/executions/{id}",
			get(routes::executions::get_execution_status),
		)
		.route(
			"/executions/{id}/approve",
			post(routes::executions::approve_execution),
		)
		.route(
			"/executions/{id}/cancel",
			post(routes::executions::cancel_execution),
		)
		.route(
			"/executions/{id}/logs",
			get(routes::executions::execution_logs),
		)
		.route(
			"/playbooks/validate",
			post(routes::playbooks::validate_playbook),
		)
		.route(
			"/schedules",
			get(routes::schedules::list_schedules).post(routes::schedules::create_schedule),
		)
		.route(
			"/schedules/{id}/enable",
			post(routes::schedules::enable_schedule),
		)
		.route(
			"/schedules/{id}/disable",
			post(routes::schedules::disable_schedule),
		)
}
