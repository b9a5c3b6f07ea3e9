// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fixtures shared by the automation tests and downstream crates.

use std::sync::Mutex;

use async_trait::async_trait;
use loom_automation_core::{Execution, ExecutionBackend, JobDefinition, JobType};
use sqlx::SqlitePool;

use crate::dispatch::ExecutionDispatcher;
use crate::error::{AutomationServerError, Result};

/// In-memory pool with the automation tables.
pub async fn create_automation_test_pool() -> SqlitePool {
	let pool = loom_server_db::testing::create_test_pool().await;
	crate::repository::run_migrations(&pool).await.unwrap();
	pool
}

/// An enabled local definition that runs without approval.
pub fn local_definition(name: &str) -> JobDefinition {
	let mut definition = JobDefinition::new(
		name,
		ExecutionBackend::Local {
			playbook_path: format!("playbooks/{name}.yml"),
		},
	);
	definition.requires_approval = false;
	definition
}

/// An enabled remote definition bound to `template_id`.
pub fn remote_definition(name: &str, template_id: i64) -> JobDefinition {
	let mut definition = JobDefinition::new(
		name,
		ExecutionBackend::Remote {
			template_id,
			job_type: JobType::Run,
			verbosity: 0,
		},
	);
	definition.requires_approval = false;
	definition
}

/// Remembers every dispatched execution id.
#[derive(Default)]
pub struct RecordingDispatcher {
	dispatched: Mutex<Vec<String>>,
}

impl RecordingDispatcher {
	pub fn dispatched(&self) -> Vec<String> {
		self.dispatched.lock().unwrap().clone()
	}
}

#[async_trait]
impl ExecutionDispatcher for RecordingDispatcher {
	async fn dispatch(&self, execution: &Execution, _definition: &JobDefinition) -> Result<()> {
		self
			.dispatched
			.lock()
			.unwrap()
			.push(execution.execution_id.clone());
		Ok(())
	}
}

/// Refuses every dispatch, like a worker pool that has shut down.
#[derive(Default)]
pub struct FailingDispatcher;

#[async_trait]
impl ExecutionDispatcher for FailingDispatcher {
	async fn dispatch(&self, _execution: &Execution, _definition: &JobDefinition) -> Result<()> {
		Err(AutomationServerError::Dispatch("task queue closed".to_string()))
	}
}
