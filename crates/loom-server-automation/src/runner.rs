// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Runs local playbooks with `ansible-playbook`.
//!
//! Each run gets a scratch directory holding a generated inventory and a JSON
//! variables file. Both are removed when the run ends, whatever the outcome.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use loom_automation_core::{
	Execution, ExecutionBackend, ExecutionOutcome, ExecutionStatus, JobDefinition, LogEntry,
	LogLevel, Transition,
};
use loom_server_config::RunnerConfig;
use serde_json::json;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{info, instrument, warn};

use crate::error::{AutomationServerError, Result};
use crate::notify::{notify_finished, ExecutionNotifier, Notifier};
use crate::playbook::validate_playbook_file;
use crate::repository::AutomationStore;
use crate::state::{finish, record_log, transition};

const INVENTORY_GROUP: &str = "targets";
const DEFAULT_HOST: &str = "localhost";
const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// What one playbook run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
	pub outcome: ExecutionOutcome,
	pub hosts: Vec<String>,
	pub elapsed: Duration,
}

pub struct LocalRunner {
	config: RunnerConfig,
	store: Arc<dyn AutomationStore>,
	notifier: Arc<dyn ExecutionNotifier>,
}

impl LocalRunner {
	pub fn new(config: RunnerConfig, store: Arc<dyn AutomationStore>) -> Self {
		let notifier = Arc::new(Notifier::new(store.clone()));
		Self {
			config,
			store,
			notifier,
		}
	}

	pub fn with_notifier(mut self, notifier: Arc<dyn ExecutionNotifier>) -> Self {
		self.notifier = notifier;
		self
	}

	/// Loads, starts, runs and finishes one execution.
	///
	/// Problems running the playbook end the execution in Error. Only store
	/// and state failures are returned.
	#[instrument(skip(self))]
	pub async fn execute(&self, execution_id: &str) -> Result<Execution> {
		let store = self.store.as_ref();
		let mut execution = store
			.get_execution(execution_id)
			.await?
			.ok_or_else(|| AutomationServerError::not_found(format!("execution {execution_id}")))?;
		let definition = store
			.get_definition(execution.definition_id)
			.await?
			.ok_or_else(|| {
				AutomationServerError::not_found(format!("definition {}", execution.definition_id))
			})?;

		transition(store, &mut execution, Transition::Start).await?;

		let outcome = match self.run(&definition, &execution).await {
			Ok(run) => run.outcome,
			Err(e) => {
				warn!(execution_id, error = %e, "local run aborted");
				ExecutionOutcome::error(e.to_string())
			}
		};
		finish(store, &mut execution, outcome).await?;

		info!(
			execution_id,
			status = %execution.status,
			return_code = ?execution.return_code,
			"local execution finished"
		);
		notify_finished(
			self.notifier.as_ref(),
			store,
			&execution,
			Some(&definition.name),
		)
		.await;
		Ok(execution)
	}

	/// Ends an execution whose run will not be retried again.
	///
	/// Approved and running executions finish as Error. Anything else is
	/// left as it is.
	#[instrument(skip(self))]
	pub async fn abandon(&self, execution_id: &str, message: &str) -> Result<()> {
		let store = self.store.as_ref();
		let Some(mut execution) = store.get_execution(execution_id).await? else {
			return Ok(());
		};
		if !matches!(
			execution.status,
			ExecutionStatus::Approved | ExecutionStatus::Running
		) {
			return Ok(());
		}

		finish(store, &mut execution, ExecutionOutcome::error(message)).await?;
		record_log(
			store,
			execution_id,
			LogEntry::error(format!("local run gave up: {message}")),
		)
		.await;
		warn!(execution_id, message, "local execution abandoned");
		notify_finished(self.notifier.as_ref(), store, &execution, None).await;
		Ok(())
	}

	/// Runs the playbook for `execution` and reports the result.
	pub async fn run(&self, definition: &JobDefinition, execution: &Execution) -> Result<RunOutcome> {
		let ExecutionBackend::Local { playbook_path } = &definition.backend else {
			return Err(AutomationServerError::invalid_state(format!(
				"definition {} does not run locally",
				definition.name
			)));
		};

		let hosts: Vec<String> = if !execution.target_hosts.is_empty() {
			execution.target_hosts.clone()
		} else if !definition.target_servers.is_empty() {
			definition.target_servers.iter().cloned().collect()
		} else {
			vec![DEFAULT_HOST.to_string()]
		};
		let execution_id = execution.execution_id.as_str();

		if self.config.validate_playbooks {
			if let Err(e) = validate_playbook_file(Path::new(playbook_path)).await {
				record_log(self.store.as_ref(), execution_id, LogEntry::error(e.to_string())).await;
				return Ok(RunOutcome {
					outcome: ExecutionOutcome::failed(e.to_string()),
					hosts,
					elapsed: Duration::ZERO,
				});
			}
		}

		let mut variables = definition.default_variables.clone();
		variables.extend(execution.variables.clone());

		let workspace = self.workspace()?;
		let inventory = workspace.path().join("inventory.ini");
		let vars_file = workspace.path().join("vars.json");
		tokio::fs::write(&inventory, render_inventory(&hosts)).await?;
		tokio::fs::write(&vars_file, serde_json::to_vec_pretty(&variables)?).await?;

		let timeout = self.timeout_for(definition);
		let mut command = Command::new(&self.config.ansible_path);
		command
			.arg(playbook_path)
			.arg("-i")
			.arg(&inventory)
			.arg("--extra-vars")
			.arg(format!("@{}", vars_file.display()))
			.arg("-v")
			.arg("--timeout")
			.arg(timeout.as_secs().to_string())
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);
		// Own process group, so a timeout can take down everything the playbook spawned.
		#[cfg(unix)]
		command.process_group(0);

		record_log(
			self.store.as_ref(),
			execution_id,
			LogEntry::info(format!(
				"running {playbook_path} against {} host(s)",
				hosts.len()
			))
			.with_extra(json!({
				"command": self.config.ansible_path,
				"playbook": playbook_path,
				"hosts": hosts,
				"timeout_secs": timeout.as_secs(),
			})),
		)
		.await;

		let started = Instant::now();
		let outcome = match command.spawn() {
			Err(e) => ExecutionOutcome::failed(format!(
				"failed to start {}: {e}",
				self.config.ansible_path
			)),
			Ok(child) => {
				let pid = child.id();
				match tokio::time::timeout(timeout, child.wait_with_output()).await {
					Ok(Ok(output)) => ExecutionOutcome::from_exit(
						output.status.code().unwrap_or(-1),
						truncate_output(&output.stdout, self.config.max_output_bytes),
						truncate_output(&output.stderr, self.config.max_output_bytes),
					),
					Ok(Err(e)) => {
						ExecutionOutcome::failed(format!("failed to collect output: {e}"))
					}
					Err(_) => {
						kill_process_group(pid);
						ExecutionOutcome::timeout(
							String::new(),
							format!("timed out after {}s", timeout.as_secs()),
						)
					}
				}
			}
		};
		let elapsed = started.elapsed();

		let level = match outcome.status {
			ExecutionStatus::Completed => LogLevel::Info,
			_ => LogLevel::Error,
		};
		record_log(
			self.store.as_ref(),
			execution_id,
			LogEntry::new(
				level,
				format!(
					"playbook finished with status {} in {:.1}s",
					outcome.status,
					elapsed.as_secs_f64()
				),
			)
			.with_extra(json!({ "return_code": outcome.return_code })),
		)
		.await;

		Ok(RunOutcome {
			outcome,
			hosts,
			elapsed,
		})
	}

	fn timeout_for(&self, definition: &JobDefinition) -> Duration {
		if definition.timeout_secs == 0 {
			Duration::from_secs(self.config.default_timeout_minutes * 60)
		} else {
			Duration::from_secs(definition.timeout_secs)
		}
	}

	fn workspace(&self) -> std::io::Result<TempDir> {
		let mut builder = tempfile::Builder::new();
		builder.prefix("loom-run-");
		match &self.config.work_dir {
			Some(dir) => builder.tempdir_in(dir),
			None => builder.tempdir(),
		}
	}
}

/// Sends SIGKILL to the process group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
	let Some(pid) = pid else {
		return;
	};
	// SAFETY: killpg only signals processes; an exited group yields ESRCH.
	let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
	if rc != 0 {
		let err = std::io::Error::last_os_error();
		if err.raw_os_error() != Some(libc::ESRCH) {
			warn!(pid, error = %err, "failed to kill playbook process group");
		}
	}
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

fn render_inventory(hosts: &[String]) -> String {
	let mut inventory = format!("[{INVENTORY_GROUP}]\n");
	for host in hosts {
		inventory.push_str(host);
		inventory.push('\n');
	}
	inventory
}

/// Lossy UTF-8 decode capped at `max` bytes, cut on a char boundary.
fn truncate_output(bytes: &[u8], max: usize) -> String {
	let mut text = String::from_utf8_lossy(bytes).into_owned();
	if text.len() > max {
		let mut cut = max;
		while !text.is_char_boundary(cut) {
			cut -= 1;
		}
		text.truncate(cut);
		text.push_str(TRUNCATION_MARKER);
	}
	text
}
