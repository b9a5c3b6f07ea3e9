// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Notifications for finished executions.
//!
//! Every notification is written to the execution log. When a webhook is
//! configured the same notification is POSTed to it as JSON. Delivery is
//! best effort and never changes the execution.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loom_automation_core::{Execution, ExecutionStatus, LogEntry};
use loom_server_config::NotificationsConfig;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{AutomationServerError, Result};
use crate::repository::AutomationStore;
use crate::state::record_log;

/// Stderr carried by a failure notification is cut to this many bytes.
const ERROR_EXCERPT_BYTES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
	Succeeded,
	Failed,
	Cancelled,
}

impl NotificationKind {
	/// `None` for statuses that are not final.
	pub fn for_status(status: ExecutionStatus) -> Option<Self> {
		match status {
			ExecutionStatus::Completed => Some(NotificationKind::Succeeded),
			ExecutionStatus::Failed | ExecutionStatus::Timeout | ExecutionStatus::Error => {
				Some(NotificationKind::Failed)
			}
			ExecutionStatus::Cancelled => Some(NotificationKind::Cancelled),
			ExecutionStatus::Pending | ExecutionStatus::Approved | ExecutionStatus::Running => None,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			NotificationKind::Succeeded => "succeeded",
			NotificationKind::Failed => "failed",
			NotificationKind::Cancelled => "cancelled",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
	pub kind: NotificationKind,
	pub execution_id: String,
	pub definition: String,
	pub executor: String,
	pub status: ExecutionStatus,
	pub return_code: Option<i32>,
	pub duration_secs: Option<f64>,
	/// Start of stderr, for failures only.
	pub error: Option<String>,
}

impl Notification {
	/// Builds the notification for a finished execution.
	pub fn for_execution(execution: &Execution, definition: &str) -> Option<Self> {
		let kind = NotificationKind::for_status(execution.status)?;
		let error = (kind == NotificationKind::Failed && !execution.stderr.is_empty())
			.then(|| excerpt(&execution.stderr, ERROR_EXCERPT_BYTES));
		Some(Self {
			kind,
			execution_id: execution.execution_id.clone(),
			definition: definition.to_string(),
			executor: execution.executor.clone(),
			status: execution.status,
			return_code: execution.return_code,
			duration_secs: execution
				.duration()
				.map(|d| d.num_milliseconds() as f64 / 1000.0),
			error,
		})
	}
}

fn excerpt(text: &str, max: usize) -> String {
	if text.len() <= max {
		return text.to_string();
	}
	let mut cut = max;
	while !text.is_char_boundary(cut) {
		cut -= 1;
	}
	text[..cut].to_string()
}

/// Told about every execution that reaches a final status.
#[async_trait]
pub trait ExecutionNotifier: Send + Sync {
	async fn notify(&self, notification: &Notification);
}

/// Logs notifications and optionally forwards them to a webhook.
pub struct Notifier {
	store: Arc<dyn AutomationStore>,
	webhook: Option<Webhook>,
}

struct Webhook {
	url: String,
	client: reqwest::Client,
}

impl Notifier {
	pub fn new(store: Arc<dyn AutomationStore>) -> Self {
		Self {
			store,
			webhook: None,
		}
	}

	pub fn from_config(config: &NotificationsConfig, store: Arc<dyn AutomationStore>) -> Result<Self> {
		let notifier = Self::new(store);
		match &config.webhook_url {
			Some(url) => notifier.with_webhook(url, Duration::from_secs(config.timeout_secs)),
			None => Ok(notifier),
		}
	}

	pub fn with_webhook(mut self, url: impl Into<String>, timeout: Duration) -> Result<Self> {
		let client = loom_common_http::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| AutomationServerError::Internal(format!("webhook client: {e}")))?;
		self.webhook = Some(Webhook {
			url: url.into(),
			client,
		});
		Ok(self)
	}

	async fn deliver(&self, webhook: &Webhook, notification: &Notification) -> Result<()> {
		let response = webhook
			.client
			.post(&webhook.url)
			.json(notification)
			.send()
			.await
			.map_err(|e| AutomationServerError::Dispatch(format!("webhook: {e}")))?;
		let status = response.status();
		if !status.is_success() {
			return Err(AutomationServerError::Dispatch(format!(
				"webhook answered {status}"
			)));
		}
		Ok(())
	}
}

#[async_trait]
impl ExecutionNotifier for Notifier {
	async fn notify(&self, notification: &Notification) {
		let execution_id = notification.execution_id.as_str();
		let mut delivered_to = "log";
		if let Some(webhook) = &self.webhook {
			match self.deliver(webhook, notification).await {
				Ok(()) => delivered_to = "webhook",
				Err(e) => {
					warn!(execution_id, error = %e, "notification webhook failed");
					record_log(
						self.store.as_ref(),
						execution_id,
						LogEntry::warning(format!("notification not delivered: {e}")),
					)
					.await;
				}
			}
		}

		record_log(
			self.store.as_ref(),
			execution_id,
			LogEntry::info(format!(
				"notification sent: {} - {}",
				notification.kind.as_str(),
				notification.definition
			)),
		)
		.await;
		info!(
			execution_id,
			kind = notification.kind.as_str(),
			executor = %notification.executor,
			delivered_to,
			"execution notification"
		);
	}
}

/// Notifies about `execution` if it has finished. The definition name is
/// looked up when the caller does not have it.
pub(crate) async fn notify_finished(
	notifier: &dyn ExecutionNotifier,
	store: &dyn AutomationStore,
	execution: &Execution,
	definition: Option<&str>,
) {
	let name = match definition {
		Some(name) => name.to_string(),
		None => match store.get_definition(execution.definition_id).await {
			Ok(found) => found.map(|d| d.name).unwrap_or_default(),
			Err(e) => {
				debug!(execution_id = %execution.execution_id, error = %e, "definition lookup for notification failed");
				String::new()
			}
		},
	};
	if let Some(notification) = Notification::for_execution(execution, &name) {
		notifier.notify(&notification).await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::repository::SqliteAutomationRepository;
	use crate::testing::{create_automation_test_pool, local_definition};
	use chrono::Utc;
	use loom_automation_core::{ExecutionOutcome, Transition, Variables};
	use proptest::prelude::*;
	use wiremock::matchers::{body_partial_json, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn finished(outcome: ExecutionOutcome) -> Execution {
		let definition = local_definition("backup");
		let mut execution =
			Execution::submit("exec-1", &definition, "alice", Variables::new(), vec![], Utc::now());
		execution.apply(Transition::Start, Utc::now()).unwrap();
		execution
			.apply(Transition::Finish(outcome), Utc::now())
			.unwrap();
		execution
	}

	async fn stored(execution: &Execution) -> Arc<SqliteAutomationRepository> {
		let repo = Arc::new(SqliteAutomationRepository::new(
			create_automation_test_pool().await,
		));
		let mut definition = local_definition("backup");
		definition.id = execution.definition_id;
		repo.create_definition(&definition).await.unwrap();
		repo.create_execution(execution).await.unwrap();
		repo
	}

	#[test]
	fn test_kind_follows_final_status() {
		assert_eq!(
			NotificationKind::for_status(ExecutionStatus::Completed),
			Some(NotificationKind::Succeeded)
		);
		assert_eq!(
			NotificationKind::for_status(ExecutionStatus::Timeout),
			Some(NotificationKind::Failed)
		);
		assert_eq!(NotificationKind::for_status(ExecutionStatus::Running), None);
	}

	#[test]
	fn test_failure_carries_stderr_excerpt() {
		let execution = finished(ExecutionOutcome::from_exit(2, String::new(), "x".repeat(600)));
		let notification = Notification::for_execution(&execution, "backup").unwrap();
		assert_eq!(notification.kind, NotificationKind::Failed);
		assert_eq!(notification.return_code, Some(2));
		assert_eq!(notification.error.as_deref().map(str::len), Some(500));

		let ok = finished(ExecutionOutcome::from_exit(0, "done".to_string(), "warn".to_string()));
		assert!(Notification::for_execution(&ok, "backup")
			.unwrap()
			.error
			.is_none());
	}

	proptest! {
		#[test]
		fn excerpt_is_a_bounded_prefix(text in "\\PC{0,200}", max in 0usize..300) {
			let cut = excerpt(&text, max);
			prop_assert!(cut.len() <= max);
			prop_assert!(text.starts_with(&cut));
			if text.len() <= max {
				prop_assert_eq!(cut, text);
			}
		}
	}

	#[tokio::test]
	async fn test_notification_is_logged() {
		let execution = finished(ExecutionOutcome::from_exit(0, String::new(), String::new()));
		let repo = stored(&execution).await;
		let notifier = Notifier::new(repo.clone());

		notify_finished(&notifier, repo.as_ref(), &execution, None).await;

		let logs = repo.list_logs("exec-1").await.unwrap();
		assert_eq!(logs.len(), 1);
		assert_eq!(logs[0].entry.message, "notification sent: succeeded - backup");
	}

	#[tokio::test]
	async fn test_webhook_receives_notification() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/hooks/automation"))
			.and(body_partial_json(serde_json::json!({
				"kind": "failed",
				"execution_id": "exec-1",
				"definition": "backup",
				"status": "failed",
			})))
			.respond_with(ResponseTemplate::new(204))
			.expect(1)
			.mount(&server)
			.await;

		let execution = finished(ExecutionOutcome::from_exit(1, String::new(), "boom".to_string()));
		let repo = stored(&execution).await;
		let notifier = Notifier::new(repo.clone())
			.with_webhook(
				format!("{}/hooks/automation", server.uri()),
				Duration::from_secs(5),
			)
			.unwrap();

		notify_finished(&notifier, repo.as_ref(), &execution, Some("backup")).await;

		let logs = repo.list_logs("exec-1").await.unwrap();
		assert_eq!(logs.len(), 1);
	}

	#[tokio::test]
	async fn test_webhook_failure_is_logged_not_raised() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(500))
			.mount(&server)
			.await;

		let execution = finished(ExecutionOutcome::error("lost"));
		let repo = stored(&execution).await;
		let notifier = Notifier::new(repo.clone())
			.with_webhook(server.uri(), Duration::from_secs(5))
			.unwrap();

		notify_finished(&notifier, repo.as_ref(), &execution, Some("backup")).await;

		let messages: Vec<_> = repo
			.list_logs("exec-1")
			.await
			.unwrap()
			.into_iter()
			.map(|log| log.entry.message)
			.collect();
		assert_eq!(messages.len(), 2);
		assert!(messages.iter().any(|m| m.contains("not delivered")));
	}
}
