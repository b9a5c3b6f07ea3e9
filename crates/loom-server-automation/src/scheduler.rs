// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Turns due schedules into executions.
//!
//! Each due schedule is claimed with a compare-and-swap on its `next_run`,
//! so concurrent ticks fire a slot at most once. The execution id is derived
//! from the schedule id and the planned slot, which makes a repeated fire of
//! the same slot a duplicate insert rather than a second run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use loom_automation_core::{
	calculate_next_run, effective_variables, Approval, Execution, Schedule, SYSTEM_APPROVER,
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::dispatch::ExecutionDispatcher;
use crate::error::Result;
use crate::repository::AutomationStore;
use crate::state::{create_execution, dispatch};

/// Counts for one pass over the due schedules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
	pub claimed: u32,
	pub created: u32,
	pub disabled: u32,
	pub skipped: u32,
}

pub struct ScheduleTrigger {
	store: Arc<dyn AutomationStore>,
	dispatcher: Arc<dyn ExecutionDispatcher>,
}

impl ScheduleTrigger {
	pub fn new(store: Arc<dyn AutomationStore>, dispatcher: Arc<dyn ExecutionDispatcher>) -> Self {
		Self { store, dispatcher }
	}

	#[instrument(skip(self))]
	pub async fn run_due(&self, now: DateTime<Utc>) -> Result<TickReport> {
		let store = self.store.as_ref();
		let mut report = TickReport::default();

		for schedule in store.list_due_schedules(now).await? {
			let Some(planned) = schedule.next_run else {
				continue;
			};

			let next = match calculate_next_run(&schedule, now) {
				Ok(next) => next,
				Err(e) => {
					warn!(schedule_id = %schedule.id, error = %e, "disabling schedule that cannot be evaluated");
					store.set_schedule_enabled(schedule.id, false, None).await?;
					report.disabled += 1;
					continue;
				}
			};

			if !store.claim_schedule(schedule.id, planned, now, next).await? {
				debug!(schedule_id = %schedule.id, "schedule claimed elsewhere");
				report.skipped += 1;
				continue;
			}
			report.claimed += 1;
			if next.is_none() {
				report.disabled += 1;
			}

			match self.fire(&schedule, planned, now).await {
				Ok(true) => report.created += 1,
				Ok(false) => report.skipped += 1,
				Err(e) => {
					warn!(schedule_id = %schedule.id, error = %e, "scheduled run failed to start");
					report.skipped += 1;
				}
			}
		}

		if report.claimed > 0 || report.disabled > 0 {
			info!(
				claimed = report.claimed,
				created = report.created,
				disabled = report.disabled,
				skipped = report.skipped,
				"schedules processed"
			);
		}
		Ok(report)
	}

	/// Creates and dispatches the run for one claimed slot. Returns false when
	/// nothing was started.
	async fn fire(&self, schedule: &Schedule, planned: DateTime<Utc>, now: DateTime<Utc>) -> Result<bool> {
		let store = self.store.as_ref();
		let Some(definition) = store.get_definition(schedule.definition_id).await? else {
			warn!(schedule_id = %schedule.id, definition_id = %schedule.definition_id, "scheduled definition is gone");
			return Ok(false);
		};
		if !definition.is_enabled {
			info!(schedule_id = %schedule.id, definition_id = %definition.id, "scheduled definition is disabled");
			return Ok(false);
		}

		let parameters = store.list_survey_parameters(definition.id).await?;
		let variables = effective_variables(&definition, &parameters, &schedule.variables);
		let approval = Approval {
			approved_by: SYSTEM_APPROVER.to_string(),
			approved_at: now,
			notes: Some(format!("schedule {}", schedule.name)),
		};
		let execution = Execution::pre_approved(
			schedule.execution_id_for(planned),
			&definition,
			format!("schedule:{}", schedule.id),
			variables,
			approval,
			now,
		);

		match create_execution(store, &definition, &execution, None).await {
			Ok(()) => {}
			Err(e) if e.is_duplicate() => {
				debug!(execution_id = %execution.execution_id, "scheduled slot already has an execution");
				return Ok(false);
			}
			Err(e) => return Err(e),
		}

		dispatch(store, self.dispatcher.as_ref(), &execution, &definition).await?;
		info!(
			schedule_id = %schedule.id,
			execution_id = %execution.execution_id,
			"scheduled execution dispatched"
		);
		Ok(true)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::repository::SqliteAutomationRepository;
	use crate::testing::{
		create_automation_test_pool, local_definition, FailingDispatcher, RecordingDispatcher,
	};
	use chrono::{Duration, NaiveTime, TimeZone};
	use loom_automation_core::{ExecutionStatus, JobDefinition, ScheduleKind};
	use serde_json::json;

	struct Fixture {
		repo: Arc<SqliteAutomationRepository>,
		dispatcher: Arc<RecordingDispatcher>,
		trigger: ScheduleTrigger,
		definition: JobDefinition,
	}

	async fn fixture() -> Fixture {
		let repo = Arc::new(SqliteAutomationRepository::new(
			create_automation_test_pool().await,
		));
		let mut definition = local_definition("backup");
		definition.requires_approval = true;
		definition
			.default_variables
			.insert("target".to_string(), json!("s3"));
		repo.create_definition(&definition).await.unwrap();

		let dispatcher = Arc::new(RecordingDispatcher::default());
		let trigger = ScheduleTrigger::new(repo.clone(), dispatcher.clone());
		Fixture {
			repo,
			dispatcher,
			trigger,
			definition,
		}
	}

	fn nine() -> NaiveTime {
		NaiveTime::from_hms_opt(9, 0, 0).unwrap()
	}

	async fn daily(fx: &Fixture, due: DateTime<Utc>) -> Schedule {
		let mut schedule = Schedule::new("nightly", fx.definition.id, ScheduleKind::Daily { time: nine() });
		schedule.next_run = Some(due);
		schedule.variables.insert("retention".to_string(), json!(7));
		fx.repo.create_schedule(&schedule).await.unwrap();
		schedule
	}

	#[tokio::test]
	async fn test_due_schedule_creates_pre_approved_execution() {
		let fx = fixture().await;
		let due = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
		let schedule = daily(&fx, due).await;
		let now = due + Duration::seconds(30);

		let report = fx.trigger.run_due(now).await.unwrap();
		assert_eq!(report.claimed, 1);
		assert_eq!(report.created, 1);

		let execution_id = schedule.execution_id_for(due);
		assert_eq!(fx.dispatcher.dispatched(), vec![execution_id.clone()]);

		let execution = fx.repo.get_execution(&execution_id).await.unwrap().unwrap();
		assert_eq!(execution.status, ExecutionStatus::Approved);
		assert!(execution.requires_approval);
		assert_eq!(execution.approval.unwrap().approved_by, SYSTEM_APPROVER);
		assert_eq!(execution.executor, format!("schedule:{}", schedule.id));
		assert_eq!(execution.variables.get("target"), Some(&json!("s3")));
		assert_eq!(execution.variables.get("retention"), Some(&json!(7)));

		let stored = fx.repo.get_schedule(schedule.id).await.unwrap().unwrap();
		assert_eq!(stored.run_count, 1);
		assert_eq!(stored.next_run, Some(due + Duration::days(1)));
	}

	#[tokio::test]
	async fn test_refused_dispatch_leaves_scheduled_run_in_error() {
		let fx = fixture().await;
		let trigger = ScheduleTrigger::new(fx.repo.clone(), Arc::new(FailingDispatcher));
		let due = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
		let schedule = daily(&fx, due).await;

		let report = trigger.run_due(due + Duration::seconds(30)).await.unwrap();
		assert_eq!(report.claimed, 1);
		assert_eq!(report.created, 0);
		assert_eq!(report.skipped, 1);

		let execution = fx
			.repo
			.get_execution(&schedule.execution_id_for(due))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(execution.status, ExecutionStatus::Error);
		assert!(execution.stderr.contains("dispatch failed"));
	}

	#[tokio::test]
	async fn test_second_tick_in_same_slot_does_nothing() {
		let fx = fixture().await;
		let due = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
		daily(&fx, due).await;
		let now = due + Duration::seconds(30);

		fx.trigger.run_due(now).await.unwrap();
		let report = fx.trigger.run_due(now).await.unwrap();
		assert_eq!(report, TickReport::default());
		assert_eq!(fx.dispatcher.dispatched().len(), 1);
	}

	#[tokio::test]
	async fn test_refired_slot_is_deduplicated() {
		let fx = fixture().await;
		let due = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
		let schedule = daily(&fx, due).await;
		let now = due + Duration::seconds(30);
		fx.trigger.run_due(now).await.unwrap();

		// Rewind the schedule to the slot that already fired.
		fx.repo
			.set_schedule_enabled(schedule.id, true, Some(due))
			.await
			.unwrap();
		let report = fx.trigger.run_due(now).await.unwrap();

		assert_eq!(report.claimed, 1);
		assert_eq!(report.created, 0);
		assert_eq!(report.skipped, 1);
		assert_eq!(fx.dispatcher.dispatched().len(), 1);
	}

	#[tokio::test]
	async fn test_expired_once_schedule_is_disabled() {
		let fx = fixture().await;
		let due = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
		let mut schedule = Schedule::new(
			"one-off",
			fx.definition.id,
			ScheduleKind::Once {
				date: due.date_naive(),
				time: nine(),
			},
		);
		schedule.next_run = Some(due);
		fx.repo.create_schedule(&schedule).await.unwrap();

		let report = fx.trigger.run_due(due + Duration::minutes(1)).await.unwrap();
		assert_eq!(report.created, 1);
		assert_eq!(report.disabled, 1);

		let stored = fx.repo.get_schedule(schedule.id).await.unwrap().unwrap();
		assert!(!stored.is_enabled);
		assert!(stored.next_run.is_none());
	}

	#[tokio::test]
	async fn test_disabled_definition_is_skipped() {
		let mut fx = fixture().await;
		fx.definition.is_enabled = false;
		fx.repo.update_definition(&fx.definition).await.unwrap();
		let due = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
		daily(&fx, due).await;

		let report = fx.trigger.run_due(due).await.unwrap();
		assert_eq!(report.claimed, 1);
		assert_eq!(report.created, 0);
		assert!(fx.dispatcher.dispatched().is_empty());
	}

	#[tokio::test]
	async fn test_unparseable_schedule_is_disabled() {
		let fx = fixture().await;
		let due = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
		let mut schedule = Schedule::new("broken", fx.definition.id, ScheduleKind::Daily { time: nine() });
		schedule.timezone = "Mars/Olympus_Mons".to_string();
		schedule.next_run = Some(due);
		fx.repo.create_schedule(&schedule).await.unwrap();

		let report = fx.trigger.run_due(due).await.unwrap();
		assert_eq!(report.disabled, 1);
		assert_eq!(report.claimed, 0);
		let stored = fx.repo.get_schedule(schedule.id).await.unwrap().unwrap();
		assert!(!stored.is_enabled);
	}

	#[tokio::test]
	async fn test_future_schedules_are_not_due() {
		let fx = fixture().await;
		let due = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
		daily(&fx, due).await;

		let report = fx.trigger.run_due(due - Duration::minutes(1)).await.unwrap();
		assert_eq!(report, TickReport::default());
	}
}
