// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Recurring schedules and next run calculation.
//!
//! All wall-clock arithmetic happens in the schedule's own IANA timezone and
//! the result is converted back to UTC. Local times that fall into a DST gap
//! are moved forward by an hour; ambiguous local times resolve to the earlier
//! instant.

use chrono::{
	DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
	Weekday,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{AutomationError, Result};
use crate::ids::{DefinitionId, ScheduleId};
use crate::Variables;

/// Timezone applied when a schedule does not name one.
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// When a schedule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleKind {
	Once { date: NaiveDate, time: NaiveTime },
	Daily { time: NaiveTime },
	Weekly { day: Weekday, time: NaiveTime },
	/// First day of each month.
	Monthly { time: NaiveTime },
	Cron { expression: String },
}

impl ScheduleKind {
	pub fn type_name(&self) -> &'static str {
		match self {
			ScheduleKind::Once { .. } => "once",
			ScheduleKind::Daily { .. } => "daily",
			ScheduleKind::Weekly { .. } => "weekly",
			ScheduleKind::Monthly { .. } => "monthly",
			ScheduleKind::Cron { .. } => "cron",
		}
	}

	pub fn time(&self) -> Option<NaiveTime> {
		match self {
			ScheduleKind::Once { time, .. }
			| ScheduleKind::Daily { time }
			| ScheduleKind::Weekly { time, .. }
			| ScheduleKind::Monthly { time } => Some(*time),
			ScheduleKind::Cron { .. } => None,
		}
	}
}

/// A recurring trigger for a job definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
	pub id: ScheduleId,
	pub name: String,
	pub definition_id: DefinitionId,
	pub kind: ScheduleKind,
	pub timezone: String,
	pub variables: Variables,
	pub last_run: Option<DateTime<Utc>>,
	pub next_run: Option<DateTime<Utc>>,
	pub run_count: u64,
	pub is_enabled: bool,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Schedule {
	pub fn new(name: impl Into<String>, definition_id: DefinitionId, kind: ScheduleKind) -> Self {
		let now = Utc::now();
		Self {
			id: ScheduleId::new(),
			name: name.into(),
			definition_id,
			kind,
			timezone: DEFAULT_TIMEZONE.to_string(),
			variables: Variables::new(),
			last_run: None,
			next_run: None,
			run_count: 0,
			is_enabled: true,
			created_at: now,
			updated_at: now,
		}
	}

	/// Execution id for the run planned at `planned`. Unique per (schedule, slot).
	pub fn execution_id_for(&self, planned: DateTime<Utc>) -> String {
		format!("scheduled-{}-{}", self.id, planned.format("%Y%m%d%H%M%S"))
	}
}

/// Caller-facing listing view of a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSummary {
	pub id: ScheduleId,
	pub name: String,
	pub definition_id: DefinitionId,
	pub definition_name: String,
	pub schedule_type: String,
	pub timezone: String,
	pub next_run: Option<DateTime<Utc>>,
	pub last_run: Option<DateTime<Utc>>,
	pub run_count: u64,
	pub is_enabled: bool,
}

/// Convert a standard 5-field Unix cron expression to the 7-field format
/// expected by the `cron` crate (seconds prepended, any year appended).
fn convert_to_cron_crate_format(expression: &str) -> String {
	if expression.split_whitespace().count() == 5 {
		format!("0 {} *", expression)
	} else {
		expression.to_string()
	}
}

/// Next time `schedule` should fire strictly after `now`, or `None` once a
/// one-shot schedule has passed.
pub fn calculate_next_run(
	schedule: &Schedule,
	now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
	let tz = parse_timezone(&schedule.timezone)?;
	let local_now = now.with_timezone(&tz);
	let today = local_now.date_naive();

	let next = match &schedule.kind {
		ScheduleKind::Once { date, time } => {
			let at = resolve_local(&tz, date.and_time(*time))?;
			(at > now).then_some(at)
		}
		ScheduleKind::Daily { time } => {
			let days = (0..=2).map(|d| today + Duration::days(d));
			Some(first_after(&tz, now, days, *time)?)
		}
		ScheduleKind::Weekly { day, time } => {
			let days = (0..=7)
				.map(|d| today + Duration::days(d))
				.filter(|date| date.weekday() == *day);
			Some(first_after(&tz, now, days, *time)?)
		}
		ScheduleKind::Monthly { time } => {
			let this_month = (today.day() == 1).then_some(today);
			let days = this_month.into_iter().chain(first_of_next_month(today));
			Some(first_after(&tz, now, days, *time)?)
		}
		ScheduleKind::Cron { expression } => {
			let cron_schedule = cron::Schedule::from_str(&convert_to_cron_crate_format(expression))
				.map_err(|e| AutomationError::InvalidCronExpression(e.to_string()))?;
			cron_schedule
				.after(&local_now)
				.next()
				.map(|next| next.with_timezone(&Utc))
		}
	};

	Ok(next)
}

fn first_after(
	tz: &Tz,
	now: DateTime<Utc>,
	days: impl IntoIterator<Item = NaiveDate>,
	time: NaiveTime,
) -> Result<DateTime<Utc>> {
	for date in days {
		let at = resolve_local(tz, date.and_time(time))?;
		if at > now {
			return Ok(at);
		}
	}
	Err(AutomationError::InvalidSchedule(format!(
		"no occurrence of {time} found after {now}"
	)))
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
	if date.month() == 12 {
		NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
	} else {
		NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
	}
}

fn resolve_local(tz: &Tz, naive: NaiveDateTime) -> Result<DateTime<Utc>> {
	let local = match tz.from_local_datetime(&naive) {
		LocalResult::Single(t) => t,
		LocalResult::Ambiguous(earliest, _) => earliest,
		LocalResult::None => tz
			.from_local_datetime(&(naive + Duration::hours(1)))
			.earliest()
			.ok_or_else(|| {
				AutomationError::InvalidSchedule(format!("{naive} does not exist in {tz}"))
			})?,
	};
	Ok(local.with_timezone(&Utc))
}

fn parse_timezone(timezone: &str) -> Result<Tz> {
	timezone
		.parse::<Tz>()
		.map_err(|_| AutomationError::InvalidTimezone(timezone.to_string()))
}

/// Validate a cron expression without calculating a next run.
pub fn validate_cron_expression(expression: &str) -> Result<()> {
	cron::Schedule::from_str(&convert_to_cron_crate_format(expression))
		.map_err(|e| AutomationError::InvalidCronExpression(e.to_string()))?;
	Ok(())
}

/// Validate an IANA timezone name.
pub fn validate_timezone(timezone: &str) -> Result<()> {
	parse_timezone(timezone).map(|_| ())
}

/// Monday-based day index (0 = Monday) used for storage.
pub fn weekday_from_index(index: u8) -> Option<Weekday> {
	match index {
		0 => Some(Weekday::Mon),
		1 => Some(Weekday::Tue),
		2 => Some(Weekday::Wed),
		3 => Some(Weekday::Thu),
		4 => Some(Weekday::Fri),
		5 => Some(Weekday::Sat),
		6 => Some(Weekday::Sun),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn at(s: &str) -> DateTime<Utc> {
		DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
	}

	fn hm(h: u32, m: u32) -> NaiveTime {
		NaiveTime::from_hms_opt(h, m, 0).unwrap()
	}

	fn schedule(kind: ScheduleKind) -> Schedule {
		Schedule::new("nightly", DefinitionId::new(), kind)
	}

	#[test]
	fn test_daily_before_and_after_time() {
		let s = schedule(ScheduleKind::Daily { time: hm(9, 0) });

		let next = calculate_next_run(&s, at("2025-03-10T08:00:00Z")).unwrap();
		assert_eq!(next, Some(at("2025-03-10T09:00:00Z")));

		let next = calculate_next_run(&s, at("2025-03-10T09:01:00Z")).unwrap();
		assert_eq!(next, Some(at("2025-03-11T09:00:00Z")));
	}

	#[test]
	fn test_daily_exactly_at_time_moves_to_tomorrow() {
		let s = schedule(ScheduleKind::Daily { time: hm(9, 0) });
		let next = calculate_next_run(&s, at("2025-03-10T09:00:00Z")).unwrap();
		assert_eq!(next, Some(at("2025-03-11T09:00:00Z")));
	}

	#[test]
	fn test_daily_in_named_timezone() {
		let mut s = schedule(ScheduleKind::Daily { time: hm(9, 0) });
		s.timezone = "Europe/Istanbul".to_string();
		// 09:00 in Istanbul is 06:00 UTC.
		let next = calculate_next_run(&s, at("2025-03-10T05:00:00Z")).unwrap();
		assert_eq!(next, Some(at("2025-03-10T06:00:00Z")));
	}

	#[test]
	fn test_daily_inside_dst_gap_moves_forward() {
		let mut s = schedule(ScheduleKind::Daily { time: hm(2, 30) });
		s.timezone = "America/New_York".to_string();
		// 2025-03-09 02:30 does not exist in New York; 03:30 EDT is 07:30 UTC.
		let next = calculate_next_run(&s, at("2025-03-09T05:00:00Z")).unwrap();
		assert_eq!(next, Some(at("2025-03-09T07:30:00Z")));
	}

	#[test]
	fn test_weekly_uses_configured_day() {
		// 2025-03-10 is a Monday.
		let s = schedule(ScheduleKind::Weekly {
			day: Weekday::Wed,
			time: hm(10, 0),
		});
		let next = calculate_next_run(&s, at("2025-03-10T12:00:00Z")).unwrap();
		assert_eq!(next, Some(at("2025-03-12T10:00:00Z")));
	}

	#[test]
	fn test_weekly_same_day_after_time_skips_a_week() {
		let s = schedule(ScheduleKind::Weekly {
			day: Weekday::Mon,
			time: hm(10, 0),
		});
		let next = calculate_next_run(&s, at("2025-03-10T11:00:00Z")).unwrap();
		assert_eq!(next, Some(at("2025-03-17T10:00:00Z")));
		let next = calculate_next_run(&s, at("2025-03-10T09:00:00Z")).unwrap();
		assert_eq!(next, Some(at("2025-03-10T10:00:00Z")));
	}

	#[test]
	fn test_monthly_first_of_month() {
		let s = schedule(ScheduleKind::Monthly { time: hm(6, 0) });

		let next = calculate_next_run(&s, at("2025-03-01T05:00:00Z")).unwrap();
		assert_eq!(next, Some(at("2025-03-01T06:00:00Z")));

		let next = calculate_next_run(&s, at("2025-03-01T07:00:00Z")).unwrap();
		assert_eq!(next, Some(at("2025-04-01T06:00:00Z")));

		let next = calculate_next_run(&s, at("2025-12-15T00:00:00Z")).unwrap();
		assert_eq!(next, Some(at("2026-01-01T06:00:00Z")));
	}

	#[test]
	fn test_once_expires() {
		let s = schedule(ScheduleKind::Once {
			date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
			time: hm(12, 0),
		});
		assert_eq!(
			calculate_next_run(&s, at("2025-05-01T00:00:00Z")).unwrap(),
			Some(at("2025-06-01T12:00:00Z"))
		);
		assert_eq!(calculate_next_run(&s, at("2025-06-01T12:00:00Z")).unwrap(), None);
	}

	#[test]
	fn test_cron_five_field_expression() {
		let s = schedule(ScheduleKind::Cron {
			expression: "*/15 * * * *".to_string(),
		});
		let next = calculate_next_run(&s, at("2025-03-10T08:07:00Z")).unwrap();
		assert_eq!(next, Some(at("2025-03-10T08:15:00Z")));
	}

	#[test]
	fn test_invalid_inputs() {
		let mut s = schedule(ScheduleKind::Daily { time: hm(9, 0) });
		s.timezone = "Mars/Olympus".to_string();
		assert!(matches!(
			calculate_next_run(&s, Utc::now()),
			Err(AutomationError::InvalidTimezone(_))
		));

		assert!(validate_cron_expression("not a cron").is_err());
		assert!(validate_cron_expression("0 9 * * 1-5").is_ok());
		assert!(validate_timezone("America/New_York").is_ok());
	}

	#[test]
	fn test_scheduled_execution_id_is_stable() {
		let s = schedule(ScheduleKind::Daily { time: hm(9, 0) });
		let planned = at("2025-03-10T09:00:00Z");
		assert_eq!(
			s.execution_id_for(planned),
			format!("scheduled-{}-20250310090000", s.id)
		);
	}

	fn arb_kind() -> impl Strategy<Value = ScheduleKind> {
		let time = (0u32..24, 0u32..60).prop_map(|(h, m)| hm(h, m));
		let day = (0u8..7).prop_map(|i| weekday_from_index(i).unwrap());
		let date = (2024i32..2027, 1u32..13, 1u32..29)
			.prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap());
		prop_oneof![
			(date, time.clone()).prop_map(|(date, time)| ScheduleKind::Once { date, time }),
			time.clone().prop_map(|time| ScheduleKind::Daily { time }),
			(day, time.clone()).prop_map(|(day, time)| ScheduleKind::Weekly { day, time }),
			time.prop_map(|time| ScheduleKind::Monthly { time }),
			prop::sample::select(vec!["0 * * * *", "*/5 9-17 * * 1-5", "30 2 1 * *"])
				.prop_map(|e| ScheduleKind::Cron { expression: e.to_string() }),
		]
	}

	proptest! {
		/// Next run is deterministic for fixed inputs and always strictly in the future.
		#[test]
		fn next_run_is_idempotent_and_future(
			kind in arb_kind(),
			tz in prop::sample::select(vec!["UTC", "Europe/Istanbul", "America/New_York", "Australia/Sydney"]),
			secs in 1_700_000_000i64..1_800_000_000,
		) {
			let mut s = schedule(kind);
			s.timezone = tz.to_string();
			let now = DateTime::from_timestamp(secs, 0).unwrap();

			let first = calculate_next_run(&s, now).unwrap();
			let second = calculate_next_run(&s, now).unwrap();
			prop_assert_eq!(first, second);
			if let Some(next) = first {
				prop_assert!(next > now);
			}
			if !matches!(s.kind, ScheduleKind::Once { .. }) {
				prop_assert!(first.is_some());
			}
		}
	}
}
