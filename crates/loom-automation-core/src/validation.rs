// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Launch-time variable validation.
//!
//! [`validate`] checks supplied variables against a definition's required
//! variables and its survey parameters. It never stops at the first problem:
//! every violation is collected so callers can report them together.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

use crate::definition::{JobDefinition, SurveyKind, SurveyParameter};
use crate::Variables;

/// Field name used for violations about the variables payload itself.
pub const VARIABLES_FIELD: &str = "variables";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
	Missing,
	InvalidJson { message: String },
	NotAnObject,
	WrongType { expected: String },
	BelowMinimum { min: f64 },
	AboveMaximum { max: f64 },
	TooShort { min: usize },
	TooLong { max: usize },
	NotAChoice { value: String },
}

/// A single problem with a supplied variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
	pub field: String,
	#[serde(flatten)]
	pub kind: ViolationKind,
}

impl Violation {
	pub fn new(field: impl Into<String>, kind: ViolationKind) -> Self {
		Self {
			field: field.into(),
			kind,
		}
	}
}

impl fmt::Display for Violation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let field = &self.field;
		match &self.kind {
			ViolationKind::Missing => write!(f, "{field} is required"),
			ViolationKind::InvalidJson { message } => {
				write!(f, "{field} is not valid JSON: {message}")
			}
			ViolationKind::NotAnObject => write!(f, "{field} must be a JSON object"),
			ViolationKind::WrongType { expected } => write!(f, "{field} must be {expected}"),
			ViolationKind::BelowMinimum { min } => write!(f, "{field} must be at least {min}"),
			ViolationKind::AboveMaximum { max } => write!(f, "{field} must be at most {max}"),
			ViolationKind::TooShort { min } => {
				write!(f, "{field} must be at least {min} characters")
			}
			ViolationKind::TooLong { max } => write!(f, "{field} must be at most {max} characters"),
			ViolationKind::NotAChoice { value } => {
				write!(f, "{field}: '{value}' is not one of the allowed choices")
			}
		}
	}
}

/// A field the caller may override when launching a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "variable", rename_all = "snake_case")]
pub enum LaunchableField {
	Variables,
	Limit,
	JobTags,
	SkipTags,
	JobType,
	Verbosity,
	Inventory,
	Credential,
	Survey(String),
}

/// Parses a free-form variables payload. Accepts an object, a JSON string
/// holding an object, or null (treated as empty).
pub fn parse_variables(raw: &Value) -> Result<Variables, Violation> {
	match raw {
		Value::Null => Ok(Variables::new()),
		Value::Object(map) => Ok(map.clone()),
		Value::String(text) if text.trim().is_empty() => Ok(Variables::new()),
		Value::String(text) => match serde_json::from_str::<Value>(text) {
			Ok(Value::Object(map)) => Ok(map),
			Ok(_) => Err(Violation::new(VARIABLES_FIELD, ViolationKind::NotAnObject)),
			Err(e) => Err(Violation::new(
				VARIABLES_FIELD,
				ViolationKind::InvalidJson {
					message: e.to_string(),
				},
			)),
		},
		_ => Err(Violation::new(VARIABLES_FIELD, ViolationKind::NotAnObject)),
	}
}

/// Validates supplied variables for a definition.
///
/// Returns the supplied variables with survey answers coerced to their
/// declared kind, or every violation found.
pub fn validate(
	definition: &JobDefinition,
	parameters: &[SurveyParameter],
	supplied: &Value,
) -> Result<Variables, Vec<Violation>> {
	let mut variables = parse_variables(supplied).map_err(|v| vec![v])?;
	let mut violations = Vec::new();
	let mut reported = BTreeSet::new();

	for name in &definition.required_variables {
		if is_absent(variables.get(name)) && reported.insert(name.clone()) {
			violations.push(Violation::new(name.clone(), ViolationKind::Missing));
		}
	}

	for parameter in parameters {
		let current = variables
			.get(&parameter.variable)
			.filter(|v| !v.is_null())
			.cloned();
		match current {
			None => {
				if parameter.required
					&& parameter.default.is_none()
					&& reported.insert(parameter.variable.clone())
				{
					violations.push(Violation::new(
						parameter.variable.clone(),
						ViolationKind::Missing,
					));
				}
			}
			Some(value) => match coerce(parameter, &value) {
				Ok(coerced) => {
					variables.insert(parameter.variable.clone(), coerced);
				}
				Err(kind) => violations.push(Violation::new(parameter.variable.clone(), kind)),
			},
		}
	}

	if violations.is_empty() {
		Ok(variables)
	} else {
		Err(violations)
	}
}

fn is_absent(value: Option<&Value>) -> bool {
	matches!(value, None | Some(Value::Null))
}

fn coerce(parameter: &SurveyParameter, value: &Value) -> Result<Value, ViolationKind> {
	match parameter.kind {
		SurveyKind::Integer => {
			let number = match value {
				Value::Number(n) => n.as_i64(),
				Value::String(s) => s.trim().parse::<i64>().ok(),
				_ => None,
			}
			.ok_or_else(|| wrong_type("an integer"))?;
			check_bounds(parameter, number as f64)?;
			Ok(Value::from(number))
		}
		SurveyKind::Float => {
			let number = match value {
				Value::Number(n) => n.as_f64(),
				Value::String(s) => s.trim().parse::<f64>().ok(),
				_ => None,
			}
			.filter(|n| n.is_finite())
			.ok_or_else(|| wrong_type("a number"))?;
			check_bounds(parameter, number)?;
			Ok(Value::from(number))
		}
		SurveyKind::Text | SurveyKind::Textarea | SurveyKind::Password => {
			let text = value.as_str().ok_or_else(|| wrong_type("a string"))?;
			let length = text.chars().count();
			if let Some(min) = parameter.min.filter(|m| *m > 0) {
				if length < min as usize {
					return Err(ViolationKind::TooShort { min: min as usize });
				}
			}
			if let Some(max) = parameter.max.filter(|m| *m >= 0) {
				if length > max as usize {
					return Err(ViolationKind::TooLong { max: max as usize });
				}
			}
			Ok(value.clone())
		}
		SurveyKind::SingleChoice => {
			let choice = value.as_str().ok_or_else(|| wrong_type("a string"))?;
			check_choice(parameter, choice)?;
			Ok(value.clone())
		}
		SurveyKind::MultiSelect => {
			let selected: Vec<&str> = match value {
				Value::Array(items) => items
					.iter()
					.map(|item| item.as_str().ok_or_else(|| wrong_type("a list of strings")))
					.collect::<Result<_, _>>()?,
				Value::String(s) => s.lines().filter(|l| !l.is_empty()).collect(),
				_ => return Err(wrong_type("a list of strings")),
			};
			for choice in &selected {
				check_choice(parameter, choice)?;
			}
			Ok(Value::from(selected))
		}
	}
}

fn wrong_type(expected: &str) -> ViolationKind {
	ViolationKind::WrongType {
		expected: expected.to_string(),
	}
}

fn check_bounds(parameter: &SurveyParameter, number: f64) -> Result<(), ViolationKind> {
	if let Some(min) = parameter.min {
		if number < min as f64 {
			return Err(ViolationKind::BelowMinimum { min: min as f64 });
		}
	}
	if let Some(max) = parameter.max {
		if number > max as f64 {
			return Err(ViolationKind::AboveMaximum { max: max as f64 });
		}
	}
	Ok(())
}

fn check_choice(parameter: &SurveyParameter, choice: &str) -> Result<(), ViolationKind> {
	if parameter.choices.iter().any(|c| c == choice) {
		Ok(())
	} else {
		Err(ViolationKind::NotAChoice {
			value: choice.to_string(),
		})
	}
}

/// Fields a caller may override at launch time.
pub fn launchable_fields(
	definition: &JobDefinition,
	parameters: &[SurveyParameter],
) -> Vec<LaunchableField> {
	let flags = &definition.launch_flags;
	let mut fields = Vec::new();
	if flags.ask_variables {
		fields.push(LaunchableField::Variables);
	}
	if flags.ask_limit {
		fields.push(LaunchableField::Limit);
	}
	if flags.ask_tags {
		fields.push(LaunchableField::JobTags);
	}
	if flags.ask_skip_tags {
		fields.push(LaunchableField::SkipTags);
	}
	if flags.ask_job_type {
		fields.push(LaunchableField::JobType);
	}
	if flags.ask_verbosity {
		fields.push(LaunchableField::Verbosity);
	}
	if flags.ask_inventory {
		fields.push(LaunchableField::Inventory);
	}
	if flags.ask_credential {
		fields.push(LaunchableField::Credential);
	}
	if definition.survey_enabled {
		let mut ordered: Vec<&SurveyParameter> = parameters.iter().collect();
		ordered.sort_by_key(|p| p.order);
		fields.extend(
			ordered
				.into_iter()
				.map(|p| LaunchableField::Survey(p.variable.clone())),
		);
	}
	fields
}

/// Declared survey defaults keyed by variable name.
pub fn survey_defaults(parameters: &[SurveyParameter]) -> Variables {
	parameters
		.iter()
		.filter_map(|p| p.default.clone().map(|d| (p.variable.clone(), d)))
		.collect()
}

/// `default_variables`, then survey defaults, then supplied values; later wins.
pub fn effective_variables(
	definition: &JobDefinition,
	parameters: &[SurveyParameter],
	supplied: &Variables,
) -> Variables {
	let mut merged = definition.default_variables.clone();
	for (key, value) in survey_defaults(parameters).into_iter().chain(supplied.clone()) {
		merged.insert(key, value);
	}
	merged
}
