// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-execution audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
	Debug,
	Info,
	Warning,
	Error,
	Critical,
}

impl LogLevel {
	pub fn as_str(&self) -> &'static str {
		match self {
			LogLevel::Debug => "debug",
			LogLevel::Info => "info",
			LogLevel::Warning => "warning",
			LogLevel::Error => "error",
			LogLevel::Critical => "critical",
		}
	}
}

impl fmt::Display for LogLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for LogLevel {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"debug" => Ok(LogLevel::Debug),
			"info" => Ok(LogLevel::Info),
			"warning" => Ok(LogLevel::Warning),
			"error" => Ok(LogLevel::Error),
			"critical" => Ok(LogLevel::Critical),
			_ => Err(format!("unknown log level: {s}")),
		}
	}
}

/// A log line about to be appended to an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
	pub level: LogLevel,
	pub message: String,
	pub host: Option<String>,
	pub task: Option<String>,
	pub play: Option<String>,
	pub extra_data: Option<serde_json::Value>,
}

impl LogEntry {
	pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
		Self {
			level,
			message: message.into(),
			host: None,
			task: None,
			play: None,
			extra_data: None,
		}
	}

	pub fn info(message: impl Into<String>) -> Self {
		Self::new(LogLevel::Info, message)
	}

	pub fn warning(message: impl Into<String>) -> Self {
		Self::new(LogLevel::Warning, message)
	}

	pub fn error(message: impl Into<String>) -> Self {
		Self::new(LogLevel::Error, message)
	}

	pub fn with_host(mut self, host: impl Into<String>) -> Self {
		self.host = Some(host.into());
		self
	}

	pub fn with_task(mut self, task: impl Into<String>) -> Self {
		self.task = Some(task.into());
		self
	}

	pub fn with_play(mut self, play: impl Into<String>) -> Self {
		self.play = Some(play.into());
		self
	}

	pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
		self.extra_data = Some(extra);
		self
	}
}

/// A stored log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
	pub id: i64,
	pub execution_id: String,
	#[serde(flatten)]
	pub entry: LogEntry,
	pub created_at: DateTime<Utc>,
}
