// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;
use std::str::FromStr;

use loom_common_secret::load_secret_env;
use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	DatabaseConfigLayer, HttpConfigLayer, JobsConfigLayer, LogFormat, LoggingConfigLayer,
	NotificationsConfigLayer, RunnerConfigLayer, SchedulerConfigLayer, TowerConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file is an empty layer.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/loom/automation.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: LOOM_SERVER_<SECTION>_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			http: Some(load_http_from_env()?),
			database: Some(load_database_from_env()),
			logging: Some(load_logging_from_env()?),
			tower: Some(load_tower_from_env()?),
			runner: Some(load_runner_from_env()?),
			scheduler: Some(load_scheduler_from_env()?),
			jobs: Some(load_jobs_from_env()?),
			notifications: Some(load_notifications_from_env()?),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid {} value '{v}'", std::any::type_name::<T>()),
		}),
		None => Ok(None),
	}
}

fn load_http_from_env() -> Result<HttpConfigLayer, ConfigError> {
	Ok(HttpConfigLayer {
		host: env_var("LOOM_SERVER_HOST"),
		port: env_parse("LOOM_SERVER_PORT")?,
	})
}

fn load_database_from_env() -> DatabaseConfigLayer {
	DatabaseConfigLayer {
		url: env_var("LOOM_SERVER_DATABASE_URL"),
	}
}

fn load_logging_from_env() -> Result<LoggingConfigLayer, ConfigError> {
	let format = env_var("LOOM_SERVER_LOG_FORMAT")
		.map(|v| LogFormat::from_str(&v))
		.transpose()?;
	Ok(LoggingConfigLayer {
		level: env_var("LOOM_SERVER_LOG_LEVEL"),
		format,
	})
}

fn load_tower_from_env() -> Result<TowerConfigLayer, ConfigError> {
	Ok(TowerConfigLayer {
		enabled: env_bool("LOOM_SERVER_TOWER_ENABLED"),
		url: env_var("LOOM_SERVER_TOWER_URL"),
		username: env_var("LOOM_SERVER_TOWER_USERNAME"),
		password: load_secret_env("LOOM_SERVER_TOWER_PASSWORD")
			.map_err(|e| ConfigError::Secret(e.to_string()))?,
		token: load_secret_env("LOOM_SERVER_TOWER_TOKEN")
			.map_err(|e| ConfigError::Secret(e.to_string()))?,
		verify_tls: env_bool("LOOM_SERVER_TOWER_VERIFY_TLS"),
		timeout_secs: env_parse("LOOM_SERVER_TOWER_TIMEOUT_SECS")?,
		max_retries: env_parse("LOOM_SERVER_TOWER_MAX_RETRIES")?,
	})
}

fn load_runner_from_env() -> Result<RunnerConfigLayer, ConfigError> {
	Ok(RunnerConfigLayer {
		ansible_path: env_var("LOOM_SERVER_RUNNER_ANSIBLE_PATH"),
		default_timeout_minutes: env_parse("LOOM_SERVER_RUNNER_DEFAULT_TIMEOUT_MINUTES")?,
		max_output_bytes: env_parse("LOOM_SERVER_RUNNER_MAX_OUTPUT_BYTES")?,
		work_dir: env_var("LOOM_SERVER_RUNNER_WORK_DIR").map(PathBuf::from),
		validate_playbooks: env_bool("LOOM_SERVER_RUNNER_VALIDATE_PLAYBOOKS"),
	})
}

fn load_notifications_from_env() -> Result<NotificationsConfigLayer, ConfigError> {
	Ok(NotificationsConfigLayer {
		webhook_url: env_var("LOOM_SERVER_NOTIFICATIONS_WEBHOOK_URL"),
		timeout_secs: env_parse("LOOM_SERVER_NOTIFICATIONS_TIMEOUT_SECS")?,
	})
}

fn load_scheduler_from_env() -> Result<SchedulerConfigLayer, ConfigError> {
	Ok(SchedulerConfigLayer {
		tick_interval_secs: env_parse("LOOM_SERVER_SCHEDULER_TICK_INTERVAL_SECS")?,
		poll_interval_secs: env_parse("LOOM_SERVER_SCHEDULER_POLL_INTERVAL_SECS")?,
		workers: env_parse("LOOM_SERVER_SCHEDULER_WORKERS")?,
		queue_capacity: env_parse("LOOM_SERVER_SCHEDULER_QUEUE_CAPACITY")?,
	})
}

fn load_jobs_from_env() -> Result<JobsConfigLayer, ConfigError> {
	Ok(JobsConfigLayer {
		history_retention_days: env_parse("LOOM_SERVER_JOB_HISTORY_RETENTION_DAYS")?,
		execution_retention_days: env_parse("LOOM_SERVER_EXECUTION_RETENTION_DAYS")?,
		debug_log_retention_days: env_parse("LOOM_SERVER_DEBUG_LOG_RETENTION_DAYS")?,
		info_log_retention_days: env_parse("LOOM_SERVER_INFO_LOG_RETENTION_DAYS")?,
		cleanup_interval_secs: env_parse("LOOM_SERVER_CLEANUP_INTERVAL_SECS")?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn test_precedence_ordering() {
		assert!(Precedence::Environment > Precedence::ConfigFile);
		assert!(Precedence::ConfigFile > Precedence::Defaults);
	}

	#[test]
	fn test_defaults_source_returns_empty_layer() {
		let layer = DefaultsSource.load().unwrap();
		assert!(layer.http.is_none());
		assert!(layer.tower.is_none());
	}

	#[test]
	fn test_toml_source_missing_file_returns_empty() {
		let layer = TomlSource::new("/nonexistent/automation.toml").load().unwrap();
		assert!(layer.http.is_none());
	}

	#[test]
	fn test_toml_source_reads_sections() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(
			file,
			r#"
[runner]
ansible_path = "/opt/ansible/bin/ansible-playbook"
validate_playbooks = false

[notifications]
webhook_url = "https://hooks.example.com/automation"

[tower]
url = "https://tower.example.com"
token = "from-file"
"#
		)
		.unwrap();

		let layer = TomlSource::new(file.path()).load().unwrap();
		let runner = layer.runner.unwrap();
		assert_eq!(
			runner.ansible_path.as_deref(),
			Some("/opt/ansible/bin/ansible-playbook")
		);
		assert_eq!(runner.validate_playbooks, Some(false));
		assert_eq!(
			layer.notifications.unwrap().webhook_url.as_deref(),
			Some("https://hooks.example.com/automation")
		);
		let tower = layer.tower.unwrap();
		assert_eq!(tower.token.unwrap().expose(), "from-file");
	}

	#[test]
	fn test_toml_source_parse_error() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, "[runner\nbroken").unwrap();
		let err = TomlSource::new(file.path()).load().unwrap_err();
		assert!(matches!(err, ConfigError::TomlParse { .. }));
	}

	#[test]
	fn test_env_parse_rejects_garbage() {
		std::env::set_var("LOOM_TEST_CONFIG_BAD_U64", "ten");
		let err = env_parse::<u64>("LOOM_TEST_CONFIG_BAD_U64").unwrap_err();
		assert!(matches!(err, ConfigError::InvalidValue { .. }));
		std::env::remove_var("LOOM_TEST_CONFIG_BAD_U64");
	}
}
