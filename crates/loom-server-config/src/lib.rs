// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for the Loom automation server.
//!
//! Layers are merged from built-in defaults, a TOML file
//! (`/etc/loom/automation.toml` unless overridden) and `LOOM_SERVER_*`
//! environment variables, in that order of precedence.
//!
//! ```ignore
//! let config = loom_server_config::load_config()?;
//! println!("listening on {}", config.socket_addr());
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub http: HttpConfig,
	pub database: DatabaseConfig,
	pub logging: LoggingConfig,
	/// `None` when the remote orchestrator integration is disabled.
	pub tower: Option<TowerConfig>,
	pub runner: RunnerConfig,
	pub scheduler: SchedulerConfig,
	pub jobs: JobsConfig,
	pub notifications: NotificationsConfig,
}

impl ServerConfig {
	pub fn socket_addr(&self) -> String {
		format!("{}:{}", self.http.host, self.http.port)
	}
}

/// Load configuration from defaults, `/etc/loom/automation.toml` and the
/// environment.
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Like [`load_config`] but reads the given file instead of the system one.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

pub fn load_from_sources(
	mut sources: Vec<Box<dyn ConfigSource>>,
) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	finalize(merged)
}

fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let http = layer.http.unwrap_or_default().finalize();
	let database = layer.database.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();
	let tower = layer.tower.unwrap_or_default().finalize()?;
	let runner = layer.runner.unwrap_or_default().finalize();
	let scheduler = layer.scheduler.unwrap_or_default().finalize();
	let jobs = layer.jobs.unwrap_or_default().finalize();
	let notifications = layer.notifications.unwrap_or_default().finalize();

	info!(
		host = %http.host,
		port = http.port,
		database = %database.url,
		tower_enabled = tower.is_some(),
		ansible_path = %runner.ansible_path,
		workers = scheduler.workers,
		webhook_enabled = notifications.webhook_url.is_some(),
		"server configuration loaded"
	);

	Ok(ServerConfig {
		http,
		database,
		logging,
		tower,
		runner,
		scheduler,
		jobs,
		notifications,
	})
}
