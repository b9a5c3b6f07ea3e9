// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Loom automation server binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use loom_server::jobs::{
	ExecutionCleanupJob, JobHistoryCleanupJob, LogCleanupJob, RemotePollSweepJob, SchedulerTickJob,
};
use loom_server::{create_router, AppState, QueueDispatcher};
use loom_server_automation::{
	AutomationService, AutomationStore, ExecutionNotifier, LocalRunner, Notifier, RemoteAdapter,
	ScheduleTrigger, SqliteAutomationRepository, TemplateSync,
};
use loom_server_config::{LogFormat, ServerConfig};
use loom_server_db::JobRunRepository;
use loom_server_jobs::{JobScheduler, TaskQueue};
use tower_http::{
	cors::{Any, CorsLayer},
	trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Loom automation server - runs and schedules automation jobs.
#[derive(Parser, Debug)]
#[command(name = "loom-automation-server", about = "Loom automation job server", version)]
struct Args {
	/// Config file to read instead of /etc/loom/automation.toml
	#[arg(long, env = "LOOM_SERVER_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Serve the HTTP API and run background jobs (default)
	Serve,
	/// Import job templates from the remote orchestrator as definitions
	SyncTemplates {
		/// Report what would change without writing
		#[arg(long)]
		dry_run: bool,
		/// Category assigned to imported definitions
		#[arg(long)]
		category: Option<String>,
	},
	/// Show version information
	Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	if let Some(Command::Version) = args.command {
		println!("loom-automation-server {}", env!("CARGO_PKG_VERSION"));
		return Ok(());
	}

	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => loom_server_config::load_config_with_file(path)?,
		None => loom_server_config::load_config()?,
	};
	init_tracing(&config);

	let pool = loom_server_db::create_pool(&config.database.url).await?;
	loom_server_db::run_migrations(&pool).await?;
	loom_server_automation::run_migrations(&pool).await?;

	let store: Arc<dyn AutomationStore> = Arc::new(SqliteAutomationRepository::new(pool.clone()));
	let notifier: Arc<dyn ExecutionNotifier> =
		Arc::new(Notifier::from_config(&config.notifications, store.clone())?);
	let remote = match &config.tower {
		Some(tower) => Some(Arc::new(
			RemoteAdapter::from_config(tower, store.clone())?.with_notifier(notifier.clone()),
		)),
		None => None,
	};

	match args.command {
		Some(Command::SyncTemplates { dry_run, category }) => {
			let Some(adapter) = remote else {
				return Err("remote orchestrator is not configured".into());
			};
			let mut sync = TemplateSync::new(adapter.client().clone(), store);
			if let Some(category) = category {
				sync = sync.with_category(category);
			}
			let report = sync.sync_templates(dry_run).await?;
			println!(
				"created: {}, updated: {}, errors: {}{}",
				report.created,
				report.updated,
				report.errors,
				if dry_run { " (dry run)" } else { "" }
			);
			Ok(())
		}
		_ => serve(config, store, remote, notifier, pool).await,
	}
}

fn init_tracing(config: &ServerConfig) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| config.logging.level.clone().into());
	let registry = tracing_subscriber::registry().with(filter);
	match config.logging.format {
		LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
		LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
	}
}

async fn serve(
	config: ServerConfig,
	store: Arc<dyn AutomationStore>,
	remote: Option<Arc<RemoteAdapter>>,
	notifier: Arc<dyn ExecutionNotifier>,
	pool: sqlx::SqlitePool,
) -> Result<(), Box<dyn std::error::Error>> {
	tracing::info!(
		host = %config.http.host,
		port = config.http.port,
		database = %config.database.url,
		remote_enabled = remote.is_some(),
		"starting loom-automation-server"
	);

	let queue = TaskQueue::start(config.scheduler.workers, config.scheduler.queue_capacity);
	let runner = Arc::new(
		LocalRunner::new(config.runner.clone(), store.clone()).with_notifier(notifier),
	);
	let dispatcher = Arc::new(QueueDispatcher::new(
		queue.handle(),
		runner,
		remote.clone(),
	));

	let mut service = AutomationService::new(store.clone(), dispatcher.clone());
	if let Some(adapter) = &remote {
		service = service.with_remote(adapter.clone());
	}

	let job_repo = Arc::new(JobRunRepository::new(pool));
	let mut scheduler = JobScheduler::new(job_repo.clone());

	scheduler.register_periodic(
		Arc::new(SchedulerTickJob::new(ScheduleTrigger::new(
			store.clone(),
			dispatcher,
		))),
		Duration::from_secs(config.scheduler.tick_interval_secs),
	);

	if let Some(adapter) = &remote {
		scheduler.register_periodic(
			Arc::new(RemotePollSweepJob::new(adapter.clone(), queue.handle())),
			Duration::from_secs(config.scheduler.poll_interval_secs),
		);
		tracing::info!(
			interval_secs = config.scheduler.poll_interval_secs,
			"Registered remote job polling"
		);
	}

	// Retention
	{
		let interval = Duration::from_secs(config.jobs.cleanup_interval_secs);
		scheduler.register_periodic(
			Arc::new(ExecutionCleanupJob::new(
				store.clone(),
				config.jobs.execution_retention_days,
			)),
			interval,
		);
		scheduler.register_periodic(
			Arc::new(LogCleanupJob::new(
				store.clone(),
				config.jobs.debug_log_retention_days,
				config.jobs.info_log_retention_days,
			)),
			interval,
		);
		scheduler.register_periodic(
			Arc::new(JobHistoryCleanupJob::new(
				job_repo,
				config.jobs.history_retention_days,
			)),
			interval,
		);
	}

	let scheduler = Arc::new(scheduler);
	scheduler.start().await?;

	let state = AppState::new(service).with_scheduler(scheduler.clone());
	let app = create_router(state).layer(TraceLayer::new_for_http()).layer(
		CorsLayer::new()
			.allow_origin(Any)
			.allow_methods(Any)
			.allow_headers(Any),
	);

	let addr = config.socket_addr();
	let listener = tokio::net::TcpListener::bind(&addr).await?;
	tracing::info!(addr = %addr, "loom-automation-server listening");

	tokio::select! {
		result = axum::serve(listener, app) => {
			if let Err(e) = result {
				tracing::error!(error = %e, "server error");
			}
		}
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("received shutdown signal");
		}
	}

	scheduler.shutdown().await;
	queue.shutdown().await;
	tracing::info!("loom-automation-server stopped");
	Ok(())
}
