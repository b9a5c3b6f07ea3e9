// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous};
use std::str::FromStr;

use crate::error::DbError;

/// Create a SqlitePool with WAL mode and common settings.
///
/// # Arguments
/// * `database_url` - SQLite connection string (e.g., "sqlite:./automation.db")
#[tracing::instrument(skip(database_url))]
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, DbError> {
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| DbError::Internal(format!("Invalid database URL: {e}")))?
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.foreign_keys(true)
		.create_if_missing(true);

	let pool = SqlitePool::connect_with(options).await?;

	tracing::debug!("database pool created");
	Ok(pool)
}

/// Execute a migration script statement by statement.
///
/// Statements that fail because their object already exists are skipped, so
/// a script can be applied on every start.
pub async fn apply_migration(pool: &SqlitePool, name: &str, script: &str) -> Result<(), DbError> {
	for stmt in script.split(';').filter(|s| !s.trim().is_empty()) {
		if let Err(e) = sqlx::query(stmt).execute(pool).await {
			let msg = e.to_string();
			if msg.contains("already exists") || msg.contains("duplicate column") {
				continue;
			}
			tracing::error!(migration = name, error = %e, "migration statement failed");
			return Err(e.into());
		}
	}
	tracing::debug!(migration = name, "migration applied");
	Ok(())
}

/// Create the background job history tables.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
	apply_migration(
		pool,
		"001_background_jobs",
		include_str!("../migrations/001_background_jobs.sql"),
	)
	.await
}
