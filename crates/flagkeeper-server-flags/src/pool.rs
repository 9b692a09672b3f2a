// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::str::FromStr;

use sqlx::sqlite::{
	SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::error::{ErrorKind, Result, StorageError};

const SCHEMA: &str = include_str!("../migrations/0001_feature_flags.sql");

/// Create a SqlitePool with WAL mode and foreign keys enforced.
///
/// An in-memory database lives only as long as its connection, so in that
/// case the pool is pinned to one connection that is never recycled.
///
/// # Arguments
/// * `database_url` - SQLite connection string (e.g., "sqlite:./flagkeeper.db")
/// * `max_connections` - upper bound for pooled connections
///
/// # Errors
/// Returns `DATABASE_NOT_INITIALIZED` if the URL is invalid or the first
/// connection cannot be opened.
#[tracing::instrument(skip(database_url))]
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| {
			StorageError::with_source(
				ErrorKind::DatabaseNotInitialized,
				"invalid database URL",
				e,
			)
		})?
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.foreign_keys(true)
		.create_if_missing(true);

	let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
	let pool_options = if in_memory {
		SqlitePoolOptions::new()
			.max_connections(1)
			.idle_timeout(None)
			.max_lifetime(None)
	} else {
		SqlitePoolOptions::new().max_connections(max_connections.max(1))
	};

	let pool = pool_options.connect_with(options).await.map_err(|e| {
		StorageError::with_source(
			ErrorKind::DatabaseNotInitialized,
			"could not open database",
			e,
		)
	})?;

	tracing::debug!(in_memory, "database pool created");
	Ok(pool)
}

/// Creates the `feature_flags` and `rules` tables and their indexes.
///
/// # Note
/// Idempotent - safe to run on every start.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
	for stmt in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
		sqlx::query(stmt).execute(pool).await?;
	}
	tracing::info!("database migrations applied");
	Ok(())
}
