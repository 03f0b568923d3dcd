// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loom_media_core::SessionId;
use sqlx::sqlite::{
	SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::FromRow;
use tracing::{debug, instrument};

use super::{check_peek_count, PersistedRecord, PersistentQueue, RecordId, Result, StoreError};

const SCHEMA: &str = r#"
	CREATE TABLE IF NOT EXISTS media_hits (
		id INTEGER PRIMARY KEY AUTOINCREMENT,
		session_id TEXT NOT NULL,
		payload TEXT NOT NULL,
		created_at INTEGER NOT NULL
	);
	CREATE INDEX IF NOT EXISTS idx_media_hits_session ON media_hits (session_id, id);
"#;

#[derive(Debug, FromRow)]
struct HitRow {
	id: i64,
	session_id: String,
	payload: String,
	created_at: i64,
}

impl From<HitRow> for PersistedRecord {
	fn from(row: HitRow) -> Self {
		Self {
			id: row.id,
			session_id: SessionId::from(row.session_id),
			payload: row.payload,
			created_at: DateTime::from_timestamp_millis(row.created_at).unwrap_or_default(),
		}
	}
}

/// SQLite-backed queue. Records survive process restarts.
#[derive(Debug, Clone)]
pub struct SqlitePersistentQueue {
	pool: SqlitePool,
}

impl SqlitePersistentQueue {
	/// Opens (creating if needed) the database at `location`, which is either
	/// a `sqlite:` URL or a file path.
	#[instrument(skip(location))]
	pub async fn open(location: &str) -> Result<Self> {
		if location.trim().is_empty() {
			return Err(StoreError::InvalidPath);
		}

		let in_memory = location.contains(":memory:");
		let options = if location.starts_with("sqlite:") {
			SqliteConnectOptions::from_str(location)?
		} else {
			SqliteConnectOptions::new().filename(location)
		};
		let options = options
			.journal_mode(SqliteJournalMode::Wal)
			.synchronous(SqliteSynchronous::Normal)
			.create_if_missing(true);

		// Each connection to an in-memory database sees its own database.
		let pool_options = if in_memory {
			SqlitePoolOptions::new()
				.max_connections(1)
				.idle_timeout(None)
				.max_lifetime(None)
		} else {
			SqlitePoolOptions::new().max_connections(4)
		};
		let pool = pool_options.connect_with(options).await?;

		debug!(in_memory, "media hit database opened");
		Self::from_pool(pool).await
	}

	/// Uses an existing pool, creating the schema if needed.
	pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
		sqlx::raw_sql(SCHEMA).execute(&pool).await?;
		Ok(Self { pool })
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}
}

#[async_trait]
impl PersistentQueue for SqlitePersistentQueue {
	#[instrument(skip(self, session_id, payload), fields(session_id = %session_id))]
	async fn add(&self, session_id: &SessionId, payload: &str) -> Result<RecordId> {
		let result = sqlx::query(
			r#"
			INSERT INTO media_hits (session_id, payload, created_at)
			VALUES (?, ?, ?)
			"#,
		)
		.bind(session_id.as_str())
		.bind(payload)
		.bind(Utc::now().timestamp_millis())
		.execute(&self.pool)
		.await?;

		Ok(result.last_insert_rowid())
	}

	#[instrument(skip(self, session_id), fields(session_id = %session_id))]
	async fn peek(&self, session_id: &SessionId, n: usize) -> Result<Vec<PersistedRecord>> {
		check_peek_count(n)?;
		let limit = i64::try_from(n).unwrap_or(i64::MAX);
		let rows = sqlx::query_as::<_, HitRow>(
			r#"
			SELECT id, session_id, payload, created_at
			FROM media_hits
			WHERE session_id = ?
			ORDER BY id ASC
			LIMIT ?
			"#,
		)
		.bind(session_id.as_str())
		.bind(limit)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows.into_iter().map(PersistedRecord::from).collect())
	}

	async fn count(&self) -> Result<u64> {
		let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM media_hits")
			.fetch_one(&self.pool)
			.await?;
		Ok(count as u64)
	}

	async fn count_for(&self, session_id: &SessionId) -> Result<u64> {
		let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM media_hits WHERE session_id = ?")
			.bind(session_id.as_str())
			.fetch_one(&self.pool)
			.await?;
		Ok(count as u64)
	}

	async fn delete(&self, id: RecordId) -> Result<()> {
		sqlx::query("DELETE FROM media_hits WHERE id = ?")
			.bind(id)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	#[instrument(skip(self, session_id), fields(session_id = %session_id))]
	async fn delete_all_for(&self, session_id: &SessionId) -> Result<u64> {
		let result = sqlx::query("DELETE FROM media_hits WHERE session_id = ?")
			.bind(session_id.as_str())
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected())
	}

	async fn session_ids(&self) -> Result<Vec<SessionId>> {
		let ids: Vec<String> = sqlx::query_scalar(
			r#"
			SELECT session_id
			FROM media_hits
			GROUP BY session_id
			ORDER BY MIN(id) ASC
			"#,
		)
		.fetch_all(&self.pool)
		.await?;
		Ok(ids.into_iter().map(SessionId::from).collect())
	}

	#[instrument(skip(self))]
	async fn clear(&self) -> Result<()> {
		sqlx::query("DELETE FROM media_hits")
			.execute(&self.pool)
			.await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::contract;

	async fn memory_store() -> SqlitePersistentQueue {
		SqlitePersistentQueue::open("sqlite::memory:").await.unwrap()
	}

	#[tokio::test]
	async fn test_add_and_peek_in_order() {
		contract::add_and_peek_in_order(&memory_store().await).await;
	}

	#[tokio::test]
	async fn test_peek_rejects_zero() {
		contract::peek_rejects_zero(&memory_store().await).await;
	}

	#[tokio::test]
	async fn test_delete_and_session_ids() {
		contract::delete_and_session_ids(&memory_store().await).await;
	}

	#[tokio::test]
	async fn test_clear_removes_everything() {
		contract::clear_removes_everything(&memory_store().await).await;
	}

	#[tokio::test]
	async fn test_empty_path_is_rejected() {
		assert!(matches!(
			SqlitePersistentQueue::open("").await,
			Err(StoreError::InvalidPath)
		));
	}

	#[tokio::test]
	async fn test_from_pool_creates_schema() {
		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.connect("sqlite::memory:")
			.await
			.unwrap();
		let store = SqlitePersistentQueue::from_pool(pool).await.unwrap();
		assert_eq!(store.count().await.unwrap(), 0);
	}

	#[tokio::test]
	async fn test_records_survive_reopen() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("media.db");
		let location = path.to_str().unwrap();
		let session = SessionId::from("offline-1");

		{
			let store = SqlitePersistentQueue::open(location).await.unwrap();
			store.add(&session, "{\"eventType\":\"play\"}").await.unwrap();
			store.pool().close().await;
		}

		let store = SqlitePersistentQueue::open(location).await.unwrap();
		assert_eq!(store.session_ids().await.unwrap(), vec![session.clone()]);
		let records = store.peek(&session, 5).await.unwrap();
		assert_eq!(records.len(), 1);
		assert_eq!(records[0].payload, "{\"eventType\":\"play\"}");
	}
}
