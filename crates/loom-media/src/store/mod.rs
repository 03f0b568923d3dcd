// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable, session-keyed storage of undelivered hits.
//!
//! Offline sessions write every hit here before it is considered for
//! delivery, and the service replays leftover records at startup.
//! Implementations serialize their own writes; callers never lock.

mod memory;
mod sqlite;

pub use memory::MemoryPersistentQueue;
pub use sqlite::SqlitePersistentQueue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loom_media_core::SessionId;
use thiserror::Error;

/// Monotonic record id. Defines delivery order.
pub type RecordId = i64;

/// Errors from a persistent queue.
#[derive(Debug, Error)]
pub enum StoreError {
	/// The database path is empty.
	#[error("invalid database path")]
	InvalidPath,

	/// An argument was out of range.
	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	/// Database error.
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	/// Payload encoding failed.
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	/// Filesystem error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

impl StoreError {
	/// Whether retrying the same operation may succeed.
	pub fn is_transient(&self) -> bool {
		match self {
			StoreError::Database(e) => is_transient_error(e),
			StoreError::Io(_) => true,
			_ => false,
		}
	}
}

fn is_transient_error(e: &sqlx::Error) -> bool {
	match e {
		sqlx::Error::Io(_) => true,
		sqlx::Error::PoolTimedOut => true,
		sqlx::Error::PoolClosed => true,
		sqlx::Error::Database(db_err) => {
			let msg = db_err.message().to_lowercase();
			msg.contains("busy") || msg.contains("locked") || msg.contains("timeout")
		}
		_ => false,
	}
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// One stored hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedRecord {
	pub id: RecordId,
	pub session_id: SessionId,
	/// Opaque payload, the hit's JSON wire form.
	pub payload: String,
	pub created_at: DateTime<Utc>,
}

/// Storage contract used by offline sessions and startup recovery.
#[async_trait]
pub trait PersistentQueue: Send + Sync {
	/// Appends a record for `session_id`.
	async fn add(&self, session_id: &SessionId, payload: &str) -> Result<RecordId>;

	/// Returns up to `n` of the oldest records for `session_id`, oldest first.
	/// `n` must be positive.
	async fn peek(&self, session_id: &SessionId, n: usize) -> Result<Vec<PersistedRecord>>;

	/// Total number of records across all sessions.
	async fn count(&self) -> Result<u64>;

	async fn count_for(&self, session_id: &SessionId) -> Result<u64>;

	/// Removes one record. Removing a missing record is not an error.
	async fn delete(&self, id: RecordId) -> Result<()>;

	/// Removes every record of `session_id`, returning how many were removed.
	async fn delete_all_for(&self, session_id: &SessionId) -> Result<u64>;

	/// Sessions that have at least one record, in order of their oldest record.
	async fn session_ids(&self) -> Result<Vec<SessionId>>;

	async fn clear(&self) -> Result<()>;
}

pub(crate) fn check_peek_count(n: usize) -> Result<()> {
	if n == 0 {
		return Err(StoreError::InvalidArgument(
			"peek count must be positive".to_string(),
		));
	}
	Ok(())
}

#[cfg(test)]
pub(crate) mod contract {
	//! Behaviour every [`PersistentQueue`] must share.

	use super::*;

	pub async fn add_and_peek_in_order(store: &dyn PersistentQueue) {
		let s1 = SessionId::from("s1");
		let s2 = SessionId::from("s2");
		let a = store.add(&s1, "a").await.unwrap();
		store.add(&s2, "x").await.unwrap();
		let b = store.add(&s1, "b").await.unwrap();
		store.add(&s1, "c").await.unwrap();
		assert!(a < b);

		let records = store.peek(&s1, 2).await.unwrap();
		let payloads: Vec<_> = records.iter().map(|r| r.payload.as_str()).collect();
		assert_eq!(payloads, vec!["a", "b"]);
		assert!(records.iter().all(|r| r.session_id == s1));

		let all = store.peek(&s1, 10).await.unwrap();
		assert_eq!(all.len(), 3);

		assert_eq!(store.count().await.unwrap(), 4);
		assert_eq!(store.count_for(&s1).await.unwrap(), 3);
		assert_eq!(store.count_for(&SessionId::from("none")).await.unwrap(), 0);
	}

	pub async fn peek_rejects_zero(store: &dyn PersistentQueue) {
		let result = store.peek(&SessionId::from("s1"), 0).await;
		assert!(matches!(result, Err(StoreError::InvalidArgument(_))));
	}

	pub async fn delete_and_session_ids(store: &dyn PersistentQueue) {
		let s1 = SessionId::from("s1");
		let s2 = SessionId::from("s2");
		let first = store.add(&s2, "x").await.unwrap();
		store.add(&s1, "a").await.unwrap();
		store.add(&s1, "b").await.unwrap();

		assert_eq!(store.session_ids().await.unwrap(), vec![s2.clone(), s1.clone()]);

		store.delete(first).await.unwrap();
		store.delete(first).await.unwrap();
		assert_eq!(store.session_ids().await.unwrap(), vec![s1.clone()]);

		assert_eq!(store.delete_all_for(&s1).await.unwrap(), 2);
		assert_eq!(store.count().await.unwrap(), 0);
		assert!(store.session_ids().await.unwrap().is_empty());
		assert!(store.peek(&s1, 1).await.unwrap().is_empty());
	}

	pub async fn clear_removes_everything(store: &dyn PersistentQueue) {
		store.add(&SessionId::from("s1"), "a").await.unwrap();
		store.add(&SessionId::from("s2"), "b").await.unwrap();
		store.clear().await.unwrap();
		assert_eq!(store.count().await.unwrap(), 0);
	}
}
