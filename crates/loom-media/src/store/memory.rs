// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::Utc;
use loom_media_core::SessionId;
use tokio::sync::Mutex;

use super::{check_peek_count, PersistedRecord, PersistentQueue, RecordId, Result};

/// Process-local queue. Records do not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryPersistentQueue {
	inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
	next_id: RecordId,
	records: Vec<PersistedRecord>,
}

impl MemoryPersistentQueue {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl PersistentQueue for MemoryPersistentQueue {
	async fn add(&self, session_id: &SessionId, payload: &str) -> Result<RecordId> {
		let mut inner = self.inner.lock().await;
		inner.next_id += 1;
		let id = inner.next_id;
		inner.records.push(PersistedRecord {
			id,
			session_id: session_id.clone(),
			payload: payload.to_string(),
			created_at: Utc::now(),
		});
		Ok(id)
	}

	async fn peek(&self, session_id: &SessionId, n: usize) -> Result<Vec<PersistedRecord>> {
		check_peek_count(n)?;
		let inner = self.inner.lock().await;
		Ok(inner
			.records
			.iter()
			.filter(|r| &r.session_id == session_id)
			.take(n)
			.cloned()
			.collect())
	}

	async fn count(&self) -> Result<u64> {
		Ok(self.inner.lock().await.records.len() as u64)
	}

	async fn count_for(&self, session_id: &SessionId) -> Result<u64> {
		let inner = self.inner.lock().await;
		Ok(inner
			.records
			.iter()
			.filter(|r| &r.session_id == session_id)
			.count() as u64)
	}

	async fn delete(&self, id: RecordId) -> Result<()> {
		self.inner.lock().await.records.retain(|r| r.id != id);
		Ok(())
	}

	async fn delete_all_for(&self, session_id: &SessionId) -> Result<u64> {
		let mut inner = self.inner.lock().await;
		let before = inner.records.len();
		inner.records.retain(|r| &r.session_id != session_id);
		Ok((before - inner.records.len()) as u64)
	}

	async fn session_ids(&self) -> Result<Vec<SessionId>> {
		let inner = self.inner.lock().await;
		let mut ids: Vec<SessionId> = Vec::new();
		for record in &inner.records {
			if !ids.contains(&record.session_id) {
				ids.push(record.session_id.clone());
			}
		}
		Ok(ids)
	}

	async fn clear(&self) -> Result<()> {
		self.inner.lock().await.records.clear();
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::contract;

	#[tokio::test]
	async fn test_add_and_peek_in_order() {
		contract::add_and_peek_in_order(&MemoryPersistentQueue::new()).await;
	}

	#[tokio::test]
	async fn test_peek_rejects_zero() {
		contract::peek_rejects_zero(&MemoryPersistentQueue::new()).await;
	}

	#[tokio::test]
	async fn test_delete_and_session_ids() {
		contract::delete_and_session_ids(&MemoryPersistentQueue::new()).await;
	}

	#[tokio::test]
	async fn test_clear_removes_everything() {
		contract::clear_removes_everything(&MemoryPersistentQueue::new()).await;
	}
}
