// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! End-to-end playback scenarios driven through the public service handle.

use std::sync::Arc;
use std::time::Duration;

use loom_media::{
	ChannelDispatcher, DispatchedRequest, MediaConfig, MediaError, MediaService,
	MediaServiceHandle, MemoryPersistentQueue, PersistentQueue, SessionCreated, SessionOutcome,
	SqlitePersistentQueue,
};
use loom_media_core::{Dependency, EventType, MediaHit, SessionId, SharedStateSnapshot, TrackerConfig};
use serde_json::{json, Map};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn hit(event_type: EventType, ts: i64) -> MediaHit {
	MediaHit::new(event_type, ts as f64 / 1000.0, ts).unwrap()
}

fn privacy(status: &str) -> SharedStateSnapshot {
	let mut config = Map::new();
	config.insert("global.privacy".to_string(), json!(status));
	SharedStateSnapshot::new().with(Dependency::Configuration, config)
}

struct Engine {
	service: MediaServiceHandle,
	requests: mpsc::UnboundedReceiver<DispatchedRequest>,
	created: mpsc::UnboundedReceiver<SessionCreated>,
	store: Arc<MemoryPersistentQueue>,
}

impl Engine {
	async fn start() -> Self {
		let (dispatcher, requests) = ChannelDispatcher::new();
		let (hook, created) = mpsc::unbounded_channel::<SessionCreated>();
		let store = Arc::new(MemoryPersistentQueue::new());
		let service = MediaService::builder()
			.dispatcher(Arc::new(dispatcher))
			.store(store.clone())
			.hook(Arc::new(hook))
			.start()
			.await
			.unwrap();
		Self {
			service,
			requests,
			created,
			store,
		}
	}

	/// Waits until every command sent so far has been applied.
	async fn sync(&self) {
		self.service.session_ids().await.unwrap();
	}

	fn drain_requests(&mut self) -> Vec<DispatchedRequest> {
		let mut drained = Vec::new();
		while let Ok(request) = self.requests.try_recv() {
			drained.push(request);
		}
		drained
	}
}

#[tokio::test]
async fn realtime_session_suspends_until_backend_correlation() {
	let mut engine = Engine::start().await;
	let s1 = engine
		.service
		.create_session(TrackerConfig::realtime())
		.await
		.unwrap();

	engine
		.service
		.process_hit(&s1, hit(EventType::SessionStart, 1_000))
		.unwrap();
	engine.sync().await;

	let mut sent = engine.drain_requests();
	assert_eq!(sent.len(), 1);
	let start = sent.remove(0);
	assert!(start.request.is_session_start());
	let snapshot = engine.service.session_snapshot(&s1).await.unwrap().unwrap();
	assert!(snapshot.awaiting_correlation);

	assert!(start.session_created("B1"));
	let created = timeout(WAIT, engine.created.recv()).await.unwrap().unwrap();
	assert_eq!(created.session_id, s1);
	assert_eq!(created.backend_session_id, "B1");

	engine
		.service
		.process_hit(&s1, hit(EventType::Play, 2_000))
		.unwrap();
	engine
		.service
		.process_hit(&s1, hit(EventType::PauseStart, 3_000))
		.unwrap();
	engine.sync().await;

	let sent = engine.drain_requests();
	let paths: Vec<&str> = sent.iter().map(|r| r.request.path.as_str()).collect();
	assert_eq!(paths, vec!["/va/v1/play", "/va/v1/pauseStart"]);
	assert!(sent
		.iter()
		.all(|r| r.request.backend_session_id.as_deref() == Some("B1")));
}

#[tokio::test]
async fn offline_session_drains_store_on_end() {
	let mut engine = Engine::start().await;
	let s2 = engine
		.service
		.create_session(TrackerConfig::downloaded())
		.await
		.unwrap();

	for (i, event) in [EventType::SessionStart, EventType::Play, EventType::SessionComplete]
		.into_iter()
		.enumerate()
	{
		engine
			.service
			.process_hit(&s2, hit(event, 1_000 * (i as i64 + 1)))
			.unwrap();
	}
	engine.sync().await;
	assert_eq!(engine.store.count_for(&s2).await.unwrap(), 3);
	assert!(engine.drain_requests().is_empty());

	let service = engine.service.clone();
	let ending = s2.clone();
	let waiter = tokio::spawn(async move { service.end_session_and_wait(&ending).await });

	// Records leave the store only once the backend confirms delivery.
	let mut paths = Vec::new();
	for remaining in (1..=3).rev() {
		let dispatched = timeout(WAIT, engine.requests.recv()).await.unwrap().unwrap();
		assert_eq!(engine.store.count_for(&s2).await.unwrap(), remaining);
		paths.push(dispatched.request.path.clone());
		assert!(dispatched.delivered());
	}

	let outcome = timeout(WAIT, waiter).await.unwrap().unwrap().unwrap();
	assert_eq!(outcome, SessionOutcome::Completed);
	assert_eq!(engine.store.count_for(&s2).await.unwrap(), 0);
	assert!(!engine.service.session_ids().await.unwrap().contains(&s2));
	assert_eq!(
		paths,
		vec!["/va/v1/sessionStart", "/va/v1/play", "/va/v1/sessionComplete"]
	);
}

#[tokio::test]
async fn offline_backend_failure_keeps_record() {
	let mut engine = Engine::start().await;
	let s2 = engine
		.service
		.create_session(TrackerConfig::downloaded())
		.await
		.unwrap();
	engine
		.service
		.process_hit(&s2, hit(EventType::Play, 1_000))
		.unwrap();
	engine.service.end_session(&s2).unwrap();

	let dispatched = timeout(WAIT, engine.requests.recv()).await.unwrap().unwrap();
	assert!(dispatched.failed("server error (503)"));
	engine.sync().await;

	assert_eq!(engine.store.count_for(&s2).await.unwrap(), 1);
	let snapshot = engine.service.session_snapshot(&s2).await.unwrap().unwrap();
	assert_eq!(snapshot.pending_hits, 1);
	assert!(!snapshot.awaiting_correlation);
}

#[tokio::test]
async fn opt_out_discards_undelivered_hits() {
	let mut engine = Engine::start().await;
	let s1 = engine
		.service
		.create_session(TrackerConfig::realtime())
		.await
		.unwrap();
	engine
		.service
		.process_hit(&s1, hit(EventType::SessionStart, 1_000))
		.unwrap();
	engine
		.service
		.process_hit(&s1, hit(EventType::Play, 2_000))
		.unwrap();
	engine
		.service
		.process_hit(&s1, hit(EventType::Ping, 3_000))
		.unwrap();
	engine.sync().await;
	let start = engine.drain_requests().remove(0);
	let snapshot = engine.service.session_snapshot(&s1).await.unwrap().unwrap();
	assert_eq!(snapshot.pending_hits, 3);

	engine
		.service
		.update_media_state_snapshot(privacy("optedout"))
		.unwrap();
	engine.sync().await;
	assert!(engine.service.session_ids().await.unwrap().is_empty());

	start.session_created("B1");
	engine.sync().await;
	assert!(engine.drain_requests().is_empty());
	assert!(engine.created.try_recv().is_err());
}

#[tokio::test]
async fn opt_out_removes_every_session_and_blocks_creation() {
	let engine = Engine::start().await;
	let mut ids = Vec::new();
	for i in 0..4 {
		let config = if i % 2 == 0 {
			TrackerConfig::realtime()
		} else {
			TrackerConfig::downloaded()
		};
		let id = engine.service.create_session(config).await.unwrap();
		engine
			.service
			.process_hit(&id, hit(EventType::SessionStart, 1_000))
			.unwrap();
		ids.push(id);
	}
	engine.sync().await;
	assert_eq!(engine.service.session_ids().await.unwrap().len(), 4);
	assert_eq!(engine.store.count().await.unwrap(), 2);

	engine
		.service
		.update_media_state_snapshot(privacy("optedout"))
		.unwrap();
	assert!(engine.service.session_ids().await.unwrap().is_empty());
	assert_eq!(engine.store.count().await.unwrap(), 0);
	for id in &ids {
		assert!(engine.service.session_snapshot(id).await.unwrap().is_none());
	}

	let refused = engine.service.create_session(TrackerConfig::realtime()).await;
	assert!(matches!(refused, Err(MediaError::PrivacyOptedOut)));
	let state = engine.service.media_state().await.unwrap();
	assert!(state.is_opted_out());
}

#[tokio::test]
async fn unknown_session_ids_are_ignored() {
	let mut engine = Engine::start().await;
	let ghost = SessionId::from("never-created");

	tokio_test::assert_ok!(engine
		.service
		.process_hit(&ghost, hit(EventType::SessionStart, 1_000)));
	tokio_test::assert_ok!(engine.service.end_session(&ghost));
	tokio_test::assert_ok!(engine.service.abort_session(&ghost));
	engine.sync().await;

	assert!(engine.drain_requests().is_empty());
	assert!(engine.service.session_ids().await.unwrap().is_empty());
}

#[tokio::test]
async fn persisted_hits_survive_restart() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("media.db");
	let config = MediaConfig {
		database_url: Some(path.to_str().unwrap().to_string()),
		..MediaConfig::default()
	};

	let s2 = {
		let (dispatcher, mut requests) = ChannelDispatcher::new();
		let service = MediaService::builder()
			.config(config.clone())
			.dispatcher(Arc::new(dispatcher))
			.start()
			.await
			.unwrap();
		let s2 = service.create_session(TrackerConfig::downloaded()).await.unwrap();
		service
			.process_hit(&s2, hit(EventType::SessionStart, 1_000))
			.unwrap();
		service.process_hit(&s2, hit(EventType::Play, 2_000)).unwrap();
		service.shutdown().await.unwrap();
		assert!(requests.try_recv().is_err());
		s2
	};

	let store = SqlitePersistentQueue::open(path.to_str().unwrap()).await.unwrap();
	assert_eq!(store.count_for(&s2).await.unwrap(), 2);

	let (dispatcher, mut requests) = ChannelDispatcher::new();
	let service = MediaService::builder()
		.config(config)
		.dispatcher(Arc::new(dispatcher))
		.start()
		.await
		.unwrap();
	assert_eq!(service.session_ids().await.unwrap(), vec![s2.clone()]);

	let first = timeout(WAIT, requests.recv()).await.unwrap().unwrap();
	assert_eq!(first.request.path, "/va/v1/sessionStart");
	assert!(first.session_created("B1"));
	let second = timeout(WAIT, requests.recv()).await.unwrap().unwrap();
	assert_eq!(second.request.path, "/va/v1/play");
	assert!(second.delivered());

	assert!(service.session_ids().await.unwrap().is_empty());
	assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_session_blocking_from_plain_thread() {
	let engine = Engine::start().await;
	let service = engine.service.clone();

	let id = tokio::task::spawn_blocking(move || {
		service.create_session_blocking(TrackerConfig::realtime())
	})
	.await
	.unwrap()
	.unwrap();

	assert_eq!(engine.service.session_ids().await.unwrap(), vec![id]);
}

#[tokio::test]
async fn shutdown_rejects_further_calls() {
	let engine = Engine::start().await;
	engine.service.shutdown().await.unwrap();

	assert!(matches!(
		engine.service.create_session(TrackerConfig::realtime()).await,
		Err(MediaError::ServiceStopped)
	));
	assert!(matches!(
		engine.service.session_ids().await,
		Err(MediaError::ServiceStopped)
	));
}
