// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session registry.
//!
//! [`MediaService`] spawns an actor task that owns every session, the shared
//! media state and the correlation table. Callers talk to it through a
//! cloneable [`MediaServiceHandle`]; every call becomes a [`Command`] that the
//! actor applies one at a time, so sessions are never mutated concurrently.
//! Backend responses and retry timers are fed back through the same queue.

mod actor;

pub(crate) use actor::Command;

use std::sync::Arc;

use loom_media_core::{
	CorrelationToken, MediaHit, MediaState, SessionId, SharedStateSnapshot, SharedStateSource,
	TrackerConfig,
};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument};

use self::actor::{ActorDeps, MediaActor};
use crate::config::MediaConfig;
use crate::dispatch::{EdgeSessionResponse, NetworkDispatch, NoopHook, SessionCreatedHook};
use crate::error::{MediaError, Result};
use crate::http::HttpDispatcher;
use crate::session::{SessionOutcome, SessionPolicy, SessionSnapshot};
use crate::store::{MemoryPersistentQueue, PersistentQueue, SqlitePersistentQueue};

/// Entry point for starting a media service.
pub struct MediaService;

impl MediaService {
	pub fn builder() -> MediaServiceBuilder {
		MediaServiceBuilder::default()
	}
}

/// Builder for a running media service.
///
/// Anything not set explicitly is derived from the [`MediaConfig`]: the
/// persistent queue from `database_url` (in-memory when absent) and the
/// dispatcher from `edge_base_url`.
#[derive(Default)]
pub struct MediaServiceBuilder {
	config: MediaConfig,
	dispatcher: Option<Arc<dyn NetworkDispatch>>,
	store: Option<Arc<dyn PersistentQueue>>,
	hook: Option<Arc<dyn SessionCreatedHook>>,
}

impl MediaServiceBuilder {
	pub fn config(mut self, config: MediaConfig) -> Self {
		self.config = config;
		self
	}

	pub fn dispatcher(mut self, dispatcher: Arc<dyn NetworkDispatch>) -> Self {
		self.dispatcher = Some(dispatcher);
		self
	}

	pub fn store(mut self, store: Arc<dyn PersistentQueue>) -> Self {
		self.store = Some(store);
		self
	}

	/// Receives a notification whenever a realtime session gets its backend id.
	pub fn hook(mut self, hook: Arc<dyn SessionCreatedHook>) -> Self {
		self.hook = Some(hook);
		self
	}

	/// Opens the persistent queue and spawns the actor on the current runtime.
	///
	/// Sessions left in the persistent queue by a previous run are recovered
	/// and drained before any command sent through the handle is processed.
	#[instrument(skip(self))]
	pub async fn start(self) -> Result<MediaServiceHandle> {
		let runtime = Handle::try_current().map_err(|_| MediaError::NoRuntime)?;

		let store: Arc<dyn PersistentQueue> = match (self.store, &self.config.database_url) {
			(Some(store), _) => store,
			(None, Some(url)) => Arc::new(SqlitePersistentQueue::open(url).await?),
			(None, None) => {
				debug!("no database configured, persisted hits will not survive a restart");
				Arc::new(MemoryPersistentQueue::new())
			}
		};

		let dispatcher: Arc<dyn NetworkDispatch> = match (self.dispatcher, &self.config.edge_base_url) {
			(Some(dispatcher), _) => dispatcher,
			(None, Some(url)) => Arc::new(HttpDispatcher::new(url.clone(), self.config.request_timeout)?),
			(None, None) => return Err(MediaError::MissingDispatcher),
		};

		let deps = ActorDeps {
			dispatcher,
			hook: self.hook.unwrap_or_else(|| Arc::new(NoopHook)),
			store,
			policy: SessionPolicy::from(&self.config),
		};

		let (tx, rx) = mpsc::unbounded_channel();
		let actor = MediaActor::new(deps, tx.downgrade());
		runtime.spawn(actor.run(rx));

		info!(
			retry_max_attempts = self.config.retry.max_attempts,
			retry_delay_secs = self.config.retry.delay.as_secs(),
			"media service spawned"
		);
		Ok(MediaServiceHandle { tx })
	}
}

/// Cloneable handle to a running media service.
///
/// Dropping every handle stops the service once queued commands are done.
#[derive(Debug, Clone)]
pub struct MediaServiceHandle {
	tx: mpsc::UnboundedSender<Command>,
}

impl MediaServiceHandle {
	fn send(&self, command: Command) -> Result<()> {
		self.tx.send(command).map_err(|_| MediaError::ServiceStopped)
	}

	async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
		let (reply_tx, reply_rx) = oneshot::channel();
		self.send(command(reply_tx))?;
		reply_rx.await.map_err(|_| MediaError::ServiceStopped)
	}

	/// Creates a session, offline when `config` marks downloaded content.
	///
	/// Fails with [`MediaError::PrivacyOptedOut`] while the user is opted out.
	pub async fn create_session(&self, config: TrackerConfig) -> Result<SessionId> {
		self.request(|reply_tx| Command::CreateSession { config, reply_tx })
			.await?
	}

	/// Blocking variant of [`create_session`](Self::create_session) for
	/// callers on threads outside the runtime.
	///
	/// # Panics
	///
	/// Panics if called from within an asynchronous execution context.
	pub fn create_session_blocking(&self, config: TrackerConfig) -> Result<SessionId> {
		let (reply_tx, reply_rx) = oneshot::channel();
		self.send(Command::CreateSession { config, reply_tx })?;
		reply_rx
			.blocking_recv()
			.map_err(|_| MediaError::ServiceStopped)?
	}

	/// Queues `hit` on the session. Unknown or inactive sessions drop it.
	pub fn process_hit(&self, session_id: &SessionId, hit: MediaHit) -> Result<()> {
		self.send(Command::ProcessHit {
			session_id: session_id.clone(),
			hit,
		})
	}

	/// Decodes a wire-format hit and queues it. A malformed hit is logged and
	/// dropped.
	pub fn process_hit_value(&self, session_id: &SessionId, value: &Value) -> Result<()> {
		match MediaHit::from_value(value) {
			Ok(hit) => self.process_hit(session_id, hit),
			Err(e) => {
				debug!(session_id = %session_id, error = %e, "unable to decode hit, dropping");
				Ok(())
			}
		}
	}

	/// Ends the session; remaining hits are still delivered.
	pub fn end_session(&self, session_id: &SessionId) -> Result<()> {
		self.send(Command::EndSession {
			session_id: session_id.clone(),
			completion: None,
		})
	}

	/// Ends the session and waits until it has drained and been removed.
	pub async fn end_session_and_wait(&self, session_id: &SessionId) -> Result<SessionOutcome> {
		let session_id = session_id.clone();
		self.request(|reply_tx| Command::EndSession {
			session_id,
			completion: Some(reply_tx),
		})
		.await
	}

	/// Aborts the session, discarding undelivered hits.
	pub fn abort_session(&self, session_id: &SessionId) -> Result<()> {
		self.send(Command::AbortSession {
			session_id: session_id.clone(),
		})
	}

	/// Aborts and removes every session, e.g. on an identity reset.
	pub fn abort_all_sessions(&self) -> Result<()> {
		self.send(Command::AbortAll)
	}

	/// Rebuilds the shared media state from `source`.
	pub fn update_media_state(&self, source: &dyn SharedStateSource) -> Result<()> {
		self.update_media_state_snapshot(SharedStateSnapshot::collect(source))
	}

	pub fn update_media_state_snapshot(&self, snapshot: SharedStateSnapshot) -> Result<()> {
		self.send(Command::UpdateState { snapshot })
	}

	/// Routes a backend response event carrying `requestEventId` and a
	/// session id. Events without a session id are ignored.
	pub fn handle_edge_response(&self, event: &Value) -> Result<()> {
		match EdgeSessionResponse::from_event(event) {
			Some(response) => {
				self.notify_session_update(&response.token, response.backend_session_id)
			}
			None => Ok(()),
		}
	}

	/// The backend assigned `backend_session_id` to the request under `token`.
	pub fn notify_session_update(
		&self,
		token: &CorrelationToken,
		backend_session_id: impl Into<String>,
	) -> Result<()> {
		self.send(Command::BackendSession {
			token: token.clone(),
			backend_session_id: backend_session_id.into(),
		})
	}

	/// The backend accepted the request under `token`.
	pub fn notify_delivered(&self, token: &CorrelationToken) -> Result<()> {
		self.send(Command::BackendDelivered {
			token: token.clone(),
		})
	}

	/// The request under `token` failed at the backend.
	pub fn notify_backend_failure(
		&self,
		token: &CorrelationToken,
		reason: impl Into<String>,
	) -> Result<()> {
		self.send(Command::BackendFailure {
			token: token.clone(),
			reason: reason.into(),
		})
	}

	/// Ids of every live session, sorted.
	pub async fn session_ids(&self) -> Result<Vec<SessionId>> {
		self.request(|reply_tx| Command::SessionIds { reply_tx }).await
	}

	pub async fn session_snapshot(&self, session_id: &SessionId) -> Result<Option<SessionSnapshot>> {
		let session_id = session_id.clone();
		self.request(|reply_tx| Command::SessionSnapshot {
			session_id,
			reply_tx,
		})
		.await
	}

	pub async fn media_state(&self) -> Result<MediaState> {
		self.request(|reply_tx| Command::MediaState { reply_tx }).await
	}

	/// Stops the actor after the commands already queued. Live sessions are
	/// dropped; persisted hits stay in the store for the next start.
	pub async fn shutdown(&self) -> Result<()> {
		self.request(|reply_tx| Command::Shutdown { reply_tx }).await
	}
}
