// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The registry actor: the single serial domain for every session mutation.

use std::collections::HashMap;
use std::sync::Arc;

use loom_media_core::{
	CorrelationToken, MediaHit, MediaState, SessionId, SharedStateSnapshot, TrackerConfig,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, trace, warn};

use crate::dispatch::{BackendResponder, NetworkDispatch, SessionCreatedHook};
use crate::error::{MediaError, Result};
use crate::session::{
	MediaSession, OfflineSession, RealtimeSession, SessionEnv, SessionOutcome, SessionPolicy,
	SessionSnapshot, SessionTimer, TimerScheduler,
};
use crate::store::PersistentQueue;

/// Messages processed by the actor, one at a time, in submission order.
pub(crate) enum Command {
	CreateSession {
		config: TrackerConfig,
		reply_tx: oneshot::Sender<Result<SessionId>>,
	},
	ProcessHit {
		session_id: SessionId,
		hit: MediaHit,
	},
	EndSession {
		session_id: SessionId,
		completion: Option<oneshot::Sender<SessionOutcome>>,
	},
	AbortSession {
		session_id: SessionId,
	},
	AbortAll,
	UpdateState {
		snapshot: SharedStateSnapshot,
	},
	BackendSession {
		token: CorrelationToken,
		backend_session_id: String,
	},
	BackendDelivered {
		token: CorrelationToken,
	},
	BackendFailure {
		token: CorrelationToken,
		reason: String,
	},
	Timer(SessionTimer),
	SessionIds {
		reply_tx: oneshot::Sender<Vec<SessionId>>,
	},
	SessionSnapshot {
		session_id: SessionId,
		reply_tx: oneshot::Sender<Option<SessionSnapshot>>,
	},
	MediaState {
		reply_tx: oneshot::Sender<MediaState>,
	},
	Shutdown {
		reply_tx: oneshot::Sender<()>,
	},
}

/// Collaborators shared by every session.
pub(crate) struct ActorDeps {
	pub dispatcher: Arc<dyn NetworkDispatch>,
	pub hook: Arc<dyn SessionCreatedHook>,
	pub store: Arc<dyn PersistentQueue>,
	pub policy: SessionPolicy,
}

pub(crate) struct MediaActor {
	sessions: HashMap<SessionId, MediaSession>,
	/// In-flight requests awaiting a backend answer and the session that sent them.
	correlations: HashMap<CorrelationToken, SessionId>,
	state: MediaState,
	deps: ActorDeps,
	responder: BackendResponder,
	timers: TimerScheduler,
}

fn session_env<'a>(
	state: &'a MediaState,
	deps: &'a ActorDeps,
	responder: &'a BackendResponder,
	timers: &'a TimerScheduler,
) -> SessionEnv<'a> {
	SessionEnv {
		state,
		dispatcher: deps.dispatcher.as_ref(),
		responder,
		timers,
		hook: deps.hook.as_ref(),
		policy: &deps.policy,
	}
}

impl MediaActor {
	pub fn new(deps: ActorDeps, tx: mpsc::WeakUnboundedSender<Command>) -> Self {
		Self {
			sessions: HashMap::new(),
			correlations: HashMap::new(),
			state: MediaState::new(),
			deps,
			responder: BackendResponder::new(tx.clone()),
			timers: TimerScheduler::new(tx),
		}
	}

	/// Recovers persisted sessions, then serves commands until shutdown or
	/// until every handle is dropped.
	pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
		info!("media service started");
		self.recover().await;

		while let Some(command) = rx.recv().await {
			if !self.handle(command).await {
				break;
			}
		}

		info!("media service stopped");
	}

	/// Applies one command. Returns `false` once the actor should stop.
	async fn handle(&mut self, command: Command) -> bool {
		match command {
			Command::CreateSession { config, reply_tx } => {
				let _ = reply_tx.send(self.create_session(config));
			}
			Command::ProcessHit { session_id, hit } => self.process_hit(session_id, hit).await,
			Command::EndSession {
				session_id,
				completion,
			} => self.end_session(session_id, completion).await,
			Command::AbortSession { session_id } => self.abort_session(session_id).await,
			Command::AbortAll => self.abort_all().await,
			Command::UpdateState { snapshot } => self.update_state(snapshot).await,
			Command::BackendSession {
				token,
				backend_session_id,
			} => self.backend_session(token, backend_session_id).await,
			Command::BackendDelivered { token } => self.backend_delivered(token).await,
			Command::BackendFailure { token, reason } => self.backend_failure(token, reason).await,
			Command::Timer(timer) => self.timer(timer).await,
			Command::SessionIds { reply_tx } => {
				let mut ids: Vec<SessionId> = self.sessions.keys().cloned().collect();
				ids.sort();
				let _ = reply_tx.send(ids);
			}
			Command::SessionSnapshot {
				session_id,
				reply_tx,
			} => {
				let _ = reply_tx.send(self.sessions.get(&session_id).map(MediaSession::snapshot));
			}
			Command::MediaState { reply_tx } => {
				let _ = reply_tx.send(self.state.clone());
			}
			Command::Shutdown { reply_tx } => {
				info!(live_sessions = self.sessions.len(), "media service shutting down");
				let _ = reply_tx.send(());
				return false;
			}
		}
		true
	}

	/// Re-drives every session that still has persisted hits.
	#[instrument(skip(self))]
	async fn recover(&mut self) {
		let ids = match self.deps.store.session_ids().await {
			Ok(ids) => ids,
			Err(e) => {
				warn!(error = %e, "failed to list persisted sessions");
				return;
			}
		};
		if ids.is_empty() {
			return;
		}

		info!(count = ids.len(), "recovering persisted media sessions");
		for id in ids {
			let strategy = OfflineSession::recovered(id.clone(), self.deps.store.clone()).await;
			let mut session = MediaSession::new(id.clone(), Box::new(strategy));
			let env = session_env(&self.state, &self.deps, &self.responder, &self.timers);
			session.end(&env, None).await;
			self.sessions.insert(id.clone(), session);
			self.settle(&id);
		}
	}

	fn create_session(&mut self, config: TrackerConfig) -> Result<SessionId> {
		if self.state.is_opted_out() {
			debug!("privacy status is opted out, refusing to create session");
			return Err(MediaError::PrivacyOptedOut);
		}

		let id = SessionId::generate();
		let session = if config.downloaded_content {
			MediaSession::new(
				id.clone(),
				Box::new(OfflineSession::new(id.clone(), self.deps.store.clone())),
			)
		} else {
			MediaSession::new(id.clone(), Box::new(RealtimeSession::new(id.clone())))
		};
		info!(
			session_id = %id,
			downloaded = config.downloaded_content,
			"media session created"
		);
		self.sessions.insert(id.clone(), session);
		Ok(id)
	}

	async fn process_hit(&mut self, session_id: SessionId, hit: MediaHit) {
		let env = session_env(&self.state, &self.deps, &self.responder, &self.timers);
		let Some(session) = self.sessions.get_mut(&session_id) else {
			debug!(session_id = %session_id, event_type = %hit.event_type(), "unknown session, dropping hit");
			return;
		};
		session.queue(hit, &env).await;
		self.settle(&session_id);
	}

	async fn end_session(
		&mut self,
		session_id: SessionId,
		completion: Option<oneshot::Sender<SessionOutcome>>,
	) {
		let env = session_env(&self.state, &self.deps, &self.responder, &self.timers);
		let Some(session) = self.sessions.get_mut(&session_id) else {
			debug!(session_id = %session_id, "unknown session, ignoring end");
			if let Some(completion) = completion {
				let _ = completion.send(SessionOutcome::NotFound);
			}
			return;
		};
		session.end(&env, completion).await;
		self.settle(&session_id);
	}

	async fn abort_session(&mut self, session_id: SessionId) {
		let env = session_env(&self.state, &self.deps, &self.responder, &self.timers);
		let Some(session) = self.sessions.get_mut(&session_id) else {
			debug!(session_id = %session_id, "unknown session, ignoring abort");
			return;
		};
		session.abort(&env).await;
		self.settle(&session_id);
	}

	/// Aborts and removes every session regardless of its state.
	async fn abort_all(&mut self) {
		let env = session_env(&self.state, &self.deps, &self.responder, &self.timers);
		for session in self.sessions.values_mut() {
			session.force_abort(&env).await;
		}
		let removed = self.sessions.len();
		self.sessions.clear();
		self.correlations.clear();
		if removed > 0 {
			info!(removed, "aborted all media sessions");
		}
	}

	async fn update_state(&mut self, snapshot: SharedStateSnapshot) {
		let was_opted_out = self.state.is_opted_out();
		self.state.update(&snapshot);

		if self.state.is_opted_out() {
			if !was_opted_out {
				info!("privacy status changed to opted out");
			}
			self.abort_all().await;
			if let Err(e) = self.deps.store.clear().await {
				warn!(error = %e, "failed to clear persisted hits after opt-out");
			}
			return;
		}

		let ids: Vec<SessionId> = self.sessions.keys().cloned().collect();
		for id in ids {
			let env = session_env(&self.state, &self.deps, &self.responder, &self.timers);
			if let Some(session) = self.sessions.get_mut(&id) {
				session.handle_state_update(&env).await;
			}
			self.settle(&id);
		}
	}

	async fn backend_session(&mut self, token: CorrelationToken, backend_session_id: String) {
		let env = session_env(&self.state, &self.deps, &self.responder, &self.timers);
		if let Some(owner) = self.correlations.get(&token).cloned() {
			if let Some(session) = self.sessions.get_mut(&owner) {
				session
					.on_backend_session(&token, &backend_session_id, &env)
					.await;
			}
			self.settle(&owner);
			return;
		}

		// Not in the table; offer it to every session and let the owner claim it.
		let mut claimed = None;
		for (id, session) in self.sessions.iter_mut() {
			if session
				.on_backend_session(&token, &backend_session_id, &env)
				.await
			{
				claimed = Some(id.clone());
				break;
			}
		}
		match claimed {
			Some(id) => self.settle(&id),
			None => debug!(token = %token, "no session awaiting this correlation token"),
		}
	}

	async fn backend_delivered(&mut self, token: CorrelationToken) {
		let Some(owner) = self.correlations.get(&token).cloned() else {
			trace!(token = %token, "delivery report for untracked request");
			return;
		};
		let env = session_env(&self.state, &self.deps, &self.responder, &self.timers);
		if let Some(session) = self.sessions.get_mut(&owner) {
			session.on_backend_delivered(&token, &env).await;
		}
		self.settle(&owner);
	}

	async fn backend_failure(&mut self, token: CorrelationToken, reason: String) {
		let Some(owner) = self.correlations.get(&token).cloned() else {
			trace!(token = %token, reason, "backend failure for untracked request");
			return;
		};
		let env = session_env(&self.state, &self.deps, &self.responder, &self.timers);
		if let Some(session) = self.sessions.get_mut(&owner) {
			session.on_backend_failure(&token, &reason, &env).await;
		}
		self.settle(&owner);
	}

	async fn timer(&mut self, timer: SessionTimer) {
		let env = session_env(&self.state, &self.deps, &self.responder, &self.timers);
		let Some(session) = self.sessions.get_mut(&timer.session_id) else {
			trace!(session_id = %timer.session_id, "timer for removed session");
			return;
		};
		session.on_timer(timer.kind, &env).await;
		self.settle(&timer.session_id);
	}

	/// Re-indexes the session's outstanding token and removes it once terminated.
	fn settle(&mut self, session_id: &SessionId) {
		self.correlations.retain(|_, owner| owner != session_id);
		let Some(session) = self.sessions.get(session_id) else {
			return;
		};

		if session.is_terminated() {
			self.sessions.remove(session_id);
			debug!(session_id = %session_id, "media session removed");
			return;
		}
		if let Some(token) = session.outstanding_token() {
			self.correlations.insert(token.clone(), session_id.clone());
		}
	}
}
