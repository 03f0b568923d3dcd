// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Media session state machine.
//!
//! A session moves `Active -> Ending -> Terminated` or
//! `Active -> Aborting -> Terminated`. The draining states are left only once
//! the delivery strategy reports it is idle; that is the single path to
//! `Terminated`. Delivery itself is delegated to a [`SessionStrategy`]:
//! [`RealtimeSession`] for live playback and [`OfflineSession`] for
//! downloaded content and recovered sessions.

mod offline;
mod realtime;

pub(crate) use offline::OfflineSession;
pub(crate) use realtime::RealtimeSession;

use std::time::Duration;

use async_trait::async_trait;
use loom_media_core::{CorrelationToken, MediaHit, MediaState, SessionId};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::config::{MediaConfig, RetryPolicy};
use crate::dispatch::{BackendResponder, NetworkDispatch, SessionCreatedHook};
use crate::service::Command;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionLifecycle {
	Active,
	/// `end` was requested; remaining hits are being delivered.
	Ending,
	/// `abort` was requested; remaining hits were discarded.
	Aborting,
	Terminated,
}

impl std::fmt::Display for SessionLifecycle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			SessionLifecycle::Active => write!(f, "active"),
			SessionLifecycle::Ending => write!(f, "ending"),
			SessionLifecycle::Aborting => write!(f, "aborting"),
			SessionLifecycle::Terminated => write!(f, "terminated"),
		}
	}
}

/// Delivery strategy of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
	Realtime,
	Offline,
}

impl std::fmt::Display for SessionKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			SessionKind::Realtime => write!(f, "realtime"),
			SessionKind::Offline => write!(f, "offline"),
		}
	}
}

/// How a session finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
	/// Every hit was delivered or dropped after `end`.
	Completed,
	/// The session was aborted and its hits discarded.
	Aborted,
	/// No session with that id was registered.
	NotFound,
}

/// Read-only view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
	pub id: SessionId,
	pub kind: SessionKind,
	pub lifecycle: SessionLifecycle,
	/// Hits not yet delivered.
	pub pending_hits: u64,
	pub backend_session_id: Option<String>,
	pub awaiting_correlation: bool,
}

/// Delivery timing shared by all sessions of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SessionPolicy {
	pub retry: RetryPolicy,
	pub correlation_timeout: Duration,
	pub hit_gap_warning: Duration,
}

impl From<&MediaConfig> for SessionPolicy {
	fn from(config: &MediaConfig) -> Self {
		Self {
			retry: config.retry,
			correlation_timeout: config.correlation_timeout,
			hit_gap_warning: config.hit_gap_warning,
		}
	}
}

impl Default for SessionPolicy {
	fn default() -> Self {
		Self::from(&MediaConfig::default())
	}
}

/// Deferred re-entry of a session onto the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SessionTimer {
	pub session_id: SessionId,
	pub kind: TimerKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TimerKind {
	/// Retry delay elapsed. Stale if the session's epoch moved on.
	Retry { epoch: u64 },
	/// No backend answer arrived for `token` in time.
	CorrelationTimeout { token: CorrelationToken },
}

/// Schedules [`SessionTimer`]s back onto the service's command queue.
#[derive(Clone)]
pub(crate) struct TimerScheduler {
	tx: mpsc::WeakUnboundedSender<Command>,
}

impl TimerScheduler {
	pub fn new(tx: mpsc::WeakUnboundedSender<Command>) -> Self {
		Self { tx }
	}

	pub fn schedule(&self, delay: Duration, timer: SessionTimer) {
		let tx = self.tx.clone();
		tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			if let Some(tx) = tx.upgrade() {
				let _ = tx.send(Command::Timer(timer));
			}
		});
	}
}

/// Everything a session may use while handling one command.
pub(crate) struct SessionEnv<'a> {
	pub state: &'a MediaState,
	pub dispatcher: &'a dyn NetworkDispatch,
	pub responder: &'a BackendResponder,
	pub timers: &'a TimerScheduler,
	pub hook: &'a dyn SessionCreatedHook,
	pub policy: &'a SessionPolicy,
}

/// Delivery behaviour behind a [`MediaSession`].
///
/// The wrapping session enforces lifecycle guards; strategies only see calls
/// that are valid for the current state.
#[async_trait]
pub(crate) trait SessionStrategy: Send {
	fn kind(&self) -> SessionKind;

	/// Accepts a hit while the session is active.
	async fn queue(&mut self, hit: MediaHit, env: &SessionEnv<'_>);

	/// Starts draining every remaining hit.
	async fn end(&mut self, env: &SessionEnv<'_>);

	/// Discards every remaining hit without delivering it.
	async fn abort(&mut self, env: &SessionEnv<'_>);

	async fn handle_state_update(&mut self, env: &SessionEnv<'_>);

	async fn on_timer(&mut self, timer: TimerKind, env: &SessionEnv<'_>);

	/// Backend assigned a session id for `token`. Returns whether the token
	/// belonged to this session.
	async fn on_backend_session(
		&mut self,
		_token: &CorrelationToken,
		_backend_session_id: &str,
		_env: &SessionEnv<'_>,
	) -> bool {
		false
	}

	/// Backend accepted the request under `token`.
	async fn on_backend_delivered(
		&mut self,
		_token: &CorrelationToken,
		_env: &SessionEnv<'_>,
	) -> bool {
		false
	}

	/// Backend reported a failure for `token`.
	async fn on_backend_failure(
		&mut self,
		_token: &CorrelationToken,
		_reason: &str,
		_env: &SessionEnv<'_>,
	) -> bool {
		false
	}

	/// No hit is pending and nothing is in flight.
	fn is_idle(&self) -> bool;

	fn pending_hits(&self) -> u64;

	fn outstanding_token(&self) -> Option<&CorrelationToken> {
		None
	}

	fn backend_session_id(&self) -> Option<&str> {
		None
	}
}

/// A session owned by the service.
pub(crate) struct MediaSession {
	id: SessionId,
	lifecycle: SessionLifecycle,
	strategy: Box<dyn SessionStrategy>,
	waiters: Vec<oneshot::Sender<SessionOutcome>>,
}

impl MediaSession {
	pub fn new(id: SessionId, strategy: Box<dyn SessionStrategy>) -> Self {
		Self {
			id,
			lifecycle: SessionLifecycle::Active,
			strategy,
			waiters: Vec::new(),
		}
	}

	pub fn is_terminated(&self) -> bool {
		self.lifecycle == SessionLifecycle::Terminated
	}

	pub fn outstanding_token(&self) -> Option<&CorrelationToken> {
		self.strategy.outstanding_token()
	}

	pub async fn queue(&mut self, hit: MediaHit, env: &SessionEnv<'_>) {
		if self.lifecycle != SessionLifecycle::Active {
			debug!(
				session_id = %self.id,
				lifecycle = %self.lifecycle,
				event_type = %hit.event_type(),
				"session is not active, dropping hit"
			);
			return;
		}
		self.strategy.queue(hit, env).await;
	}

	/// Requests a graceful end. `waiter` resolves once the session terminates.
	pub async fn end(
		&mut self,
		env: &SessionEnv<'_>,
		waiter: Option<oneshot::Sender<SessionOutcome>>,
	) {
		if let Some(waiter) = waiter {
			self.waiters.push(waiter);
		}

		if self.lifecycle != SessionLifecycle::Active {
			debug!(session_id = %self.id, lifecycle = %self.lifecycle, "session already draining, ignoring end");
			return;
		}

		info!(session_id = %self.id, kind = %self.strategy.kind(), "ending media session");
		self.lifecycle = SessionLifecycle::Ending;
		self.strategy.end(env).await;
		self.settle();
	}

	pub async fn abort(&mut self, env: &SessionEnv<'_>) {
		if self.lifecycle != SessionLifecycle::Active {
			debug!(session_id = %self.id, lifecycle = %self.lifecycle, "session already draining, ignoring abort");
			return;
		}
		self.discard(env).await;
	}

	/// Aborts regardless of draining state. Used for privacy opt-out and
	/// identity resets.
	pub async fn force_abort(&mut self, env: &SessionEnv<'_>) {
		if self.is_terminated() {
			return;
		}
		self.discard(env).await;
	}

	async fn discard(&mut self, env: &SessionEnv<'_>) {
		info!(session_id = %self.id, kind = %self.strategy.kind(), "aborting media session");
		self.lifecycle = SessionLifecycle::Aborting;
		self.strategy.abort(env).await;
		self.settle();
	}

	pub async fn handle_state_update(&mut self, env: &SessionEnv<'_>) {
		if matches!(
			self.lifecycle,
			SessionLifecycle::Active | SessionLifecycle::Ending
		) {
			self.strategy.handle_state_update(env).await;
			self.settle();
		}
	}

	pub async fn on_timer(&mut self, timer: TimerKind, env: &SessionEnv<'_>) {
		if self.is_terminated() {
			return;
		}
		self.strategy.on_timer(timer, env).await;
		self.settle();
	}

	pub async fn on_backend_session(
		&mut self,
		token: &CorrelationToken,
		backend_session_id: &str,
		env: &SessionEnv<'_>,
	) -> bool {
		if self.is_terminated() {
			return false;
		}
		let matched = self
			.strategy
			.on_backend_session(token, backend_session_id, env)
			.await;
		self.settle();
		matched
	}

	pub async fn on_backend_delivered(
		&mut self,
		token: &CorrelationToken,
		env: &SessionEnv<'_>,
	) -> bool {
		if self.is_terminated() {
			return false;
		}
		let matched = self.strategy.on_backend_delivered(token, env).await;
		self.settle();
		matched
	}

	pub async fn on_backend_failure(
		&mut self,
		token: &CorrelationToken,
		reason: &str,
		env: &SessionEnv<'_>,
	) -> bool {
		if self.is_terminated() {
			return false;
		}
		let matched = self.strategy.on_backend_failure(token, reason, env).await;
		self.settle();
		matched
	}

	pub fn snapshot(&self) -> SessionSnapshot {
		SessionSnapshot {
			id: self.id.clone(),
			kind: self.strategy.kind(),
			lifecycle: self.lifecycle,
			pending_hits: self.strategy.pending_hits(),
			backend_session_id: self.strategy.backend_session_id().map(str::to_string),
			awaiting_correlation: self.strategy.outstanding_token().is_some(),
		}
	}

	fn settle(&mut self) {
		let outcome = match self.lifecycle {
			SessionLifecycle::Ending => SessionOutcome::Completed,
			SessionLifecycle::Aborting => SessionOutcome::Aborted,
			SessionLifecycle::Active | SessionLifecycle::Terminated => return,
		};
		if !self.strategy.is_idle() {
			return;
		}

		self.lifecycle = SessionLifecycle::Terminated;
		info!(session_id = %self.id, outcome = ?outcome, "media session terminated");
		for waiter in self.waiters.drain(..) {
			let _ = waiter.send(outcome);
		}
	}
}
