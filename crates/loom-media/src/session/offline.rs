// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persisted delivery for downloaded content.
//!
//! Every queued hit is written to the [`PersistentQueue`] first. Once the
//! session ends, records are replayed oldest first, one at a time: a record
//! is deleted only after the backend reports its request delivered. Failures
//! of any hit kind share one capped retry budget; permanent failures skip it.
//! Sessions left in the store by a previous process are rebuilt with
//! [`OfflineSession::recovered`] and drained the same way.

use std::sync::Arc;

use async_trait::async_trait;
use loom_media_core::{CorrelationToken, MediaHit, SessionId};
use tracing::{debug, error, info, trace, warn};

use super::{SessionEnv, SessionKind, SessionStrategy, SessionTimer, TimerKind};
use crate::dispatch::DispatchError;
use crate::report::build_edge_request;
use crate::store::{PersistentQueue, RecordId, StoreError};

enum Step {
	Continue,
	Wait,
	Stop,
}

/// A failed delivery attempt.
enum Failure {
	/// The persistent queue could not be read or updated.
	Store(StoreError),
	/// The dispatcher refused the record's request.
	Dispatch(RecordId, DispatchError),
	/// The backend reported a failure for the record's request.
	Backend(RecordId, String),
	/// No backend answer arrived for the record's request in time.
	TimedOut(RecordId),
}

impl Failure {
	fn record_id(&self) -> Option<RecordId> {
		match self {
			Failure::Store(_) => None,
			Failure::Dispatch(id, _) | Failure::Backend(id, _) | Failure::TimedOut(id) => Some(*id),
		}
	}

	fn is_retryable(&self) -> bool {
		match self {
			Failure::Store(e) => e.is_transient(),
			Failure::Dispatch(_, e) => e.is_retryable(),
			Failure::Backend(..) | Failure::TimedOut(_) => true,
		}
	}
}

impl std::fmt::Display for Failure {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Failure::Store(e) => write!(f, "persistent queue error: {e}"),
			Failure::Dispatch(_, e) => write!(f, "{e}"),
			Failure::Backend(_, reason) => f.write_str(reason),
			Failure::TimedOut(_) => f.write_str("timed out waiting for backend answer"),
		}
	}
}

pub(crate) struct OfflineSession {
	id: SessionId,
	store: Arc<dyn PersistentQueue>,
	draining: bool,
	drained: bool,
	pending: u64,
	/// Request awaiting a backend answer and the record it carries.
	in_flight: Option<(CorrelationToken, RecordId)>,
	failures: u32,
	retry_epoch: u64,
	retry_pending: bool,
}

impl OfflineSession {
	pub fn new(id: SessionId, store: Arc<dyn PersistentQueue>) -> Self {
		Self {
			id,
			store,
			draining: false,
			drained: false,
			pending: 0,
			in_flight: None,
			failures: 0,
			retry_epoch: 0,
			retry_pending: false,
		}
	}

	/// Rebuilds a session whose records outlived the process that wrote them.
	pub async fn recovered(id: SessionId, store: Arc<dyn PersistentQueue>) -> Self {
		let pending = match store.count_for(&id).await {
			Ok(count) => count,
			Err(e) => {
				warn!(session_id = %id, error = %e, "failed to count persisted hits");
				0
			}
		};
		let mut session = Self::new(id, store);
		session.pending = pending;
		session
	}

	async fn drain(&mut self, env: &SessionEnv<'_>) {
		while !self.drained && !self.retry_pending && self.in_flight.is_none() {
			match self.deliver_next(env).await {
				Step::Continue => continue,
				Step::Wait => return,
				Step::Stop => {
					self.drained = true;
					return;
				}
			}
		}
	}

	async fn resume(&mut self, step: Step, env: &SessionEnv<'_>) {
		match step {
			Step::Continue => self.drain(env).await,
			Step::Wait => {}
			Step::Stop => self.drained = true,
		}
	}

	async fn deliver_next(&mut self, env: &SessionEnv<'_>) -> Step {
		let records = match self.store.peek(&self.id, 1).await {
			Ok(records) => records,
			Err(e) => return self.failed(Failure::Store(e), env).await,
		};

		let Some(record) = records.into_iter().next() else {
			info!(session_id = %self.id, "offline session drained");
			self.pending = 0;
			return Step::Stop;
		};

		let hit = match MediaHit::from_json(&record.payload) {
			Ok(hit) => hit,
			Err(e) => {
				debug!(session_id = %self.id, record_id = record.id, error = %e, "malformed persisted hit, deleting");
				return self.remove(record.id, env).await;
			}
		};

		let Some(request) = build_edge_request(env.state, &hit, None) else {
			debug!(
				session_id = %self.id,
				event_type = %hit.event_type(),
				"unable to build request, deleting persisted hit"
			);
			return self.remove(record.id, env).await;
		};

		match env.dispatcher.send(request, env.responder.clone()) {
			Ok(token) => {
				trace!(session_id = %self.id, token = %token, record_id = record.id, "persisted hit sent");
				env.timers.schedule(
					env.policy.correlation_timeout,
					SessionTimer {
						session_id: self.id.clone(),
						kind: TimerKind::CorrelationTimeout {
							token: token.clone(),
						},
					},
				);
				self.in_flight = Some((token, record.id));
				Step::Wait
			}
			Err(e) => self.failed(Failure::Dispatch(record.id, e), env).await,
		}
	}

	async fn remove(&mut self, record_id: RecordId, env: &SessionEnv<'_>) -> Step {
		match self.store.delete(record_id).await {
			Ok(()) => {
				self.pending = self.pending.saturating_sub(1);
				Step::Continue
			}
			Err(e) => self.failed(Failure::Store(e), env).await,
		}
	}

	/// Takes the in-flight request if `token` is its token.
	fn take_in_flight(&mut self, token: &CorrelationToken) -> Option<RecordId> {
		match &self.in_flight {
			Some((outstanding, record_id)) if outstanding == token => {
				let record_id = *record_id;
				self.in_flight = None;
				Some(record_id)
			}
			_ => None,
		}
	}

	async fn delivered(&mut self, record_id: RecordId, env: &SessionEnv<'_>) {
		trace!(session_id = %self.id, record_id, "persisted hit delivered");
		self.failures = 0;
		let step = self.remove(record_id, env).await;
		self.resume(step, env).await;
	}

	/// Counts a failed attempt against the retry budget. A timed-out request
	/// already waited, so it is resent at once; other failures wait for the
	/// retry delay. A permanent failure, or one that spends the budget, drops
	/// the record it concerns; a failed store access instead stops draining
	/// and leaves the records for the next startup.
	async fn failed(&mut self, failure: Failure, env: &SessionEnv<'_>) -> Step {
		let max_attempts = env.policy.retry.max_attempts;

		if failure.is_retryable() {
			self.failures += 1;
			if self.failures < max_attempts {
				warn!(
					session_id = %self.id,
					attempt = self.failures,
					max_attempts,
					reason = %failure,
					"offline delivery failed, retrying"
				);
				if matches!(failure, Failure::TimedOut(_)) {
					return Step::Continue;
				}
				self.retry_epoch += 1;
				self.retry_pending = true;
				env.timers.schedule(
					env.policy.retry.delay,
					SessionTimer {
						session_id: self.id.clone(),
						kind: TimerKind::Retry {
							epoch: self.retry_epoch,
						},
					},
				);
				return Step::Wait;
			}
		}

		self.failures = 0;
		match failure.record_id() {
			Some(record_id) => {
				warn!(session_id = %self.id, record_id, reason = %failure, "giving up on persisted hit");
				match self.store.delete(record_id).await {
					Ok(()) => {
						self.pending = self.pending.saturating_sub(1);
						Step::Continue
					}
					Err(e) => {
						warn!(session_id = %self.id, error = %e, "failed to delete persisted hit, stopping");
						Step::Stop
					}
				}
			}
			None => {
				warn!(session_id = %self.id, reason = %failure, "persistent queue unavailable, leaving hits for next startup");
				Step::Stop
			}
		}
	}
}

#[async_trait]
impl SessionStrategy for OfflineSession {
	fn kind(&self) -> SessionKind {
		SessionKind::Offline
	}

	async fn queue(&mut self, hit: MediaHit, _env: &SessionEnv<'_>) {
		let payload = match hit.to_json() {
			Ok(payload) => payload,
			Err(e) => {
				error!(session_id = %self.id, error = %e, "failed to encode hit");
				return;
			}
		};

		match self.store.add(&self.id, &payload).await {
			Ok(record_id) => {
				self.pending += 1;
				trace!(session_id = %self.id, record_id, event_type = %hit.event_type(), "hit persisted");
			}
			Err(e) => {
				error!(session_id = %self.id, error = %e, "failed to persist hit, hit lost");
			}
		}
	}

	async fn end(&mut self, env: &SessionEnv<'_>) {
		self.draining = true;
		self.drain(env).await;
	}

	async fn abort(&mut self, _env: &SessionEnv<'_>) {
		match self.store.delete_all_for(&self.id).await {
			Ok(removed) => debug!(session_id = %self.id, removed, "discarded persisted hits"),
			Err(e) => warn!(session_id = %self.id, error = %e, "failed to discard persisted hits"),
		}
		self.pending = 0;
		self.in_flight = None;
		self.retry_pending = false;
		self.retry_epoch += 1;
		self.drained = true;
	}

	async fn handle_state_update(&mut self, env: &SessionEnv<'_>) {
		if self.draining {
			self.drain(env).await;
		}
	}

	async fn on_timer(&mut self, timer: TimerKind, env: &SessionEnv<'_>) {
		match timer {
			TimerKind::Retry { epoch } => {
				if !self.retry_pending || epoch != self.retry_epoch {
					trace!(session_id = %self.id, epoch, "stale retry timer");
					return;
				}
				self.retry_pending = false;
				if self.draining {
					self.drain(env).await;
				}
			}
			TimerKind::CorrelationTimeout { token } => {
				let Some(record_id) = self.take_in_flight(&token) else {
					return;
				};
				let step = self.failed(Failure::TimedOut(record_id), env).await;
				self.resume(step, env).await;
			}
		}
	}

	async fn on_backend_session(
		&mut self,
		token: &CorrelationToken,
		backend_session_id: &str,
		env: &SessionEnv<'_>,
	) -> bool {
		let Some(record_id) = self.take_in_flight(token) else {
			return false;
		};
		debug!(session_id = %self.id, backend_session_id, "backend accepted persisted session start");
		self.delivered(record_id, env).await;
		true
	}

	async fn on_backend_delivered(&mut self, token: &CorrelationToken, env: &SessionEnv<'_>) -> bool {
		let Some(record_id) = self.take_in_flight(token) else {
			return false;
		};
		self.delivered(record_id, env).await;
		true
	}

	async fn on_backend_failure(
		&mut self,
		token: &CorrelationToken,
		reason: &str,
		env: &SessionEnv<'_>,
	) -> bool {
		let Some(record_id) = self.take_in_flight(token) else {
			return false;
		};
		let step = self
			.failed(Failure::Backend(record_id, reason.to_string()), env)
			.await;
		self.resume(step, env).await;
		true
	}

	fn is_idle(&self) -> bool {
		self.drained
	}

	fn pending_hits(&self) -> u64 {
		self.pending
	}

	fn outstanding_token(&self) -> Option<&CorrelationToken> {
		self.in_flight.as_ref().map(|(token, _)| token)
	}
}
