// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Live delivery of hits with backend session correlation.
//!
//! The session-start hit is sent first and the queue stalls until the backend
//! answers with a session id for its correlation token. Every later hit is
//! sent fire-and-forget with that id attached. Only the session-start hit is
//! retried; a failed non-start hit is dropped.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use loom_media_core::{CorrelationToken, MediaHit, SessionId};
use tracing::{debug, info, trace, warn};

use super::{SessionEnv, SessionKind, SessionStrategy, SessionTimer, TimerKind};
use crate::dispatch::SessionCreated;
use crate::report::build_edge_request;

fn exceeds_gap(gap_ms: i64, limit: Duration) -> bool {
	gap_ms > i64::try_from(limit.as_millis()).unwrap_or(i64::MAX)
}

pub(crate) struct RealtimeSession {
	id: SessionId,
	hits: VecDeque<MediaHit>,
	backend_session_id: Option<String>,
	/// Token of the in-flight session-start request.
	outstanding: Option<CorrelationToken>,
	start_failures: u32,
	retry_epoch: u64,
	retry_pending: bool,
	last_hit_ts: Option<i64>,
}

impl RealtimeSession {
	pub fn new(id: SessionId) -> Self {
		Self {
			id,
			hits: VecDeque::new(),
			backend_session_id: None,
			outstanding: None,
			start_failures: 0,
			retry_epoch: 0,
			retry_pending: false,
			last_hit_ts: None,
		}
	}

	fn check_hit_gap(&mut self, hit: &MediaHit, env: &SessionEnv<'_>) {
		let ts = hit.timestamp();
		if !hit.event_type().is_session_start() {
			if let Some(last) = self.last_hit_ts {
				let gap_ms = ts.saturating_sub(last);
				if exceeds_gap(gap_ms, env.policy.hit_gap_warning) {
					warn!(
						session_id = %self.id,
						event_type = %hit.event_type(),
						gap_ms,
						"gap between consecutive hits exceeds threshold"
					);
				}
			}
		}
		self.last_hit_ts = Some(ts);
	}

	fn try_send(&mut self, env: &SessionEnv<'_>) {
		loop {
			if self.outstanding.is_some() {
				trace!(session_id = %self.id, "waiting for backend session id");
				return;
			}
			if self.retry_pending {
				trace!(session_id = %self.id, "waiting for session start retry");
				return;
			}
			let Some(hit) = self.hits.front() else {
				return;
			};

			let is_start = hit.event_type().is_session_start();
			if !is_start && self.backend_session_id.is_none() {
				debug!(
					session_id = %self.id,
					event_type = %hit.event_type(),
					"no backend session id, dropping hit"
				);
				self.hits.pop_front();
				continue;
			}

			let Some(request) =
				build_edge_request(env.state, hit, self.backend_session_id.as_deref())
			else {
				debug!(
					session_id = %self.id,
					event_type = %hit.event_type(),
					"unable to build request, dropping hit"
				);
				self.hits.pop_front();
				continue;
			};

			match env.dispatcher.send(request, env.responder.clone()) {
				Ok(token) if is_start => {
					trace!(session_id = %self.id, token = %token, "session start sent");
					env.timers.schedule(
						env.policy.correlation_timeout,
						SessionTimer {
							session_id: self.id.clone(),
							kind: TimerKind::CorrelationTimeout {
								token: token.clone(),
							},
						},
					);
					self.outstanding = Some(token);
					return;
				}
				Ok(token) => {
					trace!(session_id = %self.id, token = %token, "hit sent");
					self.hits.pop_front();
				}
				Err(e) if is_start => {
					if !self.start_failed(&e.to_string(), env.policy.retry.delay, env) {
						return;
					}
				}
				Err(e) => {
					warn!(session_id = %self.id, error = %e, "failed to send hit, dropping");
					self.hits.pop_front();
				}
			}
		}
	}

	/// Records a failed session-start attempt. Returns `true` if sending may
	/// go on now, either because the hit was given up on or because `delay` is
	/// zero and it is resent at once; `false` if a retry is scheduled.
	fn start_failed(&mut self, reason: &str, delay: Duration, env: &SessionEnv<'_>) -> bool {
		self.start_failures += 1;
		let max_attempts = env.policy.retry.max_attempts;

		if self.start_failures >= max_attempts {
			warn!(
				session_id = %self.id,
				attempts = self.start_failures,
				reason,
				"giving up on session start"
			);
			self.start_failures = 0;
			self.hits.pop_front();
			return true;
		}

		warn!(
			session_id = %self.id,
			attempt = self.start_failures,
			max_attempts,
			reason,
			"session start failed, retrying"
		);
		if delay.is_zero() {
			return true;
		}
		self.retry_epoch += 1;
		self.retry_pending = true;
		env.timers.schedule(
			delay,
			SessionTimer {
				session_id: self.id.clone(),
				kind: TimerKind::Retry {
					epoch: self.retry_epoch,
				},
			},
		);
		false
	}

	fn matches_outstanding(&self, token: &CorrelationToken) -> bool {
		self.outstanding.as_ref() == Some(token)
	}
}

#[async_trait]
impl SessionStrategy for RealtimeSession {
	fn kind(&self) -> SessionKind {
		SessionKind::Realtime
	}

	async fn queue(&mut self, hit: MediaHit, env: &SessionEnv<'_>) {
		self.check_hit_gap(&hit, env);
		trace!(session_id = %self.id, event_type = %hit.event_type(), "hit queued");
		self.hits.push_back(hit);
		self.try_send(env);
	}

	async fn end(&mut self, env: &SessionEnv<'_>) {
		self.try_send(env);
	}

	async fn abort(&mut self, _env: &SessionEnv<'_>) {
		let dropped = self.hits.len();
		self.hits.clear();
		self.outstanding = None;
		self.retry_pending = false;
		self.retry_epoch += 1;
		debug!(session_id = %self.id, dropped, "discarded undelivered hits");
	}

	async fn handle_state_update(&mut self, env: &SessionEnv<'_>) {
		self.try_send(env);
	}

	async fn on_timer(&mut self, timer: TimerKind, env: &SessionEnv<'_>) {
		match timer {
			TimerKind::Retry { epoch } => {
				if !self.retry_pending || epoch != self.retry_epoch {
					trace!(session_id = %self.id, epoch, "stale retry timer");
					return;
				}
				self.retry_pending = false;
			}
			TimerKind::CorrelationTimeout { token } => {
				if !self.matches_outstanding(&token) {
					return;
				}
				// The timeout already spent the wait; resend without a further delay.
				self.outstanding = None;
				self.start_failed(
					"timed out waiting for backend session id",
					Duration::ZERO,
					env,
				);
			}
		}
		self.try_send(env);
	}

	async fn on_backend_session(
		&mut self,
		token: &CorrelationToken,
		backend_session_id: &str,
		env: &SessionEnv<'_>,
	) -> bool {
		if !self.matches_outstanding(token) {
			debug!(session_id = %self.id, token = %token, "ignoring response for another request");
			return false;
		}

		info!(
			session_id = %self.id,
			backend_session_id,
			"backend session created"
		);
		self.outstanding = None;
		self.start_failures = 0;
		self.backend_session_id = Some(backend_session_id.to_string());
		self.hits.pop_front();
		env.hook.session_created(SessionCreated {
			session_id: self.id.clone(),
			backend_session_id: backend_session_id.to_string(),
		});
		self.try_send(env);
		true
	}

	async fn on_backend_failure(
		&mut self,
		token: &CorrelationToken,
		reason: &str,
		env: &SessionEnv<'_>,
	) -> bool {
		if !self.matches_outstanding(token) {
			return false;
		}
		self.outstanding = None;
		self.start_failed(reason, env.policy.retry.delay, env);
		self.try_send(env);
		true
	}

	fn is_idle(&self) -> bool {
		self.hits.is_empty() && self.outstanding.is_none()
	}

	fn pending_hits(&self) -> u64 {
		self.hits.len() as u64
	}

	fn outstanding_token(&self) -> Option<&CorrelationToken> {
		self.outstanding.as_ref()
	}

	fn backend_session_id(&self) -> Option<&str> {
		self.backend_session_id.as_deref()
	}
}
