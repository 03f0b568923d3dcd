// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Network dispatch contract and backend correlation.
//!
//! Sending is fire-and-forget: [`NetworkDispatch::send`] returns a
//! [`CorrelationToken`] immediately, and the backend's answer for that token
//! arrives later through the [`BackendResponder`] handed to the dispatcher.
//! Responses are queued onto the media service like any other command, so
//! they never race with session mutations.

use loom_media_core::{CorrelationToken, SessionId};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::report::EdgeRequest;
use crate::service::Command;

/// Errors raised when a request cannot be handed off or fails at the backend.
#[derive(Debug, Error)]
pub enum DispatchError {
	/// No tokio runtime to run the request on.
	#[error("no tokio runtime available")]
	NoRuntime,

	/// The receiving side of a channel dispatcher is gone.
	#[error("dispatch channel closed")]
	ChannelClosed,

	/// The request was refused before it was sent.
	#[error("request rejected: {0}")]
	Rejected(String),

	/// HTTP request failed.
	#[error("HTTP request failed: {0}")]
	Request(#[from] reqwest::Error),

	/// Backend returned an error response.
	#[error("server error ({status}): {message}")]
	Server { status: u16, message: String },
}

impl DispatchError {
	pub fn is_retryable(&self) -> bool {
		match self {
			DispatchError::NoRuntime | DispatchError::Rejected(_) => false,
			DispatchError::ChannelClosed => true,
			DispatchError::Request(e) => e.is_timeout() || e.is_connect() || e.is_request(),
			DispatchError::Server { status, .. } => {
				matches!(*status, 429 | 408 | 500 | 502 | 503 | 504)
			}
		}
	}
}

/// Hands requests to the collection backend.
pub trait NetworkDispatch: Send + Sync {
	/// Starts sending `request` without waiting for it to complete.
	///
	/// An `Err` means the request was not handed off at all. Otherwise the
	/// outcome must eventually be reported through `responder` under the
	/// returned token: [`BackendResponder::session_created`] for an accepted
	/// session start, [`BackendResponder::delivered`] for any other accepted
	/// request, [`BackendResponder::failed`] otherwise.
	fn send(
		&self,
		request: EdgeRequest,
		responder: BackendResponder,
	) -> Result<CorrelationToken, DispatchError>;
}

/// Reports backend outcomes back to the media service.
///
/// Holds a weak reference to the service; reports made after the service
/// stopped are dropped.
#[derive(Clone)]
pub struct BackendResponder {
	tx: mpsc::WeakUnboundedSender<Command>,
}

impl BackendResponder {
	pub(crate) fn new(tx: mpsc::WeakUnboundedSender<Command>) -> Self {
		Self { tx }
	}

	/// The backend accepted the session-start request under `token` and
	/// assigned `backend_session_id`.
	pub fn session_created(
		&self,
		token: &CorrelationToken,
		backend_session_id: impl Into<String>,
	) -> bool {
		self.deliver(Command::BackendSession {
			token: token.clone(),
			backend_session_id: backend_session_id.into(),
		})
	}

	/// The backend accepted the request under `token`.
	pub fn delivered(&self, token: &CorrelationToken) -> bool {
		self.deliver(Command::BackendDelivered {
			token: token.clone(),
		})
	}

	/// The request under `token` failed at the backend.
	pub fn failed(&self, token: &CorrelationToken, reason: impl Into<String>) -> bool {
		self.deliver(Command::BackendFailure {
			token: token.clone(),
			reason: reason.into(),
		})
	}

	fn deliver(&self, command: Command) -> bool {
		match self.tx.upgrade() {
			Some(tx) => tx.send(command).is_ok(),
			None => {
				trace!("media service stopped, dropping backend response");
				false
			}
		}
	}
}

impl std::fmt::Debug for BackendResponder {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BackendResponder").finish_non_exhaustive()
	}
}

/// Backend session assignment parsed from a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeSessionResponse {
	pub token: CorrelationToken,
	pub backend_session_id: String,
}

impl EdgeSessionResponse {
	/// Parses a host response event:
	/// `{ "requestEventId": "<token>", "payload": [{ "sessionId": "<id>" }] }`.
	pub fn from_event(event: &Value) -> Option<Self> {
		let token = event
			.get("requestEventId")
			.and_then(Value::as_str)
			.filter(|s| !s.is_empty())?;
		let Some(backend_session_id) = first_session_id(event.get("payload")) else {
			debug!(request_event_id = token, "response event carries no session id");
			return None;
		};
		Some(Self {
			token: CorrelationToken::from(token),
			backend_session_id,
		})
	}

	/// Parses an HTTP response body:
	/// `{ "handle": [{ "payload": [{ "sessionId": "<id>" }] }] }`.
	pub fn from_handle(token: CorrelationToken, body: &Value) -> Option<Self> {
		let handles = body.get("handle").and_then(Value::as_array)?;
		let backend_session_id = handles
			.iter()
			.find_map(|handle| first_session_id(handle.get("payload")))?;
		Some(Self {
			token,
			backend_session_id,
		})
	}
}

fn first_session_id(payload: Option<&Value>) -> Option<String> {
	payload?
		.as_array()?
		.first()?
		.get("sessionId")?
		.as_str()
		.filter(|s| !s.is_empty())
		.map(str::to_string)
}

/// A request handed to a [`ChannelDispatcher`].
#[derive(Debug)]
pub struct DispatchedRequest {
	pub token: CorrelationToken,
	pub request: EdgeRequest,
	pub responder: BackendResponder,
}

impl DispatchedRequest {
	pub fn session_created(&self, backend_session_id: impl Into<String>) -> bool {
		self.responder.session_created(&self.token, backend_session_id)
	}

	pub fn delivered(&self) -> bool {
		self.responder.delivered(&self.token)
	}

	pub fn failed(&self, reason: impl Into<String>) -> bool {
		self.responder.failed(&self.token, reason)
	}
}

/// Dispatcher that forwards every request to an in-process channel.
///
/// The host drains the receiver and relays requests to its own transport,
/// answering each one through [`DispatchedRequest::session_created`],
/// [`DispatchedRequest::delivered`] or [`DispatchedRequest::failed`]. Offline
/// sessions keep a record until its request is answered as delivered.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
	tx: mpsc::UnboundedSender<DispatchedRequest>,
}

impl ChannelDispatcher {
	pub fn new() -> (Self, mpsc::UnboundedReceiver<DispatchedRequest>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Self { tx }, rx)
	}
}

impl NetworkDispatch for ChannelDispatcher {
	fn send(
		&self,
		request: EdgeRequest,
		responder: BackendResponder,
	) -> Result<CorrelationToken, DispatchError> {
		let token = CorrelationToken::generate();
		trace!(token = %token, path = %request.path, "dispatching media request");
		self.tx
			.send(DispatchedRequest {
				token: token.clone(),
				request,
				responder,
			})
			.map_err(|_| DispatchError::ChannelClosed)?;
		Ok(token)
	}
}

/// Backend session id notification for one realtime session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCreated {
	pub session_id: SessionId,
	pub backend_session_id: String,
}

/// Receives session-created notifications.
pub trait SessionCreatedHook: Send + Sync {
	fn session_created(&self, event: SessionCreated);
}

impl SessionCreatedHook for mpsc::UnboundedSender<SessionCreated> {
	fn session_created(&self, event: SessionCreated) {
		if self.send(event).is_err() {
			trace!("session-created receiver dropped");
		}
	}
}

/// Hook that ignores notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

impl SessionCreatedHook for NoopHook {
	fn session_created(&self, _event: SessionCreated) {}
}
