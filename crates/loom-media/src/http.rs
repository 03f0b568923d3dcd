// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP dispatcher for the collection backend.

use std::time::Duration;

use loom_media_core::CorrelationToken;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::dispatch::{BackendResponder, DispatchError, EdgeSessionResponse, NetworkDispatch};
use crate::report::EdgeRequest;

/// Header carrying the correlation token of a request.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Posts each request to `{base_url}{path}` on a background task.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
	client: Client,
	base_url: String,
}

impl HttpDispatcher {
	pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, DispatchError> {
		let client = Client::builder().timeout(request_timeout).build()?;
		Ok(Self::with_client(client, base_url))
	}

	pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
		let base_url = base_url.into().trim_end_matches('/').to_string();
		Self { client, base_url }
	}

	pub fn base_url(&self) -> &str {
		&self.base_url
	}
}

impl NetworkDispatch for HttpDispatcher {
	fn send(
		&self,
		request: EdgeRequest,
		responder: BackendResponder,
	) -> Result<CorrelationToken, DispatchError> {
		let runtime =
			tokio::runtime::Handle::try_current().map_err(|_| DispatchError::NoRuntime)?;
		let token = CorrelationToken::generate();
		let url = format!("{}{}", self.base_url, request.path);
		let client = self.client.clone();
		let task_token = token.clone();

		runtime.spawn(async move {
			let result = post(&client, &url, &task_token, &request).await;
			if !request.is_session_start() {
				match result {
					Ok(_) => {
						responder.delivered(&task_token);
					}
					Err(e) => {
						warn!(token = %task_token, path = %request.path, error = %e, "media request failed");
						responder.failed(&task_token, e.to_string());
					}
				}
				return;
			}

			let body = result.and_then(|bytes| {
				serde_json::from_slice::<Value>(&bytes)
					.map_err(|e| DispatchError::Rejected(format!("invalid response body: {e}")))
			});
			match body {
				Ok(body) => match EdgeSessionResponse::from_handle(task_token.clone(), &body) {
					Some(response) => {
						responder.session_created(&response.token, response.backend_session_id);
					}
					None => {
						responder.failed(&task_token, "response carried no session id");
					}
				},
				Err(e) => {
					warn!(token = %task_token, error = %e, "session start request failed");
					responder.failed(&task_token, e.to_string());
				}
			}
		});

		Ok(token)
	}
}

async fn post(
	client: &Client,
	url: &str,
	token: &CorrelationToken,
	request: &EdgeRequest,
) -> Result<Vec<u8>, DispatchError> {
	debug!(url = %url, token = %token, "posting media request");
	let response = client
		.post(url)
		.query(&request.query())
		.header(REQUEST_ID_HEADER, token.as_str())
		.json(&request.payload)
		.send()
		.await?;

	let status = response.status();
	if !status.is_success() {
		let message = response.text().await.unwrap_or_default();
		return Err(DispatchError::Server {
			status: status.as_u16(),
			message,
		});
	}

	Ok(response.bytes().await?.to_vec())
}

#[cfg(test)]
mod tests {
	use super::*;
	use loom_media_core::{EventType, MediaHit, MediaState};
	use serde_json::json;
	use tokio::sync::mpsc;
	use wiremock::matchers::{header_exists, method, path, query_param};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	use crate::report::build_edge_request;
	use crate::service::Command;

	fn request(event_type: EventType, backend_session_id: Option<&str>) -> EdgeRequest {
		let hit = MediaHit::new(event_type, 0.0, 1_000).unwrap();
		build_edge_request(&MediaState::default(), &hit, backend_session_id).unwrap()
	}

	#[tokio::test]
	async fn test_session_start_reports_backend_id() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/va/v1/sessionStart"))
			.and(header_exists(REQUEST_ID_HEADER))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"handle": [{ "payload": [{ "sessionId": "B1" }] }]
			})))
			.expect(1)
			.mount(&server)
			.await;

		let (tx, mut rx) = mpsc::unbounded_channel();
		let dispatcher = HttpDispatcher::new(server.uri(), Duration::from_secs(5)).unwrap();
		let token = dispatcher
			.send(
				request(EventType::SessionStart, None),
				BackendResponder::new(tx.downgrade()),
			)
			.unwrap();

		match rx.recv().await.unwrap() {
			Command::BackendSession {
				token: received,
				backend_session_id,
			} => {
				assert_eq!(received, token);
				assert_eq!(backend_session_id, "B1");
			}
			_ => panic!("expected backend session command"),
		}
	}

	#[tokio::test]
	async fn test_server_error_reports_failure() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(503))
			.mount(&server)
			.await;

		let (tx, mut rx) = mpsc::unbounded_channel();
		let dispatcher = HttpDispatcher::new(server.uri(), Duration::from_secs(5)).unwrap();
		let token = dispatcher
			.send(
				request(EventType::SessionStart, None),
				BackendResponder::new(tx.downgrade()),
			)
			.unwrap();

		match rx.recv().await.unwrap() {
			Command::BackendFailure { token: received, .. } => assert_eq!(received, token),
			_ => panic!("expected backend failure command"),
		}
	}

	#[tokio::test]
	async fn test_other_hits_report_delivery() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/va/v1/play"))
			.and(query_param("sessionid", "B1"))
			.respond_with(ResponseTemplate::new(204))
			.expect(1)
			.mount(&server)
			.await;

		let (tx, mut rx) = mpsc::unbounded_channel();
		let dispatcher = HttpDispatcher::new(format!("{}/", server.uri()), Duration::from_secs(5)).unwrap();
		let token = dispatcher
			.send(
				request(EventType::Play, Some("B1")),
				BackendResponder::new(tx.downgrade()),
			)
			.unwrap();

		match rx.recv().await.unwrap() {
			Command::BackendDelivered { token: received } => assert_eq!(received, token),
			_ => panic!("expected delivery command"),
		}
		server.verify().await;
	}

	#[tokio::test]
	async fn test_other_hits_report_server_errors() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/va/v1/play"))
			.respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
			.expect(1)
			.mount(&server)
			.await;

		let (tx, mut rx) = mpsc::unbounded_channel();
		let dispatcher = HttpDispatcher::new(server.uri(), Duration::from_secs(5)).unwrap();
		let token = dispatcher
			.send(
				request(EventType::Play, Some("B1")),
				BackendResponder::new(tx.downgrade()),
			)
			.unwrap();

		match rx.recv().await.unwrap() {
			Command::BackendFailure {
				token: received,
				reason,
			} => {
				assert_eq!(received, token);
				assert!(reason.contains("503"));
			}
			_ => panic!("expected backend failure command"),
		}
	}

	#[test]
	fn test_send_outside_runtime_fails() {
		let (tx, _rx) = mpsc::unbounded_channel();
		let dispatcher = HttpDispatcher::new("http://localhost:1", Duration::from_secs(1)).unwrap();
		let result = dispatcher.send(
			request(EventType::SessionStart, None),
			BackendResponder::new(tx.downgrade()),
		);
		assert!(matches!(result, Err(DispatchError::NoRuntime)));
	}
}
