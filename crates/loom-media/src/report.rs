// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Builds collection backend requests from media hits.

use chrono::SecondsFormat;
use loom_media_core::{EventType, MediaHit, MediaState, SDK_VERSION};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;

const CHANNEL_PARAM: &str = "media.channel";
const PLAYER_NAME_PARAM: &str = "media.playerName";
const SDK_VERSION_PARAM: &str = "media.sdkVersion";
const LIBRARY_VERSION_PARAM: &str = "media.libraryVersion";
const AD_PLAYER_NAME_PARAM: &str = "media.ad.playerName";
/// Debug-only tracker session id. Never sent to the backend.
const DEBUG_SESSION_ID_PARAM: &str = "sessionid";

pub const SESSION_ID_QUERY: &str = "sessionid";

/// A request ready to hand to a [`crate::NetworkDispatch`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeRequest {
	pub event_type: EventType,
	/// Backend path, e.g. `/va/v1/sessionStart`.
	pub path: String,
	/// Backend session id the hit belongs to, if already known.
	pub backend_session_id: Option<String>,
	/// Request body: `{ "xdm": {...}, "data": {...} }`.
	pub payload: Value,
}

impl EdgeRequest {
	pub fn is_session_start(&self) -> bool {
		self.event_type.is_session_start()
	}

	/// Query parameters to append to `path`.
	pub fn query(&self) -> Vec<(&'static str, &str)> {
		self.backend_session_id
			.as_deref()
			.map(|id| vec![(SESSION_ID_QUERY, id)])
			.unwrap_or_default()
	}
}

/// Builds the request for `hit`, enriching it from the shared state.
///
/// Returns `None` when the hit cannot be sent: custom event kinds have no
/// backend path, and timestamps outside the representable range have no
/// XDM timestamp.
pub fn build_edge_request(
	state: &MediaState,
	hit: &MediaHit,
	backend_session_id: Option<&str>,
) -> Option<EdgeRequest> {
	let event_type = hit.event_type();
	if event_type.is_custom() {
		debug!(event_type = %event_type, "no backend path for custom event type");
		return None;
	}

	let Some(timestamp) = hit.timestamp_utc() else {
		debug!(ts = hit.timestamp(), "hit timestamp out of range");
		return None;
	};

	let mut data = enrich(state, hit).to_map();
	data.remove("eventType");

	let payload = json!({
		"xdm": {
			"eventType": format!("media.{event_type}"),
			"timestamp": timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
		},
		"data": Value::Object(data),
	});

	Some(EdgeRequest {
		event_type: event_type.clone(),
		path: format!("/va/v1/{event_type}"),
		backend_session_id: backend_session_id.map(str::to_string),
		payload,
	})
}

fn enrich(state: &MediaState, hit: &MediaHit) -> MediaHit {
	match hit.event_type() {
		EventType::SessionStart => {
			let mut params = hit.params().clone();
			if !params.contains_key(CHANNEL_PARAM) {
				if let Some(channel) = &state.channel {
					params.insert(CHANNEL_PARAM.to_string(), Value::from(channel.as_str()));
				}
			}
			if let Some(player_name) = &state.player_name {
				params.insert(PLAYER_NAME_PARAM.to_string(), Value::from(player_name.as_str()));
			}
			if let Some(app_version) = state.app_version.as_deref().filter(|v| !v.is_empty()) {
				params.insert(SDK_VERSION_PARAM.to_string(), Value::from(app_version));
			}
			params.insert(LIBRARY_VERSION_PARAM.to_string(), Value::from(SDK_VERSION));
			params.remove(DEBUG_SESSION_ID_PARAM);
			hit.clone().with_params(params)
		}
		EventType::AdStart => {
			let mut params: Map<String, Value> = hit.params().clone();
			if let Some(player_name) = &state.player_name {
				params.insert(AD_PLAYER_NAME_PARAM.to_string(), Value::from(player_name.as_str()));
			}
			hit.clone().with_params(params)
		}
		_ => hit.clone(),
	}
}
