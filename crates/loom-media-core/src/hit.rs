// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Media hits: one immutable telemetry event and its wire encoding.
//!
//! The wire form nests timestamp and playhead under `playerTime`:
//!
//! ```json
//! {
//!   "eventType": "chapterStart",
//!   "params": { "media.chapter.index": 1 },
//!   "playerTime": { "ts": 1700000000000, "playhead": 12.5 }
//! }
//! ```
//!
//! Empty `params`, `customMetadata` and `qoeData` maps are omitted.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{MediaCoreError, Result};
use crate::event_type::EventType;

/// Timestamp and playhead of a hit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PlayerTime {
	/// Epoch milliseconds.
	pub ts: i64,
	/// Playhead position in seconds.
	pub playhead: f64,
}

impl PlayerTime {
	/// Reads a `playerTime` object leniently. Any numeric form is accepted;
	/// missing or non-numeric fields read as zero.
	pub fn from_value(value: &Value) -> Self {
		let ts = value
			.get("ts")
			.and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
			.unwrap_or(0);
		let playhead = value
			.get("playhead")
			.and_then(Value::as_f64)
			.unwrap_or(0.0);
		Self { ts, playhead }
	}
}

impl<'de> Deserialize<'de> for PlayerTime {
	fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let value = Value::deserialize(deserializer)?;
		Ok(PlayerTime::from_value(&value))
	}
}

/// One telemetry event emitted by a media tracker.
///
/// Hits are immutable once built. Use [`MediaHit::new`] followed by the
/// `with_*` builders, or decode one with [`MediaHit::from_value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireHit", into = "WireHit")]
pub struct MediaHit {
	event_type: EventType,
	params: Map<String, Value>,
	custom_metadata: BTreeMap<String, String>,
	qoe_data: Map<String, Value>,
	player_time: PlayerTime,
}

impl MediaHit {
	/// Creates a hit with no params, metadata or QoE data.
	pub fn new(event_type: EventType, playhead: f64, ts: i64) -> Result<Self> {
		if event_type.as_str().is_empty() {
			return Err(MediaCoreError::MissingEventType);
		}
		Ok(Self {
			event_type,
			params: Map::new(),
			custom_metadata: BTreeMap::new(),
			qoe_data: Map::new(),
			player_time: PlayerTime { ts, playhead },
		})
	}

	pub fn with_params(mut self, params: Map<String, Value>) -> Self {
		self.params = params;
		self
	}

	pub fn with_custom_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
		self.custom_metadata = metadata;
		self
	}

	pub fn with_qoe_data(mut self, qoe_data: Map<String, Value>) -> Self {
		self.qoe_data = qoe_data;
		self
	}

	pub fn event_type(&self) -> &EventType {
		&self.event_type
	}

	pub fn params(&self) -> &Map<String, Value> {
		&self.params
	}

	pub fn custom_metadata(&self) -> &BTreeMap<String, String> {
		&self.custom_metadata
	}

	pub fn qoe_data(&self) -> &Map<String, Value> {
		&self.qoe_data
	}

	pub fn player_time(&self) -> PlayerTime {
		self.player_time
	}

	pub fn playhead(&self) -> f64 {
		self.player_time.playhead
	}

	/// Epoch milliseconds at which the event happened.
	pub fn timestamp(&self) -> i64 {
		self.player_time.ts
	}

	/// The timestamp as a UTC date, or `None` if it is out of range.
	pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
		DateTime::from_timestamp_millis(self.player_time.ts)
	}

	/// Encodes the hit as a JSON object in wire form.
	pub fn to_map(&self) -> Map<String, Value> {
		let wire = WireHit::from(self.clone());
		let mut map = Map::new();
		map.insert(
			"eventType".to_string(),
			Value::String(wire.event_type.unwrap_or_default()),
		);
		if !wire.params.is_empty() {
			map.insert("params".to_string(), Value::Object(wire.params));
		}
		if !wire.custom_metadata.is_empty() {
			let metadata = wire
				.custom_metadata
				.into_iter()
				.map(|(k, v)| (k, Value::String(v)))
				.collect();
			map.insert("customMetadata".to_string(), Value::Object(metadata));
		}
		if !wire.qoe_data.is_empty() {
			map.insert("qoeData".to_string(), Value::Object(wire.qoe_data));
		}
		let mut player_time = Map::new();
		player_time.insert("ts".to_string(), Value::from(wire.player_time.ts));
		player_time.insert("playhead".to_string(), Value::from(wire.player_time.playhead));
		map.insert("playerTime".to_string(), Value::Object(player_time));
		map
	}

	pub fn to_value(&self) -> Value {
		Value::Object(self.to_map())
	}

	/// Decodes a hit from its wire form.
	pub fn from_value(value: &Value) -> Result<Self> {
		if !value.is_object() {
			return Err(MediaCoreError::InvalidHit(
				"expected a JSON object".to_string(),
			));
		}
		let wire: WireHit = serde_json::from_value(value.clone())
			.map_err(|e| MediaCoreError::InvalidHit(e.to_string()))?;
		MediaHit::try_from(wire)
	}

	pub fn from_json(json: &str) -> Result<Self> {
		let value: Value =
			serde_json::from_str(json).map_err(|e| MediaCoreError::InvalidHit(e.to_string()))?;
		Self::from_value(&value)
	}

	pub fn to_json(&self) -> Result<String> {
		Ok(serde_json::to_string(self)?)
	}
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireHit {
	#[serde(default)]
	event_type: Option<String>,
	#[serde(default, skip_serializing_if = "Map::is_empty")]
	params: Map<String, Value>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	custom_metadata: BTreeMap<String, String>,
	#[serde(default, skip_serializing_if = "Map::is_empty")]
	qoe_data: Map<String, Value>,
	#[serde(default)]
	player_time: PlayerTime,
}

impl TryFrom<WireHit> for MediaHit {
	type Error = MediaCoreError;

	fn try_from(wire: WireHit) -> Result<Self> {
		let event_type: EventType = wire
			.event_type
			.ok_or(MediaCoreError::MissingEventType)?
			.parse()?;
		Ok(Self {
			event_type,
			params: wire.params,
			custom_metadata: wire.custom_metadata,
			qoe_data: wire.qoe_data,
			player_time: wire.player_time,
		})
	}
}

impl From<MediaHit> for WireHit {
	fn from(hit: MediaHit) -> Self {
		Self {
			event_type: Some(hit.event_type.into()),
			params: hit.params,
			custom_metadata: hit.custom_metadata,
			qoe_data: hit.qoe_data,
			player_time: hit.player_time,
		}
	}
}
