// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-tracker configuration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key under which hosts flag downloaded content in a raw tracker config.
pub const DOWNLOADED_CONTENT_KEY: &str = "config.downloadedcontent";

/// Options supplied when a tracker creates a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
	/// Content was downloaded for offline playback. Hits are persisted and
	/// replayed instead of being sent live.
	#[serde(default)]
	pub downloaded_content: bool,
}

impl TrackerConfig {
	pub fn realtime() -> Self {
		Self {
			downloaded_content: false,
		}
	}

	pub fn downloaded() -> Self {
		Self {
			downloaded_content: true,
		}
	}

	/// Reads a raw tracker config map. A missing or non-boolean flag means
	/// the content is streamed.
	pub fn from_map(map: &Map<String, Value>) -> Self {
		let downloaded_content = map
			.get(DOWNLOADED_CONTENT_KEY)
			.and_then(Value::as_bool)
			.unwrap_or(false);
		Self { downloaded_content }
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_from_map_reads_downloaded_flag() {
		let map = json!({ "config.downloadedcontent": true });
		let config = TrackerConfig::from_map(map.as_object().unwrap());
		assert_eq!(config, TrackerConfig::downloaded());
	}

	#[test]
	fn test_from_map_defaults_to_realtime() {
		let config = TrackerConfig::from_map(&Map::new());
		assert_eq!(config, TrackerConfig::realtime());

		let map = json!({ "config.downloadedcontent": "yes" });
		let config = TrackerConfig::from_map(map.as_object().unwrap());
		assert!(!config.downloaded_content);
	}
}
