// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Media event kinds.

use serde::{Deserialize, Serialize};

use crate::error::MediaCoreError;

/// Kind of playback event carried by a [`crate::MediaHit`].
///
/// Unknown kinds are preserved as [`EventType::Custom`] so that a hit read
/// back from storage round-trips unchanged, even if the engine cannot build a
/// network request for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EventType {
	SessionStart,
	SessionComplete,
	SessionEnd,
	Play,
	PauseStart,
	BufferStart,
	Ping,
	Error,
	BitrateChange,
	StatesUpdate,
	ChapterStart,
	ChapterComplete,
	ChapterSkip,
	AdBreakStart,
	AdBreakComplete,
	AdStart,
	AdComplete,
	AdSkip,
	/// Any other non-empty event kind.
	Custom(String),
}

impl EventType {
	/// All event kinds the collection backend understands.
	pub const KNOWN: [EventType; 18] = [
		EventType::SessionStart,
		EventType::SessionComplete,
		EventType::SessionEnd,
		EventType::Play,
		EventType::PauseStart,
		EventType::BufferStart,
		EventType::Ping,
		EventType::Error,
		EventType::BitrateChange,
		EventType::StatesUpdate,
		EventType::ChapterStart,
		EventType::ChapterComplete,
		EventType::ChapterSkip,
		EventType::AdBreakStart,
		EventType::AdBreakComplete,
		EventType::AdStart,
		EventType::AdComplete,
		EventType::AdSkip,
	];

	/// Wire name of the event kind.
	pub fn as_str(&self) -> &str {
		match self {
			EventType::SessionStart => "sessionStart",
			EventType::SessionComplete => "sessionComplete",
			EventType::SessionEnd => "sessionEnd",
			EventType::Play => "play",
			EventType::PauseStart => "pauseStart",
			EventType::BufferStart => "bufferStart",
			EventType::Ping => "ping",
			EventType::Error => "error",
			EventType::BitrateChange => "bitrateChange",
			EventType::StatesUpdate => "statesUpdate",
			EventType::ChapterStart => "chapterStart",
			EventType::ChapterComplete => "chapterComplete",
			EventType::ChapterSkip => "chapterSkip",
			EventType::AdBreakStart => "adBreakStart",
			EventType::AdBreakComplete => "adBreakComplete",
			EventType::AdStart => "adStart",
			EventType::AdComplete => "adComplete",
			EventType::AdSkip => "adSkip",
			EventType::Custom(name) => name,
		}
	}

	pub fn is_session_start(&self) -> bool {
		matches!(self, EventType::SessionStart)
	}

	pub fn is_custom(&self) -> bool {
		matches!(self, EventType::Custom(_))
	}
}

impl std::fmt::Display for EventType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for EventType {
	type Err = MediaCoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.is_empty() {
			return Err(MediaCoreError::MissingEventType);
		}
		Ok(EventType::KNOWN
			.into_iter()
			.find(|kind| kind.as_str() == s)
			.unwrap_or_else(|| EventType::Custom(s.to_string())))
	}
}

impl TryFrom<String> for EventType {
	type Error = MediaCoreError;

	fn try_from(value: String) -> Result<Self, MediaCoreError> {
		value.parse()
	}
}

impl From<EventType> for String {
	fn from(value: EventType) -> Self {
		value.as_str().to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn test_known_kinds_parse_to_variants() {
		for kind in EventType::KNOWN {
			let parsed: EventType = kind.as_str().parse().unwrap();
			assert_eq!(parsed, kind);
			assert!(!parsed.is_custom());
		}
	}

	#[test]
	fn test_unknown_kind_is_custom() {
		let parsed: EventType = "media.downloaded".parse().unwrap();
		assert_eq!(parsed, EventType::Custom("media.downloaded".to_string()));
		assert_eq!(parsed.to_string(), "media.downloaded");
	}

	#[test]
	fn test_empty_kind_is_rejected() {
		let result = "".parse::<EventType>();
		assert!(matches!(result, Err(MediaCoreError::MissingEventType)));
	}

	#[test]
	fn test_try_from_string() {
		assert_eq!(EventType::try_from("error".to_string()).unwrap(), EventType::Error);
		assert_eq!(String::from(EventType::Error), "error");
		assert!(matches!(
			EventType::try_from(String::new()),
			Err(MediaCoreError::MissingEventType)
		));
	}

	#[test]
	fn test_serializes_as_plain_string() {
		let json = serde_json::to_string(&EventType::ChapterStart).unwrap();
		assert_eq!(json, "\"chapterStart\"");

		let parsed: EventType = serde_json::from_str("\"adBreakComplete\"").unwrap();
		assert_eq!(parsed, EventType::AdBreakComplete);
	}

	#[test]
	fn test_only_session_start_is_session_start() {
		assert!(EventType::SessionStart.is_session_start());
		assert!(!EventType::SessionComplete.is_session_start());
		assert!(!EventType::Custom("sessionstart".into()).is_session_start());
	}

	proptest! {
		#[test]
		fn custom_names_survive_display(name in "[a-z][a-zA-Z.]{0,20}") {
			let parsed: EventType = name.parse().unwrap();
			prop_assert_eq!(parsed.to_string(), name);
		}
	}
}
