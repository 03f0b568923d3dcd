// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Opaque identifiers used by the media session engine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client-side identifier of a media session.
///
/// Generated ids are UUIDv7 strings, but the value is treated as opaque so
/// that ids read back from persistent storage are accepted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
	#[must_use]
	pub fn generate() -> Self {
		Self(Uuid::now_v7().to_string())
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_inner(self) -> String {
		self.0
	}
}

impl std::fmt::Display for SessionId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<String> for SessionId {
	fn from(value: String) -> Self {
		Self(value)
	}
}

impl From<&str> for SessionId {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

/// Ties one outbound request to its asynchronous backend response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(String);

impl CorrelationToken {
	#[must_use]
	pub fn generate() -> Self {
		Self(Uuid::new_v4().to_string())
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Display for CorrelationToken {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<String> for CorrelationToken {
	fn from(value: String) -> Self {
		Self(value)
	}
}

impl From<&str> for CorrelationToken {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_generated_session_ids_are_unique_uuids() {
		let a = SessionId::generate();
		let b = SessionId::generate();
		assert_ne!(a, b);
		assert!(Uuid::parse_str(a.as_str()).is_ok());
	}

	#[test]
	fn test_session_id_accepts_arbitrary_strings() {
		let id = SessionId::from("legacy-session-42");
		assert_eq!(id.to_string(), "legacy-session-42");
		assert_eq!(serde_json::to_string(&id).unwrap(), "\"legacy-session-42\"");
	}

	#[test]
	fn test_correlation_tokens_are_unique() {
		let a = CorrelationToken::generate();
		let b = CorrelationToken::generate();
		assert_ne!(a, b);
		assert_eq!(CorrelationToken::from(a.as_str()), a);
	}
}
