// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the media core types.

use thiserror::Error;

/// Result type alias for media core operations.
pub type Result<T> = std::result::Result<T, MediaCoreError>;

/// Errors raised while building or decoding media types.
#[derive(Debug, Error)]
pub enum MediaCoreError {
	/// The hit has no event type, or the event type is empty.
	#[error("media hit is missing an event type")]
	MissingEventType,

	/// The hit payload could not be decoded.
	#[error("invalid media hit: {0}")]
	InvalidHit(String),

	/// Unknown privacy status string.
	#[error("invalid privacy status: {0}")]
	InvalidPrivacyStatus(String),

	/// JSON encoding or decoding failed.
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}
