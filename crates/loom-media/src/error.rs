// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the media session engine.

use loom_media_core::MediaCoreError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::dispatch::DispatchError;
use crate::store::StoreError;

/// Errors surfaced by the media service handle.
///
/// Failures inside a session never reach the caller; they are logged and the
/// affected hit is dropped or retried.
#[derive(Debug, Error)]
pub enum MediaError {
	/// The service actor has stopped.
	#[error("media service has stopped")]
	ServiceStopped,

	/// Session creation was refused because the user opted out.
	#[error("privacy status is opted out")]
	PrivacyOptedOut,

	/// No network dispatcher was configured and none could be built.
	#[error("no network dispatcher configured")]
	MissingDispatcher,

	/// The service was started outside a tokio runtime.
	#[error("no tokio runtime available")]
	NoRuntime,

	/// Persistent queue failure.
	#[error("store error: {0}")]
	Store(#[from] StoreError),

	/// Network dispatch failure.
	#[error("dispatch error: {0}")]
	Dispatch(#[from] DispatchError),

	/// Configuration failure.
	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),

	/// Invalid media data.
	#[error(transparent)]
	Core(#[from] MediaCoreError),
}

/// Result type alias for media service operations.
pub type Result<T> = std::result::Result<T, MediaError>;
