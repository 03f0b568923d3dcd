// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Loom media playback telemetry system.
//!
//! This crate holds the pure data model shared by the media session engine
//! (`loom-media`) and by hosts that feed it:
//!
//! - [`MediaHit`]: one immutable telemetry event with its wire encoding
//! - [`EventType`]: the kinds of playback events a tracker emits
//! - [`SessionId`] and [`CorrelationToken`]: opaque identifiers
//! - [`MediaState`]: the shared environment state rebuilt from dependency snapshots
//! - [`TrackerConfig`]: per-tracker options that pick the delivery strategy
//!
//! Nothing in here performs I/O or depends on an async runtime.

pub mod error;
pub mod event_type;
pub mod hit;
pub mod ids;
pub mod state;
pub mod tracker;

pub use error::{MediaCoreError, Result};
pub use event_type::EventType;
pub use hit::{MediaHit, PlayerTime};
pub use ids::{CorrelationToken, SessionId};
pub use state::{
	Dependency, MediaState, PrivacyStatus, SharedStateSnapshot, SharedStateSource, SDK_VERSION,
};
pub use tracker::TrackerConfig;
