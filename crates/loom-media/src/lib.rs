// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Media session engine for Loom playback telemetry.
//!
//! A [`MediaService`] owns every playback session and applies all session
//! mutations on a single actor task. Hosts feed it hits and shared state
//! through a [`MediaServiceHandle`]; the service delivers them through a
//! [`NetworkDispatch`] implementation and correlates backend session ids back
//! to the session that sent the session-start hit.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use loom_media::{ChannelDispatcher, MediaService};
//! use loom_media_core::{EventType, MediaHit, TrackerConfig};
//!
//! # async fn example() -> loom_media::Result<()> {
//! let (dispatcher, mut requests) = ChannelDispatcher::new();
//! let service = MediaService::builder()
//!     .dispatcher(Arc::new(dispatcher))
//!     .start()
//!     .await?;
//!
//! let session = service.create_session(TrackerConfig::realtime()).await?;
//! service.process_hit(&session, MediaHit::new(EventType::SessionStart, 0.0, 1_700_000_000_000)?)?;
//!
//! if let Some(request) = requests.recv().await {
//!     request.session_created("backend-session-id");
//! }
//! service.end_session(&session)?;
//! # Ok(())
//! # }
//! ```
//!
//! Sessions for downloaded content persist every hit to a
//! [`PersistentQueue`] and replay it once the session ends, including after a
//! restart.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod report;
pub mod service;
pub mod session;
pub mod store;

pub use config::{load_config, MediaConfig, MediaConfigLayer, RetryPolicy};
pub use dispatch::{
	BackendResponder, ChannelDispatcher, DispatchError, DispatchedRequest, EdgeSessionResponse,
	NetworkDispatch, NoopHook, SessionCreated, SessionCreatedHook,
};
pub use error::{MediaError, Result};
pub use http::HttpDispatcher;
pub use report::{build_edge_request, EdgeRequest};
pub use service::{MediaService, MediaServiceBuilder, MediaServiceHandle};
pub use session::{SessionKind, SessionLifecycle, SessionOutcome, SessionSnapshot};
pub use store::{
	MemoryPersistentQueue, PersistedRecord, PersistentQueue, SqlitePersistentQueue, StoreError,
};
