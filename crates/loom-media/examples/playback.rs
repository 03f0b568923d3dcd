// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Simulated playback against an in-process backend.
//!
//! ```sh
//! RUST_LOG=loom_media=trace cargo run -p loom-media --example playback
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use loom_media::{load_config, ChannelDispatcher, MediaService, SessionCreated};
use loom_media_core::{Dependency, EventType, MediaHit, TrackerConfig};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> loom_media::Result<()> {
	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| "info,loom_media=debug".into()),
		)
		.with(tracing_subscriber::fmt::layer())
		.init();

	let config = load_config(None)?;
	let (dispatcher, mut requests) = ChannelDispatcher::new();
	let (hook, mut created) = mpsc::unbounded_channel::<SessionCreated>();

	let service = MediaService::builder()
		.config(config)
		.dispatcher(Arc::new(dispatcher))
		.hook(Arc::new(hook))
		.start()
		.await?;

	// Stand-in backend: assigns a session id to every session-start request
	// and accepts everything else.
	let backend = tokio::spawn(async move {
		let mut assigned = 0u32;
		while let Some(dispatched) = requests.recv().await {
			tracing::info!(
				path = %dispatched.request.path,
				backend_session_id = ?dispatched.request.backend_session_id,
				"backend received request"
			);
			if dispatched.request.is_session_start() {
				assigned += 1;
				dispatched.session_created(format!("backend-{assigned}"));
			} else {
				dispatched.delivered();
			}
		}
	});

	let mut configuration = Map::new();
	configuration.insert("global.privacy".to_string(), json!("optedin"));
	configuration.insert("media.channel".to_string(), json!("demo"));
	configuration.insert("media.playerName".to_string(), json!("example-player"));
	let source: HashMap<Dependency, Map<String, Value>> =
		HashMap::from([(Dependency::Configuration, configuration)]);
	service.update_media_state(&source)?;

	let live = service.create_session(TrackerConfig::realtime()).await?;
	let offline = service.create_session(TrackerConfig::downloaded()).await?;

	let timeline = [
		(EventType::SessionStart, 0.0),
		(EventType::Play, 0.0),
		(EventType::Ping, 10.0),
		(EventType::PauseStart, 12.5),
		(EventType::Play, 14.0),
		(EventType::SessionComplete, 30.0),
	];
	let base_ts = chrono::Utc::now().timestamp_millis();
	for (event_type, playhead) in timeline {
		let ts = base_ts + (playhead * 1000.0) as i64;
		service.process_hit(&live, MediaHit::new(event_type.clone(), playhead, ts)?)?;
		service.process_hit(&offline, MediaHit::new(event_type, playhead, ts)?)?;
	}

	if let Some(event) = created.recv().await {
		tracing::info!(
			session_id = %event.session_id,
			backend_session_id = %event.backend_session_id,
			"session created"
		);
	}

	let live_outcome = service.end_session_and_wait(&live).await?;
	let offline_outcome = service.end_session_and_wait(&offline).await?;
	tracing::info!(?live_outcome, ?offline_outcome, "playback finished");

	service.shutdown().await?;
	drop(service);
	let _ = backend.await;
	Ok(())
}
