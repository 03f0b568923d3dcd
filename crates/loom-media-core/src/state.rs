// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared environment state.
//!
//! [`MediaState`] aggregates privacy, configuration and identity values that
//! every session reads when building requests. It is rebuilt from a
//! [`SharedStateSnapshot`] whenever a dependency reports a change. A missing
//! dependency leaves its part of the state untouched.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MediaCoreError;

/// Version reported to the backend as the media library version.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

const PRIVACY_KEY: &str = "global.privacy";
const CHANNEL_KEY: &str = "media.channel";
const PLAYER_NAME_KEY: &str = "media.playerName";
const APP_VERSION_KEY: &str = "media.appVersion";
const ECID_KEY: &str = "mid";
const ANALYTICS_AID_KEY: &str = "aid";
const ANALYTICS_VID_KEY: &str = "vid";
const ASSURANCE_INTEGRATION_KEY: &str = "integrationid";

/// Privacy consent of the current user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrivacyStatus {
	#[serde(rename = "optedin")]
	OptedIn,
	#[serde(rename = "optedout")]
	OptedOut,
	#[default]
	#[serde(rename = "optunknown")]
	Unknown,
}

impl std::fmt::Display for PrivacyStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			PrivacyStatus::OptedIn => write!(f, "optedin"),
			PrivacyStatus::OptedOut => write!(f, "optedout"),
			PrivacyStatus::Unknown => write!(f, "optunknown"),
		}
	}
}

impl std::str::FromStr for PrivacyStatus {
	type Err = MediaCoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"optedin" => Ok(PrivacyStatus::OptedIn),
			"optedout" => Ok(PrivacyStatus::OptedOut),
			"optunknown" => Ok(PrivacyStatus::Unknown),
			_ => Err(MediaCoreError::InvalidPrivacyStatus(s.to_string())),
		}
	}
}

/// External state providers the engine depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dependency {
	Configuration,
	Identity,
	Analytics,
	Assurance,
}

impl Dependency {
	pub const ALL: [Dependency; 4] = [
		Dependency::Configuration,
		Dependency::Identity,
		Dependency::Analytics,
		Dependency::Assurance,
	];
}

impl std::fmt::Display for Dependency {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Dependency::Configuration => write!(f, "configuration"),
			Dependency::Identity => write!(f, "identity"),
			Dependency::Analytics => write!(f, "analytics"),
			Dependency::Assurance => write!(f, "assurance"),
		}
	}
}

/// Source of dependency state, queried once per dependency on every change.
pub trait SharedStateSource {
	/// Returns the dependency's current state, or `None` if it has none yet.
	fn fetch(&self, dependency: Dependency) -> Option<Map<String, Value>>;
}

impl SharedStateSource for HashMap<Dependency, Map<String, Value>> {
	fn fetch(&self, dependency: Dependency) -> Option<Map<String, Value>> {
		self.get(&dependency).cloned()
	}
}

/// Point-in-time copy of every dependency's state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedStateSnapshot {
	states: HashMap<Dependency, Map<String, Value>>,
}

impl SharedStateSnapshot {
	pub fn new() -> Self {
		Self::default()
	}

	/// Fetches every dependency from `source`.
	pub fn collect(source: &dyn SharedStateSource) -> Self {
		let states = Dependency::ALL
			.into_iter()
			.filter_map(|dependency| source.fetch(dependency).map(|state| (dependency, state)))
			.collect();
		Self { states }
	}

	pub fn with(mut self, dependency: Dependency, state: Map<String, Value>) -> Self {
		self.states.insert(dependency, state);
		self
	}

	pub fn get(&self, dependency: Dependency) -> Option<&Map<String, Value>> {
		self.states.get(&dependency)
	}

	pub fn is_empty(&self) -> bool {
		self.states.is_empty()
	}
}

/// Shared environment state read by every media session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaState {
	pub privacy_status: PrivacyStatus,
	pub channel: Option<String>,
	pub player_name: Option<String>,
	pub app_version: Option<String>,
	pub ecid: Option<String>,
	pub analytics_aid: Option<String>,
	pub analytics_vid: Option<String>,
	pub assurance_integration_id: Option<String>,
}

impl MediaState {
	pub fn new() -> Self {
		Self::default()
	}

	/// Applies a snapshot. Only keys present in the snapshot are changed; an
	/// unrecognized privacy value reads as [`PrivacyStatus::Unknown`].
	pub fn update(&mut self, snapshot: &SharedStateSnapshot) {
		if let Some(config) = snapshot.get(Dependency::Configuration) {
			if let Some(privacy) = string_value(config, PRIVACY_KEY) {
				self.privacy_status = privacy.parse().unwrap_or_default();
			}
			if let Some(channel) = string_value(config, CHANNEL_KEY) {
				self.channel = Some(channel);
			}
			if let Some(player_name) = string_value(config, PLAYER_NAME_KEY) {
				self.player_name = Some(player_name);
			}
			if let Some(app_version) = string_value(config, APP_VERSION_KEY) {
				self.app_version = Some(app_version);
			}
		}

		if let Some(identity) = snapshot.get(Dependency::Identity) {
			if let Some(ecid) = string_value(identity, ECID_KEY) {
				self.ecid = Some(ecid);
			}
		}

		if let Some(analytics) = snapshot.get(Dependency::Analytics) {
			if let Some(aid) = string_value(analytics, ANALYTICS_AID_KEY) {
				self.analytics_aid = Some(aid);
			}
			if let Some(vid) = string_value(analytics, ANALYTICS_VID_KEY) {
				self.analytics_vid = Some(vid);
			}
		}

		if let Some(assurance) = snapshot.get(Dependency::Assurance) {
			if let Some(integration_id) = string_value(assurance, ASSURANCE_INTEGRATION_KEY) {
				self.assurance_integration_id = Some(integration_id);
			}
		}
	}

	pub fn is_opted_out(&self) -> bool {
		self.privacy_status == PrivacyStatus::OptedOut
	}

	pub fn sdk_version(&self) -> &'static str {
		SDK_VERSION
	}
}

fn string_value(map: &Map<String, Value>, key: &str) -> Option<String> {
	map.get(key).and_then(Value::as_str).map(str::to_string)
}
