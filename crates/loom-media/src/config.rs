// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered configuration for the media service.
//!
//! Precedence, lowest to highest: built-in defaults, a TOML file, then
//! `LOOM_MEDIA_*` environment variables.
//!
//! ```toml
//! retry_max_attempts = 3
//! retry_delay_secs = 60
//! correlation_timeout_secs = 60
//! database_url = "sqlite:/var/lib/loom/media.db"
//! edge_base_url = "https://edge.example.com"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Attempts allowed for a session-start hit before it is given up on.
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
/// Delay between two delivery attempts.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 60;
/// How long a session-start request may wait for its backend session id.
pub const DEFAULT_CORRELATION_TIMEOUT_SECS: u64 = 60;
/// Gap between consecutive hits that triggers a warning.
pub const DEFAULT_HIT_GAP_WARNING_SECS: u64 = 60;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	/// I/O error reading the config file.
	#[error("failed to read {path}: {source}")]
	FileRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	/// TOML parsing error.
	#[error("TOML parse error in {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	/// Invalid value.
	#[error("invalid value for {key}: {message}")]
	InvalidValue { key: String, message: String },
}

/// Retry policy for failed deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Total attempts, including the first one.
	pub max_attempts: u32,
	pub delay: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
			delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
		}
	}
}

/// Resolved media service configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaConfig {
	pub retry: RetryPolicy,
	pub correlation_timeout: Duration,
	pub hit_gap_warning: Duration,
	/// SQLite database for offline hits. In-memory storage is used when unset.
	pub database_url: Option<String>,
	/// Collection backend base URL for the HTTP dispatcher.
	pub edge_base_url: Option<String>,
	pub request_timeout: Duration,
}

impl Default for MediaConfig {
	fn default() -> Self {
		Self {
			retry: RetryPolicy::default(),
			correlation_timeout: Duration::from_secs(DEFAULT_CORRELATION_TIMEOUT_SECS),
			hit_gap_warning: Duration::from_secs(DEFAULT_HIT_GAP_WARNING_SECS),
			database_url: None,
			edge_base_url: None,
			request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
		}
	}
}

/// One configuration layer. Unset fields fall through to lower layers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MediaConfigLayer {
	pub retry_max_attempts: Option<u32>,
	pub retry_delay_secs: Option<u64>,
	pub correlation_timeout_secs: Option<u64>,
	pub hit_gap_warning_secs: Option<u64>,
	pub database_url: Option<String>,
	pub edge_base_url: Option<String>,
	pub request_timeout_secs: Option<u64>,
}

impl MediaConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.retry_max_attempts.is_some() {
			self.retry_max_attempts = other.retry_max_attempts;
		}
		if other.retry_delay_secs.is_some() {
			self.retry_delay_secs = other.retry_delay_secs;
		}
		if other.correlation_timeout_secs.is_some() {
			self.correlation_timeout_secs = other.correlation_timeout_secs;
		}
		if other.hit_gap_warning_secs.is_some() {
			self.hit_gap_warning_secs = other.hit_gap_warning_secs;
		}
		if other.database_url.is_some() {
			self.database_url = other.database_url;
		}
		if other.edge_base_url.is_some() {
			self.edge_base_url = other.edge_base_url;
		}
		if other.request_timeout_secs.is_some() {
			self.request_timeout_secs = other.request_timeout_secs;
		}
	}

	pub fn finalize(self) -> Result<MediaConfig, ConfigError> {
		let max_attempts = self
			.retry_max_attempts
			.unwrap_or(DEFAULT_RETRY_MAX_ATTEMPTS);
		if max_attempts == 0 {
			return Err(ConfigError::InvalidValue {
				key: "retry_max_attempts".to_string(),
				message: "must be at least 1".to_string(),
			});
		}

		Ok(MediaConfig {
			retry: RetryPolicy {
				max_attempts,
				delay: Duration::from_secs(self.retry_delay_secs.unwrap_or(DEFAULT_RETRY_DELAY_SECS)),
			},
			correlation_timeout: Duration::from_secs(
				self.correlation_timeout_secs
					.unwrap_or(DEFAULT_CORRELATION_TIMEOUT_SECS),
			),
			hit_gap_warning: Duration::from_secs(
				self.hit_gap_warning_secs
					.unwrap_or(DEFAULT_HIT_GAP_WARNING_SECS),
			),
			database_url: self.database_url,
			edge_base_url: self.edge_base_url,
			request_timeout: Duration::from_secs(
				self.request_timeout_secs
					.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
			),
		})
	}
}

/// Reads a layer from a TOML file. A missing file yields an empty layer.
pub fn load_layer_from_file(path: &Path) -> Result<MediaConfigLayer, ConfigError> {
	if !path.exists() {
		debug!(path = %path.display(), "config file not found, skipping");
		return Ok(MediaConfigLayer::default());
	}

	debug!(path = %path.display(), "loading config file");
	let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
		path: path.to_path_buf(),
		source: e,
	})?;

	let layer: MediaConfigLayer = toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
		path: path.to_path_buf(),
		source: e,
	})?;

	trace!("parsed media config layer from TOML");
	Ok(layer)
}

/// Reads a layer from `LOOM_MEDIA_*` environment variables.
pub fn load_layer_from_env() -> Result<MediaConfigLayer, ConfigError> {
	layer_from_lookup(|name| std::env::var(name).ok())
}

fn layer_from_lookup<F>(lookup: F) -> Result<MediaConfigLayer, ConfigError>
where
	F: Fn(&str) -> Option<String>,
{
	let var = |name: &str| lookup(name).filter(|s| !s.is_empty());
	let number = |name: &str| -> Result<Option<u64>, ConfigError> {
		match var(name) {
			Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
				key: name.to_string(),
				message: format!("invalid u64 value '{v}'"),
			}),
			None => Ok(None),
		}
	};

	let retry_max_attempts = match var("LOOM_MEDIA_RETRY_MAX_ATTEMPTS") {
		Some(v) => Some(v.parse::<u32>().map_err(|_| ConfigError::InvalidValue {
			key: "LOOM_MEDIA_RETRY_MAX_ATTEMPTS".to_string(),
			message: format!("invalid u32 value '{v}'"),
		})?),
		None => None,
	};

	Ok(MediaConfigLayer {
		retry_max_attempts,
		retry_delay_secs: number("LOOM_MEDIA_RETRY_DELAY_SECS")?,
		correlation_timeout_secs: number("LOOM_MEDIA_CORRELATION_TIMEOUT_SECS")?,
		hit_gap_warning_secs: number("LOOM_MEDIA_HIT_GAP_WARNING_SECS")?,
		database_url: var("LOOM_MEDIA_DATABASE_URL"),
		edge_base_url: var("LOOM_MEDIA_EDGE_BASE_URL"),
		request_timeout_secs: number("LOOM_MEDIA_REQUEST_TIMEOUT_SECS")?,
	})
}

/// Loads configuration from defaults, an optional TOML file and the
/// environment.
pub fn load_config(path: Option<&Path>) -> Result<MediaConfig, ConfigError> {
	let mut merged = MediaConfigLayer::default();
	if let Some(path) = path {
		merged.merge(load_layer_from_file(path)?);
	}
	merged.merge(load_layer_from_env()?);
	merged.finalize()
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let vars: HashMap<String, String> = vars
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect();
		move |name| vars.get(name).cloned()
	}

	#[test]
	fn test_default_values() {
		let config = MediaConfig::default();
		assert_eq!(config.retry.max_attempts, 3);
		assert_eq!(config.retry.delay, Duration::from_secs(60));
		assert_eq!(config.correlation_timeout, Duration::from_secs(60));
		assert_eq!(config.hit_gap_warning, Duration::from_secs(60));
		assert!(config.database_url.is_none());
	}

	#[test]
	fn test_layer_finalize_defaults() {
		let config = MediaConfigLayer::default().finalize().unwrap();
		assert_eq!(config, MediaConfig::default());
	}

	#[test]
	fn test_zero_attempts_is_invalid() {
		let layer = MediaConfigLayer {
			retry_max_attempts: Some(0),
			..Default::default()
		};
		assert!(matches!(
			layer.finalize(),
			Err(ConfigError::InvalidValue { key, .. }) if key == "retry_max_attempts"
		));
	}

	#[test]
	fn test_merge_overwrites() {
		let mut base = MediaConfigLayer {
			retry_delay_secs: Some(60),
			database_url: Some("sqlite:old.db".to_string()),
			..Default::default()
		};
		base.merge(MediaConfigLayer {
			retry_delay_secs: Some(5),
			database_url: None,
			..Default::default()
		});
		assert_eq!(base.retry_delay_secs, Some(5));
		assert_eq!(base.database_url.as_deref(), Some("sqlite:old.db"));
	}

	#[test]
	fn test_env_layer_parses_values() {
		let layer = layer_from_lookup(lookup(&[
			("LOOM_MEDIA_RETRY_MAX_ATTEMPTS", "5"),
			("LOOM_MEDIA_RETRY_DELAY_SECS", "10"),
			("LOOM_MEDIA_EDGE_BASE_URL", "https://edge.example.com"),
			("LOOM_MEDIA_DATABASE_URL", ""),
		]))
		.unwrap();

		assert_eq!(layer.retry_max_attempts, Some(5));
		assert_eq!(layer.retry_delay_secs, Some(10));
		assert_eq!(layer.edge_base_url.as_deref(), Some("https://edge.example.com"));
		assert!(layer.database_url.is_none());
	}

	#[test]
	fn test_env_layer_rejects_bad_numbers() {
		let result = layer_from_lookup(lookup(&[("LOOM_MEDIA_CORRELATION_TIMEOUT_SECS", "soon")]));
		assert!(matches!(
			result,
			Err(ConfigError::InvalidValue { key, .. }) if key == "LOOM_MEDIA_CORRELATION_TIMEOUT_SECS"
		));
	}

	#[test]
	fn test_file_layer_overrides_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("media.toml");
		std::fs::write(
			&path,
			"retry_max_attempts = 2\nhit_gap_warning_secs = 120\n",
		)
		.unwrap();

		let mut merged = MediaConfigLayer::default();
		merged.merge(load_layer_from_file(&path).unwrap());
		let config = merged.finalize().unwrap();

		assert_eq!(config.retry.max_attempts, 2);
		assert_eq!(config.hit_gap_warning, Duration::from_secs(120));
		assert_eq!(config.retry.delay, Duration::from_secs(60));
	}

	#[test]
	fn test_missing_file_is_skipped() {
		let dir = tempfile::tempdir().unwrap();
		let layer = load_layer_from_file(&dir.path().join("absent.toml")).unwrap();
		assert_eq!(layer, MediaConfigLayer::default());
	}

	#[test]
	fn test_bad_toml_is_reported() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("media.toml");
		std::fs::write(&path, "retry_max_attempts = \"three\"").unwrap();
		assert!(matches!(
			load_layer_from_file(&path),
			Err(ConfigError::TomlParse { .. })
		));
	}
}
