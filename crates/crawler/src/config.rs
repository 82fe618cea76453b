use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use sd_utils::error::FileIOError;

use crate::{error::Error, scheduler::SchedulerPolicy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
	pub policy: SchedulerPolicy,
	/// Scales every delay the policy asks for
	pub multiplier: f64,
	/// Window in seconds for growing-file detection
	pub growscan: u64,
	/// Periodically rescan directories on network filesystems
	pub nfs_rescan: bool,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			policy: SchedulerPolicy::Balanced,
			multiplier: 1.0,
			growscan: 10,
			nfs_rescan: true,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
	pub scheduler: SchedulerConfig,
	/// Extra delay factor for throttled (background) scan items
	pub throttle_factor: f64,
	/// Seconds between the end of a pass and a periodic rescan
	pub rescan_delay: u64,
	/// Continuous work in milliseconds before the crawler yields
	pub time_budget_ms: u64,
	/// Delay in milliseconds before staged changes get committed
	pub flush_delay_ms: u64,
}

impl Default for CrawlerConfig {
	fn default() -> Self {
		Self {
			scheduler: SchedulerConfig::default(),
			throttle_factor: 5.0,
			rescan_delay: 10,
			time_budget_ms: 100,
			flush_delay_ms: 100,
		}
	}
}

impl CrawlerConfig {
	pub fn from_toml(text: &str) -> Result<Self, Error> {
		toml::from_str(text).map_err(Into::into)
	}

	#[instrument(fields(path = %path.as_ref().display()), skip_all, err)]
	pub async fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
		let path = path.as_ref();
		let text = tokio::fs::read_to_string(path)
			.await
			.map_err(|e| FileIOError::with_context(path, e, "reading crawler config"))?;

		let config = Self::from_toml(&text)?;
		debug!(?config, "Loaded crawler config;");

		Ok(config)
	}

	#[must_use]
	pub const fn growscan(&self) -> Duration {
		Duration::from_secs(self.scheduler.growscan)
	}

	#[must_use]
	pub const fn rescan_delay(&self) -> Duration {
		Duration::from_secs(self.rescan_delay)
	}

	#[must_use]
	pub const fn time_budget(&self) -> Duration {
		Duration::from_millis(self.time_budget_ms)
	}

	#[must_use]
	pub const fn flush_delay(&self) -> Duration {
		Duration::from_millis(self.flush_delay_ms)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use pretty_assertions::assert_eq;

	#[test]
	fn empty_config_uses_defaults() {
		assert_eq!(CrawlerConfig::from_toml("").ok(), Some(CrawlerConfig::default()));
	}

	#[test]
	fn partial_config_overrides_only_given_keys() {
		let config = CrawlerConfig::from_toml(
			r#"
			rescan_delay = 60

			[scheduler]
			policy = "conservative"
			nfs_rescan = false
			"#,
		)
		.expect("valid config");

		assert_eq!(config.rescan_delay(), Duration::from_secs(60));
		assert_eq!(config.scheduler.policy, SchedulerPolicy::Conservative);
		assert!(!config.scheduler.nfs_rescan);
		assert_eq!(config.scheduler.growscan, 10);
		assert_eq!(config.time_budget(), Duration::from_millis(100));
	}

	#[test]
	fn unknown_policy_is_rejected() {
		assert!(matches!(
			CrawlerConfig::from_toml("[scheduler]\npolicy = \"turbo\""),
			Err(Error::Config(_))
		));
	}

	#[tokio::test]
	async fn load_reports_the_missing_path() {
		let err = CrawlerConfig::load("/definitely/not/here.toml")
			.await
			.expect_err("missing file");

		assert!(matches!(err, Error::FileIO(e) if e.is_not_found()));
	}
}
