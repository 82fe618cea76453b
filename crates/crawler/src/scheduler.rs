//! Pacing for background crawling.
//!
//! The delay between two units of crawl work comes from the configured policy
//! and the current system load, normalized by the number of available cores.

use std::{
	num::NonZeroUsize,
	thread::available_parallelism,
	time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use sysinfo::System;
use tracing::trace;

#[derive(
	Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SchedulerPolicy {
	/// Never sleeps
	Aggressive,
	/// Sleeps only while the machine is busy
	#[default]
	Balanced,
	/// Always sleeps, longer under load
	Conservative,
}

const BALANCED_IDLE_LOAD: f64 = 0.5;
const BALANCED_STEP: Duration = Duration::from_millis(20);
const BALANCED_MAX: Duration = Duration::from_millis(100);
const CONSERVATIVE_BASE: Duration = Duration::from_millis(10);
const CONSERVATIVE_STEP: Duration = Duration::from_millis(50);
const CONSERVATIVE_MAX: Duration = Duration::from_millis(250);

/// Delay asked by `policy` at a given normalized load (1.0 means every core busy)
#[must_use]
pub fn delay_for(policy: SchedulerPolicy, load: f64) -> Duration {
	let load = if load.is_finite() { load.max(0.0) } else { 0.0 };

	match policy {
		SchedulerPolicy::Aggressive => Duration::ZERO,
		SchedulerPolicy::Balanced if load < BALANCED_IDLE_LOAD => Duration::ZERO,
		SchedulerPolicy::Balanced => BALANCED_STEP.mul_f64(load).min(BALANCED_MAX),
		SchedulerPolicy::Conservative => {
			(CONSERVATIVE_BASE + CONSERVATIVE_STEP.mul_f64(load)).min(CONSERVATIVE_MAX)
		}
	}
}

#[derive(Debug, Clone)]
enum LoadSource {
	System { cores: NonZeroUsize },
	Fixed(f64),
}

#[derive(Debug, Clone)]
pub struct Scheduler {
	source: LoadSource,
}

impl Default for Scheduler {
	fn default() -> Self {
		Self::new()
	}
}

impl Scheduler {
	#[must_use]
	pub fn new() -> Self {
		Self {
			source: LoadSource::System {
				cores: available_parallelism().unwrap_or(NonZeroUsize::MIN),
			},
		}
	}

	/// Scheduler that always sees the same load, mostly useful for tests
	#[must_use]
	pub const fn with_fixed_load(load: f64) -> Self {
		Self {
			source: LoadSource::Fixed(load),
		}
	}

	#[must_use]
	pub fn load(&self) -> f64 {
		match self.source {
			LoadSource::System { cores } => {
				#[allow(clippy::cast_precision_loss)]
				let load = System::load_average().one / cores.get() as f64;
				load
			}
			LoadSource::Fixed(load) => load,
		}
	}

	#[must_use]
	pub fn next(&self, policy: SchedulerPolicy) -> Duration {
		if policy == SchedulerPolicy::Aggressive {
			return Duration::ZERO;
		}

		let load = self.load();
		let delay = delay_for(policy, load);
		trace!(%policy, load, ?delay, "Scheduler delay;");

		delay
	}
}

/// Tracks continuous work and yields back to the runtime once the budget is spent
#[derive(Debug)]
pub struct TimeBudget {
	budget: Duration,
	started: Instant,
}

impl TimeBudget {
	#[must_use]
	pub fn new(budget: Duration) -> Self {
		Self {
			budget,
			started: Instant::now(),
		}
	}

	#[must_use]
	pub fn exhausted(&self) -> bool {
		self.started.elapsed() >= self.budget
	}

	/// Returns `true` if it had to yield
	pub async fn checkpoint(&mut self) -> bool {
		if !self.exhausted() {
			return false;
		}

		tokio::task::yield_now().await;
		self.started = Instant::now();

		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use pretty_assertions::assert_eq;

	#[test]
	fn policies_react_to_load() {
		assert_eq!(delay_for(SchedulerPolicy::Aggressive, 8.0), Duration::ZERO);

		assert_eq!(delay_for(SchedulerPolicy::Balanced, 0.2), Duration::ZERO);
		assert_eq!(
			delay_for(SchedulerPolicy::Balanced, 2.0),
			Duration::from_millis(40)
		);
		assert_eq!(delay_for(SchedulerPolicy::Balanced, 50.0), BALANCED_MAX);

		assert_eq!(delay_for(SchedulerPolicy::Conservative, 0.0), CONSERVATIVE_BASE);
		assert!(
			delay_for(SchedulerPolicy::Conservative, 1.0)
				> delay_for(SchedulerPolicy::Conservative, 0.0)
		);
		assert_eq!(delay_for(SchedulerPolicy::Conservative, f64::NAN), CONSERVATIVE_BASE);
	}

	#[test]
	fn fixed_load_drives_next() {
		let scheduler = Scheduler::with_fixed_load(1.0);
		assert_eq!(scheduler.next(SchedulerPolicy::Balanced), Duration::from_millis(20));
		assert_eq!(scheduler.next(SchedulerPolicy::Aggressive), Duration::ZERO);
	}

	#[test]
	fn policy_names_parse() {
		assert_eq!(
			"conservative".parse::<SchedulerPolicy>().ok(),
			Some(SchedulerPolicy::Conservative)
		);
		assert_eq!(SchedulerPolicy::Aggressive.to_string(), "aggressive");
	}

	#[tokio::test]
	async fn budget_yields_only_when_spent() {
		let mut budget = TimeBudget::new(Duration::from_secs(3600));
		assert!(!budget.checkpoint().await);

		let mut budget = TimeBudget::new(Duration::ZERO);
		assert!(budget.checkpoint().await);
	}
}
