//! Keeps an object index in sync with directories on disk.
//!
//! A [`Crawler`] walks its roots into `dir` and `file` objects stored through
//! a [`sd_object_db::DbHandle`], then a [`ChangeMonitor`] applies live
//! filesystem notifications, falling back to periodic rescans where
//! notifications aren't available.
//!
//! ```no_run
//! # async fn run() -> Result<(), sd_crawler::Error> {
//! use sd_crawler::{ChangeMonitor, Crawler, CrawlerConfig, NotifyWatcher};
//! use sd_object_db::{DbHandle, ObjectStore};
//!
//! let config = CrawlerConfig::default();
//! let db = DbHandle::spawn(ObjectStore::open("index.db")?, config.flush_delay())?;
//! let (watcher, events_rx) = NotifyWatcher::new()?;
//!
//! let crawler = Crawler::new(db, config, Some(Box::new(watcher)), None).await?;
//! crawler.append("/home/me/Music").await?;
//!
//! let monitor = ChangeMonitor::new(crawler.clone()).spawn(events_rx);
//! crawler.wait_idle().await;
//! monitor.stop().await;
//! # Ok(())
//! # }
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod burst;
mod config;
mod crawler;
mod error;
mod monitor;
mod monitors;
mod scheduler;

pub use burst::BurstDetector;
pub use config::{CrawlerConfig, SchedulerConfig};
pub use crawler::{
	diff_sorted, list_dir, Crawler, DirDiff, Entry, ScanItem, ScanQueue, DIR_TYPE, FILE_TYPE,
	NO_CRAWL_MARKER,
};
pub use error::Error;
pub use monitor::{translate, ChangeEvent, ChangeMonitor, EventMask, MonitorHandle, NotifyWatcher};
pub use monitors::{is_network_fs, DirWatcher, MonitorList};
pub use scheduler::{delay_for, Scheduler, SchedulerPolicy, TimeBudget};
