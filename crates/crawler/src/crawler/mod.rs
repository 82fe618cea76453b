//! Directory crawler.
//!
//! Keeps the `dir`/`file` objects of the store in sync with one or more root
//! directories. Scan requests go through a [`ScanQueue`] drained by a single
//! scanner task. Each scan merges the stored children of a directory with its
//! live listing and writes the difference back through the database worker.

use std::{
	path::{Path, PathBuf},
	sync::Arc,
	time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use async_channel as chan;
use parking_lot::{Mutex, MutexGuard};
use sd_object_db::{attrs, Attrs, Change, DbHandle, ObjectRef, Record};
use sd_utils::error::{FileIOError, NonUtf8PathError};
use tokio::{
	fs,
	sync::watch,
	task::{yield_now, JoinHandle},
	time::sleep,
};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::{
	burst::BurstDetector,
	config::CrawlerConfig,
	error::Error,
	monitors::{DirWatcher, MonitorList},
	scheduler::{Scheduler, TimeBudget},
};

mod diff;
mod entries;
mod queue;

pub use diff::{diff_sorted, DirDiff};
pub use entries::{list_dir, Entry, DIR_TYPE, FILE_TYPE, NO_CRAWL_MARKER};
pub use queue::{ScanItem, ScanQueue};

#[derive(Debug, Clone)]
struct Root {
	path: PathBuf,
	object: ObjectRef,
}

#[derive(Debug, Default)]
struct ScanState {
	queue: ScanQueue,
	running: bool,
	scanner: Option<JoinHandle<()>>,
	restart: Option<JoinHandle<()>>,
}

struct Inner {
	db: DbHandle,
	config: CrawlerConfig,
	scheduler: Scheduler,
	state: Mutex<ScanState>,
	monitors: Mutex<MonitorList>,
	roots: Mutex<Vec<Root>>,
	bursts: BurstDetector,
	thumbnails: Option<chan::Sender<PathBuf>>,
	idle_tx: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct Crawler {
	inner: Arc<Inner>,
}

impl Crawler {
	/// Registers the `dir` and `file` types and returns an idle crawler.
	///
	/// Without a `watcher` every directory is polled through periodic
	/// rescans. Changed files are announced on `thumbnails` when given.
	pub async fn new(
		db: DbHandle,
		config: CrawlerConfig,
		watcher: Option<Box<dyn DirWatcher>>,
		thumbnails: Option<chan::Sender<PathBuf>>,
	) -> Result<Self, Error> {
		Self::with_scheduler(db, config, Scheduler::new(), watcher, thumbnails).await
	}

	pub async fn with_scheduler(
		db: DbHandle,
		config: CrawlerConfig,
		scheduler: Scheduler,
		watcher: Option<Box<dyn DirWatcher>>,
		thumbnails: Option<chan::Sender<PathBuf>>,
	) -> Result<Self, Error> {
		db.register_type(DIR_TYPE, entries::dir_attrs()).await?;
		db.register_type(FILE_TYPE, entries::file_attrs()).await?;

		let (idle_tx, _) = watch::channel(true);

		Ok(Self {
			inner: Arc::new(Inner {
				db,
				config,
				scheduler,
				state: Mutex::default(),
				monitors: Mutex::new(MonitorList::new(watcher)),
				roots: Mutex::default(),
				bursts: BurstDetector::new(),
				thumbnails,
				idle_tx,
			}),
		})
	}

	#[must_use]
	pub fn db(&self) -> &DbHandle {
		&self.inner.db
	}

	#[must_use]
	pub fn config(&self) -> &CrawlerConfig {
		&self.inner.config
	}

	/// Adds a root directory and starts crawling it.
	///
	/// Roots are stored without a parent, named after their canonical path.
	#[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
	pub async fn append(&self, path: impl AsRef<Path>) -> Result<ObjectRef, Error> {
		let path = fs::canonicalize(path.as_ref())
			.await
			.map_err(|e| FileIOError::with_context(path.as_ref(), e, "resolving crawl root"))?;
		let name = path
			.to_str()
			.ok_or_else(|| NonUtf8PathError(path.as_path().into()))?
			.to_owned();

		let root = match self.inner.db.lookup(None, name.clone()).await? {
			Some(root) => root,
			None => {
				let entry = Entry::from_path(&path, name.clone())
					.await?
					.filter(|entry| entry.is_dir)
					.ok_or_else(|| Error::Consistency(format!("crawl root {name} is not a directory")))?;

				info!("Adding crawl root;");
				self.inner
					.db
					.add(DIR_TYPE, name, None, entry_attrs(&entry))
					.await?
			}
		};

		{
			let mut roots = self.inner.roots.lock();
			if !roots.iter().any(|known| known.path == path) {
				roots.push(Root {
					path: path.clone(),
					object: root.object.clone(),
				});
			}
		}

		// without notifications the root is crawled in the background
		let throttle = !self.inner.monitors.lock().uses_notify();
		let item = ScanItem::new(path, true).with_thumbnail_check();
		self.enqueue(if throttle { item.throttled() } else { item });

		Ok(root.object)
	}

	/// Queues a scan of `path`, returns `false` if nothing was queued
	pub fn rescan(&self, path: impl Into<PathBuf>, recursive: bool) -> bool {
		self.enqueue(ScanItem::new(path, recursive))
	}

	/// Aborts the current pass.
	///
	/// Queued scans and staged changes are dropped, the next pass derives
	/// them again.
	pub fn stop(&self) {
		let (scanner, restart, cleared) = {
			let mut state = self.inner.state.lock();
			state.running = false;
			(state.scanner.take(), state.restart.take(), state.queue.clear())
		};

		if let Some(scanner) = scanner {
			scanner.abort();
		}
		if let Some(restart) = restart {
			restart.abort();
		}

		let discarded = self.inner.db.discard_pending();
		info!(cleared, discarded, "Crawler stopped;");

		self.inner.idle_tx.send_replace(true);
	}

	/// Resolves once the queue is drained and the last pass was committed
	pub async fn wait_idle(&self) {
		let mut idle_rx = self.inner.idle_tx.subscribe();
		if idle_rx.wait_for(|idle| *idle).await.is_err() {
			trace!("Idle watcher closed while waiting;");
		}
	}

	#[must_use]
	pub fn is_idle(&self) -> bool {
		*self.inner.idle_tx.borrow()
	}

	#[must_use]
	pub fn is_monitored(&self, path: &Path) -> bool {
		self.inner.monitors.lock().contains(path)
	}

	#[must_use]
	pub fn monitored(&self) -> Vec<PathBuf> {
		self.inner.monitors.lock().paths()
	}

	pub(crate) fn monitors(&self) -> MutexGuard<'_, MonitorList> {
		self.inner.monitors.lock()
	}

	pub(crate) fn bursts(&self) -> &BurstDetector {
		&self.inner.bursts
	}

	/// Finds the object stored for `path` by walking down from its root
	pub async fn resolve(&self, path: &Path) -> Result<Option<Record>, Error> {
		self.walk(path, false).await
	}

	async fn walk(&self, path: &Path, create_dirs: bool) -> Result<Option<Record>, Error> {
		let Some(root) = self.root_of(path) else {
			return Ok(None);
		};
		let Some(mut record) = self.inner.db.get(root.object).await? else {
			return Ok(None);
		};

		let Ok(relative) = path.strip_prefix(&root.path) else {
			return Ok(None);
		};

		let mut current = root.path;
		for component in relative.components() {
			let Some(name) = component.as_os_str().to_str() else {
				return Ok(None);
			};
			current.push(name);

			record = match self
				.inner
				.db
				.lookup(Some(record.object.clone()), name)
				.await?
			{
				Some(child) => child,
				None if create_dirs => {
					let Some(entry) = Entry::from_path(&current, name.to_owned())
						.await?
						.filter(|entry| entry.is_dir)
					else {
						return Ok(None);
					};
					debug!(path = %current.display(), "Adding missing directory;");
					self.inner
						.db
						.add(DIR_TYPE, name, Some(record.object), entry_attrs(&entry))
						.await?
				}
				None => return Ok(None),
			};
		}

		Ok(Some(record))
	}

	fn root_of(&self, path: &Path) -> Option<Root> {
		self.inner
			.roots
			.lock()
			.iter()
			.filter(|root| path.starts_with(&root.path))
			.max_by_key(|root| root.path.components().count())
			.cloned()
	}

	/// Deletes `object` and, for directories, everything stored below it
	pub(crate) async fn delete_tree(&self, object: ObjectRef) -> Result<(), Error> {
		let mut stack = vec![object];

		while let Some(object) = stack.pop() {
			if object.type_name == DIR_TYPE {
				stack.extend(
					self.inner
						.db
						.children(object.clone())
						.await?
						.into_iter()
						.map(|child| child.object),
				);
			}

			match self.inner.db.delete(object).await {
				Ok(()) | Err(sd_object_db::Error::NotFound(_)) => {}
				Err(e) => return Err(e.into()),
			}
		}

		Ok(())
	}

	pub(crate) fn enqueue(&self, item: ScanItem) -> bool {
		let mut state = self.inner.state.lock();

		if item.recursive && !item.force_scan && self.inner.monitors.lock().contains(&item.path) {
			trace!(path = %item.path.display(), "Directory already monitored;");
			return false;
		}

		if !state.queue.push(item) {
			return false;
		}

		if !state.running {
			state.running = true;
			self.inner.idle_tx.send_replace(false);

			let this = self.clone();
			state.scanner = Some(tokio::spawn(async move { this.run_scanner().await }));
		}

		true
	}

	fn next_item(&self) -> Option<ScanItem> {
		let mut state = self.inner.state.lock();
		let item = state.queue.pop();
		if item.is_none() {
			state.running = false;
		}
		item
	}

	fn delay(&self, throttle: bool) -> Duration {
		let scheduler = &self.inner.config.scheduler;
		let mut factor = scheduler.multiplier;
		if throttle {
			factor *= self.inner.config.throttle_factor;
		}

		scale(self.inner.scheduler.next(scheduler.policy), factor)
	}

	async fn run_scanner(self) {
		let started = Instant::now();
		info!("Starting directory scan;");

		while let Some(item) = self.next_item() {
			let interval = self.delay(item.throttle);

			match self.scan(&item).await {
				Ok(subdirs) if item.recursive => {
					for path in subdirs {
						self.enqueue(ScanItem {
							path,
							..item.clone()
						});
					}
				}
				Ok(_) => {}
				Err(e) => error!(?e, path = %item.path.display(), "Failed to scan directory;"),
			}

			if interval.is_zero() {
				yield_now().await;
			} else {
				sleep(interval).await;
			}
		}

		self.scan_completed(started).await;
	}

	async fn scan_completed(&self, started: Instant) {
		info!(elapsed = ?started.elapsed(), "Directory scan finished;");

		let now = unix_now();
		let roots = self.inner.roots.lock().clone();
		for root in roots {
			self.inner.db.stage(Change::Update {
				object: root.object,
				parent: None,
				name: None,
				attrs: attrs! { "last_crawl" => now },
			});
		}

		if let Err(e) = self.inner.db.flush().await {
			error!(?e, "Failed to commit crawl results;");
		}

		let needs_restart = {
			let monitors = self.inner.monitors.lock();
			!monitors.uses_notify()
				|| (!monitors.nfs_items().is_empty() && self.inner.config.scheduler.nfs_rescan)
		};

		let mut state = self.inner.state.lock();
		if state.running {
			// a new pass started while committing
			return;
		}

		if needs_restart {
			debug!("Scheduling a rescan;");
			let this = self.clone();
			let delay = self.inner.config.rescan_delay();
			if let Some(previous) = state.restart.replace(tokio::spawn(async move {
				sleep(delay).await;
				this.restart();
			})) {
				previous.abort();
			}
		}

		self.inner.idle_tx.send_replace(true);
	}

	fn restart(&self) {
		let nfs_items = {
			let mut monitors = self.inner.monitors.lock();
			if monitors.uses_notify() {
				monitors.nfs_items().to_vec()
			} else {
				monitors.reset();
				vec![]
			}
		};

		if nfs_items.is_empty() {
			let roots = self.inner.roots.lock().clone();
			for root in roots {
				self.enqueue(ScanItem::new(root.path, true).throttled());
			}
		} else {
			for path in nfs_items {
				self.enqueue(ScanItem::new(path, true).throttled().forced());
			}
		}
	}

	/// Scans one directory, returning the subdirectories worth descending into
	#[instrument(skip_all, fields(path = %item.path.display()))]
	async fn scan(&self, item: &ScanItem) -> Result<Vec<PathBuf>, Error> {
		let path = item.path.as_path();
		debug!(force_thumbnail_check = item.force_thumbnail_check, "Scanning directory;");

		let Some(dir) = self.walk(path, true).await? else {
			warn!("Directory is not part of any crawl root, skipping;");
			self.inner.monitors.lock().remove(path);
			return Ok(vec![]);
		};

		if dir.object.type_name != DIR_TYPE {
			debug!("Scan target is not a directory anymore;");
			self.inner.monitors.lock().remove(path);
			return Ok(vec![]);
		}

		let Some(listing_path) = self.monitor_dir(path).await? else {
			self.inner.monitors.lock().remove(path);
			return Ok(vec![]);
		};

		let Some((mut live, no_crawl)) = list_dir(&listing_path).await? else {
			debug!("Directory vanished during the scan;");
			self.inner.monitors.lock().remove(path);
			return Ok(vec![]);
		};
		for entry in &mut live {
			entry.path = path.join(&entry.name);
		}

		let stored = self.inner.db.children(dir.object.clone()).await?;
		let DirDiff {
			unchanged,
			added,
			removed,
		} = diff_sorted(stored, live, |stored, live| stored.name.cmp(&live.name));

		trace!(
			unchanged = unchanged.len(),
			added = added.len(),
			removed = removed.len(),
			"Directory diff;"
		);

		for record in removed {
			let child_path = path.join(&record.name);
			if record.object.type_name == DIR_TYPE {
				self.inner.monitors.lock().remove(&child_path);
			}
			self.inner.bursts.remove(&child_path);
			self.delete_tree(record.object).await?;
		}

		let mut budget = TimeBudget::new(self.inner.config.time_budget());
		let mut subdirs = vec![];

		for entry in added {
			if let Err(e) = self
				.inner
				.db
				.add(
					entry.type_name(),
					entry.name.clone(),
					Some(dir.object.clone()),
					entry_attrs(&entry),
				)
				.await
			{
				warn!(?e, path = %entry.path.display(), "Failed to add entry;");
				continue;
			}

			if entry.is_dir {
				subdirs.push(entry.path);
			} else {
				self.request_thumbnail(&entry.path);
				self.pace(&mut budget).await;
			}
		}

		for (record, entry) in unchanged {
			self.parse(record, &entry, item.force_thumbnail_check).await?;

			if entry.is_dir {
				if no_crawl {
					trace!(path = %entry.path.display(), "Not descending into directory;");
				} else {
					subdirs.push(entry.path);
				}
			} else {
				self.pace(&mut budget).await;
			}
		}

		Ok(subdirs)
	}

	/// Registers `path` for monitoring, returning the directory to list
	async fn monitor_dir(&self, path: &Path) -> Result<Option<PathBuf>, Error> {
		let metadata = match fs::symlink_metadata(path).await {
			Ok(metadata) => metadata,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(FileIOError::from((path, e)).into()),
		};

		if !metadata.is_symlink() {
			self.inner.monitors.lock().add(path);
			return Ok(Some(path.to_path_buf()));
		}

		// the link itself is polled, its target gets listed under the link's objects
		self.inner.monitors.lock().add_polled(path);
		match fs::canonicalize(path).await {
			Ok(real_path) => Ok(Some(real_path)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(FileIOError::with_context(path, e, "resolving symlinked directory").into()),
		}
	}

	/// Brings a stored child up to date with its live entry
	async fn parse(&self, record: Record, entry: &Entry, force_thumbnail_check: bool) -> Result<(), Error> {
		let mut record = record;
		let kind_changed = record.object.type_name != entry.type_name();

		if kind_changed {
			debug!(path = %entry.path.display(), is_dir = entry.is_dir, "Entry changed kind;");
			if record.object.type_name == DIR_TYPE {
				// a file can't hold the old directory's children
				self.inner.monitors.lock().remove(&entry.path);
				for child in self.inner.db.children(record.object.clone()).await? {
					self.inner.bursts.remove(&entry.path.join(&child.name));
					self.delete_tree(child.object).await?;
				}
			}
			record = self
				.inner
				.db
				.change_type(record.object, entry.type_name())
				.await?;
		}

		let changed = kind_changed
			|| record.get_int("mtime") != Some(entry.mtime)
			|| record.get_int("size") != Some(entry.size);

		if changed {
			self.inner.db.stage(Change::Update {
				object: record.object,
				parent: None,
				name: None,
				attrs: entry_attrs(entry),
			});
		}

		if !entry.is_dir && (changed || force_thumbnail_check) {
			self.request_thumbnail(&entry.path);
		}

		Ok(())
	}

	async fn pace(&self, budget: &mut TimeBudget) {
		let delay = self.delay(false);
		if !delay.is_zero() {
			sleep(delay).await;
		}
		budget.checkpoint().await;
	}

	fn request_thumbnail(&self, path: &Path) {
		let Some(thumbnails) = &self.inner.thumbnails else {
			return;
		};

		if !self.inner.bursts.should_thumbnail(path) {
			trace!(path = %path.display(), "Skipping thumbnail of a growing file;");
			return;
		}

		if thumbnails.try_send(path.to_path_buf()).is_err() {
			trace!(path = %path.display(), "Thumbnail channel is closed;");
		}
	}

	/// Queues a non-recursive scan of the directory holding `path`
	pub(crate) fn rescan_parent(&self, path: &Path) -> bool {
		path.parent()
			.map_or(false, |parent| self.enqueue(ScanItem::new(parent, false)))
	}
}

fn entry_attrs(entry: &Entry) -> Attrs {
	attrs! { "mtime" => entry.mtime, "size" => entry.size }
}

fn scale(delay: Duration, factor: f64) -> Duration {
	if factor.is_finite() && factor > 0.0 {
		Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(Duration::ZERO)
	} else {
		Duration::ZERO
	}
}

fn unix_now() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.ok()
		.and_then(|since| i64::try_from(since.as_secs()).ok())
		.unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use super::*;

	use pretty_assertions::assert_eq;

	#[test]
	fn scaling_never_panics() {
		let second = Duration::from_secs(1);
		assert_eq!(scale(second, 5.0), Duration::from_secs(5));
		assert_eq!(scale(second, -1.0), Duration::ZERO);
		assert_eq!(scale(second, f64::INFINITY), Duration::ZERO);
		assert_eq!(scale(Duration::MAX, 1e300), Duration::ZERO);
	}
}
