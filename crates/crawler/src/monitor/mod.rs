//! Live change handling.
//!
//! Raw filesystem notifications are reduced to [`ChangeEvent`]s and applied
//! to the index one at a time, in arrival order. Events wait while a batch of
//! staged changes is being committed.

use std::{
	path::{Path, PathBuf},
	pin::pin,
	time::Duration,
};

use async_channel as chan;
use bitflags::bitflags;
use futures::StreamExt;
use futures_concurrency::stream::Merge;
use sd_object_db::{attrs, Record};
use sd_utils::{file_name_str, is_hidden_name};
use tokio::{
	fs,
	runtime::Handle,
	spawn,
	task::JoinHandle,
	time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error, info, instrument, trace, Instrument};

use crate::{
	crawler::{Crawler, ScanItem, DIR_TYPE},
	error::Error,
};

mod watcher;

pub use watcher::{translate, NotifyWatcher};

const MIN_GROWSCAN: Duration = Duration::from_secs(1);

bitflags! {
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	pub struct EventMask: u32 {
		const MODIFY = 1 << 0;
		const CLOSE_WRITE = 1 << 1;
		const CREATE = 1 << 2;
		const DELETE = 1 << 3;
		/// Rename, with a target when both ends are known
		const MOVE = 1 << 4;
		const ISDIR = 1 << 5;
		const UNMOUNT = 1 << 6;
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
	pub mask: EventMask,
	pub path: PathBuf,
	pub target: Option<PathBuf>,
}

impl ChangeEvent {
	pub fn new(mask: EventMask, path: impl Into<PathBuf>) -> Self {
		Self {
			mask,
			path: path.into(),
			target: None,
		}
	}

	pub fn moved(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
		Self {
			mask: EventMask::MOVE,
			path: from.into(),
			target: Some(to.into()),
		}
	}
}

/// Applies change events to the index of a [`Crawler`]
#[derive(Clone)]
pub struct ChangeMonitor {
	crawler: Crawler,
}

impl ChangeMonitor {
	#[must_use]
	pub const fn new(crawler: Crawler) -> Self {
		Self { crawler }
	}

	#[instrument(skip(self), err)]
	pub async fn handle(&self, event: ChangeEvent) -> Result<(), Error> {
		let mut next = Some(event);
		while let Some(event) = next {
			next = self.dispatch(event).await?;
		}
		Ok(())
	}

	/// Handles one event, possibly turning it into another one
	async fn dispatch(&self, event: ChangeEvent) -> Result<Option<ChangeEvent>, Error> {
		let ChangeEvent {
			mask,
			mut path,
			target,
		} = event;

		if mask.contains(EventMask::UNMOUNT) {
			// the mountpoint stays behind, its objects are kept
			debug!(path = %path.display(), "Filesystem unmounted;");
			self.crawler.monitors().remove(&path);
			return Ok(None);
		}

		if mask.contains(EventMask::MODIFY) && self.crawler.bursts().is_growing(&path) {
			trace!(path = %path.display(), "File still growing, ignoring modification;");
			return Ok(None);
		}

		self.crawler.db().wait_unlocked().await;

		if !path
			.parent()
			.is_some_and(|parent| self.crawler.is_monitored(parent))
		{
			trace!(path = %path.display(), "Event outside of monitored directories;");
			return Ok(None);
		}

		let Ok(name) = file_name_str(&path) else {
			trace!(path = %path.display(), "Ignoring event for a non UTF-8 name;");
			return Ok(None);
		};

		if is_hidden_name(name) {
			return Ok(match target {
				Some(target) if mask.contains(EventMask::MOVE) => {
					debug!(path = %target.display(), "Moved out of a hidden name;");
					Some(ChangeEvent::new(EventMask::CREATE, target))
				}
				_ => None,
			});
		}

		if let (true, Some(target)) = (mask.contains(EventMask::MOVE), target) {
			if let Some(source) = self.crawler.resolve(&path).await? {
				if file_name_str(&target).map_or(true, is_hidden_name) {
					debug!(path = %path.display(), "Moved into a hidden name;");
					return Ok(Some(ChangeEvent::new(EventMask::DELETE, path)));
				}

				self.move_object(source, &path, &target).await?;
				return Ok(None);
			}

			// source never made it into the index
			path = target;
		}

		if let Ok(metadata) = fs::metadata(&path).await {
			if metadata.is_dir() {
				let recursive = !mask.contains(EventMask::MODIFY);
				self.crawler.enqueue(ScanItem::new(path, recursive));
			} else {
				if mask.contains(EventMask::CLOSE_WRITE) {
					self.crawler.bursts().remove(&path);
				}
				// siblings may depend on this file, rescan the whole directory
				self.crawler.rescan_parent(&path);
			}
			return Ok(None);
		}

		if let Some(record) = self.crawler.resolve(&path).await? {
			info!(object = %record.object, path = %path.display(), "Deleting object;");
			self.crawler.delete_tree(record.object).await?;
		}
		self.crawler.monitors().remove(&path);
		self.crawler.bursts().remove(&path);
		self.crawler.rescan_parent(&path);
		self.crawler.db().flush().await?;

		Ok(None)
	}

	async fn move_object(&self, source: Record, from: &Path, to: &Path) -> Result<(), Error> {
		let target_name = file_name_str(to)?;

		let target_parent = match to.parent() {
			Some(parent) => self.crawler.resolve(parent).await?,
			None => None,
		};
		let Some(target_parent) = target_parent else {
			debug!(from = %from.display(), to = %to.display(), "Moved out of the index;");
			self.crawler.delete_tree(source.object).await?;
			self.crawler.monitors().remove(from);
			self.crawler.rescan_parent(from);
			self.crawler.db().flush().await?;
			return Ok(());
		};

		if let Some(existing) = self.crawler.resolve(to).await? {
			if existing.object != source.object {
				debug!(object = %existing.object, "Replacing object at the move target;");
				self.crawler.monitors().remove(to);
				self.crawler.delete_tree(existing.object).await?;
			}
		}

		let new_parent = (from.parent() != to.parent()).then_some(target_parent.object);
		info!(
			object = %source.object,
			from = %from.display(),
			to = %to.display(),
			"Moving object;"
		);
		self.crawler
			.db()
			.update(
				source.object.clone(),
				new_parent,
				Some(target_name.to_owned()),
				attrs! {},
			)
			.await?;

		self.crawler.rescan_parent(from);
		self.crawler.rescan_parent(to);

		if source.object.type_name == DIR_TYPE {
			self.crawler.monitors().remove(from);
			self.crawler.enqueue(ScanItem::new(to, true).forced());
		}

		Ok(())
	}

	/// Replays modifications swallowed during the last growth window
	pub async fn tick(&self) {
		for path in self.crawler.bursts().poll() {
			if let Err(e) = self
				.handle(ChangeEvent::new(EventMask::MODIFY, path))
				.await
			{
				error!(?e, "Failed to replay file modification;");
			}
		}
	}

	/// Runs the monitor over raw notifications until [`MonitorHandle::stop`]
	#[must_use]
	pub fn spawn(self, events_rx: chan::Receiver<notify::Result<notify::Event>>) -> MonitorHandle {
		let (stop_tx, stop_rx) = chan::bounded(1);
		let growscan = self.crawler.config().growscan().max(MIN_GROWSCAN);

		let handle = spawn(
			async move {
				while let Err(e) = spawn(
					self.clone()
						.handle_events(events_rx.clone(), stop_rx.clone(), growscan)
						.in_current_span(),
				)
				.await
				{
					if e.is_panic() {
						error!(?e, "Change monitor panicked;");
					} else {
						trace!("Change monitor task was cancelled;");
						break;
					}
					trace!("Restarting change monitor processing task...");
				}

				info!("Change monitor gracefully shutdown");
			}
			.in_current_span(),
		);

		MonitorHandle {
			stop_tx,
			handle: Some(handle),
		}
	}

	async fn handle_events(
		self,
		events_rx: chan::Receiver<notify::Result<notify::Event>>,
		stop_rx: chan::Receiver<()>,
		growscan: Duration,
	) {
		enum StreamMessage {
			NewEvent(notify::Result<notify::Event>),
			Tick,
			Stop,
		}

		let mut burst_interval = interval_at(Instant::now() + growscan, growscan);
		burst_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

		let mut msg_stream = pin!((
			events_rx.map(StreamMessage::NewEvent),
			IntervalStream::new(burst_interval).map(|_| StreamMessage::Tick),
			stop_rx.map(|()| StreamMessage::Stop),
		)
			.merge());

		while let Some(msg) = msg_stream.next().await {
			match msg {
				StreamMessage::NewEvent(Ok(event)) => {
					for change in translate(event) {
						if let Err(e) = self.handle(change).await {
							error!(?e, "Failed to handle change event;");
						}
					}
				}

				StreamMessage::NewEvent(Err(e)) => error!(?e, "Watcher error;"),

				StreamMessage::Tick => self.tick().await,

				StreamMessage::Stop => {
					debug!("Stopping change monitor;");
					break;
				}
			}
		}
	}
}

pub struct MonitorHandle {
	stop_tx: chan::Sender<()>,
	handle: Option<JoinHandle<()>>,
}

impl MonitorHandle {
	pub async fn stop(mut self) {
		self.shutdown().await;
	}

	async fn shutdown(&mut self) {
		if let Some(handle) = self.handle.take() {
			if self.stop_tx.send(()).await.is_err() {
				trace!("Change monitor already stopped;");
			}
			if let Err(e) = handle.await {
				error!(?e, "Failed to join change monitor task;");
			}
		}
	}
}

impl Drop for MonitorHandle {
	fn drop(&mut self) {
		if let (Some(handle), Ok(runtime)) = (self.handle.take(), Handle::try_current()) {
			let stop_tx = self.stop_tx.clone();
			runtime.spawn(async move {
				if stop_tx.send(()).await.is_err() {
					trace!("Change monitor already stopped;");
				}
				if let Err(e) = handle.await {
					error!(?e, "Failed to join change monitor task;");
				}
			});
		}
	}
}
