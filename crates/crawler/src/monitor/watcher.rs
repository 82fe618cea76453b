use std::path::Path;

use async_channel as chan;
use notify::{
	event::{AccessKind, AccessMode, CreateKind, ModifyKind, RemoveKind, RenameMode},
	Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use tracing::{error, trace};

use crate::monitors::DirWatcher;

use super::{ChangeEvent, EventMask};

/// Per-directory watches backed by the platform's notification facility
pub struct NotifyWatcher {
	watcher: RecommendedWatcher,
}

impl NotifyWatcher {
	/// Returns the watcher and the stream of raw events it produces
	pub fn new() -> Result<(Self, chan::Receiver<notify::Result<Event>>), notify::Error> {
		let (events_tx, events_rx) = chan::unbounded();

		let watcher = RecommendedWatcher::new(
			move |result| {
				if !events_tx.is_closed() {
					// SAFETY: we are not blocking the thread as this is an unbounded channel
					if events_tx.send_blocking(result).is_err() {
						error!("Unable to send watcher event to the change monitor;");
					}
				} else {
					error!("Tried to send file system events to a closed channel;");
				}
			},
			Config::default(),
		)?;

		Ok((Self { watcher }, events_rx))
	}
}

impl DirWatcher for NotifyWatcher {
	fn watch(&mut self, path: &Path) -> Result<(), notify::Error> {
		self.watcher.watch(path, RecursiveMode::NonRecursive)
	}

	fn unwatch(&mut self, path: &Path) -> Result<(), notify::Error> {
		self.watcher.unwatch(path)
	}
}

/// Reduces a notify event to the change events the monitor understands.
///
/// Access and other informational events produce nothing.
#[must_use]
pub fn translate(event: Event) -> Vec<ChangeEvent> {
	let Event { kind, mut paths, .. } = event;

	let mask = match kind {
		EventKind::Access(AccessKind::Close(AccessMode::Write)) => EventMask::CLOSE_WRITE,

		EventKind::Create(CreateKind::Folder) => EventMask::CREATE | EventMask::ISDIR,
		EventKind::Create(_) => EventMask::CREATE,

		EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
			if paths.len() != 2 {
				trace!(?paths, "Rename without both ends;");
				return vec![];
			}
			let to = paths.pop();
			let from = paths.pop();
			return from
				.zip(to)
				.map(|(from, to)| ChangeEvent::moved(from, to))
				.into_iter()
				.collect();
		}
		EventKind::Modify(ModifyKind::Name(RenameMode::From)) => EventMask::MOVE,
		EventKind::Modify(ModifyKind::Name(_)) => EventMask::CREATE,
		EventKind::Modify(
			ModifyKind::Data(_) | ModifyKind::Metadata(_) | ModifyKind::Any,
		) => EventMask::MODIFY,

		EventKind::Remove(RemoveKind::Folder) => EventMask::DELETE | EventMask::ISDIR,
		EventKind::Remove(_) => EventMask::DELETE,

		other => {
			trace!(?other, "Ignoring event kind;");
			return vec![];
		}
	};

	paths
		.into_iter()
		.map(|path| ChangeEvent::new(mask, path))
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	use std::path::PathBuf;

	use notify::event::{DataChange, MetadataKind};
	use pretty_assertions::assert_eq;

	fn event(kind: EventKind, paths: &[&str]) -> Event {
		paths
			.iter()
			.fold(Event::new(kind), |event, path| event.add_path(PathBuf::from(path)))
	}

	#[test]
	fn renames_with_both_ends_become_moves() {
		assert_eq!(
			translate(event(
				EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
				&["/a/x.txt", "/b/x.txt"]
			)),
			vec![ChangeEvent::moved("/a/x.txt", "/b/x.txt")]
		);
	}

	#[test]
	fn half_renames() {
		assert_eq!(
			translate(event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/a/x"])),
			vec![ChangeEvent::new(EventMask::MOVE, "/a/x")]
		);
		assert_eq!(
			translate(event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/a/y"])),
			vec![ChangeEvent::new(EventMask::CREATE, "/a/y")]
		);
	}

	#[test]
	fn writes_and_directories() {
		assert_eq!(
			translate(event(
				EventKind::Access(AccessKind::Close(AccessMode::Write)),
				&["/a/log"]
			)),
			vec![ChangeEvent::new(EventMask::CLOSE_WRITE, "/a/log")]
		);
		assert_eq!(
			translate(event(EventKind::Modify(ModifyKind::Data(DataChange::Any)), &["/a/log"])),
			vec![ChangeEvent::new(EventMask::MODIFY, "/a/log")]
		);
		assert_eq!(
			translate(event(
				EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)),
				&["/a/log"]
			))[0]
				.mask,
			EventMask::MODIFY
		);
		assert_eq!(
			translate(event(EventKind::Create(CreateKind::Folder), &["/a/new"])),
			vec![ChangeEvent::new(EventMask::CREATE | EventMask::ISDIR, "/a/new")]
		);
		assert_eq!(
			translate(event(EventKind::Remove(RemoveKind::File), &["/a/old"])),
			vec![ChangeEvent::new(EventMask::DELETE, "/a/old")]
		);
	}

	#[test]
	fn informational_events_are_dropped() {
		assert!(translate(event(EventKind::Access(AccessKind::Read), &["/a/x"])).is_empty());
		assert!(translate(event(EventKind::Other, &["/a/x"])).is_empty());
		assert!(translate(event(
			EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
			&["/a/x"]
		))
		.is_empty());
	}
}
