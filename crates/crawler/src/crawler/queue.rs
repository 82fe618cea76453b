use std::{collections::VecDeque, path::PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanItem {
	pub path: PathBuf,
	pub recursive: bool,
	/// Background work, paced with the throttle factor
	pub throttle: bool,
	pub force_thumbnail_check: bool,
	/// Scan even if the directory is already monitored
	pub force_scan: bool,
}

impl ScanItem {
	pub fn new(path: impl Into<PathBuf>, recursive: bool) -> Self {
		Self {
			path: path.into(),
			recursive,
			..Default::default()
		}
	}

	#[must_use]
	pub const fn throttled(mut self) -> Self {
		self.throttle = true;
		self
	}

	/// Requests thumbnails for files even when they didn't change
	#[must_use]
	pub const fn with_thumbnail_check(mut self) -> Self {
		self.force_thumbnail_check = true;
		self
	}

	#[must_use]
	pub const fn forced(mut self) -> Self {
		self.force_scan = true;
		self
	}
}

/// Pending directory scans, at most one per path.
///
/// Live, non-recursive requests jump the line so the index reacts to changes
/// while a full crawl is still in progress.
#[derive(Debug, Default)]
pub struct ScanQueue {
	items: VecDeque<ScanItem>,
}

impl ScanQueue {
	/// Returns `false` when the path already waits in the queue
	pub fn push(&mut self, item: ScanItem) -> bool {
		if self.items.iter().any(|queued| queued.path == item.path) {
			return false;
		}

		if item.recursive {
			self.items.push_back(item);
		} else {
			self.items.push_front(item);
		}

		true
	}

	pub fn pop(&mut self) -> Option<ScanItem> {
		self.items.pop_front()
	}

	pub fn clear(&mut self) -> usize {
		let cleared = self.items.len();
		self.items.clear();
		cleared
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.items.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use pretty_assertions::assert_eq;

	#[test]
	fn live_requests_go_first_and_paths_are_unique() {
		let mut queue = ScanQueue::default();

		assert!(queue.push(ScanItem::new("/a", true)));
		assert!(queue.push(ScanItem::new("/b", true)));
		assert!(queue.push(ScanItem::new("/c", false)));
		assert!(!queue.push(ScanItem::new("/a", false)));

		let order = std::iter::from_fn(|| queue.pop())
			.map(|item| item.path)
			.collect::<Vec<_>>();

		assert_eq!(
			order,
			vec![PathBuf::from("/c"), PathBuf::from("/a"), PathBuf::from("/b")]
		);
	}
}
