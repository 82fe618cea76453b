//! Detection of files that keep being written to.
//!
//! A file modified twice inside one polling window is considered growing:
//! its modify events are swallowed until the window closes, then replayed
//! once through [`BurstDetector::poll`].

use std::{
	collections::HashMap,
	path::{Path, PathBuf},
};

use parking_lot::Mutex;

const THUMBNAIL_EVERY: u32 = 10;

#[derive(Debug, Default)]
struct Bursts {
	// path -> seen more than once during the current window
	growing: HashMap<PathBuf, bool>,
	thumbnails: HashMap<PathBuf, u32>,
}

#[derive(Debug, Default)]
pub struct BurstDetector {
	state: Mutex<Bursts>,
}

impl BurstDetector {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Records a modification, returning whether the file was already seen in this window
	pub fn is_growing(&self, path: &Path) -> bool {
		let mut state = self.state.lock();
		match state.growing.get_mut(path) {
			Some(growing) => {
				*growing = true;
				true
			}
			None => {
				state.growing.insert(path.to_path_buf(), false);
				false
			}
		}
	}

	pub fn remove(&self, path: &Path) {
		let mut state = self.state.lock();
		state.growing.remove(path);
		state.thumbnails.remove(path);
	}

	/// Growing files get a thumbnail once every few requests
	pub fn should_thumbnail(&self, path: &Path) -> bool {
		let mut state = self.state.lock();
		if !state.growing.get(path).copied().unwrap_or_default() {
			state.thumbnails.remove(path);
			return true;
		}

		let Some(count) = state.thumbnails.get_mut(path) else {
			state.thumbnails.insert(path.to_path_buf(), 0);
			return true;
		};
		*count += 1;

		*count % THUMBNAIL_EVERY == 0
	}

	/// Closes the window, returning the files whose events were swallowed
	pub fn poll(&self) -> Vec<PathBuf> {
		let growing = std::mem::take(&mut self.state.lock().growing);

		let mut swallowed = growing
			.into_iter()
			.filter_map(|(path, growing)| growing.then_some(path))
			.collect::<Vec<_>>();
		swallowed.sort();

		swallowed
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use pretty_assertions::assert_eq;

	#[test]
	fn second_modification_marks_growth() {
		let bursts = BurstDetector::new();
		let log = Path::new("/var/log/app.log");

		assert!(!bursts.is_growing(log));
		assert!(bursts.is_growing(log));
		assert!(bursts.is_growing(log));

		assert_eq!(bursts.poll(), vec![log.to_path_buf()]);
		// new window
		assert!(!bursts.is_growing(log));
	}

	#[test]
	fn single_modifications_are_not_replayed() {
		let bursts = BurstDetector::new();
		assert!(!bursts.is_growing(Path::new("/tmp/once")));
		assert!(bursts.poll().is_empty());
	}

	#[test]
	fn growing_files_are_thumbnailed_sparingly() {
		let bursts = BurstDetector::new();
		let video = Path::new("/home/me/capture.mkv");

		assert!(bursts.should_thumbnail(video));
		bursts.is_growing(video);
		bursts.is_growing(video);

		let allowed = (1..=30)
			.filter(|_| bursts.should_thumbnail(video))
			.collect::<Vec<_>>();
		assert_eq!(allowed, vec![1, 11, 21]);

		bursts.remove(video);
		assert!(bursts.should_thumbnail(video));
	}
}
