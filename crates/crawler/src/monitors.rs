use std::{
	collections::HashMap,
	fmt,
	path::{Path, PathBuf},
};

use tracing::{debug, trace, warn};

/// Receives non-recursive per-directory watch requests
pub trait DirWatcher: Send {
	fn watch(&mut self, path: &Path) -> Result<(), notify::Error>;
	fn unwatch(&mut self, path: &Path) -> Result<(), notify::Error>;
}

/// Directories the crawler keeps an eye on.
///
/// An entry is either backed by a live watch or only covered by periodic
/// rescans (no watcher available, watch registration failed, symlinked dirs).
#[derive(Default)]
pub struct MonitorList {
	// path -> backed by a live watch
	items: HashMap<PathBuf, bool>,
	nfs_items: Vec<PathBuf>,
	watcher: Option<Box<dyn DirWatcher>>,
}

impl fmt::Debug for MonitorList {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MonitorList")
			.field("items", &self.items)
			.field("nfs_items", &self.nfs_items)
			.field("uses_notify", &self.uses_notify())
			.finish()
	}
}

impl MonitorList {
	#[must_use]
	pub fn new(watcher: Option<Box<dyn DirWatcher>>) -> Self {
		Self {
			watcher,
			..Default::default()
		}
	}

	#[must_use]
	pub fn uses_notify(&self) -> bool {
		self.watcher.is_some()
	}

	/// Starts monitoring `path`, returns `false` if it already was
	pub fn add(&mut self, path: &Path) -> bool {
		if self.items.contains_key(path) {
			return false;
		}

		if is_network_fs(path) {
			self.add_nfs(path);
		}

		let watched = self.watcher.as_mut().map_or(false, |watcher| {
			watcher
				.watch(path)
				.map_err(|e| warn!(?e, path = %path.display(), "Failed to watch directory, falling back to polling;"))
				.is_ok()
		});

		trace!(path = %path.display(), watched, "Monitoring directory;");
		self.items.insert(path.to_path_buf(), watched);

		true
	}

	/// Monitors `path` through rescans only
	pub fn add_polled(&mut self, path: &Path) -> bool {
		if self.items.contains_key(path) {
			return false;
		}
		self.items.insert(path.to_path_buf(), false);
		true
	}

	// only the top-most network directory is rescanned
	fn add_nfs(&mut self, path: &Path) {
		if self.nfs_items.iter().any(|nfs| path.starts_with(nfs)) {
			return;
		}
		self.nfs_items.retain(|nfs| !nfs.starts_with(path));
		debug!(path = %path.display(), "Directory lives on a network filesystem;");
		self.nfs_items.push(path.to_path_buf());
	}

	/// Drops `path` and everything monitored below it, returns how many entries went away
	pub fn remove(&mut self, path: &Path) -> usize {
		let removed = self
			.items
			.keys()
			.filter(|item| item.starts_with(path))
			.cloned()
			.collect::<Vec<_>>();

		for item in &removed {
			if self.items.remove(item) == Some(true) {
				self.unwatch(item);
			}
		}
		self.nfs_items.retain(|nfs| !nfs.starts_with(path));

		if !removed.is_empty() {
			trace!(path = %path.display(), count = removed.len(), "Stopped monitoring;");
		}

		removed.len()
	}

	fn unwatch(&mut self, path: &Path) {
		if let Some(watcher) = self.watcher.as_mut() {
			if let Err(e) = watcher.unwatch(path) {
				// the directory is usually gone already
				trace!(?e, path = %path.display(), "Failed to unwatch directory;");
			}
		}
	}

	#[must_use]
	pub fn contains(&self, path: &Path) -> bool {
		self.items.contains_key(path)
	}

	#[must_use]
	pub fn is_watched(&self, path: &Path) -> bool {
		self.items.get(path).copied().unwrap_or_default()
	}

	#[must_use]
	pub fn nfs_items(&self) -> &[PathBuf] {
		&self.nfs_items
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.items.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	#[must_use]
	pub fn paths(&self) -> Vec<PathBuf> {
		let mut paths = self.items.keys().cloned().collect::<Vec<_>>();
		paths.sort();
		paths
	}

	/// Forgets every entry, unwatching the live ones
	pub fn reset(&mut self) {
		let watched = self
			.items
			.drain()
			.filter_map(|(path, watched)| watched.then_some(path))
			.collect::<Vec<_>>();

		for path in &watched {
			self.unwatch(path);
		}
		self.nfs_items.clear();
	}
}

const NFS_SUPER_MAGIC: u32 = 0x6969;
const SMB_SUPER_MAGIC: u32 = 0x517B;
const CIFS_MAGIC_NUMBER: u32 = 0xFF53_4D42;

#[cfg(target_os = "linux")]
#[must_use]
pub fn is_network_fs(path: &Path) -> bool {
	use std::{ffi::CString, mem::MaybeUninit, os::unix::ffi::OsStrExt};

	let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
		return false;
	};

	let mut stat = MaybeUninit::<libc::statfs>::uninit();
	// SAFETY: `c_path` is NUL terminated and `stat` is only read after a successful call
	if unsafe { libc::statfs(c_path.as_ptr(), stat.as_mut_ptr()) } != 0 {
		return false;
	}
	// SAFETY: statfs returned 0 so the struct is initialized
	let stat = unsafe { stat.assume_init() };

	#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
	let magic = stat.f_type as u32;

	matches!(magic, NFS_SUPER_MAGIC | SMB_SUPER_MAGIC | CIFS_MAGIC_NUMBER)
}

#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn is_network_fs(_path: &Path) -> bool {
	false
}
