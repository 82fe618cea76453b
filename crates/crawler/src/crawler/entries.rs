use std::{
	collections::BTreeMap,
	fs::Metadata,
	io,
	path::{Path, PathBuf},
	time::UNIX_EPOCH,
};

use sd_object_db::{AttrDef, AttrFlags, ValueKind};
use sd_utils::{error::FileIOError, is_hidden_name};
use tokio::fs;
use tracing::{trace, warn};

use crate::error::Error;

pub const DIR_TYPE: &str = "dir";
pub const FILE_TYPE: &str = "file";

/// Directories holding this file don't get their known subdirectories crawled
pub const NO_CRAWL_MARKER: &str = ".sd-no-crawl";

pub fn dir_attrs() -> BTreeMap<String, AttrDef> {
	BTreeMap::from([
		(
			"name".to_string(),
			AttrDef::new(ValueKind::Str, AttrFlags::INDEXED | AttrFlags::KEYWORDS_FILENAME),
		),
		("last_crawl".to_string(), AttrDef::simple(ValueKind::Int)),
	])
}

pub fn file_attrs() -> BTreeMap<String, AttrDef> {
	BTreeMap::from([(
		"name".to_string(),
		AttrDef::new(ValueKind::Str, AttrFlags::INDEXED | AttrFlags::KEYWORDS_FILENAME),
	)])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
	pub name: String,
	pub path: PathBuf,
	pub is_dir: bool,
	pub is_symlink: bool,
	/// Unix seconds
	pub mtime: i64,
	pub size: i64,
}

impl Entry {
	pub const fn type_name(&self) -> &'static str {
		if self.is_dir {
			DIR_TYPE
		} else {
			FILE_TYPE
		}
	}

	pub async fn from_path(path: &Path, name: String) -> Result<Option<Self>, FileIOError> {
		let link_metadata = match fs::symlink_metadata(path).await {
			Ok(metadata) => metadata,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(FileIOError::from((path, e))),
		};

		let is_symlink = link_metadata.is_symlink();
		let metadata = if is_symlink {
			match fs::metadata(path).await {
				Ok(metadata) => metadata,
				Err(e) => {
					// dangling link
					trace!(?e, path = %path.display(), "Skipping unresolvable symlink;");
					return Ok(None);
				}
			}
		} else {
			link_metadata
		};

		Ok(Some(Self {
			name,
			path: path.to_path_buf(),
			is_dir: metadata.is_dir(),
			is_symlink,
			mtime: mtime_of(&metadata),
			size: size_of(&metadata),
		}))
	}
}

fn mtime_of(metadata: &Metadata) -> i64 {
	metadata
		.modified()
		.ok()
		.and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
		.and_then(|since| i64::try_from(since.as_secs()).ok())
		.unwrap_or_default()
}

fn size_of(metadata: &Metadata) -> i64 {
	if metadata.is_dir() {
		0
	} else {
		i64::try_from(metadata.len()).unwrap_or(i64::MAX)
	}
}

/// Live, name-sorted listing of `path` without hidden entries.
///
/// `None` means `path` vanished or isn't a directory anymore. The boolean
/// tells whether the no-crawl marker was present.
pub async fn list_dir(path: &Path) -> Result<Option<(Vec<Entry>, bool)>, Error> {
	let mut read_dir = match fs::read_dir(path).await {
		Ok(read_dir) => read_dir,
		Err(e) => {
			if e.kind() == io::ErrorKind::NotFound || !is_dir(path).await {
				trace!(path = %path.display(), "Directory went away before listing;");
				return Ok(None);
			}
			return Err(FileIOError::with_context(path, e, "reading directory").into());
		}
	};

	let mut entries = vec![];
	let mut no_crawl = false;

	while let Some(dir_entry) = read_dir
		.next_entry()
		.await
		.map_err(|e| FileIOError::with_context(path, e, "reading directory entry"))?
	{
		let file_name = dir_entry.file_name();
		if file_name == NO_CRAWL_MARKER {
			no_crawl = true;
		}
		if is_hidden_name(&file_name) {
			continue;
		}

		let Some(name) = file_name.to_str().map(str::to_owned) else {
			warn!(path = %dir_entry.path().display(), "Skipping entry with a non UTF-8 name;");
			continue;
		};

		if let Some(entry) = Entry::from_path(&dir_entry.path(), name).await? {
			entries.push(entry);
		}
	}

	entries.sort_by(|a, b| a.name.cmp(&b.name));

	Ok(Some((entries, no_crawl)))
}

async fn is_dir(path: &Path) -> bool {
	fs::metadata(path)
		.await
		.map_or(false, |metadata| metadata.is_dir())
}

#[cfg(test)]
mod tests {
	use super::*;

	use pretty_assertions::assert_eq;
	use tempfile::tempdir;

	#[tokio::test]
	async fn listing_is_sorted_and_skips_hidden_entries() {
		let dir = tempdir().unwrap();
		std::fs::write(dir.path().join("b.txt"), b"bb").unwrap();
		std::fs::write(dir.path().join(".secret"), b"").unwrap();
		std::fs::create_dir(dir.path().join("a")).unwrap();

		let (entries, no_crawl) = list_dir(dir.path()).await.unwrap().unwrap();

		assert!(!no_crawl);
		assert_eq!(
			entries
				.iter()
				.map(|entry| (entry.name.as_str(), entry.is_dir, entry.size))
				.collect::<Vec<_>>(),
			vec![("a", true, 0), ("b.txt", false, 2)]
		);
	}

	#[tokio::test]
	async fn marker_is_reported() {
		let dir = tempdir().unwrap();
		std::fs::write(dir.path().join(NO_CRAWL_MARKER), b"").unwrap();

		let (entries, no_crawl) = list_dir(dir.path()).await.unwrap().unwrap();
		assert!(entries.is_empty());
		assert!(no_crawl);
	}

	#[tokio::test]
	async fn vanished_or_non_directory_targets_list_as_none() {
		let dir = tempdir().unwrap();
		let file = dir.path().join("plain");
		std::fs::write(&file, b"").unwrap();

		assert!(list_dir(&dir.path().join("gone")).await.unwrap().is_none());
		assert!(list_dir(&file).await.unwrap().is_none());
	}
}
