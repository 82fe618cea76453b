#![allow(dead_code)]

use std::{
	collections::BTreeSet,
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use async_channel as chan;
use parking_lot::Mutex;
use sd_crawler::{Crawler, CrawlerConfig, DirWatcher, SchedulerConfig, SchedulerPolicy};
use sd_object_db::{DbHandle, ObjectStore, Record};
use tempfile::TempDir;

/// Remembers which directories are currently watched
#[derive(Debug, Clone, Default)]
pub struct FakeWatcher {
	pub watched: Arc<Mutex<BTreeSet<PathBuf>>>,
}

impl FakeWatcher {
	pub fn watched(&self) -> Vec<PathBuf> {
		self.watched.lock().iter().cloned().collect()
	}
}

impl DirWatcher for FakeWatcher {
	fn watch(&mut self, path: &Path) -> Result<(), notify::Error> {
		self.watched.lock().insert(path.to_path_buf());
		Ok(())
	}

	fn unwatch(&mut self, path: &Path) -> Result<(), notify::Error> {
		self.watched.lock().remove(path);
		Ok(())
	}
}

pub fn config() -> CrawlerConfig {
	CrawlerConfig {
		scheduler: SchedulerConfig {
			policy: SchedulerPolicy::Aggressive,
			..Default::default()
		},
		flush_delay_ms: 10,
		..Default::default()
	}
}

pub fn db() -> DbHandle {
	DbHandle::spawn(
		ObjectStore::open_in_memory().unwrap(),
		Duration::from_millis(10),
	)
	.unwrap()
}

pub struct Fixture {
	pub dir: TempDir,
	pub root: PathBuf,
	pub crawler: Crawler,
	pub watcher: FakeWatcher,
	pub thumbnails: chan::Receiver<PathBuf>,
}

impl Fixture {
	/// Watched crawler over a fresh directory tree, `files` are created
	/// before crawling
	pub async fn new(files: &[&str]) -> Self {
		let dir = tempfile::tempdir().unwrap();
		let root = dir.path().canonicalize().unwrap();
		for file in files {
			write(&root.join(file), b"content");
		}

		let watcher = FakeWatcher::default();
		let (thumbnails_tx, thumbnails) = chan::unbounded();
		let crawler = Crawler::new(
			db(),
			config(),
			Some(Box::new(watcher.clone())),
			Some(thumbnails_tx),
		)
		.await
		.unwrap();

		Self {
			dir,
			root,
			crawler,
			watcher,
			thumbnails,
		}
	}

	pub async fn crawl(&self) {
		self.crawler.append(&self.root).await.unwrap();
		self.crawler.wait_idle().await;
	}

	pub fn path(&self, relative: &str) -> PathBuf {
		if relative.is_empty() {
			self.root.clone()
		} else {
			self.root.join(relative)
		}
	}

	pub async fn get(&self, relative: &str) -> Option<Record> {
		self.crawler.resolve(&self.path(relative)).await.unwrap()
	}

	/// Sorted names stored below `relative`
	pub async fn names(&self, relative: &str) -> Vec<String> {
		let dir = self.get(relative).await.unwrap();
		self.crawler
			.db()
			.children(dir.object)
			.await
			.unwrap()
			.into_iter()
			.map(|record| record.name)
			.collect()
	}

	pub fn drain_thumbnails(&self) -> Vec<PathBuf> {
		std::iter::from_fn(|| self.thumbnails.try_recv().ok()).collect()
	}
}

/// Writes a file, creating missing parent directories
pub fn write(path: &Path, content: &[u8]) {
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent).unwrap();
	}
	std::fs::write(path, content).unwrap();
}
