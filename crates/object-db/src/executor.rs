use std::{
	collections::BTreeMap,
	future::Future,
	mem,
	panic::{self, AssertUnwindSafe},
	pin::Pin,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	task::{Context, Poll},
	thread,
	time::Duration,
};

use async_channel as chan;
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use tokio::{
	runtime::Handle,
	sync::{oneshot, watch},
	time::sleep,
};
use tracing::{debug, error, trace, warn};

use crate::{
	error::Error,
	schema::AttrDef,
	search::SearchStats,
	store::{BatchReport, Change, ObjectRef, ObjectStore, Query, Record},
	value::Attrs,
};

type Job = Box<dyn FnOnce(&mut ObjectStore) + Send>;

pin_project! {
	/// Resolves with the result of a job once the worker ran it
	#[must_use = "job handles do nothing unless awaited"]
	pub struct JobHandle<T> {
		#[pin]
		rx: oneshot::Receiver<Result<T, Error>>,
	}
}

impl<T> Future for JobHandle<T> {
	type Output = Result<T, Error>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		self.project()
			.rx
			.poll(cx)
			.map(|res| res.unwrap_or_else(|_| Err(Error::ExecutorShutdown)))
	}
}

struct Inner {
	jobs_tx: chan::Sender<Job>,
	pending: Mutex<Vec<Change>>,
	flush_scheduled: AtomicBool,
	flush_delay: Duration,
	// number of submitted batches not yet committed
	batches_tx: watch::Sender<usize>,
}

/// Cloneable handle to the single database worker.
///
/// Jobs run strictly in submission order on a dedicated thread that owns the
/// only connection to the store.
#[derive(Clone)]
pub struct DbHandle {
	inner: Arc<Inner>,
}

impl DbHandle {
	pub fn spawn(mut store: ObjectStore, flush_delay: Duration) -> Result<Self, Error> {
		let (jobs_tx, jobs_rx) = chan::unbounded::<Job>();

		thread::Builder::new()
			.name("sd-object-db".into())
			.spawn(move || {
				debug!("Database worker started;");
				while let Ok(job) = jobs_rx.recv_blocking() {
					job(&mut store);
				}
				debug!("Database worker shut down;");
			})
			.map_err(Error::WorkerSpawn)?;

		let (batches_tx, _) = watch::channel(0);

		Ok(Self {
			inner: Arc::new(Inner {
				jobs_tx,
				pending: Mutex::new(vec![]),
				flush_scheduled: AtomicBool::new(false),
				flush_delay,
				batches_tx,
			}),
		})
	}

	/// Queues `job` behind everything submitted before it
	pub fn run<T, F>(&self, job: F) -> JobHandle<T>
	where
		T: Send + 'static,
		F: FnOnce(&mut ObjectStore) -> Result<T, Error> + Send + 'static,
	{
		let (tx, rx) = oneshot::channel();

		let job: Job = Box::new(move |store| {
			let res = panic::catch_unwind(AssertUnwindSafe(|| job(store))).unwrap_or_else(|_| {
				error!("Database job panicked;");
				Err(Error::JobPanicked)
			});

			if tx.send(res).is_err() {
				trace!("Job handle dropped before the job finished;");
			}
		});

		if self.inner.jobs_tx.try_send(job).is_err() {
			warn!("Tried to submit a job to a shut down database worker;");
		}

		JobHandle { rx }
	}

	/// Stops accepting jobs, the worker exits after draining the queue
	pub fn shutdown(&self) {
		self.inner.jobs_tx.close();
	}

	/// Buffers a change for the next batch flush without touching the worker
	pub fn stage(&self, change: Change) {
		self.inner.pending.lock().push(change);

		if self.inner.flush_scheduled.swap(true, Ordering::AcqRel) {
			return;
		}

		if let Ok(runtime) = Handle::try_current() {
			let this = self.clone();
			runtime.spawn(async move {
				sleep(this.inner.flush_delay).await;
				if let Err(e) = this.flush().await {
					error!(?e, "Failed to flush staged changes;");
				}
			});
		} else {
			// no runtime to drive a delayed flush, an explicit flush is needed
			self.inner.flush_scheduled.store(false, Ordering::Release);
		}
	}

	#[must_use]
	pub fn pending_changes(&self) -> usize {
		self.inner.pending.lock().len()
	}

	/// Drops every staged change, returning how many were discarded
	pub fn discard_pending(&self) -> usize {
		let discarded = mem::take(&mut *self.inner.pending.lock()).len();
		if discarded > 0 {
			debug!(discarded, "Discarded staged changes;");
		}
		discarded
	}

	/// Commits staged changes as one batch.
	///
	/// The store reports itself locked from now until the batch committed.
	pub fn flush(&self) -> JobHandle<BatchReport> {
		self.inner.flush_scheduled.store(false, Ordering::Release);
		let changes = mem::take(&mut *self.inner.pending.lock());

		if changes.is_empty() {
			return self.run(|_| Ok(BatchReport::default()));
		}

		self.inner.batches_tx.send_modify(|batches| *batches += 1);
		let unlock = BatchGuard(Arc::clone(&self.inner));

		self.run(move |store| {
			let _unlock = unlock;
			store.apply_batch(changes)
		})
	}

	#[must_use]
	pub fn is_locked(&self) -> bool {
		*self.inner.batches_tx.borrow() > 0
	}

	/// Waits until no staged batch is being committed
	pub async fn wait_unlocked(&self) {
		let mut rx = self.inner.batches_tx.subscribe();
		if rx.wait_for(|batches| *batches == 0).await.is_err() {
			trace!("Lock watcher closed while waiting;");
		}
	}

	pub async fn register_type(
		&self,
		type_name: impl Into<String>,
		attrs: BTreeMap<String, AttrDef>,
	) -> Result<bool, Error> {
		let type_name = type_name.into();
		self.run(move |store| store.register_type(&type_name, attrs))
			.await
	}

	pub async fn add(
		&self,
		type_name: impl Into<String>,
		name: impl Into<String>,
		parent: Option<ObjectRef>,
		attrs: Attrs,
	) -> Result<Record, Error> {
		let (type_name, name) = (type_name.into(), name.into());
		self.run(move |store| store.add(&type_name, &name, parent.as_ref(), attrs))
			.await
	}

	pub async fn update(
		&self,
		object: ObjectRef,
		parent: Option<ObjectRef>,
		name: Option<String>,
		attrs: Attrs,
	) -> Result<Record, Error> {
		self.run(move |store| store.update(&object, parent.as_ref(), name.as_deref(), attrs))
			.await
	}

	pub async fn delete(&self, object: ObjectRef) -> Result<(), Error> {
		self.run(move |store| store.delete(&object)).await
	}

	pub async fn change_type(
		&self,
		object: ObjectRef,
		type_name: impl Into<String>,
	) -> Result<Record, Error> {
		let type_name = type_name.into();
		self.run(move |store| store.change_type(&object, &type_name))
			.await
	}

	pub async fn get(&self, object: ObjectRef) -> Result<Option<Record>, Error> {
		self.run(move |store| store.get(&object)).await
	}

	pub async fn query(&self, query: Query) -> Result<Vec<Record>, Error> {
		self.run(move |store| store.query(&query)).await
	}

	pub async fn children(&self, parent: ObjectRef) -> Result<Vec<Record>, Error> {
		self.run(move |store| store.children(&parent)).await
	}

	pub async fn lookup(
		&self,
		parent: Option<ObjectRef>,
		name: impl Into<String>,
	) -> Result<Option<Record>, Error> {
		let name = name.into();
		self.run(move |store| store.lookup(parent.as_ref(), &name))
			.await
	}

	pub async fn keyword_search(
		&self,
		text: impl Into<String>,
		type_name: Option<String>,
		limit: Option<usize>,
	) -> Result<(Vec<(ObjectRef, f64)>, SearchStats), Error> {
		let text = text.into();
		self.run(move |store| store.keyword_search(&text, type_name.as_deref(), limit))
			.await
	}
}

/// Releases one batch lock when the batch job ends, even by panicking
struct BatchGuard(Arc<Inner>);

impl Drop for BatchGuard {
	fn drop(&mut self) {
		self.0
			.batches_tx
			.send_modify(|batches| *batches = batches.saturating_sub(1));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use crate::attrs;

	use std::sync::atomic::AtomicUsize;

	use tracing_test::traced_test;

	fn handle() -> DbHandle {
		DbHandle::spawn(
			ObjectStore::open_in_memory().expect("open"),
			Duration::from_millis(10),
		)
		.expect("spawn")
	}

	#[tokio::test]
	async fn jobs_complete_in_submission_order() {
		let db = handle();
		let order = Arc::new(Mutex::new(vec![]));

		let handles = (0..32)
			.map(|i| {
				let order = Arc::clone(&order);
				db.run(move |_| {
					order.lock().push(i);
					Ok(i)
				})
			})
			.collect::<Vec<_>>();

		// awaiting in reverse doesn't change execution order
		for (i, handle) in handles.into_iter().enumerate().rev() {
			assert_eq!(handle.await.expect("job"), i);
		}
		assert_eq!(*order.lock(), (0..32).collect::<Vec<_>>());
	}

	#[tokio::test]
	#[traced_test]
	async fn errors_and_panics_reach_the_handle() {
		let db = handle();

		let failed = db.run(|store| store.delete(&ObjectRef::new("dir", 1))).await;
		assert!(matches!(failed, Err(Error::UnknownType(_))));

		let panicked = db.run::<(), _>(|_| panic!("boom")).await;
		assert!(matches!(panicked, Err(Error::JobPanicked)));
		assert!(logs_contain("Database job panicked"));

		// worker survived
		assert_eq!(db.run(|_| Ok(7)).await.expect("job"), 7);
	}

	#[tokio::test]
	async fn shutdown_resolves_later_jobs_with_an_error() {
		let db = handle();
		db.shutdown();

		assert!(matches!(db.run(|_| Ok(())).await, Err(Error::ExecutorShutdown)));
	}

	#[tokio::test]
	async fn staged_changes_flush_by_themselves() {
		let db = handle();
		db.register_type("note", BTreeMap::new()).await.expect("register");

		for name in ["a", "b", "c"] {
			db.stage(Change::Add {
				type_name: "note".into(),
				name: name.into(),
				parent: None,
				attrs: attrs! { "size" => 1_i64 },
			});
		}
		assert_eq!(db.pending_changes(), 3);

		let mut found = vec![];
		for _ in 0..100 {
			found = db.query(Query::new().of_type("note")).await.expect("query");
			if found.len() == 3 {
				break;
			}
			sleep(Duration::from_millis(10)).await;
		}

		assert_eq!(found.len(), 3);
		assert_eq!(db.pending_changes(), 0);
	}

	#[tokio::test]
	async fn flush_holds_the_write_lock_until_commit() {
		let db = handle();
		db.register_type("note", BTreeMap::new()).await.expect("register");

		let gate = Arc::new(std::sync::Barrier::new(2));
		let blocker = db.run({
			let gate = Arc::clone(&gate);
			move |_| {
				gate.wait();
				Ok(())
			}
		});

		db.stage(Change::Add {
			type_name: "note".into(),
			name: "a".into(),
			parent: None,
			attrs: attrs! {},
		});
		let batch = db.flush();
		assert!(db.is_locked());

		let waiters = Arc::new(AtomicUsize::new(0));
		let waiter = tokio::spawn({
			let db = db.clone();
			let waiters = Arc::clone(&waiters);
			async move {
				db.wait_unlocked().await;
				waiters.fetch_add(1, Ordering::SeqCst);
			}
		});

		sleep(Duration::from_millis(20)).await;
		assert_eq!(waiters.load(Ordering::SeqCst), 0);

		tokio::task::spawn_blocking(move || gate.wait())
			.await
			.expect("gate");
		blocker.await.expect("blocker");

		assert_eq!(batch.await.expect("batch").applied, 1);
		waiter.await.expect("waiter");
		assert!(!db.is_locked());
		assert_eq!(waiters.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn discarded_changes_never_reach_the_store() {
		let db = handle();
		db.register_type("note", BTreeMap::new()).await.expect("register");

		db.stage(Change::Add {
			type_name: "note".into(),
			name: "a".into(),
			parent: None,
			attrs: attrs! {},
		});
		assert_eq!(db.discard_pending(), 1);

		assert_eq!(db.flush().await.expect("flush"), BatchReport::default());
		assert!(db.query(Query::new()).await.expect("query").is_empty());
	}
}
