//! Upload orchestrator.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use upqueue_core::JobId;
use upqueue_store::{Job, JobState, JobStats, JobStore, JobStoreError};

use crate::config::UploaderConfig;
use crate::error::UploadError;
use crate::lock;
use crate::registry::{Registration, Release, RequestRegistry};
use crate::submission::{DoneFn, ProgressFn, Submission, UploadHandle};
use crate::transport::{ProgressReporter, TransportError, UploadTransport};

/// Process-wide hook fired for every failed upload, including re-drives.
pub type FailureCallback = Arc<dyn Fn(&JobId, &UploadError) + Send + Sync>;

/// Process-wide hook fired for every completed upload, including re-drives.
pub type CompletionCallback<R> = Arc<dyn Fn(&JobId, &R) + Send + Sync>;

/// Drives queued jobs through the transport.
///
/// Cheap to clone; clones share one store, one registry and one set of hooks.
/// Must be created inside a Tokio runtime; transport calls and retry timers
/// are spawned on that runtime, and store writes run on its blocking pool.
/// Dropping the last clone shuts the uploader down.
pub struct Uploader<T: UploadTransport> {
    inner: Arc<Inner<T>>,
    _owner: Arc<Owner<T>>,
}

impl<T: UploadTransport> Clone for Uploader<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _owner: Arc::clone(&self._owner),
        }
    }
}

/// Shared by every `Uploader` clone; spawned tasks never hold one.
struct Owner<T: UploadTransport> {
    inner: Weak<Inner<T>>,
}

impl<T: UploadTransport> Drop for Owner<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.shutdown();
        }
    }
}

struct Inner<T: UploadTransport> {
    name: String,
    store: Mutex<JobStore>,
    registry: RequestRegistry,
    transport: T,
    retry_delay: Duration,
    max_in_flight: usize,
    runtime: Handle,
    shutdown: watch::Sender<bool>,
    /// Retry timers still waiting.
    redrives: AtomicUsize,
    on_failure: RwLock<Option<FailureCallback>>,
    on_complete: RwLock<Option<CompletionCallback<T::Receipt>>>,
}

impl<T: UploadTransport> Uploader<T> {
    pub fn new(store: JobStore, transport: T, config: UploaderConfig) -> Result<Self, UploadError> {
        let runtime = Handle::try_current().map_err(|_| UploadError::NoRuntime)?;
        let (shutdown, _) = watch::channel(false);

        info!(
            uploader = %config.name,
            path = %store.path().display(),
            jobs = store.len(),
            max_in_flight = config.max_in_flight,
            "uploader ready"
        );

        let inner = Arc::new(Inner {
            name: config.name,
            store: Mutex::new(store),
            registry: RequestRegistry::new(),
            transport,
            retry_delay: config.retry_delay,
            max_in_flight: config.max_in_flight.max(1),
            runtime,
            shutdown,
            redrives: AtomicUsize::new(0),
            on_failure: RwLock::new(None),
            on_complete: RwLock::new(None),
        });
        let owner = Arc::new(Owner {
            inner: Arc::downgrade(&inner),
        });

        Ok(Self {
            inner,
            _owner: owner,
        })
    }

    /// Open the store described by `config` and build an uploader on it.
    ///
    /// Jobs left `Processing` by a previous run come back as `Pending`; call
    /// `upload_pending_jobs` to start draining them.
    pub fn open(config: UploaderConfig, transport: T) -> Result<Self, UploadError> {
        let store = JobStore::open(&config.store)?;
        Self::new(store, transport, config)
    }

    /// Queue a payload and start uploading it right away.
    ///
    /// Replaces any job with the same id and cancels its outstanding call.
    /// Validation and persistence failures are returned here and never reach
    /// `on_done`. Writes the payload before returning; async callers that
    /// must not block a worker use `submit_async`.
    pub fn submit(&self, submission: Submission<T::Receipt>) -> Result<UploadHandle, UploadError> {
        if self.is_shut_down() {
            return Err(UploadError::Shutdown);
        }
        submission.validate()?;

        let Submission {
            job_id,
            payload,
            on_progress,
            on_done,
        } = submission;

        let registration = {
            let mut store = lock(&self.inner.store);
            store.enqueue(&job_id, &payload)?;
            self.inner.registry.register(&job_id)
        };

        info!(
            uploader = %self.inner.name,
            job_id = %job_id,
            bytes = payload.len(),
            "upload submitted"
        );

        let handle = UploadHandle::new(job_id.clone(), registration.token.clone());
        self.inner
            .spawn_upload(job_id, payload, registration, on_progress, on_done);
        Ok(handle)
    }

    /// `submit` on the runtime's blocking pool.
    pub async fn submit_async(
        &self,
        submission: Submission<T::Receipt>,
    ) -> Result<UploadHandle, UploadError> {
        let uploader = self.clone();
        join_blocking(
            self.inner
                .runtime
                .spawn_blocking(move || uploader.submit(submission)),
        )
        .await
    }

    /// Cancel any outstanding call for `id` and drop the job with its payload.
    ///
    /// Unknown ids are not an error. Never waits for the transport.
    pub fn delete(&self, id: &JobId) -> Result<(), UploadError> {
        let mut store = lock(&self.inner.store);
        let cancelled = self.inner.registry.cancel(id);
        store.remove(id, true)?;
        info!(uploader = %self.inner.name, job_id = %id, cancelled, "job deleted");
        Ok(())
    }

    /// `delete` on the runtime's blocking pool.
    pub async fn delete_async(&self, id: &JobId) -> Result<(), UploadError> {
        let uploader = self.clone();
        let id = id.clone();
        join_blocking(
            self.inner
                .runtime
                .spawn_blocking(move || uploader.delete(&id)),
        )
        .await
    }

    /// Start calls for queued jobs until `max_in_flight` are outstanding.
    ///
    /// Returns how many calls were started; zero when nothing is waiting.
    pub fn upload_pending_jobs(&self) -> usize {
        self.inner.upload_pending_jobs()
    }

    /// True when no job is waiting or uploading.
    pub fn has_uploaded_all(&self) -> bool {
        lock(&self.inner.store).has_all_completed()
    }

    pub fn set_failure_callback<F>(&self, f: F)
    where
        F: Fn(&JobId, &UploadError) + Send + Sync + 'static,
    {
        *self
            .inner
            .on_failure
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(f));
    }

    pub fn set_completion_callback<F>(&self, f: F)
    where
        F: Fn(&JobId, &T::Receipt) + Send + Sync + 'static,
    {
        *self
            .inner
            .on_complete
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(f));
    }

    pub fn job(&self, id: &JobId) -> Option<Job> {
        lock(&self.inner.store).get(id)
    }

    /// Every job, oldest first.
    pub fn jobs(&self) -> Vec<Job> {
        lock(&self.inner.store).all_jobs()
    }

    pub fn stats(&self) -> JobStats {
        lock(&self.inner.store).stats()
    }

    /// Ids with an outstanding transport call.
    pub fn in_flight(&self) -> Vec<JobId> {
        self.inner.registry.ids()
    }

    pub fn is_uploading(&self, id: &JobId) -> bool {
        self.inner.registry.contains(id)
    }

    /// Retry timers waiting to re-drive the queue.
    pub fn scheduled_redrives(&self) -> usize {
        self.inner.redrives.load(Ordering::Relaxed)
    }

    /// Stop retry timers and cancel every outstanding call.
    ///
    /// Cancelled jobs go back to `Pending` on disk. Later `submit` calls fail
    /// with `UploadError::Shutdown`. Calling this twice is harmless.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }
}

impl<T: UploadTransport> Inner<T> {
    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        let cancelled = self.registry.cancel_all();
        info!(uploader = %self.name, cancelled, "uploader shut down");
    }

    /// Run store work on the blocking pool.
    fn blocking<F>(self: &Arc<Self>, f: F)
    where
        F: FnOnce(&Arc<Self>) + Send + 'static,
    {
        let inner = Arc::clone(self);
        self.runtime.spawn_blocking(move || f(&inner));
    }

    fn spawn_upload(
        self: &Arc<Self>,
        id: JobId,
        payload: Vec<u8>,
        registration: Registration,
        on_progress: Option<ProgressFn>,
        on_done: Option<DoneFn<T::Receipt>>,
    ) {
        let progress = {
            let weak = Arc::downgrade(self);
            let id = id.clone();
            let generation = registration.generation;
            let marked = AtomicBool::new(false);
            ProgressReporter::new(move |fraction| {
                if !marked.swap(true, Ordering::Relaxed) {
                    if let Some(inner) = weak.upgrade() {
                        let id = id.clone();
                        inner.blocking(move |inner| inner.record_progress(&id, generation));
                    }
                }
                if let Some(f) = &on_progress {
                    f(fraction);
                }
            })
        };

        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            let Registration { generation, token } = registration;
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(TransportError::Cancelled),
                result = inner.transport.send(&id, payload, progress) => result,
            };
            inner.blocking(move |inner| inner.settle(id, generation, result, on_done));
        });
    }

    /// First progress report of a call moves its job to `Processing`.
    fn record_progress(&self, id: &JobId, generation: u64) {
        let mut store = lock(&self.store);
        if !self.registry.is_current(id, generation) {
            return;
        }
        match store.get(id).map(|job| job.state) {
            Some(JobState::Pending) => {
                if let Err(e) = store.update_state(id, JobState::Processing) {
                    warn!(job_id = %id, error = %e, "failed to mark job processing");
                }
            }
            Some(JobState::Processing) => {}
            Some(JobState::Complete) => {
                debug!(job_id = %id, "progress for completed job ignored");
            }
            None => {
                debug!(job_id = %id, "progress for removed job ignored");
            }
        }
    }

    fn settle(
        self: &Arc<Self>,
        id: JobId,
        generation: u64,
        result: Result<T::Receipt, TransportError>,
        on_done: Option<DoneFn<T::Receipt>>,
    ) {
        let mut store = lock(&self.store);
        if self.registry.release(&id, generation) == Release::Superseded {
            drop(store);
            debug!(job_id = %id, generation, "superseded call finished");
            notify(on_done, result.map_err(UploadError::from));
            return;
        }

        match result {
            Ok(receipt) => {
                let outcome = store
                    .get(&id)
                    .map(|_| store.update_state(&id, JobState::Complete));
                drop(store);
                match outcome {
                    Some(updated) => self.finish_success(id, receipt, updated, on_done),
                    None => {
                        let error = UploadError::NotFound(id.clone());
                        let recorded = Err(JobStoreError::NotFound(id.clone()));
                        self.finish_failure(id, error, recorded, on_done);
                    }
                }
            }
            Err(e) => {
                let error = UploadError::from(e);
                let recorded = store.record_failure(&id, &error.to_string());
                drop(store);
                self.finish_failure(id, error, recorded, on_done);
            }
        }
    }

    fn finish_success(
        self: &Arc<Self>,
        id: JobId,
        receipt: T::Receipt,
        updated: Result<Job, JobStoreError>,
        on_done: Option<DoneFn<T::Receipt>>,
    ) {
        let persisted = match updated {
            Ok(_) => {
                info!(uploader = %self.name, job_id = %id, "upload complete");
                true
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "upload succeeded but completion was not persisted");
                false
            }
        };

        notify(on_done, Ok(receipt.clone()));
        if let Some(hook) = read_hook(&self.on_complete) {
            hook(&id, &receipt);
        }

        if persisted {
            self.upload_pending_jobs();
        } else {
            self.schedule_redrive(self.retry_delay);
        }
    }

    fn finish_failure(
        self: &Arc<Self>,
        id: JobId,
        error: UploadError,
        recorded: Result<Job, JobStoreError>,
        on_done: Option<DoneFn<T::Receipt>>,
    ) {
        let removed = matches!(recorded, Err(JobStoreError::NotFound(_)));
        match recorded {
            Ok(_) => warn!(uploader = %self.name, job_id = %id, error = %error, "upload failed"),
            Err(JobStoreError::NotFound(_)) => {
                debug!(job_id = %id, error = %error, "upload ended for removed job")
            }
            Err(e) => error!(job_id = %id, error = %e, "failed to record upload failure"),
        }

        // Nothing left to retry for a removed job.
        if !removed {
            self.schedule_redrive(self.retry_delay);
        }

        notify(on_done, Err(error.clone()));
        if let Some(hook) = read_hook(&self.on_failure) {
            hook(&id, &error);
        }
    }

    /// Run `upload_pending_jobs` after `delay`, unless shut down first.
    fn schedule_redrive(self: &Arc<Self>, delay: Duration) {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return;
        }

        self.redrives.fetch_add(1, Ordering::Relaxed);
        let weak: Weak<Self> = Arc::downgrade(self);
        debug!(uploader = %self.name, delay_secs = delay.as_secs(), "re-drive scheduled");
        self.runtime.spawn(async move {
            let fired = tokio::select! {
                _ = tokio::time::sleep(delay) => true,
                _ = shutdown.changed() => false,
            };
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.redrives.fetch_sub(1, Ordering::Relaxed);
            if fired {
                inner.blocking(|inner| {
                    inner.upload_pending_jobs();
                });
            }
        });
    }

    fn upload_pending_jobs(self: &Arc<Self>) -> usize {
        let mut started = 0;
        loop {
            if self.is_shut_down() {
                break;
            }

            let next = {
                let store = lock(&self.store);
                if self.registry.len() >= self.max_in_flight {
                    None
                } else {
                    store
                        .next_pending_job_excluding(Utc::now(), |id| self.registry.contains(id))
                        .map(|(job, payload)| {
                            let registration = self.registry.register(&job.id);
                            (job, payload, registration)
                        })
                }
            };
            let Some((job, payload, registration)) = next else {
                break;
            };

            debug!(
                uploader = %self.name,
                job_id = %job.id,
                state = %job.state,
                "re-driving job"
            );
            self.spawn_upload(job.id, payload, registration, None, None);
            started += 1;
        }
        started
    }
}

fn notify<R>(on_done: Option<DoneFn<R>>, result: Result<R, UploadError>) {
    if let Some(f) = on_done {
        f(result);
    }
}

async fn join_blocking<R>(handle: JoinHandle<Result<R, UploadError>>) -> Result<R, UploadError> {
    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Err(UploadError::Shutdown),
    }
}

fn read_hook<H: Clone>(slot: &RwLock<Option<H>>) -> Option<H> {
    slot.read().unwrap_or_else(PoisonError::into_inner).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::sync::{Notify, oneshot};
    use upqueue_store::StoreConfig;

    struct Gated {
        gate: Arc<Notify>,
    }

    #[async_trait::async_trait]
    impl UploadTransport for Gated {
        type Receipt = ();

        async fn send(
            &self,
            _job_id: &JobId,
            _payload: Vec<u8>,
            _progress: ProgressReporter,
        ) -> Result<(), TransportError> {
            self.gate.notified().await;
            Ok(())
        }
    }

    fn id(s: &str) -> JobId {
        JobId::new(s).unwrap()
    }

    fn uploader(dir: &TempDir, gate: Arc<Notify>) -> Uploader<Gated> {
        let config = UploaderConfig::default().with_store(StoreConfig::new(dir.path(), "test"));
        Uploader::open(config, Gated { gate }).unwrap()
    }

    #[test]
    fn new_outside_runtime_fails() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(&StoreConfig::new(dir.path(), "test")).unwrap();
        let gated = Gated {
            gate: Arc::new(Notify::new()),
        };
        assert!(matches!(
            Uploader::new(store, gated, UploaderConfig::default()),
            Err(UploadError::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn success_for_a_removed_job_reports_not_found() {
        let dir = TempDir::new().unwrap();
        let gate = Arc::new(Notify::new());
        let uploader = uploader(&dir, gate.clone());

        let (tx, rx) = oneshot::channel();
        uploader
            .submit(Submission::try_new("a", b"x".to_vec()).unwrap().on_done(move |r| {
                let _ = tx.send(r);
            }))
            .unwrap();

        // Remove the record behind the registry's back.
        lock(&uploader.inner.store).remove(&id("a"), true).unwrap();
        gate.notify_one();

        let result = rx.await.unwrap();
        assert!(matches!(result, Err(UploadError::NotFound(ref job)) if job == &id("a")));
        assert!(uploader.job(&id("a")).is_none());
        assert!(uploader.in_flight().is_empty());
        assert_eq!(uploader.scheduled_redrives(), 0);
    }

    #[tokio::test]
    async fn progress_never_reopens_a_completed_job() {
        let dir = TempDir::new().unwrap();
        let uploader = uploader(&dir, Arc::new(Notify::new()));

        {
            let mut store = lock(&uploader.inner.store);
            store.enqueue(&id("a"), b"x").unwrap();
            store.update_state(&id("a"), JobState::Complete).unwrap();
        }
        let registration = uploader.inner.registry.register(&id("a"));

        uploader.inner.record_progress(&id("a"), registration.generation);
        assert_eq!(uploader.job(&id("a")).unwrap().state, JobState::Complete);
    }

    #[tokio::test]
    async fn progress_from_a_stale_generation_is_ignored() {
        let dir = TempDir::new().unwrap();
        let uploader = uploader(&dir, Arc::new(Notify::new()));

        lock(&uploader.inner.store).enqueue(&id("a"), b"x").unwrap();
        let old = uploader.inner.registry.register(&id("a"));
        let _new = uploader.inner.registry.register(&id("a"));

        uploader.inner.record_progress(&id("a"), old.generation);
        assert_eq!(uploader.job(&id("a")).unwrap().state, JobState::Pending);
    }
}
