//! File-backed job store.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use upqueue_core::JobId;

use crate::config::StoreConfig;
use crate::error::JobStoreError;
use crate::layout::StoreLayout;
use crate::types::{Job, JobState, JobStats};

/// Durable table of upload jobs plus their payload blobs.
///
/// All records are held in memory and written through to disk before any
/// mutating call returns. One instance owns a namespace; two stores over the
/// same directory interleave unpredictably.
#[derive(Debug)]
pub struct JobStore {
    layout: StoreLayout,
    stale_after: Duration,
    jobs: HashMap<JobId, Job>,
}

impl JobStore {
    /// Open (or create) the store described by `config`.
    ///
    /// Fails only when the namespace is invalid. Unreadable records are
    /// skipped, and every job left in `Processing` by a previous run is reset
    /// to `Pending`: a transfer from a dead process cannot be told apart from
    /// one still running, so it is assumed dead.
    pub fn open(config: &StoreConfig) -> Result<Self, JobStoreError> {
        let layout = StoreLayout::new(&config.root, &config.namespace)?;
        if let Err(e) = layout.ensure_dirs() {
            warn!(path = ?layout.base(), error = %e, "failed to create store directories");
        }

        let mut store = Self {
            layout,
            stale_after: config.stale_after,
            jobs: HashMap::new(),
        };
        store.load();
        store.recover_interrupted();

        info!(
            path = ?store.layout.base(),
            jobs = store.jobs.len(),
            "job store opened"
        );
        Ok(store)
    }

    fn load(&mut self) {
        let files = match self.layout.record_files() {
            Ok(files) => files,
            Err(e) => {
                warn!(path = ?self.layout.jobs_dir(), error = %e, "failed to list job records");
                return;
            }
        };

        for path in files {
            match self.layout.read_record(&path) {
                Ok(job) => {
                    self.jobs.insert(job.id.clone(), job);
                }
                Err(e) => warn!(error = ?e, "skipping unreadable job record"),
            }
        }
    }

    fn recover_interrupted(&mut self) {
        let now = Utc::now();
        for job in self.jobs.values_mut() {
            if job.state != JobState::Processing {
                continue;
            }
            job.set_state(JobState::Pending, now);
            if let Err(e) = self.layout.write_record(job) {
                // Memory already says Pending; the next write of this job fixes the disk.
                warn!(job_id = %job.id, error = %e, "failed to persist recovered job");
            } else {
                info!(job_id = %job.id, "reset interrupted job to pending");
            }
        }
    }

    /// Directory holding this namespace.
    pub fn path(&self) -> &Path {
        self.layout.base()
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Queue `payload` under `id`, replacing any existing job with that id.
    ///
    /// The payload is written first. If either write fails the previous
    /// payload is put back and nothing changes. The prior record (if any) is
    /// replaced by a fresh `Pending` one stamped now.
    pub fn enqueue(&mut self, id: &JobId, payload: &[u8]) -> Result<Job, JobStoreError> {
        let previous = self.payload(id);
        self.layout.write_payload(id, payload)?;

        let job = Job::new(id.clone(), Utc::now());
        if let Err(e) = self.layout.write_record(&job) {
            self.restore_payload(id, previous);
            return Err(e);
        }

        let replaced = self.jobs.insert(id.clone(), job.clone()).is_some();
        debug!(job_id = %id, bytes = payload.len(), replaced, "job enqueued");
        Ok(job)
    }

    fn restore_payload(&self, id: &JobId, previous: Option<Vec<u8>>) {
        let restored = match previous {
            Some(bytes) => self.layout.write_payload(id, &bytes),
            None => self.layout.remove_payload(id),
        };
        if let Err(e) = restored {
            warn!(job_id = %id, error = %e, "failed to restore payload after aborted enqueue");
        }
    }

    /// `enqueue` for a raw id, validating it first.
    pub fn enqueue_str(&mut self, id: &str, payload: &[u8]) -> Result<Job, JobStoreError> {
        let id = JobId::new(id)?;
        self.enqueue(&id, payload)
    }

    /// Move a job to `state` and persist it.
    pub fn update_state(&mut self, id: &JobId, state: JobState) -> Result<Job, JobStoreError> {
        let current = self
            .jobs
            .get(id)
            .ok_or_else(|| JobStoreError::NotFound(id.clone()))?;

        if !current.state.can_transition_to(state) {
            return Err(JobStoreError::InvalidTransition {
                id: id.clone(),
                from: current.state,
                to: state,
            });
        }

        let mut updated = current.clone();
        updated.set_state(state, Utc::now());
        self.persist(updated)
    }

    /// Record a failed transfer: back to `Pending` with the error stamped.
    ///
    /// Never creates a record; a job removed mid-flight stays removed.
    pub fn record_failure(&mut self, id: &JobId, error: &str) -> Result<Job, JobStoreError> {
        let current = self
            .jobs
            .get(id)
            .ok_or_else(|| JobStoreError::NotFound(id.clone()))?;

        if !current.state.can_transition_to(JobState::Pending) {
            return Err(JobStoreError::InvalidTransition {
                id: id.clone(),
                from: current.state,
                to: JobState::Pending,
            });
        }

        let mut updated = current.clone();
        updated.mark_failed(error, Utc::now());
        self.persist(updated)
    }

    fn persist(&mut self, job: Job) -> Result<Job, JobStoreError> {
        self.layout.write_record(&job)?;
        debug!(job_id = %job.id, state = %job.state, "job updated");
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.jobs.get(id).cloned()
    }

    /// Payload blob for `id`, if present on disk.
    pub fn payload(&self, id: &JobId) -> Option<Vec<u8>> {
        match self.layout.read_payload(id) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(job_id = %id, error = %e, "failed to read payload");
                None
            }
        }
    }

    /// Remove the record for `id` (no-op if absent) and, if asked, its
    /// payload whether or not a record existed.
    pub fn remove(&mut self, id: &JobId, delete_payload: bool) -> Result<(), JobStoreError> {
        self.layout.remove_record(id)?;
        let existed = self.jobs.remove(id).is_some();
        if delete_payload {
            self.layout.remove_payload(id)?;
        }
        debug!(job_id = %id, existed, delete_payload, "job removed");
        Ok(())
    }

    /// The oldest job in any state, with its payload.
    ///
    /// `None` when the store is empty or the oldest job's payload is gone.
    pub fn next_job(&self) -> Option<(Job, Vec<u8>)> {
        let oldest = self.jobs.values().min_by(|a, b| a.fifo_key().cmp(&b.fifo_key()))?;
        let payload = self.payload(&oldest.id)?;
        Some((oldest.clone(), payload))
    }

    /// The next job to upload, judged against the current time.
    pub fn next_pending_job(&self) -> Option<(Job, Vec<u8>)> {
        self.next_pending_job_at(Utc::now())
    }

    /// The next job to upload as of `now`.
    ///
    /// The oldest `Pending` job wins; failing that, the oldest `Processing`
    /// job whose transfer started more than `stale_after` ago. Candidates
    /// without a payload on disk are passed over.
    pub fn next_pending_job_at(&self, now: DateTime<Utc>) -> Option<(Job, Vec<u8>)> {
        self.next_pending_job_excluding(now, |_| false)
    }

    /// `next_pending_job_at`, ignoring jobs for which `skip` returns true.
    pub fn next_pending_job_excluding<F>(
        &self,
        now: DateTime<Utc>,
        skip: F,
    ) -> Option<(Job, Vec<u8>)>
    where
        F: Fn(&JobId) -> bool,
    {
        let pending = self.sorted(|j| j.state == JobState::Pending && !skip(&j.id));
        let stale = self.sorted(|j| j.is_stale(now, self.stale_after) && !skip(&j.id));

        pending.into_iter().chain(stale).find_map(|job| match self.payload(&job.id) {
            Some(payload) => Some((job.clone(), payload)),
            None => {
                warn!(job_id = %job.id, "queued job has no payload; passing over");
                None
            }
        })
    }

    fn sorted<F>(&self, keep: F) -> Vec<&Job>
    where
        F: Fn(&Job) -> bool,
    {
        let mut jobs: Vec<_> = self.jobs.values().filter(|j| keep(j)).collect();
        jobs.sort_by(|a, b| a.fifo_key().cmp(&b.fifo_key()));
        jobs
    }

    /// Every job, oldest first.
    pub fn all_jobs(&self) -> Vec<Job> {
        self.sorted(|_| true).into_iter().cloned().collect()
    }

    /// True when no job is `Pending` or `Processing`.
    pub fn has_all_completed(&self) -> bool {
        !self.jobs.values().any(|j| j.state.is_outstanding())
    }

    pub fn stats(&self) -> JobStats {
        let mut stats = JobStats::default();
        for job in self.jobs.values() {
            match job.state {
                JobState::Pending => stats.pending += 1,
                JobState::Processing => stats.processing += 1,
                JobState::Complete => stats.complete += 1,
            }
        }
        stats
    }
}
