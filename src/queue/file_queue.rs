//! Durable job queue backed by one JSON file per job.
//!
//! Layout under the queue root:
//!
//! - `pending/` jobs waiting for a consumer, named `<enqueued nanos>-<job id>.json` so a
//!   lexical listing is FIFO order.
//! - `inflight/` jobs leased by a consumer. A consumer claims a job by renaming it out of
//!   `pending/` into a hidden `.claim-<claimed nanos>-<token>-<name>` file, stamps the lease,
//!   and only then publishes it as `inflight/<name>`. Two processes can never lease the same
//!   file, and a half-finished claim is never mistaken for an expired lease.
//! - `completed/` acknowledged jobs, kept for status lookups.
//! - `dead/` jobs removed from the retry cycle.
//!
//! Records are written to a dot-prefixed temporary file, synced, then renamed into place;
//! listings skip dot-files. A lease that is neither acknowledged nor released within the
//! visibility timeout (a crashed worker, a dropped [`JobLease`]) is moved back to `pending/`
//! by the next consumer that looks for work. A claim file left behind by a consumer that died
//! mid-claim goes back to `pending/` once it is older than the visibility timeout (and never
//! sooner than `MIN_CLAIM_AGE`).

use super::types::{IngestionJob, JobId, JobStatus, QueueDepths, QueueError, QueueOptions, QueuedJob};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

const CLAIM_PREFIX: &str = ".claim-";

/// Youngest age at which an abandoned claim file is recovered, whatever the visibility timeout.
const MIN_CLAIM_AGE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Pending,
    InFlight,
    Completed,
    Dead,
}

impl Slot {
    const ALL: [Slot; 4] = [Slot::Pending, Slot::InFlight, Slot::Completed, Slot::Dead];

    fn dir_name(self) -> &'static str {
        match self {
            Slot::Pending => "pending",
            Slot::InFlight => "inflight",
            Slot::Completed => "completed",
            Slot::Dead => "dead",
        }
    }
}

/// Exclusive claim on a delivered job.
///
/// Holding a lease occupies one in-flight permit. Settle it with [`FileJobQueue::ack`],
/// [`FileJobQueue::retry`] or [`FileJobQueue::dead_letter`]; dropping it instead leaves the
/// job leased until the visibility timeout expires.
#[derive(Debug)]
pub struct JobLease {
    record: QueuedJob,
    file_name: String,
    token: Uuid,
    _permit: OwnedSemaphorePermit,
}

impl JobLease {
    /// Identifier assigned at enqueue time.
    pub fn id(&self) -> JobId {
        self.record.id
    }

    /// The delivered job.
    pub fn job(&self) -> &IngestionJob {
        &self.record.job
    }

    /// Delivery count, including this one.
    pub fn attempts(&self) -> u32 {
        self.record.attempts
    }
}

/// File-backed at-least-once job queue with bounded in-flight deliveries.
pub struct FileJobQueue {
    root: PathBuf,
    options: QueueOptions,
    permits: Arc<Semaphore>,
    notify: Notify,
    closed: AtomicBool,
}

impl FileJobQueue {
    /// Open (creating if needed) the queue rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>, options: QueueOptions) -> Result<Self, QueueError> {
        let root = root.into();
        for slot in Slot::ALL {
            let dir = root.join(slot.dir_name());
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|source| QueueError::io(&dir, source))?;
        }
        tracing::debug!(
            root = %root.display(),
            max_in_flight = options.max_in_flight,
            visibility_timeout_secs = options.visibility_timeout.as_secs(),
            max_attempts = options.max_attempts,
            "Opened job queue"
        );
        Ok(Self {
            permits: Arc::new(Semaphore::new(options.max_in_flight.max(1))),
            root,
            options,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Delivery policy in effect.
    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    /// Durably record `job` and return its id. Does not wait for processing.
    pub async fn enqueue(&self, job: IngestionJob) -> Result<JobId, QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        let id = Uuid::new_v4();
        let file_name = format!(
            "{:024}-{id}.json",
            job.enqueued_at.unix_timestamp_nanos().max(0)
        );
        let record = QueuedJob {
            id,
            attempts: 0,
            job,
            last_error: None,
            leased_at: None,
            lease_token: None,
        };
        self.persist(Slot::Pending, &file_name, &record).await?;
        tracing::info!(job_id = %id, filename = %record.job.filename, "Job enqueued");
        self.notify.notify_one();
        Ok(id)
    }

    /// Wait for the next job. Suspends while the in-flight limit is reached or nothing is pending.
    pub async fn dequeue(&self) -> Result<JobLease, QueueError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| QueueError::Closed)?;
        let mut permit = Some(permit);

        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(QueueError::Closed);
            }
            let notified = self.notify.notified();
            self.reclaim_expired().await?;
            if let Some(held) = permit.take() {
                match self.claim_next(held).await? {
                    Ok(lease) => return Ok(lease),
                    Err(returned) => permit = Some(returned),
                }
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(self.options.poll_interval) => {}
            }
        }
    }

    /// Claim the next job without waiting; `None` when at the in-flight limit or idle.
    pub async fn try_dequeue(&self) -> Result<Option<JobLease>, QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            return Ok(None);
        };
        self.reclaim_expired().await?;
        Ok(self.claim_next(permit).await?.ok())
    }

    /// Mark the job processed.
    pub async fn ack(&self, lease: JobLease) -> Result<(), QueueError> {
        self.verify_lease(&lease).await?;
        self.rename(Slot::InFlight, Slot::Completed, &lease.file_name)
            .await
            .map_err(|error| lost_on_missing(error, lease.id()))?;
        tracing::debug!(job_id = %lease.id(), attempts = lease.attempts(), "Job acknowledged");
        Ok(())
    }

    /// Return the job for redelivery, or dead-letter it once `max_attempts` deliveries failed.
    pub async fn retry(&self, lease: JobLease, error: &str) -> Result<JobStatus, QueueError> {
        if lease.attempts() >= self.options.max_attempts {
            tracing::warn!(
                job_id = %lease.id(),
                attempts = lease.attempts(),
                max_attempts = self.options.max_attempts,
                "Retry budget exhausted"
            );
            return self.dead_letter(lease, error).await;
        }

        let mut record = self.verify_lease(&lease).await?;
        record.last_error = Some(error.to_string());
        record.leased_at = None;
        record.lease_token = None;
        self.persist(Slot::InFlight, &lease.file_name, &record).await?;
        self.rename(Slot::InFlight, Slot::Pending, &lease.file_name)
            .await
            .map_err(|error| lost_on_missing(error, lease.id()))?;
        self.notify.notify_one();
        Ok(JobStatus::Pending {
            attempts: record.attempts,
        })
    }

    /// Remove the job from the retry cycle.
    pub async fn dead_letter(&self, lease: JobLease, error: &str) -> Result<JobStatus, QueueError> {
        let mut record = self.verify_lease(&lease).await?;
        record.last_error = Some(error.to_string());
        record.leased_at = None;
        record.lease_token = None;
        self.persist(Slot::InFlight, &lease.file_name, &record).await?;
        self.rename(Slot::InFlight, Slot::Dead, &lease.file_name)
            .await
            .map_err(|error| lost_on_missing(error, lease.id()))?;
        Ok(JobStatus::DeadLettered {
            attempts: record.attempts,
            error: record.last_error,
        })
    }

    /// Move every dead-lettered job back to pending with a fresh retry budget.
    pub async fn requeue_dead(&self) -> Result<usize, QueueError> {
        let mut moved = 0;
        for file_name in self.list(Slot::Dead).await? {
            let mut record = self.read(Slot::Dead, &file_name).await?;
            record.attempts = 0;
            self.persist(Slot::Dead, &file_name, &record).await?;
            match self.rename(Slot::Dead, Slot::Pending, &file_name).await {
                Ok(()) => moved += 1,
                Err(QueueError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => return Err(error),
            }
        }
        if moved > 0 {
            tracing::info!(jobs = moved, "Requeued dead-lettered jobs");
            self.notify.notify_one();
        }
        Ok(moved)
    }

    /// Current status of job `id`, or `None` when the queue has never seen it.
    pub async fn status(&self, id: JobId) -> Result<Option<JobStatus>, QueueError> {
        let suffix = format!("-{id}.json");
        // The record can move between listing and reading; another pass finds it.
        for _ in 0..3 {
            match self.find_status(&suffix).await {
                Err(QueueError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => continue,
                other => return other,
            }
        }
        self.find_status(&suffix).await
    }

    async fn find_status(&self, suffix: &str) -> Result<Option<JobStatus>, QueueError> {
        if let Some(claim) = self
            .list_claims()
            .await?
            .into_iter()
            .find(|name| name.ends_with(suffix))
        {
            let record = self.read(Slot::InFlight, &claim).await?;
            return Ok(Some(JobStatus::InFlight {
                attempts: record.attempts + 1,
            }));
        }
        for slot in Slot::ALL {
            let Some(file_name) = self
                .list(slot)
                .await?
                .into_iter()
                .find(|name| name.ends_with(suffix))
            else {
                continue;
            };
            if slot == Slot::Completed {
                return Ok(Some(JobStatus::Completed));
            }
            let record = self.read(slot, &file_name).await?;
            let status = match slot {
                Slot::Pending => JobStatus::Pending {
                    attempts: record.attempts,
                },
                Slot::InFlight => JobStatus::InFlight {
                    attempts: record.attempts,
                },
                _ => JobStatus::DeadLettered {
                    attempts: record.attempts,
                    error: record.last_error,
                },
            };
            return Ok(Some(status));
        }
        Ok(None)
    }

    /// Number of jobs in each state.
    pub async fn depths(&self) -> Result<QueueDepths, QueueError> {
        Ok(QueueDepths {
            pending: self.list(Slot::Pending).await?.len(),
            in_flight: self.list(Slot::InFlight).await?.len(),
            completed: self.list(Slot::Completed).await?.len(),
            dead: self.list(Slot::Dead).await?.len(),
        })
    }

    /// Stop delivering jobs; pending and blocked `dequeue` calls return [`QueueError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.permits.close();
        self.notify.notify_waiters();
    }

    /// Whether [`FileJobQueue::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn claim_next(
        &self,
        permit: OwnedSemaphorePermit,
    ) -> Result<Result<JobLease, OwnedSemaphorePermit>, QueueError> {
        for file_name in self.list(Slot::Pending).await? {
            // Another consumer won the race for this file.
            let Some(claim) = self.begin_claim(&file_name).await? else {
                continue;
            };
            let Some((record, token)) = self.finish_claim(&file_name, &claim).await? else {
                continue;
            };

            tracing::debug!(
                job_id = %record.id,
                filename = %record.job.filename,
                attempt = record.attempts,
                "Job leased"
            );
            return Ok(Ok(JobLease {
                record,
                file_name,
                token,
                _permit: permit,
            }));
        }
        Ok(Err(permit))
    }

    /// Move `pending/<file_name>` to a hidden claim file. `None` when the job is already gone.
    async fn begin_claim(&self, file_name: &str) -> Result<Option<String>, QueueError> {
        let claim = claim_name(OffsetDateTime::now_utc(), file_name);
        let source_path = self.path(Slot::Pending, file_name);
        match tokio::fs::rename(&source_path, self.path(Slot::InFlight, &claim)).await {
            Ok(()) => Ok(Some(claim)),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(QueueError::io(&source_path, source)),
        }
    }

    /// Stamp the claimed record with a fresh lease and publish it as `inflight/<file_name>`.
    async fn finish_claim(
        &self,
        file_name: &str,
        claim: &str,
    ) -> Result<Option<(QueuedJob, Uuid)>, QueueError> {
        let mut record = match self.read(Slot::InFlight, claim).await {
            Ok(record) => record,
            Err(QueueError::Serialization(error)) => {
                tracing::error!(file = %file_name, error = %error, "Unreadable job record moved to dead letters");
                let claim_path = self.path(Slot::InFlight, claim);
                tokio::fs::rename(&claim_path, self.path(Slot::Dead, file_name))
                    .await
                    .map_err(|source| QueueError::io(&claim_path, source))?;
                return Ok(None);
            }
            Err(QueueError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(error) => return Err(error),
        };

        let token = Uuid::new_v4();
        record.attempts += 1;
        record.leased_at = Some(OffsetDateTime::now_utc());
        record.lease_token = Some(token);
        self.persist(Slot::InFlight, file_name, &record).await?;

        let claim_path = self.path(Slot::InFlight, claim);
        match tokio::fs::remove_file(&claim_path).await {
            Ok(()) => Ok(Some((record, token))),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                // The claim outlived its recovery age and was handed back to `pending/`.
                let _ = tokio::fs::remove_file(self.path(Slot::InFlight, file_name)).await;
                tracing::warn!(job_id = %record.id, "Claim recovered before it was published");
                Ok(None)
            }
            Err(source) => Err(QueueError::io(&claim_path, source)),
        }
    }

    async fn recover_abandoned_claims(&self, now: OffsetDateTime) -> Result<(), QueueError> {
        let max_age = self.options.visibility_timeout.max(MIN_CLAIM_AGE);
        for claim in self.list_claims().await? {
            let Some((claimed_at, file_name)) = parse_claim(&claim) else {
                continue;
            };
            if now - claimed_at < max_age {
                continue;
            }
            let claim_path = self.path(Slot::InFlight, &claim);
            let published = tokio::fs::try_exists(self.path(Slot::InFlight, file_name))
                .await
                .unwrap_or(false);
            let outcome = if published {
                tokio::fs::remove_file(&claim_path).await
            } else {
                tokio::fs::rename(&claim_path, self.path(Slot::Pending, file_name)).await
            };
            match outcome {
                Ok(()) => {
                    tracing::warn!(file = %file_name, published, "Recovered abandoned claim");
                    if !published {
                        self.notify.notify_one();
                    }
                }
                Err(source) if source.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(QueueError::io(&claim_path, source)),
            }
        }
        Ok(())
    }

    async fn reclaim_expired(&self) -> Result<(), QueueError> {
        let now = OffsetDateTime::now_utc();
        self.recover_abandoned_claims(now).await?;
        for file_name in self.list(Slot::InFlight).await? {
            let record = match self.read(Slot::InFlight, &file_name).await {
                Ok(record) => record,
                Err(QueueError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => continue,
                Err(QueueError::Serialization(_)) => continue,
                Err(error) => return Err(error),
            };
            let leased_at = match record.leased_at {
                Some(leased_at) => leased_at,
                None => self.modified_at(Slot::InFlight, &file_name).await,
            };
            if now - leased_at < self.options.visibility_timeout {
                continue;
            }

            let target = if record.attempts >= self.options.max_attempts {
                Slot::Dead
            } else {
                Slot::Pending
            };
            match self.rename(Slot::InFlight, target, &file_name).await {
                Ok(()) => {}
                Err(QueueError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => continue,
                Err(error) => return Err(error),
            }
            let (job_id, attempts) = (record.id, record.attempts);
            if target == Slot::Dead {
                let mut record = record;
                record.last_error = Some(format!("lease expired after {attempts} deliveries"));
                record.leased_at = None;
                record.lease_token = None;
                self.persist(Slot::Dead, &file_name, &record).await?;
            }
            tracing::warn!(
                job_id = %job_id,
                attempts,
                to = target.dir_name(),
                "Reclaimed expired lease"
            );
        }
        Ok(())
    }

    async fn verify_lease(&self, lease: &JobLease) -> Result<QueuedJob, QueueError> {
        match self.read(Slot::InFlight, &lease.file_name).await {
            Ok(record) if record.lease_token == Some(lease.token) => Ok(record),
            Ok(_) => Err(QueueError::LeaseLost(lease.id())),
            Err(error) => Err(lost_on_missing(error, lease.id())),
        }
    }

    fn path(&self, slot: Slot, file_name: &str) -> PathBuf {
        self.root.join(slot.dir_name()).join(file_name)
    }

    async fn list(&self, slot: Slot) -> Result<Vec<String>, QueueError> {
        self.list_where(slot, |name| !name.starts_with('.') && name.ends_with(".json"))
            .await
    }

    async fn list_claims(&self) -> Result<Vec<String>, QueueError> {
        self.list_where(Slot::InFlight, |name| name.starts_with(CLAIM_PREFIX))
            .await
    }

    async fn list_where(&self, slot: Slot, keep: impl Fn(&str) -> bool) -> Result<Vec<String>, QueueError> {
        let dir = self.root.join(slot.dir_name());
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|source| QueueError::io(&dir, source))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| QueueError::io(&dir, source))?
        {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if keep(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn read(&self, slot: Slot, file_name: &str) -> Result<QueuedJob, QueueError> {
        let path = self.path(slot, file_name);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| QueueError::io(&path, source))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn persist(&self, slot: Slot, file_name: &str, record: &QueuedJob) -> Result<(), QueueError> {
        let target = self.path(slot, file_name);
        let temp = self
            .root
            .join(slot.dir_name())
            .join(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));
        let bytes = serde_json::to_vec_pretty(record)?;

        let mut file = tokio::fs::File::create(&temp)
            .await
            .map_err(|source| QueueError::io(&temp, source))?;
        file.write_all(&bytes)
            .await
            .map_err(|source| QueueError::io(&temp, source))?;
        file.sync_all()
            .await
            .map_err(|source| QueueError::io(&temp, source))?;
        drop(file);

        tokio::fs::rename(&temp, &target)
            .await
            .map_err(|source| QueueError::io(&target, source))
    }

    async fn rename(&self, from: Slot, to: Slot, file_name: &str) -> Result<(), QueueError> {
        let source_path = self.path(from, file_name);
        tokio::fs::rename(&source_path, self.path(to, file_name))
            .await
            .map_err(|source| QueueError::io(&source_path, source))
    }

    async fn modified_at(&self, slot: Slot, file_name: &str) -> OffsetDateTime {
        let modified = tokio::fs::metadata(self.path(slot, file_name))
            .await
            .and_then(|metadata| metadata.modified())
            .unwrap_or_else(|_| SystemTime::now());
        OffsetDateTime::from(modified)
    }
}

fn claim_name(claimed_at: OffsetDateTime, file_name: &str) -> String {
    format!(
        "{CLAIM_PREFIX}{:024}-{}-{file_name}",
        claimed_at.unix_timestamp_nanos().max(0),
        Uuid::new_v4().simple()
    )
}

/// Split a claim file name into its claim time and the job's file name.
fn parse_claim(claim: &str) -> Option<(OffsetDateTime, &str)> {
    let rest = claim.strip_prefix(CLAIM_PREFIX)?;
    let (nanos, rest) = rest.split_once('-')?;
    let (_token, file_name) = rest.split_once('-')?;
    let claimed_at = OffsetDateTime::from_unix_timestamp_nanos(nanos.parse().ok()?).ok()?;
    file_name.ends_with(".json").then_some((claimed_at, file_name))
}

fn lost_on_missing(error: QueueError, id: JobId) -> QueueError {
    match error {
        QueueError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
            QueueError::LeaseLost(id)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options() -> QueueOptions {
        QueueOptions {
            max_in_flight: 1,
            visibility_timeout: Duration::from_secs(60),
            max_attempts: 2,
            poll_interval: Duration::from_millis(20),
        }
    }

    async fn queue(dir: &TempDir, options: QueueOptions) -> FileJobQueue {
        FileJobQueue::open(dir.path().join("queue"), options)
            .await
            .expect("open queue")
    }

    #[tokio::test]
    async fn enqueue_dequeue_ack_reaches_completed() {
        let dir = TempDir::new().expect("tempdir");
        let queue = queue(&dir, options()).await;

        let id = queue
            .enqueue(IngestionJob::new("a.pdf", "/tmp/a.pdf"))
            .await
            .expect("enqueue");
        assert_eq!(
            queue.status(id).await.expect("status"),
            Some(JobStatus::Pending { attempts: 0 })
        );

        let lease = queue.dequeue().await.expect("dequeue");
        assert_eq!(lease.id(), id);
        assert_eq!(lease.job().filename, "a.pdf");
        assert_eq!(lease.attempts(), 1);
        assert_eq!(
            queue.status(id).await.expect("status"),
            Some(JobStatus::InFlight { attempts: 1 })
        );

        queue.ack(lease).await.expect("ack");
        assert_eq!(queue.status(id).await.expect("status"), Some(JobStatus::Completed));
        assert_eq!(
            queue.depths().await.expect("depths"),
            QueueDepths {
                completed: 1,
                ..QueueDepths::default()
            }
        );
    }

    #[tokio::test]
    async fn delivers_in_enqueue_order() {
        let dir = TempDir::new().expect("tempdir");
        let queue = queue(&dir, options()).await;
        let first = IngestionJob::new("first.pdf", "/tmp/first.pdf");
        let mut second = IngestionJob::new("second.pdf", "/tmp/second.pdf");
        second.enqueued_at = first.enqueued_at + time::Duration::milliseconds(5);

        queue.enqueue(second).await.expect("enqueue second");
        queue.enqueue(first).await.expect("enqueue first");

        let lease = queue.dequeue().await.expect("dequeue");
        assert_eq!(lease.job().filename, "first.pdf");
    }

    #[tokio::test]
    async fn in_flight_limit_blocks_second_delivery() {
        let dir = TempDir::new().expect("tempdir");
        let queue = queue(&dir, options()).await;
        queue.enqueue(IngestionJob::new("a", "/tmp/a")).await.expect("enqueue");
        queue.enqueue(IngestionJob::new("b", "/tmp/b")).await.expect("enqueue");

        let lease = queue.try_dequeue().await.expect("dequeue").expect("lease");
        assert!(queue.try_dequeue().await.expect("dequeue").is_none());

        queue.ack(lease).await.expect("ack");
        let next = queue.try_dequeue().await.expect("dequeue").expect("lease");
        assert_eq!(next.job().filename, "b");
    }

    #[tokio::test]
    async fn retry_redelivers_until_budget_is_spent() {
        let dir = TempDir::new().expect("tempdir");
        let queue = queue(&dir, options()).await;
        let id = queue.enqueue(IngestionJob::new("a", "/tmp/a")).await.expect("enqueue");

        let lease = queue.dequeue().await.expect("first delivery");
        let status = queue.retry(lease, "provider timeout").await.expect("retry");
        assert_eq!(status, JobStatus::Pending { attempts: 1 });

        let lease = queue.dequeue().await.expect("second delivery");
        assert_eq!(lease.attempts(), 2);
        let status = queue.retry(lease, "provider timeout").await.expect("retry");
        assert_eq!(
            status,
            JobStatus::DeadLettered {
                attempts: 2,
                error: Some("provider timeout".into())
            }
        );
        assert_eq!(queue.status(id).await.expect("status"), Some(status));
        assert!(queue.try_dequeue().await.expect("dequeue").is_none());
    }

    #[tokio::test]
    async fn dead_letter_then_requeue_resets_attempts() {
        let dir = TempDir::new().expect("tempdir");
        let queue = queue(&dir, options()).await;
        let id = queue.enqueue(IngestionJob::new("a", "/tmp/a")).await.expect("enqueue");

        let lease = queue.dequeue().await.expect("dequeue");
        queue.dead_letter(lease, "document not found").await.expect("dead letter");
        assert!(matches!(
            queue.status(id).await.expect("status"),
            Some(JobStatus::DeadLettered { attempts: 1, .. })
        ));

        assert_eq!(queue.requeue_dead().await.expect("requeue"), 1);
        assert_eq!(
            queue.status(id).await.expect("status"),
            Some(JobStatus::Pending { attempts: 0 })
        );
    }

    #[tokio::test]
    async fn expired_lease_is_redelivered_and_old_lease_is_lost() {
        let dir = TempDir::new().expect("tempdir");
        let queue = queue(
            &dir,
            QueueOptions {
                max_in_flight: 2,
                visibility_timeout: Duration::ZERO,
                max_attempts: 5,
                ..options()
            },
        )
        .await;
        let id = queue.enqueue(IngestionJob::new("a", "/tmp/a")).await.expect("enqueue");

        let stale = queue.dequeue().await.expect("first delivery");
        let fresh = queue.dequeue().await.expect("redelivery");
        assert_eq!(fresh.id(), id);
        assert_eq!(fresh.attempts(), 2);

        assert!(matches!(queue.ack(stale).await, Err(QueueError::LeaseLost(lost)) if lost == id));
        queue.ack(fresh).await.expect("ack");
        assert_eq!(queue.status(id).await.expect("status"), Some(JobStatus::Completed));
    }

    #[tokio::test]
    async fn expired_lease_past_budget_is_dead_lettered() {
        let dir = TempDir::new().expect("tempdir");
        let queue = queue(
            &dir,
            QueueOptions {
                max_in_flight: 2,
                visibility_timeout: Duration::ZERO,
                max_attempts: 1,
                ..options()
            },
        )
        .await;
        let id = queue.enqueue(IngestionJob::new("a", "/tmp/a")).await.expect("enqueue");

        let abandoned = queue.dequeue().await.expect("delivery");
        assert!(queue.try_dequeue().await.expect("dequeue").is_none());

        assert_eq!(
            queue.status(id).await.expect("status"),
            Some(JobStatus::DeadLettered {
                attempts: 1,
                error: Some("lease expired after 1 deliveries".into())
            })
        );
        assert!(matches!(queue.ack(abandoned).await, Err(QueueError::LeaseLost(lost)) if lost == id));
        assert_eq!(queue.depths().await.expect("depths").dead, 1);
    }

    #[tokio::test]
    async fn claim_in_progress_is_not_reclaimed_by_another_handle() {
        let dir = TempDir::new().expect("tempdir");
        let first = queue(&dir, options()).await;
        let second = queue(&dir, options()).await;
        let id = first.enqueue(IngestionJob::new("a", "/tmp/a")).await.expect("enqueue");

        // A job that waited in the backlog longer than the visibility timeout.
        let file_name = first.list(Slot::Pending).await.expect("list").remove(0);
        let aged = SystemTime::now() - Duration::from_secs(600);
        std::fs::File::options()
            .write(true)
            .open(first.path(Slot::Pending, &file_name))
            .expect("open pending")
            .set_modified(aged)
            .expect("age pending");

        let claim = first.begin_claim(&file_name).await.expect("claim").expect("claimed");
        assert_eq!(
            first.status(id).await.expect("status"),
            Some(JobStatus::InFlight { attempts: 1 })
        );
        assert!(second.try_dequeue().await.expect("dequeue").is_none());
        assert_eq!(second.depths().await.expect("depths").pending, 0);

        let (record, token) = first
            .finish_claim(&file_name, &claim)
            .await
            .expect("finish")
            .expect("published");
        let lease = JobLease {
            record,
            file_name,
            token,
            _permit: Arc::clone(&first.permits).try_acquire_owned().expect("permit"),
        };
        assert!(second.try_dequeue().await.expect("dequeue").is_none());
        first.ack(lease).await.expect("ack");
        assert_eq!(first.status(id).await.expect("status"), Some(JobStatus::Completed));
    }

    #[tokio::test]
    async fn abandoned_claim_returns_to_pending() {
        let dir = TempDir::new().expect("tempdir");
        let crashed = queue(&dir, options()).await;
        let id = crashed.enqueue(IngestionJob::new("a", "/tmp/a")).await.expect("enqueue");
        let file_name = crashed.list(Slot::Pending).await.expect("list").remove(0);
        let claim = claim_name(OffsetDateTime::now_utc() - time::Duration::minutes(10), &file_name);
        tokio::fs::rename(
            crashed.path(Slot::Pending, &file_name),
            crashed.path(Slot::InFlight, &claim),
        )
        .await
        .expect("stale claim");

        let survivor = queue(&dir, options()).await;
        let lease = survivor.try_dequeue().await.expect("dequeue").expect("lease");
        assert_eq!(lease.id(), id);
        assert_eq!(lease.attempts(), 1);
        assert!(survivor.list_claims().await.expect("claims").is_empty());
    }

    #[test]
    fn claim_names_carry_claim_time_and_file_name() {
        let claimed_at = OffsetDateTime::from_unix_timestamp(1_700_000_000).expect("timestamp");
        let file_name = format!("{:024}-{}.json", 42, Uuid::new_v4());
        let claim = claim_name(claimed_at, &file_name);
        assert!(claim.starts_with(CLAIM_PREFIX));
        assert_eq!(parse_claim(&claim), Some((claimed_at, file_name.as_str())));
        assert_eq!(parse_claim(".claim-garbage"), None);
    }

    #[tokio::test]
    async fn dequeue_waits_for_enqueue() {
        let dir = TempDir::new().expect("tempdir");
        let queue = Arc::new(queue(&dir, options()).await);

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await.map(|lease| lease.job().filename.clone()) })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        queue.enqueue(IngestionJob::new("late.pdf", "/tmp/late.pdf")).await.expect("enqueue");

        let filename = tokio::time::timeout(Duration::from_secs(5), consumer)
            .await
            .expect("consumer finished")
            .expect("join")
            .expect("dequeue");
        assert_eq!(filename, "late.pdf");
    }

    #[tokio::test]
    async fn close_wakes_blocked_consumers() {
        let dir = TempDir::new().expect("tempdir");
        let queue = Arc::new(queue(&dir, options()).await);
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(5), consumer)
            .await
            .expect("consumer finished")
            .expect("join");
        assert!(matches!(result, Err(QueueError::Closed)));
        assert!(matches!(
            queue.enqueue(IngestionJob::new("a", "/tmp/a")).await,
            Err(QueueError::Closed)
        ));
    }

    #[tokio::test]
    async fn jobs_survive_reopening_and_temp_files_are_ignored() {
        let dir = TempDir::new().expect("tempdir");
        let id = {
            let queue = queue(&dir, options()).await;
            queue.enqueue(IngestionJob::new("a", "/tmp/a")).await.expect("enqueue")
        };
        tokio::fs::write(dir.path().join("queue/pending/.partial.json.tmp"), b"{")
            .await
            .expect("write temp");

        let reopened = queue(&dir, options()).await;
        let lease = reopened.try_dequeue().await.expect("dequeue").expect("lease");
        assert_eq!(lease.id(), id);
    }

    #[tokio::test]
    async fn unknown_job_has_no_status() {
        let dir = TempDir::new().expect("tempdir");
        let queue = queue(&dir, options()).await;
        assert_eq!(queue.status(Uuid::new_v4()).await.expect("status"), None);
    }
}
