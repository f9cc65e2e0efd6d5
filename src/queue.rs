use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use parking_lot::Mutex;
use rand::Rng;
use redb::{ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::errors::EngineError;
use crate::metrics;
use crate::persistence::redb_store::RedbStore;
use crate::persistence::wal::{WalEntry, WalManager};
use crate::rate_limiter::TokenBucket;

const JOBS_TABLE: TableDefinition<&str, Vec<u8>> = TableDefinition::new("jobs");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Ready,
    Leased,
    Completed,
    DeadLettered,
}

/// Durable job record. `order_id` is the job's identity — there is no
/// separate queue-assigned identity, so `Enqueue` is idempotent per
/// `order_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub order_id: String,
    pub attempt: u32,
    pub state: JobState,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, order_id: &str, attempt: u32) -> Result<(), EngineError>;
}

pub struct QueueConfig {
    pub concurrency: usize,
    pub rate_limit_per_minute: usize,
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            rate_limit_per_minute: 100,
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Durable FIFO of order jobs with bounded worker concurrency, a
/// token-bucket rate limit on job starts, and exponential-backoff
/// retry with dead-lettering. Durable state lives in `redb`, following
/// the same WAL-then-state-update write order the Order Store uses.
pub struct Queue {
    redb: Arc<RedbStore>,
    wal: Arc<WalManager>,
    ready: Mutex<VecDeque<String>>,
    notify: Arc<Notify>,
    leased: DashSet<String>,
    rate_limiter: TokenBucket,
    config: QueueConfig,
    completed: Mutex<VecDeque<JobRecord>>,
    failed: Mutex<VecDeque<JobRecord>>,
    shutting_down: Arc<AtomicBool>,
}

const COMPLETED_HISTORY_CAP: usize = 100;
const FAILED_HISTORY_CAP: usize = 50;

impl Queue {
    pub fn new(redb: Arc<RedbStore>, wal: Arc<WalManager>, config: QueueConfig) -> Self {
        let refill_per_sec = config.rate_limit_per_minute as f64 / 60.0;
        Self {
            rate_limiter: TokenBucket::new(config.rate_limit_per_minute, refill_per_sec),
            redb,
            wal,
            ready: Mutex::new(VecDeque::new()),
            notify: Arc::new(Notify::new()),
            leased: DashSet::new(),
            completed: Mutex::new(VecDeque::new()),
            failed: Mutex::new(VecDeque::new()),
            shutting_down: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    fn read_job(&self, order_id: &str) -> Result<Option<JobRecord>, EngineError> {
        let txn = self
            .redb
            .begin_read()
            .map_err(|e| EngineError::QueueError(e.to_string()))?;
        let table = match txn.open_table(JOBS_TABLE) {
            Ok(table) => table,
            // No job has ever been enqueued yet — an empty table, not an error.
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(EngineError::QueueError(e.to_string())),
        };
        table
            .get(order_id)
            .map_err(|e| EngineError::QueueError(e.to_string()))?
            .map(|v| serde_json::from_slice::<JobRecord>(&v.value()))
            .transpose()
            .map_err(|e| EngineError::QueueError(e.to_string()))
    }

    fn write_job(&self, record: &JobRecord) -> Result<(), EngineError> {
        let txn = self
            .redb
            .begin_write()
            .map_err(|e| EngineError::QueueError(e.to_string()))?;
        {
            let mut table = txn
                .open_table(JOBS_TABLE)
                .map_err(|e| EngineError::QueueError(e.to_string()))?;
            let data = serde_json::to_vec(record).map_err(|e| EngineError::QueueError(e.to_string()))?;
            table
                .insert(record.order_id.as_str(), data)
                .map_err(|e| EngineError::QueueError(e.to_string()))?;
        }
        txn.commit().map_err(|e| EngineError::QueueError(e.to_string()))?;
        Ok(())
    }

    /// Durable, FIFO, idempotent per `order_id`. Returns once the job
    /// record is persisted; the order's observable status stays
    /// `Pending` until a worker leases it.
    pub fn enqueue(&self, order_id: &str) -> Result<(), EngineError> {
        if self.read_job(order_id)?.is_some() {
            return Ok(());
        }

        self.wal
            .append(&WalEntry::JobEnqueued {
                order_id: order_id.to_string(),
            })
            .map_err(|e| EngineError::QueueError(e.to_string()))?;

        self.write_job(&JobRecord {
            order_id: order_id.to_string(),
            attempt: 0,
            state: JobState::Ready,
        })?;

        self.ready.lock().push_back(order_id.to_string());
        self.notify.notify_one();
        Ok(())
    }

    /// Reloads every non-terminal job from `redb` into the in-memory
    /// ready queue. Called at startup so a crash mid-processing (a job
    /// left `Leased`) is re-leased rather than lost. A `Leased` record
    /// found here is evidence a previous worker picked it up and never
    /// acknowledged it — its attempt counter is bumped before
    /// re-queueing so the order's `retryCount` reflects the abandoned
    /// attempt even if the recovered run ultimately succeeds.
    pub fn recover(&self) -> Result<usize, EngineError> {
        let mut ready_ids = Vec::new();
        let mut leased = Vec::new();
        {
            let txn = self
                .redb
                .begin_read()
                .map_err(|e| EngineError::QueueError(e.to_string()))?;
            let table = match txn.open_table(JOBS_TABLE) {
                Ok(table) => table,
                // First-ever run: nothing has been enqueued, nothing to recover.
                Err(redb::TableError::TableDoesNotExist(_)) => return Ok(0),
                Err(e) => return Err(EngineError::QueueError(e.to_string())),
            };

            for res in table
                .range::<&str>(..)
                .map_err(|e| EngineError::QueueError(e.to_string()))?
            {
                let (_, v) = res.map_err(|e| EngineError::QueueError(e.to_string()))?;
                let record: JobRecord =
                    serde_json::from_slice(&v.value()).map_err(|e| EngineError::QueueError(e.to_string()))?;
                match record.state {
                    JobState::Ready => ready_ids.push(record.order_id),
                    JobState::Leased => leased.push(record),
                    JobState::Completed | JobState::DeadLettered => {}
                }
            }
        }

        for mut record in leased {
            record.attempt += 1;
            record.state = JobState::Ready;
            self.write_job(&record)?;
            ready_ids.push(record.order_id);
        }

        let recovered = ready_ids.len();
        if recovered > 0 {
            let mut ready = self.ready.lock();
            for id in ready_ids {
                ready.push_back(id);
            }
            drop(ready);
            self.notify.notify_waiters();
        }
        Ok(recovered)
    }

    fn pop_leased(&self, order_id: &str) -> Result<JobRecord, EngineError> {
        let mut record = self
            .read_job(order_id)?
            .ok_or_else(|| EngineError::QueueError(format!("job {order_id} not found")))?;
        record.state = JobState::Leased;
        self.write_job(&record)?;
        self.leased.insert(order_id.to_string());
        Ok(record)
    }

    fn release_lease(&self, order_id: &str, requeued: bool) {
        self.leased.remove(order_id);
        let _ = self.wal.append(&WalEntry::JobLeaseReleased {
            order_id: order_id.to_string(),
            requeued,
        });
    }

    fn push_completed(&self, record: JobRecord) {
        let mut completed = self.completed.lock();
        completed.push_front(record);
        if completed.len() > COMPLETED_HISTORY_CAP {
            completed.truncate(COMPLETED_HISTORY_CAP);
        }
    }

    fn push_failed(&self, record: JobRecord) {
        let mut failed = self.failed.lock();
        failed.push_front(record);
        if failed.len() > FAILED_HISTORY_CAP {
            failed.truncate(FAILED_HISTORY_CAP);
        }
    }

    pub fn depth(&self) -> usize {
        self.ready.lock().len()
    }

    pub fn in_flight(&self) -> usize {
        self.leased.len()
    }

    pub fn request_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Spawns `config.concurrency` worker loops, each pulling jobs off
    /// the shared ready queue. At most one worker can hold a given
    /// `order_id` at a time — the single-lease invariant comes from the
    /// queue handing out each popped id to exactly one caller.
    pub fn spawn_workers(self: Arc<Self>, handler: Arc<dyn JobHandler>) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.config.concurrency)
            .map(|worker_idx| {
                let queue = self.clone();
                let handler = handler.clone();
                tokio::spawn(async move { queue.worker_loop(worker_idx, handler).await })
            })
            .collect()
    }

    async fn worker_loop(self: Arc<Self>, worker_idx: usize, handler: Arc<dyn JobHandler>) {
        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                info!(worker_idx, "worker shutting down");
                return;
            }

            let order_id = {
                let mut ready = self.ready.lock();
                ready.pop_front()
            };

            let order_id = match order_id {
                Some(id) => id,
                None => {
                    self.notify.notified().await;
                    continue;
                }
            };

            self.rate_limiter.acquire(1).await;

            let record = match self.pop_leased(&order_id) {
                Ok(record) => record,
                Err(e) => {
                    error!(order_id = %order_id, error = %e, "failed to lease job");
                    continue;
                }
            };
            metrics::set_queue_depth(self.depth() as i64);
            metrics::set_queue_in_flight(self.in_flight() as i64);

            let attempt = record.attempt;
            let result = handler.handle(&order_id, attempt).await;

            match result {
                Ok(()) => {
                    self.release_lease(&order_id, false);
                    self.push_completed(JobRecord {
                        order_id,
                        attempt,
                        state: JobState::Completed,
                    });
                }
                Err(e) => {
                    self.handle_failure(&order_id, attempt, e).await;
                }
            }
            metrics::set_queue_in_flight(self.in_flight() as i64);
        }
    }

    async fn handle_failure(&self, order_id: &str, attempt: u32, error: EngineError) {
        let next_attempt = attempt + 1;
        let retriable = error.is_retriable() && next_attempt < self.config.max_attempts;

        if retriable {
            metrics::inc_queue_retries();
            let delay = backoff_delay(self.config.base_delay, attempt);
            warn!(order_id, attempt, delay_ms = delay.as_millis() as u64, error = %error, "job failed, retrying");

            if let Err(e) = self.write_job(&JobRecord {
                order_id: order_id.to_string(),
                attempt: next_attempt,
                state: JobState::Ready,
            }) {
                error!(order_id, error = %e, "failed to persist retry state");
            }
            self.release_lease(order_id, true);

            let ready = self.notify.clone();
            let order_id = order_id.to_string();
            tokio::time::sleep(delay).await;
            self.ready.lock().push_back(order_id);
            ready.notify_one();
        } else {
            metrics::inc_queue_dead_lettered();
            error!(order_id, attempt = next_attempt, error = %error, "job exhausted retries, dead-lettering");
            if let Err(e) = self.write_job(&JobRecord {
                order_id: order_id.to_string(),
                attempt: next_attempt,
                state: JobState::DeadLettered,
            }) {
                error!(order_id, error = %e, "failed to persist dead-letter state");
            }
            self.release_lease(order_id, false);
            self.push_failed(JobRecord {
                order_id: order_id.to_string(),
                attempt: next_attempt,
                state: JobState::DeadLettered,
            });
        }
    }
}

fn backoff_delay(base_delay: Duration, attempt: u32) -> Duration {
    let exp = base_delay.as_millis() as f64 * 2f64.powi(attempt as i32);
    let capped = exp.min(Duration::from_secs(30).as_millis() as f64);
    let jitter_frac = rand::thread_rng().gen_range(-0.2..=0.2);
    let jittered = (capped * (1.0 + jitter_frac)).max(0.0);
    Duration::from_millis(jittered as u64)
}
