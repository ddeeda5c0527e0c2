// src/scheduler.rs
//
// Asynchronous bulk-recalculation queue. Jobs run on a small worker pool
// off the request path; transient storage faults are retried with
// exponential backoff, business-rule failures are terminal for the job.
// The month-end trigger replaces the old in-process wall-clock poll: it is
// idempotent per period (the store remembers which periods fired), so a
// restart cannot double-enqueue the bulk job.

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::calendar::Clock;
use crate::engine::{BatchReport, PayrollEngine};
use crate::error::PayrollError;
use crate::model::{PayPeriod, PayrollRecord};
use crate::store::PayrollStore;

#[derive(Debug, Clone)]
pub enum Job {
    CalculateEmployee {
        employee_id: String,
        period: PayPeriod,
    },
    CalculateAll {
        period: PayPeriod,
    },
}

#[derive(Debug)]
pub enum JobOutcome {
    Single(PayrollRecord),
    Batch(BatchReport),
}

/// Handle returned to the enqueuer. Dropping it detaches the caller from
/// the job; the job itself still runs.
pub struct JobHandle {
    pub id: u64,
    pub done: oneshot::Receiver<Result<JobOutcome, PayrollError>>,
}

struct QueuedJob {
    id: u64,
    job: Job,
    done: oneshot::Sender<Result<JobOutcome, PayrollError>>,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with a little jitter so simultaneous failures
    /// do not retry in lockstep.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        let jitter_ms = rand::thread_rng().gen_range(0..=self.base_delay.as_millis() as u64 / 2);
        exp + Duration::from_millis(jitter_ms)
    }
}

pub struct RecalcScheduler {
    tx: mpsc::Sender<QueuedJob>,
    next_id: AtomicU64,
    workers: Vec<JoinHandle<()>>,
}

impl RecalcScheduler {
    pub fn start(engine: Arc<PayrollEngine>, policy: RetryPolicy, worker_count: usize) -> Self {
        let (tx, rx) = mpsc::channel::<QueuedJob>(256);
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(worker_count.max(1));
        for n in 0..worker_count.max(1) {
            let engine = Arc::clone(&engine);
            let policy = policy.clone();
            let rx = Arc::clone(&rx);
            workers.push(tokio::spawn(worker_loop(n, engine, policy, rx)));
        }
        info!(
            "Recalculation scheduler started with {} workers",
            worker_count.max(1)
        );
        Self {
            tx,
            next_id: AtomicU64::new(1),
            workers,
        }
    }

    pub async fn enqueue_calculate_salary(
        &self,
        employee_id: &str,
        period: PayPeriod,
    ) -> Result<JobHandle, PayrollError> {
        self.enqueue(Job::CalculateEmployee {
            employee_id: employee_id.to_string(),
            period,
        })
        .await
    }

    pub async fn enqueue_calculate_all(&self, period: PayPeriod) -> Result<JobHandle, PayrollError> {
        self.enqueue(Job::CalculateAll { period }).await
    }

    async fn enqueue(&self, job: Job) -> Result<JobHandle, PayrollError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = oneshot::channel();
        debug!("Enqueueing job {}: {:?}", id, job);
        self.tx
            .send(QueuedJob {
                id,
                job,
                done: done_tx,
            })
            .await
            .map_err(|_| PayrollError::Storage("job queue closed".to_string()))?;
        Ok(JobHandle { id, done: done_rx })
    }

    /// Stops accepting jobs and waits for in-flight ones to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

async fn worker_loop(
    worker: usize,
    engine: Arc<PayrollEngine>,
    policy: RetryPolicy,
    rx: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
) {
    loop {
        // Hold the receiver lock only for the take, not for the run.
        let queued = { rx.lock().await.recv().await };
        let Some(queued) = queued else {
            debug!("Worker {} shutting down: queue closed", worker);
            break;
        };
        debug!("Worker {} picked up job {}", worker, queued.id);
        let result = run_with_retries(&engine, &policy, queued.id, &queued.job).await;
        // The enqueuer may have dropped its handle; that is fine.
        let _ = queued.done.send(result);
    }
}

async fn run_with_retries(
    engine: &PayrollEngine,
    policy: &RetryPolicy,
    job_id: u64,
    job: &Job,
) -> Result<JobOutcome, PayrollError> {
    let mut attempt: u32 = 1;
    loop {
        match execute(engine, job).await {
            Ok(outcome) => {
                info!("Job {} finished on attempt {}", job_id, attempt);
                return Ok(outcome);
            }
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "Job {} attempt {}/{} hit transient failure ({}); retrying in {:?}",
                    job_id, attempt, policy.max_attempts, e, delay
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                error!("Job {} terminal after attempt {}: {}", job_id, attempt, e);
                return Err(e);
            }
        }
    }
}

async fn execute(engine: &PayrollEngine, job: &Job) -> Result<JobOutcome, PayrollError> {
    match job {
        Job::CalculateEmployee {
            employee_id,
            period,
        } => engine
            .calculate_salary(employee_id, *period)
            .await
            .map(JobOutcome::Single),
        Job::CalculateAll { period } => engine
            .calculate_all_employees(*period)
            .await
            .map(|(_, report)| JobOutcome::Batch(report)),
    }
}

/// Enqueues the bulk recalculation when the clock crosses the last day of
/// the month. A scheduled-job abstraction rather than an ad-hoc timer: the
/// fired-periods set lives in the store, so the trigger survives restarts
/// and `check` is directly testable.
pub struct MonthEndTrigger {
    scheduler: Arc<RecalcScheduler>,
    store: Arc<dyn PayrollStore>,
    clock: Arc<dyn Clock>,
    tick: Duration,
}

impl MonthEndTrigger {
    pub fn new(
        scheduler: Arc<RecalcScheduler>,
        store: Arc<dyn PayrollStore>,
        clock: Arc<dyn Clock>,
        tick: Duration,
    ) -> Self {
        Self {
            scheduler,
            store,
            clock,
            tick,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                sleep(self.tick).await;
                if let Err(e) = self.check().await {
                    warn!("Month-end trigger check failed: {}", e);
                }
            }
        })
    }

    /// Returns true when a bulk job was enqueued by this call.
    pub async fn check(&self) -> Result<bool, PayrollError> {
        let today = self.clock.today();
        let period = PayPeriod::of(today);
        if today != period.last_day() {
            return Ok(false);
        }
        if !self.store.mark_period_triggered(period).await? {
            debug!("Month-end trigger for {} already fired", period);
            return Ok(false);
        }
        info!(
            "Last day of {} reached; enqueueing bulk salary calculation",
            period
        );
        self.scheduler.enqueue_calculate_all(period).await?;
        Ok(true)
    }
}
