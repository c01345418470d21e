use crate::config::ConsumerConfig;
use crate::executor::{JobExecutor, JobOutcome};
use crate::handler::JobHandler;
use crate::queue::JobQueue;
use crate::{ConsumerError, Result};
use rbq_client::{BrokerClient, PollOutcome};
use rbq_core::{Job, JobId};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of a [`Consumer`]. Moves strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConsumerState {
    Running,
    /// Stop requested; the reader finishes its current exchange and stops polling
    Stopping,
    /// No new work is accepted; waiting for queued jobs to be marked done
    Draining,
    Stopped,
}

/// Counters kept while the consumer runs.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    received: AtomicU64,
    invalid: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Jobs accepted into the queue
    pub received: u64,
    /// Broker payloads dropped by validation
    pub invalid: u64,
    pub succeeded: u64,
    /// Handler errors and panics
    pub failed: u64,
}

/// Pulls jobs from the broker into a bounded queue and fans them out to a
/// fixed pool of workers.
///
/// One reader task owns the broker session; workers never touch the
/// network. Shutdown is cooperative: nothing is interrupted mid-job.
pub struct Consumer {
    config: ConsumerConfig,
    handler: Arc<dyn JobHandler>,
    queue: Arc<JobQueue>,
    state: watch::Sender<ConsumerState>,
    stats: Arc<ConsumerStats>,
}

impl Consumer {
    pub fn new(config: ConsumerConfig, handler: Arc<dyn JobHandler>) -> Self {
        let queue = Arc::new(JobQueue::new(config.max_queue_size));
        let (state, _) = watch::channel(ConsumerState::Running);

        Consumer {
            config,
            handler,
            queue,
            state,
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    pub fn queue(&self) -> Arc<JobQueue> {
        self.queue.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Run until `shutdown` fires and every accepted job has been handled.
    ///
    /// Only a failure to reach the broker at startup is returned as an
    /// error; everything after that is logged and survived.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<StatsSnapshot> {
        if let Err(e) = self.config.validate() {
            self.state.send_replace(ConsumerState::Stopped);
            return Err(e);
        }

        let address = self.config.broker_address();
        let client = match connect(&address, self.config.request_timeout()).await {
            Ok(client) => client,
            Err(source) => {
                error!(broker = %address, error = %source, "Cannot connect to broker");
                self.state.send_replace(ConsumerState::Stopped);
                return Err(ConsumerError::Connect { address, source });
            }
        };

        info!(
            broker = %address,
            workers = self.config.max_workers,
            queue_size = self.config.max_queue_size,
            "Consumer running"
        );
        self.state.send_replace(ConsumerState::Running);

        // Cancelled once the reader has exited, so workers know the queue
        // can only shrink from then on.
        let intake_closed = CancellationToken::new();

        let reader = Reader {
            client: Some(client),
            address,
            queue: self.queue.clone(),
            stats: self.stats.clone(),
            config: self.config.clone(),
            shutdown: shutdown.clone(),
        };
        let mut reader_task = tokio::spawn(reader.run());

        let executor = Arc::new(JobExecutor::new(self.handler.clone()));
        let workers: Vec<JoinHandle<()>> = (0..self.config.max_workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    self.queue.clone(),
                    executor.clone(),
                    self.stats.clone(),
                    intake_closed.clone(),
                    self.config.dequeue_timeout(),
                ))
            })
            .collect();

        let reader_result = tokio::select! {
            _ = shutdown.cancelled() => {
                self.state.send_replace(ConsumerState::Stopping);
                info!("Stop requested, waiting for reader to finish");
                (&mut reader_task).await
            }
            result = &mut reader_task => {
                error!("Reader exited before shutdown was requested");
                shutdown.cancel();
                self.state.send_replace(ConsumerState::Stopping);
                result
            }
        };
        if let Err(e) = reader_result {
            error!("Reader task failed: {}", e);
        }
        intake_closed.cancel();

        self.state.send_replace(ConsumerState::Draining);
        info!(
            pending = self.queue.len(),
            unfinished = self.queue.unfinished(),
            "Waiting for queue to drain..."
        );
        self.queue.join().await;

        for worker in &workers {
            worker.abort();
        }
        for worker in workers {
            let _ = worker.await;
        }

        self.state.send_replace(ConsumerState::Stopped);
        let stats = self.stats.snapshot();
        info!(
            received = stats.received,
            succeeded = stats.succeeded,
            failed = stats.failed,
            invalid = stats.invalid,
            "Consumer shutdown complete"
        );
        Ok(stats)
    }
}

async fn connect(address: &str, request_timeout: Duration) -> rbq_client::Result<BrokerClient> {
    let client = tokio::time::timeout(request_timeout, BrokerClient::connect(address))
        .await
        .map_err(|_| rbq_client::ClientError::Timeout(request_timeout))??;
    Ok(client.with_request_timeout(request_timeout))
}

/// Sleep for `duration` unless `token` fires first.
async fn pause(token: &CancellationToken, duration: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = token.cancelled() => {}
    }
}

/// Owns the broker session and feeds the queue.
struct Reader {
    client: Option<BrokerClient>,
    address: String,
    queue: Arc<JobQueue>,
    stats: Arc<ConsumerStats>,
    config: ConsumerConfig,
    shutdown: CancellationToken,
}

impl Reader {
    async fn run(mut self) {
        info!(broker = %self.address, "Reader worker starting");
        let mut seq = 0u64;

        while !self.shutdown.is_cancelled() {
            let Some(client) = self.session().await else {
                continue;
            };

            let correlation_id = JobId::generate();
            match client.poll(&correlation_id).await {
                Ok(PollOutcome::Job(spec)) => {
                    seq += 1;
                    let job = Job::new(correlation_id, seq, spec);
                    info!(job_id = %job.id, seq, query = %job.query(), "Received job");
                    self.enqueue(job).await;
                }
                Ok(PollOutcome::Empty) => {
                    pause(&self.shutdown, self.config.poll_interval()).await;
                }
                Ok(PollOutcome::Invalid(reason)) => {
                    self.stats.invalid.fetch_add(1, Ordering::Relaxed);
                    debug!(job_id = %correlation_id, %reason, "Dropped invalid job");
                    // A broker stuck on a control error must not be spun on.
                    pause(&self.shutdown, self.config.poll_interval()).await;
                }
                Err(e) => {
                    error!(job_id = %correlation_id, error = %e, "Poll failed, reconnecting");
                    self.release().await;
                }
            }
        }

        self.release().await;
        info!("Reader worker stopping");
    }

    /// The open session, reconnecting with capped exponential backoff when
    /// there is none. Returns `None` after a failed attempt.
    async fn session(&mut self) -> Option<&mut BrokerClient> {
        if !self.client.as_ref().is_some_and(BrokerClient::is_open) {
            self.client = None;

            let mut delay = self.config.reconnect_delay();
            loop {
                if self.shutdown.is_cancelled() {
                    return None;
                }
                let attempt = tokio::select! {
                    result = connect(&self.address, self.config.request_timeout()) => result,
                    _ = self.shutdown.cancelled() => return None,
                };
                match attempt {
                    Ok(client) => {
                        info!(broker = %self.address, "Reconnected to broker");
                        self.client = Some(client);
                        break;
                    }
                    Err(e) => {
                        warn!(broker = %self.address, error = %e, retry_in = ?delay, "Reconnect failed");
                        pause(&self.shutdown, delay).await;
                        delay = (delay * 2).min(self.config.max_reconnect_delay());
                    }
                }
            }
        }

        self.client.as_mut()
    }

    /// Enqueue with retry on a full queue. A job the broker already handed
    /// over is never dropped, even once shutdown has been requested.
    async fn enqueue(&self, mut job: Job) {
        let wait = self.config.enqueue_timeout();
        loop {
            match self.queue.enqueue(job, wait).await {
                Ok(()) => {
                    self.stats.received.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(back) => {
                    warn!(
                        job_id = %back.id,
                        seq = back.seq,
                        capacity = self.queue.capacity(),
                        "Job queue full, retrying"
                    );
                    job = back;
                }
            }
        }
    }

    async fn release(&mut self) {
        if let Some(mut client) = self.client.take() {
            if let Err(e) = client.close().await {
                debug!(error = %e, "Error while closing broker session");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<JobQueue>,
    executor: Arc<JobExecutor>,
    stats: Arc<ConsumerStats>,
    intake_closed: CancellationToken,
    dequeue_timeout: Duration,
) {
    info!(worker_id, "AI worker starting");

    loop {
        if intake_closed.is_cancelled() && queue.is_empty() {
            break;
        }

        let Some(lease) = queue.dequeue(dequeue_timeout).await else {
            continue;
        };

        let job = lease.job();
        info!(worker_id, job_id = %job.id, seq = job.seq, "AI worker processing job");

        match executor.execute(job).await {
            JobOutcome::Succeeded => stats.succeeded.fetch_add(1, Ordering::Relaxed),
            JobOutcome::Failed(_) | JobOutcome::Panicked => {
                stats.failed.fetch_add(1, Ordering::Relaxed)
            }
        };
        // dropping the lease marks the job done
    }

    info!(worker_id, "AI worker stopping");
}
