use crate::handler::JobHandler;
use rbq_core::Job;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// How a single job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(String),
    Panicked,
}

/// Runs the handler for one job and contains whatever goes wrong.
///
/// The handler runs on its own task so that a panic is reported as a
/// failed job instead of taking the worker down with it.
pub struct JobExecutor {
    handler: Arc<dyn JobHandler>,
}

impl JobExecutor {
    pub fn new(handler: Arc<dyn JobHandler>) -> Self {
        JobExecutor { handler }
    }

    pub async fn execute(&self, job: &Job) -> JobOutcome {
        let started = Instant::now();
        let handler = self.handler.clone();
        let owned = job.clone();

        let result = tokio::spawn(async move { handler.handle(&owned).await }).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(())) => {
                info!(job_id = %job.id, seq = job.seq, elapsed_ms, "Job completed");
                JobOutcome::Succeeded
            }
            Ok(Err(e)) => {
                error!(job_id = %job.id, seq = job.seq, elapsed_ms, error = ?e, "Job failed");
                JobOutcome::Failed(format!("{e:#}"))
            }
            Err(e) if e.is_panic() => {
                error!(job_id = %job.id, seq = job.seq, elapsed_ms, "Job panicked: {:?}", e);
                JobOutcome::Panicked
            }
            Err(e) => {
                error!(job_id = %job.id, seq = job.seq, "Job task was cancelled: {}", e);
                JobOutcome::Failed("job task was cancelled".to_string())
            }
        }
    }
}
