use async_trait::async_trait;
use rbq_core::Job;

/// Result type for job handlers
pub type HandlerResult = anyhow::Result<()>;

/// Processes one job.
///
/// Implementations persist their own output; the pool only cares whether
/// the call returned an error. A handler may be slow and is never
/// interrupted mid-job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> HandlerResult;
}
