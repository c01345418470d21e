mod error;
mod job;

pub use error::{JobError, Result};
pub use job::{Job, JobId, JobParams, JobSpec};
