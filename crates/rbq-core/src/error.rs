use thiserror::Error;

/// Reasons a job body is refused before it reaches the pipeline.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job body is not valid JSON: {0}")]
    Malformed(String),

    #[error("Job body does not match the schema: {0}")]
    Schema(String),

    #[error("params.limit must be at least 1, got {0}")]
    InvalidLimit(u64),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        use serde_json::error::Category;

        match err.classify() {
            Category::Syntax | Category::Eof | Category::Io => JobError::Malformed(err.to_string()),
            Category::Data => JobError::Schema(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, JobError>;
