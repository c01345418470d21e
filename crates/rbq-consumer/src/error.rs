use rbq_client::ClientError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Cannot reach broker at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: ClientError,
    },

    #[error("Agent setup failed: {0}")]
    Agent(String),

    #[error("LLM request failed: {0}")]
    Llm(String),
}

pub type Result<T> = std::result::Result<T, ConsumerError>;
