//! Broker consumer: polls jobs from an RBQ1 broker into a bounded queue and
//! processes them on a fixed pool of workers.

pub mod agent;
pub mod config;
pub mod consumer;
pub mod error;
pub mod executor;
pub mod handler;
pub mod logging;
pub mod queue;
pub mod shutdown;

pub use config::{AgentConfig, ConsumerConfig, LogFormat};
pub use consumer::{Consumer, ConsumerState, StatsSnapshot};
pub use error::{ConsumerError, Result};
pub use handler::{HandlerResult, JobHandler};
pub use queue::{JobQueue, QueuedJob};
