mod client;

pub use client::{BrokerClient, PollOutcome, DEFAULT_REQUEST_TIMEOUT};

use rbq_protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Connection closed by broker")]
    ConnectionClosed,

    #[error("No reply from broker within {0:?}")]
    Timeout(Duration),

    #[error("Protocol error: {0}")]
    ProtocolError(#[from] ProtocolError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ClientError {
    /// Errors after which the session can no longer be used.
    ///
    /// An oversized TLV value is refused before anything is written, so
    /// that one leaves the connection intact.
    pub fn is_transport(&self) -> bool {
        !matches!(
            self,
            ClientError::ProtocolError(ProtocolError::ValueTooLong { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
