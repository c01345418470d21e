use crate::{ClientError, Result};
use bytes::Bytes;
use rbq_core::{JobId, JobSpec};
use rbq_protocol::{tags, Message, MessageCodec, MessageType};

use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of asking the broker for the next job.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// A job body that passed schema validation
    Job(JobSpec),
    /// The broker has nothing queued
    Empty,
    /// The broker answered with something that is not a usable job;
    /// the payload has been logged and dropped
    Invalid(String),
}

/// One session with the broker.
///
/// The protocol allows a single outstanding request per connection, so
/// every request takes `&mut self`.
pub struct BrokerClient {
    broker_address: String,
    framed: Option<Framed<TcpStream, MessageCodec>>,
    request_timeout: Duration,
}

impl BrokerClient {
    /// Connect to broker
    pub async fn connect(broker_address: impl Into<String>) -> Result<Self> {
        let broker_address = broker_address.into();

        let stream = TcpStream::connect(&broker_address)
            .await
            .map_err(|e| ClientError::ConnectionError(format!("{broker_address}: {e}")))?;
        stream.set_nodelay(true)?;

        info!(broker = %broker_address, "Connected to broker");

        Ok(BrokerClient {
            broker_address,
            framed: Some(Framed::new(stream, MessageCodec)),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn broker_address(&self) -> &str {
        &self.broker_address
    }

    pub fn is_open(&self) -> bool {
        self.framed.is_some()
    }

    /// Submit a job body. `Ok(false)` means the broker refused it.
    pub async fn submit(&mut self, job_id: &str, payload: impl Into<Bytes>) -> Result<bool> {
        let message = Message::new(MessageType::JobPush)
            .with_tlv(tags::JOB_ID, Bytes::copy_from_slice(job_id.as_bytes()))
            .with_tlv(tags::BODY, payload);

        let reply = self.request(message).await?;

        if reply.status() == Some(tags::STATUS_SUCCESS) {
            debug!(job_id, "Job accepted by broker");
            return Ok(true);
        }

        error!(job_id, reply = ?reply.as_map(), "Broker rejected job");
        Ok(false)
    }

    /// Ask for the next available job, labelled with `job_id` for logging.
    ///
    /// The id does not select a job; the broker hands out whatever is next.
    pub async fn poll(&mut self, job_id: &JobId) -> Result<PollOutcome> {
        let message = Message::new(MessageType::JobAck)
            .with_tlv(tags::JOB_ID, Bytes::copy_from_slice(job_id.as_str().as_bytes()));

        let reply = self.request(message).await?;

        if reply.msg_type == MessageType::Control {
            return Ok(match reply.status() {
                Some(tags::STATUS_EMPTY) => PollOutcome::Empty,
                status => {
                    warn!(%job_id, ?status, "Broker answered poll with a control message");
                    PollOutcome::Invalid(format!("control reply: {status:?}"))
                }
            });
        }

        let Some(body) = reply.get(tags::BODY) else {
            error!(%job_id, reply = ?reply.as_map(), "Reply carries no job body");
            return Ok(PollOutcome::Invalid("reply carries no job body".to_string()));
        };

        match JobSpec::from_json(body) {
            Ok(spec) => Ok(PollOutcome::Job(spec)),
            Err(e) => {
                error!(%job_id, error = %e, "Validation schema error, dropping job");
                Ok(PollOutcome::Invalid(e.to_string()))
            }
        }
    }

    /// Flush and shut down the connection. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        let Some(mut framed) = self.framed.take() else {
            return Ok(());
        };

        let result = framed.close().await;
        info!(broker = %self.broker_address, "Closed connection to broker");
        result.map_err(ClientError::from)
    }

    /// One request/reply exchange. Any transport failure drops the
    /// connection so later calls fail fast with `ConnectionClosed`.
    async fn request(&mut self, message: Message) -> Result<Message> {
        let framed = self.framed.as_mut().ok_or(ClientError::ConnectionClosed)?;
        let request_timeout = self.request_timeout;

        let result = match timeout(request_timeout, exchange(framed, message)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(request_timeout)),
        };

        if let Err(e) = &result {
            if e.is_transport() {
                warn!(broker = %self.broker_address, error = %e, "Dropping broker session");
                self.framed = None;
            }
        }

        result
    }
}

async fn exchange(framed: &mut Framed<TcpStream, MessageCodec>, message: Message) -> Result<Message> {
    framed.send(message).await?;
    match framed.next().await {
        Some(reply) => Ok(reply?),
        None => Err(ClientError::ConnectionClosed),
    }
}
