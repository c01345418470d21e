//! Request/reply behaviour against a scripted in-process broker.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use rbq_client::{BrokerClient, ClientError, PollOutcome};
use rbq_core::JobId;
use rbq_protocol::{tags, Message, MessageCodec, MessageType};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

/// Accepts one connection, records every request and answers with the
/// scripted replies in order. The connection is closed once the script
/// runs out.
async fn scripted_broker(replies: Vec<Message>) -> (String, mpsc::UnboundedReceiver<Message>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, MessageCodec);
        for reply in replies {
            match framed.next().await {
                Some(Ok(request)) => {
                    let _ = seen_tx.send(request);
                    framed.send(reply).await.unwrap();
                }
                _ => return,
            }
        }
    });

    (addr, seen_rx)
}

fn control(status: &str) -> Message {
    Message::new(MessageType::Control)
        .with_tlv(tags::JOB_ID, vec![0u8])
        .with_tlv(tags::BODY, vec![MessageType::Control.as_u8()])
        .with_tlv(tags::STATUS, Bytes::copy_from_slice(status.as_bytes()))
}

fn pushed(body: &str) -> Message {
    Message::new(MessageType::JobPush)
        .with_tlv(tags::JOB_ID, &b"user_job"[..])
        .with_tlv(tags::BODY, Bytes::copy_from_slice(body.as_bytes()))
}

#[tokio::test]
async fn test_submit_success() {
    let (addr, mut seen) = scripted_broker(vec![control("success")]).await;
    let mut client = BrokerClient::connect(addr).await.unwrap();

    let body = br#"{"system_prompt":"s","params":{"query":"q"}}"#;
    assert!(client.submit("user_job", &body[..]).await.unwrap());

    let request = seen.recv().await.unwrap();
    assert_eq!(request.msg_type, MessageType::JobPush);
    assert_eq!(request.get(tags::JOB_ID).unwrap(), &b"user_job"[..]);
    assert_eq!(request.get(tags::BODY).unwrap(), &body[..]);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_submit_rejected() {
    let (addr, _seen) = scripted_broker(vec![control("failed to decode")]).await;
    let mut client = BrokerClient::connect(addr).await.unwrap();

    assert!(!client.submit("user_job", &b"{}"[..]).await.unwrap());
    assert!(client.is_open());
}

#[tokio::test]
async fn test_submit_connection_closed() {
    let (addr, _seen) = scripted_broker(vec![]).await;
    let mut client = BrokerClient::connect(addr).await.unwrap();

    let err = client.submit("user_job", &b"{}"[..]).await.unwrap_err();
    assert!(err.is_transport());
    assert!(!client.is_open());

    let err = client.submit("user_job", &b"{}"[..]).await.unwrap_err();
    assert!(matches!(err, ClientError::ConnectionClosed));
}

#[tokio::test]
async fn test_poll_returns_validated_job() {
    let body = r#"{"system_prompt":"be brief","params":{"query":"rust","limit":3}}"#;
    let (addr, mut seen) = scripted_broker(vec![pushed(body)]).await;
    let mut client = BrokerClient::connect(addr).await.unwrap();

    let id = JobId::from("corr-1");
    let outcome = client.poll(&id).await.unwrap();

    let PollOutcome::Job(spec) = outcome else {
        panic!("expected a job, got {outcome:?}");
    };
    assert_eq!(spec.system_prompt, "be brief");
    assert_eq!(spec.params.query, "rust");
    assert_eq!(spec.params.limit, Some(3));

    let request = seen.recv().await.unwrap();
    assert_eq!(request.msg_type, MessageType::JobAck);
    assert_eq!(request.get(tags::JOB_ID).unwrap(), &b"corr-1"[..]);
}

#[tokio::test]
async fn test_poll_empty_is_repeatable() {
    let replies = vec![
        control(tags::STATUS_EMPTY),
        control(tags::STATUS_EMPTY),
        control(tags::STATUS_EMPTY),
    ];
    let (addr, _seen) = scripted_broker(replies).await;
    let mut client = BrokerClient::connect(addr).await.unwrap();

    for _ in 0..3 {
        let outcome = client.poll(&JobId::generate()).await.unwrap();
        assert_eq!(outcome, PollOutcome::Empty);
    }
    assert!(client.is_open());
}

#[tokio::test]
async fn test_poll_drops_invalid_job_and_keeps_session() {
    let replies = vec![
        pushed(r#"{"params":{"query":"q"}}"#),
        pushed("not json"),
        pushed(r#"{"system_prompt":"s","params":{"query":"q"}}"#),
    ];
    let (addr, _seen) = scripted_broker(replies).await;
    let mut client = BrokerClient::connect(addr).await.unwrap();

    assert!(matches!(
        client.poll(&JobId::generate()).await.unwrap(),
        PollOutcome::Invalid(_)
    ));
    assert!(matches!(
        client.poll(&JobId::generate()).await.unwrap(),
        PollOutcome::Invalid(_)
    ));
    assert!(matches!(
        client.poll(&JobId::generate()).await.unwrap(),
        PollOutcome::Job(_)
    ));
}

#[tokio::test]
async fn test_poll_distinguishes_connection_loss_from_empty() {
    let (addr, _seen) = scripted_broker(vec![control(tags::STATUS_EMPTY)]).await;
    let mut client = BrokerClient::connect(addr).await.unwrap();

    assert_eq!(client.poll(&JobId::generate()).await.unwrap(), PollOutcome::Empty);
    assert!(client.poll(&JobId::generate()).await.is_err());
    assert!(!client.is_open());
}

#[tokio::test]
async fn test_poll_framing_error_drops_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 64];
        let _ = tokio::io::AsyncReadExt::read(&mut stream, &mut buf).await;
        stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
    });

    let mut client = BrokerClient::connect(addr).await.unwrap();
    let err = client.poll(&JobId::generate()).await.unwrap_err();
    match err {
        ClientError::ProtocolError(e) => assert!(e.is_framing()),
        other => panic!("expected framing error, got {other:?}"),
    }
    assert!(!client.is_open());
}

#[tokio::test]
async fn test_request_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let mut client = BrokerClient::connect(addr)
        .await
        .unwrap()
        .with_request_timeout(Duration::from_millis(100));

    let err = client.poll(&JobId::generate()).await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout(_)));
    assert!(!client.is_open());
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (addr, _seen) = scripted_broker(vec![control("success")]).await;
    let mut client = BrokerClient::connect(addr).await.unwrap();

    client.close().await.unwrap();
    client.close().await.unwrap();
    assert!(!client.is_open());
}
