//! DescribeLogDirs and SASL against a scripted in-process broker.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use kafka_sidecar::protocol::{BrokerConnection, API_DESCRIBE_LOG_DIRS, API_SASL_AUTHENTICATE, API_SASL_HANDSHAKE};
use kafka_sidecar::sasl::{SaslCredentials, SaslMechanism};
use kafka_sidecar::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_i16(s.len() as i16);
    buf.put_slice(s.as_bytes());
}

struct Request {
    api_key: i16,
    api_version: i16,
    correlation_id: i32,
    body: Bytes,
}

async fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let size = stream.read_i32().await.ok()?;
    let mut frame = vec![0u8; size as usize];
    stream.read_exact(&mut frame).await.ok()?;
    let mut frame = Bytes::from(frame);
    let api_key = frame.get_i16();
    let api_version = frame.get_i16();
    let correlation_id = frame.get_i32();
    let client_id_len = frame.get_i16() as usize;
    frame.advance(client_id_len);
    Some(Request {
        api_key,
        api_version,
        correlation_id,
        body: frame,
    })
}

async fn respond(stream: &mut TcpStream, correlation_id: i32, body: &[u8]) {
    let mut frame = BytesMut::new();
    frame.put_i32(4 + body.len() as i32);
    frame.put_i32(correlation_id);
    frame.put_slice(body);
    stream.write_all(&frame).await.unwrap();
}

fn log_dirs_body() -> BytesMut {
    let mut body = BytesMut::new();
    body.put_i32(0);
    body.put_i32(1);
    body.put_i16(0);
    put_str(&mut body, "/var/lib/kafka/data");
    body.put_i32(1);
    put_str(&mut body, "orders");
    body.put_i32(1);
    body.put_i32(0);
    body.put_i64(2048);
    body.put_i64(0);
    body.put_i8(0);
    body
}

/// Serves one connection that accepts `user`/`pass` over PLAIN.
async fn fake_broker(listener: TcpListener) {
    let (mut stream, _) = listener.accept().await.unwrap();
    while let Some(req) = read_request(&mut stream).await {
        let mut body = BytesMut::new();
        match req.api_key {
            API_SASL_HANDSHAKE => {
                assert_eq!(req.api_version, 1);
                let mut b = req.body.clone();
                let len = b.get_i16() as usize;
                let mechanism = String::from_utf8(b.split_to(len).to_vec()).unwrap();
                body.put_i16(if mechanism == "PLAIN" { 0 } else { 33 });
                body.put_i32(1);
                put_str(&mut body, "PLAIN");
            }
            API_SASL_AUTHENTICATE => {
                let mut b = req.body.clone();
                let len = b.get_i32() as usize;
                let token = b.split_to(len);
                if &token[..] == b"\0user\0pass" {
                    body.put_i16(0);
                    body.put_i16(-1);
                } else {
                    body.put_i16(58);
                    put_str(&mut body, "Authentication failed: Invalid username or password");
                }
                body.put_i32(0);
            }
            API_DESCRIBE_LOG_DIRS => {
                assert_eq!(req.api_version, 1);
                assert_eq!(&req.body[..], &(-1i32).to_be_bytes()[..]);
                body = log_dirs_body();
            }
            other => panic!("unexpected api key {}", other),
        }
        respond(&mut stream, req.correlation_id, &body).await;
    }
}

async fn start_broker() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(fake_broker(listener));
    addr
}

fn creds(mechanism: SaslMechanism, password: &str) -> SaslCredentials {
    SaslCredentials {
        mechanism,
        username: "user".into(),
        password: password.into(),
    }
}

#[tokio::test]
async fn describe_log_dirs_without_auth() {
    let addr = start_broker().await;
    let mut conn = BrokerConnection::connect(&addr, "test").await.unwrap();
    let dirs = conn.describe_log_dirs().await.unwrap();

    let dir = &dirs["/var/lib/kafka/data"];
    assert!(dir.is_healthy());
    assert_eq!(dir.partitions[0].size, 2048);
}

#[tokio::test]
async fn plain_auth_then_describe() {
    let addr = start_broker().await;
    let mut conn = BrokerConnection::connect(&addr, "test").await.unwrap();
    conn.authenticate(&creds(SaslMechanism::Plain, "pass")).await.unwrap();
    assert_eq!(conn.describe_log_dirs().await.unwrap().len(), 1);
}

#[tokio::test]
async fn bad_password_is_rejected() {
    let addr = start_broker().await;
    let mut conn = BrokerConnection::connect(&addr, "test").await.unwrap();
    let err = conn
        .authenticate(&creds(SaslMechanism::Plain, "wrong"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
    assert!(err.to_string().contains("SASL_AUTHENTICATION_FAILED"));
}

#[tokio::test]
async fn unsupported_mechanism_fails_handshake() {
    let addr = start_broker().await;
    let mut conn = BrokerConnection::connect(&addr, "test").await.unwrap();
    let err = conn
        .authenticate(&creds(SaslMechanism::ScramSha512, "pass"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("UNSUPPORTED_SASL_MECHANISM"));
}

#[tokio::test]
async fn connect_refused_is_a_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    assert!(matches!(
        BrokerConnection::connect(&addr, "test").await,
        Err(Error::Connection(_))
    ));
}
