//! Minimal Kafka wire protocol client.
//!
//! librdkafka exposes metadata but not DescribeLogDirs, so this module speaks
//! just enough of the protocol to ask one broker about its log directories:
//! SaslHandshake v1, SaslAuthenticate v0 and DescribeLogDirs v1, all using the
//! non-flexible (v1 request header, v0 response header) encodings.

use crate::error::{Error, Result};
use crate::metadata::{LogDirDescriptor, LogDirPartition, LogDirs};
use crate::sasl::{plain_token, SaslCredentials, SaslMechanism, ScramClient};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// SaslHandshake API key.
pub const API_SASL_HANDSHAKE: i16 = 17;
/// DescribeLogDirs API key.
pub const API_DESCRIBE_LOG_DIRS: i16 = 35;
/// SaslAuthenticate API key.
pub const API_SASL_AUTHENTICATE: i16 = 36;

const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

/// Human-readable name for the Kafka error codes this client can meet.
pub fn error_code_name(code: i16) -> String {
    let name = match code {
        -1 => "UNKNOWN_SERVER_ERROR",
        7 => "REQUEST_TIMED_OUT",
        29 => "TOPIC_AUTHORIZATION_FAILED",
        31 => "CLUSTER_AUTHORIZATION_FAILED",
        33 => "UNSUPPORTED_SASL_MECHANISM",
        34 => "ILLEGAL_SASL_STATE",
        35 => "UNSUPPORTED_VERSION",
        56 => "KAFKA_STORAGE_ERROR",
        57 => "LOG_DIR_NOT_FOUND",
        58 => "SASL_AUTHENTICATION_FAILED",
        _ => return format!("error code {}", code),
    };
    name.to_string()
}

/// Frames a request: size prefix, v1 request header, body.
pub fn encode_request(
    api_key: i16,
    api_version: i16,
    correlation_id: i32,
    client_id: &str,
    body: &[u8],
) -> BytesMut {
    let header_len = 2 + 2 + 4 + 2 + client_id.len();
    let mut buf = BytesMut::with_capacity(4 + header_len + body.len());
    buf.put_i32((header_len + body.len()) as i32);
    buf.put_i16(api_key);
    buf.put_i16(api_version);
    buf.put_i32(correlation_id);
    put_string(&mut buf, client_id);
    buf.put_slice(body);
    buf
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_i16(s.len() as i16);
    buf.put_slice(s.as_bytes());
}

/// SaslHandshake v1 body.
pub fn encode_sasl_handshake(mechanism: &str) -> BytesMut {
    let mut buf = BytesMut::new();
    put_string(&mut buf, mechanism);
    buf
}

/// SaslAuthenticate v0 body.
pub fn encode_sasl_authenticate(auth_bytes: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(4 + auth_bytes.len());
    buf.put_i32(auth_bytes.len() as i32);
    buf.put_slice(auth_bytes);
    buf
}

/// DescribeLogDirs v1 body asking for every topic (null topic array).
pub fn encode_describe_all_log_dirs() -> BytesMut {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_i32(-1);
    buf
}

/// Bounds-checked reader over a response body.
struct Decoder {
    buf: Bytes,
}

impl Decoder {
    fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(Error::protocol(format!(
                "truncated response reading {} ({} of {} bytes left)",
                what,
                self.buf.remaining(),
                n
            )));
        }
        Ok(())
    }

    fn bool(&mut self, what: &str) -> Result<bool> {
        self.need(1, what)?;
        Ok(self.buf.get_i8() != 0)
    }

    fn i16(&mut self, what: &str) -> Result<i16> {
        self.need(2, what)?;
        Ok(self.buf.get_i16())
    }

    fn i32(&mut self, what: &str) -> Result<i32> {
        self.need(4, what)?;
        Ok(self.buf.get_i32())
    }

    fn i64(&mut self, what: &str) -> Result<i64> {
        self.need(8, what)?;
        Ok(self.buf.get_i64())
    }

    fn nullable_string(&mut self, what: &str) -> Result<Option<String>> {
        let len = self.i16(what)?;
        if len < 0 {
            return Ok(None);
        }
        let len = len as usize;
        self.need(len, what)?;
        let raw = self.buf.split_to(len);
        String::from_utf8(raw.to_vec())
            .map(Some)
            .map_err(|e| Error::protocol(format!("invalid utf-8 in {}: {}", what, e)))
    }

    fn string(&mut self, what: &str) -> Result<String> {
        self.nullable_string(what)?
            .ok_or_else(|| Error::protocol(format!("unexpected null {}", what)))
    }

    fn bytes(&mut self, what: &str) -> Result<Bytes> {
        let len = self.i32(what)?;
        if len < 0 {
            return Ok(Bytes::new());
        }
        let len = len as usize;
        self.need(len, what)?;
        Ok(self.buf.split_to(len))
    }

    fn array_len(&mut self, what: &str) -> Result<usize> {
        let len = self.i32(what)?;
        Ok(len.max(0) as usize)
    }
}

/// Decoded SaslHandshake v1 response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslHandshakeResponse {
    /// Kafka error code
    pub error_code: i16,
    /// Mechanisms enabled on the broker
    pub mechanisms: Vec<String>,
}

/// Decodes a SaslHandshake v1 response body.
pub fn decode_sasl_handshake(body: Bytes) -> Result<SaslHandshakeResponse> {
    let mut d = Decoder::new(body);
    let error_code = d.i16("handshake error_code")?;
    let count = d.array_len("handshake mechanisms")?;
    let mut mechanisms = Vec::with_capacity(count.min(16));
    for _ in 0..count {
        mechanisms.push(d.string("handshake mechanism")?);
    }
    Ok(SaslHandshakeResponse { error_code, mechanisms })
}

/// Decoded SaslAuthenticate v0 response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslAuthenticateResponse {
    /// Kafka error code
    pub error_code: i16,
    /// Broker-supplied error text
    pub error_message: Option<String>,
    /// Mechanism payload
    pub auth_bytes: Bytes,
}

/// Decodes a SaslAuthenticate v0 response body.
pub fn decode_sasl_authenticate(body: Bytes) -> Result<SaslAuthenticateResponse> {
    let mut d = Decoder::new(body);
    Ok(SaslAuthenticateResponse {
        error_code: d.i16("authenticate error_code")?,
        error_message: d.nullable_string("authenticate error_message")?,
        auth_bytes: d.bytes("authenticate auth_bytes")?,
    })
}

/// Decodes a DescribeLogDirs v1 response body into per-directory descriptors.
///
/// Directory error codes are kept on the descriptor, they do not fail decoding.
pub fn decode_describe_log_dirs(body: Bytes) -> Result<LogDirs> {
    let mut d = Decoder::new(body);
    let _throttle_ms = d.i32("throttle_time_ms")?;

    let mut dirs = LogDirs::new();
    for _ in 0..d.array_len("results")? {
        let error_code = d.i16("log dir error_code")?;
        let path = d.string("log_dir")?;
        let mut partitions = Vec::new();
        for _ in 0..d.array_len("topics")? {
            let topic = d.string("topic name")?;
            for _ in 0..d.array_len("partitions")? {
                let partition = d.i32("partition_index")?;
                let size = d.i64("partition_size")?;
                let _offset_lag = d.i64("offset_lag")?;
                let is_future = d.bool("is_future_key")?;
                partitions.push(LogDirPartition {
                    topic: topic.clone(),
                    partition,
                    size,
                    is_future,
                });
            }
        }
        let error = (error_code != 0).then(|| error_code_name(error_code));
        dirs.insert(path.clone(), LogDirDescriptor { path, error, partitions });
    }
    Ok(dirs)
}

/// A single plaintext connection to one broker.
pub struct BrokerConnection {
    stream: TcpStream,
    client_id: String,
    correlation_id: i32,
}

impl BrokerConnection {
    /// Opens a TCP connection to `addr` (`host:port`).
    pub async fn connect(addr: &str, client_id: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::connection(format!("failed to connect to broker {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;
        debug!(addr, "opened broker connection");
        Ok(Self {
            stream,
            client_id: client_id.to_string(),
            correlation_id: 0,
        })
    }

    /// Sends one request and returns the response body (after the correlation ID).
    pub async fn round_trip(&mut self, api_key: i16, api_version: i16, body: &[u8]) -> Result<Bytes> {
        self.correlation_id = self.correlation_id.wrapping_add(1);
        let request = encode_request(api_key, api_version, self.correlation_id, &self.client_id, body);
        self.stream.write_all(&request).await?;
        self.stream.flush().await?;

        let size = self.stream.read_i32().await?;
        if size < 4 || size as usize > MAX_RESPONSE_BYTES {
            return Err(Error::protocol(format!("invalid response size {}", size)));
        }
        let mut frame = vec![0u8; size as usize];
        self.stream.read_exact(&mut frame).await?;

        let mut frame = Bytes::from(frame);
        let correlation_id = frame.get_i32();
        if correlation_id != self.correlation_id {
            return Err(Error::protocol(format!(
                "correlation id mismatch: sent {}, received {}",
                self.correlation_id, correlation_id
            )));
        }
        Ok(frame)
    }

    async fn sasl_authenticate(&mut self, payload: &[u8]) -> Result<Bytes> {
        let body = encode_sasl_authenticate(payload);
        let response =
            decode_sasl_authenticate(self.round_trip(API_SASL_AUTHENTICATE, 0, &body).await?)?;
        if response.error_code != 0 {
            return Err(Error::connection(format!(
                "sasl authentication failed: {}{}",
                error_code_name(response.error_code),
                response
                    .error_message
                    .map(|m| format!(" ({})", m))
                    .unwrap_or_default()
            )));
        }
        Ok(response.auth_bytes)
    }

    /// Runs the SASL handshake and authentication exchange.
    pub async fn authenticate(&mut self, credentials: &SaslCredentials) -> Result<()> {
        let mechanism = credentials.mechanism;
        let body = encode_sasl_handshake(mechanism.as_str());
        let handshake =
            decode_sasl_handshake(self.round_trip(API_SASL_HANDSHAKE, 1, &body).await?)?;
        if handshake.error_code != 0 {
            return Err(Error::connection(format!(
                "sasl handshake failed: {} (broker supports {:?})",
                error_code_name(handshake.error_code),
                handshake.mechanisms
            )));
        }

        match mechanism {
            SaslMechanism::Plain => {
                self.sasl_authenticate(&plain_token(&credentials.username, &credentials.password))
                    .await?;
            }
            SaslMechanism::ScramSha256 | SaslMechanism::ScramSha512 => {
                let mut scram =
                    ScramClient::new(mechanism, &credentials.username, &credentials.password)?;
                let server_first = self.sasl_authenticate(scram.client_first().as_bytes()).await?;
                let server_first = std::str::from_utf8(&server_first)
                    .map_err(|e| Error::protocol(format!("scram server-first: {}", e)))?;
                let client_final = scram.client_final(server_first)?;
                let server_final = self.sasl_authenticate(client_final.as_bytes()).await?;
                let server_final = std::str::from_utf8(&server_final)
                    .map_err(|e| Error::protocol(format!("scram server-final: {}", e)))?;
                scram.verify_server_final(server_final)?;
            }
        }
        debug!(mechanism = %mechanism, "sasl authentication succeeded");
        Ok(())
    }

    /// Describes every log directory of the connected broker.
    pub async fn describe_log_dirs(&mut self) -> Result<LogDirs> {
        let body = encode_describe_all_log_dirs();
        decode_describe_log_dirs(self.round_trip(API_DESCRIBE_LOG_DIRS, 1, &body).await?)
    }
}
