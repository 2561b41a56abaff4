//! Minimal client for the game server's remote console.
//!
//! Packets follow the Source RCON layout used by Minecraft: a little-endian `i32` length
//! prefix, then `i32` request id, `i32` packet type, the body and two NUL bytes. Every
//! [`RconClient::execute`] call opens its own session, authenticates, runs one command and
//! hangs up.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

use crate::config::RconConfig;

pub const SERVERDATA_AUTH: i32 = 3;
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;
pub const SERVERDATA_EXECCOMMAND: i32 = 2;
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// Request id the server answers with when the password is wrong.
pub const AUTH_FAILED_ID: i32 = -1;

/// Largest command body the server accepts.
pub const MAX_COMMAND_LEN: usize = 1446;

/// Largest inbound frame: 4096 bytes of body plus header and terminators.
pub const MAX_FRAME_LEN: usize = 4096 + 10;

const HEADER_LEN: usize = 8;
const TERMINATOR_LEN: usize = 2;

/// Sends one command to the remote console and returns the server's reply.
#[async_trait]
pub trait RemoteConsole: Send + Sync {
    async fn execute(&self, command: &str) -> Result<String, RconError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RconError {
    #[error("connection refused by {addr}")]
    ConnectionRefused { addr: String },
    #[error("rcon authentication rejected")]
    AuthenticationRejected,
    #[error("rcon {stage} timed out after {timeout:?}")]
    Timeout {
        stage: &'static str,
        timeout: Duration,
    },
    #[error("rcon protocol error: {0}")]
    Protocol(String),
    #[error("rcon i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// One RCON packet, without the length prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub request_id: i32,
    pub kind: i32,
    pub body: String,
}

impl Packet {
    pub fn new(request_id: i32, kind: i32, body: impl Into<String>) -> Self {
        Self {
            request_id,
            kind,
            body: body.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.body.len() + TERMINATOR_LEN);
        buf.put_i32_le(self.request_id);
        buf.put_i32_le(self.kind);
        buf.put_slice(self.body.as_bytes());
        buf.put_u8(0);
        buf.put_u8(0);
        buf.freeze()
    }

    pub fn decode(mut frame: BytesMut) -> Result<Self, RconError> {
        if frame.len() < HEADER_LEN + TERMINATOR_LEN {
            return Err(RconError::Protocol(format!(
                "frame of {} bytes is shorter than the packet header",
                frame.len()
            )));
        }
        let request_id = frame.get_i32_le();
        let kind = frame.get_i32_le();

        let mut body: &[u8] = &frame;
        while let Some((&0, rest)) = body.split_last() {
            body = rest;
        }

        Ok(Self {
            request_id,
            kind,
            body: String::from_utf8_lossy(body).into_owned(),
        })
    }
}

type RconFramed = Framed<TcpStream, LengthDelimitedCodec>;

/// Short-lived-session RCON client.
#[derive(Debug)]
pub struct RconClient {
    config: RconConfig,
    next_id: AtomicU32,
}

impl RconClient {
    pub fn new(config: RconConfig) -> Self {
        Self {
            config,
            next_id: AtomicU32::new(0),
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Ids stay positive so they never collide with [`AUTH_FAILED_ID`].
    fn next_request_id(&self) -> i32 {
        let raw = self.next_id.fetch_add(1, Ordering::Relaxed) % (i32::MAX as u32);
        raw as i32 + 1
    }

    async fn within<T, F>(&self, stage: &'static str, future: F) -> Result<T, RconError>
    where
        F: Future<Output = Result<T, RconError>>,
    {
        let timeout = self.config.timeout;
        tokio::time::timeout(timeout, future)
            .await
            .map_err(|_| RconError::Timeout { stage, timeout })?
    }

    async fn connect(&self) -> Result<RconFramed, RconError> {
        let stream = TcpStream::connect((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::ConnectionRefused => RconError::ConnectionRefused {
                    addr: self.address(),
                },
                _ => RconError::Io(err),
            })?;

        Ok(LengthDelimitedCodec::builder()
            .little_endian()
            .length_field_length(4)
            .max_frame_length(MAX_FRAME_LEN)
            .new_framed(stream))
    }

    async fn login(&self, framed: &mut RconFramed) -> Result<(), RconError> {
        let request_id = self.next_request_id();
        let packet = Packet::new(request_id, SERVERDATA_AUTH, self.config.password.clone());
        framed.send(packet.encode()).await?;

        loop {
            let reply = read_packet(framed).await?;
            if reply.request_id == AUTH_FAILED_ID {
                return Err(RconError::AuthenticationRejected);
            }
            // Some servers send an empty RESPONSE_VALUE ahead of the auth response.
            if reply.request_id == request_id && reply.kind == SERVERDATA_AUTH_RESPONSE {
                return Ok(());
            }
        }
    }

    async fn run(&self, framed: &mut RconFramed, command: &str) -> Result<String, RconError> {
        let request_id = self.next_request_id();
        let packet = Packet::new(request_id, SERVERDATA_EXECCOMMAND, command);
        framed.send(packet.encode()).await?;

        loop {
            let reply = read_packet(framed).await?;
            if reply.request_id == AUTH_FAILED_ID {
                return Err(RconError::AuthenticationRejected);
            }
            if reply.request_id == request_id && reply.kind == SERVERDATA_RESPONSE_VALUE {
                return Ok(reply.body);
            }
        }
    }
}

async fn read_packet(framed: &mut RconFramed) -> Result<Packet, RconError> {
    match framed.next().await {
        Some(frame) => Packet::decode(frame?),
        None => Err(RconError::Protocol(
            "connection closed by server".to_string(),
        )),
    }
}

#[async_trait]
impl RemoteConsole for RconClient {
    async fn execute(&self, command: &str) -> Result<String, RconError> {
        if command.len() > MAX_COMMAND_LEN {
            return Err(RconError::Protocol(format!(
                "command of {} bytes exceeds the {MAX_COMMAND_LEN} byte limit",
                command.len()
            )));
        }
        if command.contains('\0') {
            return Err(RconError::Protocol(
                "command contains a NUL byte".to_string(),
            ));
        }

        let mut framed = self.within("connect", self.connect()).await?;
        self.within("login", self.login(&mut framed)).await?;
        let response = self.within("command", self.run(&mut framed, command)).await?;

        debug!(addr = %self.address(), command, response = %response, "rcon command executed");
        Ok(response)
    }
}
