//! One-shot console sessions.
//!
//! A session owns exactly one connection and walks it through
//! `Disconnected → Connecting → Authenticating → Ready → Closed`. Any failure
//! moves it to `Errored`; [`ConsoleSession::close`] then releases the socket and
//! marks the session `Closed`. Sessions are never reused.

use crate::packet::{
    read_packet, write_packet, FrameError, Packet, AUTH_REJECTED_ID, PACKET_AUTH,
    PACKET_AUTH_RESPONSE, PACKET_EXEC_COMMAND, PACKET_RESPONSE_VALUE,
};
use crate::ConsoleError;
use log::{debug, info, warn};
use rand::Rng;
use shared::config::{
    ConsoleConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IDLE_TIMEOUT, DEFAULT_READ_TIMEOUT,
};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    Closed,
    Errored,
}

/// Timeouts applied to a single session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleOptions {
    /// Upper bound on establishing the TCP connection.
    pub connect_timeout: Duration,
    /// How long to wait for the first packet of any reply.
    pub read_timeout: Duration,
    /// Silence after a reply fragment that ends the reply.
    pub idle_timeout: Duration,
}

impl Default for ConsoleOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl From<&ConsoleConfig> for ConsoleOptions {
    fn from(config: &ConsoleConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
            idle_timeout: config.idle_timeout,
        }
    }
}

pub struct ConsoleSession<S = TcpStream> {
    host: String,
    port: u16,
    options: ConsoleOptions,
    state: ConnectionState,
    stream: Option<S>,
    next_id: i32,
}

impl ConsoleSession<TcpStream> {
    pub fn new(host: impl Into<String>, port: u16, options: ConsoleOptions) -> Self {
        Self {
            host: host.into(),
            port,
            options,
            state: ConnectionState::Disconnected,
            stream: None,
            next_id: rand::thread_rng().gen_range(1..=i32::MAX / 2),
        }
    }

    pub async fn connect(&mut self) -> Result<(), ConsoleError> {
        if self.state != ConnectionState::Disconnected {
            let err = ConsoleError::Protocol(format!("cannot connect from {:?}", self.state));
            return Err(self.fail(err));
        }

        self.state = ConnectionState::Connecting;
        let addr = self.addr();
        let wait = self.options.connect_timeout;

        let connected = timeout(wait, TcpStream::connect(addr.as_str())).await;
        match connected {
            Err(_) => Err(self.fail(ConsoleError::Timeout(wait))),
            Ok(Err(source)) => Err(self.fail(ConsoleError::Connection { addr, source })),
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Could not disable Nagle on console socket {}: {}", addr, e);
                }
                info!("Connected to console at {}", addr);
                self.stream = Some(stream);
                Ok(())
            }
        }
    }
}

impl<S> ConsoleSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an already-open stream; the session starts out `Connecting`.
    pub fn from_stream(
        host: impl Into<String>,
        port: u16,
        stream: S,
        options: ConsoleOptions,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            options,
            state: ConnectionState::Connecting,
            stream: Some(stream),
            next_id: 1,
        }
    }

    pub fn with_first_request_id(mut self, id: i32) -> Self {
        self.next_id = id;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub async fn authenticate(&mut self, credential: &str) -> Result<(), ConsoleError> {
        if self.state != ConnectionState::Connecting || self.stream.is_none() {
            let err = ConsoleError::Protocol(format!(
                "cannot authenticate from state {:?}",
                self.state
            ));
            return Err(self.fail(err));
        }

        self.state = ConnectionState::Authenticating;
        let id = self.take_request_id();
        self.send(&Packet::new(id, PACKET_AUTH, credential)).await?;

        // One budget for the whole login, however many packets precede the ack.
        let budget = self.options.read_timeout;
        let deadline = Instant::now() + budget;

        loop {
            let wait = deadline.saturating_duration_since(Instant::now());
            let reply = match self.receive(wait).await? {
                Some(reply) => reply,
                None => return Err(self.fail(ConsoleError::Timeout(budget))),
            };

            match reply.kind {
                // Some servers emit an empty value packet ahead of the acknowledgement.
                PACKET_RESPONSE_VALUE if reply.body.is_empty() => continue,
                PACKET_AUTH_RESPONSE if reply.id == AUTH_REJECTED_ID => {
                    let err = ConsoleError::Authentication("credential rejected".to_string());
                    return Err(self.fail(err));
                }
                PACKET_AUTH_RESPONSE if reply.id == id => {
                    self.state = ConnectionState::Ready;
                    debug!("Authenticated with console at {}", self.addr());
                    return Ok(());
                }
                PACKET_AUTH_RESPONSE => {
                    let err = ConsoleError::Authentication(format!(
                        "acknowledgement id {} does not match request {}",
                        reply.id, id
                    ));
                    return Err(self.fail(err));
                }
                other => {
                    let err = ConsoleError::Protocol(format!(
                        "unexpected packet type {} during authentication",
                        other
                    ));
                    return Err(self.fail(err));
                }
            }
        }
    }

    /// Runs one command and collects its reply.
    ///
    /// Fragment payloads sharing the command's id are concatenated until an
    /// empty fragment arrives or the peer stays silent for the idle timeout.
    /// The joined bytes are decoded as UTF-8 once, at the end.
    pub async fn execute(&mut self, command: &str) -> Result<String, ConsoleError> {
        if self.state != ConnectionState::Ready {
            let err = ConsoleError::Protocol(format!(
                "cannot send a command from state {:?}",
                self.state
            ));
            return Err(self.fail(err));
        }

        let id = self.take_request_id();
        let request = Packet::new(id, PACKET_EXEC_COMMAND, command);
        self.send(&request).await?;

        let mut reply = Vec::new();
        let mut fragments = 0usize;

        loop {
            let wait = if fragments == 0 {
                self.options.read_timeout
            } else {
                self.options.idle_timeout
            };

            let packet = match self.receive(wait).await? {
                Some(packet) => packet,
                None if fragments == 0 => return Err(self.fail(ConsoleError::Timeout(wait))),
                None => break,
            };

            if packet.id != id {
                debug!(
                    "Skipping console packet {} while waiting for {}",
                    packet.id, id
                );
                continue;
            }
            if packet.kind != PACKET_RESPONSE_VALUE {
                let err = ConsoleError::Protocol(format!(
                    "unexpected packet type {} in command reply",
                    packet.kind
                ));
                return Err(self.fail(err));
            }
            if packet.body.is_empty() {
                break;
            }

            reply.extend_from_slice(&packet.body);
            fragments += 1;
        }

        debug!(
            "Console reply to request {} arrived in {} fragment(s)",
            id, fragments
        );
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }

    /// Authenticates and runs a single command on an open session.
    pub async fn exchange(
        &mut self,
        credential: &str,
        command: &str,
    ) -> Result<String, ConsoleError> {
        self.authenticate(credential).await?;
        self.execute(command).await
    }

    /// Releases the socket. Safe to call from any state.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(
                    "Console socket {} did not shut down cleanly: {}",
                    self.addr(),
                    e
                );
            }
        }

        if self.state != ConnectionState::Closed {
            debug!(
                "Closing console session {} from state {:?}",
                self.addr(),
                self.state
            );
        }
        self.state = ConnectionState::Closed;
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn take_request_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id = if self.next_id >= i32::MAX {
            1
        } else {
            self.next_id + 1
        };
        id
    }

    fn fail(&mut self, err: ConsoleError) -> ConsoleError {
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Errored;
        }
        warn!("Console session {} failed: {}", self.addr(), err);
        err
    }

    fn frame_error(&self, err: FrameError) -> ConsoleError {
        match err {
            FrameError::Io(source) if source.kind() == io::ErrorKind::UnexpectedEof => {
                ConsoleError::Protocol("connection closed by the console".to_string())
            }
            FrameError::Io(source) => ConsoleError::Connection {
                addr: self.addr(),
                source,
            },
            other => ConsoleError::Protocol(other.to_string()),
        }
    }

    async fn send(&mut self, packet: &Packet) -> Result<(), ConsoleError> {
        let wait = self.options.read_timeout;
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => {
                let err = ConsoleError::Protocol("session is not connected".to_string());
                return Err(self.fail(err));
            }
        };

        let written = timeout(wait, write_packet(stream, packet)).await;
        match written {
            Err(_) => Err(self.fail(ConsoleError::Timeout(wait))),
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                let err = self.frame_error(e);
                Err(self.fail(err))
            }
        }
    }

    /// `Ok(None)` when nothing arrived within `wait`.
    async fn receive(&mut self, wait: Duration) -> Result<Option<Packet>, ConsoleError> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => {
                let err = ConsoleError::Protocol("session is not connected".to_string());
                return Err(self.fail(err));
            }
        };

        let read = timeout(wait, read_packet(stream)).await;
        match read {
            Err(_) => Ok(None),
            Ok(Ok(packet)) => Ok(Some(packet)),
            Ok(Err(e)) => {
                let err = self.frame_error(e);
                Err(self.fail(err))
            }
        }
    }
}

/// Sends one command to the console at `host:port` and returns its reply.
///
/// The connection is opened for this command only and is always closed before
/// returning, whether the exchange succeeded or not.
pub async fn send_command(
    host: &str,
    port: u16,
    credential: &str,
    command: &str,
) -> Result<String, ConsoleError> {
    send_command_with(host, port, credential, command, ConsoleOptions::default()).await
}

pub async fn send_command_with(
    host: &str,
    port: u16,
    credential: &str,
    command: &str,
    options: ConsoleOptions,
) -> Result<String, ConsoleError> {
    let mut session = ConsoleSession::new(host, port, options);

    let result = match session.connect().await {
        Ok(()) => session.exchange(credential, command).await,
        Err(e) => Err(e),
    };

    session.close().await;
    result
}
