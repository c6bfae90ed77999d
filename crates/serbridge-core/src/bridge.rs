//! Single-client serial to TCP forwarding.
//!
//! A [`Bridge`] moves through `AwaitingConnection -> Forwarding -> Closed`
//! exactly once. The serial source is opened before the listener is bound, so
//! a missing port never exposes a socket.

use std::io::{self, ErrorKind, Write};
use std::net::{self, Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use crate::encoding::{decode_line, encode_frame};
use crate::error::{BridgeError, Result};
use crate::serial_source::{LineSource, SerialConfig, SerialSource};
use crate::shutdown::Shutdown;

pub const DEFAULT_TCP_PORT: u16 = 8051;
pub const DEFAULT_LISTEN_ADDR: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_TCP_PORT));
pub const DEFAULT_IDLE_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub serial: SerialConfig,
    pub listen_addr: SocketAddr,
    /// Pause between loop iterations.
    pub idle_delay: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            listen_addr: DEFAULT_LISTEN_ADDR,
            idle_delay: DEFAULT_IDLE_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    AwaitingConnection,
    Forwarding,
    Closed,
}

/// Why a session ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    ClientDisconnected,
    Interrupted,
}

pub struct Bridge<S> {
    source: Option<S>,
    listener: Option<TcpListener>,
    client: Option<TcpStream>,
    local_addr: SocketAddr,
    idle_delay: Duration,
    state: BridgeState,
    forwarded: u64,
}

impl Bridge<SerialSource> {
    /// Opens the serial port, then binds the listener.
    pub fn open(cfg: &BridgeConfig) -> Result<Self> {
        let source = SerialSource::open(&cfg.serial)?;
        Self::with_source(source, cfg.listen_addr, cfg.idle_delay)
    }
}

impl<S> Bridge<S> {
    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Lines written to the client so far.
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    /// Releases the client, the serial source and the listener. Idempotent.
    pub fn close(&mut self) {
        if self.state == BridgeState::Closed {
            return;
        }
        if let Some(client) = self.client.take() {
            let _ = client.shutdown(net::Shutdown::Both);
        }
        drop(self.source.take());
        drop(self.listener.take());
        self.state = BridgeState::Closed;
        log::info!("bridge closed after {} forwarded lines", self.forwarded);
    }

    fn expect_state(&self, expected: BridgeState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(BridgeError::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }
}

impl<S: LineSource> Bridge<S> {
    /// Binds the listener around an already opened source.
    pub fn with_source(source: S, listen_addr: SocketAddr, idle_delay: Duration) -> Result<Self> {
        let bind_err = |source| BridgeError::Bind {
            addr: listen_addr,
            source,
        };
        let listener = TcpListener::bind(listen_addr).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        log::info!("listening on {local_addr}");

        Ok(Self {
            source: Some(source),
            listener: Some(listener),
            client: None,
            local_addr,
            idle_delay,
            state: BridgeState::AwaitingConnection,
            forwarded: 0,
        })
    }

    /// Blocks until the one client of this bridge connects.
    pub fn accept(&mut self) -> Result<SocketAddr> {
        self.expect_state(BridgeState::AwaitingConnection)?;
        let listener = self.listener.as_ref().ok_or(BridgeError::InvalidState {
            expected: BridgeState::AwaitingConnection,
            actual: self.state,
        })?;
        let (stream, peer) = listener.accept().map_err(BridgeError::Accept)?;
        log::info!("client connected from {peer}");

        self.client = Some(stream);
        self.state = BridgeState::Forwarding;
        Ok(peer)
    }

    /// Forwards lines until the client goes away or `shutdown` fires, echoing
    /// each forwarded line to `echo`. The bridge is closed on return, whatever
    /// the outcome.
    pub fn run<W: Write>(&mut self, shutdown: &mut Shutdown, echo: &mut W) -> Result<SessionEnd> {
        let outcome = self.forward(shutdown, echo);
        self.close();
        outcome
    }

    fn forward<W: Write>(&mut self, shutdown: &mut Shutdown, echo: &mut W) -> Result<SessionEnd> {
        self.expect_state(BridgeState::Forwarding)?;
        let (Some(source), Some(client)) = (self.source.as_mut(), self.client.as_mut()) else {
            return Err(BridgeError::InvalidState {
                expected: BridgeState::Forwarding,
                actual: self.state,
            });
        };
        pump(source, client, echo, shutdown, self.idle_delay, &mut self.forwarded)
    }
}

impl<S> Drop for Bridge<S> {
    fn drop(&mut self) {
        self.close();
    }
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
    )
}

fn pump<S, C, W>(
    source: &mut S,
    client: &mut C,
    echo: &mut W,
    shutdown: &mut Shutdown,
    idle_delay: Duration,
    forwarded: &mut u64,
) -> Result<SessionEnd>
where
    S: LineSource + ?Sized,
    C: Write,
    W: Write,
{
    loop {
        if shutdown.is_requested() {
            log::info!("stop requested");
            return Ok(SessionEnd::Interrupted);
        }

        let raw = source.read_line()?;
        if let Some(line) = decode_line(&raw) {
            if let Err(e) = client.write_all(&encode_frame(&line)) {
                if is_disconnect(&e) {
                    log::warn!("client disconnected: {e}");
                    return Ok(SessionEnd::ClientDisconnected);
                }
                return Err(BridgeError::ClientWrite(e));
            }
            *forwarded += 1;
            log::debug!("forwarded line {forwarded}: {line}");
            // The echo is best effort; a closed stdout must not end the session.
            let _ = writeln!(echo, "-> {line}");
        }

        thread::sleep(idle_delay);
    }
}
