//! Host side of the protocol: one strictly sequential transfer session.
//!
//! `Idle -> Ready (ping) -> Timed (set_timing) -> write_chunk* -> end -> Idle`.
//! Exactly one request is in flight at a time. Any failure leaves the session
//! `Failed`; it must be recreated before another transfer.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chunk::{self, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use crate::image::MemoryImage;
use crate::line_buffer::LineBuffer;
use crate::operation::TransferEvent;
use crate::protocol::{self, Command, ErrorCode, Response, MAX_WRITE_LEN};
use crate::responder::DEFAULT_PULSE_MS;
use crate::transport::{Transport, TransportError};

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Device bookkeeping cost per applied byte, on top of the pulse itself.
pub const DEFAULT_BYTE_OVERHEAD_MS: f64 = 10.0;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Max time to wait for each response line.
    pub response_timeout: Duration,
    /// Sleep between reads while waiting for a response.
    pub poll_interval: Duration,
    pub byte_overhead_ms: f64,
    /// Pulse width assumed until `set_timing` succeeds.
    pub pulse_ms: f64,
    /// Chunk size used until `set_timing` recomputes it.
    pub chunk_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            poll_interval: Duration::from_millis(10),
            byte_overhead_ms: DEFAULT_BYTE_OVERHEAD_MS,
            pulse_ms: DEFAULT_PULSE_MS,
            chunk_size: MAX_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Ready,
    Timed,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Idle => "idle",
            SessionState::Ready => "ready",
            SessionState::Timed => "timing set",
            SessionState::Failed => "failed",
        })
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("no response to '{command}' within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("device rejected '{command}' with {response}")]
    Rejected {
        command: String,
        code: ErrorCode,
        response: String,
    },

    #[error("unexpected response to '{command}': {response:?}")]
    UnexpectedResponse { command: String, response: String },

    #[error("pulse width {0}ms out of range (0.1-1000ms)")]
    InvalidPulseWidth(f64),

    #[error("chunk length {0} out of range (1-255)")]
    InvalidChunkLength(usize),

    #[error("cannot {operation} while session is {state}")]
    OutOfOrder {
        operation: &'static str,
        state: SessionState,
    },

    #[error("session failed earlier; start a new transfer")]
    Unusable,
}

pub struct TransferSession<T> {
    transport: T,
    config: SessionConfig,
    lines: LineBuffer,
    pending: VecDeque<String>,
    state: SessionState,
    pulse_ms: f64,
    chunk_size: usize,
    bytes_sent: usize,
}

impl<T: Transport> TransferSession<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self {
            transport,
            lines: LineBuffer::new(),
            pending: VecDeque::new(),
            state: SessionState::Idle,
            pulse_ms: config.pulse_ms,
            chunk_size: config.chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE),
            bytes_sent: 0,
            config,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn pulse_ms(&self) -> f64 {
        self.pulse_ms
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Check the device is there and listening.
    pub fn ping(&mut self) -> Result<(), SessionError> {
        self.expect_state("ping", &[SessionState::Idle, SessionState::Ready])?;
        self.exchange(Command::Ping, |r| matches!(r, Response::Ready))?;
        self.state = SessionState::Ready;
        Ok(())
    }

    /// Negotiate the write-enable pulse width and resize chunks to match.
    pub fn set_timing(&mut self, pulse_ms: f64) -> Result<(), SessionError> {
        self.expect_state("set timing", &[SessionState::Ready, SessionState::Timed])?;
        if !protocol::pulse_in_range(pulse_ms) {
            return Err(SessionError::InvalidPulseWidth(pulse_ms));
        }

        self.exchange(Command::Timing { pulse_ms }, |r| {
            matches!(r, Response::Timing { .. })
        })?;

        self.state = SessionState::Timed;
        self.pulse_ms = pulse_ms;
        self.chunk_size = chunk::chunk_size_for(
            pulse_ms,
            self.config.byte_overhead_ms,
            self.config.response_timeout,
        );
        info!(
            pulse_ms,
            chunk_size = self.chunk_size,
            "timing set ({:.1}ms per byte)",
            2.0 * pulse_ms + self.config.byte_overhead_ms
        );
        Ok(())
    }

    /// Write `data` starting at the device address `address`.
    pub fn write_chunk(&mut self, address: u8, data: &[u8]) -> Result<(), SessionError> {
        self.expect_state("write", &[SessionState::Timed])?;
        if data.is_empty() || data.len() > MAX_WRITE_LEN {
            return Err(SessionError::InvalidChunkLength(data.len()));
        }

        let cmd = Command::Write {
            address,
            data: data.to_vec(),
        };
        self.exchange(cmd, |r| matches!(r, Response::Write))?;
        self.bytes_sent += data.len();
        Ok(())
    }

    /// Close the transfer; the device returns its bus to idle.
    pub fn end(&mut self) -> Result<(), SessionError> {
        self.expect_state("end", &[SessionState::Ready, SessionState::Timed])?;
        self.exchange(Command::End, |r| matches!(r, Response::End))?;
        self.state = SessionState::Idle;
        Ok(())
    }

    /// Ping, negotiate timing, write every chunk of `image`, end.
    pub fn transfer<F>(
        &mut self,
        image: &MemoryImage,
        pulse_ms: f64,
        mut on_event: F,
    ) -> Result<(), SessionError>
    where
        F: FnMut(TransferEvent),
    {
        if let Some(max) = image.max_address().filter(|&a| a > 0xFF) {
            warn!("image reaches 0x{max:X}; device addresses are 8-bit and will wrap");
        }

        // Drop anything the device sent before we started talking.
        self.transport.clear()?;
        self.lines.clear();
        self.pending.clear();

        self.ping()?;
        on_event(TransferEvent::Ready);

        self.set_timing(pulse_ms)?;
        on_event(TransferEvent::TimingSet {
            pulse_ms,
            chunk_size: self.chunk_size,
        });

        let chunks = chunk::plan_chunks(image, self.chunk_size);
        let total = image.len();
        for (index, c) in chunks.iter().enumerate() {
            self.write_chunk((c.address & 0xFF) as u8, &c.data)?;
            on_event(TransferEvent::Chunk {
                index,
                chunks: chunks.len(),
                address: c.address,
                len: c.data.len(),
                sent: self.bytes_sent,
                total,
            });
        }

        self.end()?;
        on_event(TransferEvent::Ended {
            bytes: self.bytes_sent,
        });
        Ok(())
    }

    fn expect_state(
        &self,
        operation: &'static str,
        allowed: &[SessionState],
    ) -> Result<(), SessionError> {
        if self.state == SessionState::Failed {
            return Err(SessionError::Unusable);
        }
        if !allowed.contains(&self.state) {
            return Err(SessionError::OutOfOrder {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    /// Send one command and wait for a response accepted by `affirmative`.
    /// Anything else fails the session.
    fn exchange<P>(&mut self, cmd: Command, affirmative: P) -> Result<Response, SessionError>
    where
        P: Fn(&Response) -> bool,
    {
        let result = self.round_trip(&cmd).and_then(|line| {
            match Response::parse(&line) {
                Some(r) if affirmative(&r) => Ok(r),
                Some(Response::Error(code)) => Err(SessionError::Rejected {
                    command: cmd.to_string(),
                    code,
                    response: line,
                }),
                _ => Err(SessionError::UnexpectedResponse {
                    command: cmd.to_string(),
                    response: line,
                }),
            }
        });

        if result.is_err() {
            self.state = SessionState::Failed;
        }
        result
    }

    fn round_trip(&mut self, cmd: &Command) -> Result<String, SessionError> {
        let text = cmd.to_string();
        debug!(command = %text, "send");
        self.transport.write_all(format!("{text}\r\n").as_bytes())?;

        let deadline = Instant::now() + self.config.response_timeout;
        let mut buf = [0u8; 256];
        loop {
            while let Some(line) = self.pending.pop_front() {
                if !line.trim().is_empty() {
                    debug!(response = %line, "received");
                    return Ok(line);
                }
            }

            // Checked on every pass: a peer streaming blank lines or noise
            // must not hold the session past its deadline.
            if Instant::now() >= deadline {
                debug!(
                    command = %text,
                    partial = self.lines.pending(),
                    dropped = self.lines.discarded(),
                    "response timed out"
                );
                return Err(SessionError::Timeout {
                    command: text,
                    timeout: self.config.response_timeout,
                });
            }

            let n = self.transport.read_available(&mut buf)?;
            if n > 0 {
                self.pending.extend(self.lines.feed(&buf[..n]));
            } else {
                std::thread::sleep(self.config.poll_interval);
            }
        }
    }
}
