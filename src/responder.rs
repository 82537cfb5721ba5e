//! Device side of the protocol.
//!
//! The handler never blocks: [`ProtocolHandler::poll`] drains whatever input
//! the transport already has, answers every complete line in it and returns.
//! It owns the receive buffer and the pulse width; byte effects go through the
//! [`Actuator`]. The idle reset requested by `E` runs only after `OK:END` has
//! been handed to the caller.

use std::convert::Infallible;
use std::time::Duration;

use tracing::{debug, warn};

use crate::actuator::Actuator;
use crate::line_buffer::LineBuffer;
use crate::protocol::{Command, Response};
use crate::transport::{Transport, TransportError};

pub const DEFAULT_PULSE_MS: f64 = 0.3;

const READ_CHUNK: usize = 256;

pub struct ProtocolHandler<A> {
    actuator: A,
    lines: LineBuffer,
    pulse_ms: f64,
    reset_pending: bool,
}

impl<A: Actuator> ProtocolHandler<A> {
    pub fn new(actuator: A) -> Self {
        Self {
            actuator,
            lines: LineBuffer::new(),
            pulse_ms: DEFAULT_PULSE_MS,
            reset_pending: false,
        }
    }

    pub fn pulse_ms(&self) -> f64 {
        self.pulse_ms
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn into_actuator(self) -> A {
        self.actuator
    }

    /// Feed raw input; returns one response per complete non-blank line.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Response> {
        let mut out = Vec::new();
        let _ = self.feed_with(bytes, |r| {
            out.push(r.clone());
            Ok::<(), Infallible>(())
        });
        out
    }

    /// Feed raw input and pass each response to `reply` as soon as it is
    /// known. Bus effects deferred by a command run after its reply.
    ///
    /// Returns the number of responses passed on.
    pub fn feed_with<E, F>(&mut self, bytes: &[u8], mut reply: F) -> Result<usize, E>
    where
        F: FnMut(&Response) -> Result<(), E>,
    {
        let mut count = 0;
        for line in self.lines.feed(bytes) {
            let Some(response) = self.handle_line(&line) else {
                continue;
            };
            let sent = reply(&response);
            // The bus goes idle even if the reply could not be written.
            self.run_deferred();
            sent?;
            count += 1;
        }
        Ok(count)
    }

    fn run_deferred(&mut self) {
        if std::mem::take(&mut self.reset_pending) {
            self.actuator.reset();
        }
    }

    /// Answer one command line. Blank lines get no response.
    fn handle_line(&mut self, line: &str) -> Option<Response> {
        if line.trim().is_empty() {
            return None;
        }
        debug!(line, "received");

        let response = match Command::parse(line) {
            Ok(cmd) => self.dispatch(cmd),
            Err(code) => {
                warn!(line, %code, "rejected command");
                Response::Error(code)
            }
        };
        debug!(%response, "respond");
        Some(response)
    }

    fn dispatch(&mut self, cmd: Command) -> Response {
        match cmd {
            Command::Ping => Response::Ready,
            Command::Timing { pulse_ms } => {
                self.pulse_ms = pulse_ms;
                debug!(pulse_ms, "timing set");
                Response::Timing { pulse_ms }
            }
            Command::Write { address, data } => {
                let pulse = Duration::from_secs_f64(self.pulse_ms / 1000.0);
                debug!(
                    "write START_ADDR=0x{address:02X} LENGTH={}",
                    data.len()
                );
                for (i, b) in data.iter().copied().enumerate() {
                    // 8-bit address bus: writes past 0xFF wrap to 0x00.
                    let addr = address.wrapping_add(i as u8);
                    self.actuator.apply(addr, b, pulse);
                }
                Response::Write
            }
            Command::End => {
                self.reset_pending = true;
                Response::End
            }
        }
    }

    /// One cooperative tick: read available input, answer complete lines.
    ///
    /// Returns the number of responses written.
    pub fn poll<T: Transport>(&mut self, transport: &mut T) -> Result<usize, TransportError> {
        let mut buf = [0u8; READ_CHUNK];
        let mut written = 0;
        loop {
            let n = transport.read_available(&mut buf)?;
            if n == 0 {
                return Ok(written);
            }
            written += self.feed_with(&buf[..n], |response| {
                transport.write_all(format!("{response}\n").as_bytes())
            })?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::actuator::SimulatedBus;
    use crate::line_buffer::MAX_LINE_LENGTH;
    use crate::protocol::ErrorCode;

    fn handler() -> ProtocolHandler<SimulatedBus> {
        ProtocolHandler::new(SimulatedBus::new())
    }

    fn respond(h: &mut ProtocolHandler<SimulatedBus>, input: &str) -> Vec<String> {
        h.feed(input.as_bytes())
            .iter()
            .map(|r| r.to_string())
            .collect()
    }

    #[test]
    fn test_ping() {
        let mut h = handler();
        assert_eq!(respond(&mut h, "P\n"), vec!["OK:READY"]);
    }

    #[test]
    fn test_timing_accepts_and_echoes() {
        let mut h = handler();
        assert_eq!(respond(&mut h, "T:2.5\r\n"), vec!["OK:TIMING:2.5"]);
        assert_eq!(h.pulse_ms(), 2.5);
    }

    #[test]
    fn test_timing_out_of_range_keeps_state() {
        let mut h = handler();
        assert_eq!(respond(&mut h, "T:2000\n"), vec!["ERR:RANGE"]);
        assert_eq!(h.pulse_ms(), DEFAULT_PULSE_MS);
    }

    #[test]
    fn test_write_applies_bytes_in_order() {
        let mut h = handler();
        assert_eq!(respond(&mut h, "W:00:03:AABBCC\n"), vec!["OK:WRITE"]);
        assert_eq!(
            h.actuator().writes(),
            &[(0x00, 0xAA), (0x01, 0xBB), (0x02, 0xCC)]
        );
    }

    #[test]
    fn test_write_wraps_at_address_space_end() {
        let mut h = handler();
        assert_eq!(respond(&mut h, "W:FE:04:01020304\n"), vec!["OK:WRITE"]);
        let addrs: Vec<u8> = h.actuator().writes().iter().map(|w| w.0).collect();
        assert_eq!(addrs, vec![0xFE, 0xFF, 0x00, 0x01]);
        assert_eq!(h.actuator().memory()[0x01], 0x04);
    }

    #[test]
    fn test_malformed_write_skips_actuation() {
        let mut h = handler();
        assert_eq!(
            respond(&mut h, "W:00:03:AABB\nW:00:01:XY\nW:00\n"),
            vec!["ERR:LENGTH", "ERR:FORMAT", "ERR:FORMAT"]
        );
        assert!(h.actuator().writes().is_empty());
    }

    #[test]
    fn test_end_resets_bus() {
        let mut h = handler();
        assert_eq!(respond(&mut h, "E\n"), vec!["OK:END"]);
        assert_eq!(h.actuator().resets(), 1);
    }

    /// Records bus resets into a log shared with the reply sink.
    struct LoggingBus(Rc<RefCell<Vec<String>>>);

    impl Actuator for LoggingBus {
        fn apply(&mut self, _address: u8, _value: u8, _pulse: Duration) {}

        fn reset(&mut self) {
            self.0.borrow_mut().push("reset".to_string());
        }
    }

    #[test]
    fn test_end_replies_before_reset() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut h = ProtocolHandler::new(LoggingBus(Rc::clone(&log)));

        let n = h
            .feed_with(b"E\nP\n", |r| {
                log.borrow_mut().push(r.to_string());
                Ok::<(), Infallible>(())
            })
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(*log.borrow(), vec!["OK:END", "reset", "OK:READY"]);
    }

    #[test]
    fn test_reset_runs_even_if_reply_fails() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut h = ProtocolHandler::new(LoggingBus(Rc::clone(&log)));

        let err = h.feed_with(b"E\n", |_| Err("link down")).unwrap_err();
        assert_eq!(err, "link down");
        assert_eq!(*log.borrow(), vec!["reset"]);
    }

    #[test]
    fn test_unknown_commands() {
        let mut h = handler();
        assert_eq!(
            respond(&mut h, "X\nHELLO\n\n"),
            vec!["ERR:COMMAND", "ERR:COMMAND"]
        );
    }

    #[test]
    fn test_oversized_line_gets_no_response() {
        let mut h = handler();
        let flood = "W".repeat(MAX_LINE_LENGTH + 1);
        assert!(h.feed(flood.as_bytes()).is_empty());
        assert_eq!(respond(&mut h, "P\n"), vec!["OK:READY"]);
    }

    #[test]
    fn test_every_line_gets_exactly_one_response() {
        let mut h = handler();
        let responses = h.feed(b"P\nT:1\nW:10:01:00\nQ\nE\n");
        assert_eq!(responses.len(), 5);
        assert_eq!(responses[3], Response::Error(ErrorCode::Command));
    }

    struct Wire {
        input: Vec<u8>,
        output: Vec<u8>,
    }

    impl Transport for Wire {
        fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
            self.output.extend_from_slice(bytes);
            Ok(())
        }

        fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            let n = buf.len().min(self.input.len());
            buf[..n].copy_from_slice(&self.input[..n]);
            self.input.drain(..n);
            Ok(n)
        }

        fn clear(&mut self) -> Result<(), TransportError> {
            self.input.clear();
            self.output.clear();
            Ok(())
        }
    }

    #[test]
    fn test_poll_drains_input_and_writes_responses() {
        let mut h = handler();
        let mut wire = Wire {
            input: b"P\nT:0.5\nW:0".to_vec(),
            output: Vec::new(),
        };

        assert_eq!(h.poll(&mut wire).unwrap(), 2);
        assert_eq!(wire.output, b"OK:READY\nOK:TIMING:0.5\n");

        // Nothing new: not an error, just no work.
        assert_eq!(h.poll(&mut wire).unwrap(), 0);

        wire.input.extend_from_slice(b"0:01:7F\n");
        assert_eq!(h.poll(&mut wire).unwrap(), 1);
        assert_eq!(h.actuator().memory()[0], 0x7F);
    }
}
