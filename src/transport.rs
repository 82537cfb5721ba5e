use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

use thiserror::Error;

use crate::actuator::Actuator;
use crate::responder::ProtocolHandler;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("serial port '{port}': {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("io: {0}")]
    Io(#[from] io::Error),
}

/// Duplex byte channel between the two peers.
pub trait Transport {
    /// Write every byte, blocking up to the channel's write timeout.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Copy whatever input is already available into `buf`. Never blocks;
    /// returns 0 when nothing is waiting.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Drop buffered input and output.
    fn clear(&mut self) -> Result<(), TransportError>;
}

pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    pub port_name: String,
}

impl SerialTransport {
    /// Open `port_name` as 8N1 without flow control and clear both buffers.
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        write_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let builder = serialport::new(port_name, baud_rate)
            .timeout(write_timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None);

        let port = builder.open().map_err(|e| TransportError::Open {
            port: port_name.to_string(),
            source: e,
        })?;

        let mut t = Self {
            port,
            port_name: port_name.to_string(),
        };
        t.clear()?;
        Ok(t)
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let waiting = self.port.bytes_to_read()? as usize;
        if waiting == 0 || buf.is_empty() {
            return Ok(0);
        }

        let n = waiting.min(buf.len());
        match self.port.read(&mut buf[..n]) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&mut self) -> Result<(), TransportError> {
        self.port.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }
}

/// In-process channel to a [`ProtocolHandler`].
///
/// Every write is handed to the responder immediately; its response lines
/// become readable input.
pub struct LoopbackTransport<A> {
    handler: ProtocolHandler<A>,
    inbox: VecDeque<u8>,
}

impl<A: Actuator> LoopbackTransport<A> {
    pub fn new(handler: ProtocolHandler<A>) -> Self {
        Self {
            handler,
            inbox: VecDeque::new(),
        }
    }

    pub fn handler(&self) -> &ProtocolHandler<A> {
        &self.handler
    }

    pub fn into_handler(self) -> ProtocolHandler<A> {
        self.handler
    }
}

impl<A: Actuator> Transport for LoopbackTransport<A> {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let inbox = &mut self.inbox;
        self.handler.feed_with(bytes, |response| {
            inbox.extend(response.to_string().bytes());
            inbox.push_back(b'\n');
            Ok::<(), TransportError>(())
        })?;
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let n = buf.len().min(self.inbox.len());
        for (slot, b) in buf.iter_mut().zip(self.inbox.drain(..n)) {
            *slot = b;
        }
        Ok(n)
    }

    fn clear(&mut self) -> Result<(), TransportError> {
        self.inbox.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::actuator::SimulatedBus;

    #[test]
    fn test_loopback_returns_framed_responses() {
        let mut t = LoopbackTransport::new(ProtocolHandler::new(SimulatedBus::new()));
        t.write_all(b"P\r\nW:10:02:CAFE\n").unwrap();

        let mut buf = [0u8; 4];
        let mut got = Vec::new();
        loop {
            let n = t.read_available(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(got, b"OK:READY\nOK:WRITE\n");
        assert_eq!(t.handler().actuator().memory()[0x11], 0xFE);
    }

    #[test]
    fn test_loopback_clear_drops_pending_input() {
        let mut t = LoopbackTransport::new(ProtocolHandler::new(SimulatedBus::new()));
        t.write_all(b"P\n").unwrap();
        t.clear().unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(t.read_available(&mut buf).unwrap(), 0);
    }
}
