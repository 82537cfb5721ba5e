use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::{
    actuator::{Actuator, SimulatedBus},
    chunk::{self, Chunk},
    hex::DecodeError,
    image::MemoryImage,
    operation::TransferEvent,
    ports, protocol,
    responder::{ProtocolHandler, DEFAULT_PULSE_MS},
    session::{SessionConfig, SessionError, TransferSession},
    transport::{LoopbackTransport, SerialTransport, Transport, TransportError, DEFAULT_BAUD_RATE},
};

#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Serial port to use; autodetected when `None`.
    ///
    /// Example: "COM6" or "/dev/ttyACM1".
    pub port: Option<String>,

    pub baud_rate: u32,

    /// Write-enable pulse width negotiated with the device.
    pub pulse_ms: f64,

    pub session: SessionConfig,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            pulse_ms: DEFAULT_PULSE_MS,
            session: SessionConfig::default(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferErrorKind {
    NoDevice,
    InvalidHex,
    TransferFailed,
    Unexpected,
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("invalid HEX: {source}")]
    InvalidHex {
        #[source]
        source: DecodeError,
    },

    #[error("pulse width {0}ms out of range (0.1-1000ms)")]
    InvalidPulseWidth(f64),

    #[error("port discovery failed: {source}")]
    Discovery {
        #[source]
        source: ports::DiscoverError,
    },

    #[error("unable to open {port}: {source}")]
    OpenPort {
        port: String,
        #[source]
        source: TransportError,
    },

    #[error("transfer failed: {source}")]
    Session {
        #[source]
        source: SessionError,
    },

    #[error("serve loop failed: {source}")]
    Serve {
        #[source]
        source: TransportError,
    },
}

impl TransferError {
    pub fn kind(&self) -> TransferErrorKind {
        match self {
            TransferError::InvalidHex { .. } => TransferErrorKind::InvalidHex,
            TransferError::Discovery { source } => match source {
                ports::DiscoverError::NoPorts | ports::DiscoverError::WrongFirmware(_) => {
                    TransferErrorKind::NoDevice
                }
                ports::DiscoverError::Serial(_) => TransferErrorKind::Unexpected,
            },
            TransferError::OpenPort { .. } => TransferErrorKind::NoDevice,
            TransferError::Session { .. } => TransferErrorKind::TransferFailed,
            TransferError::InvalidPulseWidth(_) | TransferError::Serve { .. } => {
                TransferErrorKind::Unexpected
            }
        }
    }
}

/// What a transfer would send, computed without touching a device.
#[derive(Debug, Clone)]
pub struct TransferPlan {
    pub image: MemoryImage,
    pub pulse_ms: f64,
    pub chunk_size: usize,
    pub chunks: Vec<Chunk>,
}

impl TransferPlan {
    pub fn bytes(&self) -> usize {
        self.image.len()
    }
}

pub fn load_image<F>(hex_path: &Path, mut on_event: F) -> Result<MemoryImage, TransferError>
where
    F: FnMut(TransferEvent),
{
    let image = MemoryImage::load(hex_path).map_err(|e| TransferError::InvalidHex { source: e })?;

    on_event(TransferEvent::HexLoaded {
        bytes: image.len(),
        regions: image.contiguous_regions(),
        entry_point: image.entry_point(),
    });
    Ok(image)
}

pub fn plan_hex_file<F>(
    hex_path: &Path,
    opts: &TransferOptions,
    on_event: F,
) -> Result<TransferPlan, TransferError>
where
    F: FnMut(TransferEvent),
{
    check_pulse(opts.pulse_ms)?;
    let image = load_image(hex_path, on_event)?;

    let chunk_size = chunk::chunk_size_for(
        opts.pulse_ms,
        opts.session.byte_overhead_ms,
        opts.session.response_timeout,
    );
    let chunks = chunk::plan_chunks(&image, chunk_size);

    Ok(TransferPlan {
        image,
        pulse_ms: opts.pulse_ms,
        chunk_size,
        chunks,
    })
}

/// Load `hex_path`, find the device and stream the image to it.
pub fn transfer_hex_file<F>(
    hex_path: &Path,
    opts: &TransferOptions,
    mut on_event: F,
) -> Result<usize, TransferError>
where
    F: FnMut(TransferEvent),
{
    check_pulse(opts.pulse_ms)?;
    let image = load_image(hex_path, &mut on_event)?;

    let port = resolve_port(opts.port.as_deref(), &mut on_event)?;
    let transport = SerialTransport::open(&port, opts.baud_rate, opts.session.response_timeout)
        .map_err(|e| TransferError::OpenPort {
            port: port.clone(),
            source: e,
        })?;
    on_event(TransferEvent::PortOpen {
        port,
        baud_rate: opts.baud_rate,
    });

    let (bytes, _) = transfer_image(transport, &image, opts, on_event)?;
    Ok(bytes)
}

/// Run the same transfer against an in-process device.
pub fn simulate_hex_file<F>(
    hex_path: &Path,
    opts: &TransferOptions,
    realtime: bool,
    mut on_event: F,
) -> Result<SimulatedBus, TransferError>
where
    F: FnMut(TransferEvent),
{
    check_pulse(opts.pulse_ms)?;
    let image = load_image(hex_path, &mut on_event)?;

    let bus = SimulatedBus::new()
        .with_realtime(realtime)
        .with_history(false);
    let transport = LoopbackTransport::new(ProtocolHandler::new(bus));
    let (_, transport) = transfer_image(transport, &image, opts, on_event)?;
    Ok(transport.into_handler().into_actuator())
}

/// Drive one full session over `transport`; returns bytes sent and the
/// transport for reuse.
pub fn transfer_image<T, F>(
    transport: T,
    image: &MemoryImage,
    opts: &TransferOptions,
    on_event: F,
) -> Result<(usize, T), TransferError>
where
    T: Transport,
    F: FnMut(TransferEvent),
{
    let mut session = TransferSession::new(transport, opts.session.clone());
    session
        .transfer(image, opts.pulse_ms, on_event)
        .map_err(|e| TransferError::Session { source: e })?;

    let bytes = session.bytes_sent();
    info!(bytes, "transfer complete");
    Ok((bytes, session.into_transport()))
}

/// Act as the device on a real serial port until the port fails.
pub fn serve_port(
    port: &str,
    baud_rate: u32,
    realtime: bool,
    poll_interval: Duration,
) -> Result<(), TransferError> {
    let mut transport =
        SerialTransport::open(port, baud_rate, Duration::from_secs(1)).map_err(|e| {
            TransferError::OpenPort {
                port: port.to_string(),
                source: e,
            }
        })?;
    info!(port, baud_rate, "serving simulated device");

    let mut handler = ProtocolHandler::new(SimulatedBus::new().with_realtime(realtime).with_history(false));
    serve(&mut transport, &mut handler, poll_interval, || true)
}

/// Responder loop: poll, then sleep while idle, for as long as
/// `keep_going` says so.
pub fn serve<T, A, K>(
    transport: &mut T,
    handler: &mut ProtocolHandler<A>,
    poll_interval: Duration,
    mut keep_going: K,
) -> Result<(), TransferError>
where
    T: Transport,
    A: Actuator,
    K: FnMut() -> bool,
{
    while keep_going() {
        let answered = handler
            .poll(transport)
            .map_err(|e| TransferError::Serve { source: e })?;
        if answered == 0 {
            std::thread::sleep(poll_interval);
        }
    }
    Ok(())
}

fn check_pulse(pulse_ms: f64) -> Result<(), TransferError> {
    if protocol::pulse_in_range(pulse_ms) {
        Ok(())
    } else {
        Err(TransferError::InvalidPulseWidth(pulse_ms))
    }
}

fn resolve_port<F>(preferred: Option<&str>, on_event: &mut F) -> Result<String, TransferError>
where
    F: FnMut(TransferEvent),
{
    if let Some(port) = preferred {
        on_event(TransferEvent::PortSelected {
            port: port.to_string(),
        });
        return Ok(port.to_string());
    }

    on_event(TransferEvent::DiscoverStart);
    let found = ports::discover_ports().map_err(|e| TransferError::Discovery { source: e })?;
    for (i, p) in found.iter().cloned().enumerate() {
        on_event(TransferEvent::PortDetected { index: i, port: p });
    }
    on_event(TransferEvent::DiscoverDone { count: found.len() });

    let port =
        ports::select_data_port(&found).map_err(|e| TransferError::Discovery { source: e })?;
    on_event(TransferEvent::PortSelected { port: port.clone() });
    Ok(port)
}
