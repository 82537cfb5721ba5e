use std::path::PathBuf;

use crate::cli;

use serial_hex_loader::{
    image::{ImageStatistics, Region},
    operation::TransferEvent,
    ports::{LoaderPort, PortRuntime},
};

pub mod human;
pub mod json;


#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub verbose: bool,
    pub quiet: bool,
    pub json_timestamps: bool,
    pub json_progress: JsonProgressMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonProgressMode {
    Chunks,
    Percent,
    None,
}

#[derive(Debug, Clone)]
pub struct DryRunSummary {
    pub bytes: usize,
    pub regions: Vec<Region>,
    pub pulse_ms: f64,
    pub chunk_size: usize,
    pub chunks: usize,
    pub port: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InspectReport {
    pub path: PathBuf,
    pub regions: Vec<Region>,
    pub entry_point: Option<u32>,
    pub statistics: ImageStatistics,
    /// Flattened output file and its size.
    pub written: Option<(PathBuf, usize)>,
}

#[derive(Debug, Clone)]
pub enum Event {
    Transfer(TransferEvent),
    TransferSummary(TransferSummary),
    DryRun(DryRunSummary),
    Inspect(InspectReport),
    ListPorts(Vec<LoaderPort>),
    Serving { port: String, baud_rate: u32 },
    Error { code: i32, message: String },
    HintNoDevice,
}

#[derive(Debug, Clone)]
pub struct TransferSummary {
    pub operation: &'static str,
    pub exit_code: i32,
    pub message: Option<String>,

    pub port: Option<String>,
    pub pulse_ms: Option<f64>,
    pub chunk_size: Option<usize>,
    pub chunks: u64,
    pub bytes_sent: u64,
    pub bytes_total: u64,
}

/// Folds transfer events into the final summary line.
pub struct TransferRecorder {
    operation: &'static str,
    port: Option<String>,
    pulse_ms: Option<f64>,
    chunk_size: Option<usize>,
    chunks: u64,
    bytes_sent: u64,
    bytes_total: u64,
}

impl TransferRecorder {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            port: None,
            pulse_ms: None,
            chunk_size: None,
            chunks: 0,
            bytes_sent: 0,
            bytes_total: 0,
        }
    }

    pub fn observe(&mut self, ev: &TransferEvent) {
        match ev {
            TransferEvent::HexLoaded { bytes, .. } => {
                self.bytes_total = *bytes as u64;
            }
            TransferEvent::PortSelected { port } | TransferEvent::PortOpen { port, .. } => {
                self.port = Some(port.clone());
            }
            TransferEvent::TimingSet {
                pulse_ms,
                chunk_size,
            } => {
                self.pulse_ms = Some(*pulse_ms);
                self.chunk_size = Some(*chunk_size);
            }
            TransferEvent::Chunk { sent, .. } => {
                self.chunks = self.chunks.saturating_add(1);
                self.bytes_sent = *sent as u64;
            }
            TransferEvent::Ended { bytes } => {
                self.bytes_sent = *bytes as u64;
            }
            _ => {}
        }
    }

    pub fn finish(self, exit_code: i32, message: Option<String>) -> TransferSummary {
        TransferSummary {
            operation: self.operation,
            exit_code,
            message,
            port: self.port,
            pulse_ms: self.pulse_ms,
            chunk_size: self.chunk_size,
            chunks: self.chunks,
            bytes_sent: self.bytes_sent,
            bytes_total: self.bytes_total,
        }
    }
}

pub trait Reporter {
    fn emit(&mut self, event: Event);
    fn finish(&mut self);
}

fn make(opts: OutputOptions, json: bool) -> Box<dyn Reporter> {
    if json {
        Box::new(json::JsonOutput::new(opts))
    } else {
        Box::new(human::HumanOutput::new(opts))
    }
}

fn plain() -> OutputOptions {
    OutputOptions {
        verbose: false,
        quiet: false,
        json_timestamps: false,
        json_progress: JsonProgressMode::Chunks,
    }
}

pub fn make_for_transfer(args: &cli::TransferArgs) -> Box<dyn Reporter> {
    let json_progress = match args.json_progress {
        cli::JsonProgressArg::Chunks => JsonProgressMode::Chunks,
        cli::JsonProgressArg::Percent => JsonProgressMode::Percent,
        cli::JsonProgressArg::None => JsonProgressMode::None,
    };
    let opts = OutputOptions {
        verbose: args.verbose,
        quiet: args.quiet,
        json_timestamps: args.json_timestamps,
        json_progress,
    };
    make(opts, args.json)
}

pub fn make_for_inspect(args: &cli::InspectArgs) -> Box<dyn Reporter> {
    make(plain(), args.json)
}

pub fn make_for_list(args: &cli::ListArgs) -> Box<dyn Reporter> {
    make(plain(), args.json)
}

pub fn make_for_serve(args: &cli::ServeArgs) -> Box<dyn Reporter> {
    make(plain(), args.json)
}

pub fn port_to_value(index: usize, p: &LoaderPort) -> serde_json::Value {
    let mut v = serde_json::to_value(p)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
    if let serde_json::Value::Object(obj) = &mut v {
        obj.insert("index".to_string(), serde_json::Value::from(index as u64));
    }
    v
}

pub fn format_port_line(index: usize, p: &LoaderPort) -> String {
    let runtime = match p.runtime {
        PortRuntime::CircuitPython => "circuitpython",
        PortRuntime::MicroPython => "micropython",
    };
    format!(
        "[{index}] {runtime:13} {} {:04X}:{:04X} {}",
        p.port_name,
        p.vid,
        p.pid,
        p.product.as_deref().unwrap_or("")
    )
}

pub fn format_region_line(r: &Region) -> String {
    format!("  0x{:08X}-0x{:08X} ({} bytes)", r.start, r.end, r.size())
}
