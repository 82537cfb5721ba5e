use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use serial_hex_loader::{protocol, responder::DEFAULT_PULSE_MS, transport::DEFAULT_BAUD_RATE};

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum JsonProgressArg {
    /// Emit a JSON event for every acknowledged chunk.
    Chunks,
    /// Emit fewer JSON events by throttling chunk output to percent changes.
    Percent,
    /// Do not emit per-chunk progress events.
    None,
}

#[derive(Parser)]
#[command(name = "serial-hex-loader")]
#[command(about = "Intel HEX loader for 8-bit bus writers over USB serial")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Stream an Intel HEX image to the device.
    Transfer(TransferArgs),

    /// Show the memory map of an Intel HEX file, optionally flattening it to binary.
    Inspect(InspectArgs),

    /// List candidate USB serial ports.
    List(ListArgs),

    /// Act as the device on a serial port (simulated bus).
    Serve(ServeArgs),
}

#[derive(Parser)]
pub struct TransferArgs {
    /// Path to Intel HEX image.
    pub hex: PathBuf,

    /// Serial port (autodetected when omitted), e.g. COM6 or /dev/ttyACM1.
    #[arg(long, short)]
    pub port: Option<String>,

    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud: u32,

    /// Write-enable pulse width in milliseconds (0.1-1000).
    #[arg(long, default_value_t = DEFAULT_PULSE_MS, value_parser = parse_pulse)]
    pub pulse: f64,

    /// Max time to wait for each device response.
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,

    /// Decode and plan chunks without opening a port.
    #[arg(long, conflicts_with = "simulate")]
    pub dry_run: bool,

    /// Run the transfer against an in-process simulated device.
    #[arg(long)]
    pub simulate: bool,

    /// Make the simulated device take real time per byte.
    #[arg(long, requires = "simulate")]
    pub realtime: bool,

    /// Emit JSON line events to stdout.
    #[arg(long)]
    pub json: bool,

    /// Include monotonic timestamps in JSON events (milliseconds since process start).
    #[arg(long, requires = "json")]
    pub json_timestamps: bool,

    /// JSON progress verbosity.
    ///
    /// - chunks: emit every chunk (most verbose)
    /// - percent: emit fewer progress events
    /// - none: no per-chunk progress events
    #[arg(long, value_enum, default_value_t = JsonProgressArg::Percent, requires = "json")]
    pub json_progress: JsonProgressArg,

    /// Reduce output (only errors).
    #[arg(long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// More output to stderr.
    #[arg(long, short)]
    pub verbose: bool,
}

#[derive(Parser)]
pub struct InspectArgs {
    /// Path to Intel HEX image.
    pub hex: PathBuf,

    /// Write the flattened image to this file.
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Byte used for gaps when flattening (hex).
    #[arg(long, default_value = "FF", value_parser = parse_hex_u8)]
    pub fill: u8,

    /// First address to flatten (hex, default: lowest stored address).
    #[arg(long, value_parser = parse_hex_u32)]
    pub start: Option<u32>,

    /// Last address to flatten, inclusive (hex, default: highest stored address).
    #[arg(long, value_parser = parse_hex_u32)]
    pub end: Option<u32>,

    /// Emit JSON output.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct ListArgs {
    /// Emit JSON line output.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct ServeArgs {
    /// Serial port to listen on.
    #[arg(long, short)]
    pub port: String,

    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud: u32,

    /// Spend real time per byte like hardware would.
    #[arg(long)]
    pub realtime: bool,

    /// Sleep between polls when idle.
    #[arg(long, default_value_t = 10)]
    pub poll_ms: u64,

    /// Emit JSON output.
    #[arg(long)]
    pub json: bool,
}

fn parse_pulse(s: &str) -> Result<f64, String> {
    let v: f64 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    if protocol::pulse_in_range(v) {
        Ok(v)
    } else {
        Err(format!(
            "must be within {}-{} ms",
            protocol::MIN_PULSE_MS,
            protocol::MAX_PULSE_MS
        ))
    }
}

fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

fn parse_hex_u32(s: &str) -> Result<u32, String> {
    u32::from_str_radix(strip_hex_prefix(s), 16).map_err(|e| format!("'{s}': {e}"))
}

fn parse_hex_u8(s: &str) -> Result<u8, String> {
    u8::from_str_radix(strip_hex_prefix(s), 16).map_err(|e| format!("'{s}': {e}"))
}
