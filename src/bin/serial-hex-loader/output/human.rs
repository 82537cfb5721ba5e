use std::io::{IsTerminal, Write};

use serial_hex_loader::{operation::TransferEvent, ports::LoaderPort};

use crate::output::{
    format_port_line, format_region_line, DryRunSummary, Event, InspectReport, OutputOptions,
    Reporter, TransferSummary,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Quiet,
    Verbose,
    Progress,
}

pub struct HumanOutput {
    opts: OutputOptions,
    is_tty: bool,
    progress_active: bool,
    last_percent: Option<u64>,
    detected: Vec<Option<LoaderPort>>,
}

impl HumanOutput {
    pub fn new(opts: OutputOptions) -> Self {
        Self {
            opts,
            is_tty: std::io::stderr().is_terminal(),
            progress_active: false,
            last_percent: None,
            detected: Vec::new(),
        }
    }

    fn mode(&self) -> Mode {
        if self.opts.quiet {
            Mode::Quiet
        } else if self.opts.verbose {
            Mode::Verbose
        } else {
            Mode::Progress
        }
    }

    fn remember_port(&mut self, index: usize, port: LoaderPort) {
        if self.detected.len() <= index {
            self.detected.resize_with(index + 1, || None);
        }
        self.detected[index] = Some(port);
    }

    fn finish_line(&mut self) {
        if self.progress_active {
            eprintln!();
            self.progress_active = false;
        }
    }

    fn println(&mut self, msg: &str) {
        if self.mode() == Mode::Quiet {
            return;
        }
        self.finish_line();
        eprintln!("{msg}");
    }

    fn progress_update(&mut self, sent: usize, total: usize, addr: u32) {
        if self.mode() != Mode::Progress {
            return;
        }
        let percent = (sent as u64 * 100).saturating_div(total.max(1) as u64);

        if self.is_tty {
            eprint!("\r  transferring {percent:3}% ({sent}/{total} bytes) @ 0x{addr:04X}");
            let _ = std::io::stderr().flush();
            self.progress_active = true;
            self.last_percent = Some(percent);
            return;
        }

        let last = self.last_percent.unwrap_or(0);
        if self.last_percent.is_none() || percent == 100 || percent >= last + 10 {
            self.last_percent = Some(percent);
            self.println(&format!("  transferring {percent:3}% ({sent}/{total} bytes)"));
        }
    }

    pub(crate) fn no_device_help_lines(detected: &[Option<LoaderPort>]) -> Vec<String> {
        detected
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.as_ref().map(|p| format_port_line(i, p)))
            .collect()
    }

    fn print_no_device_help(&mut self) {
        if self.mode() == Mode::Quiet {
            return;
        }

        let lines = Self::no_device_help_lines(&self.detected);
        if !lines.is_empty() {
            self.println("");
            self.println("Detected ports:");
            for line in lines {
                self.println(&line);
            }
        }
        self.println(
            "\nHint: pass --port <name>, or run `serial-hex-loader list` to see candidate ports.",
        );
    }
}

impl HumanOutput {
    fn on_transfer_event(&mut self, ev: TransferEvent) {
        match ev {
            TransferEvent::HexLoaded {
                bytes,
                regions,
                entry_point,
            } => {
                if self.mode() == Mode::Verbose {
                    self.println(&format!(
                        "hex loaded: {bytes} bytes in {} region(s)",
                        regions.len()
                    ));
                    for r in &regions {
                        self.println(&format_region_line(r));
                    }
                    if let Some(ep) = entry_point {
                        self.println(&format!("  entry point 0x{ep:08X}"));
                    }
                } else if self.mode() == Mode::Progress {
                    self.println(&format!(
                        "hex loaded: {bytes} bytes ({} regions)",
                        regions.len()
                    ));
                }
                self.last_percent = None;
            }
            TransferEvent::DiscoverStart => {
                if self.mode() == Mode::Verbose {
                    self.println("discover ports...");
                }
            }
            TransferEvent::PortDetected { index, port } => {
                let line = format_port_line(index, &port);
                self.remember_port(index, port);
                if self.mode() == Mode::Verbose {
                    self.println(&line);
                }
            }
            TransferEvent::DiscoverDone { count } => {
                if self.mode() == Mode::Verbose {
                    self.println(&format!("found {count} port(s)"));
                }
            }
            TransferEvent::PortSelected { port } => {
                if self.mode() != Mode::Quiet {
                    self.println(&format!("port: {port}"));
                }
            }
            TransferEvent::PortOpen { port, baud_rate } => {
                if self.mode() == Mode::Verbose {
                    self.println(&format!("opened {port} @ {baud_rate} baud (8N1)"));
                }
            }
            TransferEvent::Ready => {
                if self.mode() != Mode::Quiet {
                    self.println("device ready");
                }
            }
            TransferEvent::TimingSet {
                pulse_ms,
                chunk_size,
            } => {
                if self.mode() != Mode::Quiet {
                    self.println(&format!(
                        "pulse width {pulse_ms}ms, chunk size {chunk_size} bytes"
                    ));
                }
            }
            TransferEvent::Chunk {
                index,
                chunks,
                address,
                len,
                sent,
                total,
            } => {
                if self.mode() == Mode::Verbose {
                    self.println(&format!(
                        "write chunk {}/{chunks} @ 0x{address:04X} ({len} bytes)",
                        index + 1
                    ));
                } else {
                    self.progress_update(sent, total, address);
                }
            }
            TransferEvent::Ended { bytes } => {
                self.finish_line();
                if self.mode() != Mode::Quiet {
                    self.println(&format!("transfer complete: {bytes} bytes"));
                }
            }
        }
    }
}

impl Reporter for HumanOutput {
    fn emit(&mut self, event: Event) {
        match event {
            Event::Transfer(ev) => self.on_transfer_event(ev),
            Event::TransferSummary(summary) => emit_summary(summary, self),
            Event::DryRun(summary) => emit_dry_run(summary, self),
            Event::Inspect(report) => emit_inspect(report, self),
            Event::ListPorts(ports) => emit_list_ports(&ports, self),
            Event::Serving { port, baud_rate } => {
                self.println(&format!(
                    "serving simulated device on {port} @ {baud_rate} baud (Ctrl-C to stop)"
                ));
            }
            Event::Error { code: _, message } => {
                self.finish_line();
                eprintln!("error: {message}");
            }
            Event::HintNoDevice => self.print_no_device_help(),
        }
    }

    fn finish(&mut self) {
        self.finish_line();
    }
}

fn emit_summary(summary: TransferSummary, out: &mut HumanOutput) {
    if out.mode() != Mode::Verbose || summary.exit_code == 0 {
        return;
    }
    out.println(&format!(
        "{} stopped after {}/{} bytes in {} chunk(s)",
        summary.operation, summary.bytes_sent, summary.bytes_total, summary.chunks
    ));
}

fn emit_list_ports(ports: &[LoaderPort], out: &mut HumanOutput) {
    if ports.is_empty() {
        out.println("No candidate ports found (CircuitPython 239A or MicroPython 2E8A USB serial)");
        return;
    }

    for (i, p) in ports.iter().enumerate() {
        out.println(&format_port_line(i, p));
    }
}

fn emit_inspect(report: InspectReport, out: &mut HumanOutput) {
    out.println(&format!("{}", report.path.display()));
    out.println("memory map:");
    if report.regions.is_empty() {
        out.println("  (empty)");
    }
    for r in &report.regions {
        out.println(&format_region_line(r));
    }

    let stats = &report.statistics;
    out.println(&format!(
        "total: {} bytes, {} records ({} data)",
        stats.total_bytes, stats.total_records, stats.data_records
    ));
    for (kind, count) in &stats.record_kinds {
        out.println(&format!("  {kind:?} (0x{:02X}): {count}", kind.code()));
    }
    if let Some(ep) = report.entry_point {
        out.println(&format!("entry point: 0x{ep:08X}"));
    }
    if let Some((path, size)) = &report.written {
        out.println(&format!("wrote {size} bytes to {}", path.display()));
    }
}

fn emit_dry_run(summary: DryRunSummary, out: &mut HumanOutput) {
    if out.mode() == Mode::Quiet {
        return;
    }

    out.println("Dry run OK");
    out.println(&format!(
        "Image: {} bytes in {} region(s)",
        summary.bytes,
        summary.regions.len()
    ));
    out.println(&format!(
        "Pulse: {}ms -> {} chunk(s) of up to {} bytes",
        summary.pulse_ms, summary.chunks, summary.chunk_size
    ));
    match &summary.port {
        Some(p) => out.println(&format!("Port: {p}")),
        None => out.println("Port: autodetect"),
    }
}
