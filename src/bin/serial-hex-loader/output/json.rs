use std::collections::BTreeMap;
use std::time::Instant;

use serial_hex_loader::{image::Region, operation::TransferEvent, ports::LoaderPort};

use crate::output::{
    port_to_value, DryRunSummary, Event, InspectReport, JsonProgressMode, OutputOptions, Reporter,
    TransferSummary,
};

#[derive(serde::Serialize)]
pub struct JsonEvent {
    schema: u32,
    event: &'static str,
    #[serde(flatten)]
    fields: BTreeMap<&'static str, serde_json::Value>,
}

impl JsonEvent {
    pub fn status(event: &'static str) -> Self {
        Self {
            schema: 1,
            event,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_u64(mut self, k: &'static str, v: u64) -> Self {
        self.fields.insert(k, serde_json::Value::from(v));
        self
    }

    pub fn with_f64(mut self, k: &'static str, v: f64) -> Self {
        self.fields.insert(k, serde_json::Value::from(v));
        self
    }

    pub fn with_str(mut self, k: &'static str, v: &str) -> Self {
        self.fields.insert(k, serde_json::Value::from(v));
        self
    }

    pub fn with_value(mut self, k: &'static str, v: serde_json::Value) -> Self {
        self.fields.insert(k, v);
        self
    }
}

pub struct JsonOutput {
    opts: OutputOptions,
    start: Instant,
    last_percent: Option<u64>,
}

impl JsonOutput {
    pub fn new(opts: OutputOptions) -> Self {
        Self {
            opts,
            start: Instant::now(),
            last_percent: None,
        }
    }
}

impl JsonOutput {
    pub(crate) fn render_event_json(&mut self, ev: JsonEvent) -> String {
        let mut ev = ev;
        if self.opts.json_timestamps {
            ev.fields.insert(
                "t_ms",
                serde_json::Value::from(self.start.elapsed().as_millis() as u64),
            );
        }
        serde_json::to_string(&ev).unwrap_or_else(|_| "{}".to_string())
    }

    fn json_event(&mut self, ev: JsonEvent) {
        println!("{}", self.render_event_json(ev));
    }

    fn error_event(&mut self, code: i32, msg: &str) {
        self.json_event(
            JsonEvent::status("error")
                .with_u64("code", code as u64)
                .with_str("message", msg),
        );

        if self.opts.verbose {
            eprintln!("error: {msg}");
        }
    }

    /// Whether a chunk event passes the configured progress throttle.
    pub(crate) fn should_emit_chunk(&mut self, sent: usize, total: usize) -> bool {
        match self.opts.json_progress {
            JsonProgressMode::Chunks => true,
            JsonProgressMode::None => false,
            JsonProgressMode::Percent => {
                let percent = (sent as u64).saturating_mul(100) / total.max(1) as u64;
                let changed = self.last_percent.map(|p| p != percent).unwrap_or(true);
                if changed {
                    self.last_percent = Some(percent);
                }
                changed
            }
        }
    }

    fn emit_transfer(&mut self, ev: TransferEvent) {
        match &ev {
            TransferEvent::HexLoaded { .. } => {
                self.last_percent = None;
            }
            TransferEvent::Chunk { sent, total, .. } => {
                if !self.should_emit_chunk(*sent, *total) {
                    return;
                }
            }
            _ => {}
        }

        self.json_event(transfer_event_to_json(ev));
    }
}

impl Reporter for JsonOutput {
    fn emit(&mut self, event: Event) {
        match event {
            Event::Transfer(ev) => self.emit_transfer(ev),
            Event::TransferSummary(summary) => {
                self.json_event(transfer_summary_to_json(summary));
            }
            Event::DryRun(summary) => self.json_event(dry_run_to_json(summary)),
            Event::Inspect(report) => self.json_event(inspect_to_json(report)),
            Event::ListPorts(ports) => self.json_event(list_to_json(&ports)),
            Event::Serving { port, baud_rate } => self.json_event(
                JsonEvent::status("serving")
                    .with_str("port", &port)
                    .with_u64("baud_rate", baud_rate as u64),
            ),
            Event::Error { code, message } => self.error_event(code, &message),
            Event::HintNoDevice => {}
        }
    }

    fn finish(&mut self) {}
}

fn regions_to_value(regions: &[Region]) -> serde_json::Value {
    serde_json::to_value(regions).unwrap_or_else(|_| serde_json::Value::Array(Vec::new()))
}

pub fn list_to_json(ports: &[LoaderPort]) -> JsonEvent {
    JsonEvent::status("list")
        .with_u64("count", ports.len() as u64)
        .with_value(
            "ports",
            serde_json::Value::Array(
                ports
                    .iter()
                    .enumerate()
                    .map(|(i, p)| port_to_value(i, p))
                    .collect(),
            ),
        )
}

pub fn dry_run_to_json(summary: DryRunSummary) -> JsonEvent {
    let mut ev = JsonEvent::status("dry_run")
        .with_u64("bytes", summary.bytes as u64)
        .with_value("regions", regions_to_value(&summary.regions))
        .with_f64("pulse_ms", summary.pulse_ms)
        .with_u64("chunk_size", summary.chunk_size as u64)
        .with_u64("chunks", summary.chunks as u64);
    if let Some(p) = &summary.port {
        ev = ev.with_str("port", p);
    }
    ev
}

pub fn inspect_to_json(report: InspectReport) -> JsonEvent {
    let total: usize = report.regions.iter().map(Region::size).sum();
    let mut ev = JsonEvent::status("inspect")
        .with_str("path", &report.path.display().to_string())
        .with_u64("bytes", total as u64)
        .with_value("regions", regions_to_value(&report.regions))
        .with_value(
            "statistics",
            serde_json::to_value(&report.statistics)
                .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new())),
        );
    if let Some(ep) = report.entry_point {
        ev = ev.with_u64("entry_point", ep as u64);
    }
    if let Some((path, size)) = &report.written {
        ev = ev
            .with_str("output", &path.display().to_string())
            .with_u64("output_bytes", *size as u64);
    }
    ev
}

pub fn transfer_summary_to_json(summary: TransferSummary) -> JsonEvent {
    let TransferSummary {
        operation,
        exit_code,
        message,
        port,
        pulse_ms,
        chunk_size,
        chunks,
        bytes_sent,
        bytes_total,
    } = summary;

    let mut ev = JsonEvent::status("transfer_summary")
        .with_str("operation", operation)
        .with_u64("ok", if exit_code == 0 { 1 } else { 0 })
        .with_u64("exit_code", exit_code.max(0) as u64)
        .with_u64("chunks", chunks)
        .with_u64("bytes_sent", bytes_sent)
        .with_u64("bytes_total", bytes_total);

    if let Some(p) = &port {
        ev = ev.with_str("port", p);
    }
    if let Some(p) = pulse_ms {
        ev = ev.with_f64("pulse_ms", p);
    }
    if let Some(c) = chunk_size {
        ev = ev.with_u64("chunk_size", c as u64);
    }
    if let Some(msg) = &message {
        ev = ev.with_str("message", msg);
    }

    ev
}

pub fn transfer_event_to_json(ev: TransferEvent) -> JsonEvent {
    match ev {
        TransferEvent::HexLoaded {
            bytes,
            regions,
            entry_point,
        } => {
            let mut ev = JsonEvent::status("hex_loaded")
                .with_u64("bytes", bytes as u64)
                .with_value("regions", regions_to_value(&regions));
            if let Some(ep) = entry_point {
                ev = ev.with_u64("entry_point", ep as u64);
            }
            ev
        }
        TransferEvent::DiscoverStart => JsonEvent::status("discover_start"),
        TransferEvent::PortDetected { index, port } => {
            JsonEvent::status("port_detected").with_value("port", port_to_value(index, &port))
        }
        TransferEvent::DiscoverDone { count } => {
            JsonEvent::status("discover_done").with_u64("count", count as u64)
        }
        TransferEvent::PortSelected { port } => {
            JsonEvent::status("port_selected").with_str("port", &port)
        }
        TransferEvent::PortOpen { port, baud_rate } => JsonEvent::status("port_open")
            .with_str("port", &port)
            .with_u64("baud_rate", baud_rate as u64),
        TransferEvent::Ready => JsonEvent::status("ready"),
        TransferEvent::TimingSet {
            pulse_ms,
            chunk_size,
        } => JsonEvent::status("timing_set")
            .with_f64("pulse_ms", pulse_ms)
            .with_u64("chunk_size", chunk_size as u64),
        TransferEvent::Chunk {
            index,
            chunks,
            address,
            len,
            sent,
            total,
        } => JsonEvent::status("chunk")
            .with_u64("i", index as u64)
            .with_u64("n", chunks as u64)
            .with_u64("addr", address as u64)
            .with_u64("len", len as u64)
            .with_u64("sent", sent as u64)
            .with_u64("total", total as u64),
        TransferEvent::Ended { bytes } => JsonEvent::status("ended").with_u64("bytes", bytes as u64),
    }
}
