use std::time::Duration;

use tracing::debug;

/// Settle time between presenting address/data and asserting write enable.
pub const SETTLE_TIME: Duration = Duration::from_millis(1);

/// Drives one byte at a time onto the target's address/data bus.
pub trait Actuator {
    /// Present `value` at `address` and hold write enable for `pulse`.
    fn apply(&mut self, address: u8, value: u8, pulse: Duration);

    /// Return every driven line to its idle state.
    fn reset(&mut self);
}

/// 256-byte memory behind a simulated 8-bit bus.
#[derive(Debug, Clone)]
pub struct SimulatedBus {
    memory: [u8; 256],
    history: Option<Vec<(u8, u8)>>,
    resets: usize,
    realtime: bool,
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBus {
    /// Erased (0xFF) memory, write history on, no timing emulation.
    pub fn new() -> Self {
        Self {
            memory: [0xFF; 256],
            history: Some(Vec::new()),
            resets: 0,
            realtime: false,
        }
    }

    /// Sleep for the settle time plus twice the pulse on every byte, like a
    /// real device holding and then releasing write enable.
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn with_history(mut self, keep: bool) -> Self {
        self.history = keep.then(Vec::new);
        self
    }

    pub fn memory(&self) -> &[u8; 256] {
        &self.memory
    }

    /// Applied `(address, value)` pairs in order; empty when history is off.
    pub fn writes(&self) -> &[(u8, u8)] {
        self.history.as_deref().unwrap_or(&[])
    }

    pub fn resets(&self) -> usize {
        self.resets
    }
}

impl Actuator for SimulatedBus {
    fn apply(&mut self, address: u8, value: u8, pulse: Duration) {
        if self.realtime {
            std::thread::sleep(SETTLE_TIME + pulse * 2);
        }
        self.memory[address as usize] = value;
        if let Some(h) = &mut self.history {
            h.push((address, value));
        }
        debug!(
            "write ADDR=0x{address:02X} DATA=0x{value:02X} pulse={:.3}ms",
            pulse.as_secs_f64() * 1000.0
        );
    }

    fn reset(&mut self) {
        self.resets += 1;
        debug!("bus reset to idle");
    }
}
