use crate::{image::Region, ports::LoaderPort};

#[derive(Debug, Clone)]
pub enum TransferEvent {
    HexLoaded {
        bytes: usize,
        regions: Vec<Region>,
        entry_point: Option<u32>,
    },

    DiscoverStart,
    PortDetected {
        index: usize,
        port: LoaderPort,
    },
    DiscoverDone {
        count: usize,
    },
    PortSelected {
        port: String,
    },
    PortOpen {
        port: String,
        baud_rate: u32,
    },

    Ready,
    TimingSet {
        pulse_ms: f64,
        chunk_size: usize,
    },
    Chunk {
        index: usize,
        chunks: usize,
        address: u32,
        len: usize,
        /// Bytes acknowledged so far, this chunk included.
        sent: usize,
        total: usize,
    },
    Ended {
        bytes: usize,
    },
}
