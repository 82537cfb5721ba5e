use std::time::Duration;

use crate::image::MemoryImage;

pub const MIN_CHUNK_SIZE: usize = 1;
pub const MAX_CHUNK_SIZE: usize = 128;

/// Share of the response timeout one chunked write may use.
const TIMEOUT_BUDGET: f64 = 0.8;

/// Bytes per write command such that the device finishes well inside the
/// response timeout.
///
/// The device spends roughly `2 * pulse_ms + byte_overhead_ms` per byte (the
/// pulse itself, the recovery delay and its own bookkeeping).
pub fn chunk_size_for(pulse_ms: f64, byte_overhead_ms: f64, response_timeout: Duration) -> usize {
    let per_byte_ms = 2.0 * pulse_ms + byte_overhead_ms;
    let budget_ms = TIMEOUT_BUDGET * response_timeout.as_secs_f64() * 1000.0;
    if per_byte_ms <= 0.0 || !per_byte_ms.is_finite() {
        return MAX_CHUNK_SIZE;
    }

    let n = (budget_ms / per_byte_ms).floor();
    if n >= MAX_CHUNK_SIZE as f64 {
        MAX_CHUNK_SIZE
    } else if n <= MIN_CHUNK_SIZE as f64 {
        MIN_CHUNK_SIZE
    } else {
        n as usize
    }
}

/// Run of consecutive image bytes sent as one write command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub address: u32,
    pub data: Vec<u8>,
}

/// Split the image into write chunks.
///
/// Walks the sorted addresses and extends the current chunk while the next
/// address follows directly and the chunk is below `chunk_size`. Any gap
/// starts a new chunk.
pub fn plan_chunks(image: &MemoryImage, chunk_size: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(MIN_CHUNK_SIZE);
    let mut chunks: Vec<Chunk> = Vec::new();

    for (&addr, &byte) in image.cells() {
        match chunks.last_mut() {
            Some(c)
                if c.data.len() < chunk_size
                    && c.address.checked_add(c.data.len() as u32) == Some(addr) =>
            {
                c.data.push(byte);
            }
            _ => chunks.push(Chunk {
                address: addr,
                data: vec![byte],
            }),
        }
    }

    chunks
}
