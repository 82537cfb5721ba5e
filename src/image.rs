use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use serde::Serialize;

use crate::hex::{self, DecodeError, Record, RecordKind};

/// Address base contributed by extension records.
///
/// Threaded through a decode session by value: each record produces the state
/// seen by the next one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddressExtension {
    pub linear: u16,
    pub segment: u32,
}

impl AddressExtension {
    /// Effective address of `offset`, or `None` if it does not fit in 32 bits.
    pub fn resolve(self, offset: u32) -> Option<u32> {
        (u32::from(self.linear) << 16)
            .checked_add(self.segment)
            .and_then(|base| base.checked_add(offset))
    }

    fn next(self, record: &Record) -> Self {
        match record.kind {
            RecordKind::ExtLinearAddr => Self {
                linear: u16::from_be_bytes([record.payload[0], record.payload[1]]),
                ..self
            },
            RecordKind::ExtSegmentAddr => Self {
                segment: u32::from(u16::from_be_bytes([record.payload[0], record.payload[1]])) << 4,
                ..self
            },
            _ => self,
        }
    }
}

/// Contiguous run of stored addresses, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Region {
    pub start: u32,
    pub end: u32,
}

impl Region {
    pub fn size(&self) -> usize {
        (self.end - self.start) as usize + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageStatistics {
    pub total_records: usize,
    pub data_records: usize,
    pub total_bytes: usize,
    pub memory_regions: usize,
    pub record_kinds: BTreeMap<RecordKind, usize>,
}

/// Sparse byte image built from decoded records.
#[derive(Debug, Clone, Default)]
pub struct MemoryImage {
    cells: BTreeMap<u32, u8>,
    entry_point: Option<u32>,
    record_kinds: BTreeMap<RecordKind, usize>,
}

impl MemoryImage {
    /// Load and decode an Intel HEX file.
    ///
    /// Lines are trimmed and blank lines skipped; line numbers in errors are
    /// physical line numbers in the file.
    pub fn load(path: &Path) -> Result<Self, DecodeError> {
        let f = File::open(path).map_err(DecodeError::Io)?;
        let r = BufReader::new(f);

        let mut lines: Vec<(usize, String)> = Vec::new();
        for (line_no, line) in r.lines().enumerate() {
            let line_no = line_no + 1;
            let line = match line {
                Ok(s) => s,
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    return Err(DecodeError::NotText { line_no });
                }
                Err(e) => return Err(DecodeError::Io(e)),
            };
            lines.push((line_no, line));
        }

        decode_numbered(lines.iter().map(|(n, l)| (*n, l.as_str())))
    }

    pub fn cells(&self) -> &BTreeMap<u32, u8> {
        &self.cells
    }

    pub fn get(&self, address: u32) -> Option<u8> {
        self.cells.get(&address).copied()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn entry_point(&self) -> Option<u32> {
        self.entry_point
    }

    pub fn min_address(&self) -> Option<u32> {
        self.cells.keys().next().copied()
    }

    pub fn max_address(&self) -> Option<u32> {
        self.cells.keys().next_back().copied()
    }

    /// Dense copy of `[start, end]` (inclusive), with `fill` for missing bytes.
    ///
    /// Missing bounds default to the lowest/highest stored address. An empty
    /// image without an explicit range flattens to nothing.
    pub fn flatten(&self, fill: u8, start: Option<u32>, end: Option<u32>) -> Vec<u8> {
        let (Some(start), Some(end)) = (start.or(self.min_address()), end.or(self.max_address()))
        else {
            return Vec::new();
        };
        if start > end {
            return Vec::new();
        }

        let mut out = Vec::with_capacity((end - start) as usize + 1);
        let mut stored = self.cells.range(start..=end).peekable();
        for addr in start..=end {
            match stored.peek() {
                Some((&a, &b)) if a == addr => {
                    out.push(b);
                    stored.next();
                }
                _ => out.push(fill),
            }
        }
        out
    }

    pub fn contiguous_regions(&self) -> Vec<Region> {
        let mut regions: Vec<Region> = Vec::new();
        for &addr in self.cells.keys() {
            match regions.last_mut() {
                Some(r) if r.end.checked_add(1) == Some(addr) => r.end = addr,
                _ => regions.push(Region {
                    start: addr,
                    end: addr,
                }),
            }
        }
        regions
    }

    pub fn statistics(&self) -> ImageStatistics {
        ImageStatistics {
            total_records: self.record_kinds.values().sum(),
            data_records: self
                .record_kinds
                .get(&RecordKind::Data)
                .copied()
                .unwrap_or(0),
            total_bytes: self.cells.len(),
            memory_regions: self.contiguous_regions().len(),
            record_kinds: self.record_kinds.clone(),
        }
    }

    fn apply(&mut self, ext: AddressExtension, record: &Record) -> Result<(), DecodeError> {
        *self.record_kinds.entry(record.kind).or_insert(0) += 1;

        match record.kind {
            RecordKind::Data => {
                let base = ext
                    .resolve(u32::from(record.address))
                    .ok_or(DecodeError::AddressOverflow {
                        line_no: record.line_no,
                    })?;
                for (i, b) in record.payload.iter().copied().enumerate() {
                    let abs = base
                        .checked_add(i as u32)
                        .ok_or(DecodeError::AddressOverflow {
                            line_no: record.line_no,
                        })?;
                    self.cells.insert(abs, b);
                }
            }
            RecordKind::StartLinearAddr => {
                if self.entry_point.is_none() {
                    let p = &record.payload;
                    self.entry_point = Some(u32::from_be_bytes([p[0], p[1], p[2], p[3]]));
                }
            }
            // Extension state lives in the fold; start segment carries no image data.
            _ => {}
        }
        Ok(())
    }
}

/// Decode a whole session of record lines into an image.
///
/// Line numbers are 1-based positions in `lines`; blank lines are skipped.
/// Decoding stops at the first `EndOfFile` record.
pub fn decode_all<I, S>(lines: I) -> Result<MemoryImage, DecodeError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let lines: Vec<S> = lines.into_iter().collect();
    decode_numbered(
        lines
            .iter()
            .enumerate()
            .map(|(i, l)| (i + 1, l.as_ref())),
    )
}

fn decode_numbered<'a, I>(lines: I) -> Result<MemoryImage, DecodeError>
where
    I: Iterator<Item = (usize, &'a str)>,
{
    let mut image = MemoryImage::default();
    let mut ext = AddressExtension::default();

    for (line_no, line) in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record = hex::decode_line(line, line_no)?;
        image.apply(ext, &record)?;
        if record.kind == RecordKind::EndOfFile {
            break;
        }
        ext = ext.next(&record);
    }

    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::hex::tests::ihex_record;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = "\
:020000040000FA
:10000000214601360121470136007EFE09D2194002
:100010002146017E17C20001FF5F16002148011929
:00000001FF
";

    fn image_at(addrs: &[u32]) -> MemoryImage {
        let mut image = MemoryImage::default();
        for &a in addrs {
            image.cells.insert(a, a as u8);
        }
        image
    }

    #[test]
    fn test_sample_decodes_to_single_region() {
        let image = decode_all(SAMPLE.lines()).unwrap();
        assert_eq!(image.len(), 32);
        assert_eq!(image.contiguous_regions(), vec![Region { start: 0, end: 31 }]);
        assert_eq!(image.entry_point(), None);
        assert_eq!(image.get(0), Some(0x21));
        assert_eq!(image.get(31), Some(0x19));
    }

    #[test]
    fn test_extended_linear_address_shifts_data() {
        let lines = [
            ihex_record(0x0000, 0x04, &[0x10, 0x00]),
            ihex_record(0x0020, 0x00, &[0xAA, 0xBB]),
        ];
        let image = decode_all(&lines).unwrap();
        assert_eq!(image.get(0x1000_0020), Some(0xAA));
        assert_eq!(image.get(0x1000_0021), Some(0xBB));
        assert_eq!(image.len(), 2);
    }

    #[test]
    fn test_segment_and_linear_extensions_add_up() {
        let lines = [
            ihex_record(0x0000, 0x02, &[0x12, 0x34]),
            ihex_record(0x0000, 0x04, &[0x00, 0x01]),
            ihex_record(0x0005, 0x00, &[0x42]),
        ];
        let image = decode_all(&lines).unwrap();
        assert_eq!(image.get(0x0001_0000 + 0x0001_2340 + 5), Some(0x42));
    }

    #[test]
    fn test_start_linear_sets_entry_point_once() {
        let lines = [
            ihex_record(0x0000, 0x05, &[0x08, 0x00, 0x01, 0x00]),
            ihex_record(0x0000, 0x05, &[0x00, 0x00, 0x00, 0x00]),
            ihex_record(0x0000, 0x01, &[]),
        ];
        let image = decode_all(&lines).unwrap();
        assert_eq!(image.entry_point(), Some(0x0800_0100));
        assert!(image.is_empty());
    }

    #[test]
    fn test_records_after_eof_are_ignored() {
        let lines = [
            ihex_record(0x0000, 0x00, &[0x01]),
            ihex_record(0x0000, 0x01, &[]),
            "garbage".to_string(),
        ];
        let image = decode_all(&lines).unwrap();
        assert_eq!(image.len(), 1);
    }

    #[test]
    fn test_first_error_aborts_with_line_number() {
        let lines = [
            ihex_record(0x0000, 0x00, &[0x01]),
            String::new(),
            ":0100000001FF".to_string(),
        ];
        let err = decode_all(&lines).unwrap_err();
        assert!(matches!(err, DecodeError::Checksum { line_no: 3, .. }));
    }

    #[test]
    fn test_address_overflow_is_reported() {
        let lines = [
            ihex_record(0x0000, 0x04, &[0xFF, 0xFF]),
            ihex_record(0xFFFF, 0x00, &[0x01, 0x02]),
        ];
        assert!(matches!(
            decode_all(&lines),
            Err(DecodeError::AddressOverflow { line_no: 2 })
        ));
    }

    #[test]
    fn test_contiguous_regions() {
        let image = image_at(&[10, 11, 12, 20, 21]);
        assert_eq!(
            image.contiguous_regions(),
            vec![Region { start: 10, end: 12 }, Region { start: 20, end: 21 }]
        );
        assert!(MemoryImage::default().contiguous_regions().is_empty());
    }

    #[test]
    fn test_flatten_fills_gaps() {
        let image = image_at(&[2, 3, 6]);
        assert_eq!(image.flatten(0xFF, None, None), vec![2, 3, 0xFF, 0xFF, 6]);
        assert_eq!(
            image.flatten(0x00, Some(0), Some(7)),
            vec![0, 0, 2, 3, 0, 0, 6, 0]
        );
        assert_eq!(image.flatten(0xFF, Some(3), Some(3)), vec![3]);
    }

    #[test]
    fn test_flatten_empty_image() {
        let image = MemoryImage::default();
        assert!(image.flatten(0xFF, None, None).is_empty());
        assert_eq!(image.flatten(0xEE, Some(4), Some(5)), vec![0xEE, 0xEE]);
    }

    #[test]
    fn test_statistics() {
        let image = decode_all(SAMPLE.lines()).unwrap();
        let stats = image.statistics();
        assert_eq!(stats.total_records, 4);
        assert_eq!(stats.data_records, 2);
        assert_eq!(stats.total_bytes, 32);
        assert_eq!(stats.memory_regions, 1);
        assert_eq!(stats.record_kinds.get(&RecordKind::ExtLinearAddr), Some(&1));
        assert_eq!(stats.record_kinds.get(&RecordKind::EndOfFile), Some(&1));
    }

    #[test]
    fn test_load_reports_physical_line_numbers() {
        let content = format!("\n{}\n\n:0100000001FF\n", ihex_record(0, 0, &[1]));
        let mut f = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut f, content.as_bytes()).unwrap();

        let err = MemoryImage::load(f.path()).unwrap_err();
        assert_eq!(err.line_no(), Some(4));
    }

    #[test]
    fn test_load_rejects_binary_input() {
        let mut f = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut f, b":00000001FF\n\x7FELF\xFF\xFE\n").unwrap();

        assert!(matches!(
            MemoryImage::load(f.path()),
            Err(DecodeError::NotText { line_no: 2 })
        ));
    }

    #[test]
    fn test_load_sample_file() {
        let mut f = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut f, SAMPLE.as_bytes()).unwrap();

        let image = MemoryImage::load(f.path()).unwrap();
        assert_eq!(image.flatten(0xFF, None, None).len(), 32);
    }
}
