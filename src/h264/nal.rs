//! Annex-B NAL unit scanning
//!
//! Only the 4-byte start code form (`00 00 00 01`) is recognized. The 3-byte
//! form some encoders emit is not matched; see DESIGN.md before changing that.

use std::ops::Range;

/// Annex-B start code
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Coded slice of an IDR picture
pub const NAL_TYPE_IDR: u8 = 5;
/// Sequence parameter set
pub const NAL_TYPE_SPS: u8 = 7;
/// Picture parameter set
pub const NAL_TYPE_PPS: u8 = 8;

/// NAL unit type from the first byte after the start code
pub fn nal_type(header: u8) -> u8 {
    header & 0x1f
}

/// One NAL unit found in a buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit<'a> {
    /// Type from the low 5 bits of the header byte
    pub nal_type: u8,
    /// Absolute byte range in the scanned buffer (header included, start code excluded)
    pub range: Range<usize>,
    /// The NAL unit bytes, header included
    pub data: &'a [u8],
}

/// Iterator over the NAL units of a byte window
///
/// A start code at index `i` only counts while `i + 4 < window end`, so the
/// header byte after it is always inside the window.
pub struct NalScanner<'a> {
    data: &'a [u8],
    cursor: usize,
    end: usize,
}

impl<'a> NalScanner<'a> {
    /// Scan the whole buffer
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_window(data, 0..data.len())
    }

    /// Scan `window` of the buffer; the window is clamped to the buffer
    pub fn with_window(data: &'a [u8], window: Range<usize>) -> Self {
        let end = window.end.min(data.len());
        Self {
            data,
            cursor: window.start.min(end),
            end,
        }
    }
}

impl<'a> Iterator for NalScanner<'a> {
    type Item = NalUnit<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = find_start_code(self.data, self.cursor, self.end)?;
        let nal_start = start + START_CODE.len();
        let nal_end = find_start_code(self.data, nal_start, self.end).unwrap_or(self.end);
        self.cursor = nal_end;

        Some(NalUnit {
            nal_type: nal_type(self.data[nal_start]),
            range: nal_start..nal_end,
            data: &self.data[nal_start..nal_end],
        })
    }
}

fn find_start_code(data: &[u8], from: usize, end: usize) -> Option<usize> {
    let mut i = from;
    while i + START_CODE.len() < end {
        if data[i..i + START_CODE.len()] == START_CODE {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Byte range of the first NAL unit of `nal_type` inside `window`
///
/// The range excludes the start code and ends at the next start code or the
/// window end. Returns `None` if the type never appears.
pub fn locate(buffer: &[u8], window: Range<usize>, nal_type: u8) -> Option<Range<usize>> {
    NalScanner::with_window(buffer, window)
        .find(|nal| nal.nal_type == nal_type)
        .map(|nal| nal.range)
}

/// First SPS NAL unit of an Annex-B buffer
pub fn extract_sps(buffer: &[u8]) -> Option<&[u8]> {
    locate(buffer, 0..buffer.len(), NAL_TYPE_SPS).map(|range| &buffer[range])
}
