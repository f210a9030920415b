//! Bit-granular reader over a byte buffer
//!
//! H.264 headers are MSB-first bit fields mixed with Exp-Golomb codes, so the
//! cursor tracks a byte offset plus a bit offset (0-7) into the current byte.

use super::H264Error;

/// Upper bound on leading zeros counted by `read_ue`.
///
/// Corrupt input may be all zeros; the cap guarantees termination.
const MAX_LEADING_ZEROS: u32 = 32;

/// Cursor over a borrowed byte buffer
///
/// Owned by a single decode call; it is never shared or rewound.
#[derive(Debug)]
pub struct BitCursor<'a> {
    data: &'a [u8],
    byte_offset: usize,
    bit_offset: u8,
}

impl<'a> BitCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_offset: 0,
            bit_offset: 0,
        }
    }

    /// Absolute position in bits from the start of the buffer
    pub fn position(&self) -> usize {
        self.byte_offset * 8 + self.bit_offset as usize
    }

    /// Number of bits left to read
    pub fn bits_remaining(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.position())
    }

    fn ensure(&self, wanted: usize) -> Result<(), H264Error> {
        if self.bits_remaining() < wanted {
            return Err(H264Error::BitstreamExhausted {
                position: self.position(),
                wanted,
            });
        }
        Ok(())
    }

    fn current_bit(&self) -> bool {
        self.data[self.byte_offset] & (0x80 >> self.bit_offset) != 0
    }

    /// Read one bit and advance
    pub fn read_bit(&mut self) -> Result<bool, H264Error> {
        self.ensure(1)?;
        let bit = self.current_bit();
        self.bit_offset += 1;
        if self.bit_offset == 8 {
            self.bit_offset = 0;
            self.byte_offset += 1;
        }
        Ok(bit)
    }

    /// Look at the next bit without advancing
    pub fn peek_bit(&self) -> Result<bool, H264Error> {
        self.ensure(1)?;
        Ok(self.current_bit())
    }

    /// Skip `count` bits
    ///
    /// Fails without moving if fewer than `count` bits remain.
    pub fn skip_bits(&mut self, count: usize) -> Result<(), H264Error> {
        self.ensure(count)?;
        let target = self.position() + count;
        self.byte_offset = target / 8;
        self.bit_offset = (target % 8) as u8;
        Ok(())
    }

    /// Read `count` bits (at most 32) as an unsigned big-endian value
    pub fn read_bits(&mut self, count: u32) -> Result<u32, H264Error> {
        if count > 32 {
            return Err(H264Error::ExpGolombOverflow { zeros: count });
        }
        self.ensure(count as usize)?;
        let mut value: u64 = 0;
        for _ in 0..count {
            value = (value << 1) | u64::from(self.read_bit()?);
        }
        Ok(value as u32)
    }

    /// Read an unsigned Exp-Golomb code, `ue(v)`
    pub fn read_ue(&mut self) -> Result<u32, H264Error> {
        let mut zeros = 0u32;
        while !self.read_bit()? && zeros < MAX_LEADING_ZEROS {
            zeros += 1;
        }

        let suffix = u64::from(self.read_bits(zeros)?);
        let value = (1u64 << zeros) - 1 + suffix;
        u32::try_from(value).map_err(|_| H264Error::ExpGolombOverflow { zeros })
    }

    /// Read a signed Exp-Golomb code, `se(v)`
    ///
    /// Zig-zag mapping from `ue(v)`: 0, 1, -1, 2, -2, ...
    pub fn read_se(&mut self) -> Result<i32, H264Error> {
        let value = i64::from(self.read_ue()?);
        let signed = if value & 1 == 0 {
            -(value / 2)
        } else {
            (value + 1) / 2
        };
        i32::try_from(signed).map_err(|_| H264Error::ExpGolombOverflow { zeros: 32 })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// MSB-first bit writer for building test payloads
    #[derive(Default)]
    pub(crate) struct BitWriter {
        bytes: Vec<u8>,
        bits: usize,
    }

    impl BitWriter {
        pub(crate) fn bit(&mut self, bit: bool) -> &mut Self {
            if self.bits % 8 == 0 {
                self.bytes.push(0);
            }
            if bit {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 0x80 >> (self.bits % 8);
            }
            self.bits += 1;
            self
        }

        pub(crate) fn bits(&mut self, value: u32, count: u32) -> &mut Self {
            for i in (0..count).rev() {
                self.bit((value >> i) & 1 == 1);
            }
            self
        }

        pub(crate) fn ue(&mut self, value: u32) -> &mut Self {
            let coded = u64::from(value) + 1;
            let len = 64 - coded.leading_zeros();
            for _ in 0..len - 1 {
                self.bit(false);
            }
            for i in (0..len).rev() {
                self.bit((coded >> i) & 1 == 1);
            }
            self
        }

        pub(crate) fn se(&mut self, value: i32) -> &mut Self {
            let mapped = if value > 0 {
                (value as u32) * 2 - 1
            } else {
                (-value as u32) * 2
            };
            self.ue(mapped)
        }

        /// Pad with a stop bit and zeros to a byte boundary
        pub(crate) fn finish(&mut self) -> Vec<u8> {
            self.bit(true);
            while self.bits % 8 != 0 {
                self.bit(false);
            }
            std::mem::take(&mut self.bytes)
        }
    }

    fn cursor_from_bits(pattern: &str) -> Vec<u8> {
        let mut writer = BitWriter::default();
        for c in pattern.chars() {
            writer.bit(c == '1');
        }
        writer.finish()
    }

    #[test]
    fn test_read_ue_reference_table() {
        let table = [
            ("1", 0),
            ("010", 1),
            ("011", 2),
            ("00100", 3),
            ("00101", 4),
            ("00110", 5),
            ("00111", 6),
        ];

        for (pattern, expected) in table {
            let data = cursor_from_bits(pattern);
            let mut cursor = BitCursor::new(&data);
            assert_eq!(cursor.read_ue().unwrap(), expected, "pattern {}", pattern);
            assert_eq!(cursor.position(), pattern.len());
        }
    }

    #[test]
    fn test_read_se_mapping() {
        let table = [("1", 0), ("010", 1), ("011", -1), ("00100", 2), ("00101", -2)];

        for (pattern, expected) in table {
            let data = cursor_from_bits(pattern);
            let mut cursor = BitCursor::new(&data);
            assert_eq!(cursor.read_se().unwrap(), expected, "pattern {}", pattern);
        }
    }

    #[test]
    fn test_consecutive_codes() {
        // 1 | 010 | 011 | 00100 -> 0, 1, 2, 3
        let data = cursor_from_bits("101001100100");
        let mut cursor = BitCursor::new(&data);
        assert_eq!(cursor.read_ue().unwrap(), 0);
        assert_eq!(cursor.read_ue().unwrap(), 1);
        assert_eq!(cursor.read_ue().unwrap(), 2);
        assert_eq!(cursor.read_ue().unwrap(), 3);
    }

    #[test]
    fn test_peek_does_not_advance() {
        let data = [0b1010_0000];
        let mut cursor = BitCursor::new(&data);
        assert!(cursor.peek_bit().unwrap());
        assert!(cursor.peek_bit().unwrap());
        assert_eq!(cursor.position(), 0);
        assert!(cursor.read_bit().unwrap());
        assert!(!cursor.peek_bit().unwrap());
        assert_eq!(cursor.position(), 1);
    }

    #[test]
    fn test_read_bits_across_bytes() {
        let data = [0xAB, 0xCD];
        let mut cursor = BitCursor::new(&data);
        cursor.skip_bits(4).unwrap();
        assert_eq!(cursor.read_bits(8).unwrap(), 0xBC);
        assert_eq!(cursor.read_bits(4).unwrap(), 0xD);
        assert_eq!(cursor.bits_remaining(), 0);
    }

    #[test]
    fn test_read_bits_full_width() {
        let data = [0xFF, 0xFF, 0xFF, 0xFF];
        let mut cursor = BitCursor::new(&data);
        assert_eq!(cursor.read_bits(32).unwrap(), u32::MAX);
    }

    #[test]
    fn test_exhaustion() {
        let data = [0x80];
        let mut cursor = BitCursor::new(&data);
        cursor.skip_bits(8).unwrap();
        assert!(matches!(
            cursor.read_bit(),
            Err(H264Error::BitstreamExhausted { position: 8, wanted: 1 })
        ));
        assert!(cursor.peek_bit().is_err());

        let mut cursor = BitCursor::new(&data);
        assert!(cursor.skip_bits(9).is_err());
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_read_ue_all_zeros_terminates() {
        // 32 zero bits then nothing: cap is hit, suffix read runs out of data
        let data = [0u8; 4];
        let mut cursor = BitCursor::new(&data);
        assert!(matches!(
            cursor.read_ue(),
            Err(H264Error::BitstreamExhausted { .. })
        ));

        // Long runs of zeros followed by enough ones overflow u32
        let mut data = vec![0u8; 5];
        data.extend_from_slice(&[0xFF; 5]);
        let mut cursor = BitCursor::new(&data);
        assert!(matches!(
            cursor.read_ue(),
            Err(H264Error::ExpGolombOverflow { zeros: 32 })
        ));
    }

    #[test]
    fn test_truncated_ue() {
        // 001 with the 2-bit suffix missing
        let data = [0b0000_0001];
        let mut cursor = BitCursor::new(&data[..]);
        cursor.skip_bits(5).unwrap();
        assert!(cursor.read_ue().is_err());
    }
}
