//! CRC16 used by the frame layer.
//!
//! The frame layer only needs a calculate/accumulate pair; platforms with a
//! hardware CRC unit implement [`Crc16`] themselves. [`X25`] is the bitwise
//! software rendition of the checksum STSAFE devices expect.

/// 16-bit CRC primitive, fed element by element.
pub trait Crc16 {
    /// CRC of `data` from the initial state.
    fn crc16_calculate(&self, data: &[u8]) -> u16;

    /// Continue a CRC previously returned by this engine over more `data`.
    fn crc16_accumulate(&self, crc: u16, data: &[u8]) -> u16;
}

/// CRC-16/X-25: reflected polynomial 0x1021, init 0xFFFF, xorout 0xFFFF.
#[derive(Debug, Clone, Copy, Default)]
pub struct X25;

impl X25 {
    /// Reflected form of 0x1021
    const POLY: u16 = 0x8408;

    fn process(mut state: u16, data: &[u8]) -> u16 {
        for &byte in data {
            state ^= u16::from(byte);
            for _ in 0..8 {
                state = if state & 1 == 1 { (state >> 1) ^ Self::POLY } else { state >> 1 };
            }
        }
        state
    }
}

impl Crc16 for X25 {
    fn crc16_calculate(&self, data: &[u8]) -> u16 {
        self.crc16_accumulate(0x0000, data)
    }

    fn crc16_accumulate(&self, crc: u16, data: &[u8]) -> u16 {
        // Undo the final xor to resume from the raw register
        !Self::process(!crc, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        assert_eq!(X25.crc16_calculate(b"123456789"), 0x906E);
    }

    #[test]
    fn accumulate_matches_single_pass() {
        let head = X25.crc16_calculate(b"1234");
        assert_eq!(X25.crc16_accumulate(head, b"56789"), 0x906E);
    }

    #[test]
    fn single_zero_byte() {
        assert_eq!(X25.crc16_calculate(&[0x00]), 0xF078);
    }
}
