//! Parallel GPIO bus between the Raspberry Pi and the board.
//!
//! The board shifts one byte per CLOCK pulse onto eight data lines. Eight
//! bytes form a chunk that carries one 16-bit sample for each of the four
//! channels, interleaved two bits per byte:
//!
//! ```text
//!  Byte | Bit7   Bit6   Bit5   Bit4  | Bit3   Bit2   Bit1   Bit0
//!     0 | 1-14   2-14   3-14   4-14  | 1-15   2-15   3-15   4-15
//!     1 | 1-12   2-12   3-12   4-12  | 1-13   2-13   3-13   4-13
//!   ... |                            |
//!     7 |  1-0    2-0    3-0    4-0  |  1-1    2-1    3-1    4-1
//! ```
//! (`c-b` = channel c, sample bit b)

use timeswipe_traits::CHANNELS;

/// Bytes per chunk (one sample for every channel).
pub const CHUNK_BYTES: usize = 8;

/// BCM pin numbers of the board header.
pub mod pins {
    /// DATA0..DATA7; DATA0 carries bit 7 of the byte.
    pub const DATA: [u8; 8] = [24, 25, 7, 5, 6, 12, 13, 16];
    pub const CLOCK: u8 = 4;
    pub const TCO: u8 = 14;
    pub const PI_OK: u8 = 15;
    pub const FAIL: u8 = 18;
    pub const RESET: u8 = 17;
    /// Shares the header pin with DATA1 on the reference board.
    pub const BUTTON: u8 = 25;
}

/// Assemble one bus byte from the levels of DATA0..DATA7.
#[inline]
pub fn byte_from_levels(levels: [bool; 8]) -> u8 {
    levels
        .iter()
        .enumerate()
        .fold(0u8, |acc, (i, &high)| acc | (u8::from(high) << (7 - i)))
}

/// Decode one chunk into raw 16-bit channel samples.
pub fn decode_chunk(chunk: &[u8; CHUNK_BYTES]) -> [u16; CHANNELS] {
    let mut out = [0u16; CHANNELS];
    for (i, byte) in chunk.iter().enumerate() {
        let hi_bit = 15 - 2 * i;
        let lo_bit = hi_bit - 1;
        for (ch, word) in out.iter_mut().enumerate() {
            let shift = 3 - ch;
            if (byte >> shift) & 1 == 1 {
                *word |= 1 << hi_bit;
            }
            if (byte >> (shift + 4)) & 1 == 1 {
                *word |= 1 << lo_bit;
            }
        }
    }
    out
}

/// Widen a decoded chunk to a raw row.
#[inline]
pub fn chunk_to_row(chunk: &[u8; CHUNK_BYTES]) -> timeswipe_traits::RawRow {
    decode_chunk(chunk).map(f64::from)
}
