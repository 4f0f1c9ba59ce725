// Back-to-front LZ used for ARM9 binaries and overlays.
//
// The last 8 bytes of the input are the footer:
//   u32 LE: top byte = bytes between the end of the compressed stream and
//           the end of the file, low 24 bits = length of the compressed
//           region measured from the end of the file
//   u32 LE: how many bytes the decompressed file is larger than the input
// Everything before the compressed region is stored as-is. The stream is
// read from its end towards the start and the output is written from the
// end of the enlarged buffer downwards.

use tracing::debug;

use crate::binary_utils;
use crate::error::{Result, RomError};

pub const FOOTER_SIZE: usize = 8;
/// Largest expanded overlay accepted, the size of main RAM.
pub const MAX_DECOMPRESSED_SIZE: usize = 0x100_0000;

/// ARM `SUBS` followed by a signed less-than test: returns the wrapped
/// difference and whether `N != V`, i.e. whether the exact result is negative.
pub fn subs(lhs: u32, rhs: u32) -> (u32, bool) {
    let result = lhs.wrapping_sub(rhs);
    let negative = result & 0x8000_0000 != 0;
    let overflow = (lhs ^ rhs) & (lhs ^ result) & 0x8000_0000 != 0;
    (result, negative != overflow)
}

fn step_back(cursor: usize, len: usize) -> Result<usize> {
    cursor.checked_sub(1).ok_or(RomError::Truncated { offset: 0, len })
}

pub fn decompress(source: &[u8]) -> Result<Vec<u8>> {
    let source_len = source.len();
    if source_len < FOOTER_SIZE {
        return Err(RomError::Truncated {
            offset: FOOTER_SIZE,
            len: source_len,
        });
    }

    let bounds = binary_utils::u32_le_at(source, source_len - 8)?;
    let extra_size = binary_utils::u32_le_at(source, source_len - 4)? as usize;

    let total_len = source_len.saturating_add(extra_size);
    if total_len > MAX_DECOMPRESSED_SIZE {
        return Err(RomError::InputTooLarge {
            len: total_len,
            max: MAX_DECOMPRESSED_SIZE,
        });
    }

    let mut memory = vec![0u8; total_len];
    memory[..source_len].copy_from_slice(source);
    let mem_len = memory.len();

    let header_len = (bounds >> 24) as usize;
    let compressed_len = (bounds & 0xFFFFFF) as usize;
    let mut read = source_len
        .checked_sub(header_len)
        .ok_or(RomError::Truncated {
            offset: header_len,
            len: source_len,
        })?;
    let end = source_len
        .checked_sub(compressed_len)
        .ok_or(RomError::Truncated {
            offset: compressed_len,
            len: source_len,
        })?;
    let mut write = mem_len;

    debug!(
        "Overlay LZ: {} -> {} bytes, stream 0x{:X}..0x{:X}",
        source_len, mem_len, end, read
    );

    while read > end {
        read = step_back(read, mem_len)?;
        let mut flags = memory[read];

        let mut bits_left = 8u32;
        loop {
            let (next, negative) = subs(bits_left, 1);
            bits_left = next;
            if negative {
                break;
            }

            if flags & 0x80 == 0 {
                read = step_back(read, mem_len)?;
                write = step_back(write, mem_len)?;
                memory[write] = memory[read];
            } else {
                read = step_back(read, mem_len)?;
                let high = memory[read];
                read = step_back(read, mem_len)?;
                let low = memory[read];

                let distance = ((((high as usize) << 8) | low as usize) & 0xFFF) + 2;
                let mut counter = high as u32 + 0x20;
                loop {
                    let src = write + distance;
                    let byte = *memory.get(src).ok_or(RomError::Truncated {
                        offset: src,
                        len: mem_len,
                    })?;
                    write = step_back(write, mem_len)?;
                    memory[write] = byte;

                    let (next, negative) = subs(counter, 0x10);
                    counter = next;
                    if negative {
                        break;
                    }
                }
            }

            flags <<= 1;
            if read <= end {
                return Ok(memory);
            }
        }
    }

    Ok(memory)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn footer(header_len: u8, compressed_len: u32, extra_size: u32) -> Vec<u8> {
        let mut footer = ((header_len as u32) << 24 | compressed_len)
            .to_le_bytes()
            .to_vec();
        footer.extend_from_slice(&extra_size.to_le_bytes());
        footer
    }

    #[test]
    fn subs_reports_signed_result() {
        assert_eq!(subs(5, 3), (2, false));
        assert_eq!(subs(0, 1), (0xFFFF_FFFF, true));
        assert_eq!(subs(0x10, 0x10), (0, false));
        // i32::MIN - 1 wraps to a positive value but is negative in exact arithmetic
        assert_eq!(subs(0x8000_0000, 1), (0x7FFF_FFFF, true));
        // i32::MAX - (-1) wraps to a negative value but is positive in exact arithmetic
        assert_eq!(subs(0x7FFF_FFFF, 0xFFFF_FFFF), (0x8000_0000, false));
    }

    #[test]
    fn zero_footer_is_identity() {
        let mut data = b"ARM9 code".to_vec();
        data.extend_from_slice(&footer(0, 0, 0));
        assert_eq!(decompress(&data).unwrap(), data);
    }

    #[test]
    fn literals_and_back_reference() {
        let mut data = b"HEAD".to_vec();
        // read back to front: flags 0x10, literals Z Y X, then a match
        // of 15 bytes at distance 3
        data.extend_from_slice(&[0x00, 0xC0, b'X', b'Y', b'Z', 0x10]);
        data.extend_from_slice(&footer(8, 14, 4));

        let out = decompress(&data).unwrap();
        let mut expected = b"HEAD".to_vec();
        expected.extend_from_slice(&b"XYZ".repeat(6));
        assert_eq!(out, expected);
    }

    #[test]
    fn short_input_is_truncated() {
        assert!(matches!(decompress(&[]), Err(RomError::Truncated { .. })));
        assert!(matches!(decompress(&[0; 7]), Err(RomError::Truncated { .. })));
    }

    #[test]
    fn oversized_expansion_is_rejected() {
        let data = footer(0, 0, 0xFFFF_FFF0);
        assert!(matches!(
            decompress(&data),
            Err(RomError::InputTooLarge { max: MAX_DECOMPRESSED_SIZE, .. })
        ));

        // exactly at the limit is still accepted
        let data = footer(0, 0, (MAX_DECOMPRESSED_SIZE - FOOTER_SIZE) as u32);
        assert_eq!(decompress(&data).unwrap().len(), MAX_DECOMPRESSED_SIZE);
    }

    #[test]
    fn region_longer_than_input_is_rejected() {
        let data = footer(8, 0x100, 0);
        assert!(matches!(decompress(&data), Err(RomError::Truncated { .. })));
    }

    #[test]
    fn back_reference_past_buffer_end_is_rejected() {
        let mut data = vec![0xFF, 0x0F, 0x80];
        data.extend_from_slice(&footer(8, 11, 0));
        assert!(matches!(decompress(&data), Err(RomError::Truncated { .. })));
    }

    #[test]
    fn output_running_below_buffer_start_is_rejected() {
        // same stream as above but without room for the expanded bytes
        let mut data = vec![0x00, 0xC0, b'X', b'Y', b'Z', 0x10];
        data.extend_from_slice(&footer(8, 14, 0));
        assert!(matches!(decompress(&data), Err(RomError::Truncated { .. })));
    }
}
