// Nintendo Yaz0.
//
// Header (16 bytes):
//   Magic: "Yaz0"
//   Decompressed size (u32, big endian)
//   8 reserved zero bytes
// Data:
//   Flag byte, MSB first. A set bit is a literal byte. A clear bit is a
//   back-reference: `NR RR` with N = length - 2 and R = distance - 1, or
//   `0R RR NN` with NN = length - 0x12 when the length nibble is zero.

use tracing::debug;

use crate::binary_utils;
use crate::containers::ContainerHandler;
use crate::error::{Result, RomError};

pub const YAZ0_MAGIC: &[u8] = b"Yaz0";
pub const YAZ0_HEADER_SIZE: usize = 0x10;
pub const YAZ0_MAX_WINDOW: usize = 0x1000;

const YAZ0_MIN_MATCH_LEN: usize = 3;
const YAZ0_MAX_MATCH_LEN: usize = 0x111;
/// Shortest match stored with the 3-byte encoding.
const YAZ0_LONG_MATCH_LEN: usize = 0x12;

pub struct Yaz0;

impl ContainerHandler for Yaz0 {
    fn magic_word() -> &'static [u8] {
        YAZ0_MAGIC
    }
}

/// Encoder settings. A smaller window is faster and compresses worse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Yaz0Options {
    pub window: usize,
}

impl Default for Yaz0Options {
    fn default() -> Self {
        Yaz0Options {
            window: YAZ0_MAX_WINDOW,
        }
    }
}

impl Yaz0Options {
    pub fn with_window(window: usize) -> Self {
        Yaz0Options {
            window: window.clamp(1, YAZ0_MAX_WINDOW),
        }
    }
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    if !Yaz0::matches(data) {
        return Err(RomError::BadMagic { expected: "Yaz0" });
    }
    let decompressed_size = binary_utils::u32_be_at(data, 4)? as usize;
    if data.len() < YAZ0_HEADER_SIZE {
        return Err(RomError::Truncated {
            offset: YAZ0_HEADER_SIZE,
            len: data.len(),
        });
    }

    let mut out = Vec::with_capacity(decompressed_size);
    let mut pos = YAZ0_HEADER_SIZE;

    let next_byte = |pos: &mut usize| -> Result<u8> {
        let byte = *data.get(*pos).ok_or(RomError::Truncated {
            offset: *pos,
            len: data.len(),
        })?;
        *pos += 1;
        Ok(byte)
    };

    'groups: while out.len() < decompressed_size {
        let flags = next_byte(&mut pos)?;

        for bit in (0..8).rev() {
            if flags & (1 << bit) != 0 {
                out.push(next_byte(&mut pos)?);
            } else {
                let first = next_byte(&mut pos)?;
                let distance = ((((first & 0x0F) as usize) << 8) | next_byte(&mut pos)? as usize) + 1;
                let mut length = (first >> 4) as usize + 2;
                if length == 2 {
                    length = next_byte(&mut pos)? as usize + YAZ0_LONG_MATCH_LEN;
                }

                let mut copy_pos = out.len().checked_sub(distance).ok_or(
                    RomError::InvalidBackReference {
                        position: out.len(),
                        distance,
                    },
                )?;
                for _ in 0..length {
                    if out.len() == decompressed_size {
                        break;
                    }
                    let byte = out[copy_pos];
                    out.push(byte);
                    copy_pos += 1;
                }
            }

            if out.len() >= decompressed_size {
                break 'groups;
            }
        }
    }

    Ok(out)
}

/// Longest match for `data[pos..]`, scanning from the nearest byte backwards.
/// Returns `(distance, length)`; the nearest wins among equal lengths.
fn search(data: &[u8], pos: usize, window: usize) -> (usize, usize) {
    let remaining = data.len() - pos;
    if remaining < YAZ0_MIN_MATCH_LEN {
        return (0, 0);
    }
    let max_len = remaining.min(YAZ0_MAX_MATCH_LEN);
    let lowest = pos.saturating_sub(window);

    let mut best_distance = 0;
    let mut best_len = YAZ0_MIN_MATCH_LEN - 1;

    for candidate in (lowest..pos).rev() {
        // the match may overlap `pos`; it only ever reads input bytes
        let len = data[candidate..]
            .iter()
            .zip(&data[pos..pos + max_len])
            .take_while(|(a, b)| a == b)
            .count();

        if len > best_len {
            best_len = len;
            best_distance = pos - candidate;
            if best_len == max_len {
                break;
            }
        }
    }

    if best_distance == 0 {
        (0, 0)
    } else {
        (best_distance, best_len)
    }
}

pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    compress_with(data, &Yaz0Options::default())
}

pub fn compress_with(data: &[u8], options: &Yaz0Options) -> Result<Vec<u8>> {
    let len = u32::try_from(data.len()).map_err(|_| RomError::InputTooLarge {
        len: data.len(),
        max: u32::MAX as usize,
    })?;
    let window = options.window.clamp(1, YAZ0_MAX_WINDOW);

    let mut out = Vec::with_capacity(data.len() + data.len() / 8 + 0x18);
    out.extend_from_slice(YAZ0_MAGIC);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&[0u8; 8]);

    let mut pos = 0;
    while pos < data.len() {
        let flags_pos = out.len();
        out.push(0);
        let mut flags = 0u8;

        for i in 0..8 {
            let (distance, length) = search(data, pos, window);
            if length >= YAZ0_MIN_MATCH_LEN {
                let back = distance - 1;
                if length >= YAZ0_LONG_MATCH_LEN {
                    out.push((back >> 8) as u8 & 0x0F);
                    out.push(back as u8);
                    out.push((length - YAZ0_LONG_MATCH_LEN) as u8);
                } else {
                    out.push(((back >> 8) as u8 & 0x0F) | (((length - 2) as u8) << 4));
                    out.push(back as u8);
                }
                pos += length;
                flags <<= 1;
            } else {
                out.push(data[pos]);
                pos += 1;
                flags = (flags << 1) | 1;
            }

            if pos >= data.len() {
                flags <<= 7 - i;
                break;
            }
        }

        out[flags_pos] = flags;
    }

    while out.len() % 4 != 0 {
        out.push(0);
    }
    out.shrink_to_fit();

    debug!(
        "Yaz0: compressed {} -> {} bytes (window 0x{:X})",
        data.len(),
        out.len(),
        window
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_data() -> Vec<u8> {
        let mut data = Vec::new();
        let mut state = 0xDEAD_BEEFu32;
        for i in 0..6000u32 {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
            data.push(if i % 50 < 30 { (i % 13) as u8 } else { (state >> 24) as u8 });
        }
        data.extend(std::iter::repeat(0x7F).take(700));
        data
    }

    #[test]
    fn round_trip() {
        for input in [vec![], vec![9], b"abab".to_vec(), sample_data()] {
            let compressed = compress(&input).unwrap();
            assert_eq!(compressed.len() % 4, 0);
            assert_eq!(decompress(&compressed).unwrap(), input);
        }
    }

    #[test]
    fn round_trip_with_small_window() {
        let input = sample_data();
        let small = compress_with(&input, &Yaz0Options::with_window(0x80)).unwrap();
        assert_eq!(decompress(&small).unwrap(), input);
        assert_eq!(Yaz0Options::with_window(0).window, 1);
        assert_eq!(Yaz0Options::with_window(0x8000).window, YAZ0_MAX_WINDOW);
    }

    #[test]
    fn header_layout() {
        let compressed = compress(b"xyz").unwrap();
        assert_eq!(&compressed[..4], b"Yaz0");
        assert_eq!(&compressed[4..8], &[0, 0, 0, 3]);
        assert_eq!(&compressed[8..16], &[0; 8]);
        assert_eq!(compressed[16], 0b1110_0000);
        assert_eq!(compressed.len(), 20);
    }

    #[test]
    fn empty_input_is_header_only() {
        let compressed = compress(&[]).unwrap();
        assert_eq!(compressed.len(), YAZ0_HEADER_SIZE);
        assert!(decompress(&compressed).unwrap().is_empty());
    }

    #[test]
    fn long_matches_use_three_bytes() {
        let input = vec![0x55u8; 0x200];
        let compressed = compress(&input).unwrap();
        // literal, then a 0x111-byte run at distance 1
        assert_eq!(compressed[16], 0b1000_0000);
        assert_eq!(&compressed[17..21], &[0x55, 0x00, 0x00, 0xFF]);
        assert_eq!(decompress(&compressed).unwrap(), input);
    }

    #[test]
    fn short_match_encoding() {
        let data = [
            b'Y', b'a', b'z', b'0', 0, 0, 0, 6, 0, 0, 0, 0, 0, 0, 0, 0,
            // two literals, then "ab" again twice (length 4, distance 2)
            0b1100_0000, b'a', b'b', 0x20, 0x01,
        ];
        assert_eq!(decompress(&data).unwrap(), b"ababab");
    }

    #[test]
    fn equal_matches_prefer_the_nearest() {
        // "abc" at offsets 0 and 4 both match at offset 8; offset 4 wins
        let compressed = compress(b"abcXabcYabc").unwrap();
        assert_eq!(
            &compressed[16..],
            &[0b1111_0100, b'a', b'b', b'c', b'X', 0x10, 0x03, b'Y', 0x10, 0x03, 0, 0]
        );
        assert_eq!(decompress(&compressed).unwrap(), b"abcXabcYabc");
    }

    #[test]
    fn stops_mid_group_at_declared_length() {
        // 3 bytes declared, flag byte says 8 literals, only 3 present
        let data = [
            b'Y', b'a', b'z', b'0', 0, 0, 0, 3, 0, 0, 0, 0, 0, 0, 0, 0,
            0xFF, b'x', b'y', b'z',
        ];
        assert_eq!(decompress(&data).unwrap(), b"xyz");
    }

    #[test]
    fn stops_mid_match_at_declared_length() {
        // literal 'q' then a 17-byte run at distance 1, but only 5 bytes declared
        let data = [
            b'Y', b'a', b'z', b'0', 0, 0, 0, 5, 0, 0, 0, 0, 0, 0, 0, 0,
            0b1000_0000, b'q', 0xF0, 0x00,
        ];
        assert_eq!(decompress(&data).unwrap(), b"qqqqq");
    }

    #[test]
    fn bad_magic() {
        assert!(matches!(
            decompress(b"Yaz1\0\0\0\0\0\0\0\0\0\0\0\0"),
            Err(RomError::BadMagic { .. })
        ));
    }

    #[test]
    fn truncated_stream() {
        let mut compressed = compress(&sample_data()).unwrap();
        compressed.truncate(compressed.len() / 2);
        assert!(matches!(
            decompress(&compressed),
            Err(RomError::Truncated { .. })
        ));
    }

    #[test]
    fn reference_before_start() {
        let data = [
            b'Y', b'a', b'z', b'0', 0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0x00, 0x10, 0x00,
        ];
        assert!(matches!(
            decompress(&data),
            Err(RomError::InvalidBackReference { .. })
        ));
    }
}
