// LZ77 type 0x10, the format the DS BIOS decodes.
//
// Header: u32 LE = (decompressed length << 8) | 0x10, optionally preceded by
// the ASCII tag "LZ77". The body is groups of one flag byte followed by
// eight units; a set flag bit (MSB first) is a 2-byte back-reference
// (length - 3 in the high nibble, 12-bit displacement - 1 below it), a
// clear bit is a literal byte.

use tracing::debug;

use crate::binary_utils;
use crate::containers::ContainerHandler;
use crate::error::{Result, RomError};

pub const LZ77_MAGIC: &[u8] = b"LZ77";
pub const LZ77_TYPE: u8 = 0x10;
/// Type byte written by `fast_compress`.
const LZ77_STORED_TYPE: u8 = 0x00;
pub const LZ77_MAX_LENGTH: usize = 0xFF_FFFF;

const LZ77_WINDOW_SIZE: usize = 4096;
const LZ77_MAX_MATCH_LEN: usize = 18;
const LZ77_MIN_MATCH_LEN: usize = 3;

/// The "LZ77"-tagged flavour of the container.
pub struct TaggedLz77;

impl ContainerHandler for TaggedLz77 {
    fn magic_word() -> &'static [u8] {
        LZ77_MAGIC
    }
}

fn header_offset(data: &[u8], tagged: bool) -> Result<usize> {
    if !tagged {
        return Ok(0);
    }
    if !TaggedLz77::matches(data) {
        return Err(RomError::BadMagic { expected: "LZ77" });
    }
    Ok(LZ77_MAGIC.len())
}

/// Reads the declared decompressed length from the header.
pub fn decompressed_size(data: &[u8], tagged: bool) -> Result<usize> {
    let header = binary_utils::u32_le_at(data, header_offset(data, tagged)?)?;
    Ok((header >> 8) as usize)
}

pub fn decompress(data: &[u8], tagged: bool) -> Result<Vec<u8>> {
    let start = header_offset(data, tagged)?;
    let header = binary_utils::u32_le_at(data, start)?;
    let compression_type = header as u8;
    if compression_type != LZ77_TYPE && compression_type != LZ77_STORED_TYPE {
        return Err(RomError::UnsupportedCompressionType(compression_type));
    }

    let decompressed_size = (header >> 8) as usize;
    let mut out = Vec::with_capacity(decompressed_size);
    let mut pos = start + 4;

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
                let reference =
                    ((next_byte(&mut pos)? as usize) << 8) | next_byte(&mut pos)? as usize;
                let length = (reference >> 12) + LZ77_MIN_MATCH_LEN;
                let displacement = (reference & 0xFFF) + 1;

                let mut window = out.len().checked_sub(displacement).ok_or(
                    RomError::InvalidBackReference {
                        position: out.len(),
                        distance: displacement,
                    },
                )?;
                for _ in 0..length {
                    let byte = out[window];
                    out.push(byte);
                    window += 1;
                    if out.len() == decompressed_size {
                        break 'groups;
                    }
                }
            } else {
                out.push(next_byte(&mut pos)?);
                if out.len() == decompressed_size {
                    break 'groups;
                }
            }
        }
    }

    Ok(out)
}

/// Leftmost-longest match for `data[pos..]` in the window before it. Matches
/// never extend into `pos` itself.
fn search(data: &[u8], pos: usize) -> (usize, usize) {
    let start = pos.saturating_sub(LZ77_WINDOW_SIZE);
    let mut best_pos = 0;
    let mut best_len = 0;

    for candidate in start..pos {
        let max_len = LZ77_MAX_MATCH_LEN
            .min(pos - candidate)
            .min(data.len() - pos);
        let len = data[candidate..candidate + max_len]
            .iter()
            .zip(&data[pos..pos + max_len])
            .take_while(|(a, b)| a == b)
            .count();

        if len > best_len {
            best_pos = candidate;
            best_len = len;
        }

        if best_len == LZ77_MAX_MATCH_LEN {
            break;
        }
    }

    (best_pos, best_len)
}

fn write_header(out: &mut Vec<u8>, len: usize, compression_type: u8, tagged: bool) -> Result<()> {
    if len > LZ77_MAX_LENGTH {
        return Err(RomError::InputTooLarge {
            len,
            max: LZ77_MAX_LENGTH,
        });
    }
    if tagged {
        out.extend_from_slice(LZ77_MAGIC);
    }
    out.extend_from_slice(&(((len as u32) << 8) | compression_type as u32).to_le_bytes());
    Ok(())
}

pub fn compress(data: &[u8], tagged: bool) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 8 + 8);
    write_header(&mut out, data.len(), LZ77_TYPE, tagged)?;

    let mut group = Vec::with_capacity(16);
    let mut current = 0;

    while current < data.len() {
        group.clear();
        let mut flags = 0u8;

        for i in 0..8 {
            if current >= data.len() {
                group.push(0);
                continue;
            }

            let (match_pos, match_len) = search(data, current);
            if match_len >= LZ77_MIN_MATCH_LEN {
                let displacement = current - match_pos - 1;
                flags |= 1 << (7 - i);
                group.push((((match_len - LZ77_MIN_MATCH_LEN) << 4) | (displacement >> 8)) as u8);
                group.push(displacement as u8);
                current += match_len;
            } else {
                group.push(data[current]);
                current += 1;
            }
        }

        out.push(flags);
        out.extend_from_slice(&group);
    }

    debug!("LZ77: compressed {} -> {} bytes", data.len(), out.len());
    Ok(out)
}

/// Whether `data` is exactly the size `fast_compress` produces for the
/// length declared in an untagged type 0x00 header.
pub fn is_stored(data: &[u8]) -> bool {
    match binary_utils::u32_le_at(data, 0) {
        Ok(header) if header as u8 == LZ77_STORED_TYPE => {
            let len = (header >> 8) as usize;
            data.len() == 4 + len + len.div_ceil(8)
        }
        _ => false,
    }
}

/// Stores `data` uncompressed in an LZ77 container: every flag byte is zero.
pub fn fast_compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(4 + data.len() + data.len().div_ceil(8));
    write_header(&mut out, data.len(), LZ77_STORED_TYPE, false)?;

    for chunk in data.chunks(8) {
        out.push(0);
        out.extend_from_slice(chunk);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_data() -> Vec<u8> {
        let mut data = b"tileset tileset tileset palette palette ".repeat(20);
        let mut state = 0x1234_5678u32;
        for _ in 0..3000 {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            data.push((state % 7) as u8);
        }
        data.extend(std::iter::repeat(0xAA).take(500));
        data
    }

    #[test]
    fn round_trip() {
        for input in [vec![], vec![0x42], b"abcabcabcabcabc".to_vec(), sample_data()] {
            let compressed = compress(&input, false).unwrap();
            assert_eq!(decompress(&compressed, false).unwrap(), input);
        }
    }

    #[test]
    fn round_trip_tagged() {
        let input = sample_data();
        let compressed = compress(&input, true).unwrap();
        assert!(compressed.starts_with(b"LZ77"));
        assert_eq!(decompressed_size(&compressed, true).unwrap(), input.len());
        assert_eq!(decompress(&compressed, true).unwrap(), input);
    }

    #[test]
    fn compresses_repetitive_data() {
        let input = vec![0u8; 4096];
        let compressed = compress(&input, false).unwrap();
        assert!(compressed.len() < input.len() / 4);
    }

    #[test]
    fn header_layout() {
        let compressed = compress(&[1, 2, 3], false).unwrap();
        assert_eq!(&compressed[..4], &[0x10, 0x03, 0x00, 0x00]);
        // one group of three literals padded with five zero placeholders
        assert_eq!(&compressed[4..], &[0x00, 1, 2, 3, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn back_reference_encoding() {
        // a match may not run into the current position, so the first
        // 3-byte match only becomes available at offset 3
        let compressed = compress(b"aaaaaaaa", false).unwrap();
        assert_eq!(
            &compressed[4..],
            &[0b0001_0000, b'a', b'a', b'a', 0x00, 0x02, b'a', b'a', 0, 0]
        );
        assert_eq!(decompress(&compressed, false).unwrap(), b"aaaaaaaa");
    }

    #[test]
    fn equal_matches_prefer_the_earliest() {
        // "abc" at offsets 0 and 4 both match at offset 8; offset 0 wins
        let compressed = compress(b"abcXabcYabc", false).unwrap();
        assert_eq!(
            &compressed[4..],
            &[0b0000_1010, b'a', b'b', b'c', b'X', 0x00, 0x03, b'Y', 0x00, 0x07, 0x00]
        );
        assert_eq!(decompress(&compressed, false).unwrap(), b"abcXabcYabc");
    }

    #[test]
    fn zero_length_reads_nothing_past_header() {
        assert!(decompress(&[0x10, 0, 0, 0], false).unwrap().is_empty());
    }

    #[test]
    fn stops_mid_group_at_declared_length() {
        // 3 literals declared, flag byte says 8 literals, only 3 present
        let data = [0x10, 3, 0, 0, 0x00, b'x', b'y', b'z'];
        assert_eq!(decompress(&data, false).unwrap(), b"xyz");
    }

    #[test]
    fn stops_mid_match_at_declared_length() {
        // literal 'q' then an 18-byte match, but only 5 bytes declared
        let data = [0x10, 5, 0, 0, 0b0100_0000, b'q', 0xF0, 0x00];
        assert_eq!(decompress(&data, false).unwrap(), b"qqqqq");
    }

    #[test]
    fn truncated_body() {
        let data = [0x10, 10, 0, 0, 0x00, b'x'];
        assert!(matches!(
            decompress(&data, false),
            Err(RomError::Truncated { .. })
        ));
    }

    #[test]
    fn reference_before_start() {
        let data = [0x10, 4, 0, 0, 0x80, 0x00, 0x05];
        assert!(matches!(
            decompress(&data, false),
            Err(RomError::InvalidBackReference { .. })
        ));
    }

    #[test]
    fn missing_tag() {
        let compressed = compress(b"data", false).unwrap();
        assert!(matches!(
            decompress(&compressed, true),
            Err(RomError::BadMagic { .. })
        ));
    }

    #[test]
    fn wrong_type_byte() {
        assert!(matches!(
            decompress(&[0x11, 0, 0, 0], false),
            Err(RomError::UnsupportedCompressionType(0x11))
        ));
    }

    #[test]
    fn fast_compress_stores_literals() {
        let input = b"0123456789".to_vec();
        let stored = fast_compress(&input).unwrap();
        assert_eq!(stored.len(), 4 + 10 + 2);
        assert_eq!(stored[0], 0x00);
        assert_eq!(decompress(&stored, false).unwrap(), input);
        assert!(is_stored(&stored));
        assert!(is_stored(&fast_compress(&[]).unwrap()));
    }

    #[test]
    fn stored_size_must_match_header() {
        let mut stored = fast_compress(b"0123456789").unwrap();
        stored.push(0);
        assert!(!is_stored(&stored));
        assert!(!is_stored(&compress(b"0123456789", false).unwrap()));
        assert!(!is_stored(&[0x00, 0x01]));
    }
}
