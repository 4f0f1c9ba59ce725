use std::io::{Cursor, Read, Seek, SeekFrom};

use crate::error::{Result, RomError};

fn truncated(cursor: &Cursor<&[u8]>, needed: u64) -> RomError {
    RomError::Truncated {
        offset: (cursor.position() + needed) as usize,
        len: cursor.get_ref().len(),
    }
}

fn ensure_remaining(cursor: &Cursor<&[u8]>, needed: u64) -> Result<()> {
    if cursor.position() + needed > cursor.get_ref().len() as u64 {
        return Err(truncated(cursor, needed));
    }
    Ok(())
}

pub fn read_u16_le(cursor: &mut Cursor<&[u8]>) -> Result<u16> {
    ensure_remaining(cursor, 2)?;
    let mut buf = [0u8; 2];
    cursor.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

pub fn read_u32_le(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    ensure_remaining(cursor, 4)?;
    let mut buf = [0u8; 4];
    cursor.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn skip(cursor: &mut Cursor<&[u8]>, count: u64) -> Result<()> {
    ensure_remaining(cursor, count)?;
    cursor.seek(SeekFrom::Current(count as i64))?;
    Ok(())
}

pub fn seek_to(cursor: &mut Cursor<&[u8]>, position: u64) -> Result<()> {
    if position > cursor.get_ref().len() as u64 {
        return Err(RomError::Truncated {
            offset: position as usize,
            len: cursor.get_ref().len(),
        });
    }

    cursor.seek(SeekFrom::Start(position))?;
    Ok(())
}

fn slice_at(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or(RomError::Truncated {
            offset: offset.saturating_add(len),
            len: data.len(),
        })
}

pub fn u16_le_at(data: &[u8], offset: usize) -> Result<u16> {
    let bytes = slice_at(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub fn u32_le_at(data: &[u8], offset: usize) -> Result<u32> {
    let bytes = slice_at(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub fn u32_be_at(data: &[u8], offset: usize) -> Result<u32> {
    let bytes = slice_at(data, offset, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub fn bytes_at(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    slice_at(data, offset, len)
}

pub fn write_u16_le(data: &mut [u8], value: u16, pos: usize) -> Result<()> {
    let len = data.len();
    let slot = pos
        .checked_add(2)
        .and_then(|end| data.get_mut(pos..end))
        .ok_or(RomError::Truncated {
            offset: pos.saturating_add(2),
            len,
        })?;
    slot.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_reads_fail_cleanly_at_the_end() {
        let data = [0x34u8, 0x12, 0x78];
        let mut cursor = Cursor::new(&data[..]);
        assert_eq!(read_u16_le(&mut cursor).unwrap(), 0x1234);
        assert!(matches!(
            read_u16_le(&mut cursor),
            Err(RomError::Truncated { offset: 4, len: 3 })
        ));
        assert!(read_u32_le(&mut Cursor::new(&data[..])).is_err());
    }

    #[test]
    fn offset_reads() {
        let data = [0x01u8, 0x02, 0x03, 0x04, 0x05];
        assert_eq!(u32_le_at(&data, 1).unwrap(), 0x0504_0302);
        assert_eq!(u32_be_at(&data, 0).unwrap(), 0x0102_0304);
        assert!(u32_le_at(&data, 2).is_err());
        assert!(u16_le_at(&data, usize::MAX).is_err());
    }

    #[test]
    fn write_u16_is_bounds_checked() {
        let mut data = [0u8; 3];
        write_u16_le(&mut data, 0xBEEF, 1).unwrap();
        assert_eq!(data, [0x00, 0xEF, 0xBE]);
        assert!(write_u16_le(&mut data, 1, 2).is_err());
    }
}
