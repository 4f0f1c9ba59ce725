use std::io::Cursor;

use serde::Serialize;
use tracing::debug;

use crate::binary_utils;
use crate::error::{Result, RomError};

pub const OVERLAY_RECORD_SIZE: usize = 32;

/// Offset of the compressed-size/flags word inside a record.
const COMPRESSION_WORD_OFFSET: usize = 0x1C;
const FLAG_COMPRESSED: u8 = 0x01;

/// One record of an ARM9 or ARM7 overlay table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverlayDescriptor {
    pub overlay_id: u32,
    pub ram_address: u32,
    pub ram_size: u32,
    pub bss_size: u32,
    pub static_init_start: u32,
    pub static_init_end: u32,
    pub file_id: u16,
    /// Byte offset of this record inside the table file
    pub table_offset: u32,
    pub compressed_size: u32,
    pub flags: u8,
}

impl OverlayDescriptor {
    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }
}

/// An overlay table indexed both by overlay id and by backing file id.
#[derive(Debug, Clone, Default)]
pub struct OverlayTable {
    records: Vec<OverlayDescriptor>,
    by_id: Vec<Option<usize>>,
    by_file_id: Vec<Option<usize>>,
}

impl OverlayTable {
    /// Decodes every complete 32-byte record; a trailing partial record is ignored.
    pub fn parse(table_data: &[u8]) -> Result<Self> {
        let entry_count = table_data.len() / OVERLAY_RECORD_SIZE;
        debug!(
            "Overlay table: {} bytes, {} records",
            table_data.len(),
            entry_count
        );

        let mut cursor = Cursor::new(table_data);
        let mut records = Vec::with_capacity(entry_count);
        let mut by_id = vec![None; entry_count];
        let mut by_file_id = vec![None; entry_count];

        for entry_idx in 0..entry_count {
            let table_offset = entry_idx * OVERLAY_RECORD_SIZE;
            binary_utils::seek_to(&mut cursor, table_offset as u64)?;

            let overlay_id = binary_utils::read_u32_le(&mut cursor)?;
            let ram_address = binary_utils::read_u32_le(&mut cursor)?;
            let ram_size = binary_utils::read_u32_le(&mut cursor)?;
            let bss_size = binary_utils::read_u32_le(&mut cursor)?;
            let static_init_start = binary_utils::read_u32_le(&mut cursor)?;
            let static_init_end = binary_utils::read_u32_le(&mut cursor)?;
            let file_id = binary_utils::read_u16_le(&mut cursor)?;
            binary_utils::skip(&mut cursor, 2)?;
            let compressed_size_flags = binary_utils::read_u32_le(&mut cursor)?;

            let id_slot = by_id
                .get_mut(overlay_id as usize)
                .ok_or(RomError::OverlayIdOutOfRange {
                    id: overlay_id,
                    len: entry_count,
                })?;
            *id_slot = Some(entry_idx);

            let file_slot = by_file_id
                .get_mut(file_id as usize)
                .ok_or(RomError::FileIdOutOfRange {
                    id: file_id,
                    len: entry_count,
                })?;
            *file_slot = Some(entry_idx);

            records.push(OverlayDescriptor {
                overlay_id,
                ram_address,
                ram_size,
                bss_size,
                static_init_start,
                static_init_end,
                file_id,
                table_offset: table_offset as u32,
                compressed_size: compressed_size_flags & 0xFFFFFF,
                flags: (compressed_size_flags >> 24) as u8,
            });
        }

        Ok(OverlayTable {
            records,
            by_id,
            by_file_id,
        })
    }

    /// Number of slots in each view, which is also the record count.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, overlay_id: u32) -> Option<&OverlayDescriptor> {
        let idx = (*self.by_id.get(overlay_id as usize)?)?;
        self.records.get(idx)
    }

    pub fn get_by_file(&self, file_id: u16) -> Option<&OverlayDescriptor> {
        let idx = (*self.by_file_id.get(file_id as usize)?)?;
        self.records.get(idx)
    }

    /// Overlay-id view; `None` marks an unpopulated slot.
    pub fn by_id(&self) -> impl Iterator<Item = Option<&OverlayDescriptor>> + '_ {
        self.by_id
            .iter()
            .map(move |slot| slot.and_then(|idx| self.records.get(idx)))
    }

    /// File-id view; `None` marks an unpopulated slot.
    pub fn by_file_id(&self) -> impl Iterator<Item = Option<&OverlayDescriptor>> + '_ {
        self.by_file_id
            .iter()
            .map(move |slot| slot.and_then(|idx| self.records.get(idx)))
    }

    /// Records in table order.
    pub fn iter(&self) -> impl Iterator<Item = &OverlayDescriptor> {
        self.records.iter()
    }
}

/// Sets or clears the compressed flag of one record in a raw table buffer.
pub fn set_compressed_flag(
    table_data: &mut [u8],
    descriptor: &OverlayDescriptor,
    compressed: bool,
) -> Result<()> {
    let flag_pos = descriptor.table_offset as usize + COMPRESSION_WORD_OFFSET + 3;
    let len = table_data.len();
    let flags = table_data
        .get_mut(flag_pos)
        .ok_or(RomError::Truncated {
            offset: flag_pos,
            len,
        })?;

    if compressed {
        *flags |= FLAG_COMPRESSED;
    } else {
        *flags &= !FLAG_COMPRESSED;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn encode_record(
    overlay_id: u32,
    ram_address: u32,
    file_id: u16,
    compressed_size: u32,
    flags: u8,
) -> [u8; OVERLAY_RECORD_SIZE] {
    let mut record = [0u8; OVERLAY_RECORD_SIZE];
    record[0..4].copy_from_slice(&overlay_id.to_le_bytes());
    record[4..8].copy_from_slice(&ram_address.to_le_bytes());
    record[8..12].copy_from_slice(&0x100u32.to_le_bytes());
    record[12..16].copy_from_slice(&0x20u32.to_le_bytes());
    record[16..20].copy_from_slice(&(ram_address + 0xF0).to_le_bytes());
    record[20..24].copy_from_slice(&(ram_address + 0xF4).to_le_bytes());
    record[24..26].copy_from_slice(&file_id.to_le_bytes());
    let word = (compressed_size & 0xFFFFFF) | ((flags as u32) << 24);
    record[28..32].copy_from_slice(&word.to_le_bytes());
    record
}
