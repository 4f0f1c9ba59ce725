use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::binary_utils::{bytes_at, u16_le_at, u32_le_at};
use crate::checksum::crc16;
use crate::error::{Result, RomError};
use crate::filesystem::{FileAllocationTable, FileNameTable, FileRef, FileSystem};

pub const HEADER_SIZE: usize = 0x200;
pub const GAME_CODE_OFFSET: usize = 0x00C;
pub const ARM9_RAM_ADDRESS_OFFSET: usize = 0x028;
const HEADER_CRC_OFFSET: usize = 0x15E;

/// ROM header information
#[derive(Debug, Clone, Serialize)]
pub struct RomHeader {
    pub game_title: String,
    pub game_code: String,
    pub maker_code: String,
    pub arm9_rom_offset: u32,
    pub arm9_entry_address: u32,
    pub arm9_ram_address: u32,
    pub arm9_size: u32,
    pub arm7_rom_offset: u32,
    pub arm7_entry_address: u32,
    pub arm7_ram_address: u32,
    pub arm7_size: u32,
    pub fnt_offset: u32,
    pub fnt_size: u32,
    pub fat_offset: u32,
    pub fat_size: u32,
    pub arm9_overlay_table_offset: u32,
    pub arm9_overlay_table_size: u32,
    pub arm7_overlay_table_offset: u32,
    pub arm7_overlay_table_size: u32,
    pub header_crc: u16,
}

fn read_string(data: &[u8], offset: usize, len: usize) -> Result<String> {
    let bytes = bytes_at(data, offset, len)?;
    Ok(String::from_utf8_lossy(bytes)
        .trim_end_matches('\0')
        .to_string())
}

impl RomHeader {
    pub fn parse(rom_data: &[u8]) -> Result<Self> {
        if rom_data.len() < HEADER_SIZE {
            return Err(RomError::InvalidHeader("image is smaller than a ROM header"));
        }

        Ok(RomHeader {
            game_title: read_string(rom_data, 0x000, 12)?,
            game_code: read_string(rom_data, GAME_CODE_OFFSET, 4)?,
            maker_code: read_string(rom_data, 0x010, 2)?,
            arm9_rom_offset: u32_le_at(rom_data, 0x020)?,
            arm9_entry_address: u32_le_at(rom_data, 0x024)?,
            arm9_ram_address: u32_le_at(rom_data, ARM9_RAM_ADDRESS_OFFSET)?,
            arm9_size: u32_le_at(rom_data, 0x02C)?,
            arm7_rom_offset: u32_le_at(rom_data, 0x030)?,
            arm7_entry_address: u32_le_at(rom_data, 0x034)?,
            arm7_ram_address: u32_le_at(rom_data, 0x038)?,
            arm7_size: u32_le_at(rom_data, 0x03C)?,
            fnt_offset: u32_le_at(rom_data, 0x040)?,
            fnt_size: u32_le_at(rom_data, 0x044)?,
            fat_offset: u32_le_at(rom_data, 0x048)?,
            fat_size: u32_le_at(rom_data, 0x04C)?,
            arm9_overlay_table_offset: u32_le_at(rom_data, 0x050)?,
            arm9_overlay_table_size: u32_le_at(rom_data, 0x054)?,
            arm7_overlay_table_offset: u32_le_at(rom_data, 0x058)?,
            arm7_overlay_table_size: u32_le_at(rom_data, 0x05C)?,
            header_crc: u16_le_at(rom_data, HEADER_CRC_OFFSET)?,
        })
    }

    /// CRC16 over the header bytes that precede the stored checksum.
    pub fn compute_crc(rom_data: &[u8]) -> Result<u16> {
        Ok(crc16(bytes_at(rom_data, 0, HEADER_CRC_OFFSET)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FileKey {
    Header,
    Arm9,
    Arm9OverlayTable,
    Arm7,
    Arm7OverlayTable,
    Fat(u16),
}

/// A Nintendo DS ROM image held in memory, exposed as a `FileSystem`.
///
/// Besides FAT files, the system files `header.bin`, `arm9.bin`,
/// `arm9ovt.bin`, `arm7.bin` and `arm7ovt.bin` can be read and edited by
/// name. Committed edits shadow the original bytes; the image itself is
/// never rewritten.
pub struct NitroRom {
    data: Vec<u8>,
    pub header: RomHeader,
    pub fat: FileAllocationTable,
    pub fnt: FileNameTable,
    committed: HashMap<FileKey, Vec<u8>>,
    open_edits: HashMap<FileKey, Option<Vec<u8>>>,
}

impl NitroRom {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(path.as_ref())?;
        info!("Read {:?} ({} bytes)", path.as_ref(), data.len());
        Self::from_bytes(data)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let header = RomHeader::parse(&data)?;

        if RomHeader::compute_crc(&data)? != header.header_crc {
            warn!("Header checksum mismatch");
        }

        let fat = FileAllocationTable::read_from_rom(&data, header.fat_offset, header.fat_size)?;
        let fnt = FileNameTable::read_from_rom(&data, header.fnt_offset)?;
        debug!(
            "{} FAT entries, {} named files",
            fat.len(),
            fnt.file_names.len()
        );

        Ok(NitroRom {
            data,
            header,
            fat,
            fnt,
            committed: HashMap::new(),
            open_edits: HashMap::new(),
        })
    }

    /// Whether the stored header checksum matches the header bytes.
    pub fn header_crc_ok(&self) -> bool {
        RomHeader::compute_crc(&self.data).is_ok_and(|crc| crc == self.header.header_crc)
    }

    /// Whether `file` has committed edits.
    pub fn is_edited(&self, file: FileRef<'_>) -> bool {
        self.resolve(file)
            .is_ok_and(|key| self.committed.contains_key(&key))
    }

    fn resolve(&self, file: FileRef<'_>) -> Result<FileKey> {
        match file {
            FileRef::Name("header.bin") => Ok(FileKey::Header),
            FileRef::Name("arm9.bin") => Ok(FileKey::Arm9),
            FileRef::Name("arm9ovt.bin") => Ok(FileKey::Arm9OverlayTable),
            FileRef::Name("arm7.bin") => Ok(FileKey::Arm7),
            FileRef::Name("arm7ovt.bin") => Ok(FileKey::Arm7OverlayTable),
            FileRef::Name(path) => self
                .fnt
                .get_file_id(path)
                .map(FileKey::Fat)
                .ok_or_else(|| RomError::FileNotFound(path.to_string())),
            FileRef::Id(id) if (id as usize) < self.fat.len() => Ok(FileKey::Fat(id)),
            FileRef::Id(_) => Err(RomError::FileNotFound(file.to_string())),
        }
    }

    fn original_bytes(&self, key: FileKey) -> Result<&[u8]> {
        let region = |offset: u32, size: u32| bytes_at(&self.data, offset as usize, size as usize);
        let header = &self.header;

        match key {
            FileKey::Header => bytes_at(&self.data, 0, HEADER_SIZE),
            FileKey::Arm9 => region(header.arm9_rom_offset, header.arm9_size),
            FileKey::Arm9OverlayTable => region(
                header.arm9_overlay_table_offset,
                header.arm9_overlay_table_size,
            ),
            FileKey::Arm7 => region(header.arm7_rom_offset, header.arm7_size),
            FileKey::Arm7OverlayTable => region(
                header.arm7_overlay_table_offset,
                header.arm7_overlay_table_size,
            ),
            FileKey::Fat(id) => self
                .fat
                .get_file_data(id, &self.data)
                .ok_or_else(|| RomError::FileNotFound(FileRef::Id(id).to_string())),
        }
    }

    fn current_bytes(&self, key: FileKey) -> Result<&[u8]> {
        match self.committed.get(&key) {
            Some(data) => Ok(data),
            None => self.original_bytes(key),
        }
    }
}

impl FileSystem for NitroRom {
    fn read_file(&self, file: FileRef<'_>) -> Result<Vec<u8>> {
        let key = self.resolve(file)?;
        Ok(self.current_bytes(key)?.to_vec())
    }

    fn begin_edit(&mut self, file: FileRef<'_>) -> Result<()> {
        let key = self.resolve(file)?;
        if self.open_edits.contains_key(&key) {
            return Err(RomError::EditInProgress(file.to_string()));
        }
        self.open_edits.insert(key, None);
        Ok(())
    }

    fn replace(&mut self, file: FileRef<'_>, data: Vec<u8>) -> Result<()> {
        let key = self.resolve(file)?;
        let staged = self
            .open_edits
            .get_mut(&key)
            .ok_or_else(|| RomError::NoEditInProgress(file.to_string()))?;
        *staged = Some(data);
        Ok(())
    }

    fn end_edit(&mut self, file: FileRef<'_>) -> Result<()> {
        let key = self.resolve(file)?;
        match self.open_edits.remove(&key) {
            Some(Some(data)) => {
                debug!("Committed {} ({} bytes)", file, data.len());
                self.committed.insert(key, data);
                Ok(())
            }
            Some(None) => Ok(()),
            None => Err(RomError::NoEditInProgress(file.to_string())),
        }
    }

    fn read_header_field(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let header = self.current_bytes(FileKey::Header)?;
        Ok(bytes_at(header, offset, len)?.to_vec())
    }
}

/// Builds a minimal ROM image: a 16-byte ARM9 binary, a one-record ARM9
/// overlay table for file 0, no ARM7 overlays and a root directory
/// holding `level.bin` as file 1.
#[cfg(test)]
pub(crate) fn build_test_rom(game_code: &[u8; 4], overlay_file: &[u8], overlay_flags: u8) -> Vec<u8> {
    use crate::overlay::encode_record;

    fn put_u32(rom: &mut [u8], offset: usize, value: u32) {
        rom[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    let arm9 = [0xEAu8; 16];
    let ovt = encode_record(0, 0x0203_0000, 0, overlay_file.len() as u32, overlay_flags);
    let level = b"level data";

    let mut fnt = Vec::new();
    fnt.extend_from_slice(&8u32.to_le_bytes());
    fnt.extend_from_slice(&1u16.to_le_bytes());
    fnt.extend_from_slice(&1u16.to_le_bytes());
    fnt.push(9);
    fnt.extend_from_slice(b"level.bin");
    fnt.push(0);

    let arm9_offset = HEADER_SIZE;
    let ovt_offset = arm9_offset + arm9.len();
    let fnt_offset = ovt_offset + ovt.len();
    let fat_offset = (fnt_offset + fnt.len()).next_multiple_of(4);
    let overlay_offset = fat_offset + 16;
    let level_offset = overlay_offset + overlay_file.len();
    let total = level_offset + level.len();

    let mut rom = vec![0u8; total];
    rom[0..9].copy_from_slice(b"NEW MARIO");
    rom[GAME_CODE_OFFSET..GAME_CODE_OFFSET + 4].copy_from_slice(game_code);
    rom[0x10..0x12].copy_from_slice(b"01");
    put_u32(&mut rom, 0x20, arm9_offset as u32);
    put_u32(&mut rom, 0x24, 0x0200_0800);
    put_u32(&mut rom, ARM9_RAM_ADDRESS_OFFSET, 0x0200_0000);
    put_u32(&mut rom, 0x2C, arm9.len() as u32);
    put_u32(&mut rom, 0x40, fnt_offset as u32);
    put_u32(&mut rom, 0x44, fnt.len() as u32);
    put_u32(&mut rom, 0x48, fat_offset as u32);
    put_u32(&mut rom, 0x4C, 16);
    put_u32(&mut rom, 0x50, ovt_offset as u32);
    put_u32(&mut rom, 0x54, ovt.len() as u32);

    rom[arm9_offset..ovt_offset].copy_from_slice(&arm9);
    rom[ovt_offset..fnt_offset].copy_from_slice(&ovt);
    rom[fnt_offset..fnt_offset + fnt.len()].copy_from_slice(&fnt);
    put_u32(&mut rom, fat_offset, overlay_offset as u32);
    put_u32(&mut rom, fat_offset + 4, level_offset as u32);
    put_u32(&mut rom, fat_offset + 8, level_offset as u32);
    put_u32(&mut rom, fat_offset + 12, total as u32);
    rom[overlay_offset..level_offset].copy_from_slice(overlay_file);
    rom[level_offset..].copy_from_slice(level);

    let crc = crc16(&rom[..HEADER_CRC_OFFSET]);
    rom[HEADER_CRC_OFFSET..HEADER_CRC_OFFSET + 2].copy_from_slice(&crc.to_le_bytes());
    rom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_rom() -> NitroRom {
        NitroRom::from_bytes(build_test_rom(b"A2DE", b"overlay zero", 0)).unwrap()
    }

    #[test]
    fn parses_header() {
        let rom = test_rom();
        assert_eq!(rom.header.game_title, "NEW MARIO");
        assert_eq!(rom.header.game_code, "A2DE");
        assert_eq!(rom.header.maker_code, "01");
        assert_eq!(rom.header.arm9_ram_address, 0x0200_0000);
        assert!(rom.header_crc_ok());
    }

    #[test]
    fn short_image_is_rejected() {
        assert!(matches!(
            NitroRom::from_bytes(vec![0; 0x100]),
            Err(RomError::InvalidHeader(_))
        ));
    }

    #[test]
    fn reads_files_by_id_name_and_path() {
        let rom = test_rom();
        assert_eq!(rom.read_file(FileRef::Id(0)).unwrap(), b"overlay zero");
        assert_eq!(rom.read_file(FileRef::Name("level.bin")).unwrap(), b"level data");
        assert_eq!(rom.read_file(FileRef::Name("/level.bin")).unwrap(), b"level data");
        assert_eq!(rom.read_file(FileRef::Name("arm9.bin")).unwrap(), vec![0xEA; 16]);
        assert_eq!(rom.read_file(FileRef::Name("arm9ovt.bin")).unwrap().len(), 32);
        assert!(rom.read_file(FileRef::Name("arm7ovt.bin")).unwrap().is_empty());
        assert_eq!(rom.read_file(FileRef::Name("header.bin")).unwrap().len(), HEADER_SIZE);
        assert!(matches!(
            rom.read_file(FileRef::Name("missing.bin")),
            Err(RomError::FileNotFound(_))
        ));
        assert!(matches!(
            rom.read_file(FileRef::Id(7)),
            Err(RomError::FileNotFound(_))
        ));
    }

    #[test]
    fn header_fields() {
        let rom = test_rom();
        assert_eq!(rom.read_header_field(GAME_CODE_OFFSET, 4).unwrap(), b"A2DE");
        assert_eq!(
            rom.read_header_field(ARM9_RAM_ADDRESS_OFFSET, 4).unwrap(),
            0x0200_0000u32.to_le_bytes()
        );
        assert!(rom.read_header_field(HEADER_SIZE - 2, 4).is_err());
    }

    #[test]
    fn edits_are_transactional() {
        let mut rom = test_rom();
        let level = FileRef::Name("level.bin");

        rom.begin_edit(level).unwrap();
        rom.replace(level, b"new level".to_vec()).unwrap();
        // staged bytes stay invisible until the edit ends
        assert_eq!(rom.read_file(level).unwrap(), b"level data");
        assert!(matches!(
            rom.begin_edit(FileRef::Id(1)),
            Err(RomError::EditInProgress(_))
        ));
        rom.end_edit(level).unwrap();

        assert_eq!(rom.read_file(FileRef::Id(1)).unwrap(), b"new level");
        assert!(rom.is_edited(FileRef::Id(1)));
        assert!(!rom.is_edited(FileRef::Id(0)));
    }

    #[test]
    fn replace_requires_an_open_edit() {
        let mut rom = test_rom();
        assert!(matches!(
            rom.replace(FileRef::Id(0), vec![1, 2, 3]),
            Err(RomError::NoEditInProgress(_))
        ));
        assert!(matches!(
            rom.end_edit(FileRef::Id(0)),
            Err(RomError::NoEditInProgress(_))
        ));
    }

    #[test]
    fn empty_edit_changes_nothing() {
        let mut rom = test_rom();
        rom.begin_edit(FileRef::Id(0)).unwrap();
        rom.end_edit(FileRef::Id(0)).unwrap();
        assert!(!rom.is_edited(FileRef::Id(0)));
    }
}
