use std::collections::HashMap;
use std::fmt;

use crate::binary_utils::{u16_le_at, u32_le_at};
use crate::error::{Result, RomError};

/// A file addressed either by FAT id or by name/path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRef<'a> {
    Id(u16),
    Name(&'a str),
}

impl fmt::Display for FileRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileRef::Id(id) => write!(f, "file #{}", id),
            FileRef::Name(name) => write!(f, "{}", name),
        }
    }
}

/// What the ROM engine needs from the host file system: read any file,
/// replace one inside an edit transaction, and read raw header fields.
pub trait FileSystem {
    fn read_file(&self, file: FileRef<'_>) -> Result<Vec<u8>>;

    fn begin_edit(&mut self, file: FileRef<'_>) -> Result<()>;

    /// Stages new contents; only valid between `begin_edit` and `end_edit`.
    fn replace(&mut self, file: FileRef<'_>, data: Vec<u8>) -> Result<()>;

    fn end_edit(&mut self, file: FileRef<'_>) -> Result<()>;

    fn read_header_field(&self, offset: usize, len: usize) -> Result<Vec<u8>>;
}

// A FatEntry contains the file location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatEntry {
    pub start_address: u32,
    pub end_address: u32,
}

impl FatEntry {
    /// Unused slots have both addresses zero.
    pub fn is_unused(&self) -> bool {
        self.start_address == 0 && self.end_address == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileAllocationTable {
    pub entries: Vec<FatEntry>,
}

impl FileAllocationTable {
    pub fn read_from_rom(rom_data: &[u8], fat_offset: u32, fat_size: u32) -> Result<Self> {
        let num_entries = fat_size as usize / 8;
        let mut entries = Vec::with_capacity(num_entries);

        for i in 0..num_entries {
            let entry_offset = fat_offset as usize + i * 8;
            entries.push(FatEntry {
                start_address: u32_le_at(rom_data, entry_offset)?,
                end_address: u32_le_at(rom_data, entry_offset + 4)?,
            });
        }

        Ok(FileAllocationTable { entries })
    }

    pub fn get_file_data<'a>(&self, file_id: u16, rom_data: &'a [u8]) -> Option<&'a [u8]> {
        let entry = self.entries.get(file_id as usize)?;
        if entry.is_unused() {
            return None;
        }
        rom_data.get(entry.start_address as usize..entry.end_address as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct DirectoryEntry {
    pub offset: u32,
    pub first_file_id: u16,
    pub file_count: u32,
}

enum FntEntry {
    File(String),
    Directory(String, u16),
}

/// Base ID for directories in the NDS filesystem
/// Directories have IDs starting from 0xF000, with their index added to this base
const DIRECTORY_ID_BASE: u16 = 0xF000;
const MAX_DIRECTORIES: u16 = 0x1000;

#[derive(Default)]
pub struct FileNameTable {
    pub directories: Vec<DirectoryEntry>,
    pub file_names: HashMap<u16, String>,
    pub directory_names: HashMap<u16, String>,
    pub directory_structure: HashMap<u16, Vec<u16>>, // Parent ID -> child dir IDs
}

impl FileNameTable {
    pub fn read_from_rom(rom_data: &[u8], fnt_offset: u32) -> Result<Self> {
        let mut fnt = FileNameTable::default();
        fnt.read_main_directory_table(rom_data, fnt_offset as usize)?;
        fnt.parse_subtables(rom_data, fnt_offset as usize)?;
        Ok(fnt)
    }

    fn read_main_directory_table(&mut self, rom_data: &[u8], fnt_offset: usize) -> Result<()> {
        // The root entry stores the directory count where other entries store their parent
        let total_dirs = u16_le_at(rom_data, fnt_offset + 6)?;
        if total_dirs > MAX_DIRECTORIES {
            return Err(RomError::InvalidHeader(
                "file name table lists more than 4096 directories",
            ));
        }
        self.directories = Vec::with_capacity(total_dirs as usize);

        for i in 0..total_dirs as usize {
            let dir_offset = fnt_offset + i * 8;
            self.directories.push(DirectoryEntry {
                offset: u32_le_at(rom_data, dir_offset)?,
                first_file_id: u16_le_at(rom_data, dir_offset + 4)?,
                file_count: 0,
            });
        }

        Ok(())
    }

    fn parse_subtable(rom_data: &[u8], mut pos: usize) -> Result<Vec<FntEntry>> {
        let mut entries = Vec::new();
        let truncated = |offset| RomError::Truncated {
            offset,
            len: rom_data.len(),
        };

        loop {
            // Highest bit represents file or dir, lower 7 bits represent name length
            let type_and_length = *rom_data.get(pos).ok_or_else(|| truncated(pos))?;
            pos += 1;

            if type_and_length == 0 {
                break;
            }

            let length = (type_and_length & 0x7F) as usize;
            let name_bytes = rom_data
                .get(pos..pos + length)
                .ok_or_else(|| truncated(pos + length))?;
            let name = String::from_utf8_lossy(name_bytes).to_string();
            pos += length;

            if type_and_length & 0x80 == 0 {
                entries.push(FntEntry::File(name));
            } else {
                let dir_id = u16_le_at(rom_data, pos)?;
                pos += 2;
                entries.push(FntEntry::Directory(name, dir_id));
            }
        }

        Ok(entries)
    }

    fn parse_subtables(&mut self, rom_data: &[u8], fnt_offset: usize) -> Result<()> {
        let mut file_counts = Vec::with_capacity(self.directories.len());

        for (dir_index, dir_entry) in self.directories.iter().enumerate() {
            let dir_id = DIRECTORY_ID_BASE + dir_index as u16;
            let entries = Self::parse_subtable(rom_data, fnt_offset + dir_entry.offset as usize)?;

            // File IDs are sequential within a directory
            let first_file_id = u32::from(dir_entry.first_file_id);
            let mut file_id = first_file_id;
            for entry in entries {
                match entry {
                    FntEntry::File(name) => {
                        let id = u16::try_from(file_id).map_err(|_| {
                            RomError::InvalidHeader("file name table runs past file id 0xFFFF")
                        })?;
                        self.file_names.insert(id, name);
                        file_id += 1;
                    }
                    FntEntry::Directory(name, child_dir_id) => {
                        self.directory_names.insert(child_dir_id, name);
                        self.directory_structure
                            .entry(dir_id)
                            .or_default()
                            .push(child_dir_id);
                    }
                }
            }
            file_counts.push(file_id - first_file_id);
        }

        for (dir_entry, count) in self.directories.iter_mut().zip(file_counts) {
            dir_entry.file_count = count;
        }

        Ok(())
    }

    /// Get a file ID for a slash-separated path such as `BG_ncg/d_2d_A_J_jyotyu_ncg.bin`
    pub fn get_file_id(&self, path: &str) -> Option<u16> {
        let parts: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        let (file_name, dirs) = parts.split_last()?;

        let mut current_dir_id = DIRECTORY_ID_BASE;
        for dir_name in dirs {
            let children = self.directory_structure.get(&current_dir_id)?;
            current_dir_id = *children.iter().find(|child_id| {
                self.directory_names
                    .get(*child_id)
                    .is_some_and(|name| name == dir_name)
            })?;
        }

        let dir_entry = self
            .directories
            .get((current_dir_id & 0x0FFF) as usize)?;

        // Files of a directory occupy consecutive IDs starting at first_file_id
        let first = u32::from(dir_entry.first_file_id);
        (first..first.saturating_add(dir_entry.file_count))
            .filter_map(|id| u16::try_from(id).ok())
            .find(|id| {
                self.file_names
                    .get(id)
                    .is_some_and(|name| name == file_name)
            })
    }
}
