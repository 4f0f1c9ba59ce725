use std::hash::Hasher;

use tracing::{debug, info, warn};
use twox_hash::XxHash64;

use crate::binary_utils::{self, bytes_at, u16_le_at, u32_le_at};
use crate::containers::compression::overlay_lz;
use crate::data::region::{self, DataKind, RegionInfo, SPRITE_DATA_SIZE};
use crate::error::{Result, RomError};
use crate::filesystem::{FileRef, FileSystem};
use crate::overlay::{set_compressed_flag, OverlayTable};
use crate::rom::{ARM9_RAM_ADDRESS_OFFSET, GAME_CODE_OFFSET};

const ARM9_OVERLAY_TABLE: &str = "arm9ovt.bin";
const ARM7_OVERLAY_TABLE: &str = "arm7ovt.bin";

/// Decompressed overlay 0, the address space of every table lookup.
struct ResidentImage {
    data: Vec<u8>,
    file_id: u16,
    fingerprint: u64,
}

fn fingerprint(data: &[u8]) -> u64 {
    let mut hasher = XxHash64::default();
    hasher.write(data);
    hasher.finish()
}

/// Runs one complete edit transaction that replaces `file` with `data`.
fn write_file<F: FileSystem>(fs: &mut F, file: FileRef<'_>, data: Vec<u8>) -> Result<()> {
    fs.begin_edit(file)?;
    let staged = fs.replace(file, data);
    let ended = fs.end_edit(file);
    staged.and(ended)
}

/// All state for one loaded ROM.
pub struct RomSession<F: FileSystem> {
    fs: F,
    region: RegionInfo,
    arm9_ram_address: u32,
    arm9_overlays: OverlayTable,
    arm7_overlays: OverlayTable,
    overlay0: Option<ResidentImage>,
}

impl<F: FileSystem> RomSession<F> {
    /// Reads the header, both overlay tables and, for New Super Mario Bros.
    /// ROMs, overlay 0.
    pub fn load(fs: F) -> Result<Self> {
        let ram_bytes = fs
            .read_header_field(ARM9_RAM_ADDRESS_OFFSET, 4)
            .map_err(|e| e.in_file("header.bin"))?;
        let arm9_ram_address = u32_le_at(&ram_bytes, 0)?;
        let code_bytes = fs
            .read_header_field(GAME_CODE_OFFSET, 4)
            .map_err(|e| e.in_file("header.bin"))?;
        let game_code = String::from_utf8_lossy(&code_bytes).to_string();

        let region = RegionInfo::from_game_code(&game_code);
        if region.is_native {
            info!("Loading {} ROM ({})", region.region, game_code);
        } else {
            warn!(
                "Game code {} is not New Super Mario Bros.; using {} offsets",
                game_code,
                region.region
            );
        }

        let arm9_overlays = Self::load_overlay_table(&fs, ARM9_OVERLAY_TABLE)?;
        let arm7_overlays = Self::load_overlay_table(&fs, ARM7_OVERLAY_TABLE)?;

        let overlay0 = if region.is_native && !arm9_overlays.is_empty() {
            match arm9_overlays.get(0) {
                Some(descriptor) => {
                    let file = FileRef::Id(descriptor.file_id);
                    let raw = fs
                        .read_file(file)
                        .map_err(|e| e.in_file(file.to_string()))?;
                    let data = if descriptor.is_compressed() {
                        overlay_lz::decompress(&raw).map_err(|e| e.in_file(file.to_string()))?
                    } else {
                        raw
                    };
                    info!(
                        "Overlay 0: {} bytes from {}{}",
                        data.len(),
                        file,
                        if descriptor.is_compressed() { " (compressed)" } else { "" }
                    );
                    Some(ResidentImage {
                        fingerprint: fingerprint(&data),
                        data,
                        file_id: descriptor.file_id,
                    })
                }
                None => {
                    warn!("ARM9 overlay table has no overlay 0");
                    None
                }
            }
        } else {
            None
        };

        Ok(RomSession {
            fs,
            region,
            arm9_ram_address,
            arm9_overlays,
            arm7_overlays,
            overlay0,
        })
    }

    fn load_overlay_table(fs: &F, name: &str) -> Result<OverlayTable> {
        let table = fs
            .read_file(FileRef::Name(name))
            .and_then(|data| OverlayTable::parse(&data))
            .map_err(|e| e.in_file(name))?;
        debug!("{}: {} overlays", name, table.len());
        Ok(table)
    }

    pub fn region(&self) -> &RegionInfo {
        &self.region
    }

    pub fn arm9_ram_address(&self) -> u32 {
        self.arm9_ram_address
    }

    pub fn arm9_overlays(&self) -> &OverlayTable {
        &self.arm9_overlays
    }

    pub fn arm7_overlays(&self) -> &OverlayTable {
        &self.arm7_overlays
    }

    pub fn resident_image(&self) -> Option<&[u8]> {
        self.overlay0.as_ref().map(|image| image.data.as_slice())
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    pub fn into_inner(self) -> F {
        self.fs
    }

    /// Offset of `kind` in the resident image for this ROM's region.
    pub fn offset(&self, kind: DataKind) -> Result<u32> {
        region::offset(kind, self.region.region)
    }

    fn image(&self) -> Result<&[u8]> {
        self.resident_image().ok_or(RomError::NoResidentImage)
    }

    fn image_bytes(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let image = self.image()?;
        bytes_at(image, offset, len).map_err(|_| RomError::OffsetOutOfRange {
            offset: offset.saturating_add(len),
            len: image.len(),
        })
    }

    fn image_u16(&self, offset: usize) -> Result<u16> {
        let bytes = self.image_bytes(offset, 2)?;
        u16_le_at(bytes, 0)
    }

    fn file_id_bias(&self) -> Result<u16> {
        Ok(self.offset(DataKind::FileOffset)? as u16)
    }

    fn table_entry(&self, kind: DataKind, index: usize, stride: usize) -> Result<usize> {
        let base = self.offset(kind)? as usize;
        index
            .checked_mul(stride)
            .and_then(|delta| delta.checked_add(base))
            .ok_or(RomError::OffsetOutOfRange {
                offset: usize::MAX,
                len: self.image()?.len(),
            })
    }

    /// File id stored at entry `index` of a 4-byte-stride file table.
    pub fn file_id_from_table(&self, index: usize, kind: DataKind) -> Result<u16> {
        let pos = self.table_entry(kind, index, 4)?;
        Ok(self.image_u16(pos)?.wrapping_add(self.file_id_bias()?))
    }

    /// Stores `file_id` at entry `index`; the change stays in memory until saved.
    pub fn set_file_id_in_table(&mut self, index: usize, kind: DataKind, file_id: u16) -> Result<()> {
        let pos = self.table_entry(kind, index, 4)?;
        let stored = file_id.wrapping_sub(self.file_id_bias()?);
        // checks the range before borrowing the image mutably
        self.image_bytes(pos, 2)?;

        let image = self.overlay0.as_mut().ok_or(RomError::NoResidentImage)?;
        binary_utils::write_u16_le(&mut image.data, stored, pos)?;
        debug!("{} entry {} -> file {}", kind.name(), index, file_id);
        Ok(())
    }

    /// Sprite class id of sprite `index`.
    pub fn class_id_from_table(&self, index: usize) -> Result<u16> {
        let pos = self.table_entry(DataKind::SpriteClassIds, index, 2)?;
        self.image_u16(pos)
    }

    /// The 20-byte settings record of sprite `index`.
    pub fn sprite_data(&self, index: usize) -> Result<Vec<u8>> {
        let pos = self.table_entry(DataKind::SpriteData, index, SPRITE_DATA_SIZE)?;
        Ok(self.image_bytes(pos, SPRITE_DATA_SIZE)?.to_vec())
    }

    /// A file embedded in overlay 0, such as the jyotyu behaviors.
    pub fn inline_file(&self, kind: DataKind) -> Result<Vec<u8>> {
        let pos = self.offset(kind)? as usize;
        Ok(self.image_bytes(pos, kind.inline_size())?.to_vec())
    }

    /// Copies `data` over the inline file of `kind` and saves overlay 0.
    /// Bytes past the inline file's size are ignored.
    pub fn replace_inline_file(&mut self, kind: DataKind, data: &[u8]) -> Result<()> {
        let pos = self.offset(kind)? as usize;
        let size = kind.inline_size();
        let replacement = bytes_at(data, 0, size)?;
        self.image_bytes(pos, size)?;

        let image = self.overlay0.as_mut().ok_or(RomError::NoResidentImage)?;
        image.data[pos..pos + size].copy_from_slice(replacement);
        self.save_overlay0()
    }

    /// Whether the resident image differs from what was last loaded or saved.
    pub fn is_modified(&self) -> bool {
        self.overlay0
            .as_ref()
            .is_some_and(|image| fingerprint(&image.data) != image.fingerprint)
    }

    /// Writes the resident image back to overlay 0's file. A still
    /// compressed file is first expanded and its table flag cleared, so the
    /// stored overlay ends up uncompressed.
    pub fn save_overlay0(&mut self) -> Result<()> {
        let image = self.overlay0.as_ref().ok_or(RomError::NoResidentImage)?;
        let file = FileRef::Id(image.file_id);
        let descriptor = self
            .arm9_overlays
            .get_by_file(image.file_id)
            .cloned()
            .ok_or(RomError::FileNotFound(file.to_string()))?;

        if descriptor.is_compressed() {
            let raw = self
                .fs
                .read_file(file)
                .map_err(|e| e.in_file(file.to_string()))?;
            let expanded =
                overlay_lz::decompress(&raw).map_err(|e| e.in_file(file.to_string()))?;
            write_file(&mut self.fs, file, expanded).map_err(|e| e.in_file(file.to_string()))?;

            let table_file = FileRef::Name(ARM9_OVERLAY_TABLE);
            let mut table = self
                .fs
                .read_file(table_file)
                .map_err(|e| e.in_file(ARM9_OVERLAY_TABLE))?;
            set_compressed_flag(&mut table, &descriptor, false)
                .map_err(|e| e.in_file(ARM9_OVERLAY_TABLE))?;
            let updated = OverlayTable::parse(&table).map_err(|e| e.in_file(ARM9_OVERLAY_TABLE))?;
            write_file(&mut self.fs, table_file, table)
                .map_err(|e| e.in_file(ARM9_OVERLAY_TABLE))?;
            self.arm9_overlays = updated;
            debug!("Cleared compressed flag of overlay {}", descriptor.overlay_id);
        }

        let image = self.overlay0.as_mut().ok_or(RomError::NoResidentImage)?;
        write_file(&mut self.fs, file, image.data.clone())
            .map_err(|e| e.in_file(file.to_string()))?;
        image.fingerprint = fingerprint(&image.data);
        info!("Saved overlay 0 ({} bytes) to {}", image.data.len(), file);
        Ok(())
    }
}
