use std::io;

use thiserror::Error;

use crate::data::region::{DataKind, Region};

pub type Result<T> = std::result::Result<T, RomError>;

#[derive(Debug, Error)]
pub enum RomError {
    #[error("overlay id {id} out of range for a table of {len} records")]
    OverlayIdOutOfRange { id: u32, len: usize },

    #[error("overlay file id {id} out of range for a table of {len} records")]
    FileIdOutOfRange { id: u16, len: usize },

    #[error("data truncated: access at offset 0x{offset:X} in a buffer of 0x{len:X} bytes")]
    Truncated { offset: usize, len: usize },

    #[error("back-reference of distance {distance} at output position {position} points before the start of the data")]
    InvalidBackReference { position: usize, distance: usize },

    #[error("invalid magic number (expected '{expected}')")]
    BadMagic { expected: &'static str },

    #[error("compression type 0x{0:02X} is not supported (expected 0x10)")]
    UnsupportedCompressionType(u8),

    #[error("input of {len} bytes exceeds the format limit of {max} bytes")]
    InputTooLarge { len: usize, max: usize },

    #[error("{0}: unrecognised compression format")]
    UnknownFormat(String),

    #[error("{0} data can only be decompressed")]
    NotCompressible(&'static str),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("an edit of {0} is already in progress")]
    EditInProgress(String),

    #[error("no edit of {0} is in progress")]
    NoEditInProgress(String),

    #[error("offset 0x{offset:X} is outside the overlay 0 image (0x{len:X} bytes)")]
    OffsetOutOfRange { offset: usize, len: usize },

    #[error("overlay 0 is not loaded for this ROM")]
    NoResidentImage,

    #[error("{kind:?} has no offset for region {region:?}")]
    UndefinedOffset { kind: DataKind, region: Region },

    #[error("invalid ROM header: {0}")]
    InvalidHeader(&'static str),

    #[error("{file}: {source}")]
    InFile {
        file: String,
        #[source]
        source: Box<RomError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RomError {
    /// Attaches the name of the file being processed.
    pub fn in_file(self, file: impl Into<String>) -> Self {
        RomError::InFile {
            file: file.into(),
            source: Box::new(self),
        }
    }
}
