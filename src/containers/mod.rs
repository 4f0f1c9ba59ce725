pub mod compression;

use serde::Serialize;

use crate::error::{Result, RomError};
use compression::{lz77, overlay_lz, yaz0};

pub trait ContainerHandler {
    fn magic_word() -> &'static [u8];
    fn matches(data: &[u8]) -> bool {
        data.starts_with(Self::magic_word())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompressionFormat {
    /// LZ77 type 0x10, with or without the "LZ77" tag
    Lz77 { tagged: bool },
    Yaz0,
    /// Back-to-front overlay compression (decompress only)
    Overlay,
}

/// Guesses the format of an asset file from its first bytes. Overlay
/// compression has no leading marker and is never detected. Stored LZ77
/// (type 0x00) is only recognised when the file size matches its header.
pub fn detect_format(data: &[u8]) -> Option<CompressionFormat> {
    if yaz0::Yaz0::matches(data) {
        Some(CompressionFormat::Yaz0)
    } else if lz77::TaggedLz77::matches(data) {
        Some(CompressionFormat::Lz77 { tagged: true })
    } else if data.first() == Some(&lz77::LZ77_TYPE) || lz77::is_stored(data) {
        Some(CompressionFormat::Lz77 { tagged: false })
    } else {
        None
    }
}

impl CompressionFormat {
    pub fn decompress(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Lz77 { tagged } => lz77::decompress(data, tagged),
            Self::Yaz0 => yaz0::decompress(data),
            Self::Overlay => overlay_lz::decompress(data),
        }
    }

    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Lz77 { tagged } => lz77::compress(data, tagged),
            Self::Yaz0 => yaz0::compress(data),
            Self::Overlay => Err(RomError::NotCompressible("overlay")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_formats_by_leading_bytes() {
        let yaz = yaz0::compress(b"graphics").unwrap();
        assert_eq!(detect_format(&yaz), Some(CompressionFormat::Yaz0));

        let tagged = lz77::compress(b"graphics", true).unwrap();
        assert_eq!(
            detect_format(&tagged),
            Some(CompressionFormat::Lz77 { tagged: true })
        );

        let plain = lz77::compress(b"graphics", false).unwrap();
        let format = detect_format(&plain).unwrap();
        assert_eq!(format, CompressionFormat::Lz77 { tagged: false });
        assert_eq!(format.decompress(&plain).unwrap(), b"graphics");

        assert_eq!(detect_format(b"NCGR"), None);
        assert_eq!(detect_format(&[]), None);
    }

    #[test]
    fn detects_stored_lz77() {
        let stored = lz77::fast_compress(b"tileset graphics").unwrap();
        let format = detect_format(&stored).unwrap();
        assert_eq!(format, CompressionFormat::Lz77 { tagged: false });
        assert_eq!(format.decompress(&stored).unwrap(), b"tileset graphics");

        assert_eq!(detect_format(b"\0abcdefgh"), None);
    }

    #[test]
    fn overlay_format_cannot_compress() {
        assert!(matches!(
            CompressionFormat::Overlay.compress(b"code"),
            Err(RomError::NotCompressible(_))
        ));
    }
}
