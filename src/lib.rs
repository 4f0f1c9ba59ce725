pub mod binary_utils;
pub mod checksum;
pub mod containers;
pub mod data;
pub mod error;
pub mod filesystem;
pub mod overlay;
pub mod rom;
pub mod session;

pub use error::{Result, RomError};
pub use filesystem::{FileRef, FileSystem};
pub use rom::NitroRom;
pub use session::RomSession;
