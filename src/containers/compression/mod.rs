pub mod lz77;
pub mod overlay_lz;
pub mod yaz0;
