//! Streaming PNG decoder.
//!
//! Chunks are consumed strictly in order from any [`std::io::Read`]; every
//! chunk's CRC is checked before its payload is interpreted. Scanlines are
//! inflated and unfiltered one at a time into a pre-sized pixel buffer.

pub mod chunk;
pub mod decoder;
pub mod filter;
pub mod format;

use thiserror::Error;

pub use chunk::ChunkType;
pub use decoder::{decode, decode_from_slice, DecodeOptions, PngImage};
pub use format::{ColorType, PixelFormat};

#[derive(Debug, Error)]
pub enum PngError {
    #[error("not a png stream (bad signature)")]
    BadSignature,
    #[error("png stream truncated while reading {context}")]
    Truncated { context: &'static str },
    #[error("png chunk length {length} exceeds the format limit")]
    ChunkTooLarge { length: u32 },
    #[error("crc mismatch in {chunk} chunk: stored {expected:#010x}, computed {actual:#010x}")]
    CrcMismatch {
        chunk: ChunkType,
        expected: u32,
        actual: u32,
    },
    #[error("expected IHDR as the first chunk, found {found}")]
    MissingHeader { found: ChunkType },
    #[error("IHDR must be 13 bytes, got {length}")]
    BadHeaderLength { length: usize },
    #[error("duplicate IHDR chunk")]
    DuplicateHeader,
    #[error("unexpected critical chunk {chunk}")]
    UnexpectedChunk { chunk: ChunkType },
    #[error("IDAT chunks are not consecutive")]
    NonConsecutiveData,
    #[error("IEND reached without any IDAT chunk")]
    MissingData,
    #[error("indexed image has no PLTE chunk")]
    MissingPalette,
    #[error("invalid PLTE length {length}")]
    InvalidPalette { length: usize },
    #[error("palette index {index} out of range ({len} entries)")]
    PaletteIndex { index: u8, len: usize },
    #[error("invalid image dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("decoded image needs {needed} bytes, limit is {limit}")]
    ImageTooLarge { needed: usize, limit: usize },
    #[error("unsupported color type {color_type} with bit depth {bit_depth}")]
    UnsupportedFormat { color_type: u8, bit_depth: u8 },
    #[error("unsupported compression method {0}")]
    UnsupportedCompression(u8),
    #[error("unsupported filter method {0}")]
    UnsupportedFilterMethod(u8),
    #[error("interlaced images are not supported (interlace method {0})")]
    Interlaced(u8),
    #[error("invalid filter type {filter} on row {row}")]
    BadFilterType { row: u32, filter: u8 },
    #[error("zlib inflate failed: {0}")]
    Inflate(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
