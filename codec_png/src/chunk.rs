use std::fmt;
use std::io::{self, Read};

use crate::PngError;

pub const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

pub const MAX_CHUNK_LEN: u32 = 0x7FFF_FFFF;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkType(pub [u8; 4]);

impl ChunkType {
    pub const IHDR: ChunkType = ChunkType(*b"IHDR");
    pub const PLTE: ChunkType = ChunkType(*b"PLTE");
    pub const IDAT: ChunkType = ChunkType(*b"IDAT");
    pub const IEND: ChunkType = ChunkType(*b"IEND");

    /// Bit 5 of the first byte (lowercase letter) marks a chunk decoders may skip.
    pub fn is_ancillary(self) -> bool {
        self.0[0] & 0x20 != 0
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &byte in &self.0 {
            let ch = if byte.is_ascii_graphic() { byte as char } else { '?' };
            write!(f, "{}", ch)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkType({})", self)
    }
}

#[derive(Debug)]
pub struct Chunk {
    pub kind: ChunkType,
    pub data: Vec<u8>,
}

pub fn read_signature<R: Read>(reader: &mut R) -> Result<(), PngError> {
    let mut signature = [0u8; 8];
    read_exact(reader, &mut signature, "signature")?;
    if signature != SIGNATURE {
        return Err(PngError::BadSignature);
    }
    Ok(())
}

/// Reads one chunk and verifies its CRC over type and payload.
pub fn read_chunk<R: Read>(reader: &mut R) -> Result<Chunk, PngError> {
    let mut header = [0u8; 8];
    read_exact(reader, &mut header, "chunk header")?;
    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    if length > MAX_CHUNK_LEN {
        return Err(PngError::ChunkTooLarge { length });
    }
    let kind = ChunkType([header[4], header[5], header[6], header[7]]);

    // The length is untrusted; grow the buffer only as bytes actually arrive.
    let mut data = Vec::new();
    (&mut *reader)
        .take(u64::from(length))
        .read_to_end(&mut data)?;
    if data.len() != length as usize {
        return Err(PngError::Truncated {
            context: "chunk data",
        });
    }

    let mut stored = [0u8; 4];
    read_exact(reader, &mut stored, "chunk crc")?;
    let expected = u32::from_be_bytes(stored);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&kind.0);
    hasher.update(&data);
    let actual = hasher.finalize();
    if actual != expected {
        return Err(PngError::CrcMismatch {
            chunk: kind,
            expected,
            actual,
        });
    }

    Ok(Chunk { kind, data })
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], context: &'static str) -> Result<(), PngError> {
    reader.read_exact(buf).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            PngError::Truncated { context }
        } else {
            PngError::Io(err)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(kind: &[u8; 4], data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(data);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(kind);
        hasher.update(data);
        out.extend_from_slice(&hasher.finalize().to_be_bytes());
        out
    }

    #[test]
    fn reads_chunk_with_valid_crc() {
        let bytes = encode(b"tEXt", b"Comment\0hello");
        let chunk = read_chunk(&mut bytes.as_slice()).unwrap();
        assert_eq!(chunk.kind, ChunkType(*b"tEXt"));
        assert!(chunk.kind.is_ancillary());
        assert_eq!(chunk.data, b"Comment\0hello");
    }

    #[test]
    fn rejects_flipped_crc_bit() {
        let mut bytes = encode(b"IEND", &[]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let err = read_chunk(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, PngError::CrcMismatch { chunk, .. } if chunk == ChunkType::IEND));
    }

    #[test]
    fn rejects_short_payload() {
        let mut bytes = encode(b"IDAT", &[1, 2, 3, 4]);
        bytes.truncate(10);
        let err = read_chunk(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, PngError::Truncated { context: "chunk data" }));
    }

    #[test]
    fn rejects_oversized_length() {
        let mut bytes = vec![0xFF, 0xFF, 0xFF, 0xFF];
        bytes.extend_from_slice(b"IDAT");
        let err = read_chunk(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, PngError::ChunkTooLarge { .. }));
    }

    #[test]
    fn signature_mismatch_is_reported() {
        let bytes = *b"GIF89a\0\0";
        let err = read_signature(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, PngError::BadSignature));
        assert!(read_signature(&mut SIGNATURE.as_slice()).is_ok());
    }

    #[test]
    fn critical_and_ancillary_bits() {
        assert!(!ChunkType::IHDR.is_ancillary());
        assert!(!ChunkType::IDAT.is_ancillary());
        assert!(ChunkType(*b"gAMA").is_ancillary());
        assert_eq!(ChunkType(*b"PLTE").to_string(), "PLTE");
    }
}
