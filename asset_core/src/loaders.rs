use std::io::Read;
use std::sync::Arc;

use codec_png::DecodeOptions;

use crate::asset::{Blob, Texture};
use crate::asset_id::AssetKey;
use crate::error::AssetError;
use crate::loader::{LoadOutcome, Loader};

/// Decodes PNG files into [`Texture`] assets.
#[derive(Clone, Copy, Debug, Default)]
pub struct PngLoader {
    options: DecodeOptions,
}

impl PngLoader {
    pub fn new(options: DecodeOptions) -> Self {
        Self { options }
    }

    pub fn flipped() -> Self {
        Self::new(DecodeOptions {
            flip_vertically: true,
            ..DecodeOptions::default()
        })
    }
}

impl Loader for PngLoader {
    fn name(&self) -> &str {
        "png"
    }

    fn decode(&self, key: &AssetKey, stream: &mut dyn Read) -> LoadOutcome {
        let image = codec_png::decode(stream, self.options)
            .map_err(|err| AssetError::initialization(key, err.to_string()))?;
        Ok(Arc::new(Texture {
            key: key.clone(),
            width: image.width,
            height: image.height,
            format: image.format,
            pixels: Arc::new(image.pixels),
        }))
    }
}

/// Reads the whole stream into a [`Blob`].
#[derive(Clone, Copy, Debug, Default)]
pub struct BytesLoader;

impl Loader for BytesLoader {
    fn name(&self) -> &str {
        "bytes"
    }

    fn decode(&self, key: &AssetKey, stream: &mut dyn Read) -> LoadOutcome {
        let mut bytes = Vec::new();
        stream
            .read_to_end(&mut bytes)
            .map_err(|err| AssetError::initialization(key, format!("read failed: {}", err)))?;
        Ok(Arc::new(Blob {
            key: key.clone(),
            bytes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use codec_png::PixelFormat;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    use super::*;
    use crate::asset::downcast;
    use crate::asset_id::AssetIds;
    use crate::error::AssetErrorKind;

    fn chunk(kind: &[u8; 4], data: &[u8]) -> Vec<u8> {
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

    fn gray_png(width: u32, rows: &[&[u8]]) -> Vec<u8> {
        let mut header = Vec::new();
        header.extend_from_slice(&width.to_be_bytes());
        header.extend_from_slice(&(rows.len() as u32).to_be_bytes());
        header.extend_from_slice(&[8, 0, 0, 0, 0]);
        let mut raw = Vec::new();
        for row in rows {
            raw.push(0);
            raw.extend_from_slice(row);
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        let mut out = codec_png::chunk::SIGNATURE.to_vec();
        out.extend(chunk(b"IHDR", &header));
        out.extend(chunk(b"IDAT", &encoder.finish().unwrap()));
        out.extend(chunk(b"IEND", &[]));
        out
    }

    #[test]
    fn png_loader_produces_texture() {
        let ids = AssetIds::new();
        let key = ids.key("tex/gray.png").unwrap();
        let bytes = gray_png(2, &[&[1, 2], &[3, 4]]);
        let asset = PngLoader::default()
            .decode(&key, &mut Cursor::new(bytes.clone()))
            .unwrap();
        assert_eq!(asset.decoded_size(), 4);
        let texture = downcast::<Texture>(asset).unwrap();
        assert_eq!((texture.width, texture.height), (2, 2));
        assert_eq!(texture.format, PixelFormat::Gray8);
        assert_eq!(*texture.pixels, vec![1, 2, 3, 4]);

        let flipped = PngLoader::flipped()
            .decode(&key, &mut Cursor::new(bytes))
            .unwrap();
        let flipped = downcast::<Texture>(flipped).unwrap();
        assert_eq!(*flipped.pixels, vec![3, 4, 1, 2]);
    }

    #[test]
    fn png_errors_become_initialization_failures() {
        let ids = AssetIds::new();
        let key = ids.key("tex/broken.png").unwrap();
        let err = PngLoader::default()
            .decode(&key, &mut Cursor::new(b"not a png".to_vec()))
            .err()
            .unwrap();
        assert_eq!(err.kind(), AssetErrorKind::Initialization);
        assert!(err.to_string().contains("signature"));
    }

    #[test]
    fn bytes_loader_reads_everything() {
        let ids = AssetIds::new();
        let key = ids.key("cfg/game.toml").unwrap();
        let asset = BytesLoader
            .decode(&key, &mut Cursor::new(b"speed = 3".to_vec()))
            .unwrap();
        let blob = downcast::<Blob>(asset).unwrap();
        assert_eq!(blob.bytes, b"speed = 3");
    }
}
