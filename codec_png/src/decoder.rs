use std::io::{self, Read};

use flate2::read::ZlibDecoder;
use log::{debug, trace};

use crate::chunk::{self, Chunk, ChunkType};
use crate::filter::{self, FilterType};
use crate::format::{ColorType, Header, PixelFormat};
use crate::PngError;

pub const DEFAULT_MAX_DECODED_BYTES: usize = 1 << 30;

#[derive(Clone, Copy, Debug)]
pub struct DecodeOptions {
    /// Store the last scanline first.
    pub flip_vertically: bool,
    /// Upper bound on the decoded pixel buffer, checked before allocation.
    pub max_decoded_bytes: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            flip_vertically: false,
            max_decoded_bytes: DEFAULT_MAX_DECODED_BYTES,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PngImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pixels: Vec<u8>,
}

impl PngImage {
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Pixel bytes of scanline `y`, or `None` past the last row.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let stride = self.stride();
        let start = (y as usize).checked_mul(stride)?;
        self.pixels.get(start..start.checked_add(stride)?)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    AwaitHeader,
    BeforeData,
    InData,
    AfterData,
}

struct Decoder {
    options: DecodeOptions,
    state: State,
    header: Option<Header>,
    palette: Option<Vec<[u8; 3]>>,
    compressed: Vec<u8>,
}

pub fn decode<R: Read>(mut reader: R, options: DecodeOptions) -> Result<PngImage, PngError> {
    chunk::read_signature(&mut reader)?;
    let mut decoder = Decoder::new(options);
    loop {
        let chunk = chunk::read_chunk(&mut reader)?;
        if let Some(image) = decoder.feed(chunk)? {
            return Ok(image);
        }
    }
}

pub fn decode_from_slice(bytes: &[u8], options: DecodeOptions) -> Result<PngImage, PngError> {
    decode(bytes, options)
}

impl Decoder {
    fn new(options: DecodeOptions) -> Self {
        Self {
            options,
            state: State::AwaitHeader,
            header: None,
            palette: None,
            compressed: Vec::new(),
        }
    }

    fn feed(&mut self, chunk: Chunk) -> Result<Option<PngImage>, PngError> {
        match (self.state, chunk.kind) {
            (State::AwaitHeader, ChunkType::IHDR) => {
                let header = Header::parse(&chunk.data)?;
                debug!(
                    "png header {}x{} {} (color type {}, depth {})",
                    header.width,
                    header.height,
                    header.format.label(),
                    header.color_type.code(),
                    header.bit_depth
                );
                self.header = Some(header);
                self.state = State::BeforeData;
            }
            (State::AwaitHeader, found) => return Err(PngError::MissingHeader { found }),
            (_, ChunkType::IHDR) => return Err(PngError::DuplicateHeader),
            (State::BeforeData, ChunkType::PLTE)
                if matches!(
                    self.color_type(),
                    Some(ColorType::Grayscale | ColorType::GrayscaleAlpha)
                ) =>
            {
                return Err(PngError::UnexpectedChunk { chunk: ChunkType::PLTE });
            }
            (State::BeforeData, ChunkType::PLTE) if self.palette.is_none() => {
                self.palette = Some(parse_palette(&chunk.data)?);
            }
            (State::BeforeData | State::InData, ChunkType::IDAT) => {
                if self.color_type() == Some(ColorType::Indexed) && self.palette.is_none() {
                    return Err(PngError::MissingPalette);
                }
                self.compressed.extend_from_slice(&chunk.data);
                self.state = State::InData;
            }
            (State::AfterData, ChunkType::IDAT) => return Err(PngError::NonConsecutiveData),
            (State::BeforeData, ChunkType::IEND) => return Err(PngError::MissingData),
            (State::InData | State::AfterData, ChunkType::IEND) => {
                return self.finish().map(Some);
            }
            (state, kind) if kind.is_ancillary() => {
                trace!("skipping ancillary chunk {} ({} bytes)", kind, chunk.data.len());
                if state == State::InData {
                    self.state = State::AfterData;
                }
            }
            (_, kind) => return Err(PngError::UnexpectedChunk { chunk: kind }),
        }
        Ok(None)
    }

    fn color_type(&self) -> Option<ColorType> {
        self.header.map(|header| header.color_type)
    }

    fn finish(&mut self) -> Result<PngImage, PngError> {
        let header = self.header.ok_or(PngError::MissingHeader {
            found: ChunkType::IEND,
        })?;
        let too_large = || PngError::InvalidDimensions {
            width: header.width,
            height: header.height,
        };
        let height = header.height as usize;
        let bpp = header.filter_bpp();
        let line_len = header.scanline_len().ok_or_else(too_large)?;
        let out_stride = (header.width as usize)
            .checked_mul(header.format.bytes_per_pixel())
            .ok_or_else(too_large)?;
        let total = out_stride.checked_mul(height).ok_or_else(too_large)?;
        if total > self.options.max_decoded_bytes {
            return Err(PngError::ImageTooLarge {
                needed: total,
                limit: self.options.max_decoded_bytes,
            });
        }

        let compressed = std::mem::take(&mut self.compressed);
        let mut inflater = ZlibDecoder::new(compressed.as_slice());
        let mut pixels = vec![0u8; total];
        let mut previous = vec![0u8; line_len];
        let mut current = vec![0u8; line_len];
        let mut filter_byte = [0u8; 1];

        for row in 0..header.height {
            read_scanline(&mut inflater, &mut filter_byte)?;
            read_scanline(&mut inflater, &mut current)?;
            let filter = FilterType::from_byte(filter_byte[0]).ok_or(PngError::BadFilterType {
                row,
                filter: filter_byte[0],
            })?;
            filter::unfilter(filter, bpp, &previous, &mut current);

            let dest_row = if self.options.flip_vertically {
                height - 1 - row as usize
            } else {
                row as usize
            };
            let dest = &mut pixels[dest_row * out_stride..(dest_row + 1) * out_stride];
            match &self.palette {
                Some(palette) if header.color_type == ColorType::Indexed => {
                    expand_palette(palette, &current, dest)?;
                }
                _ => dest.copy_from_slice(&current),
            }
            std::mem::swap(&mut previous, &mut current);
        }

        Ok(PngImage {
            width: header.width,
            height: header.height,
            format: header.format,
            pixels,
        })
    }
}

fn parse_palette(data: &[u8]) -> Result<Vec<[u8; 3]>, PngError> {
    if data.is_empty() || data.len() % 3 != 0 || data.len() > 256 * 3 {
        return Err(PngError::InvalidPalette { length: data.len() });
    }
    Ok(data
        .chunks_exact(3)
        .map(|entry| [entry[0], entry[1], entry[2]])
        .collect())
}

fn expand_palette(palette: &[[u8; 3]], indices: &[u8], dest: &mut [u8]) -> Result<(), PngError> {
    for (pixel, &index) in dest.chunks_exact_mut(3).zip(indices) {
        let entry = palette.get(usize::from(index)).ok_or(PngError::PaletteIndex {
            index,
            len: palette.len(),
        })?;
        pixel.copy_from_slice(entry);
    }
    Ok(())
}

fn read_scanline<R: Read>(inflater: &mut R, buf: &mut [u8]) -> Result<(), PngError> {
    inflater.read_exact(buf).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => PngError::Truncated {
            context: "image data",
        },
        _ => PngError::Inflate(err.to_string()),
    })
}
