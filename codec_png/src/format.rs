use crate::PngError;

const MAX_DIMENSION: u32 = 0x7FFF_FFFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorType {
    Grayscale,
    Rgb,
    Indexed,
    GrayscaleAlpha,
    Rgba,
}

impl ColorType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ColorType::Grayscale),
            2 => Some(ColorType::Rgb),
            3 => Some(ColorType::Indexed),
            4 => Some(ColorType::GrayscaleAlpha),
            6 => Some(ColorType::Rgba),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            ColorType::Grayscale => 0,
            ColorType::Rgb => 2,
            ColorType::Indexed => 3,
            ColorType::GrayscaleAlpha => 4,
            ColorType::Rgba => 6,
        }
    }

    /// Samples per pixel as stored in the filtered stream.
    pub fn samples(self) -> usize {
        match self {
            ColorType::Grayscale | ColorType::Indexed => 1,
            ColorType::GrayscaleAlpha => 2,
            ColorType::Rgb => 3,
            ColorType::Rgba => 4,
        }
    }
}

/// Layout of the decoded pixel buffer. 16-bit samples stay big-endian.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Gray8,
    Gray16,
    GrayAlpha8,
    GrayAlpha16,
    Rgb8,
    Rgb16,
    Rgba8,
    Rgba16,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray8 | PixelFormat::Gray16 => 1,
            PixelFormat::GrayAlpha8 | PixelFormat::GrayAlpha16 => 2,
            PixelFormat::Rgb8 | PixelFormat::Rgb16 => 3,
            PixelFormat::Rgba8 | PixelFormat::Rgba16 => 4,
        }
    }

    pub fn bytes_per_channel(self) -> usize {
        match self {
            PixelFormat::Gray8 | PixelFormat::GrayAlpha8 | PixelFormat::Rgb8 | PixelFormat::Rgba8 => 1,
            _ => 2,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        self.channels() * self.bytes_per_channel()
    }

    pub fn label(self) -> &'static str {
        match self {
            PixelFormat::Gray8 => "gray8",
            PixelFormat::Gray16 => "gray16",
            PixelFormat::GrayAlpha8 => "gray-alpha8",
            PixelFormat::GrayAlpha16 => "gray-alpha16",
            PixelFormat::Rgb8 => "rgb8",
            PixelFormat::Rgb16 => "rgb16",
            PixelFormat::Rgba8 => "rgba8",
            PixelFormat::Rgba16 => "rgba16",
        }
    }
}

const FORMAT_TABLE: [(ColorType, u8, PixelFormat); 9] = [
    (ColorType::Grayscale, 8, PixelFormat::Gray8),
    (ColorType::Grayscale, 16, PixelFormat::Gray16),
    (ColorType::GrayscaleAlpha, 8, PixelFormat::GrayAlpha8),
    (ColorType::GrayscaleAlpha, 16, PixelFormat::GrayAlpha16),
    (ColorType::Indexed, 8, PixelFormat::Rgb8),
    (ColorType::Rgb, 8, PixelFormat::Rgb8),
    (ColorType::Rgb, 16, PixelFormat::Rgb16),
    (ColorType::Rgba, 8, PixelFormat::Rgba8),
    (ColorType::Rgba, 16, PixelFormat::Rgba16),
];

pub fn resolve_format(color_type: ColorType, bit_depth: u8) -> Option<PixelFormat> {
    FORMAT_TABLE
        .iter()
        .find(|(ty, depth, _)| *ty == color_type && *depth == bit_depth)
        .map(|(_, _, format)| *format)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: ColorType,
    pub format: PixelFormat,
}

impl Header {
    pub fn parse(data: &[u8]) -> Result<Self, PngError> {
        if data.len() != 13 {
            return Err(PngError::BadHeaderLength { length: data.len() });
        }
        let width = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let height = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(PngError::InvalidDimensions { width, height });
        }

        let bit_depth = data[8];
        let color_code = data[9];
        let unsupported = move || PngError::UnsupportedFormat {
            color_type: color_code,
            bit_depth,
        };
        let color_type = ColorType::from_code(color_code).ok_or_else(unsupported)?;
        let format = resolve_format(color_type, bit_depth).ok_or_else(unsupported)?;

        if data[10] != 0 {
            return Err(PngError::UnsupportedCompression(data[10]));
        }
        if data[11] != 0 {
            return Err(PngError::UnsupportedFilterMethod(data[11]));
        }
        if data[12] != 0 {
            return Err(PngError::Interlaced(data[12]));
        }

        Ok(Self {
            width,
            height,
            bit_depth,
            color_type,
            format,
        })
    }

    /// Byte distance used by the Sub/Average/Paeth predictors.
    pub fn filter_bpp(&self) -> usize {
        self.color_type.samples() * usize::from(self.bit_depth / 8)
    }

    /// Filtered scanline length, excluding the leading filter-type byte.
    pub fn scanline_len(&self) -> Option<usize> {
        usize::try_from(self.width).ok()?.checked_mul(self.filter_bpp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ihdr(width: u32, height: u32, depth: u8, color: u8, interlace: u8) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&[depth, color, 0, 0, interlace]);
        data
    }

    #[test]
    fn parses_supported_combinations() {
        let header = Header::parse(&ihdr(4, 3, 8, 6, 0)).unwrap();
        assert_eq!(header.format, PixelFormat::Rgba8);
        assert_eq!(header.filter_bpp(), 4);
        assert_eq!(header.scanline_len(), Some(16));

        let header = Header::parse(&ihdr(2, 2, 16, 0, 0)).unwrap();
        assert_eq!(header.format, PixelFormat::Gray16);
        assert_eq!(header.filter_bpp(), 2);

        let header = Header::parse(&ihdr(5, 1, 8, 3, 0)).unwrap();
        assert_eq!(header.color_type, ColorType::Indexed);
        assert_eq!(header.format, PixelFormat::Rgb8);
        assert_eq!(header.filter_bpp(), 1);
    }

    #[test]
    fn rejects_sub_byte_and_unknown_formats() {
        for (depth, color) in [(1, 0), (4, 3), (16, 3), (8, 1), (8, 7)] {
            let err = Header::parse(&ihdr(1, 1, depth, color, 0)).unwrap_err();
            assert!(
                matches!(err, PngError::UnsupportedFormat { .. }),
                "depth {} color {}",
                depth,
                color
            );
        }
    }

    #[test]
    fn rejects_interlace_and_methods() {
        assert!(matches!(
            Header::parse(&ihdr(1, 1, 8, 0, 1)),
            Err(PngError::Interlaced(1))
        ));
        let mut data = ihdr(1, 1, 8, 0, 0);
        data[10] = 1;
        assert!(matches!(
            Header::parse(&data),
            Err(PngError::UnsupportedCompression(1))
        ));
        let mut data = ihdr(1, 1, 8, 0, 0);
        data[11] = 2;
        assert!(matches!(
            Header::parse(&data),
            Err(PngError::UnsupportedFilterMethod(2))
        ));
    }

    #[test]
    fn rejects_zero_dimensions_and_bad_length() {
        assert!(matches!(
            Header::parse(&ihdr(0, 4, 8, 0, 0)),
            Err(PngError::InvalidDimensions { width: 0, height: 4 })
        ));
        assert!(matches!(
            Header::parse(&[0u8; 12]),
            Err(PngError::BadHeaderLength { length: 12 })
        ));
    }

    #[test]
    fn format_sizes() {
        assert_eq!(PixelFormat::Rgb16.bytes_per_pixel(), 6);
        assert_eq!(PixelFormat::GrayAlpha8.bytes_per_pixel(), 2);
        assert_eq!(PixelFormat::Rgba8.label(), "rgba8");
    }
}
