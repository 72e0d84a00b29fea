use std::fmt;

/// Container formats recognised from their leading bytes.
///
/// JPEG, PNG, GIF, BMP and TGA decode; the rest are recognised so they can
/// be rejected by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// JFIF/EXIF JPEG, baseline or progressive.
    Jpeg,
    /// Portable Network Graphics.
    Png,
    /// First frame only.
    Gif,
    Bmp,
    /// Truevision TGA, which has no signature; see [`ImageFormat::detect`].
    Tga,
    Psd,
    /// Radiance RGBE.
    Hdr,
    /// Netpbm PGM/PPM.
    Pnm,
}

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// TGA header plausibility: colour-map type, image type, colour-map entry
/// size, non-zero dimensions and pixel depth must all be legal values.
fn looks_like_tga(data: &[u8]) -> bool {
    let Some(header) = data.get(..18) else {
        return false;
    };
    let colormap = header[1];
    let image_type = header[2];
    let depth_ok = |bits: u8| matches!(bits, 8 | 15 | 16 | 24 | 32);
    let width = u16::from_le_bytes([header[12], header[13]]);
    let height = u16::from_le_bytes([header[14], header[15]]);
    let bits = header[16];
    match colormap {
        0 => matches!(image_type, 2 | 3 | 10 | 11) && width > 0 && height > 0 && depth_ok(bits),
        1 => {
            matches!(image_type, 1 | 9)
                && depth_ok(header[7])
                && width > 0
                && height > 0
                && matches!(bits, 8 | 16)
        }
        _ => false,
    }
}

impl ImageFormat {
    /// Identifies `data` from its leading bytes. TGA is tried last, from
    /// the plausibility of its 18-byte header.
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if data.starts_with(&PNG_SIGNATURE) {
            Some(Self::Png)
        } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
            Some(Self::Gif)
        } else if data.starts_with(b"BM") && data.len() >= 14 {
            Some(Self::Bmp)
        } else if data.starts_with(b"8BPS") {
            Some(Self::Psd)
        } else if data.starts_with(b"#?RADIANCE\n") || data.starts_with(b"#?RGBE\n") {
            Some(Self::Hdr)
        } else if matches!(data, [b'P', b'5' | b'6', ..]) {
            Some(Self::Pnm)
        } else if looks_like_tga(data) {
            Some(Self::Tga)
        } else {
            None
        }
    }

    pub fn is_decodable(self) -> bool {
        matches!(self, Self::Jpeg | Self::Png | Self::Gif | Self::Bmp | Self::Tga)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
            Self::Gif => "GIF",
            Self::Bmp => "BMP",
            Self::Tga => "TGA",
            Self::Psd => "PSD",
            Self::Hdr => "HDR",
            Self::Pnm => "PNM",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
