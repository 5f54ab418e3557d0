//! Minimal OpenEXR header reader.
//!
//! Only the attributes delivery decisions depend on are decoded: the
//! `compression` attribute and the `channels` list with per-channel pixel
//! types. Pixel data is never touched.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// `20000630` little-endian.
const EXR_MAGIC: [u8; 4] = [0x76, 0x2f, 0x31, 0x01];

/// Version flag for attribute names longer than 31 bytes.
const LONG_NAMES_FLAG: u32 = 0x400;

const MAX_NAME_LEN: usize = 255;

/// Largest attribute decoded in memory.
const MAX_BUFFERED_ATTRIBUTE: usize = 1 << 20;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ExrError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not an OpenEXR file: {0}")]
    NotExr(String),

    #[error("Malformed OpenEXR header: {0}")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Compression {
    None,
    Rle,
    Zips,
    Zip,
    Piz,
    Pxr24,
    B44,
    B44a,
    Dwaa,
    Dwab,
}

impl Compression {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::None,
            1 => Self::Rle,
            2 => Self::Zips,
            3 => Self::Zip,
            4 => Self::Piz,
            5 => Self::Pxr24,
            6 => Self::B44,
            7 => Self::B44a,
            8 => Self::Dwaa,
            9 => Self::Dwab,
            _ => return None,
        })
    }

    /// Raw tag as reported by OpenEXR tooling.
    pub fn tag(self) -> &'static str {
        match self {
            Self::None => "NO_COMPRESSION",
            Self::Rle => "RLE_COMPRESSION",
            Self::Zips => "ZIPS_COMPRESSION",
            Self::Zip => "ZIP_COMPRESSION",
            Self::Piz => "PIZ_COMPRESSION",
            Self::Pxr24 => "PXR24_COMPRESSION",
            Self::B44 => "B44_COMPRESSION",
            Self::B44a => "B44A_COMPRESSION",
            Self::Dwaa => "DWAA_COMPRESSION",
            Self::Dwab => "DWAB_COMPRESSION",
        }
    }

    /// Name written to manifests.
    pub fn friendly_name(self) -> &'static str {
        match self {
            Self::None => "Uncompressed",
            Self::Rle => "RLE",
            Self::Zips => "ZIP (1 scanline)",
            Self::Zip => "ZIP (16 scanlines)",
            Self::Piz => "PIZ",
            Self::Pxr24 => "PXR24",
            Self::B44 => "B44",
            Self::B44a => "B44A",
            Self::Dwaa => "DWAA",
            Self::Dwab => "DWAB",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PixelType {
    Uint,
    Half,
    Float,
    Unknown(i32),
}

impl PixelType {
    fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Uint,
            1 => Self::Half,
            2 => Self::Float,
            other => Self::Unknown(other),
        }
    }

    pub fn bit_depth_label(self) -> Option<&'static str> {
        match self {
            Self::Uint => Some("32-bit uint"),
            Self::Half => Some("16-bit half"),
            Self::Float => Some("32-bit float"),
            Self::Unknown(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Channel {
    pub name: String,
    pub pixel_type: PixelType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExrHeader {
    /// Raw value of the `compression` attribute, if present.
    pub compression_code: Option<u8>,
    /// Channels in header order.
    pub channels: Vec<Channel>,
}

impl ExrHeader {
    pub fn compression(&self) -> Option<Compression> {
        self.compression_code.and_then(Compression::from_code)
    }

    /// Manifest name for the compression, `"unknown"` for unrecognised
    /// codes. `None` when the header has no compression attribute.
    pub fn compression_name(&self) -> Option<&'static str> {
        self.compression_code.map(|code| {
            Compression::from_code(code)
                .map(Compression::friendly_name)
                .unwrap_or("unknown")
        })
    }

    /// Raw compression tag, `None` for absent or unrecognised codes.
    pub fn compression_tag(&self) -> Option<&'static str> {
        self.compression().map(Compression::tag)
    }

    /// Bit depth label of the first channel.
    pub fn bit_depth_label(&self) -> Option<&'static str> {
        self.channels.first()?.pixel_type.bit_depth_label()
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.iter().any(|c| c.name == name)
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Read the header of the EXR file at `path`.
pub fn read_exr_header(path: &Path) -> Result<ExrHeader, ExrError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != EXR_MAGIC {
        return Err(ExrError::NotExr(path.display().to_string()));
    }

    let version = read_u32(&mut reader)?;
    let max_name = if version & LONG_NAMES_FLAG != 0 {
        MAX_NAME_LEN
    } else {
        31
    };

    let mut header = ExrHeader::default();

    loop {
        let name = read_cstr(&mut reader, max_name)?;
        if name.is_empty() {
            break;
        }
        let attr_type = read_cstr(&mut reader, max_name)?;
        let size = read_i32(&mut reader)?;
        let size = usize::try_from(size)
            .map_err(|_| ExrError::Malformed(format!("negative size for attribute {name}")))?;

        match (name.as_str(), attr_type.as_str()) {
            ("compression", "compression") => {
                let data = read_bytes(&mut reader, size)?;
                let code = *data
                    .first()
                    .ok_or_else(|| ExrError::Malformed("empty compression attribute".into()))?;
                header.compression_code = Some(code);
            }
            ("channels", "chlist") => {
                let data = read_bytes(&mut reader, size)?;
                header.channels = parse_channels(&data)?;
            }
            _ => skip(&mut reader, size)?,
        }
    }

    Ok(header)
}

// ---------------------------------------------------------------------------
// Decoding helpers
// ---------------------------------------------------------------------------

fn read_u32(reader: &mut impl Read) -> Result<u32, ExrError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_i32(reader: &mut impl Read) -> Result<i32, ExrError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_cstr(reader: &mut impl Read, max_len: usize) -> Result<String, ExrError> {
    let mut bytes = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte)?;
        if byte[0] == 0 {
            break;
        }
        bytes.push(byte[0]);
        if bytes.len() > max_len {
            return Err(ExrError::Malformed("attribute name too long".into()));
        }
    }
    String::from_utf8(bytes).map_err(|e| ExrError::Malformed(e.to_string()))
}

fn read_bytes(reader: &mut impl Read, size: usize) -> Result<Vec<u8>, ExrError> {
    if size > MAX_BUFFERED_ATTRIBUTE {
        return Err(ExrError::Malformed(format!("attribute of {size} bytes")));
    }
    let mut data = vec![0u8; size];
    reader.read_exact(&mut data)?;
    Ok(data)
}

fn skip(reader: &mut impl Read, size: usize) -> Result<(), ExrError> {
    let copied = std::io::copy(&mut reader.take(size as u64), &mut std::io::sink())?;
    if copied as usize != size {
        return Err(ExrError::Malformed("truncated attribute".into()));
    }
    Ok(())
}

fn parse_channels(data: &[u8]) -> Result<Vec<Channel>, ExrError> {
    let truncated = || ExrError::Malformed("truncated channel list".into());
    let mut channels = Vec::new();
    let mut pos = 0;

    loop {
        let rest = data.get(pos..).ok_or_else(truncated)?;
        let end = rest.iter().position(|b| *b == 0).ok_or_else(truncated)?;
        if end == 0 {
            break;
        }
        let name = String::from_utf8(rest[..end].to_vec())
            .map_err(|e| ExrError::Malformed(e.to_string()))?;
        pos += end + 1;

        // pixel_type i32, pLinear u8, 3 reserved, xSampling i32, ySampling i32
        let fields = data.get(pos..pos + 16).ok_or_else(truncated)?;
        let pixel_type = i32::from_le_bytes([fields[0], fields[1], fields[2], fields[3]]);
        pos += 16;

        channels.push(Channel {
            name,
            pixel_type: PixelType::from_code(pixel_type),
        });
    }

    Ok(channels)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
