use std::fmt;
use std::io::Cursor;
use std::path::Path;

use anyhow::Context;
use image::{DynamicImage, ImageFormat, ImageReader, Limits};
use sha2::{Digest, Sha256};

use crate::error::DecodeError;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
pub const DEFAULT_MAX_DIMENSION: u32 = 8192;

const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_bytes: usize,
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_width: DEFAULT_MAX_DIMENSION,
            max_height: DEFAULT_MAX_DIMENSION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
}

impl ImageKind {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageKind::Png => "image/png",
            ImageKind::Jpeg => "image/jpeg",
        }
    }

    fn format(self) -> ImageFormat {
        match self {
            ImageKind::Png => ImageFormat::Png,
            ImageKind::Jpeg => ImageFormat::Jpeg,
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageKind::Png => f.write_str("PNG"),
            ImageKind::Jpeg => f.write_str("JPEG"),
        }
    }
}

/// A decoded upload held in session memory.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    name: String,
    kind: ImageKind,
    byte_len: usize,
    sha256: String,
    pixels: DynamicImage,
}

impl UploadedImage {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Size of the upload as received, before decoding.
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Hex SHA-256 of the uploaded bytes.
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    /// Re-encodes the decoded pixels in the upload's own format.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        let target = match self.kind {
            ImageKind::Png => self.pixels.clone(),
            ImageKind::Jpeg => DynamicImage::ImageRgb8(self.pixels.to_rgb8()),
        };
        target
            .write_to(&mut Cursor::new(&mut bytes), self.kind.format())
            .with_context(|| format!("failed to encode {} as {}", self.name, self.kind))?;
        Ok(bytes)
    }
}

/// Validates and decodes an upload.
///
/// `name` is the file name the upload arrived with; its extension, when
/// present, must be one of png/jpg/jpeg. The content itself must sniff as
/// PNG or JPEG regardless of the name.
pub fn ingest_image(
    name: &str,
    bytes: &[u8],
    limits: &UploadLimits,
) -> Result<UploadedImage, DecodeError> {
    if let Some(ext) = Path::new(name)
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
    {
        if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(DecodeError::UnsupportedExtension(ext));
        }
    }
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    if bytes.len() > limits.max_bytes {
        return Err(DecodeError::TooLarge {
            size: bytes.len(),
            limit: limits.max_bytes,
        });
    }

    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| DecodeError::Decode(err.to_string()))?;
    let kind = match reader.format() {
        Some(ImageFormat::Png) => ImageKind::Png,
        Some(ImageFormat::Jpeg) => ImageKind::Jpeg,
        _ => return Err(DecodeError::UnsupportedFormat),
    };

    let mut decode_limits = Limits::default();
    decode_limits.max_image_width = Some(limits.max_width);
    decode_limits.max_image_height = Some(limits.max_height);
    reader.limits(decode_limits);
    let pixels = reader
        .decode()
        .map_err(|err| DecodeError::Decode(err.to_string()))?;

    Ok(UploadedImage {
        name: name.to_string(),
        kind,
        byte_len: bytes.len(),
        sha256: hex::encode(Sha256::digest(bytes)),
        pixels,
    })
}
