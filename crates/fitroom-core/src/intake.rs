//! Upload intake: content-type/size validation and decoding into [`InputImage`].

use std::path::Path;

/// Content types accepted at the upload boundary.
pub const ALLOWED_CONTENT_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png", "image/webp"];

/// Default upload size limit (10 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("unsupported content type {0:?}; expected JPG, PNG or WEBP")]
    UnsupportedType(String),
    #[error("upload is {size} bytes, limit is {max} bytes")]
    TooLarge { size: u64, max: u64 },
    #[error("could not decode image: {0}")]
    Decode(String),
    #[error("pixel buffer is {actual} bytes, expected {expected} for {width}x{height} RGB")]
    Malformed {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("could not encode image: {0}")]
    Encode(String),
    #[error("image has zero width or height")]
    Empty,
}

/// Decoded RGB8 source image, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputImage {
    width: u32,
    height: u32,
    rgb: Vec<u8>,
}

impl InputImage {
    /// Wrap a raw RGB8 buffer. Geometry is checked by [`InputImage::validate`],
    /// which the preparation stage calls before compositing.
    pub fn from_rgb(width: u32, height: u32, rgb: Vec<u8>) -> Self {
        Self { width, height, rgb }
    }

    /// Solid-colour image, mostly useful for tests.
    pub fn solid(width: u32, height: u32, color: [u8; 3]) -> Self {
        let rgb = color
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self { width, height, rgb }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rgb(&self) -> &[u8] {
        &self.rgb
    }

    /// Check that the buffer actually holds `width * height` RGB pixels.
    pub fn validate(&self) -> Result<(), IntakeError> {
        if self.width == 0 || self.height == 0 {
            return Err(IntakeError::Empty);
        }
        let expected = self.width as usize * self.height as usize * 3;
        if self.rgb.len() != expected {
            return Err(IntakeError::Malformed {
                width: self.width,
                height: self.height,
                expected,
                actual: self.rgb.len(),
            });
        }
        Ok(())
    }

    /// Write as PNG (hand-off format for engine worker processes).
    pub fn save_png(&self, path: &Path) -> Result<(), IntakeError> {
        self.validate()?;
        image::save_buffer(
            path,
            &self.rgb,
            self.width,
            self.height,
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| IntakeError::Encode(e.to_string()))
    }

    /// Write as JPEG whatever the extension of `path`.
    pub fn save_jpeg(&self, path: &Path) -> Result<(), IntakeError> {
        self.validate()?;
        image::save_buffer_with_format(
            path,
            &self.rgb,
            self.width,
            self.height,
            image::ExtendedColorType::Rgb8,
            image::ImageFormat::Jpeg,
        )
        .map_err(|e| IntakeError::Encode(e.to_string()))
    }
}

/// Validate an upload against the content-type allowlist and size limit, then decode it.
pub fn decode_upload(bytes: &[u8], content_type: &str, max_bytes: u64) -> Result<InputImage, IntakeError> {
    let content_type = content_type.trim().to_ascii_lowercase();
    if !ALLOWED_CONTENT_TYPES.contains(&content_type.as_str()) {
        return Err(IntakeError::UnsupportedType(content_type));
    }
    let size = bytes.len() as u64;
    if size > max_bytes {
        return Err(IntakeError::TooLarge { size, max: max_bytes });
    }

    let decoded = image::load_from_memory(bytes).map_err(|e| IntakeError::Decode(e.to_string()))?;
    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();
    let img = InputImage::from_rgb(width, height, rgb.into_raw());
    img.validate()?;
    tracing::debug!(width, height, content_type = %content_type, "decoded upload");
    Ok(img)
}

/// Content type implied by a file extension (used where no transport header exists).
pub fn content_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}
