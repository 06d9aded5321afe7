use std::sync::Arc;

use base64::Engine;
use bytes::Bytes;
use image::imageops::FilterType;
use thiserror::Error;
use tracing::info;

pub const MAX_FILE_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_DIMENSION: u32 = 1920;
pub const JPEG_QUALITY: u8 = 80;

const ACCEPTED_TYPES: [&str; 3] = ["image/jpeg", "image/jpg", "image/png"];

/// An uploaded file: its declared media type plus raw bytes.
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub media_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("unsupported file type: {0} (use PNG or JPG)")]
    InvalidFileType(String),
    #[error("file too large: {0} bytes")]
    FileTooLarge(usize),
    #[error("image decode failed: {0}")]
    Decode(String),
    #[error("image encode failed: {0}")]
    Encode(String),
    #[error("preprocess worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decode + downscale + re-encode capability. The studio core only needs
/// this one operation from whatever image library backs it.
pub trait ImageCodec: Send + Sync + 'static {
    fn downscale(&self, bytes: &[u8], max_dimension: u32, quality: u8) -> Result<EncodedImage, PreprocessError>;
}

/// `image`-crate implementation of [`ImageCodec`].
pub struct RasterCodec;

impl ImageCodec for RasterCodec {
    fn downscale(&self, bytes: &[u8], max_dimension: u32, quality: u8) -> Result<EncodedImage, PreprocessError> {
        let decoded = image::load_from_memory(bytes).map_err(|e| PreprocessError::Decode(e.to_string()))?;
        let (width, height) = (decoded.width(), decoded.height());
        // Fit within the bound preserving aspect ratio; never upscale.
        let resized = if width > max_dimension || height > max_dimension {
            decoded.resize(max_dimension, max_dimension, FilterType::Triangle)
        } else {
            decoded
        };
        let rgb = resized.into_rgb8();
        let mut out = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
        encoder
            .encode_image(&rgb)
            .map_err(|e| PreprocessError::Encode(e.to_string()))?;
        Ok(EncodedImage {
            width: rgb.width(),
            height: rgb.height(),
            bytes: out,
        })
    }
}

/// Validates an upload and turns it into a bounded-size JPEG data URL.
pub struct Preprocessor {
    codec: Arc<dyn ImageCodec>,
    max_bytes: usize,
    max_dimension: u32,
    quality: u8,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(Arc::new(RasterCodec))
    }
}

impl Preprocessor {
    pub fn new(codec: Arc<dyn ImageCodec>) -> Self {
        Self {
            codec,
            max_bytes: MAX_FILE_BYTES,
            max_dimension: MAX_DIMENSION,
            quality: JPEG_QUALITY,
        }
    }

    /// Validate and downscale an upload into a `data:image/jpeg;base64,…`
    /// string. The pixel work runs on the blocking pool so the caller's
    /// event loop stays responsive; the future resolves exactly once.
    pub async fn process(&self, file: ImageFile) -> Result<String, PreprocessError> {
        if !ACCEPTED_TYPES.contains(&file.media_type.as_str()) {
            return Err(PreprocessError::InvalidFileType(file.media_type));
        }
        if file.bytes.len() > self.max_bytes {
            return Err(PreprocessError::FileTooLarge(file.bytes.len()));
        }

        let codec = Arc::clone(&self.codec);
        let (max_dimension, quality) = (self.max_dimension, self.quality);
        let bytes = file.bytes;
        let encoded = tokio::task::spawn_blocking(move || codec.downscale(&bytes, max_dimension, quality))
            .await
            .map_err(|e| PreprocessError::Worker(e.to_string()))??;

        info!(
            "🖼️ Preprocessed upload to {}x{} ({} bytes)",
            encoded.width,
            encoded.height,
            encoded.bytes.len()
        );
        Ok(format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&encoded.bytes)
        ))
    }
}
