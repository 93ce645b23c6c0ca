//! Image I/O adapter.
//!
//! Fetches raster images from remote URLs or local paths, decodes them into
//! an in-memory [`ImageBuffer`], and normalises them to a canonical working
//! resolution. All pixel data is 8 bits per channel.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Canonical working resolution (square) used before any operation that
/// needs equally sized operands.
pub const CANONICAL_SIZE: u32 = 512;

/// Fixed-point luminance weights (ITU-R BT.601, scaled by 2^14).
const LUMA_R: u32 = 4899;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 1868;
const LUMA_SHIFT: u32 = 14;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure to retrieve, decode or persist an image.
///
/// Every variant carries the source reference (URL or path) it concerns so
/// the failure message identifies the offending input.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Failed to read image from {source_ref}: {cause}")]
    Http {
        source_ref: String,
        #[source]
        cause: reqwest::Error,
    },

    #[error("Failed to read image from {source_ref}: {cause}")]
    Io {
        source_ref: String,
        #[source]
        cause: std::io::Error,
    },

    #[error("Failed to decode image from {source_ref}: {cause}")]
    Decode {
        source_ref: String,
        #[source]
        cause: image::ImageError,
    },

    #[error("Failed to write image to {source_ref}: {cause}")]
    Encode {
        source_ref: String,
        #[source]
        cause: image::ImageError,
    },

    #[error("Decoding image from {source_ref} did not complete: {cause}")]
    Blocking {
        source_ref: String,
        #[source]
        cause: tokio::task::JoinError,
    },
}

impl FetchError {
    /// The URL or path this failure concerns.
    pub fn source_ref(&self) -> &str {
        match self {
            Self::Http { source_ref, .. }
            | Self::Io { source_ref, .. }
            | Self::Decode { source_ref, .. }
            | Self::Encode { source_ref, .. }
            | Self::Blocking { source_ref, .. } => source_ref,
        }
    }
}

// ---------------------------------------------------------------------------
// ImageBuffer
// ---------------------------------------------------------------------------

/// Decoded raster data.
#[derive(Debug, Clone)]
pub struct ImageBuffer {
    image: DynamicImage,
}

impl ImageBuffer {
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }

    /// Decode an encoded image (PNG, JPEG, WebP) from memory.
    pub fn decode(bytes: &[u8]) -> Result<Self, image::ImageError> {
        image::load_from_memory(bytes).map(Self::new)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Number of colour channels (1 for grayscale, 3 for RGB, 4 for RGBA).
    pub fn channels(&self) -> u8 {
        self.image.color().channel_count()
    }

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_dynamic(self) -> DynamicImage {
        self.image
    }

    /// Single-channel luminance using BT.601 weights with the same
    /// fixed-point rounding OpenCV applies for RGB to gray conversion.
    pub fn luma(&self) -> GrayImage {
        if let DynamicImage::ImageLuma8(gray) = &self.image {
            return gray.clone();
        }

        let rgb = self.image.to_rgb8();
        let mut out = GrayImage::new(rgb.width(), rgb.height());
        for (x, y, px) in rgb.enumerate_pixels() {
            let [r, g, b] = px.0;
            let y_val = (u32::from(r) * LUMA_R
                + u32::from(g) * LUMA_G
                + u32::from(b) * LUMA_B
                + (1 << (LUMA_SHIFT - 1)))
                >> LUMA_SHIFT;
            out.put_pixel(x, y, Luma([y_val.min(255) as u8]));
        }
        out
    }

    /// Convert to a single-channel buffer.
    pub fn to_grayscale(&self) -> Self {
        Self::new(DynamicImage::ImageLuma8(self.luma()))
    }

    /// Resample to exactly `height` x `width` with bilinear filtering.
    ///
    /// Returns an unchanged copy when the dimensions already match.
    pub fn resize_to(&self, height: u32, width: u32) -> Self {
        if self.height() == height && self.width() == width {
            return self.clone();
        }
        Self::new(self.image.resize_exact(width, height, FilterType::Triangle))
    }

    /// Resample to the square canonical working size.
    pub fn normalized(&self, size: u32) -> Self {
        self.resize_to(size, size)
    }

    /// Encode as PNG in memory.
    pub fn encode_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut bytes = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }

    /// Write as PNG to `path`.
    pub fn save_png(&self, path: &Path) -> Result<(), FetchError> {
        self.image
            .save_with_format(path, ImageFormat::Png)
            .map_err(|cause| FetchError::Encode {
                source_ref: path.display().to_string(),
                cause,
            })
    }
}

impl From<GrayImage> for ImageBuffer {
    fn from(gray: GrayImage) -> Self {
        Self::new(DynamicImage::ImageLuma8(gray))
    }
}

// ---------------------------------------------------------------------------
// Fetching
// ---------------------------------------------------------------------------

/// Retrieves images by source reference.
///
/// A reference starting with `http://` or `https://` is downloaded; a
/// `file://` prefix or a bare path is read from the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct ImageFetcher {
    client: reqwest::Client,
}

impl ImageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured HTTP client (timeouts, proxies).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Fetch and decode an image, keeping its colour channels.
    pub async fn fetch(&self, source: &str) -> Result<ImageBuffer, FetchError> {
        self.fetch_decoded(source, false).await
    }

    /// Fetch and decode an image as single-channel luminance.
    pub async fn fetch_grayscale(&self, source: &str) -> Result<ImageBuffer, FetchError> {
        self.fetch_decoded(source, true).await
    }

    /// Decoding runs on the blocking pool, never on a runtime worker.
    async fn fetch_decoded(
        &self,
        source: &str,
        grayscale: bool,
    ) -> Result<ImageBuffer, FetchError> {
        let bytes = self.read_bytes(source).await?;

        let decoded = tokio::task::spawn_blocking(move || {
            ImageBuffer::decode(&bytes).map(|image| {
                if grayscale {
                    image.to_grayscale()
                } else {
                    image
                }
            })
        })
        .await
        .map_err(|cause| FetchError::Blocking {
            source_ref: source.to_string(),
            cause,
        })?;

        let image = decoded.map_err(|cause| FetchError::Decode {
            source_ref: source.to_string(),
            cause,
        })?;
        tracing::debug!(
            source,
            width = image.width(),
            height = image.height(),
            channels = image.channels(),
            "Fetched image",
        );
        Ok(image)
    }

    async fn read_bytes(&self, source: &str) -> Result<Vec<u8>, FetchError> {
        if is_remote(source) {
            let http_err = |cause| FetchError::Http {
                source_ref: source.to_string(),
                cause,
            };
            let response = self
                .client
                .get(source)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(http_err)?;
            let bytes = response.bytes().await.map_err(http_err)?;
            return Ok(bytes.to_vec());
        }

        tokio::fs::read(local_path(source))
            .await
            .map_err(|cause| FetchError::Io {
                source_ref: source.to_string(),
                cause,
            })
    }
}

/// Whether `source` names a remote HTTP(S) resource.
pub fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Filesystem path for a non-remote reference.
pub fn local_path(source: &str) -> PathBuf {
    PathBuf::from(source.strip_prefix("file://").unwrap_or(source))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
