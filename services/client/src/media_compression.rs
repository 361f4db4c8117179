//! Image recompression before upload.
//!
//! Images are downscaled so the long edge fits `max_dimension` and re-encoded
//! as JPEG. Compression never fails the upload: on any error the original file
//! reference is returned unchanged. Videos pass through untouched.

use crate::config::MediaConfig;
use crate::media::local_path;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
enum CompressionError {
    #[error("Failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Failed to encode JPEG: {0}")]
    Encode(#[source] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Compression task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Image compressor writing JPEG output into a scratch directory
#[derive(Debug, Clone)]
pub struct MediaCompressor {
    max_dimension: u32,
    quality: u8,
    output_dir: PathBuf,
}

impl MediaCompressor {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            max_dimension: config.max_dimension,
            quality: config.jpeg_quality.clamp(1, 100),
            output_dir: config.output_dir.clone(),
        }
    }

    /// Recompress an image, returning a reference to the compressed copy.
    ///
    /// Falls back to `uri` when compression fails.
    #[instrument(skip(self))]
    pub async fn compress_image(&self, uri: &str) -> String {
        match self.try_compress(uri).await {
            Ok(path) => {
                info!(output = %path.display(), "Image compressed successfully");
                path.to_string_lossy().into_owned()
            }
            Err(e) => {
                warn!(error = %e, "Image compression failed, using original");
                uri.to_string()
            }
        }
    }

    /// Video recompression is not implemented; the reference is returned as-is
    pub async fn compress_video(&self, uri: &str) -> String {
        debug!(uri = %uri, "Video compression not supported, returning original URI");
        uri.to_string()
    }

    /// Remove a compressed copy once it has been encoded.
    ///
    /// References outside the scratch directory are left alone.
    pub async fn discard(&self, uri: &str) {
        let path = local_path(uri);
        if !path.starts_with(&self.output_dir) {
            return;
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "Compressed copy removed"),
            Err(e) => warn!(error = %e, path = %path.display(), "Failed to remove compressed copy"),
        }
    }

    async fn try_compress(&self, uri: &str) -> Result<PathBuf, CompressionError> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let source = local_path(uri);
        let target = self.output_dir.join(format!("{}.jpg", Uuid::new_v4()));
        let max_dimension = self.max_dimension;
        let quality = self.quality;

        let output = target.clone();
        tokio::task::spawn_blocking(move || {
            compress_file(&source, &output, max_dimension, quality)
        })
        .await??;

        Ok(target)
    }
}

fn compress_file(
    source: &Path,
    target: &Path,
    max_dimension: u32,
    quality: u8,
) -> Result<(), CompressionError> {
    let img = image::open(source).map_err(CompressionError::Decode)?;

    let (width, height) = img.dimensions();
    let resized = resize_to_fit(img, max_dimension);
    let (new_width, new_height) = resized.dimensions();

    // JPEG has no alpha channel
    let rgb = resized.to_rgb8();
    let writer = BufWriter::new(std::fs::File::create(target)?);
    let mut encoder = JpegEncoder::new_with_quality(writer, quality);
    encoder
        .encode(rgb.as_raw(), new_width, new_height, image::ColorType::Rgb8)
        .map_err(CompressionError::Encode)?;

    debug!(
        original_width = width,
        original_height = height,
        width = new_width,
        height = new_height,
        "Image resized"
    );

    Ok(())
}

/// Downscale so the long edge is at most `max_dimension`, keeping aspect ratio
fn resize_to_fit(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if width <= max_dimension && height <= max_dimension {
        return img;
    }

    let (new_width, new_height) = fit_dimensions(width, height, max_dimension);
    img.resize_exact(new_width, new_height, FilterType::Triangle)
}

fn fit_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width >= height {
        let ratio = max_dimension as f64 / width as f64;
        (max_dimension, ((height as f64 * ratio).round() as u32).max(1))
    } else {
        let ratio = max_dimension as f64 / height as f64;
        (((width as f64 * ratio).round() as u32).max(1), max_dimension)
    }
}

/// Check a file size against a limit given in megabytes
pub fn validate_file_size(file_size: u64, max_size_mb: u64) -> bool {
    file_size <= max_size_mb * 1024 * 1024
}

/// Human readable file size, e.g. `1.5 KB`
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;

    format!("{} {}", rounded, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn compressor(dir: &Path) -> MediaCompressor {
        MediaCompressor::new(&MediaConfig {
            output_dir: dir.join("out"),
            ..MediaConfig::default()
        })
    }

    fn write_png(path: &Path, width: u32, height: u32) {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128u8])
        });
        img.save(path).unwrap();
    }

    #[test]
    fn test_fit_dimensions_landscape() {
        assert_eq!(fit_dimensions(3000, 2000, 1920), (1920, 1280));
    }

    #[test]
    fn test_fit_dimensions_portrait() {
        assert_eq!(fit_dimensions(2000, 3000, 1920), (1280, 1920));
    }

    #[tokio::test]
    async fn test_compress_large_image_caps_long_edge() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("large.png");
        write_png(&source, 3000, 2000);

        let compressor = compressor(dir.path());
        let output = compressor
            .compress_image(&format!("file://{}", source.display()))
            .await;

        assert_ne!(output, source.display().to_string());
        let (width, height) = image::image_dimensions(&output).unwrap();
        assert_eq!((width, height), (1920, 1280));
        assert_eq!(
            image::ImageFormat::from_path(&output).unwrap(),
            image::ImageFormat::Jpeg
        );
    }

    #[tokio::test]
    async fn test_small_image_is_not_upscaled() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("small.png");
        write_png(&source, 640, 480);

        let output = compressor(dir.path())
            .compress_image(source.to_str().unwrap())
            .await;

        assert_eq!(image::image_dimensions(&output).unwrap(), (640, 480));
    }

    #[tokio::test]
    async fn test_compression_failure_returns_original() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("broken.jpg");
        std::fs::write(&source, b"definitely not a jpeg").unwrap();
        let uri = format!("file://{}", source.display());

        assert_eq!(compressor(dir.path()).compress_image(&uri).await, uri);
        assert_eq!(
            compressor(dir.path()).compress_image("/missing/file.jpg").await,
            "/missing/file.jpg"
        );
    }

    #[tokio::test]
    async fn test_discard_only_touches_scratch_copies() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("keep.png");
        write_png(&source, 32, 32);
        let source_uri = source.display().to_string();

        let compressor = compressor(dir.path());
        let output = compressor.compress_image(&source_uri).await;
        assert!(Path::new(&output).exists());

        compressor.discard(&output).await;
        compressor.discard(&source_uri).await;

        assert!(!Path::new(&output).exists());
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_video_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let uri = "file:///media/clip.mp4";
        assert_eq!(compressor(dir.path()).compress_video(uri).await, uri);
    }

    #[test]
    fn test_validate_file_size() {
        assert!(validate_file_size(50 * 1024 * 1024, 50));
        assert!(!validate_file_size(50 * 1024 * 1024 + 1, 50));
        assert!(validate_file_size(0, 1));
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 Bytes");
        assert_eq!(format_file_size(512), "512 Bytes");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(2 * 1024 * 1024), "2 MB");
    }
}
