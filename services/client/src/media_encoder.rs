use crate::media::{local_path, MediaKind};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Progress callback receiving a percentage between 0 and 100
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Errors raised while turning a local file into a deliverable URL
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Failed to read media file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload failed: {0}")]
    Failed(String),
}

/// Turns a local media reference into a URL that can be stored on a post
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload_media(
        &self,
        uri: &str,
        owner_id: &str,
        kind: MediaKind,
        on_progress: Option<ProgressCallback>,
    ) -> Result<String, EncodeError>;

    async fn delete_media(&self, url: &str) -> Result<(), EncodeError>;
}

/// Inlines images as base64 data URIs; videos keep their local reference.
///
/// No network transfer happens. Progress is reported at fixed checkpoints
/// since the encoding itself is not instrumented.
#[derive(Debug, Default, Clone)]
pub struct DataUriUploader;

impl DataUriUploader {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaUploader for DataUriUploader {
    #[instrument(skip(self, on_progress))]
    async fn upload_media(
        &self,
        uri: &str,
        owner_id: &str,
        kind: MediaKind,
        on_progress: Option<ProgressCallback>,
    ) -> Result<String, EncodeError> {
        let report = |percent: u8| {
            if let Some(ref callback) = on_progress {
                callback(percent);
            }
        };

        report(20);

        match kind {
            MediaKind::Image => {
                let path = local_path(uri);
                let bytes = tokio::fs::read(&path).await.map_err(|source| EncodeError::Read {
                    path: path.display().to_string(),
                    source,
                })?;

                report(70);

                let data_url = format!(
                    "data:{};base64,{}",
                    get_content_type(&path),
                    STANDARD.encode(&bytes)
                );

                info!(
                    size_bytes = bytes.len(),
                    encoded_chars = data_url.len(),
                    "Image encoded as data URI"
                );
                report(100);

                Ok(data_url)
            }
            MediaKind::Video => {
                // Too large to inline; the local reference is kept on the device
                debug!("Video kept as local URI");
                report(100);
                Ok(uri.to_string())
            }
        }
    }

    async fn delete_media(&self, url: &str) -> Result<(), EncodeError> {
        debug!(url_len = url.len(), "Nothing to delete for inlined media");
        Ok(())
    }
}

/// Get the image content type for a file extension
fn get_content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("heic") => "image/heic",
        _ => "image/jpeg",
    }
}

/// Split a `data:` URI into its content type and decoded payload
pub fn decode_data_uri(url: &str) -> Option<(&str, Vec<u8>)> {
    let rest = url.strip_prefix("data:")?;
    let (content_type, payload) = rest.split_once(";base64,")?;
    let bytes = STANDARD.decode(payload).ok()?;
    Some((content_type, bytes))
}
