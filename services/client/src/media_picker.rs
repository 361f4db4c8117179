use crate::media::{MediaAsset, MediaKind};
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors reported by a media source while picking
#[derive(Error, Debug)]
pub enum PickerError {
    #[error("Media source unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Permission answer from the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    Undetermined,
}

impl PermissionStatus {
    pub fn is_granted(&self) -> bool {
        matches!(self, PermissionStatus::Granted)
    }
}

/// Raw selection as reported by the platform picker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickedMedia {
    pub uri: String,
    /// Whether the platform reported a video
    pub is_video: bool,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
}

/// Outcome of a picker session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickerOutcome {
    Cancelled,
    Picked(PickedMedia),
}

/// Platform media library and camera
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn request_library_permission(&self) -> PermissionStatus;

    async fn request_camera_permission(&self) -> PermissionStatus;

    async fn launch_library(&self) -> Result<PickerOutcome, PickerError>;

    async fn launch_camera(&self) -> Result<PickerOutcome, PickerError>;
}

/// Blocking user-facing alert
pub trait AlertSink: Send + Sync {
    fn alert(&self, title: &str, message: &str);
}

/// Alerts written to the log
#[derive(Debug, Default, Clone)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn alert(&self, title: &str, message: &str) {
        warn!(title = %title, "{message}");
    }
}

/// Capture adapter that turns picker results into [`MediaAsset`]s.
///
/// Never surfaces an error: failures become alerts and the caller gets `None`.
pub struct MediaPicker {
    source: Arc<dyn MediaSource>,
    alerts: Arc<dyn AlertSink>,
    has_permission: AtomicBool,
}

impl MediaPicker {
    pub fn new(source: Arc<dyn MediaSource>, alerts: Arc<dyn AlertSink>) -> Self {
        Self {
            source,
            alerts,
            has_permission: AtomicBool::new(false),
        }
    }

    /// Whether media library access has been granted
    pub fn has_permission(&self) -> bool {
        self.has_permission.load(Ordering::Acquire)
    }

    /// Ask for media library access and remember the answer
    pub async fn request_permissions(&self) -> bool {
        let status = self.source.request_library_permission().await;
        let granted = status.is_granted();
        self.has_permission.store(granted, Ordering::Release);

        if !granted {
            self.alerts.alert(
                "Permission Required",
                "Please grant media library permissions to upload photos and videos.",
            );
        }

        debug!(status = ?status, "Media library permission requested");
        granted
    }

    /// Pick a photo or video from the media library
    pub async fn pick_from_gallery(&self) -> Option<MediaAsset> {
        if !self.has_permission() && !self.request_permissions().await {
            return None;
        }

        match self.source.launch_library().await {
            Ok(PickerOutcome::Cancelled) => {
                debug!("Gallery selection cancelled");
                None
            }
            Ok(PickerOutcome::Picked(picked)) => {
                let kind = if picked.is_video {
                    MediaKind::Video
                } else {
                    MediaKind::Image
                };
                Some(into_asset(picked, kind, "media"))
            }
            Err(e) => {
                error!(error = %e, "Error picking media");
                self.alerts
                    .alert("Error", "Failed to pick media. Please try again.");
                None
            }
        }
    }

    /// Take a photo with the camera
    pub async fn pick_from_camera(&self) -> Option<MediaAsset> {
        let status = self.source.request_camera_permission().await;
        if !status.is_granted() {
            self.alerts.alert(
                "Permission Required",
                "Please grant camera permissions to take photos.",
            );
            return None;
        }

        match self.source.launch_camera().await {
            Ok(PickerOutcome::Cancelled) => {
                debug!("Camera capture cancelled");
                None
            }
            // Camera captures are always treated as images
            Ok(PickerOutcome::Picked(picked)) => Some(into_asset(picked, MediaKind::Image, "photo")),
            Err(e) => {
                error!(error = %e, "Error taking photo");
                self.alerts
                    .alert("Error", "Failed to take photo. Please try again.");
                None
            }
        }
    }
}

fn into_asset(picked: PickedMedia, kind: MediaKind, fallback_prefix: &str) -> MediaAsset {
    let file_name = picked
        .file_name
        .unwrap_or_else(|| format!("{}_{}", fallback_prefix, Utc::now().timestamp_millis()));

    info!(uri = %picked.uri, kind = %kind, file_name = %file_name, "Media selected");

    MediaAsset {
        uri: picked.uri,
        kind,
        file_name,
        file_size: picked.file_size.unwrap_or(0),
    }
}

/// Media source backed by a file on disk, used by the command line client.
///
/// Permissions are always granted; both the library and the camera yield the
/// configured file.
pub struct LocalFileSource {
    path: PathBuf,
    force_video: bool,
}

impl LocalFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            force_video: false,
        }
    }

    /// Report the file as a video regardless of its extension
    pub fn as_video(mut self) -> Self {
        self.force_video = true;
        self
    }

    async fn pick(&self) -> Result<PickerOutcome, PickerError> {
        let metadata = tokio::fs::metadata(&self.path).await?;
        if !metadata.is_file() {
            return Err(PickerError::Unavailable(format!(
                "{} is not a regular file",
                self.path.display()
            )));
        }

        Ok(PickerOutcome::Picked(PickedMedia {
            uri: format!("file://{}", self.path.display()),
            is_video: self.force_video || MediaKind::from_path(&self.path) == MediaKind::Video,
            file_name: self
                .path
                .file_name()
                .and_then(|n| n.to_str())
                .map(String::from),
            file_size: Some(metadata.len()),
        }))
    }
}

#[async_trait]
impl MediaSource for LocalFileSource {
    async fn request_library_permission(&self) -> PermissionStatus {
        PermissionStatus::Granted
    }

    async fn request_camera_permission(&self) -> PermissionStatus {
        PermissionStatus::Granted
    }

    async fn launch_library(&self) -> Result<PickerOutcome, PickerError> {
        self.pick().await
    }

    async fn launch_camera(&self) -> Result<PickerOutcome, PickerError> {
        self.pick().await
    }
}
