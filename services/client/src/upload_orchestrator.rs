//! Upload pipeline: compress, encode, persist.
//!
//! ```text
//! idle ──▶ compressing ──▶ uploading ──▶ saving ──▶ success ──(delay)──▶ idle
//!               │               │           │
//!               └───────────────┴───────────┴──▶ error ──(reset)──▶ idle
//! ```
//!
//! Stages run strictly one after another. Only one upload may be in flight per
//! orchestrator; a second call is rejected without touching the current state.

use crate::config::Config;
use crate::feed_query::FeedQuery;
use crate::media::{MediaAsset, MediaKind};
use crate::media_compression::{format_file_size, validate_file_size, MediaCompressor};
use crate::media_encoder::{EncodeError, MediaUploader, ProgressCallback};
use crate::post_repository::{NewPost, Post, PostRepository, RepositoryError};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, instrument, warn};

const EVENT_CAPACITY: usize = 64;

/// Stage of the upload pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    Idle,
    Compressing,
    Uploading,
    Saving,
    Success,
    Error,
}

impl UploadState {
    /// True while a stage is running
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            UploadState::Compressing | UploadState::Uploading | UploadState::Saving
        )
    }

    /// Label shown next to the progress bar
    pub fn status_message(&self) -> &'static str {
        match self {
            UploadState::Idle => "",
            UploadState::Compressing => "Compressing media...",
            UploadState::Uploading => "Uploading to cloud...",
            UploadState::Saving => "Saving post...",
            UploadState::Success => "Upload successful!",
            UploadState::Error => "Upload failed",
        }
    }
}

/// Observable upload state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadSnapshot {
    pub state: UploadState,
    /// Percentage, 0-100
    pub progress: u8,
    pub error: Option<String>,
}

impl Default for UploadSnapshot {
    fn default() -> Self {
        Self {
            state: UploadState::Idle,
            progress: 0,
            error: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("An upload is already in progress")]
    AlreadyInProgress,

    #[error("File is too large ({size}). Maximum size is {max_mb} MB")]
    FileTooLarge { size: String, max_mb: u64 },

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Persist(#[from] RepositoryError),
}

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Placeholder owner identifier stamped on every post
    pub owner_id: String,
    /// Time spent in `success` before returning to `idle`
    pub success_reset_delay: Duration,
    pub max_file_size_mb: u64,
}

impl From<&Config> for UploadOptions {
    fn from(config: &Config) -> Self {
        Self {
            owner_id: config.upload.owner_id.clone(),
            success_reset_delay: config.success_reset_delay(),
            max_file_size_mb: config.media.max_file_size_mb,
        }
    }
}

/// Map the upload adapter's own 0-100 progress onto the 30-90 band
fn upload_band(percent: u8) -> u8 {
    30 + (f32::from(percent.min(100)) * 0.6).round() as u8
}

struct Inner {
    compressor: MediaCompressor,
    uploader: Arc<dyn MediaUploader>,
    repository: Arc<dyn PostRepository>,
    feed: Option<FeedQuery>,
    options: UploadOptions,
    state: watch::Sender<UploadSnapshot>,
    events: broadcast::Sender<UploadSnapshot>,
    in_flight: AtomicBool,
    attempt: AtomicU64,
}

impl Inner {
    fn publish(&self, snapshot: UploadSnapshot) {
        debug!(state = ?snapshot.state, progress = snapshot.progress, "Upload state changed");
        self.state.send_replace(snapshot.clone());
        // No subscribers is fine
        let _ = self.events.send(snapshot);
    }

    /// Move to `state`, never lowering progress within the attempt
    fn advance(&self, state: UploadState, progress: u8) {
        let current = self.state.borrow().clone();
        if current.state == state && current.progress >= progress {
            return;
        }
        self.publish(UploadSnapshot {
            state,
            progress: current.progress.max(progress),
            error: None,
        });
    }

    fn fail(&self, message: String) {
        let progress = self.state.borrow().progress;
        self.publish(UploadSnapshot {
            state: UploadState::Error,
            progress,
            error: Some(message),
        });
    }

    fn reset(&self) {
        let idle = UploadSnapshot::default();
        if *self.state.borrow() != idle {
            self.publish(idle);
        }
    }
}

/// Releases the in-flight flag when the upload finishes or is dropped
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Sequences compression, encoding and persistence of one asset at a time
#[derive(Clone)]
pub struct UploadOrchestrator {
    inner: Arc<Inner>,
}

impl UploadOrchestrator {
    pub fn builder(
        compressor: MediaCompressor,
        uploader: Arc<dyn MediaUploader>,
        repository: Arc<dyn PostRepository>,
        options: UploadOptions,
    ) -> UploadOrchestratorBuilder {
        UploadOrchestratorBuilder {
            compressor,
            uploader,
            repository,
            options,
            feed: None,
        }
    }

    /// Latest state
    pub fn snapshot(&self) -> UploadSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Watch the latest state
    pub fn subscribe(&self) -> watch::Receiver<UploadSnapshot> {
        self.inner.state.subscribe()
    }

    /// Every published state change, in order
    pub fn events(&self) -> broadcast::Receiver<UploadSnapshot> {
        self.inner.events.subscribe()
    }

    pub fn is_uploading(&self) -> bool {
        self.inner.state.borrow().state.is_in_flight()
    }

    /// Back to `idle` with no progress and no error
    pub fn reset(&self) {
        self.inner.reset();
    }

    /// Run the full pipeline for `asset`.
    ///
    /// Any failure leaves the orchestrator in `error` with a message. The
    /// compressed scratch copy is removed once encoded; media already encoded
    /// is not rolled back when persistence fails.
    #[instrument(skip(self, asset, caption), fields(file_name = %asset.file_name, kind = %asset.kind))]
    pub async fn upload(
        &self,
        asset: &MediaAsset,
        caption: Option<&str>,
    ) -> Result<Post, UploadError> {
        if self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Rejected upload while another one is in flight");
            return Err(UploadError::AlreadyInProgress);
        }
        let _guard = InFlightGuard(&self.inner.in_flight);

        let attempt = self.inner.attempt.fetch_add(1, Ordering::AcqRel) + 1;
        let started = Instant::now();

        match self.run(asset, caption).await {
            Ok(post) => {
                self.inner.publish(UploadSnapshot {
                    state: UploadState::Success,
                    progress: 100,
                    error: None,
                });

                metrics::counter!("snapshare.uploads.completed").increment(1);
                metrics::histogram!("snapshare.upload.duration_seconds")
                    .record(started.elapsed().as_secs_f64());

                if let Some(ref feed) = self.inner.feed {
                    feed.invalidate().await;
                }

                info!(post_id = %post.id, "Upload completed");
                self.schedule_reset(attempt);
                Ok(post)
            }
            Err(e) => {
                error!(error = %e, "Upload failed");
                metrics::counter!("snapshare.uploads.failed").increment(1);
                self.inner.fail(e.to_string());
                Err(e)
            }
        }
    }

    async fn run(&self, asset: &MediaAsset, caption: Option<&str>) -> Result<Post, UploadError> {
        let inner = &self.inner;

        inner.publish(UploadSnapshot {
            state: UploadState::Compressing,
            progress: 10,
            error: None,
        });

        let max_mb = inner.options.max_file_size_mb;
        if !validate_file_size(asset.file_size, max_mb) {
            return Err(UploadError::FileTooLarge {
                size: format_file_size(asset.file_size),
                max_mb,
            });
        }

        let compressed = match asset.kind {
            MediaKind::Image => inner.compressor.compress_image(&asset.uri).await,
            MediaKind::Video => inner.compressor.compress_video(&asset.uri).await,
        };

        inner.advance(UploadState::Uploading, 30);

        let progress_target = Arc::downgrade(&self.inner);
        let on_progress: ProgressCallback = Arc::new(move |percent| {
            if let Some(inner) = progress_target.upgrade() {
                inner.advance(UploadState::Uploading, upload_band(percent));
            }
        });

        let uploaded = inner
            .uploader
            .upload_media(&compressed, &inner.options.owner_id, asset.kind, Some(on_progress))
            .await;
        inner.compressor.discard(&compressed).await;
        let media_url = uploaded?;

        inner.advance(UploadState::Saving, 90);

        let post = inner
            .repository
            .create(NewPost::new(
                media_url,
                asset.kind,
                inner.options.owner_id.clone(),
                caption,
            ))
            .await?;

        Ok(post)
    }

    fn schedule_reset(&self, attempt: u64) {
        let delay = self.inner.options.success_reset_delay;
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            // A newer attempt owns the state now
            if inner.attempt.load(Ordering::Acquire) == attempt
                && inner.state.borrow().state == UploadState::Success
            {
                inner.reset();
            }
        });
    }
}

pub struct UploadOrchestratorBuilder {
    compressor: MediaCompressor,
    uploader: Arc<dyn MediaUploader>,
    repository: Arc<dyn PostRepository>,
    options: UploadOptions,
    feed: Option<FeedQuery>,
}

impl UploadOrchestratorBuilder {
    /// Invalidate this feed after every successful upload
    pub fn feed(mut self, feed: FeedQuery) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn build(self) -> UploadOrchestrator {
        let (state, _) = watch::channel(UploadSnapshot::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        UploadOrchestrator {
            inner: Arc::new(Inner {
                compressor: self.compressor,
                uploader: self.uploader,
                repository: self.repository,
                feed: self.feed,
                options: self.options,
                state,
                events,
                in_flight: AtomicBool::new(false),
                attempt: AtomicU64::new(0),
            }),
        }
    }
}
