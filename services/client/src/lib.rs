//! Snapshare Client
//!
//! Photo and video sharing client. A picked or captured asset is compressed,
//! encoded into a storable media reference and persisted as a post; the feed
//! of recent posts is served through a short-lived cache.
//!
//! ## Features
//!
//! - **Media Capture**: Library and camera picks with permission handling;
//!   failures become user alerts, cancellation is silent
//! - **Compression**: Images are downscaled to a bounded long edge and
//!   re-encoded as JPEG; failures fall back to the original file
//! - **Upload Pipeline**: One upload at a time, observable stage and
//!   progress, automatic return to idle after success
//! - **Post Storage**: Hosted REST backend, self-hosted PostgreSQL, or an
//!   in-memory store
//! - **Feed Cache**: 30 second freshness window, coalesced fetches,
//!   invalidation on every mutation
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Media        │     │ Media        │     │ Media        │
//! │ Picker       │────▶│ Compressor   │────▶│ Uploader     │
//! └──────────────┘     └──────────────┘     └──────────────┘
//!        │                    ▲                    │
//!        │ MediaAsset         │                    │ media URL
//!        ▼                    │                    ▼
//! ┌──────────────────────────────────┐      ┌──────────────┐
//! │ Upload Orchestrator              │─────▶│ Post         │
//! │ idle→compressing→uploading→      │      │ Repository   │
//! │ saving→success | error           │      └──────────────┘
//! └──────────────────────────────────┘             ▲
//!        │ invalidate                              │ list
//!        ▼                                         │
//! ┌──────────────┐                                 │
//! │ Feed Query   │─────────────────────────────────┘
//! │ (moka cache) │
//! └──────────────┘
//! ```

pub mod config;
pub mod feed_query;
pub mod media;
pub mod media_compression;
pub mod media_encoder;
pub mod media_picker;
pub mod pg_repository;
pub mod post_repository;
pub mod rest_repository;
pub mod upload_orchestrator;

pub use config::Config;
pub use feed_query::{FeedError, FeedOptions, FeedQuery};
pub use media::{MediaAsset, MediaKind};
pub use media_compression::MediaCompressor;
pub use media_encoder::{DataUriUploader, EncodeError, MediaUploader};
pub use media_picker::{AlertSink, LocalFileSource, MediaPicker, MediaSource, TracingAlertSink};
pub use pg_repository::PgPostRepository;
pub use post_repository::{InMemoryPostRepository, NewPost, Post, PostRepository, RepositoryError};
pub use rest_repository::RestPostRepository;
pub use upload_orchestrator::{
    UploadError, UploadOptions, UploadOrchestrator, UploadSnapshot, UploadState,
};
