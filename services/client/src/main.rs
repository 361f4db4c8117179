use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snapshare_client::media_compression::format_file_size;
use snapshare_client::media_encoder::decode_data_uri;
use snapshare_client::{
    Config, DataUriUploader, FeedOptions, FeedQuery, InMemoryPostRepository, LocalFileSource,
    MediaAsset, MediaCompressor, MediaPicker, PgPostRepository, Post, PostRepository,
    RestPostRepository, TracingAlertSink, UploadOptions, UploadOrchestrator, UploadState,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for the sharing client.
#[derive(Parser, Debug)]
#[command(name = "snapshare")]
#[command(about = "Share photos and videos and browse the feed")]
#[command(version)]
struct Cli {
    /// Keep posts in process memory instead of a backend
    #[arg(long, global = true, conflicts_with = "postgres")]
    offline: bool,

    /// Store posts in PostgreSQL (database.url) instead of the hosted backend
    #[arg(long, global = true)]
    postgres: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pick a file from the library and post it
    Upload {
        path: PathBuf,
        #[arg(short, long)]
        caption: Option<String>,
        /// Treat the file as a video regardless of its extension
        #[arg(long)]
        video: bool,
    },
    /// Post a file as a fresh camera capture
    Capture {
        path: PathBuf,
        #[arg(short, long)]
        caption: Option<String>,
    },
    /// List recent posts, newest first
    Feed {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Show a single post
    Show { id: String },
    /// Delete a post
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level, config.service.log_json);

    info!(service = %config.service.name, "Starting Snapshare client");

    if let Some(port) = config.service.metrics_port {
        init_metrics(port)?;
    }

    let missing = config.missing_backend_settings();
    if !cli.offline && !cli.postgres && !missing.is_empty() {
        error!(
            missing = ?missing,
            "Backend configuration is incomplete, backend calls will fail"
        );
    }

    let repository = build_repository(&cli, &config).await?;

    let mut feed_options = FeedOptions::from(&config);
    if let Command::Feed { limit: Some(limit) } = cli.command {
        feed_options.limit = limit;
    }
    let feed = FeedQuery::new(repository.clone(), feed_options);

    match cli.command {
        Command::Upload {
            path,
            caption,
            video,
        } => {
            let mut source = LocalFileSource::new(path);
            if video {
                source = source.as_video();
            }
            let picker = MediaPicker::new(Arc::new(source), Arc::new(TracingAlertSink));
            let asset = picker.pick_from_gallery().await;
            run_upload(&config, repository, feed, asset, caption).await
        }
        Command::Capture { path, caption } => {
            let picker =
                MediaPicker::new(Arc::new(LocalFileSource::new(path)), Arc::new(TracingAlertSink));
            let asset = picker.pick_from_camera().await;
            run_upload(&config, repository, feed, asset, caption).await
        }
        Command::Feed { .. } => {
            let posts = feed.posts().await.context("Failed to load posts")?;
            if posts.is_empty() {
                println!("No posts yet. Upload a photo or video to get started.");
            }
            for post in posts.iter() {
                print_post(post);
            }
            Ok(())
        }
        Command::Show { id } => {
            let post = repository
                .get_by_id(&id)
                .await
                .context("Failed to load post")?;
            print_post(&post);
            Ok(())
        }
        Command::Delete { id } => {
            feed.delete_post(&id)
                .await
                .context("Failed to delete post")?;
            println!("Deleted {id}");
            Ok(())
        }
    }
}

/// Pick the post store for this run
async fn build_repository(cli: &Cli, config: &Config) -> Result<Arc<dyn PostRepository>> {
    if cli.offline {
        info!("Using in-memory post store");
        return Ok(Arc::new(InMemoryPostRepository::new()));
    }

    if cli.postgres {
        let repository = PgPostRepository::connect(&config.database)
            .await
            .context("Failed to initialize PostgreSQL post store")?;
        return Ok(Arc::new(repository));
    }

    let repository = RestPostRepository::new(&config.backend)
        .context("Failed to initialize REST post store")?;
    Ok(Arc::new(repository))
}

/// Run one upload, printing stage and progress while it is in flight
async fn run_upload(
    config: &Config,
    repository: Arc<dyn PostRepository>,
    feed: FeedQuery,
    asset: Option<MediaAsset>,
    caption: Option<String>,
) -> Result<()> {
    // Cancelled picks and refused permissions end quietly
    let Some(asset) = asset else {
        info!("No media selected");
        return Ok(());
    };

    let orchestrator = UploadOrchestrator::builder(
        MediaCompressor::new(&config.media),
        Arc::new(DataUriUploader::new()),
        repository,
        UploadOptions::from(config),
    )
    .feed(feed)
    .build();

    let mut progress = orchestrator.subscribe();
    let reporter = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let snapshot = progress.borrow_and_update().clone();
            if snapshot.state.is_in_flight() {
                println!(
                    "[{:>3}%] {}",
                    snapshot.progress,
                    snapshot.state.status_message()
                );
            }
        }
    });

    let result = orchestrator.upload(&asset, caption.as_deref()).await;
    reporter.abort();

    match result {
        Ok(post) => {
            println!("{}", UploadState::Success.status_message());
            print_post(&post);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {e}", UploadState::Error.status_message());
            Err(e).context("Upload failed")
        }
    }
}

fn print_post(post: &Post) {
    println!(
        "{}  {}  {:<5}  {}  {}",
        post.id,
        post.created_at.format("%Y-%m-%d %H:%M"),
        post.media_type,
        describe_media(&post.media_url),
        post.caption.as_deref().unwrap_or("")
    );
}

/// Inline media is summarised rather than dumped
fn describe_media(url: &str) -> String {
    match decode_data_uri(url) {
        Some((content_type, bytes)) => {
            format!("{content_type} ({})", format_file_size(bytes.len() as u64))
        }
        None => url.to_string(),
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");
    Ok(())
}
