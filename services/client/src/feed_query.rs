//! Cached feed of recent posts.
//!
//! The post list lives under a single cache key with a fixed freshness
//! window. Reads inside the window are served from memory; anything else
//! goes to the repository. Concurrent fetches of the key share one request.
//!
//! Entries are tagged with an invalidation generation. A fetch that was
//! already running when the feed was invalidated lands under the old
//! generation and is never served to later reads.

use crate::config::Config;
use crate::post_repository::{NewPost, Post, PostRepository, RepositoryError};
use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Cache key of the post list
pub const FEED_CACHE_KEY: &str = "posts";

/// Feed failures, kept apart from the upload flow so callers can offer a retry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("{0}")]
    Fetch(String),

    #[error("{0}")]
    Mutation(String),
}

/// Tuning for the feed cache
#[derive(Debug, Clone)]
pub struct FeedOptions {
    /// How long fetched data counts as fresh
    pub stale_time: Duration,
    /// Extra attempts after a failed fetch
    pub retry: u32,
    pub retry_delay: Duration,
    /// Posts requested per fetch
    pub limit: usize,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(30),
            retry: 2,
            retry_delay: Duration::from_secs(1),
            limit: crate::post_repository::DEFAULT_LIST_LIMIT,
        }
    }
}

impl From<&Config> for FeedOptions {
    fn from(config: &Config) -> Self {
        Self {
            stale_time: config.stale_time(),
            retry: config.feed.retry,
            retry_delay: config.retry_delay(),
            limit: config.feed.limit,
        }
    }
}

type FeedKey = (&'static str, u64);

/// Cached, revalidating view over [`PostRepository::list`]
#[derive(Clone)]
pub struct FeedQuery {
    repository: Arc<dyn PostRepository>,
    cache: Cache<FeedKey, Arc<Vec<Post>>>,
    generation: Arc<AtomicU64>,
    options: FeedOptions,
}

impl FeedQuery {
    pub fn new(repository: Arc<dyn PostRepository>, options: FeedOptions) -> Self {
        let cache = Cache::builder().time_to_live(options.stale_time).build();

        Self {
            repository,
            cache,
            generation: Arc::new(AtomicU64::new(0)),
            options,
        }
    }

    fn key(&self) -> FeedKey {
        (FEED_CACHE_KEY, self.generation.load(Ordering::Acquire))
    }

    /// Current feed, fetched only when the cached copy is stale or missing
    pub async fn posts(&self) -> Result<Arc<Vec<Post>>, FeedError> {
        self.cache
            .try_get_with(self.key(), self.fetch())
            .await
            .map_err(|e| FeedError::Fetch(e.to_string()))
    }

    /// Whether the next read will hit the repository
    pub fn is_stale(&self) -> bool {
        !self.cache.contains_key(&self.key())
    }

    /// Revalidate because the owning view regained focus
    pub async fn on_focus(&self) -> Result<Arc<Vec<Post>>, FeedError> {
        debug!("Feed focused, revalidating");
        self.refresh().await
    }

    /// Pull-to-refresh: always revalidate
    pub async fn refresh(&self) -> Result<Arc<Vec<Post>>, FeedError> {
        self.invalidate().await;
        self.posts().await
    }

    /// Drop the cached list so the next read revalidates
    pub async fn invalidate(&self) {
        let previous = self.generation.fetch_add(1, Ordering::AcqRel);
        self.cache.invalidate(&(FEED_CACHE_KEY, previous)).await;
        debug!(generation = previous + 1, "Feed cache invalidated");
    }

    /// Create a post and invalidate the feed on success
    pub async fn create_post(&self, post: NewPost) -> Result<Post, FeedError> {
        post.validate()
            .map_err(|e| FeedError::Mutation(e.to_string()))?;

        let created = self
            .repository
            .create(post)
            .await
            .map_err(|e| FeedError::Mutation(e.to_string()))?;
        self.invalidate().await;
        Ok(created)
    }

    /// Delete a post and invalidate the feed on success
    pub async fn delete_post(&self, id: &str) -> Result<(), FeedError> {
        self.repository
            .delete(id)
            .await
            .map_err(|e| FeedError::Mutation(e.to_string()))?;
        self.invalidate().await;
        Ok(())
    }

    #[instrument(skip(self), fields(limit = self.options.limit))]
    async fn fetch(&self) -> Result<Arc<Vec<Post>>, RepositoryError> {
        let mut attempt = 0;
        loop {
            metrics::counter!("snapshare.feed.fetches").increment(1);

            match self.repository.list(self.options.limit).await {
                Ok(posts) => {
                    info!(count = posts.len(), "Feed fetched");
                    return Ok(Arc::new(posts));
                }
                Err(e) if attempt < self.options.retry => {
                    attempt += 1;
                    warn!(error = %e, attempt = attempt, "Feed fetch failed, retrying");
                    tokio::time::sleep(self.options.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaKind;
    use crate::post_repository::{InMemoryPostRepository, MockPostRepository};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory store that counts and slows down list calls
    struct CountingRepository {
        inner: InMemoryPostRepository,
        lists: AtomicUsize,
        delay: Duration,
    }

    impl CountingRepository {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                inner: InMemoryPostRepository::new(),
                lists: AtomicUsize::new(0),
                delay,
            })
        }

        fn list_calls(&self) -> usize {
            self.lists.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PostRepository for CountingRepository {
        async fn create(&self, post: NewPost) -> Result<Post, RepositoryError> {
            self.inner.create(post).await
        }

        async fn list(&self, limit: usize) -> Result<Vec<Post>, RepositoryError> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.inner.list(limit).await
        }

        async fn get_by_id(&self, id: &str) -> Result<Post, RepositoryError> {
            self.inner.get_by_id(id).await
        }

        async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
            self.inner.delete(id).await
        }
    }

    /// Takes its result before sleeping, like a slow response in transit
    struct LaggingRepository {
        inner: InMemoryPostRepository,
        delay: Duration,
    }

    #[async_trait]
    impl PostRepository for LaggingRepository {
        async fn create(&self, post: NewPost) -> Result<Post, RepositoryError> {
            self.inner.create(post).await
        }

        async fn list(&self, limit: usize) -> Result<Vec<Post>, RepositoryError> {
            let posts = self.inner.list(limit).await;
            tokio::time::sleep(self.delay).await;
            posts
        }

        async fn get_by_id(&self, id: &str) -> Result<Post, RepositoryError> {
            self.inner.get_by_id(id).await
        }

        async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
            self.inner.delete(id).await
        }
    }

    fn options(stale_time: Duration) -> FeedOptions {
        FeedOptions {
            stale_time,
            retry: 2,
            retry_delay: Duration::from_millis(1),
            limit: 50,
        }
    }

    fn new_post(url: &str) -> NewPost {
        NewPost::new(url, MediaKind::Image, "demo-user", None)
    }

    #[tokio::test]
    async fn test_fresh_reads_hit_cache() {
        let repo = CountingRepository::new(Duration::ZERO);
        let feed = FeedQuery::new(repo.clone(), options(Duration::from_secs(30)));

        assert!(feed.is_stale());
        assert!(feed.posts().await.unwrap().is_empty());
        assert!(feed.posts().await.unwrap().is_empty());
        assert_eq!(repo.list_calls(), 1);
        assert!(!feed.is_stale());
    }

    #[tokio::test]
    async fn test_stale_reads_refetch() {
        let repo = CountingRepository::new(Duration::ZERO);
        let feed = FeedQuery::new(repo.clone(), options(Duration::from_millis(50)));

        feed.posts().await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        feed.posts().await.unwrap();
        assert_eq!(repo.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_reads_coalesce() {
        let repo = CountingRepository::new(Duration::from_millis(50));
        let feed = FeedQuery::new(repo.clone(), options(Duration::from_secs(30)));

        let reads = (0..8).map(|_| feed.posts());
        let results = futures::future::join_all(reads).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(repo.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_mutations_invalidate() {
        let repo = CountingRepository::new(Duration::ZERO);
        let feed = FeedQuery::new(repo.clone(), options(Duration::from_secs(30)));

        assert!(feed.posts().await.unwrap().is_empty());

        let a = feed.create_post(new_post("file:///a.jpg")).await.unwrap();
        let b = feed.create_post(new_post("file:///b.jpg")).await.unwrap();
        assert!(feed.is_stale());

        let posts = feed.posts().await.unwrap();
        let ids: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec![b.id.as_str(), a.id.as_str()]);

        feed.delete_post(&b.id).await.unwrap();
        assert_eq!(feed.posts().await.unwrap().len(), 1);
        assert_eq!(repo.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_fetch_in_flight_during_mutation_is_not_served() {
        let repo = Arc::new(LaggingRepository {
            inner: InMemoryPostRepository::new(),
            delay: Duration::from_millis(200),
        });
        let feed = FeedQuery::new(repo, options(Duration::from_secs(30)));

        let early_read = {
            let feed = feed.clone();
            tokio::spawn(async move { feed.posts().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let created = feed.create_post(new_post("file:///late.jpg")).await.unwrap();
        assert!(early_read.await.unwrap().unwrap().is_empty());

        assert!(feed.is_stale());
        let posts = feed.posts().await.unwrap();
        assert_eq!(*posts, vec![created]);
        assert!(!feed.is_stale());
    }

    #[tokio::test]
    async fn test_refresh_and_focus_always_refetch() {
        let repo = CountingRepository::new(Duration::ZERO);
        let feed = FeedQuery::new(repo.clone(), options(Duration::from_secs(30)));

        feed.posts().await.unwrap();
        feed.refresh().await.unwrap();
        feed.on_focus().await.unwrap();
        assert_eq!(repo.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_fetch_retries_then_succeeds() {
        let mut repo = MockPostRepository::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        repo.expect_list().times(3).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(RepositoryError::backend("connection reset"))
            } else {
                Ok(Vec::new())
            }
        });

        let feed = FeedQuery::new(Arc::new(repo), options(Duration::from_secs(30)));
        assert!(feed.posts().await.unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_not_cached() {
        let mut repo = MockPostRepository::new();
        repo.expect_list()
            .times(6)
            .returning(|_| Err(RepositoryError::backend("service unavailable")));

        let feed = FeedQuery::new(Arc::new(repo), options(Duration::from_secs(30)));
        assert_eq!(
            feed.posts().await.unwrap_err(),
            FeedError::Fetch("service unavailable".to_string())
        );
        assert!(feed.is_stale());
        assert!(feed.posts().await.is_err());
    }

    #[tokio::test]
    async fn test_inline_video_post_rejected() {
        let mut repo = MockPostRepository::new();
        repo.expect_create().never();

        let feed = FeedQuery::new(Arc::new(repo), options(Duration::from_secs(30)));
        let err = feed
            .create_post(NewPost::new(
                "data:video/mp4;base64,AAAA",
                MediaKind::Video,
                "demo-user",
                None,
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, FeedError::Mutation(_)));
    }

    #[tokio::test]
    async fn test_failed_mutation_keeps_cache() {
        let mut repo = MockPostRepository::new();
        repo.expect_list().times(1).returning(|_| Ok(Vec::new()));
        repo.expect_delete()
            .times(1)
            .returning(|_| Err(RepositoryError::backend("row is locked")));

        let feed = FeedQuery::new(Arc::new(repo), options(Duration::from_secs(30)));
        feed.posts().await.unwrap();

        let err = feed.delete_post("p1").await.unwrap_err();
        assert_eq!(err.to_string(), "row is locked");
        assert!(!feed.is_stale());
    }
}
