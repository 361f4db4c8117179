use crate::media::MediaKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Default number of posts returned by a list call
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Fallback message when the backend gives no usable detail
pub const UNEXPECTED_ERROR: &str = "An unexpected error occurred";

/// A published post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Opaque post identifier
    pub id: String,
    /// Placeholder owner identifier
    pub user_id: String,
    /// Data URI or local/remote media reference
    pub media_url: String,
    pub media_type: MediaKind,
    #[serde(default)]
    pub caption: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Post {
    /// Inlined `data:` media must be an image
    pub fn media_is_consistent(&self) -> bool {
        !self.media_url.starts_with("data:") || self.media_type == MediaKind::Image
    }
}

/// Fields supplied when creating a post
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewPost {
    pub user_id: String,
    pub media_url: String,
    pub media_type: MediaKind,
    pub caption: Option<String>,
}

impl NewPost {
    /// Build a new post; an empty caption is stored as none
    pub fn new(
        media_url: impl Into<String>,
        media_type: MediaKind,
        user_id: impl Into<String>,
        caption: Option<&str>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            media_url: media_url.into(),
            media_type,
            caption: caption.filter(|c| !c.is_empty()).map(String::from),
        }
    }

    /// Inlined `data:` media must be an image
    pub fn validate(&self) -> Result<(), RepositoryError> {
        if self.media_url.starts_with("data:") && self.media_type != MediaKind::Image {
            return Err(RepositoryError::Invalid(format!(
                "Inline media must be an image, got {}",
                self.media_type
            )));
        }
        Ok(())
    }
}

/// Repository failures, each carrying a single human-readable message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("Post not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    Backend(String),
}

impl RepositoryError {
    /// Build a backend error, falling back to a generic message when empty
    pub fn backend(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.trim().is_empty() {
            Self::Backend(UNEXPECTED_ERROR.to_string())
        } else {
            Self::Backend(message)
        }
    }
}

/// Storage for post records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PostRepository: Send + Sync {
    async fn create(&self, post: NewPost) -> Result<Post, RepositoryError>;

    /// Newest posts first, at most `limit`
    async fn list(&self, limit: usize) -> Result<Vec<Post>, RepositoryError>;

    async fn get_by_id(&self, id: &str) -> Result<Post, RepositoryError>;

    async fn delete(&self, id: &str) -> Result<(), RepositoryError>;
}

/// Process-local repository used for offline runs and tests
#[derive(Debug, Default)]
pub struct InMemoryPostRepository {
    posts: RwLock<Vec<Post>>,
    failure: RwLock<Option<String>>,
}

impl InMemoryPostRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail with `message`, or clear with `None`
    pub async fn set_failure(&self, message: Option<&str>) {
        *self.failure.write().await = message.map(String::from);
    }

    pub async fn len(&self) -> usize {
        self.posts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.posts.read().await.is_empty()
    }

    async fn check_failure(&self) -> Result<(), RepositoryError> {
        match self.failure.read().await.as_ref() {
            Some(message) => Err(RepositoryError::backend(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PostRepository for InMemoryPostRepository {
    #[instrument(skip(self, post), fields(user_id = %post.user_id, media_type = %post.media_type))]
    async fn create(&self, post: NewPost) -> Result<Post, RepositoryError> {
        post.validate()?;
        self.check_failure().await?;

        let post = Post {
            id: Uuid::new_v4().to_string(),
            user_id: post.user_id,
            media_url: post.media_url,
            media_type: post.media_type,
            caption: post.caption,
            created_at: Utc::now(),
        };
        self.posts.write().await.push(post.clone());

        debug!(post_id = %post.id, "Post stored in memory");
        Ok(post)
    }

    async fn list(&self, limit: usize) -> Result<Vec<Post>, RepositoryError> {
        self.check_failure().await?;

        // Newest insertions first so equal timestamps keep creation order
        let mut posts: Vec<Post> = self.posts.read().await.iter().rev().cloned().collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        posts.truncate(limit);
        Ok(posts)
    }

    async fn get_by_id(&self, id: &str) -> Result<Post, RepositoryError> {
        self.check_failure().await?;

        self.posts
            .read()
            .await
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        self.check_failure().await?;

        self.posts.write().await.retain(|p| p.id != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_post(url: &str) -> NewPost {
        NewPost::new(url, MediaKind::Image, "demo-user", None)
    }

    #[tokio::test]
    async fn test_list_empty_store() {
        let repo = InMemoryPostRepository::new();
        assert!(repo.list(DEFAULT_LIST_LIMIT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let repo = InMemoryPostRepository::new();
        let a = repo.create(image_post("data:image/jpeg;base64,QQ==")).await.unwrap();
        let b = repo.create(image_post("data:image/jpeg;base64,Qg==")).await.unwrap();

        let ids: Vec<String> = repo
            .list(DEFAULT_LIST_LIMIT)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }

    #[tokio::test]
    async fn test_list_respects_limit() {
        let repo = InMemoryPostRepository::new();
        for i in 0..5 {
            repo.create(image_post(&format!("file:///{i}.jpg"))).await.unwrap();
        }
        assert_eq!(repo.list(3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_get_and_delete() {
        let repo = InMemoryPostRepository::new();
        let post = repo
            .create(NewPost::new("file:///clip.mp4", MediaKind::Video, "u1", Some("  beach  ")))
            .await
            .unwrap();

        let fetched = repo.get_by_id(&post.id).await.unwrap();
        assert_eq!(fetched.caption.as_deref(), Some("  beach  "));

        tokio_test::assert_ok!(repo.delete(&post.id).await);
        assert_eq!(
            repo.get_by_id(&post.id).await.unwrap_err(),
            RepositoryError::NotFound(post.id.clone())
        );
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_failure_injection_keeps_existing_posts() {
        let repo = InMemoryPostRepository::new();
        repo.create(image_post("file:///a.jpg")).await.unwrap();

        repo.set_failure(Some("insert violates row-level security policy")).await;
        let err = tokio_test::assert_err!(repo.create(image_post("file:///b.jpg")).await);
        assert_eq!(err.to_string(), "insert violates row-level security policy");

        repo.set_failure(None).await;
        assert_eq!(repo.len().await, 1);
    }

    #[test]
    fn test_empty_caption_dropped() {
        assert_eq!(image_post("x").caption, None);
        assert_eq!(NewPost::new("x", MediaKind::Image, "u", Some("")).caption, None);
        assert_eq!(
            NewPost::new("x", MediaKind::Image, "u", Some("   ")).caption.as_deref(),
            Some("   ")
        );
    }

    #[tokio::test]
    async fn test_inline_video_rejected_on_create() {
        let repo = InMemoryPostRepository::new();
        let err = repo
            .create(NewPost::new(
                "data:video/mp4;base64,AAAA",
                MediaKind::Video,
                "u1",
                None,
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, RepositoryError::Invalid(_)));
        assert!(repo.is_empty().await);
        assert!(NewPost::new("file:///clip.mp4", MediaKind::Video, "u1", None)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_backend_error_fallback_message() {
        assert_eq!(RepositoryError::backend("").to_string(), UNEXPECTED_ERROR);
        assert_eq!(RepositoryError::backend("boom").to_string(), "boom");
    }

    #[test]
    fn test_post_wire_format() {
        let json = r#"{
            "id": "7d5c0a5e-2f7b-4a59-9b0e-3c1f3f5d2a10",
            "user_id": "demo-user-1700000000000",
            "media_url": "data:image/jpeg;base64,AAAA",
            "media_type": "image",
            "caption": null,
            "created_at": "2024-01-15T10:30:00.123456+00:00"
        }"#;

        let post: Post = serde_json::from_str(json).unwrap();
        assert_eq!(post.media_type, MediaKind::Image);
        assert!(post.caption.is_none());
        assert!(post.media_is_consistent());

        let video = Post {
            media_type: MediaKind::Video,
            ..post
        };
        assert!(!video.media_is_consistent());
    }
}
