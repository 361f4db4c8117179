use crate::config::DatabaseConfig;
use crate::media::MediaKind;
use crate::post_repository::{NewPost, Post, PostRepository, RepositoryError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Row as stored in the `posts` table
#[derive(Debug, Clone, FromRow)]
struct PostRow {
    id: Uuid,
    user_id: String,
    media_url: String,
    media_type: String,
    caption: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PostRow> for Post {
    type Error = RepositoryError;

    fn try_from(row: PostRow) -> Result<Self, Self::Error> {
        let media_type: MediaKind = row.media_type.parse().map_err(RepositoryError::backend)?;

        Ok(Post {
            id: row.id.to_string(),
            user_id: row.user_id,
            media_url: row.media_url,
            media_type,
            caption: row.caption,
            created_at: row.created_at,
        })
    }
}

fn db_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::backend(e.to_string())
}

/// Post repository backed by a self-hosted PostgreSQL database
pub struct PgPostRepository {
    pool: PgPool,
}

impl PgPostRepository {
    /// Create a new repository with its own connection pool
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await
            .map_err(db_error)?;

        info!("Connected to PostgreSQL database");

        let repository = Self { pool };
        if config.run_migrations {
            repository.run_migrations().await?;
        }
        Ok(repository)
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<(), RepositoryError> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::backend(e.to_string()))?;

        info!("Database migrations completed");
        Ok(())
    }
}

/// Non-UUID identifiers cannot exist in this store
fn parse_id(id: &str) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(id).map_err(|_| RepositoryError::NotFound(id.to_string()))
}

#[async_trait]
impl PostRepository for PgPostRepository {
    #[instrument(skip(self, post), fields(user_id = %post.user_id, media_type = %post.media_type))]
    async fn create(&self, post: NewPost) -> Result<Post, RepositoryError> {
        post.validate()?;

        let row = sqlx::query_as::<_, PostRow>(
            r#"
            INSERT INTO posts (id, user_id, media_url, media_type, caption, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING id, user_id, media_url, media_type, caption, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&post.user_id)
        .bind(&post.media_url)
        .bind(post.media_type.as_str())
        .bind(&post.caption)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        debug!(post_id = %row.id, "Post inserted");
        row.try_into()
    }

    #[instrument(skip(self))]
    async fn list(&self, limit: usize) -> Result<Vec<Post>, RepositoryError> {
        let rows = sqlx::query_as::<_, PostRow>(
            r#"
            SELECT id, user_id, media_url, media_type, caption, created_at
            FROM posts
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(Post::try_from).collect()
    }

    async fn get_by_id(&self, id: &str) -> Result<Post, RepositoryError> {
        let row = sqlx::query_as::<_, PostRow>(
            r#"
            SELECT id, user_id, media_url, media_type, caption, created_at
            FROM posts
            WHERE id = $1
            "#,
        )
        .bind(parse_id(id)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.ok_or_else(|| RepositoryError::NotFound(id.to_string()))?
            .try_into()
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(parse_id(id)?)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        debug!(rows = result.rows_affected(), "Post deleted");
        Ok(())
    }
}
