use crate::config::BackendConfig;
use crate::post_repository::{NewPost, Post, PostRepository, RepositoryError, UNEXPECTED_ERROR};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, instrument};

/// Post repository speaking to a hosted REST backend (PostgREST dialect).
///
/// Every request carries the anonymous key both as `apikey` and as a bearer
/// token. Errors are reduced to the backend's `message` field.
pub struct RestPostRepository {
    client: Client,
    endpoint: String,
    anon_key: String,
}

impl RestPostRepository {
    pub fn new(config: &BackendConfig) -> Result<Self, RepositoryError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| RepositoryError::backend(e.to_string()))?;

        let endpoint = format!(
            "{}/rest/v1/{}",
            config.url.trim_end_matches('/'),
            config.posts_table
        );

        info!(endpoint = %endpoint, "REST post repository initialized");

        Ok(Self {
            client,
            endpoint,
            anon_key: config.anon_key.clone(),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RepositoryError> {
        let response = self.authorized(request).send().await.map_err(|e| {
            error!(error = %e, "Backend request failed");
            RepositoryError::backend(e.to_string())
        })?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body);
        error!(status = %status, message = %message, "Backend returned an error");
        Err(RepositoryError::backend(message))
    }

    async fn rows<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Vec<T>, RepositoryError> {
        self.send(request)
            .await?
            .json::<Vec<T>>()
            .await
            .map_err(|e| RepositoryError::backend(e.to_string()))
    }
}

/// Extract the human-readable part of a backend error body
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| UNEXPECTED_ERROR.to_string())
}

#[async_trait]
impl PostRepository for RestPostRepository {
    #[instrument(skip(self, post), fields(user_id = %post.user_id, media_type = %post.media_type))]
    async fn create(&self, post: NewPost) -> Result<Post, RepositoryError> {
        post.validate()?;

        let request = self
            .client
            .post(&self.endpoint)
            .header("Prefer", "return=representation")
            .json(&post);

        let created = self
            .rows::<Post>(request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RepositoryError::backend("Insert returned no rows"))?;

        debug!(post_id = %created.id, "Post created");
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn list(&self, limit: usize) -> Result<Vec<Post>, RepositoryError> {
        let request = self.client.get(&self.endpoint).query(&[
            ("select", "*".to_string()),
            ("order", "created_at.desc".to_string()),
            ("limit", limit.to_string()),
        ]);

        self.rows(request).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Post, RepositoryError> {
        let request = self
            .client
            .get(&self.endpoint)
            .query(&[("select", "*".to_string()), ("id", format!("eq.{id}"))]);

        self.rows::<Post>(request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        let request = self
            .client
            .delete(&self.endpoint)
            .query(&[("id", format!("eq.{id}"))]);

        self.send(request).await?;
        debug!(post_id = %id, "Post deleted");
        Ok(())
    }
}
