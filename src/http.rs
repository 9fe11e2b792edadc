use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use crate::api::{ApiResult, CommentApi};
use crate::cache::RequestCache;
use crate::config::ApiConfig;
use crate::error::{ApiError, ApiErrorBody};
use crate::models::*;

#[derive(Serialize)]
struct CreateBody<'a> {
    body: &'a str,
    parent_id: Option<Id>,
    reply_to: Option<&'a str>,
}

#[derive(Serialize)]
struct UpdateBody<'a> {
    body: &'a str,
}

/// `CommentApi` over the backend's JSON API. Comment pages are cached for
/// the configured TTL and dropped whenever the subject is written to.
#[derive(Clone)]
pub struct HttpCommentApi {
    client: Client,
    cfg: ApiConfig,
    cache: RequestCache<CommentPage>,
}

impl HttpCommentApi {
    pub fn new(cfg: ApiConfig) -> Self {
        Self::with_client(Client::new(), cfg)
    }

    pub fn with_client(client: Client, cfg: ApiConfig) -> Self {
        let cache = RequestCache::new(cfg.cache_ttl);
        debug!(base = %cfg.base_url, ttl = ?cache.ttl(), "comment api client ready");
        Self { client, cfg, cache }
    }

    pub fn cache(&self) -> &RequestCache<CommentPage> {
        &self.cache
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.cfg.base_url, path)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.cfg.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }

    fn list_path(subject_id: Id) -> String {
        format!("/posts/{subject_id}/comments")
    }

    async fn send(&self, req: RequestBuilder) -> ApiResult<Response> {
        let resp = self.authed(req).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&text)
            .ok()
            .map(|b| b.error)
            .filter(|m| !m.trim().is_empty());
        warn!(status = status.as_u16(), message = message.as_deref().unwrap_or(""), "comment backend rejected request");
        Err(match status {
            StatusCode::NOT_FOUND => ApiError::NotFound(message),
            StatusCode::CONFLICT => ApiError::Conflict(message),
            _ => ApiError::Rejected { status: status.as_u16(), message: message.unwrap_or_default() },
        })
    }
}

#[async_trait]
impl CommentApi for HttpCommentApi {
    async fn fetch_comments(&self, subject_id: Id, page: u32, per_page: u32) -> ApiResult<CommentPage> {
        let path = Self::list_path(subject_id);
        let key = format!("{path}?page={page}&per_page={per_page}");
        if let Some(hit) = self.cache.get(&key) {
            debug!(%key, "comment page served from cache");
            return Ok(hit);
        }
        let req = self.client.get(self.url(&path)).query(&[("page", page), ("per_page", per_page)]);
        let body: CommentPage = self.send(req).await?.json().await?;
        self.cache.set(key, body.clone());
        Ok(body)
    }

    async fn create_comment(&self, subject_id: Id, new: NewComment) -> ApiResult<CommentRecord> {
        let path = Self::list_path(subject_id);
        let payload = CreateBody { body: &new.body, parent_id: new.parent_id, reply_to: new.reply_to.as_deref() };
        let req = self.client.post(self.url(&path)).json(&payload);
        let record: CommentRecord = self.send(req).await?.json().await?;
        self.cache.invalidate(Some(&path));
        Ok(record)
    }

    async fn update_comment(&self, id: Id, body: &str) -> ApiResult<UpdateConfirmation> {
        let req = self.client.patch(self.url(&format!("/comments/{id}"))).json(&UpdateBody { body });
        let confirmed: UpdateConfirmation = self.send(req).await?.json().await?;
        // the subject isn't known here, so every cached page may be stale
        self.cache.invalidate(None);
        Ok(confirmed)
    }

    async fn delete_comment(&self, subject_id: Id, id: Id) -> ApiResult<()> {
        let path = Self::list_path(subject_id);
        let req = self.client.delete(self.url(&format!("{path}/{id}")));
        self.send(req).await?;
        self.cache.invalidate(Some(&path));
        Ok(())
    }
}
