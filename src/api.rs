use async_trait::async_trait;

use crate::error::ApiError;
use crate::models::*;

pub type ApiResult<T> = Result<T, ApiError>;

/// The backend operations the comment engine depends on.
#[async_trait]
pub trait CommentApi: Send + Sync {
    async fn fetch_comments(&self, subject_id: Id, page: u32, per_page: u32) -> ApiResult<CommentPage>;
    async fn create_comment(&self, subject_id: Id, new: NewComment) -> ApiResult<CommentRecord>;
    async fn update_comment(&self, id: Id, body: &str) -> ApiResult<UpdateConfirmation>;
    async fn delete_comment(&self, subject_id: Id, id: Id) -> ApiResult<()>;
}

#[cfg(feature = "inmem-api")]
pub mod inmem {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, RwLock};

    use chrono::Utc;

    use crate::reducer::subtree_ids;

    #[derive(Default)]
    struct State {
        comments: HashMap<Id, CommentRecord>,
        next_id: Id,
    }

    /// Process-local backend: newest-first pages, ids and timestamps assigned
    /// on create, every new comment authored by `viewer`.
    #[derive(Clone)]
    pub struct InMemCommentApi {
        state: Arc<RwLock<State>>,
        viewer: AuthorSnapshot,
    }

    impl InMemCommentApi {
        pub fn new(viewer: AuthorSnapshot) -> Self {
            Self { state: Arc::new(RwLock::new(State::default())), viewer }
        }

        fn next_id(state: &mut State) -> Id {
            state.next_id += 1;
            state.next_id
        }

        fn read(&self) -> ApiResult<std::sync::RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| ApiError::Transport("state lock poisoned".into()))
        }

        fn write(&self) -> ApiResult<std::sync::RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| ApiError::Transport("state lock poisoned".into()))
        }

        /// Store an existing record as-is (ids above it stay free for new comments).
        pub fn seed(&self, record: CommentRecord) -> ApiResult<()> {
            let mut s = self.write()?;
            s.next_id = s.next_id.max(record.id);
            s.comments.insert(record.id, record);
            Ok(())
        }

        pub fn len(&self) -> usize {
            self.read().map(|s| s.comments.len()).unwrap_or(0)
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        pub fn get(&self, id: Id) -> Option<CommentRecord> {
            self.read().ok().and_then(|s| s.comments.get(&id).cloned())
        }
    }

    #[async_trait]
    impl CommentApi for InMemCommentApi {
        async fn fetch_comments(&self, subject_id: Id, page: u32, per_page: u32) -> ApiResult<CommentPage> {
            let s = self.read()?;
            let mut v: Vec<_> = s.comments
                .values()
                .filter(|c| c.subject_id == subject_id)
                .cloned()
                .collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id))); // newest first
            let per_page = per_page.max(1) as usize;
            let start = (page.max(1) as usize - 1) * per_page;
            let total = v.len();
            let comments: Vec<_> = v.into_iter().skip(start).take(per_page).collect();
            Ok(CommentPage {
                comments,
                pagination: Pagination {
                    has_next: start + per_page < total,
                    page: Some(page),
                    total: Some(total as u64),
                },
            })
        }

        async fn create_comment(&self, subject_id: Id, new: NewComment) -> ApiResult<CommentRecord> {
            let mut s = self.write()?;
            if let Some(parent) = new.parent_id {
                match s.comments.get(&parent) {
                    Some(p) if p.subject_id == subject_id => {}
                    _ => return Err(ApiError::NotFound(None)),
                }
            }
            let id = Self::next_id(&mut s);
            let now = Utc::now();
            let record = CommentRecord {
                id,
                author_id: self.viewer.id,
                subject_id,
                body: new.body,
                parent_id: new.parent_id,
                created_at: now,
                updated_at: now,
                author: Some(self.viewer.clone()),
            };
            s.comments.insert(id, record.clone());
            Ok(record)
        }

        async fn update_comment(&self, id: Id, body: &str) -> ApiResult<UpdateConfirmation> {
            let mut s = self.write()?;
            let c = s.comments.get_mut(&id).ok_or(ApiError::NotFound(None))?;
            c.body = body.to_string();
            c.updated_at = Utc::now().max(c.created_at);
            Ok(UpdateConfirmation { body: c.body.clone(), updated_at: c.updated_at })
        }

        async fn delete_comment(&self, subject_id: Id, id: Id) -> ApiResult<()> {
            let mut s = self.write()?;
            match s.comments.get(&id) {
                Some(c) if c.subject_id == subject_id => {}
                _ => return Err(ApiError::NotFound(None)),
            }
            let all: Vec<CommentRecord> = s.comments.values().cloned().collect();
            for gone in subtree_ids(&all, id) {
                s.comments.remove(&gone);
            }
            Ok(())
        }
    }
}
