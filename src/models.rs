use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Id = i64;

/// Avatar reference used when nothing better is known about an author.
pub const DEFAULT_AVATAR: &str = "default-avatar";
pub const UNKNOWN_HANDLE: &str = "Unknown User";

/// Denormalized author display data carried alongside a comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorSnapshot {
    pub id: Id,
    pub handle: String,
    #[serde(default)]
    pub display_name_parts: Vec<String>,
    #[serde(default)]
    pub avatar_ref: Option<String>,
}

impl AuthorSnapshot {
    pub fn placeholder(id: Id) -> Self {
        Self {
            id,
            handle: UNKNOWN_HANDLE.to_string(),
            display_name_parts: Vec::new(),
            avatar_ref: Some(DEFAULT_AVATAR.to_string()),
        }
    }

    /// Display name built from its parts, falling back to the handle.
    pub fn display_name(&self) -> String {
        let joined = self
            .display_name_parts
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if joined.is_empty() { self.handle.clone() } else { joined }
    }
}

/// A comment exactly as the backend delivers it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: Id,
    pub author_id: Id,
    pub subject_id: Id,
    pub body: String,
    #[serde(default)]
    pub parent_id: Option<Id>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub author: Option<AuthorSnapshot>, // may be missing on the wire
}

/// A comment with its resolved author and direct replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadNode {
    pub comment: CommentRecord,
    pub author: AuthorSnapshot,
    pub children: Vec<ThreadNode>,
}

impl ThreadNode {
    pub fn id(&self) -> Id {
        self.comment.id
    }

    /// Number of replies below this node, at every depth.
    pub fn reply_count(&self) -> usize {
        self.children.iter().map(|c| 1 + c.reply_count()).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub has_next: bool,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub total: Option<u64>,
}

/// One page of `fetch_comments`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentPage {
    #[serde(alias = "records", alias = "data")]
    pub comments: Vec<CommentRecord>,
    #[serde(default)]
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewComment {
    pub body: String,
    pub parent_id: Option<Id>,
    pub reply_to: Option<String>, // handle of the comment being answered
}

/// Server confirmation of an edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateConfirmation {
    pub body: String,
    pub updated_at: DateTime<Utc>,
}
