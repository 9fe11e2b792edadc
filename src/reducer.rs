//! Pure edits over the flat comment list. The list is the source of truth;
//! the forest is rebuilt from it after every change.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::models::{CommentRecord, Id, ThreadNode};

pub fn insert(list: &[CommentRecord], record: CommentRecord, at_front: bool) -> Vec<CommentRecord> {
    let mut out = Vec::with_capacity(list.len() + 1);
    if at_front {
        out.push(record);
        out.extend_from_slice(list);
    } else {
        out.extend_from_slice(list);
        out.push(record);
    }
    out
}

/// Replace the body of `id` and bump its `updated_at`. Borrows the input back
/// unchanged when `id` is absent.
pub fn update_text<'a>(
    list: &'a [CommentRecord],
    id: Id,
    text: &str,
    now: DateTime<Utc>,
) -> Cow<'a, [CommentRecord]> {
    if !list.iter().any(|r| r.id == id) {
        return Cow::Borrowed(list);
    }
    Cow::Owned(
        list.iter()
            .map(|r| {
                if r.id != id {
                    return r.clone();
                }
                let mut r = r.clone();
                r.body = text.to_string();
                r.updated_at = now.max(r.created_at);
                r
            })
            .collect(),
    )
}

/// Remove `id` and every record whose parent chain leads to it.
pub fn remove(list: &[CommentRecord], id: Id) -> Cow<'_, [CommentRecord]> {
    if !list.iter().any(|r| r.id == id) {
        return Cow::Borrowed(list);
    }
    let doomed = subtree_ids(list, id);
    Cow::Owned(list.iter().filter(|r| !doomed.contains(&r.id)).cloned().collect())
}

/// `id` plus all of its transitive replies within `list`.
pub fn subtree_ids(list: &[CommentRecord], id: Id) -> HashSet<Id> {
    let mut children: HashMap<Id, Vec<Id>> = HashMap::new();
    for r in list {
        if let Some(p) = r.parent_id {
            if p != r.id {
                children.entry(p).or_default().push(r.id);
            }
        }
    }
    let mut out = HashSet::new();
    let mut stack = vec![id];
    while let Some(cur) = stack.pop() {
        if out.insert(cur) {
            if let Some(kids) = children.get(&cur) {
                stack.extend(kids.iter().copied());
            }
        }
    }
    out
}

/// Total number of comments at every depth.
pub trait CountAll {
    fn count_all(&self) -> usize;
}

impl CountAll for [CommentRecord] {
    fn count_all(&self) -> usize {
        self.len()
    }
}

impl CountAll for Vec<CommentRecord> {
    fn count_all(&self) -> usize {
        self.len()
    }
}

impl CountAll for ThreadNode {
    fn count_all(&self) -> usize {
        1 + self.reply_count()
    }
}

impl CountAll for [ThreadNode] {
    fn count_all(&self) -> usize {
        self.iter().map(CountAll::count_all).sum()
    }
}

impl CountAll for Vec<ThreadNode> {
    fn count_all(&self) -> usize {
        self.as_slice().count_all()
    }
}

pub fn count_all<T: CountAll + ?Sized>(items: &T) -> usize {
    items.count_all()
}
