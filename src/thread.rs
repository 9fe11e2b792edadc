//! Turns the flat comment list into a reply forest, and orders/filters that
//! forest for display.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::{AuthorSnapshot, CommentRecord, Id, ThreadNode};

/// Who we can fall back to when a record arrives without an author snapshot.
#[derive(Debug, Clone, Default)]
pub struct AuthorContext {
    pub session_user: Option<AuthorSnapshot>,
    pub subject_owner: Option<AuthorSnapshot>,
}

impl AuthorContext {
    pub fn resolve(&self, record: &CommentRecord) -> AuthorSnapshot {
        if let Some(author) = &record.author {
            return author.clone();
        }
        if let Some(me) = self.session_user.as_ref().filter(|u| u.id == record.author_id) {
            return me.clone();
        }
        if let Some(owner) = self.subject_owner.as_ref().filter(|u| u.id == record.author_id) {
            return owner.clone();
        }
        AuthorSnapshot::placeholder(record.author_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityIssue {
    MissingParent,
    SelfParent,
    Cycle,
    DuplicateId,
}

/// A record that could not be placed where its `parent_id` says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityWarning {
    pub id: Id,
    pub parent_id: Option<Id>,
    pub issue: IntegrityIssue,
}

#[derive(Debug, Clone, Default)]
pub struct ForestBuild {
    pub forest: Vec<ThreadNode>,
    pub warnings: Vec<IntegrityWarning>,
}

/// Build the forest and log anything that had to be demoted to the top level.
pub fn build_forest(records: &[CommentRecord], authors: &AuthorContext) -> Vec<ThreadNode> {
    let build = build_forest_report(records, authors);
    for w in &build.warnings {
        warn!(comment_id = w.id, parent_id = ?w.parent_id, issue = ?w.issue, "comment thread data-quality issue");
        metrics::increment_counter!("quill_integrity_warnings");
    }
    build.forest
}

/// Two passes: index every record, then hang each one under its parent or
/// demote it to the top level.
pub fn build_forest_report(records: &[CommentRecord], authors: &AuthorContext) -> ForestBuild {
    let mut warnings = Vec::new();

    // pass 1: id -> record, keeping the last copy of a duplicated id
    let mut by_id: HashMap<Id, &CommentRecord> = HashMap::with_capacity(records.len());
    let mut order: Vec<Id> = Vec::with_capacity(records.len());
    for r in records {
        if by_id.insert(r.id, r).is_some() {
            warnings.push(IntegrityWarning { id: r.id, parent_id: r.parent_id, issue: IntegrityIssue::DuplicateId });
        } else {
            order.push(r.id);
        }
    }

    // effective parent of every record, None = top level
    let mut parent_of: HashMap<Id, Option<Id>> = HashMap::with_capacity(order.len());
    for id in &order {
        let r = by_id[id];
        let parent = match r.parent_id {
            None => None,
            Some(p) if p == r.id => {
                warnings.push(IntegrityWarning { id: r.id, parent_id: r.parent_id, issue: IntegrityIssue::SelfParent });
                None
            }
            Some(p) if !by_id.contains_key(&p) => {
                warnings.push(IntegrityWarning { id: r.id, parent_id: r.parent_id, issue: IntegrityIssue::MissingParent });
                None
            }
            Some(p) if on_cycle(r.id, &by_id) => {
                warnings.push(IntegrityWarning { id: r.id, parent_id: Some(p), issue: IntegrityIssue::Cycle });
                None
            }
            Some(p) => Some(p),
        };
        parent_of.insert(r.id, parent);
    }

    // pass 2: attach
    let mut children_of: HashMap<Id, Vec<Id>> = HashMap::new();
    let mut roots = Vec::new();
    for id in &order {
        match parent_of[id] {
            Some(p) => children_of.entry(p).or_default().push(*id),
            None => roots.push(*id),
        }
    }

    let forest = roots
        .into_iter()
        .map(|id| assemble(id, &by_id, &mut children_of, authors))
        .collect();
    ForestBuild { forest, warnings }
}

// Walks the raw parent chain from `start`; true if it comes back to `start`.
fn on_cycle(start: Id, by_id: &HashMap<Id, &CommentRecord>) -> bool {
    let mut seen = HashSet::new();
    let mut cur = start;
    while let Some(next) = by_id.get(&cur).and_then(|r| r.parent_id) {
        if next == start {
            return true;
        }
        if !seen.insert(next) {
            return false;
        }
        cur = next;
    }
    false
}

fn assemble(
    id: Id,
    by_id: &HashMap<Id, &CommentRecord>,
    children_of: &mut HashMap<Id, Vec<Id>>,
    authors: &AuthorContext,
) -> ThreadNode {
    let record = by_id[&id];
    let child_ids = children_of.remove(&id).unwrap_or_default();
    let mut children: Vec<ThreadNode> = child_ids
        .into_iter()
        .map(|c| assemble(c, by_id, children_of, authors))
        .collect();
    children.sort_by(|a, b| chronological(&a.comment, &b.comment));
    ThreadNode { comment: record.clone(), author: authors.resolve(record), children }
}

fn chronological(a: &CommentRecord, b: &CommentRecord) -> std::cmp::Ordering {
    a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id))
}

/// Root ordering of a forest. Replies are always oldest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Newest,
    Oldest,
    Popular,
}

impl std::str::FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newest" => Ok(SortKey::Newest),
            "oldest" => Ok(SortKey::Oldest),
            "popular" => Ok(SortKey::Popular),
            other => Err(format!("unknown sort key '{other}'")),
        }
    }
}

pub fn sort_roots(forest: &mut [ThreadNode], key: SortKey) {
    match key {
        SortKey::Newest => forest.sort_by(|a, b| chronological(&b.comment, &a.comment)),
        SortKey::Oldest => forest.sort_by(|a, b| chronological(&a.comment, &b.comment)),
        SortKey::Popular => forest.sort_by(|a, b| {
            b.reply_count()
                .cmp(&a.reply_count())
                .then_with(|| chronological(&b.comment, &a.comment))
        }),
    }
}

/// Keep nodes that match `term` (body, handle or display name, case-insensitive)
/// plus the ancestors needed to reach them. A blank term keeps everything.
pub fn filter_forest(forest: Vec<ThreadNode>, term: &str) -> Vec<ThreadNode> {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return forest;
    }
    forest.into_iter().filter_map(|n| retain_matching(n, &needle)).collect()
}

fn retain_matching(mut node: ThreadNode, needle: &str) -> Option<ThreadNode> {
    let hit = node_matches(&node, needle);
    node.children = std::mem::take(&mut node.children)
        .into_iter()
        .filter_map(|c| retain_matching(c, needle))
        .collect();
    if hit || !node.children.is_empty() { Some(node) } else { None }
}

fn node_matches(node: &ThreadNode, needle: &str) -> bool {
    node.comment.body.to_lowercase().contains(needle)
        || node.author.handle.to_lowercase().contains(needle)
        || node.author.display_name().to_lowercase().contains(needle)
}

/// Depth-first lookup over roots and nested replies.
pub fn find_node(forest: &[ThreadNode], id: Id) -> Option<&ThreadNode> {
    forest.iter().find_map(|n| {
        if n.id() == id { Some(n) } else { find_node(&n.children, id) }
    })
}

/// Pre-order flattening.
pub fn flatten(forest: &[ThreadNode]) -> Vec<&CommentRecord> {
    let mut out = Vec::new();
    fn walk<'a>(nodes: &'a [ThreadNode], out: &mut Vec<&'a CommentRecord>) {
        for n in nodes {
            out.push(&n.comment);
            walk(&n.children, out);
        }
    }
    walk(forest, &mut out);
    out
}
