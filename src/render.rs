//! Presentation adapter: walks the forest once, with depth and reply limits as
//! explicit parameters.

use std::collections::HashSet;

use crate::models::{Id, ThreadNode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    /// Deeper replies collapse into a "continue thread" line.
    pub max_depth: usize,
    /// Replies shown per node before a "show more" line; `expanded` nodes show all.
    pub visible_replies: usize,
    pub expanded: HashSet<Id>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self { max_depth: 4, visible_replies: 3, expanded: HashSet::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Reply,
    Edit,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    Comment { author: String, body: String },
    Actions(Vec<Action>),
    ShowMore { hidden: usize },
    ContinueThread { hidden: usize },
}

/// One output line, anchored at the comment it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedLine {
    pub id: Id,
    pub depth: usize,
    pub kind: LineKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Read-only listing.
    Basic,
    /// Adds reply affordances everywhere and edit/delete on the viewer's own comments.
    Interactive { viewer_id: Id },
}

pub trait ThreadRenderer {
    fn render(&self, forest: &[ThreadNode], opts: &RenderOptions) -> Vec<RenderedLine>;
}

pub struct BasicRenderer;

pub struct InteractiveRenderer {
    pub viewer_id: Id,
}

/// Pick the renderer once, up front.
pub fn renderer_for(mode: RenderMode) -> Box<dyn ThreadRenderer + Send + Sync> {
    match mode {
        RenderMode::Basic => Box::new(BasicRenderer),
        RenderMode::Interactive { viewer_id } => Box::new(InteractiveRenderer { viewer_id }),
    }
}

impl ThreadRenderer for BasicRenderer {
    fn render(&self, forest: &[ThreadNode], opts: &RenderOptions) -> Vec<RenderedLine> {
        let mut out = Vec::new();
        walk(forest, 0, opts, &no_actions, &mut out);
        out
    }
}

impl ThreadRenderer for InteractiveRenderer {
    fn render(&self, forest: &[ThreadNode], opts: &RenderOptions) -> Vec<RenderedLine> {
        let viewer = self.viewer_id;
        let actions = move |n: &ThreadNode| {
            let mut a = vec![Action::Reply];
            if n.comment.author_id == viewer {
                a.extend([Action::Edit, Action::Delete]);
            }
            Some(a)
        };
        let mut out = Vec::new();
        walk(forest, 0, opts, &actions, &mut out);
        out
    }
}

fn no_actions(_: &ThreadNode) -> Option<Vec<Action>> {
    None
}

fn walk(
    nodes: &[ThreadNode],
    depth: usize,
    opts: &RenderOptions,
    actions: &dyn Fn(&ThreadNode) -> Option<Vec<Action>>,
    out: &mut Vec<RenderedLine>,
) {
    for n in nodes {
        out.push(RenderedLine {
            id: n.id(),
            depth,
            kind: LineKind::Comment { author: n.author.display_name(), body: n.comment.body.clone() },
        });
        if let Some(a) = actions(n) {
            out.push(RenderedLine { id: n.id(), depth, kind: LineKind::Actions(a) });
        }
        if n.children.is_empty() {
            continue;
        }
        if depth + 1 >= opts.max_depth {
            out.push(RenderedLine { id: n.id(), depth: depth + 1, kind: LineKind::ContinueThread { hidden: n.reply_count() } });
            continue;
        }
        let shown = if opts.expanded.contains(&n.id()) { n.children.len() } else { opts.visible_replies.min(n.children.len()) };
        walk(&n.children[..shown], depth + 1, opts, actions, out);
        let hidden = n.children.len() - shown;
        if hidden > 0 {
            out.push(RenderedLine { id: n.id(), depth: depth + 1, kind: LineKind::ShowMore { hidden } });
        }
    }
}

/// Plain-text rendering, two spaces per level.
pub fn to_text(lines: &[RenderedLine]) -> String {
    let mut s = String::new();
    for l in lines {
        let indent = "  ".repeat(l.depth);
        let text = match &l.kind {
            LineKind::Comment { author, body } => format!("{author}: {body}"),
            LineKind::Actions(a) => {
                let names: Vec<&str> = a.iter().map(|a| match a {
                    Action::Reply => "[reply]",
                    Action::Edit => "[edit]",
                    Action::Delete => "[delete]",
                }).collect();
                names.join(" ")
            }
            LineKind::ShowMore { hidden } => format!("… show {hidden} more replies"),
            LineKind::ContinueThread { hidden } => format!("… continue thread ({hidden} replies)"),
        };
        s.push_str(&indent);
        s.push_str(&text);
        s.push('\n');
    }
    s
}
