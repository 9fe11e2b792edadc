use regex::Regex;
use tracing::{debug, warn};

use crate::models::Id;

/// What a dependent view should do once a changed session closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshAction {
    /// Reload the whole page.
    Reload,
    /// Navigate to the given location again so it refetches.
    Revisit(String),
}

/// Routing/navigation side of the host application.
pub trait Navigator: Send + Sync {
    fn current_location(&self) -> String;
    fn perform(&self, action: RefreshAction);
}

/// Decides whether closing a session should refresh the current view.
#[derive(Debug, Clone)]
pub struct RefreshPolicy {
    always: bool,
    views: Vec<String>,
}

impl RefreshPolicy {
    pub fn new(always: bool, views: Vec<String>) -> Self {
        Self { always, views }
    }

    pub fn decide(&self, has_changed: bool, location: &str, subject_id: Id) -> Option<RefreshAction> {
        if self.always {
            return Some(RefreshAction::Reload);
        }
        if !has_changed {
            return None;
        }
        let path = strip_location(location);
        let hit = self.views.iter().any(|v| match view_regex(v, subject_id) {
            Some(re) => re.is_match(path),
            None => false,
        });
        debug!(location, hit, "refresh allow-list check");
        hit.then(|| RefreshAction::Revisit(location.to_string()))
    }
}

// query string, fragment and trailing slash don't take part in matching
fn strip_location(location: &str) -> &str {
    let end = location.find(|c: char| c == '?' || c == '#').unwrap_or(location.len());
    let path = &location[..end];
    if path.len() > 1 { path.trim_end_matches('/') } else { path }
}

fn view_regex(pattern: &str, subject_id: Id) -> Option<Regex> {
    let mut src = String::from("^");
    for (i, seg) in pattern.trim_end_matches('/').split('/').enumerate() {
        if i > 0 {
            src.push('/');
        }
        match seg {
            "*" => src.push_str("[^/]+"),
            "{subject}" => src.push_str(&subject_id.to_string()),
            lit => src.push_str(&regex::escape(lit)),
        }
    }
    if src == "^" {
        src.push('/');
    }
    src.push('$');
    match Regex::new(&src) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(pattern, "ignoring unusable refreshable view pattern: {e}");
            None
        }
    }
}
