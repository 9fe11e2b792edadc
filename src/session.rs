//! Stateful comment session for one subject: pagination, confirmed writes,
//! search/sort, and change tracking for dependent views.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::CommentApi;
use crate::config::SessionConfig;
use crate::error::{ApiError, SessionError, SessionResult};
use crate::models::*;
use crate::reducer::{self, CountAll};
use crate::refresh::{Navigator, RefreshAction, RefreshPolicy};
use crate::thread::{self, AuthorContext, SortKey};
use crate::validate::validate;

/// Fired on close with `(subject_id, total_comment_count)` when the session changed something.
pub type ChangeCallback = Box<dyn FnMut(Id, usize) + Send>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionPhase {
    #[default]
    Closed,
    Opening,
    Ready,
    Mutating,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeTracking {
    pub initial_count: usize,
    pub has_changed: bool,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub subject_id: Option<Id>,
    pub phase: SessionPhase,
    pub records: Vec<CommentRecord>,
    pub forest: Vec<ThreadNode>,
    pub loading: bool,
    pub submitting: bool,
    pub error: Option<String>,
    pub page: u32, // next page to request
    pub has_more: bool,
    pub search: String,
    pub sort: SortKey,
    pub tracking: ChangeTracking,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            subject_id: None,
            phase: SessionPhase::Closed,
            records: Vec::new(),
            forest: Vec::new(),
            loading: false,
            submitting: false,
            error: None,
            page: 1,
            has_more: false,
            search: String::new(),
            sort: SortKey::default(),
            tracking: ChangeTracking::default(),
        }
    }
}

/// What `close` did.
#[derive(Debug, Default)]
pub struct CloseReport {
    /// `(subject_id, count)` passed to the change callback, if it fired.
    pub notified: Option<(Id, usize)>,
    pub refresh: Option<RefreshAction>,
    /// Delayed refresh task, when one was scheduled on a tokio runtime.
    /// Outside a runtime the refresh runs on a detached thread instead.
    pub scheduled: Option<JoinHandle<()>>,
}

pub struct SessionController {
    api: Arc<dyn CommentApi>,
    navigator: Option<Arc<dyn Navigator>>,
    config: SessionConfig,
    authors: AuthorContext,
    state: SessionState,
    on_change: Option<ChangeCallback>,
}

impl SessionController {
    pub fn new(api: Arc<dyn CommentApi>, config: SessionConfig) -> Self {
        Self {
            api,
            navigator: None,
            config,
            authors: AuthorContext::default(),
            state: SessionState::default(),
            on_change: None,
        }
    }

    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn with_session_user(mut self, user: AuthorSnapshot) -> Self {
        self.authors.session_user = Some(user);
        self
    }

    /// Author to fall back to for records by the subject's owner.
    pub fn set_subject_owner(&mut self, owner: Option<AuthorSnapshot>) {
        self.authors.subject_owner = owner;
        self.recompute();
    }

    // ---- read side for the presentation layer ----

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn forest(&self) -> &[ThreadNode] {
        &self.state.forest
    }

    pub fn records(&self) -> &[CommentRecord] {
        &self.state.records
    }

    pub fn record(&self, id: Id) -> Option<&CommentRecord> {
        self.state.records.iter().find(|r| r.id == id)
    }

    pub fn is_open(&self) -> bool {
        self.state.phase != SessionPhase::Closed
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase
    }

    pub fn subject_id(&self) -> Option<Id> {
        self.state.subject_id
    }

    pub fn is_loading(&self) -> bool {
        self.state.loading
    }

    pub fn is_submitting(&self) -> bool {
        self.state.submitting
    }

    pub fn error(&self) -> Option<&str> {
        self.state.error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.state.error = None;
    }

    pub fn has_more(&self) -> bool {
        self.state.has_more
    }

    pub fn has_changed(&self) -> bool {
        self.state.tracking.has_changed
    }

    pub fn total_count(&self) -> usize {
        self.state.records.count_all()
    }

    // ---- lifecycle ----

    /// Open a session for `subject_id`. A non-empty seed is shown as-is;
    /// otherwise page 1 is fetched.
    pub async fn open(
        &mut self,
        subject_id: Id,
        seed: Option<Vec<CommentRecord>>,
        on_change: Option<ChangeCallback>,
    ) -> SessionResult<()> {
        if self.is_open() {
            debug!(previous = ?self.state.subject_id, "reopening comment session, closing the previous one");
            self.close();
        }
        let seed = seed.unwrap_or_default();
        self.state = SessionState {
            subject_id: Some(subject_id),
            tracking: ChangeTracking { initial_count: seed.count_all(), has_changed: false },
            ..SessionState::default()
        };
        self.on_change = on_change;
        info!(subject_id, seeded = seed.len(), "comment session opened");

        if seed.is_empty() {
            self.state.phase = SessionPhase::Opening;
            return self.load_page(1).await;
        }
        self.state.records = seed;
        self.state.page = 2;
        // a full first page suggests there is more behind it
        self.state.has_more = self.state.records.len() >= self.config.per_page as usize;
        self.state.phase = SessionPhase::Ready;
        self.recompute();
        Ok(())
    }

    /// Fetch `page`; page 1 replaces the list, later pages extend it.
    pub async fn load_page(&mut self, page: u32) -> SessionResult<()> {
        let subject_id = self.open_subject()?;
        let page = page.max(1);
        let result = {
            let _busy = InFlight::loading(&mut self.state);
            self.api.fetch_comments(subject_id, page, self.config.per_page).await
        };
        let fetched = match result {
            Ok(p) => p,
            Err(e) => {
                metrics::increment_counter!("quill_page_load_failures");
                warn!(subject_id, page, error = %e, "loading comments failed");
                return Err(self.fail(e));
            }
        };
        metrics::increment_counter!("quill_pages_loaded");
        debug!(subject_id, page, received = fetched.comments.len(), has_next = fetched.pagination.has_next, "comment page loaded");
        if page == 1 {
            self.state.records = fetched.comments;
        } else {
            self.state.records = merge_page(&self.state.records, fetched.comments);
        }
        self.state.has_more = fetched.pagination.has_next;
        self.state.page = page.saturating_add(1);
        self.state.error = None;
        self.recompute();
        Ok(())
    }

    pub async fn load_more(&mut self) -> SessionResult<()> {
        let next = self.state.page;
        self.load_page(next).await
    }

    /// Post a new top-level comment; the confirmed record goes to the front.
    pub async fn add_top_level(&mut self, text: &str) -> SessionResult<CommentRecord> {
        let subject_id = self.open_subject()?;
        validate(text)?;
        let new = NewComment { body: text.trim().to_string(), parent_id: None, reply_to: None };
        let api = Arc::clone(&self.api);
        let record = self.confirmed(api.create_comment(subject_id, new)).await?;
        self.state.records = reducer::insert(&self.state.records, record.clone(), true);
        self.mark_changed();
        metrics::increment_counter!("quill_comments_created");
        info!(subject_id, comment_id = record.id, "comment posted");
        Ok(record)
    }

    /// Reply to `parent_id`; the confirmed record is appended and lands under
    /// its parent when the forest is rebuilt.
    pub async fn add_reply(&mut self, parent_id: Id, text: &str) -> SessionResult<CommentRecord> {
        let subject_id = self.open_subject()?;
        validate(text)?;
        let reply_to = self.reply_handle(parent_id)?;
        let new = NewComment { body: text.trim().to_string(), parent_id: Some(parent_id), reply_to: Some(reply_to) };
        let api = Arc::clone(&self.api);
        let record = self.confirmed(api.create_comment(subject_id, new)).await?;
        self.state.records = reducer::insert(&self.state.records, record.clone(), false);
        self.mark_changed();
        metrics::increment_counter!("quill_comments_created");
        info!(subject_id, parent_id, comment_id = record.id, "reply posted");
        Ok(record)
    }

    /// Edit a comment's text once the backend confirms it.
    pub async fn edit(&mut self, id: Id, text: &str) -> SessionResult<UpdateConfirmation> {
        self.open_subject()?;
        validate(text)?;
        if self.record(id).is_none() {
            return Err(SessionError::UnknownComment(id));
        }
        let api = Arc::clone(&self.api);
        let confirmed = self.confirmed(api.update_comment(id, text.trim())).await?;
        let updated = reducer::update_text(&self.state.records, id, &confirmed.body, confirmed.updated_at).into_owned();
        self.state.records = updated;
        self.mark_changed();
        metrics::increment_counter!("quill_comments_edited");
        info!(comment_id = id, "comment edited");
        Ok(confirmed)
    }

    /// Delete a comment and its replies once the backend confirms it.
    pub async fn delete(&mut self, id: Id) -> SessionResult<()> {
        let subject_id = self.open_subject()?;
        if self.record(id).is_none() {
            return Err(SessionError::UnknownComment(id));
        }
        let api = Arc::clone(&self.api);
        self.confirmed(api.delete_comment(subject_id, id)).await?;
        let removed_before = self.state.records.len();
        let remaining = reducer::remove(&self.state.records, id).into_owned();
        self.state.records = remaining;
        self.mark_changed();
        metrics::increment_counter!("quill_comments_deleted");
        info!(subject_id, comment_id = id, removed = removed_before - self.state.records.len(), "comment deleted");
        Ok(())
    }

    pub fn search(&mut self, term: &str) {
        self.state.search = term.to_string();
        self.recompute();
    }

    pub fn sort(&mut self, key: SortKey) {
        self.state.sort = key;
        self.recompute();
    }

    /// Tear the session down. Notifies the change callback and schedules a
    /// refresh of the current view when warranted.
    pub fn close(&mut self) -> CloseReport {
        let mut report = CloseReport::default();
        let Some(subject_id) = self.state.subject_id.filter(|_| self.is_open()) else {
            return report;
        };
        let has_changed = self.state.tracking.has_changed;
        let total = self.total_count();

        if has_changed {
            if let Some(cb) = self.on_change.as_mut() {
                cb(subject_id, total);
                report.notified = Some((subject_id, total));
            }
        }

        if let Some(nav) = self.navigator.clone() {
            let policy = RefreshPolicy::new(self.config.always_refresh, self.config.refreshable_views.clone());
            let location = nav.current_location();
            if let Some(action) = policy.decide(has_changed, &location, subject_id) {
                info!(subject_id, %location, ?action, "scheduling view refresh");
                report.scheduled = schedule_refresh(nav, action.clone(), self.config.refresh_delay);
                report.refresh = Some(action);
            }
        }

        info!(subject_id, has_changed, initial = self.state.tracking.initial_count, total, "comment session closed");
        self.state = SessionState::default();
        self.on_change = None;
        report
    }

    // ---- internals ----

    fn open_subject(&self) -> SessionResult<Id> {
        match self.state.subject_id {
            Some(id) if self.is_open() => Ok(id),
            _ => Err(SessionError::Closed),
        }
    }

    fn reply_handle(&self, parent_id: Id) -> SessionResult<String> {
        // look in the unfiltered forest; the parent may be hidden by a search
        let full = thread::build_forest_report(&self.state.records, &self.authors).forest;
        thread::find_node(&full, parent_id)
            .map(|n| n.author.handle.clone())
            .ok_or(SessionError::UnknownComment(parent_id))
    }

    // Runs a write against the backend with the submitting flag raised.
    async fn confirmed<T, F>(&mut self, call: F) -> SessionResult<T>
    where
        F: std::future::Future<Output = Result<T, ApiError>>,
    {
        let result = {
            let _busy = InFlight::submitting(&mut self.state);
            call.await
        };
        match result {
            Ok(v) => Ok(v),
            Err(e) => {
                metrics::increment_counter!("quill_write_failures");
                warn!(subject_id = ?self.state.subject_id, error = %e, "comment write failed");
                Err(self.fail(e))
            }
        }
    }

    fn fail(&mut self, e: ApiError) -> SessionError {
        self.state.error = Some(e.user_message());
        SessionError::Network(e)
    }

    fn mark_changed(&mut self) {
        self.state.tracking.has_changed = true;
        self.state.error = None;
        self.recompute();
    }

    fn recompute(&mut self) {
        let forest = thread::build_forest(&self.state.records, &self.authors);
        let mut forest = thread::filter_forest(forest, &self.state.search);
        thread::sort_roots(&mut forest, self.state.sort);
        self.state.forest = forest;
    }
}

/// Raises the busy flags for one backend call and lowers them when dropped,
/// including when the caller drops the operation's future mid-flight.
struct InFlight<'a> {
    state: &'a mut SessionState,
}

impl<'a> InFlight<'a> {
    fn loading(state: &'a mut SessionState) -> Self {
        state.loading = true;
        Self { state }
    }

    fn submitting(state: &'a mut SessionState) -> Self {
        state.phase = SessionPhase::Mutating;
        state.submitting = true;
        Self { state }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.state.loading = false;
        self.state.submitting = false;
        if self.state.phase != SessionPhase::Closed {
            self.state.phase = SessionPhase::Ready;
        }
    }
}

// Later pages may overlap earlier ones once new comments shift the offsets.
fn merge_page(existing: &[CommentRecord], incoming: Vec<CommentRecord>) -> Vec<CommentRecord> {
    let mut out = existing.to_vec();
    for r in incoming {
        match out.iter().position(|e| e.id == r.id) {
            Some(i) => out[i] = r,
            None => out.push(r),
        }
    }
    out
}

fn schedule_refresh(nav: Arc<dyn Navigator>, action: RefreshAction, delay: Duration) -> Option<JoinHandle<()>> {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Some(handle.spawn(async move {
            tokio::time::sleep(delay).await;
            nav.perform(action);
        })),
        Err(_) => {
            debug!("no async runtime, refreshing from a helper thread");
            std::thread::spawn(move || {
                std::thread::sleep(delay);
                nav.perform(action);
            });
            None
        }
    }
}
