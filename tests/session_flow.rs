#![cfg(feature = "inmem-api")]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use quill::api::inmem::InMemCommentApi;
use quill::api::{ApiResult, CommentApi};
use quill::config::SessionConfig;
use quill::models::*;
use quill::refresh::{Navigator, RefreshAction};
use quill::session::SessionPhase;
use quill::thread::find_node;
use quill::{ApiError, SessionController, SessionError, SortKey, ValidationError};

const SUBJECT: Id = 7;

/// In-memory backend that can be switched into failing every call.
struct FlakyApi {
    inner: InMemCommentApi,
    fail: AtomicBool,
    stall: AtomicBool,
    calls: AtomicUsize,
}

impl FlakyApi {
    fn new(inner: InMemCommentApi) -> Arc<Self> {
        Arc::new(Self { inner, fail: AtomicBool::new(false), stall: AtomicBool::new(false), calls: AtomicUsize::new(0) })
    }
    fn set_failing(&self, on: bool) { self.fail.store(on, Ordering::SeqCst); }
    /// Writes hang forever while set.
    fn set_stalled(&self, on: bool) { self.stall.store(on, Ordering::SeqCst); }
    fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
    fn check(&self) -> ApiResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ApiError::Rejected { status: 500, message: "backend down".into() });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CommentApi for FlakyApi {
    async fn fetch_comments(&self, subject_id: Id, page: u32, per_page: u32) -> ApiResult<CommentPage> {
        self.check()?;
        self.inner.fetch_comments(subject_id, page, per_page).await
    }
    async fn create_comment(&self, subject_id: Id, new: NewComment) -> ApiResult<CommentRecord> {
        self.check()?;
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.create_comment(subject_id, new).await
    }
    async fn update_comment(&self, id: Id, body: &str) -> ApiResult<UpdateConfirmation> {
        self.check()?;
        self.inner.update_comment(id, body).await
    }
    async fn delete_comment(&self, subject_id: Id, id: Id) -> ApiResult<()> {
        self.check()?;
        self.inner.delete_comment(subject_id, id).await
    }
}

#[derive(Default)]
struct RecordingNavigator {
    location: String,
    performed: Mutex<Vec<RefreshAction>>,
}

impl Navigator for RecordingNavigator {
    fn current_location(&self) -> String { self.location.clone() }
    fn perform(&self, action: RefreshAction) { self.performed.lock().unwrap().push(action); }
}

fn viewer() -> AuthorSnapshot {
    AuthorSnapshot { id: 1, handle: "me".into(), display_name_parts: vec!["Me".into()], avatar_ref: None }
}

fn author(id: Id, handle: &str) -> AuthorSnapshot {
    AuthorSnapshot { id, handle: handle.into(), display_name_parts: vec![], avatar_ref: None }
}

fn rec(id: Id, parent: Option<Id>, body: &str) -> CommentRecord {
    let ts = Utc.timestamp_opt(1_600_000_000 + id * 60, 0).unwrap();
    CommentRecord {
        id,
        author_id: 10 + id,
        subject_id: SUBJECT,
        body: body.into(),
        parent_id: parent,
        created_at: ts,
        updated_at: ts,
        author: Some(author(10 + id, &format!("user{id}"))),
    }
}

/// Backend pre-populated with `records`, wrapped for failure injection.
fn backend(records: &[CommentRecord]) -> Arc<FlakyApi> {
    let inner = InMemCommentApi::new(viewer());
    for r in records {
        inner.seed(r.clone()).unwrap();
    }
    FlakyApi::new(inner)
}

fn controller(api: Arc<FlakyApi>) -> SessionController {
    SessionController::new(api, SessionConfig { per_page: 2, ..SessionConfig::default() })
        .with_session_user(viewer())
}

type Calls = Arc<Mutex<Vec<(Id, usize)>>>;

fn recorder() -> (Calls, quill::ChangeCallback) {
    let calls: Calls = Arc::default();
    let sink = calls.clone();
    (calls, Box::new(move |subject, count| sink.lock().unwrap().push((subject, count))))
}

#[tokio::test]
async fn seeded_session_with_one_reply_reports_four_on_close() {
    let seed = vec![rec(1, None, "first"), rec(2, None, "second"), rec(3, Some(1), "answer")];
    let api = backend(&seed);
    let mut s = controller(api.clone());
    let (calls, cb) = recorder();

    s.open(SUBJECT, Some(seed), Some(cb)).await.unwrap();
    assert_eq!(s.phase(), SessionPhase::Ready);
    assert_eq!(s.state().tracking.initial_count, 3);
    assert_eq!(api.calls(), 0, "seeded open must not fetch");

    let reply = s.add_reply(2, "agreed").await.unwrap();
    assert_eq!(reply.parent_id, Some(2));
    assert_eq!(s.total_count(), 4);
    assert_eq!(s.records().last().map(|r| r.id), Some(reply.id));
    let parent = find_node(s.forest(), 2).unwrap();
    assert_eq!(parent.children.len(), 1);
    assert_eq!(parent.children[0].author.handle, "me");

    let report = s.close();
    assert_eq!(report.notified, Some((SUBJECT, 4)));
    assert_eq!(*calls.lock().unwrap(), vec![(SUBJECT, 4)]);
    assert!(!s.is_open());
}

#[tokio::test]
async fn unchanged_session_does_not_notify() {
    let seed = vec![rec(1, None, "only")];
    let mut s = controller(backend(&seed));
    let (calls, cb) = recorder();
    s.open(SUBJECT, Some(seed), Some(cb)).await.unwrap();
    s.search("only");
    s.sort(SortKey::Oldest);
    let report = s.close();
    assert!(report.notified.is_none());
    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_edit_leaves_list_untouched() {
    let a = rec(1, None, "original");
    let api = backend(&[a.clone()]);
    let mut s = controller(api.clone());
    s.open(SUBJECT, Some(vec![a.clone()]), None).await.unwrap();

    api.set_failing(true);
    let err = s.edit(1, "new text").await.unwrap_err();
    assert!(matches!(err, SessionError::Network(ApiError::Rejected { status: 500, .. })));
    assert_eq!(s.records(), &[a][..]);
    assert_eq!(s.error(), Some("backend down"));
    assert!(!s.has_changed());
    assert!(!s.is_submitting());
    assert_eq!(s.phase(), SessionPhase::Ready);
}

#[tokio::test]
async fn confirmed_edit_uses_server_text() {
    let a = rec(1, None, "original");
    let mut s = controller(backend(&[a.clone()]));
    s.open(SUBJECT, Some(vec![a]), None).await.unwrap();

    let confirmed = s.edit(1, "  fixed typo  ").await.unwrap();
    assert_eq!(confirmed.body, "fixed typo");
    let r = s.record(1).unwrap();
    assert_eq!(r.body, "fixed typo");
    assert!(r.updated_at >= r.created_at);
    assert!(s.has_changed());
}

#[tokio::test]
async fn failed_add_and_delete_leave_list_untouched() {
    let seed = vec![rec(1, None, "root"), rec(2, Some(1), "child")];
    let api = backend(&seed);
    let mut s = controller(api.clone());
    s.open(SUBJECT, Some(seed.clone()), None).await.unwrap();

    api.set_failing(true);
    assert!(s.add_top_level("hello").await.is_err());
    assert!(s.add_reply(1, "hello").await.is_err());
    assert!(s.delete(1).await.is_err());
    assert_eq!(s.records(), &seed[..]);
    assert!(s.error().is_some());
    assert!(!s.has_changed());
}

#[tokio::test]
async fn validation_errors_never_reach_the_backend() {
    let seed = vec![rec(1, None, "root")];
    let api = backend(&seed);
    let mut s = controller(api.clone());
    s.open(SUBJECT, Some(seed), None).await.unwrap();

    let err = s.add_top_level("   ").await.unwrap_err();
    assert_eq!(err, SessionError::Validation(ValidationError::EmptyContent));
    let err = s.add_reply(1, &"x".repeat(501)).await.unwrap_err();
    assert!(matches!(err, SessionError::Validation(ValidationError::TooLong { .. })));
    let err = s.edit(1, "@a @b @c @d @e @f").await.unwrap_err();
    assert!(matches!(err, SessionError::Validation(ValidationError::TooManyMentions { .. })));
    assert_eq!(api.calls(), 0);
    assert!(s.error().is_none());
}

#[tokio::test]
async fn reply_to_unknown_parent_is_rejected_locally() {
    let seed = vec![rec(1, None, "root")];
    let api = backend(&seed);
    let mut s = controller(api.clone());
    s.open(SUBJECT, Some(seed), None).await.unwrap();
    assert_eq!(s.add_reply(99, "hi").await.unwrap_err(), SessionError::UnknownComment(99));
    assert_eq!(s.delete(99).await.unwrap_err(), SessionError::UnknownComment(99));
    assert_eq!(api.calls(), 0);
}

#[tokio::test]
async fn reply_handle_is_resolved_even_when_hidden_by_search() {
    let seed = vec![rec(1, None, "alpha"), rec(2, None, "beta")];
    let mut s = controller(backend(&seed));
    s.open(SUBJECT, Some(seed), None).await.unwrap();
    s.search("beta");
    assert!(find_node(s.forest(), 1).is_none());
    let reply = s.add_reply(1, "replying to alpha").await.unwrap();
    assert_eq!(reply.parent_id, Some(1));
}

#[tokio::test]
async fn top_level_comment_goes_to_the_front() {
    let seed = vec![rec(1, None, "older"), rec(2, None, "newer")];
    let mut s = controller(backend(&seed));
    s.open(SUBJECT, Some(seed), None).await.unwrap();
    let c = s.add_top_level("brand new").await.unwrap();
    assert_eq!(s.records()[0].id, c.id);
    assert_eq!(s.forest()[0].id(), c.id); // newest sort
    s.sort(SortKey::Oldest);
    assert_eq!(s.forest().last().map(|n| n.id()), Some(c.id));
}

#[tokio::test]
async fn delete_removes_whole_subtree() {
    let seed = vec![
        rec(1, None, "root"), rec(2, Some(1), "a"), rec(3, Some(2), "b"),
        rec(4, Some(1), "c"), rec(5, None, "other"),
    ];
    let api = backend(&seed);
    let mut s = controller(api.clone());
    let (calls, cb) = recorder();
    s.open(SUBJECT, Some(seed), Some(cb)).await.unwrap();

    s.delete(2).await.unwrap();
    let ids: Vec<Id> = s.records().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 4, 5]);
    assert_eq!(api.inner.len(), 3);
    s.close();
    assert_eq!(*calls.lock().unwrap(), vec![(SUBJECT, 3)]);
}

#[tokio::test]
async fn open_without_seed_pages_through_backend() {
    let seed: Vec<_> = (1..=5).map(|i| rec(i, None, &format!("c{i}"))).collect();
    let api = backend(&seed);
    let mut s = controller(api.clone());
    s.open(SUBJECT, None, None).await.unwrap();
    assert_eq!(s.state().tracking.initial_count, 0);
    assert_eq!(s.records().len(), 2);
    assert!(s.has_more());
    assert_eq!(s.state().page, 2);

    s.load_more().await.unwrap();
    s.load_more().await.unwrap();
    assert_eq!(s.records().len(), 5);
    assert!(!s.has_more());
    let roots: Vec<Id> = s.forest().iter().map(|n| n.id()).collect();
    assert_eq!(roots, vec![5, 4, 3, 2, 1]);

    // page 1 again replaces instead of appending
    s.load_page(1).await.unwrap();
    assert_eq!(s.records().len(), 2);
    assert_eq!(api.calls(), 4);
}

#[tokio::test]
async fn reply_on_later_page_attaches_once_parent_arrives() {
    // newest-first paging puts the reply (id 3) on page 1 and its parent (id 1) on page 2
    let seed = vec![rec(1, None, "parent"), rec(2, None, "other"), rec(3, Some(1), "reply")];
    let mut s = controller(backend(&seed));
    s.open(SUBJECT, None, None).await.unwrap();
    assert!(s.forest().iter().any(|n| n.id() == 3), "orphan shown at top level");
    s.load_more().await.unwrap();
    assert!(s.forest().iter().all(|n| n.id() != 3));
    assert_eq!(find_node(s.forest(), 1).unwrap().children[0].id(), 3);
}

#[tokio::test]
async fn overlapping_pages_do_not_duplicate() {
    let seed: Vec<_> = (1..=4).map(|i| rec(i, None, &format!("c{i}"))).collect();
    let api = backend(&seed);
    let mut s = controller(api.clone());
    s.open(SUBJECT, None, None).await.unwrap();
    // someone else posts, shifting every offset by one
    api.inner.create_comment(SUBJECT, NewComment { body: "late".into(), parent_id: None, reply_to: None }).await.unwrap();
    s.load_more().await.unwrap();
    let mut ids: Vec<Id> = s.records().iter().map(|r| r.id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), s.records().len());
    assert_eq!(s.records().len(), 3);
}

#[tokio::test]
async fn failed_load_keeps_list_and_retry_clears_error() {
    let seed: Vec<_> = (1..=3).map(|i| rec(i, None, &format!("c{i}"))).collect();
    let api = backend(&seed);
    let mut s = controller(api.clone());
    s.open(SUBJECT, None, None).await.unwrap();
    let before = s.records().to_vec();

    api.set_failing(true);
    assert!(s.load_more().await.is_err());
    assert_eq!(s.records(), &before[..]);
    assert_eq!(s.error(), Some("backend down"));
    assert!(!s.is_loading());
    assert_eq!(s.state().page, 2);

    api.set_failing(false);
    s.load_more().await.unwrap();
    assert!(s.error().is_none());
    assert_eq!(s.records().len(), 3);
}

#[tokio::test]
async fn failed_initial_load_still_opens() {
    let api = backend(&[]);
    api.set_failing(true);
    let mut s = controller(api.clone());
    assert!(s.open(SUBJECT, None, None).await.is_err());
    assert!(s.is_open());
    assert_eq!(s.phase(), SessionPhase::Ready);
    assert!(s.error().is_some());
}

#[tokio::test]
async fn search_and_sort_are_local() {
    let seed = vec![
        rec(1, None, "root one"), rec(2, Some(1), "plain"), rec(3, Some(2), "the needle"),
        rec(4, Some(2), "hay"), rec(5, None, "root two"),
    ];
    let api = backend(&seed);
    let mut s = controller(api.clone());
    s.open(SUBJECT, Some(seed), None).await.unwrap();

    s.search("NEEDLE");
    assert_eq!(s.forest().len(), 1);
    let root = &s.forest()[0];
    assert_eq!(root.id(), 1);
    assert_eq!(root.children[0].id(), 2);
    let kids: Vec<Id> = root.children[0].children.iter().map(|n| n.id()).collect();
    assert_eq!(kids, vec![3]);

    s.search("");
    s.sort(SortKey::Popular);
    let roots: Vec<Id> = s.forest().iter().map(|n| n.id()).collect();
    assert_eq!(roots, vec![1, 5]);
    assert_eq!(s.total_count(), 5);
    assert_eq!(api.calls(), 0);
}

#[tokio::test]
async fn operations_on_closed_session_fail() {
    let mut s = controller(backend(&[]));
    assert_eq!(s.load_more().await.unwrap_err(), SessionError::Closed);
    assert_eq!(s.add_top_level("hi").await.unwrap_err(), SessionError::Closed);
    assert_eq!(s.delete(1).await.unwrap_err(), SessionError::Closed);
    let report = s.close();
    assert!(report.notified.is_none() && report.refresh.is_none());
}

#[tokio::test(start_paused = true)]
async fn changed_session_on_refreshable_view_schedules_revisit() {
    let seed = vec![rec(1, None, "root")];
    let nav = Arc::new(RecordingNavigator { location: "/posts/7".into(), ..Default::default() });
    let mut s = controller(backend(&seed)).with_navigator(nav.clone());
    s.open(SUBJECT, Some(seed), None).await.unwrap();
    s.add_top_level("new").await.unwrap();

    let report = s.close();
    assert_eq!(report.refresh, Some(RefreshAction::Revisit("/posts/7".into())));
    assert!(nav.performed.lock().unwrap().is_empty(), "refresh waits for the delay");
    report.scheduled.unwrap().await.unwrap();
    assert_eq!(*nav.performed.lock().unwrap(), vec![RefreshAction::Revisit("/posts/7".into())]);
}

#[tokio::test]
async fn unchanged_or_unlisted_views_are_not_refreshed() {
    let seed = vec![rec(1, None, "root")];
    let nav = Arc::new(RecordingNavigator { location: "/feed".into(), ..Default::default() });
    let mut s = controller(backend(&seed)).with_navigator(nav.clone());
    s.open(SUBJECT, Some(seed.clone()), None).await.unwrap();
    assert!(s.close().refresh.is_none());

    let nav = Arc::new(RecordingNavigator { location: "/settings".into(), ..Default::default() });
    let mut s = controller(backend(&seed)).with_navigator(nav.clone());
    s.open(SUBJECT, Some(seed), None).await.unwrap();
    s.add_top_level("new").await.unwrap();
    assert!(s.close().refresh.is_none());
}

#[tokio::test(start_paused = true)]
async fn always_refresh_policy_reloads() {
    let seed = vec![rec(1, None, "root")];
    let nav = Arc::new(RecordingNavigator { location: "/settings".into(), ..Default::default() });
    let cfg = SessionConfig { always_refresh: true, ..SessionConfig::default() };
    let mut s = SessionController::new(backend(&seed), cfg).with_navigator(nav.clone());
    s.open(SUBJECT, Some(seed), None).await.unwrap();
    let report = s.close();
    assert_eq!(report.refresh, Some(RefreshAction::Reload));
    report.scheduled.unwrap().await.unwrap();
    assert_eq!(*nav.performed.lock().unwrap(), vec![RefreshAction::Reload]);
}

#[tokio::test]
async fn subject_owner_fallback_applies_to_bare_records() {
    let mut bare = rec(1, None, "by the owner");
    bare.author = None;
    bare.author_id = 42;
    let mut s = controller(backend(&[bare.clone()]));
    s.open(SUBJECT, Some(vec![bare]), None).await.unwrap();
    assert_eq!(s.forest()[0].author.handle, "Unknown User");
    s.set_subject_owner(Some(author(42, "owner")));
    assert_eq!(s.forest()[0].author.handle, "owner");
}

#[tokio::test]
async fn abandoned_write_releases_submit_flag() {
    let seed = vec![rec(1, None, "a"), rec(2, None, "b")];
    let api = backend(&seed);
    let mut s = controller(api.clone());
    s.open(SUBJECT, Some(seed), None).await.unwrap();

    api.set_stalled(true);
    let outcome = tokio::time::timeout(Duration::from_millis(10), s.add_top_level("hi")).await;
    assert!(outcome.is_err(), "write should still be pending");
    assert!(!s.is_submitting());
    assert_eq!(s.phase(), SessionPhase::Ready);
    assert_eq!(s.total_count(), 2);
    assert!(!s.has_changed());

    s.load_more().await.unwrap();
    assert!(!s.is_submitting() && !s.is_loading());

    api.set_stalled(false);
    s.add_top_level("hi again").await.unwrap();
    assert_eq!(s.total_count(), 3);
}

#[tokio::test]
async fn loading_the_last_page_number_does_not_overflow() {
    let seed = vec![rec(1, None, "a"), rec(2, None, "b")];
    let mut s = controller(backend(&seed));
    s.open(SUBJECT, Some(seed), None).await.unwrap();
    s.load_page(u32::MAX).await.unwrap();
    assert_eq!(s.state().page, u32::MAX);
    assert!(!s.has_more());
    assert_eq!(s.total_count(), 2);
}

#[tokio::test]
async fn reopening_notifies_changes_of_previous_subject() {
    let seed = vec![rec(1, None, "a")];
    let mut s = controller(backend(&seed));
    let (calls, cb) = recorder();
    s.open(SUBJECT, Some(seed.clone()), Some(cb)).await.unwrap();
    s.add_top_level("new").await.unwrap();

    s.open(SUBJECT + 1, Some(seed), None).await.unwrap();
    assert_eq!(*calls.lock().unwrap(), vec![(SUBJECT, 2)]);
    assert_eq!(s.subject_id(), Some(SUBJECT + 1));
    assert!(!s.has_changed());
}

#[test]
fn close_outside_runtime_still_waits_for_the_delay() {
    let seed = vec![rec(1, None, "root")];
    let nav = Arc::new(RecordingNavigator { location: "/posts/7".into(), ..Default::default() });
    let cfg = SessionConfig { refresh_delay: Duration::from_millis(50), ..SessionConfig::default() };
    let mut s = SessionController::new(backend(&seed), cfg).with_navigator(nav.clone());
    let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
    rt.block_on(async {
        s.open(SUBJECT, Some(seed), None).await.unwrap();
        s.add_top_level("new").await.unwrap();
    });

    let report = s.close();
    assert!(report.scheduled.is_none());
    assert_eq!(report.refresh, Some(RefreshAction::Revisit("/posts/7".into())));
    assert!(nav.performed.lock().unwrap().is_empty(), "refresh waits for the delay");
    std::thread::sleep(Duration::from_millis(500));
    assert_eq!(*nav.performed.lock().unwrap(), vec![RefreshAction::Revisit("/posts/7".into())]);
}
