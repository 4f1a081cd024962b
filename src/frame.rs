//! Per-frame state: url/name, current/pending document, lifecycle flags.
//!
//! `Frame` is plain data owned exclusively by
//! [`crate::frame_manager::FrameManager`]. Parent/child links are
//! [`FrameId`]s, not smart pointers — the tree is a forest and the single
//! owner is the manager's frame map.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::event::{Listeners, StateAwareEvent};
use crate::progress::Progress;

/// Unique, manager-scoped frame identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameId(pub u64);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

/// Opaque navigation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        DocumentId(s)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        DocumentId(s.to_string())
    }
}

/// A document descriptor: `documentId` when known, nothing else. Network
/// request tracking is out of scope for this core, so there is no
/// `request` field to leave permanently empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub document_id: Option<DocumentId>,
}

impl Document {
    pub fn with_id(id: DocumentId) -> Self {
        Self {
            document_id: Some(id),
        }
    }
}

/// A subset of `{domcontentloaded, load, networkidle-surrogate}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleFlag {
    DomContentLoaded,
    Load,
    /// Fired via the runtime adapter's "content-script-readiness" signal,
    /// standing in for `networkidle`.
    NetworkIdleSurrogate,
}

/// One emission of a frame's internal navigation event stream.
#[derive(Debug, Clone)]
pub struct NavigationEvent {
    pub url: String,
    pub name: String,
    pub document: Option<Document>,
    pub error: Option<Error>,
    pub is_public: bool,
}

/// An awaitable one-shot resolution signal, used for a frame's detach
/// notification. Built the same way [`crate::progress::Progress`] builds its
/// abort signal: a `Shared` oneshot receiver any number of waiters can clone
/// and await independently.
struct Scope {
    resolved: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<()>>>,
    rx: Shared<oneshot::Receiver<()>>,
}

impl Scope {
    fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            resolved: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
            rx: rx.shared(),
        }
    }

    fn resolve(&self) {
        if !self.resolved.swap(true, Ordering::SeqCst) {
            if let Some(tx) = self.tx.lock().take() {
                let _ = tx.send(());
            }
        }
    }

    fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::SeqCst)
    }

    fn wait(&self) -> impl Future<Output = ()> {
        let rx = self.rx.clone();
        async move {
            let _ = rx.await;
        }
    }
}

/// Per-frame state: url/name, current/pending document, lifecycle flags,
/// the child set, and the navigation event stream.
pub struct Frame {
    id: FrameId,
    parent: Option<FrameId>,
    children: HashSet<FrameId>,
    url: String,
    name: String,
    current_document: Document,
    pending_document: Option<Document>,
    redirected_navigations: HashSet<DocumentId>,
    lifecycle: HashSet<LifecycleFlag>,
    load_event: StateAwareEvent<()>,
    dom_content_loaded_event: StateAwareEvent<()>,
    navigation_events: Listeners<NavigationEvent>,
    detached_scope: Arc<Scope>,
    detached: bool,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("url", &self.url)
            .field("name", &self.name)
            .field("current_document", &self.current_document)
            .field("pending_document", &self.pending_document)
            .field("detached", &self.detached)
            .finish()
    }
}

impl Frame {
    pub(crate) fn new_main(id: FrameId, url: Option<String>) -> Self {
        Self {
            id,
            parent: None,
            children: HashSet::new(),
            url: url.unwrap_or_default(),
            name: String::new(),
            current_document: Document::default(),
            pending_document: None,
            redirected_navigations: HashSet::new(),
            lifecycle: HashSet::new(),
            load_event: StateAwareEvent::new(),
            dom_content_loaded_event: StateAwareEvent::new(),
            navigation_events: Listeners::new(),
            detached_scope: Arc::new(Scope::new()),
            detached: false,
        }
    }

    pub(crate) fn new_child(id: FrameId, parent: FrameId, url: Option<String>) -> Self {
        let mut frame = Self::new_main(id, url);
        frame.parent = Some(parent);
        frame
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn parent_id(&self) -> Option<FrameId> {
        self.parent
    }

    pub fn child_ids(&self) -> impl Iterator<Item = FrameId> + '_ {
        self.children.iter().copied()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub fn current_document(&self) -> &Document {
        &self.current_document
    }

    pub fn pending_document(&self) -> Option<&Document> {
        self.pending_document.as_ref()
    }

    pub fn lifecycle(&self) -> &HashSet<LifecycleFlag> {
        &self.lifecycle
    }

    pub(crate) fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub(crate) fn set_pending_document(&mut self, document: Option<Document>) {
        self.pending_document = document;
    }

    pub(crate) fn set_current_document(&mut self, document: Document) {
        self.current_document = document;
    }

    pub(crate) fn add_child(&mut self, child: FrameId) {
        self.children.insert(child);
    }

    pub(crate) fn remove_child(&mut self, child: FrameId) {
        self.children.remove(&child);
    }

    pub(crate) fn take_children(&mut self) -> HashSet<FrameId> {
        std::mem::take(&mut self.children)
    }

    pub(crate) fn mark_redirected(&mut self, document_id: DocumentId) {
        self.redirected_navigations.insert(document_id);
    }

    pub fn has_redirected(&self, document_id: &DocumentId) -> bool {
        self.redirected_navigations.contains(document_id)
    }

    /// Sets `load` and `domcontentloaded` to already-fired, used when
    /// attaching to a page that is already loaded.
    pub(crate) fn mark_already_loaded_page(&mut self) {
        self.lifecycle.insert(LifecycleFlag::DomContentLoaded);
        self.lifecycle.insert(LifecycleFlag::Load);
        self.dom_content_loaded_event.fire(());
        self.load_event.fire(());
    }

    /// Resets latched lifecycle events on new-document commit.
    pub(crate) fn clear_lifecycle(&mut self) {
        self.lifecycle.clear();
        self.load_event.reset();
        self.dom_content_loaded_event.reset();
    }

    pub(crate) fn set_lifecycle_flag(&mut self, flag: LifecycleFlag) {
        self.lifecycle.insert(flag);
        match flag {
            LifecycleFlag::Load => self.load_event.fire(()),
            LifecycleFlag::DomContentLoaded => self.dom_content_loaded_event.fire(()),
            LifecycleFlag::NetworkIdleSurrogate => {}
        }
    }

    pub fn load_event(&self) -> &StateAwareEvent<()> {
        &self.load_event
    }

    pub fn dom_content_loaded_event(&self) -> &StateAwareEvent<()> {
        &self.dom_content_loaded_event
    }

    /// Emits to the internal navigation event stream. Public navigation
    /// surfacing, if any, is a decision made by the caller inspecting
    /// `is_public`/`error`.
    pub(crate) fn fire_internal_navigation(&self, event: NavigationEvent) {
        self.navigation_events.emit(&event);
    }

    /// Subscribes to the internal navigation stream, returning a disposable id.
    pub fn on_internal_navigation(
        &self,
        listener: impl Fn(&NavigationEvent) + Send + Sync + 'static,
    ) -> crate::event::ListenerId {
        self.navigation_events.subscribe(listener)
    }

    pub fn unsubscribe_internal_navigation(&self, id: crate::event::ListenerId) {
        self.navigation_events.unsubscribe(id);
    }

    /// Resolves `detached_scope` and forbids further mutation. Idempotent.
    pub(crate) fn mark_detached(&mut self) {
        self.detached = true;
        self.detached_scope.resolve();
    }

    pub fn is_detached_scope_resolved(&self) -> bool {
        self.detached_scope.is_resolved()
    }

    /// A future that resolves once this frame detaches. Used by
    /// [`crate::barrier::SignalBarrier`] to avoid hanging on a navigation
    /// that never arrives because the frame went away instead.
    pub fn wait_detached(&self) -> impl Future<Output = ()> {
        self.detached_scope.wait()
    }

    /// Classifies a JavaScript evaluation error by its leading class name as
    /// non-retriable.
    pub fn is_non_retriable_error(err: &Error) -> bool {
        match err {
            Error::NonRetriableEvaluation(_) => true,
            Error::AdapterFailure(msg) => crate::error::is_non_retriable_error_class(msg),
            _ => false,
        }
    }

    /// Invokes `fn_` repeatedly until it returns `Ok(Some(value))`, races the
    /// backoff vector's next delay against `progress` between attempts, and
    /// gives up rethrowing on a non-retriable error or once `progress`
    /// aborts. `fn_` returns `Ok(None)` to request another attempt
    /// ("continue polling").
    pub async fn retry_with_progress_and_timeouts<F, Fut, T>(
        progress: &Progress,
        backoffs: &[u64],
        mut fn_: F,
    ) -> crate::error::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = crate::error::Result<Option<T>>>,
    {
        let mut attempt = 0usize;
        loop {
            match fn_().await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {
                    let backoff = backoffs
                        .get(attempt)
                        .copied()
                        .unwrap_or_else(|| *backoffs.last().unwrap_or(&0));
                    progress.wait(backoff).await?;
                    attempt += 1;
                }
                Err(err) if Frame::is_non_retriable_error(&err) => return Err(err),
                Err(err) if err.is_abort() => return Err(err),
                Err(_) => {
                    let backoff = backoffs
                        .get(attempt)
                        .copied()
                        .unwrap_or_else(|| *backoffs.last().unwrap_or(&0));
                    progress.wait(backoff).await?;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_main_frame_has_no_parent() {
        let frame = Frame::new_main(FrameId(1), Some("about:blank".into()));
        assert_eq!(frame.parent_id(), None);
        assert_eq!(frame.url(), "about:blank");
    }

    #[test]
    fn new_child_frame_tracks_parent() {
        let frame = Frame::new_child(FrameId(2), FrameId(1), None);
        assert_eq!(frame.parent_id(), Some(FrameId(1)));
    }

    #[test]
    fn mark_already_loaded_page_fires_lifecycle_events() {
        let mut frame = Frame::new_main(FrameId(1), None);
        frame.mark_already_loaded_page();
        assert!(frame.load_event().has_fired());
        assert!(frame.dom_content_loaded_event().has_fired());
    }

    #[test]
    fn clear_lifecycle_resets_latched_events() {
        let mut frame = Frame::new_main(FrameId(1), None);
        frame.mark_already_loaded_page();
        frame.clear_lifecycle();
        assert!(!frame.load_event().has_fired());
        assert!(frame.lifecycle().is_empty());
    }

    #[test]
    fn is_non_retriable_error_classifies_js_error_classes() {
        assert!(Frame::is_non_retriable_error(&Error::NonRetriableEvaluation(
            "TypeError: x".into()
        )));
        assert!(Frame::is_non_retriable_error(&Error::AdapterFailure(
            "ReferenceError: x is not defined".into()
        )));
        assert!(!Frame::is_non_retriable_error(&Error::AdapterFailure(
            "element not ready".into()
        )));
    }

    #[tokio::test]
    async fn mark_detached_resolves_wait_detached() {
        let mut frame = Frame::new_main(FrameId(1), None);
        assert!(!frame.is_detached_scope_resolved());
        frame.mark_detached();
        frame.wait_detached().await;
        assert!(frame.is_detached());
    }
}
