//! The navigation state machine — the frame tree, its transitions, and the
//! signal-barrier registry auto-wait is built on.
//!
//! Keyed `HashMap<FrameId, Frame>`, with recursive child detach. One
//! `parking_lot::Mutex` serializes every transition, even though this core,
//! embedded in a host process, is `Send + Sync` and cloneable —
//! `FrameManager` exclusively owns all frames, and dispatch is the only
//! writer.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fnv::FnvHashMap;
use parking_lot::Mutex;

use crate::adapter::RuntimeEvent;
use crate::barrier::SignalBarrier;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::event::StateAwareEvent;
use crate::frame::{Document, DocumentId, Frame, FrameId, NavigationEvent};
use crate::progress::Progress;

/// A watch registered by [`State::add_frame_navigation`] so a barrier's hold
/// on a top-level frame's next navigation can also be released if that
/// frame detaches before navigating instead.
struct NavigationWatch {
    frame_id: FrameId,
    listener_id: crate::event::ListenerId,
    barrier: Arc<SignalBarrier>,
    released: Arc<AtomicBool>,
}

struct State {
    frames: FnvHashMap<FrameId, Frame>,
    main_frame: Option<FrameId>,
    main_frame_promise: StateAwareEvent<FrameId>,
    signal_barriers: Vec<Arc<SignalBarrier>>,
    navigation_watches: Vec<NavigationWatch>,
}

impl State {
    fn new() -> Self {
        Self {
            frames: FnvHashMap::default(),
            main_frame: None,
            main_frame_promise: StateAwareEvent::new(),
            signal_barriers: Vec::new(),
            navigation_watches: Vec::new(),
        }
    }

    fn main_frame(&self) -> Option<&Frame> {
        self.main_frame.and_then(|id| self.frames.get(&id))
    }

    /// Barrier registration for a single top-level navigation request.
    /// Sub-frame navigations are ignored by barriers — only the main frame
    /// participates in auto-wait.
    fn add_frame_navigation(&mut self, frame_id: FrameId) {
        if self
            .frames
            .get(&frame_id)
            .map(|f| f.parent_id().is_some())
            .unwrap_or(true)
        {
            return;
        }
        let Some(frame) = self.frames.get(&frame_id) else {
            return;
        };
        for barrier in self.signal_barriers.clone() {
            barrier.retain();
            let released = Arc::new(AtomicBool::new(false));
            let watch_barrier = barrier.clone();
            let watch_released = released.clone();
            let listener_id = frame.on_internal_navigation(move |_event| {
                if !watch_released.swap(true, Ordering::SeqCst) {
                    watch_barrier.release();
                }
            });
            self.navigation_watches.push(NavigationWatch {
                frame_id,
                listener_id,
                barrier,
                released,
            });
        }
    }

    /// Releases and disposes any navigation watches still outstanding for
    /// `frame_id` (called when that frame detaches).
    fn discharge_navigation_watches_for(&mut self, frame_id: FrameId) {
        let mut remaining = Vec::new();
        for watch in std::mem::take(&mut self.navigation_watches) {
            if watch.frame_id == frame_id {
                if let Some(frame) = self.frames.get(&frame_id) {
                    frame.unsubscribe_internal_navigation(watch.listener_id);
                }
                if !watch.released.swap(true, Ordering::SeqCst) {
                    watch.barrier.release();
                }
            } else {
                remaining.push(watch);
            }
        }
        self.navigation_watches = remaining;
    }

    /// Post-order recursive detach of `frame_id` and all its descendants.
    fn remove_frames_recursively(&mut self, frame_id: FrameId) {
        let children: Vec<FrameId> = self
            .frames
            .get(&frame_id)
            .map(|f| f.child_ids().collect())
            .unwrap_or_default();
        for child in children {
            self.remove_frames_recursively(child);
        }
        if let Some(parent_id) = self.frames.get(&frame_id).and_then(|f| f.parent_id()) {
            if let Some(parent) = self.frames.get_mut(&parent_id) {
                parent.remove_child(frame_id);
            }
        }
        if let Some(mut frame) = self.frames.remove(&frame_id) {
            frame.mark_detached();
            tracing::debug!(frame = %frame_id, "frame detached");
        }
        self.discharge_navigation_watches_for(frame_id);
    }
}

/// The frame tree and navigation state machine. Cheaply cloneable; every
/// clone shares the same underlying state.
#[derive(Clone)]
pub struct FrameManager {
    state: Arc<Mutex<State>>,
    config: Arc<EngineConfig>,
}

impl Default for FrameManager {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl FrameManager {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::new())),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolves once the first main frame has attached. Resolves to `None`
    /// if this manager is dropped beforehand instead of hanging or panicking.
    pub fn main_frame_id(&self) -> impl Future<Output = Option<FrameId>> + Send {
        self.state.lock().main_frame_promise.wait()
    }

    pub fn main_frame(&self) -> Option<FrameId> {
        self.state.lock().main_frame
    }

    pub fn frame_exists(&self, id: FrameId) -> bool {
        self.state.lock().frames.contains_key(&id)
    }

    pub fn with_frame<R>(&self, id: FrameId, f: impl FnOnce(&Frame) -> R) -> Option<R> {
        self.state.lock().frames.get(&id).map(f)
    }

    pub fn child_frame_ids(&self, id: FrameId) -> Vec<FrameId> {
        self.state
            .lock()
            .frames
            .get(&id)
            .map(|f| f.child_ids().collect())
            .unwrap_or_default()
    }

    pub fn parent_frame_id(&self, id: FrameId) -> Option<FrameId> {
        self.state.lock().frames.get(&id).and_then(|f| f.parent_id())
    }

    pub fn frame_url(&self, id: FrameId) -> Option<String> {
        self.state
            .lock()
            .frames
            .get(&id)
            .map(|f| f.url().to_string())
    }

    /// Single entry point for every inbound runtime-adapter event. Dispatch
    /// is fully synchronous and serialized by the single state mutex, so
    /// events are always applied in the order they arrive.
    #[tracing::instrument(skip(self), level = "debug")]
    pub fn dispatch(&self, event: RuntimeEvent) -> Result<()> {
        match event {
            RuntimeEvent::FrameAttached {
                frame_id,
                parent_id,
                url,
            } => self.on_frame_attached(frame_id, parent_id, url),
            RuntimeEvent::FrameRequestedNavigation {
                frame_id,
                document_id,
            } => {
                self.on_frame_requested_navigation(frame_id, document_id);
                Ok(())
            }
            RuntimeEvent::FrameCommittedNewDocument {
                frame_id,
                url,
                name,
                document_id,
                initial,
            } => {
                self.on_frame_committed_new_document(frame_id, url, name, document_id, initial);
                Ok(())
            }
            RuntimeEvent::FrameCommittedSameDocument { frame_id, url } => {
                self.on_frame_committed_same_document(frame_id, url);
                Ok(())
            }
            RuntimeEvent::FrameAbortedNavigation {
                frame_id,
                error_text,
                document_id,
            } => {
                self.on_frame_aborted_navigation(frame_id, error_text, document_id);
                Ok(())
            }
            RuntimeEvent::FrameDetached { frame_id } => {
                self.on_frame_detached(frame_id);
                Ok(())
            }
            RuntimeEvent::TabActivationChanged { active } => {
                tracing::trace!(active, "tab activation changed");
                Ok(())
            }
            RuntimeEvent::TabRemoved => {
                tracing::trace!("tab removed");
                Ok(())
            }
            RuntimeEvent::DownloadStarted(item) => {
                tracing::trace!(url = %item.url, "download started (external collaborator)");
                Ok(())
            }
            RuntimeEvent::DownloadCompleted(item) => {
                tracing::trace!(url = %item.url, "download completed (external collaborator)");
                Ok(())
            }
        }
    }

    fn on_frame_attached(
        &self,
        frame_id: FrameId,
        parent_id: Option<FrameId>,
        url: Option<String>,
    ) -> Result<()> {
        let mut state = self.state.lock();

        if let Some(frame) = state.frames.get(&frame_id) {
            // A re-attach of a known id under a *different* parent than the
            // one already on record is a genuine id collision, not the
            // idempotent "same navigation reported twice" case the round-trip
            // property (spec §8) describes — forbid it (spec §4.5 transition
            // 1, "forbid duplicate ids").
            if frame.parent_id() != parent_id {
                return Err(Error::DuplicateFrameId(frame_id));
            }
        }

        if let Some(frame) = state.frames.get_mut(&frame_id) {
            if let Some(url) = url {
                frame.set_url(url);
            }
            return Ok(());
        }

        match parent_id {
            None => {
                // attach-main. `frames[frameId] exists` was already handled
                // by the idempotent early-return above, so reaching here
                // always means a genuinely new frame id.
                if let Some(previous) = state.main_frame {
                    state.remove_frames_recursively(previous);
                    state.main_frame_promise.reset();
                    tracing::debug!(previous = %previous, frame = %frame_id, "main frame replaced");
                } else {
                    tracing::debug!(frame = %frame_id, "main frame attached");
                }
                let mut frame = Frame::new_main(frame_id, url);
                frame.mark_already_loaded_page();
                state.frames.insert(frame_id, frame);
                state.main_frame = Some(frame_id);
                state.main_frame_promise.fire(frame_id);
                Ok(())
            }
            Some(parent_id) => {
                // attach-child
                if !state.frames.contains_key(&parent_id) {
                    return Err(Error::ParentMissing {
                        parent_id,
                        child_id: frame_id,
                    });
                }
                let frame = Frame::new_child(frame_id, parent_id, url);
                state.frames.insert(frame_id, frame);
                if let Some(parent) = state.frames.get_mut(&parent_id) {
                    parent.add_child(frame_id);
                }
                tracing::debug!(parent = %parent_id, frame = %frame_id, "child frame attached");
                Ok(())
            }
        }
    }

    fn on_frame_requested_navigation(&self, frame_id: FrameId, document_id: Option<DocumentId>) {
        let mut state = self.state.lock();
        state.add_frame_navigation(frame_id);

        let Some(frame) = state.frames.get_mut(&frame_id) else {
            return;
        };
        // An absent pending id is adopted by any incoming id; a known
        // pending id is kept unless the incoming id is the same one, and a
        // known pending id is never clobbered by an absent incoming id.
        let should_set = match frame.pending_document().map(|d| &d.document_id) {
            None => true,
            Some(None) => true,
            Some(Some(pending_id)) => document_id.as_ref() == Some(pending_id),
        };
        if should_set {
            frame.set_pending_document(Some(Document { document_id }));
        }
    }

    fn on_frame_committed_new_document(
        &self,
        frame_id: FrameId,
        url: String,
        name: String,
        document_id: DocumentId,
        initial: bool,
    ) {
        let mut state = self.state.lock();

        let children: Vec<FrameId> = state
            .frames
            .get(&frame_id)
            .map(|f| f.child_ids().collect())
            .unwrap_or_default();
        for child in children {
            state.remove_frames_recursively(child);
        }

        let Some(frame) = state.frames.get_mut(&frame_id) else {
            return;
        };
        frame.set_url(url.clone());
        frame.set_name(name.clone());

        let pending = frame.pending_document().cloned();
        let mut keep_pending = None;
        match pending {
            Some(Document { document_id: None }) => {
                frame.set_current_document(Document::with_id(document_id));
                frame.set_pending_document(None);
            }
            Some(Document {
                document_id: Some(pending_id),
            }) if pending_id == document_id => {
                frame.set_current_document(Document::with_id(document_id));
                frame.set_pending_document(None);
            }
            Some(existing_pending) => {
                // overlap: commit a new current document, retain the
                // original pending.
                frame.set_current_document(Document::with_id(document_id.clone()));
                keep_pending = Some(existing_pending);
            }
            None => {
                frame.set_current_document(Document::with_id(document_id.clone()));
            }
        }

        frame.clear_lifecycle();

        let event = NavigationEvent {
            url: url.clone(),
            name: name.clone(),
            document: Some(frame.current_document().clone()),
            error: None,
            // I5: an initial committed navigation must not be surfaced as a
            // "navigated to new document" event externally.
            is_public: !initial,
        };
        frame.fire_internal_navigation(event);

        if !initial {
            tracing::debug!(frame = %frame_id, %url, "frame navigated to new document");
        } else {
            tracing::trace!(frame = %frame_id, %url, "initial navigation committed");
        }

        if let Some(kept) = keep_pending {
            frame.set_pending_document(Some(kept));
        }
    }

    fn on_frame_committed_same_document(&self, frame_id: FrameId, url: String) {
        let mut state = self.state.lock();
        let Some(frame) = state.frames.get_mut(&frame_id) else {
            return;
        };

        if let Some(pending) = frame.pending_document() {
            if pending.document_id.is_none() {
                frame.set_pending_document(None);
            }
        }
        frame.set_url(url.clone());

        let event = NavigationEvent {
            url,
            name: frame.name().to_string(),
            document: None,
            error: None,
            is_public: true,
        };
        frame.fire_internal_navigation(event);
    }

    fn on_frame_aborted_navigation(
        &self,
        frame_id: FrameId,
        error_text: String,
        document_id: Option<DocumentId>,
    ) {
        let mut state = self.state.lock();
        let Some(frame) = state.frames.get_mut(&frame_id) else {
            return;
        };

        // "No pending" genuinely ignores the abort. A pending document whose
        // own `documentId` hasn't resolved yet (still `None`) is a distinct
        // case — there is nothing to mismatch against, so it must not be
        // folded into the same ignore path (spec §3: a requested navigation
        // can be reported before its id is known).
        if frame.pending_document().is_none() {
            return;
        }
        let pending_doc_id = frame.pending_document().and_then(|d| d.document_id.clone());
        if let (Some(event_id), Some(pending_doc_id)) = (&document_id, &pending_doc_id) {
            if event_id != pending_doc_id {
                return;
            }
        }

        let is_public = match &document_id {
            Some(id) => !frame.has_redirected(id),
            None => true,
        };
        if let Some(id) = &document_id {
            frame.mark_redirected(id.clone());
        }

        frame.set_pending_document(None);

        let error = Error::NavigationAborted {
            document_id,
            message: error_text,
        };
        let event = NavigationEvent {
            url: frame.url().to_string(),
            name: frame.name().to_string(),
            document: None,
            error: Some(error),
            is_public,
        };
        frame.fire_internal_navigation(event);
    }

    fn on_frame_detached(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        state.remove_frames_recursively(frame_id);
    }

    /// Disposes all non-main frames, resets the main frame's child set,
    /// keeps main in the map.
    pub fn clear_frames(&self) {
        let mut state = self.state.lock();
        let Some(main_id) = state.main_frame else {
            return;
        };
        let children: Vec<FrameId> = state
            .frames
            .get(&main_id)
            .map(|f| f.child_ids().collect())
            .unwrap_or_default();
        for child in children {
            state.remove_frames_recursively(child);
        }
        if let Some(main) = state.frames.get_mut(&main_id) {
            main.take_children();
        }
    }

    fn register_barrier(&self, barrier: Arc<SignalBarrier>) {
        self.state.lock().signal_barriers.push(barrier);
    }

    fn unregister_barrier(&self, barrier: &Arc<SignalBarrier>) {
        let mut state = self.state.lock();
        state
            .signal_barriers
            .retain(|b| !Arc::ptr_eq(b, barrier));
        state
            .navigation_watches
            .retain(|w| !Arc::ptr_eq(&w.barrier, barrier));
    }

    /// Brackets a speculative navigation hint symmetrically via RAII
    /// (resolved per `DESIGN.md` Open Question 1): retains every barrier
    /// active right now, and releases exactly those same barriers when the
    /// returned guard drops, so a superseded speculative navigation can
    /// never leave a barrier over- or under-retained.
    pub fn begin_optimistic_navigation(&self) -> OptimisticNavigationHint {
        let barriers = self.state.lock().signal_barriers.clone();
        for barrier in &barriers {
            barrier.retain();
        }
        OptimisticNavigationHint { barriers }
    }

    /// Auto-wait driver: opens a barrier for the duration of `action` plus
    /// any top-level navigations it transitively triggers, releasing only
    /// when they all commit (or the frame detaches, or `progress` aborts).
    pub async fn wait_for_signals_created_by<F, Fut, T>(
        &self,
        progress: &Progress,
        wait_after: bool,
        action: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !wait_after {
            return action().await;
        }

        let barrier = SignalBarrier::new();
        self.register_barrier(barrier.clone());
        {
            let manager = self.clone();
            let cleanup_barrier = barrier.clone();
            progress.cleanup_when_aborted(move |_| manager.unregister_barrier(&cleanup_barrier));
        }

        let action_result = action().await;

        let wait_result = progress.race(barrier.wait_for()).await;

        self.unregister_barrier(&barrier);

        // Action-layer failures are never suppressed by the barrier drain
        // (spec §7); but if the action succeeded, a Progress abort/timeout
        // while waiting for its triggered navigations to settle is the
        // auto-wait's own failure and must propagate, not be swallowed.
        match action_result {
            Err(err) => Err(err),
            Ok(value) => {
                wait_result?;
                crate::timer::yield_once().await;
                Ok(value)
            }
        }
    }
}

/// RAII bracket for a speculative ("optimistic") navigation hint. Dropping
/// it releases exactly the barriers retained when it was created — see
/// [`FrameManager::begin_optimistic_navigation`].
pub struct OptimisticNavigationHint {
    barriers: Vec<Arc<SignalBarrier>>,
}

impl Drop for OptimisticNavigationHint {
    fn drop(&mut self) {
        for barrier in &self.barriers {
            barrier.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attach_main(manager: &FrameManager, id: u64) {
        manager
            .dispatch(RuntimeEvent::FrameAttached {
                frame_id: FrameId(id),
                parent_id: None,
                url: Some("about:blank".into()),
            })
            .unwrap();
    }

    /// S1. Basic commit.
    #[test]
    fn s1_basic_commit() {
        let manager = FrameManager::default();
        attach_main(&manager, 1);
        manager
            .dispatch(RuntimeEvent::FrameRequestedNavigation {
                frame_id: FrameId(1),
                document_id: Some(DocumentId::from("D1")),
            })
            .unwrap();
        manager
            .dispatch(RuntimeEvent::FrameCommittedNewDocument {
                frame_id: FrameId(1),
                url: "https://x/1".into(),
                name: "".into(),
                document_id: DocumentId::from("D1"),
                initial: false,
            })
            .unwrap();

        manager.with_frame(FrameId(1), |frame| {
            assert_eq!(frame.url(), "https://x/1");
            assert_eq!(
                frame.current_document().document_id,
                Some(DocumentId::from("D1"))
            );
            assert!(frame.pending_document().is_none());
        });
    }

    /// I5: an `initial: true` commit (the first commit of a freshly attached
    /// frame) must not be surfaced as a public "navigated to new document"
    /// event, unlike an ordinary `initial: false` commit.
    #[test]
    fn i5_initial_commit_is_not_public_but_later_commit_is() {
        let manager = FrameManager::default();
        attach_main(&manager, 1);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        manager.with_frame(FrameId(1), |frame| {
            frame.on_internal_navigation(move |event| {
                seen2.lock().push(event.is_public);
            });
        });

        manager
            .dispatch(RuntimeEvent::FrameCommittedNewDocument {
                frame_id: FrameId(1),
                url: "https://x/initial".into(),
                name: "".into(),
                document_id: DocumentId::from("D0"),
                initial: true,
            })
            .unwrap();
        manager
            .dispatch(RuntimeEvent::FrameCommittedNewDocument {
                frame_id: FrameId(1),
                url: "https://x/1".into(),
                name: "".into(),
                document_id: DocumentId::from("D1"),
                initial: false,
            })
            .unwrap();

        assert_eq!(*seen.lock(), vec![false, true]);
    }

    /// S2. Overlap with retained pending.
    #[test]
    fn s2_overlap_retains_pending() {
        let manager = FrameManager::default();
        attach_main(&manager, 1);
        manager
            .dispatch(RuntimeEvent::FrameRequestedNavigation {
                frame_id: FrameId(1),
                document_id: Some(DocumentId::from("A")),
            })
            .unwrap();
        manager
            .dispatch(RuntimeEvent::FrameCommittedNewDocument {
                frame_id: FrameId(1),
                url: "e://err".into(),
                name: "".into(),
                document_id: DocumentId::from("B"),
                initial: false,
            })
            .unwrap();

        manager.with_frame(FrameId(1), |frame| {
            assert_eq!(
                frame.current_document().document_id,
                Some(DocumentId::from("B"))
            );
            assert_eq!(
                frame.pending_document().unwrap().document_id,
                Some(DocumentId::from("A"))
            );
        });
    }

    /// S3. Same-document navigation.
    #[test]
    fn s3_same_document_navigation() {
        let manager = FrameManager::default();
        attach_main(&manager, 1);
        manager
            .dispatch(RuntimeEvent::FrameRequestedNavigation {
                frame_id: FrameId(1),
                document_id: Some(DocumentId::from("D1")),
            })
            .unwrap();
        manager
            .dispatch(RuntimeEvent::FrameCommittedNewDocument {
                frame_id: FrameId(1),
                url: "https://x/1".into(),
                name: "".into(),
                document_id: DocumentId::from("D1"),
                initial: false,
            })
            .unwrap();
        manager
            .dispatch(RuntimeEvent::FrameCommittedSameDocument {
                frame_id: FrameId(1),
                url: "https://x/1#sec".into(),
            })
            .unwrap();

        manager.with_frame(FrameId(1), |frame| {
            assert_eq!(frame.url(), "https://x/1#sec");
            assert_eq!(
                frame.current_document().document_id,
                Some(DocumentId::from("D1"))
            );
        });
    }

    #[tokio::test]
    async fn s4_auto_wait_returns_only_after_commit() {
        let manager = FrameManager::default();
        attach_main(&manager, 1);

        let controller = crate::progress::ProgressController::new(None);
        let manager_for_action = manager.clone();
        let result = controller
            .run(|progress| async move {
                manager_for_action
                    .wait_for_signals_created_by(&progress, true, || async {
                        manager_for_action.dispatch(RuntimeEvent::FrameRequestedNavigation {
                            frame_id: FrameId(1),
                            document_id: Some(DocumentId::from("D2")),
                        })?;
                        manager_for_action.dispatch(RuntimeEvent::FrameCommittedNewDocument {
                            frame_id: FrameId(1),
                            url: "https://x/2".into(),
                            name: "".into(),
                            document_id: DocumentId::from("D2"),
                            initial: false,
                        })?;
                        Ok(42)
                    })
                    .await
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        manager.with_frame(FrameId(1), |frame| {
            assert_eq!(
                frame.current_document().document_id,
                Some(DocumentId::from("D2"))
            );
        });
    }

    #[test]
    fn attach_child_with_unknown_parent_fails() {
        let manager = FrameManager::default();
        attach_main(&manager, 1);
        let result = manager.dispatch(RuntimeEvent::FrameAttached {
            frame_id: FrameId(2),
            parent_id: Some(FrameId(99)),
            url: None,
        });
        assert!(matches!(result, Err(Error::ParentMissing { .. })));
    }

    #[test]
    fn detach_removes_frame_and_descendants() {
        let manager = FrameManager::default();
        attach_main(&manager, 1);
        manager
            .dispatch(RuntimeEvent::FrameAttached {
                frame_id: FrameId(2),
                parent_id: Some(FrameId(1)),
                url: None,
            })
            .unwrap();
        manager
            .dispatch(RuntimeEvent::FrameAttached {
                frame_id: FrameId(3),
                parent_id: Some(FrameId(2)),
                url: None,
            })
            .unwrap();

        manager
            .dispatch(RuntimeEvent::FrameDetached {
                frame_id: FrameId(2),
            })
            .unwrap();

        assert!(!manager.frame_exists(FrameId(2)));
        assert!(!manager.frame_exists(FrameId(3)));
        assert!(manager.frame_exists(FrameId(1)));
        assert!(manager.child_frame_ids(FrameId(1)).is_empty());
    }

    #[test]
    fn main_frame_replacement_disposes_old_tree() {
        let manager = FrameManager::default();
        attach_main(&manager, 1);
        manager
            .dispatch(RuntimeEvent::FrameAttached {
                frame_id: FrameId(2),
                parent_id: Some(FrameId(1)),
                url: None,
            })
            .unwrap();

        manager
            .dispatch(RuntimeEvent::FrameAttached {
                frame_id: FrameId(10),
                parent_id: None,
                url: Some("https://new/".into()),
            })
            .unwrap();

        assert!(!manager.frame_exists(FrameId(1)));
        assert!(!manager.frame_exists(FrameId(2)));
        assert_eq!(manager.main_frame(), Some(FrameId(10)));
    }

    #[tokio::test]
    async fn main_frame_id_resolves_once_attached() {
        let manager = FrameManager::default();
        let waiter = manager.main_frame_id();
        attach_main(&manager, 7);
        assert_eq!(waiter.await, Some(FrameId(7)));
    }

    #[tokio::test]
    async fn main_frame_id_resolves_to_none_if_manager_dropped_before_attach() {
        let manager = FrameManager::default();
        let waiter = manager.main_frame_id();
        drop(manager);
        assert_eq!(waiter.await, None);
    }

    #[test]
    fn abort_before_aborted_navigation_is_public_unless_redirected() {
        let manager = FrameManager::default();
        attach_main(&manager, 1);
        manager
            .dispatch(RuntimeEvent::FrameRequestedNavigation {
                frame_id: FrameId(1),
                document_id: Some(DocumentId::from("D1")),
            })
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        manager.with_frame(FrameId(1), |frame| {
            frame.on_internal_navigation(move |event| {
                seen2.lock().push(event.is_public);
            });
        });

        manager
            .dispatch(RuntimeEvent::FrameAbortedNavigation {
                frame_id: FrameId(1),
                error_text: "net::ERR_ABORTED".into(),
                document_id: Some(DocumentId::from("D1")),
            })
            .unwrap();

        assert_eq!(*seen.lock(), vec![true]);
        manager.with_frame(FrameId(1), |frame| {
            assert!(frame.pending_document().is_none());
        });
    }

    /// A pending document whose `documentId` hasn't resolved yet, aborted by
    /// an event that also carries no `documentId` (cancelled before the
    /// runtime ever assigned it one), must still be processed: pending
    /// cleared and the abort surfaced, not silently dropped.
    #[test]
    fn abort_with_unresolved_pending_id_is_still_processed() {
        let manager = FrameManager::default();
        attach_main(&manager, 1);
        manager
            .dispatch(RuntimeEvent::FrameRequestedNavigation {
                frame_id: FrameId(1),
                document_id: None,
            })
            .unwrap();
        manager.with_frame(FrameId(1), |frame| {
            assert!(frame.pending_document().is_some());
        });

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        manager.with_frame(FrameId(1), |frame| {
            frame.on_internal_navigation(move |event| {
                seen2.lock().push(event.error.is_some());
            });
        });

        manager
            .dispatch(RuntimeEvent::FrameAbortedNavigation {
                frame_id: FrameId(1),
                error_text: "net::ERR_ABORTED".into(),
                document_id: None,
            })
            .unwrap();

        assert_eq!(*seen.lock(), vec![true]);
        manager.with_frame(FrameId(1), |frame| {
            assert!(frame.pending_document().is_none());
        });
    }

    /// DESIGN.md Open Question 1: the optimistic-navigation bracket must
    /// retain and release the exact same set of barriers, symmetrically,
    /// even for barriers registered after the hint was taken out.
    #[test]
    fn optimistic_navigation_hint_retains_and_releases_symmetrically() {
        let manager = FrameManager::default();
        attach_main(&manager, 1);

        let barrier = SignalBarrier::new();
        manager.register_barrier(barrier.clone());
        assert_eq!(barrier.protect_count(), 1);

        let hint = manager.begin_optimistic_navigation();
        assert_eq!(barrier.protect_count(), 2);
        drop(hint);
        assert_eq!(barrier.protect_count(), 1);
    }

    #[test]
    fn reattaching_known_id_under_different_parent_is_rejected() {
        let manager = FrameManager::default();
        attach_main(&manager, 1);
        manager
            .dispatch(RuntimeEvent::FrameAttached {
                frame_id: FrameId(2),
                parent_id: Some(FrameId(1)),
                url: None,
            })
            .unwrap();

        let result = manager.dispatch(RuntimeEvent::FrameAttached {
            frame_id: FrameId(2),
            parent_id: None,
            url: None,
        });
        assert!(matches!(result, Err(Error::DuplicateFrameId(id)) if id == FrameId(2)));
    }

    #[test]
    fn reattaching_known_id_under_same_parent_is_idempotent() {
        let manager = FrameManager::default();
        attach_main(&manager, 1);
        manager
            .dispatch(RuntimeEvent::FrameAttached {
                frame_id: FrameId(2),
                parent_id: Some(FrameId(1)),
                url: Some("about:blank".into()),
            })
            .unwrap();
        manager
            .dispatch(RuntimeEvent::FrameAttached {
                frame_id: FrameId(2),
                parent_id: Some(FrameId(1)),
                url: Some("https://x/updated".into()),
            })
            .unwrap();

        manager.with_frame(FrameId(2), |frame| {
            assert_eq!(frame.url(), "https://x/updated");
            assert_eq!(frame.parent_id(), Some(FrameId(1)));
        });
    }

    /// A Progress abort while waiting for the barrier to drain must
    /// propagate, even if the action itself already succeeded — it is not
    /// swallowed in favor of the stale action result. Uses an externally
    /// triggered abort (rather than the controller's own timeout select) so
    /// the bug this guards against — discarding the barrier race's result —
    /// is actually exercised rather than pre-empted by the outer select.
    #[tokio::test]
    async fn auto_wait_propagates_abort_when_barrier_never_drains() {
        let manager = FrameManager::default();
        attach_main(&manager, 1);

        let controller = crate::progress::ProgressController::new(None);
        let handle = controller.progress();
        let manager_for_action = manager.clone();
        let task = controller.run(|progress| async move {
            manager_for_action
                .wait_for_signals_created_by(&progress, true, || async {
                    // Triggers a navigation request but never commits it, so
                    // the barrier can only drain once the Progress aborts.
                    manager_for_action.dispatch(RuntimeEvent::FrameRequestedNavigation {
                        frame_id: FrameId(1),
                        document_id: Some(DocumentId::from("D2")),
                    })?;
                    Ok(42)
                })
                .await
        });
        let aborter = async move {
            crate::timer::delay(std::time::Duration::from_millis(10)).await;
            handle.abort(Error::AdapterFailure("stop".into()));
        };
        let (result, _): (Result<i32>, _) = futures::join!(task, aborter);

        assert!(result.is_err());
        assert!(result.unwrap_err().is_abort());
    }
}
