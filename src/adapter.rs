//! Runtime adapter boundary.
//!
//! This is the sole seam between the core and an ambient browser runtime.
//! Modeled as a dyn-safe trait object: the core never knows or cares which
//! wire protocol (CDP, or anything else) sits behind it. The transport is
//! entirely the host's problem.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::frame::{DocumentId, FrameId};

/// Which JavaScript world an evaluation or injected-script call runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum World {
    Main,
    Isolated,
}

/// Options accepted by [`RuntimeAdapter::goto`].
#[derive(Debug, Clone, Default)]
pub struct GotoOptions {
    pub wait_until: Option<WaitUntil>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    Load,
    DomContentLoaded,
    NetworkIdle,
    Commit,
}

/// Inbound events the runtime adapter delivers to the
/// [`crate::frame_manager::FrameManager`].
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    FrameAttached {
        frame_id: FrameId,
        parent_id: Option<FrameId>,
        url: Option<String>,
    },
    FrameRequestedNavigation {
        frame_id: FrameId,
        document_id: Option<DocumentId>,
    },
    FrameCommittedNewDocument {
        frame_id: FrameId,
        url: String,
        name: String,
        document_id: DocumentId,
        initial: bool,
    },
    FrameCommittedSameDocument {
        frame_id: FrameId,
        url: String,
    },
    FrameAbortedNavigation {
        frame_id: FrameId,
        error_text: String,
        document_id: Option<DocumentId>,
    },
    FrameDetached {
        frame_id: FrameId,
    },
    TabActivationChanged {
        active: bool,
    },
    TabRemoved,
    /// Pass-through notification for the external download manager —
    /// downloads are out of scope for this core, which only logs these
    /// events, but the adapter contract still needs to model them since they
    /// share the same event channel.
    DownloadStarted(DownloadItem),
    DownloadCompleted(DownloadItem),
}

/// One entry of the external download queue. The core never mutates or
/// retains these; it is purely a pass-through type so hosts can route the
/// event to their own download manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadItem {
    pub suggested_filename: String,
    pub url: String,
    pub state: DownloadState,
    pub path: Option<String>,
    pub show: bool,
    pub save_as: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadState {
    InProgress,
    Completed,
    Canceled,
}

/// Opaque element reference produced by the injected script. The core only
/// ever threads these through to the adapter; it never dereferences them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementHandle(pub String);

/// Result of one `ariaSnapshot` call. The injected script can report "not
/// ready yet" without that being an error — the AI snapshot composer treats
/// that the same as a retriable failure and tries again after the next
/// backoff.
#[derive(Debug, Clone)]
pub enum AriaSnapshotOutcome {
    Ready(String),
    ContinuePolling,
}

/// The capability surface the core needs from the ambient runtime.
/// Implementors speak whatever wire protocol they like; the core depends
/// only on this trait.
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    /// Executes `expression` in `world` inside `frame`, returning a
    /// serializable result.
    async fn evaluate(
        &self,
        frame: FrameId,
        expression: &str,
        args: serde_json::Value,
        world: World,
    ) -> Result<serde_json::Value>;

    /// Calls the injected script's `ariaSnapshot(forAI, refPrefix, world)`.
    async fn aria_snapshot(
        &self,
        frame: FrameId,
        for_ai: bool,
        ref_prefix: &str,
        world: World,
    ) -> Result<AriaSnapshotOutcome>;

    async fn get_element_by_handle(&self, handle: &ElementHandle) -> Result<Option<ElementHandle>>;

    async fn register_element_function(&self, name: &str, description: Option<&str>) -> Result<()>;

    async fn get_registered_element_functions(&self) -> Result<Vec<String>>;

    async fn call_element_function(
        &self,
        name: &str,
        element: &ElementHandle,
        args: serde_json::Value,
    ) -> Result<serde_json::Value>;

    async fn goto(&self, frame: FrameId, url: &str, options: GotoOptions) -> Result<()>;

    async fn go_back(&self, frame: FrameId) -> Result<()>;

    async fn go_forward(&self, frame: FrameId) -> Result<()>;

    async fn reload(&self, frame: FrameId) -> Result<()>;

    /// Resolves a selector against `frame`, returning the child frame it
    /// denotes, if any exists and is reachable within the call's own
    /// timeout.
    async fn resolve_frame_selector(
        &self,
        frame: FrameId,
        selector: &str,
    ) -> Result<Option<FrameId>>;

    /// Cheap availability probe used by the AI snapshot composer before
    /// attempting the more expensive frame resolution.
    async fn element_exists(&self, frame: FrameId, selector: &str) -> Result<bool>;
}
