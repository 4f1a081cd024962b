use thiserror::Error;

use crate::frame::{DocumentId, FrameId};

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All error kinds the core can surface.
///
/// Cloneable so an abort error can be handed back to every concurrent
/// [`crate::progress::Progress::race`] caller without re-boxing it for each
/// one; the few non-`Clone` sources we wrap (channel errors) are captured as
/// their `Display` text instead of the original type.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A [`crate::progress::Progress`] deadline was exceeded.
    #[error("operation timed out")]
    Timeout,

    /// The operation was cancelled, either by an explicit
    /// [`crate::progress::ProgressController::abort`] or because the caught
    /// error was stamped as an abort while the controller was still running.
    #[error("aborted: {0}")]
    Aborted(Box<Error>),

    /// A navigation was aborted by the runtime. Public iff `document_id` was
    /// not previously seen redirecting.
    #[error("navigation aborted: {message}")]
    NavigationAborted {
        document_id: Option<DocumentId>,
        message: String,
    },

    /// `frameAttached` named a parent frame the manager doesn't know about.
    #[error("parent frame {parent_id} missing for child frame {child_id}")]
    ParentMissing { parent_id: FrameId, child_id: FrameId },

    /// `frameAttached` named a frame id that's already tracked.
    #[error("duplicate frame id {0}")]
    DuplicateFrameId(FrameId),

    /// An injected-script evaluation failed with an error class that isn't
    /// worth retrying (ReferenceError, TypeError, SyntaxError, RangeError,
    /// EvalError, URIError).
    #[error("non-retriable evaluation error: {0}")]
    NonRetriableEvaluation(String),

    /// Opaque wrap of a runtime-adapter failure.
    #[error("runtime adapter failure: {0}")]
    AdapterFailure(String),

    /// An internal channel used to talk to async tasks was disconnected.
    #[error("internal channel closed")]
    ChannelClosed,
}

impl Error {
    /// Whether this error already carries cancellation semantics, i.e. a
    /// caller reading it should treat the operation as cancelled rather than
    /// as a plain business failure.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Timeout | Error::Aborted(_))
    }

    /// Stamp `self` as an abort error. A no-op if it already is one, so
    /// repeated stamping (e.g. a timeout bubbling through nested
    /// `Progress`es) never nests.
    pub fn stamp_abort(self) -> Error {
        if self.is_abort() {
            self
        } else {
            Error::Aborted(Box::new(self))
        }
    }

    /// The original cause, unwrapping one layer of [`Error::Aborted`].
    pub fn cause(&self) -> &Error {
        match self {
            Error::Aborted(inner) => inner,
            other => other,
        }
    }
}

impl<T> From<futures::channel::mpsc::TrySendError<T>> for Error {
    fn from(_: futures::channel::mpsc::TrySendError<T>) -> Self {
        Error::ChannelClosed
    }
}

impl From<futures::channel::mpsc::SendError> for Error {
    fn from(_: futures::channel::mpsc::SendError) -> Self {
        Error::ChannelClosed
    }
}

impl From<futures::channel::oneshot::Canceled> for Error {
    fn from(_: futures::channel::oneshot::Canceled) -> Self {
        Error::ChannelClosed
    }
}

/// Error classes the injected script may report for a failed evaluation;
/// these never benefit from a retry.
const NON_RETRIABLE_CLASSES: &[&str] = &[
    "ReferenceError",
    "TypeError",
    "SyntaxError",
    "RangeError",
    "EvalError",
    "URIError",
];

/// Classifies an evaluation error message by its leading `ClassName:` prefix,
/// the convention injected-script failures are reported under.
pub fn is_non_retriable_error_class(message: &str) -> bool {
    NON_RETRIABLE_CLASSES
        .iter()
        .any(|class| message.starts_with(class))
}
