//! `pagewright` — the frame-tree/navigation state machine, progress
//! cancellation runtime, signal-barrier auto-wait mechanism, and AI
//! ARIA-snapshot composer behind a scripted browser-automation engine.
//!
//! This crate has no binary target and drives no browser by itself: a host
//! process embeds it and supplies a [`adapter::RuntimeAdapter`]
//! implementation wired up to a real browser runtime. Everything element
//! selection, input emulation, downloads, and screenshotting does lives
//! outside this crate's scope — see `DESIGN.md` for the boundary.

pub mod adapter;
pub mod barrier;
pub mod config;
pub mod error;
pub mod event;
pub mod frame;
pub mod frame_manager;
pub mod progress;
pub mod snapshot;
mod timer;

pub use adapter::{AriaSnapshotOutcome, RuntimeAdapter, RuntimeEvent, World};
pub use barrier::{BarrierCompletion, SignalBarrier};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use frame::{Document, DocumentId, Frame, FrameId};
pub use frame_manager::FrameManager;
pub use progress::{execute_with_progress, Progress, ProgressController};
pub use snapshot::create_page_snapshot_for_ai;
