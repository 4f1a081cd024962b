//! AI ARIA-snapshot composer.
//!
//! Recursively composes one ARIA-style text snapshot per frame, descending
//! into iframes via the selector protocol and degrading gracefully — a
//! per-iframe failure becomes a placeholder line, never an aborted outer
//! snapshot.

use std::future::Future;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use futures::future::{self, Either};
use regex::Regex;

use crate::adapter::{AriaSnapshotOutcome, RuntimeAdapter, World};
use crate::error::{Error, Result};
use crate::frame::{Frame, FrameId};
use crate::frame_manager::FrameManager;
use crate::progress::Progress;

fn iframe_line_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\s*)- iframe (?:\[active\] )?\[ref=(.*)\]").expect("static regex is valid")
    })
}

/// Races `fut` against a local timeout (independent of `progress`'s own
/// deadline) and against `progress`'s abort signal — per-probe timeouts,
/// layered on top of the outer `progress`.
async fn with_local_timeout<T, F>(progress: &Progress, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = T> + Send,
    T: Send,
{
    let raced = async move {
        futures::pin_mut!(fut);
        match future::select(fut, crate::timer::delay(timeout)).await {
            Either::Left((value, _)) => Ok(value),
            Either::Right((_, _)) => Err(Error::Timeout),
        }
    };
    progress.race(raced).await?
}

/// The public entry point: composes the whole frame tree's AI snapshot
/// starting from `main_frame`.
pub async fn create_page_snapshot_for_ai(
    progress: &Progress,
    manager: &FrameManager,
    adapter: &Arc<dyn RuntimeAdapter>,
    main_frame: FrameId,
) -> Result<String> {
    let mut frame_ids = Vec::new();
    snapshot_frame_for_ai(progress, manager, adapter, main_frame, 0, &mut frame_ids).await
}

fn snapshot_frame_for_ai<'a>(
    progress: &'a Progress,
    manager: &'a FrameManager,
    adapter: &'a Arc<dyn RuntimeAdapter>,
    frame_id: FrameId,
    frame_ordinal: usize,
    frame_ids: &'a mut Vec<FrameId>,
) -> std::pin::Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
    Box::pin(async move {
        let ref_prefix = if frame_ordinal == 0 {
            String::new()
        } else {
            format!("f{frame_ordinal}")
        };

        let backoffs = manager.config().ai_snapshot_backoffs_ms.clone();
        let snapshot_text = Frame::retry_with_progress_and_timeouts(progress, &backoffs, || {
            let adapter = adapter.clone();
            let ref_prefix = ref_prefix.clone();
            async move {
                match adapter
                    .aria_snapshot(frame_id, true, &ref_prefix, World::Main)
                    .await
                {
                    Ok(AriaSnapshotOutcome::Ready(text)) => Ok(Some(text)),
                    Ok(AriaSnapshotOutcome::ContinuePolling) => Ok(None),
                    Err(err) => Err(err),
                }
            }
        })
        .await?;

        let mut rendered_lines = Vec::with_capacity(snapshot_text.lines().count());
        for line in snapshot_text.lines() {
            if let Some(captures) = iframe_line_pattern().captures(line) {
                let leading_space = captures.get(1).map(|m| m.as_str()).unwrap_or("");
                let reference = captures.get(2).map(|m| m.as_str()).unwrap_or("");
                let rendered = render_iframe_line(
                    progress,
                    manager,
                    adapter,
                    frame_id,
                    line,
                    leading_space,
                    reference,
                    frame_ids,
                )
                .await;
                rendered_lines.push(rendered);
            } else {
                rendered_lines.push(line.to_string());
            }
        }
        Ok(rendered_lines.join("\n"))
    })
}

#[allow(clippy::too_many_arguments)]
async fn render_iframe_line(
    progress: &Progress,
    manager: &FrameManager,
    adapter: &Arc<dyn RuntimeAdapter>,
    frame_id: FrameId,
    original_line: &str,
    leading_space: &str,
    reference: &str,
    frame_ids: &mut Vec<FrameId>,
) -> String {
    match resolve_and_snapshot_iframe(progress, manager, adapter, frame_id, reference, frame_ids)
        .await
    {
        Ok(IframeOutcome::Snapshot(child_text)) => {
            let mut out = format!("{original_line}:");
            for line in child_text.lines() {
                out.push('\n');
                out.push_str(leading_space);
                out.push_str("  ");
                out.push_str(line);
            }
            out
        }
        Ok(IframeOutcome::NotAccessible) => {
            format!("  [iframe {reference} - not accessible or not ready]")
        }
        Ok(IframeOutcome::ResolutionFailed(msg)) => {
            format!("  [iframe {reference} - resolution failed: {msg}]")
        }
        Ok(IframeOutcome::NoChildFrame) => {
            format!("  [iframe {reference} - no child frame found]")
        }
        Err(err) => format!("{original_line} [resolution error: {err}]"),
    }
}

enum IframeOutcome {
    Snapshot(String),
    NotAccessible,
    ResolutionFailed(String),
    NoChildFrame,
}

/// Availability probe, then frame resolution, then recursion — each with
/// its own bounded timeout.
async fn resolve_and_snapshot_iframe(
    progress: &Progress,
    manager: &FrameManager,
    adapter: &Arc<dyn RuntimeAdapter>,
    frame_id: FrameId,
    reference: &str,
    frame_ids: &mut Vec<FrameId>,
) -> Result<IframeOutcome> {
    let config = manager.config();
    let element_selector = format!("aria-ref={reference}");

    let available = with_local_timeout(
        progress,
        config.iframe_availability_timeout,
        adapter.element_exists(frame_id, &element_selector),
    )
    .await;

    let available = match available {
        Ok(Ok(true)) => true,
        Ok(Ok(false)) | Ok(Err(_)) | Err(_) => false,
    };
    if !available {
        return Ok(IframeOutcome::NotAccessible);
    }

    let frame_selector = format!("aria-ref={reference} >> internal:control=enter-frame");
    let frame_body_selector = format!("{frame_selector} >> body");

    let resolved = with_local_timeout(
        progress,
        config.iframe_resolution_timeout,
        adapter.resolve_frame_selector(frame_id, &frame_body_selector),
    )
    .await;

    let child_id = match resolved {
        Ok(Ok(Some(id))) => id,
        Ok(Ok(None)) => return Ok(IframeOutcome::NoChildFrame),
        Ok(Err(err)) => return Ok(IframeOutcome::ResolutionFailed(err.to_string())),
        Err(err) => return Ok(IframeOutcome::ResolutionFailed(err.to_string())),
    };

    frame_ids.push(child_id);
    let ordinal = frame_ids.len();
    let child_snapshot =
        snapshot_frame_for_ai(progress, manager, adapter, child_id, ordinal, frame_ids).await?;
    Ok(IframeOutcome::Snapshot(child_snapshot))
}
