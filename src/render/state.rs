//! Render state predicates. The state is derived from timestamps, never stored.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::models::Document;

fn age(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    // Clock skew can put `then` in the future; treat that as just started.
    (now - then).to_std().unwrap_or(Duration::ZERO)
}

/// A render holds the lock and has not yet outlived `timeout`.
pub fn is_rendering_in_progress(doc: &Document, now: DateTime<Utc>, timeout: Duration) -> bool {
    doc.render_started_at
        .map(|started| age(now, started) < timeout)
        .unwrap_or(false)
}

/// A render lock exists but is stale; a new render may take over.
pub fn is_rendering_timed_out(doc: &Document, now: DateTime<Utc>, timeout: Duration) -> bool {
    doc.render_started_at
        .map(|started| age(now, started) >= timeout)
        .unwrap_or(false)
}

/// A deferred render was queued after the last completed render and is still pending.
///
/// Schedules older than `timeout` are treated as lost so that callers enqueue again.
pub fn is_rendering_scheduled(doc: &Document, now: DateTime<Utc>, timeout: Duration) -> bool {
    let Some(scheduled) = doc.render_scheduled_at else {
        return false;
    };
    if is_rendering_in_progress(doc, now, timeout) || age(now, scheduled) >= timeout {
        return false;
    }
    match doc.last_rendered_at {
        Some(last) => scheduled > last,
        None => true,
    }
}
