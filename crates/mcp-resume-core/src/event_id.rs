//! Event id format.
//!
//! The stream id must stay recoverable from an event id alone: after a page
//! reload the only thing the server gets back is the client's last id.

use crate::traits::EventId;

/// Build the event id for the `sequence`-th event of `stream_id`.
#[must_use]
pub fn format_event_id(stream_id: &str, sequence: u64) -> EventId {
    format!("{stream_id}_{sequence}")
}

/// Recover the stream id: everything before the last `_`.
#[must_use]
pub fn stream_id_from_event_id(event_id: &str) -> Option<&str> {
    match event_id.rsplit_once('_') {
        Some((stream_id, _)) if !stream_id.is_empty() => Some(stream_id),
        _ => None,
    }
}
