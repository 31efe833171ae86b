//! Clears stale stream registrations before a resume is handled.
//!
//! A client that reconnects after a silent drop asks to reopen a stream the
//! registry still believes is open. Without this pass, the registry's own
//! conflict check rejects the resume with 409.

use mcp_resume_core::{STANDALONE_STREAM_ID, stream_id_from_event_id};

use crate::registry::StreamRegistry;

/// Remove the registration for the stream `last_event_id` belongs to, and the
/// standalone stream's registration.
///
/// Cleanup errors are logged and otherwise ignored.
pub fn cleanup_stale_stream_mappings(registry: &StreamRegistry, last_event_id: Option<&str>) {
    if let Some(stream_id) = last_event_id.and_then(stream_id_from_event_id) {
        cleanup(registry, stream_id);
    }
    cleanup(registry, STANDALONE_STREAM_ID);
}

fn cleanup(registry: &StreamRegistry, stream_id: &str) {
    if !registry.contains(stream_id) {
        return;
    }
    if let Err(e) = registry.cleanup(stream_id) {
        tracing::debug!(stream_id, "Ignoring stream cleanup failure: {e}");
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::assert_ok;

    use super::*;
    use crate::registry::RegistryError;

    // Pins the registry behavior this pass relies on: a dead channel keeps its
    // slot, re-registration conflicts, and cleanup frees the slot.
    #[test]
    fn test_registry_contract() {
        let registry = StreamRegistry::new();
        drop(registry.open("req-1").unwrap());
        assert!(registry.contains("req-1"));
        assert_eq!(
            registry.open("req-1").unwrap_err(),
            RegistryError::Conflict("req-1".into())
        );
        assert!(registry.cleanup("req-1").is_err());
        assert!(!registry.contains("req-1"));
    }

    #[test]
    fn test_resume_after_silent_drop() {
        let registry = StreamRegistry::new();
        drop(registry.open("req-1").unwrap());
        drop(registry.open(STANDALONE_STREAM_ID).unwrap());

        cleanup_stale_stream_mappings(&registry, Some("req-1_4"));

        assert!(registry.is_empty());
        let _rx = assert_ok!(registry.open("req-1"));
    }

    #[test]
    fn test_live_channels_are_also_replaced() {
        let registry = StreamRegistry::new();
        let mut live = registry.open(STANDALONE_STREAM_ID).unwrap();

        cleanup_stale_stream_mappings(&registry, None);

        assert!(!registry.contains(STANDALONE_STREAM_ID));
        assert!(live.try_recv().is_err());
    }

    #[test]
    fn test_leaves_unrelated_streams() {
        let registry = StreamRegistry::new();
        let _other = registry.open("req-2").unwrap();

        cleanup_stale_stream_mappings(&registry, Some("req-1_1"));
        cleanup_stale_stream_mappings(&registry, Some("malformed"));

        assert!(registry.contains("req-2"));
    }

    #[test]
    fn test_standalone_marker() {
        let registry = StreamRegistry::new();
        drop(registry.open(STANDALONE_STREAM_ID).unwrap());

        cleanup_stale_stream_mappings(&registry, Some("_GET_stream_12"));
        assert!(registry.is_empty());
    }
}
