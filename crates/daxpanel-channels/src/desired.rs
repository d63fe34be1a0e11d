//! Desired-state computation.

use daxpanel_core::ChannelRecord;

/// Whether a stream should exist for `record` right now.
///
/// Pure and total. Callers recompute it on every event instead of caching
/// the result.
pub fn should_stream(record: &ChannelRecord, connected: bool) -> bool {
    connected && record.enabled && record.device.is_some()
}
