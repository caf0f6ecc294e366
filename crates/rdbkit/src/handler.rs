//! Handler interface through which decoded records are delivered.
//!
//! The reader speaks to its consumer through per-kind callbacks rather than
//! a sum type of delivered records: nothing accumulates inside the decoder,
//! and the "skip another database" path is just a [`NullHandler`]. Container
//! records are bracketed by an `on_*_begin` call, per-entry calls, and, where
//! a total count is meaningful, an `on_*_end` call with the number of entries
//! read.
//!
//! Any `Err` returned from a callback aborts the session immediately; the
//! decoder performs no further reads.

use crate::constants::ModuleMarker;
use crate::error::Result;
use crate::stream::{StreamConsumerGroup, StreamEntry};

/// Receives records decoded from a snapshot.
///
/// All methods have no-op defaults so implementations only write the ones
/// they care about. Keys repeat across the callbacks of one record; element
/// payloads are handed over by value and never referenced again by the
/// decoder.
pub trait SnapshotHandler {
    /// Whether the reader may skip content this library cannot restore
    /// (extra databases, unknown modules, function payloads) instead of
    /// failing.
    fn allow_partial_read(&self) -> bool {
        false
    }

    fn on_string(&mut self, _key: &[u8], _value: Vec<u8>) -> Result<()> {
        Ok(())
    }

    fn on_list_begin(&mut self, _key: &[u8]) -> Result<()> {
        Ok(())
    }

    fn on_list_entry(&mut self, _key: &[u8], _elem: Vec<u8>) -> Result<()> {
        Ok(())
    }

    /// Called when the list is read completely, with the number of entries
    /// delivered.
    fn on_list_end(&mut self, _key: &[u8], _entries_read: u64) {}

    fn on_set_begin(&mut self, _key: &[u8]) -> Result<()> {
        Ok(())
    }

    fn on_set_entry(&mut self, _key: &[u8], _elem: Vec<u8>) -> Result<()> {
        Ok(())
    }

    fn on_zset_begin(&mut self, _key: &[u8]) -> Result<()> {
        Ok(())
    }

    fn on_zset_entry(&mut self, _key: &[u8], _member: Vec<u8>, _score: f64) -> Result<()> {
        Ok(())
    }

    fn on_zset_end(&mut self, _key: &[u8], _entries_read: u64) {}

    fn on_hash_begin(&mut self, _key: &[u8]) -> Result<()> {
        Ok(())
    }

    fn on_hash_entry(&mut self, _key: &[u8], _field: Vec<u8>, _value: Vec<u8>) -> Result<()> {
        Ok(())
    }

    /// Hash field with per-field expiry metadata. `expire_at_ms` is absolute
    /// Unix milliseconds; `None` means the field does not expire.
    fn on_hash_entry_ex(
        &mut self,
        _key: &[u8],
        _field: Vec<u8>,
        _value: Vec<u8>,
        _expire_at_ms: Option<u64>,
    ) -> Result<()> {
        Ok(())
    }

    fn on_module(&mut self, _key: &[u8], _value: String, _marker: ModuleMarker) -> Result<()> {
        Ok(())
    }

    fn on_stream_begin(&mut self, _key: &[u8]) -> Result<()> {
        Ok(())
    }

    fn on_stream_entry(&mut self, _key: &[u8], _entry: StreamEntry) -> Result<()> {
        Ok(())
    }

    fn on_stream_group(&mut self, _key: &[u8], _group: StreamConsumerGroup) -> Result<()> {
        Ok(())
    }

    fn on_stream_end(&mut self, _key: &[u8], _entries_read: u64) {}

    /// Absolute expiry of the record that was just delivered, in Unix
    /// milliseconds. Forwarded after the record's value callbacks.
    fn on_expire_time(&mut self, _key: &[u8], _expire_at_ms: u64) -> Result<()> {
        Ok(())
    }
}

/// Accepts and discards everything. Used to skip records of databases other
/// than 0 while still driving the wire format forward.
#[derive(Debug, Default)]
pub struct NullHandler;

impl SnapshotHandler for NullHandler {
    fn allow_partial_read(&self) -> bool {
        true
    }
}
