//! Resource-bounded snapshot verification.
//!
//! The verifier is a [`SnapshotHandler`] that decodes the whole snapshot
//! while accounting for the memory the content would occupy, and aborts on
//! the first limit violation with an error naming the limit, the offending
//! value, and the ceiling.

use std::io::Read;
use std::path::Path;

use crate::envelope::{read_file_with, read_reader_with, ReadOptions};
use crate::error::{Result, SnapshotError};
use crate::handler::SnapshotHandler;
use crate::reader::read_value_limited;
use crate::stream::{StreamConsumerGroup, StreamEntry};

const DEFAULT_MAX_DATA_SIZE: u64 = 256 << 20;
const DEFAULT_MAX_ENTRY_SIZE: u64 = 100 << 20;
const DEFAULT_MAX_KEY_SIZE: u64 = 32 << 10;
const DEFAULT_MAX_STREAM_PEL_SIZE: u64 = 1000;

/// Stream names and values are bounded individually regardless of the
/// configured limits.
const MAX_STREAM_STR_SIZE: u64 = u32::MAX as u64;

/// Limits for verifying a whole snapshot.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Total of key bytes plus value bytes across the snapshot.
    pub max_data_size: u64,
    /// Per-record total of member bytes.
    pub max_entry_size: u64,
    /// Per-key byte length.
    pub max_key_size: u64,
    /// Per-consumer pending-entry count.
    pub max_stream_pel_size: u64,
    /// Tolerate content this library cannot restore (extra databases,
    /// unknown modules, function payloads).
    pub allow_partial: bool,
    /// Reject trailing bytes after the CRC footer.
    pub require_strict_eof: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            max_data_size: DEFAULT_MAX_DATA_SIZE,
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
            max_key_size: DEFAULT_MAX_KEY_SIZE,
            max_stream_pel_size: DEFAULT_MAX_STREAM_PEL_SIZE,
            allow_partial: false,
            require_strict_eof: false,
        }
    }
}

/// Limits for verifying a single value dump. Whole-snapshot bounds do not
/// apply there.
#[derive(Debug, Clone)]
pub struct VerifyValueOptions {
    pub max_entry_size: u64,
    pub max_stream_pel_size: u64,
}

impl Default for VerifyValueOptions {
    fn default() -> Self {
        Self {
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
            max_stream_pel_size: DEFAULT_MAX_STREAM_PEL_SIZE,
        }
    }
}

/// Verifies that the snapshot file at `path` is well formed and within the
/// given limits.
pub fn verify_file(path: impl AsRef<Path>, opts: VerifyOptions) -> Result<()> {
    let read_opts = ReadOptions {
        max_lz77_len: Some(opts.max_entry_size),
        require_strict_eof: opts.require_strict_eof,
    };
    let mut verifier = Verifier::new(&opts);
    read_file_with(path, &mut verifier, &read_opts)
}

/// Verifies a snapshot arriving from any byte source.
pub fn verify_reader(src: impl Read, opts: VerifyOptions) -> Result<()> {
    let read_opts = ReadOptions {
        max_lz77_len: Some(opts.max_entry_size),
        require_strict_eof: opts.require_strict_eof,
    };
    let mut verifier = Verifier::new(&opts);
    read_reader_with(src, &mut verifier, &read_opts)
}

/// Verifies a single value dump against entry-level limits.
pub fn verify_value(payload: &[u8], opts: VerifyValueOptions) -> Result<()> {
    let mut verifier = Verifier {
        max_data_size: u64::MAX,
        max_entry_size: opts.max_entry_size,
        max_key_size: u64::MAX,
        max_stream_pel_size: opts.max_stream_pel_size,
        allow_partial: true,
        data_size: 0,
        entry_size: 0,
        stream_entry_size: 0,
    };

    read_value_limited(b"", payload, &mut verifier, Some(opts.max_entry_size))
}

struct Verifier {
    max_data_size: u64,
    max_entry_size: u64,
    max_key_size: u64,
    max_stream_pel_size: u64,
    allow_partial: bool,
    data_size: u64,
    /// Member bytes of the record currently being decoded.
    entry_size: u64,
    /// Group bytes of the stream currently being decoded. Accumulates over
    /// all groups of one stream because pending entries live on disk and in
    /// memory at the same time.
    stream_entry_size: u64,
}

impl Verifier {
    fn new(opts: &VerifyOptions) -> Self {
        Self {
            max_data_size: opts.max_data_size,
            max_entry_size: opts.max_entry_size,
            max_key_size: opts.max_key_size,
            max_stream_pel_size: opts.max_stream_pel_size,
            allow_partial: opts.allow_partial,
            data_size: 0,
            entry_size: 0,
            stream_entry_size: 0,
        }
    }

    fn begin_record(&mut self, key: &[u8]) -> Result<()> {
        self.check_key(key)?;
        self.entry_size = 0;
        self.stream_entry_size = 0;
        self.add_data(key.len() as u64)
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() as u64 > self.max_key_size {
            return Err(SnapshotError::LimitExceeded {
                limit: "max key size",
                current: key.len() as u64,
                max: self.max_key_size,
            });
        }
        Ok(())
    }

    fn add_data(&mut self, n: u64) -> Result<()> {
        self.data_size = self.data_size.saturating_add(n);
        if self.data_size > self.max_data_size {
            return Err(SnapshotError::LimitExceeded {
                limit: "max data size",
                current: self.data_size,
                max: self.max_data_size,
            });
        }
        Ok(())
    }

    fn add_entry(&mut self, n: u64) -> Result<()> {
        self.entry_size = self.entry_size.saturating_add(n);
        if self.entry_size > self.max_entry_size {
            return Err(SnapshotError::LimitExceeded {
                limit: "max entry size",
                current: self.entry_size,
                max: self.max_entry_size,
            });
        }
        self.add_data(n)
    }

    fn check_stream_str(len: usize) -> Result<()> {
        if len as u64 > MAX_STREAM_STR_SIZE {
            return Err(SnapshotError::LimitExceeded {
                limit: "max stream string size",
                current: len as u64,
                max: MAX_STREAM_STR_SIZE,
            });
        }
        Ok(())
    }
}

impl SnapshotHandler for Verifier {
    fn allow_partial_read(&self) -> bool {
        self.allow_partial
    }

    fn on_string(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.check_key(key)?;
        if value.len() as u64 > self.max_entry_size {
            return Err(SnapshotError::LimitExceeded {
                limit: "max entry size",
                current: value.len() as u64,
                max: self.max_entry_size,
            });
        }
        self.add_data(key.len() as u64 + value.len() as u64)
    }

    fn on_list_begin(&mut self, key: &[u8]) -> Result<()> {
        self.begin_record(key)
    }

    fn on_list_entry(&mut self, _key: &[u8], elem: Vec<u8>) -> Result<()> {
        self.add_entry(elem.len() as u64)
    }

    fn on_set_begin(&mut self, key: &[u8]) -> Result<()> {
        self.begin_record(key)
    }

    fn on_set_entry(&mut self, _key: &[u8], elem: Vec<u8>) -> Result<()> {
        self.add_entry(elem.len() as u64)
    }

    fn on_zset_begin(&mut self, key: &[u8]) -> Result<()> {
        self.begin_record(key)
    }

    fn on_zset_entry(&mut self, _key: &[u8], member: Vec<u8>, _score: f64) -> Result<()> {
        // Eight extra bytes for the numeric score.
        self.add_entry(member.len() as u64 + 8)
    }

    fn on_hash_begin(&mut self, key: &[u8]) -> Result<()> {
        self.begin_record(key)
    }

    fn on_hash_entry(&mut self, _key: &[u8], field: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.add_entry(field.len() as u64 + value.len() as u64)
    }

    fn on_hash_entry_ex(
        &mut self,
        _key: &[u8],
        field: Vec<u8>,
        value: Vec<u8>,
        _expire_at_ms: Option<u64>,
    ) -> Result<()> {
        // Eight extra bytes for the expiry timestamp.
        self.add_entry(field.len() as u64 + value.len() as u64 + 8)
    }

    fn on_module(
        &mut self,
        key: &[u8],
        value: String,
        _marker: crate::constants::ModuleMarker,
    ) -> Result<()> {
        self.check_key(key)?;
        if value.len() as u64 > self.max_entry_size {
            return Err(SnapshotError::LimitExceeded {
                limit: "max entry size",
                current: value.len() as u64,
                max: self.max_entry_size,
            });
        }
        self.add_data(key.len() as u64 + value.len() as u64)
    }

    fn on_stream_begin(&mut self, key: &[u8]) -> Result<()> {
        self.begin_record(key)
    }

    fn on_stream_entry(&mut self, _key: &[u8], entry: StreamEntry) -> Result<()> {
        let mut size = 0u64;
        for (field, value) in &entry.fields {
            Self::check_stream_str(field.len())?;
            Self::check_stream_str(value.len())?;
            size += field.len() as u64 + value.len() as u64;
        }

        // Stream entries never count against the entry limit: they are not
        // materialised in memory at rest. Sixteen bytes for the ID.
        self.add_data(size + 16)
    }

    fn on_stream_group(&mut self, _key: &[u8], group: StreamConsumerGroup) -> Result<()> {
        let mut size = 0u64;

        Self::check_stream_str(group.name.len())?;
        // Last ID plus the entries-read counter.
        size += group.name.len() as u64 + 24;

        for consumer in &group.consumers {
            Self::check_stream_str(consumer.name.len())?;
            // Seen time plus active time.
            size += consumer.name.len() as u64 + 16;

            if consumer.pending.len() as u64 > self.max_stream_pel_size {
                return Err(SnapshotError::LimitExceeded {
                    limit: "max stream pel size",
                    current: consumer.pending.len() as u64,
                    max: self.max_stream_pel_size,
                });
            }

            for pe in &consumer.pending {
                // ID, delivery time, and delivery count.
                size += 32;
                for (field, value) in &pe.entry.fields {
                    Self::check_stream_str(field.len())?;
                    Self::check_stream_str(value.len())?;
                    size += field.len() as u64 + value.len() as u64;
                }
            }
        }

        // Unlike plain stream entries, pending entries sit on disk and in
        // memory, so groups do count against the entry limit.
        self.stream_entry_size = self.stream_entry_size.saturating_add(size);
        if self.stream_entry_size > self.max_entry_size {
            return Err(SnapshotError::LimitExceeded {
                limit: "max entry size",
                current: self.stream_entry_size,
                max: self.max_entry_size,
            });
        }

        self.add_data(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{StreamConsumer, StreamId, StreamPendingEntry};

    fn verifier(opts: VerifyOptions) -> Verifier {
        Verifier::new(&opts)
    }

    fn small_limits() -> VerifyOptions {
        VerifyOptions {
            max_data_size: 100,
            max_entry_size: 50,
            max_key_size: 10,
            max_stream_pel_size: 2,
            ..VerifyOptions::default()
        }
    }

    #[test]
    fn string_limits() {
        let mut v = verifier(small_limits());
        v.on_string(b"key", b"value".to_vec()).unwrap();

        let err = v.on_string(b"a-key-longer-than-ten", b"x".to_vec()).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::LimitExceeded { limit: "max key size", .. }
        ));

        let err = v.on_string(b"k", vec![0u8; 51]).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::LimitExceeded { limit: "max entry size", .. }
        ));

        // Two more records under the entry limit overflow the data budget.
        v.on_string(b"k", vec![0u8; 50]).unwrap();
        let err = v.on_string(b"k", vec![0u8; 50]).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::LimitExceeded { limit: "max data size", .. }
        ));
    }

    #[test]
    fn entry_size_accumulates_per_record() {
        let mut v = verifier(small_limits());

        v.on_hash_begin(b"h").unwrap();
        v.on_hash_entry(b"h", vec![0u8; 10], vec![0u8; 10]).unwrap();
        let err = v.on_hash_entry(b"h", vec![0u8; 20], vec![0u8; 15]).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::LimitExceeded { limit: "max entry size", .. }
        ));

        // A fresh record resets the accumulator.
        let mut v = verifier(small_limits());
        v.on_hash_begin(b"h1").unwrap();
        v.on_hash_entry(b"h1", vec![0u8; 20], vec![0u8; 20]).unwrap();
        v.on_hash_begin(b"h2").unwrap();
        v.on_hash_entry(b"h2", vec![0u8; 20], vec![0u8; 20]).unwrap();
    }

    #[test]
    fn zset_scores_cost_eight_bytes() {
        let mut v = verifier(small_limits());
        v.on_zset_begin(b"z").unwrap();
        v.on_zset_entry(b"z", vec![0u8; 43], 1.0).unwrap_err();

        let mut v = verifier(small_limits());
        v.on_zset_begin(b"z").unwrap();
        v.on_zset_entry(b"z", vec![0u8; 42], 1.0).unwrap();
    }

    #[test]
    fn stream_pel_count_limit() {
        let mut v = verifier(small_limits());
        v.on_stream_begin(b"s").unwrap();

        let pe = StreamPendingEntry {
            entry: StreamEntry {
                id: StreamId { millis: 1, seq: 0 },
                fields: vec![],
            },
            delivery_time: 0,
            delivery_count: 1,
        };
        let group = StreamConsumerGroup {
            name: b"g".to_vec(),
            last_id: StreamId::default(),
            entries_read: 0,
            consumers: vec![StreamConsumer {
                name: b"c".to_vec(),
                seen_time: 0,
                active_time: 0,
                pending: vec![pe.clone(), pe.clone(), pe],
            }],
        };

        let err = v.on_stream_group(b"s", group).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::LimitExceeded { limit: "max stream pel size", .. }
        ));
    }

    #[test]
    fn stream_entries_skip_the_entry_limit() {
        // 40 bytes of values would trip a 50-byte entry limit if counted
        // with the 16-byte ID overhead twice; entries only count toward the
        // data limit.
        let mut v = verifier(small_limits());
        v.on_stream_begin(b"s").unwrap();
        for i in 0..2 {
            v.on_stream_entry(
                b"s",
                StreamEntry {
                    id: StreamId { millis: i, seq: 0 },
                    fields: vec![(vec![0u8; 10], vec![0u8; 10])],
                },
            )
            .unwrap();
        }
    }
}
