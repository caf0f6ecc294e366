//! Snapshot encoder: writes the envelope and streams typed records into any
//! [`Sink`].
//!
//! The envelope is signature, four-digit version, three aux fields,
//! `select-db 0`, and a resize-db placeholder that is patched with the final
//! record counts on [`Encoder::finish`]. Collection records are written
//! through per-type encoders that hold a mutable borrow of the `Encoder`, so
//! only one collection can be open at a time and it must be finished before
//! the next record starts.
//!
//! The CRC slot after EOF stays zero unless the encoder was configured with
//! [`Encoder::with_checksum`], in which case the written prefix is read back
//! and the real CRC patched in. Readers accept both.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::constants::{opcode, RecordType, SUPPORTED_VERSION};
use crate::crc64::crc64;
use crate::error::{Result, SnapshotError};
use crate::sink::{FileSink, MemSink, Sink};
use crate::stream::{StreamConsumerGroup, StreamEntry, StreamId};
use crate::writer::{
    write_json_module, write_stream_entry, write_stream_groups_v3, write_stream_metadata_v3,
};

/// Streaming snapshot writer.
pub struct Encoder<S: Sink> {
    sink: S,
    redis_version: String,
    checksum: bool,
    count: u64,
    count_with_exp: u64,
    resize_pos: Option<u64>,
}

impl Encoder<FileSink> {
    /// Creates an encoder writing to a new file at `path`. `redis_version`
    /// is the server version recorded in the `redis-ver` aux field.
    pub fn to_file(path: impl AsRef<Path>, redis_version: &str) -> Result<Self> {
        Ok(Self::new(FileSink::create(path)?, redis_version))
    }
}

impl Encoder<MemSink> {
    /// Creates an encoder writing to memory, with `limit` capping the total
    /// snapshot size.
    pub fn to_memory(limit: usize, redis_version: &str) -> Self {
        Self::new(MemSink::new(limit), redis_version)
    }
}

impl<S: Sink> Encoder<S> {
    pub fn new(sink: S, redis_version: &str) -> Self {
        Self {
            sink,
            redis_version: redis_version.to_string(),
            checksum: false,
            count: 0,
            count_with_exp: 0,
            resize_pos: None,
        }
    }

    /// Computes and stores the real CRC on `finish` instead of leaving the
    /// slot zero.
    pub fn with_checksum(mut self, on: bool) -> Self {
        self.checksum = on;
        self
    }

    /// Writes the envelope prologue. Must be called once, before any record.
    pub fn begin(&mut self) -> Result<()> {
        self.sink.write(b"REDIS")?;
        self.sink
            .write(format!("{:04}", SUPPORTED_VERSION).as_bytes())?;

        let redis_version = self.redis_version.clone();
        self.write_aux(b"redis-ver", redis_version.as_bytes())?;
        self.write_aux(b"redis-bits", b"64")?;
        let ctime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.write_aux(b"ctime", ctime.to_string().as_bytes())?;

        self.sink.write_u8(opcode::SELECT_DB)?;
        self.sink.write_len(0)?;

        self.resize_pos = Some(self.sink.pos()?);
        self.write_resize_db(0, 0)?;

        debug!(version = SUPPORTED_VERSION, "snapshot encoding started");
        Ok(())
    }

    pub fn write_string_entry(
        &mut self,
        key: &[u8],
        value: &[u8],
        expire_at_ms: Option<u64>,
    ) -> Result<()> {
        self.write_expiry(expire_at_ms)?;
        self.write_type_and_key(RecordType::String, key)?;
        self.sink.write_string(value)?;
        self.count += 1;
        Ok(())
    }

    pub fn write_json_entry(
        &mut self,
        key: &[u8],
        json: &str,
        expire_at_ms: Option<u64>,
    ) -> Result<()> {
        self.write_expiry(expire_at_ms)?;
        self.write_type_and_key(RecordType::Module2, key)?;
        write_json_module(&mut self.sink, json)?;
        self.count += 1;
        Ok(())
    }

    pub fn begin_list(
        &mut self,
        key: &[u8],
        expire_at_ms: Option<u64>,
    ) -> Result<ListEncoder<'_, S>> {
        let len_pos = self.begin_collection(RecordType::List, key, expire_at_ms)?;
        Ok(ListEncoder {
            enc: self,
            len_pos,
            len: 0,
        })
    }

    pub fn begin_set(
        &mut self,
        key: &[u8],
        expire_at_ms: Option<u64>,
    ) -> Result<SetEncoder<'_, S>> {
        let len_pos = self.begin_collection(RecordType::Set, key, expire_at_ms)?;
        Ok(SetEncoder {
            enc: self,
            len_pos,
            len: 0,
        })
    }

    pub fn begin_sorted_set(
        &mut self,
        key: &[u8],
        expire_at_ms: Option<u64>,
    ) -> Result<SortedSetEncoder<'_, S>> {
        let len_pos = self.begin_collection(RecordType::Zset2, key, expire_at_ms)?;
        Ok(SortedSetEncoder {
            enc: self,
            len_pos,
            len: 0,
        })
    }

    pub fn begin_hash(
        &mut self,
        key: &[u8],
        expire_at_ms: Option<u64>,
    ) -> Result<HashEncoder<'_, S>> {
        let len_pos = self.begin_collection(RecordType::Hash, key, expire_at_ms)?;
        Ok(HashEncoder {
            enc: self,
            len_pos,
            len: 0,
        })
    }

    pub fn begin_hash_with_metadata(
        &mut self,
        key: &[u8],
        expire_at_ms: Option<u64>,
    ) -> Result<HashMetadataEncoder<'_, S>> {
        self.write_expiry(expire_at_ms)?;
        self.write_type_and_key(RecordType::HashMetadata, key)?;
        self.count += 1;

        // Minimum-expiry base. Fields carry absolute timestamps, so the
        // base stays zero.
        self.sink.write_u64_le(0)?;

        let len_pos = self.sink.pos()?;
        self.sink.write_len_u64(0)?;
        Ok(HashMetadataEncoder {
            enc: self,
            len_pos,
            len: 0,
        })
    }

    pub fn begin_stream(
        &mut self,
        key: &[u8],
        expire_at_ms: Option<u64>,
    ) -> Result<StreamEncoder<'_, S>> {
        let len_pos = self.begin_collection(RecordType::StreamListpacks3, key, expire_at_ms)?;
        Ok(StreamEncoder {
            enc: self,
            len_pos,
            entries: 0,
            first_id: None,
        })
    }

    /// Writes EOF, the CRC slot, and patches the resize-db hint with the
    /// final counts. Returns the sink.
    pub fn finish(mut self) -> Result<S> {
        let resize_pos = self
            .resize_pos
            .ok_or(SnapshotError::Malformed("encoder was never started"))?;

        self.sink.write_u8(opcode::EOF)?;
        let crc_pos = self.sink.pos()?;
        self.sink.write_u64_le(0)?;
        let end = self.sink.pos()?;

        // Patch the hint before any CRC computation so the checksum covers
        // the final bytes.
        self.sink.seek(resize_pos)?;
        let (count, count_with_exp) = (self.count, self.count_with_exp);
        self.write_resize_db(count, count_with_exp)?;

        if self.checksum {
            let mut crc = 0u64;
            self.sink
                .read_back(0, crc_pos, &mut |chunk| crc = crc64(crc, chunk))?;
            self.sink.seek(crc_pos)?;
            self.sink.write_u64_le(crc)?;
        }

        self.sink.seek(end)?;
        self.sink.flush()?;

        debug!(records = self.count, "snapshot encoding finished");
        Ok(self.sink)
    }

    fn begin_collection(
        &mut self,
        t: RecordType,
        key: &[u8],
        expire_at_ms: Option<u64>,
    ) -> Result<u64> {
        self.write_expiry(expire_at_ms)?;
        self.write_type_and_key(t, key)?;
        self.count += 1;

        // Zero length in the fixed wide form; patched when the collection
        // is finished.
        let len_pos = self.sink.pos()?;
        self.sink.write_len_u64(0)?;
        Ok(len_pos)
    }

    fn patch_collection_len(&mut self, len_pos: u64, len: u64) -> Result<()> {
        let end = self.sink.pos()?;
        self.sink.seek(len_pos)?;
        self.sink.write_len_u64(len)?;
        self.sink.seek(end)
    }

    fn write_aux(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.sink.write_u8(opcode::AUX)?;
        self.sink.write_string(key)?;
        self.sink.write_string(value)
    }

    fn write_resize_db(&mut self, db_size: u64, expiry_db_size: u64) -> Result<()> {
        self.sink.write_u8(opcode::RESIZE_DB)?;
        self.sink.write_len_u64(db_size)?;
        self.sink.write_len_u64(expiry_db_size)
    }

    fn write_type_and_key(&mut self, t: RecordType, key: &[u8]) -> Result<()> {
        self.sink.write_u8(t as u8)?;
        self.sink.write_string(key)
    }

    fn write_expiry(&mut self, expire_at_ms: Option<u64>) -> Result<()> {
        let Some(at) = expire_at_ms else {
            return Ok(());
        };

        self.sink.write_u8(opcode::EXPIRE_TIME_MS)?;
        self.sink.write_u64_le(at)?;
        self.count_with_exp += 1;
        Ok(())
    }
}

/// Writes list elements; the element count is patched on `finish`.
pub struct ListEncoder<'a, S: Sink> {
    enc: &'a mut Encoder<S>,
    len_pos: u64,
    len: u64,
}

impl<S: Sink> ListEncoder<'_, S> {
    pub fn push(&mut self, elem: &[u8]) -> Result<()> {
        self.enc.sink.write_string(elem)?;
        self.len += 1;
        Ok(())
    }

    pub fn finish(self) -> Result<()> {
        self.enc.patch_collection_len(self.len_pos, self.len)
    }
}

pub struct SetEncoder<'a, S: Sink> {
    enc: &'a mut Encoder<S>,
    len_pos: u64,
    len: u64,
}

impl<S: Sink> SetEncoder<'_, S> {
    pub fn push(&mut self, elem: &[u8]) -> Result<()> {
        self.enc.sink.write_string(elem)?;
        self.len += 1;
        Ok(())
    }

    pub fn finish(self) -> Result<()> {
        self.enc.patch_collection_len(self.len_pos, self.len)
    }
}

/// Writes member/score pairs in the binary-score form.
pub struct SortedSetEncoder<'a, S: Sink> {
    enc: &'a mut Encoder<S>,
    len_pos: u64,
    len: u64,
}

impl<S: Sink> SortedSetEncoder<'_, S> {
    pub fn push(&mut self, member: &[u8], score: f64) -> Result<()> {
        self.enc.sink.write_string(member)?;
        self.enc.sink.write_u64_le(score.to_bits())?;
        self.len += 1;
        Ok(())
    }

    pub fn finish(self) -> Result<()> {
        self.enc.patch_collection_len(self.len_pos, self.len)
    }
}

pub struct HashEncoder<'a, S: Sink> {
    enc: &'a mut Encoder<S>,
    len_pos: u64,
    len: u64,
}

impl<S: Sink> HashEncoder<'_, S> {
    pub fn push(&mut self, field: &[u8], value: &[u8]) -> Result<()> {
        self.enc.sink.write_string(field)?;
        self.enc.sink.write_string(value)?;
        self.len += 1;
        Ok(())
    }

    pub fn finish(self) -> Result<()> {
        self.enc.patch_collection_len(self.len_pos, self.len)
    }
}

/// Writes hash fields with optional per-field absolute expiries.
pub struct HashMetadataEncoder<'a, S: Sink> {
    enc: &'a mut Encoder<S>,
    len_pos: u64,
    len: u64,
}

impl<S: Sink> HashMetadataEncoder<'_, S> {
    pub fn push(&mut self, field: &[u8], value: &[u8], expire_at_ms: Option<u64>) -> Result<()> {
        self.enc.sink.write_len(expire_at_ms.unwrap_or(0))?;
        self.enc.sink.write_string(field)?;
        self.enc.sink.write_string(value)?;
        self.len += 1;
        Ok(())
    }

    pub fn finish(self) -> Result<()> {
        self.enc.patch_collection_len(self.len_pos, self.len)
    }
}

/// Writes a stream record: entries first, then metadata, then consumer
/// groups. The entry-pack count is patched on `finish`.
pub struct StreamEncoder<'a, S: Sink> {
    enc: &'a mut Encoder<S>,
    len_pos: u64,
    entries: u64,
    first_id: Option<StreamId>,
}

impl<S: Sink> StreamEncoder<'_, S> {
    pub fn push_entry(&mut self, entry: &StreamEntry) -> Result<()> {
        write_stream_entry(&mut self.enc.sink, entry)?;
        self.first_id.get_or_insert(entry.id);
        self.entries += 1;
        Ok(())
    }

    /// Writes the metadata section. Call after the last entry and before
    /// the groups.
    pub fn write_metadata(&mut self, length: u64, last_id: StreamId) -> Result<()> {
        write_stream_metadata_v3(
            &mut self.enc.sink,
            length,
            last_id,
            self.first_id.unwrap_or_default(),
        )
    }

    pub fn write_groups(&mut self, groups: &[StreamConsumerGroup]) -> Result<()> {
        write_stream_groups_v3(&mut self.enc.sink, groups)
    }

    pub fn finish(self) -> Result<()> {
        self.enc.patch_collection_len(self.len_pos, self.entries)
    }
}
