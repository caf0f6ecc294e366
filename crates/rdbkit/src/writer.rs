//! Value-dump writer and the listpack/stream wire writers shared with the
//! snapshot encoder.
//!
//! The writer always emits the shortest legal length form and always writes
//! strings raw; values that arrived as integer encodings come back as plain
//! length-prefixed strings. Listpack string entries always use the 32-bit
//! length form, trading a few bytes for codepath uniformity.

use std::collections::BTreeMap;

use crate::constants::*;
use crate::crc64::crc64;
use crate::error::Result;
use crate::sink::{MemSink, Sink};
use crate::stream::{Stream, StreamConsumerGroup, StreamEntry, StreamId, StreamPendingEntry};

/// Default total-size limit of an in-memory value dump.
pub const DEFAULT_WRITE_LIMIT: usize = 1 << 20;

/// Builds a single-value dump in memory: a type byte, the value body, and
/// optionally the trailing checksum block.
#[derive(Debug)]
pub struct Writer {
    sink: MemSink,
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_WRITE_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            sink: MemSink::new(limit),
        }
    }

    /// The payload written so far.
    pub fn as_slice(&self) -> &[u8] {
        self.sink.as_slice()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.sink.into_bytes()
    }

    pub fn write_type(&mut self, t: RecordType) -> Result<()> {
        self.sink.write_u8(t as u8)
    }

    pub fn write_string(&mut self, value: &[u8]) -> Result<()> {
        self.sink.write_string(value)
    }

    pub fn write_list<T: AsRef<[u8]>>(&mut self, items: &[T]) -> Result<()> {
        self.sink.write_len(items.len() as u64)?;
        for item in items {
            self.sink.write_string(item.as_ref())?;
        }
        Ok(())
    }

    pub fn write_set<T: AsRef<[u8]>>(&mut self, items: &[T]) -> Result<()> {
        self.write_list(items)
    }

    /// Writes member/score pairs in the binary-score form (pair with
    /// [`RecordType::Zset2`]).
    pub fn write_zset<T: AsRef<[u8]>>(&mut self, items: &[(T, f64)]) -> Result<()> {
        self.sink.write_len(items.len() as u64)?;
        for (member, score) in items {
            self.sink.write_string(member.as_ref())?;
            self.sink.write_u64_le(score.to_bits())?;
        }
        Ok(())
    }

    /// Writes field/value pairs in caller order, so identical input always
    /// produces identical bytes.
    pub fn write_hash<T: AsRef<[u8]>>(&mut self, fields: &[(T, T)]) -> Result<()> {
        self.sink.write_len(fields.len() as u64)?;
        for (field, value) in fields {
            self.sink.write_string(field.as_ref())?;
            self.sink.write_string(value.as_ref())?;
        }
        Ok(())
    }

    /// Writes a JSON module value (pair with [`RecordType::Module2`]).
    pub fn write_json(&mut self, json: &str) -> Result<()> {
        write_json_module(&mut self.sink, json)
    }

    /// Writes a stream body (pair with [`RecordType::StreamListpacks3`]).
    pub fn write_stream(&mut self, stream: &Stream) -> Result<()> {
        self.sink.write_len(stream.entries.len() as u64)?;
        for entry in &stream.entries {
            write_stream_entry(&mut self.sink, entry)?;
        }

        let first_id = stream.entries.first().map(|e| e.id).unwrap_or_default();
        write_stream_metadata_v3(&mut self.sink, stream.length, stream.last_id, first_id)?;
        write_stream_groups_v3(&mut self.sink, &stream.groups)
    }

    /// Appends the checksum block: the RDB version (u16 LE) and the CRC-64
    /// of everything written so far including the version bytes.
    pub fn write_checksum(&mut self, version: u16) -> Result<()> {
        self.sink.write_u16_le(version)?;
        let crc = crc64(0, self.sink.as_slice());
        self.sink.write_u64_le(crc)
    }
}

/// Writes the JSON module payload: module id with version 3, the serialized
/// JSON text, and the module EOF opcode.
pub(crate) fn write_json_module<S: Sink>(sink: &mut S, json: &str) -> Result<()> {
    sink.write_len(JSON_MODULE_ID | JSON_MODULE_V3)?;
    sink.write_len(MODULE_OP_STRING)?;
    sink.write_string(json.as_bytes())?;
    sink.write_len(MODULE_OP_EOF)
}

/// Writes the back-length of an entry occupying `back_len` bytes and
/// returns how many bytes it took. Most significant 7-bit chunk first; every
/// byte but the first carries the continuation bit.
fn write_backlen<S: Sink>(sink: &mut S, back_len: usize) -> Result<u32> {
    if back_len <= 127 {
        sink.write(&[back_len as u8])?;
        Ok(1)
    } else if back_len < 16383 {
        sink.write(&[(back_len >> 7) as u8, (back_len & 127) as u8 | 128])?;
        Ok(2)
    } else if back_len < 2097151 {
        sink.write(&[
            (back_len >> 14) as u8,
            ((back_len >> 7) & 127) as u8 | 128,
            (back_len & 127) as u8 | 128,
        ])?;
        Ok(3)
    } else if back_len < 268435455 {
        sink.write(&[
            (back_len >> 21) as u8,
            ((back_len >> 14) & 127) as u8 | 128,
            ((back_len >> 7) & 127) as u8 | 128,
            (back_len & 127) as u8 | 128,
        ])?;
        Ok(4)
    } else {
        sink.write(&[
            (back_len >> 28) as u8,
            ((back_len >> 21) & 127) as u8 | 128,
            ((back_len >> 14) & 127) as u8 | 128,
            ((back_len >> 7) & 127) as u8 | 128,
            (back_len & 127) as u8 | 128,
        ])?;
        Ok(5)
    }
}

/// Writes one listpack string entry in the 32-bit length form and returns
/// its total size.
pub(crate) fn write_listpack_str_entry<S: Sink>(sink: &mut S, value: &[u8]) -> Result<u32> {
    sink.write_u8(LISTPACK_ENC_32BIT_STR)?;
    sink.write_u32_le(value.len() as u32)?;
    sink.write(value)?;

    let back_len = 5 + value.len();
    let back_width = write_backlen(sink, back_len)?;

    Ok(1 + 4 + value.len() as u32 + back_width)
}

/// Writes one listpack integer entry in the widest form that fits and
/// returns its total size. The back-length always fits one byte.
pub(crate) fn write_listpack_int_entry<S: Sink>(sink: &mut S, value: i64) -> Result<u32> {
    let encoding_len: u8 = if i16::try_from(value).is_ok() {
        sink.write_u8(LISTPACK_ENC_INT16)?;
        sink.write_u16_le(value as u16)?;
        2
    } else if i32::try_from(value).is_ok() {
        sink.write_u8(LISTPACK_ENC_INT32)?;
        sink.write_u32_le(value as u32)?;
        4
    } else {
        sink.write_u8(LISTPACK_ENC_INT64)?;
        sink.write_u64_le(value as u64)?;
        8
    };

    sink.write_u8(1 + encoding_len)?;
    Ok(1 + encoding_len as u32 + 1)
}

/// Writes one stream entry as its own one-element listpack: `count=1`,
/// `deleted=0`, the flag fixed to fields-same-as-master, and zero deltas.
/// This is valid because the master ID equals the entry ID.
///
/// The listpack's host-string length prefix and its byte/count header are
/// not known up front; dummies are written and patched once the entry is
/// complete. The prefix uses the fixed-width 64-bit form so the patch never
/// changes its size.
pub(crate) fn write_stream_entry<S: Sink>(sink: &mut S, entry: &StreamEntry) -> Result<()> {
    let mut master_id = [0u8; 16];
    master_id[..8].copy_from_slice(&entry.id.millis.to_be_bytes());
    master_id[8..].copy_from_slice(&entry.id.seq.to_be_bytes());
    sink.write_string(&master_id)?;

    let str_len_pos = sink.pos()?;
    sink.write_len_u64(0)?;

    let lp_start = sink.pos()?;
    sink.write_u32_le(0)?; // lpbytes, patched below
    sink.write_u16_le(0)?; // lplen, patched below

    let mut lp_bytes = 0u32;
    let mut lp_count = 0u32;

    lp_bytes += write_listpack_int_entry(sink, 1)?; // count
    lp_bytes += write_listpack_int_entry(sink, 0)?; // deleted
    lp_bytes += write_listpack_int_entry(sink, entry.fields.len() as i64)?;
    lp_count += 3;

    for (name, _) in &entry.fields {
        lp_bytes += write_listpack_str_entry(sink, name)?;
        lp_count += 1;
    }

    lp_bytes += write_listpack_int_entry(sink, 0)?; // master terminator
    lp_bytes += write_listpack_int_entry(sink, STREAM_ITEM_FLAG_SAME_FIELDS)?;
    lp_bytes += write_listpack_int_entry(sink, 0)?; // millis delta
    lp_bytes += write_listpack_int_entry(sink, 0)?; // seq delta
    lp_count += 4;

    for (_, value) in &entry.fields {
        lp_bytes += write_listpack_str_entry(sink, value)?;
        lp_count += 1;
    }

    // The per-entry listpack count: flag + both deltas + one value per field.
    lp_bytes += write_listpack_int_entry(sink, 3 + entry.fields.len() as i64)?;
    lp_count += 1;

    sink.write_u8(LISTPACK_END)?;
    lp_bytes += 4 + 2 + 1; // lpbytes + lplen + end marker

    let end_pos = sink.pos()?;

    sink.seek(lp_start)?;
    sink.write_u32_le(lp_bytes)?;
    // A count at or above the sentinel is clamped, pushing readers into the
    // unbounded-listpack path.
    let lplen = lp_count.min(LISTPACK_LEN_BIG as u32) as u16;
    sink.write_u16_le(lplen)?;

    sink.seek(str_len_pos)?;
    sink.write_len_u64(lp_bytes as u64)?;

    sink.seek(end_pos)
}

/// Writes the version-3 stream metadata. The extras the decoder discards
/// (first ID, max-deleted ID, entries-added) are synthesized
/// deterministically.
pub(crate) fn write_stream_metadata_v3<S: Sink>(
    sink: &mut S,
    length: u64,
    last_id: StreamId,
    first_id: StreamId,
) -> Result<()> {
    sink.write_len(length)?;
    sink.write_len(last_id.millis)?;
    sink.write_len(last_id.seq)?;

    sink.write_len(first_id.millis)?;
    sink.write_len(first_id.seq)?;
    sink.write_len(0)?; // max deleted id millis
    sink.write_len(0)?; // max deleted id seq
    sink.write_len(length) // entries added
}

/// Writes the version-3 consumer-groups section. Each group's global PEL is
/// the union of its consumers' pending entries, ordered by stream ID so the
/// output is deterministic.
pub(crate) fn write_stream_groups_v3<S: Sink>(
    sink: &mut S,
    groups: &[StreamConsumerGroup],
) -> Result<()> {
    sink.write_len(groups.len() as u64)?;

    for group in groups {
        sink.write_string(&group.name)?;
        sink.write_len(group.last_id.millis)?;
        sink.write_len(group.last_id.seq)?;
        sink.write_len(group.entries_read as u64)?;

        let mut global: BTreeMap<StreamId, &StreamPendingEntry> = BTreeMap::new();
        for consumer in &group.consumers {
            for pe in &consumer.pending {
                global.insert(pe.entry.id, pe);
            }
        }

        sink.write_len(global.len() as u64)?;
        for (id, pe) in &global {
            sink.write_u64_be(id.millis)?;
            sink.write_u64_be(id.seq)?;
            sink.write_u64_le(pe.delivery_time as u64)?;
            sink.write_len(pe.delivery_count)?;
        }

        sink.write_len(group.consumers.len() as u64)?;
        for consumer in &group.consumers {
            sink.write_string(&consumer.name)?;
            sink.write_u64_le(consumer.seen_time as u64)?;
            sink.write_u64_le(consumer.active_time as u64)?;

            sink.write_len(consumer.pending.len() as u64)?;
            for pe in &consumer.pending {
                sink.write_u64_be(pe.entry.id.millis)?;
                sink.write_u64_be(pe.entry.id.seq)?;
            }
        }
    }

    Ok(())
}
