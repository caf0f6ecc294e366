//! Stream records: the data model and the two-pass decoder.
//!
//! A stream body is `<entries><metadata><groups>`. Consumer pending entries
//! reference values that live in the physically earlier entries section, and
//! the entry listpacks are not indexable by ID, so groups can only be
//! delivered fully populated after a second traversal of the entries. The
//! decoder stays forward-only at the outer level and uses buffer views for
//! the back edge:
//!
//! 1. the primary pass over the entries streams live entries to the handler;
//! 2. the primary pass over the groups collects every consumer-referenced ID;
//! 3. a view pass over the entries fills values for exactly those IDs;
//! 4. a view pass over the groups resolves each pending entry and delivers
//!    the group.
//!
//! A consumer PEL ID that is missing from its group's global PEL, or that
//! resolves to no entry in the stream, makes the snapshot corrupt.

use std::collections::HashMap;

use crate::buffer::Buffer;
use crate::constants::*;
use crate::error::{Result, SnapshotError};
use crate::handler::SnapshotHandler;
use crate::reader::{parse_i64, ValueReader};

/// 128-bit stream entry ID, ordered by `(millis, seq)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    pub millis: u64,
    pub seq: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    /// Field name and value pairs, in wire order.
    pub fields: Vec<(Vec<u8>, Vec<u8>)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamPendingEntry {
    pub entry: StreamEntry,
    /// Unix milliseconds of the last delivery.
    pub delivery_time: i64,
    pub delivery_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamConsumer {
    pub name: Vec<u8>,
    /// Unix milliseconds of the consumer's last interaction of any kind.
    pub seen_time: i64,
    /// Unix milliseconds of the consumer's last successful interaction.
    /// Only present on the wire in stream version 3.
    pub active_time: i64,
    pub pending: Vec<StreamPendingEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamConsumerGroup {
    pub name: Vec<u8>,
    pub last_id: StreamId,
    /// Number of entries this group has read. Negative means unknown.
    /// Only present on the wire in stream versions 2 and 3.
    pub entries_read: i64,
    pub consumers: Vec<StreamConsumer>,
}

/// A fully materialised stream, as fed to the writer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stream {
    pub last_id: StreamId,
    /// Total number of live entries.
    pub length: u64,
    pub entries: Vec<StreamEntry>,
    pub groups: Vec<StreamConsumerGroup>,
}

/// Decodes a stream body of wire version `t` and returns the number of live
/// entries delivered.
pub(crate) fn read_stream<B: Buffer, H: SnapshotHandler>(
    r: &mut ValueReader<B>,
    t: RecordType,
    key: &[u8],
    handler: &mut H,
) -> Result<u64> {
    let entries_view = r.buf.view(r.buf.pos())?;

    let mut read = 0u64;
    read_entries(r, &mut |entry| {
        read += 1;
        handler.on_stream_entry(key, entry)
    })?;

    // Metadata: total length and last ID, plus first ID, max-deleted ID and
    // the cumulative entries-added counter in versions 2 and 3. None of it
    // is observable through the handler.
    r.read_len()?;
    r.read_len()?;
    r.read_len()?;
    if t >= RecordType::StreamListpacks2 {
        r.read_len()?;
        r.read_len()?;
        r.read_len()?;
        r.read_len()?;
        r.read_len()?;
    }

    let groups_view = r.buf.view(r.buf.pos())?;

    // Collect the IDs some consumer still has pending; values come later.
    let mut pending: HashMap<StreamId, Option<Vec<(Vec<u8>, Vec<u8>)>>> = HashMap::new();
    read_groups(r, t, &mut |group| {
        for consumer in &group.consumers {
            for pe in &consumer.pending {
                pending.insert(pe.entry.id, None);
            }
        }
        Ok(())
    })?;

    // Second pass over the entries fills values for exactly those IDs.
    let mut entries_reader = ValueReader::new(entries_view, r.max_lz77);
    read_entries(&mut entries_reader, &mut |entry| {
        if let Some(slot) = pending.get_mut(&entry.id) {
            *slot = Some(entry.fields);
        }
        Ok(())
    })?;

    // Final walk of the groups delivers them with every pending entry
    // populated.
    let mut groups_reader = ValueReader::new(groups_view, r.max_lz77);
    read_groups(&mut groups_reader, t, &mut |mut group| {
        for consumer in &mut group.consumers {
            for pe in &mut consumer.pending {
                match pending.get(&pe.entry.id) {
                    Some(Some(fields)) => pe.entry.fields = fields.clone(),
                    _ => {
                        return Err(SnapshotError::Malformed(
                            "an entry is in a PEL but absent from the stream",
                        ))
                    }
                }
            }
        }
        handler.on_stream_group(key, group)
    })?;

    Ok(read)
}

fn required_entry<B: Buffer>(r: &mut ValueReader<B>) -> Result<Vec<u8>> {
    r.read_listpack_entry()?
        .ok_or(SnapshotError::Malformed("unexpected end of listpack"))
}

fn required_int<B: Buffer>(r: &mut ValueReader<B>) -> Result<i64> {
    parse_i64(&required_entry(r)?)
}

fn required_count<B: Buffer>(r: &mut ValueReader<B>) -> Result<usize> {
    usize::try_from(required_int(r)?)
        .map_err(|_| SnapshotError::Malformed("negative count in stream listpack"))
}

fn apply_delta(base: u64, delta: i64) -> u64 {
    if delta < 0 {
        base.wrapping_sub(delta.unsigned_abs())
    } else {
        base.wrapping_add(delta as u64)
    }
}

/// Walks the entries section: a pack count, then per pack a master ID string
/// and a listpack of delta-encoded child entries. Tombstones are decoded but
/// not delivered.
fn read_entries<B: Buffer>(
    r: &mut ValueReader<B>,
    cb: &mut impl FnMut(StreamEntry) -> Result<()>,
) -> Result<()> {
    let (pack_count, _) = r.read_len()?;

    for _ in 0..pack_count {
        let master_raw = r.read_string()?;
        let mut master_reader = r.inner(&master_raw);
        let master = StreamId {
            millis: master_reader.read_u64_be()?,
            seq: master_reader.read_u64_be()?,
        };

        let lp = r.read_string()?;
        let mut lpr = r.inner(&lp);

        // <lpbytes><lplen>: the listpack header is not trusted here, the
        // stream metadata drives the traversal.
        lpr.skip(6)?;

        let count = required_count(&mut lpr)?;
        let deleted = required_count(&mut lpr)?;
        let num_fields = required_count(&mut lpr)?;

        let mut master_fields: Vec<Vec<u8>> = Vec::new();
        for _ in 0..num_fields {
            master_fields.push(required_entry(&mut lpr)?);
        }
        required_entry(&mut lpr)?; // zero terminator of the master entry

        for _ in 0..count + deleted {
            let flag = required_int(&mut lpr)?;
            let millis_delta = required_int(&mut lpr)?;
            let seq_delta = required_int(&mut lpr)?;

            let id = StreamId {
                millis: apply_delta(master.millis, millis_delta),
                seq: apply_delta(master.seq, seq_delta),
            };

            let mut fields = Vec::new();
            if flag & STREAM_ITEM_FLAG_SAME_FIELDS != 0 {
                // Only the values follow; the names come from the master
                // entry.
                for name in &master_fields {
                    let value = required_entry(&mut lpr)?;
                    fields.push((name.clone(), value));
                }
            } else {
                let n = required_count(&mut lpr)?;
                for _ in 0..n {
                    let field = required_entry(&mut lpr)?;
                    let value = required_entry(&mut lpr)?;
                    fields.push((field, value));
                }
            }

            if flag & STREAM_ITEM_FLAG_DELETED == 0 {
                cb(StreamEntry { id, fields })?;
            }

            required_entry(&mut lpr)?; // per-entry listpack count
        }

        lpr.expect_listpack_end()?;
    }

    Ok(())
}

/// Walks the consumer-groups section, delivering groups whose pending
/// entries carry IDs and delivery metadata but no values yet.
fn read_groups<B: Buffer>(
    r: &mut ValueReader<B>,
    t: RecordType,
    cb: &mut impl FnMut(StreamConsumerGroup) -> Result<()>,
) -> Result<()> {
    let (count, _) = r.read_len()?;

    for _ in 0..count {
        let name = r.read_string()?;

        let (last_millis, _) = r.read_len()?;
        let (last_seq, _) = r.read_len()?;
        let last_id = StreamId {
            millis: last_millis,
            seq: last_seq,
        };

        let entries_read = if t >= RecordType::StreamListpacks2 {
            r.read_len()?.0 as i64
        } else {
            0
        };

        let (global_pel_len, _) = r.read_len()?;
        let mut global: HashMap<StreamId, StreamPendingEntry> = HashMap::new();
        for _ in 0..global_pel_len {
            let id = StreamId {
                millis: r.read_u64_be()?,
                seq: r.read_u64_be()?,
            };
            let delivery_time = r.read_u64_le()? as i64;
            let (delivery_count, _) = r.read_len()?;

            global.insert(
                id,
                StreamPendingEntry {
                    entry: StreamEntry {
                        id,
                        fields: Vec::new(),
                    },
                    delivery_time,
                    delivery_count,
                },
            );
        }

        let (consumer_count, _) = r.read_len()?;
        let mut consumers = Vec::new();
        for _ in 0..consumer_count {
            let consumer_name = r.read_string()?;
            let seen_time = r.read_u64_le()? as i64;
            let active_time = if t >= RecordType::StreamListpacks3 {
                r.read_u64_le()? as i64
            } else {
                0
            };

            let (pel_len, _) = r.read_len()?;
            let mut pending = Vec::new();
            for _ in 0..pel_len {
                let id = StreamId {
                    millis: r.read_u64_be()?,
                    seq: r.read_u64_be()?,
                };

                // Per-consumer lists carry only IDs; delivery time and count
                // live in the group's global PEL, which must contain the ID.
                let pe = global.get(&id).ok_or(SnapshotError::Malformed(
                    "a consumer pending entry is missing from the group PEL",
                ))?;
                pending.push(pe.clone());
            }

            consumers.push(StreamConsumer {
                name: consumer_name,
                seen_time,
                active_time,
                pending,
            });
        }

        cb(StreamConsumerGroup {
            name,
            last_id,
            entries_read,
            consumers,
        })?;
    }

    Ok(())
}
