//! Value-level decoding: the length prefix, the string codec, the simple
//! (string-encoded) containers, and the per-type dispatch.
//!
//! Every reader method advances the cursor by the amount of data read.
//! Integer-encoded wire values are materialised as their ASCII decimal
//! rendering, so a value always reaches the handler as bytes regardless of
//! which of its two wire encodings was used.

use crate::buffer::{Buffer, SliceBuf};
use crate::constants::*;
use crate::error::{Result, SnapshotError};
use crate::handler::SnapshotHandler;
use crate::lz77;
use crate::{module, stream};

/// Reads the single value dump in `payload` (type byte first, no checksum
/// block) into the handler. The key is passed through to the handler
/// callbacks verbatim.
pub fn read_value<H: SnapshotHandler>(key: &[u8], payload: &[u8], handler: &mut H) -> Result<()> {
    read_value_limited(key, payload, handler, None)
}

pub(crate) fn read_value_limited<H: SnapshotHandler>(
    key: &[u8],
    payload: &[u8],
    handler: &mut H,
    max_lz77: Option<u64>,
) -> Result<()> {
    let mut reader = ValueReader::new(SliceBuf::new(payload), max_lz77);
    let t = reader.read_type()?;
    reader.read_object(key, t, handler)
}

pub(crate) fn to_usize(value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| SnapshotError::Malformed("length out of range"))
}

pub(crate) fn itoa(value: i64) -> Vec<u8> {
    value.to_string().into_bytes()
}

pub(crate) fn parse_i64(bytes: &[u8]) -> Result<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(SnapshotError::Malformed("expected an integer entry"))
}

pub(crate) fn parse_f64(bytes: &[u8]) -> Result<f64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(SnapshotError::Malformed("expected a float entry"))
}

/// Decoder for RDB objects over any [`Buffer`].
pub(crate) struct ValueReader<B> {
    pub(crate) buf: B,
    pub(crate) max_lz77: Option<u64>,
}

impl<B: Buffer> ValueReader<B> {
    pub(crate) fn new(buf: B, max_lz77: Option<u64>) -> Self {
        Self { buf, max_lz77 }
    }

    /// Opens an inner reader over the byte content of a host string.
    pub(crate) fn inner<'a>(&self, data: &'a [u8]) -> ValueReader<SliceBuf<'a>> {
        ValueReader::new(SliceBuf::new(data), self.max_lz77)
    }

    pub(crate) fn read_type(&mut self) -> Result<RecordType> {
        RecordType::try_from(self.read_u8()?)
    }

    /// Dispatches one record body to the handler based on its type tag.
    pub(crate) fn read_object<H: SnapshotHandler>(
        &mut self,
        key: &[u8],
        t: RecordType,
        handler: &mut H,
    ) -> Result<()> {
        match t {
            RecordType::String => {
                let value = self.read_string()?;
                handler.on_string(key, value)
            }
            RecordType::List => {
                handler.on_list_begin(key)?;
                let read = self.read_list(|elem| handler.on_list_entry(key, elem))?;
                handler.on_list_end(key, read);
                Ok(())
            }
            RecordType::Set => {
                handler.on_set_begin(key)?;
                self.read_set(|elem| handler.on_set_entry(key, elem))
            }
            RecordType::Zset => {
                handler.on_zset_begin(key)?;
                let read = self.read_zset(|m, s| handler.on_zset_entry(key, m, s))?;
                handler.on_zset_end(key, read);
                Ok(())
            }
            RecordType::Hash => {
                handler.on_hash_begin(key)?;
                self.read_hash(|f, v| handler.on_hash_entry(key, f, v))
            }
            RecordType::Zset2 => {
                handler.on_zset_begin(key)?;
                let read = self.read_zset2(|m, s| handler.on_zset_entry(key, m, s))?;
                handler.on_zset_end(key, read);
                Ok(())
            }
            RecordType::Module2 => {
                let (value, marker) = module::read_module2(self, handler.allow_partial_read())?;
                handler.on_module(key, value, marker)
            }
            RecordType::HashZipmap => {
                handler.on_hash_begin(key)?;
                self.read_hash_zipmap(|f, v| handler.on_hash_entry(key, f, v))
            }
            RecordType::ListZiplist => {
                handler.on_list_begin(key)?;
                let read = self.read_list_ziplist(|elem| handler.on_list_entry(key, elem))?;
                handler.on_list_end(key, read);
                Ok(())
            }
            RecordType::SetIntset => {
                handler.on_set_begin(key)?;
                self.read_set_intset(|elem| handler.on_set_entry(key, elem))
            }
            RecordType::ZsetZiplist => {
                handler.on_zset_begin(key)?;
                let read = self.read_zset_ziplist(|m, s| handler.on_zset_entry(key, m, s))?;
                handler.on_zset_end(key, read);
                Ok(())
            }
            RecordType::HashZiplist => {
                handler.on_hash_begin(key)?;
                self.read_hash_ziplist(|f, v| handler.on_hash_entry(key, f, v))
            }
            RecordType::ListQuicklist => {
                handler.on_list_begin(key)?;
                let read = self.read_list_quicklist(|elem| handler.on_list_entry(key, elem))?;
                handler.on_list_end(key, read);
                Ok(())
            }
            RecordType::HashListpack => {
                handler.on_hash_begin(key)?;
                self.read_hash_listpack(|f, v| handler.on_hash_entry(key, f, v))
            }
            RecordType::ZsetListpack => {
                handler.on_zset_begin(key)?;
                let read = self.read_zset_listpack(|m, s| handler.on_zset_entry(key, m, s))?;
                handler.on_zset_end(key, read);
                Ok(())
            }
            RecordType::ListQuicklist2 => {
                handler.on_list_begin(key)?;
                let read = self.read_list_quicklist2(|elem| handler.on_list_entry(key, elem))?;
                handler.on_list_end(key, read);
                Ok(())
            }
            RecordType::SetListpack => {
                handler.on_set_begin(key)?;
                self.read_set_listpack(|elem| handler.on_set_entry(key, elem))
            }
            RecordType::StreamListpacks
            | RecordType::StreamListpacks2
            | RecordType::StreamListpacks3 => {
                handler.on_stream_begin(key)?;
                let read = stream::read_stream(self, t, key, handler)?;
                handler.on_stream_end(key, read);
                Ok(())
            }
            RecordType::HashMetadata => {
                handler.on_hash_begin(key)?;
                self.read_hash_metadata(|f, v, exp| handler.on_hash_entry_ex(key, f, v, exp))
            }
            RecordType::HashListpackEx => {
                handler.on_hash_begin(key)?;
                self.read_hash_listpack_ex(|f, v, exp| handler.on_hash_entry_ex(key, f, v, exp))
            }
        }
    }

    /// Reads a length-encoded integer and whether it used one of the special
    /// (non-length) encodings.
    ///
    /// The first byte's top two bits select the form:
    ///
    /// - `00xxxxxx`: 6-bit unsigned length
    /// - `01xxxxxx`: 14-bit unsigned length, one more byte follows
    /// - `10000000`: 32-bit unsigned big-endian length in the next 4 bytes
    /// - `10000001`: 64-bit unsigned big-endian length in the next 8 bytes
    /// - `11xxxxxx`: special encoding, the low 6 bits select which
    pub(crate) fn read_len(&mut self) -> Result<(u64, bool)> {
        let b0 = self.read_u8()?;

        match b0 & 0xC0 {
            LEN_6BIT => Ok(((b0 & 0x3F) as u64, false)),
            LEN_14BIT => {
                let b1 = self.read_u8()?;
                Ok((((b0 & 0x3F) as u64) << 8 | b1 as u64, false))
            }
            LEN_32_OR_64BIT => match b0 {
                LEN_32BIT => Ok((self.read_u32_be()? as u64, false)),
                LEN_64BIT => Ok((self.read_u64_be()?, false)),
                _ => Err(SnapshotError::Malformed("unexpected length encoding")),
            },
            LEN_ENCODED_VALUE => Ok(((b0 & 0x3F) as u64, true)),
            _ => Err(SnapshotError::Malformed("unexpected length encoding")),
        }
    }

    /// Reads a string object: a length prefix followed by the raw bytes, or
    /// one of the special encodings (8/16/32-bit integers rendered to ASCII
    /// decimal, or an LZ77-compressed block).
    pub(crate) fn read_string(&mut self) -> Result<Vec<u8>> {
        let (length, encoded) = self.read_len()?;

        if encoded {
            return match length {
                STR_ENC_INT8 => Ok(itoa(self.read_u8()? as i8 as i64)),
                STR_ENC_INT16 => Ok(itoa(self.read_u16_le()? as i16 as i64)),
                STR_ENC_INT32 => Ok(itoa(self.read_u32_le()? as i32 as i64)),
                STR_ENC_LZF => {
                    let (compressed_len, _) = self.read_len()?;
                    let (uncompressed_len, _) = self.read_len()?;

                    if let Some(max) = self.max_lz77 {
                        if uncompressed_len > max {
                            return Err(SnapshotError::LimitExceeded {
                                limit: "max uncompressed string size",
                                current: uncompressed_len,
                                max,
                            });
                        }
                    }

                    let compressed = self.read_vec(to_usize(compressed_len)?)?;
                    lz77::decompress(&compressed, to_usize(uncompressed_len)?)
                }
                _ => Err(SnapshotError::Malformed("unexpected string encoding")),
            };
        }

        self.read_vec(to_usize(length)?)
    }

    /// List body: `<len><elem>...`. Returns the number of elements read.
    pub(crate) fn read_list(
        &mut self,
        mut cb: impl FnMut(Vec<u8>) -> Result<()>,
    ) -> Result<u64> {
        let (length, _) = self.read_len()?;

        for _ in 0..length {
            let elem = self.read_string()?;
            cb(elem)?;
        }

        Ok(length)
    }

    /// Set body: `<len><elem>...`.
    pub(crate) fn read_set(&mut self, mut cb: impl FnMut(Vec<u8>) -> Result<()>) -> Result<()> {
        let (length, _) = self.read_len()?;

        for _ in 0..length {
            let elem = self.read_string()?;
            cb(elem)?;
        }

        Ok(())
    }

    /// Sorted set with ASCII-encoded scores. The score is described by its
    /// first byte: 255 is negative infinity, 254 positive infinity, 253 NaN,
    /// anything else is the byte length of an ASCII float rendering.
    pub(crate) fn read_zset(
        &mut self,
        mut cb: impl FnMut(Vec<u8>, f64) -> Result<()>,
    ) -> Result<u64> {
        let (length, _) = self.read_len()?;

        for _ in 0..length {
            let member = self.read_string()?;

            let score_len = self.read_u8()?;
            let score = match score_len {
                255 => f64::NEG_INFINITY,
                254 => f64::INFINITY,
                253 => f64::NAN,
                n => {
                    let data = self.read_vec(n as usize)?;
                    parse_f64(&data)?
                }
            };

            cb(member, score)?;
        }

        Ok(length)
    }

    /// Sorted set with IEEE-754 scores (8 bytes, little endian).
    pub(crate) fn read_zset2(
        &mut self,
        mut cb: impl FnMut(Vec<u8>, f64) -> Result<()>,
    ) -> Result<u64> {
        let (length, _) = self.read_len()?;

        for _ in 0..length {
            let member = self.read_string()?;
            let score = f64::from_bits(self.read_u64_le()?);
            cb(member, score)?;
        }

        Ok(length)
    }

    /// Hash body: `<len><field><value>...`.
    pub(crate) fn read_hash(
        &mut self,
        mut cb: impl FnMut(Vec<u8>, Vec<u8>) -> Result<()>,
    ) -> Result<()> {
        let (length, _) = self.read_len()?;

        for _ in 0..length {
            let field = self.read_string()?;
            let value = self.read_string()?;
            cb(field, value)?;
        }

        Ok(())
    }

    /// Hash with per-field expiry: `<min-expiry:u64><len>` then
    /// `<expiry-delta><field><value>` triplets. A zero delta means the field
    /// does not expire; otherwise the absolute expiry is `min-expiry + delta`
    /// in Unix milliseconds.
    pub(crate) fn read_hash_metadata(
        &mut self,
        mut cb: impl FnMut(Vec<u8>, Vec<u8>, Option<u64>) -> Result<()>,
    ) -> Result<()> {
        let min_expiry = self.read_u64_le()?;
        let (length, _) = self.read_len()?;

        for _ in 0..length {
            let (delta, _) = self.read_len()?;
            let expire_at = (delta > 0).then(|| min_expiry.wrapping_add(delta));

            let field = self.read_string()?;
            let value = self.read_string()?;
            cb(field, value, expire_at)?;
        }

        Ok(())
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        Ok(self.buf.get(1)?[0])
    }

    pub(crate) fn read_u16_le(&mut self) -> Result<u16> {
        let b = self.buf.get(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn read_u32_le(&mut self) -> Result<u32> {
        let b = self.buf.get(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn read_u32_be(&mut self) -> Result<u32> {
        let b = self.buf.get(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn read_u64_le(&mut self) -> Result<u64> {
        let b = self.buf.get(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub(crate) fn read_u64_be(&mut self) -> Result<u64> {
        let b = self.buf.get(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub(crate) fn read_vec(&mut self, n: usize) -> Result<Vec<u8>> {
        Ok(self.buf.get(n)?.to_vec())
    }

    pub(crate) fn skip(&mut self, n: usize) -> Result<()> {
        self.buf.get(n)?;
        Ok(())
    }
}
