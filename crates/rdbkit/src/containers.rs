//! Decoders for the inline container formats carried inside a host string:
//! zipmap, ziplist, intset, listpack, and the two quicklist generations.
//!
//! Every decoder reads the host string, then switches to an inner cursor
//! over its bytes. None of the embedded sizes or end markers are trusted;
//! bounded containers must produce their sentinel exactly after the declared
//! count, unbounded ones terminate on it.

use crate::buffer::Buffer;
use crate::constants::*;
use crate::error::{Result, SnapshotError};
use crate::reader::{itoa, parse_f64, to_usize, ValueReader};

const ZM_UNEXPECTED_END: SnapshotError = SnapshotError::Malformed("unexpected end of zipmap");
const ZL_UNEXPECTED_END: SnapshotError = SnapshotError::Malformed("unexpected end of ziplist");
const LP_UNEXPECTED_END: SnapshotError = SnapshotError::Malformed("unexpected end of listpack");

impl<B: Buffer> ValueReader<B> {
    /// Legacy hash: `<zmlen><entry>...<0xFF>` where each entry is
    /// `<len><field><len><free><value><free bytes>`. A `zmlen` of 254 or
    /// more means the count is unknown and the map runs to the end marker.
    pub(crate) fn read_hash_zipmap(
        &mut self,
        mut cb: impl FnMut(Vec<u8>, Vec<u8>) -> Result<()>,
    ) -> Result<()> {
        let zipmap = self.read_string()?;
        let mut inner = self.inner(&zipmap);

        let zmlen = inner.read_u8()?;
        let limit = (zmlen < ZIPMAP_LEN_BIG).then_some(zmlen as u64);

        let mut read = 0u64;
        loop {
            if let Some(limit) = limit {
                if read >= limit {
                    break;
                }
            }

            let len0 = inner.read_u8()?;
            if len0 == ZIPMAP_END {
                if limit.is_none() {
                    return Ok(());
                }
                return Err(ZM_UNEXPECTED_END);
            }

            let field_len = if len0 < ZIPMAP_LEN_BIG {
                len0 as u32
            } else {
                inner.read_u32_le()?
            };
            let field = inner.read_vec(field_len as usize)?;

            let len0 = inner.read_u8()?;
            if len0 == ZIPMAP_END {
                return Err(ZM_UNEXPECTED_END);
            }

            let value_len = if len0 < ZIPMAP_LEN_BIG {
                len0 as u32
            } else {
                inner.read_u32_le()?
            };

            let free_len = inner.read_u8()?;
            let value = inner.read_vec(value_len as usize)?;
            inner.skip(free_len as usize)?;

            cb(field, value)?;
            read += 1;
        }

        // The count was declared; the end marker must follow it exactly.
        if inner.read_u8()? != ZIPMAP_END {
            return Err(ZM_UNEXPECTED_END);
        }

        Ok(())
    }

    /// Legacy list stored as a ziplist. Returns the number of elements read.
    pub(crate) fn read_list_ziplist(
        &mut self,
        mut cb: impl FnMut(Vec<u8>) -> Result<()>,
    ) -> Result<u64> {
        let ziplist = self.read_string()?;
        let mut inner = self.inner(&ziplist);

        let limit = inner.read_ziplist_header()?;

        let mut read = 0u64;
        loop {
            if let Some(limit) = limit {
                if read >= limit {
                    break;
                }
            }

            match inner.read_ziplist_entry()? {
                Some(elem) => {
                    cb(elem)?;
                    read += 1;
                }
                None => {
                    if limit.is_none() {
                        return Ok(read);
                    }
                    return Err(ZL_UNEXPECTED_END);
                }
            }
        }

        inner.expect_ziplist_end()?;
        Ok(read)
    }

    /// Legacy sorted set stored as a ziplist of member/score pairs.
    pub(crate) fn read_zset_ziplist(
        &mut self,
        mut cb: impl FnMut(Vec<u8>, f64) -> Result<()>,
    ) -> Result<u64> {
        let ziplist = self.read_string()?;
        let mut inner = self.inner(&ziplist);

        let limit = inner.read_ziplist_header()?;

        let mut pairs = 0u64;
        loop {
            if let Some(limit) = limit {
                if pairs * 2 >= limit {
                    break;
                }
            }

            let member = match inner.read_ziplist_entry()? {
                Some(member) => member,
                None => {
                    if limit.is_none() {
                        return Ok(pairs);
                    }
                    return Err(ZL_UNEXPECTED_END);
                }
            };

            let score = inner
                .read_ziplist_entry()?
                .ok_or(ZL_UNEXPECTED_END)?;
            cb(member, parse_f64(&score)?)?;
            pairs += 1;
        }

        inner.expect_ziplist_end()?;
        Ok(pairs)
    }

    /// Legacy hash stored as a ziplist of field/value pairs.
    pub(crate) fn read_hash_ziplist(
        &mut self,
        mut cb: impl FnMut(Vec<u8>, Vec<u8>) -> Result<()>,
    ) -> Result<()> {
        let ziplist = self.read_string()?;
        let mut inner = self.inner(&ziplist);

        let limit = inner.read_ziplist_header()?;

        let mut pairs = 0u64;
        loop {
            if let Some(limit) = limit {
                if pairs * 2 >= limit {
                    break;
                }
            }

            let field = match inner.read_ziplist_entry()? {
                Some(field) => field,
                None => {
                    if limit.is_none() {
                        return Ok(());
                    }
                    return Err(ZL_UNEXPECTED_END);
                }
            };

            let value = inner
                .read_ziplist_entry()?
                .ok_or(ZL_UNEXPECTED_END)?;
            cb(field, value)?;
            pairs += 1;
        }

        inner.expect_ziplist_end()
    }

    /// Integer-only set: `<encoding:u32><len:u32>` then `len` signed
    /// little-endian integers of `encoding` bytes each.
    pub(crate) fn read_set_intset(
        &mut self,
        mut cb: impl FnMut(Vec<u8>) -> Result<()>,
    ) -> Result<()> {
        let intset = self.read_string()?;
        let mut inner = self.inner(&intset);

        let encoding = inner.read_u32_le()?;
        let length = inner.read_u32_le()?;

        for _ in 0..length {
            let elem: i64 = match encoding {
                INTSET_ENC_INT16 => inner.read_u16_le()? as i16 as i64,
                INTSET_ENC_INT32 => inner.read_u32_le()? as i32 as i64,
                INTSET_ENC_INT64 => inner.read_u64_le()? as i64,
                _ => return Err(SnapshotError::Malformed("unexpected intset encoding")),
            };

            cb(itoa(elem))?;
        }

        Ok(())
    }

    /// Quicklist v1: a length-prefixed sequence of ziplists. The list is the
    /// concatenation of every ziplist's elements.
    pub(crate) fn read_list_quicklist(
        &mut self,
        mut cb: impl FnMut(Vec<u8>) -> Result<()>,
    ) -> Result<u64> {
        let (nodes, _) = self.read_len()?;

        let mut total = 0u64;
        for _ in 0..nodes {
            total += self.read_list_ziplist(&mut cb)?;
        }

        Ok(total)
    }

    /// Quicklist v2: a length-prefixed sequence of `(container, payload)`
    /// nodes, where container 1 is a plain string element and container 2 an
    /// inline listpack whose entries are flattened into the list.
    pub(crate) fn read_list_quicklist2(
        &mut self,
        mut cb: impl FnMut(Vec<u8>) -> Result<()>,
    ) -> Result<u64> {
        let (nodes, _) = self.read_len()?;

        let mut total = 0u64;
        for _ in 0..nodes {
            let (container, _) = self.read_len()?;
            let data = self.read_string()?;

            match container {
                QUICKLIST2_NODE_PLAIN => {
                    cb(data)?;
                    total += 1;
                }
                QUICKLIST2_NODE_PACKED => {
                    total += self.read_listpack(&data, &mut cb)?;
                }
                _ => return Err(SnapshotError::Malformed("unexpected quicklist2 container")),
            }
        }

        Ok(total)
    }

    /// Modern hash stored as a listpack of field/value pairs.
    pub(crate) fn read_hash_listpack(
        &mut self,
        mut cb: impl FnMut(Vec<u8>, Vec<u8>) -> Result<()>,
    ) -> Result<()> {
        let listpack = self.read_string()?;
        let mut inner = self.inner(&listpack);

        let limit = inner.read_listpack_header()?;

        let mut pairs = 0u64;
        loop {
            if let Some(limit) = limit {
                if pairs * 2 >= limit {
                    break;
                }
            }

            let field = match inner.read_listpack_entry()? {
                Some(field) => field,
                None => {
                    if limit.is_none() {
                        return Ok(());
                    }
                    return Err(LP_UNEXPECTED_END);
                }
            };

            let value = inner
                .read_listpack_entry()?
                .ok_or(LP_UNEXPECTED_END)?;
            cb(field, value)?;
            pairs += 1;
        }

        inner.expect_listpack_end()
    }

    /// Modern sorted set stored as a listpack of member/score pairs.
    pub(crate) fn read_zset_listpack(
        &mut self,
        mut cb: impl FnMut(Vec<u8>, f64) -> Result<()>,
    ) -> Result<u64> {
        let listpack = self.read_string()?;
        let mut inner = self.inner(&listpack);

        let limit = inner.read_listpack_header()?;

        let mut pairs = 0u64;
        loop {
            if let Some(limit) = limit {
                if pairs * 2 >= limit {
                    break;
                }
            }

            let member = match inner.read_listpack_entry()? {
                Some(member) => member,
                None => {
                    if limit.is_none() {
                        return Ok(pairs);
                    }
                    return Err(LP_UNEXPECTED_END);
                }
            };

            let score = inner
                .read_listpack_entry()?
                .ok_or(LP_UNEXPECTED_END)?;
            cb(member, parse_f64(&score)?)?;
            pairs += 1;
        }

        inner.expect_listpack_end()?;
        Ok(pairs)
    }

    /// Modern set stored as a listpack.
    pub(crate) fn read_set_listpack(
        &mut self,
        mut cb: impl FnMut(Vec<u8>) -> Result<()>,
    ) -> Result<()> {
        let listpack = self.read_string()?;
        self.read_listpack(&listpack, &mut cb)?;
        Ok(())
    }

    /// Hash with per-field expiry stored as a listpack of
    /// `(field, value, expiry)` triplets. The leading minimum-expiry hint is
    /// read and discarded; per-field expiries are absolute milliseconds with
    /// zero meaning no expiry.
    pub(crate) fn read_hash_listpack_ex(
        &mut self,
        mut cb: impl FnMut(Vec<u8>, Vec<u8>, Option<u64>) -> Result<()>,
    ) -> Result<()> {
        let _min_expiry = self.read_u64_le()?;

        let listpack = self.read_string()?;
        let mut inner = self.inner(&listpack);

        let limit = inner.read_listpack_header()?;

        let mut triplets = 0u64;
        loop {
            if let Some(limit) = limit {
                if triplets * 3 >= limit {
                    break;
                }
            }

            let field = match inner.read_listpack_entry()? {
                Some(field) => field,
                None => {
                    if limit.is_none() {
                        return Ok(());
                    }
                    return Err(LP_UNEXPECTED_END);
                }
            };

            let value = inner
                .read_listpack_entry()?
                .ok_or(LP_UNEXPECTED_END)?;
            let expiry = inner
                .read_listpack_entry()?
                .ok_or(LP_UNEXPECTED_END)?;

            let expire_at = crate::reader::parse_i64(&expiry)?;
            let expire_at = (expire_at > 0).then_some(expire_at as u64);

            cb(field, value, expire_at)?;
            triplets += 1;
        }

        inner.expect_listpack_end()
    }

    /// Walks the entries of a listpack carried in `data`, invoking `cb` for
    /// each. Returns the number of entries read.
    pub(crate) fn read_listpack(
        &self,
        data: &[u8],
        cb: &mut impl FnMut(Vec<u8>) -> Result<()>,
    ) -> Result<u64> {
        let mut inner = self.inner(data);
        let limit = inner.read_listpack_header()?;

        let mut read = 0u64;
        loop {
            if let Some(limit) = limit {
                if read >= limit {
                    break;
                }
            }

            match inner.read_listpack_entry()? {
                Some(entry) => {
                    cb(entry)?;
                    read += 1;
                }
                None => {
                    if limit.is_none() {
                        return Ok(read);
                    }
                    return Err(LP_UNEXPECTED_END);
                }
            }
        }

        inner.expect_listpack_end()?;
        Ok(read)
    }

    /// Skips `<zlbytes><zltail>` and reads `<zllen>`. A length of 0xFFFF
    /// means the count is unknown (`None`).
    fn read_ziplist_header(&mut self) -> Result<Option<u64>> {
        self.skip(8)?;
        let zllen = self.read_u16_le()?;
        Ok((zllen != ZIPLIST_LEN_BIG).then_some(zllen as u64))
    }

    fn expect_ziplist_end(&mut self) -> Result<()> {
        if self.read_u8()? != ZIPLIST_END {
            return Err(ZL_UNEXPECTED_END);
        }
        Ok(())
    }

    /// Skips `<lpbytes>` and reads `<lplen>`. A length of 0xFFFF means the
    /// count is unknown (`None`).
    pub(crate) fn read_listpack_header(&mut self) -> Result<Option<u64>> {
        self.skip(4)?;
        let lplen = self.read_u16_le()?;
        Ok((lplen != LISTPACK_LEN_BIG).then_some(lplen as u64))
    }

    pub(crate) fn expect_listpack_end(&mut self) -> Result<()> {
        if self.read_u8()? != LISTPACK_END {
            return Err(LP_UNEXPECTED_END);
        }
        Ok(())
    }

    /// Reads one ziplist entry, or `None` when the cursor sits on the end
    /// marker.
    pub(crate) fn read_ziplist_entry(&mut self) -> Result<Option<Vec<u8>>> {
        let prevlen = self.read_u8()?;
        if prevlen == ZIPLIST_END {
            return Ok(None);
        }
        if prevlen == ZIPLIST_PREVLEN_BIG {
            self.skip(4)?;
        }

        let encoding = self.read_u8()?;

        // String forms, selected by the top two bits.
        match encoding & 0xC0 {
            ZIPLIST_ENC_6BIT_STR => {
                let len = (encoding & 0x3F) as usize;
                return Ok(Some(self.read_vec(len)?));
            }
            ZIPLIST_ENC_14BIT_STR => {
                let lsb = self.read_u8()?;
                let len = ((encoding & 0x3F) as usize) << 8 | lsb as usize;
                return Ok(Some(self.read_vec(len)?));
            }
            ZIPLIST_ENC_32BIT_STR => {
                let len = self.read_u32_be()?;
                return Ok(Some(self.read_vec(to_usize(len as u64)?)?));
            }
            _ => {}
        }

        // Integer forms.
        let value: i64 = match encoding {
            ZIPLIST_ENC_INT8 => self.read_u8()? as i8 as i64,
            ZIPLIST_ENC_INT16 => self.read_u16_le()? as i16 as i64,
            ZIPLIST_ENC_INT24 => {
                let raw = self.buf.get(3)?;
                let wide =
                    (raw[0] as i32) << 8 | (raw[1] as i32) << 16 | (raw[2] as i32) << 24;
                (wide >> 8) as i64
            }
            ZIPLIST_ENC_INT32 => self.read_u32_le()? as i32 as i64,
            ZIPLIST_ENC_INT64 => self.read_u64_le()? as i64,
            // 1111xxxx with xxxx in 0001..1101: immediate 0..12.
            enc if (0xF1..=0xFD).contains(&enc) => (enc - 0xF1) as i64,
            _ => return Err(SnapshotError::Malformed("unexpected ziplist encoding")),
        };

        Ok(Some(itoa(value)))
    }

    /// Reads one listpack entry, or `None` when the cursor sits on the end
    /// marker. The trailing back-length is consumed and discarded.
    pub(crate) fn read_listpack_entry(&mut self) -> Result<Option<Vec<u8>>> {
        let encoding = self.read_u8()?;
        if encoding == LISTPACK_END {
            return Ok(None);
        }

        // Integer forms first; their back-length always fits one byte.
        let int_value: Option<i64> = if encoding & 0x80 == LISTPACK_ENC_UINT7 {
            Some((encoding & 0x7F) as i64)
        } else if encoding & 0xE0 == LISTPACK_ENC_INT13 {
            let lsb = self.read_u8()?;
            let raw = ((encoding & 0x1F) as i16) << 8 | lsb as i16;
            Some(((raw << 3) >> 3) as i64)
        } else if encoding == LISTPACK_ENC_INT16 {
            Some(self.read_u16_le()? as i16 as i64)
        } else if encoding == LISTPACK_ENC_INT24 {
            let raw = self.buf.get(3)?;
            let wide = raw[0] as i32 | (raw[1] as i32) << 8 | (raw[2] as i32) << 16;
            Some(((wide << 8) >> 8) as i64)
        } else if encoding == LISTPACK_ENC_INT32 {
            Some(self.read_u32_le()? as i32 as i64)
        } else if encoding == LISTPACK_ENC_INT64 {
            Some(self.read_u64_le()? as i64)
        } else {
            None
        };

        if let Some(value) = int_value {
            self.skip(1)?;
            return Ok(Some(itoa(value)));
        }

        // String forms; the back-length width depends on the total entry size.
        let (value_len, back_len) = if encoding & 0xC0 == LISTPACK_ENC_6BIT_STR {
            let len = (encoding & 0x3F) as usize;
            (len, 1 + len)
        } else if encoding & 0xF0 == LISTPACK_ENC_12BIT_STR {
            let lsb = self.read_u8()?;
            let len = ((encoding & 0x0F) as usize) << 8 | lsb as usize;
            (len, 2 + len)
        } else if encoding == LISTPACK_ENC_32BIT_STR {
            let len = to_usize(self.read_u32_le()? as u64)?;
            (len, 5 + len)
        } else {
            return Err(SnapshotError::Malformed("unexpected listpack encoding"));
        };

        let data = self.read_vec(value_len)?;
        self.skip(backlen_width(back_len))?;

        Ok(Some(data))
    }
}

/// Number of bytes the back-length of an entry of `back_len` total bytes
/// occupies. Each byte carries 7 bits.
pub(crate) fn backlen_width(back_len: usize) -> usize {
    if back_len <= 127 {
        1
    } else if back_len < 16383 {
        2
    } else if back_len < 2097151 {
        3
    } else if back_len < 268435455 {
        4
    } else {
        5
    }
}
