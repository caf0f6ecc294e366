//! Wire-format constants: record type tags, envelope opcodes, and the
//! per-container encoding bytes.

use crate::error::SnapshotError;

/// Highest RDB format version this library understands.
pub const SUPPORTED_VERSION: u16 = 12;

/// One-byte type tag of a record. The numeric assignments are fixed by the
/// format; 6, 8, 22, and 23 are unused or pre-GA and never decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RecordType {
    String = 0,
    List = 1,
    Set = 2,
    Zset = 3,
    Hash = 4,
    Zset2 = 5,
    Module2 = 7,
    HashZipmap = 9,
    ListZiplist = 10,
    SetIntset = 11,
    ZsetZiplist = 12,
    HashZiplist = 13,
    ListQuicklist = 14,
    StreamListpacks = 15,
    HashListpack = 16,
    ZsetListpack = 17,
    ListQuicklist2 = 18,
    StreamListpacks2 = 19,
    SetListpack = 20,
    StreamListpacks3 = 21,
    HashMetadata = 24,
    HashListpackEx = 25,
}

impl TryFrom<u8> for RecordType {
    type Error = SnapshotError;

    fn try_from(value: u8) -> Result<Self, SnapshotError> {
        Ok(match value {
            0 => RecordType::String,
            1 => RecordType::List,
            2 => RecordType::Set,
            3 => RecordType::Zset,
            4 => RecordType::Hash,
            5 => RecordType::Zset2,
            7 => RecordType::Module2,
            9 => RecordType::HashZipmap,
            10 => RecordType::ListZiplist,
            11 => RecordType::SetIntset,
            12 => RecordType::ZsetZiplist,
            13 => RecordType::HashZiplist,
            14 => RecordType::ListQuicklist,
            15 => RecordType::StreamListpacks,
            16 => RecordType::HashListpack,
            17 => RecordType::ZsetListpack,
            18 => RecordType::ListQuicklist2,
            19 => RecordType::StreamListpacks2,
            20 => RecordType::SetListpack,
            21 => RecordType::StreamListpacks3,
            22 | 23 => {
                return Err(SnapshotError::Unsupported(
                    "pre-release hash format is not supported",
                ))
            }
            24 => RecordType::HashMetadata,
            25 => RecordType::HashListpackEx,
            other => return Err(SnapshotError::UnknownRecordType(other)),
        })
    }
}

/// Marker identifying which module produced a module record's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleMarker {
    Empty,
    Json,
}

/// Envelope opcodes. Any byte in this range is a meta-code, everything
/// below is a record type.
pub(crate) mod opcode {
    pub const FUNCTION2: u8 = 245;
    pub const FUNCTION_PRE_GA: u8 = 246;
    pub const MODULE_AUX: u8 = 247;
    pub const IDLE: u8 = 248;
    pub const FREQ: u8 = 249;
    pub const AUX: u8 = 250;
    pub const RESIZE_DB: u8 = 251;
    pub const EXPIRE_TIME_MS: u8 = 252;
    pub const EXPIRE_TIME: u8 = 253;
    pub const SELECT_DB: u8 = 254;
    pub const EOF: u8 = 255;
}

// Length-prefix encodings, selected by the top two bits of the first byte.
pub(crate) const LEN_6BIT: u8 = 0b0000_0000;
pub(crate) const LEN_14BIT: u8 = 0b0100_0000;
pub(crate) const LEN_32_OR_64BIT: u8 = 0b1000_0000;
pub(crate) const LEN_ENCODED_VALUE: u8 = 0b1100_0000;

pub(crate) const LEN_32BIT: u8 = 0b1000_0000;
pub(crate) const LEN_64BIT: u8 = 0b1000_0001;

pub(crate) const LEN_6BIT_MAX: u64 = (1 << 6) - 1;
pub(crate) const LEN_14BIT_MAX: u64 = (1 << 14) - 1;
pub(crate) const LEN_32BIT_MAX: u64 = (1 << 32) - 1;

// Special string encodings carried in the low six bits of a `11`-prefixed
// length byte.
pub(crate) const STR_ENC_INT8: u64 = 0;
pub(crate) const STR_ENC_INT16: u64 = 1;
pub(crate) const STR_ENC_INT32: u64 = 2;
pub(crate) const STR_ENC_LZF: u64 = 3;

// zipmap
pub(crate) const ZIPMAP_LEN_BIG: u8 = 254;
pub(crate) const ZIPMAP_END: u8 = 255;

// ziplist
pub(crate) const ZIPLIST_END: u8 = 255;
pub(crate) const ZIPLIST_LEN_BIG: u16 = 65535;
pub(crate) const ZIPLIST_PREVLEN_BIG: u8 = 254;

pub(crate) const ZIPLIST_ENC_6BIT_STR: u8 = 0b0000_0000;
pub(crate) const ZIPLIST_ENC_14BIT_STR: u8 = 0b0100_0000;
pub(crate) const ZIPLIST_ENC_32BIT_STR: u8 = 0b1000_0000;

pub(crate) const ZIPLIST_ENC_INT8: u8 = 0b1111_1110;
pub(crate) const ZIPLIST_ENC_INT16: u8 = 0b1100_0000;
pub(crate) const ZIPLIST_ENC_INT24: u8 = 0b1111_0000;
pub(crate) const ZIPLIST_ENC_INT32: u8 = 0b1101_0000;
pub(crate) const ZIPLIST_ENC_INT64: u8 = 0b1110_0000;

// intset
pub(crate) const INTSET_ENC_INT16: u32 = 2;
pub(crate) const INTSET_ENC_INT32: u32 = 4;
pub(crate) const INTSET_ENC_INT64: u32 = 8;

// listpack
pub(crate) const LISTPACK_END: u8 = 255;
pub(crate) const LISTPACK_LEN_BIG: u16 = 65535;

pub(crate) const LISTPACK_ENC_UINT7: u8 = 0b0000_0000;
pub(crate) const LISTPACK_ENC_INT13: u8 = 0b1100_0000;

pub(crate) const LISTPACK_ENC_INT16: u8 = 0b1111_0001;
pub(crate) const LISTPACK_ENC_INT24: u8 = 0b1111_0010;
pub(crate) const LISTPACK_ENC_INT32: u8 = 0b1111_0011;
pub(crate) const LISTPACK_ENC_INT64: u8 = 0b1111_0100;

pub(crate) const LISTPACK_ENC_6BIT_STR: u8 = 0b1000_0000;
pub(crate) const LISTPACK_ENC_12BIT_STR: u8 = 0b1110_0000;
pub(crate) const LISTPACK_ENC_32BIT_STR: u8 = 0b1111_0000;

// quicklist v2 node containers
pub(crate) const QUICKLIST2_NODE_PLAIN: u64 = 1;
pub(crate) const QUICKLIST2_NODE_PACKED: u64 = 2;

// module payload opcodes
pub(crate) const MODULE_OP_EOF: u64 = 0;
pub(crate) const MODULE_OP_SINT: u64 = 1;
pub(crate) const MODULE_OP_UINT: u64 = 2;
pub(crate) const MODULE_OP_FLOAT: u64 = 3;
pub(crate) const MODULE_OP_DOUBLE: u64 = 4;
pub(crate) const MODULE_OP_STRING: u64 = 5;

/// The JSON module's 64-bit id with the version bits zeroed.
pub(crate) const JSON_MODULE_ID: u64 = 5035677737576115200;

pub(crate) const JSON_MODULE_V0: u64 = 0;
pub(crate) const JSON_MODULE_V3: u64 = 3;

pub(crate) const JSON_V0_NODE_NULL: u64 = 1;
pub(crate) const JSON_V0_NODE_STRING: u64 = 2;
pub(crate) const JSON_V0_NODE_NUMBER: u64 = 4;
pub(crate) const JSON_V0_NODE_INTEGER: u64 = 8;
pub(crate) const JSON_V0_NODE_BOOLEAN: u64 = 16;
pub(crate) const JSON_V0_NODE_DICT: u64 = 32;
pub(crate) const JSON_V0_NODE_ARRAY: u64 = 64;
pub(crate) const JSON_V0_NODE_KEYVAL: u64 = 128;

// stream item flags
pub(crate) const STREAM_ITEM_FLAG_DELETED: i64 = 1;
pub(crate) const STREAM_ITEM_FLAG_SAME_FIELDS: i64 = 2;
