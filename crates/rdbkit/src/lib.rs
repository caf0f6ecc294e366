//! Reader, writer, and verifier for the RDB snapshot format.
//!
//! The snapshot is a densely packed, self-describing binary image: length
//! prefixes that sometimes carry integers instead of lengths, strings that
//! may arrive LZ77-compressed, five inline container formats carried inside
//! host strings, and an outer envelope traversed in one forward pass under a
//! running CRC-64. This crate provides:
//!
//! - [`read_file`] / [`read_reader`]: streaming decode of a snapshot,
//!   delivering records to a [`SnapshotHandler`]
//! - [`read_value`] / [`verify_value_checksum`]: single-value dumps
//! - [`Writer`]: builds value dumps any conforming reader accepts
//! - [`Encoder`]: streams typed records into a new snapshot file
//! - [`verify_file`] / [`verify_value`] / [`verify_reader`]: bounded
//!   traversal that rejects content exceeding configured size limits
//!
//! Decoding is strictly streaming: records are handed to the handler as
//! they are read and nothing accumulates inside the decoder. All input is
//! treated as untrusted; declared lengths are never pre-allocated and every
//! sentinel is validated.

mod buffer;
mod constants;
mod containers;
mod crc64;
mod encoder;
mod envelope;
mod error;
mod handler;
mod lz77;
mod module;
mod reader;
mod sink;
mod stream;
mod verify;
mod writer;

pub use constants::{ModuleMarker, RecordType, SUPPORTED_VERSION};
pub use crc64::{crc64, verify_value_checksum, VALUE_CHECKSUM_SIZE};
pub use encoder::{
    Encoder, HashEncoder, HashMetadataEncoder, ListEncoder, SetEncoder, SortedSetEncoder,
    StreamEncoder,
};
pub use envelope::{read_file, read_file_with, read_reader, read_reader_with, ReadOptions};
pub use error::{Result, SnapshotError};
pub use handler::{NullHandler, SnapshotHandler};
pub use reader::read_value;
pub use sink::{FileSink, MemSink, Sink};
pub use stream::{
    Stream, StreamConsumer, StreamConsumerGroup, StreamEntry, StreamId, StreamPendingEntry,
};
pub use verify::{verify_file, verify_reader, verify_value, VerifyOptions, VerifyValueOptions};
pub use writer::{Writer, DEFAULT_WRITE_LIMIT};
