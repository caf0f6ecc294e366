//! Snapshot envelope reader: signature and version checks, the opcode loop,
//! expiry forwarding, database routing, and final CRC verification.
//!
//! Layout: `REDIS<4-digit version>` followed by an opcode-driven body and
//! `EOF`; versions 5 and up carry a trailing CRC-64 (little endian) over
//! everything from the signature through the EOF byte. A stored CRC of zero
//! means checksumming was disabled at the source and is accepted unchecked.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::buffer::{Buffer, FileBuf, StreamBuf, DEFAULT_WINDOW_CAP};
use crate::constants::{opcode, RecordType, SUPPORTED_VERSION};
use crate::error::{Result, SnapshotError};
use crate::handler::{NullHandler, SnapshotHandler};
use crate::module;
use crate::reader::ValueReader;

const MAGIC: &[u8; 5] = b"REDIS";
const HEADER_LEN: usize = MAGIC.len() + 4;

/// Options for an envelope read session.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Ceiling on the uncompressed length of any compressed string.
    /// `None` means unlimited.
    pub max_lz77_len: Option<u64>,
    /// Reject snapshots with any byte after the CRC footer (or after EOF
    /// for versions without one). Padding is tolerated otherwise.
    pub require_strict_eof: bool,
}

/// Reads the snapshot file at `path`, delivering every record of database 0
/// to the handler.
pub fn read_file<H: SnapshotHandler>(path: impl AsRef<Path>, handler: &mut H) -> Result<()> {
    read_file_with(path, handler, &ReadOptions::default())
}

pub fn read_file_with<H: SnapshotHandler>(
    path: impl AsRef<Path>,
    handler: &mut H,
    opts: &ReadOptions,
) -> Result<()> {
    let path = path.as_ref();
    let mut file = File::open(path)?;

    let mut header = [0u8; HEADER_LEN];
    file.read_exact(&mut header).map_err(map_header_eof)?;
    let version = parse_header(&header)?;
    let ends_with_crc = version >= 5;

    let file_len = file.metadata()?.len().saturating_sub(HEADER_LEN as u64);
    let cap = file_len.min(DEFAULT_WINDOW_CAP as u64) as usize;

    let mut buf = FileBuf::new(
        file,
        path.to_path_buf(),
        HEADER_LEN as u64,
        file_len,
        cap.max(1),
    );
    if ends_with_crc {
        buf.begin_crc(&header);
    }

    debug!(version, ends_with_crc, "reading snapshot file");
    run_opcode_loop(
        ValueReader::new(buf, opts.max_lz77_len),
        handler,
        opts,
        ends_with_crc,
    )
}

/// Reads a snapshot from any byte source. The source is traversed strictly
/// forward, so stream records cannot be decoded this way; use a file- or
/// slice-backed session for snapshots containing streams.
pub fn read_reader<H: SnapshotHandler>(src: impl Read, handler: &mut H) -> Result<()> {
    read_reader_with(src, handler, &ReadOptions::default())
}

pub fn read_reader_with<H: SnapshotHandler>(
    mut src: impl Read,
    handler: &mut H,
    opts: &ReadOptions,
) -> Result<()> {
    let mut header = [0u8; HEADER_LEN];
    src.read_exact(&mut header).map_err(map_header_eof)?;
    let version = parse_header(&header)?;
    let ends_with_crc = version >= 5;

    let mut buf = StreamBuf::new(src, DEFAULT_WINDOW_CAP);
    if ends_with_crc {
        buf.begin_crc(&header);
    }

    debug!(version, ends_with_crc, "reading snapshot from reader");
    run_opcode_loop(
        ValueReader::new(buf, opts.max_lz77_len),
        handler,
        opts,
        ends_with_crc,
    )
}

fn map_header_eof(e: std::io::Error) -> SnapshotError {
    match e.kind() {
        std::io::ErrorKind::UnexpectedEof => SnapshotError::UnexpectedEof,
        _ => SnapshotError::Io(e),
    }
}

fn parse_header(header: &[u8; HEADER_LEN]) -> Result<u16> {
    if &header[..MAGIC.len()] != MAGIC {
        return Err(SnapshotError::Malformed(
            "wrong signature trying to load a snapshot",
        ));
    }

    let digits = std::str::from_utf8(&header[MAGIC.len()..])
        .map_err(|_| SnapshotError::Malformed("snapshot version is not numeric"))?;
    let version: u16 = digits
        .parse()
        .map_err(|_| SnapshotError::Malformed("snapshot version is not numeric"))?;

    if version < 1 || version > SUPPORTED_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }

    Ok(version)
}

fn run_opcode_loop<B: Buffer, H: SnapshotHandler>(
    mut reader: ValueReader<B>,
    handler: &mut H,
    opts: &ReadOptions,
    ends_with_crc: bool,
) -> Result<()> {
    // While a database other than 0 is selected, records are still decoded
    // (the wire format offers no way to skip them) but routed to a handler
    // that drops everything.
    let mut skipping = false;
    let mut pending_expiry: Option<u64> = None;

    loop {
        let tag = reader.read_u8()?;

        match tag {
            opcode::EOF => {
                if ends_with_crc {
                    // The footer must not checksum itself.
                    reader.buf.end_crc();
                    let stored = reader.read_u64_le()?;
                    if stored != 0 {
                        let computed = reader.buf.crc();
                        if stored != computed {
                            return Err(SnapshotError::BadCrc { stored, computed });
                        }
                    }
                    debug!(crc = stored, "snapshot eof reached");
                }

                if opts.require_strict_eof && !reader.buf.at_end()? {
                    return Err(SnapshotError::Malformed(
                        "trailing bytes after the eof marker",
                    ));
                }

                return Ok(());
            }
            opcode::SELECT_DB => {
                let (db, _) = reader.read_len()?;
                if db != 0 {
                    if !handler.allow_partial_read() {
                        return Err(SnapshotError::Unsupported(
                            "multiple databases are not supported when partial restore is not allowed",
                        ));
                    }
                    skipping = true;
                } else {
                    skipping = false;
                }
                debug!(db, skipping, "database selected");
            }
            opcode::EXPIRE_TIME => {
                let seconds = reader.read_u32_le()?;
                pending_expiry = Some(seconds as u64 * 1000);
            }
            opcode::EXPIRE_TIME_MS => {
                pending_expiry = Some(reader.read_u64_le()?);
            }
            opcode::RESIZE_DB => {
                // Hash-table sizing hints only.
                reader.read_len()?;
                reader.read_len()?;
            }
            opcode::AUX => {
                let key = reader.read_string()?;
                let value = reader.read_string()?;
                debug!(
                    key = %String::from_utf8_lossy(&key),
                    value = %String::from_utf8_lossy(&value),
                    "aux field",
                );
            }
            opcode::FREQ => {
                reader.read_u8()?;
            }
            opcode::IDLE => {
                reader.read_len()?;
            }
            opcode::MODULE_AUX => {
                reader.read_len()?; // module id
                module::skip_module(&mut reader)?;
            }
            opcode::FUNCTION_PRE_GA => {
                return Err(SnapshotError::Unsupported(
                    "pre-release function format is not supported",
                ));
            }
            opcode::FUNCTION2 => {
                if !handler.allow_partial_read() {
                    return Err(SnapshotError::Unsupported(
                        "restoring a function payload is not supported when partial restore is not allowed",
                    ));
                }
                reader.read_string()?;
            }
            tag => {
                let t = RecordType::try_from(tag)?;
                let key = reader.read_string()?;

                if skipping {
                    let mut null = NullHandler;
                    reader.read_object(&key, t, &mut null)?;
                } else {
                    reader.read_object(&key, t, handler)?;
                    if let Some(expire_at_ms) = pending_expiry {
                        handler.on_expire_time(&key, expire_at_ms)?;
                    }
                }

                pending_expiry = None;
            }
        }
    }
}
