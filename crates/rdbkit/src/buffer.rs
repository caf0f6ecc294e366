//! Positioned byte sources feeding the decoders.
//!
//! Three realisations share one contract:
//!
//! - [`SliceBuf`]: cursor over an in-memory slice.
//! - [`FileBuf`]: an open file with a capped in-memory window that refills
//!   transparently. Carries the running CRC-64 of every byte consumed.
//! - [`StreamBuf`]: forward-only window over any [`std::io::Read`]; used when
//!   the source is not seekable. No random access and no views.
//!
//! A *view* is a second, independent cursor pinned at an earlier position.
//! The stream decoder uses views to traverse the entries section twice.
//! Views never carry CRC, and a view of a view is forbidden. File-backed
//! views re-open the file by path; the secondary handle is released when the
//! view is dropped.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use crate::crc64::crc64;
use crate::error::{Result, SnapshotError};

/// Default capacity of the in-memory window of file- and reader-backed
/// buffers. A single oversized `get` grows the window for that call.
pub(crate) const DEFAULT_WINDOW_CAP: usize = 1 << 20;

pub(crate) trait Buffer {
    type View: Buffer;

    /// Returns the next `n` bytes and advances the cursor. Reading past the
    /// known end fails with `UnexpectedEof`.
    fn get(&mut self, n: usize) -> Result<&[u8]>;

    /// Bytes consumed so far, relative to where the buffer began.
    fn pos(&self) -> u64;

    /// Opens an independent cursor at an absolute position seen earlier.
    fn view(&self, pos: u64) -> Result<Self::View>;

    /// Folds `seed` into the CRC and starts folding every byte consumed
    /// from now on.
    fn begin_crc(&mut self, _seed: &[u8]) {}

    /// Stops CRC folding. Called before consuming the trailing CRC footer,
    /// which must not checksum itself.
    fn end_crc(&mut self) {}

    fn crc(&self) -> u64 {
        0
    }

    /// Whether every byte of the source has been consumed.
    fn at_end(&mut self) -> Result<bool>;
}

/// Cursor over a borrowed byte slice.
#[derive(Debug)]
pub(crate) struct SliceBuf<'a> {
    data: &'a [u8],
    pos: usize,
    is_view: bool,
}

impl<'a> SliceBuf<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            is_view: false,
        }
    }
}

impl<'a> Buffer for SliceBuf<'a> {
    type View = SliceBuf<'a>;

    fn get(&mut self, n: usize) -> Result<&[u8]> {
        let end = self.pos.checked_add(n).ok_or(SnapshotError::UnexpectedEof)?;
        if end > self.data.len() {
            return Err(SnapshotError::UnexpectedEof);
        }

        let value = &self.data[self.pos..end];
        self.pos = end;
        Ok(value)
    }

    fn pos(&self) -> u64 {
        self.pos as u64
    }

    fn view(&self, pos: u64) -> Result<SliceBuf<'a>> {
        if self.is_view {
            return Err(SnapshotError::Unsupported("cannot take a view of a view"));
        }

        let pos = usize::try_from(pos).map_err(|_| SnapshotError::UnexpectedEof)?;
        if pos > self.data.len() {
            return Err(SnapshotError::UnexpectedEof);
        }

        Ok(SliceBuf {
            data: self.data,
            pos,
            is_view: true,
        })
    }

    fn at_end(&mut self) -> Result<bool> {
        Ok(self.pos >= self.data.len())
    }
}

/// Windowed reader over an open file with a running CRC-64.
///
/// `file_len` is the number of bytes the buffer may consume, counted from
/// `base` (the absolute file offset where the buffer begins, i.e. right
/// after the envelope header). The CRC folds at consumption time, so window
/// read-ahead never contaminates it.
#[derive(Debug)]
pub(crate) struct FileBuf {
    file: File,
    path: PathBuf,
    base: u64,
    file_len: u64,
    file_pos: u64,
    window: Vec<u8>,
    wpos: usize,
    cap: usize,
    crc_on: bool,
    crc: u64,
    is_view: bool,
}

impl FileBuf {
    pub(crate) fn new(file: File, path: PathBuf, base: u64, file_len: u64, cap: usize) -> Self {
        Self {
            file,
            path,
            base,
            file_len,
            file_pos: 0,
            window: Vec::new(),
            wpos: 0,
            cap: cap.max(1),
            crc_on: false,
            crc: 0,
            is_view: false,
        }
    }

    /// Slides the unread tail of the window to the front and reads enough
    /// bytes from the file to satisfy a `get(n)`.
    fn refill(&mut self, n: usize) -> Result<()> {
        let remaining = self.window.len() - self.wpos;
        self.window.copy_within(self.wpos.., 0);
        self.window.truncate(remaining);
        self.wpos = 0;

        // Never read beyond the length we were given. There may be trailing
        // bytes after it (the CRC footer, padding) that the envelope reader
        // consumes on its own terms.
        let avail = usize::try_from(self.file_len - self.file_pos)
            .unwrap_or(usize::MAX);
        let target = self.cap.max(n).min(avail);

        self.window.resize(target, 0);
        self.file
            .read_exact(&mut self.window[remaining..])
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => SnapshotError::UnexpectedEof,
                _ => SnapshotError::Io(e),
            })?;

        Ok(())
    }
}

impl Buffer for FileBuf {
    type View = FileBuf;

    fn get(&mut self, n: usize) -> Result<&[u8]> {
        let end = self
            .file_pos
            .checked_add(n as u64)
            .ok_or(SnapshotError::UnexpectedEof)?;
        if end > self.file_len {
            // The file position is the source of truth, not the window.
            return Err(SnapshotError::UnexpectedEof);
        }

        if self.window.len() < self.wpos + n {
            self.refill(n)?;
        }

        let start = self.wpos;
        if self.crc_on {
            self.crc = crc64(self.crc, &self.window[start..start + n]);
        }
        self.wpos += n;
        self.file_pos = end;
        Ok(&self.window[start..start + n])
    }

    fn pos(&self) -> u64 {
        self.file_pos
    }

    fn view(&self, pos: u64) -> Result<FileBuf> {
        if self.is_view {
            return Err(SnapshotError::Unsupported("cannot take a view of a view"));
        }
        if pos > self.file_len {
            return Err(SnapshotError::UnexpectedEof);
        }

        // Re-open the same file so the view owns an independent cursor.
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.base + pos))?;

        let mut view = FileBuf::new(file, self.path.clone(), self.base, self.file_len, self.cap);
        view.file_pos = pos;
        view.is_view = true;
        Ok(view)
    }

    fn begin_crc(&mut self, seed: &[u8]) {
        self.crc_on = true;
        self.crc = crc64(self.crc, seed);
    }

    fn end_crc(&mut self) {
        self.crc_on = false;
    }

    fn crc(&self) -> u64 {
        self.crc
    }

    fn at_end(&mut self) -> Result<bool> {
        Ok(self.file_pos >= self.file_len)
    }
}

/// Forward-only window over a generic byte source.
///
/// The total length is unknown, so `get` fails only when the source itself
/// runs dry. Views are not available; decoding a stream record from an
/// unseekable source is rejected.
#[derive(Debug)]
pub(crate) struct StreamBuf<R> {
    src: R,
    window: Vec<u8>,
    wpos: usize,
    consumed: u64,
    cap: usize,
    crc_on: bool,
    crc: u64,
}

impl<R: Read> StreamBuf<R> {
    pub(crate) fn new(src: R, cap: usize) -> Self {
        Self {
            src,
            window: Vec::new(),
            wpos: 0,
            consumed: 0,
            cap: cap.max(1),
            crc_on: false,
            crc: 0,
        }
    }

    /// Ensures at least `n` unread bytes sit in the window.
    ///
    /// The window grows in steps as bytes actually arrive, so a hostile
    /// declared length cannot force a large allocation the source never
    /// backs with data.
    fn refill(&mut self, n: usize) -> Result<()> {
        let remaining = self.window.len() - self.wpos;
        self.window.copy_within(self.wpos.., 0);
        self.window.truncate(remaining);
        self.wpos = 0;

        let mut filled = remaining;
        while filled < n {
            let target = self
                .cap
                .max(filled.saturating_mul(2))
                .min(n.max(self.cap));
            if self.window.len() < target {
                self.window
                    .try_reserve_exact(target - self.window.len())
                    .map_err(|_| SnapshotError::Malformed("input window allocation failed"))?;
                self.window.resize(target, 0);
            }

            match self.src.read(&mut self.window[filled..]) {
                Ok(0) => {
                    self.window.truncate(filled);
                    return Err(SnapshotError::UnexpectedEof);
                }
                Ok(read) => filled += read,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.window.truncate(filled);
                    return Err(SnapshotError::Io(e));
                }
            }
        }

        self.window.truncate(filled);
        Ok(())
    }
}

impl<R: Read> Buffer for StreamBuf<R> {
    type View = StreamBuf<R>;

    fn get(&mut self, n: usize) -> Result<&[u8]> {
        let needed = self
            .wpos
            .checked_add(n)
            .ok_or(SnapshotError::UnexpectedEof)?;
        if self.window.len() < needed {
            self.refill(n)?;
        }

        let start = self.wpos;
        if self.crc_on {
            self.crc = crc64(self.crc, &self.window[start..start + n]);
        }
        self.wpos += n;
        self.consumed += n as u64;
        Ok(&self.window[start..start + n])
    }

    fn pos(&self) -> u64 {
        self.consumed
    }

    fn view(&self, _pos: u64) -> Result<StreamBuf<R>> {
        Err(SnapshotError::Unsupported(
            "cannot take a view over an unseekable source",
        ))
    }

    fn begin_crc(&mut self, seed: &[u8]) {
        self.crc_on = true;
        self.crc = crc64(self.crc, seed);
    }

    fn end_crc(&mut self) {
        self.crc_on = false;
    }

    fn crc(&self) -> u64 {
        self.crc
    }

    fn at_end(&mut self) -> Result<bool> {
        if self.wpos < self.window.len() {
            return Ok(false);
        }

        // Probe the source for one more byte, retaining it if present.
        let mut byte = [0u8; 1];
        loop {
            match self.src.read(&mut byte) {
                Ok(0) => return Ok(true),
                Ok(_) => {
                    self.window = byte.to_vec();
                    self.wpos = 0;
                    return Ok(false);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(SnapshotError::Io(e)),
            }
        }
    }
}
