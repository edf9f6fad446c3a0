//! Trace file layout, the sequential reader, and trace file selection.
//!
//! A trace file is a zstd stream. Decompressed, it is:
//!
//! ```text
//! [first block u64 LE] [discriminant u8][payload] [discriminant u8][payload] ...
//! ```
//!
//! Each trace file has a sidecar block index at `<trace>.idx` (see
//! [`BlockIndex`]). A missing sidecar is rebuilt by scanning the trace.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::block_index::BlockIndex;
use crate::error::TraceError;
use crate::operation::Operation;

/// Size of the first-block header in bytes.
pub const HEADER_LEN: u64 = 8;

/// Default size of the buffer between the decompressor and the decoder.
pub const DEFAULT_READ_BUFFER: usize = 1 << 20;

/// Extension appended to a trace path to name its block index.
pub const INDEX_EXTENSION: &str = "idx";

/// Path of the block index sidecar for `trace`.
pub fn index_path(trace: &Path) -> PathBuf {
    let mut name = OsString::from(trace.as_os_str());
    name.push(".");
    name.push(INDEX_EXTENSION);
    PathBuf::from(name)
}

/// Load the block index of `trace`, rebuilding it if the sidecar is missing.
pub fn load_block_index(trace: &Path) -> Result<BlockIndex, TraceError> {
    let sidecar = index_path(trace);
    if sidecar.exists() {
        return BlockIndex::read_file(&sidecar);
    }
    warn!(
        trace = %trace.display(),
        "block index sidecar missing; scanning trace"
    );
    BlockIndex::scan(trace)
}

// ── CountingReader ──────────────────────────────────────────────

/// Read adapter that tracks how many bytes have passed through it.
#[derive(Debug)]
pub struct CountingReader<R> {
    inner: R,
    position: u64,
}

impl<R: Read> CountingReader<R> {
    /// Wrap `inner`, starting the count at zero.
    pub fn new(inner: R) -> Self {
        Self { inner, position: 0 }
    }

    /// Bytes read so far.
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

// ── TraceFile ───────────────────────────────────────────────────

type Decompressed = BufReader<zstd::Decoder<'static, BufReader<File>>>;

/// Sequential reader over one trace file.
pub struct TraceFile {
    path: PathBuf,
    first_block: u64,
    reader: CountingReader<Decompressed>,
}

impl TraceFile {
    /// Open `path` and read its header.
    pub fn open(path: &Path) -> Result<Self, TraceError> {
        Self::open_with_buffer(path, DEFAULT_READ_BUFFER)
    }

    /// Open `path` with a decompression buffer of `buffer_size` bytes.
    pub fn open_with_buffer(path: &Path, buffer_size: usize) -> Result<Self, TraceError> {
        let decoder = zstd::Decoder::new(File::open(path)?)?;
        let mut reader = CountingReader::new(BufReader::with_capacity(buffer_size, decoder));
        let mut header = [0u8; HEADER_LEN as usize];
        reader.read_exact(&mut header).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => TraceError::MalformedRecord {
                detail: format!("{} has no trace header", path.display()),
            },
            _ => TraceError::Io(e),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            first_block: u64::from_le_bytes(header),
            reader,
        })
    }

    /// Block number stored in the header.
    pub fn first_block(&self) -> u64 {
        self.first_block
    }

    /// Path this trace was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset of the next record in the decompressed stream.
    pub fn position(&self) -> u64 {
        self.reader.position()
    }

    /// Read the next operation, or `None` at the end of the stream.
    pub fn read_operation(&mut self) -> Result<Option<Operation>, TraceError> {
        Operation::read_tagged(&mut self.reader)
    }

    /// Skip forward to decompressed offset `offset`.
    pub fn skip_to(&mut self, offset: u64) -> Result<(), TraceError> {
        let position = self.position();
        if offset < position {
            return Err(TraceError::MalformedRecord {
                detail: format!("cannot seek backwards from {position} to {offset}"),
            });
        }
        let wanted = offset - position;
        let skipped = io::copy(&mut Read::take(&mut self.reader, wanted), &mut io::sink())?;
        if skipped != wanted {
            return Err(TraceError::MalformedRecord {
                detail: format!(
                    "offset {offset} lies beyond the end of {}",
                    self.path.display()
                ),
            });
        }
        Ok(())
    }
}

/// Block number in the header of `path`.
pub fn read_first_block(path: &Path) -> Result<u64, TraceError> {
    Ok(TraceFile::open(path)?.first_block())
}

// ── Selection ───────────────────────────────────────────────────

/// Trace files in `dir`, excluding block index sidecars, sorted by name.
pub fn trace_files_in_dir(dir: &Path) -> Result<Vec<PathBuf>, TraceError> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_index = path
            .extension()
            .is_some_and(|ext| ext == INDEX_EXTENSION);
        if path.is_file() && !is_index {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Pick the trace files needed to replay blocks `first..=last`, in order.
///
/// Files starting after `last` are dropped. Of the files starting at or
/// before `first`, only the latest-starting one can contain `first`, so
/// the others are dropped too. Every file starting inside the range is
/// kept.
pub fn select_trace_files(
    paths: &[PathBuf],
    first: u64,
    last: u64,
) -> Result<Vec<PathBuf>, TraceError> {
    let mut starts = paths
        .iter()
        .map(|path| Ok((read_first_block(path)?, path.clone())))
        .collect::<Result<Vec<_>, TraceError>>()?;
    starts.sort_by_key(|(block, _)| *block);

    if let Some(pair) = starts.windows(2).find(|pair| pair[0].0 == pair[1].0) {
        return Err(TraceError::DuplicateTraceStart {
            block: pair[0].0,
            first: pair[0].1.clone(),
            second: pair[1].1.clone(),
        });
    }

    let mut selected = Vec::new();
    if let Some(pos) = starts.iter().rposition(|(block, _)| *block <= first) {
        selected.push(starts[pos].1.clone());
    }
    selected.extend(
        starts
            .iter()
            .filter(|(block, _)| *block > first && *block <= last)
            .map(|(_, path)| path.clone()),
    );

    if selected.is_empty() {
        return Err(TraceError::NoTraceFiles { first, last });
    }
    info!(
        first,
        last,
        candidates = paths.len(),
        selected = selected.len(),
        "selected trace files"
    );
    Ok(selected)
}
