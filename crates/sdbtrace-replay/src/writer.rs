//! Trace file writer.
//!
//! [`TraceWriter`] streams operations into a zstd-compressed trace file,
//! indexing every `BeginBlock` as it goes. The header is written on
//! construction; [`finish`](TraceWriter::finish) seals the compressed
//! stream and writes the block index sidecar.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::block_index::BlockIndex;
use crate::codec::write_u64_le;
use crate::error::TraceError;
use crate::operation::Operation;
use crate::trace_file::{index_path, HEADER_LEN};

/// Default size of the buffer between the compressor and the file.
pub const DEFAULT_WRITE_BUFFER: usize = 1 << 20;

type Compressed = zstd::Encoder<'static, BufWriter<File>>;

/// Writes operations to a trace file.
pub struct TraceWriter {
    path: PathBuf,
    encoder: Option<Compressed>,
    scratch: Vec<u8>,
    position: u64,
    index: BlockIndex,
    operations_written: u64,
}

impl TraceWriter {
    /// Create a trace at `path` whose first block is `first_block`.
    pub fn create(path: &Path, first_block: u64) -> Result<Self, TraceError> {
        Self::create_with(
            path,
            first_block,
            zstd::DEFAULT_COMPRESSION_LEVEL,
            DEFAULT_WRITE_BUFFER,
        )
    }

    /// Create a trace with an explicit compression level and buffer size.
    pub fn create_with(
        path: &Path,
        first_block: u64,
        level: i32,
        buffer_size: usize,
    ) -> Result<Self, TraceError> {
        let file = BufWriter::with_capacity(buffer_size, File::create(path)?);
        let mut encoder = zstd::Encoder::new(file, level)?;
        write_u64_le(&mut encoder, first_block)?;
        info!(trace = %path.display(), first_block, "opened trace for recording");
        Ok(Self {
            path: path.to_path_buf(),
            encoder: Some(encoder),
            scratch: Vec::with_capacity(256),
            position: HEADER_LEN,
            index: BlockIndex::new(),
            operations_written: 0,
        })
    }

    /// Append one operation.
    ///
    /// A `BeginBlock` is indexed at the offset of its own record. A block
    /// that was already indexed is rejected before anything is written.
    pub fn write_operation(&mut self, op: &Operation) -> Result<(), TraceError> {
        let Some(encoder) = self.encoder.as_mut() else {
            return Err(io::Error::other("trace writer already finished").into());
        };
        if let Operation::BeginBlock { block } = op {
            self.index.add(*block, self.position)?;
        }
        self.scratch.clear();
        op.write_tagged(&mut self.scratch)?;
        encoder.write_all(&self.scratch)?;
        self.position += self.scratch.len() as u64;
        self.operations_written += 1;
        Ok(())
    }

    /// Offset the next record will be written at.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Number of operations written so far.
    pub fn operations_written(&self) -> u64 {
        self.operations_written
    }

    /// Blocks indexed so far.
    pub fn block_index(&self) -> &BlockIndex {
        &self.index
    }

    /// Path of the trace being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Seal the trace and write its block index. Returns the index.
    pub fn finish(mut self) -> Result<BlockIndex, TraceError> {
        self.seal()?;
        Ok(std::mem::take(&mut self.index))
    }

    fn seal(&mut self) -> Result<(), TraceError> {
        if let Some(encoder) = self.encoder.take() {
            let mut file = encoder.finish()?;
            file.flush()?;
            self.index.write_file(&index_path(&self.path))?;
            info!(
                trace = %self.path.display(),
                operations = self.operations_written,
                blocks = self.index.len(),
                bytes = self.position,
                "closed trace"
            );
        }
        Ok(())
    }
}

impl Drop for TraceWriter {
    fn drop(&mut self) {
        if self.encoder.is_none() {
            return;
        }
        warn!(trace = %self.path.display(), "trace writer dropped without finish");
        if let Err(e) = self.seal() {
            warn!(trace = %self.path.display(), error = %e, "failed to seal trace");
        }
    }
}
