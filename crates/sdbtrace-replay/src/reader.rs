//! Block-range iteration over one or more trace files.
//!
//! [`TraceIterator`] yields exactly the operations recorded for blocks
//! `first..=last`, spanning as many trace files as needed. Each file
//! contributes a segment bounded by the offsets of indexed blocks, so the
//! iterator never decodes records outside the requested range beyond the
//! skip at the start of a segment.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::TraceError;
use crate::operation::Operation;
use crate::trace_file::{load_block_index, select_trace_files, TraceFile, DEFAULT_READ_BUFFER};

/// Part of one trace file to replay: `[start, end)` in decompressed offsets.
#[derive(Clone, Debug)]
struct Segment {
    path: PathBuf,
    start: u64,
    end: Option<u64>,
}

struct ActiveSegment {
    file: TraceFile,
    end: Option<u64>,
}

impl ActiveSegment {
    fn exhausted(&self) -> bool {
        self.end.is_some_and(|end| self.file.position() >= end)
    }
}

/// Cursor over the operations of a block range.
pub struct TraceIterator {
    segments: VecDeque<Segment>,
    active: Option<ActiveSegment>,
    current: Option<Operation>,
    operations_read: u64,
    read_buffer: usize,
}

impl TraceIterator {
    /// Open the operations of blocks `first..=last` from `paths`.
    pub fn open(paths: &[PathBuf], first: u64, last: u64) -> Result<Self, TraceError> {
        Self::open_with_buffer(paths, first, last, DEFAULT_READ_BUFFER)
    }

    /// Like [`open`](Self::open) with an explicit decompression buffer size.
    pub fn open_with_buffer(
        paths: &[PathBuf],
        first: u64,
        last: u64,
        read_buffer: usize,
    ) -> Result<Self, TraceError> {
        if first > last {
            return Err(TraceError::InvalidBlockRange { first, last });
        }
        let mut segments = VecDeque::new();
        for path in select_trace_files(paths, first, last)? {
            if let Some(segment) = plan_segment(&path, first, last)? {
                segments.push_back(segment);
            }
        }
        info!(first, last, segments = segments.len(), "opened trace for replay");
        Ok(Self {
            segments,
            active: None,
            current: None,
            operations_read: 0,
            read_buffer,
        })
    }

    /// Advance to the next operation.
    ///
    /// Returns `false` once every segment is exhausted; [`value`](Self::value)
    /// is `None` from then on.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<bool, TraceError> {
        loop {
            if self.active.is_none() {
                let Some(segment) = self.segments.pop_front() else {
                    self.current = None;
                    return Ok(false);
                };
                let mut file = TraceFile::open_with_buffer(&segment.path, self.read_buffer)?;
                file.skip_to(segment.start)?;
                self.active = Some(ActiveSegment {
                    file,
                    end: segment.end,
                });
            }

            if let Some(active) = self.active.as_mut() {
                if !active.exhausted() {
                    if let Some(op) = active.file.read_operation()? {
                        self.current = Some(op);
                        self.operations_read += 1;
                        return Ok(true);
                    }
                }
            }
            self.active = None;
        }
    }

    /// The operation [`next`](Self::next) last advanced to.
    pub fn value(&self) -> Option<&Operation> {
        self.current.as_ref()
    }

    /// Number of operations yielded so far.
    pub fn operations_read(&self) -> u64 {
        self.operations_read
    }

    /// Convert into a standard iterator of operations.
    pub fn operations(self) -> Operations {
        Operations {
            inner: self,
            done: false,
        }
    }
}

/// Work out which part of `path` covers `first..=last`.
///
/// Returns `None` if the file indexes no block inside the range.
fn plan_segment(path: &Path, first: u64, last: u64) -> Result<Option<Segment>, TraceError> {
    let index = load_block_index(path)?;
    let Some((start_block, start)) = index.first_at_or_after(first) else {
        return Ok(None);
    };
    if start_block > last {
        return Ok(None);
    }
    let end = index.first_after(last).map(|(_, offset)| offset);
    Ok(Some(Segment {
        path: path.to_path_buf(),
        start,
        end,
    }))
}

/// Iterator adapter over a [`TraceIterator`].
pub struct Operations {
    inner: TraceIterator,
    done: bool,
}

impl Iterator for Operations {
    type Item = Result<Operation, TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.next() {
            Ok(true) => self.inner.current.take().map(Ok),
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
