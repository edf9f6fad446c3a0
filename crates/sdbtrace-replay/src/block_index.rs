//! Block number → stream offset index for seekable trace files.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::ops::Bound;
use std::path::Path;

use tracing::info;

use crate::codec::{read_u64_le, write_u64_le};
use crate::error::TraceError;
use crate::operation::Operation;
use crate::trace_file::TraceFile;

/// Magic number at the start of a block index file.
pub const BLOCK_INDEX_MAGIC: u64 = 4715;

/// Offsets of every `BeginBlock` record in a trace, keyed by block number.
///
/// Offsets count bytes of the decompressed stream, header included, so the
/// first record of a file sits at offset 8. The index is append-only: a
/// block can be added once, and a second add for the same block is an
/// error that leaves the first offset in place.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockIndex {
    offsets: BTreeMap<u64, u64>,
}

impl BlockIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `block` starts at `offset`.
    pub fn add(&mut self, block: u64, offset: u64) -> Result<(), TraceError> {
        match self.offsets.entry(block) {
            Entry::Occupied(existing) => Err(TraceError::DuplicateBlock {
                block,
                existing: *existing.get(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(offset);
                Ok(())
            }
        }
    }

    /// Offset of `block`.
    pub fn get(&self, block: u64) -> Result<u64, TraceError> {
        self.offsets
            .get(&block)
            .copied()
            .ok_or(TraceError::MissingBlock { block })
    }

    /// Returns `true` if `block` is indexed.
    pub fn exists(&self, block: u64) -> bool {
        self.offsets.contains_key(&block)
    }

    /// The smallest indexed block `>= block` and its offset.
    pub fn first_at_or_after(&self, block: u64) -> Option<(u64, u64)> {
        self.offsets
            .range(block..)
            .next()
            .map(|(b, off)| (*b, *off))
    }

    /// The smallest indexed block `> block` and its offset.
    pub fn first_after(&self, block: u64) -> Option<(u64, u64)> {
        self.offsets
            .range((Bound::Excluded(block), Bound::Unbounded))
            .next()
            .map(|(b, off)| (*b, *off))
    }

    /// Indexed blocks in ascending order with their offsets.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.offsets.iter().map(|(b, off)| (*b, *off))
    }

    /// Number of indexed blocks.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Returns `true` if no block is indexed.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    // ── Persistence ─────────────────────────────────────────────

    /// Serialize the magic number followed by `(block, offset)` pairs.
    pub fn write_to(&self, w: &mut dyn Write) -> Result<(), TraceError> {
        write_u64_le(w, BLOCK_INDEX_MAGIC)?;
        for (block, offset) in self.iter() {
            write_u64_le(w, block)?;
            write_u64_le(w, offset)?;
        }
        Ok(())
    }

    /// Deserialize an index produced by [`write_to`](Self::write_to).
    pub fn read_from(r: &mut dyn Read) -> Result<Self, TraceError> {
        let found = read_u64_le(r)?;
        if found != BLOCK_INDEX_MAGIC {
            return Err(TraceError::InvalidMagic {
                expected: BLOCK_INDEX_MAGIC,
                found,
            });
        }
        let mut index = Self::new();
        let mut pair = [0u8; 16];
        loop {
            let mut filled = 0;
            while filled < pair.len() {
                match r.read(&mut pair[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(TraceError::Io(e)),
                }
            }
            match filled {
                0 => break,
                16 => {}
                n => {
                    return Err(TraceError::MalformedRecord {
                        detail: format!("truncated block index entry: got {n} of 16 bytes"),
                    })
                }
            }
            let mut block = [0u8; 8];
            let mut offset = [0u8; 8];
            block.copy_from_slice(&pair[..8]);
            offset.copy_from_slice(&pair[8..]);
            index.add(u64::from_le_bytes(block), u64::from_le_bytes(offset))?;
        }
        Ok(index)
    }

    /// Write the index to `path`.
    pub fn write_file(&self, path: &Path) -> Result<(), TraceError> {
        let mut w = BufWriter::new(File::create(path)?);
        self.write_to(&mut w)?;
        w.flush()?;
        Ok(())
    }

    /// Read an index from `path`.
    pub fn read_file(path: &Path) -> Result<Self, TraceError> {
        let mut r = BufReader::new(File::open(path)?);
        Self::read_from(&mut r)
    }

    /// Rebuild the index of a trace file by decoding every record.
    pub fn scan(trace: &Path) -> Result<Self, TraceError> {
        let mut file = TraceFile::open(trace)?;
        let mut index = Self::new();
        loop {
            let offset = file.position();
            match file.read_operation()? {
                Some(Operation::BeginBlock { block }) => index.add(block, offset)?,
                Some(_) => {}
                None => break,
            }
        }
        info!(
            trace = %trace.display(),
            blocks = index.len(),
            "rebuilt block index"
        );
        Ok(index)
    }
}
