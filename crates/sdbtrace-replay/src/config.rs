//! Record and replay configuration.
//!
//! [`TraceConfig`] collects every knob a recording or replay session needs:
//! where the dictionaries and trace files live, which blocks to replay,
//! how large the dictionaries may grow, and the I/O tuning. Call
//! [`validate()`](TraceConfig::validate) before use.

use std::path::PathBuf;

use sdbtrace_dict::{DictionaryKind, DictionaryLimits};

use crate::error::TraceError;
use crate::reader::TraceIterator;
use crate::trace_file::{trace_files_in_dir, DEFAULT_READ_BUFFER};
use crate::writer::DEFAULT_WRITE_BUFFER;

// ── ConfigError ─────────────────────────────────────────────────

/// Errors detected by [`TraceConfig::validate`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `first_block` is after `last_block`.
    #[error("first block {first} is after last block {last}")]
    InvalidBlockRange {
        /// Configured first block.
        first: u64,
        /// Configured last block.
        last: u64,
    },
    /// A dictionary limit is zero or larger than the encoding can address.
    #[error("{kind} dictionary limit {limit} is outside 1..={max}")]
    InvalidLimit {
        /// The dictionary the limit applies to.
        kind: DictionaryKind,
        /// Configured limit.
        limit: usize,
        /// Largest valid limit.
        max: usize,
    },
    /// The zstd level is outside the range the library accepts.
    #[error("compression level {level} is outside {min}..={max}")]
    InvalidCompressionLevel {
        /// Configured level.
        level: i32,
        /// Lowest accepted level.
        min: i32,
        /// Highest accepted level.
        max: i32,
    },
    /// A buffer size is zero.
    #[error("{name} buffer size must be non-zero")]
    ZeroBuffer {
        /// Which buffer.
        name: &'static str,
    },
    /// `profile_csv` was set without enabling profiling.
    #[error("profile CSV path given but profiling is disabled")]
    CsvWithoutProfiling,
}

// ── TraceConfig ─────────────────────────────────────────────────

/// Configuration shared by recording and replay.
#[derive(Clone, Debug, PartialEq)]
pub struct TraceConfig {
    /// Directory holding the four dictionary files. Default: `dictionaries`.
    pub dictionary_dir: PathBuf,
    /// Directory holding the trace files. Default: `traces`.
    pub trace_dir: PathBuf,
    /// First block to replay. Default: 0.
    pub first_block: u64,
    /// Last block to replay, inclusive. Default: `u64::MAX`.
    pub last_block: u64,
    /// Per-dictionary capacity limits. Default: what the encoding can address.
    pub limits: DictionaryLimits,
    /// zstd level used when recording. Default: zstd's default level.
    pub compression_level: i32,
    /// Buffer between compressor and file, in bytes. Default: 1 MiB.
    pub write_buffer_size: usize,
    /// Buffer between decompressor and decoder, in bytes. Default: 1 MiB.
    pub read_buffer_size: usize,
    /// Log every replayed operation at `debug` level. Default: false.
    pub debug: bool,
    /// Collect per-operation timing statistics. Default: false.
    pub profile: bool,
    /// Append the profile report to this CSV file. Default: none.
    pub profile_csv: Option<PathBuf>,
    /// Log progress every this many blocks; 0 disables it. Default: 100 000.
    pub progress_interval: u64,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            dictionary_dir: PathBuf::from("dictionaries"),
            trace_dir: PathBuf::from("traces"),
            first_block: 0,
            last_block: u64::MAX,
            limits: DictionaryLimits::default(),
            compression_level: zstd::DEFAULT_COMPRESSION_LEVEL,
            write_buffer_size: DEFAULT_WRITE_BUFFER,
            read_buffer_size: DEFAULT_READ_BUFFER,
            debug: false,
            profile: false,
            profile_csv: None,
            progress_interval: 100_000,
        }
    }
}

impl TraceConfig {
    /// Check the configuration for values no session can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.first_block > self.last_block {
            return Err(ConfigError::InvalidBlockRange {
                first: self.first_block,
                last: self.last_block,
            });
        }
        let limits = [
            (DictionaryKind::Contract, self.limits.contract),
            (DictionaryKind::Storage, self.limits.storage),
            (DictionaryKind::Value, self.limits.value),
            (DictionaryKind::Code, self.limits.code),
        ];
        for (kind, limit) in limits {
            let max = kind.max_entries();
            if limit == 0 || limit > max {
                return Err(ConfigError::InvalidLimit { kind, limit, max });
            }
        }
        let levels = zstd::compression_level_range();
        if !levels.contains(&self.compression_level) {
            return Err(ConfigError::InvalidCompressionLevel {
                level: self.compression_level,
                min: *levels.start(),
                max: *levels.end(),
            });
        }
        if self.write_buffer_size == 0 {
            return Err(ConfigError::ZeroBuffer { name: "write" });
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::ZeroBuffer { name: "read" });
        }
        if self.profile_csv.is_some() && !self.profile {
            return Err(ConfigError::CsvWithoutProfiling);
        }
        Ok(())
    }

    /// Open the configured block range from every trace in `trace_dir`.
    pub fn open_replay(&self) -> Result<TraceIterator, TraceError> {
        let paths = trace_files_in_dir(&self.trace_dir)?;
        TraceIterator::open_with_buffer(
            &paths,
            self.first_block,
            self.last_block,
            self.read_buffer_size,
        )
    }
}
