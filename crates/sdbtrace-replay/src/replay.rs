//! Driving a trace through a state database.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use sdbtrace_core::StateDb;
use sdbtrace_dict::DictionaryContext;
use tracing::{debug, info};

use crate::config::TraceConfig;
use crate::error::TraceError;
use crate::operation::Operation;
use crate::profile::ProfileStats;
use crate::reader::TraceIterator;

/// Totals of one [`Replayer::run`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Operations executed.
    pub operations: u64,
    /// `BeginBlock` operations executed.
    pub blocks: u64,
    /// First block seen, if any.
    pub first_block: Option<u64>,
    /// Last block seen, if any.
    pub last_block: Option<u64>,
    /// Time spent inside the backend.
    pub db_time: Duration,
    /// Wall-clock time of the whole run.
    pub wall_time: Duration,
}

/// Executes decoded operations against a backend.
pub struct Replayer {
    ctx: DictionaryContext,
    profile: Option<ProfileStats>,
    debug: bool,
    progress_interval: u64,
    profile_csv: Option<PathBuf>,
}

impl Replayer {
    /// Replay with the dictionaries in `ctx`, without profiling or tracing.
    pub fn new(ctx: DictionaryContext) -> Self {
        Self {
            ctx,
            profile: None,
            debug: false,
            progress_interval: 0,
            profile_csv: None,
        }
    }

    /// Load the dictionaries named by `config` and apply its switches.
    pub fn from_config(config: &TraceConfig) -> Result<Self, TraceError> {
        config.validate()?;
        let ctx = DictionaryContext::read(&config.dictionary_dir, config.limits)?;
        let mut replayer = Self::new(ctx)
            .with_profiling(config.profile)
            .with_debug(config.debug)
            .with_progress_interval(config.progress_interval);
        if let Some(path) = &config.profile_csv {
            replayer = replayer.with_profile_csv(path);
        }
        Ok(replayer)
    }

    /// Collect per-operation timings.
    pub fn with_profiling(mut self, enabled: bool) -> Self {
        self.profile = enabled.then(ProfileStats::new);
        self
    }

    /// Log every operation at `debug` level before executing it.
    pub fn with_debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Log progress every `blocks` blocks; 0 disables it.
    pub fn with_progress_interval(mut self, blocks: u64) -> Self {
        self.progress_interval = blocks;
        self
    }

    /// Append the profile report to `path` at the end of every
    /// [`run`](Self::run). Enables profiling.
    pub fn with_profile_csv(mut self, path: impl Into<PathBuf>) -> Self {
        if self.profile.is_none() {
            self.profile = Some(ProfileStats::new());
        }
        self.profile_csv = Some(path.into());
        self
    }

    /// The decoding context.
    pub fn context(&self) -> &DictionaryContext {
        &self.ctx
    }

    /// Collected timings, if profiling is enabled.
    pub fn profile(&self) -> Option<&ProfileStats> {
        self.profile.as_ref()
    }

    /// Execute a single operation.
    pub fn execute(&mut self, op: &Operation, db: &mut dyn StateDb) -> Result<Duration, TraceError> {
        if self.debug {
            debug!(op = %op.debug(&self.ctx), "replay");
        }
        let elapsed = op.execute(db, &mut self.ctx)?;
        if let Some(profile) = self.profile.as_mut() {
            profile.record(op.id(), elapsed);
        }
        Ok(elapsed)
    }

    /// Execute every operation of `trace` against `db`.
    pub fn run(
        &mut self,
        trace: &mut TraceIterator,
        db: &mut dyn StateDb,
    ) -> Result<ReplaySummary, TraceError> {
        let start = Instant::now();
        let mut summary = ReplaySummary::default();
        while trace.next()? {
            let Some(op) = trace.value() else {
                break;
            };
            if let Operation::BeginBlock { block } = op {
                summary.blocks += 1;
                summary.first_block.get_or_insert(*block);
                summary.last_block = Some(*block);
                if self.progress_interval > 0 && summary.blocks % self.progress_interval == 0 {
                    info!(
                        block,
                        operations = summary.operations,
                        elapsed_s = start.elapsed().as_secs_f64(),
                        "replay progress"
                    );
                }
            }
            summary.db_time += self.execute(op, db)?;
            summary.operations += 1;
        }
        summary.wall_time = start.elapsed();
        info!(
            operations = summary.operations,
            blocks = summary.blocks,
            db_s = summary.db_time.as_secs_f64(),
            wall_s = summary.wall_time.as_secs_f64(),
            "replay finished"
        );
        if let Some(profile) = &self.profile {
            profile.log_summary();
        }
        if let Some(path) = &self.profile_csv {
            self.write_profile(path, &summary)?;
            info!(csv = %path.display(), "wrote replay profile");
        }
        Ok(summary)
    }

    /// Append the profile report for `summary` to `path`.
    ///
    /// Does nothing unless profiling is enabled.
    pub fn write_profile(
        &self,
        path: &Path,
        summary: &ReplaySummary,
    ) -> Result<(), TraceError> {
        if let Some(profile) = &self.profile {
            profile.append_csv(
                path,
                summary.first_block.unwrap_or(0),
                summary.last_block.unwrap_or(0),
            )?;
        }
        Ok(())
    }
}
