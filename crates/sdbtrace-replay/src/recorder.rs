//! Recording state-database calls into a trace.
//!
//! [`RecordSession`] owns a [`TraceWriter`] and the encoding-side
//! [`DictionaryContext`]; it turns raw operands into dictionary indices and
//! picks the shortest delta form of each storage operation. [`Recorder`]
//! wraps any [`StateDb`], forwarding every call and recording it through a
//! session.

use std::path::Path;

use sdbtrace_core::{amount_from_u256, Address, Amount, Hash, LogEntry, StateDb, U256};
use sdbtrace_dict::DictionaryContext;
use tracing::warn;

use crate::block_index::BlockIndex;
use crate::config::TraceConfig;
use crate::error::TraceError;
use crate::operation::{Operation, TopicIndices};
use crate::writer::TraceWriter;

// ── RecordSession ───────────────────────────────────────────────

/// Encoding state plus the trace being written.
pub struct RecordSession {
    writer: TraceWriter,
    ctx: DictionaryContext,
}

impl RecordSession {
    /// Start a new trace at `path` with fresh dictionaries.
    pub fn create(path: &Path, first_block: u64) -> Result<Self, TraceError> {
        Ok(Self::with_context(
            TraceWriter::create(path, first_block)?,
            DictionaryContext::new(),
        ))
    }

    /// Start a new trace at `path` with the compression level, buffer size
    /// and dictionary limits of `config`.
    pub fn from_config(
        config: &TraceConfig,
        path: &Path,
        first_block: u64,
    ) -> Result<Self, TraceError> {
        config.validate()?;
        let writer = TraceWriter::create_with(
            path,
            first_block,
            config.compression_level,
            config.write_buffer_size,
        )?;
        Ok(Self::with_context(
            writer,
            DictionaryContext::with_limits(config.limits),
        ))
    }

    /// Record into `writer`, continuing the dictionaries in `ctx`.
    ///
    /// Reusing the context of an earlier session lets several trace files
    /// share one set of dictionary files.
    pub fn with_context(writer: TraceWriter, ctx: DictionaryContext) -> Self {
        Self { writer, ctx }
    }

    /// The encoding context.
    pub fn context(&self) -> &DictionaryContext {
        &self.ctx
    }

    /// Mutable access to the encoding context.
    pub fn context_mut(&mut self) -> &mut DictionaryContext {
        &mut self.ctx
    }

    /// The underlying trace writer.
    pub fn writer(&self) -> &TraceWriter {
        &self.writer
    }

    /// Append an already-encoded operation.
    pub fn write(&mut self, op: &Operation) -> Result<(), TraceError> {
        self.writer.write_operation(op)
    }

    fn contract(&mut self, addr: Address) -> Result<u32, TraceError> {
        Ok(self.ctx.encode_contract(addr)?)
    }

    fn value(&mut self, value: Hash) -> Result<u64, TraceError> {
        Ok(self.ctx.encode_value(value)?)
    }

    /// Encode the contract and key of a storage access.
    ///
    /// Returns the contract index, whether it equals the previous contract,
    /// the storage index and the key's cache position before the access.
    fn storage_access(
        &mut self,
        addr: Address,
        key: Hash,
    ) -> Result<(u32, bool, u32, Option<u8>), TraceError> {
        let previous = self.ctx.previous_contract_index();
        let contract = self.contract(addr)?;
        let (storage, pos) = self.ctx.encode_storage(key)?;
        Ok((contract, previous == Some(contract), storage, pos))
    }

    // ── Single-call recorders ───────────────────────────────────

    /// Record `BeginBlock`, resetting the per-block encoding state.
    pub fn begin_block(&mut self, block: u64) -> Result<(), TraceError> {
        self.ctx.begin_block();
        self.write(&Operation::BeginBlock { block })
    }

    /// Record a `GetState` in its shortest form.
    pub fn get_state(&mut self, addr: Address, key: Hash) -> Result<(), TraceError> {
        let (contract, same, storage, pos) = self.storage_access(addr, key)?;
        let op = match (same, pos) {
            (true, Some(0)) => Operation::GetStateLcls,
            (true, Some(pos)) => Operation::GetStateLccs { pos },
            (true, None) => Operation::GetStateLc { storage },
            (false, _) => Operation::GetState { contract, storage },
        };
        self.write(&op)
    }

    /// Record a `SetState` in its shortest form.
    pub fn set_state(&mut self, addr: Address, key: Hash, value: Hash) -> Result<(), TraceError> {
        let (contract, same, storage, pos) = self.storage_access(addr, key)?;
        let value = self.value(value)?;
        let op = if same && pos == Some(0) {
            Operation::SetStateLcls { value }
        } else {
            Operation::SetState {
                contract,
                storage,
                value,
            }
        };
        self.write(&op)
    }

    /// Record a `GetCommittedState` in its shortest form.
    pub fn get_committed_state(&mut self, addr: Address, key: Hash) -> Result<(), TraceError> {
        let (contract, same, storage, pos) = self.storage_access(addr, key)?;
        let op = if same && pos == Some(0) {
            Operation::GetCommittedStateLcls
        } else {
            Operation::GetCommittedState { contract, storage }
        };
        self.write(&op)
    }

    /// Record a `GetCodeHash` in its shortest form.
    pub fn get_code_hash(&mut self, addr: Address) -> Result<(), TraceError> {
        let previous = self.ctx.previous_contract_index();
        let contract = self.contract(addr)?;
        let op = if previous == Some(contract) {
            Operation::GetCodeHashLc
        } else {
            Operation::GetCodeHash { contract }
        };
        self.write(&op)
    }

    /// Record an operation whose only operand is a contract.
    pub fn contract_op(
        &mut self,
        addr: Address,
        make: impl FnOnce(u32) -> Operation,
    ) -> Result<(), TraceError> {
        let contract = self.contract(addr)?;
        self.write(&make(contract))
    }

    /// Record a balance change.
    pub fn balance_op(
        &mut self,
        addr: Address,
        amount: U256,
        make: impl FnOnce(u32, Amount) -> Operation,
    ) -> Result<(), TraceError> {
        let amount = amount_from_u256(amount).ok_or(TraceError::AmountOverflow { value: amount })?;
        let contract = self.contract(addr)?;
        self.write(&make(contract, amount))
    }

    /// Record a `SetCode`.
    pub fn set_code(&mut self, addr: Address, code: &[u8]) -> Result<(), TraceError> {
        let contract = self.contract(addr)?;
        let code = self.ctx.encode_code(code)?;
        self.write(&Operation::SetCode { contract, code })
    }

    /// Record an access-list slot operation.
    pub fn slot_op(
        &mut self,
        addr: Address,
        slot: Hash,
        make: impl FnOnce(u32, u32) -> Operation,
    ) -> Result<(), TraceError> {
        let contract = self.contract(addr)?;
        let (storage, _) = self.ctx.encode_storage(slot)?;
        self.write(&make(contract, storage))
    }

    /// Record a `PrepareAccessList`.
    pub fn prepare_access_list(
        &mut self,
        sender: Address,
        dest: Option<Address>,
    ) -> Result<(), TraceError> {
        let sender = self.contract(sender)?;
        let dest = dest.map(|d| self.contract(d)).transpose()?;
        self.write(&Operation::PrepareAccessList { sender, dest })
    }

    /// Record an `AddLog`.
    pub fn add_log(&mut self, log: &LogEntry) -> Result<(), TraceError> {
        let contract = self.contract(log.address)?;
        let topics = log
            .topics
            .iter()
            .map(|t| self.value(*t))
            .collect::<Result<TopicIndices, _>>()?;
        self.write(&Operation::AddLog {
            contract,
            topics,
            data: log.data.clone(),
        })
    }

    /// Record an `AddPreimage`.
    pub fn add_preimage(&mut self, hash: Hash, preimage: &[u8]) -> Result<(), TraceError> {
        let hash = self.value(hash)?;
        self.write(&Operation::AddPreimage {
            hash,
            preimage: preimage.to_vec(),
        })
    }

    /// Record a `GetLogs`.
    pub fn get_logs(&mut self, tx_hash: Hash, block_hash: Hash) -> Result<(), TraceError> {
        let tx_hash = self.value(tx_hash)?;
        let block_hash = self.value(block_hash)?;
        self.write(&Operation::GetLogs {
            tx_hash,
            block_hash,
        })
    }

    /// Record a `Prepare`.
    pub fn prepare(&mut self, tx_hash: Hash, tx_index: i32) -> Result<(), TraceError> {
        let tx_hash = self.value(tx_hash)?;
        self.write(&Operation::Prepare { tx_hash, tx_index })
    }

    /// Seal the trace. Returns the encoding context and the block index.
    pub fn finish(self) -> Result<(DictionaryContext, BlockIndex), TraceError> {
        let index = self.writer.finish()?;
        Ok((self.ctx, index))
    }
}

// ── Recorder ────────────────────────────────────────────────────

/// A [`StateDb`] that forwards to `inner` and records every call.
///
/// The trait cannot report failures, so the first recording error is kept
/// and recording stops; the inner database keeps receiving calls. The
/// error surfaces from [`finish`](Self::finish).
pub struct Recorder<D> {
    inner: D,
    session: RecordSession,
    error: Option<TraceError>,
}

impl<D: StateDb> Recorder<D> {
    /// Wrap `inner`, recording into `session`.
    pub fn new(inner: D, session: RecordSession) -> Self {
        Self {
            inner,
            session,
            error: None,
        }
    }

    /// The wrapped database.
    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// The recording session.
    pub fn session(&self) -> &RecordSession {
        &self.session
    }

    /// The first recording error, if any.
    pub fn error(&self) -> Option<&TraceError> {
        self.error.as_ref()
    }

    /// Seal the trace and hand back the database, context and block index.
    pub fn finish(self) -> Result<(D, DictionaryContext, BlockIndex), TraceError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let (ctx, index) = self.session.finish()?;
        Ok((self.inner, ctx, index))
    }

    fn record(&mut self, f: impl FnOnce(&mut RecordSession) -> Result<(), TraceError>) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = f(&mut self.session) {
            warn!(error = %e, "recording stopped");
            self.error = Some(e);
        }
    }
}

impl<D: StateDb> StateDb for Recorder<D> {
    fn create_account(&mut self, addr: Address) {
        self.record(|s| s.contract_op(addr, |contract| Operation::CreateAccount { contract }));
        self.inner.create_account(addr);
    }

    fn exist(&mut self, addr: Address) -> bool {
        self.record(|s| s.contract_op(addr, |contract| Operation::Exist { contract }));
        self.inner.exist(addr)
    }

    fn empty(&mut self, addr: Address) -> bool {
        self.record(|s| s.contract_op(addr, |contract| Operation::Empty { contract }));
        self.inner.empty(addr)
    }

    fn suicide(&mut self, addr: Address) -> bool {
        self.record(|s| s.contract_op(addr, |contract| Operation::Suicide { contract }));
        self.inner.suicide(addr)
    }

    fn has_suicided(&mut self, addr: Address) -> bool {
        self.record(|s| s.contract_op(addr, |contract| Operation::HasSuicided { contract }));
        self.inner.has_suicided(addr)
    }

    fn get_balance(&mut self, addr: Address) -> U256 {
        self.record(|s| s.contract_op(addr, |contract| Operation::GetBalance { contract }));
        self.inner.get_balance(addr)
    }

    fn add_balance(&mut self, addr: Address, amount: U256) {
        self.record(|s| {
            s.balance_op(addr, amount, |contract, amount| Operation::AddBalance {
                contract,
                amount,
            })
        });
        self.inner.add_balance(addr, amount);
    }

    fn sub_balance(&mut self, addr: Address, amount: U256) {
        self.record(|s| {
            s.balance_op(addr, amount, |contract, amount| Operation::SubBalance {
                contract,
                amount,
            })
        });
        self.inner.sub_balance(addr, amount);
    }

    fn get_nonce(&mut self, addr: Address) -> u64 {
        self.record(|s| s.contract_op(addr, |contract| Operation::GetNonce { contract }));
        self.inner.get_nonce(addr)
    }

    fn set_nonce(&mut self, addr: Address, nonce: u64) {
        self.record(|s| s.contract_op(addr, |contract| Operation::SetNonce { contract, nonce }));
        self.inner.set_nonce(addr, nonce);
    }

    fn get_code(&mut self, addr: Address) -> Vec<u8> {
        self.record(|s| s.contract_op(addr, |contract| Operation::GetCode { contract }));
        self.inner.get_code(addr)
    }

    fn set_code(&mut self, addr: Address, code: Vec<u8>) {
        self.record(|s| s.set_code(addr, &code));
        self.inner.set_code(addr, code);
    }

    fn get_code_hash(&mut self, addr: Address) -> Hash {
        self.record(|s| s.get_code_hash(addr));
        self.inner.get_code_hash(addr)
    }

    fn get_code_size(&mut self, addr: Address) -> usize {
        self.record(|s| s.contract_op(addr, |contract| Operation::GetCodeSize { contract }));
        self.inner.get_code_size(addr)
    }

    fn get_state(&mut self, addr: Address, key: Hash) -> Hash {
        self.record(|s| s.get_state(addr, key));
        self.inner.get_state(addr, key)
    }

    fn set_state(&mut self, addr: Address, key: Hash, value: Hash) {
        self.record(|s| s.set_state(addr, key, value));
        self.inner.set_state(addr, key, value);
    }

    fn get_committed_state(&mut self, addr: Address, key: Hash) -> Hash {
        self.record(|s| s.get_committed_state(addr, key));
        self.inner.get_committed_state(addr, key)
    }

    fn for_each_storage(&mut self, addr: Address, visit: &mut dyn FnMut(Hash, Hash) -> bool) {
        self.record(|s| s.contract_op(addr, |contract| Operation::ForEachStorage { contract }));
        self.inner.for_each_storage(addr, visit);
    }

    fn snapshot(&mut self) -> i32 {
        let snapshot = self.inner.snapshot();
        self.record(|s| s.write(&Operation::Snapshot { snapshot }));
        snapshot
    }

    fn revert_to_snapshot(&mut self, id: i32) {
        self.record(|s| s.write(&Operation::RevertToSnapshot { snapshot: id }));
        self.inner.revert_to_snapshot(id);
    }

    fn begin_sync_period(&mut self, number: u64) {
        self.record(|s| s.write(&Operation::BeginSyncPeriod { period: number }));
        self.inner.begin_sync_period(number);
    }

    fn end_sync_period(&mut self) {
        self.record(|s| s.write(&Operation::EndSyncPeriod));
        self.inner.end_sync_period();
    }

    fn begin_block(&mut self, number: u64) {
        self.record(|s| s.begin_block(number));
        self.inner.begin_block(number);
    }

    fn end_block(&mut self) {
        self.record(|s| s.write(&Operation::EndBlock));
        self.inner.end_block();
    }

    fn begin_transaction(&mut self, number: u32) {
        self.record(|s| s.write(&Operation::BeginTransaction { tx: number }));
        self.inner.begin_transaction(number);
    }

    fn end_transaction(&mut self) {
        self.record(|s| s.write(&Operation::EndTransaction));
        self.inner.end_transaction();
    }

    fn finalise(&mut self, delete_empty_objects: bool) {
        self.record(|s| {
            s.write(&Operation::Finalise {
                delete_empty: delete_empty_objects,
            })
        });
        self.inner.finalise(delete_empty_objects);
    }

    fn commit(&mut self, delete_empty_objects: bool) -> Hash {
        self.record(|s| {
            s.write(&Operation::Commit {
                delete_empty: delete_empty_objects,
            })
        });
        self.inner.commit(delete_empty_objects)
    }

    fn intermediate_root(&mut self, delete_empty_objects: bool) -> Hash {
        self.record(|s| {
            s.write(&Operation::IntermediateRoot {
                delete_empty: delete_empty_objects,
            })
        });
        self.inner.intermediate_root(delete_empty_objects)
    }

    fn close(&mut self) {
        self.record(|s| s.write(&Operation::Close));
        self.inner.close();
    }

    fn prepare(&mut self, tx_hash: Hash, tx_index: i32) {
        self.record(|s| s.prepare(tx_hash, tx_index));
        self.inner.prepare(tx_hash, tx_index);
    }

    fn add_refund(&mut self, gas: u64) {
        self.record(|s| s.write(&Operation::AddRefund { gas }));
        self.inner.add_refund(gas);
    }

    fn sub_refund(&mut self, gas: u64) {
        self.record(|s| s.write(&Operation::SubRefund { gas }));
        self.inner.sub_refund(gas);
    }

    fn get_refund(&mut self) -> u64 {
        self.record(|s| s.write(&Operation::GetRefund));
        self.inner.get_refund()
    }

    fn prepare_access_list(&mut self, sender: Address, dest: Option<Address>) {
        self.record(|s| s.prepare_access_list(sender, dest));
        self.inner.prepare_access_list(sender, dest);
    }

    fn add_address_to_access_list(&mut self, addr: Address) {
        self.record(|s| {
            s.contract_op(addr, |contract| Operation::AddAddressToAccessList {
                contract,
            })
        });
        self.inner.add_address_to_access_list(addr);
    }

    fn address_in_access_list(&mut self, addr: Address) -> bool {
        self.record(|s| s.contract_op(addr, |contract| Operation::AddressInAccessList { contract }));
        self.inner.address_in_access_list(addr)
    }

    fn add_slot_to_access_list(&mut self, addr: Address, slot: Hash) {
        self.record(|s| {
            s.slot_op(addr, slot, |contract, storage| {
                Operation::AddSlotToAccessList { contract, storage }
            })
        });
        self.inner.add_slot_to_access_list(addr, slot);
    }

    fn slot_in_access_list(&mut self, addr: Address, slot: Hash) -> (bool, bool) {
        self.record(|s| {
            s.slot_op(addr, slot, |contract, storage| Operation::SlotInAccessList {
                contract,
                storage,
            })
        });
        self.inner.slot_in_access_list(addr, slot)
    }

    fn add_log(&mut self, log: LogEntry) {
        self.record(|s| s.add_log(&log));
        self.inner.add_log(log);
    }

    fn get_logs(&mut self, tx_hash: Hash, block_hash: Hash) -> Vec<LogEntry> {
        self.record(|s| s.get_logs(tx_hash, block_hash));
        self.inner.get_logs(tx_hash, block_hash)
    }

    fn add_preimage(&mut self, hash: Hash, preimage: Vec<u8>) {
        self.record(|s| s.add_preimage(hash, &preimage));
        self.inner.add_preimage(hash, preimage);
    }
}
