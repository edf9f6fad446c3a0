//! Simulated execution state behind the generator.
//!
//! [`StateContext`] decides which operations are currently feasible and
//! synthesizes operands for the chosen one. Operands are drawn from the
//! [`Distributions`] and pushed through a [`DictionaryContext`] exactly as
//! the recorder would push live values, so a generated trace decodes and
//! replays like a recorded one.
//!
//! Balances are simulated per snapshot level so that a `SubBalance` never
//! takes more than the contract holds, and contracts destroyed by `Suicide`
//! stop being drawn once their transaction ends.

use std::collections::{HashMap, HashSet};

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use sdbtrace_core::{address_from_index, hash_from_index};
use sdbtrace_dict::DictionaryContext;
use sdbtrace_replay::{Operation, OperationId, TopicIndices};

use crate::config::GeneratorConfig;
use crate::distribution::{exponential_rank, Distributions, StochasticGenerator};
use crate::error::GeneratorError;

/// Largest number of topics on a generated log.
const MAX_TOPICS: usize = 4;

/// Value kinds an operation draws operands from.
#[derive(Clone, Copy, Debug, Default)]
struct Needs {
    contract: bool,
    storage: bool,
    value: bool,
    code: bool,
}

fn needs(id: OperationId) -> Needs {
    use OperationId as Id;
    let contract = Needs {
        contract: true,
        ..Needs::default()
    };
    match id {
        Id::AddBalance
        | Id::SubBalance
        | Id::CreateAccount
        | Id::Empty
        | Id::Exist
        | Id::GetBalance
        | Id::GetCodeHash
        | Id::GetCode
        | Id::GetCodeSize
        | Id::GetNonce
        | Id::HasSuicided
        | Id::SetNonce
        | Id::Suicide
        | Id::AddAddressToAccessList
        | Id::AddressInAccessList
        | Id::PrepareAccessList
        | Id::ForEachStorage => contract,
        Id::GetCommittedState | Id::GetState | Id::AddSlotToAccessList | Id::SlotInAccessList => {
            Needs {
                storage: true,
                ..contract
            }
        }
        Id::SetState => Needs {
            storage: true,
            value: true,
            ..contract
        },
        Id::SetCode => Needs {
            code: true,
            ..contract
        },
        Id::AddLog => Needs {
            value: true,
            ..contract
        },
        Id::GetStateLc => Needs {
            storage: true,
            ..Needs::default()
        },
        Id::SetStateLcls | Id::AddPreimage | Id::GetLogs | Id::Prepare => Needs {
            value: true,
            ..Needs::default()
        },
        _ => Needs::default(),
    }
}

/// Scope, snapshot and dictionary state of a generation run.
pub struct StateContext {
    ctx: DictionaryContext,
    distributions: Distributions,
    config: GeneratorConfig,
    rng: ChaCha8Rng,
    sync_period_open: bool,
    block_open: bool,
    transaction_open: bool,
    next_sync_period: u64,
    next_block: u64,
    next_transaction: u32,
    transaction: u32,
    open_snapshots: i32,
    /// Contract indices that can still be drawn, oldest first.
    live_contracts: Vec<u32>,
    /// Contracts destroyed in a finished transaction.
    retired: HashSet<u32>,
    /// Contracts destroyed in the open transaction, with the snapshot level
    /// of the `Suicide`.
    suicided: Vec<(u32, usize)>,
    /// Balances as of the last finished transaction.
    balances: HashMap<u32, u128>,
    /// Balances changed since, one entry per snapshot level.
    balance_log: HashMap<u32, Vec<u128>>,
}

impl StateContext {
    /// Create a context with fresh dictionaries.
    ///
    /// The dictionaries are primed with as many synthetic entries as each
    /// distribution's `population` asks for.
    pub fn new(
        distributions: Distributions,
        config: GeneratorConfig,
    ) -> Result<Self, GeneratorError> {
        Self::with_context(DictionaryContext::new(), distributions, config)
    }

    /// Continue generating into an existing dictionary context.
    pub fn with_context(
        ctx: DictionaryContext,
        distributions: Distributions,
        config: GeneratorConfig,
    ) -> Result<Self, GeneratorError> {
        distributions.validate()?;
        config.validate()?;
        let mut state = Self {
            ctx,
            distributions,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            sync_period_open: false,
            block_open: false,
            transaction_open: false,
            next_sync_period: config.first_sync_period,
            next_block: config.first_block,
            next_transaction: 0,
            transaction: 0,
            open_snapshots: 0,
            live_contracts: Vec::new(),
            retired: HashSet::new(),
            suicided: Vec::new(),
            balances: HashMap::new(),
            balance_log: HashMap::new(),
            config,
        };
        state.prime()?;
        state.live_contracts = (0..state.ctx.contract_count() as u32).collect();
        Ok(state)
    }

    fn prime(&mut self) -> Result<(), GeneratorError> {
        while (self.ctx.contract_count() as u64) < self.distributions.contract.population {
            self.ctx
                .encode_contract(address_from_index(self.ctx.contract_count() as u64))?;
        }
        while (self.ctx.storage_count() as u64) < self.distributions.storage.population {
            self.ctx
                .encode_storage(hash_from_index(self.ctx.storage_count() as u64))?;
        }
        while (self.ctx.value_count() as u64) < self.distributions.value.population {
            self.ctx
                .encode_value(hash_from_index(self.ctx.value_count() as u64))?;
        }
        while (self.ctx.code_count() as u64) < self.distributions.code.population {
            let blob = (self.ctx.code_count() as u64).to_be_bytes();
            self.ctx.encode_code(&blob)?;
        }
        // Priming must not leak into the first block's delta state.
        self.ctx.begin_block();
        Ok(())
    }

    /// The dictionaries generated operations are encoded against.
    pub fn context(&self) -> &DictionaryContext {
        &self.ctx
    }

    /// Take the dictionaries, e.g. to persist them next to the trace.
    pub fn into_context(self) -> DictionaryContext {
        self.ctx
    }

    /// The run's configuration.
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Number of the next block to be generated.
    pub fn next_block(&self) -> u64 {
        self.next_block
    }

    /// Snapshots that can currently be reverted to.
    pub fn open_snapshots(&self) -> i32 {
        self.open_snapshots
    }

    /// Balance of `contract` as seen inside the innermost open snapshot.
    pub fn balance(&self, contract: u32) -> u128 {
        self.balance_log
            .get(&contract)
            .and_then(|log| log.last())
            .or_else(|| self.balances.get(&contract))
            .copied()
            .unwrap_or(0)
    }

    /// Contract indices operations can still draw, oldest first.
    pub fn live_contracts(&self) -> &[u32] {
        &self.live_contracts
    }

    /// Returns `true` if `contract` was destroyed in a finished transaction.
    pub fn is_retired(&self, contract: u32) -> bool {
        self.retired.contains(&contract)
    }

    pub(crate) fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    // ── Feasibility ─────────────────────────────────────────────

    /// Returns `true` if `id` can be generated in the current state.
    pub fn is_feasible(&self, id: OperationId) -> bool {
        use OperationId as Id;
        let has_previous = self
            .ctx
            .previous_contract_index()
            .is_some_and(|contract| !self.retired.contains(&contract));
        let cached = self.ctx.storage_cache_len() > 0;
        let scoped = match id {
            Id::BeginSyncPeriod => !self.sync_period_open && !self.block_open,
            Id::EndSyncPeriod => self.sync_period_open && !self.block_open,
            Id::BeginBlock => !self.block_open,
            Id::EndBlock => self.block_open && !self.transaction_open,
            Id::BeginTransaction => self.block_open && !self.transaction_open,
            Id::EndTransaction => self.transaction_open,
            Id::RevertToSnapshot => self.open_snapshots > 0,
            Id::GetCodeHashLc | Id::GetStateLc => has_previous,
            Id::GetStateLcls
            | Id::GetStateLccs
            | Id::GetCommittedStateLcls
            | Id::SetStateLcls => has_previous && cached,
            _ => true,
        };
        let needs = needs(id);
        scoped
            && (!needs.contract || self.can_draw(&self.distributions.contract, self.live_contracts.len()))
            && (!needs.storage || self.can_draw(&self.distributions.storage, self.ctx.storage_count()))
            && (!needs.value || self.can_draw(&self.distributions.value, self.ctx.value_count()))
            && (!needs.code || self.can_draw(&self.distributions.code, self.ctx.code_count()))
    }

    fn can_draw(&self, generator: &StochasticGenerator, population: usize) -> bool {
        population > 0 || generator.new_value_probability > 0.0
    }

    // ── Operand draws ───────────────────────────────────────────

    fn contract(&mut self) -> Result<u32, GeneratorError> {
        let population = self.live_contracts.len() as u64;
        self.distributions.contract.population = population;
        let rank = self.distributions.contract.next_index(&mut self.rng);
        if rank == population {
            let fresh = address_from_index(self.ctx.contract_count() as u64);
            let index = self.ctx.encode_contract(fresh)?;
            self.live_contracts.push(index);
            return Ok(index);
        }
        let index = self.live_contracts[rank as usize];
        self.ctx.decode_contract(index)?;
        Ok(index)
    }

    fn storage(&mut self) -> Result<u32, GeneratorError> {
        let population = self.ctx.storage_count() as u64;
        self.distributions.storage.population = population;
        let index = self.distributions.storage.next_index(&mut self.rng);
        if index == population {
            let (index, _) = self.ctx.encode_storage(hash_from_index(index))?;
            return Ok(index);
        }
        let index = index as u32;
        self.ctx.decode_storage(index)?;
        Ok(index)
    }

    fn value(&mut self) -> Result<u64, GeneratorError> {
        let population = self.ctx.value_count() as u64;
        self.distributions.value.population = population;
        let index = self.distributions.value.next_index(&mut self.rng);
        if index == population {
            return Ok(self.ctx.encode_value(hash_from_index(index))?);
        }
        Ok(index)
    }

    fn code(&mut self) -> Result<u32, GeneratorError> {
        let population = self.ctx.code_count() as u64;
        self.distributions.code.population = population;
        let index = self.distributions.code.next_index(&mut self.rng);
        if index == population {
            let len = self.rng.gen_range(1..=self.config.max_code_size.max(1));
            let mut blob = vec![0u8; len];
            self.rng.fill_bytes(&mut blob);
            return Ok(self.ctx.encode_code(&blob)?);
        }
        Ok(index as u32)
    }

    fn bytes(&mut self, max: usize) -> Vec<u8> {
        let len = self.rng.gen_range(0..=max);
        let mut data = vec![0u8; len];
        self.rng.fill_bytes(&mut data);
        data
    }

    /// Move the open snapshot count back to a random earlier snapshot,
    /// dropping balance changes and suicides made after it.
    fn revert_target(&mut self) -> i32 {
        let open = self.open_snapshots as u64;
        let k = exponential_rank(&mut self.rng, self.distributions.snapshot_lambda, open);
        let target = (open - 1 - k) as i32;
        self.open_snapshots = target;
        let keep = self.level() + 1;
        for log in self.balance_log.values_mut() {
            log.truncate(keep);
        }
        self.suicided.retain(|&(_, level)| level < keep);
        target
    }

    // ── Balances and suicides ───────────────────────────────────

    /// Snapshot level changes are currently logged at.
    fn level(&self) -> usize {
        usize::try_from(self.open_snapshots).unwrap_or(0)
    }

    fn set_balance(&mut self, contract: u32, balance: u128) {
        let level = self.level();
        let current = self.balance(contract);
        let log = self.balance_log.entry(contract).or_default();
        log.resize(level + 1, current);
        if let Some(slot) = log.last_mut() {
            *slot = balance;
        }
    }

    /// Commit logged balances and retire contracts destroyed since the last
    /// transaction boundary.
    fn settle(&mut self) {
        for (contract, log) in self.balance_log.drain() {
            if let Some(&balance) = log.last() {
                self.balances.insert(contract, balance);
            }
        }
        if self.suicided.is_empty() {
            return;
        }
        for (contract, _) in self.suicided.drain(..) {
            self.balances.remove(&contract);
            self.retired.insert(contract);
        }
        let retired = &self.retired;
        self.live_contracts.retain(|contract| !retired.contains(contract));
    }

    // ── Synthesis ───────────────────────────────────────────────

    /// Generate operands for `id` and update the simulated state.
    ///
    /// The caller must have checked [`is_feasible`](Self::is_feasible).
    pub fn synthesize(&mut self, id: OperationId) -> Result<Operation, GeneratorError> {
        use OperationId as Id;
        let op = match id {
            Id::AddBalance => {
                let contract = self.contract()?;
                let amount = u128::from(self.rng.gen_range(0..self.config.balance_range));
                self.set_balance(contract, self.balance(contract).saturating_add(amount));
                Operation::AddBalance { contract, amount }
            }
            Id::SubBalance => {
                let contract = self.contract()?;
                let balance = self.balance(contract);
                let amount = if balance == 0 {
                    0
                } else {
                    self.rng.gen_range(0..balance)
                };
                self.set_balance(contract, balance - amount);
                Operation::SubBalance { contract, amount }
            }
            Id::BeginSyncPeriod => {
                self.sync_period_open = true;
                let period = self.next_sync_period;
                self.next_sync_period += 1;
                Operation::BeginSyncPeriod { period }
            }
            Id::EndSyncPeriod => {
                self.sync_period_open = false;
                Operation::EndSyncPeriod
            }
            Id::BeginBlock => {
                self.ctx.begin_block();
                self.block_open = true;
                self.next_transaction = 0;
                let block = self.next_block;
                self.next_block += 1;
                Operation::BeginBlock { block }
            }
            Id::EndBlock => {
                self.block_open = false;
                Operation::EndBlock
            }
            Id::BeginTransaction => {
                self.settle();
                self.transaction_open = true;
                self.open_snapshots = 0;
                self.transaction = self.next_transaction;
                self.next_transaction += 1;
                Operation::BeginTransaction {
                    tx: self.transaction,
                }
            }
            Id::EndTransaction => {
                self.settle();
                self.transaction_open = false;
                self.open_snapshots = 0;
                Operation::EndTransaction
            }
            Id::CreateAccount => Operation::CreateAccount {
                contract: self.contract()?,
            },
            Id::Commit => Operation::Commit { delete_empty: true },
            Id::Finalise => Operation::Finalise { delete_empty: true },
            Id::IntermediateRoot => Operation::IntermediateRoot { delete_empty: true },
            Id::Empty => Operation::Empty {
                contract: self.contract()?,
            },
            Id::Exist => Operation::Exist {
                contract: self.contract()?,
            },
            Id::GetBalance => Operation::GetBalance {
                contract: self.contract()?,
            },
            Id::GetCodeHash => Operation::GetCodeHash {
                contract: self.contract()?,
            },
            Id::GetCodeHashLc => {
                self.ctx.previous_contract()?;
                Operation::GetCodeHashLc
            }
            Id::GetCode => Operation::GetCode {
                contract: self.contract()?,
            },
            Id::GetCodeSize => Operation::GetCodeSize {
                contract: self.contract()?,
            },
            Id::GetCommittedState => {
                let contract = self.contract()?;
                let storage = self.storage()?;
                Operation::GetCommittedState { contract, storage }
            }
            Id::GetCommittedStateLcls => {
                self.ctx.lookup_storage(0)?;
                Operation::GetCommittedStateLcls
            }
            Id::GetNonce => Operation::GetNonce {
                contract: self.contract()?,
            },
            Id::GetState => {
                let contract = self.contract()?;
                let storage = self.storage()?;
                Operation::GetState { contract, storage }
            }
            Id::GetStateLccs => {
                let len = self.ctx.storage_cache_len();
                let pos = self.rng.gen_range(0..len) as u8;
                self.ctx.lookup_storage(pos)?;
                Operation::GetStateLccs { pos }
            }
            Id::GetStateLc => {
                self.ctx.previous_contract()?;
                Operation::GetStateLc {
                    storage: self.storage()?,
                }
            }
            Id::GetStateLcls => {
                self.ctx.lookup_storage(0)?;
                Operation::GetStateLcls
            }
            Id::HasSuicided => Operation::HasSuicided {
                contract: self.contract()?,
            },
            Id::RevertToSnapshot => Operation::RevertToSnapshot {
                snapshot: self.revert_target(),
            },
            Id::SetCode => {
                let contract = self.contract()?;
                let code = self.code()?;
                Operation::SetCode { contract, code }
            }
            Id::SetNonce => Operation::SetNonce {
                contract: self.contract()?,
                nonce: self.rng.gen_range(0..self.config.nonce_range),
            },
            Id::SetState => {
                let contract = self.contract()?;
                let storage = self.storage()?;
                let value = self.value()?;
                Operation::SetState {
                    contract,
                    storage,
                    value,
                }
            }
            Id::SetStateLcls => {
                self.ctx.lookup_storage(0)?;
                Operation::SetStateLcls {
                    value: self.value()?,
                }
            }
            Id::Snapshot => {
                let snapshot = self.open_snapshots;
                self.open_snapshots += 1;
                Operation::Snapshot { snapshot }
            }
            Id::Suicide => {
                let contract = self.contract()?;
                self.set_balance(contract, 0);
                self.suicided.push((contract, self.level()));
                Operation::Suicide { contract }
            }
            Id::AddAddressToAccessList => Operation::AddAddressToAccessList {
                contract: self.contract()?,
            },
            Id::AddressInAccessList => Operation::AddressInAccessList {
                contract: self.contract()?,
            },
            Id::AddSlotToAccessList => {
                let contract = self.contract()?;
                let storage = self.storage()?;
                Operation::AddSlotToAccessList { contract, storage }
            }
            Id::SlotInAccessList => {
                let contract = self.contract()?;
                let storage = self.storage()?;
                Operation::SlotInAccessList { contract, storage }
            }
            Id::PrepareAccessList => {
                let sender = self.contract()?;
                let dest = if self.rng.gen_bool(0.9) {
                    Some(self.contract()?)
                } else {
                    None
                };
                Operation::PrepareAccessList { sender, dest }
            }
            Id::AddLog => {
                let contract = self.contract()?;
                let count = self.rng.gen_range(0..=MAX_TOPICS);
                let mut topics = TopicIndices::new();
                for _ in 0..count {
                    topics.push(self.value()?);
                }
                let data = self.bytes(self.config.max_log_data);
                Operation::AddLog {
                    contract,
                    topics,
                    data,
                }
            }
            Id::AddPreimage => {
                let hash = self.value()?;
                let mut preimage = vec![0u8; 32];
                self.rng.fill_bytes(&mut preimage);
                Operation::AddPreimage { hash, preimage }
            }
            Id::AddRefund => Operation::AddRefund {
                gas: self.rng.gen_range(0..self.config.refund_range),
            },
            Id::SubRefund => Operation::SubRefund {
                gas: self.rng.gen_range(0..self.config.refund_range),
            },
            Id::Close => Operation::Close,
            Id::ForEachStorage => Operation::ForEachStorage {
                contract: self.contract()?,
            },
            Id::GetLogs => {
                let tx_hash = self.value()?;
                let block_hash = self.value()?;
                Operation::GetLogs {
                    tx_hash,
                    block_hash,
                }
            }
            Id::GetRefund => Operation::GetRefund,
            Id::Prepare => {
                let tx_index = i32::try_from(self.transaction).map_err(|_| {
                    GeneratorError::TransactionIndexOverflow {
                        tx: self.transaction,
                    }
                })?;
                Operation::Prepare {
                    tx_hash: self.value()?,
                    tx_index,
                }
            }
        };
        Ok(op)
    }
}
