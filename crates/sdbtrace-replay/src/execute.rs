//! Replaying operations against a backend, and rendering them for logs.

use std::fmt::Debug;
use std::hint::black_box;
use std::time::{Duration, Instant};

use sdbtrace_core::{amount_to_u256, LogEntry, StateDb};
use sdbtrace_dict::{DictError, DictionaryContext};

use crate::error::TraceError;
use crate::operation::Operation;

/// Time a single backend call.
fn timed(call: impl FnOnce()) -> Duration {
    let start = Instant::now();
    call();
    start.elapsed()
}

impl Operation {
    /// Execute this operation against `db`.
    ///
    /// Operands are resolved through `ctx` first, updating the previous
    /// contract, the storage cache and the snapshot table exactly as the
    /// recorder did. Only the backend call itself is timed.
    pub fn execute(
        &self,
        db: &mut dyn StateDb,
        ctx: &mut DictionaryContext,
    ) -> Result<Duration, TraceError> {
        let elapsed = match self {
            Self::AddBalance { contract, amount } => {
                let addr = ctx.decode_contract(*contract)?;
                let amount = amount_to_u256(*amount);
                timed(|| db.add_balance(addr, amount))
            }
            Self::SubBalance { contract, amount } => {
                let addr = ctx.decode_contract(*contract)?;
                let amount = amount_to_u256(*amount);
                timed(|| db.sub_balance(addr, amount))
            }
            Self::BeginBlock { block } => {
                ctx.begin_block();
                timed(|| db.begin_block(*block))
            }
            Self::EndBlock => timed(|| db.end_block()),
            Self::BeginSyncPeriod { period } => timed(|| db.begin_sync_period(*period)),
            Self::EndSyncPeriod => timed(|| db.end_sync_period()),
            Self::BeginTransaction { tx } => {
                ctx.init_snapshots();
                timed(|| db.begin_transaction(*tx))
            }
            Self::EndTransaction => timed(|| db.end_transaction()),
            Self::CreateAccount { contract } => {
                let addr = ctx.decode_contract(*contract)?;
                timed(|| db.create_account(addr))
            }
            Self::Commit { delete_empty } => timed(|| {
                black_box(db.commit(*delete_empty));
            }),
            Self::Finalise { delete_empty } => timed(|| db.finalise(*delete_empty)),
            Self::IntermediateRoot { delete_empty } => timed(|| {
                black_box(db.intermediate_root(*delete_empty));
            }),
            Self::Empty { contract } => {
                let addr = ctx.decode_contract(*contract)?;
                timed(|| {
                    black_box(db.empty(addr));
                })
            }
            Self::Exist { contract } => {
                let addr = ctx.decode_contract(*contract)?;
                timed(|| {
                    black_box(db.exist(addr));
                })
            }
            Self::GetBalance { contract } => {
                let addr = ctx.decode_contract(*contract)?;
                timed(|| {
                    black_box(db.get_balance(addr));
                })
            }
            Self::GetCodeHash { contract } => {
                let addr = ctx.decode_contract(*contract)?;
                timed(|| {
                    black_box(db.get_code_hash(addr));
                })
            }
            Self::GetCodeHashLc => {
                let addr = ctx.previous_contract()?;
                timed(|| {
                    black_box(db.get_code_hash(addr));
                })
            }
            Self::GetCode { contract } => {
                let addr = ctx.decode_contract(*contract)?;
                timed(|| {
                    black_box(db.get_code(addr));
                })
            }
            Self::GetCodeSize { contract } => {
                let addr = ctx.decode_contract(*contract)?;
                timed(|| {
                    black_box(db.get_code_size(addr));
                })
            }
            Self::GetCommittedState { contract, storage } => {
                let addr = ctx.decode_contract(*contract)?;
                let key = ctx.decode_storage(*storage)?;
                timed(|| {
                    black_box(db.get_committed_state(addr, key));
                })
            }
            Self::GetCommittedStateLcls => {
                let addr = ctx.previous_contract()?;
                let key = ctx.lookup_storage(0)?;
                timed(|| {
                    black_box(db.get_committed_state(addr, key));
                })
            }
            Self::GetNonce { contract } => {
                let addr = ctx.decode_contract(*contract)?;
                timed(|| {
                    black_box(db.get_nonce(addr));
                })
            }
            Self::GetState { contract, storage } => {
                let addr = ctx.decode_contract(*contract)?;
                let key = ctx.decode_storage(*storage)?;
                timed(|| {
                    black_box(db.get_state(addr, key));
                })
            }
            Self::GetStateLccs { pos } => {
                let addr = ctx.previous_contract()?;
                let key = ctx.lookup_storage(*pos)?;
                timed(|| {
                    black_box(db.get_state(addr, key));
                })
            }
            Self::GetStateLc { storage } => {
                let addr = ctx.previous_contract()?;
                let key = ctx.decode_storage(*storage)?;
                timed(|| {
                    black_box(db.get_state(addr, key));
                })
            }
            Self::GetStateLcls => {
                let addr = ctx.previous_contract()?;
                let key = ctx.lookup_storage(0)?;
                timed(|| {
                    black_box(db.get_state(addr, key));
                })
            }
            Self::HasSuicided { contract } => {
                let addr = ctx.decode_contract(*contract)?;
                timed(|| {
                    black_box(db.has_suicided(addr));
                })
            }
            Self::Suicide { contract } => {
                let addr = ctx.decode_contract(*contract)?;
                timed(|| {
                    black_box(db.suicide(addr));
                })
            }
            Self::Snapshot { snapshot } => {
                let start = Instant::now();
                let replayed = db.snapshot();
                let elapsed = start.elapsed();
                ctx.add_snapshot(*snapshot, replayed);
                elapsed
            }
            Self::RevertToSnapshot { snapshot } => {
                let replayed = ctx.get_snapshot(*snapshot)?;
                timed(|| db.revert_to_snapshot(replayed))
            }
            Self::SetCode { contract, code } => {
                let addr = ctx.decode_contract(*contract)?;
                let code = ctx.decode_code(*code)?.to_vec();
                timed(|| db.set_code(addr, code))
            }
            Self::SetNonce { contract, nonce } => {
                let addr = ctx.decode_contract(*contract)?;
                timed(|| db.set_nonce(addr, *nonce))
            }
            Self::SetState {
                contract,
                storage,
                value,
            } => {
                let addr = ctx.decode_contract(*contract)?;
                let key = ctx.decode_storage(*storage)?;
                let value = ctx.decode_value(*value)?;
                timed(|| db.set_state(addr, key, value))
            }
            Self::SetStateLcls { value } => {
                let addr = ctx.previous_contract()?;
                let key = ctx.lookup_storage(0)?;
                let value = ctx.decode_value(*value)?;
                timed(|| db.set_state(addr, key, value))
            }
            Self::AddAddressToAccessList { contract } => {
                let addr = ctx.decode_contract(*contract)?;
                timed(|| db.add_address_to_access_list(addr))
            }
            Self::AddressInAccessList { contract } => {
                let addr = ctx.decode_contract(*contract)?;
                timed(|| {
                    black_box(db.address_in_access_list(addr));
                })
            }
            Self::AddSlotToAccessList { contract, storage } => {
                let addr = ctx.decode_contract(*contract)?;
                let slot = ctx.decode_storage(*storage)?;
                timed(|| db.add_slot_to_access_list(addr, slot))
            }
            Self::SlotInAccessList { contract, storage } => {
                let addr = ctx.decode_contract(*contract)?;
                let slot = ctx.decode_storage(*storage)?;
                timed(|| {
                    black_box(db.slot_in_access_list(addr, slot));
                })
            }
            Self::PrepareAccessList { sender, dest } => {
                let sender = ctx.decode_contract(*sender)?;
                let dest = dest.map(|d| ctx.decode_contract(d)).transpose()?;
                timed(|| db.prepare_access_list(sender, dest))
            }
            Self::AddLog {
                contract,
                topics,
                data,
            } => {
                let address = ctx.decode_contract(*contract)?;
                let topics = topics
                    .iter()
                    .map(|t| ctx.decode_value(*t))
                    .collect::<Result<_, DictError>>()?;
                let log = LogEntry {
                    address,
                    topics,
                    data: data.clone(),
                };
                timed(|| db.add_log(log))
            }
            Self::AddPreimage { hash, preimage } => {
                let hash = ctx.decode_value(*hash)?;
                let preimage = preimage.clone();
                timed(|| db.add_preimage(hash, preimage))
            }
            Self::AddRefund { gas } => timed(|| db.add_refund(*gas)),
            Self::SubRefund { gas } => timed(|| db.sub_refund(*gas)),
            Self::GetRefund => timed(|| {
                black_box(db.get_refund());
            }),
            Self::Close => timed(|| db.close()),
            Self::ForEachStorage { contract } => {
                let addr = ctx.decode_contract(*contract)?;
                timed(|| db.for_each_storage(addr, &mut |_, _| true))
            }
            Self::GetLogs {
                tx_hash,
                block_hash,
            } => {
                let tx_hash = ctx.decode_value(*tx_hash)?;
                let block_hash = ctx.decode_value(*block_hash)?;
                timed(|| {
                    black_box(db.get_logs(tx_hash, block_hash));
                })
            }
            Self::Prepare { tx_hash, tx_index } => {
                let tx_hash = ctx.decode_value(*tx_hash)?;
                timed(|| db.prepare(tx_hash, *tx_index))
            }
        };
        Ok(elapsed)
    }

    /// Render this operation with its operands resolved through `ctx`.
    ///
    /// Uses only non-mutating lookups, so it can be called before
    /// [`execute`](Self::execute) without disturbing the replay.
    pub fn debug(&self, ctx: &DictionaryContext) -> String {
        let args = match self {
            Self::AddBalance { contract, amount } | Self::SubBalance { contract, amount } => {
                format!("{}, {amount}", show(ctx.contract(*contract)))
            }
            Self::BeginBlock { block } => block.to_string(),
            Self::BeginSyncPeriod { period } => period.to_string(),
            Self::BeginTransaction { tx } => tx.to_string(),
            Self::Commit { delete_empty }
            | Self::Finalise { delete_empty }
            | Self::IntermediateRoot { delete_empty } => delete_empty.to_string(),
            Self::CreateAccount { contract }
            | Self::Empty { contract }
            | Self::Exist { contract }
            | Self::GetBalance { contract }
            | Self::GetCodeHash { contract }
            | Self::GetCode { contract }
            | Self::GetCodeSize { contract }
            | Self::GetNonce { contract }
            | Self::HasSuicided { contract }
            | Self::Suicide { contract }
            | Self::AddAddressToAccessList { contract }
            | Self::AddressInAccessList { contract }
            | Self::ForEachStorage { contract } => show(ctx.contract(*contract)),
            Self::GetCodeHashLc => show(ctx.previous_contract()),
            Self::GetCommittedState { contract, storage }
            | Self::GetState { contract, storage }
            | Self::AddSlotToAccessList { contract, storage }
            | Self::SlotInAccessList { contract, storage } => format!(
                "{}, {}",
                show(ctx.contract(*contract)),
                show(ctx.storage_key(*storage))
            ),
            Self::GetCommittedStateLcls | Self::GetStateLcls => format!(
                "{}, {}",
                show(ctx.previous_contract()),
                show(ctx.read_storage(0))
            ),
            Self::GetStateLccs { pos } => format!(
                "{}, {}",
                show(ctx.previous_contract()),
                show(ctx.read_storage(*pos))
            ),
            Self::GetStateLc { storage } => format!(
                "{}, {}",
                show(ctx.previous_contract()),
                show(ctx.storage_key(*storage))
            ),
            Self::RevertToSnapshot { snapshot } | Self::Snapshot { snapshot } => {
                snapshot.to_string()
            }
            Self::SetCode { contract, code } => format!(
                "{}, {}",
                show(ctx.contract(*contract)),
                show(ctx.decode_code(*code).map(|c| format!("{} bytes", c.len())))
            ),
            Self::SetNonce { contract, nonce } => {
                format!("{}, {nonce}", show(ctx.contract(*contract)))
            }
            Self::SetState {
                contract,
                storage,
                value,
            } => format!(
                "{}, {}, {}",
                show(ctx.contract(*contract)),
                show(ctx.storage_key(*storage)),
                show(ctx.decode_value(*value))
            ),
            Self::SetStateLcls { value } => format!(
                "{}, {}, {}",
                show(ctx.previous_contract()),
                show(ctx.read_storage(0)),
                show(ctx.decode_value(*value))
            ),
            Self::PrepareAccessList { sender, dest } => match dest {
                Some(dest) => format!(
                    "{}, {}",
                    show(ctx.contract(*sender)),
                    show(ctx.contract(*dest))
                ),
                None => format!("{}, none", show(ctx.contract(*sender))),
            },
            Self::AddLog {
                contract,
                topics,
                data,
            } => format!(
                "{}, {} topics, {} bytes",
                show(ctx.contract(*contract)),
                topics.len(),
                data.len()
            ),
            Self::AddPreimage { hash, preimage } => {
                format!("{}, {} bytes", show(ctx.decode_value(*hash)), preimage.len())
            }
            Self::AddRefund { gas } | Self::SubRefund { gas } => gas.to_string(),
            Self::GetLogs {
                tx_hash,
                block_hash,
            } => format!(
                "{}, {}",
                show(ctx.decode_value(*tx_hash)),
                show(ctx.decode_value(*block_hash))
            ),
            Self::Prepare { tx_hash, tx_index } => {
                format!("{}, {tx_index}", show(ctx.decode_value(*tx_hash)))
            }
            Self::EndBlock
            | Self::EndSyncPeriod
            | Self::EndTransaction
            | Self::Close
            | Self::GetRefund => return self.id().label().to_string(),
        };
        format!("{}: {args}", self.id().label())
    }
}

fn show<T: Debug>(resolved: Result<T, DictError>) -> String {
    match resolved {
        Ok(v) => format!("{v:?}"),
        Err(e) => format!("<{e}>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdbtrace_core::{Address, Hash};
    use sdbtrace_test_utils::{InMemoryStateDb, MockStateDb, StateCall};

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn key(n: u64) -> Hash {
        Hash::from_low_u64_be(n)
    }

    #[test]
    fn delta_variant_resolves_like_full_variant() {
        let mut ctx = DictionaryContext::new();
        let c = ctx.encode_contract(addr(5)).unwrap();
        let (s, _) = ctx.encode_storage(key(6)).unwrap();
        ctx.begin_block();

        let mut full = MockStateDb::new();
        Operation::GetState {
            contract: c,
            storage: s,
        }
        .execute(&mut full, &mut ctx)
        .unwrap();
        let mut delta = MockStateDb::new();
        Operation::GetStateLc { storage: s }
            .execute(&mut delta, &mut ctx)
            .unwrap();
        Operation::GetStateLcls
            .execute(&mut delta, &mut ctx)
            .unwrap();

        assert_eq!(full.calls(), &[StateCall::GetState(addr(5), key(6))]);
        assert_eq!(
            delta.calls(),
            &[
                StateCall::GetState(addr(5), key(6)),
                StateCall::GetState(addr(5), key(6))
            ]
        );
    }

    #[test]
    fn lc_variant_without_previous_contract_fails() {
        let mut ctx = DictionaryContext::new();
        let mut db = MockStateDb::new();
        let err = Operation::GetCodeHashLc
            .execute(&mut db, &mut ctx)
            .unwrap_err();
        assert!(matches!(
            err,
            TraceError::Dict(DictError::UndefinedPreviousContract)
        ));
        assert!(db.calls().is_empty());
    }

    #[test]
    fn snapshots_are_translated() {
        let mut ctx = DictionaryContext::new();
        let mut db = MockStateDb::new();
        db.set_snapshot_base(100);

        Operation::BeginTransaction { tx: 0 }
            .execute(&mut db, &mut ctx)
            .unwrap();
        Operation::Snapshot { snapshot: 0 }
            .execute(&mut db, &mut ctx)
            .unwrap();
        Operation::RevertToSnapshot { snapshot: 0 }
            .execute(&mut db, &mut ctx)
            .unwrap();
        assert_eq!(db.calls().last(), Some(&StateCall::RevertToSnapshot(100)));

        // A new transaction forgets the mapping.
        Operation::BeginTransaction { tx: 1 }
            .execute(&mut db, &mut ctx)
            .unwrap();
        assert!(Operation::RevertToSnapshot { snapshot: 0 }
            .execute(&mut db, &mut ctx)
            .is_err());
    }

    #[test]
    fn set_state_lcls_writes_through() {
        let mut ctx = DictionaryContext::new();
        let c = ctx.encode_contract(addr(1)).unwrap();
        let (s, _) = ctx.encode_storage(key(2)).unwrap();
        let v = ctx.encode_value(key(3)).unwrap();
        ctx.begin_block();

        let mut db = InMemoryStateDb::new();
        Operation::GetState {
            contract: c,
            storage: s,
        }
        .execute(&mut db, &mut ctx)
        .unwrap();
        Operation::SetStateLcls { value: v }
            .execute(&mut db, &mut ctx)
            .unwrap();
        assert_eq!(db.get_state(addr(1), key(2)), key(3));
    }

    #[test]
    fn debug_output_resolves_operands() {
        let mut ctx = DictionaryContext::new();
        let c = ctx.encode_contract(addr(0xabc)).unwrap();
        let text = Operation::GetBalance { contract: c }.debug(&ctx);
        assert!(text.starts_with("GetBalance: 0x"));
        assert!(text.ends_with("abc"));

        let text = Operation::GetBalance { contract: 99 }.debug(&ctx);
        assert!(text.contains("out of range"));
        assert_eq!(Operation::EndBlock.debug(&ctx), "EndBlock");
    }
}
