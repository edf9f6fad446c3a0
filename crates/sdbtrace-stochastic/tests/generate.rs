//! Generating traces, replaying them and estimating models from them.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use sdbtrace_replay::{open_for_replay, Operation, OperationId, Replayer, TraceWriter};
use sdbtrace_stochastic::{
    generate, Distributions, EventRegistry, Generator, GeneratorConfig, GeneratorError,
    SimulationModel, TransitionMatrix, UniformConfig,
};
use sdbtrace_test_utils::InMemoryStateDb;

fn uniform() -> SimulationModel {
    SimulationModel::uniform(&UniformConfig {
        block_length: 4,
        sync_period_length: 5,
        transaction_length: 20,
        ..UniformConfig::default()
    })
    .unwrap()
}

fn generator(model: &SimulationModel, seed: u64, length: u64) -> Generator {
    let config = GeneratorConfig {
        seed,
        ..GeneratorConfig::default()
    };
    Generator::new(
        model.to_matrix().unwrap(),
        model.to_distributions().unwrap(),
        config,
        length,
    )
    .unwrap()
}

fn ops(generator: Generator) -> Vec<Operation> {
    generator.collect::<Result<_, _>>().unwrap()
}

/// Write `length` operations of `model` to a trace in `dir`.
fn write_trace(dir: &std::path::Path, model: &SimulationModel, length: u64) -> (PathBuf, Generator) {
    let path = dir.join("generated.trace");
    let mut g = generator(model, 7, length);
    let mut writer = TraceWriter::create(&path, g.state().next_block()).unwrap();
    assert_eq!(g.write_to(&mut writer).unwrap(), length);
    writer.finish().unwrap();
    (path, g)
}

#[test]
fn one_hot_row_is_deterministic() {
    let m = TransitionMatrix::one_hot(OperationId::BeginSyncPeriod, OperationId::BeginBlock);
    for seed in 0..10 {
        let config = GeneratorConfig {
            seed,
            ..GeneratorConfig::default()
        };
        let g = Generator::new(m.clone(), Distributions::default(), config, 2).unwrap();
        assert_eq!(
            ops(g),
            vec![
                Operation::BeginSyncPeriod { period: 1 },
                Operation::BeginBlock { block: 1 },
            ]
        );
    }
}

#[test]
fn equal_seeds_give_equal_traces() {
    let model = uniform();
    assert_eq!(ops(generator(&model, 3, 2_000)), ops(generator(&model, 3, 2_000)));
    assert_ne!(ops(generator(&model, 3, 2_000)), ops(generator(&model, 4, 2_000)));
}

#[test]
fn infeasible_successor_exhausts() {
    // After BeginSyncPeriod the only successor is another BeginSyncPeriod.
    let m = TransitionMatrix::one_hot(OperationId::BeginSyncPeriod, OperationId::BeginSyncPeriod);
    let mut g = generate(m, Distributions::default(), 5).unwrap();
    assert!(g.next().unwrap().is_ok());
    assert!(matches!(
        g.next(),
        Some(Err(GeneratorError::Exhausted {
            from: OperationId::BeginSyncPeriod
        }))
    ));
    assert!(g.next().is_none());
}

#[test]
fn uniform_model_respects_nesting() {
    let trace = ops(generator(&uniform(), 11, 20_000));
    assert_eq!(trace.len(), 20_000);

    let (mut sync, mut block, mut tx) = (false, false, false);
    let mut open_snapshots = 0;
    let mut last_block = 0;
    for op in &trace {
        match op {
            Operation::BeginSyncPeriod { .. } => {
                assert!(!sync && !block);
                sync = true;
            }
            Operation::EndSyncPeriod => {
                assert!(sync && !block);
                sync = false;
            }
            Operation::BeginBlock { block: number } => {
                assert!(!block);
                assert_eq!(*number, last_block + 1);
                last_block = *number;
                block = true;
            }
            Operation::EndBlock => {
                assert!(block && !tx);
                block = false;
            }
            Operation::BeginTransaction { .. } => {
                assert!(block && !tx);
                tx = true;
                open_snapshots = 0;
            }
            Operation::EndTransaction => {
                assert!(tx);
                tx = false;
            }
            Operation::Snapshot { snapshot } => {
                assert!(tx);
                assert_eq!(*snapshot, open_snapshots);
                open_snapshots += 1;
            }
            Operation::RevertToSnapshot { snapshot } => {
                assert!(*snapshot < open_snapshots);
                open_snapshots = *snapshot;
            }
            _ => assert!(tx, "{op:?} outside a transaction"),
        }
    }
    assert!(trace.iter().any(|op| op.id() == OperationId::EndSyncPeriod));
    assert!(trace.iter().any(|op| op.id() == OperationId::GetStateLcls));
}

#[test]
fn generated_trace_replays() {
    let dir = tempfile::tempdir().unwrap();
    let (path, g) = write_trace(dir.path(), &uniform(), 5_000);

    let mut trace = open_for_replay(&[path], 0, u64::MAX).unwrap();
    let mut replayer = Replayer::new(g.into_context()).with_profiling(true);
    let mut db = InMemoryStateDb::new();
    let summary = replayer.run(&mut trace, &mut db).unwrap();

    // The leading BeginSyncPeriod precedes the first indexed block.
    assert_eq!(summary.operations, 4_999);
    assert_eq!(summary.first_block, Some(1));
    let profile = replayer.profile().unwrap();
    assert_eq!(profile.total_count(), 4_999);
    assert!(profile.count(OperationId::SetState) > 0);
    assert!(!db.accounts().is_empty());
}

#[test]
fn model_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("simulation.json");
    let model = uniform();
    model.write_file(&path).unwrap();

    let back = SimulationModel::read_file(&path).unwrap();
    assert_eq!(back.operations, model.operations);
    assert_eq!(back.to_distributions().unwrap(), model.to_distributions().unwrap());
    assert_eq!(ops(generator(&back, 5, 300)).len(), 300);
}

#[test]
fn estimated_model_matches_generating_model() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = write_trace(dir.path(), &uniform(), 20_000);

    let mut registry = EventRegistry::new();
    registry
        .observe_trace(&mut open_for_replay(&[path], 0, u64::MAX).unwrap())
        .unwrap();
    let estimated = registry.estimate().unwrap();
    let m = estimated.to_matrix().unwrap();
    assert_eq!(m.get(OperationId::BeginBlock, OperationId::BeginTransaction), 1.0);
    let leave = m.get(OperationId::GetBalance, OperationId::EndTransaction);
    assert!((0.02..0.09).contains(&leave), "GetBalance -> EndTransaction {leave}");

    let contracts = estimated.to_distributions().unwrap().contract;
    assert!(
        (0.07..0.13).contains(&contracts.new_value_probability),
        "contract new value probability {}",
        contracts.new_value_probability
    );
    assert!(contracts.population > 0);
}

/// Contract operands an operation names explicitly, in draw order.
fn contracts_of(op: &Operation) -> Vec<u32> {
    match op {
        Operation::AddBalance { contract, .. }
        | Operation::SubBalance { contract, .. }
        | Operation::CreateAccount { contract }
        | Operation::Empty { contract }
        | Operation::Exist { contract }
        | Operation::GetBalance { contract }
        | Operation::GetCodeHash { contract }
        | Operation::GetCode { contract }
        | Operation::GetCodeSize { contract }
        | Operation::GetNonce { contract }
        | Operation::HasSuicided { contract }
        | Operation::SetNonce { contract, .. }
        | Operation::Suicide { contract }
        | Operation::AddAddressToAccessList { contract }
        | Operation::AddressInAccessList { contract }
        | Operation::ForEachStorage { contract }
        | Operation::GetCommittedState { contract, .. }
        | Operation::GetState { contract, .. }
        | Operation::AddSlotToAccessList { contract, .. }
        | Operation::SlotInAccessList { contract, .. }
        | Operation::SetState { contract, .. }
        | Operation::SetCode { contract, .. }
        | Operation::AddLog { contract, .. } => vec![*contract],
        Operation::PrepareAccessList { sender, dest } => {
            std::iter::once(*sender).chain(*dest).collect()
        }
        _ => Vec::new(),
    }
}

#[test]
fn balances_never_go_negative() {
    let mut g = generator(&uniform(), 17, 30_000);
    let trace: Vec<Operation> = g.by_ref().collect::<Result<_, _>>().unwrap();

    // Replays balances the way a state database with snapshots would.
    let mut current: HashMap<u32, u128> = HashMap::new();
    let mut snapshots: Vec<HashMap<u32, u128>> = Vec::new();
    let mut withdrawals = 0;
    for op in &trace {
        match op {
            Operation::AddBalance { contract, amount } => {
                *current.entry(*contract).or_default() += amount;
            }
            Operation::SubBalance { contract, amount } => {
                let balance = current.entry(*contract).or_default();
                assert!(*amount <= *balance, "{op:?} exceeds balance {balance}");
                *balance -= amount;
                if *amount > 0 {
                    withdrawals += 1;
                }
            }
            Operation::Suicide { contract } => {
                current.insert(*contract, 0);
            }
            Operation::Snapshot { snapshot } => {
                assert_eq!(*snapshot as usize, snapshots.len());
                snapshots.push(current.clone());
            }
            Operation::RevertToSnapshot { snapshot } => {
                snapshots.truncate(*snapshot as usize + 1);
                current = snapshots.pop().unwrap();
            }
            Operation::BeginTransaction { .. } | Operation::EndTransaction => snapshots.clear(),
            _ => {}
        }
    }
    assert!(withdrawals > 0);
    for (contract, balance) in &current {
        if !g.state().is_retired(*contract) {
            assert_eq!(g.state().balance(*contract), *balance, "contract {contract}");
        }
    }
}

#[test]
fn suicided_contracts_are_not_reused() {
    let trace = ops(generator(&uniform(), 19, 30_000));

    // Suicides of the open transaction, with the snapshot level they were
    // made at.
    let mut destroyed: Vec<(u32, i32)> = Vec::new();
    let mut retired = HashSet::new();
    let mut open_snapshots = 0;
    let mut previous = None;
    for op in &trace {
        let named = contracts_of(op);
        for contract in &named {
            assert!(!retired.contains(contract), "{op:?} draws retired contract");
        }
        match op {
            Operation::BeginBlock { .. } => previous = None,
            Operation::GetCodeHashLc
            | Operation::GetStateLc { .. }
            | Operation::GetStateLcls
            | Operation::GetStateLccs { .. }
            | Operation::GetCommittedStateLcls
            | Operation::SetStateLcls { .. } => {
                let contract = previous.expect("delta form without a previous contract");
                assert!(!retired.contains(&contract), "{op:?} reuses retired contract");
            }
            Operation::Suicide { contract } => destroyed.push((*contract, open_snapshots)),
            Operation::Snapshot { snapshot } => open_snapshots = snapshot + 1,
            Operation::RevertToSnapshot { snapshot } => {
                open_snapshots = *snapshot;
                destroyed.retain(|&(_, level)| level <= *snapshot);
            }
            Operation::BeginTransaction { .. } | Operation::EndTransaction => {
                retired.extend(destroyed.drain(..).map(|(contract, _)| contract));
                open_snapshots = 0;
            }
            _ => {}
        }
        if let Some(last) = named.last() {
            previous = Some(*last);
        }
    }
    assert!(!retired.is_empty());
}
