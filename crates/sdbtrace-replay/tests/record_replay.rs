//! Recording traces to disk and replaying block ranges from them.

use std::fs;
use std::path::{Path, PathBuf};

use sdbtrace_core::{address_from_index, hash_from_index, LogEntry, StateDb, U256};
use sdbtrace_dict::{DictionaryContext, DictionaryLimits};
use sdbtrace_replay::profile::CSV_HEADER;
use sdbtrace_replay::trace_file::index_path;
use sdbtrace_replay::{
    open_for_record, open_for_replay, ConfigError, Operation, OperationId, RecordSession,
    Recorder, Replayer, TraceConfig, TraceError, TraceWriter,
};
use sdbtrace_test_utils::InMemoryStateDb;

/// Write `blocks` as a trace whose blocks each hold one `EndBlock`.
fn write_blocks(path: &Path, blocks: std::ops::RangeInclusive<u64>) {
    let mut writer = TraceWriter::create(path, *blocks.start()).unwrap();
    for block in blocks {
        writer
            .write_operation(&Operation::BeginBlock { block })
            .unwrap();
        writer.write_operation(&Operation::AddRefund { gas: block }).unwrap();
        writer.write_operation(&Operation::EndBlock).unwrap();
    }
    writer.finish().unwrap();
}

fn collect(paths: &[PathBuf], first: u64, last: u64) -> Vec<Operation> {
    open_for_replay(paths, first, last)
        .unwrap()
        .operations()
        .collect::<Result<_, _>>()
        .unwrap()
}

fn blocks_of(ops: &[Operation]) -> Vec<u64> {
    ops.iter()
        .filter_map(|op| match op {
            Operation::BeginBlock { block } => Some(*block),
            _ => None,
        })
        .collect()
}

/// A workload that exercises every delta form, snapshots and the extended
/// transaction surface.
fn run_workload(db: &mut dyn StateDb, blocks: std::ops::RangeInclusive<u64>) {
    for block in blocks {
        db.begin_block(block);
        for tx in 0..3u32 {
            db.begin_transaction(tx);
            db.prepare(hash_from_index(block * 100 + u64::from(tx)), tx as i32);
            let sender = address_from_index(u64::from(tx));
            let dest = address_from_index(10 + block % 4);
            db.prepare_access_list(sender, Some(dest));
            db.add_balance(dest, U256::from(block * 1_000 + u64::from(tx)));
            db.sub_balance(sender, U256::from(1));
            db.set_nonce(sender, block + u64::from(tx));
            for slot in 0..6u64 {
                let key = hash_from_index(slot % 4);
                let current = db.get_state(dest, key);
                db.get_state(dest, key);
                db.set_state(dest, key, hash_from_index(current.to_low_u64_be() + slot + 1));
                db.get_committed_state(dest, key);
            }
            let snapshot = db.snapshot();
            db.set_state(dest, hash_from_index(99), hash_from_index(7));
            db.add_refund(21_000);
            db.revert_to_snapshot(snapshot);
            if tx == 1 {
                db.set_code(dest, vec![0x60, 0x80, block as u8]);
            }
            db.get_code_hash(dest);
            db.get_code_hash(sender);
            db.add_slot_to_access_list(dest, hash_from_index(3));
            db.slot_in_access_list(dest, hash_from_index(3));
            db.add_log(LogEntry {
                address: dest,
                topics: [hash_from_index(1), hash_from_index(block)]
                    .into_iter()
                    .collect(),
                data: vec![tx as u8; 4],
            });
            db.add_preimage(hash_from_index(500 + block), vec![1, 2, 3]);
            db.finalise(true);
            db.end_transaction();
        }
        db.intermediate_root(true);
        db.end_block();
    }
}

#[test]
fn single_block_range_yields_exactly_its_operations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace-10");
    let mut session = open_for_record(&path, 10).unwrap();
    let ops = [
        Operation::BeginBlock { block: 10 },
        Operation::SetState {
            contract: 0,
            storage: 0,
            value: 0,
        },
        Operation::EndBlock,
    ];
    for op in &ops {
        session.write(op).unwrap();
    }
    session.finish().unwrap();

    let mut iter = open_for_replay(&[path], 10, 10).unwrap();
    for expected in &ops {
        assert!(iter.next().unwrap());
        assert_eq!(iter.value(), Some(expected));
    }
    assert!(!iter.next().unwrap());
    assert_eq!(iter.value(), None);
    assert_eq!(iter.operations_read(), 3);
}

#[test]
fn block_range_spans_trace_files() {
    let dir = tempfile::tempdir().unwrap();
    let paths = vec![
        dir.path().join("a"),
        dir.path().join("b"),
        dir.path().join("c"),
    ];
    write_blocks(&paths[0], 1..=4);
    write_blocks(&paths[1], 5..=9);
    write_blocks(&paths[2], 10..=12);

    let ops = collect(&paths, 3, 7);
    assert_eq!(blocks_of(&ops), vec![3, 4, 5, 6, 7]);
    assert_eq!(ops.len(), 15);
    assert_eq!(ops.last(), Some(&Operation::EndBlock));

    // Selection does not depend on the order paths are given in.
    let reversed: Vec<_> = paths.iter().rev().cloned().collect();
    assert_eq!(blocks_of(&collect(&reversed, 9, 11)), vec![9, 10, 11]);
    assert_eq!(blocks_of(&collect(&paths, 12, 100)), vec![12]);
}

#[test]
fn range_outside_every_trace_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a");
    write_blocks(&path, 5..=6);
    assert!(matches!(
        open_for_replay(&[path.clone()], 1, 3),
        Err(TraceError::NoTraceFiles { first: 1, last: 3 })
    ));
    assert!(matches!(
        open_for_replay(&[path], 6, 5),
        Err(TraceError::InvalidBlockRange { .. })
    ));
}

#[test]
fn traces_starting_at_the_same_block_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    write_blocks(&a, 5..=6);
    write_blocks(&b, 5..=7);
    assert!(matches!(
        open_for_replay(&[a, b], 5, 6),
        Err(TraceError::DuplicateTraceStart { block: 5, .. })
    ));
}

#[test]
fn missing_index_sidecar_is_rebuilt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace");
    write_blocks(&path, 20..=25);
    let with_index = collect(&[path.clone()], 22, 23);

    fs::remove_file(index_path(&path)).unwrap();
    let rebuilt = collect(&[path], 22, 23);
    assert_eq!(rebuilt, with_index);
    assert_eq!(blocks_of(&rebuilt), vec![22, 23]);
}

#[test]
fn recorded_workload_replays_to_the_same_state() {
    let dir = tempfile::tempdir().unwrap();
    let trace = dir.path().join("trace");
    let dicts = dir.path().join("dictionaries");

    let mut recorder = Recorder::new(InMemoryStateDb::new(), open_for_record(&trace, 1).unwrap());
    run_workload(&mut recorder, 1..=6);
    let (original, ctx, index) = recorder.finish().unwrap();
    assert_eq!(index.len(), 6);
    ctx.write(&dicts).unwrap();

    let ctx = DictionaryContext::read(&dicts, DictionaryLimits::default()).unwrap();
    let mut replayer = Replayer::new(ctx).with_profiling(true).with_debug(true);
    let mut replayed = InMemoryStateDb::new();
    let mut iter = open_for_replay(&[trace], 1, 6).unwrap();
    let summary = replayer.run(&mut iter, &mut replayed).unwrap();

    assert_eq!(summary.blocks, 6);
    assert_eq!(summary.first_block, Some(1));
    assert_eq!(summary.last_block, Some(6));
    assert_eq!(replayed.accounts(), original.accounts());
    assert_eq!(replayed.state_root(), original.state_root());

    let profile = replayer.profile().unwrap();
    assert_eq!(profile.count(OperationId::BeginBlock), 6);
    assert_eq!(profile.total_count(), summary.operations);
    // The workload reads each key twice in a row.
    assert!(profile.count(OperationId::GetStateLcls) > 0);
}

#[test]
fn replay_can_start_mid_trace() {
    let dir = tempfile::tempdir().unwrap();
    let trace = dir.path().join("trace");
    let session = RecordSession::create(&trace, 1).unwrap();
    let mut recorder = Recorder::new(InMemoryStateDb::new(), session);
    run_workload(&mut recorder, 1..=5);
    let (_, ctx, _) = recorder.finish().unwrap();

    let mut replayer = Replayer::new(ctx);
    let mut db = InMemoryStateDb::new();
    let mut iter = open_for_replay(&[trace.clone()], 4, 5).unwrap();
    let summary = replayer.run(&mut iter, &mut db).unwrap();
    assert_eq!(summary.first_block, Some(4));
    assert_eq!(summary.blocks, 2);

    let all = collect(&[trace], 1, 5);
    let tail_start = all
        .iter()
        .position(|op| *op == Operation::BeginBlock { block: 4 })
        .unwrap();
    assert_eq!(summary.operations, (all.len() - tail_start) as u64);
}

#[test]
fn configured_session_records_and_profiles() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("profile.csv");
    let config = TraceConfig {
        dictionary_dir: dir.path().join("dictionaries"),
        trace_dir: dir.path().join("traces"),
        first_block: 2,
        last_block: 3,
        compression_level: 3,
        write_buffer_size: 4096,
        read_buffer_size: 4096,
        profile: true,
        profile_csv: Some(csv.clone()),
        ..TraceConfig::default()
    };
    fs::create_dir_all(&config.trace_dir).unwrap();

    let session =
        RecordSession::from_config(&config, &config.trace_dir.join("blocks-1"), 1).unwrap();
    let mut recorder = Recorder::new(InMemoryStateDb::new(), session);
    run_workload(&mut recorder, 1..=4);
    let (_, ctx, _) = recorder.finish().unwrap();
    ctx.write(&config.dictionary_dir).unwrap();

    let mut replayer = Replayer::from_config(&config).unwrap();
    let mut db = InMemoryStateDb::new();
    let summary = replayer
        .run(&mut config.open_replay().unwrap(), &mut db)
        .unwrap();
    assert_eq!(summary.blocks, 2);

    let report = fs::read_to_string(&csv).unwrap();
    let mut lines = report.lines();
    assert_eq!(lines.next(), Some(CSV_HEADER));
    let rows: Vec<&str> = lines.collect();
    assert!(rows.iter().any(|row| row.starts_with("BeginBlock,2,3,2,")), "{report}");

    // A second run appends rows without repeating the header.
    replayer
        .run(&mut config.open_replay().unwrap(), &mut InMemoryStateDb::new())
        .unwrap();
    let report = fs::read_to_string(&csv).unwrap();
    assert_eq!(report.matches(CSV_HEADER).count(), 1);
    assert_eq!(report.lines().count(), 1 + 2 * rows.len());
}

#[test]
fn replayer_rejects_invalid_config() {
    let config = TraceConfig {
        first_block: 9,
        last_block: 3,
        ..TraceConfig::default()
    };
    assert!(matches!(
        Replayer::from_config(&config),
        Err(TraceError::Config(ConfigError::InvalidBlockRange { first: 9, last: 3 }))
    ));
}
