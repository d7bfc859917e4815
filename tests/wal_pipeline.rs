//! End-to-end pipeline tests: WAL writers → sequencer → notification queue
//! → apply workers → table writer.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;
use tessera_apply::testing::{seed_table, MemTableWriter};
use tessera_apply::{ApplyWalJob, ApplyWorkerPool, NotificationQueue, WriterPool};
use tessera_core::{AlterOp, Cell, ColumnMeta, ColumnType, TableMetadata, TableWriter};
use tessera_wal::{SequencerRegistry, TxnNotification, TxnNotifier, WalConfig, WalWriter};

fn trades_metadata(name: &str) -> TableMetadata {
    TableMetadata::new(
        name,
        vec![
            ColumnMeta::new("ts", ColumnType::Timestamp),
            ColumnMeta::new("price", ColumnType::Double),
            ColumnMeta::new("tag", ColumnType::Long),
        ],
        Some(0),
    )
    .unwrap()
}

struct Pipeline {
    _root: tempfile::TempDir,
    root: std::path::PathBuf,
    registry: Arc<SequencerRegistry>,
    queue: Arc<NotificationQueue>,
    pool: Arc<WriterPool<MemTableWriter>>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn pipeline(tables: &[&str]) -> Pipeline {
    init_tracing();
    let dir = tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let registry = Arc::new(SequencerRegistry::new());
    let queue = Arc::new(NotificationQueue::new());
    registry.set_notifier(Arc::clone(&queue) as Arc<dyn TxnNotifier>);
    let pool = Arc::new(WriterPool::new());
    for table in tables {
        seed_table(&root, &registry, trades_metadata(table), &[]).unwrap();
        pool.register(MemTableWriter::new(trades_metadata(table)));
    }
    Pipeline {
        _root: dir,
        root,
        registry,
        queue,
        pool,
    }
}

fn wait_for_queue_drain(queue: &NotificationQueue) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !queue.is_empty() {
        assert!(Instant::now() < deadline, "notification queue did not drain");
        std::thread::sleep(Duration::from_millis(10));
    }
    // give in-flight workers a moment to finish their drains
    std::thread::sleep(Duration::from_millis(100));
}

#[test]
fn two_writer_race_applies_in_global_txn_order() {
    let env = pipeline(&["trades"]);
    let seq = env.registry.get("trades").unwrap();

    let mut w1 = WalWriter::open(
        env.root.join("trades"),
        Arc::clone(&seq),
        WalConfig::for_testing(),
    )
    .unwrap();
    let mut w2 = WalWriter::open(
        env.root.join("trades"),
        Arc::clone(&seq),
        WalConfig::for_testing(),
    )
    .unwrap();

    for ts in 100..110 {
        let mut row = w1.new_row(ts).unwrap();
        row.put_double(1, ts as f64).unwrap();
        row.append().unwrap();
    }
    for ts in 110..120 {
        let mut row = w2.new_row(ts).unwrap();
        row.put_double(1, ts as f64).unwrap();
        row.append().unwrap();
    }
    // W1 wins the txn race, W2 follows
    assert_eq!(w1.commit().unwrap(), Some(1));
    assert_eq!(w2.commit().unwrap(), Some(2));

    // apply job starts fresh, after both commits returned
    let workers = ApplyWorkerPool::start(
        2,
        env.root.clone(),
        Arc::clone(&env.queue),
        Arc::clone(&env.registry),
        Arc::clone(&env.pool),
    );
    wait_for_queue_drain(&env.queue);
    workers.shutdown();

    env.pool
        .try_with_writer("trades", "inspect", |table| {
            assert_eq!(table.row_count(), 20);
            assert_eq!(table.seq_txn(), 2);
            let expected: Vec<i64> = (100..120).collect();
            assert_eq!(table.timestamps(), expected);
        })
        .unwrap();
}

#[test]
fn concurrent_writers_apply_gap_free() {
    const WRITERS: usize = 3;
    const TXNS_PER_WRITER: u64 = 25;
    const ROWS_PER_TXN: u64 = 2;

    let env = pipeline(&["trades"]);
    let workers = ApplyWorkerPool::start(
        4,
        env.root.clone(),
        Arc::clone(&env.queue),
        Arc::clone(&env.registry),
        Arc::clone(&env.pool),
    );

    let mut handles = Vec::new();
    for writer_index in 0..WRITERS {
        let registry = Arc::clone(&env.registry);
        let table_dir = env.root.join("trades");
        handles.push(std::thread::spawn(move || {
            let seq = registry.get("trades").unwrap();
            let mut writer =
                WalWriter::open(&table_dir, seq, WalConfig::for_testing()).unwrap();
            for txn_index in 0..TXNS_PER_WRITER {
                for row_index in 0..ROWS_PER_TXN {
                    let ts = (txn_index * ROWS_PER_TXN + row_index) as i64;
                    let mut row = writer.new_row(ts).unwrap();
                    // tag rows with (writer, local txn) to check per-writer order
                    row.put_long(2, (writer_index as i64) << 32 | txn_index as i64)
                        .unwrap();
                    row.append().unwrap();
                }
                writer.commit().unwrap().unwrap();
                if txn_index % 7 == 0 {
                    std::thread::sleep(Duration::from_millis(
                        rand::random::<u64>() % 3,
                    ));
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let total_txns = (WRITERS as u64) * TXNS_PER_WRITER;
    let seq = env.registry.get("trades").unwrap();
    assert_eq!(seq.last_txn(), total_txns);

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if env.queue.is_empty() {
            std::thread::sleep(Duration::from_millis(100));
            if env.queue.is_empty() {
                break;
            }
        }
        assert!(Instant::now() < deadline, "apply did not catch up");
        std::thread::sleep(Duration::from_millis(10));
    }
    workers.shutdown();

    env.pool
        .try_with_writer("trades", "inspect", |table| {
            assert_eq!(table.seq_txn(), total_txns);
            assert_eq!(
                table.row_count() as u64,
                total_txns * ROWS_PER_TXN,
                "every committed row applied exactly once"
            );
            // within each writer, local txns must appear in commit order
            let mut last_local: Vec<i64> = vec![-1; WRITERS];
            for row in 0..table.row_count() {
                let Some(Cell::Long(tag)) = table.cell(row, 2) else {
                    panic!("missing tag in row {row}");
                };
                let writer_index = (tag >> 32) as usize;
                let local_txn = tag & u32::MAX as i64;
                assert!(local_txn >= last_local[writer_index]);
                last_local[writer_index] = local_txn;
            }
        })
        .unwrap();
}

#[test]
fn duplicate_and_reordered_notifications_apply_once() {
    let env = pipeline(&["trades"]);
    let seq = env.registry.get("trades").unwrap();
    let table_id = seq.table_id();

    let mut writer = WalWriter::open(
        env.root.join("trades"),
        Arc::clone(&seq),
        WalConfig::for_testing(),
    )
    .unwrap();
    for batch in 0..3i64 {
        let mut row = writer.new_row(batch * 10).unwrap();
        row.put_double(1, batch as f64).unwrap();
        row.append().unwrap();
        writer.commit().unwrap();
    }

    // drop the organic notifications; deliver duplicates, out of order
    while env.queue.try_pop().is_some() {}
    let mut job = ApplyWalJob::new(
        env.root.clone(),
        Arc::clone(&env.registry),
        Arc::clone(&env.pool),
    );
    for txn in [3u64, 1, 3, 2, 1] {
        job.process(&TxnNotification {
            table_id,
            table_name: "trades".to_string(),
            txn,
        });
    }

    env.pool
        .try_with_writer("trades", "inspect", |table| {
            assert_eq!(table.row_count(), 3);
            assert_eq!(table.seq_txn(), 3);
        })
        .unwrap();
}

#[test]
fn structure_change_between_commits_replays_in_version_order() {
    let env = pipeline(&["trades"]);
    let seq = env.registry.get("trades").unwrap();

    let mut writer = WalWriter::open(
        env.root.join("trades"),
        Arc::clone(&seq),
        WalConfig::for_testing(),
    )
    .unwrap();

    // txn 1: data under version 0
    {
        let mut row = writer.new_row(10).unwrap();
        row.put_double(1, 1.5).unwrap();
        row.append().unwrap();
    }
    writer.commit().unwrap();

    // txn 2: add a symbol column
    writer
        .apply_alter(&AlterOp::AddColumn {
            name: "side".to_string(),
            column_type: ColumnType::Symbol,
        })
        .unwrap();

    // txn 3: data under version 1, using the new column
    {
        let mut row = writer.new_row(20).unwrap();
        row.put_symbol(3, Some("buy")).unwrap();
        row.append().unwrap();
    }
    writer.commit().unwrap();

    let workers = ApplyWorkerPool::start(
        2,
        env.root.clone(),
        Arc::clone(&env.queue),
        Arc::clone(&env.registry),
        Arc::clone(&env.pool),
    );
    wait_for_queue_drain(&env.queue);
    workers.shutdown();

    env.pool
        .try_with_writer("trades", "inspect", |table| {
            assert_eq!(table.seq_txn(), 3);
            assert_eq!(table.structure_version(), 1);
            assert_eq!(table.row_count(), 2);
            // the pre-change row reads back as a typed null in the new column
            assert_eq!(table.cell(0, 3), Some(Cell::Symbol(None)));
            assert_eq!(table.cell(1, 3), Some(Cell::Symbol(Some("buy".to_string()))));
        })
        .unwrap();
}

#[test]
fn symbol_overlay_survives_the_full_pipeline() {
    let dir = tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let registry = Arc::new(SequencerRegistry::new());
    let queue = Arc::new(NotificationQueue::new());
    registry.set_notifier(Arc::clone(&queue) as Arc<dyn TxnNotifier>);

    let metadata = TableMetadata::new(
        "quotes",
        vec![
            ColumnMeta::new("ts", ColumnType::Timestamp),
            ColumnMeta::new("sym", ColumnType::Symbol),
        ],
        Some(0),
    )
    .unwrap();
    // the base table already interned two symbols
    seed_table(
        &root,
        &registry,
        metadata.clone(),
        &[("sym", vec!["BTC-USD".to_string(), "ETH-USD".to_string()])],
    )
    .unwrap();
    let pool = Arc::new(WriterPool::new());
    pool.register(MemTableWriter::new(metadata));

    let seq = registry.get("quotes").unwrap();
    let mut writer = WalWriter::open(
        root.join("quotes"),
        Arc::clone(&seq),
        WalConfig::for_testing(),
    )
    .unwrap();
    for (ts, sym) in [
        (1, Some("ETH-USD")),
        (2, Some("SOL-USD")),
        (3, None),
        (4, Some("SOL-USD")),
    ] {
        let mut row = writer.new_row(ts).unwrap();
        row.put_symbol(1, sym).unwrap();
        row.append().unwrap();
    }
    writer.commit().unwrap();

    let mut job = ApplyWalJob::new(root.clone(), Arc::clone(&registry), Arc::clone(&pool));
    while let Some(notification) = queue.try_pop() {
        job.process(&notification);
    }

    pool.try_with_writer("quotes", "inspect", |table| {
        let symbols: Vec<Option<String>> = (0..table.row_count())
            .map(|row| match table.cell(row, 1) {
                Some(Cell::Symbol(value)) => value,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(
            symbols,
            vec![
                Some("ETH-USD".to_string()),
                Some("SOL-USD".to_string()),
                None,
                Some("SOL-USD".to_string()),
            ]
        );
    })
    .unwrap();
}

#[test]
fn failure_isolates_to_one_table() {
    let env = pipeline(&["alpha", "beta"]);

    for table in ["alpha", "beta"] {
        let seq = env.registry.get(table).unwrap();
        let mut writer = WalWriter::open(
            env.root.join(table),
            seq,
            WalConfig::for_testing(),
        )
        .unwrap();
        let mut row = writer.new_row(1).unwrap();
        row.put_double(1, 1.0).unwrap();
        row.append().unwrap();
        writer.commit().unwrap();
    }

    // corrupt alpha's committed segment metadata
    let meta_path = env.root.join("alpha").join("wal1").join("0").join("_meta");
    std::fs::write(&meta_path, b"garbage").unwrap();

    let mut job = ApplyWalJob::new(
        env.root.clone(),
        Arc::clone(&env.registry),
        Arc::clone(&env.pool),
    );
    while let Some(notification) = env.queue.try_pop() {
        job.process(&notification);
    }

    assert!(env.pool.is_distressed("alpha"));
    assert!(!env.pool.is_distressed("beta"));
    env.pool
        .try_with_writer("beta", "inspect", |table| {
            assert_eq!(table.row_count(), 1);
        })
        .unwrap();
}

#[test]
fn segment_roll_is_invisible_to_replay() {
    let env = pipeline(&["trades"]);
    let seq = env.registry.get("trades").unwrap();

    let config = WalConfig::for_testing().with_segment_max_rows(3);
    let mut writer =
        WalWriter::open(env.root.join("trades"), Arc::clone(&seq), config).unwrap();
    for batch in 0..4 {
        for row_index in 0..3i64 {
            let ts = batch * 10 + row_index;
            let mut row = writer.new_row(ts).unwrap();
            row.put_double(1, ts as f64).unwrap();
            row.append().unwrap();
        }
        writer.commit().unwrap().unwrap();
    }
    // four commits across several rolled segments
    assert!(writer.segment_id() >= 2);

    let mut job = ApplyWalJob::new(
        env.root.clone(),
        Arc::clone(&env.registry),
        Arc::clone(&env.pool),
    );
    while let Some(notification) = env.queue.try_pop() {
        job.process(&notification);
    }

    env.pool
        .try_with_writer("trades", "inspect", |table| {
            assert_eq!(table.row_count(), 12);
            assert_eq!(table.seq_txn(), 4);
            let expected: Vec<i64> = (0..4)
                .flat_map(|b| (0..3).map(move |r| b * 10 + r))
                .collect();
            assert_eq!(table.timestamps(), expected);
        })
        .unwrap();
}
