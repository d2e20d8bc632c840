//! End-to-end scenarios over the full engine: planning, joining, caching,
//! cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use corvus_core::{Id, IdTable, TrackedAllocator};
use corvus_engine::{
    CancellationReason, EngineConfig, ExecuteOptions, Expression, MemoryIndex, Permutation,
    PermutationScanner, QueryEngine, QueryError, QueryExecutionContext, QueryPattern,
    QueryPlanner, TermPattern, Variable,
};

fn int(value: i64) -> Id {
    Id::from_int(value)
}

fn vocab(index: u64) -> Id {
    Id::from_vocab_index(index)
}

fn var(name: &str) -> Variable {
    Variable::new(name)
}

fn values(variables: &[&str], rows: &[&[Id]]) -> QueryPattern {
    QueryPattern::Values {
        variables: variables.iter().map(|name| var(name)).collect(),
        rows: rows.iter().map(|row| row.to_vec()).collect(),
    }
}

fn engine_without_index(config: EngineConfig) -> QueryEngine {
    QueryEngine::new(Arc::new(MemoryIndex::new()), config)
}

fn rows_of(table: &IdTable) -> Vec<Vec<Id>> {
    (0..table.num_rows()).map(|r| table.row(r)).collect()
}

#[test]
fn two_column_join() {
    let engine = engine_without_index(EngineConfig::default());
    // "a", "b", "c" are the vocabulary entries 100..102.
    let left = values(&["x", "y"], &[&[int(1), int(2)], &[int(1), int(3)], &[int(2), int(2)]]);
    let right = values(
        &["x", "y", "t"],
        &[
            &[int(1), int(2), vocab(100)],
            &[int(2), int(2), vocab(101)],
            &[int(2), int(3), vocab(102)],
        ],
    );
    let outcome = engine
        .execute(
            QueryPattern::Join(Box::new(left), Box::new(right)),
            ExecuteOptions::default(),
        )
        .unwrap();
    let table = outcome.result.id_table();
    assert_eq!(
        rows_of(table),
        vec![
            vec![int(1), int(2), vocab(100)],
            vec![int(2), int(2), vocab(101)],
        ]
    );
    assert!(table.is_sorted_by(outcome.result.sorted_by()));
}

#[test]
fn undef_join_matches_everything_and_is_sorted() {
    let engine = engine_without_index(EngineConfig::default());
    let left = values(&["x", "a"], &[&[Id::UNDEF, int(1)], &[int(2), int(1)]]);
    let right = values(&["x", "b"], &[&[int(1), int(1)], &[int(2), int(1)]]);
    let outcome = engine
        .execute(
            QueryPattern::Join(Box::new(left), Box::new(right)),
            ExecuteOptions::default(),
        )
        .unwrap();
    let table = outcome.result.id_table();
    // The UNDEF row matches both right rows (taking their x values), and
    // (2,1) matches (2,1) directly.
    let mut rows = rows_of(table);
    rows.sort();
    assert_eq!(
        rows,
        vec![
            vec![int(1), int(1), int(1)],
            vec![int(2), int(1), int(1)],
            vec![int(2), int(1), int(1)],
        ]
    );
    // The result must be properly sorted on the join column even though
    // UNDEF matching emits out of order.
    let sorted_by = outcome.result.sorted_by().to_vec();
    assert!(!sorted_by.is_empty());
    assert!(table.is_sorted_by(&sorted_by));
}

#[test]
fn commutated_joins_share_a_cache_key_and_entry() {
    let engine = engine_without_index(EngineConfig::default());
    let a = || values(&["x", "a"], &[&[int(1), int(10)], &[int(2), int(20)]]);
    let b = || values(&["x", "b"], &[&[int(1), int(30)]]);

    let ab = QueryPattern::Join(Box::new(a()), Box::new(b()));
    let ba = QueryPattern::Join(Box::new(b()), Box::new(a()));

    // The canonical cache keys collide no matter the textual order.
    let ctx = QueryExecutionContext::for_tests(Arc::new(MemoryIndex::new()));
    let planner = QueryPlanner::new(ctx);
    let key_ab = planner.plan(&ab).unwrap().cache_key().to_string();
    let key_ba = planner.plan(&ba).unwrap().cache_key().to_string();
    assert_eq!(key_ab, key_ba);

    let first = engine.execute(ab, ExecuteOptions::default()).unwrap();
    let misses_after_first = engine.cache_statistics().misses;
    let second = engine.execute(ba, ExecuteOptions::default()).unwrap();
    assert_eq!(
        rows_of(first.result.id_table()),
        rows_of(second.result.id_table())
    );
    // The second execution is served from the cache: no new misses on the
    // root key.
    assert_eq!(engine.cache_statistics().misses, misses_after_first);
}

#[test]
fn timeout_cancels_within_the_allowance() {
    let engine = engine_without_index(EngineConfig::default());
    // 4000 x 4000 equal keys: sixteen million result rows, far more work
    // than a ten millisecond budget allows.
    let wide: Vec<Vec<Id>> = (0..4000).map(|_| vec![int(7)]).collect();
    let wide_rows: Vec<&[Id]> = wide.iter().map(|r| r.as_slice()).collect();
    let left = values(&["x"], &wide_rows);
    let right = left.clone();
    let pattern = QueryPattern::Join(Box::new(left), Box::new(right));

    // The root key must not be cached after the failure.
    let offline = QueryPlanner::new(QueryExecutionContext::for_tests(Arc::new(MemoryIndex::new())));
    let root_key = offline.plan(&pattern).unwrap().cache_key().to_string();

    let started = Instant::now();
    let result = engine.execute(
        pattern,
        ExecuteOptions {
            time_limit: Some(Duration::from_millis(10)),
            ..ExecuteOptions::default()
        },
    );
    let elapsed = started.elapsed();
    match result {
        Err(QueryError::Cancelled(CancellationReason::Timeout)) => {}
        other => panic!("expected a timeout, got {:?}", other.err()),
    }
    assert!(elapsed >= Duration::from_millis(10), "cancelled early: {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(100), "cancelled late: {elapsed:?}");
    assert!(!engine.cache().contains(&root_key));
}

/// Index scanner that counts how often it actually scans.
struct CountingIndex {
    inner: MemoryIndex,
    scans: AtomicUsize,
}

impl PermutationScanner for CountingIndex {
    fn scan(
        &self,
        permutation: Permutation,
        fixed_prefix: &[Id],
        allocator: &TrackedAllocator,
    ) -> Result<IdTable, QueryError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        self.inner.scan(permutation, fixed_prefix, allocator)
    }

    fn num_triples(&self) -> usize {
        self.inner.num_triples()
    }
}

#[test]
fn concurrent_identical_queries_compute_once() {
    let mut inner = MemoryIndex::new();
    // ?s <10> ?o and ?s <11> ?o over a small graph.
    for i in 0..50 {
        inner.insert(vocab(i), vocab(10), vocab(i + 100));
        inner.insert(vocab(i), vocab(11), vocab(i + 200));
    }
    let index = Arc::new(CountingIndex {
        inner,
        scans: AtomicUsize::new(0),
    });
    let engine = Arc::new(QueryEngine::new(index.clone(), EngineConfig::default()));

    let pattern = || {
        QueryPattern::Join(
            Box::new(QueryPattern::Triple {
                subject: TermPattern::Variable(var("s")),
                predicate: TermPattern::Fixed(vocab(10)),
                object: TermPattern::Variable(var("o")),
            }),
            Box::new(QueryPattern::Triple {
                subject: TermPattern::Variable(var("s")),
                predicate: TermPattern::Fixed(vocab(11)),
                object: TermPattern::Variable(var("p")),
            }),
        )
    };

    let barrier = Arc::new(Barrier::new(8));
    let workers: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            let barrier = barrier.clone();
            let pattern = pattern();
            std::thread::spawn(move || {
                barrier.wait();
                let outcome = engine.execute(pattern, ExecuteOptions::default()).unwrap();
                rows_of(outcome.result.id_table())
            })
        })
        .collect();
    let mut all_rows: Vec<Vec<Vec<Id>>> = workers
        .into_iter()
        .map(|w| w.join().unwrap())
        .collect();
    let reference = all_rows.pop().unwrap();
    assert_eq!(reference.len(), 50);
    for rows in all_rows {
        assert_eq!(rows, reference);
    }
    // Two distinct scan subtrees, each computed exactly once across all
    // eight threads.
    assert_eq!(index.scans.load(Ordering::SeqCst), 2);
}

#[test]
fn text_limit_keeps_top_scored_texts_with_duplicates() {
    let engine = engine_without_index(EngineConfig::default());
    // (entity, text, score); t1..t3 are text records 1..3.
    let text = Id::from_text_record_index;
    let child = values(
        &["e", "t", "s"],
        &[
            &[vocab(1), text(1), int(9)],
            &[vocab(1), text(2), int(7)],
            &[vocab(1), text(1), int(9)],
            &[vocab(1), text(3), int(5)],
            &[vocab(1), text(2), int(7)],
        ],
    );
    let pattern = QueryPattern::TextLimit {
        child: Box::new(child),
        limit: 2,
        text_record: var("t"),
        entities: vec![var("e")],
        scores: vec![var("s")],
    };
    let outcome = engine.execute(pattern, ExecuteOptions::default()).unwrap();
    // t1 and t2 survive (scores 9 and 7); every duplicate row passes, in
    // the original order. t3 is gone.
    assert_eq!(
        rows_of(outcome.result.id_table()),
        vec![
            vec![vocab(1), text(1), int(9)],
            vec![vocab(1), text(2), int(7)],
            vec![vocab(1), text(1), int(9)],
            vec![vocab(1), text(2), int(7)],
        ]
    );
}

#[test]
fn optional_join_pads_unmatched_left_rows() {
    let engine = engine_without_index(EngineConfig::default());
    let left = values(&["x", "a"], &[&[int(1), int(10)], &[int(2), int(20)]]);
    let right = values(&["x", "b"], &[&[int(2), int(30)]]);
    let outcome = engine
        .execute(
            QueryPattern::Optional(Box::new(left), Box::new(right)),
            ExecuteOptions::default(),
        )
        .unwrap();
    assert_eq!(
        rows_of(outcome.result.id_table()),
        vec![
            vec![int(1), int(10), Id::UNDEF],
            vec![int(2), int(20), int(30)],
        ]
    );
}

#[test]
fn minus_removes_matching_rows() {
    let engine = engine_without_index(EngineConfig::default());
    let left = values(&["x", "a"], &[&[int(1), int(10)], &[int(2), int(20)], &[int(3), int(30)]]);
    let right = values(&["x"], &[&[int(2)]]);
    let outcome = engine
        .execute(
            QueryPattern::Minus(Box::new(left), Box::new(right)),
            ExecuteOptions::default(),
        )
        .unwrap();
    assert_eq!(
        rows_of(outcome.result.id_table()),
        vec![vec![int(1), int(10)], vec![int(3), int(30)]]
    );
}

#[test]
fn filter_excludes_error_rows() {
    let engine = engine_without_index(EngineConfig::default());
    let child = values(&["x"], &[&[int(1)], &[Id::UNDEF], &[int(5)]]);
    let pattern = QueryPattern::Filter(
        Box::new(child),
        Expression::Compare(
            corvus_engine::expr::CmpOp::Greater,
            Box::new(Expression::var("x")),
            Box::new(Expression::IntLiteral(0)),
        ),
    );
    let outcome = engine.execute(pattern, ExecuteOptions::default()).unwrap();
    // The UNDEF row evaluates to an error and is excluded even though any
    // comparison with it might informally look true.
    assert_eq!(
        rows_of(outcome.result.id_table()),
        vec![vec![int(1)], vec![int(5)]]
    );
}

#[test]
fn out_of_budget_is_an_error_not_a_crash() {
    let engine = engine_without_index(EngineConfig {
        memory_budget_per_query: 512,
        ..EngineConfig::default()
    });
    let big: Vec<Vec<Id>> = (0..10_000).map(|i| vec![int(i)]).collect();
    let big_rows: Vec<&[Id]> = big.iter().map(|r| r.as_slice()).collect();
    let result = engine.execute(
        values(&["x"], &big_rows),
        ExecuteOptions::default(),
    );
    assert!(matches!(result, Err(QueryError::OutOfBudget(_))));
    // The engine is still healthy.
    let ok = engine
        .execute(values(&["x"], &[&[int(1)]]), ExecuteOptions::default())
        .unwrap();
    assert_eq!(ok.result.id_table().num_rows(), 1);
}

#[test]
fn pinned_results_survive_clear_unpinned() {
    let engine = engine_without_index(EngineConfig::default());
    let pattern = values(&["x"], &[&[int(42)]]);
    engine
        .execute(
            pattern.clone(),
            ExecuteOptions {
                pin_result: true,
                ..ExecuteOptions::default()
            },
        )
        .unwrap();
    let pinned_before = engine.cache_statistics().num_pinned_entries;
    assert!(pinned_before >= 1);
    engine.clear_unpinned_cache();
    assert_eq!(
        engine.cache_statistics().num_pinned_entries,
        pinned_before
    );
    // A rerun is served from the cache: the miss counter stays put.
    let misses = engine.cache_statistics().misses;
    engine.execute(pattern, ExecuteOptions::default()).unwrap();
    assert_eq!(engine.cache_statistics().misses, misses);
}

#[test]
fn runtime_information_mirrors_the_plan() {
    let engine = engine_without_index(EngineConfig::default());
    let left = values(&["x", "a"], &[&[int(1), int(2)]]);
    let right = values(&["x", "b"], &[&[int(1), int(3)]]);
    let outcome = engine
        .execute(
            QueryPattern::Join(Box::new(left), Box::new(right)),
            ExecuteOptions::default(),
        )
        .unwrap();
    let info = outcome.runtime;
    assert!(info.descriptor.starts_with("Join"));
    assert_eq!(info.result_rows, 1);
    // Two children (the sort wrappers around the value tables).
    assert_eq!(info.children.len(), 2);
}

#[test]
fn cartesian_joins_are_rejected_at_plan_time() {
    let engine = engine_without_index(EngineConfig::default());
    let left = values(&["a"], &[&[int(1)]]);
    let right = values(&["b"], &[&[int(2)]]);
    let result = engine.execute(
        QueryPattern::Join(Box::new(left), Box::new(right)),
        ExecuteOptions::default(),
    );
    assert!(matches!(result, Err(QueryError::Plan(_))));
}
