//! Property tests for the fetch layer.
//!
//! Uses proptest to verify:
//! 1. Page accounting: ceil(T/P) requests deliver exactly T records; an empty
//!    source costs one request and yields nothing
//! 2. Retry backoff: k transient failures cost k strictly growing waits
//! 3. Retry exhaustion: a permanently failing call runs exactly max_attempts times
//! 4. Flattening: the first record's header is applied to every later record
//! 5. Timestamp derivation: hourly periods expand, everything else passes through
//! 6. Crawl termination: every node visited once, every series collected

mod common;

use common::RecordingSleeper;
use econfetch_core::fetch::{
    crawl_categories, Category, CategorySource, CrawlOptions, Cursor, NoCheckpoint, Page,
    PageSource, Paginator, Record, RetryPolicy, SeriesListing, TotalPolicy,
};
use econfetch_core::record::{expand_period, RowFlattener};
use econfetch_core::DataError;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

// ── Fixtures ─────────────────────────────────────────────────────────

/// In-memory dataset of `total` numbered records.
struct Numbered {
    total: usize,
}

impl PageSource for Numbered {
    fn fetch_page(&self, cursor: Cursor) -> Result<Option<Page>, DataError> {
        let end = (cursor.offset + cursor.limit).min(self.total);
        let records = (cursor.offset.min(end)..end)
            .map(|i| json!({ "n": i }).as_object().cloned().unwrap_or_default())
            .collect();
        Ok(Some(Page::new(records, Some(self.total))))
    }
}

/// Tree given by a parent index per node (node 0 is the root).
struct Tree {
    children: HashMap<u64, Vec<u64>>,
    series_per_node: Vec<usize>,
    series_calls: RefCell<HashMap<u64, usize>>,
}

impl Tree {
    fn new(parents: &[usize], series_per_node: Vec<usize>) -> Self {
        let mut children: HashMap<u64, Vec<u64>> = HashMap::new();
        for (child, &parent) in parents.iter().enumerate() {
            children
                .entry(parent as u64)
                .or_default()
                .push(child as u64 + 1);
        }
        Self {
            children,
            series_per_node,
            series_calls: RefCell::new(HashMap::new()),
        }
    }
}

impl CategorySource for Tree {
    fn series(&self, category_id: u64) -> Result<SeriesListing, DataError> {
        *self.series_calls.borrow_mut().entry(category_id).or_default() += 1;
        let n = self.series_per_node[category_id as usize];
        Ok(SeriesListing::single(
            (0..n)
                .map(|k| {
                    json!({ "id": format!("{category_id}-{k}") })
                        .as_object()
                        .cloned()
                        .unwrap_or_default()
                })
                .collect(),
        ))
    }

    fn children(&self, category_id: u64) -> Result<Vec<Category>, DataError> {
        Ok(self
            .children
            .get(&category_id)
            .into_iter()
            .flatten()
            .map(|&id| Category {
                id,
                name: format!("node {id}"),
            })
            .collect())
    }
}

// ── Strategies (proptest) ────────────────────────────────────────────

/// Parent indices for nodes 1..=n: each node hangs under an earlier one.
fn arb_tree() -> impl Strategy<Value = (Vec<usize>, Vec<usize>)> {
    (1usize..40).prop_flat_map(|nodes| {
        let parents: Vec<_> = (1..nodes).map(|i| 0..i).collect();
        let series = prop::collection::vec(0usize..6, nodes);
        (parents, series)
    })
}

fn arb_columns() -> impl Strategy<Value = Vec<String>> {
    prop::collection::hash_set("[a-z]{1,8}", 1..10).prop_map(|set| set.into_iter().collect())
}

// ── 1. Page accounting ───────────────────────────────────────────────

proptest! {
    /// ceil(T/P) requests, T records in total, in order. T = 0 still costs the
    /// one request that comes back empty.
    #[test]
    fn pages_cover_total_exactly(total in 0usize..2000, page_size in 1usize..300) {
        let sleeper = RecordingSleeper::default();
        let source = Numbered { total };
        let mut pages = Paginator::new(&source, page_size, &sleeper);

        let mut seen = Vec::new();
        for page in pages.by_ref() {
            for r in page.unwrap().records {
                seen.push(r["n"].as_u64().unwrap() as usize);
            }
        }

        prop_assert_eq!(pages.stats().requests, total.div_ceil(page_size).max(1));
        prop_assert_eq!(seen.len(), total);
        prop_assert!(seen.iter().enumerate().all(|(i, &n)| i == n));
    }

    /// The verify policy costs at most one extra request, never drops records.
    #[test]
    fn verify_policy_drains_to_short_page(total in 1usize..1000, page_size in 1usize..100) {
        let sleeper = RecordingSleeper::default();
        let source = Numbered { total };
        let mut pages = Paginator::new(&source, page_size, &sleeper)
            .with_total_policy(TotalPolicy::Verify);
        let records: usize = pages.by_ref().map(|p| p.unwrap().len()).sum();

        prop_assert_eq!(records, total);
        let requests = pages.stats().requests;
        prop_assert!(requests == total.div_ceil(page_size) || requests == total / page_size + 1);
    }

    /// Inter-page delay is applied between requests only.
    #[test]
    fn delay_applies_between_pages(total in 1usize..500, page_size in 1usize..50) {
        let sleeper = RecordingSleeper::default();
        let source = Numbered { total };
        let delay = Duration::from_millis(250);
        let mut pages = Paginator::new(&source, page_size, &sleeper).with_delay(delay);
        pages.by_ref().for_each(drop);

        let waits = sleeper.waits();
        prop_assert_eq!(waits.len(), pages.stats().requests - 1);
        prop_assert!(waits.iter().all(|w| *w == delay));
    }
}

#[test]
fn empty_source_is_one_request_and_no_pages() {
    let sleeper = RecordingSleeper::default();
    let source = Numbered { total: 0 };
    let mut pages = Paginator::new(&source, 50, &sleeper);

    assert!(pages.next().is_none());
    assert!(pages.next().is_none());
    let stats = pages.stats();
    assert_eq!(stats.requests, 1);
    assert_eq!(stats.records, 0);
    assert!(sleeper.waits().is_empty());
}

// ── 2. Retry backoff ─────────────────────────────────────────────────

proptest! {
    #[test]
    fn k_failures_then_success(max_attempts in 2u32..8, base_ms in 1u64..2000, k_seed in 0u32..100) {
        let k = k_seed % max_attempts;
        let policy = RetryPolicy::new(max_attempts, Duration::from_millis(base_ms));
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;

        let result = policy.run(&sleeper, |_| {
            calls += 1;
            if calls <= k {
                Err(DataError::Timeout("slow".into()))
            } else {
                Ok("done")
            }
        });

        prop_assert_eq!(result.unwrap(), "done");
        prop_assert_eq!(calls, k + 1);
        let waits = sleeper.waits();
        prop_assert_eq!(waits.len(), k as usize);
        prop_assert!(waits.windows(2).all(|w| w[0] < w[1]));
    }
}

// ── 3. Retry exhaustion ──────────────────────────────────────────────

proptest! {
    #[test]
    fn always_failing_call_stops_at_max_attempts(max_attempts in 1u32..10) {
        let policy = RetryPolicy::new(max_attempts, Duration::from_millis(10));
        let sleeper = RecordingSleeper::default();
        let mut calls = 0u32;

        let result: Result<(), _> = policy.run(&sleeper, |_| {
            calls += 1;
            Err(DataError::HttpStatus { status: 503, body: String::new() })
        });

        prop_assert_eq!(calls, max_attempts);
        prop_assert_eq!(sleeper.waits().len(), (max_attempts - 1) as usize);
        let is_exhausted = matches!(result, Err(DataError::RetriesExhausted { attempts, .. }) if attempts == max_attempts);
        prop_assert!(is_exhausted);
    }
}

// ── 4. Flattening ────────────────────────────────────────────────────

proptest! {
    /// Later records with shuffled field order land under the first header.
    #[test]
    fn header_from_first_record_is_stable(
        (columns, orders) in arb_columns().prop_flat_map(|cols| {
            let n = cols.len();
            let shuffles = prop::collection::vec(Just((0..n).collect::<Vec<_>>()).prop_shuffle(), 1..6);
            (Just(cols), shuffles)
        })
    ) {
        let make = |order: &[usize], page: usize| -> Record {
            order
                .iter()
                .map(|&i| (columns[i].clone(), Value::String(format!("{}-{page}", columns[i]))))
                .collect()
        };

        let mut flattener = RowFlattener::new();
        let first = make(&(0..columns.len()).collect::<Vec<_>>(), 0);
        let header = flattener.establish(&first).to_vec();
        prop_assert_eq!(&header, &columns);

        for (page, order) in orders.iter().enumerate() {
            let row = flattener.flatten(&make(order, page + 1));
            prop_assert_eq!(flattener.header().unwrap(), header.as_slice());
            for (col, value) in header.iter().zip(&row) {
                prop_assert_eq!(value, &format!("{col}-{}", page + 1));
            }
        }
    }
}

// ── 5. Timestamp derivation ──────────────────────────────────────────

proptest! {
    #[test]
    fn hourly_periods_expand(y in 1990i32..2100, m in 1u32..=12, d in 1u32..=28, h in 0u32..24) {
        let raw = format!("{y:04}-{m:02}-{d:02}T{h:02}");
        prop_assert_eq!(expand_period(&raw), format!("{y:04}-{m:02}-{d:02} {h:02}:00:00"));
    }

    #[test]
    fn non_hourly_strings_pass_through(raw in "[0-9A-Za-z: -]{0,20}") {
        prop_assume!(!raw.contains('T'));
        prop_assert_eq!(expand_period(&raw), raw);
    }
}

// ── 6. Crawl termination ─────────────────────────────────────────────

proptest! {
    #[test]
    fn crawl_visits_each_node_once((parents, series) in arb_tree()) {
        let nodes = series.len();
        let expected: usize = series.iter().sum();
        let tree = Tree::new(&parents, series);
        let sleeper = RecordingSleeper::default();
        let options = CrawlOptions {
            root: 0,
            save_every: 0,
            delay: Duration::from_millis(500),
        };

        let outcome = crawl_categories(&tree, &sleeper, options, &mut NoCheckpoint).unwrap();

        prop_assert_eq!(outcome.series.len(), expected);
        prop_assert_eq!(outcome.categories_visited, nodes);
        let calls = tree.series_calls.borrow();
        prop_assert_eq!(calls.len(), nodes);
        prop_assert!(calls.values().all(|&c| c == 1));
        // Two requests per node, paced after the first.
        prop_assert_eq!(outcome.requests, 2 * nodes);
        prop_assert_eq!(sleeper.waits().len(), 2 * nodes - 1);
    }
}
