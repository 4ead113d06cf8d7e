//! Offset-based pagination over any [`PageSource`].
//!
//! The paginator is a plain iterator: each `next()` issues at most one page
//! request (which may itself retry underneath). It stops on the first of:
//! an empty page, the reported total being reached, a malformed envelope, or
//! an unrecoverable error (yielded once, then fused).

use crate::error::DataError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{info, warn};

use super::retry::Sleeper;

/// One upstream record: field name to JSON value, in upstream order.
pub type Record = Map<String, Value>;

/// Position of the next page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub offset: usize,
    pub limit: usize,
}

/// One page of records plus the source's declared total, if it reports one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<Record>,
    pub total: Option<usize>,
}

impl Page {
    pub fn new(records: Vec<Record>, total: Option<usize>) -> Self {
        Self { records, total }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A paginated upstream endpoint.
pub trait PageSource {
    /// Fetch the page at `cursor`.
    ///
    /// `Ok(None)` means the response carried no recognisable data envelope;
    /// the paginator logs it and treats it as end-of-data.
    fn fetch_page(&self, cursor: Cursor) -> Result<Option<Page>, DataError>;
}

impl<S: PageSource + ?Sized> PageSource for &S {
    fn fetch_page(&self, cursor: Cursor) -> Result<Option<Page>, DataError> {
        (**self).fetch_page(cursor)
    }
}

/// What to do once the cumulative count reaches the source's reported total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TotalPolicy {
    /// Stop as soon as `retrieved >= total`.
    #[default]
    Trust,
    /// Keep going past the total while pages come back full; stop on the
    /// first short or empty page. Guards against sources that undercount.
    Verify,
}

/// Counters describing a pagination run so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageStats {
    pub requests: usize,
    pub records: usize,
    pub reported_total: Option<usize>,
}

/// Lazy, finite sequence of pages from a [`PageSource`].
pub struct Paginator<'a, S: PageSource> {
    source: S,
    sleeper: &'a dyn Sleeper,
    page_size: usize,
    delay: Duration,
    policy: TotalPolicy,
    offset: usize,
    stats: PageStats,
    done: bool,
}

impl<'a, S: PageSource> Paginator<'a, S> {
    /// Paginate `source` from offset 0. A zero page size is treated as one.
    pub fn new(source: S, page_size: usize, sleeper: &'a dyn Sleeper) -> Self {
        Self {
            source,
            sleeper,
            page_size: page_size.max(1),
            delay: Duration::ZERO,
            policy: TotalPolicy::Trust,
            offset: 0,
            stats: PageStats::default(),
            done: false,
        }
    }

    /// Fixed pause between consecutive page requests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_total_policy(mut self, policy: TotalPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Start from a non-zero offset.
    pub fn starting_at(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn stats(&self) -> PageStats {
        self.stats
    }

    fn reached_total(&self, page_len: usize) -> bool {
        let Some(total) = self.stats.reported_total else {
            return false;
        };
        if self.stats.records < total {
            return false;
        }
        match self.policy {
            TotalPolicy::Trust => true,
            TotalPolicy::Verify => page_len < self.page_size,
        }
    }
}

impl<S: PageSource> Iterator for Paginator<'_, S> {
    type Item = Result<Page, DataError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.stats.requests > 0 && !self.delay.is_zero() {
            self.sleeper.sleep(self.delay);
        }

        let cursor = Cursor {
            offset: self.offset,
            limit: self.page_size,
        };
        info!(
            offset = cursor.offset,
            end = cursor.offset + cursor.limit,
            "fetching page"
        );
        self.stats.requests += 1;

        let page = match self.source.fetch_page(cursor) {
            Ok(Some(page)) => page,
            Ok(None) => {
                warn!(offset = cursor.offset, "no valid data in response; stopping");
                self.done = true;
                return None;
            }
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        if page.is_empty() {
            info!(offset = cursor.offset, "no more records");
            self.done = true;
            return None;
        }

        let len = page.len();
        self.stats.records += len;
        if page.total.is_some() {
            self.stats.reported_total = page.total;
        }
        self.offset += self.page_size;

        match self.stats.reported_total {
            Some(total) => info!(retrieved = self.stats.records, total, "page retrieved"),
            None => info!(retrieved = self.stats.records, "page retrieved"),
        }

        if self.reached_total(len) {
            info!(retrieved = self.stats.records, "all data retrieved");
            self.done = true;
        } else if self.policy == TotalPolicy::Verify
            && self.stats.reported_total.is_some_and(|t| self.stats.records > t)
        {
            warn!(
                retrieved = self.stats.records,
                reported = self.stats.reported_total,
                "source reported fewer records than it served; continuing"
            );
        }

        Some(Ok(page))
    }
}

impl<S: PageSource> std::iter::FusedIterator for Paginator<'_, S> {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::{Cell, RefCell};

    struct NoSleep;
    impl Sleeper for NoSleep {
        fn sleep(&self, _d: Duration) {}
    }

    #[derive(Default)]
    struct CountingSleeper(RefCell<Vec<Duration>>);
    impl Sleeper for CountingSleeper {
        fn sleep(&self, d: Duration) {
            self.0.borrow_mut().push(d);
        }
    }

    /// Serves `available` numbered records and reports `reported` as total.
    struct Numbers {
        available: usize,
        reported: Option<usize>,
        calls: Cell<usize>,
    }

    impl Numbers {
        fn new(available: usize, reported: Option<usize>) -> Self {
            Self {
                available,
                reported,
                calls: Cell::new(0),
            }
        }
    }

    impl PageSource for Numbers {
        fn fetch_page(&self, cursor: Cursor) -> Result<Option<Page>, DataError> {
            self.calls.set(self.calls.get() + 1);
            let end = (cursor.offset + cursor.limit).min(self.available);
            let records = (cursor.offset.min(end)..end)
                .map(|i| json!({ "n": i }).as_object().cloned().unwrap())
                .collect();
            Ok(Some(Page::new(records, self.reported)))
        }
    }

    fn collect(p: Paginator<'_, &Numbers>) -> Vec<Record> {
        p.flat_map(|page| page.unwrap().records).collect()
    }

    #[test]
    fn trusts_exact_total() {
        let src = Numbers::new(10, Some(10));
        let records = collect(Paginator::new(&src, 5, &NoSleep));
        assert_eq!(records.len(), 10);
        assert_eq!(src.calls.get(), 2);
    }

    #[test]
    fn stops_on_empty_page_without_total() {
        let src = Numbers::new(10, None);
        let records = collect(Paginator::new(&src, 5, &NoSleep));
        assert_eq!(records.len(), 10);
        assert_eq!(src.calls.get(), 3);
    }

    #[test]
    fn trust_policy_stops_at_undercounted_total() {
        let src = Numbers::new(12, Some(5));
        let records = collect(Paginator::new(&src, 5, &NoSleep));
        assert_eq!(records.len(), 5);
    }

    #[test]
    fn verify_policy_drains_undercounted_source() {
        let src = Numbers::new(12, Some(5));
        let records = collect(
            Paginator::new(&src, 5, &NoSleep).with_total_policy(TotalPolicy::Verify),
        );
        assert_eq!(records.len(), 12);
        // 5 + 5 + 2 (short page ends it)
        assert_eq!(src.calls.get(), 3);
    }

    #[test]
    fn offsets_advance_by_page_size() {
        struct Offsets(RefCell<Vec<usize>>);
        impl PageSource for Offsets {
            fn fetch_page(&self, cursor: Cursor) -> Result<Option<Page>, DataError> {
                self.0.borrow_mut().push(cursor.offset);
                let rec = json!({"x": 1}).as_object().cloned().unwrap();
                Ok(Some(Page::new(vec![rec], Some(3))))
            }
        }
        let src = Offsets(RefCell::new(Vec::new()));
        let pages: Vec<_> = Paginator::new(&src, 100, &NoSleep).collect();
        assert_eq!(pages.len(), 3);
        assert_eq!(*src.0.borrow(), vec![0, 100, 200]);
    }

    #[test]
    fn delay_only_between_requests() {
        let src = Numbers::new(9, Some(9));
        let sleeper = CountingSleeper::default();
        let p = Paginator::new(&src, 3, &sleeper).with_delay(Duration::from_millis(250));
        assert_eq!(collect(p).len(), 9);
        assert_eq!(*sleeper.0.borrow(), vec![Duration::from_millis(250); 2]);
    }

    #[test]
    fn malformed_envelope_ends_quietly() {
        struct Broken;
        impl PageSource for Broken {
            fn fetch_page(&self, _c: Cursor) -> Result<Option<Page>, DataError> {
                Ok(None)
            }
        }
        let mut p = Paginator::new(Broken, 10, &NoSleep);
        assert!(p.next().is_none());
        assert!(p.next().is_none());
        assert_eq!(p.stats().requests, 1);
    }

    #[test]
    fn error_is_yielded_once_then_fused() {
        struct Failing(Cell<usize>);
        impl PageSource for Failing {
            fn fetch_page(&self, c: Cursor) -> Result<Option<Page>, DataError> {
                self.0.set(self.0.get() + 1);
                if c.offset == 0 {
                    let rec = json!({"x": 1}).as_object().cloned().unwrap();
                    Ok(Some(Page::new(vec![rec], None)))
                } else {
                    Err(DataError::RetriesExhausted {
                        attempts: 5,
                        last: Box::new(DataError::Timeout("t".into())),
                    })
                }
            }
        }
        let src = Failing(Cell::new(0));
        let items: Vec<_> = Paginator::new(&src, 1, &NoSleep).collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
        assert_eq!(src.0.get(), 2);
    }

    #[test]
    fn stats_track_progress() {
        let src = Numbers::new(7, Some(7));
        let mut p = Paginator::new(&src, 4, &NoSleep);
        while p.next().is_some() {}
        assert_eq!(
            p.stats(),
            PageStats {
                requests: 2,
                records: 7,
                reported_total: Some(7)
            }
        );
    }
}
