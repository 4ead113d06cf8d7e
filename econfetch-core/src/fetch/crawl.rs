//! Depth-first crawl of a category tree, accumulating every series found.
//!
//! Uses an explicit stack instead of recursion, so tree depth never touches
//! the call stack. Partial results are handed to a [`Checkpoint`] each time
//! the accumulator crosses another `save_every` boundary.

use super::paginate::Record;
use super::retry::Sleeper;
use crate::error::DataError;
use std::collections::HashSet;
use std::time::Duration;
use tracing::info;

/// A child category as listed by its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: u64,
    pub name: String,
}

/// Series attached to one category, and how many requests listing them took.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesListing {
    pub records: Vec<Record>,
    pub requests: usize,
}

impl SeriesListing {
    /// A listing served by one request.
    pub fn single(records: Vec<Record>) -> Self {
        Self {
            records,
            requests: 1,
        }
    }
}

/// Upstream tree access: series attached to a node, and its children.
///
/// `children` is one request per call.
pub trait CategorySource {
    fn series(&self, category_id: u64) -> Result<SeriesListing, DataError>;
    fn children(&self, category_id: u64) -> Result<Vec<Category>, DataError>;
}

/// Receives snapshots of the accumulator during a crawl.
pub trait Checkpoint {
    fn save(&mut self, series: &[Record]) -> Result<(), DataError>;
}

/// Checkpoint that discards snapshots.
pub struct NoCheckpoint;

impl Checkpoint for NoCheckpoint {
    fn save(&mut self, _series: &[Record]) -> Result<(), DataError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlOptions {
    pub root: u64,
    /// Snapshot interval in accumulated series. Zero disables checkpoints.
    pub save_every: usize,
    /// Pause between consecutive upstream requests.
    pub delay: Duration,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            root: 0,
            save_every: 10_000,
            delay: Duration::from_millis(500),
        }
    }
}

/// Result of a completed crawl.
#[derive(Debug, Clone, Default)]
pub struct CrawlOutcome {
    pub series: Vec<Record>,
    pub categories_visited: usize,
    pub checkpoints: usize,
    /// Upstream requests issued, counting every page of a series listing.
    pub requests: usize,
}

/// Crawl the tree under `options.root`.
///
/// Children are processed in the order the source lists them, depth first.
/// A category reachable through more than one parent is processed once. The
/// first upstream error aborts the crawl; whatever was checkpointed stays on
/// disk.
pub fn crawl_categories(
    source: &dyn CategorySource,
    sleeper: &dyn Sleeper,
    options: CrawlOptions,
    checkpoint: &mut dyn Checkpoint,
) -> Result<CrawlOutcome, DataError> {
    let mut pacer = Pacer::new(sleeper, options.delay);
    let mut stack = vec![Category {
        id: options.root,
        name: "root".into(),
    }];
    let mut seen: HashSet<u64> = HashSet::new();
    let mut outcome = CrawlOutcome::default();
    let mut next_checkpoint = options.save_every;

    while let Some(category) = stack.pop() {
        if !seen.insert(category.id) {
            continue;
        }
        outcome.categories_visited += 1;
        info!(id = category.id, name = %category.name, "entering category");

        pacer.wait();
        let listing = source.series(category.id)?;
        outcome.requests += listing.requests;
        let found = listing.records;
        if !found.is_empty() {
            outcome.series.extend(found.iter().cloned());
            info!(
                id = category.id,
                added = found.len(),
                total = outcome.series.len(),
                "collected series"
            );
        }

        if options.save_every > 0 && outcome.series.len() >= next_checkpoint {
            checkpoint.save(&outcome.series)?;
            outcome.checkpoints += 1;
            info!(total = outcome.series.len(), "intermediate save");
            while next_checkpoint <= outcome.series.len() {
                next_checkpoint += options.save_every;
            }
        }

        pacer.wait();
        let children = source.children(category.id)?;
        outcome.requests += 1;
        // Reverse so the first-listed child is popped first.
        stack.extend(children.into_iter().rev());
    }

    Ok(outcome)
}

/// Inserts the configured delay before every request except the first.
struct Pacer<'a> {
    sleeper: &'a dyn Sleeper,
    delay: Duration,
    started: bool,
}

impl<'a> Pacer<'a> {
    fn new(sleeper: &'a dyn Sleeper, delay: Duration) -> Self {
        Self {
            sleeper,
            delay,
            started: false,
        }
    }

    fn wait(&mut self) {
        if self.started && !self.delay.is_zero() {
            self.sleeper.sleep(self.delay);
        }
        self.started = true;
    }
}
