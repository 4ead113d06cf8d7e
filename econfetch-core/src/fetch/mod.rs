//! Generic fetch machinery: transport, retry, pagination, tree crawling.

pub mod crawl;
pub mod http;
pub mod paginate;
pub mod query;
pub mod retry;

pub use crawl::{crawl_categories, Category, CategorySource, Checkpoint, CrawlOptions, CrawlOutcome, NoCheckpoint, SeriesListing};
pub use http::{ApiClient, HttpResponse, HttpTransport, ReqwestTransport};
pub use paginate::{Cursor, Page, PageSource, PageStats, Paginator, Record, TotalPolicy};
pub use query::Query;
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper};
