//! Provider jobs: each composes the fetch layer, record flattening and file
//! output for one upstream.

pub mod eia;
pub mod fred;
pub mod fundamentals;
pub mod yahoo;

pub use eia::{run_eia, EiaRequest, EiaSummary};
pub use fred::{run_crawl, run_series, CrawlSummary, FredClient, FredSeriesRequest, FredSeriesSummary};
pub use fundamentals::{run_fundamentals, FundamentalsSummary};
pub use yahoo::{run_prices, Interval, PriceRequest, PriceSummary};
