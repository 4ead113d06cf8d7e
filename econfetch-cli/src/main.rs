//! econfetch CLI: download commands for EIA, FRED and Yahoo Finance.
//!
//! Commands:
//! - `eia`: page through an EIA v2 query URL into one CSV
//! - `fred series`: one FRED series plus its metadata
//! - `fred crawl`: every series in the FRED category tree
//! - `yahoo prices`: OHLCV bars for a ticker
//! - `yahoo fundamentals`: annual and quarterly statements for a ticker
//!
//! API keys are read from the environment; a `.env` file in the working
//! directory is loaded first.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use econfetch_core::config::{HttpSettings, RetrySettings};
use econfetch_core::fetch::{ApiClient, ReqwestTransport, ThreadSleeper, TotalPolicy};
use econfetch_core::providers::{eia, fred, fundamentals, yahoo};
use econfetch_core::providers::{
    EiaRequest, FredClient, FredSeriesRequest, Interval, PriceRequest,
};
use econfetch_core::{ApiKey, DateRange, Settings};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "econfetch",
    about = "Download economic and market data from EIA, FRED and Yahoo Finance"
)]
struct Cli {
    /// Settings file (TOML). Defaults apply for anything it leaves out.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every page of an EIA v2 query into one CSV.
    Eia {
        /// Full API URL from the EIA browser (https://api.eia.gov/v2/...).
        #[arg(long)]
        url: String,

        /// Start date (YYYY-MM-DD). Defaults to the earliest available.
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD). Defaults to the latest available.
        #[arg(long)]
        end: Option<String>,

        #[arg(long, default_value = "data/EIA/eia_data.csv")]
        output: PathBuf,

        /// Rows per request (EIA maximum is 5000).
        #[arg(long)]
        page_size: Option<usize>,

        /// Keep paging past the reported total until a short page arrives.
        #[arg(long, default_value_t = false)]
        verify_total: bool,
    },
    /// FRED series downloads.
    Fred {
        #[command(subcommand)]
        action: FredAction,
    },
    /// Yahoo Finance downloads.
    Yahoo {
        #[command(subcommand)]
        action: YahooAction,
    },
}

#[derive(Subcommand)]
enum FredAction {
    /// Download one series and its metadata.
    Series {
        /// Series id (e.g., GDP, DGS10, UNRATE).
        id: String,

        #[arg(long)]
        start: Option<String>,

        #[arg(long)]
        end: Option<String>,

        #[arg(long, default_value = "data/FRED")]
        output_dir: PathBuf,
    },
    /// Walk the category tree and save every series found.
    Crawl {
        /// Category to start from. 0 is the root.
        #[arg(long, default_value_t = 0)]
        root: u64,

        #[arg(long, default_value = "fred_all_series.csv")]
        output: PathBuf,

        /// Rewrite the output every N series (0 disables).
        #[arg(long)]
        save_every: Option<usize>,
    },
}

#[derive(Subcommand)]
enum YahooAction {
    /// Download OHLCV bars.
    Prices {
        /// Ticker symbol (e.g., SPY, AAPL, ^GSPC).
        ticker: String,

        /// Start date (YYYY-MM-DD). Without start and end, fetches full history.
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD). Defaults to now.
        #[arg(long)]
        end: Option<String>,

        /// 1m, 2m, 5m, 15m, 30m, 60m, 90m, 1h, 1d, 5d, 1wk, 1mo, 3mo.
        #[arg(long, default_value = "1d")]
        interval: Interval,

        #[arg(long, default_value = "data/yFinance")]
        output_dir: PathBuf,
    },
    /// Download financial statements, balance sheets, cash flows and earnings.
    Fundamentals {
        ticker: String,

        #[arg(long, default_value = "data/yFinance/fundamentals")]
        output_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::default(),
    };
    tracing::debug!(?settings, "settings loaded");

    match cli.command {
        Commands::Eia {
            url,
            start,
            end,
            output,
            page_size,
            verify_total,
        } => run_eia_cmd(settings, &url, start, end, output, page_size, verify_total),
        Commands::Fred { action } => match action {
            FredAction::Series {
                id,
                start,
                end,
                output_dir,
            } => run_fred_series_cmd(&settings, &id, start, end, output_dir),
            FredAction::Crawl {
                root,
                output,
                save_every,
            } => run_fred_crawl_cmd(settings, root, output, save_every),
        },
        Commands::Yahoo { action } => match action {
            YahooAction::Prices {
                ticker,
                start,
                end,
                interval,
                output_dir,
            } => run_prices_cmd(&settings, &ticker, start, end, interval, output_dir),
            YahooAction::Fundamentals { ticker, output_dir } => {
                run_fundamentals_cmd(&settings, &ticker, output_dir)
            }
        },
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Blocking transport and sleeper shared by every client in one command.
struct Network {
    transport: ReqwestTransport,
    sleeper: ThreadSleeper,
}

impl Network {
    fn new(http: &HttpSettings) -> Result<Self> {
        let transport = ReqwestTransport::new(http.timeout(), http.user_agent.as_deref())
            .context("building HTTP client")?;
        Ok(Self {
            transport,
            sleeper: ThreadSleeper,
        })
    }

    fn client(&self, retry: &RetrySettings) -> ApiClient<'_> {
        ApiClient::new(&self.transport, retry.policy(), &self.sleeper)
    }
}

fn run_eia_cmd(
    mut settings: Settings,
    url: &str,
    start: Option<String>,
    end: Option<String>,
    output: PathBuf,
    page_size: Option<usize>,
    verify_total: bool,
) -> Result<()> {
    if let Some(n) = page_size {
        settings.eia.page_size = n;
    }
    if verify_total {
        settings.eia.total_policy = TotalPolicy::Verify;
    }
    settings.validate()?;

    let api_key = ApiKey::from_env(&settings.eia.api_key_var)?;
    let range = DateRange::parse(start.as_deref(), end.as_deref())?;
    let request = EiaRequest::from_url(url, range, output)?;

    let network = Network::new(&settings.http)?;
    let client = network.client(&settings.eia.retry);
    let summary = eia::run_eia(&client, &request, &api_key, &settings.eia)
        .context("EIA download failed")?;

    println!();
    println!("=== EIA Download ===");
    println!("Rows:      {}", summary.rows);
    println!("Columns:   {}", summary.columns.len());
    println!("Requests:  {}", summary.stats.requests);
    if let Some(total) = summary.stats.reported_total {
        println!("Reported:  {total}");
    }
    println!("Saved to:  {}", summary.output.display());
    println!("Manifest:  {}", summary.manifest.display());
    Ok(())
}

fn fred_client<'a>(settings: &Settings, client: &'a ApiClient<'a>) -> Result<FredClient<'a>> {
    let api_key = ApiKey::from_env(&settings.fred.api_key_var)?;
    Ok(FredClient::new(client, &settings.fred, api_key)?)
}

fn run_fred_series_cmd(
    settings: &Settings,
    id: &str,
    start: Option<String>,
    end: Option<String>,
    output_dir: PathBuf,
) -> Result<()> {
    let range = DateRange::parse(start.as_deref(), end.as_deref())?;
    let request = FredSeriesRequest::new(id, range, output_dir)?;

    let network = Network::new(&settings.http)?;
    let client = network.client(&settings.fred.retry);
    let fred = fred_client(settings, &client)?;
    let summary = fred::run_series(&fred, &request, &settings.fred)
        .with_context(|| format!("FRED download failed for {}", request.series_id))?;

    println!();
    println!("=== FRED Series {} ===", summary.series_id);
    println!("Title:     {}", summary.title);
    println!("Rows:      {}", summary.rows);
    match (&summary.data_path, &summary.metadata_path) {
        (Some(data), Some(meta)) => {
            println!("Data:      {}", data.display());
            println!("Metadata:  {}", meta.display());
        }
        _ => println!("No data downloaded."),
    }
    Ok(())
}

fn run_fred_crawl_cmd(
    mut settings: Settings,
    root: u64,
    output: PathBuf,
    save_every: Option<usize>,
) -> Result<()> {
    if let Some(n) = save_every {
        settings.fred.save_every = n;
    }

    let network = Network::new(&settings.http)?;
    let client = network.client(&settings.fred.retry);
    let fred = fred_client(&settings, &client)?;
    let summary =
        fred::run_crawl(&fred, root, &output, &settings.fred).context("FRED crawl failed")?;

    println!();
    println!("=== FRED Crawl ===");
    println!("Categories:  {}", summary.categories_visited);
    println!("Series:      {}", summary.series);
    println!("Checkpoints: {}", summary.checkpoints);
    println!("Requests:    {}", summary.requests);
    println!("Saved to:    {}", summary.output.display());
    Ok(())
}

fn run_prices_cmd(
    settings: &Settings,
    ticker: &str,
    start: Option<String>,
    end: Option<String>,
    interval: Interval,
    output_dir: PathBuf,
) -> Result<()> {
    let range = DateRange::parse(start.as_deref(), end.as_deref())?;
    let request = PriceRequest::new(ticker, interval, range, output_dir)?;

    let network = Network::new(&settings.http)?;
    let client = network.client(&settings.yahoo.retry);
    let summary = yahoo::run_prices(&client, &request, &settings.yahoo, Utc::now())
        .with_context(|| format!("price download failed for {}", request.ticker))?;

    println!();
    println!("=== {} {} ===", summary.ticker, summary.interval);
    match &summary.output {
        Some(path) => {
            println!("Start:     {}", summary.first.as_deref().unwrap_or("N/A"));
            println!("End:       {}", summary.last.as_deref().unwrap_or("N/A"));
            println!("Rows:      {}", summary.rows);
            println!("Saved to:  {}", path.display());
        }
        None => println!("No data returned."),
    }
    Ok(())
}

fn run_fundamentals_cmd(settings: &Settings, ticker: &str, output_dir: PathBuf) -> Result<()> {
    let network = Network::new(&settings.http)?;
    let client = network.client(&settings.yahoo.retry);
    let summary =
        fundamentals::run_fundamentals(&client, ticker, &output_dir, &settings.yahoo, Utc::now())
            .with_context(|| format!("fundamentals download failed for {ticker}"))?;

    println!();
    println!("=== {} fundamentals ===", summary.ticker);
    for dataset in &summary.datasets {
        match &dataset.output {
            Some(path) => println!("{:<22} {:>4} rows  {}", dataset.name, dataset.rows, path.display()),
            None => println!("{:<22} no data", dataset.name),
        }
    }
    println!("Saved {} of {} datasets.", summary.saved(), summary.datasets.len());
    Ok(())
}
