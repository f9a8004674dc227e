//! The Maryland indicator spider: county- and state-level economic and
//! demographic series fetched from four public APIs and persisted as CSV
//! under per-source output roots.

pub mod adapter;
pub mod catalog;
pub mod error;
pub mod fetch;
pub mod fs;
pub mod keys;

pub(crate) mod tui;

/// [FRED](https://fred.stlouisfed.org/docs/api/fred/); population, housing
/// and GDP series, per county and statewide.
pub mod fred;

/// [BLS](https://www.bls.gov/developers/); county employment series from
/// the public timeseries endpoint.
pub mod bls;

/// [Maryland Open Data](https://opendata.maryland.gov/) (Socrata);
/// foreclosure filing counts, pivoted per county.
pub mod socrata;

/// [IPUMS NHGIS](https://developer.ipums.org/docs/apiprogram/); bulk
/// demographic extracts reduced to their Maryland rows.
pub mod ipums;

/// Shortcut for required API elements.
pub(crate) mod http {
    pub(crate) use dotenv::var;
    pub(crate) use reqwest::Client as HttpClient;
}

/// Everything one scrape needs, passed explicitly instead of read from
/// globals: credentials, the parsed catalog, the output root and the retry
/// bounds. Tests swap in mock credentials and a temp output root.
#[derive(Clone, Debug)]
pub struct SpiderConfig {
    pub keys: keys::ApiKeys,
    pub catalog: catalog::Catalog,
    pub out_root: std::path::PathBuf,
    pub retry: fetch::RetryPolicy,
    /// Pause between consecutive series requests, spreading load away from
    /// the rate limit.
    pub throttle: std::time::Duration,
}

impl SpiderConfig {
    pub fn new(
        keys: keys::ApiKeys,
        catalog: catalog::Catalog,
        out_root: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self {
            keys,
            catalog,
            out_root: out_root.into(),
            retry: fetch::RetryPolicy::default(),
            throttle: std::time::Duration::from_millis(500),
        }
    }
}

/// Totals reported by each batch scrape. Skips are informational; they
/// never fail a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScrapeSummary {
    pub saved: usize,
    pub skipped: usize,
}

impl std::ops::AddAssign for ScrapeSummary {
    fn add_assign(&mut self, other: Self) {
        self.saved += other.saved;
        self.skipped += other.skipped;
    }
}

/// Default reqwest client; `USER_AGENT` from the environment when set.
pub(crate) fn std_client_build() -> http::HttpClient {
    reqwest::ClientBuilder::new()
        .user_agent(http::var("USER_AGENT").unwrap_or_else(|_| {
            format!("terrapin-spider/{}", env!("CARGO_PKG_VERSION"))
        }))
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .expect("failed to build reqwest client")
}

pub(crate) fn time_elapsed(time: std::time::Instant) -> String {
    format!("({:.2}s elapsed)", time.elapsed().as_secs_f64())
}
