use crate::catalog::{SeriesDescriptor, Source};
use crate::error::SkippedSeries;
use async_trait::async_trait;
use chrono::NaiveDate;

/// A single date/value observation of a series.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Observation {
    pub date: NaiveDate,
    pub value: f64,
}

/// A pivoted table: one row per observation date (or per geographic unit
/// and year), metric codes spread across columns. Cells stay strings so the
/// source's own formatting survives into the CSV.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricTable {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// One data source's translation from raw API payloads to typed output.
///
/// Adapters own no retry logic; every request goes through
/// [`Fetcher`](crate::fetch::Fetcher), and a transport can be substituted
/// underneath it to test an adapter offline. A series that cannot be
/// completed comes back as [`SkippedSeries`], which batch callers log and
/// step over.
#[async_trait]
pub trait SourceAdapter {
    type Output;

    fn source(&self) -> Source;

    async fn fetch(&self, series: &SeriesDescriptor) -> Result<Self::Output, SkippedSeries>;
}
