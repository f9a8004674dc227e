use crate::adapter::{MetricTable, Observation, SourceAdapter};
use crate::catalog::{SeriesDescriptor, Source};
use crate::error::{FetchError, SkippedSeries};
use crate::fetch::{ApiRequest, Fetcher, HttpTransport, Transport};
use crate::fs::{self, OutputTarget, Scope};
use crate::{ScrapeSummary, SpiderConfig};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use lazy_static::lazy_static;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

// RATE_LIMIT = 500 /day with a registration key
//
// timeseries = `https://api.bls.gov/publicAPI/v2/timeseries/data/`, POST

const TIMESERIES_URL: &str = "https://api.bls.gov/publicAPI/v2/timeseries/data/";

// LAU county series reach back to 1990; the API caps one request at 20 years
const DEFAULT_START_YEAR: i32 = 2005;
const DEFAULT_END_YEAR: i32 = 2024;

lazy_static! {
    /// Monthly periods only; M13 is the annual average and is not a month.
    static ref MONTHS: HashMap<&'static str, u32> = HashMap::from([
        ("M01", 1),
        ("M02", 2),
        ("M03", 3),
        ("M04", 4),
        ("M05", 5),
        ("M06", 6),
        ("M07", 7),
        ("M08", 8),
        ("M09", 9),
        ("M10", 10),
        ("M11", 11),
        ("M12", 12),
    ]);
}

/// First-of-month date for a monthly BLS period such as `M07`.
fn period_date(year: &str, period: &str) -> Option<NaiveDate> {
    let month = *MONTHS.get(period)?;
    let year = year.parse::<i32>().ok()?;
    NaiveDate::from_ymd_opt(year, month, 1)
}

// scrape
// ----------------------------------------------------------------------------

/// Fetch every BLS series in the catalog: one `date,value` CSV per series
/// under `separate/`, plus one combined `date,county,value` dataset per
/// series title under `merged/`.
pub async fn scrape(config: &SpiderConfig, tui: bool) -> anyhow::Result<ScrapeSummary> {
    scrape_with(Arc::new(HttpTransport::new()), config, tui).await
}

/// [`scrape`] over an explicit transport; tests drive this with a scripted
/// one.
pub async fn scrape_with(
    transport: Arc<dyn Transport>,
    config: &SpiderConfig,
    tui: bool,
) -> anyhow::Result<ScrapeSummary> {
    let series_list = config.catalog.for_source(Source::Bls);
    if series_list.is_empty() {
        info!("no BLS series in the catalog");
        return Ok(ScrapeSummary::default());
    }

    let key = config.keys.bls()?;
    let adapter = BlsAdapter::new(Fetcher::with_transport(transport, config.retry), key);

    info!("fetching {} BLS series ...", series_list.len());
    let bars = crate::tui::BatchBars::new(series_list.len(), tui)?;

    let time = std::time::Instant::now();
    let mut summary = ScrapeSummary::default();
    // merged datasets accumulate per series title across counties
    let mut merged: BTreeMap<String, Vec<(String, Observation)>> = BTreeMap::new();

    for series in series_list {
        match adapter.fetch(series).await {
            Ok(observations) => {
                let county = series
                    .county
                    .clone()
                    .unwrap_or_else(|| "Maryland".to_string());
                let target = OutputTarget::new(
                    Source::Bls,
                    &Scope::County(county.clone()),
                    &series.title,
                );
                let path = target.absolute(&config.out_root);
                fs::write_series(&path, &observations)?;

                info!(
                    "saved {} ({} rows) to {}",
                    series.id,
                    observations.len(),
                    path.display()
                );
                bars.info(&format!(
                    "File saved to: {}",
                    target.relative_path().display()
                ));

                let rows = merged.entry(series.title.clone()).or_default();
                for obs in &observations {
                    rows.push((county.clone(), *obs));
                }

                bars.saved();
                summary.saved += 1;
            }
            Err(skip) => {
                warn!("Could not fetch series {}. Skipping.", skip.series_id);
                bars.warn(&format!(
                    "Could not fetch series {}. Skipping.",
                    skip.series_id
                ));
                bars.skipped();
                summary.skipped += 1;
            }
        }

        tokio::time::sleep(config.throttle).await;
    }

    for (title, rows) in merged {
        let table = merged_table(&title, rows);
        let target = OutputTarget::new(Source::Bls, &Scope::State, &title);
        let path = target.absolute(&config.out_root);
        fs::write_table(&path, &table)?;
        info!("merged dataset written to {}", path.display());
        bars.info(&format!(
            "File saved to: {}",
            target.relative_path().display()
        ));
    }
    bars.finish();

    debug!("BLS scrape complete. {}", crate::time_elapsed(time));
    Ok(summary)
}

/// Combined long-format dataset, ordered county then date.
fn merged_table(title: &str, mut rows: Vec<(String, Observation)>) -> MetricTable {
    rows.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.date.cmp(&b.1.date)));
    MetricTable {
        name: title.to_string(),
        columns: vec![
            "date".to_string(),
            "county".to_string(),
            "value".to_string(),
        ],
        rows: rows
            .into_iter()
            .map(|(county, obs)| vec![obs.date.to_string(), county, obs.value.to_string()])
            .collect(),
    }
}

// core
// ----------------------------------------------------------------------------

/// BLS adapter: POSTed timeseries requests, monthly date→value series.
pub struct BlsAdapter {
    fetcher: Fetcher,
    key: String,
}

impl BlsAdapter {
    pub fn new(fetcher: Fetcher, key: &str) -> Self {
        Self {
            fetcher,
            key: key.to_string(),
        }
    }

    fn request_for(&self, series: &SeriesDescriptor) -> ApiRequest {
        let start = series
            .observation_start
            .map(|d| d.year())
            .unwrap_or(DEFAULT_START_YEAR);
        let end = series
            .observation_end
            .map(|d| d.year())
            .unwrap_or(DEFAULT_END_YEAR);

        ApiRequest::post_json(
            TIMESERIES_URL,
            serde_json::json!({
                "seriesid": [series.id],
                "startyear": start.to_string(),
                "endyear": end.to_string(),
                "registrationkey": self.key,
            }),
        )
    }
}

#[async_trait]
impl SourceAdapter for BlsAdapter {
    type Output = Vec<Observation>;

    fn source(&self) -> Source {
        Source::Bls
    }

    async fn fetch(&self, series: &SeriesDescriptor) -> Result<Vec<Observation>, SkippedSeries> {
        let request = self.request_for(series);
        let payload: TimeseriesResponse = self.fetcher.fetch_json(&series.id, &request).await?;

        // the API reports key and series-id problems inside a 200 response
        if payload.status.as_deref() != Some("REQUEST_SUCCEEDED") {
            return Err(SkippedSeries::new(
                &series.id,
                1,
                FetchError::Malformed(format!(
                    "request not processed: {}",
                    payload.message.join("; ")
                )),
            ));
        }

        let raw = payload
            .results
            .and_then(|results| {
                results
                    .series
                    .into_iter()
                    .find(|s| s.series_id == series.id)
            })
            .ok_or_else(|| {
                SkippedSeries::new(
                    &series.id,
                    1,
                    FetchError::Malformed("series missing from response".to_string()),
                )
            })?;

        // newest-first on the wire; annual-average periods are dropped
        let mut observations: Vec<Observation> = raw
            .data
            .iter()
            .filter_map(|point| {
                let date = period_date(&point.year, &point.period)?;
                let value = point.value.parse::<f64>().ok()?;
                Some(Observation { date, value })
            })
            .collect();
        observations.sort_by_key(|obs| obs.date);

        Ok(observations)
    }
}

// de
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TimeseriesResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Vec<String>,
    #[serde(rename = "Results", default)]
    results: Option<Results>,
}

#[derive(Debug, Deserialize)]
struct Results {
    #[serde(default)]
    series: Vec<RawSeries>,
}

#[derive(Debug, Deserialize)]
struct RawSeries {
    #[serde(rename = "seriesID")]
    series_id: String,
    #[serde(default)]
    data: Vec<RawPoint>,
}

#[derive(Debug, Deserialize)]
struct RawPoint {
    year: String,
    period: String,
    value: String,
}

//////////////////////////////////////////////////////////////
// -- TESTS --
//////////////////////////////////////////////////////////////
