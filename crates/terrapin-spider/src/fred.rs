use crate::adapter::{Observation, SourceAdapter};
use crate::catalog::{SeriesDescriptor, Source};
use crate::error::{FetchError, SkippedSeries};
use crate::fetch::{ApiRequest, Fetcher, HttpTransport, Transport};
use crate::fs::{self, OutputTarget, Scope};
use crate::{ScrapeSummary, SpiderConfig};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

// RATE_LIMIT = 120 /60s per key
//
// observations = `https://api.stlouisfed.org/fred/series/observations`
//
// metadata = `https://api.stlouisfed.org/fred/series`, per series

// scrape
// ----------------------------------------------------------------------------

/// Fetch every FRED series in the catalog and write one `date,value` CSV
/// per series, filed by county or state scope.
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
    let series_list = config.catalog.for_source(Source::Fred);
    if series_list.is_empty() {
        info!("no FRED series in the catalog");
        return Ok(ScrapeSummary::default());
    }

    let key = config.keys.fred()?;
    let adapter = FredAdapter::new(Fetcher::with_transport(transport, config.retry), key);

    info!("fetching {} FRED series ...", series_list.len());
    let bars = crate::tui::BatchBars::new(series_list.len(), tui)?;

    let time = std::time::Instant::now();
    let mut summary = ScrapeSummary::default();
    for series in series_list {
        // metadata is operator-facing color; the data fetch decides success
        match adapter.fetch_info(series).await {
            Ok(meta) => {
                debug!("{}: {}", series.id, meta.describe());
                bars.info(&format!("{} | {}", series.id, meta.describe()));
            }
            Err(skip) => {
                warn!(
                    "Could not fetch metadata for {}: {}. Skipping metadata.",
                    series.id, skip.error
                );
            }
        }

        match adapter.fetch(series).await {
            Ok(observations) => {
                let scope = Scope::of(series.county.as_deref());
                let target = OutputTarget::new(Source::Fred, &scope, &series.title);
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

        // spread requests to stay under the rate limit
        tokio::time::sleep(config.throttle).await;
    }
    bars.finish();

    debug!("FRED scrape complete. {}", crate::time_elapsed(time));
    Ok(summary)
}

// core
// ----------------------------------------------------------------------------

/// FRED adapter: plain date→value series.
pub struct FredAdapter {
    fetcher: Fetcher,
    key: String,
}

impl FredAdapter {
    pub fn new(fetcher: Fetcher, key: &str) -> Self {
        Self {
            fetcher,
            key: key.to_string(),
        }
    }

    fn observations_url(&self, series_id: &str) -> String {
        format!(
            "https://api.stlouisfed.org/fred/series/observations?series_id={series_id}&api_key={key}&file_type=json",
            key = self.key
        )
    }

    fn info_url(&self, series_id: &str) -> String {
        format!(
            "https://api.stlouisfed.org/fred/series?series_id={series_id}&api_key={key}&file_type=json",
            key = self.key
        )
    }

    /// Best-effort series metadata for log lines; failures never block the
    /// data fetch.
    pub async fn fetch_info(
        &self,
        series: &SeriesDescriptor,
    ) -> Result<SeriesInfo, SkippedSeries> {
        let request = ApiRequest::get(self.info_url(&series.id));
        let payload: SeriesInfoResponse = self.fetcher.fetch_json(&series.id, &request).await?;
        payload.seriess.into_iter().next().ok_or_else(|| {
            SkippedSeries::new(
                &series.id,
                1,
                FetchError::Malformed("empty seriess array".to_string()),
            )
        })
    }
}

#[async_trait]
impl SourceAdapter for FredAdapter {
    type Output = Vec<Observation>;

    fn source(&self) -> Source {
        Source::Fred
    }

    async fn fetch(&self, series: &SeriesDescriptor) -> Result<Vec<Observation>, SkippedSeries> {
        let request = ApiRequest::get(self.observations_url(&series.id));
        let payload: Observations = self.fetcher.fetch_json(&series.id, &request).await?;

        // FRED marks missing values with "."; those rows are dropped
        let observations = payload
            .observations
            .iter()
            .filter_map(|obs| {
                let date = NaiveDate::parse_from_str(&obs.dated, "%Y-%m-%d").ok()?;
                let value = obs.value.parse::<f64>().ok()?;
                Some(Observation { date, value })
            })
            .collect();

        Ok(observations)
    }
}

// de
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Observations {
    observations: Vec<RawObservation>,
}

#[derive(Debug, Deserialize)]
struct RawObservation {
    #[serde(rename = "date")]
    dated: String,
    value: String,
}

/// Metadata block FRED returns per series.
#[derive(Debug, Deserialize)]
pub struct SeriesInfo {
    pub title: String,
    #[serde(default)]
    pub frequency_short: Option<String>,
    #[serde(default)]
    pub observation_start: Option<String>,
    #[serde(default)]
    pub observation_end: Option<String>,
}

impl SeriesInfo {
    pub fn describe(&self) -> String {
        format!(
            "{} [{}] {} to {}",
            self.title,
            self.frequency_short.as_deref().unwrap_or("?"),
            self.observation_start.as_deref().unwrap_or("?"),
            self.observation_end.as_deref().unwrap_or("?")
        )
    }
}

// the double-s is FRED's own field name
#[derive(Debug, Deserialize)]
struct SeriesInfoResponse {
    seriess: Vec<SeriesInfo>,
}

//////////////////////////////////////////////////////////////
// -- TESTS --
//////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{HttpResponse, RetryPolicy};

    struct CannedTransport(&'static str);

    #[async_trait]
    impl Transport for CannedTransport {
        async fn execute(&self, _request: &ApiRequest) -> Result<HttpResponse, FetchError> {
            Ok(HttpResponse {
                status: 200,
                body: self.0.as_bytes().to_vec(),
            })
        }
    }

    fn descriptor() -> SeriesDescriptor {
        SeriesDescriptor {
            id: "MDPOP".to_string(),
            title: "Resident Population".to_string(),
            source: Source::Fred,
            frequency: Some("A".to_string()),
            observation_start: None,
            observation_end: None,
            county: None,
        }
    }

    #[tokio::test]
    async fn observations_parse_and_missing_values_drop() {
        let payload = r#"{
            "observations": [
                {"date": "2020-01-01", "value": "6000000"},
                {"date": "2020-04-01", "value": "."},
                {"date": "2021-01-01", "value": "6050000.5"}
            ]
        }"#;
        let fetcher =
            Fetcher::with_transport(Arc::new(CannedTransport(payload)), RetryPolicy::default());
        let adapter = FredAdapter::new(fetcher, "testkey");

        let observations = adapter.fetch(&descriptor()).await.unwrap();
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].value, 6_000_000.0);
        assert_eq!(observations[1].value, 6_050_000.5);
    }

    #[tokio::test]
    async fn metadata_describe() {
        let payload = r#"{
            "seriess": [{
                "title": "Resident Population in Maryland",
                "frequency_short": "A",
                "observation_start": "1900-01-01",
                "observation_end": "2024-01-01"
            }]
        }"#;
        let fetcher =
            Fetcher::with_transport(Arc::new(CannedTransport(payload)), RetryPolicy::default());
        let adapter = FredAdapter::new(fetcher, "testkey");

        let meta = adapter.fetch_info(&descriptor()).await.unwrap();
        assert_eq!(
            meta.describe(),
            "Resident Population in Maryland [A] 1900-01-01 to 2024-01-01"
        );
    }

    #[test]
    fn request_urls_carry_key_and_id() {
        let fetcher = Fetcher::with_transport(
            Arc::new(CannedTransport("{}")),
            RetryPolicy::default(),
        );
        let adapter = FredAdapter::new(fetcher, "testkey");
        let url = adapter.observations_url("MDPOP");
        assert!(url.contains("series_id=MDPOP"));
        assert!(url.contains("api_key=testkey"));
        assert!(url.contains("file_type=json"));
    }
}
