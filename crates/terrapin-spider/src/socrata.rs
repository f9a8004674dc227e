use crate::adapter::{MetricTable, SourceAdapter};
use crate::catalog::{SeriesDescriptor, Source};
use crate::error::SkippedSeries;
use crate::fetch::{ApiRequest, Fetcher, HttpTransport, Transport};
use crate::fs::{self, OutputTarget, Scope};
use crate::{ScrapeSummary, SpiderConfig};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

// no auth; Socrata caps responses at 1000 rows unless $limit is raised
//
// dataset = `https://opendata.maryland.gov/resource/{id}.json`

const ROW_LIMIT: u32 = 50_000;

// scrape
// ----------------------------------------------------------------------------

/// Fetch each Socrata dataset in the catalog and write one pivoted CSV per
/// county, foreclosure-type codes spread across columns.
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
    let series_list = config.catalog.for_source(Source::Socrata);
    if series_list.is_empty() {
        info!("no Socrata datasets in the catalog");
        return Ok(ScrapeSummary::default());
    }

    let adapter = SocrataAdapter::new(Fetcher::with_transport(transport, config.retry));
    info!("fetching {} Socrata dataset(s) ...", series_list.len());
    let bars = crate::tui::BatchBars::new(series_list.len(), tui)?;

    let time = std::time::Instant::now();
    let mut summary = ScrapeSummary::default();
    for series in series_list {
        match adapter.fetch(series).await {
            Ok(counties) => {
                for (county, table) in &counties {
                    let target =
                        OutputTarget::new(Source::Socrata, &Scope::County(county.clone()), county);
                    let path = target.absolute(&config.out_root);
                    fs::write_table(&path, table)?;
                    bars.info(&format!(
                        "File saved to: {}",
                        target.relative_path().display()
                    ));
                }
                info!(
                    "saved {} ({} county tables)",
                    series.id,
                    counties.len()
                );
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
    bars.finish();

    debug!("Socrata scrape complete. {}", crate::time_elapsed(time));
    Ok(summary)
}

// core
// ----------------------------------------------------------------------------

/// Socrata adapter: wide-by-county dataset melted and re-pivoted per
/// county.
pub struct SocrataAdapter {
    fetcher: Fetcher,
}

impl SocrataAdapter {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }

    fn dataset_url(&self, dataset_id: &str) -> String {
        format!("https://opendata.maryland.gov/resource/{dataset_id}.json?$limit={ROW_LIMIT}")
    }
}

#[async_trait]
impl SourceAdapter for SocrataAdapter {
    type Output = BTreeMap<String, MetricTable>;

    fn source(&self) -> Source {
        Source::Socrata
    }

    async fn fetch(&self, series: &SeriesDescriptor) -> Result<Self::Output, SkippedSeries> {
        let request = ApiRequest::get(self.dataset_url(&series.id));
        let rows: Vec<HashMap<String, Value>> =
            self.fetcher.fetch_json(&series.id, &request).await?;
        debug!("{}: {} raw rows", series.id, rows.len());
        Ok(pivot_by_county(&rows))
    }
}

/// Melt the wide-by-county records, then re-pivot per county so each
/// foreclosure-type code becomes its own column.
///
/// Rows arrive shaped `{date, type, allegany_county: n, ...}`; system
/// columns (`:id` etc.) are ignored, missing counts become 0, and dates
/// lose their `T00:00:00.000` tail.
fn pivot_by_county(rows: &[HashMap<String, Value>]) -> BTreeMap<String, MetricTable> {
    // county -> date -> code -> count
    let mut counties: BTreeMap<String, BTreeMap<String, BTreeMap<String, f64>>> = BTreeMap::new();
    let mut codes: BTreeSet<String> = BTreeSet::new();

    for row in rows {
        let date = match row.get("date").and_then(Value::as_str) {
            Some(raw) => raw.split('T').next().unwrap_or(raw).to_string(),
            None => continue,
        };
        let code = match row.get("type").and_then(Value::as_str) {
            Some(code) => code.to_string(),
            None => continue,
        };
        codes.insert(code.clone());

        for (column, value) in row {
            if column == "date" || column == "type" || column.starts_with(':') {
                continue;
            }
            let county = column.trim_end_matches("_county").to_string();
            counties
                .entry(county)
                .or_default()
                .entry(date.clone())
                .or_default()
                .insert(code.clone(), numeric(value));
        }
    }

    counties
        .into_iter()
        .map(|(county, dates)| {
            let mut columns = vec!["OBSERVATION DATE".to_string()];
            columns.extend(codes.iter().cloned());

            // BTreeMap keys are ISO dates, so iteration is date-ascending
            let rows = dates
                .into_iter()
                .map(|(date, counts)| {
                    let mut row = vec![date];
                    for code in &codes {
                        row.push(counts.get(code).copied().unwrap_or(0.0).to_string());
                    }
                    row
                })
                .collect();

            let table = MetricTable {
                name: county.clone(),
                columns,
                rows,
            };
            (county, table)
        })
        .collect()
}

fn numeric(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

//////////////////////////////////////////////////////////////
// -- TESTS --
//////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
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

    const PAYLOAD: &str = r#"[
        {"date": "2021-08-01T00:00:00.000", "type": "NOI",
         "allegany_county": "9", "anne_arundel_county": "41", ":id": "row-1"},
        {"date": "2021-07-01T00:00:00.000", "type": "NOI",
         "allegany_county": "12", "anne_arundel_county": "38"},
        {"date": "2021-07-01T00:00:00.000", "type": "FPR",
         "allegany_county": 3, "anne_arundel_county": "17"},
        {"date": "2021-07-01T00:00:00.000", "type": "NOF",
         "allegany_county": null, "anne_arundel_county": "5"}
    ]"#;

    fn descriptor() -> SeriesDescriptor {
        SeriesDescriptor {
            id: "w3bc-8mnv".to_string(),
            title: "Notices of Foreclosure".to_string(),
            source: Source::Socrata,
            frequency: Some("M".to_string()),
            observation_start: None,
            observation_end: None,
            county: None,
        }
    }

    #[tokio::test]
    async fn pivot_per_county() {
        let fetcher =
            Fetcher::with_transport(Arc::new(CannedTransport(PAYLOAD)), RetryPolicy::default());
        let adapter = SocrataAdapter::new(fetcher);

        let counties = adapter.fetch(&descriptor()).await.unwrap();
        assert_eq!(counties.len(), 2);

        let allegany = &counties["allegany"];
        // codes sorted, one column each, after the date column
        assert_eq!(allegany.columns, vec!["OBSERVATION DATE", "FPR", "NOF", "NOI"]);
        // rows date-ascending; null and absent counts filled with 0
        assert_eq!(
            allegany.rows,
            vec![
                vec!["2021-07-01", "3", "0", "12"],
                vec!["2021-08-01", "0", "0", "9"],
            ]
            .into_iter()
            .map(|row| row.into_iter().map(String::from).collect::<Vec<_>>())
            .collect::<Vec<_>>()
        );

        let anne_arundel = &counties["anne_arundel"];
        assert_eq!(
            anne_arundel.rows[0],
            vec!["2021-07-01", "17", "5", "38"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn system_columns_are_ignored() {
        let rows: Vec<HashMap<String, Value>> =
            serde_json::from_str(PAYLOAD).unwrap();
        let counties = pivot_by_county(&rows);
        assert!(!counties.contains_key(":id"));
        assert!(!counties.contains_key("id"));
    }
}
