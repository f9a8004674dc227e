use crate::adapter::{MetricTable, SourceAdapter};
use crate::catalog::{SeriesDescriptor, Source};
use crate::error::{FetchError, SkippedSeries};
use crate::fetch::{ApiRequest, Fetcher, HttpTransport, Transport};
use crate::fs::{self, OutputTarget, Scope};
use crate::{ScrapeSummary, SpiderConfig};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

// extract workflow:
// 1. POST the extract request
// 2. poll until the archive is built
// 3. download the table-data zip
// 4. unzip; keep the Maryland rows of each table

const EXTRACTS_URL: &str = "https://api.ipums.org/extracts?collection=nhgis&version=2";

// NHGIS state FIPS code for Maryland
const MARYLAND_STATEA: &str = "24";

const MAX_POLLS: u32 = 30;
const POLL_DELAY: Duration = Duration::from_secs(10);

/// Geographic key columns kept in every output table.
const KEY_COLUMNS: [&str; 4] = ["GISJOIN", "YEAR", "STATE", "COUNTY"];

// scrape
// ----------------------------------------------------------------------------

/// Run the NHGIS extract workflow for each IPUMS catalog entry and write
/// one CSV per extracted table, filtered to Maryland rows.
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
    let series_list = config.catalog.for_source(Source::Ipums);
    if series_list.is_empty() {
        info!("no IPUMS series in the catalog");
        return Ok(ScrapeSummary::default());
    }

    let key = config.keys.ipums()?;
    let buffer_dir = config.out_root.join("buffer").join("ipums");
    let adapter = IpumsAdapter::new(
        Fetcher::with_transport(transport, config.retry),
        key,
        buffer_dir,
    );

    info!("requesting {} NHGIS extract(s) ...", series_list.len());
    let bars = crate::tui::BatchBars::new(series_list.len(), tui)?;

    let time = std::time::Instant::now();
    let mut summary = ScrapeSummary::default();
    for series in series_list {
        match adapter.fetch(series).await {
            Ok(tables) => {
                for table in &tables {
                    let target = OutputTarget::new(Source::Ipums, &Scope::State, &table.name);
                    let path = target.absolute(&config.out_root);
                    fs::write_table(&path, table)?;
                    bars.info(&format!(
                        "File saved to: {}",
                        target.relative_path().display()
                    ));
                }
                info!("saved {} ({} table(s))", series.id, tables.len());
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

    debug!("IPUMS scrape complete. {}", crate::time_elapsed(time));
    Ok(summary)
}

// core
// ----------------------------------------------------------------------------

/// IPUMS NHGIS adapter: bulk extract archives reduced to Maryland tables.
///
/// Catalog ids take the form `{dataset}/{table}`, e.g. `1990_STF1/NP1`.
pub struct IpumsAdapter {
    fetcher: Fetcher,
    key: String,
    buffer_dir: PathBuf,
    poll_delay: Duration,
}

impl IpumsAdapter {
    pub fn new(fetcher: Fetcher, key: &str, buffer_dir: PathBuf) -> Self {
        Self {
            fetcher,
            key: key.to_string(),
            buffer_dir,
            poll_delay: POLL_DELAY,
        }
    }

    #[cfg(test)]
    fn with_poll_delay(mut self, poll_delay: Duration) -> Self {
        self.poll_delay = poll_delay;
        self
    }

    /// Submit the extract request; NHGIS answers with an extract number.
    async fn submit_extract(&self, series: &SeriesDescriptor) -> Result<u64, SkippedSeries> {
        let (dataset, table) = series.id.split_once('/').ok_or_else(|| {
            SkippedSeries::new(
                &series.id,
                1,
                FetchError::Malformed("catalog id is not dataset/table".to_string()),
            )
        })?;

        let mut datasets = serde_json::Map::new();
        datasets.insert(
            dataset.to_string(),
            serde_json::json!({
                "dataTables": [table],
                "geogLevels": ["county"],
            }),
        );
        let body = serde_json::json!({
            "datasets": datasets,
            "dataFormat": "csv_header",
            "description": format!("terrapin: {}", series.title),
        });
        let request =
            ApiRequest::post_json(EXTRACTS_URL, body).header("Authorization", &self.key);

        let submitted: ExtractStatus = self.fetcher.fetch_json(&series.id, &request).await?;
        debug!("extract {} submitted for {}", submitted.number, series.id);
        Ok(submitted.number)
    }

    fn extract_url(&self, number: u64) -> String {
        format!("https://api.ipums.org/extracts/{number}?collection=nhgis&version=2")
    }

    /// Poll until the extract archive is built, bounded by [`MAX_POLLS`].
    async fn poll_extract(
        &self,
        series: &SeriesDescriptor,
        number: u64,
    ) -> Result<String, SkippedSeries> {
        let request = ApiRequest::get(self.extract_url(number)).header("Authorization", &self.key);

        for poll in 1..=MAX_POLLS {
            let status: ExtractStatus = self.fetcher.fetch_json(&series.id, &request).await?;
            trace!("extract {number} poll {poll}: {}", status.status);

            if status.status == "completed" {
                return status
                    .download_links
                    .and_then(|links| links.table_data)
                    .map(|link| link.url)
                    .ok_or_else(|| {
                        SkippedSeries::new(
                            &series.id,
                            poll,
                            FetchError::Malformed(
                                "completed extract has no table data link".to_string(),
                            ),
                        )
                    });
            }
            tokio::time::sleep(self.poll_delay).await;
        }

        Err(SkippedSeries::new(
            &series.id,
            MAX_POLLS,
            FetchError::Timeout,
        ))
    }

    /// Download the archive through the retrying fetcher and stage it in
    /// the buffer directory.
    async fn download(
        &self,
        series: &SeriesDescriptor,
        url: &str,
        number: u64,
    ) -> Result<PathBuf, SkippedSeries> {
        let request = ApiRequest::get(url).header("Authorization", &self.key);
        let bytes = self.fetcher.fetch_bytes(&series.id, &request).await?;

        let zip_path = self.buffer_dir.join(format!("extract_{number}.zip"));
        tokio::fs::create_dir_all(&self.buffer_dir)
            .await
            .map_err(|err| archive_skip(&series.id, &err))?;
        tokio::fs::write(&zip_path, &bytes)
            .await
            .map_err(|err| archive_skip(&series.id, &err))?;

        debug!("extract {number} downloaded to {}", zip_path.display());
        Ok(zip_path)
    }
}

fn archive_skip(series_id: &str, err: &dyn std::fmt::Display) -> SkippedSeries {
    SkippedSeries::new(series_id, 1, FetchError::Archive(err.to_string()))
}

#[async_trait]
impl SourceAdapter for IpumsAdapter {
    type Output = Vec<MetricTable>;

    fn source(&self) -> Source {
        Source::Ipums
    }

    async fn fetch(&self, series: &SeriesDescriptor) -> Result<Vec<MetricTable>, SkippedSeries> {
        let number = self.submit_extract(series).await?;
        let link = self.poll_extract(series, number).await?;
        let zip_path = self.download(series, &link, number).await?;

        let table_dir = self.buffer_dir.join(format!("extract_{number}"));
        fs::unzip(&zip_path, &table_dir).map_err(|err| archive_skip(&series.id, &err))?;

        // the zip is not kept once its tables are unpacked
        if let Err(err) = std::fs::remove_file(&zip_path) {
            warn!("failed to delete {}, error({err})", zip_path.display());
        }

        let tables =
            read_maryland_tables(&table_dir).map_err(|err| archive_skip(&series.id, &err))?;
        if tables.is_empty() {
            return Err(SkippedSeries::new(
                &series.id,
                1,
                FetchError::Malformed("extract contained no data tables".to_string()),
            ));
        }
        Ok(tables)
    }
}

// tables
// ----------------------------------------------------------------------------

/// Read every CSV the extract shipped and keep the Maryland rows, keyed by
/// GISJOIN and year. Non-CSV entries (codebooks) are ignored.
fn read_maryland_tables(dir: &Path) -> anyhow::Result<Vec<MetricTable>> {
    let mut tables = Vec::new();
    for path in csv_files(dir)? {
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("table")
            .to_string();
        if let Some(table) = maryland_table(&path, &name)? {
            tables.push(table);
        }
    }
    tables.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(tables)
}

fn csv_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().and_then(|ext| ext.to_str()) == Some("csv") {
                files.push(path);
            }
        }
    }
    Ok(files)
}

/// Project one extracted table down to its Maryland rows and the columns
/// worth keeping: the geographic keys plus every data column.
fn maryland_table(path: &Path, name: &str) -> anyhow::Result<Option<MetricTable>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    let statea = headers.iter().position(|h| h == "STATEA");
    let state = headers.iter().position(|h| h == "STATE");
    if statea.is_none() && state.is_none() {
        // not a geographic table
        return Ok(None);
    }

    let kept: Vec<usize> = headers
        .iter()
        .enumerate()
        .filter_map(|(idx, header)| {
            (KEY_COLUMNS.contains(&header) || is_data_column(header)).then_some(idx)
        })
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let is_maryland = statea
            .map(|idx| record.get(idx) == Some(MARYLAND_STATEA))
            .unwrap_or(false)
            || state
                .map(|idx| record.get(idx) == Some("Maryland"))
                .unwrap_or(false);
        if !is_maryland {
            continue;
        }
        rows.push(
            kept.iter()
                .map(|&idx| record.get(idx).unwrap_or("").to_string())
                .collect(),
        );
    }

    // keyed by (YEAR, GISJOIN): year ascending, then join id
    let year = kept
        .iter()
        .position(|&idx| headers.get(idx) == Some("YEAR"));
    let gisjoin = kept
        .iter()
        .position(|&idx| headers.get(idx) == Some("GISJOIN"));
    rows.sort_by(|a: &Vec<String>, b: &Vec<String>| {
        let key = |row: &Vec<String>| {
            (
                year.and_then(|idx| row.get(idx).cloned()).unwrap_or_default(),
                gisjoin
                    .and_then(|idx| row.get(idx).cloned())
                    .unwrap_or_default(),
            )
        };
        key(a).cmp(&key(b))
    });

    Ok(Some(MetricTable {
        name: name.to_string(),
        columns: kept
            .iter()
            .map(|&idx| headers.get(idx).unwrap_or("").to_string())
            .collect(),
        rows,
    }))
}

/// NHGIS data columns look like `D6Z001`: an uppercase table code ending in
/// a three-digit breakdown index. Geographic code columns (`STATEA`,
/// `COUNTYA`, ...) do not.
fn is_data_column(header: &str) -> bool {
    header.len() >= 4
        && header.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        && header.chars().rev().take(3).all(|c| c.is_ascii_digit())
}

// de
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractStatus {
    #[serde(default)]
    number: u64,
    #[serde(default)]
    status: String,
    #[serde(default)]
    download_links: Option<DownloadLinks>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadLinks {
    #[serde(default)]
    table_data: Option<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    url: String,
}

//////////////////////////////////////////////////////////////
// -- TESTS --
//////////////////////////////////////////////////////////////
