use chrono::NaiveDate;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use tracing::{debug, error};

/// The external data source a series belongs to.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Source {
    Fred,
    Bls,
    Socrata,
    Ipums,
}

impl Source {
    /// Prefix of the source's CSV output root, e.g. `fred_csv_outputs`.
    pub fn slug(&self) -> &'static str {
        match self {
            Source::Fred => "fred",
            Source::Bls => "bls",
            Source::Socrata => "socrata",
            Source::Ipums => "ipums",
        }
    }

    pub const ALL: [Source; 4] = [Source::Fred, Source::Bls, Source::Socrata, Source::Ipums];
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Source::Fred => "FRED",
            Source::Bls => "BLS",
            Source::Socrata => "SOCRATA",
            Source::Ipums => "IPUMS",
        };
        write!(f, "{name}")
    }
}

/// One row of the indicator catalog.
///
/// Immutable once read; everything an adapter needs to fetch and file one
/// series. `county` is empty for state-scope rows.
#[derive(Clone, Debug, Deserialize)]
pub struct SeriesDescriptor {
    pub id: String,
    pub title: String,
    pub source: Source,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default, rename = "start")]
    pub observation_start: Option<NaiveDate>,
    #[serde(default, rename = "end")]
    pub observation_end: Option<NaiveDate>,
    #[serde(default)]
    pub county: Option<String>,
}

/// The parsed indicator catalog.
///
/// The catalog is maintained as a spreadsheet elsewhere; the spider
/// consumes its CSV export with columns
/// `id,title,source,frequency,start,end,county`.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    pub series: Vec<SeriesDescriptor>,
}

impl Catalog {
    /// Read the catalog file. Blank `id` rows are dropped, matching how the
    /// source workbook pads its sheets.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut reader = csv::Reader::from_path(path).map_err(|err| {
            error!("failed to open catalog at {}, error({err})", path.display());
            err
        })?;

        let headers = reader.headers()?.clone();
        let id_column = headers.iter().position(|h| h == "id").unwrap_or(0);

        let mut series = Vec::new();
        for row in reader.records() {
            let record = row.map_err(|err| {
                error!("failed to read catalog row, error({err})");
                err
            })?;
            // padding rows from the source workbook come through blank
            if record.get(id_column).map_or(true, |id| id.trim().is_empty()) {
                continue;
            }

            let descriptor: SeriesDescriptor = record.deserialize(Some(&headers)).map_err(|err| {
                error!("failed to parse catalog row, error({err})");
                err
            })?;
            series.push(descriptor);
        }

        debug!("catalog loaded: {} series from {}", series.len(), path.display());
        Ok(Self { series })
    }

    /// All series belonging to one source, in catalog order.
    pub fn for_source(&self, source: Source) -> Vec<&SeriesDescriptor> {
        self.series.iter().filter(|s| s.source == source).collect()
    }
}

//////////////////////////////////////////////////////////////
// -- TESTS --
//////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
id,title,source,frequency,start,end,county
MDPOP,Resident Population,FRED,A,2000-01-01,2024-01-01,
MDMONT5POP,Resident Population,FRED,A,,,Montgomery
LAUCN240010000000005,Employment Count,BLS,M,2011-01-01,2014-12-01,Allegany
w3bc-8mnv,Notices of Foreclosure,SOCRATA,M,,,
,,,,,,
";

    fn write_sample(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("indicator_catalog.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        path
    }

    #[test]
    fn load_and_partition() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::load(&write_sample(&dir)).unwrap();

        // the all-blank padding row is dropped
        assert_eq!(catalog.series.len(), 4);
        assert_eq!(catalog.for_source(Source::Fred).len(), 2);
        assert_eq!(catalog.for_source(Source::Bls).len(), 1);
        assert_eq!(catalog.for_source(Source::Socrata).len(), 1);
        assert!(catalog.for_source(Source::Ipums).is_empty());
    }

    #[test]
    fn descriptor_fields() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::load(&write_sample(&dir)).unwrap();

        let state = &catalog.series[0];
        assert_eq!(state.id, "MDPOP");
        assert_eq!(state.source, Source::Fred);
        assert_eq!(
            state.observation_start,
            NaiveDate::from_ymd_opt(2000, 1, 1)
        );
        assert!(state.county.is_none());

        let county = &catalog.series[1];
        assert_eq!(county.county.as_deref(), Some("Montgomery"));
        assert!(county.observation_start.is_none());
    }

    #[test]
    fn missing_catalog_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Catalog::load(&dir.path().join("nope.csv")).is_err());
    }
}
