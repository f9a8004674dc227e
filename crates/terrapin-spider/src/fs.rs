use crate::adapter::{MetricTable, Observation};
use crate::catalog::Source;
use chrono::NaiveDate;
use rayon::prelude::{IntoParallelIterator, ParallelIterator};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, trace};

/// Scope of an output file: the whole state, or one county.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Scope {
    State,
    County(String),
}

impl Scope {
    pub fn of(county: Option<&str>) -> Self {
        match county {
            Some(name) => Scope::County(name.to_string()),
            None => Scope::State,
        }
    }
}

/// Normalize a display name into the safe filename token set.
///
/// Lowercase; spaces, slashes and hyphens become underscores; anything else
/// outside `[a-z0-9_]` is dropped; underscore runs collapse; no leading or
/// trailing underscore survives.
pub fn snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.to_lowercase().chars() {
        let mapped = match ch {
            ' ' | '/' | '\\' | '-' | '_' => '_',
            c if c.is_ascii_lowercase() || c.is_ascii_digit() => c,
            _ => continue,
        };
        if mapped == '_' && (out.is_empty() || out.ends_with('_')) {
            continue;
        }
        out.push(mapped);
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// A resolved output location under one source's CSV root.
///
/// The relative path is a pure function of (source, scope, name): the same
/// logical target always lands at the same file, so re-runs overwrite in
/// place instead of accumulating renamed variants.
///
/// Layout per source:
/// - FRED: `fred_csv_outputs/{county_data/{county},state_data}/...`
/// - BLS: `bls_csv_outputs/{separate,merged}/...`
/// - Socrata: `socrata_csv_outputs/county_data/{county}.csv`
/// - IPUMS: `ipums_csv_outputs/state_data/{table}.csv`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputTarget {
    relative: PathBuf,
}

impl OutputTarget {
    pub fn new(source: Source, scope: &Scope, name: &str) -> Self {
        let root = PathBuf::from(format!("{}_csv_outputs", source.slug()));
        let name = snake_case(name);

        let relative = match (source, scope) {
            // BLS keeps its own split: per-county files under separate/,
            // the combined datasets under merged/
            (Source::Bls, Scope::County(county)) => root
                .join("separate")
                .join(format!("{}_{}.csv", snake_case(county), name)),
            (Source::Bls, Scope::State) => root.join("merged").join(format!("{name}.csv")),

            // Socrata emits exactly one file per county
            (Source::Socrata, Scope::County(county)) => root
                .join("county_data")
                .join(format!("{}.csv", snake_case(county))),

            (_, Scope::County(county)) => {
                let county = snake_case(county);
                root.join("county_data")
                    .join(&county)
                    .join(format!("{county}_{name}.csv"))
            }
            (_, Scope::State) => root.join("state_data").join(format!("{name}.csv")),
        };

        Self { relative }
    }

    pub fn relative_path(&self) -> &Path {
        &self.relative
    }

    pub fn absolute(&self, out_root: &Path) -> PathBuf {
        out_root.join(&self.relative)
    }
}

// csv
// ----------------------------------------------------------------------------

/// Write a `date,value` series, rows ascending by date. Parent directories
/// are created as needed; an existing file is overwritten.
pub fn write_series(path: &Path, observations: &[Observation]) -> anyhow::Result<()> {
    let mut rows: Vec<&Observation> = observations.iter().collect();
    rows.sort_by_key(|obs| obs.date);

    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path).map_err(|err| {
        error!("failed to open {} for writing, error({err})", path.display());
        err
    })?;

    writer.write_record(["date", "value"])?;
    for obs in rows {
        writer.write_record([obs.date.to_string(), obs.value.to_string()])?;
    }
    writer.flush()?;

    trace!("wrote {} rows to {}", observations.len(), path.display());
    Ok(())
}

/// Write a pivoted/tabular output: header row, then rows in the order the
/// adapter produced them (adapters sort by date before handing tables over).
pub fn write_table(path: &Path, table: &MetricTable) -> anyhow::Result<()> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path).map_err(|err| {
        error!("failed to open {} for writing, error({err})", path.display());
        err
    })?;

    writer.write_record(&table.columns)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;

    trace!("wrote {} rows to {}", table.rows.len(), path.display());
    Ok(())
}

/// Read a `date,value` series back; the reading half used by downstream
/// dashboards and by the round-trip tests.
pub fn read_series(path: &Path) -> anyhow::Result<Vec<Observation>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut observations = Vec::new();
    for record in reader.records() {
        let record = record?;
        observations.push(Observation {
            date: NaiveDate::parse_from_str(&record[0], "%Y-%m-%d")?,
            value: record[1].parse()?,
        });
    }
    Ok(observations)
}

fn ensure_parent(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

// archives
// ----------------------------------------------------------------------------

/// Unpack a downloaded archive (`zip_file`) into `to_dir`, parallelising
/// across entries with [`rayon`].
///
/// [`rayon`]: https://docs.rs/rayon/latest/rayon/
pub fn unzip(zip_file: &Path, to_dir: &Path) -> anyhow::Result<()> {
    debug!("unzipping {} to {}", zip_file.display(), to_dir.display());

    let file = std::fs::File::open(zip_file)?;
    let archive = zip::ZipArchive::new(file).map_err(|err| {
        error!(
            "failed to open zip file at {}, error({err})",
            zip_file.display()
        );
        err
    })?;
    let len = archive.len();
    let archive = Arc::new(Mutex::new(archive));

    std::fs::create_dir_all(to_dir)?;

    (0..len)
        .into_par_iter()
        .try_for_each(|i| -> anyhow::Result<()> {
            let mut archive = archive.lock().expect("zip archive lock");
            let mut entry = archive.by_index(i)?;
            let out_path = to_dir.join(entry.mangled_name());

            if entry.is_dir() {
                std::fs::create_dir_all(&out_path)?;
                return Ok(());
            }
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let mut out_file = std::fs::File::create(&out_path)?;
            trace!("extracting {} to {}", entry.name(), out_path.display());
            std::io::copy(&mut entry, &mut out_file)?;
            Ok(())
        })?;

    debug!("{} unzipped to {}", zip_file.display(), to_dir.display());
    Ok(())
}

//////////////////////////////////////////////////////////////
// -- TESTS --
//////////////////////////////////////////////////////////////
