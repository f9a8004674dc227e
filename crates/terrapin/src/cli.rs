use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Sets the level of tracing.
    #[arg(short, long, global = true)]
    pub trace: Option<TraceLevel>,

    /// Path to the indicator catalog CSV.
    #[arg(long, global = true, default_value = "indicator_catalog.csv")]
    pub catalog: PathBuf,

    /// Path to the API credentials file.
    #[arg(long, global = true, default_value = "api_keys.yaml")]
    pub keys: PathBuf,

    /// Root directory the per-source CSV output folders are created under.
    #[arg(long, global = true, default_value = ".")]
    pub out: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch indicator data and collect it to per-source CSV folders.
    Spider {
        /// Specify the endpoints to fetch.
        ///
        /// If no endpoints are provided, spider will collect all.
        #[arg(short, long)]
        endpoints: Option<Vec<Endpoint>>,
    },

    /// Parse the indicator catalog and print what would be fetched.
    Catalog,
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
#[clap(rename_all = "UPPERCASE")]
pub enum TraceLevel {
    DEBUG,
    ERROR,
    INFO,
    TRACE,
    WARN,
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// County & statewide FRED indicators.
    Fred,

    /// County employment series from the BLS.
    Bls,

    /// Maryland foreclosure filings (Socrata open data).
    Socrata,

    /// IPUMS NHGIS demographic extracts.
    Ipums,
}
