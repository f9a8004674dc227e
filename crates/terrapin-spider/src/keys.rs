use serde::Deserialize;
use std::path::Path;
use tracing::{debug, error};

/// API credentials, one entry per keyed source.
///
/// Read from `api_keys.yaml` (keys stay out of the repo), with environment
/// variables layered on top so `FRED_API=...` overrides the file. Socrata's
/// open-data endpoint is unauthenticated and has no entry.
///
/// ```yaml
/// fred_api: "abcdef0123456789"
/// bls_api: "..."
/// ipums_api: "..."
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ApiKeys {
    pub fred_api: Option<String>,
    pub bls_api: Option<String>,
    pub ipums_api: Option<String>,
}

impl ApiKeys {
    /// Load credentials from a YAML file, environment variables winning.
    ///
    /// A missing or unreadable file is a setup error and aborts the run;
    /// a missing individual key only fails once a source that needs it is
    /// scraped.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let keys: ApiKeys = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::default())
            .build()
            .map_err(|err| {
                error!("failed to read credentials at {}, error({err})", path.display());
                err
            })?
            .try_deserialize()
            .map_err(|err| {
                error!("failed to parse credentials at {}, error({err})", path.display());
                err
            })?;

        debug!(
            "credentials loaded (fred: {}, bls: {}, ipums: {})",
            keys.fred_api.is_some(),
            keys.bls_api.is_some(),
            keys.ipums_api.is_some()
        );
        Ok(keys)
    }

    pub fn fred(&self) -> anyhow::Result<&str> {
        self.fred_api
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("missing fred_api key"))
    }

    pub fn bls(&self) -> anyhow::Result<&str> {
        self.bls_api
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("missing bls_api key"))
    }

    pub fn ipums(&self) -> anyhow::Result<&str> {
        self.ipums_api
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("missing ipums_api key"))
    }
}

//////////////////////////////////////////////////////////////
// -- TESTS --
//////////////////////////////////////////////////////////////
