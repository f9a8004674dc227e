//! Full pipeline runs against a scripted transport: catalog in, CSV out.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use terrapin_spider::catalog::{Catalog, SeriesDescriptor, Source};
use terrapin_spider::error::FetchError;
use terrapin_spider::fetch::{ApiRequest, HttpResponse, Payload, RetryPolicy, Transport};
use terrapin_spider::keys::ApiKeys;
use terrapin_spider::{bls, fred, socrata, SpiderConfig};

/// Routes requests by substring of the URL (and POST body, for BLS-style
/// endpoints); first match wins, anything unmatched is a 404.
struct RoutedTransport {
    routes: Vec<(&'static str, u16, &'static str)>,
}

#[async_trait]
impl Transport for RoutedTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<HttpResponse, FetchError> {
        let haystack = match &request.payload {
            Payload::Get => request.url.clone(),
            Payload::PostJson(body) => format!("{} {body}", request.url),
        };
        for (pattern, status, body) in &self.routes {
            if haystack.contains(pattern) {
                return Ok(HttpResponse {
                    status: *status,
                    body: body.as_bytes().to_vec(),
                });
            }
        }
        Ok(HttpResponse {
            status: 404,
            body: Vec::new(),
        })
    }
}

fn test_keys() -> ApiKeys {
    ApiKeys {
        fred_api: Some("testkey".to_string()),
        bls_api: Some("testkey".to_string()),
        ipums_api: Some("testkey".to_string()),
    }
}

fn descriptor(id: &str, title: &str, source: Source, county: Option<&str>) -> SeriesDescriptor {
    SeriesDescriptor {
        id: id.to_string(),
        title: title.to_string(),
        source,
        frequency: None,
        observation_start: None,
        observation_end: None,
        county: county.map(str::to_string),
    }
}

fn config(catalog: Catalog, out_root: &std::path::Path) -> SpiderConfig {
    let mut config = SpiderConfig::new(test_keys(), catalog, out_root);
    config.throttle = Duration::ZERO;
    config.retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
    };
    config
}

#[tokio::test]
async fn state_series_lands_at_state_path_sorted() {
    let out = tempfile::tempdir().unwrap();
    let catalog = Catalog {
        series: vec![descriptor(
            "MDPOP",
            "Resident Population",
            Source::Fred,
            None,
        )],
    };

    // observations deliberately out of order; the writer sorts ascending
    let transport = Arc::new(RoutedTransport {
        routes: vec![
            (
                "fred/series/observations?series_id=MDPOP",
                200,
                r#"{"observations": [
                    {"date": "2021-01-01", "value": "6050000"},
                    {"date": "2020-01-01", "value": "6000000"}
                ]}"#,
            ),
            (
                "fred/series?series_id=MDPOP",
                200,
                r#"{"seriess": [{"title": "Resident Population in Maryland"}]}"#,
            ),
        ],
    });

    let summary = fred::scrape_with(transport, &config(catalog, out.path()), false)
        .await
        .unwrap();
    assert_eq!(summary.saved, 1);
    assert_eq!(summary.skipped, 0);

    let written = std::fs::read_to_string(
        out.path()
            .join("fred_csv_outputs/state_data/resident_population.csv"),
    )
    .unwrap();
    assert_eq!(
        written,
        "date,value\n2020-01-01,6000000\n2021-01-01,6050000\n"
    );
}

#[tokio::test]
async fn one_forbidden_series_does_not_abort_the_batch() {
    let out = tempfile::tempdir().unwrap();
    let counties = ["Allegany", "Baltimore", "Calvert", "Dorchester", "Frederick"];
    let catalog = Catalog {
        series: counties
            .iter()
            .enumerate()
            .map(|(i, county)| {
                descriptor(
                    &format!("S{}", i + 1),
                    "Unemployment Rate",
                    Source::Fred,
                    Some(county),
                )
            })
            .collect(),
    };

    let transport = Arc::new(RoutedTransport {
        routes: vec![
            // S3's observations are forbidden; everything else succeeds
            ("series/observations?series_id=S3", 403, ""),
            (
                "series/observations",
                200,
                r#"{"observations": [{"date": "2020-01-01", "value": "3.1"}]}"#,
            ),
            ("fred/series?", 200, r#"{"seriess": [{"title": "Unemployment Rate"}]}"#),
        ],
    });

    let summary = fred::scrape_with(transport, &config(catalog, out.path()), false)
        .await
        .unwrap();
    assert_eq!(summary.saved, 4);
    assert_eq!(summary.skipped, 1);

    let county_root = out.path().join("fred_csv_outputs/county_data");
    for county in ["allegany", "baltimore", "dorchester", "frederick"] {
        assert!(
            county_root
                .join(county)
                .join(format!("{county}_unemployment_rate.csv"))
                .exists(),
            "missing output for {county}"
        );
    }
    // the skipped series left nothing behind
    assert!(!county_root.join("calvert").exists());
}

#[tokio::test]
async fn rerun_is_idempotent() {
    let out = tempfile::tempdir().unwrap();
    let catalog = Catalog {
        series: vec![descriptor(
            "MDPOP",
            "Resident Population",
            Source::Fred,
            None,
        )],
    };
    let transport = Arc::new(RoutedTransport {
        routes: vec![
            (
                "series/observations",
                200,
                r#"{"observations": [{"date": "2020-01-01", "value": "6000000"}]}"#,
            ),
            ("fred/series?", 200, r#"{"seriess": [{"title": "Resident Population"}]}"#),
        ],
    });

    let cfg = config(catalog, out.path());
    fred::scrape_with(transport.clone(), &cfg, false).await.unwrap();
    fred::scrape_with(transport, &cfg, false).await.unwrap();

    let state_dir = out.path().join("fred_csv_outputs/state_data");
    let entries: Vec<_> = std::fs::read_dir(&state_dir).unwrap().collect();
    assert_eq!(entries.len(), 1, "re-run must overwrite, not duplicate");
}

#[tokio::test]
async fn bls_writes_separate_and_merged_outputs() {
    let out = tempfile::tempdir().unwrap();
    let catalog = Catalog {
        series: vec![
            descriptor(
                "LAUCN240010000000005",
                "Employment Count",
                Source::Bls,
                Some("Allegany"),
            ),
            descriptor(
                "LAUCN240050000000005",
                "Employment Count",
                Source::Bls,
                Some("Baltimore"),
            ),
        ],
    };

    // routed on the POSTed series id
    let transport = Arc::new(RoutedTransport {
        routes: vec![
            (
                "LAUCN240010000000005",
                200,
                r#"{"status": "REQUEST_SUCCEEDED", "Results": {"series": [{
                    "seriesID": "LAUCN240010000000005",
                    "data": [{"year": "2013", "period": "M01", "value": "28650"}]
                }]}}"#,
            ),
            (
                "LAUCN240050000000005",
                200,
                r#"{"status": "REQUEST_SUCCEEDED", "Results": {"series": [{
                    "seriesID": "LAUCN240050000000005",
                    "data": [{"year": "2013", "period": "M01", "value": "121000"}]
                }]}}"#,
            ),
        ],
    });

    let summary = bls::scrape_with(transport, &config(catalog, out.path()), false)
        .await
        .unwrap();
    assert_eq!(summary.saved, 2);

    let root = out.path().join("bls_csv_outputs");
    assert!(root.join("separate/allegany_employment_count.csv").exists());
    assert!(root.join("separate/baltimore_employment_count.csv").exists());

    let merged = std::fs::read_to_string(root.join("merged/employment_count.csv")).unwrap();
    assert_eq!(
        merged,
        "date,county,value\n2013-01-01,Allegany,28650\n2013-01-01,Baltimore,121000\n"
    );
}

#[tokio::test]
async fn socrata_writes_one_pivoted_file_per_county() {
    let out = tempfile::tempdir().unwrap();
    let catalog = Catalog {
        series: vec![descriptor(
            "w3bc-8mnv",
            "Notices of Foreclosure",
            Source::Socrata,
            None,
        )],
    };

    let transport = Arc::new(RoutedTransport {
        routes: vec![(
            "resource/w3bc-8mnv.json",
            200,
            r#"[
                {"date": "2021-07-01T00:00:00.000", "type": "NOI",
                 "allegany_county": "12", "anne_arundel_county": "38"},
                {"date": "2021-07-01T00:00:00.000", "type": "FPR",
                 "allegany_county": "3", "anne_arundel_county": "17"}
            ]"#,
        )],
    });

    let summary = socrata::scrape_with(transport, &config(catalog, out.path()), false)
        .await
        .unwrap();
    assert_eq!(summary.saved, 1);

    let allegany = std::fs::read_to_string(
        out.path()
            .join("socrata_csv_outputs/county_data/allegany.csv"),
    )
    .unwrap();
    assert_eq!(allegany, "OBSERVATION DATE,FPR,NOI\n2021-07-01,3,12\n");
}

#[tokio::test]
async fn missing_key_aborts_instead_of_skipping() {
    let out = tempfile::tempdir().unwrap();
    let catalog = Catalog {
        series: vec![descriptor("MDPOP", "Resident Population", Source::Fred, None)],
    };
    let mut cfg = config(catalog, out.path());
    cfg.keys = ApiKeys::default();

    let transport = Arc::new(RoutedTransport { routes: vec![] });
    assert!(fred::scrape_with(transport, &cfg, false).await.is_err());
}

#[test]
fn observation_dates_parse_iso() {
    // guards the date format shared by writers and readers
    assert_eq!(
        NaiveDate::parse_from_str("2020-01-01", "%Y-%m-%d")
            .unwrap()
            .to_string(),
        "2020-01-01"
    );
}
