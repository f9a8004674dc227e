use crate::cli::{Cli, Endpoint};
use terrapin_spider as spider;
use tracing::{debug, info, trace};

/// Run the selected endpoint scrapes, strictly in sequence.
///
/// Individual series skips are logged and tallied, never fatal; only setup
/// problems (credentials, catalog) error out of here.
pub(crate) async fn run(cli: &Cli, endpoints: Vec<Endpoint>, tui: bool) -> anyhow::Result<()> {
    trace!("loading credentials and catalog ...");
    let keys = spider::keys::ApiKeys::load(&cli.keys)?;
    let catalog = spider::catalog::Catalog::load(&cli.catalog)?;
    debug!("catalog holds {} series", catalog.series.len());

    let config = spider::SpiderConfig::new(keys, catalog, cli.out.clone());

    // start collecting data
    let time = std::time::Instant::now();
    let mut totals = spider::ScrapeSummary::default();
    for endpoint in endpoints {
        match endpoint {
            Endpoint::Fred => {
                let time = std::time::Instant::now();
                totals += spider::fred::scrape(&config, tui).await?;
                info!("FRED data collected, time elapsed: {:?}", time.elapsed());
            }
            Endpoint::Bls => {
                let time = std::time::Instant::now();
                totals += spider::bls::scrape(&config, tui).await?;
                info!("BLS data collected, time elapsed: {:?}", time.elapsed());
            }
            Endpoint::Socrata => {
                let time = std::time::Instant::now();
                totals += spider::socrata::scrape(&config, tui).await?;
                info!(
                    "foreclosure data collected, time elapsed: {:?}",
                    time.elapsed()
                );
            }
            Endpoint::Ipums => {
                let time = std::time::Instant::now();
                totals += spider::ipums::scrape(&config, tui).await?;
                info!(
                    "demographic data collected, time elapsed: {:?}",
                    time.elapsed()
                );
            }
        }
    }

    info!(
        "spider finished: {} series saved, {} skipped, time elapsed: {:?}",
        totals.saved,
        totals.skipped,
        time.elapsed()
    );
    if tui {
        println!(
            "done: {} series saved, {} skipped",
            totals.saved, totals.skipped
        );
    }

    Ok(())
}
