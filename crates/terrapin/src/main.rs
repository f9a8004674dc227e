mod cli;
mod spider;

// remote imports
use crate::cli::Endpoint::*;
use clap::Parser;
use cli::{Cli, TraceLevel};
use tracing::{subscriber, trace, Level};
use tracing_subscriber::FmtSubscriber;

////////////////////////////////////////////////////////////////////////////

// preprocess the trace level, and open the .env file
fn preprocess(trace_level: Level) {
    dotenv::dotenv().ok();
    let my_subscriber = FmtSubscriber::builder()
        .with_max_level(trace_level)
        .finish();
    subscriber::set_global_default(my_subscriber).expect("Set subscriber");
}

////////////////////////////////////////////////////////////////////////////

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // set the trace level
    if let Some(trace_level) = cli.trace {
        preprocess(match trace_level {
            TraceLevel::DEBUG => Level::DEBUG,
            TraceLevel::ERROR => Level::ERROR,
            TraceLevel::INFO => Level::INFO,
            TraceLevel::TRACE => Level::TRACE,
            TraceLevel::WARN => Level::WARN,
        });
    } else {
        dotenv::dotenv().ok();
    }
    trace!("command line input recorded: {cli:?}");

    // if no trace level provided, use tui
    let tui = match cli.trace {
        Some(_) => false,
        None => true,
    };

    // read cli inputs
    use cli::Commands::*;
    match &cli.command {
        // `terrapin spider <Option<Vec<Endpoint>>>`: fetch endpoints
        Spider { endpoints } => {
            // if no endpoints provided, fetch all
            match endpoints {
                Some(endpoints) => spider::run(&cli, endpoints.clone(), tui).await?,
                None => spider::run(&cli, vec![Fred, Bls, Socrata, Ipums], tui).await?,
            }
        }

        // dry inspection of the catalog file
        Catalog => {
            use terrapin_spider::catalog::{Catalog, Source};

            let catalog = Catalog::load(&cli.catalog)?;
            for source in Source::ALL {
                let series = catalog.for_source(source);
                if series.is_empty() {
                    continue;
                }
                println!("{source} ({} series):", series.len());
                for descriptor in series {
                    println!(
                        "  {:<24} {} [{}]",
                        descriptor.id,
                        descriptor.title,
                        descriptor.county.as_deref().unwrap_or("Maryland"),
                    );
                }
            }
        }
    }

    Ok(())
}
