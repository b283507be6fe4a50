use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fetchfleet_core::{
    load_config, load_default_config, metrics, validate_config, CapacityReservation, Config,
    Connection, LocalQueueService, Outcome, ReqwestFetcher,
};

/// Config file used when `FETCHFLEET_CONFIG` is unset.
const DEFAULT_CONFIG_PATH: &str = "fetchfleet.toml";

const USAGE: &str = "usage: fetchfleet [--metrics] <url>...";

/// One line of output per input URL.
#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
enum Line<'a> {
    Success {
        index: usize,
        url: &'a str,
        request_id: &'a str,
        status_code: u16,
        bytes: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        content_type: Option<&'a str>,
    },
    Failure {
        index: usize,
        url: &'a str,
        request_id: &'a str,
        kind: &'static str,
        message: &'a str,
    },
    Missing {
        index: usize,
        url: &'a str,
    },
}

impl<'a> Line<'a> {
    fn new(index: usize, url: &'a str, outcome: Option<&'a Outcome>) -> Self {
        match outcome {
            Some(Outcome::Success(response)) => Line::Success {
                index,
                url,
                request_id: &response.request_id,
                status_code: response.status_code,
                bytes: response.content.len(),
                content_type: response.header("content-type"),
            },
            Some(Outcome::Failure(error)) => Line::Failure {
                index,
                url,
                request_id: &error.request_id,
                kind: error.error.kind.as_str(),
                message: &error.error.message,
            },
            None => Line::Missing { index, url },
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Logs go to stderr, stdout carries the results
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let (flags, urls): (Vec<String>, Vec<String>) =
        std::env::args().skip(1).partition(|a| a.starts_with("--") || a == "-h");
    if urls.is_empty() || flags.iter().any(|f| f == "-h" || f == "--help") {
        bail!(USAGE);
    }
    if let Some(unknown) = flags.iter().find(|f| *f != "--metrics") {
        bail!("unknown option {}\n{}", unknown, USAGE);
    }
    let dump_metrics = !flags.is_empty();

    let config = load()?;
    validate_config(&config).context("Configuration validation failed")?;

    let service = Arc::new(LocalQueueService::new());
    let fetcher = Arc::new(
        ReqwestFetcher::new(config.http.clone()).context("Failed to create HTTP client")?,
    );
    let connection = Connection::new(config.connection.clone(), service.clone(), fetcher)
        .with_codec(config.codec.codec());

    let results = match &config.capacity {
        Some(capacity) => {
            CapacityReservation::scoped(service.clone(), capacity.spec(), |reservation| {
                info!(%reservation, "Holding capacity for the batch");
                fetch_all(&connection, &urls)
            })
            .await?
        }
        None => fetch_all(&connection, &urls).await?,
    };

    for (index, (url, outcome)) in urls.iter().zip(&results).enumerate() {
        let line = Line::new(index, url, outcome.as_ref());
        println!("{}", serde_json::to_string(&line)?);
    }

    if dump_metrics {
        eprint!("{}", metrics::encode_metrics().context("Failed to encode metrics")?);
    }
    Ok(())
}

fn load() -> Result<Config> {
    let path = match std::env::var("FETCHFLEET_CONFIG") {
        Ok(path) => Some(PathBuf::from(path)),
        Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => Some(PathBuf::from(DEFAULT_CONFIG_PATH)),
        Err(_) => None,
    };

    match path {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            load_config(&path).with_context(|| format!("Failed to load config from {:?}", path))
        }
        None => load_default_config().context("Failed to load default configuration"),
    }
}

async fn fetch_all(connection: &Connection, urls: &[String]) -> Result<Vec<Option<Outcome>>> {
    let urls = urls.to_vec();
    let results = connection
        .run_session(|c| Box::pin(async move { c.send(urls).await }))
        .await?;
    Ok(results)
}
