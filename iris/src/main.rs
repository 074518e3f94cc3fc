//! iris - drive the instrument from the command line
//!
//! This tool provides commands for:
//! - Checking configuration and the persisted visitor identity
//! - Sending a single custom event
//! - Browsing a sequence of URLs with pageview capture enabled
//! - Reporting one web-vital measurement
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/iris/config.toml (~/.config/iris/config.toml)
//! - Storage: $XDG_DATA_HOME/iris/storage.json (~/.local/share/iris/storage.json)
//! - Logs: $XDG_STATE_HOME/iris/iris.log (~/.local/state/iris/iris.log)

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use iris_core::capture::vitals::MetricName;
use iris_core::headless::{FileStorage, HeadlessPage, RecordingBeacon, Storage};
use iris_core::identity::VISITOR_KEY;
use iris_core::transport::{Fetch, FetchFuture, HttpBeacon, HttpFetch, KeepAliveRequest};
use iris_core::{AutocaptureConfig, Config, Instrument, InstrumentConfig, Platform, Properties};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "iris")]
#[command(about = "Send analytics events from a headless page")]
#[command(version)]
struct Args {
    /// Config file (default: $XDG_CONFIG_HOME/iris/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write logs to the XDG state directory
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print event bodies instead of sending them
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show configuration and persisted identity
    Status,

    /// Send one custom event
    Track {
        /// Event name
        name: String,

        /// Page URL the event is recorded on
        #[arg(long)]
        url: String,

        /// Document referrer
        #[arg(long)]
        referrer: Option<String>,

        /// Event property as key=value; value is parsed as JSON when possible
        #[arg(short, long = "prop", value_parser = parse_prop)]
        props: Vec<(String, serde_json::Value)>,
    },

    /// Open a page and navigate through the given URLs
    Browse {
        /// First URL is loaded, the rest are pushed through history
        #[arg(required = true)]
        urls: Vec<String>,

        /// Referrer of the initial page load
        #[arg(long)]
        referrer: Option<String>,
    },

    /// Report one web-vital measurement
    Vital {
        /// Metric name (cls, inp, lcp)
        metric: MetricName,

        /// Measured value
        value: f64,

        /// Page URL the metric was measured on
        #[arg(long)]
        url: String,
    },
}

/// Parse a `key=value` property
fn parse_prop(raw: &str) -> std::result::Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("empty property name in '{}'", raw));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };

    let _log_guard = if args.verbose {
        Some(iris_core::logging::init(&config.logging).context("failed to initialize logging")?)
    } else {
        None
    };

    match args.command {
        Command::Status => cmd_status(&config),
        Command::Track {
            name,
            url,
            referrer,
            props,
        } => {
            let properties: Option<Properties> = if props.is_empty() {
                None
            } else {
                Some(props.into_iter().collect())
            };
            let session = Session::open(&config, args.dry_run, &url, referrer.as_deref())?;
            let instrument = session.instrument(config.instrument.clone().with_autocapture(false));
            instrument.track(&name, properties);
            drop(instrument);
            session.finish()
        }
        Command::Browse { urls, referrer } => {
            let (first, rest) = urls
                .split_first()
                .context("at least one URL is required")?;
            let session = Session::open(&config, args.dry_run, first, referrer.as_deref())?;
            let instrument = session.instrument(only(&config.instrument, |a| a.pageviews = Some(true)));
            instrument.start();
            for url in rest {
                session.page.navigate(url);
            }
            instrument.stop();
            drop(instrument);
            session.finish()
        }
        Command::Vital { metric, value, url } => {
            if !value.is_finite() || value < 0.0 {
                bail!("metric value must be a non-negative number, got {}", value);
            }
            let session = Session::open(&config, args.dry_run, &url, None)?;
            let instrument = session.instrument(only(&config.instrument, |a| a.webvitals = Some(true)));
            instrument.start();
            let report = session.page.report_metric(metric, value);
            instrument.stop();
            drop(instrument);
            if !args.dry_run {
                println!("{} = {} ({})", metric, value, report.rating().as_str());
            }
            session.finish()
        }
    }
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("Iris Configuration");
    println!("==================");
    println!();

    let instrument = &config.instrument;
    let or_unset = |value: &str| {
        if value.is_empty() {
            "<not set>".to_string()
        } else {
            value.to_string()
        }
    };

    println!("Config File:     {}", Config::config_path().display());
    println!("Host:            {}", or_unset(&instrument.host));
    println!("Site ID:         {}", or_unset(&instrument.site_id));
    println!(
        "Autocapture:     pageviews={} clicks={} webvitals={}",
        instrument.autocapture.pageviews(),
        instrument.autocapture.clicks(),
        instrument.autocapture.webvitals()
    );
    println!("Debug:           {}", instrument.debug);
    println!(
        "Delivery:        {} (timeout {}s)",
        if config.delivery.beacon { "beacon" } else { "fetch" },
        config.delivery.timeout_secs
    );

    println!();
    match instrument.validate() {
        Ok(()) => println!("Endpoint:        {}", instrument.endpoint()),
        Err(e) => println!("Status: Not ready ({})", e),
    }

    let storage = FileStorage::new(Config::storage_path());
    println!();
    println!("Storage:         {}", storage.path().display());
    let visitor = storage
        .get(VISITOR_KEY)
        .context("failed to read persisted identity")?;
    println!(
        "Visitor ID:      {}",
        visitor.as_deref().unwrap_or("<none yet>")
    );

    Ok(())
}

/// Instrument config with exactly one autocapture family enabled
fn only(base: &InstrumentConfig, enable: impl FnOnce(&mut AutocaptureConfig)) -> InstrumentConfig {
    let mut families = AutocaptureConfig {
        pageviews: Some(false),
        webvitals: Some(false),
        clicks: Some(false),
    };
    enable(&mut families);
    base.clone().with_autocapture(families)
}

/// Delivery wiring for one CLI invocation
enum Delivery {
    /// Payloads are collected and printed on finish
    DryRun(Arc<RecordingBeacon>),
    /// Beacon worker; closing it waits for queued payloads
    Beacon(Arc<HttpBeacon>),
    /// Keep-alive requests on a current-thread runtime driven on finish
    Fetch {
        runtime: tokio::runtime::Runtime,
        fetch: Arc<DrainingFetch>,
        drained: mpsc::UnboundedReceiver<()>,
    },
}

/// A headless page plus the delivery primitives the instrument runs against
struct Session {
    page: Arc<HeadlessPage>,
    delivery: Delivery,
}

impl Session {
    fn open(config: &Config, dry_run: bool, url: &str, referrer: Option<&str>) -> Result<Self> {
        config
            .instrument
            .validate()
            .context("instrument is not configured (set [instrument] host and site_id)")?;
        url::Url::parse(url).with_context(|| format!("invalid page URL '{}'", url))?;

        let mut builder = HeadlessPage::builder(url)
            .local_storage(Arc::new(FileStorage::new(Config::storage_path())));
        if let Some(referrer) = referrer {
            builder = builder.referrer(referrer);
        }
        let page = Arc::new(builder.build());

        let timeout = Duration::from_secs(config.delivery.timeout_secs);
        let delivery = if dry_run {
            Delivery::DryRun(Arc::new(RecordingBeacon::default()))
        } else if config.delivery.beacon {
            Delivery::Beacon(Arc::new(
                HttpBeacon::new(timeout).context("failed to start beacon worker")?,
            ))
        } else {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to create async runtime")?;
            let (fetch, drained) = DrainingFetch::new(
                HttpFetch::new(timeout).context("failed to create HTTP client")?,
            );
            Delivery::Fetch {
                runtime,
                fetch: Arc::new(fetch),
                drained,
            }
        };

        Ok(Self { page, delivery })
    }

    fn instrument(&self, config: InstrumentConfig) -> Instrument {
        let platform = Platform::new(Arc::clone(&self.page));
        let platform = match &self.delivery {
            Delivery::DryRun(beacon) => platform.with_beacon(beacon.clone()),
            Delivery::Beacon(beacon) => platform.with_beacon(beacon.clone()),
            Delivery::Fetch { runtime, fetch, .. } => platform
                .with_fetch(fetch.clone())
                .with_runtime(runtime.handle().clone()),
        };
        Instrument::new(config, platform)
    }

    /// Wait for in-flight deliveries, or print the bodies on a dry run
    fn finish(self) -> Result<()> {
        match self.delivery {
            Delivery::DryRun(beacon) => {
                for payload in beacon.sent() {
                    println!("{}", payload.body);
                }
            }
            Delivery::Beacon(beacon) => {
                beacon.close();
                tracing::debug!("Beacon drained");
            }
            Delivery::Fetch {
                runtime,
                fetch,
                mut drained,
            } => {
                fetch.close();
                runtime.block_on(async { while drained.recv().await.is_some() {} });
                tracing::debug!("Keep-alive requests drained");
            }
        }
        Ok(())
    }
}

/// Fetch wrapper whose requests each hold a channel sender until they
/// complete, so the receiver closes once nothing is in flight
struct DrainingFetch {
    inner: HttpFetch,
    pending: Mutex<Option<mpsc::UnboundedSender<()>>>,
}

impl DrainingFetch {
    fn new(inner: HttpFetch) -> (Self, mpsc::UnboundedReceiver<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let fetch = Self {
            inner,
            pending: Mutex::new(Some(sender)),
        };
        (fetch, receiver)
    }

    fn close(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.take();
        }
    }
}

impl Fetch for DrainingFetch {
    fn post(&self, request: KeepAliveRequest) -> FetchFuture {
        let token = self.pending.lock().ok().and_then(|p| p.clone());
        let request = self.inner.post(request);
        Box::pin(async move {
            let result = request.await;
            drop(token);
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_prop_json_and_string_values() {
        assert_eq!(parse_prop("count=3").unwrap(), ("count".to_string(), json!(3)));
        assert_eq!(parse_prop("ok=true").unwrap(), ("ok".to_string(), json!(true)));
        assert_eq!(
            parse_prop("plan=pro").unwrap(),
            ("plan".to_string(), json!("pro"))
        );
        assert_eq!(
            parse_prop("query=a=b").unwrap(),
            ("query".to_string(), json!("a=b"))
        );
    }

    #[test]
    fn test_parse_prop_rejects_malformed() {
        assert!(parse_prop("novalue").is_err());
        assert!(parse_prop("=x").is_err());
    }

    #[test]
    fn test_only_enables_single_family() {
        let base = InstrumentConfig::new("https://collect.example", "abc").with_autocapture(true);
        let config = only(&base, |a| a.webvitals = Some(true));
        assert!(config.autocapture.webvitals());
        assert!(!config.autocapture.pageviews());
        assert!(!config.autocapture.clicks());
        assert_eq!(config.site_id, "abc");
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "iris", "--dry-run", "track", "signup", "--url", "https://a.example/", "-p", "n=1",
        ])
        .unwrap();
        assert!(args.dry_run);
        match args.command {
            Command::Track { name, props, .. } => {
                assert_eq!(name, "signup");
                assert_eq!(props, vec![("n".to_string(), json!(1))]);
            }
            _ => panic!("expected track"),
        }

        let args = Args::try_parse_from(["iris", "vital", "lcp", "2600", "--url", "https://a.example/"])
            .unwrap();
        assert!(matches!(
            args.command,
            Command::Vital {
                metric: MetricName::Lcp,
                ..
            }
        ));
    }
}
