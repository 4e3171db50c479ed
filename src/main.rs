use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use parking_lot::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use transformer_watch::data::duration::format_duration;
use transformer_watch::data::trend::DEFAULT_POINT_COUNT;
use transformer_watch::data::{Parameter, TelemetrySample};
use transformer_watch::{
    BandTable, ChannelFeed, FeedError, FileFeed, Monitor, SampleConsumer, Settings, StreamIngest,
    SubscriptionRouter, TelemetryFeed,
};

#[derive(Parser, Debug)]
#[command(name = "transformer-watch")]
#[command(about = "Watch transformer telemetry and report alerts and health status")]
struct Args {
    /// Path to a JSON store file ({"data": {...}, "predictions": {...}})
    #[arg(short, long, default_value = "store.json", conflicts_with_all = ["connect"])]
    file: PathBuf,

    /// Connect to a TCP endpoint streaming telemetry envelopes (host:port)
    #[arg(short, long, conflicts_with_all = ["file"])]
    connect: Option<String>,

    /// Source to watch; defaults to the first listed source
    #[arg(short, long)]
    source: Option<String>,

    /// Settings file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Export the source's current reading to a JSON file and exit
    #[arg(short, long, conflicts_with_all = ["connect"])]
    export: Option<PathBuf>,

    /// Print trend series for every parameter as JSON when the watch ends
    #[arg(long)]
    trend: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref()).context("Failed to load settings")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let bands = Arc::new(settings.band_table()?);
    let rt = tokio::runtime::Runtime::new()?;

    // Handle export mode (non-interactive)
    if let Some(export_path) = &args.export {
        return rt.block_on(export_to_file(&args, export_path, bands));
    }

    rt.block_on(run(args, settings, bands))
}

/// Prints one line per sample, read from the monitor after it has updated.
struct Reporter {
    monitor: Arc<Mutex<Monitor>>,
}

impl SampleConsumer for Reporter {
    fn on_sample(&mut self, sample: &TelemetrySample) {
        let monitor = self.monitor.lock();
        let Some(status) = monitor.status() else {
            return;
        };
        let alerts: Vec<String> = monitor
            .alerts()
            .iter()
            .map(|a| format!("{} {}", a.severity.symbol(), a.message))
            .collect();
        let performance = monitor
            .performance()
            .map(|p| p.label.to_string())
            .unwrap_or_default();
        println!(
            "{} [{}] {} score={} performance={} prediction={} {}",
            sample.source_id,
            sample.city,
            status.label,
            status.score,
            performance,
            status.prediction,
            alerts.join("; ")
        );
    }

    fn on_removed(&mut self, source_id: &str) {
        println!("{} removed", source_id);
    }
}

async fn run(args: Args, settings: Settings, bands: Arc<BandTable>) -> Result<()> {
    let feed = ChannelFeed::new(&source_description(&args));
    let _producer = start_producer(&args, &settings, &feed).await?;

    let monitor = Arc::new(Mutex::new(Monitor::new(bands)));
    let mut router = SubscriptionRouter::new(Arc::new(feed.clone()));
    router.register(monitor.clone());
    router.register(Reporter {
        monitor: monitor.clone(),
    });

    let mut sources = feed.subscribe_source_list()?;
    match &args.source {
        Some(id) => router.select(id)?,
        None => {
            if let Some(first) = sources.current().first() {
                router.select(first)?;
            }
        }
    }

    enum Event {
        Dispatched(bool),
        Sources(Result<Vec<String>, FeedError>),
        Shutdown,
    }

    loop {
        let event = tokio::select! {
            dispatched = router.next(), if router.active_source().is_some() => Event::Dispatched(dispatched),
            ids = sources.changed() => Event::Sources(ids),
            _ = tokio::signal::ctrl_c() => Event::Shutdown,
        };

        match event {
            Event::Dispatched(true) => {}
            Event::Dispatched(false) => {
                warn!("Feed closed");
                break;
            }
            Event::Sources(Ok(ids)) => {
                info!(count = ids.len(), "Source list changed");
                if router.active_source().is_none() {
                    if let Some(first) = ids.first() {
                        router.select(first)?;
                    }
                }
            }
            Event::Sources(Err(e)) => {
                warn!(error = %e, "Source list unavailable");
                break;
            }
            Event::Shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    if args.trend {
        let trends = monitor.lock().trends();
        println!("{}", serde_json::to_string_pretty(&trends)?);
    }
    router.teardown();
    Ok(())
}

fn source_description(args: &Args) -> String {
    match &args.connect {
        Some(addr) => format!("tcp://{}", addr),
        None => args.file.display().to_string(),
    }
}

enum Producer {
    Stream(StreamIngest),
    File(tokio::task::JoinHandle<()>),
}

impl Drop for Producer {
    fn drop(&mut self) {
        match self {
            Producer::Stream(ingest) => ingest.abort(),
            Producer::File(handle) => handle.abort(),
        }
    }
}

/// Start whatever feeds records into `feed`.
async fn start_producer(args: &Args, settings: &Settings, feed: &ChannelFeed) -> Result<Producer> {
    if let Some(addr) = &args.connect {
        use tokio::net::TcpStream;

        info!(addr = %addr, "Connecting");
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("Failed to connect to {}", addr))?;
        info!(addr = %addr, "Connected");
        return Ok(Producer::Stream(StreamIngest::spawn(stream, feed.clone(), addr)));
    }

    let mut file_feed = FileFeed::new(&args.file, feed.clone());
    // Populate the source list before the first selection
    file_feed.poll();
    if let Some(e) = file_feed.error() {
        warn!(path = %args.file.display(), error = %e, "Store file not readable yet");
    }
    info!(
        path = %args.file.display(),
        interval = %format_duration(settings.feed.poll_interval),
        "Polling store file"
    );
    Ok(Producer::File(file_feed.spawn(settings.feed.poll_interval)))
}

/// Export the selected source's current reading.
async fn export_to_file(args: &Args, export_path: &Path, bands: Arc<BandTable>) -> Result<()> {
    let feed = ChannelFeed::new(&source_description(args));
    let mut file_feed = FileFeed::new(&args.file, feed.clone());
    file_feed.poll();
    if let Some(e) = file_feed.error() {
        anyhow::bail!("Failed to read {}: {}", args.file.display(), e);
    }

    let source_id = match &args.source {
        Some(id) => id.clone(),
        None => feed
            .source_ids()
            .into_iter()
            .next()
            .context("Store file lists no sources")?,
    };

    let monitor = Arc::new(Mutex::new(Monitor::new(bands)));
    let mut router = SubscriptionRouter::new(Arc::new(feed.clone()));
    router.register(monitor.clone());
    router.select(&source_id)?;
    router.poll();

    let mut monitor = monitor.lock();
    let document = monitor.export(Utc::now())?;
    document.write_to(export_path)?;
    println!(
        "Exported {} to: {}",
        document.source_id,
        export_path.display()
    );

    if args.trend {
        let trends: Vec<_> = Parameter::ALL
            .iter()
            .filter_map(|p| monitor.trend(*p, DEFAULT_POINT_COUNT))
            .collect();
        println!("{}", serde_json::to_string_pretty(&trends)?);
    }
    Ok(())
}
