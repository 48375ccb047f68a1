use std::sync::Arc;
use std::time::Duration;
use stemdeck::chunking::ChunkStore;
use stemdeck::config::Config;
use stemdeck::loader::{FileSource, SourceLoader};
use stemdeck::playback::{CpalSink, PlaybackContext, PlaybackEvent, StreamGroup, Transport};
use stemdeck::store::SqliteStore;
use tracing::{error, info, warn};

const USAGE: &str = "usage: stemdeck [--refetch] [--start SECONDS] [--solo INDEX] <file>...";

struct Args {
    refetch: bool,
    start: f64,
    solo: Option<usize>,
    files: Vec<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        refetch: false,
        start: 0.0,
        solo: None,
        files: Vec::new(),
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--refetch" => args.refetch = true,
            "--start" => {
                let value = iter.next().ok_or("--start needs a value")?;
                args.start = value
                    .parse()
                    .map_err(|_| format!("invalid start offset: {}", value))?;
            }
            "--solo" => {
                let value = iter.next().ok_or("--solo needs a value")?;
                args.solo = Some(
                    value
                        .parse()
                        .map_err(|_| format!("invalid member index: {}", value))?,
                );
            }
            "-h" | "--help" => return Err(USAGE.to_string()),
            _ => args.files.push(arg),
        }
    }

    if args.files.is_empty() {
        return Err(USAGE.to_string());
    }
    Ok(args)
}

#[tokio::main]
async fn main() {
    // Setup logging (reads from RUST_LOG env var, defaults to info level)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}", message);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let database_path = config
        .database_path
        .to_str()
        .ok_or("database path is not valid UTF-8")?;
    let store = SqliteStore::new(database_path).await?;
    let chunk_store = ChunkStore::new(Arc::new(store), config.chunk_store.clone());

    let sink = Arc::new(CpalSink::new()?);
    let loader = Arc::new(SourceLoader::new(FileSource::new()));
    let ctx = PlaybackContext::new(chunk_store, loader, sink, config.playback.clone());
    let mut events = ctx.subscribe();

    let group = StreamGroup::new(args.files.clone(), ctx);
    let duration = group.load(args.refetch).await?;
    info!("Loaded {} stems, {:.1}s", args.files.len(), duration);

    if let Some(index) = args.solo {
        group.solo(index)?;
    }
    group.seek(args.start).await?;
    group.play().await?;

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = ticker.tick() => {
                let position = group.current_time();
                if !group.is_playing() {
                    info!("Finished");
                    break;
                }
                println!("{:>7.1}s / {:.1}s", position, duration);
            }
            Some(event) = events.recv() => {
                if let PlaybackEvent::FetchFailed { asset, offset, error } = event {
                    warn!("{}: fetch at {:.1}s failed: {}", asset, offset, error);
                }
            }
        }
    }

    group.pause();
    Ok(())
}
