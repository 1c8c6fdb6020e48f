use anyhow::Result;
use clap::{Parser, ValueEnum};
use rescache::config::Config;
use rescache::demo::{self, DemoOptions};
use std::fs::{File, OpenOptions};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Scripted session against the resource cache
#[derive(Parser, Debug)]
#[command(name = "rescache", version, about, long_about = None)]
struct Args {
    /// Items per page (overrides config)
    #[arg(long)]
    page_size: Option<usize>,

    /// Pages to append after the first one
    #[arg(long, default_value_t = 2)]
    pages: usize,

    /// Records in the in-memory catalog
    #[arg(long, default_value_t = 120)]
    connections: usize,

    /// Simulated backend latency in milliseconds (overrides config)
    #[arg(long)]
    latency_ms: Option<u64>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Persist the effective page size and latency to the config file
    #[arg(long)]
    save_config: bool,
}

/// Verbosity of the log file
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> Option<&'static str> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some("error"),
            LogLevel::Warn => Some("warn"),
            LogLevel::Info => Some("info"),
            LogLevel::Debug => Some("debug"),
            LogLevel::Trace => Some("trace"),
        }
    }
}

/// Send library traces to the log file. `RUST_LOG` refines the filter when set.
fn init_tracing(level: LogLevel) -> Option<WorkerGuard> {
    let directive = level.directive()?;
    let log_path = Config::log_path();

    let file = match open_log(&log_path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("Failed to open log file {:?}: {}", log_path, err);
            return None;
        }
    };
    let (writer, guard) = tracing_appender::non_blocking(file);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("rescache={}", directive)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("rescache {} logging at {:?} to {:?}", rescache::VERSION, level, log_path);
    Some(guard)
}

fn open_log(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = init_tracing(args.log_level);

    let mut config = Config::load();
    let options = DemoOptions {
        connections: args.connections,
        page_size: config.effective_page_size(args.page_size),
        pages: args.pages,
        latency: config.effective_latency(args.latency_ms),
        cache: config.cache_options(),
    };
    tracing::info!("Running demo with {:?}", options);

    if args.save_config {
        config.page_size = Some(options.page_size);
        config.latency_ms = Some(options.latency.as_millis() as u64);
        config.save()?;
    }

    let report = demo::run(&options).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }

    Ok(())
}
