mod notify;
mod output;
mod session;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::oneshot;

use ravenlogs_client::{LogStream, RemoteLogClient};
use ravenlogs_logs::{JsonLogStore, LogEngine, LogFilter, LogLevel};

use notify::{Notifier, StderrNotifier};
use output::OutputFormat;
use session::WatchSession;
use settings::{CATEGORY, LEVEL, SERVER_URL, SettingsStore, TomlSettings};

/// Ravenlogs - stream, filter and store RavenDB admin logs
#[derive(Parser, Debug)]
#[command(name = "ravenlogs")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file remembering the last server and filter
    #[arg(long, global = true, default_value = "ravenlogs.toml")]
    settings: PathBuf,

    /// Log debug output of ravenlogs itself to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream live logs from a server
    Watch {
        /// Server url (defaults to the last one used)
        #[arg(value_name = "URL")]
        url: Option<String>,

        #[command(flatten)]
        filter: FilterArgs,

        /// Append every received record to a JSON file in this directory
        #[arg(long, value_name = "DIR")]
        save_dir: Option<PathBuf>,

        /// Base file name for saved logs (date-stamped by default)
        #[arg(long)]
        base_name: Option<String>,

        /// Write the filtered records to a new JSON file in this directory
        /// when the session ends
        #[arg(long, value_name = "DIR")]
        export: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Print a previously saved log file
    Show {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[command(flatten)]
        filter: FilterArgs,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(clap::Args, Debug)]
struct FilterArgs {
    /// Minimum level (trace, debug, info, warn, error, fatal)
    #[arg(long)]
    level: Option<LogLevel>,

    /// Logger name substring; empty matches everything
    #[arg(long)]
    category: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run_app(args).await;

    if let Err(e) = &result {
        tracing::debug!("Exiting with error: {:#}", e);
    }

    result
}

async fn run_app(args: Args) -> Result<()> {
    let mut settings = TomlSettings::load(&args.settings)?;
    tracing::debug!(path = %settings.path().display(), "Loaded settings");
    let notifier: Arc<dyn Notifier> = Arc::new(StderrNotifier);

    match args.command {
        Command::Watch {
            url,
            filter,
            save_dir,
            base_name,
            export,
            format,
        } => {
            let url = url
                .or_else(|| settings.get(SERVER_URL))
                .context("No server url given and none remembered")?;
            let filter = resolve_filter(&filter, &settings);

            let base_name = base_name.unwrap_or_else(default_base_name);
            let store = save_dir
                .map(|dir| Arc::new(JsonLogStore::new(dir, base_name.clone())));

            let engine = LogEngine::new(filter.clone());
            let (done_tx, done_rx) = oneshot::channel();
            let printer = tokio::spawn(output::print_events(
                engine.clone(),
                engine.subscribe(),
                format,
                done_rx,
                std::io::stdout(),
            ));

            let session = WatchSession::new(
                RemoteLogClient::new(filter.clone()),
                engine.clone(),
                store,
                Arc::clone(&notifier),
            );
            let outcome = match start_watch(&session, &mut settings, &url, &filter, notifier.as_ref()).await {
                Ok(stream) => session.follow(stream, shutdown_signal()).await,
                Err(e) => Err(e),
            };

            let _ = done_tx.send(());
            let _ = printer.await;
            outcome?;

            if let Some(dir) = export.filter(|_| !engine.is_filtered_empty()) {
                let exporter = JsonLogStore::new(dir, format!("{base_name}-export"));
                match exporter.save_export(&engine.to_json()?) {
                    Ok(path) => eprintln!("Exported {} records to {}", engine.filtered_len(), path.display()),
                    Err(e) => notifier.notify_error(&e.to_string()),
                }
            }
            Ok(())
        }

        Command::Show {
            file,
            filter,
            format,
        } => {
            let filter = resolve_filter(&filter, &settings);
            let records = match ravenlogs_logs::read_all(&file) {
                Ok(records) => records,
                Err(e) => {
                    notifier.notify_error(&e.to_string());
                    return Err(e.into());
                }
            };

            let engine = LogEngine::new(filter.clone());
            engine.load_batch(records, filter);
            tracing::info!(
                total = engine.len(),
                shown = engine.filtered_len(),
                errors = engine.level_counts().error,
                "Loaded {}",
                file.display()
            );

            match format {
                OutputFormat::Text => print!("{}", engine.to_text()),
                OutputFormat::Json => println!("{}", engine.to_json()?),
            }
            Ok(())
        }
    }
}

/// Command line wins over remembered settings, which win over the defaults
fn resolve_filter(args: &FilterArgs, store: &impl SettingsStore) -> LogFilter {
    let defaults = LogFilter::default();
    let min_level = args
        .level
        .or_else(|| store.get(LEVEL).and_then(|level| LogLevel::parse(&level)))
        .unwrap_or(defaults.min_level);
    let category = args
        .category
        .clone()
        .or_else(|| store.get(CATEGORY))
        .unwrap_or(defaults.category);
    LogFilter::new(min_level, category)
}

/// Open the stream and, once it is connected, remember the server and filter
async fn start_watch(
    session: &WatchSession,
    store: &mut impl SettingsStore,
    url: &str,
    filter: &LogFilter,
    notifier: &dyn Notifier,
) -> Result<LogStream> {
    let stream = session.connect(url).await?;
    if let Err(e) = remember(store, url, filter) {
        notifier.notify_error(&format!("{e:#}"));
    }
    Ok(stream)
}

fn remember(store: &mut impl SettingsStore, url: &str, filter: &LogFilter) -> Result<()> {
    store.set(SERVER_URL, url)?;
    store.set(CATEGORY, &filter.category)?;
    store.set(LEVEL, filter.min_level.as_str())
}

fn default_base_name() -> String {
    format!("ravendb-logs-{}", chrono::Local::now().format("%Y-%m-%d"))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; run until the server closes the stream
        std::future::pending::<()>().await;
    }
}
