use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use pogo_account_server::{
    config::Config, http, importer, reclaimer, request_log::RequestLog, scheduler::Scheduler,
    store::Store, time::now_unix,
};

#[derive(Parser)]
#[command(
    name = "pogo-account-server",
    about = "Centralized account lease server for a fleet of scraping devices",
    version
)]
struct Args {
    /// Path to the INI config file.
    #[arg(long, default_value = "config.ini")]
    config: PathBuf,

    /// Line-oriented `username,password` file imported at startup.
    #[arg(long, default_value = "accounts.txt")]
    accounts_file: PathBuf,

    /// Directory holding the SQLite database and request log.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Debug logging.
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(format!(
            "pogo_account_server={level},{level}"
        )))
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.verbose);

    if let Err(e) = run(args).await {
        tracing::error!(err = %e, "fatal startup error");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(&args.config, args.data_dir.clone(), args.accounts_file.clone())
        .context("loading configuration")?;

    std::fs::create_dir_all(&config.data_dir).context("creating data directory")?;

    let store = Store::new(&config.sqlite_path()).await.context("opening account store")?;
    let imported = importer::import_file(&store, &config.accounts_file)
        .await
        .context("importing accounts file")?;
    info!(imported, "accounts imported at startup");

    let request_log = RequestLog::load(&config.request_log_path(), config.rate_limit_number);

    let listen_host = config.listen_host.clone();
    let listen_port = config.listen_port;
    let force_release_seconds = config.force_release_seconds;
    let config = Arc::new(config);

    // The periodic reclaimer needs its own handle to the store; `Store`
    // wraps a `Pool` clone, so this is cheap and shares the same pool.
    let reclaim_store = Arc::new(store.clone());
    reclaimer::spawn_periodic(reclaim_store, force_release_seconds, Duration::from_secs(300));

    let scheduler = Arc::new(Scheduler::new(store, request_log, (*config).clone()));

    let state = http::AppState { scheduler, config };
    let app = http::build_router(state);

    let addr = format!("{listen_host}:{listen_port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    info!(addr = %addr, "pogo-account-server listening");
    let _ = now_unix(); // touch the clock once so startup fails loudly if the host clock is unusable
    axum::serve(listener, app).await.context("serving HTTP")?;

    Ok(())
}
