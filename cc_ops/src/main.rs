//! Operator tooling for the centelhas ledger.
//!
//! Applies migrations and reconciles cached balances against the ledger,
//! once or periodically. Reconciliation never writes: drift is reported
//! and left for an admin to correct with a compensating entry.

mod config;
mod logging;

use std::time::Duration;

use anyhow::{Context, Error, bail};
use centelhas::db::Database;
use centelhas::{Engine, ReconciliationReport};
use config::OpsConfig;
use ctrlc::set_handler;
use log::info;
use pico_args::Arguments;
use tokio::sync::watch;

const HELP: &str = "\
Operate a centelhas ledger database

USAGE:
  cc_ops [OPTIONS] <COMMAND>

COMMANDS:
  migrate                  Apply pending schema migrations
  reconcile --event ID     Compare cached balances with the ledger once
  balances --event ID      Print every membership balance of an event as JSON
  watch --event ID         Reconcile periodically until interrupted

OPTIONS:
  --db-url     URL         Database connection string  [default: env DATABASE_URL]
  --interval   SECS        Pause between watch passes  [default: env OPS_WATCH_INTERVAL_SECS or 60]

FLAGS:
  -h, --help               Print help information

ENVIRONMENT:
  DATABASE_URL             PostgreSQL connection string
  CENTELHAS_MAX_RETRIES    Retries for conflicting units of work
  CENTELHAS_LOCK_TIMEOUT_MS
                           Longest wait for row locks
  RUST_LOG                 Log filter (e.g. info,sqlx=warn)
";

enum Command {
    Migrate,
    Reconcile { event_id: i64 },
    Balances { event_id: i64 },
    Watch { event_id: i64 },
}

fn parse_command(pargs: &mut Arguments) -> Result<Command, Error> {
    let name: String = pargs
        .subcommand()?
        .context("missing command, see --help")?;
    let command = match name.as_str() {
        "migrate" => Command::Migrate,
        "reconcile" => Command::Reconcile {
            event_id: pargs.value_from_str("--event")?,
        },
        "balances" => Command::Balances {
            event_id: pargs.value_from_str("--event")?,
        },
        "watch" => Command::Watch {
            event_id: pargs.value_from_str("--event")?,
        },
        other => bail!("unknown command: {other}"),
    };
    Ok(command)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let database_url: Option<String> = pargs.opt_value_from_str("--db-url")?;
    let interval: Option<u64> = pargs.opt_value_from_str("--interval")?;
    let command = parse_command(&mut pargs)?;

    let remaining = pargs.finish();
    if !remaining.is_empty() {
        bail!("unexpected arguments: {remaining:?}");
    }

    logging::init();

    let config = OpsConfig::from_env(database_url, interval)?;
    config.validate()?;

    let db = Database::new(&config.database)
        .await
        .context("Failed to connect to database")?;
    info!("Database connected");

    let result = run(&db, &config, command).await;
    db.close().await;
    result
}

async fn run(db: &Database, config: &OpsConfig, command: Command) -> Result<(), Error> {
    match command {
        Command::Migrate => {
            db.migrate().await.context("Failed to apply migrations")?;
            info!("Migrations applied");
            Ok(())
        }
        Command::Reconcile { event_id } => {
            let engine = Engine::postgres(db, config.engine);
            let report = reconcile(&engine, event_id).await?;
            if !report.is_clean() {
                bail!(
                    "{} membership(s) drifted in event {event_id}",
                    report.drifted().count()
                );
            }
            Ok(())
        }
        Command::Balances { event_id } => {
            let engine = Engine::postgres(db, config.engine);
            let report = engine.balances().reconcile_event(event_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Watch { event_id } => {
            let engine = Engine::postgres(db, config.engine);
            watch_event(&engine, event_id, config.watch_interval).await
        }
    }
}

/// One reconciliation pass: cached balances, then event-wide conservation
async fn reconcile(engine: &Engine, event_id: i64) -> Result<ReconciliationReport, Error> {
    let report = engine.balances().reconcile_event(event_id).await?;
    logging::log_reconciliation(&report);

    let totals = engine.conservation(event_id).await?;
    logging::log_conservation(event_id, &totals);

    Ok(report)
}

async fn watch_event(engine: &Engine, event_id: i64, interval: Duration) -> Result<(), Error> {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    // Catching signals for exit.
    set_handler(move || {
        let _ = stop_tx.send(true);
    })?;

    info!("Watching event {event_id} every {interval:?}. Press Ctrl+C to stop.");
    loop {
        if let Err(e) = reconcile(engine, event_id).await {
            log::error!("Reconciliation pass for event {event_id} failed: {e}");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop_rx.changed() => break,
        }
    }

    info!("Stopped watching event {event_id}");
    Ok(())
}
