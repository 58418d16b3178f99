//! eventkit - analytics event client CLI
//!
//! Queues records into the local event store and uploads them to the
//! ingestion endpoint, using the same client an embedding application would.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use eventkit_core::identity::IdentityStore;
use eventkit_core::{settings, AppContext, Callback, Client, Config, Error, FnCallback, Record};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "eventkit")]
#[command(about = "Queue and upload analytics events")]
#[command(version)]
struct Args {
    /// Write API key (defaults to [client].api_key in the config file)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Verbose output, including per-request upload logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Queue one record under DATABASE.TABLE
    Add {
        database: String,
        table: String,

        /// Field as key=value; JSON values (numbers, booleans, objects) are parsed
        #[arg(short, long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,

        /// Whole record as a JSON object, merged before --field values
        #[arg(long)]
        json: Option<String>,

        /// Append the install identity
        #[arg(long)]
        uniq_id: bool,

        /// Append device metadata
        #[arg(long)]
        model_info: bool,
    },

    /// Upload queued events and wait for the result
    Upload {
        /// Seconds to wait for the upload to finish
        #[arg(long, default_value_t = 30)]
        wait_secs: u64,

        /// Only upload events for this database (requires --table)
        #[arg(long, requires = "table")]
        database: Option<String>,

        /// Only upload events for this table (requires --database)
        #[arg(long, requires = "database")]
        table: Option<String>,
    },

    /// Show configuration and queue state
    Status,

    /// Print the install identity
    Identity,
}

/// Outcome delivered by a callback: Ok, or (code, message)
type Outcome = std::result::Result<(), (String, String)>;

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        eventkit_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!(command = command_name(&args.command), "eventkit starting");

    let context = AppContext::from_default_dirs();

    match args.command {
        Command::Add {
            ref database,
            ref table,
            ref fields,
            ref json,
            uniq_id,
            model_info,
        } => {
            let record = build_record(json.as_deref(), fields)?;
            let client = ready_client(&context, &config, &args)?;
            if uniq_id {
                client.set_auto_append_uniq_id(true);
            }
            if model_info {
                client.set_auto_append_model_information(true);
            }

            let (callback, rx) = channel_callback();
            client.add_event_with_callback(database, table, record, callback);
            report(&rx, Duration::from_secs(1), "add")?;

            println!("Queued event for {}.{}", database, table);
            if args.verbose {
                println!("Pending events: {}", client.pending_events());
            }
        }

        Command::Upload {
            wait_secs,
            ref database,
            ref table,
        } => {
            let client = ready_client(&context, &config, &args)?;
            let pending = client.pending_events();
            if args.verbose {
                println!("Uploading {} pending event(s)...", pending);
            }

            let (callback, rx) = channel_callback();
            match (database, table) {
                (Some(database), Some(table)) => {
                    client.upload_table_events(database, table, Some(callback))
                }
                _ => client.upload_events_with_callback(callback),
            }
            report(&rx, Duration::from_secs(wait_secs), "upload")?;

            println!(
                "Upload complete ({} event(s) still queued)",
                client.pending_events()
            );
        }

        Command::Status => {
            let db = context
                .open_database()
                .context("failed to open event database")?;
            let client = Client::from_config(&context, &config, args.api_key.as_deref());

            println!("Config file:     {}", Config::config_path().display());
            println!("Database:        {}", context.database_path().display());
            println!("Log file:        {}", Config::log_path().display());
            match client.config() {
                Some(client_config) => {
                    println!("Client:          ready");
                    println!("Endpoint:        {}", client_config.api_endpoint);
                    println!("Compression:     {}", on_off(client_config.compression_enabled));
                }
                None => {
                    println!("Client:          not configured (no API key)");
                    println!(
                        "Compression:     {}",
                        on_off(settings::is_event_compression_enabled())
                    );
                }
            }
            println!(
                "Pending events:  {}",
                db.count_events(None).context("failed to count events")?
            );
        }

        Command::Identity => {
            let db = context
                .open_database()
                .context("failed to open event database")?;
            let identity = IdentityStore::new(Arc::new(db)).get_or_create();
            println!("{}", identity);
        }
    }

    Ok(())
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Add { .. } => "add",
        Command::Upload { .. } => "upload",
        Command::Status => "status",
        Command::Identity => "identity",
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

/// Build a client, failing when it could not be configured
fn ready_client(context: &AppContext, config: &Config, args: &Args) -> Result<Client> {
    let client = Client::from_config(context, config, args.api_key.as_deref());
    if !client.is_ready() {
        bail!(
            "no API key configured; pass --api-key or set [client].api_key in {}",
            Config::config_path().display()
        );
    }
    if args.verbose {
        client.set_debug_mode(true);
    }
    Ok(client)
}

fn channel_callback() -> (Arc<dyn Callback>, mpsc::Receiver<Outcome>) {
    let (tx, rx) = mpsc::channel();
    let error_tx = tx.clone();
    let callback = FnCallback::new(
        move || {
            let _ = tx.send(Ok(()));
        },
        move |code: &str, cause: &Error| {
            let _ = error_tx.send(Err((code.to_string(), cause.to_string())));
        },
    );
    (Arc::new(callback), rx)
}

/// Wait for one callback outcome and turn it into a CLI result
fn report(rx: &mpsc::Receiver<Outcome>, wait: Duration, operation: &str) -> Result<()> {
    match rx.recv_timeout(wait) {
        Ok(Ok(())) => Ok(()),
        Ok(Err((code, message))) => bail!("{} failed [{}]: {}", operation, code, message),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            bail!("{} did not finish within {} seconds", operation, wait.as_secs())
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            bail!("{} finished without reporting a result", operation)
        }
    }
}

/// Assemble a record from `--json` and `--field` arguments
fn build_record(json: Option<&str>, fields: &[String]) -> Result<Record> {
    let mut record = match json {
        Some(json) => {
            let value: Value = serde_json::from_str(json).context("--json is not valid JSON")?;
            Record::try_from(value).context("--json must be a JSON object")?
        }
        None => Record::new(),
    };

    for field in fields {
        let (key, value) = parse_field(field)?;
        record.insert(key, value);
    }

    if record.is_empty() {
        bail!("record is empty; pass --field KEY=VALUE or --json");
    }
    Ok(record)
}

/// Parse `key=value`; the value is JSON when it parses as JSON, else a string
fn parse_field(field: &str) -> Result<(String, Value)> {
    let Some((key, raw)) = field.split_once('=') else {
        bail!("invalid field '{}', expected KEY=VALUE", field);
    };
    if key.is_empty() {
        bail!("invalid field '{}', key is empty", field);
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}
