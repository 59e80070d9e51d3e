//! Binary entrypoint for the meshwatch CLI.
//!
//! Commands:
//! - `init` - create a starter `config.toml` and an empty store
//! - `run [--input <file>]` - feed JSON-lines packets (file or stdin) through the monitor
//! - `rules list | add | delete` - manage alert rules
//! - `alerts list | read` - inspect and acknowledge alerts
//! - `nodes` - known nodes with last seen time, battery and radio stats
//! - `messages [--limit N]` - recent text messages heard on the mesh
//! - `status` - print node, rule and alert counts
//!
//! See the library crate docs for module-level details: `meshwatch::`.
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use meshwatch::battery::{BatteryDrainMonitor, DrainPolicy};
use meshwatch::channel::{radio_channel, spawn_transport, ChannelDirectory};
use meshwatch::config::Config;
use meshwatch::logutil::escape_log;
use meshwatch::metrics;
use meshwatch::pipeline::{spawn_packet_source, start_monitor, AlertNotice, PipelineConfig};
use meshwatch::rules::{Action, Condition, Rule, RuleEngine};
use meshwatch::store::{MonitorStore, RuleStore};

#[derive(Parser)]
#[command(name = "meshwatch")]
#[command(about = "Telemetry rules and alerts for Meshtastic mesh networks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a default configuration and data directory
    Init,
    /// Run the monitor over a JSON-lines packet stream
    Run {
        /// Packet file to read instead of stdin
        #[arg(short, long)]
        input: Option<String>,
    },
    /// Manage alert rules
    Rules {
        #[command(subcommand)]
        command: RuleCommands,
    },
    /// Inspect stored alerts
    Alerts {
        #[command(subcommand)]
        command: AlertCommands,
    },
    /// List known nodes
    Nodes,
    /// Show recent text messages
    Messages {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Show node, rule and alert counts
    Status,
}

#[derive(Subcommand)]
enum RuleCommands {
    /// List stored rules
    List,
    /// Add a rule: all --when conditions must hold for the message to be sent
    Add {
        #[arg(long)]
        alias: String,
        /// Condition such as `temperature>30` (repeatable)
        #[arg(long = "when", required = true)]
        conditions: Vec<String>,
        /// Target channel name (`primary` is channel 0)
        #[arg(long)]
        channel: String,
        /// Message template, e.g. "{node_alias}: {temperature}C"
        #[arg(long)]
        message: String,
    },
    /// Delete a rule by id
    Delete { id: u64 },
}

#[derive(Subcommand)]
enum AlertCommands {
    /// Show the most recent alerts
    List {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Mark every alert as read
    Read,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(&None, cli.verbose);
        return init(&cli.config).await;
    }

    let config = Config::load(&cli.config).await?;
    init_logging(&Some(config.clone()), cli.verbose);

    match cli.command {
        // handled before the config is loaded
        Commands::Init => {}
        Commands::Run { input } => run(config, input).await?,
        Commands::Rules { command } => {
            let store = MonitorStore::open(config.storage.store_path())?;
            rules_command(&store, command)?;
        }
        Commands::Alerts { command } => {
            let store = MonitorStore::open(config.storage.store_path())?;
            match command {
                AlertCommands::List { limit } => {
                    let alerts = store.list_alerts(limit)?;
                    if alerts.is_empty() {
                        println!("No alerts.");
                    }
                    for alert in alerts {
                        let alias = store
                            .get_node(&alert.node_id)?
                            .map(|n| n.alias)
                            .unwrap_or_else(|| config.default_alias(&alert.node_id));
                        println!(
                            "{}#{} {} [{}] {} ({}): {}",
                            if alert.read { " " } else { "*" },
                            alert.id,
                            alert.timestamp.format("%Y-%m-%d %H:%M:%S"),
                            alert.severity,
                            alias,
                            alert.node_id,
                            alert.message
                        );
                    }
                }
                AlertCommands::Read => {
                    let changed = store.mark_alerts_read()?;
                    println!("Marked {} alert(s) as read.", changed);
                }
            }
        }
        Commands::Nodes => {
            let store = MonitorStore::open(config.storage.store_path())?;
            let nodes = store.list_nodes()?;
            if nodes.is_empty() {
                println!("No nodes seen yet.");
            }
            for node in nodes {
                println!(
                    "{} ({}) last seen {} battery {} snr {} rssi {}",
                    node.alias,
                    node.node_id,
                    node.last_seen.format("%Y-%m-%d %H:%M:%S"),
                    show(node.battery),
                    show(node.snr),
                    show(node.rssi),
                );
            }
        }
        Commands::Messages { limit } => {
            let store = MonitorStore::open(config.storage.store_path())?;
            let messages = store.list_messages(limit)?;
            if messages.is_empty() {
                println!("No messages.");
            }
            for msg in messages {
                println!(
                    "{} [ch {}] {} -> {}: {}",
                    msg.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    msg.channel,
                    msg.from,
                    msg.to.as_deref().unwrap_or("?"),
                    escape_log(&msg.text)
                );
            }
        }
        Commands::Status => {
            let store = MonitorStore::open(config.storage.store_path())?;
            println!("{}", config.monitor.name);
            println!("  nodes:         {}", store.list_nodes()?.len());
            println!("  rules:         {}", store.rule_count());
            println!("  links:         {}", store.list_links()?.len());
            println!("  unread alerts: {}", store.unread_alert_count()?);
            println!("  channels:      {}", config.channels.names.join(", "));
            println!("  metrics:       {}", metrics::snapshot());
        }
    }

    Ok(())
}

async fn init(config_path: &str) -> Result<()> {
    if Path::new(config_path).exists() {
        bail!("{} already exists; refusing to overwrite", config_path);
    }
    info!("Initializing new meshwatch configuration");
    Config::create_default(config_path).await?;
    info!("Configuration file created at {}", config_path);

    let config = Config::default();
    tokio::fs::create_dir_all(&config.storage.data_dir)
        .await
        .map_err(|e| anyhow!("Failed to create data dir {}: {}", config.storage.data_dir, e))?;
    let store = MonitorStore::open(config.storage.store_path())?;
    info!(
        "Store ready at {} ({} rules)",
        config.storage.store_path().display(),
        store.rule_count()
    );
    Ok(())
}

async fn run(config: Config, input: Option<String>) -> Result<()> {
    info!("Starting meshwatch v{}", env!("CARGO_PKG_VERSION"));
    let store = MonitorStore::open(config.storage.store_path())?;

    let directory = ChannelDirectory::new(config.channels.names.clone());
    let (sender, outgoing) = radio_channel(directory, config.channels.outgoing_queue);
    let transport = spawn_transport(
        outgoing,
        Duration::from_millis(config.channels.send_timeout_ms),
        |out| async move {
            let line = format!("[ch {} {}] {}\n", out.channel_index, out.channel_name, out.text);
            let mut stdout = tokio::io::stdout();
            stdout.write_all(line.as_bytes()).await?;
            stdout.flush().await
        },
    );

    let battery = BatteryDrainMonitor::new(DrainPolicy::from(&config.battery));
    let engine = RuleEngine::new(store, sender, battery);
    let (alert_tx, mut alert_rx) = mpsc::unbounded_channel::<AlertNotice>();
    let (handle, monitor) = start_monitor(engine, PipelineConfig::from(&config), Some(alert_tx));

    let alert_logger = tokio::spawn(async move {
        while let Some(notice) = alert_rx.recv().await {
            warn!(
                "ALERT [{}] {}: {}",
                notice.alert.severity,
                escape_log(&notice.alias),
                escape_log(&notice.alert.message)
            );
        }
    });

    let mut source = match input {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| anyhow!("Failed to open input {}: {}", path, e))?;
            info!("Reading packets from {}", path);
            spawn_packet_source(BufReader::new(file), handle)
        }
        None => {
            info!("Reading packets from stdin");
            spawn_packet_source(BufReader::new(tokio::io::stdin()), handle)
        }
    };

    tokio::select! {
        res = &mut source => match res {
            Ok(count) => info!("Input finished after {} packets", count),
            Err(e) => warn!("Packet source failed: {}", e),
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down");
            source.abort();
        }
    }

    let stats = monitor.await?;
    let sent = transport.await?;
    let _ = alert_logger.await;
    info!(
        "Processed {} events: {} notifications queued, {} delivered, {} alerts",
        stats.events, stats.dispatched, sent.delivered, stats.alerts
    );
    Ok(())
}

fn show<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn rules_command(store: &MonitorStore, command: RuleCommands) -> Result<()> {
    match command {
        RuleCommands::List => {
            let rules = store.list_rules()?;
            if rules.is_empty() {
                println!("No rules defined.");
            }
            for row in &rules {
                match row {
                    Ok(stored) => match Rule::try_from(stored) {
                        Ok(rule) => println!("#{} {}", rule.id, rule),
                        Err(e) => println!("#{} '{}': {}", stored.id, stored.alias, e),
                    },
                    Err(unreadable) => println!("#{} <unreadable>: {}", unreadable.rule_id, unreadable.source),
                }
            }
        }
        RuleCommands::Add {
            alias,
            conditions,
            channel,
            message,
        } => {
            let conditions = conditions
                .iter()
                .map(|c| c.parse::<Condition>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| anyhow!("Invalid condition: {}", e))?;
            let action = Action::notify(channel, message);
            let stored = store.add_rule(&alias, &conditions, &action)?;
            println!("Added rule #{} '{}'", stored.id, alias);
        }
        RuleCommands::Delete { id } => {
            if store.delete_rule(id)? {
                println!("Deleted rule #{}", id);
            } else {
                bail!("No rule with id {}", id);
            }
        }
    }
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let configured = config
        .as_ref()
        .and_then(|cfg| cfg.logging.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    let base_level = match verbosity {
        0 => configured,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|cfg| cfg.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Echo to the console only when attached to a terminal
        let is_tty = atty::is(atty::Stream::Stderr);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
