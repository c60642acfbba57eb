//! Binary entrypoint for the fieldlink CLI.
//!
//! Commands:
//! - `start [--port <path>]` - run the link bridge
//! - `init` - create a starter `config.toml`
//! - `status` - print the last status snapshot written by a running bridge
//! - `smoketest --port <path> [-b <baud>] [--timeout <s>]` - classify live link traffic
//!
//! See the library crate docs for module‑level details: `fieldlink::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use fieldlink::config::Config;

#[derive(Parser)]
#[command(name = "fieldlink")]
#[command(about = "Serial radio link bridge between a ground station and a field unit")]
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
    /// Start the link bridge
    Start {
        /// Radio serial port (e.g., /dev/ttyUSB0), overrides [link].port
        #[arg(short, long)]
        port: Option<String>,

        /// Run as a background daemon (Unix only)
        #[arg(short, long)]
        daemon: bool,

        /// PID file location (for daemon mode)
        #[arg(long, default_value = "/tmp/fieldlink.pid")]
        pid_file: String,
    },
    /// Write a default configuration file
    Init,
    /// Show the status snapshot of a running bridge
    Status,
    /// Listen on the link and classify every received line
    #[command(name = "smoketest")]
    SmokeTest {
        /// Device serial port
        #[arg(short, long)]
        port: String,
        /// Baud rate
        #[arg(short = 'b', long, default_value_t = 115200)]
        baud: u32,
        /// Seconds to listen
        #[arg(short, long, default_value_t = 10)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Daemon mode initializes logging after the fork; init has no config yet
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    match &cli.command {
        Commands::Start { daemon, .. } if *daemon => {}
        Commands::Init => {}
        _ => init_logging(&pre_config, cli.verbose),
    }

    match cli.command {
        Commands::Start {
            port,
            daemon,
            pid_file,
        } => {
            let mut config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            if let Some(port) = port {
                config.link.port = port;
            }
            config.validate()?;

            #[cfg(all(unix, feature = "daemon"))]
            if daemon {
                // Parent exits here; the child runs `start` in the foreground
                daemonize_process(&config, &cli.config, &pid_file, cli.verbose)?;
            }

            #[cfg(not(all(unix, feature = "daemon")))]
            if daemon {
                let _ = pid_file;
                eprintln!("Error: Daemon mode requires Unix platform and 'daemon' feature.");
                eprintln!("Compile with: cargo build --features daemon");
                std::process::exit(1);
            }

            run_bridge(config).await?;
        }
        Commands::Init => {
            init_logging(&None, cli.verbose);
            info!("Initializing new fieldlink configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Status => {
            let config = pre_config.unwrap_or_default();
            show_status(&config, &cli.config).await?;
        }
        Commands::SmokeTest {
            port,
            baud,
            timeout,
        } => {
            let config = pre_config.unwrap_or_default();
            let ok = smoke_test(&config, port, baud, timeout).await?;
            std::process::exit(if ok { 0 } else { 1 });
        }
    }

    Ok(())
}

#[cfg(feature = "serial")]
async fn run_bridge(config: Config) -> Result<()> {
    use fieldlink::bridge::Bridge;
    use fieldlink::link::{SerialOpener, Transport, TransportSettings};
    use fieldlink::pairing::{nmcli::NmcliManager, NetworkManager};
    use fieldlink::services::http::http_services;
    use std::sync::Arc;

    info!("Starting fieldlink v{}", env!("CARGO_PKG_VERSION"));
    let transport = Transport::new(
        SerialOpener {
            port: config.link.port.clone(),
            baud_rate: config.link.baud_rate,
            read_timeout: config.link.read_timeout(),
        },
        TransportSettings {
            max_payload: config.link.max_payload,
            reconnect_interval: config.link.reconnect_interval(),
        },
    );
    let services = http_services(&config.services)?;
    let network: Option<Arc<dyn NetworkManager>> = if config.pairing.enabled {
        Some(Arc::new(NmcliManager::new(&config.pairing)))
    } else {
        None
    };

    let bridge = Bridge::start(&config, transport, services, network)?;
    info!("Bridge running on {}; Ctrl-C to stop", config.link.port);
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    bridge.shutdown().await;
    Ok(())
}

#[cfg(not(feature = "serial"))]
async fn run_bridge(_config: Config) -> Result<()> {
    log::error!("start requires the 'serial' feature");
    std::process::exit(2);
}

async fn show_status(config: &Config, config_path: &str) -> Result<()> {
    if let Some(path) = &config.status.file {
        if let Ok(text) = tokio::fs::read_to_string(path).await {
            println!("{}", text);
            return Ok(());
        }
    }
    println!("fieldlink v{}", env!("CARGO_PKG_VERSION"));
    println!("No status snapshot found; configuration from {}:", config_path);
    println!("  Link:       {} @ {} baud, {} byte payload", config.link.port, config.link.baud_rate, config.link.max_payload);
    println!(
        "  Forwarding: {} (TEL {} ms, DET {} ms, STS {} ms)",
        if config.forward.enabled { "on" } else { "off" },
        config.forward.telemetry_interval_ms,
        config.forward.detection_interval_ms,
        config.forward.status_interval_ms
    );
    println!(
        "  Pairing:    {} (interface {}, hostname {})",
        if config.pairing.enabled { "on" } else { "off" },
        config.pairing.interface,
        config.pairing.hostname
    );
    Ok(())
}

#[cfg(feature = "serial")]
async fn smoke_test(config: &Config, port: String, baud: u32, timeout: u64) -> Result<bool> {
    use fieldlink::link::{classify, SerialOpener, Transport, TransportSettings};
    use std::collections::BTreeMap;
    use std::time::{Duration, Instant};

    info!("Starting smoke test on {} @ {} baud", port, baud);
    let transport = Transport::new(
        SerialOpener {
            port,
            baud_rate: baud,
            read_timeout: config.link.read_timeout(),
        },
        TransportSettings {
            max_payload: config.link.max_payload,
            reconnect_interval: config.link.reconnect_interval(),
        },
    );
    let summary = tokio::task::spawn_blocking(move || -> Result<serde_json::Value> {
        let mut reader = transport.try_open()?;
        let deadline = Instant::now() + Duration::from_secs(timeout);
        let mut kinds: BTreeMap<String, u64> = BTreeMap::new();
        let mut lines = 0u64;
        let mut last_rssi = None;
        while Instant::now() < deadline {
            if let Some(line) = reader.read_line()? {
                let classified = classify(&line);
                lines += 1;
                let kind = serde_json::to_value(classified.message.kind)?
                    .as_str()
                    .unwrap_or("generic")
                    .to_string();
                *kinds.entry(kind).or_default() += 1;
                if classified.message.rssi.is_some() {
                    last_rssi = classified.message.rssi;
                }
            }
        }
        Ok(serde_json::json!({
            "status": if lines > 0 { "ok" } else { "silent" },
            "device": transport.device(),
            "lines": lines,
            "kinds": kinds,
            "last_rssi": last_rssi,
            "timeout_seconds": timeout,
        }))
    })
    .await??;
    let ok = summary["lines"].as_u64().unwrap_or(0) > 0;
    println!("{}", summary);
    Ok(ok)
}

#[cfg(not(feature = "serial"))]
async fn smoke_test(_config: &Config, _port: String, _baud: u32, _timeout: u64) -> Result<bool> {
    log::error!("smoketest requires the 'serial' feature");
    std::process::exit(2);
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity wins; otherwise the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });
    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));

        // In daemon mode stdout is redirected, so this is false
        let is_tty = atty::is(atty::Stream::Stdout);

        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());

            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }

            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                // Daemon mode: don't write to fmt to avoid duplicates
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

/// Arguments for the detached child: a foreground `start` against the
/// already resolved device, so the child never re-enters daemon mode.
#[cfg(any(test, all(unix, feature = "daemon")))]
fn daemon_child_args(config_path: &str, port: &str, pid_file: &str, verbose: u8) -> Vec<String> {
    let mut args = vec![
        "--config".to_string(),
        config_path.to_string(),
        "start".to_string(),
        "--port".to_string(),
        port.to_string(),
        "--pid-file".to_string(),
        pid_file.to_string(),
    ];
    if verbose > 0 {
        args.push(format!("-{}", "v".repeat(verbose as usize)));
    }
    args
}

/// Detach the bridge into its own process group (Unix only).
///
/// The child gets stdout/stderr on the configured log file and an absolute
/// config path, since it may outlive the launching shell. The parent writes
/// the PID file and exits.
#[cfg(all(unix, feature = "daemon"))]
fn daemonize_process(config: &Config, config_path: &str, pid_file: &str, verbose: u8) -> Result<()> {
    use std::fs::OpenOptions;
    use std::os::unix::process::CommandExt;
    use std::process::{Command, Stdio};

    let log_path = config.logging.file.as_deref().unwrap_or("fieldlink.log");
    let log_file = OpenOptions::new().create(true).append(true).open(log_path)?;
    let config_path = std::fs::canonicalize(config_path)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| config_path.to_string());

    let child = Command::new(std::env::current_exe()?)
        .args(daemon_child_args(&config_path, &config.link.port, pid_file, verbose))
        .process_group(0)
        .stdin(Stdio::null())
        .stdout(log_file.try_clone()?)
        .stderr(log_file)
        .spawn()?;

    std::fs::write(pid_file, format!("{}\n", child.id()))?;
    println!("fieldlink started in background (pid {}, log {})", child.id(), log_path);
    std::process::exit(0);
}
