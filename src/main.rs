//! kiosk-watchdog - inactivity watchdogs for shared Linux machines.
//!
//! `idle` runs inside a user session and logs the user off after a period of
//! inactivity. `reboot` runs as a system service and reboots the machine
//! once nobody has been logged on for a while.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use serde::Serialize;
use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use kiosk_watchdog::config::LayeredSettings;
use kiosk_watchdog::config::SettingKey;
use kiosk_watchdog::config::Tier;
use kiosk_watchdog::idle::IdleWatchdog;
use kiosk_watchdog::nologon::NoLogonWatchdog;
use kiosk_watchdog::platform::DesktopNotifier;
use kiosk_watchdog::platform::DryRunPower;
use kiosk_watchdog::platform::DryRunSession;
use kiosk_watchdog::platform::FallbackIdleSource;
use kiosk_watchdog::platform::IdleSource;
use kiosk_watchdog::platform::Logind;
use kiosk_watchdog::platform::PowerControl;
use kiosk_watchdog::platform::SessionControl;
use kiosk_watchdog::platform::X11IdleSource;
use kiosk_watchdog::platform::process;
use kiosk_watchdog::supervisor::Supervisor;
use kiosk_watchdog::supervisor::Watchdog;

/// Session-bus name held by the running idle watchdog.
const IDLE_INSTANCE_NAME: &str = "io.github.kiosk_watchdog.Idle";

/// Inactivity watchdogs: idle log-off and no-logon reboot.
#[derive(Parser, Debug)]
#[command(name = "kiosk-watchdog")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to the machine policy file.
    #[arg(long, global = true)]
    policy: Option<PathBuf>,

    /// Path to the preference file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log terminal actions instead of performing them.
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Warn and then log off the current session when it sits idle.
    Idle,

    /// Reboot the machine when nobody has been logged on for a while.
    Reboot,

    /// Inspect or edit settings.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective value of every setting and where it came from.
    Show {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Store a preference value, in minutes.
    Set { key: SettingKey, minutes: u64 },

    /// Remove a preference value.
    Unset { key: SettingKey },
}

/// One row of `config show --json`.
#[derive(Serialize)]
struct EffectiveSetting {
    key: &'static str,
    minutes: u64,
    source: Tier,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    // Niceness is per thread on Linux; set it before the runtime spawns its
    // workers so they inherit it.
    if matches!(args.command, Command::Reboot) {
        process::lower_priority();
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?
        .block_on(run(args))
}

async fn run(args: Args) -> Result<()> {
    let settings = LayeredSettings::from_args(args.policy.as_deref(), args.config.as_deref());

    match args.command {
        Command::Idle => {
            info!("kiosk-watchdog v{} starting idle watchdog", env!("CARGO_PKG_VERSION"));
            run_idle(settings, args.dry_run).await
        }
        Command::Reboot => {
            info!("kiosk-watchdog v{} starting reboot watchdog", env!("CARGO_PKG_VERSION"));
            run_reboot(settings, args.dry_run).await
        }
        Command::Config { action } => run_config(&settings, action),
    }
}

/// Initialize logging with the specified level.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(format!("kiosk_watchdog={level}"))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}

/// Run the idle-input watchdog in the current session.
async fn run_idle(settings: LayeredSettings, dry_run: bool) -> Result<()> {
    let session_bus = zbus::Connection::session()
        .await
        .context("Failed to connect to session DBus")?;

    if !process::claim_single_instance(&session_bus, IDLE_INSTANCE_NAME).await? {
        info!("An idle watchdog is already running in this session, exiting");
        return Ok(());
    }

    let logind = Arc::new(
        Logind::connect_session()
            .await
            .context("Failed to initialize logind session")?,
    );

    let idle: Arc<dyn IdleSource> = Arc::new(FallbackIdleSource::new(
        X11IdleSource::connect(),
        logind.clone(),
    ));
    let session: Arc<dyn SessionControl> = if dry_run {
        Arc::new(DryRunSession)
    } else {
        logind
    };
    let notifier = Arc::new(DesktopNotifier::new(session_bus.clone()));

    let watchdog = IdleWatchdog::new(Arc::new(settings), idle, session, notifier);
    run_until_shutdown(watchdog).await
}

/// Run the no-logon watchdog for the whole machine.
async fn run_reboot(settings: LayeredSettings, dry_run: bool) -> Result<()> {
    let logind = Arc::new(Logind::connect().await?);
    let power: Arc<dyn PowerControl> = if dry_run {
        Arc::new(DryRunPower)
    } else {
        logind.clone()
    };

    let watchdog = NoLogonWatchdog::new(Arc::new(settings), logind, power);
    run_until_shutdown(watchdog).await
}

/// Poll until SIGINT or SIGTERM, then stop cleanly.
async fn run_until_shutdown<W: Watchdog>(watchdog: W) -> Result<()> {
    let mut supervisor = Supervisor::new(watchdog);
    supervisor.start();

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
        _ = terminate.recv() => {}
    }

    info!("Shutdown requested");
    supervisor.stop().await;
    Ok(())
}

fn run_config(settings: &LayeredSettings, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { json } => {
            let rows: Vec<EffectiveSetting> = settings
                .resolve_all()
                .into_iter()
                .map(|(key, resolved)| EffectiveSetting {
                    key: key.toml_key(),
                    minutes: resolved.minutes,
                    source: resolved.tier,
                })
                .collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                println!("# policy:     {}", settings.policy_path().display());
                match settings.preference_path() {
                    Some(path) => println!("# preference: {}", path.display()),
                    None => println!("# preference: (none)"),
                }
                for row in rows {
                    println!("{} = {}  # {:?}", row.key, row.minutes, row.source);
                }
            }
        }
        ConfigAction::Set { key, minutes } => {
            let stored = settings.set_preference(key, Some(minutes))?;
            if let Some(stored) = stored {
                println!("{} = {}", key.toml_key(), stored);
            }
            warn_if_overridden(settings, key);
        }
        ConfigAction::Unset { key } => {
            settings.set_preference(key, None)?;
            let resolved = settings.resolve(key);
            println!(
                "{} removed, now {} ({:?})",
                key.toml_key(),
                resolved.minutes,
                resolved.tier
            );
        }
    }
    Ok(())
}

fn warn_if_overridden(settings: &LayeredSettings, key: SettingKey) {
    let resolved = settings.resolve(key);
    if resolved.tier == Tier::Policy {
        warn!(
            "{} is set by policy to {}; the preference has no effect",
            key.toml_key(),
            resolved.minutes
        );
    }
}
