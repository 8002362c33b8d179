//! irccloud-osd - desktop alerts for IRCCloud private messages and highlights
//!
//! Logs in to IRCCloud, follows the account's event stream and raises one
//! desktop notification per buffer that receives a private message or a
//! highlight. Further messages to the same buffer are appended to the open
//! notification; dismissing it starts the buffer afresh.
//!
//! # Usage
//!
//! ```bash
//! # Run in the foreground (credentials from the environment)
//! IRCCLOUD_EMAIL=me@example.com IRCCLOUD_PASSWORD=... irccloud-osd
//!
//! # Run in the background, credentials from the config file
//! irccloud-osd start -d
//!
//! # Stop the background instance
//! irccloud-osd stop
//!
//! # Check whether it is running
//! irccloud-osd status
//!
//! # Log alerts instead of showing them, with debug logging
//! RUST_LOG=osdd=debug irccloud-osd start --sink log
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: close the stream and exit

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use osdd::config::APP_DIR;
use osdd::{Config, ConfigError, OsdError, Overrides, SinkKind};

/// Exit status for a bad invocation (missing credentials, bad flags)
const EXIT_USAGE: i32 = 2;

/// irccloud-osd - IRCCloud notification daemon
#[derive(Parser, Debug)]
#[command(name = "irccloud-osd", version, about, args_conflicts_with_subcommands = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Arguments for the implicit `start`
    #[command(flatten)]
    start: StartArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and start showing alerts
    Start(StartArgs),
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

#[derive(clap::Args, Debug)]
struct StartArgs {
    /// Run as a background daemon (fork to background)
    #[arg(short = 'd', long)]
    daemon: bool,

    /// IRCCloud account email
    #[arg(short, long, env = "IRCCLOUD_EMAIL")]
    email: Option<String>,

    /// IRCCloud account password
    #[arg(short, long, env = "IRCCLOUD_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Config file (default: $XDG_CONFIG_HOME/irccloud-osd/config.toml)
    #[arg(short, long, env = "IRCCLOUD_OSD_CONFIG")]
    config: Option<PathBuf>,

    /// Where alerts go: "desktop" or "log"
    #[arg(long)]
    sink: Option<SinkKind>,
}

impl From<StartArgs> for Overrides {
    fn from(args: StartArgs) -> Self {
        Self {
            email: args.email,
            password: args.password,
            config_path: args.config,
            sink: args.sink,
        }
    }
}

// ============================================================================
// State Files
// ============================================================================

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(APP_DIR)
}

/// Returns the path to the PID file.
fn pid_file_path() -> PathBuf {
    state_dir().join("irccloud-osd.pid")
}

/// Returns the path to the log file used when daemonized.
fn log_file_path() -> PathBuf {
    state_dir().join("irccloud-osd.log")
}

/// Reads the PID from the PID file, if it exists.
fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

/// Writes the current PID to the PID file.
fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

/// Checks if a process with the given PID is running.
fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

/// Returns the PID of a running instance, clearing a stale PID file.
fn running_instance() -> Option<u32> {
    let pid = read_pid()?;
    if is_process_running(pid) {
        return Some(pid);
    }
    remove_pid_file();
    None
}

/// Sends SIGTERM to the daemon process.
fn stop_daemon(pid: u32) -> Result<()> {
    let pid = i32::try_from(pid).context("PID out of range")?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    let result = unsafe { libc::kill(pid, libc::SIGTERM) };
    if result != 0 {
        bail!("Failed to send SIGTERM to process {pid}");
    }
    Ok(())
}

// ============================================================================
// Entry Point
// ============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    // No subcommand means `start`
    let command = args.command.unwrap_or(Command::Start(args.start));

    match command {
        Command::Start(start_args) => start(start_args),
        Command::Stop => {
            let Some(pid) = running_instance() else {
                println!("irccloud-osd is not running.");
                return Ok(());
            };
            println!("Stopping irccloud-osd (PID {pid})...");
            stop_daemon(pid)?;

            // Wait for process to exit (up to 5 seconds)
            for _ in 0..50 {
                if !is_process_running(pid) {
                    println!("Stopped.");
                    return Ok(());
                }
                std::thread::sleep(std::time::Duration::from_millis(100));
            }

            eprintln!("irccloud-osd did not stop within 5 seconds.");
            process::exit(1);
        }
        Command::Status => match running_instance() {
            Some(pid) => {
                println!("irccloud-osd is running (PID {pid})");
                println!("Log: {}", log_file_path().display());
                Ok(())
            }
            None => {
                println!("irccloud-osd is not running.");
                process::exit(1);
            }
        },
    }
}

fn start(args: StartArgs) -> Result<()> {
    if let Some(pid) = running_instance() {
        eprintln!("irccloud-osd is already running (PID {pid})");
        eprintln!("Use 'irccloud-osd stop' to stop it first.");
        process::exit(1);
    }

    // Resolve settings while still attached to the terminal
    let daemon = args.daemon;
    let config = match Config::load(args.into()) {
        Ok(config) => config,
        Err(ConfigError::Missing(key)) => {
            eprintln!(
                "error: no {key} given (use --{key}, IRCCLOUD_{} or the config file)",
                key.to_ascii_uppercase()
            );
            process::exit(EXIT_USAGE);
        }
        Err(e) => return Err(e).context("Failed to load configuration"),
    };

    if daemon {
        daemonize()?;
    }
    init_logging()?;

    write_pid()?;
    let result = run(&config);
    remove_pid_file();

    match result {
        Err(e) if e.is_auth_failure() => {
            error!(error = %e, "Login rejected");
            eprintln!("Authentication failure");
            process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "irccloud-osd stopped with an error");
            Err(e.into())
        }
        Ok(()) => Ok(()),
    }
}

fn run(config: &Config) -> Result<(), OsdError> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        email = %config.credentials.email,
        "irccloud-osd starting"
    );
    osdd::daemon::run(config)?;
    info!("irccloud-osd stopped");
    Ok(())
}

/// Crate targets logged at `info` when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "irccloud_osd=info,osdd=info,osd_core=info,osd_protocol=info,osd_transport=info";

/// `RUST_LOG` when it is set and valid, otherwise `DEFAULT_LOG_FILTER`.
fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn init_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// Daemonizes the current process.
fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}
