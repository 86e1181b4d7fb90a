// session-watch binary
//
// Loads the configuration, starts the platform monitor and the pulse
// timers, then runs until SIGINT/SIGTERM.

use clap::Parser;
use serde_json::json;
use session_watch::config::{read_config, AgentConfig, MonitorConfig};
use session_watch::logging::init_logging;
use session_watch::{ActivationSender, NotificationChannel, PulseTimer, Result, SessionRegistry};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "session-watch", version, about = "User session monitor with rule-based alerts")]
struct Cli {
    /// Configuration file (default: <config dir>/session-watch/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// logind runtime directory
    #[arg(long)]
    sessions_dir: Option<PathBuf>,

    /// Log level when SESSION_WATCH_LOG/RUST_LOG are unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print the session report after the initial scan and exit
    #[arg(long)]
    report: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "session-watch failed");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = read_config(cli.config.as_deref())?;
    if let Some(dir) = cli.sessions_dir {
        config.sessions_dir = dir;
    }
    if config.agents.is_empty() {
        config.agents.push(AgentConfig::default());
    }

    // Before any thread exists, so every thread inherits the mask
    if !cli.report {
        block_termination_signals()?;
    }

    let sender = Arc::new(ActivationSender::new(config.dispatch)?);
    let channel = platform_channel(&config);
    let registry = Arc::new(SessionRegistry::new(channel.attributes()));

    let agents = config
        .agents
        .iter()
        .map(|agent| agent.build(&registry, sender.clone()))
        .collect::<Result<Vec<_>>>()?;

    if cli.report {
        // Agents stay unregistered: a report must not fire rules
        registry.activate(channel)?;
        let report: Vec<_> = agents
            .iter()
            .map(|agent| json!({ "agent": agent.name(), "sessions": agent.report() }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&report)?);
        registry.deactivate()?;
        sender.shutdown();
        return Ok(());
    }

    for agent in &agents {
        registry.register(agent.clone());
    }
    registry.activate(channel)?;

    let mut timers = agents
        .iter()
        .map(|agent| PulseTimer::start(agent.clone()))
        .collect::<std::io::Result<Vec<_>>>()?;

    info!(agents = agents.len(), "session-watch is running");
    wait_for_termination()?;
    info!("Stopping session-watch");

    for timer in &mut timers {
        timer.stop();
    }
    let result = registry.deactivate();
    sender.shutdown();
    result
}

#[cfg(target_os = "linux")]
fn platform_channel(config: &MonitorConfig) -> Box<dyn NotificationChannel> {
    use session_watch::monitor::{LogindChannel, LogindSource};

    Box::new(LogindChannel::new(LogindSource::new(config.sessions_dir.clone())))
}

#[cfg(not(target_os = "linux"))]
fn platform_channel(_config: &MonitorConfig) -> Box<dyn NotificationChannel> {
    use session_watch::monitor::ManualChannel;
    use session_watch::session::MemorySource;

    tracing::warn!("No native session monitor on this platform");
    let (channel, _handle) = ManualChannel::new(Arc::new(MemorySource::new()));
    Box::new(channel)
}

#[cfg(target_os = "linux")]
fn termination_signals() -> nix::sys::signal::SigSet {
    use nix::sys::signal::{SigSet, Signal};

    let mut signals = SigSet::empty();
    signals.add(Signal::SIGINT);
    signals.add(Signal::SIGTERM);
    signals
}

#[cfg(target_os = "linux")]
fn block_termination_signals() -> Result<()> {
    termination_signals()
        .thread_block()
        .map_err(std::io::Error::from)?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn wait_for_termination() -> Result<()> {
    let signal = termination_signals().wait().map_err(std::io::Error::from)?;
    info!(signal = %signal, "Termination requested");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn block_termination_signals() -> Result<()> {
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn wait_for_termination() -> Result<()> {
    info!("Press enter to stop");
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(())
}
