//! Command-line shell over the mode profile engine.
//!
//! The original lived behind a tray menu; the commands here are that menu's
//! entries. Each run performs exactly one action, prints the engine's
//! notification message, and lists any steps that failed.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level as TraceLevel;
use tracing_subscriber::FmtSubscriber;

use elite_switch::audio::{AudioControl, DeviceKind, SystemAudio};
use elite_switch::config::{Mode, ProfileConfig};
use elite_switch::engine::{ActionReport, EnginePaths, ModeProfileEngine};
use elite_switch::process::SystemProcesses;

#[derive(Parser)]
#[command(name = "elite-switch", version, about = "Switch the game between VR and Monitor profiles")]
struct Cli {
    /// Verbose diagnostic logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Switch to VR mode
    Vr,
    /// Switch to Monitor mode
    Monitor,
    /// Start the common tools plus the current mode's tools
    StartTools,
    /// Stop the common tools plus the current mode's tools
    StopTools,
    /// Re-read the profile config file
    Reload,
    /// Show the current mode and audio defaults
    Status,
    /// List active audio devices
    Devices,
    /// Write the built-in default profile config for hand editing
    InitConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        TraceLevel::DEBUG
    } else {
        TraceLevel::WARN
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let paths = EnginePaths::discover()?;

    match cli.command {
        Command::InitConfig => init_config(&paths),
        Command::Devices => list_devices(),
        Command::Status => status(paths),
        Command::Vr => run(paths, |engine| engine.switch_to(Mode::VR)),
        Command::Monitor => run(paths, |engine| engine.switch_to(Mode::Monitor)),
        Command::StartTools => run(paths, |engine| engine.start_tools()),
        Command::StopTools => run(paths, |engine| engine.stop_tools()),
        Command::Reload => run(paths, |engine| engine.reload_config()),
    }
}

type SystemEngine = ModeProfileEngine<SystemAudio, SystemProcesses>;

fn run(paths: EnginePaths, action: impl FnOnce(&mut SystemEngine) -> ActionReport) -> Result<()> {
    let mut engine = ModeProfileEngine::new(paths, SystemAudio::new(), SystemProcesses::new());

    let report = action(&mut engine);
    println!("{}", report.message);
    for problem in &report.problems {
        println!("  - {problem}");
    }

    Ok(())
}

fn status(paths: EnginePaths) -> Result<()> {
    let config_path = paths.config.clone();
    let engine = ModeProfileEngine::new(paths, SystemAudio::new(), SystemProcesses::new());

    println!("Current mode: {}", engine.current_mode());
    println!("Auto-start tools: {}", engine.settings().auto_start_tools);
    println!("Profile config: {}", config_path.display());

    for kind in [DeviceKind::Output, DeviceKind::Input] {
        match engine.audio().current_default(kind) {
            Ok(name) => println!("Default {kind} device: {name}"),
            Err(e) => println!("Default {kind} device: {e}"),
        }
    }

    Ok(())
}

fn list_devices() -> Result<()> {
    let audio = SystemAudio::new();

    for kind in [DeviceKind::Output, DeviceKind::Input] {
        match audio.device_names(kind) {
            Ok(names) => {
                println!("Active {kind} devices:");
                for name in names {
                    println!("  {name}");
                }
            }
            Err(e) => println!("Active {kind} devices: {e}"),
        }
    }

    Ok(())
}

fn init_config(paths: &EnginePaths) -> Result<()> {
    if paths.config.exists() {
        println!("Profile config already exists: {}", paths.config.display());
        return Ok(());
    }

    ProfileConfig::built_in().save(&paths.config)?;
    println!("Wrote default profile config: {}", paths.config.display());

    Ok(())
}
