// Prevents console window in release builds
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]
// Display control is Windows-only; elsewhere only the CLI plumbing is live
#![cfg_attr(not(windows), allow(dead_code))]

mod app;
mod autostart;
mod brightness;
mod config;
mod display;
mod gamma;
#[cfg(windows)]
mod host;
mod hotkeys;
mod reminder;
mod stats;
#[cfg(windows)]
mod tray;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use display::DisplaySetting;
use std::fs::OpenOptions;
use std::sync::Mutex;

const LOG_FILE: &str = "eyeprotector.log";

#[derive(Parser, Debug)]
#[command(name = "eyeprotector")]
#[command(version)]
#[command(about = "Colour temperature, brightness and break reminders", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run in the notification area (the default)
    Run {
        /// Started at login: skip the welcome notification
        #[arg(long)]
        background: bool,
    },
    /// Apply a colour temperature and/or brightness, or a named profile
    Apply {
        /// Colour temperature in Kelvin (1000-10000)
        #[arg(long, short)]
        temperature: Option<u32>,
        /// Brightness percentage (0-100)
        #[arg(long, short, allow_hyphen_values = true)]
        brightness: Option<i64>,
        #[arg(long, short, conflicts_with_all = ["temperature", "brightness"])]
        profile: Option<String>,
        /// Fade brightness over this many milliseconds
        #[arg(long, default_value_t = 0)]
        fade_ms: u64,
    },
    /// Restore the neutral gamma ramp
    Reset,
    /// Print the current monitor brightness
    Brightness,
    /// Launch on login
    Autostart {
        #[arg(value_enum)]
        action: AutostartAction,
    },
    /// Print daily usage statistics
    Stats,
    /// Print the settings file location
    ConfigPath,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum AutostartAction {
    Enable,
    Disable,
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run { background: false });
    let hosting = matches!(command, Commands::Run { .. });

    #[cfg(all(windows, not(debug_assertions)))]
    {
        if !hosting {
            attach_parent_console();
        }
    }
    init_logging(cli.debug, hosting)?;

    match command {
        Commands::Run { background } => run(background),
        Commands::Apply {
            temperature,
            brightness,
            profile,
            fade_ms,
        } => apply(temperature, brightness, profile, fade_ms),
        Commands::Reset => reset(),
        Commands::Brightness => print_brightness(),
        Commands::Autostart { action } => set_autostart(action),
        Commands::Stats => print_stats(),
        Commands::ConfigPath => {
            println!("{}", config::config_path().display());
            Ok(())
        }
    }
}

/// Log to stderr for one-shot commands, to a file in the data directory when hosting
fn init_logging(debug: bool, to_file: bool) -> Result<()> {
    let default_directive = if debug {
        "eyeprotector=debug"
    } else {
        "eyeprotector=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if to_file {
        let dir = config::data_dir();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create data directory {:?}", dir))?;
        let path = dir.join(LOG_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {:?}", path))?;
        builder.with_writer(Mutex::new(file)).with_ansi(false).init();
    } else {
        builder.with_writer(std::io::stderr).init();
    }
    Ok(())
}

/// Release builds have no console; borrow the parent's so CLI output is visible
#[cfg(all(windows, not(debug_assertions)))]
fn attach_parent_console() {
    use windows::Win32::System::Console::{AttachConsole, ATTACH_PARENT_PROCESS};
    unsafe {
        let _ = AttachConsole(ATTACH_PARENT_PROCESS);
    }
}

/// Print the status of a one-shot display change; nothing applied is an error
fn report_outcome(applied: bool, status: &str) -> Result<()> {
    if !applied {
        anyhow::bail!("Nothing was applied: {}", status);
    }
    println!("{}", status);
    Ok(())
}

/// Resolve the requested setting against the stored one
fn requested_setting(
    current: DisplaySetting,
    temperature: Option<u32>,
    brightness: Option<i64>,
) -> DisplaySetting {
    DisplaySetting {
        temperature: temperature.unwrap_or(current.temperature),
        brightness: brightness
            .map(display::clamp_brightness)
            .unwrap_or(current.brightness),
    }
    .clamped()
}

#[cfg(windows)]
fn run(background: bool) -> Result<()> {
    tracing::info!("Starting {} v{}", config::APP_NAME, env!("CARGO_PKG_VERSION"));
    host::run(background)
}

#[cfg(windows)]
fn apply(
    temperature: Option<u32>,
    brightness: Option<i64>,
    profile: Option<String>,
    fade_ms: u64,
) -> Result<()> {
    let cfg = config::load_config();
    let mut app = host::open_app(cfg)?;

    let target = match profile {
        Some(name) => app
            .config()
            .profile(&name)
            .with_context(|| format!("No display profile named '{}'", name))?,
        None => requested_setting(app.config().display, temperature, brightness),
    };

    let applied = if fade_ms > 0 {
        let tinted = app.apply_temperature(target.temperature);
        let fade = std::time::Duration::from_millis(fade_ms);
        let faded = app.fade_brightness(target.brightness, fade);
        match faded {
            Ok(_) => true,
            Err(e) if tinted => {
                tracing::warn!("{:#}", e);
                true
            }
            Err(e) => return Err(e),
        }
    } else {
        app.apply_display(target)
    };
    report_outcome(applied, app.status())
}

#[cfg(windows)]
fn reset() -> Result<()> {
    let mut app = host::open_app(config::load_config())?;
    app.reset_display()?;
    println!("{}", app.status());
    Ok(())
}

#[cfg(windows)]
fn print_brightness() -> Result<()> {
    let (_, mut brightness) = host::open_devices();
    let percent = brightness.current()?;
    println!("{}%", percent);
    Ok(())
}

#[cfg(not(windows))]
fn run(_background: bool) -> Result<()> {
    anyhow::bail!("The tray host is only available on Windows")
}

#[cfg(not(windows))]
fn apply(
    temperature: Option<u32>,
    brightness: Option<i64>,
    _profile: Option<String>,
    _fade_ms: u64,
) -> Result<()> {
    let target = requested_setting(config::load_config().display, temperature, brightness);
    anyhow::bail!(
        "Cannot apply {}K / {}%: display control is only available on Windows",
        target.temperature,
        target.brightness
    )
}

#[cfg(not(windows))]
fn reset() -> Result<()> {
    anyhow::bail!("Display control is only available on Windows")
}

#[cfg(not(windows))]
fn print_brightness() -> Result<()> {
    anyhow::bail!("Brightness control is only available on Windows")
}

fn set_autostart(action: AutostartAction) -> Result<()> {
    let enabled = match action {
        AutostartAction::Status => autostart::is_enabled(),
        AutostartAction::Enable | AutostartAction::Disable => {
            let enable = matches!(action, AutostartAction::Enable);
            autostart::set_enabled(enable)?;
            let mut cfg = config::load_config();
            cfg.launch_on_login = enable;
            config::save_config(&cfg)?;
            enable
        }
    };
    println!("Autostart {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}

fn print_stats() -> Result<()> {
    let log = stats::load(&stats::stats_path())?;
    if log.is_empty() {
        println!("No usage recorded yet");
        return Ok(());
    }
    for (day, usage) in &log {
        println!(
            "{}  {:>8}  {} reminders",
            day,
            stats::format_usage(usage.usage_seconds),
            usage.reminders
        );
    }
    Ok(())
}
