use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use tempoclock::{
    Action, ConfigLoader, Meter, TempoClock, config::Validate, get_logger, log_error, log_info,
    log_warn,
    logger::{self, LoggingMode},
};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "tempoclock: a beat clock and scheduler for live coding.",
    long_about = "Runs the beat clock and its driver thread, optionally following an\n\
    external tempo session, and reports its state at a regular interval."
)]
struct Cli {
    /// Configuration file (defaults to <config dir>/tempoclock/config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initial tempo in beats per minute
    #[arg(short, long)]
    tempo: Option<f64>,

    /// Time signature, e.g. 7/8
    #[arg(short, long, value_parser = parse_meter)]
    meter: Option<Meter>,

    /// Follow the external tempo session
    #[arg(short, long)]
    link: bool,

    /// Beats added to the remote phase
    #[arg(long)]
    phase_offset: Option<f64>,

    /// Beats between two reconciliations with the session
    #[arg(long)]
    resync_interval: Option<f64>,

    /// Log every beat
    #[arg(long)]
    metronome: bool,

    /// Seconds between two status reports, 0 to disable
    #[arg(short, long, default_value_t = 4.0)]
    status_interval: f64,

    /// Print status reports as JSON
    #[arg(long)]
    json: bool,

    /// Stop after this many seconds instead of running until killed
    #[arg(short, long)]
    duration: Option<f64>,
}

fn parse_meter(text: &str) -> Result<Meter, String> {
    let (numerator, denominator) = text
        .split_once('/')
        .ok_or_else(|| format!("expected NUMERATOR/DENOMINATOR, got '{text}'"))?;
    let numerator = numerator.trim().parse().map_err(|e| format!("{e}"))?;
    let denominator = denominator.trim().parse().map_err(|e| format!("{e}"))?;
    Meter::new(numerator, denominator).map_err(|e| e.to_string())
}

fn load_config(cli: &Cli) -> Result<tempoclock::ClockConfig> {
    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new()?,
    };
    let mut config = loader
        .load_or_create()
        .with_context(|| format!("Could not load {}", loader.config_path().display()))?;

    if let Some(tempo) = cli.tempo {
        config.clock.tempo = tempo;
    }
    if let Some(meter) = cli.meter {
        config.clock.meter = meter;
    }
    if let Some(offset) = cli.phase_offset {
        config.sync.phase_offset = offset;
    }
    if let Some(interval) = cli.resync_interval {
        config.sync.resync_interval = interval;
    }
    config.sync.enabled |= cli.link;
    config.validate();
    Ok(config)
}

fn apply_logging(config: &logger::LoggingConfig) {
    let logger = get_logger();
    logger.configure(config);
    if matches!(config.mode, LoggingMode::File | LoggingMode::Full) {
        if let Some(path) = logger.log_file_path() {
            log_info!("Logging to {}", path.display());
        }
    }
}

fn report(clock: &TempoClock, json: bool) -> Result<()> {
    let status = clock.sync_status();
    if json {
        println!("{}", serde_json::to_string(&status)?);
    } else {
        log_info!(
            "beat {:.2} | {:.2} bpm | phase {:.2}/{} | sync {} ({} peers) | {} queued",
            clock.now(),
            clock.bpm(),
            status.phase,
            status.quantum,
            if status.enabled { "on" } else { "off" },
            status.peer_count,
            clock.pending()
        );
    }
    Ok(())
}

fn seconds(what: &str, value: f64) -> Result<Duration> {
    match Duration::try_from_secs_f64(value) {
        Ok(duration) => Ok(duration),
        Err(e) => bail!("Invalid {what} {value}: {e}"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init_standalone();

    let config = load_config(&cli)?;
    apply_logging(&config.logging);
    log_info!("tempoclock {}", env!("CARGO_PKG_VERSION"));

    let clock = TempoClock::new(&config)?;

    if config.sync.enabled {
        match clock.enable_sync_with_defaults() {
            Ok(status) => log_info!("Following session at {:.2} bpm", status.tempo),
            Err(e) => log_warn!("{e}. Running on local tempo."),
        }
    }

    if cli.metronome {
        let meter_clock = clock.clock().clone();
        let beat_action = Action::new(move || {
            let beat = meter_clock.now();
            let bar_length = meter_clock.bar_length();
            let position = beat.rem_euclid(bar_length).floor() as u32 + 1;
            log_info!("tick {position}/{}", meter_clock.meter().numerator());
        })
        .labeled("metronome");
        clock.every(1.0, beat_action)?;
    }

    clock.start()?;

    let started = Instant::now();
    let status_every = (cli.status_interval != 0.0)
        .then(|| seconds("status interval", cli.status_interval))
        .transpose()?;
    let limit = cli
        .duration
        .map(|duration| seconds("duration", duration))
        .transpose()?;
    let mut last_report = Instant::now();

    while limit.is_none_or(|limit| started.elapsed() < limit) {
        thread::sleep(Duration::from_millis(50));
        if !clock.is_running() {
            log_error!("Driver thread exited unexpectedly");
            break;
        }
        if let Some(every) = status_every {
            if last_report.elapsed() >= every {
                last_report = Instant::now();
                report(&clock, cli.json)?;
            }
        }
    }

    clock.disable_sync();
    clock.stop();
    Ok(())
}
