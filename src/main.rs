#![warn(clippy::all)]

// main entry point
use clap::Parser;
use log::{debug, error, info, warn, LevelFilter, SetLoggerError};
use nfgate::prelude::{DropRate, Packet, Queue, QueueSettings, QueueStats, StopHandle, Verdict};
use nfgate::settings::{default_config_path, load_config, save_config};
use nfgate::utils::log_statistics;
use rand::rng;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{self, ExitCode};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// Simple console logger implementation
struct SimpleLogger;

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            let mut stderr = io::stderr().lock();
            let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
            // nowhere left to report a failed log write
            let _ = writeln!(
                stderr,
                "[{}] {} - {}: {}",
                timestamp,
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

static LOGGER: SimpleLogger = SimpleLogger;

/// Initialize the application logger at the given level
fn init_logger(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER).map(|()| log::set_max_level(level))
}

/// Attach to a netfilter queue and issue a verdict for every packet
#[derive(Parser, Debug)]
#[command(name = "nfgate", version, about)]
struct Cli {
    /// Load queue settings from a TOML file instead of the queue options
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Save the effective queue settings (to the default location if no FILE is given)
    #[arg(long, value_name = "FILE", num_args = 0..=1)]
    save_config: Option<Option<PathBuf>>,

    #[command(flatten)]
    queue: QueueSettings,

    /// Fraction of packets to drop, e.g. 0.1 or 10%
    #[arg(long, default_value_t = DropRate::default())]
    drop_rate: DropRate,

    /// Firewall mark set on accepted packets
    #[arg(long)]
    mark: Option<u32>,

    /// Log statistics every N seconds while running (0 = only at exit)
    #[arg(long, value_name = "SECS", default_value_t = 0)]
    stats_interval: u64,

    /// Print the final statistics as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,
}

/// What the harness does with each packet.
#[derive(Debug, Clone, Copy)]
struct Policy {
    drop_rate: DropRate,
    mark: Option<u32>,
}

impl Policy {
    fn apply(&self, packet: &mut Packet<'_>) {
        debug!(
            "Packet {}: {} bytes, mark {:#x}, in {} out {}",
            packet.id(),
            packet.payload().len(),
            packet.mark(),
            packet.indev(),
            packet.outdev()
        );

        let result = if self.drop_rate.should_drop(&mut rng()) {
            packet.discard()
        } else {
            match self.mark {
                Some(mark) => packet.set_verdict_mark(Verdict::Accept, mark),
                None => packet.accept(),
            }
        };

        if let Err(e) = result {
            warn!("Packet {}: {}", packet.id(), e);
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logger(cli.log_level) {
        eprintln!("Failed to initialize logger: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> nfgate::Result<()> {
    let settings = match &cli.config {
        Some(path) => load_config(path)?,
        None => cli.queue.clone(),
    };

    if let Some(target) = &cli.save_config {
        let path = match target {
            Some(path) => path.clone(),
            None => default_config_path().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "no configuration directory on this platform")
            })?,
        };
        save_config(&settings, &path)?;
    }

    info!(
        "nfgate starting on queue {} (copy mode {}, drop rate {})",
        settings.queue_num, settings.copy_mode, cli.drop_rate
    );

    let policy = Policy {
        drop_rate: cli.drop_rate,
        mark: cli.mark,
    };
    let mut queue = Queue::from_settings(&settings, move |packet| policy.apply(packet))?;

    let stop = queue.stop_handle();
    let stats = queue.stats();
    let poll_interval = settings.poll_interval();
    ctrlc::set_handler(move || match on_interrupt(&stop, poll_interval) {
        InterruptAction::Stop => info!("Interrupt received, stopping (press Ctrl-C again to exit now)"),
        InterruptAction::Exit => {
            warn!("Interrupt received, exiting without waiting for the receive loop");
            log_statistics(&stats.snapshot());
            process::exit(130);
        }
    })
    .map_err(io::Error::other)?;

    let reporter = (cli.stats_interval > 0).then(|| {
        spawn_reporter(
            queue.stats(),
            queue.stop_handle(),
            Duration::from_secs(cli.stats_interval),
        )
    });

    let result = queue.run();

    // also releases the reporter when the loop failed
    queue.stop_handle().request_stop();
    queue.close();
    if let Some(handle) = reporter {
        if handle.join().is_err() {
            warn!("Statistics reporter thread panicked");
        }
    }

    let snapshot = queue.stats().snapshot();
    log_statistics(&snapshot);
    if cli.json {
        let json = serde_json::to_string_pretty(&snapshot).map_err(io::Error::from)?;
        println!("{}", json);
    }

    result
}

/// What a Ctrl-C does.
#[derive(Debug, PartialEq, Eq)]
enum InterruptAction {
    /// The receive loop will notice the stop request within a poll interval
    Stop,
    /// Leave right away; the socket is released by the kernel on exit
    Exit,
}

/// Requests a stop on the first interrupt.
///
/// Interrupted reads are restarted, so without a poll interval an idle loop
/// never sees the request; a second interrupt always exits.
fn on_interrupt(stop: &StopHandle, poll_interval: Option<Duration>) -> InterruptAction {
    if poll_interval.is_none() || stop.is_stop_requested() {
        return InterruptAction::Exit;
    }
    stop.request_stop();
    InterruptAction::Stop
}

/// Logs statistics every `interval` until a stop is requested.
fn spawn_reporter(stats: Arc<QueueStats>, stop: StopHandle, interval: Duration) -> JoinHandle<()> {
    const TICK: Duration = Duration::from_millis(100);

    thread::spawn(move || {
        let mut next = Instant::now() + interval;
        while !stop.is_stop_requested() {
            let now = Instant::now();
            if now >= next {
                log_statistics(&stats.snapshot());
                next = now + interval;
            }
            thread::sleep(TICK.min(next.saturating_duration_since(now)));
        }
    })
}
