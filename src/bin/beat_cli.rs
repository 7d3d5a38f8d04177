use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use beat_tracker::audio::live::capture_device_names;
use beat_tracker::audio::{AudioSource, FileAudioSource, HopRecorder, LiveAudioSource};
use beat_tracker::sink::{SinkMutes, SocketSink};
use beat_tracker::{TrackerConfig, TrackerEvent, TrackerRunner};

#[derive(Parser, Debug)]
#[command(
    name = "beat_cli",
    about = "Real-time beat tracker emitting onset, beat and BPM events"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Track beats in a WAV file
    Track {
        /// Path to a 16-bit PCM WAV file
        #[arg(long)]
        input: PathBuf,
        /// Throttle hops to wall-clock time instead of running as
        /// fast as possible
        #[arg(long)]
        realtime: bool,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Track beats from a capture device
    Live {
        /// Substring of the capture device name; default device when
        /// omitted
        #[arg(long)]
        device: Option<String>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// List capture devices on the default host
    Devices,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// JSON configuration file; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,
    /// Write events to a tab-separated log file
    #[arg(long)]
    output: Option<PathBuf>,
    /// Record the consumed audio to a mono 16-bit WAV file
    #[arg(long)]
    record: Option<PathBuf>,
    /// Serve events to TCP clients at HOST:PORT in the 2-byte wire
    /// format
    #[arg(long)]
    serve: Option<String>,
    /// Do not print events to stdout
    #[arg(long)]
    quiet: bool,
    /// Do not forward beat events to the socket
    #[arg(long)]
    mute_beats: bool,
    /// Do not forward onset events to the socket
    #[arg(long)]
    mute_onsets: bool,
    /// Do not forward BPM events to the socket
    #[arg(long)]
    mute_bpm: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Track {
            input,
            realtime,
            common,
        } => {
            let config = load_config(&common)?;
            let source = FileAudioSource::open(&input, config.audio_hop_size, realtime)
                .with_context(|| format!("opening {}", input.display()))?;
            run_tracking(config, Box::new(source), &common)
        }
        Commands::Live { device, common } => {
            let config = load_config(&common)?;
            let source =
                LiveAudioSource::open(device.as_deref()).context("opening capture device")?;
            run_tracking(config, Box::new(source), &common)
        }
        Commands::Devices => run_devices(),
    }
}

fn load_config(common: &CommonArgs) -> Result<TrackerConfig> {
    let config = match &common.config {
        Some(path) => TrackerConfig::load_from_file(path)?,
        None => TrackerConfig::default(),
    };
    Ok(config)
}

fn run_devices() -> Result<ExitCode> {
    let names = capture_device_names().context("enumerating capture devices")?;
    if names.is_empty() {
        println!("No capture devices found");
    }
    for name in names {
        println!("{name}");
    }
    Ok(ExitCode::from(0))
}

fn run_tracking(
    config: TrackerConfig,
    source: Box<dyn AudioSource>,
    common: &CommonArgs,
) -> Result<ExitCode> {
    let sampling_rate = source.sampling_rate();
    let oss_rate = f64::from(sampling_rate) / config.audio_hop_size as f64;

    let (mut runner, mut events, _control) = TrackerRunner::new(config, source)?;
    if let Some(path) = &common.record {
        runner.set_recorder(HopRecorder::create(path, sampling_rate)?);
    }

    let mut log_writer = common
        .output
        .as_ref()
        .map(|path| EventLogWriter::create(path, oss_rate))
        .transpose()?;

    // Runtime hosting the socket sink and the Ctrl-C watcher; the
    // tick loop itself stays on plain threads.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    let sink = match &common.serve {
        Some(addr) => {
            let mutes = SinkMutes {
                beats: common.mute_beats,
                onsets: common.mute_onsets,
                bpm: common.mute_bpm,
            };
            Some(
                runtime
                    .block_on(SocketSink::bind(addr, mutes))
                    .with_context(|| format!("binding {addr}"))?,
            )
        }
        None => None,
    };

    let cancel = runner.cancel_flag();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("[Cli] Ctrl-C received, stopping at the next tick");
            cancel.store(true, Ordering::Relaxed);
        }
    });

    let runner_thread = std::thread::spawn(move || runner.run());

    loop {
        match events.pop() {
            Ok(event) => {
                if !common.quiet {
                    println!("{}", serde_json::to_string(&event)?);
                }
                if let Some(writer) = log_writer.as_mut() {
                    writer.write_event(&event)?;
                }
                if let Some(sink) = &sink {
                    sink.publish(&event);
                }
            }
            Err(_) => {
                if runner_thread.is_finished() {
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        }
    }
    while let Ok(event) = events.pop() {
        if !common.quiet {
            println!("{}", serde_json::to_string(&event)?);
        }
        if let Some(writer) = log_writer.as_mut() {
            writer.write_event(&event)?;
        }
        if let Some(sink) = &sink {
            sink.publish(&event);
        }
    }

    let stats = runner_thread
        .join()
        .map_err(|_| anyhow::anyhow!("tracker thread panicked"))?;
    if let Some(writer) = log_writer {
        writer.finish()?;
    }
    eprintln!(
        "Processed {} hops, emitted {} events ({} dropped)",
        stats.hops, stats.events, stats.dropped_events
    );
    Ok(ExitCode::from(0))
}

/// Tab-separated event log, one row per event plus a leading row
/// carrying the OSS sampling rate.
struct EventLogWriter {
    file: BufWriter<File>,
}

impl EventLogWriter {
    fn create(path: &PathBuf, oss_rate: f64) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        let mut file = BufWriter::new(file);
        writeln!(file, "event_flag\tevent_frame\tevent_time\tevent_value")?;
        writeln!(file, "SAMPLING_RATE_OSS\t0\t0\t{oss_rate:.6}")?;
        Ok(Self { file })
    }

    fn write_event(&mut self, event: &TrackerEvent) -> Result<()> {
        match event {
            TrackerEvent::Onset { frame, time } => {
                writeln!(self.file, "ONSET\t{frame}\t{time:.3}\t")?;
            }
            TrackerEvent::Beat { frame, time } => {
                writeln!(self.file, "BEAT\t{frame}\t{time:.3}\t")?;
            }
            TrackerEvent::Bpm { frame, time, value } => {
                writeln!(self.file, "BPM\t{frame}\t{time:.3}\t{value:.2}")?;
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}
