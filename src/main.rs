//! synthbridge - command-line host for the SoundFont plugin bridge.
//!
//! Loads the plugin the way a host would (instantiate, select a program,
//! process blocks, save and restore chunks, clean up) and either lists the
//! program catalog, renders to a WAV file or plays through the default
//! audio device.
//!
//! # Usage
//!
//! ```bash
//! synthbridge --banks ./banks --list
//! synthbridge --banks ./banks --bank 0 --program 3 --midi song.mid --output song.wav
//! synthbridge --banks ./banks --bank 1 --play
//! ```

mod host;

use host::{
    demo_events, load_midi_events, render_to_wav, EventSchedule, OfflineHost, PluginSource,
};

use anyhow::{bail, Context, Result};
use rodio::OutputStream;
use std::path::PathBuf;
use std::sync::Arc;
use synthbridge::{BridgeConfig, NativePlugin, PluginHandle, SoundFontEngine, SynthBridge};

const DEFAULT_SAMPLE_RATE: u32 = 44100;
const DEFAULT_BUFFER_SIZE: u32 = 256;

/// Command-line options for the host.
#[derive(Debug, Default)]
struct CliOptions {
    /// Bank roots replacing the configured ones.
    banks: Vec<PathBuf>,
    /// Configuration file, instead of `SYNTHBRIDGE_CONFIG`.
    config: Option<PathBuf>,
    /// Print the program catalog.
    list: bool,
    bank: Option<u32>,
    program: Option<u32>,
    /// Standard MIDI File to render.
    midi: Option<PathBuf>,
    /// WAV file to render into.
    output: Option<PathBuf>,
    /// Play through the default audio device.
    play: bool,
    save_state: Option<PathBuf>,
    load_state: Option<PathBuf>,
    sample_rate: u32,
    buffer_size: u32,
}

impl CliOptions {
    /// Parses command-line arguments.
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let mut options = Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            ..Self::default()
        };
        let mut i = 1;

        while i < args.len() {
            let flag = args[i].as_str();
            match flag {
                "--banks" | "-b" => options.banks.push(take_path(&args, &mut i)?),
                "--config" | "-c" => options.config = Some(take_path(&args, &mut i)?),
                "--list" | "-l" => options.list = true,
                "--bank" => options.bank = Some(take_number(&args, &mut i)?),
                "--program" | "-p" => options.program = Some(take_number(&args, &mut i)?),
                "--midi" | "-m" => options.midi = Some(take_path(&args, &mut i)?),
                "--output" | "-o" => options.output = Some(take_path(&args, &mut i)?),
                "--play" => options.play = true,
                "--save-state" => options.save_state = Some(take_path(&args, &mut i)?),
                "--load-state" => options.load_state = Some(take_path(&args, &mut i)?),
                "--sample-rate" => options.sample_rate = take_number(&args, &mut i)?,
                "--buffer-size" => options.buffer_size = take_number(&args, &mut i)?,
                "--help" | "-h" => {
                    print_help(args.first().map(String::as_str).unwrap_or("synthbridge"));
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown option: {}", other);
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
            i += 1;
        }

        if options.sample_rate == 0 || options.buffer_size == 0 {
            bail!("--sample-rate and --buffer-size must be positive");
        }
        Ok(options)
    }
}

/// Consumes the argument following the flag at `args[*i]`.
fn take_value<'a>(args: &'a [String], i: &mut usize) -> Result<&'a str> {
    let flag = &args[*i];
    *i += 1;
    match args.get(*i) {
        Some(value) => Ok(value.as_str()),
        None => bail!("{} requires an argument", flag),
    }
}

fn take_path(args: &[String], i: &mut usize) -> Result<PathBuf> {
    take_value(args, i).map(PathBuf::from)
}

fn take_number(args: &[String], i: &mut usize) -> Result<u32> {
    let flag = args[*i].clone();
    let value = take_value(args, i)?;
    value
        .parse()
        .with_context(|| format!("{} expects a number, got '{}'", flag, value))
}

fn print_help(program: &str) {
    eprintln!("synthbridge - SoundFont plugin bridge host");
    eprintln!();
    eprintln!("Usage: {} [OPTIONS]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -b, --banks DIR        Bank root directory (repeatable)");
    eprintln!("  -c, --config FILE      JSON configuration file");
    eprintln!("  -l, --list             List every bank/program");
    eprintln!("      --bank N           Bank to select");
    eprintln!("  -p, --program N        Program slot to select (default 0)");
    eprintln!("  -m, --midi FILE        Standard MIDI File to render");
    eprintln!("  -o, --output FILE      Render into a WAV file");
    eprintln!("      --play             Play through the default audio device");
    eprintln!("      --save-state FILE  Write the plugin state chunk");
    eprintln!("      --load-state FILE  Restore a plugin state chunk");
    eprintln!("      --sample-rate HZ   Host sample rate (default 44100)");
    eprintln!("      --buffer-size N    Host block size (default 256)");
    eprintln!("  -h, --help             Print this help message");
    eprintln!();
    eprintln!("Without --midi a short chord is played.");
}

/// Main entry point.
fn main() -> Result<()> {
    let cli = CliOptions::parse()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => BridgeConfig::from_json_file(path)?,
        None => BridgeConfig::load()?,
    };
    if !cli.banks.is_empty() {
        config = config.with_bank_roots(cli.banks.clone());
    }

    let host = OfflineHost {
        sample_rate: cli.sample_rate,
        buffer_size: cli.buffer_size,
    };
    let bridge = SynthBridge::soundfont(config);
    let plugin = Arc::new(
        bridge
            .instantiate(&host)
            .context("Failed to instantiate plugin")?,
    );

    let result = run(&cli, host, &plugin);

    // A reference still held by the audio thread releases the instance when
    // that thread drops it.
    if let Ok(plugin) = Arc::try_unwrap(plugin) {
        bridge.cleanup(plugin);
    }
    result
}

/// Drives one plugin instance according to the options.
fn run(
    cli: &CliOptions,
    host: OfflineHost,
    plugin: &Arc<PluginHandle<SoundFontEngine>>,
) -> Result<()> {
    if cli.list {
        for index in 0..plugin.midi_program_count() {
            if let Some(entry) = plugin.midi_program_info(index) {
                println!("{:3} {:3}  {}", entry.bank, entry.program, entry.name);
            }
        }
    }

    if let Some(path) = &cli.load_state {
        let chunk = std::fs::read(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        plugin.set_chunk(&chunk);
    }

    if cli.bank.is_some() || cli.program.is_some() {
        plugin.set_midi_program(cli.bank.unwrap_or(0), cli.program.unwrap_or(0));
    }

    let events = match &cli.midi {
        Some(path) => load_midi_events(path, host.sample_rate)?,
        None => demo_events(host.sample_rate),
    };

    if let Some(output) = &cli.output {
        plugin.activate();
        render_to_wav(&**plugin, EventSchedule::new(events.clone()), host, output)?;
        plugin.deactivate();
        println!("Rendered to {}", output.display());
    }

    if cli.play {
        play(plugin, EventSchedule::new(events), host)?;
    }

    if let Some(path) = &cli.save_state {
        let chunk = plugin.chunk();
        if chunk.is_empty() {
            bail!("Plugin returned an empty state chunk");
        }
        std::fs::write(path, chunk)
            .with_context(|| format!("Failed to write state file: {}", path.display()))?;
    }

    Ok(())
}

/// Plays a schedule through the default audio device and waits for it.
fn play(
    plugin: &Arc<PluginHandle<SoundFontEngine>>,
    schedule: EventSchedule,
    host: OfflineHost,
) -> Result<()> {
    let (stream, stream_handle) =
        OutputStream::try_default().context("Failed to open audio output")?;

    let source = PluginSource::new(Arc::clone(plugin), schedule, host);
    let duration = source.duration();

    plugin.activate();
    stream_handle
        .play_raw(source)
        .context("Failed to start playback")?;
    std::thread::sleep(duration);

    drop(stream);
    plugin.deactivate();
    Ok(())
}
