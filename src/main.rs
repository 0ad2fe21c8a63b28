// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{crate_version, Parser, Subcommand};
use hound::{SampleFormat, WavSpec, WavWriter};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use floe::config::EngineConfig;
use floe::effects::{convolution, EffectKind, MAX_BLOCK_FRAMES};
use floe::engine::{AudioBlock, Engine, MidiEvent};
use floe::library::scanner::{LibraryScanner, ScanReport};
use floe::library::{read_library, Library};
use floe::samples::{InstrumentLoader, SampleStore};
use floe::script::{example_script, SandboxSettings};

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "Sample library interpreter and renderer."
)]
struct Cli {
    /// Optional engine configuration file (YAML). FLOE_* variables override it.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interprets every library under the given folder and reports problems.
    Check {
        /// A library folder, a folder of libraries or a single floe.lua.
        path: PathBuf,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Prints a documented example floe.lua to stdout.
    Schema {},
    /// Renders a single note of an instrument to a WAV file.
    Render {
        /// The library folder or its floe.lua.
        library: PathBuf,
        /// The instrument name.
        instrument: String,
        /// Where to write the 32-bit float stereo WAV.
        output: PathBuf,
        /// MIDI key to play.
        #[arg(short, long, default_value_t = 60)]
        note: u8,
        /// MIDI velocity, 1 to 127.
        #[arg(short, long, default_value_t = 100)]
        velocity: u8,
        /// How long the key is held, in seconds.
        #[arg(long, default_value_t = 1.0)]
        hold: f64,
        /// Total length of the render, in seconds.
        #[arg(short, long, default_value_t = 3.0)]
        seconds: f64,
        /// Impulse response from the same library for the convolution reverb.
        #[arg(long)]
        ir: Option<String>,
    },
}

#[derive(Serialize)]
struct JsonReport {
    libraries: Vec<JsonLibrary>,
    failures: Vec<JsonFailure>,
}

#[derive(Serialize)]
struct JsonLibrary {
    author: String,
    name: String,
    path: PathBuf,
    instruments: Vec<String>,
    impulse_responses: Vec<String>,
    file_issues: Vec<String>,
}

#[derive(Serialize)]
struct JsonFailure {
    path: PathBuf,
    code: String,
    message: String,
}

impl From<&ScanReport> for JsonReport {
    fn from(report: &ScanReport) -> Self {
        JsonReport {
            libraries: report
                .libraries
                .iter()
                .map(|load| JsonLibrary {
                    author: load.library.info.author.clone(),
                    name: load.library.info.name.clone(),
                    path: load.library.script_path.clone(),
                    instruments: load.library.instruments().iter().map(|i| i.name.clone()).collect(),
                    impulse_responses: load.library.irs().iter().map(|ir| ir.name.clone()).collect(),
                    file_issues: load
                        .file_issues
                        .iter()
                        .map(|issue| format!("{}: {}", issue.path, issue.kind))
                        .collect(),
                })
                .collect(),
            failures: report
                .failures
                .iter()
                .map(|failure| JsonFailure {
                    path: failure.path.clone(),
                    code: failure.error.code().to_string(),
                    message: failure.error.to_string(),
                })
                .collect(),
        }
    }
}

fn check(config: &EngineConfig, path: &Path, json: bool) -> Result<bool, Box<dyn Error>> {
    let scanner = LibraryScanner::new(SandboxSettings::from_config(config)?, config.worker_threads())?;
    let report = scanner.scan(path, None)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&JsonReport::from(&report))?);
        return Ok(report.is_clean());
    }

    if report.libraries.is_empty() && report.failures.is_empty() {
        println!("No libraries found in {}.", path.display());
        return Ok(true);
    }

    println!("Libraries (count: {}):", report.libraries.len());
    for load in report.libraries.iter() {
        let library = &load.library;
        println!(
            "- {} ({} instruments, {} impulse responses)",
            library.id(),
            library.instruments().len(),
            library.irs().len()
        );
        for instrument in library.instruments() {
            println!("  - {} ({} regions)", instrument.name, instrument.regions.len());
        }
        for issue in load.file_issues.iter() {
            println!("  ! {}: {}", issue.path, issue.kind);
        }
    }

    if !report.failures.is_empty() {
        println!("\nFailures (count: {}):", report.failures.len());
        for failure in report.failures.iter() {
            println!(
                "- {} [{}]: {}",
                failure.path.display(),
                failure.error.code(),
                failure.error
            );
        }
    }
    Ok(report.is_clean())
}

fn library_script(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(floe::library::LIBRARY_SCRIPT_NAME)
    } else {
        path.to_path_buf()
    }
}

struct RenderRequest<'a> {
    library: &'a Path,
    instrument: &'a str,
    output: &'a Path,
    note: u8,
    velocity: u8,
    hold: f64,
    seconds: f64,
    ir: Option<&'a str>,
}

fn render(config: &EngineConfig, request: &RenderRequest) -> Result<(), Box<dyn Error>> {
    let settings = SandboxSettings::from_config(config)?;
    let load = read_library(&library_script(request.library), &settings, None)?;
    let library: Arc<Library> = load.library;

    let store = Arc::new(SampleStore::new());
    let loader = InstrumentLoader::new(store.clone());
    let instrument = Arc::new(loader.load(&library, request.instrument, None)?);
    if instrument.playable_count() == 0 {
        warn!(instrument = request.instrument, "No region of this instrument can play");
    }

    let (mut engine, handle) = Engine::new(config)?;
    handle.set_instrument(0, Some(instrument))?;
    if let Some(ir) = request.ir {
        let audio = loader.load_impulse_response(&library, ir, None)?;
        handle.set_impulse_response(Some(audio.as_ref()));
        handle.set_effect_enabled(EffectKind::ConvolutionReverb, true);
        handle.set_effect_param(EffectKind::ConvolutionReverb, convolution::MIX, 0.3)?;
    }

    let sample_rate = engine.sample_rate();
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(request.output, spec)?;

    let total_frames = (request.seconds.max(0.0) * sample_rate as f64) as usize;
    let release_frame = (request.hold.max(0.0) * sample_rate as f64) as usize;
    let mut out = [0.0f32; MAX_BLOCK_FRAMES * 2];
    let mut position = 0;
    while position < total_frames {
        let frames = MAX_BLOCK_FRAMES.min(total_frames - position);
        let mut midi = Vec::new();
        if position == 0 {
            midi.push(MidiEvent::note_on(0, 0, request.note, request.velocity.clamp(1, 127)));
        }
        if (position..position + frames).contains(&release_frame) {
            midi.push(MidiEvent::note_off((release_frame - position) as u32, 0, request.note));
        }
        engine.process(&AudioBlock::new(frames, sample_rate, &midi), &mut out)?;
        for sample in &out[..frames * 2] {
            writer.write_sample(*sample)?;
        }
        position += frames;
        handle.collect_garbage();
    }
    writer.finalize()?;

    drop(engine);
    handle.collect_garbage();
    let stats = handle.stats();
    info!(
        path = ?request.output,
        frames = total_frames,
        failed_voice_starts = stats.failed_voice_starts,
        purged = store.purge(),
        "Render finished"
    );
    Ok(())
}

fn main() -> Result<ExitCode, Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = floe::config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Check { path, json } => {
            if !check(&config, &path, json)? {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Schema {} => {
            print!("{}", example_script());
        }
        Commands::Render {
            library,
            instrument,
            output,
            note,
            velocity,
            hold,
            seconds,
            ir,
        } => {
            render(
                &config,
                &RenderRequest {
                    library: &library,
                    instrument: &instrument,
                    output: &output,
                    note,
                    velocity,
                    hold,
                    seconds,
                    ir: ir.as_deref(),
                },
            )?;
        }
    }
    Ok(ExitCode::SUCCESS)
}
