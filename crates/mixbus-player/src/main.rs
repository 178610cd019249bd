//! Mixbus Player - mix WAVE files to the sound card or to a file
//!
//! Every file gets its own source; all of them start together.
//!
//! ```text
//! mixbus-player drums.wav bass.wav
//! mixbus-player --loop --seconds 30 --render mix.wav loop.wav
//! mixbus-player --list-devices
//! ```
//!
//! Set RUST_LOG=debug for per-clip format details.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;

use mixbus_core::audio::{get_output_devices, AudioConfig, CpalDevice, OfflineDevice};
use mixbus_core::audio_file::AudioClip;
use mixbus_core::config::{default_config_path, load_config};
use mixbus_core::effect::native::distortion::{DistortionEffect, PARAM_DRIVE};
use mixbus_core::engine::{AudioSource, Mixer};

/// How often the live player checks for finished sources
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Parser, Debug)]
#[command(name = "mixbus-player", version, about = "Mix WAVE files in real time")]
struct Args {
    /// WAVE files to play simultaneously
    #[arg(required_unless_present = "list_devices")]
    files: Vec<PathBuf>,

    /// Loop every file until interrupted (or for --seconds)
    #[arg(short, long = "loop")]
    looping: bool,

    /// Per-source volume
    #[arg(short, long, default_value_t = 1.0)]
    volume: f32,

    /// Add a distortion with this normalized drive (0.0-1.0)
    #[arg(short, long)]
    distortion: Option<f32>,

    /// Render to a 32-bit float WAV file instead of the sound card
    #[arg(short, long, value_name = "OUT.wav")]
    render: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(short, long)]
    seconds: Option<f32>,

    /// Read files fully into memory before playing
    #[arg(long)]
    preload: bool,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Config file (defaults to <config dir>/mixbus/player.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured sample rate
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Override the configured frames per callback
    #[arg(long)]
    frames: Option<u32>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();

    if args.list_devices {
        for device in get_output_devices()? {
            println!("{}  {:?}Hz, {} ch", device, device.sample_rates, device.max_channels);
        }
        return Ok(());
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| default_config_path("player.yaml"));
    let mut config: AudioConfig = load_config(&config_path);
    if let Some(rate) = args.sample_rate {
        config.sample_rate = rate;
    }
    if let Some(frames) = args.frames {
        config.frames_per_callback = frames;
    }

    let clips = args
        .files
        .iter()
        .map(|path| open_clip(path, args.preload))
        .collect::<Result<Vec<_>>>()?;

    match &args.render {
        Some(out) => render_offline(&args, config, &clips, out),
        None => play_live(&args, config, &clips),
    }
}

fn open_clip(path: &Path, preload: bool) -> Result<AudioClip> {
    if preload {
        AudioClip::load(path).with_context(|| format!("Failed to read {:?}", path))
    } else {
        Ok(AudioClip::stream(path))
    }
}

/// Register one source per clip and start them all
fn start_sources(mixer: &mut Mixer, args: &Args, clips: &[AudioClip]) -> Result<Vec<AudioSource>> {
    let mut sources = Vec::with_capacity(clips.len());

    for clip in clips {
        let source = AudioSource::new();
        source.set_volume(args.volume);
        source.set_looping(args.looping);
        mixer.register_source(&source)?;

        if let Some(drive) = args.distortion {
            let effect = mixer.add_effect(&source, DistortionEffect::new())?;
            mixer.set_effect_param(&source, effect, PARAM_DRIVE, drive)?;
        }

        mixer
            .play(&source, clip)
            .with_context(|| format!("Failed to play '{}'", clip.name()))?;
        sources.push(source);
    }

    Ok(sources)
}

fn play_live(args: &Args, config: AudioConfig, clips: &[AudioClip]) -> Result<()> {
    let mut mixer = Mixer::new(config);
    let sample_rate = mixer
        .initialize(Box::new(CpalDevice::new()))
        .context("Failed to open audio output")?;
    println!("Audio output running at {} Hz", sample_rate);

    let sources = start_sources(&mut mixer, args, clips)?;
    let deadline = args
        .seconds
        .map(|secs| Instant::now() + Duration::from_secs_f32(secs.max(0.0)));

    loop {
        mixer.poll_events();
        if mixer.playing_count() == 0 {
            break;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            for source in &sources {
                mixer.stop(source)?;
            }
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    let stats = mixer.stats();
    log::info!(
        "{} blocks rendered, {} passes skipped for lack of scratch buffers",
        stats.renders(),
        stats.scratch_exhausted()
    );
    mixer.shutdown();
    Ok(())
}

fn render_offline(
    args: &Args,
    config: AudioConfig,
    clips: &[AudioClip],
    out: &Path,
) -> Result<()> {
    if args.looping && args.seconds.is_none() {
        bail!("--loop with --render needs --seconds");
    }

    let block = config.block_frames();
    let device = OfflineDevice::new();
    let mut mixer = Mixer::new(config);
    let sample_rate = mixer.initialize(Box::new(device.clone()))?;
    start_sources(&mut mixer, args, clips)?;

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(out, spec)
        .with_context(|| format!("Failed to create {:?}", out))?;

    let limit = args
        .seconds
        .map(|secs| (secs.max(0.0) * sample_rate as f32) as u64);
    let mut written = 0u64;
    let mut buffer = vec![0.0f32; block * 2];

    while mixer.playing_count() > 0 && limit.map_or(true, |limit| written < limit) {
        device.render(&mut buffer, 2);
        let frames = limit.map_or(block as u64, |limit| (limit - written).min(block as u64));
        for sample in &buffer[..frames as usize * 2] {
            writer.write_sample(*sample)?;
        }
        written += frames;
        mixer.poll_events();
    }

    writer.finalize().context("Failed to finalize output file")?;
    println!(
        "Rendered {:.2}s to {}",
        written as f64 / sample_rate as f64,
        out.display()
    );
    mixer.shutdown();
    Ok(())
}
