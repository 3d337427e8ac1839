// chime-play: plays one sound file through the default output device
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use chime::{logging, CpalBackend, EngineSettings, SoundRegistry};

const SOUND_KEY: &str = "sound";

#[derive(Parser, Debug)]
#[command(name = "chime-play", version, about = "Play a sound file through chime")]
struct Args {
    /// Sound file to play
    #[arg(required_unless_present = "list_devices")]
    file: Option<PathBuf>,

    /// Loop until --seconds elapse
    #[arg(long = "loop", requires = "seconds")]
    looping: bool,

    /// Volume between 0.0 and 1.0
    #[arg(long, default_value_t = 1.0)]
    volume: f32,

    /// Stop playback after this many seconds
    #[arg(long)]
    seconds: Option<f64>,

    /// Directory holding chime.json
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,

    /// Output device name (overrides the settings file)
    #[arg(long)]
    device: Option<String>,

    /// Print the available output devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = EngineSettings::load(&args.config_dir)
        .with_context(|| format!("Failed to load settings from {:?}", args.config_dir))?;
    if let Some(device) = args.device.clone() {
        settings.output.device = Some(device);
    }
    logging::init(&settings.logging);

    if args.list_devices {
        for name in CpalBackend::list_devices()? {
            println!("{}", name);
        }
        return Ok(());
    }

    let Some(file) = args.file else {
        bail!("no sound file given");
    };

    let registry = SoundRegistry::with_default_output(settings)?;
    info!(
        "Output '{}' on {}",
        registry.backend().name(),
        registry
            .settings()
            .output
            .device
            .as_deref()
            .unwrap_or("the default device")
    );
    if !registry.load_file(SOUND_KEY, &file) {
        bail!("Failed to load {:?}", file);
    }

    let started = Instant::now();
    let session = registry
        .spawn(SOUND_KEY, args.looping)
        .with_context(|| format!("Failed to play {:?}", file))?;

    info!(
        "Playing '{}' ({} Hz, {} channel(s), loop={})",
        session.source_id(),
        session.format().sample_rate,
        session.format().channels,
        session.is_looping()
    );

    if let Err(e) = session.set_volume(args.volume) {
        warn!("Volume not applied: {}", e);
    }

    let limit = args
        .seconds
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or(Duration::MAX);
    if !session.wait_finished(limit) {
        info!("Stopping after {:.1}s", started.elapsed().as_secs_f64());
        session.stop();
    }

    registry.shutdown();

    info!(
        "Played {:?}: {} bytes, {} loop restart(s), {:.1}s",
        file,
        session.bytes_written(),
        session.restarts(),
        started.elapsed().as_secs_f64()
    );
    Ok(())
}
