// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! - `record`: run the pipeline for a fixed time and save the take
//! - `filters` / `devices`: listings
//! - `transcode` / `probe`: work on existing recordings

use chrono::Local;
use filtercam::backends::camera::synthetic::SyntheticProvider;
use filtercam::backends::camera::{DeviceProvider, default_provider};
use filtercam::flash::TorchBank;
use filtercam::media::{wav, y4m};
use filtercam::pipelines::transcode::{Transcoder, default_transcoder, relocate};
use filtercam::pipelines::video::software::sidecar_path;
use filtercam::pipelines::video::{WriterFactory, default_writer_factory};
use filtercam::{
    ChannelObserver, Config, DevicePosition, FilterCam, FilterSpec, InterruptionSource,
    PipelineEvent, QualityPreset, RecorderError,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

/// Time allowed for the devices to start delivering samples
const START_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for finalize and transcode after the recording stops
const FINISH_TIMEOUT: Duration = Duration::from_secs(600);

/// Attempts to start recording while the first samples are still missing
const START_ATTEMPTS: u32 = 20;

const START_RETRY_DELAY: Duration = Duration::from_millis(100);

type CliResult = Result<(), Box<dyn std::error::Error>>;

pub struct RecordArgs {
    pub duration: u64,
    pub filters: Vec<FilterSpec>,
    pub position: Option<DevicePosition>,
    pub preset: Option<QualityPreset>,
    pub output: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub transcode: bool,
    pub test_pattern: bool,
}

/// Ctrl-C as a pipeline interruption
struct CtrlC;

impl InterruptionSource for CtrlC {
    fn subscribe(&self, handler: Box<dyn Fn() + Send + Sync>) {
        if let Err(e) = ctrlc::set_handler(move || handler()) {
            warn!(error = %e, "Ctrl-C handler not installed");
        }
    }
}

/// Record a take, transcode it and move it to the output path
pub fn record(args: RecordArgs) -> CliResult {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(position) = args.position {
        config.capture.device_position = position;
    }
    if let Some(preset) = args.preset {
        config.capture.preset = preset;
    }
    if !args.filters.is_empty() {
        config.filters = args.filters.clone();
    }
    config.transcode = args.transcode;

    let factory = default_writer_factory(config.bitrate_preset);
    let transcoder = default_transcoder();
    let extension = if config.transcode {
        transcoder.extension()
    } else {
        factory.extension()
    };
    let output_path = match args.output.clone() {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            path
        }
        None => {
            let dir = get_default_video_dir();
            std::fs::create_dir_all(&dir)?;
            let timestamp = Local::now().format("%Y%m%d_%H%M%S");
            dir.join(format!("video_{}.{}", timestamp, extension))
        }
    };

    let provider: Arc<dyn DeviceProvider> = if args.test_pattern {
        Arc::new(SyntheticProvider::default())
    } else {
        default_provider()
    };

    let (observer, events) = ChannelObserver::new();
    let cam = FilterCam::builder(config)
        .provider(provider)
        .writer_factory(Arc::clone(&factory))
        .transcoder(Arc::clone(&transcoder))
        .observer(observer)
        .interruption_source(Arc::new(CtrlC))
        .build()?;

    println!(
        "Camera: {} @ {}{}",
        cam.config().capture.device_position,
        cam.config().capture.preset,
        if args.test_pattern { " (test pattern)" } else { "" }
    );
    println!("Filters: {}", cam.filter_chain());
    println!("Output: {}", output_path.display());
    println!("Duration: {} seconds", args.duration);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let delivered = runtime.block_on(run_take(
        &cam,
        events,
        Duration::from_secs(args.duration),
    ))?;
    drop(cam);

    let artifacts = if args.transcode {
        transcoder.artifacts(&delivered)
    } else {
        factory.artifacts(&delivered)
    };
    let saved = relocate(&artifacts, &output_path)?;
    println!("Video saved: {}", saved.display());
    Ok(())
}

/// Drive one take from capture start to the delivered file
async fn run_take(
    cam: &FilterCam,
    mut events: UnboundedReceiver<PipelineEvent>,
    duration: Duration,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    cam.start_capture();
    tokio::time::timeout(START_TIMEOUT, async {
        loop {
            match events.recv().await {
                Some(PipelineEvent::CaptureDidStart) => return Ok(()),
                Some(PipelineEvent::CaptureDidFail(e)) => return Err(e.to_string()),
                Some(_) => {}
                None => return Err("pipeline closed".to_string()),
            }
        }
    })
    .await
    .map_err(|_| "camera did not start")??;

    start_recording(cam, &mut events).await?;
    println!();
    println!("Recording... (press Ctrl+C to stop early)");

    let stop_at = tokio::time::sleep(duration);
    tokio::pin!(stop_at);
    let mut stop_requested = false;
    let mut finished_writing = false;
    let mut finished_recording = false;
    let mut seconds = 0;
    let mut frame_rate = 0.0;

    let deadline = tokio::time::sleep(duration + FINISH_TIMEOUT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut stop_at, if !stop_requested => {
                stop_requested = true;
                cam.stop_recording();
            }
            _ = &mut deadline => return Err("timed out waiting for the recording".into()),
            event = events.recv() => {
                let Some(event) = event else {
                    return Err("pipeline closed".into());
                };
                match event {
                    PipelineEvent::FrameRate(rate) => frame_rate = rate,
                    PipelineEvent::RecordingSeconds(s) => seconds = s,
                    PipelineEvent::WillStartWriting => {
                        stop_requested = true;
                        println!();
                        println!("Finishing...");
                    }
                    PipelineEvent::DidFinishWriting(path) => {
                        debug!(path = %path.display(), "Take written");
                        finished_writing = true;
                    }
                    PipelineEvent::RecorderDidFail(e) => eprintln!("\nRecording error: {}", e),
                    PipelineEvent::DidAbortRecording => {
                        return Err("recording aborted".into());
                    }
                    PipelineEvent::DidFinishRecording => {
                        finished_recording = true;
                        if !finished_writing {
                            return Err("recording was not saved".into());
                        }
                        if cam.is_capturing() {
                            cam.stop_capture();
                        }
                    }
                    PipelineEvent::OutputReady(path) => return Ok(path),
                    PipelineEvent::OutputFailed(reason) => return Err(reason.into()),
                    PipelineEvent::CaptureDidStop if !finished_recording => {
                        debug!("Capture stopped during the take");
                    }
                    _ => {}
                }
                if !stop_requested {
                    print!("\rRecording: {:02}:{:02}  {:5.1} fps", seconds / 60, seconds % 60, frame_rate);
                    std::io::stdout().flush()?;
                }
            }
        }
    }
}

/// Start recording, retrying while the first samples are still missing
async fn start_recording(
    cam: &FilterCam,
    events: &mut UnboundedReceiver<PipelineEvent>,
) -> Result<(), Box<dyn std::error::Error>> {
    for attempt in 1..=START_ATTEMPTS {
        cam.start_recording();
        loop {
            match events.recv().await {
                Some(PipelineEvent::DidStartRecording) => return Ok(()),
                Some(PipelineEvent::RecorderDidFail(
                    RecorderError::AudioFormatUnavailable | RecorderError::VideoFormatUnavailable,
                )) => {
                    debug!(attempt, "No samples yet, retrying");
                    tokio::time::sleep(START_RETRY_DELAY).await;
                    break;
                }
                Some(PipelineEvent::RecorderDidFail(e)) => return Err(e.to_string().into()),
                Some(PipelineEvent::CaptureDidFail(e)) => return Err(e.to_string().into()),
                Some(_) => {}
                None => return Err("pipeline closed".into()),
            }
        }
    }
    Err("no samples received from the devices".into())
}

/// List the filter catalogue with example arguments
pub fn list_filters() -> CliResult {
    println!("Available filters (use --filter NAME[:ARG], applied in order):");
    println!();
    for filter in FilterSpec::catalogue() {
        let example = filter.to_string();
        if example == filter.name() {
            println!("  {}", filter.name());
        } else {
            println!("  {:<12} e.g. {}", filter.name(), example);
        }
    }
    Ok(())
}

/// List the devices of the active provider and any flash LEDs
pub fn list_devices() -> CliResult {
    let provider = default_provider();
    let devices = provider.list_devices();
    println!("Provider: {}", provider.name());
    println!();
    if devices.is_empty() {
        println!("No devices found.");
    }
    for device in devices {
        match device.position {
            Some(position) => println!("  [{} {}] {}", device.kind, position, device.name),
            None => println!("  [{}] {}", device.kind, device.name),
        }
        if !device.presets.is_empty() {
            let presets: Vec<String> = device.presets.iter().map(|p| p.to_string()).collect();
            println!("      Presets: {}", presets.join(", "));
        }
    }

    let torch = TorchBank::detect();
    println!();
    if torch.leds().is_empty() {
        println!("Flash LEDs: none");
    } else {
        println!("Flash LEDs:");
        for led in torch.leds() {
            println!("  {} (max brightness {})", led.name(), led.max_brightness());
        }
    }
    if let Some(hint) = torch.permission_error() {
        println!("  {}", hint);
    }

    #[cfg(feature = "gst")]
    {
        let encoders: Vec<String> = filtercam::media::encoders::video::available_encoders()
            .into_iter()
            .map(|c| {
                if c.hardware {
                    format!("{} (hardware)", c.element)
                } else {
                    c.element.to_string()
                }
            })
            .collect();
        println!();
        if encoders.is_empty() {
            println!("H.264 encoders: none");
        } else {
            println!("H.264 encoders: {}", encoders.join(", "));
        }
    }
    Ok(())
}

/// Rotate an existing recording
pub fn transcode(input: &Path, output: Option<PathBuf>) -> CliResult {
    let transcoder = default_transcoder();
    let output = output.unwrap_or_else(|| rotated_path(input, transcoder.extension()));
    let written = transcoder.transcode(input, &output)?;
    println!("Rotated: {}", written.display());
    Ok(())
}

fn rotated_path(input: &Path, extension: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "video".to_string());
    input.with_file_name(format!("{}_rotated.{}", stem, extension))
}

/// Print the format of a Y4M file and its WAV sidecar
pub fn probe(file: &Path) -> CliResult {
    let info = y4m::probe(file)?;
    println!("File: {}", file.display());
    println!("  Size: {}", info.header.dimensions);
    println!("  Frame rate: {}", info.header.frame_rate);
    println!("  Frames: {}", info.frame_count);
    println!("  Duration: {:.2}s", info.duration().as_secs_f64());

    let audio = sidecar_path(file);
    if audio.exists() {
        let (format, frames) = wav::read_info(std::fs::File::open(&audio)?)?;
        let seconds = frames as f64 / format.sample_rate.max(1) as f64;
        println!(
            "  Audio: {} Hz, {} channel(s), {:.2}s",
            format.sample_rate, format.channels, seconds
        );
    }
    Ok(())
}

fn get_default_video_dir() -> PathBuf {
    dirs::video_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("filtercam")
}
