use anyhow::{bail, Context, Result};
use crabcapture::testing::{fixtures, SimulatedEncoder, SimulatedProvider, StaticDisplay};
use crabcapture::{CameraController, CrabCaptureConfig, LensFacing, StopOutcome};
use std::env;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    crabcapture::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: crabcapture-cli <photo|record|select> [args] [--config <path>] [--json]");
        std::process::exit(1);
    }

    let config = match flag_value(&args, "--config") {
        Some(path) => CrabCaptureConfig::load_from_file(path)?,
        None => CrabCaptureConfig::load_or_default(),
    };

    let command = &args[1];
    match command.as_str() {
        "select" => cmd_select(&args, config),
        "photo" => cmd_photo(&args, config).await,
        "record" => cmd_record(&args, config).await,
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

/// Controller over the simulated backend with one back and one front camera.
fn simulated_controller(config: CrabCaptureConfig) -> Result<CameraController> {
    let provider = Arc::new(SimulatedProvider::new(vec![
        fixtures::back_camera("0"),
        fixtures::front_camera("1"),
    ]));
    CameraController::builder()
        .provider(provider)
        .display(Arc::new(StaticDisplay::phone()))
        .encoder(Arc::new(SimulatedEncoder::new()))
        .config(config)
        .build()
        .context("failed to build camera controller")
}

fn parse_facing(args: &[String], default: LensFacing) -> Result<LensFacing> {
    match flag_value(args, "--facing") {
        None => Ok(default),
        Some("back") => Ok(LensFacing::Back),
        Some("front") => Ok(LensFacing::Front),
        Some("external") => Ok(LensFacing::External),
        Some(other) => bail!("unknown facing: {}", other),
    }
}

fn cmd_select(args: &[String], config: CrabCaptureConfig) -> Result<()> {
    let facing = parse_facing(args, config.camera.default_facing)?;
    let camera = simulated_controller(config)?;
    let id = camera.select_camera(facing)?;
    if args.contains(&"--json".to_string()) {
        println!("{}", serde_json::json!({ "facing": facing, "camera_id": id }));
    } else {
        println!("{} camera: {}", facing, id);
    }
    Ok(())
}

async fn cmd_photo(args: &[String], config: CrabCaptureConfig) -> Result<()> {
    let count: usize = flag_value(args, "--count").unwrap_or("1").parse()?;
    let facing = parse_facing(args, config.camera.default_facing)?;
    let camera = simulated_controller(config)?;

    let id = camera.select_camera(facing)?;
    let sizes = camera.open_preview(&id).await?;
    println!("Preview {} / capture {:?}", sizes.preview, sizes.capture);

    let mut saved = Vec::with_capacity(count);
    for _ in 0..count {
        saved.push(camera.capture_photo().await?);
    }
    camera.close_preview().await;

    if args.contains(&"--json".to_string()) {
        println!("{}", serde_json::to_string(&saved)?);
    } else {
        for path in saved {
            println!("Saved {}", path.display());
        }
    }
    Ok(())
}

async fn cmd_record(args: &[String], config: CrabCaptureConfig) -> Result<()> {
    let seconds: u64 = flag_value(args, "--seconds").unwrap_or("1").parse()?;
    let facing = parse_facing(args, config.camera.default_facing)?;
    let camera = simulated_controller(config)?;

    let id = camera.select_camera(facing)?;
    camera.open_preview(&id).await?;
    let session = camera.start_recording_default().await?;
    println!(
        "Recording {} @ {}fps to {}",
        session.size,
        session.fps,
        session.output.display()
    );

    tokio::time::sleep(Duration::from_secs(seconds)).await;

    let outcome = camera.stop_recording().await?;
    camera.close_preview().await;

    match outcome {
        StopOutcome::Stopped(stats) => {
            if args.contains(&"--json".to_string()) {
                println!("{}", serde_json::to_string(&stats)?);
            } else {
                println!("Stopped after {:.1}s: {}", stats.duration_secs, stats.output_path);
            }
        }
        StopOutcome::NotRecording => println!("Recording was not running"),
    }
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}
