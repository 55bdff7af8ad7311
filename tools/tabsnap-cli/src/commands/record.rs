//! Record the device screen until Ctrl+C.

use tabsnap_capture_engine::CaptureController;
use tabsnap_common::config::AppConfig;
use tabsnap_common::naming::{gif_file_name, recording_file_name, unix_millis};
use tabsnap_render_engine::{save_artifact, GifOptions, GifTranscoder};

pub async fn run(config: &AppConfig, gif: bool) -> anyhow::Result<()> {
    let mut controller = super::connect(config).await?;
    let result = record(&mut controller, config, gif).await;
    super::finish(&mut controller).await;
    result
}

async fn record(controller: &mut CaptureController, config: &AppConfig, gif: bool) -> anyhow::Result<()> {
    controller.start_recording().await?;
    println!(
        "Recording (device limit {}s). Press Ctrl+C to stop...",
        config.capture.recording_time_limit_secs
    );

    tokio::signal::ctrl_c().await?;
    println!();
    println!("Stopping and pulling the recording...");

    let artifact = controller.stop_recording().await?;
    let millis = unix_millis();
    let path = save_artifact(artifact.bytes(), &config.output_dir, &recording_file_name(millis)).await?;
    println!("Recording saved to: {}", path.display());

    if !gif {
        return Ok(());
    }

    let options = GifOptions::from(&config.gif);
    println!("Converting to GIF ({} fps, scale {})...", options.fps, options.scale);
    let job = GifTranscoder::new(options)
        .spawn_for_artifact(&artifact, &config.adb)
        .await?;
    let bytes = job.wait().await?;
    let path = save_artifact(&bytes, &config.output_dir, &gif_file_name(millis)).await?;
    println!("GIF saved to: {}", path.display());
    Ok(())
}
