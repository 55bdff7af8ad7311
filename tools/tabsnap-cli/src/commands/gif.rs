//! Convert a recording into a GIF.

use std::path::PathBuf;

use tabsnap_capture_engine::CaptureArtifact;
use tabsnap_common::config::AppConfig;
use tabsnap_common::naming::{gif_file_name, unix_millis};
use tabsnap_render_engine::{save_artifact, GifOptions, GifStatus, GifTranscoder};

pub async fn run(config: &AppConfig, input: PathBuf) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(&input)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", input.display()))?;
    let artifact = CaptureArtifact::video(bytes)?;

    let options = GifOptions::from(&config.gif);
    println!("Converting {} ({} fps, scale {})", input.display(), options.fps, options.scale);

    let job = GifTranscoder::new(options)
        .spawn_for_artifact(&artifact, &config.adb)
        .await?;

    let mut status = job.subscribe();
    let progress = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow();
            if current == GifStatus::Encoding {
                println!("  Encoding...");
            }
        }
    });

    let result = job.wait().await;
    progress.abort();
    let gif = result?;

    let path = save_artifact(&gif, &config.output_dir, &gif_file_name(unix_millis())).await?;
    println!("GIF saved to: {}", path.display());
    Ok(())
}
