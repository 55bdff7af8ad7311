//! Mirror the device screen until Ctrl+C.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tabsnap_capture_engine::{CaptureController, FilePayload, MirrorConfig, MirrorPipeline, MirrorView};
use tabsnap_common::config::AppConfig;
use tabsnap_device_host::FfmpegDecoderFactory;

const STATUS_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run(config: &AppConfig, snapshot: Option<PathBuf>) -> anyhow::Result<()> {
    let Some(server) = config.mirror.server_path.clone() else {
        anyhow::bail!("No mirror server payload; pass --server or set mirror.server_path");
    };

    let mut controller = super::connect(config).await?;
    let result = mirror(&mut controller, config, server, snapshot).await;
    super::finish(&mut controller).await;
    result
}

async fn mirror(
    controller: &mut CaptureController,
    config: &AppConfig,
    server: PathBuf,
    snapshot: Option<PathBuf>,
) -> anyhow::Result<()> {
    let pipeline = MirrorPipeline::with_channel(
        controller.channel().clone(),
        Arc::new(FfmpegDecoderFactory::new(
            config.adb.ffmpeg.clone(),
            config.mirror.frame_pool,
        )),
        Arc::new(FilePayload(server)),
        MirrorConfig::from(&config.mirror),
    );

    let view = controller.start_mirroring(&pipeline).await?;
    println!("Mirroring. Press Ctrl+C to stop...");

    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                println!();
                break;
            }
            _ = ticker.tick() => {
                print_status(&view);
                if !view.is_streaming() {
                    println!();
                    println!("Video stream ended.");
                    break;
                }
            }
        }
    }

    let last_frame = view.snapshot();
    controller.stop_mirroring().await;
    println!("Rendered {} frames", view.frames_rendered());

    if let Some(path) = snapshot {
        let Some(image) = last_frame else {
            anyhow::bail!("No frame was rendered; nothing to save");
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        image.save(&path)?;
        println!("Snapshot saved to: {}", path.display());
    }
    Ok(())
}

fn print_status(view: &MirrorView) {
    let size = view
        .dimensions()
        .map(|(w, h)| format!("{w}x{h}"))
        .unwrap_or_else(|| "waiting".to_string());
    print!(
        "\r  {size}  {} frames  {} KiB received  ",
        view.frames_rendered(),
        view.bytes_received() / 1024
    );
    std::io::stdout().flush().ok();
}
