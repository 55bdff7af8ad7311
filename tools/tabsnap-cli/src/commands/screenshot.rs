//! Capture a screenshot, optionally framed and copied to the clipboard.

use tabsnap_common::config::AppConfig;
use tabsnap_common::naming::{framed_file_name, screenshot_file_name, unix_millis};
use tabsnap_render_engine::{compose_frame, copy_to_clipboard, save_artifact, FrameStyle};

pub async fn run(config: &AppConfig, frame: FrameStyle, copy: bool) -> anyhow::Result<()> {
    let mut controller = super::connect(config).await?;
    let result = capture(&mut controller, config, frame, copy).await;
    super::finish(&mut controller).await;
    result
}

async fn capture(
    controller: &mut tabsnap_capture_engine::CaptureController,
    config: &AppConfig,
    frame: FrameStyle,
    copy: bool,
) -> anyhow::Result<()> {
    let artifact = controller.capture_screenshot().await?;
    println!("Captured {} bytes", artifact.len());

    let millis = unix_millis();
    let (bytes, name) = match frame {
        FrameStyle::None => (artifact.bytes().to_vec(), screenshot_file_name(millis)),
        style => (
            compose_frame(artifact.bytes(), style)?,
            framed_file_name(style.as_str(), millis),
        ),
    };

    let path = save_artifact(&bytes, &config.output_dir, &name).await?;
    println!("Saved: {}", path.display());

    if copy {
        match copy_to_clipboard(&bytes, artifact.mime_type()).await {
            Ok(()) => println!("Copied to clipboard"),
            Err(e) => println!("Clipboard copy failed: {e}"),
        }
    }
    Ok(())
}
