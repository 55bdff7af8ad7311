//! Frame an existing PNG.

use std::path::PathBuf;

use tabsnap_common::config::AppConfig;
use tabsnap_common::naming::{framed_file_name, unix_millis};
use tabsnap_render_engine::{compose_frame, save_artifact, FrameStyle};

pub async fn run(config: &AppConfig, input: PathBuf, style: FrameStyle) -> anyhow::Result<()> {
    if style == FrameStyle::None {
        anyhow::bail!("Choose a frame style: phone or tablet");
    }
    let bytes = tokio::fs::read(&input)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", input.display()))?;

    let framed = compose_frame(&bytes, style)?;
    let name = framed_file_name(style.as_str(), unix_millis());
    let path = save_artifact(&framed, &config.output_dir, &name).await?;
    println!("Framed image saved to: {}", path.display());
    Ok(())
}
