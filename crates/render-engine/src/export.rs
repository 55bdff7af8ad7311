//! Getting artifacts out of the session: files on disk and the clipboard.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tabsnap_capture_engine::CaptureArtifact;
use tabsnap_common::error::{TabsnapError, TabsnapResult};
use tabsnap_common::naming::{recording_file_name, screenshot_file_name};
use tabsnap_common::tools::command_exists;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Default file name for a capture saved at `millis`.
pub fn artifact_file_name(artifact: &CaptureArtifact, millis: i64) -> String {
    match artifact {
        CaptureArtifact::Image { .. } => screenshot_file_name(millis),
        CaptureArtifact::Video { .. } => recording_file_name(millis),
    }
}

/// Write `bytes` to `dir/name`, creating `dir` if needed.
pub async fn save_artifact(bytes: &[u8], dir: &Path, name: &str) -> TabsnapResult<PathBuf> {
    if !dir.as_os_str().is_empty() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let path = dir.join(name);
    tokio::fs::write(&path, bytes).await?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), "Saved artifact");
    Ok(path)
}

/// Save a capture under its default name.
pub async fn save_capture(artifact: &CaptureArtifact, dir: &Path, millis: i64) -> TabsnapResult<PathBuf> {
    save_artifact(artifact.bytes(), dir, &artifact_file_name(artifact, millis)).await
}

/// Clipboard writer command for the current desktop.
fn clipboard_command(mime: &str) -> Option<(&'static str, Vec<String>)> {
    let wayland = std::env::var("WAYLAND_DISPLAY").is_ok();
    if wayland && command_exists("wl-copy") {
        return Some(("wl-copy", vec!["--type".to_string(), mime.to_string()]));
    }
    if command_exists("xclip") {
        return Some((
            "xclip",
            vec![
                "-selection".to_string(),
                "clipboard".to_string(),
                "-t".to_string(),
                mime.to_string(),
                "-i".to_string(),
            ],
        ));
    }
    None
}

/// Put `bytes` on the desktop clipboard as `mime`.
pub async fn copy_to_clipboard(bytes: &[u8], mime: &str) -> TabsnapResult<()> {
    let (tool, args) = clipboard_command(mime).ok_or_else(|| {
        TabsnapError::unsupported("no clipboard tool found; install wl-clipboard or xclip")
    })?;

    let mut child = Command::new(tool)
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| TabsnapError::command_failed(tool, e.to_string()))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| TabsnapError::command_failed(tool, "stdin not captured"))?;
    stdin.write_all(bytes).await?;
    drop(stdin);

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(TabsnapError::command_failed(
            tool,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    tracing::info!(tool, mime, bytes = bytes.len(), "Copied to clipboard");
    Ok(())
}
