use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use tabsnap_capture_engine::{CaptureArtifact, CaptureConfig, CaptureController};
use tabsnap_common::error::{TabsnapError, TabsnapResult};
use tabsnap_device_core::{stream_from_bytes, ByteStream, DeviceSession, RemoteProcess, Transport};
use tabsnap_render_engine::{compose_frame, FrameStyle};

/// A device that can only take screenshots.
struct ScreencapOnly(Vec<u8>);

#[async_trait::async_trait]
impl Transport for ScreencapOnly {
    fn name(&self) -> &str {
        "screencap-only"
    }

    async fn run_command(&self, cmdline: &str) -> TabsnapResult<ByteStream> {
        if cmdline == "screencap -p" {
            Ok(stream_from_bytes(self.0.clone()))
        } else {
            Err(TabsnapError::command_failed(cmdline, "not scripted"))
        }
    }

    async fn spawn(&self, cmdline: &str) -> TabsnapResult<Box<dyn RemoteProcess>> {
        Err(TabsnapError::command_failed(cmdline, "not scripted"))
    }

    async fn pull_file(&self, path: &str) -> TabsnapResult<ByteStream> {
        Err(TabsnapError::file_transfer(path, "not scripted"))
    }

    async fn push_file(&self, path: &str, _source: ByteStream, _mode: u32) -> TabsnapResult<u64> {
        Err(TabsnapError::file_transfer(path, "not scripted"))
    }

    async fn open_socket(&self, name: &str) -> TabsnapResult<ByteStream> {
        Err(TabsnapError::command_failed(name, "not scripted"))
    }

    async fn close(&self) -> TabsnapResult<()> {
        Ok(())
    }
}

/// A noisy PNG so the encoded size is well above the image threshold.
fn device_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, y| {
        let v = (x.wrapping_mul(31) ^ y.wrapping_mul(17)) as u8;
        Rgba([v, v.wrapping_mul(3), v.wrapping_add(90), 255])
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

#[tokio::test]
async fn test_screenshot_then_phone_frame_is_larger() {
    let png = device_png(72, 160);
    assert!(png.len() >= 100);
    let session = Arc::new(DeviceSession::from_transport(Box::new(ScreencapOnly(png.clone()))));
    let mut controller = CaptureController::new(session, CaptureConfig::default());

    let artifact = controller.capture_screenshot().await.unwrap();
    assert!(matches!(&artifact, CaptureArtifact::Image { bytes } if *bytes == png));

    let framed = compose_frame(artifact.bytes(), FrameStyle::Phone).unwrap();
    let framed = image::load_from_memory(&framed).unwrap();

    assert!(framed.width() > 72);
    assert!(framed.height() > 160);
    assert_eq!(artifact.bytes(), png.as_slice(), "framing leaves the capture alone");
}
