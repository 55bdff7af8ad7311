mod common;

use std::net::Ipv4Addr;
use std::time::Duration;

use common::{Reply, Script};
use tabsnap_capture_engine::{
    CaptureArtifact, CaptureConfig, CaptureController, CaptureMode, CommandChannel,
    RecordingStatus, INTERRUPT_RECORDER_COMMAND, SCREENCAP_COMMAND,
};
use tabsnap_common::error::{ArtifactKind, TabsnapError};
use tabsnap_device_core::ConnectionState;

const REMOTE: &str = "/sdcard/tabsnap-screenrecord.mp4";
const RECORD: &str = "screenrecord --time-limit 180 /sdcard/tabsnap-screenrecord.mp4";
const REMOVE: &str = "rm /sdcard/tabsnap-screenrecord.mp4";

fn controller(script: &Script) -> CaptureController {
    CaptureController::new(script.session(), CaptureConfig::default())
}

#[tokio::test(start_paused = true)]
async fn test_screenshot_yields_image() {
    let script = Script::new();
    script.on_command(SCREENCAP_COMMAND, Reply::Bytes(vec![0x89; 5000]));
    let mut controller = controller(&script);

    let artifact = controller.capture_screenshot().await.unwrap();

    assert!(matches!(&artifact, CaptureArtifact::Image { bytes } if bytes.len() == 5000));
    assert_eq!(controller.mode(), CaptureMode::Idle);
    assert_eq!(controller.last_artifact().map(|a| a.len()), Some(5000));
    assert!(script.saw("run:screencap -p"));
}

#[tokio::test(start_paused = true)]
async fn test_short_screenshot_is_rejected() {
    let script = Script::new();
    script.on_command(SCREENCAP_COMMAND, Reply::Bytes(vec![1; 50]));
    let mut controller = controller(&script);

    let err = controller.capture_screenshot().await.unwrap_err();

    match err {
        TabsnapError::ArtifactTooSmall { kind, len, min } => {
            assert_eq!(kind, ArtifactKind::Image);
            assert_eq!(len, 50);
            assert_eq!(min, 100);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(controller.mode(), CaptureMode::Idle);
    assert!(controller.last_artifact().is_none());
    assert!(controller.last_error().unwrap().contains("size: 50 bytes"));
}

#[tokio::test(start_paused = true)]
async fn test_empty_screencap_output_is_too_small() {
    let script = Script::new();
    let mut controller = controller(&script);

    let err = controller.capture_screenshot().await.unwrap_err();
    assert!(matches!(err, TabsnapError::ArtifactTooSmall { len: 0, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_recording_round_trip() {
    let script = Script::new();
    script.on_pull(REMOTE, Reply::Bytes(vec![7; 4096]));
    let mut controller = controller(&script);

    controller.start_recording().await.unwrap();
    assert_eq!(controller.mode(), CaptureMode::Recording);
    assert_eq!(
        controller.recording().map(|job| job.status()),
        Some(RecordingStatus::Running)
    );
    assert!(script.saw(&format!("spawn:{RECORD}")));

    let started = tokio::time::Instant::now();
    let artifact = controller.stop_recording().await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(1500));
    assert!(matches!(&artifact, CaptureArtifact::Video { bytes } if bytes.len() == 4096));
    assert_eq!(controller.mode(), CaptureMode::Idle);
    assert!(controller.recording().is_none());
    assert_eq!(controller.last_recording_status(), Some(RecordingStatus::Pulled));

    let interrupt = script.position(&format!("run:{INTERRUPT_RECORDER_COMMAND}")).unwrap();
    let waited = script.position("wait:screenrecord").unwrap();
    let pulled = script.position(&format!("pull:{REMOTE}")).unwrap();
    let removed = script.position(&format!("run:{REMOVE}")).unwrap();
    assert!(interrupt < waited);
    assert!(waited < pulled);
    assert!(pulled < removed);
}

#[tokio::test(start_paused = true)]
async fn test_remote_file_removed_whatever_fails() {
    let cases: Vec<(&str, Box<dyn Fn(&Script)>)> = vec![
        (
            "interrupt fails",
            Box::new(|s: &Script| {
                s.on_command(INTERRUPT_RECORDER_COMMAND, Reply::Fail("no process".into()));
            }),
        ),
        ("pull fails", Box::new(|_s: &Script| {})),
        (
            "pull cut short",
            Box::new(|s: &Script| {
                s.on_pull(REMOTE, Reply::Truncated(vec![1; 2048]));
            }),
        ),
        (
            "too small",
            Box::new(|s: &Script| {
                s.on_pull(REMOTE, Reply::Bytes(vec![1; 1000]));
            }),
        ),
    ];

    for (name, setup) in cases {
        let script = Script::new();
        setup(&script);
        let mut controller = controller(&script);

        controller.start_recording().await.unwrap();
        let result = controller.stop_recording().await;

        assert!(result.is_err(), "{name}");
        assert_eq!(script.count(&format!("run:{REMOVE}")), 1, "{name}");
        assert_eq!(controller.mode(), CaptureMode::Idle, "{name}");
        assert_eq!(
            controller.last_recording_status(),
            Some(RecordingStatus::Failed),
            "{name}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_failure_still_pulls() {
    let script = Script::new();
    script.on_command(INTERRUPT_RECORDER_COMMAND, Reply::Fail("no process".into()));
    script.on_pull(REMOTE, Reply::Bytes(vec![3; 2048]));
    let mut controller = controller(&script);

    controller.start_recording().await.unwrap();
    let artifact = controller.stop_recording().await.unwrap();

    assert_eq!(artifact.len(), 2048);
    assert!(script.saw(&format!("run:{REMOVE}")));
}

#[tokio::test(start_paused = true)]
async fn test_recording_that_cannot_spawn_returns_to_idle() {
    let script = Script::new();
    script.fail_spawn(Reply::Fail("permission denied".into()));
    let mut controller = controller(&script);

    let err = controller.start_recording().await.unwrap_err();

    assert!(matches!(err, TabsnapError::CommandFailed { .. }));
    assert_eq!(controller.mode(), CaptureMode::Idle);
    assert!(script.saw(&format!("run:{REMOVE}")));
    assert_eq!(controller.last_recording_status(), Some(RecordingStatus::Failed));
}

#[tokio::test(start_paused = true)]
async fn test_busy_modes_reject_other_work() {
    let script = Script::new();
    let mut controller = controller(&script);
    controller.start_recording().await.unwrap();

    let err = controller.capture_screenshot().await.unwrap_err();
    assert_eq!(err.to_string(), "Cannot capture a screenshot while recording");

    let err = controller.start_recording().await.unwrap_err();
    assert!(matches!(err, TabsnapError::InvalidState { .. }));

    let err = controller.enable_wireless().await.unwrap_err();
    assert!(matches!(err, TabsnapError::InvalidState { .. }));

    assert_eq!(controller.mode(), CaptureMode::Recording);
    assert_eq!(script.count(&format!("spawn:{RECORD}")), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_without_recording_is_invalid() {
    let script = Script::new();
    let mut controller = controller(&script);

    let err = controller.stop_recording().await.unwrap_err();

    assert_eq!(err.to_string(), "Cannot stop recording while idle");
    assert!(script.log().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_resets_mode_and_keeps_artifact() {
    let script = Script::new();
    script.on_command(SCREENCAP_COMMAND, Reply::Bytes(vec![9; 400]));
    let mut controller = controller(&script);
    controller.capture_screenshot().await.unwrap();

    script.on_command(SCREENCAP_COMMAND, Reply::Disconnect);
    let err = controller.capture_screenshot().await.unwrap_err();

    assert!(err.is_session_fatal());
    assert_eq!(controller.mode(), CaptureMode::Idle);
    assert_eq!(controller.session().state(), ConnectionState::Disconnected);
    assert_eq!(controller.last_artifact().map(|a| a.len()), Some(400));
    assert_eq!(script.count("close"), 1);

    let err = controller.capture_screenshot().await.unwrap_err();
    assert!(matches!(err, TabsnapError::Disconnected { .. }));
    assert_eq!(controller.last_error(), Some(err.to_string().as_str()));
    assert_eq!(script.count("close"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_after_link_loss_closes_transport() {
    let script = Script::new();
    script.on_command(SCREENCAP_COMMAND, Reply::Disconnect);
    let mut controller = controller(&script);
    controller.capture_screenshot().await.unwrap_err();

    controller.shutdown().await.unwrap();

    assert_eq!(script.count("close"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejection_on_dead_session_is_recorded() {
    let script = Script::new();
    let mut controller = controller(&script);
    controller.session().mark_lost("usb reset");

    let err = controller.start_recording().await.unwrap_err();

    assert!(err.is_session_fatal());
    assert_eq!(controller.last_error(), Some(err.to_string().as_str()));
    assert_eq!(controller.mode(), CaptureMode::Idle);
    assert!(script.saw("close"));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_recording_drops_the_job() {
    let script = Script::new();
    let mut controller = controller(&script);
    controller.start_recording().await.unwrap();

    script.on_command(INTERRUPT_RECORDER_COMMAND, Reply::Disconnect);
    let err = controller.stop_recording().await.unwrap_err();

    assert!(err.is_session_fatal());
    assert_eq!(controller.mode(), CaptureMode::Idle);
    assert!(controller.recording().is_none());
    assert!(!controller.session().is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_wireless_reports_endpoint() {
    let script = Script::new();
    script.with_listener().on_command(
        "ip route",
        Reply::Bytes(
            b"192.168.1.0/24 dev wlan0 proto kernel scope link src 192.168.1.42\n".to_vec(),
        ),
    );
    let mut controller = controller(&script);

    let endpoint = controller.enable_wireless().await.unwrap();

    assert_eq!(endpoint.ip, Ipv4Addr::new(192, 168, 1, 42));
    assert_eq!(endpoint.port, 5555);
    assert_eq!(endpoint.to_string(), "192.168.1.42:5555");
    assert!(script.saw("listen:5555"));
}

#[tokio::test(start_paused = true)]
async fn test_wireless_without_wifi_address() {
    let script = Script::new();
    script
        .with_listener()
        .on_command("ip route", Reply::Bytes(b"default dev rmnet0\n".to_vec()));
    let mut controller = controller(&script);

    let err = controller.enable_wireless().await.unwrap_err();

    assert!(matches!(err, TabsnapError::WirelessSetupFailed { .. }));
    assert!(!script.saw("listen:5555"));
}

#[tokio::test(start_paused = true)]
async fn test_wireless_needs_listener_capability() {
    let script = Script::new();
    script.on_command("ip route", Reply::Bytes(b"x src 10.0.0.7".to_vec()));
    let mut controller = controller(&script);

    let err = controller.enable_wireless().await.unwrap_err();

    assert!(matches!(err, TabsnapError::UnsupportedOperation { .. }));
    assert!(controller.session().is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_discards_recording() {
    let script = Script::new();
    let mut controller = controller(&script);
    controller.start_recording().await.unwrap();

    controller.shutdown().await.unwrap();

    assert!(script.saw(&format!("run:{INTERRUPT_RECORDER_COMMAND}")));
    assert!(script.saw(&format!("run:{REMOVE}")));
    assert!(!script.saw(&format!("pull:{REMOTE}")));
    assert!(script.saw("close"));
    assert_eq!(controller.mode(), CaptureMode::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_commands_run_one_at_a_time() {
    let script = Script::new();
    script.on_command("first", Reply::Bytes(vec![1; 10]));
    let channel = CommandChannel::new(script.session());

    let held = channel.run("first").await.unwrap();
    let second = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.run_bytes("second").await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!script.saw("run:second"));
    assert_eq!(held.command(), "first");

    drop(held);
    second.await.unwrap().unwrap();
    assert!(script.saw("run:second"));
}
