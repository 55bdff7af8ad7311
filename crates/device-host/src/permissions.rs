//! Host capability detection and guidance.
//!
//! TabSnap drives host tools rather than linking device or codec libraries,
//! so what it can do depends on which tools are installed.

use serde::Serialize;
use tabsnap_common::config::HostToolsConfig;
use tabsnap_common::tools::command_exists;

/// A host capability that TabSnap may need.
#[derive(Debug, Clone, Serialize)]
pub struct Capability {
    pub name: String,
    pub description: String,
    pub available: bool,
    pub required: bool,
    pub fix_instructions: Option<String>,
}

/// Check all capabilities and report status.
pub fn check_capabilities(tools: &HostToolsConfig) -> Vec<Capability> {
    vec![
        check_adb(&tools.binary),
        check_ffmpeg(&tools.ffmpeg),
        check_ffprobe(&tools.ffprobe),
        check_clipboard(),
    ]
}

/// Whether every required capability is present.
pub fn all_required_available(capabilities: &[Capability]) -> bool {
    capabilities.iter().all(|c| c.available || !c.required)
}

fn check_adb(binary: &str) -> Capability {
    let available = command_exists(binary);
    Capability {
        name: "Android Debug Bridge".to_string(),
        description: format!("`{binary}` for device commands and file transfer"),
        available,
        required: true,
        fix_instructions: (!available).then(|| {
            "Install platform-tools: sudo apt install adb (or set adb.binary in the config)"
                .to_string()
        }),
    }
}

fn check_ffmpeg(binary: &str) -> Capability {
    let available = command_exists(binary);
    Capability {
        name: "FFmpeg".to_string(),
        description: format!("`{binary}` for live mirroring and GIF export"),
        available,
        required: false,
        fix_instructions: (!available)
            .then(|| "Install FFmpeg: sudo apt install ffmpeg".to_string()),
    }
}

fn check_ffprobe(binary: &str) -> Capability {
    let available = command_exists(binary);
    Capability {
        name: "FFprobe".to_string(),
        description: format!("`{binary}` for reading recording duration and size"),
        available,
        required: false,
        fix_instructions: (!available)
            .then(|| "FFprobe ships with FFmpeg: sudo apt install ffmpeg".to_string()),
    }
}

fn check_clipboard() -> Capability {
    let wayland = std::env::var("WAYLAND_DISPLAY").is_ok();
    let tool = if wayland { "wl-copy" } else { "xclip" };
    let available = command_exists(tool);

    Capability {
        name: "Clipboard".to_string(),
        description: format!("`{tool}` for copying captures to the clipboard"),
        available,
        required: false,
        fix_instructions: if available {
            None
        } else if wayland {
            Some("Install wl-clipboard: sudo apt install wl-clipboard".to_string())
        } else {
            Some("Install xclip: sudo apt install xclip".to_string())
        },
    }
}

/// Print a user-friendly capability report.
pub fn print_capability_report(capabilities: &[Capability]) {
    println!("TabSnap Host Capabilities:");
    println!("{}", "-".repeat(60));

    for cap in capabilities {
        let status = if cap.available {
            "[OK]"
        } else if cap.required {
            "[MISSING - REQUIRED]"
        } else {
            "[MISSING - OPTIONAL]"
        };

        println!("  {} {}: {}", status, cap.name, cap.description);

        if let Some(ref fix) = cap.fix_instructions {
            println!("    Fix: {fix}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_adb_is_required_and_explained() {
        let tools = HostToolsConfig {
            binary: "tabsnap-no-such-adb".to_string(),
            ..HostToolsConfig::default()
        };
        let caps = check_capabilities(&tools);
        let adb = &caps[0];
        assert!(!adb.available);
        assert!(adb.required);
        assert!(adb.fix_instructions.is_some());
        assert!(!all_required_available(&caps));
    }
}
