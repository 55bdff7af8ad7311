//! Host tool lookup.

use std::process::Command;

/// Whether `binary` resolves on the current `PATH`.
pub fn command_exists(binary: &str) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {binary} >/dev/null 2>&1"))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_tool_is_reported_absent() {
        assert!(!command_exists("tabsnap-definitely-not-installed"));
    }
}
