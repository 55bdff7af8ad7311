//! File names for saved artifacts.
//!
//! Every saved file carries the wall-clock time of the save in Unix
//! milliseconds so repeated captures never overwrite each other.

/// Milliseconds since the Unix epoch, now.
pub fn unix_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// `screenshot-<ms>.png`
pub fn screenshot_file_name(millis: i64) -> String {
    format!("screenshot-{millis}.png")
}

/// `screenrecord-<ms>.mp4`
pub fn recording_file_name(millis: i64) -> String {
    format!("screenrecord-{millis}.mp4")
}

/// `tabsnap-<style>-<ms>.png`, for a framed screenshot.
pub fn framed_file_name(style: &str, millis: i64) -> String {
    format!("tabsnap-{style}-{millis}.png")
}

/// `tabsnap-gif-<ms>.gif`
pub fn gif_file_name(millis: i64) -> String {
    format!("tabsnap-gif-{millis}.gif")
}
