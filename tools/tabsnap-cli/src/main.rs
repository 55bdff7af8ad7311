//! TabSnap CLI: capture screenshots, recordings, and live video from an
//! Android device over adb.
//!
//! Usage:
//!   tabsnap check              Check host tools
//!   tabsnap screenshot         Capture the device screen
//!   tabsnap record             Record until Ctrl+C
//!   tabsnap frame <PNG>        Wrap a PNG in a device frame
//!   tabsnap gif <MP4>          Turn a recording into a GIF
//!   tabsnap mirror             Mirror the screen until Ctrl+C
//!   tabsnap wireless           Switch the device to adb over Wi-Fi
//!   tabsnap config             Print the effective configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tabsnap_common::config::AppConfig;
use tabsnap_render_engine::FrameStyle;

mod commands;

#[derive(Parser)]
#[command(
    name = "tabsnap",
    about = "Screenshots, screen recordings, and live mirroring for Android devices",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output directory (defaults to the configured one)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check host tools
    Check,

    /// Capture a screenshot
    Screenshot {
        /// Device frame to draw around the capture: none, phone, tablet
        #[arg(long, default_value = "none")]
        frame: FrameStyle,

        /// Also copy the saved image to the clipboard
        #[arg(long)]
        copy: bool,
    },

    /// Record the screen until Ctrl+C
    Record {
        /// Device-side recording limit in seconds
        #[arg(long)]
        time_limit: Option<u32>,

        /// Also save a GIF of the recording
        #[arg(long)]
        gif: bool,

        /// GIF frames per second
        #[arg(long)]
        gif_fps: Option<u32>,

        /// GIF scale relative to the recording
        #[arg(long)]
        gif_scale: Option<f64>,
    },

    /// Wrap an existing PNG in a device frame
    Frame {
        /// Image to frame
        input: PathBuf,

        /// Frame style: phone or tablet
        #[arg(long, default_value = "phone")]
        style: FrameStyle,
    },

    /// Convert an MP4 recording into an animated GIF
    Gif {
        /// Recording to convert
        input: PathBuf,

        /// Frames per second
        #[arg(long)]
        fps: Option<u32>,

        /// Scale relative to the recording
        #[arg(long)]
        scale: Option<f64>,
    },

    /// Mirror the device screen until Ctrl+C
    Mirror {
        /// Local path of the mirroring server payload
        #[arg(long)]
        server: Option<PathBuf>,

        /// Save the last rendered frame as a PNG on exit
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Switch the device to adb over Wi-Fi
    Wireless,

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load();
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    tabsnap_common::logging::init_logging(&config.logging);

    if let Some(output) = cli.output {
        config.output_dir = output;
    }

    match cli.command {
        Commands::Check => commands::check::run(&config),
        Commands::Screenshot { frame, copy } => {
            commands::screenshot::run(&config, frame, copy).await
        }
        Commands::Record {
            time_limit,
            gif,
            gif_fps,
            gif_scale,
        } => {
            if let Some(secs) = time_limit {
                config.capture.recording_time_limit_secs = secs;
            }
            if let Some(fps) = gif_fps {
                config.gif.fps = fps;
            }
            if let Some(scale) = gif_scale {
                config.gif.scale = scale;
            }
            commands::record::run(&config, gif).await
        }
        Commands::Frame { input, style } => commands::frame::run(&config, input, style).await,
        Commands::Gif { input, fps, scale } => {
            if let Some(fps) = fps {
                config.gif.fps = fps;
            }
            if let Some(scale) = scale {
                config.gif.scale = scale;
            }
            commands::gif::run(&config, input).await
        }
        Commands::Mirror { server, snapshot } => {
            if server.is_some() {
                config.mirror.server_path = server;
            }
            commands::mirror::run(&config, snapshot).await
        }
        Commands::Wireless => commands::wireless::run(&config).await,
        Commands::Config => commands::config::run(&config),
    }
}
