//! Command line

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::capture::FrameGeometry;

/// Capture camera frames, correct their perspective and persist them as JPEG
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Capture width in pixels: 640 to 1920, a multiple of 32
    #[arg(value_parser = parse_width)]
    pub width: u32,

    /// Capture height in pixels: 480 to 1080, a multiple of 16
    #[arg(value_parser = parse_height)]
    pub height: u32,

    /// Seconds between homography reloads and unmodified captures
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    pub refresh: u64,

    /// Homography file, nine lines with one value each
    pub homography: PathBuf,

    /// Where corrected frames are written
    pub processed: PathBuf,

    /// Where unmodified frames are written on each refresh
    pub captured: PathBuf,

    /// TOML file overriding the built-in camera and encoder settings
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl Args {
    pub fn geometry(&self) -> FrameGeometry {
        FrameGeometry::new(self.width, self.height)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh)
    }
}

fn parse_dimension(s: &str, min: u32, max: u32, multiple: u32) -> Result<u32, String> {
    let value: u32 = s.parse().map_err(|_| format!("`{s}` is not a number"))?;
    if !(min..=max).contains(&value) {
        return Err(format!("{value} is not in {min}..={max}"));
    }
    if value % multiple != 0 {
        return Err(format!("{value} is not a multiple of {multiple}"));
    }
    Ok(value)
}

fn parse_width(s: &str) -> Result<u32, String> {
    parse_dimension(s, 640, 1920, 32)
}

fn parse_height(s: &str) -> Result<u32, String> {
    parse_dimension(s, 480, 1080, 16)
}
