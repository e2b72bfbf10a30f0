pub mod capture;
pub mod cli;
pub mod component;
pub mod error;
pub mod homography;
pub mod output;
pub mod pipeline;
pub mod soft;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use error::{ConfigError, PipelineError};

/// Environment prefix for configuration overrides, e.g. `VISICAM__ENCODER__QUALITY=90`.
pub const ENV_PREFIX: &str = "VISICAM";

/// System configuration
///
/// Compiled-in defaults match the values the camera was tuned with; a TOML file
/// and `VISICAM__*` environment variables may override any field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub camera: CameraConfig,
    pub encoder: EncoderConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub device: u32,
    pub frame_rate: u32,
    pub preview_width: u32,
    pub preview_height: u32,
    pub sharpness: i32,  // -100 to 100
    pub contrast: i32,   // -100 to 100
    pub brightness: u32, // 0 to 100
    pub saturation: i32, // -100 to 100
    pub iso: u32,        // 100 to 800
    pub iso_auto: bool,
    pub exposure_compensation: i32, // -24 to 24
    pub shutter_speed_us: u32,
    pub shutter_speed_auto: bool,
    pub exposure: ExposureMode,
    pub metering: Metering,
    pub white_balance: WhiteBalanceMode,
    /// Only applied when `white_balance` is `Off`.
    pub white_balance_gains: WhiteBalanceGains,
    pub rotation: u16, // 0, 90, 180, 270
    pub mirror: Mirror,
    pub noise_reduction: bool,
    pub frame_stabilisation: bool,
    pub color_enhancement: ColorEnhancement,
    pub image_filter: ImageFilter,
    pub dynamic_range: DynamicRange,
    pub roi: RegionOfInterest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposureMode {
    Off,
    Auto,
    Night,
    BackLight,
    Spotlight,
    Sports,
    Snow,
    Beach,
    LargeAperture,
    SmallAperture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metering {
    Average,
    Spot,
    Matrix,
    Backlit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhiteBalanceMode {
    Off,
    Auto,
    Sunlight,
    Cloudy,
    Shade,
    Tungsten,
    Fluorescent,
    Incandescent,
    Flash,
    Horizon,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WhiteBalanceGains {
    pub red: f32,
    pub blue: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mirror {
    None,
    Vertical,
    Horizontal,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorEnhancement {
    pub enabled: bool,
    pub u: u8,
    pub v: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFilter {
    None,
    Noise,
    Emboss,
    Negative,
    Sketch,
    OilPaint,
    Hatch,
    Gpen,
    Antialias,
    DeRing,
    Solarize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamicRange {
    Off,
    Low,
    Medium,
    High,
}

/// Input crop, all values in percent of the sensor frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionOfInterest {
    pub top: u8,
    pub left: u8,
    pub width: u8,
    pub height: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub quality: u8, // 1 to 100
    pub exif: bool,
    pub ijg_scaling: bool,
    pub thumbnail: ThumbnailConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    pub enabled: bool,
    pub use_preview: bool,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortEnablePolicy {
    /// Submit the enable command and move on; some stages never report it.
    FireAndForget,
    /// Await the enable completion like a disable.
    Await,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Control loop cadence in cycles per second, 0 runs unpaced.
    pub cycle_rate: u32,
    pub max_cycles: Option<u64>,
    pub port_enable: PortEnablePolicy,
    pub control_core: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                device: 0,
                frame_rate: 30,
                preview_width: 640,
                preview_height: 480,
                sharpness: 0,
                contrast: 0,
                brightness: 50,
                saturation: 0,
                iso: 100,
                iso_auto: true,
                exposure_compensation: 0,
                shutter_speed_us: 125_000,
                shutter_speed_auto: true,
                exposure: ExposureMode::Auto,
                metering: Metering::Average,
                white_balance: WhiteBalanceMode::Auto,
                white_balance_gains: WhiteBalanceGains {
                    red: 1.0,
                    blue: 1.0,
                },
                rotation: 0,
                mirror: Mirror::None,
                noise_reduction: true,
                frame_stabilisation: false,
                color_enhancement: ColorEnhancement {
                    enabled: false,
                    u: 128,
                    v: 128,
                },
                image_filter: ImageFilter::None,
                dynamic_range: DynamicRange::Off,
                roi: RegionOfInterest {
                    top: 0,
                    left: 0,
                    width: 100,
                    height: 100,
                },
            },
            encoder: EncoderConfig {
                quality: 100,
                exif: false,
                ijg_scaling: true,
                thumbnail: ThumbnailConfig {
                    enabled: false,
                    use_preview: false,
                    width: 0,
                    height: 0,
                },
            },
            pipeline: PipelineConfig {
                cycle_rate: 30,
                max_cycles: None,
                port_enable: PortEnablePolicy::FireAndForget,
                control_core: None,
            },
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `VISICAM__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check every setting against the range the sensor and codec accept.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let cam = &self.camera;
        check_range("camera.sharpness", cam.sharpness as i64, -100, 100)?;
        check_range("camera.contrast", cam.contrast as i64, -100, 100)?;
        check_range("camera.brightness", cam.brightness as i64, 0, 100)?;
        check_range("camera.saturation", cam.saturation as i64, -100, 100)?;
        check_range("camera.iso", cam.iso as i64, 100, 800)?;
        check_range(
            "camera.exposure_compensation",
            cam.exposure_compensation as i64,
            -24,
            24,
        )?;
        check_range("camera.frame_rate", cam.frame_rate as i64, 1, 120)?;
        check_range("camera.roi.top", cam.roi.top as i64, 0, 100)?;
        check_range("camera.roi.left", cam.roi.left as i64, 0, 100)?;
        check_range("camera.roi.width", cam.roi.width as i64, 0, 100)?;
        check_range("camera.roi.height", cam.roi.height as i64, 0, 100)?;
        if !matches!(cam.rotation, 0 | 90 | 180 | 270) {
            return Err(ConfigError::Invalid {
                field: "camera.rotation",
                reason: format!("{} is not one of 0, 90, 180, 270", cam.rotation),
            });
        }
        let gains = cam.white_balance_gains;
        if !(gains.red > 0.0 && gains.blue > 0.0) {
            return Err(ConfigError::Invalid {
                field: "camera.white_balance_gains",
                reason: format!("gains must be positive, got {}/{}", gains.red, gains.blue),
            });
        }
        check_range("encoder.quality", self.encoder.quality as i64, 1, 100)?;
        Ok(())
    }
}

fn check_range(field: &'static str, value: i64, min: i64, max: i64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}
