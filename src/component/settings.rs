//! Parameters a component accepts while it is being configured

use super::PortIndex;
use crate::{
    ColorEnhancement, DynamicRange, ExposureMode, ImageFilter, Metering, Mirror,
    RegionOfInterest, ThumbnailConfig, WhiteBalanceGains, WhiteBalanceMode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFormat {
    Unused,
    Yuv420PackedPlanar,
    /// 8 bits per channel, laid out R, G, B, A in memory.
    Rgba8888,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coding {
    Unused,
    Jpeg,
}

/// Geometry and format of one port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortDefinition {
    pub port: PortIndex,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub slice_height: u32,
    pub color: ColorFormat,
    pub coding: Coding,
    pub frame_rate: Option<u32>,
}

impl PortDefinition {
    /// Raw video at `width`×`height`, planar YUV 4:2:0.
    pub fn video(port: PortIndex, width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            port,
            width,
            height,
            stride: width,
            slice_height: height,
            color: ColorFormat::Yuv420PackedPlanar,
            coding: Coding::Unused,
            frame_rate: Some(frame_rate),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutterSpeed {
    Auto,
    Micros(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sensitivity {
    Auto,
    Iso(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExposureValue {
    pub metering: Metering,
    pub compensation: i32,
    pub shutter_speed: ShutterSpeed,
    pub sensitivity: Sensitivity,
}

/// One parameter or config write.
#[derive(Debug, Clone, PartialEq)]
pub enum Setting {
    /// Ask the component to raise PARAM_OR_CONFIG_CHANGED when the device number changes.
    RequestDeviceChangeCallback(bool),
    CameraDevice(u32),
    SensorMode { width: u32, height: u32 },
    PortDefinition(PortDefinition),
    Sharpness(i32),
    Contrast(i32),
    Brightness(u32),
    Saturation(i32),
    Exposure(ExposureValue),
    ExposureControl(ExposureMode),
    FrameStabilisation(bool),
    WhiteBalance(WhiteBalanceMode),
    WhiteBalanceGains(WhiteBalanceGains),
    ImageFilter(ImageFilter),
    Mirror { port: PortIndex, mirror: Mirror },
    Rotation { port: PortIndex, degrees: u16 },
    ColorEnhancement(ColorEnhancement),
    NoiseReduction(bool),
    InputCrop(RegionOfInterest),
    DynamicRange(DynamicRange),
    PortCapturing { port: PortIndex, enabled: bool },
    QualityFactor { port: PortIndex, quality: u8 },
    Exif(bool),
    IjgTableScaling { port: PortIndex, enabled: bool },
    Thumbnail(ThumbnailConfig),
}

impl Setting {
    pub fn name(&self) -> &'static str {
        match self {
            Setting::RequestDeviceChangeCallback(_) => "request-callback",
            Setting::CameraDevice(_) => "camera-device",
            Setting::SensorMode { .. } => "sensor-mode",
            Setting::PortDefinition(_) => "port-definition",
            Setting::Sharpness(_) => "sharpness",
            Setting::Contrast(_) => "contrast",
            Setting::Brightness(_) => "brightness",
            Setting::Saturation(_) => "saturation",
            Setting::Exposure(_) => "exposure-value",
            Setting::ExposureControl(_) => "exposure-control",
            Setting::FrameStabilisation(_) => "frame-stabilisation",
            Setting::WhiteBalance(_) => "white-balance",
            Setting::WhiteBalanceGains(_) => "white-balance-gains",
            Setting::ImageFilter(_) => "image-filter",
            Setting::Mirror { .. } => "mirror",
            Setting::Rotation { .. } => "rotation",
            Setting::ColorEnhancement(_) => "color-enhancement",
            Setting::NoiseReduction(_) => "noise-reduction",
            Setting::InputCrop(_) => "input-crop",
            Setting::DynamicRange(_) => "dynamic-range",
            Setting::PortCapturing { .. } => "port-capturing",
            Setting::QualityFactor { .. } => "quality-factor",
            Setting::Exif(_) => "exif",
            Setting::IjgTableScaling { .. } => "ijg-table-scaling",
            Setting::Thumbnail(_) => "thumbnail",
        }
    }
}
