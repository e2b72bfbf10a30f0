//! Bring-up of the four-stage capture graph

use tracing::{debug, info, instrument};

use crate::capture::FrameGeometry;
use crate::component::settings::{ExposureValue, Sensitivity, ShutterSpeed};
use crate::component::{
    ports, AcceleratorCore, Coding, ColorFormat, ComponentHandle, ComponentKind, EventFlags,
    LifecycleState, PortDefinition, PortIndex, RenderTarget, Setting, Tunnel,
};
use crate::pipeline::buffer::{allocate_pixel_buffer, encoded_buffer_len, PipelineBuffers};
use crate::{CameraConfig, Config, EncoderConfig, PipelineError, WhiteBalanceMode};

/// Sensor output that feeds the compositor.
pub const CAPTURE_PORT: PortIndex = ports::CAMERA_VIDEO_OUTPUT;

/// Ports that carry data once the graph runs; all others stay disabled.
const REQUIRED_PORTS: [(ComponentKind, PortIndex); 7] = [
    (ComponentKind::Sensor, ports::CAMERA_PREVIEW_OUTPUT),
    (ComponentKind::Sensor, ports::CAMERA_VIDEO_OUTPUT),
    (ComponentKind::Compositor, ports::COMPOSITOR_INPUT),
    (ComponentKind::Compositor, ports::COMPOSITOR_OUTPUT),
    (ComponentKind::DiscardSink, ports::NULL_SINK_VIDEO_INPUT),
    (ComponentKind::Encoder, ports::ENCODER_INPUT),
    (ComponentKind::Encoder, ports::ENCODER_OUTPUT),
];

const TUNNELS: [Tunnel; 2] = [
    Tunnel {
        source: ComponentKind::Sensor,
        source_port: ports::CAMERA_PREVIEW_OUTPUT,
        sink: ComponentKind::DiscardSink,
        sink_port: ports::NULL_SINK_VIDEO_INPUT,
    },
    Tunnel {
        source: ComponentKind::Sensor,
        source_port: ports::CAMERA_VIDEO_OUTPUT,
        sink: ComponentKind::Compositor,
        sink_port: ports::COMPOSITOR_INPUT,
    },
];

/// A running graph: four executing components and the buffers exchanged with them.
#[derive(Debug)]
pub struct PipelineSession {
    pub sensor: ComponentHandle,
    pub discard_sink: ComponentHandle,
    pub compositor: ComponentHandle,
    pub encoder: ComponentHandle,
    pub buffers: PipelineBuffers,
    pub geometry: FrameGeometry,
}

/// Drives the components from creation to a capturing steady state.
///
/// Every step completes, awaited, before the next one starts; a failure at any
/// point leaves the graph half built and is returned as fatal.
pub struct PipelineGraphBuilder<'a> {
    core: &'a dyn AcceleratorCore,
    config: &'a Config,
    geometry: FrameGeometry,
}

struct Components {
    sensor: ComponentHandle,
    discard_sink: ComponentHandle,
    compositor: ComponentHandle,
    encoder: ComponentHandle,
}

impl Components {
    /// Lifecycle order: sensor, compositor, sink, encoder.
    fn in_lifecycle_order(&mut self) -> [&mut ComponentHandle; 4] {
        [
            &mut self.sensor,
            &mut self.compositor,
            &mut self.discard_sink,
            &mut self.encoder,
        ]
    }

    fn get_mut(&mut self, kind: ComponentKind) -> &mut ComponentHandle {
        match kind {
            ComponentKind::Sensor => &mut self.sensor,
            ComponentKind::DiscardSink => &mut self.discard_sink,
            ComponentKind::Compositor => &mut self.compositor,
            ComponentKind::Encoder => &mut self.encoder,
        }
    }
}

impl<'a> PipelineGraphBuilder<'a> {
    pub fn new(core: &'a dyn AcceleratorCore, config: &'a Config, geometry: FrameGeometry) -> Self {
        Self {
            core,
            config,
            geometry,
        }
    }

    /// Build the graph with the compositor rendering into `render_target`.
    #[instrument(skip(self), fields(width = self.geometry.width, height = self.geometry.height))]
    pub fn build(self, render_target: RenderTarget) -> Result<PipelineSession, PipelineError> {
        info!("Building capture graph");
        let mut components = self.initialize_components()?;

        configure_sensor(&mut components.sensor, &self.config.camera, self.geometry)?;
        configure_encoder(&mut components.encoder, &self.config.encoder, self.geometry)?;

        for tunnel in TUNNELS {
            debug!(?tunnel, "setup tunnel");
            self.core
                .setup_tunnel(tunnel)
                .map_err(|source| PipelineError::Driver {
                    component: tunnel.source,
                    operation: "setup tunnel",
                    source,
                })?;
        }

        for component in components.in_lifecycle_order() {
            component.transition(LifecycleState::Idle)?;
        }

        for (kind, port) in REQUIRED_PORTS {
            components.get_mut(kind).set_port_enabled(port, true)?;
        }

        let buffers = self.bind_buffers(&mut components, render_target)?;

        for component in components.in_lifecycle_order() {
            component.transition(LifecycleState::Executing)?;
        }

        start_capture(&mut components.sensor, CAPTURE_PORT)?;
        info!("Capture graph executing");

        let Components {
            sensor,
            discard_sink,
            compositor,
            encoder,
        } = components;
        Ok(PipelineSession {
            sensor,
            discard_sink,
            compositor,
            encoder,
            buffers,
            geometry: self.geometry,
        })
    }

    /// Create the four components and disable every port they own.
    fn initialize_components(&self) -> Result<Components, PipelineError> {
        let policy = self.config.pipeline.port_enable;
        let init = |kind| -> Result<ComponentHandle, PipelineError> {
            let mut component = ComponentHandle::initialize(self.core, kind, policy)?;
            component.disable_all_ports()?;
            Ok(component)
        };
        Ok(Components {
            sensor: init(ComponentKind::Sensor)?,
            discard_sink: init(ComponentKind::DiscardSink)?,
            compositor: init(ComponentKind::Compositor)?,
            encoder: init(ComponentKind::Encoder)?,
        })
    }

    fn bind_buffers(
        &self,
        components: &mut Components,
        render_target: RenderTarget,
    ) -> Result<PipelineBuffers, PipelineError> {
        let FrameGeometry { width, height } = self.geometry;

        let compositor = &mut components.compositor;
        let compositor_output = compositor
            .driver_mut()
            .use_render_target(ports::COMPOSITOR_OUTPUT, render_target)
            .map_err(compositor.driver_error("use render target"))?;

        let encoder = &mut components.encoder;
        let encoder_input = allocate_pixel_buffer(ports::ENCODER_INPUT, width, height);
        encoder
            .driver_mut()
            .use_buffer(ports::ENCODER_INPUT, &encoder_input)
            .map_err(encoder.driver_error("use buffer"))?;
        let encoder_output = encoder
            .driver_mut()
            .allocate_buffer(ports::ENCODER_OUTPUT, encoded_buffer_len(width, height))
            .map_err(encoder.driver_error("allocate buffer"))?;

        debug!(
            compositor_output = compositor_output.id(),
            encoder_input = encoder_input.id(),
            encoder_output = encoder_output.id(),
            "buffers bound"
        );
        Ok(PipelineBuffers {
            compositor_output,
            encoder_input,
            encoder_output,
        })
    }
}

/// Device selection, sensor mode, port formats and image-quality settings.
///
/// Expects the component in Loaded with all ports disabled. Only the device
/// selection is confirmed; the remaining writes are submitted back to back.
#[instrument(skip_all)]
pub fn configure_sensor(
    sensor: &mut ComponentHandle,
    camera: &CameraConfig,
    geometry: FrameGeometry,
) -> Result<(), PipelineError> {
    sensor.expect_kind(ComponentKind::Sensor, "configure sensor")?;

    sensor.configure(Setting::RequestDeviceChangeCallback(true))?;
    sensor.configure(Setting::CameraDevice(camera.device))?;
    sensor.wait_for(EventFlags::PARAM_OR_CONFIG_CHANGED)?;

    sensor.configure(Setting::SensorMode {
        width: geometry.width,
        height: geometry.height,
    })?;
    sensor.configure(Setting::PortDefinition(PortDefinition::video(
        ports::CAMERA_VIDEO_OUTPUT,
        geometry.width,
        geometry.height,
        camera.frame_rate,
    )))?;
    // The preview stream drives the sensor's automatic adjustments and is
    // otherwise discarded.
    sensor.configure(Setting::PortDefinition(PortDefinition::video(
        ports::CAMERA_PREVIEW_OUTPUT,
        camera.preview_width,
        camera.preview_height,
        camera.frame_rate,
    )))?;

    for setting in image_settings(camera) {
        sensor.configure(setting)?;
    }
    Ok(())
}

fn image_settings(camera: &CameraConfig) -> Vec<Setting> {
    let mut settings = vec![
        Setting::Sharpness(camera.sharpness),
        Setting::Contrast(camera.contrast),
        Setting::Saturation(camera.saturation),
        Setting::Brightness(camera.brightness),
        Setting::Exposure(ExposureValue {
            metering: camera.metering,
            compensation: camera.exposure_compensation,
            shutter_speed: if camera.shutter_speed_auto {
                ShutterSpeed::Auto
            } else {
                ShutterSpeed::Micros(camera.shutter_speed_us)
            },
            sensitivity: if camera.iso_auto {
                Sensitivity::Auto
            } else {
                Sensitivity::Iso(camera.iso)
            },
        }),
        Setting::ExposureControl(camera.exposure),
        Setting::FrameStabilisation(camera.frame_stabilisation),
        Setting::WhiteBalance(camera.white_balance),
    ];
    if camera.white_balance == WhiteBalanceMode::Off {
        settings.push(Setting::WhiteBalanceGains(camera.white_balance_gains));
    }
    settings.extend([
        Setting::ImageFilter(camera.image_filter),
        Setting::Mirror {
            port: ports::CAMERA_VIDEO_OUTPUT,
            mirror: camera.mirror,
        },
        Setting::Rotation {
            port: ports::CAMERA_VIDEO_OUTPUT,
            degrees: camera.rotation,
        },
        Setting::ColorEnhancement(camera.color_enhancement),
        Setting::NoiseReduction(camera.noise_reduction),
        Setting::InputCrop(camera.roi),
        Setting::DynamicRange(camera.dynamic_range),
    ]);
    settings
}

/// Port geometry, colour format and JPEG parameters of the encoder.
#[instrument(skip_all)]
pub fn configure_encoder(
    encoder: &mut ComponentHandle,
    settings: &EncoderConfig,
    geometry: FrameGeometry,
) -> Result<(), PipelineError> {
    encoder.expect_kind(ComponentKind::Encoder, "configure encoder")?;
    let FrameGeometry { width, height } = geometry;

    encoder.configure(Setting::PortDefinition(PortDefinition {
        port: ports::ENCODER_INPUT,
        width,
        height,
        stride: 4 * width,
        slice_height: height,
        color: ColorFormat::Rgba8888,
        coding: Coding::Unused,
        frame_rate: None,
    }))?;
    encoder.configure(Setting::PortDefinition(PortDefinition {
        port: ports::ENCODER_OUTPUT,
        width,
        height,
        stride: width,
        slice_height: height,
        color: ColorFormat::Unused,
        coding: Coding::Jpeg,
        frame_rate: None,
    }))?;
    encoder.configure(Setting::QualityFactor {
        port: ports::ENCODER_OUTPUT,
        quality: settings.quality,
    })?;
    encoder.configure(Setting::Exif(settings.exif))?;
    encoder.configure(Setting::IjgTableScaling {
        port: ports::ENCODER_OUTPUT,
        enabled: settings.ijg_scaling,
    })?;
    encoder.configure(Setting::Thumbnail(settings.thumbnail))?;
    Ok(())
}

/// Begin streaming on `port`; the component must be Executing.
pub fn start_capture(sensor: &mut ComponentHandle, port: PortIndex) -> Result<(), PipelineError> {
    sensor.expect_kind(ComponentKind::Sensor, "start capture")?;
    info!(%port, "Starting capture");
    sensor.configure(Setting::PortCapturing {
        port,
        enabled: true,
    })
}
