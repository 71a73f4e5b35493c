//! Device discovery and hardware streams.
//!
//! Everything here runs on the control thread. [`DeviceRegistry`] is the only
//! part that is always available; the `cpal` backed types need the `cpal_io`
//! feature.
//!
//! # Example: Capture from a named input and play the graph
//!
//! ```no_run
//! # #[cfg(feature = "cpal_io")] {
//! use lauscher::{GraphConfig, CpalInput, CpalOutput, CpalRegistry, DeviceRegistry};
//!
//! for device in CpalRegistry::inputs().list().unwrap() {
//!     println!("{}", device.name);
//! }
//!
//! let (mut patchbay, graph) = lauscher::new(GraphConfig::default()).unwrap();
//! let (input, capture) = patchbay.add_input(2).unwrap();
//! let tap = patchbay.add_tap(2).unwrap();
//! patchbay.connect(input, tap.id(), 0, 0).unwrap();
//!
//! let mut mic = CpalInput::new(capture, patchbay.sample_rate());
//! mic.set_device("Built-in Microphone").unwrap();
//! mic.configure_input_device().unwrap();
//! mic.start().unwrap();
//!
//! let _speakers = CpalOutput::start(None, graph, tap.id()).unwrap();
//! # }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// A discovered audio device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Stable identifier; backends without one use the name
    pub id: String,
    /// Human-readable device name
    pub name: String,
}

/// Source of device listings. Control thread only.
pub trait DeviceRegistry {
    fn list(&self) -> ConfigResult<Vec<DeviceInfo>>;
}

/// Look a device up by name, falling back to its id
pub fn find_device(registry: &dyn DeviceRegistry, name: &str) -> ConfigResult<DeviceInfo> {
    let devices = registry.list()?;
    devices
        .iter()
        .find(|d| d.name == name)
        .or_else(|| devices.iter().find(|d| d.id == name))
        .cloned()
        .ok_or_else(|| ConfigError::DeviceNotFound(name.to_string()))
}

#[cfg(feature = "cpal_io")]
pub use self::cpal_io::{CpalInput, CpalOutput, CpalRegistry};

#[cfg(feature = "cpal_io")]
mod cpal_io {
    use std::sync::Arc;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{FromSample, Sample, SampleFormat, SizedSample, SupportedStreamConfig};
    use parking_lot::Mutex;
    use tracing::{error, info};

    use super::{DeviceInfo, DeviceRegistry};
    use crate::buffer::{AudioBuffers, RenderFlags};
    use crate::error::{ConfigError, ConfigResult};
    use crate::graph::AudioGraph;
    use crate::node::NodeId;
    use crate::nodes::input::CaptureSide;

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Direction {
        Input,
        Output,
    }

    /// Lists the default host's input or output devices
    pub struct CpalRegistry {
        host: cpal::Host,
        direction: Direction,
    }

    impl CpalRegistry {
        pub fn inputs() -> Self {
            Self {
                host: cpal::default_host(),
                direction: Direction::Input,
            }
        }

        pub fn outputs() -> Self {
            Self {
                host: cpal::default_host(),
                direction: Direction::Output,
            }
        }
    }

    impl DeviceRegistry for CpalRegistry {
        fn list(&self) -> ConfigResult<Vec<DeviceInfo>> {
            Ok(devices(&self.host, self.direction)?
                .iter()
                .filter_map(|device| device.name().ok())
                // cpal has no separate ids
                .map(|name| DeviceInfo {
                    id: name.clone(),
                    name,
                })
                .collect())
        }
    }

    fn devices(host: &cpal::Host, direction: Direction) -> ConfigResult<Vec<cpal::Device>> {
        let devices = match direction {
            Direction::Input => host.input_devices().map(|d| d.collect::<Vec<_>>()),
            Direction::Output => host.output_devices().map(|d| d.collect::<Vec<_>>()),
        };
        devices.map_err(|e| ConfigError::Device(e.to_string()))
    }

    fn find(host: &cpal::Host, direction: Direction, name: &str) -> ConfigResult<cpal::Device> {
        devices(host, direction)?
            .into_iter()
            .find(|device| device.name().is_ok_and(|n| n == name))
            .ok_or_else(|| ConfigError::DeviceNotFound(name.to_string()))
    }

    /// The device's default config if it runs at `sample_rate`, otherwise any
    /// supported config that can
    fn choose_config(
        device: &cpal::Device,
        direction: Direction,
        sample_rate: u32,
    ) -> ConfigResult<SupportedStreamConfig> {
        let device_err = |e: &dyn std::fmt::Display| ConfigError::Device(e.to_string());

        let default = match direction {
            Direction::Input => device.default_input_config(),
            Direction::Output => device.default_output_config(),
        }
        .map_err(|e| device_err(&e))?;

        if default.sample_rate().0 == sample_rate {
            return Ok(default);
        }

        let ranges = match direction {
            Direction::Input => device
                .supported_input_configs()
                .map(|r| r.collect::<Vec<_>>())
                .map_err(|e| device_err(&e))?,
            Direction::Output => device
                .supported_output_configs()
                .map(|r| r.collect::<Vec<_>>())
                .map_err(|e| device_err(&e))?,
        };

        ranges
            .into_iter()
            .find(|range| {
                range.min_sample_rate().0 <= sample_rate && sample_rate <= range.max_sample_rate().0
            })
            .map(|range| range.with_sample_rate(cpal::SampleRate(sample_rate)))
            .ok_or(ConfigError::SampleRateMismatch {
                native: default.sample_rate().0,
                graph: sample_rate,
            })
    }

    /// Hardware capture feeding an input node's [`CaptureSide`].
    ///
    /// Select a device with [`set_device`](Self::set_device) (or keep the system
    /// default), then [`configure_input_device`](Self::configure_input_device)
    /// and [`start`](Self::start).
    pub struct CpalInput {
        host: cpal::Host,
        sample_rate: u32,
        /// Shared with every stream built from this input, across reconfigures
        capture: Arc<Mutex<CaptureSide>>,
        device: Option<cpal::Device>,
        config: Option<SupportedStreamConfig>,
        stream: Option<cpal::Stream>,
    }

    impl CpalInput {
        pub fn new(capture: CaptureSide, sample_rate: u32) -> Self {
            Self {
                host: cpal::default_host(),
                sample_rate,
                capture: Arc::new(Mutex::new(capture)),
                device: None,
                config: None,
                stream: None,
            }
        }

        pub fn list_devices(&self) -> ConfigResult<Vec<DeviceInfo>> {
            CpalRegistry {
                host: cpal::default_host(),
                direction: Direction::Input,
            }
            .list()
        }

        /// Select the input device called `name`.
        ///
        /// If the input was already configured it is reconfigured for the new
        /// device, restarting capture if it was running.
        pub fn set_device(&mut self, name: &str) -> ConfigResult<()> {
            let device = find(&self.host, Direction::Input, name)?;
            self.device = Some(device);
            info!(device = name, "Input device selected");

            if self.config.is_some() {
                self.configure_input_device()?;
            }
            Ok(())
        }

        /// Pick a stream config for the selected (or default) device at the graph's rate
        pub fn configure_input_device(&mut self) -> ConfigResult<()> {
            let was_running = self.stream.is_some();
            self.stop();

            let device = match &self.device {
                Some(device) => device.clone(),
                None => self
                    .host
                    .default_input_device()
                    .ok_or_else(|| ConfigError::DeviceNotFound("default input".into()))?,
            };
            let config = choose_config(&device, Direction::Input, self.sample_rate)?;
            info!(
                device = %device.name().unwrap_or_else(|_| "Unknown".into()),
                channels = config.channels(),
                format = ?config.sample_format(),
                "Input device configured"
            );

            self.device = Some(device);
            self.config = Some(config);

            if was_running {
                self.start()?;
            }
            Ok(())
        }

        pub fn start(&mut self) -> ConfigResult<()> {
            if self.stream.is_some() {
                return Ok(());
            }
            let (Some(device), Some(config)) = (&self.device, &self.config) else {
                return Err(ConfigError::NotConfigured);
            };

            let capture = Arc::clone(&self.capture);
            let stream = match config.sample_format() {
                SampleFormat::F32 => build_input::<f32>(device, config, capture),
                SampleFormat::I16 => build_input::<i16>(device, config, capture),
                SampleFormat::U16 => build_input::<u16>(device, config, capture),
                other => Err(ConfigError::Device(format!(
                    "Unsupported sample format: {other:?}"
                ))),
            }?;

            stream
                .play()
                .map_err(|e| ConfigError::Device(e.to_string()))?;
            self.stream = Some(stream);
            info!("Input capture started");
            Ok(())
        }

        pub fn stop(&mut self) {
            if let Some(stream) = self.stream.take() {
                if let Err(err) = stream.pause() {
                    error!(%err, "Failed to pause input stream");
                }
                info!("Input capture stopped");
            }
        }

        pub fn is_running(&self) -> bool {
            self.stream.is_some()
        }
    }

    fn build_input<T>(
        device: &cpal::Device,
        config: &SupportedStreamConfig,
        capture: Arc<Mutex<CaptureSide>>,
    ) -> ConfigResult<cpal::Stream>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        let stride = config.channels() as usize;
        device
            .build_input_stream(
                &config.config(),
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    // Only contended while an old stream is still winding down
                    if let Some(mut capture) = capture.try_lock() {
                        capture.push_interleaved_map(data, stride, f32::from_sample);
                    }
                },
                |err| error!(%err, "Input stream error"),
                None,
            )
            .map_err(|e| ConfigError::Device(e.to_string()))
    }

    /// Hardware output driven by an [`AudioGraph`].
    ///
    /// The graph moves into the device callback, which renders `terminal` in
    /// blocks of at most `max_frames` and interleaves them into the device buffer.
    /// Dropping the `CpalOutput` stops the stream.
    pub struct CpalOutput {
        _stream: cpal::Stream,
        channels: usize,
        sample_rate: u32,
    }

    impl CpalOutput {
        /// Start playing `terminal` on the output called `device`, or the default output
        pub fn start(device: Option<&str>, graph: AudioGraph, terminal: NodeId) -> ConfigResult<Self> {
            let host = cpal::default_host();
            let device = match device {
                Some(name) => find(&host, Direction::Output, name)?,
                None => host
                    .default_output_device()
                    .ok_or_else(|| ConfigError::DeviceNotFound("default output".into()))?,
            };

            let sample_rate = graph.sample_rate();
            let config = choose_config(&device, Direction::Output, sample_rate)?;
            let channels = config.channels() as usize;
            let renderer = OutputRenderer {
                block: AudioBuffers::new(channels, graph.max_frames()),
                flags: RenderFlags::default(),
                graph,
                terminal,
            };

            let stream = match config.sample_format() {
                SampleFormat::F32 => build_output::<f32>(&device, &config, renderer),
                SampleFormat::I16 => build_output::<i16>(&device, &config, renderer),
                SampleFormat::U16 => build_output::<u16>(&device, &config, renderer),
                other => Err(ConfigError::Device(format!(
                    "Unsupported sample format: {other:?}"
                ))),
            }?;

            stream
                .play()
                .map_err(|e| ConfigError::Device(e.to_string()))?;
            info!(
                device = %device.name().unwrap_or_else(|_| "Unknown".into()),
                channels,
                sample_rate,
                "Output started"
            );

            Ok(Self {
                _stream: stream,
                channels,
                sample_rate,
            })
        }

        pub fn channels(&self) -> usize {
            self.channels
        }

        pub fn sample_rate(&self) -> u32 {
            self.sample_rate
        }
    }

    struct OutputRenderer {
        graph: AudioGraph,
        terminal: NodeId,
        block: AudioBuffers,
        flags: RenderFlags,
    }

    impl OutputRenderer {
        fn fill<T: SizedSample + FromSample<f32>>(&mut self, data: &mut [T], stride: usize) {
            let max_frames = self.graph.max_frames();
            for chunk in data.chunks_mut(stride * max_frames) {
                let frames = chunk.len() / stride;
                // A failed render plays silence for this chunk
                let rendered = self
                    .graph
                    .render(self.terminal, 0, frames, &mut self.block, &mut self.flags)
                    .is_ok();
                let live_frames = if rendered { self.block.frames() } else { 0 };

                for (i, frame) in chunk.chunks_mut(stride).enumerate() {
                    for (ch, sample) in frame.iter_mut().enumerate() {
                        let value = if i < live_frames && ch < self.block.channels() {
                            self.block.channel(ch)[i]
                        } else {
                            0.0
                        };
                        *sample = T::from_sample(value);
                    }
                }
            }
        }
    }

    fn build_output<T>(
        device: &cpal::Device,
        config: &SupportedStreamConfig,
        mut renderer: OutputRenderer,
    ) -> ConfigResult<cpal::Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let stride = config.channels() as usize;
        device
            .build_output_stream(
                &config.config(),
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| renderer.fill(data, stride),
                |err| error!(%err, "Output stream error"),
                None,
            )
            .map_err(|e| ConfigError::Device(e.to_string()))
    }

}
