use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SampleRate, Stream, StreamConfig, SupportedStreamConfig};
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::audio::pcm;
use crate::config::OutputTarget;
use crate::error::DeviceError;
use crate::models::AudioFormat;

/// Blocks of PCM queued between `play` and the cpal callback
const STREAM_QUEUE_BLOCKS: usize = 8;

/// Sound output capability driven by the output thread.
///
/// Implementations are created on, and only ever used from, the output
/// thread, so they need not be `Send`.
pub trait AudioDevice {
    fn name(&self) -> &str;

    /// Prepare the device for `format`
    fn open(&mut self, format: &AudioFormat) -> Result<(), DeviceError>;

    /// Queue PCM for playback. May block for about as long as the data
    /// takes to play.
    fn play(&mut self, pcm: &[u8]) -> Result<(), DeviceError>;

    /// Discard whatever has been queued but not yet heard
    fn drop_buffered(&mut self);

    fn close(&mut self);
}

/// Builds the device on the output thread
pub type DeviceFactory = Box<dyn FnOnce() -> Box<dyn AudioDevice> + Send>;

/// Factory for the configured output target
pub fn device_factory(target: &OutputTarget) -> DeviceFactory {
    match target.clone() {
        OutputTarget::Null => Box::new(|| Box::new(NullDevice::new()) as Box<dyn AudioDevice>),
        OutputTarget::Default => {
            Box::new(|| Box::new(CpalDevice::new(None)) as Box<dyn AudioDevice>)
        }
        OutputTarget::Named(name) => {
            Box::new(move || Box::new(CpalDevice::new(Some(name))) as Box<dyn AudioDevice>)
        }
    }
}

/// Names of the output devices of the default host
pub fn output_device_names() -> Result<Vec<String>, DeviceError> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| DeviceError::Open(format!("Failed to enumerate devices: {}", e)))?;
    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

/// Discards audio. Optionally sleeps for the playback duration of every
/// block so that it paces the output thread like real hardware.
#[derive(Debug)]
pub struct NullDevice {
    format: Option<AudioFormat>,
    paced: bool,
}

impl NullDevice {
    pub fn new() -> Self {
        Self {
            format: None,
            paced: true,
        }
    }

    /// A null device that returns immediately from `play`
    pub fn unpaced() -> Self {
        Self {
            format: None,
            paced: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.format.is_some()
    }
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for NullDevice {
    fn name(&self) -> &str {
        "null"
    }

    fn open(&mut self, format: &AudioFormat) -> Result<(), DeviceError> {
        if !format.is_valid() {
            return Err(DeviceError::UnsupportedFormat {
                format: format.format_description(),
            });
        }
        self.format = Some(*format);
        Ok(())
    }

    fn play(&mut self, pcm: &[u8]) -> Result<(), DeviceError> {
        let format = self
            .format
            .ok_or_else(|| DeviceError::Write("device is not open".to_string()))?;
        if self.paced {
            thread::sleep(Duration::from_secs_f32(format.duration_of(pcm.len())));
        }
        Ok(())
    }

    fn drop_buffered(&mut self) {}

    fn close(&mut self) {
        self.format = None;
    }
}

/// Output through a cpal stream.
///
/// `play` converts PCM to `f32` and hands it to the stream callback through
/// a bounded channel; a full channel blocks the caller, which is what paces
/// the output thread.
pub struct CpalDevice {
    host: Host,
    device_name: Option<String>,
    label: String,
    stream: Option<Stream>,
    sender: Option<SyncSender<Vec<f32>>>,
    format: Option<AudioFormat>,
    flush: Arc<AtomicBool>,
    stream_error: Arc<Mutex<Option<String>>>,
}

impl CpalDevice {
    /// `None` selects the host's default output device
    pub fn new(device_name: Option<String>) -> Self {
        let label = device_name.clone().unwrap_or_else(|| "default".to_string());
        Self {
            host: cpal::default_host(),
            device_name,
            label,
            stream: None,
            sender: None,
            format: None,
            flush: Arc::new(AtomicBool::new(false)),
            stream_error: Arc::new(Mutex::new(None)),
        }
    }

    fn select_device(&self) -> Result<Device, DeviceError> {
        match &self.device_name {
            Some(name) => {
                let mut devices = self
                    .host
                    .output_devices()
                    .map_err(|e| DeviceError::Open(format!("Failed to enumerate devices: {}", e)))?;
                devices
                    .find(|device| device.name().map(|n| &n == name).unwrap_or(false))
                    .ok_or_else(|| DeviceError::NotFound {
                        device: name.clone(),
                    })
            }
            None => self
                .host
                .default_output_device()
                .ok_or_else(|| DeviceError::NotFound {
                    device: "default".to_string(),
                }),
        }
    }

    /// A stream configuration with the exact rate and channel count of
    /// `format`, preferring float samples. No resampling is done.
    fn find_config(device: &Device, format: &AudioFormat) -> Result<SupportedStreamConfig, DeviceError> {
        let ranges = device
            .supported_output_configs()
            .map_err(|e| DeviceError::Open(format!("Failed to get supported configs: {}", e)))?;

        let mut candidates: Vec<_> = ranges
            .filter(|range| {
                range.channels() == format.channels
                    && range.min_sample_rate().0 <= format.sample_rate
                    && range.max_sample_rate().0 >= format.sample_rate
            })
            .collect();
        candidates.sort_by_key(|range| range.sample_format() != cpal::SampleFormat::F32);

        candidates
            .into_iter()
            .next()
            .map(|range| range.with_sample_rate(SampleRate(format.sample_rate)))
            .ok_or_else(|| DeviceError::UnsupportedFormat {
                format: format.format_description(),
            })
    }

    fn build_stream<T>(
        device: &Device,
        config: &StreamConfig,
        receiver: Receiver<Vec<f32>>,
        flush: Arc<AtomicBool>,
        stream_error: Arc<Mutex<Option<String>>>,
    ) -> Result<Stream, DeviceError>
    where
        T: cpal::Sample + cpal::SizedSample + Send + 'static,
        T: cpal::FromSample<f32>,
    {
        let mut pending: Vec<f32> = Vec::new();
        let mut position = 0;

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    if flush.swap(false, Ordering::AcqRel) {
                        while receiver.try_recv().is_ok() {}
                        pending.clear();
                        position = 0;
                    }

                    for sample in data.iter_mut() {
                        while position >= pending.len() {
                            match receiver.try_recv() {
                                Ok(block) => {
                                    pending = block;
                                    position = 0;
                                }
                                Err(_) => break,
                            }
                        }
                        // Underrun: silence until more data arrives
                        let value = match pending.get(position) {
                            Some(value) => {
                                position += 1;
                                *value
                            }
                            None => 0.0,
                        };
                        *sample = cpal::Sample::from_sample(value);
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                    *stream_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
                },
                None,
            )
            .map_err(|e| DeviceError::Open(format!("Failed to build output stream: {}", e)))
    }
}

impl AudioDevice for CpalDevice {
    fn name(&self) -> &str {
        &self.label
    }

    fn open(&mut self, format: &AudioFormat) -> Result<(), DeviceError> {
        self.close();

        let device = self.select_device()?;
        let supported = Self::find_config(&device, format)?;
        let config = StreamConfig {
            channels: format.channels,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (sender, receiver) = mpsc::sync_channel(STREAM_QUEUE_BLOCKS);
        let flush = Arc::clone(&self.flush);
        let stream_error = Arc::clone(&self.stream_error);
        *stream_error.lock().unwrap_or_else(PoisonError::into_inner) = None;

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &config, receiver, flush, stream_error)?
            }
            cpal::SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &config, receiver, flush, stream_error)?
            }
            cpal::SampleFormat::I32 => {
                Self::build_stream::<i32>(&device, &config, receiver, flush, stream_error)?
            }
            cpal::SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &config, receiver, flush, stream_error)?
            }
            other => {
                return Err(DeviceError::UnsupportedFormat {
                    format: format!("device sample format {:?}", other),
                })
            }
        };

        stream
            .play()
            .map_err(|e| DeviceError::Stream(format!("Failed to start audio stream: {}", e)))?;

        info!(
            "Opened output '{}' at {} ({:?} device samples)",
            self.label,
            format.format_description(),
            supported.sample_format()
        );
        self.stream = Some(stream);
        self.sender = Some(sender);
        self.format = Some(*format);
        Ok(())
    }

    fn play(&mut self, pcm: &[u8]) -> Result<(), DeviceError> {
        if let Some(message) = self
            .stream_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(DeviceError::Stream(message));
        }

        let (Some(sender), Some(format)) = (self.sender.as_ref(), self.format) else {
            return Err(DeviceError::Write("device is not open".to_string()));
        };
        let samples = pcm::to_f32(format.sample_format, pcm);
        sender
            .send(samples)
            .map_err(|_| DeviceError::Write("output stream has stopped".to_string()))
    }

    fn drop_buffered(&mut self) {
        self.flush.store(true, Ordering::Release);
    }

    fn close(&mut self) {
        self.sender = None;
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            debug!("Closed output '{}'", self.label);
        }
        self.format = None;
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.close();
    }
}
