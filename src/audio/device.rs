//! Audio device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};

use crate::config::AudioConfig;
use crate::error::DeviceError;

/// Summary of one host audio device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// Wrapper around a cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self { inner: device, name }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }
}

/// List the input and output devices of the default host
pub fn list_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<DeviceInfo> = Vec::new();

    let default_input = host.default_input_device().and_then(|d| d.name().ok());
    let default_output = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(inputs) = host.input_devices() {
        for device in inputs {
            let Ok(name) = device.name() else { continue };
            let (sample_rates, channels) = capabilities(&device, true);
            devices.push(DeviceInfo {
                is_default: default_input.as_ref() == Some(&name),
                name,
                is_input: true,
                is_output: false,
                sample_rates,
                channels,
            });
        }
    }

    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            let Ok(name) = device.name() else { continue };
            let is_default = default_output.as_ref() == Some(&name);

            if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                existing.is_output = true;
                existing.is_default |= is_default;
                continue;
            }

            let (sample_rates, channels) = capabilities(&device, false);
            devices.push(DeviceInfo {
                name,
                is_input: false,
                is_output: true,
                is_default,
                sample_rates,
                channels,
            });
        }
    }

    devices
}

fn capabilities(device: &cpal::Device, input: bool) -> (Vec<u32>, Vec<u16>) {
    let configs: Vec<cpal::SupportedStreamConfigRange> = if input {
        device
            .supported_input_configs()
            .map(|c| c.collect())
            .unwrap_or_default()
    } else {
        device
            .supported_output_configs()
            .map(|c| c.collect())
            .unwrap_or_default()
    };

    let mut rates = Vec::new();
    let mut channels = Vec::new();
    for config in &configs {
        for rate in [16000u32, 44100, 48000, 96000] {
            let sample_rate = cpal::SampleRate(rate);
            if sample_rate >= config.min_sample_rate()
                && sample_rate <= config.max_sample_rate()
                && !rates.contains(&rate)
            {
                rates.push(rate);
            }
        }
        if !channels.contains(&config.channels()) {
            channels.push(config.channels());
        }
    }

    rates.sort_unstable();
    channels.sort_unstable();
    (rates, channels)
}

/// Whether any range offers f32 samples at `sample_rate` with `channels`
pub fn supports_f32(
    ranges: &[cpal::SupportedStreamConfigRange],
    sample_rate: u32,
    channels: u16,
) -> bool {
    let rate = cpal::SampleRate(sample_rate);
    ranges.iter().any(|range| {
        range.sample_format() == cpal::SampleFormat::F32
            && range.channels() == channels
            && range.min_sample_rate() <= rate
            && rate <= range.max_sample_rate()
    })
}

/// Fail with `UnsupportedFormat` unless the device can run the configured
/// f32 stream
pub fn require_f32(
    device: &AudioDevice,
    input: bool,
    audio: &AudioConfig,
) -> Result<(), DeviceError> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = if input {
        device
            .inner
            .supported_input_configs()
            .map_err(|e| DeviceError::UnsupportedFormat(e.to_string()))?
            .collect()
    } else {
        device
            .inner
            .supported_output_configs()
            .map_err(|e| DeviceError::UnsupportedFormat(e.to_string()))?
            .collect()
    };

    if supports_f32(&ranges, audio.sample_rate, audio.channels) {
        Ok(())
    } else {
        Err(DeviceError::UnsupportedFormat(format!(
            "{} has no f32 stream at {} Hz with {} channel(s)",
            device.name, audio.sample_rate, audio.channels
        )))
    }
}

/// Input device by exact name, or the default input when `name` is `None`
pub fn input_device(name: Option<&str>) -> Result<AudioDevice, DeviceError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .map(AudioDevice::from_cpal)
            .ok_or_else(|| DeviceError::DeviceNotFound("no default input device".into())),
        Some(name) => {
            let mut devices = host
                .input_devices()
                .map_err(|e| DeviceError::DeviceNotFound(e.to_string()))?;
            devices
                .find(|d| d.name().is_ok_and(|n| n == name))
                .map(AudioDevice::from_cpal)
                .ok_or_else(|| DeviceError::DeviceNotFound(name.to_string()))
        }
    }
}

/// Output device by exact name, or the default output when `name` is `None`
pub fn output_device(name: Option<&str>) -> Result<AudioDevice, DeviceError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .map(AudioDevice::from_cpal)
            .ok_or_else(|| DeviceError::DeviceNotFound("no default output device".into())),
        Some(name) => {
            let mut devices = host
                .output_devices()
                .map_err(|e| DeviceError::DeviceNotFound(e.to_string()))?;
            devices
                .find(|d| d.name().is_ok_and(|n| n == name))
                .map(AudioDevice::from_cpal)
                .ok_or_else(|| DeviceError::DeviceNotFound(name.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::{SampleFormat, SampleRate, SupportedBufferSize, SupportedStreamConfigRange};

    fn range(channels: u16, min: u32, max: u32, format: SampleFormat) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn test_supports_f32_matches_rate_and_channels() {
        let ranges = [range(2, 8000, 48000, SampleFormat::F32)];
        assert!(supports_f32(&ranges, 48000, 2));
        assert!(supports_f32(&ranges, 8000, 2));
        assert!(!supports_f32(&ranges, 96000, 2));
        assert!(!supports_f32(&ranges, 48000, 1));
    }

    #[test]
    fn test_supports_f32_rejects_integer_only_devices() {
        let ranges = [
            range(1, 44100, 48000, SampleFormat::I16),
            range(2, 44100, 48000, SampleFormat::I16),
        ];
        assert!(!supports_f32(&ranges, 48000, 1));
        assert!(!supports_f32(&[], 48000, 1));
    }
}
