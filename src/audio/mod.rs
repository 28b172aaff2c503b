//! Hardware audio endpoints
//!
//! The cpal-backed microphone and speaker are only built with the `devices`
//! feature; the sample buffers they share are always available.

pub mod buffer;
#[cfg(feature = "devices")]
pub mod capture;
#[cfg(feature = "devices")]
pub mod device;
#[cfg(feature = "devices")]
pub mod playback;

pub use buffer::{ChunkAssembler, SampleRing};
#[cfg(feature = "devices")]
pub use capture::CpalMicrophone;
#[cfg(feature = "devices")]
pub use device::{input_device, list_devices, output_device, AudioDevice, DeviceInfo};
#[cfg(feature = "devices")]
pub use playback::CpalSpeaker;
