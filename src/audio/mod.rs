//! Audio capture, windowing, and rate conversion.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod resample;
pub mod source;
pub mod wav;
pub mod window;

#[cfg(feature = "cpal-audio")]
pub use capture::{CpalAudioSource, list_devices};
pub use resample::{mix_to_mono, resample};
pub use source::{AudioSource, MockAudioSource};
pub use wav::WavFileSource;
pub use window::WindowAssembler;
