//! Microphone and speaker stages, plus their cpal backends.

pub mod capture;
pub mod device;
pub mod playback;
pub mod sink;
pub mod source;

pub use device::{AudioInputDevice, AudioOutputDevice};
pub use sink::{AudioOutputSink, PlaybackQueue};
pub use source::AudioInputSource;
