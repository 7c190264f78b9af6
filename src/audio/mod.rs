//! Audio capture into a shared ring buffer.

pub mod capture;
pub mod ring;

pub use capture::CpalCapture;
pub use ring::AudioRing;

/// Recent microphone audio, as seen by the turn controller.
pub trait AudioSource {
    /// The most recent `ms` of mono audio (less if fewer samples are buffered).
    fn snapshot(&self, ms: u32) -> Vec<f32>;

    /// Drop everything buffered so far.
    fn clear(&self);

    fn sample_rate(&self) -> u32;
}
