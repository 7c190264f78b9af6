//! End-of-utterance detection using energy analysis.
//!
//! The detector looks at a short snapshot of recent audio and reports speech
//! once the trailing window has gone quiet compared to the snapshot as a
//! whole, i.e. the speaker has just stopped talking.

use crate::config::VadConfig;
use tracing::{debug, info};

/// Result of inspecting one snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadReport {
    /// The speaker just finished an utterance.
    pub speech: bool,
    /// Mean absolute energy of the whole snapshot.
    pub energy_all: f32,
    /// Mean absolute energy of the trailing window.
    pub energy_last: f32,
}

/// Energy-ratio voice activity detector.
#[derive(Debug, Clone)]
pub struct VoiceActivityDetector {
    sample_rate: u32,
    window_ms: u32,
    threshold: f32,
    freq_threshold: f32,
    log_energy: bool,
}

impl VoiceActivityDetector {
    pub fn new(config: &VadConfig, sample_rate: u32) -> Self {
        info!(
            "VAD initialized: threshold={}, cutoff={}Hz, window={}ms",
            config.threshold, config.freq_threshold, config.window_ms
        );
        Self {
            sample_rate,
            window_ms: config.window_ms,
            threshold: config.threshold,
            freq_threshold: config.freq_threshold,
            log_energy: config.log_energy,
        }
    }

    /// Whether the snapshot ends an utterance. Filters `samples` in place.
    pub fn detect(&self, samples: &mut [f32]) -> bool {
        self.inspect(samples).is_some_and(|r| r.speech)
    }

    /// Inspect a snapshot, filtering `samples` in place.
    ///
    /// Returns `None` when the snapshot is not longer than the trailing window.
    pub fn inspect(&self, samples: &mut [f32]) -> Option<VadReport> {
        let n_samples = samples.len();
        let n_samples_last = (self.sample_rate as usize * self.window_ms as usize) / 1000;
        if n_samples_last >= n_samples {
            return None;
        }

        if self.freq_threshold > 0.0 {
            high_pass_filter(samples, self.freq_threshold, self.sample_rate as f32);
        }

        let energy_all = mean_abs(samples);
        let energy_last = mean_abs(&samples[n_samples - n_samples_last..]);

        if self.log_energy {
            info!(energy_all, energy_last, threshold = self.threshold, "vad energy");
        } else {
            debug!(energy_all, energy_last, threshold = self.threshold, "vad energy");
        }

        let speech = energy_all > f32::EPSILON && energy_last <= self.threshold * energy_all;
        Some(VadReport {
            speech,
            energy_all,
            energy_last,
        })
    }
}

/// First-order RC high-pass filter applied in place, `cutoff` in Hz.
pub fn high_pass_filter(data: &mut [f32], cutoff: f32, sample_rate: f32) {
    if data.is_empty() {
        return;
    }
    let rc = 1.0 / (2.0 * std::f32::consts::PI * cutoff);
    let dt = 1.0 / sample_rate;
    let alpha = rc / (rc + dt);

    let mut y = data[0];
    let mut prev = data[0];
    for x in data.iter_mut().skip(1) {
        let current = *x;
        y = alpha * (y + current - prev);
        prev = current;
        *x = y;
    }
}

fn mean_abs(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32
}
