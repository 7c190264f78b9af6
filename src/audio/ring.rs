//! Fixed-length ring buffer shared between the capture callback and the
//! turn controller.

use super::AudioSource;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

#[derive(Debug)]
struct RingState {
    samples: Vec<f32>,
    /// Next write index.
    pos: usize,
    /// Number of valid samples, at most `samples.len()`.
    len: usize,
}

/// Cloneable handle to a mono sample ring.
#[derive(Debug, Clone)]
pub struct AudioRing {
    state: Arc<Mutex<RingState>>,
    sample_rate: u32,
}

impl AudioRing {
    /// Ring holding `buffer_ms` of audio at `sample_rate`.
    pub fn new(buffer_ms: u32, sample_rate: u32) -> Self {
        let capacity = ms_to_samples(buffer_ms, sample_rate).max(1);
        Self {
            state: Arc::new(Mutex::new(RingState {
                samples: vec![0.0; capacity],
                pos: 0,
                len: 0,
            })),
            sample_rate,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RingState> {
        // A panic while holding the lock leaves plain sample data behind.
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("audio ring lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Append samples, overwriting the oldest when full.
    pub fn push(&self, data: &[f32]) {
        let mut state = self.lock();
        let capacity = state.samples.len();
        let data = if data.len() > capacity {
            &data[data.len() - capacity..]
        } else {
            data
        };

        let pos = state.pos;
        let first = data.len().min(capacity - pos);
        state.samples[pos..pos + first].copy_from_slice(&data[..first]);
        let second = data.len() - first;
        state.samples[..second].copy_from_slice(&data[first..]);

        state.pos = (pos + data.len()) % capacity;
        state.len = (state.len + data.len()).min(capacity);
    }

    /// Number of buffered samples.
    pub fn len(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AudioSource for AudioRing {
    fn snapshot(&self, ms: u32) -> Vec<f32> {
        let state = self.lock();
        let capacity = state.samples.len();
        let n = ms_to_samples(ms, self.sample_rate).min(state.len);

        let start = (state.pos + capacity - n) % capacity;
        let mut out = Vec::with_capacity(n);
        let first = n.min(capacity - start);
        out.extend_from_slice(&state.samples[start..start + first]);
        out.extend_from_slice(&state.samples[..n - first]);
        out
    }

    fn clear(&self) {
        let mut state = self.lock();
        state.pos = 0;
        state.len = 0;
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

fn ms_to_samples(ms: u32, sample_rate: u32) -> usize {
    (u64::from(ms) * u64::from(sample_rate) / 1000) as usize
}
