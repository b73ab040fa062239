//! Phrase detection for one listen call.
//!
//! Calibrate on ambient noise, wait for speech to start (bounded by the listen
//! timeout), then record until a pause or the phrase length cap. Time is counted in
//! samples, so the detector behaves the same on live and scripted audio.

use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Floor for the speech threshold, in RMS units of normalized samples.
pub const MIN_SPEECH_THRESHOLD: f32 = 0.01;

/// Speech must be this many times louder than the calibrated ambient level.
pub const AMBIENT_MULTIPLIER: f32 = 1.5;

/// Timing of one listen call.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenSettings {
    /// Ambient noise calibration window (default: 500ms)
    pub calibration_ms: u64,
    /// How long to wait for speech to start (default: 5s)
    pub listen_timeout_secs: u64,
    /// Silence that ends a phrase (default: 800ms)
    pub pause_ms: u64,
    /// Hard cap on phrase length (default: 30s)
    pub max_phrase_secs: u64,
}

impl Default for ListenSettings {
    fn default() -> Self {
        Self {
            calibration_ms: 500,
            listen_timeout_secs: 5,
            pause_ms: 800,
            max_phrase_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PhraseState {
    Calibrating,
    Idle,
    Speaking,
    SilenceDetected,
}

/// Result of feeding one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum PhraseStatus {
    /// Keep feeding audio.
    Listening,
    /// No speech started within the listen timeout.
    TimedOut,
    /// A phrase ended; these are its samples.
    Complete(Vec<f32>),
}

pub struct PhraseDetector {
    state: PhraseState,
    calibration_samples: usize,
    timeout_samples: usize,
    pause_samples: usize,
    max_samples: usize,

    calibrated: usize,
    ambient_energy: f64,
    threshold: f32,
    waited: usize,
    silence: usize,
    buffer: Vec<f32>,
}

fn samples_for(duration: Duration, sample_rate: u32) -> usize {
    (duration.as_secs_f64() * f64::from(sample_rate)).round() as usize
}

/// Root-mean-square level of a chunk.
pub fn rms(chunk: &[f32]) -> f32 {
    if chunk.is_empty() {
        return 0.0;
    }
    let sum: f32 = chunk.iter().map(|s| s * s).sum();
    (sum / chunk.len() as f32).sqrt()
}

impl PhraseDetector {
    pub fn new(settings: &ListenSettings, sample_rate: u32) -> Self {
        Self {
            state: PhraseState::Calibrating,
            calibration_samples: samples_for(Duration::from_millis(settings.calibration_ms), sample_rate),
            timeout_samples: samples_for(Duration::from_secs(settings.listen_timeout_secs), sample_rate),
            pause_samples: samples_for(Duration::from_millis(settings.pause_ms), sample_rate),
            max_samples: samples_for(Duration::from_secs(settings.max_phrase_secs), sample_rate),
            calibrated: 0,
            ambient_energy: 0.0,
            threshold: MIN_SPEECH_THRESHOLD,
            waited: 0,
            silence: 0,
            buffer: Vec::new(),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Feed one chunk of mono samples.
    pub fn push(&mut self, chunk: &[f32]) -> PhraseStatus {
        if chunk.is_empty() {
            return PhraseStatus::Listening;
        }
        let level = rms(chunk);

        match self.state {
            PhraseState::Calibrating => {
                self.ambient_energy += f64::from(level * level) * chunk.len() as f64;
                self.calibrated += chunk.len();
                if self.calibrated >= self.calibration_samples {
                    let ambient = (self.ambient_energy / self.calibrated as f64).sqrt() as f32;
                    self.threshold = (ambient * AMBIENT_MULTIPLIER).max(MIN_SPEECH_THRESHOLD);
                    debug!(target: "vitals::voice", ambient, threshold = self.threshold, "calibrated");
                    self.state = PhraseState::Idle;
                }
            }
            PhraseState::Idle => {
                if level > self.threshold {
                    debug!(target: "vitals::voice", "speech started");
                    self.state = PhraseState::Speaking;
                    self.buffer.extend_from_slice(chunk);
                } else {
                    self.waited += chunk.len();
                    if self.waited >= self.timeout_samples {
                        return PhraseStatus::TimedOut;
                    }
                }
            }
            PhraseState::Speaking | PhraseState::SilenceDetected => {
                self.buffer.extend_from_slice(chunk);
                if level > self.threshold {
                    self.state = PhraseState::Speaking;
                    self.silence = 0;
                } else {
                    self.state = PhraseState::SilenceDetected;
                    self.silence += chunk.len();
                    if self.silence >= self.pause_samples {
                        debug!(target: "vitals::voice", samples = self.buffer.len(), "pause reached, phrase complete");
                        return PhraseStatus::Complete(std::mem::take(&mut self.buffer));
                    }
                }
                if self.buffer.len() >= self.max_samples {
                    debug!(target: "vitals::voice", "max phrase length reached");
                    return PhraseStatus::Complete(std::mem::take(&mut self.buffer));
                }
            }
        }
        PhraseStatus::Listening
    }

    /// Whether speech has started; used when the input ends before a pause.
    pub fn in_phrase(&self) -> bool {
        matches!(self.state, PhraseState::Speaking | PhraseState::SilenceDetected)
    }

    /// Samples recorded so far.
    pub fn finish(self) -> Vec<f32> {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 1000;

    fn settings() -> ListenSettings {
        ListenSettings {
            calibration_ms: 100,
            listen_timeout_secs: 1,
            pause_ms: 200,
            max_phrase_secs: 2,
        }
    }

    fn feed(det: &mut PhraseDetector, level: f32, chunks: usize) -> Option<PhraseStatus> {
        for _ in 0..chunks {
            match det.push(&[level; 50]) {
                PhraseStatus::Listening => {}
                done => return Some(done),
            }
        }
        None
    }

    #[test]
    fn silence_times_out() {
        let mut det = PhraseDetector::new(&settings(), RATE);
        assert_eq!(feed(&mut det, 0.0, 2), None);
        assert_eq!(det.threshold(), MIN_SPEECH_THRESHOLD);
        // 1s at 1kHz = 20 chunks of 50
        assert_eq!(feed(&mut det, 0.001, 19), None);
        assert_eq!(feed(&mut det, 0.001, 1), Some(PhraseStatus::TimedOut));
    }

    #[test]
    fn phrase_ends_after_pause() {
        let mut det = PhraseDetector::new(&settings(), RATE);
        feed(&mut det, 0.02, 2);
        assert!((det.threshold() - 0.03).abs() < 1e-6);

        assert_eq!(feed(&mut det, 0.5, 4), None);
        assert!(det.in_phrase());
        assert_eq!(feed(&mut det, 0.02, 3), None);
        match feed(&mut det, 0.02, 1) {
            Some(PhraseStatus::Complete(samples)) => assert_eq!(samples.len(), 8 * 50),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn resumed_speech_resets_pause() {
        let mut det = PhraseDetector::new(&settings(), RATE);
        feed(&mut det, 0.0, 2);
        feed(&mut det, 0.5, 1);
        assert_eq!(feed(&mut det, 0.0, 3), None);
        assert_eq!(feed(&mut det, 0.5, 1), None);
        assert_eq!(feed(&mut det, 0.0, 3), None);
    }

    #[test]
    fn long_phrase_is_capped() {
        let mut det = PhraseDetector::new(&settings(), RATE);
        feed(&mut det, 0.0, 2);
        match feed(&mut det, 0.5, 100) {
            Some(PhraseStatus::Complete(samples)) => assert_eq!(samples.len(), 2000),
            other => panic!("unexpected {other:?}"),
        }
    }
}
