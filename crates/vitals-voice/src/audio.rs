//! Microphone capture using CPAL
//!
//! The input stream is built and dropped inside `record_phrase`, on the calling
//! thread, so nothing holds the device between listen calls.

use crate::error::{VoiceError, VoiceResult};
use crate::phrase::{ListenSettings, PhraseDetector, PhraseStatus};
use chrono::{DateTime, Utc};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A recorded phrase: mono PCM from speech start until the pause.
#[derive(Debug, Clone)]
pub struct AudioTurn {
    /// PCM samples (f32, -1.0..1.0)
    pub samples: Vec<f32>,
    /// When recording ended
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
    pub sample_rate: u32,
}

impl AudioTurn {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        let duration = Duration::from_secs_f64(samples.len() as f64 / f64::from(sample_rate.max(1)));
        Self {
            samples,
            timestamp: Utc::now(),
            duration,
            sample_rate,
        }
    }
}

/// A source of spoken phrases. Blocking; callers hold the microphone guard while it runs.
pub trait Microphone: Send {
    /// Calibrate, wait for speech and record one phrase. `Ok(None)` when nobody spoke
    /// before the listen timeout.
    fn record_phrase(&mut self, settings: &ListenSettings) -> VoiceResult<Option<AudioTurn>>;
}

/// The default input device of the default host.
#[derive(Debug, Default)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    pub fn new() -> Self {
        Self
    }

    /// List available input devices
    pub fn list_input_devices() -> VoiceResult<Vec<String>> {
        let devices = cpal::default_host().input_devices()?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }
}

/// Downmix interleaved frames to mono.
fn to_mono<T: Copy>(data: &[T], channels: usize, convert: impl Fn(T) -> f32) -> Vec<f32> {
    let channels = channels.max(1);
    data.chunks(channels)
        .map(|frame| frame.iter().map(|&s| convert(s)).sum::<f32>() / frame.len() as f32)
        .collect()
}

impl Microphone for CpalMicrophone {
    fn record_phrase(&mut self, settings: &ListenSettings) -> VoiceResult<Option<AudioTurn>> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| VoiceError::AudioDevice("No input device available".to_string()))?;
        let supported = device.default_input_config()?;
        let format = supported.sample_format();
        let config: StreamConfig = supported.into();
        let sample_rate = config.sample_rate.0;
        let channels = usize::from(config.channels);
        info!(
            target: "vitals::voice",
            device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            sample_rate,
            channels,
            "listening"
        );

        let (tx, rx) = mpsc::channel::<Vec<f32>>();
        let on_error = |err: cpal::StreamError| warn!(target: "vitals::voice", "audio stream error: {}", err);
        let stream = match format {
            SampleFormat::F32 => {
                let tx = tx.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let _ = tx.send(to_mono(data, channels, |s| s));
                    },
                    on_error,
                    None,
                )?
            }
            SampleFormat::I16 => {
                let tx = tx.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let _ = tx.send(to_mono(data, channels, |s| f32::from(s) / 32768.0));
                    },
                    on_error,
                    None,
                )?
            }
            SampleFormat::U16 => {
                let tx = tx.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[u16], _: &cpal::InputCallbackInfo| {
                        let _ = tx.send(to_mono(data, channels, |s| (f32::from(s) - 32768.0) / 32768.0));
                    },
                    on_error,
                    None,
                )?
            }
            other => {
                return Err(VoiceError::AudioDevice(format!("unsupported sample format {other:?}")));
            }
        };
        drop(tx);
        stream.play()?;

        let mut detector = PhraseDetector::new(settings, sample_rate);
        let deadline = Instant::now()
            + Duration::from_millis(settings.calibration_ms)
            + Duration::from_secs(settings.listen_timeout_secs + settings.max_phrase_secs + 1);
        let result = loop {
            let chunk = match rx.recv_timeout(Duration::from_millis(250)) {
                Ok(chunk) => chunk,
                Err(mpsc::RecvTimeoutError::Timeout) if Instant::now() < deadline => continue,
                Err(_) => {
                    break if detector.in_phrase() {
                        Ok(Some(AudioTurn::new(detector.finish(), sample_rate)))
                    } else {
                        Err(VoiceError::AudioStream("input stream stalled".to_string()))
                    };
                }
            };
            match detector.push(&chunk) {
                PhraseStatus::Listening => {}
                PhraseStatus::TimedOut => break Ok(None),
                PhraseStatus::Complete(samples) => break Ok(Some(AudioTurn::new(samples, sample_rate))),
            }
        };
        drop(stream);
        debug!(target: "vitals::voice", "input stream closed");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmixes_stereo() {
        let mono = to_mono(&[0.2f32, 0.4, -1.0, 1.0], 2, |s| s);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert_eq!(mono[1], 0.0);
    }

    #[test]
    fn turn_duration_follows_rate() {
        let turn = AudioTurn::new(vec![0.0; 8000], 16000);
        assert_eq!(turn.duration, Duration::from_millis(500));
    }

    #[test]
    #[ignore = "needs a microphone"]
    fn lists_input_devices() {
        let devices = CpalMicrophone::list_input_devices().unwrap();
        assert!(!devices.is_empty());
    }
}
