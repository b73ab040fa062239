//! **VoiceOutput**: TTS synthesis and playback.
//!
//! `rodio::OutputStream` is not `Send`, so [`RodioSynthesizer`] opens the output
//! device per utterance on the thread that plays it and waits for the sink to drain.

use crate::error::{VoiceError, VoiceResult};
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Turns text into audio bytes (WAV/MP3).
pub trait TtsBackend: Send + Sync {
    /// Return an empty vec to skip playback.
    fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>>;
}

/// Silent TTS for running without a speech service.
#[derive(Debug, Default)]
pub struct PlaceholderTts;

impl TtsBackend for PlaceholderTts {
    fn synthesize(&self, _text: &str) -> VoiceResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// OpenAI-compatible speech API. `TTS_API_URL`, `TTS_API_KEY`, `TTS_MODEL`, `TTS_VOICE`.
#[derive(Debug, Clone)]
pub struct OpenRouterTts {
    pub base_url: String,
    pub api_key: String,
    /// tts-1 (fast) or tts-1-hd
    pub model: String,
    pub voice: String,
    client: reqwest::blocking::Client,
}

impl OpenRouterTts {
    pub fn from_env() -> VoiceResult<Self> {
        let base_url = std::env::var("TTS_API_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("TTS_API_KEY")
            .or_else(|_| std::env::var("OPENROUTER_API_KEY"))
            .map_err(|_| VoiceError::Config("TTS requires TTS_API_KEY or OPENROUTER_API_KEY".to_string()))?;
        let model = std::env::var("TTS_MODEL").unwrap_or_else(|_| "tts-1".to_string());
        let voice = std::env::var("TTS_VOICE").unwrap_or_else(|_| "nova".to_string());
        Self::new(base_url, api_key, model, voice)
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
    ) -> VoiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            voice: voice.into(),
            client,
        })
    }
}

impl TtsBackend for OpenRouterTts {
    fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/audio/speech", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
        });
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(VoiceError::Tts(format!("TTS API error {}: {}", status, body)));
        }
        let bytes = res.bytes().map_err(|e| VoiceError::Tts(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// OpenRouterTts when a key is configured, otherwise silence.
pub fn create_tts() -> Box<dyn TtsBackend> {
    match OpenRouterTts::from_env() {
        Ok(tts) => Box::new(tts),
        Err(e) => {
            warn!(target: "vitals::voice", error = %e, "speech output disabled");
            Box::new(PlaceholderTts)
        }
    }
}

/// Playback on the default output device.
pub struct VoiceOutput {
    _stream: OutputStream,
    _stream_handle: OutputStreamHandle,
    sink: Sink,
}

impl VoiceOutput {
    pub fn new() -> VoiceResult<Self> {
        let (stream, stream_handle) =
            OutputStream::try_default().map_err(|e| VoiceError::Playback(e.to_string()))?;
        let sink = Sink::try_new(&stream_handle).map_err(|e| VoiceError::Playback(e.to_string()))?;
        Ok(Self {
            _stream: stream,
            _stream_handle: stream_handle,
            sink,
        })
    }

    /// Queue pre-encoded audio bytes (WAV/MP3).
    pub fn play_bytes(&self, bytes: &[u8]) -> VoiceResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let source = rodio::Decoder::new(Cursor::new(bytes.to_vec()))
            .map_err(|e| VoiceError::Playback(format!("Decode failed: {}", e)))?;
        self.sink.append(source.convert_samples::<f32>());
        Ok(())
    }

    /// Block until all queued audio has played.
    pub fn sleep_until_end(&self) {
        self.sink.sleep_until_end();
    }
}

/// Speaks text to completion. Blocking; callers hold the synthesizer guard while it runs.
pub trait Synthesizer: Send {
    fn speak(&mut self, text: &str) -> VoiceResult<()>;
}

pub struct RodioSynthesizer {
    tts: Box<dyn TtsBackend>,
}

impl RodioSynthesizer {
    pub fn new(tts: Box<dyn TtsBackend>) -> Self {
        Self { tts }
    }
}

impl Synthesizer for RodioSynthesizer {
    fn speak(&mut self, text: &str) -> VoiceResult<()> {
        let audio = self.tts.synthesize(text)?;
        if audio.is_empty() {
            debug!(target: "vitals::voice", "nothing to play");
            return Ok(());
        }
        let output = VoiceOutput::new()?;
        output.play_bytes(&audio)?;
        output.sleep_until_end();
        info!(target: "vitals::voice", chars = text.len(), "reply spoken");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_tts_returns_empty() {
        assert!(PlaceholderTts.synthesize("hello").unwrap().is_empty());
    }

    #[test]
    fn silent_backend_never_opens_output() {
        let mut synth = RodioSynthesizer::new(Box::new(PlaceholderTts));
        synth.speak("no device needed").unwrap();
    }
}
