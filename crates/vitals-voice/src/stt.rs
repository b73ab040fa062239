//! **Speech-to-Text (STT)**: turn a recorded phrase into text.
//!
//! An empty transcript means the audio was not intelligible; an `Err` means the
//! recognition service itself failed. The pipeline maps both to placeholders.

use crate::audio::AudioTurn;
use crate::error::{VoiceError, VoiceResult};
use std::time::Duration;

pub trait SttBackend: Send + Sync {
    /// Transcribe one phrase. Returns an empty string when nothing was understood.
    fn transcribe(&self, turn: &AudioTurn) -> VoiceResult<String>;
}

/// Encode f32 PCM (mono) to 16-bit WAV bytes for API upload.
pub fn pcm_f32_to_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut buf = Vec::with_capacity(44 + data_len as usize);
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    buf.extend_from_slice(&2u16.to_le_bytes());
    buf.extend_from_slice(&16u16.to_le_bytes());
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    for &s in samples {
        let i = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        buf.extend_from_slice(&i.to_le_bytes());
    }
    buf
}

/// Fixed-answer STT for tests and for running without a recognition service.
/// Without a canned response every call fails, so listeners get a recognition error.
#[derive(Debug, Default)]
pub struct PlaceholderStt {
    pub response: Option<String>,
}

impl PlaceholderStt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(s: impl Into<String>) -> Self {
        Self {
            response: Some(s.into()),
        }
    }
}

impl SttBackend for PlaceholderStt {
    fn transcribe(&self, _turn: &AudioTurn) -> VoiceResult<String> {
        self.response
            .clone()
            .ok_or_else(|| VoiceError::Config("no speech recognition service configured".to_string()))
    }
}

/// OpenAI-compatible transcription API (OpenAI Whisper, OpenRouter, etc.).
#[derive(Debug, Clone)]
pub struct OpenRouterStt {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    pub api_key: String,
    /// whisper-1, gpt-4o-transcribe, ...
    pub model: String,
    client: reqwest::blocking::Client,
}

impl OpenRouterStt {
    /// Build from environment: STT_API_URL, STT_API_KEY (or OPENROUTER_API_KEY), STT_MODEL.
    pub fn from_env() -> VoiceResult<Self> {
        let base_url = std::env::var("STT_API_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("STT_API_KEY")
            .or_else(|_| std::env::var("OPENROUTER_API_KEY"))
            .map_err(|_| VoiceError::Config("STT requires STT_API_KEY or OPENROUTER_API_KEY".to_string()))?;
        let model = std::env::var("STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        Self::new(base_url, api_key, model)
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> VoiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }
}

impl SttBackend for OpenRouterStt {
    fn transcribe(&self, turn: &AudioTurn) -> VoiceResult<String> {
        if turn.samples.is_empty() {
            return Ok(String::new());
        }
        let wav = pcm_f32_to_wav(&turn.samples, turn.sample_rate);
        let url = format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'));
        let part = reqwest::blocking::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        let form = reqwest::blocking::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(VoiceError::Stt(format!("STT API error {}: {}", status, body)));
        }
        let json: serde_json::Value = res.json().map_err(|e| VoiceError::Stt(e.to_string()))?;
        Ok(json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string())
    }
}

/// OpenRouterStt when a key is configured, otherwise the placeholder.
pub fn create_stt() -> Box<dyn SttBackend> {
    match OpenRouterStt::from_env() {
        Ok(stt) => Box::new(stt),
        Err(e) => {
            tracing::warn!(target: "vitals::voice", error = %e, "speech recognition disabled");
            Box::new(PlaceholderStt::new())
        }
    }
}
