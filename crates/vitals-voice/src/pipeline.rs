//! The listen → reply → speak pipeline.
//!
//! The microphone and the synthesizer each sit behind their own async mutex. A guard
//! is taken for exactly one blocking hardware call and moved onto the blocking pool
//! with it, so a second caller waits for the device instead of failing or interleaving.

use crate::audio::{CpalMicrophone, Microphone};
use crate::completion::{CompletionClient, CompletionError, CompletionSettings};
use crate::error::VoiceError;
use crate::phrase::ListenSettings;
use crate::stt::{create_stt, SttBackend};
use crate::voice_output::{create_tts, RodioSynthesizer, Synthesizer};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outcome of one listen call. Anything but `Heard` is a placeholder callers treat
/// as "no usable text".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Utterance {
    Heard(String),
    NoSpeech,
    Unintelligible,
    RecognitionFailed(String),
    MicrophoneUnavailable(String),
}

impl Utterance {
    pub fn is_heard(&self) -> bool {
        matches!(self, Utterance::Heard(_))
    }

    pub fn text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Utterance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Utterance::Heard(text) => f.write_str(text),
            Utterance::NoSpeech => f.write_str("No speech detected"),
            Utterance::Unintelligible => f.write_str("Could not understand audio"),
            Utterance::RecognitionFailed(msg) => write!(f, "Recognition error: {msg}"),
            Utterance::MicrophoneUnavailable(msg) => write!(f, "Microphone unavailable: {msg}"),
        }
    }
}

/// `voice.*` settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    pub calibration_ms: u64,
    pub listen_timeout_secs: u64,
    pub pause_ms: u64,
    pub max_phrase_secs: u64,
    pub completion_url: String,
    pub completion_model: String,
    pub completion_timeout_secs: u64,
    pub system_prompt: String,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        let listen = ListenSettings::default();
        let completion = CompletionSettings::default();
        Self {
            calibration_ms: listen.calibration_ms,
            listen_timeout_secs: listen.listen_timeout_secs,
            pause_ms: listen.pause_ms,
            max_phrase_secs: listen.max_phrase_secs,
            completion_url: completion.completion_url,
            completion_model: completion.completion_model,
            completion_timeout_secs: completion.completion_timeout_secs,
            system_prompt: completion.system_prompt,
        }
    }
}

impl VoiceSettings {
    pub fn listen(&self) -> ListenSettings {
        ListenSettings {
            calibration_ms: self.calibration_ms,
            listen_timeout_secs: self.listen_timeout_secs,
            pause_ms: self.pause_ms,
            max_phrase_secs: self.max_phrase_secs,
        }
    }

    pub fn completion(&self) -> CompletionSettings {
        CompletionSettings {
            completion_url: self.completion_url.clone(),
            completion_model: self.completion_model.clone(),
            completion_timeout_secs: self.completion_timeout_secs,
            system_prompt: self.system_prompt.clone(),
            ..CompletionSettings::default()
        }
    }
}

#[derive(Clone)]
pub struct VoicePipeline {
    microphone: Arc<Mutex<Box<dyn Microphone>>>,
    synthesizer: Arc<Mutex<Box<dyn Synthesizer>>>,
    stt: Arc<dyn SttBackend>,
    completion: Arc<CompletionClient>,
    listen: ListenSettings,
}

impl VoicePipeline {
    pub fn new(
        microphone: Box<dyn Microphone>,
        stt: Box<dyn SttBackend>,
        synthesizer: Box<dyn Synthesizer>,
        completion: CompletionClient,
        listen: ListenSettings,
    ) -> Self {
        Self {
            microphone: Arc::new(Mutex::new(microphone)),
            synthesizer: Arc::new(Mutex::new(synthesizer)),
            stt: Arc::from(stt),
            completion: Arc::new(completion),
            listen,
        }
    }

    /// Default microphone and speakers; STT/TTS/completion keys from the environment.
    pub fn from_settings(settings: &VoiceSettings) -> Result<Self, CompletionError> {
        let completion = CompletionClient::from_env(settings.completion())?;
        Ok(Self::new(
            Box::new(CpalMicrophone::new()),
            create_stt(),
            Box::new(RodioSynthesizer::new(create_tts())),
            completion,
            settings.listen(),
        ))
    }

    /// Record one phrase and transcribe it. Never fails; problems become placeholders.
    pub async fn listen(&self) -> Utterance {
        let guard = Arc::clone(&self.microphone).lock_owned().await;
        let settings = self.listen.clone();
        let recorded = tokio::task::spawn_blocking(move || {
            let mut mic = guard;
            mic.record_phrase(&settings)
        })
        .await
        .map_err(VoiceError::from)
        .and_then(|r| r);

        let turn = match recorded {
            Ok(Some(turn)) => turn,
            Ok(None) => {
                debug!(target: "vitals::voice", "listen timed out");
                return Utterance::NoSpeech;
            }
            Err(e) => {
                warn!(target: "vitals::voice", error = %e, "microphone failed");
                return Utterance::MicrophoneUnavailable(e.to_string());
            }
        };

        let stt = Arc::clone(&self.stt);
        let transcribed = tokio::task::spawn_blocking(move || stt.transcribe(&turn))
            .await
            .map_err(VoiceError::from)
            .and_then(|r| r);
        match transcribed {
            Ok(text) if text.trim().is_empty() => Utterance::Unintelligible,
            Ok(text) => {
                info!(target: "vitals::voice", chars = text.len(), "speech recognized");
                Utterance::Heard(text.trim().to_string())
            }
            Err(e) => {
                warn!(target: "vitals::voice", error = %e, "recognition failed");
                Utterance::RecognitionFailed(e.to_string())
            }
        }
    }

    /// Reply to `text`, or a fixed apology if the completion service cannot.
    pub async fn respond(&self, text: &str) -> String {
        self.completion.respond(text).await
    }

    /// Speak `text` to completion. Device errors are logged, not returned.
    pub async fn speak(&self, text: String) {
        let guard = Arc::clone(&self.synthesizer).lock_owned().await;
        let spoken = tokio::task::spawn_blocking(move || {
            let mut synth = guard;
            synth.speak(&text)
        })
        .await
        .map_err(VoiceError::from)
        .and_then(|r| r);
        if let Err(e) = spoken {
            warn!(target: "vitals::voice", error = %e, "speech output failed");
        }
    }

    /// Speak on a background task; the caller does not wait for playback.
    pub fn speak_in_background(&self, text: String) -> JoinHandle<()> {
        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.speak(text).await })
    }
}
