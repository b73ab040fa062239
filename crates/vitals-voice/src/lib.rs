//! # vitals-voice
//!
//! Listen, reply, speak. Each physical device has exactly one user at a time.
//!
//! ```text
//!  microphone guard            completion (async, 15s)        synthesizer guard
//! ┌────────────────┐          ┌──────────────────────┐       ┌──────────────────┐
//! │ cpal capture   │→ STT  →  │ chat completion      │ → TTS │ rodio playback   │
//! │ calibrate+wait │          │ fallback on failure  │       │ background task  │
//! └────────────────┘          └──────────────────────┘       └──────────────────┘
//! ```

pub mod audio;
pub mod completion;
pub mod error;
pub mod phrase;
pub mod pipeline;
pub mod stt;
pub mod voice_output;

pub use audio::{AudioTurn, CpalMicrophone, Microphone};
pub use completion::{CompletionClient, CompletionError, CompletionSettings, ERROR_REPLY, TIMEOUT_REPLY};
pub use error::{VoiceError, VoiceResult};
pub use phrase::{ListenSettings, PhraseDetector, PhraseStatus};
pub use pipeline::{Utterance, VoicePipeline, VoiceSettings};
pub use stt::{create_stt, OpenRouterStt, PlaceholderStt, SttBackend};
pub use voice_output::{create_tts, OpenRouterTts, PlaceholderTts, RodioSynthesizer, Synthesizer, TtsBackend, VoiceOutput};
