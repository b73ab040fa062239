//! Two callers never share the synthesizer or the microphone.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use vitals_voice::{
    AudioTurn, CompletionClient, CompletionSettings, ListenSettings, Microphone, PlaceholderStt, Synthesizer,
    Utterance, VoicePipeline, VoiceResult,
};

#[derive(Default)]
struct Probe {
    active: AtomicUsize,
    peak: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl Probe {
    fn hold(&self, label: String) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.log.lock().unwrap().push(format!("start {label}"));
        thread::sleep(Duration::from_millis(60));
        self.log.lock().unwrap().push(format!("end {label}"));
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

struct RecordingSynth(Arc<Probe>);

impl Synthesizer for RecordingSynth {
    fn speak(&mut self, text: &str) -> VoiceResult<()> {
        self.0.hold(text.to_string());
        Ok(())
    }
}

struct SlowMic(Arc<Probe>);

impl Microphone for SlowMic {
    fn record_phrase(&mut self, _settings: &ListenSettings) -> VoiceResult<Option<AudioTurn>> {
        self.0.hold("mic".into());
        Ok(Some(AudioTurn::new(vec![0.1; 160], 16000)))
    }
}

fn pipeline(mic: Arc<Probe>, synth: Arc<Probe>) -> VoicePipeline {
    VoicePipeline::new(
        Box::new(SlowMic(mic)),
        Box::new(PlaceholderStt::with_response("check my temperature")),
        Box::new(RecordingSynth(synth)),
        CompletionClient::new(CompletionSettings::default(), None).unwrap(),
        ListenSettings::default(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_speak_calls_do_not_overlap() {
    let synth = Arc::new(Probe::default());
    let voice = pipeline(Arc::new(Probe::default()), Arc::clone(&synth));

    let a = voice.speak_in_background("first".into());
    let b = voice.speak_in_background("second".into());
    a.await.unwrap();
    b.await.unwrap();

    assert_eq!(synth.peak.load(Ordering::SeqCst), 1);
    let log = synth.log.lock().unwrap().clone();
    assert_eq!(log.len(), 4);
    // each start is immediately followed by its own end
    for pair in log.chunks(2) {
        let started = pair[0].strip_prefix("start ").unwrap();
        assert_eq!(pair[1], format!("end {started}"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_listens_take_turns_on_the_microphone() {
    let mic = Arc::new(Probe::default());
    let voice = pipeline(Arc::clone(&mic), Arc::new(Probe::default()));

    let (x, y) = tokio::join!(voice.listen(), voice.listen());
    assert_eq!(x, Utterance::Heard("check my temperature".into()));
    assert_eq!(y, x);
    assert_eq!(mic.peak.load(Ordering::SeqCst), 1);
}
