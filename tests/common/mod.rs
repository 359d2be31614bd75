//! Shared test utilities
//!
//! `FakeNetwork` stands in for both the phone network and the transcriber:
//! each capture hands out a unique recording, and transcribing that
//! recording returns whatever line was scripted for the call.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use advisor_gateway::call::{CallId, Collaborators, TurnController};
use advisor_gateway::lead::LeadRecord;
use advisor_gateway::leads::LeadSink;
use advisor_gateway::llm::{ChatMessage, Responder};
use advisor_gateway::telephony::{CaptureOptions, Recording, Telephony};
use advisor_gateway::voice::{Synthesizer, Transcriber, pcm16_to_wav};
use advisor_gateway::{Error, Result};

/// What the caller does during one capture
#[derive(Debug, Clone)]
pub enum Line {
    /// Speaks; the transcriber returns this text verbatim (may be empty)
    Say(String),
    /// Recording holds no audio
    Silence,
    /// The capture request fails
    CaptureFails,
    /// Recording is fine but transcription fails
    TranscriptionFails,
    /// Recording is fine but the transcriber never answers
    TranscriptionHangs,
}

pub fn say(text: &str) -> Line {
    Line::Say(text.to_string())
}

/// Telephony operation as observed by the fake network
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Answer(String),
    Capture(String),
    Play(String, String),
    Teardown(String),
}

pub struct FakeNetwork {
    scripts: Mutex<HashMap<CallId, VecDeque<Line>>>,
    recordings: Mutex<HashMap<Vec<u8>, Line>>,
    ops: Mutex<Vec<Op>>,
    next_recording: AtomicU64,
    capture_delay: Duration,
    fail_answer: bool,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            recordings: Mutex::new(HashMap::new()),
            ops: Mutex::new(Vec::new()),
            next_recording: AtomicU64::new(0),
            capture_delay: Duration::ZERO,
            fail_answer: false,
        }
    }

    /// Every capture takes this long before returning
    pub fn with_capture_delay(mut self, delay: Duration) -> Self {
        self.capture_delay = delay;
        self
    }

    pub fn failing_answer(mut self) -> Self {
        self.fail_answer = true;
        self
    }

    /// Queue caller lines for a call. Once exhausted, the caller is silent.
    pub fn script(&self, call_id: &str, lines: impl IntoIterator<Item = Line>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(CallId::new(call_id))
            .or_default()
            .extend(lines);
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    /// Operations for one call, in order
    pub fn ops_for(&self, call_id: &str) -> Vec<Op> {
        self.ops()
            .into_iter()
            .filter(|op| match op {
                Op::Answer(id) | Op::Capture(id) | Op::Play(id, _) | Op::Teardown(id) => {
                    id == call_id
                }
            })
            .collect()
    }

    /// Text played to one call, in order
    pub fn spoken(&self, call_id: &str) -> Vec<String> {
        self.ops_for(call_id)
            .into_iter()
            .filter_map(|op| match op {
                Op::Play(_, text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn torn_down(&self, call_id: &str) -> bool {
        self.ops_for(call_id)
            .iter()
            .any(|op| matches!(op, Op::Teardown(_)))
    }

    fn record(&self, op: Op) {
        self.ops.lock().unwrap().push(op);
    }

    /// Half a second of 16 kHz audio, tagged so every recording is unique
    fn unique_audio(&self) -> Vec<u8> {
        let n = self.next_recording.fetch_add(1, Ordering::SeqCst);
        let mut pcm = vec![0u8; 16_000];
        pcm[..8].copy_from_slice(&n.to_le_bytes());
        pcm16_to_wav(&pcm, 16_000).unwrap()
    }
}

#[async_trait]
impl Telephony for FakeNetwork {
    async fn answer(&self, call_id: &CallId) -> Result<()> {
        self.record(Op::Answer(call_id.to_string()));
        if self.fail_answer {
            return Err(Error::Telephony("channel not found".to_string()));
        }
        Ok(())
    }

    async fn capture(&self, call_id: &CallId, _options: &CaptureOptions) -> Result<Recording> {
        self.record(Op::Capture(call_id.to_string()));
        if !self.capture_delay.is_zero() {
            tokio::time::sleep(self.capture_delay).await;
        }

        let line = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(call_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Line::Silence);

        let audio = match line {
            Line::CaptureFails => return Err(Error::Telephony("record failed".to_string())),
            Line::Silence => Vec::new(),
            line => {
                let audio = self.unique_audio();
                self.recordings.lock().unwrap().insert(audio.clone(), line);
                audio
            }
        };

        Ok(Recording {
            name: format!("rec-{call_id}"),
            audio,
        })
    }

    async fn play(&self, call_id: &CallId, audio: &[u8]) -> Result<()> {
        self.record(Op::Play(
            call_id.to_string(),
            String::from_utf8_lossy(audio).into_owned(),
        ));
        Ok(())
    }

    async fn teardown(&self, call_id: &CallId) -> Result<()> {
        self.record(Op::Teardown(call_id.to_string()));
        Ok(())
    }
}

#[async_trait]
impl Transcriber for FakeNetwork {
    async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        let line = self.recordings.lock().unwrap().remove(audio);
        match line {
            Some(Line::Say(text)) => Ok(text),
            Some(Line::TranscriptionFails) => Err(Error::Stt("provider returned 503".to_string())),
            Some(Line::TranscriptionHangs) => std::future::pending().await,
            _ => Ok(String::new()),
        }
    }
}

/// Replies with a fixed sentence, always fails, or never answers
pub struct FakeResponder {
    calls: AtomicUsize,
    fail: bool,
    hang: bool,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeResponder {
    pub fn replying() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
            hang: false,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::replying()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::replying()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Message lists passed to each completion
    pub fn seen(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().unwrap().clone()
    }
}

pub const REPLY: &str = "Great, thanks. Could you tell me a little more?";

#[async_trait]
impl Responder for FakeResponder {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(messages.to_vec());
        if self.hang {
            return std::future::pending().await;
        }
        if self.fail {
            return Err(Error::Llm("model overloaded".to_string()));
        }
        Ok(REPLY.to_string())
    }
}

/// "Audio" is the UTF-8 text itself, so playback shows what was said
pub struct EchoSynthesizer;

#[async_trait]
impl Synthesizer for EchoSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        Ok(text.as_bytes().to_vec())
    }
}

/// In-memory lead store that can fail its first appends
#[derive(Default)]
pub struct MemoryLeadSink {
    leads: Mutex<Vec<LeadRecord>>,
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl MemoryLeadSink {
    pub fn failing_first(failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            ..Self::default()
        }
    }

    pub fn leads(&self) -> Vec<LeadRecord> {
        self.leads.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LeadSink for MemoryLeadSink {
    async fn append(&self, lead: &LeadRecord) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Persistence("disk full".to_string()));
        }
        self.leads.lock().unwrap().push(lead.clone());
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<LeadRecord>> {
        Ok(self.leads().into_iter().rev().take(limit).collect())
    }
}

/// Turn controller wired to the fakes
pub fn controller(network: &Arc<FakeNetwork>, responder: &Arc<FakeResponder>) -> TurnController {
    TurnController::new(Collaborators {
        telephony: network.clone(),
        transcriber: network.clone(),
        responder: responder.clone(),
        synthesizer: Arc::new(EchoSynthesizer),
    })
}

pub const QUALIFYING: &str =
    "I'm interested in stocks, I have $50,000 to invest, and I want a moderate approach";

pub const UNDECIDED: &str = "I'm not really sure yet, just looking around";
