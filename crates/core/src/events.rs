use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::Sender,
    Arc,
};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Log,
    Progress,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineEvent {
    pub seq: u64,
    pub kind: EventKind,
    pub message: String,
    #[serde(default)]
    pub fraction: Option<f32>,
    pub timestamp: String,
}

/// Receives log lines and progress updates from the engine.
///
/// Implementations must return quickly: the engine calls them from its
/// worker between file operations.
pub trait EventSink {
    fn log(&mut self, message: &str);
    fn progress(&mut self, message: &str, fraction: f32);
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn log(&mut self, message: &str) {
        (**self).log(message);
    }

    fn progress(&mut self, message: &str, fraction: f32) {
        (**self).progress(message, fraction);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn log(&mut self, _message: &str) {}

    fn progress(&mut self, _message: &str, _fraction: f32) {}
}

/// Forwards into `tracing`: per-file messages at debug, stage progress at
/// info.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn log(&mut self, message: &str) {
        debug!("{message}");
    }

    fn progress(&mut self, message: &str, fraction: f32) {
        info!("[{:>3.0}%] {message}", fraction.clamp(0.0, 1.0) * 100.0);
    }
}

#[derive(Debug, Default)]
struct Sequencer {
    next_seq: u64,
}

impl Sequencer {
    fn event(&mut self, kind: EventKind, message: &str, fraction: Option<f32>) -> EngineEvent {
        self.next_seq = self.next_seq.saturating_add(1);
        EngineEvent {
            seq: self.next_seq,
            kind,
            message: message.to_string(),
            fraction: fraction.map(|value| value.clamp(0.0, 1.0)),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Collects events in memory, in emission order.
#[derive(Debug, Default)]
pub struct EventRecorder {
    sequencer: Sequencer,
    events: Vec<EngineEvent>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[EngineEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<EngineEvent> {
        self.events
    }

    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.events
            .iter()
            .filter(|event| event.kind == EventKind::Log)
            .map(|event| event.message.as_str())
    }
}

impl EventSink for EventRecorder {
    fn log(&mut self, message: &str) {
        let event = self.sequencer.event(EventKind::Log, message, None);
        self.events.push(event);
    }

    fn progress(&mut self, message: &str, fraction: f32) {
        let event = self
            .sequencer
            .event(EventKind::Progress, message, Some(fraction));
        self.events.push(event);
    }
}

/// Sends events over a channel. A disconnected receiver is ignored so a
/// caller that stops listening never stalls the worker.
#[derive(Debug)]
pub struct ChannelSink {
    sequencer: Sequencer,
    sender: Sender<EngineEvent>,
}

impl ChannelSink {
    pub fn new(sender: Sender<EngineEvent>) -> Self {
        Self {
            sequencer: Sequencer::default(),
            sender,
        }
    }
}

impl EventSink for ChannelSink {
    fn log(&mut self, message: &str) {
        let event = self.sequencer.event(EventKind::Log, message, None);
        let _ = self.sender.send(event);
    }

    fn progress(&mut self, message: &str, fraction: f32) {
        let event = self
            .sequencer
            .event(EventKind::Progress, message, Some(fraction));
        let _ = self.sender.send(event);
    }
}

/// Adapts a pair of closures to [`EventSink`].
pub struct CallbackSink<L, P> {
    on_log: L,
    on_progress: P,
}

impl<L, P> CallbackSink<L, P>
where
    L: FnMut(&str),
    P: FnMut(&str, f32),
{
    pub fn new(on_log: L, on_progress: P) -> Self {
        Self {
            on_log,
            on_progress,
        }
    }
}

impl<L, P> EventSink for CallbackSink<L, P>
where
    L: FnMut(&str),
    P: FnMut(&str, f32),
{
    fn log(&mut self, message: &str) {
        (self.on_log)(message);
    }

    fn progress(&mut self, message: &str, fraction: f32) {
        (self.on_progress)(message, fraction.clamp(0.0, 1.0));
    }
}

/// Cooperative cancellation checked between per-file iterations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::{CallbackSink, CancelToken, ChannelSink, EventKind, EventRecorder, EventSink};

    #[test]
    fn recorder_numbers_events_and_clamps_fraction() {
        let mut recorder = EventRecorder::new();
        recorder.log("hello");
        recorder.progress("half", 1.7);

        let events = recorder.into_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].seq, 1);
        assert_eq!(events[1].seq, 2);
        assert_eq!(events[1].kind, EventKind::Progress);
        assert_eq!(events[1].fraction, Some(1.0));
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (sender, receiver) = mpsc::channel();
        let mut sink = ChannelSink::new(sender);
        sink.log("first");
        assert_eq!(receiver.recv().expect("event").message, "first");
        drop(receiver);
        sink.progress("after drop", 0.5);
    }

    #[test]
    fn callback_sink_forwards_both_channels() {
        let mut logs = Vec::new();
        let mut fractions = Vec::new();
        {
            let mut sink = CallbackSink::new(
                |message: &str| logs.push(message.to_string()),
                |_: &str, fraction| fractions.push(fraction),
            );
            sink.log("a");
            sink.progress("b", 0.25);
        }
        assert_eq!(logs, vec!["a".to_string()]);
        assert_eq!(fractions, vec![0.25]);
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
