//! Macro recording
//!
//! Captures gestures as they happen and stores the time since the previous
//! event as the action's `delay_ms`, so playback reproduces the original
//! rhythm.

use log::{debug, info};
use tokio::time::Instant;

use super::action::DEFAULT_SWIPE_DURATION_MS;
use super::{Action, Macro};

/// Records user gestures into an action list
#[derive(Debug, Default)]
pub struct MacroRecorder {
    actions: Vec<Action>,
    last_event: Option<Instant>,
    recording: bool,
}

impl MacroRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh recording, discarding any previous one
    pub fn start(&mut self) {
        self.actions.clear();
        self.last_event = None;
        self.recording = true;
        info!("Recording started");
    }

    /// Stop recording and hand back the captured actions
    pub fn stop(&mut self) -> Vec<Action> {
        self.recording = false;
        self.last_event = None;
        info!("Recording stopped with {} actions", self.actions.len());
        std::mem::take(&mut self.actions)
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn record_tap(&mut self, x: i32, y: i32) {
        if let Some(delay) = self.elapsed() {
            debug!("Recorded tap at ({}, {}) after {}ms", x, y, delay);
            self.actions.push(Action::click(x, y).with_delay(delay));
        }
    }

    /// Record a swipe; `duration_ms` of `None` uses the default duration
    pub fn record_swipe(&mut self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: Option<u32>) {
        if let Some(delay) = self.elapsed() {
            let duration = duration_ms.unwrap_or(DEFAULT_SWIPE_DURATION_MS);
            self.actions
                .push(Action::swipe(x1, y1, x2, y2, duration).with_delay(delay));
        }
    }

    /// Insert an explicit wait
    pub fn record_wait(&mut self, millis: u64) {
        if self.elapsed().is_some() {
            self.actions.push(Action::Wait { millis });
        }
    }

    pub fn record_text(&mut self, text: impl Into<String>) {
        if self.elapsed().is_some() {
            self.actions.push(Action::InputText { text: text.into() });
        }
    }

    /// Stop recording and wrap the actions in a single-step macro
    pub fn into_macro(mut self, name: impl Into<String>) -> Macro {
        Macro::from_actions(name, self.stop())
    }

    /// Milliseconds since the previous event, `None` when not recording
    fn elapsed(&mut self) -> Option<u64> {
        if !self.recording {
            return None;
        }
        let now = Instant::now();
        let delay = self
            .last_event
            .map(|last| now.duration_since(last).as_millis() as u64)
            .unwrap_or(0);
        self.last_event = Some(now);
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_records_inter_event_delays() {
        let mut recorder = MacroRecorder::new();
        recorder.start();

        recorder.record_tap(10, 20);
        tokio::time::advance(Duration::from_millis(250)).await;
        recorder.record_swipe(0, 0, 0, 500, None);
        tokio::time::advance(Duration::from_millis(40)).await;
        recorder.record_text("abc");

        let actions = recorder.stop();
        assert_eq!(
            actions,
            vec![
                Action::click(10, 20),
                Action::swipe(0, 0, 0, 500, DEFAULT_SWIPE_DURATION_MS).with_delay(250),
                Action::InputText { text: "abc".into() },
            ]
        );
        assert!(!recorder.is_recording());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignores_events_while_stopped() {
        let mut recorder = MacroRecorder::new();
        recorder.record_tap(1, 1);
        assert!(recorder.actions().is_empty());

        recorder.start();
        recorder.record_wait(300);
        recorder.record_tap(2, 2);

        let m = recorder.into_macro("recorded");
        assert_eq!(m.name, "recorded");
        assert_eq!(m.action_count(), 2);
    }
}
