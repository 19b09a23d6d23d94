//! Macro interpreter
//!
//! Plays a [`Macro`] against a frame source and a tap sink. Steps with a
//! condition block until the condition holds on a freshly captured frame;
//! actions are then dispatched in order. Gesture and capture errors abort the
//! run, malformed loops are skipped.

use std::sync::Arc;
use std::time::Duration;

use async_recursion::async_recursion;
use log::{debug, info};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{sleep_or_cancel, Action, Condition, Detectors, Macro, MacroError, TapInterface};
use crate::stealth::{RandomizationConfig, RandomizationEngine};
use crate::vision::{FrameProvider, Point};

/// Delay between two polls of an unsatisfied gate
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// What a completed run did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionSummary {
    /// Completed passes over the step list
    pub iterations: u32,
    /// Actions dispatched, loop replays included
    pub actions: usize,
    pub elapsed: Duration,
}

/// Executes macros step by step
pub struct MacroInterpreter {
    frames: Arc<dyn FrameProvider>,
    tapper: Arc<dyn TapInterface>,
    detectors: Detectors,
    engine: Arc<RandomizationEngine>,
    poll_interval: Duration,
    /// Unbounded when absent
    gate_timeout: Option<Duration>,
    /// Humanization applied on top of per-action jitter
    randomization: Option<RandomizationConfig>,
}

impl MacroInterpreter {
    pub fn new(frames: Arc<dyn FrameProvider>, tapper: Arc<dyn TapInterface>) -> Self {
        Self {
            frames,
            tapper,
            detectors: Detectors::default(),
            engine: Arc::new(RandomizationEngine::new()),
            poll_interval: DEFAULT_POLL_INTERVAL,
            gate_timeout: None,
            randomization: None,
        }
    }

    pub fn with_detectors(mut self, detectors: Detectors) -> Self {
        self.detectors = detectors;
        self
    }

    pub fn with_engine(mut self, engine: Arc<RandomizationEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Fail gated steps whose condition does not hold within `timeout`
    pub fn with_gate_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.gate_timeout = timeout;
        self
    }

    /// Humanize clicks and delays with `config`
    pub fn with_randomization(mut self, config: Option<RandomizationConfig>) -> Self {
        self.randomization = config;
        self
    }

    pub fn detectors(&self) -> &Detectors {
        &self.detectors
    }

    pub fn frames(&self) -> &Arc<dyn FrameProvider> {
        &self.frames
    }

    /// Run `m` to completion or until `token` is cancelled
    pub async fn execute(
        &self,
        m: &Macro,
        token: &CancellationToken,
    ) -> Result<ExecutionSummary, MacroError> {
        let started = Instant::now();
        let repeat = m.repeat_count.max(1);
        info!(
            "Executing macro '{}' ({} steps, {} repetitions)",
            m.name,
            m.steps.len(),
            repeat
        );

        let mut actions = 0;
        for iteration in 0..repeat {
            debug!("Macro '{}' iteration {}/{}", m.name, iteration + 1, repeat);
            for step in &m.steps {
                if let Some(condition) = &step.condition {
                    self.wait_for(condition, token).await?;
                }
                actions += self.run_actions(&step.actions, token).await?;
            }
        }

        let summary = ExecutionSummary {
            iterations: repeat,
            actions,
            elapsed: started.elapsed(),
        };
        info!(
            "Macro '{}' finished: {} actions in {:?}",
            m.name, summary.actions, summary.elapsed
        );
        Ok(summary)
    }

    /// Dispatch a flat action list, resolving loops against the same list
    ///
    /// Returns the number of dispatched actions.
    pub async fn run_actions(
        &self,
        actions: &[Action],
        token: &CancellationToken,
    ) -> Result<usize, MacroError> {
        if actions.is_empty() {
            return Ok(0);
        }
        let mut active = Vec::new();
        self.run_range(actions, 0, actions.len() - 1, &mut active, token)
            .await
    }

    /// Dispatch the single action at `index`, resolving a loop against `actions`
    pub async fn run_at(
        &self,
        actions: &[Action],
        index: usize,
        token: &CancellationToken,
    ) -> Result<usize, MacroError> {
        if index >= actions.len() {
            return Ok(0);
        }
        let mut active = Vec::new();
        self.run_range(actions, index, index, &mut active, token)
            .await
    }

    /// Poll `condition` until it holds on the current frame
    pub async fn wait_for(
        &self,
        condition: &Condition,
        token: &CancellationToken,
    ) -> Result<(), MacroError> {
        let started = Instant::now();
        let mut polls = 0u64;

        loop {
            let frame = tokio::select! {
                _ = token.cancelled() => return Err(MacroError::Cancelled),
                frame = self.frames.frame() => frame?,
            };
            if condition.eval(&frame, &self.detectors) {
                if polls > 0 {
                    debug!("Gate satisfied after {} polls", polls);
                }
                return Ok(());
            }

            polls += 1;
            debug!("Gate not satisfied (poll {}): {}", polls, condition.describe());
            if let Some(limit) = self.gate_timeout {
                if started.elapsed() >= limit {
                    return Err(MacroError::GateTimeout(limit));
                }
            }
            sleep_or_cancel(token, self.poll_interval).await?;
        }
    }

    /// Run `actions[start..=end]`, skipping indices past the end of the list
    ///
    /// A loop inside the range replays its own range. Indices of loops that
    /// are already replaying, the current one included, are skipped during a
    /// replay, which bounds the nesting depth by the number of loops.
    #[async_recursion]
    async fn run_range(
        &self,
        actions: &[Action],
        start: usize,
        end: usize,
        active: &mut Vec<usize>,
        token: &CancellationToken,
    ) -> Result<usize, MacroError> {
        let last = actions.len().saturating_sub(1);
        if end > last {
            debug!(
                "Loop range {}..={} exceeds {} actions, skipping missing indices",
                start,
                end,
                actions.len()
            );
        }

        let mut dispatched = 0;
        for index in start..=end.min(last) {
            if active.contains(&index) {
                debug!("Skipping loop at index {} inside its own replay", index);
                continue;
            }

            let action = &actions[index];
            let Action::Loop {
                start_index,
                end_index,
                count,
            } = action
            else {
                self.dispatch(action, token).await?;
                dispatched += 1;
                continue;
            };

            active.push(index);
            let replayed = self
                .replay(actions, *start_index, *end_index, *count, active, token)
                .await;
            active.pop();
            dispatched += replayed?;
        }
        Ok(dispatched)
    }

    async fn replay(
        &self,
        actions: &[Action],
        start: usize,
        end: usize,
        count: u32,
        active: &mut Vec<usize>,
        token: &CancellationToken,
    ) -> Result<usize, MacroError> {
        let mut dispatched = 0;
        for _ in 0..count {
            if token.is_cancelled() {
                return Err(MacroError::Cancelled);
            }
            let n = self.run_range(actions, start, end, active, token).await?;
            if n == 0 {
                // Every further pass would dispatch nothing as well
                break;
            }
            dispatched += n;
        }
        Ok(dispatched)
    }

    async fn dispatch(&self, action: &Action, token: &CancellationToken) -> Result<(), MacroError> {
        let (base, variance) = action.timing();
        let mut delay = self.engine.jitter_delay(base, variance);
        if let Some(config) = &self.randomization {
            delay = self.engine.randomize_delay(delay, config);
        }
        sleep_or_cancel(token, Duration::from_millis(delay)).await?;
        if token.is_cancelled() {
            return Err(MacroError::Cancelled);
        }

        match action {
            Action::Click { x, y, jitter_px, .. } => {
                let point = self.engine.jitter_point(Point::new(*x, *y), *jitter_px);
                let point = self.humanize(point, token).await?;
                debug!("Tap at ({}, {})", point.x, point.y);
                self.tapper.tap(point.x, point.y)?;
            }
            Action::Swipe {
                x1,
                y1,
                x2,
                y2,
                duration_ms,
                jitter_px,
                ..
            } => {
                let from = self.engine.jitter_point(Point::new(*x1, *y1), *jitter_px);
                let to = self.engine.jitter_point(Point::new(*x2, *y2), *jitter_px);
                debug!(
                    "Swipe ({}, {}) -> ({}, {}) over {}ms",
                    from.x, from.y, to.x, to.y, duration_ms
                );
                self.tapper.swipe(from.x, from.y, to.x, to.y, *duration_ms)?;
            }
            Action::Wait { millis } => {
                sleep_or_cancel(token, Duration::from_millis(*millis)).await?;
            }
            Action::InputText { text } => {
                debug!("Input text ({} chars)", text.chars().count());
                self.tapper.input_text(text)?;
            }
            Action::Loop { .. } => {}
        }
        Ok(())
    }

    /// Apply micro-movement and await the pre-click delay when humanizing
    async fn humanize(&self, point: Point, token: &CancellationToken) -> Result<Point, MacroError> {
        let Some(config) = &self.randomization else {
            return Ok(point);
        };
        let click = self.engine.humanize_click(point, config);
        sleep_or_cancel(token, Duration::from_millis(click.pre_click_delay_ms)).await?;
        Ok(click.point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::testing::{Gesture, RecordingTapper};
    use crate::macros::Step;
    use crate::vision::{Frame, Rect, ScreenCapture, VisionError};
    use chrono::Utc;
    use image::{ImageBuffer, Rgba};

    fn green_frame() -> Frame {
        ImageBuffer::from_pixel(20, 20, Rgba([0, 255, 0, 255]))
    }

    fn interpreter(tapper: Arc<RecordingTapper>) -> MacroInterpreter {
        MacroInterpreter::new(Arc::new(ScreenCapture::from_frame(green_frame())), tapper)
            .with_engine(Arc::new(RandomizationEngine::with_seed(7)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_runs_whole_sequence() {
        let tapper = Arc::new(RecordingTapper::default());
        let m = Macro::builder("waits")
            .repeat(3)
            .actions(|a| {
                a.wait_ms(10);
            })
            .build();

        let started = Instant::now();
        let summary = interpreter(tapper)
            .execute(&m, &CancellationToken::new())
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(summary.iterations, 3);
        assert_eq!(summary.actions, 3);
    }

    #[tokio::test]
    async fn test_loop_replays_inclusive_range() {
        let tapper = Arc::new(RecordingTapper::default());
        let m = Macro::builder("loop")
            .actions(|a| {
                a.click(1, 1).click(2, 2).click(3, 3).repeat_range(1, 2, 2);
            })
            .build();

        let summary = interpreter(tapper.clone())
            .execute(&m, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            tapper.taps(),
            vec![(1, 1), (2, 2), (3, 3), (2, 2), (3, 3), (2, 2), (3, 3)]
        );
        assert_eq!(summary.actions, 7);
    }

    #[tokio::test]
    async fn test_self_covering_loop_replays_its_range() {
        let tapper = Arc::new(RecordingTapper::default());
        let actions = vec![
            Action::click(1, 1),
            Action::click(2, 2),
            Action::Loop {
                start_index: 0,
                end_index: 2,
                count: 2,
            },
        ];

        interpreter(tapper.clone())
            .run_actions(&actions, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            tapper.taps(),
            vec![(1, 1), (2, 2), (1, 1), (2, 2), (1, 1), (2, 2)]
        );
    }

    #[tokio::test]
    async fn test_out_of_range_loop_indices_are_skipped() {
        let tapper = Arc::new(RecordingTapper::default());
        let actions = vec![
            Action::Loop {
                start_index: 1,
                end_index: 9,
                count: 2,
            },
            Action::click(1, 1),
            Action::click(2, 2),
        ];

        interpreter(tapper.clone())
            .run_actions(&actions, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            tapper.taps(),
            vec![(1, 1), (2, 2), (1, 1), (2, 2), (1, 1), (2, 2)]
        );
    }

    #[tokio::test]
    async fn test_mutually_covering_loops_terminate() {
        let tapper = Arc::new(RecordingTapper::default());
        let actions = vec![
            Action::click(1, 1),
            Action::Loop {
                start_index: 0,
                end_index: 2,
                count: 2,
            },
            Action::Loop {
                start_index: 0,
                end_index: 1,
                count: 1,
            },
        ];

        interpreter(tapper.clone())
            .run_actions(&actions, &CancellationToken::new())
            .await
            .unwrap();

        // 1, loop1 x2 (1, loop2 (1)), then loop2 (1, loop1 x2 (1))
        assert_eq!(tapper.taps().len(), 1 + 4 + 3);
    }

    #[tokio::test]
    async fn test_oversized_jitter_from_json_does_not_panic() {
        let tapper = Arc::new(RecordingTapper::default());
        let action: Action =
            serde_json::from_str(r#"{"type":"click","x":10,"y":10,"jitter_px":3000000000}"#)
                .unwrap();

        let dispatched = interpreter(tapper.clone())
            .run_actions(&[action], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(dispatched, 1);
        assert_eq!(tapper.taps().len(), 1);
    }

    #[tokio::test]
    async fn test_huge_loop_over_empty_range_returns() {
        let tapper = Arc::new(RecordingTapper::default());
        let actions = vec![Action::Loop {
            start_index: 5,
            end_index: 9,
            count: u32::MAX,
        }];

        let dispatched = interpreter(tapper.clone())
            .run_actions(&actions, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(dispatched, 0);
        assert!(tapper.taps().is_empty());
    }

    #[tokio::test]
    async fn test_loop_stops_when_cancelled() {
        let tapper = Arc::new(RecordingTapper::default());
        let token = CancellationToken::new();
        token.cancel();
        let actions = vec![Action::Loop {
            start_index: 0,
            end_index: 0,
            count: u32::MAX,
        }];

        let result = interpreter(tapper)
            .run_actions(&actions, &token)
            .await;
        assert!(matches!(result, Err(MacroError::Cancelled)));
    }

    #[tokio::test]
    async fn test_nested_loops() {
        let tapper = Arc::new(RecordingTapper::default());
        let actions = vec![
            Action::click(1, 1),
            Action::Loop {
                start_index: 0,
                end_index: 0,
                count: 2,
            },
            Action::Loop {
                start_index: 0,
                end_index: 1,
                count: 1,
            },
        ];

        interpreter(tapper.clone())
            .run_actions(&actions, &CancellationToken::new())
            .await
            .unwrap();

        // 1, loop(1, 1), then outer replay: 1, inner loop(1, 1)
        assert_eq!(tapper.taps().len(), 6);
    }

    #[tokio::test]
    async fn test_zero_jitter_is_exact() {
        let tapper = Arc::new(RecordingTapper::default());
        let actions = vec![
            Action::click(100, 200).with_delay(0),
            Action::swipe(5, 6, 7, 8, 250),
            Action::InputText {
                text: "hello".into(),
            },
        ];

        interpreter(tapper.clone())
            .run_actions(&actions, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            tapper.gestures(),
            vec![
                Gesture::Tap(100, 200),
                Gesture::Swipe(5, 6, 7, 8, 250),
                Gesture::Text("hello".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_jitter_stays_within_bounds() {
        let tapper = Arc::new(RecordingTapper::default());
        let actions = vec![Action::click(50, 50).with_jitter(5, 0); 1000];

        interpreter(tapper.clone())
            .run_actions(&actions, &CancellationToken::new())
            .await
            .unwrap();

        let taps = tapper.taps();
        assert_eq!(taps.len(), 1000);
        assert!(taps
            .iter()
            .all(|(x, y)| (x - 50).abs() <= 5 && (y - 50).abs() <= 5));
        assert!(taps.iter().any(|t| *t != (50, 50)));
    }

    #[tokio::test]
    async fn test_tap_error_aborts_run() {
        let tapper = Arc::new(RecordingTapper::failing_on(1));
        let m = Macro::from_actions(
            "fails",
            vec![Action::click(1, 1), Action::click(2, 2), Action::click(3, 3)],
        );

        let result = interpreter(tapper.clone())
            .execute(&m, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(MacroError::Tap(_))));
        assert_eq!(tapper.taps(), vec![(1, 1)]);
    }

    #[tokio::test]
    async fn test_gate_passes_on_matching_frame() {
        let tapper = Arc::new(RecordingTapper::default());
        let mut m = Macro::new("gated");
        m.steps.push(Step::gated(
            Condition::color(Rect::new(0, 0, 5, 5), 0xFF00_FF00, 0),
            vec![Action::click(4, 4)],
        ));

        interpreter(tapper.clone())
            .execute(&m, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(tapper.taps(), vec![(4, 4)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inverted_time_window_never_passes() {
        let tapper = Arc::new(RecordingTapper::default());
        let now = Utc::now().timestamp_millis();
        let mut m = Macro::new("blocked");
        m.steps.push(Step::gated(
            Condition::time(Some(now), Some(now - 1), None),
            vec![Action::click(1, 1)],
        ));

        let bounded = interpreter(tapper.clone()).with_gate_timeout(Some(Duration::from_secs(2)));
        let result = bounded.execute(&m, &CancellationToken::new()).await;
        assert!(matches!(result, Err(MacroError::GateTimeout(_))));

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });
        let result = interpreter(tapper.clone()).execute(&m, &token).await;
        assert!(matches!(result, Err(MacroError::Cancelled)));
        assert!(tapper.taps().is_empty());
    }

    #[tokio::test]
    async fn test_frame_error_propagates() {
        let tapper = Arc::new(RecordingTapper::default());
        let mut m = Macro::new("no frame");
        m.steps.push(Step::gated(
            Condition::count(1, false),
            vec![Action::click(1, 1)],
        ));

        let result = MacroInterpreter::new(Arc::new(ScreenCapture::new()), tapper.clone())
            .execute(&m, &CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(MacroError::Frame(VisionError::NoFrame))
        ));
        assert!(tapper.taps().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_before_next_action() {
        let tapper = Arc::new(RecordingTapper::default());
        let token = CancellationToken::new();
        token.cancel();

        let m = Macro::from_actions("cancelled", vec![Action::click(1, 1)]);
        let result = interpreter(tapper.clone()).execute(&m, &token).await;

        assert!(matches!(result, Err(MacroError::Cancelled)));
        assert!(tapper.taps().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_humanized_clicks_wait_pre_click_delay() {
        use crate::stealth::HumanizationLevel;

        let tapper = Arc::new(RecordingTapper::default());
        let config = RandomizationConfig::for_level(HumanizationLevel::High);
        let min_delay = HumanizationLevel::High.pattern().pre_click_delay_ms.0;

        let started = Instant::now();
        interpreter(tapper.clone())
            .with_randomization(Some(config))
            .run_actions(&[Action::click(100, 100)], &CancellationToken::new())
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(min_delay));
        assert_eq!(tapper.taps().len(), 1);
    }
}
