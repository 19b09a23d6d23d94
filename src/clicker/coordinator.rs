//! Multi-target click coordination
//!
//! Plays [`AdvancedAction`]s on top of the tap sink and the randomization
//! engine. Unlike the macro interpreter, a failing action does not propagate:
//! the failure is logged, counted in the per-kind statistics and reported as
//! `false`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_recursion::async_recursion;
use log::{debug, error};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{ActionStats, AdvancedAction, ClickMode, ClickTarget, ClickType, ScreenEdge};
use crate::macros::{sleep_or_cancel, MacroError, TapInterface};
use crate::stealth::{RandomizationConfig, RandomizationEngine, RandomizedClickTarget};
use crate::vision::Point;

/// Gap between the taps of a double or triple click
const MULTI_TAP_GAP_MS: u64 = 100;
/// Gap between taps in sequential multi-click mode
const SEQUENTIAL_GAP_MS: u64 = 50;
/// Pause between two targets of a sequential click
const TARGET_GAP_MS: u64 = 100;
/// Swipe duration and pause for combined gestures
const COMBINED_SWIPE_MS: u32 = 200;
/// Swipe duration of an uncurved movement
const DIRECT_MOVE_MS: u32 = 500;
/// Swipe duration and pause per curve segment
const CURVE_SEGMENT_MS: u32 = 50;
const CURVE_PAUSE_MS: u64 = 20;

/// Executes multi-target click patterns and keeps statistics per action kind
pub struct MultiTargetClickCoordinator {
    tapper: Arc<dyn TapInterface>,
    engine: Arc<RandomizationEngine>,
    screen: (u32, u32),
    stats: Mutex<HashMap<String, ActionStats>>,
    cancel: Mutex<CancellationToken>,
}

impl MultiTargetClickCoordinator {
    pub fn new(
        tapper: Arc<dyn TapInterface>,
        engine: Arc<RandomizationEngine>,
        screen_width: u32,
        screen_height: u32,
    ) -> Self {
        Self {
            tapper,
            engine,
            screen: (screen_width, screen_height),
            stats: Mutex::new(HashMap::new()),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn screen_size(&self) -> (u32, u32) {
        self.screen
    }

    /// Run `action`, returning whether it succeeded
    pub async fn execute(&self, action: &AdvancedAction) -> bool {
        let token = self.token();
        self.run_recorded(action, &token).await
    }

    /// Stop in-flight work at its next suspension point
    pub fn cancel_all(&self) {
        let mut token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        token.cancel();
        *token = CancellationToken::new();
        debug!("Cancelled coordinator work");
    }

    /// Statistics keyed by action kind
    pub fn stats(&self) -> HashMap<String, ActionStats> {
        self.lock_stats().clone()
    }

    /// Tap `point` `count` times at humanized intervals
    pub async fn burst_click(
        &self,
        point: Point,
        count: usize,
        base_interval_ms: u64,
        config: Option<&RandomizationConfig>,
    ) -> Result<(), MacroError> {
        let token = self.token();
        let intervals = match config {
            Some(config) => self
                .engine
                .generate_burst_intervals(base_interval_ms, count, config),
            None => vec![base_interval_ms; count],
        };

        for (i, interval) in intervals.iter().enumerate() {
            let target = match config {
                Some(config) => self.engine.randomize_position(point, config),
                None => point,
            };
            self.tap(target, &token)?;
            if i + 1 < count {
                sleep_or_cancel(&token, Duration::from_millis(*interval)).await?;
            }
        }
        Ok(())
    }

    /// Move from `start` to `end` as a chain of short swipes along a curve
    pub async fn natural_movement(
        &self,
        start: Point,
        end: Point,
        config: Option<&RandomizationConfig>,
    ) -> Result<(), MacroError> {
        let token = self.token();
        let curve = match config {
            Some(config) => self.engine.generate_natural_curve(start, end, config),
            None => vec![start, end],
        };

        if curve.len() <= 2 {
            self.tapper
                .swipe(start.x, start.y, end.x, end.y, DIRECT_MOVE_MS)?;
            return Ok(());
        }

        for segment in curve.windows(2) {
            if token.is_cancelled() {
                return Err(MacroError::Cancelled);
            }
            let (from, to) = (segment[0], segment[1]);
            self.tapper
                .swipe(from.x, from.y, to.x, to.y, CURVE_SEGMENT_MS)?;
            sleep_or_cancel(&token, Duration::from_millis(CURVE_PAUSE_MS)).await?;
        }
        Ok(())
    }

    fn token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_stats(&self) -> MutexGuard<'_, HashMap<String, ActionStats>> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[async_recursion]
    async fn run_recorded(&self, action: &AdvancedAction, token: &CancellationToken) -> bool {
        let started = Instant::now();
        let outcome = self.perform(action, token).await;

        let success = match outcome {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to execute {}: {}", action.kind(), e);
                false
            }
        };
        self.lock_stats()
            .entry(action.kind().to_string())
            .or_default()
            .record(started.elapsed().as_millis() as u64, success);
        success
    }

    async fn perform(
        &self,
        action: &AdvancedAction,
        token: &CancellationToken,
    ) -> Result<(), MacroError> {
        match action {
            AdvancedAction::MultiClick {
                points,
                mode,
                delay_ms,
                randomization,
            } => {
                let points: Vec<Point> = match randomization {
                    Some(config) => points
                        .iter()
                        .map(|p| self.engine.randomize_position(*p, config))
                        .collect(),
                    None => points.clone(),
                };
                self.pre_delay(*delay_ms, randomization.as_ref(), token)
                    .await?;
                self.multi_click(&points, *mode, randomization.as_ref(), token)
                    .await
            }
            AdvancedAction::SynchronousClick {
                targets,
                delay_ms,
                randomization,
            } => {
                let planned = self.plan(targets, randomization.as_ref());
                self.pre_delay(*delay_ms, randomization.as_ref(), token)
                    .await?;
                self.synchronous(planned, token).await
            }
            AdvancedAction::SequentialClick {
                targets,
                loop_counts,
                delay_ms,
                randomization,
            } => {
                let planned = self.plan(targets, randomization.as_ref());
                self.pre_delay(*delay_ms, randomization.as_ref(), token)
                    .await?;

                let last = planned.len().saturating_sub(1);
                for (index, target) in planned.iter().enumerate() {
                    let loops = loop_counts.get(&index).copied().unwrap_or(1);
                    for round in 0..loops {
                        sleep_or_cancel(token, Duration::from_millis(target.pre_click_delay_ms))
                            .await?;
                        self.tap(target.point, token)?;
                        if round + 1 < loops {
                            sleep_or_cancel(token, Duration::from_millis(target.delay_ms))
                                .await?;
                        }
                    }
                    if index < last {
                        sleep_or_cancel(token, Duration::from_millis(TARGET_GAP_MS)).await?;
                    }
                }
                Ok(())
            }
            AdvancedAction::EdgeClick {
                edge,
                offset,
                delay_ms,
                randomization,
            } => {
                let point = self.edge_point(*edge, *offset, randomization.as_ref());
                self.pre_delay(*delay_ms, randomization.as_ref(), token)
                    .await?;
                self.tap(point, token)
            }
            AdvancedAction::SmartClick {
                point,
                level,
                delay_ms,
                randomization,
            } => {
                let config = randomization
                    .clone()
                    .unwrap_or_else(|| RandomizationConfig::for_level(*level));
                let click = self.engine.humanize_click(*point, &config);
                let delay = self.engine.randomize_delay(*delay_ms, &config);
                sleep_or_cancel(token, Duration::from_millis(delay)).await?;
                sleep_or_cancel(token, Duration::from_millis(click.pre_click_delay_ms)).await?;
                self.tap(click.point, token)
            }
            AdvancedAction::ConditionalClick { actions } => {
                for nested in actions {
                    if token.is_cancelled() {
                        return Err(MacroError::Cancelled);
                    }
                    self.run_recorded(nested, token).await;
                }
                Ok(())
            }
            AdvancedAction::TimedAction { action, schedule } => {
                sleep_or_cancel(token, Duration::from_millis(schedule.delayed_start_ms)).await?;
                self.run_recorded(action, token).await;
                Ok(())
            }
        }
    }

    async fn pre_delay(
        &self,
        delay_ms: u64,
        config: Option<&RandomizationConfig>,
        token: &CancellationToken,
    ) -> Result<(), MacroError> {
        let delay = match config {
            Some(config) => self.engine.randomize_delay(delay_ms, config),
            None => delay_ms,
        };
        sleep_or_cancel(token, Duration::from_millis(delay)).await
    }

    fn plan(
        &self,
        targets: &[ClickTarget],
        config: Option<&RandomizationConfig>,
    ) -> Vec<RandomizedClickTarget> {
        match config {
            Some(config) => self.engine.randomize_multi_touch(targets, config),
            None => targets
                .iter()
                .cloned()
                .map(RandomizedClickTarget::exact)
                .collect(),
        }
    }

    fn edge_point(&self, edge: ScreenEdge, offset: f32, config: Option<&RandomizationConfig>) -> Point {
        let (width, height) = self.screen;
        match config {
            Some(config) => self
                .engine
                .randomize_edge_click(edge, offset, width, height, config),
            None => edge.anchor(offset, width, height),
        }
    }

    /// Fire every target concurrently and wait for all of them
    async fn synchronous(
        &self,
        planned: Vec<RandomizedClickTarget>,
        token: &CancellationToken,
    ) -> Result<(), MacroError> {
        let mut set = JoinSet::new();
        for target in planned {
            let tapper = self.tapper.clone();
            let token = token.clone();
            set.spawn(async move {
                sleep_or_cancel(&token, Duration::from_millis(target.pre_click_delay_ms)).await?;
                press(tapper.as_ref(), target.point, &target.target, &token).await
            });
        }

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            let result = joined.unwrap_or_else(|e| Err(MacroError::TaskFailed(e.to_string())));
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn multi_click(
        &self,
        points: &[Point],
        mode: ClickMode,
        config: Option<&RandomizationConfig>,
        token: &CancellationToken,
    ) -> Result<(), MacroError> {
        match mode {
            ClickMode::Synchronous => {
                let planned = points
                    .iter()
                    .map(|p| RandomizedClickTarget::exact(ClickTarget::new(*p)))
                    .collect();
                self.synchronous(planned, token).await
            }
            ClickMode::Sequential => {
                for point in points {
                    self.tap(*point, token)?;
                    sleep_or_cancel(token, Duration::from_millis(SEQUENTIAL_GAP_MS)).await?;
                }
                Ok(())
            }
            ClickMode::Combined => self.combined(points, token).await,
            ClickMode::Adaptive => {
                let gap = config
                    .map(|c| c.humanization_level)
                    .unwrap_or_default()
                    .adaptive_gap_ms();
                for point in points {
                    self.tap(*point, token)?;
                    sleep_or_cancel(token, Duration::from_millis(gap)).await?;
                }
                Ok(())
            }
        }
    }

    /// Alternate taps and swipes between consecutive points, ending on a tap
    async fn combined(&self, points: &[Point], token: &CancellationToken) -> Result<(), MacroError> {
        let Some(last) = points.last() else {
            return Ok(());
        };

        for (i, pair) in points.windows(2).enumerate() {
            let (start, end) = (pair[0], pair[1]);
            if i % 2 == 0 {
                self.tap(start, token)?;
                sleep_or_cancel(token, Duration::from_millis(MULTI_TAP_GAP_MS)).await?;
            } else {
                self.tapper
                    .swipe(start.x, start.y, end.x, end.y, COMBINED_SWIPE_MS)?;
                sleep_or_cancel(token, Duration::from_millis(COMBINED_SWIPE_MS as u64)).await?;
            }
        }
        self.tap(*last, token)
    }

    fn tap(&self, point: Point, token: &CancellationToken) -> Result<(), MacroError> {
        if token.is_cancelled() {
            return Err(MacroError::Cancelled);
        }
        self.tapper.tap(point.x, point.y)?;
        Ok(())
    }
}

/// Perform one target's click type at `point`
async fn press(
    tapper: &dyn TapInterface,
    point: Point,
    target: &ClickTarget,
    token: &CancellationToken,
) -> Result<(), MacroError> {
    if token.is_cancelled() {
        return Err(MacroError::Cancelled);
    }

    match target.click_type {
        ClickType::Single | ClickType::Custom => tapper.tap(point.x, point.y)?,
        ClickType::Double | ClickType::Triple => {
            let taps = if target.click_type == ClickType::Double { 2 } else { 3 };
            for i in 0..taps {
                if i > 0 {
                    sleep_or_cancel(token, Duration::from_millis(MULTI_TAP_GAP_MS)).await?;
                }
                tapper.tap(point.x, point.y)?;
            }
        }
        ClickType::LongPress => {
            let hold = u32::try_from(target.hold_duration_ms).unwrap_or(u32::MAX);
            tapper.swipe(point.x, point.y, point.x, point.y, hold)?;
        }
    }
    Ok(())
}
