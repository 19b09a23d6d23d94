//! Script language
//!
//! One statement per line:
//!
//! ```text
//! tap(540, 1200)
//! swipe(100, 1500, 100, 300, 400)
//! wait(1000)
//! loop(0, 2, 5)
//! recognizeText("Battle Started")
//! matchTemplate("reward")
//! ```
//!
//! Coordinates are floating point and rounded to pixels. Lines that do not
//! parse are ignored. `loop` indices count action statements only.
//! `recognizeText` and `matchTemplate` are checkpoints evaluated against the
//! current frame when the runner reaches them.

use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{Action, MacroError, MacroInterpreter};
use crate::storage::{template_key, text_key, CorrectionStorage, TemplateStorage};

/// Swipe duration when a script omits it
pub const SCRIPT_SWIPE_DURATION_MS: u32 = 300;

/// Minimum score for a `matchTemplate` checkpoint
pub const DEFAULT_TEMPLATE_THRESHOLD: f32 = 0.9;

/// One parsed script line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ScriptStatement {
    Action(Action),
    /// Continue only if OCR text contains the literal
    RecognizeText(String),
    /// Continue only if the named stored template is on screen
    MatchTemplate(String),
}

impl ScriptStatement {
    /// Correction key for a checkpoint
    pub fn interruption_key(&self) -> Option<String> {
        match self {
            Self::Action(_) => None,
            Self::RecognizeText(literal) => Some(text_key(literal)),
            Self::MatchTemplate(name) => Some(template_key(name)),
        }
    }

    fn pause_reason(&self) -> String {
        match self {
            Self::Action(action) => format!("Action {} failed", action.name()),
            Self::RecognizeText(literal) => format!("Text \"{}\" not found on screen", literal),
            Self::MatchTemplate(name) => format!("Template \"{}\" not matched", name),
        }
    }
}

/// Parse a script, skipping lines that are not statements
pub fn parse_script(source: &str) -> Vec<ScriptStatement> {
    source
        .lines()
        .enumerate()
        .filter_map(|(number, line)| {
            let statement = parse_line(line);
            if statement.is_none() && !line.trim().is_empty() {
                debug!("Ignoring script line {}: {}", number + 1, line.trim());
            }
            statement
        })
        .collect()
}

/// Action statements of a parsed script, in order
pub fn script_actions(statements: &[ScriptStatement]) -> Vec<Action> {
    statements
        .iter()
        .filter_map(|s| match s {
            ScriptStatement::Action(action) => Some(action.clone()),
            _ => None,
        })
        .collect()
}

fn parse_line(line: &str) -> Option<ScriptStatement> {
    let (name, rest) = line.trim().split_once('(')?;
    let args = rest.trim_end().strip_suffix(')')?;

    let action = match name.trim() {
        "tap" => match floats(args)?.as_slice() {
            [x, y] => Action::click(pixel(*x), pixel(*y)),
            _ => return None,
        },
        "swipe" => {
            let values = floats(args)?;
            let duration = match values.get(4) {
                Some(d) if *d >= 0.0 => *d as u32,
                Some(_) => return None,
                None => SCRIPT_SWIPE_DURATION_MS,
            };
            match values.as_slice() {
                [x1, y1, x2, y2] | [x1, y1, x2, y2, _] => {
                    Action::swipe(pixel(*x1), pixel(*y1), pixel(*x2), pixel(*y2), duration)
                }
                _ => return None,
            }
        }
        "wait" => Action::Wait {
            millis: args.trim().parse().ok()?,
        },
        "loop" => {
            let parts: Vec<&str> = args.split(',').map(str::trim).collect();
            let [start, end, count] = parts.as_slice() else {
                return None;
            };
            Action::Loop {
                start_index: start.parse().ok()?,
                end_index: end.parse().ok()?,
                count: count.parse().ok()?,
            }
        }
        "recognizeText" => return quoted(args).map(ScriptStatement::RecognizeText),
        "matchTemplate" => return quoted(args).map(ScriptStatement::MatchTemplate),
        _ => return None,
    };
    Some(ScriptStatement::Action(action))
}

fn floats(args: &str) -> Option<Vec<f32>> {
    args.split(',')
        .map(|a| a.trim().parse::<f32>().ok().filter(|v| v.is_finite()))
        .collect()
}

fn pixel(value: f32) -> i32 {
    value.round() as i32
}

fn quoted(args: &str) -> Option<String> {
    args.trim()
        .strip_prefix('"')?
        .strip_suffix('"')
        .map(str::to_string)
}

/// How a script run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    /// Every statement ran; `actions` counts dispatched actions
    Completed { actions: usize },
    /// A checkpoint failed and no stored correction resolved it
    Paused { reason: String },
}

/// Runs scripts through a [`MacroInterpreter`]
pub struct ScriptRunner {
    interpreter: Arc<MacroInterpreter>,
    templates: Option<TemplateStorage>,
    corrections: Option<CorrectionStorage>,
    template_threshold: f32,
}

impl ScriptRunner {
    pub fn new(interpreter: Arc<MacroInterpreter>) -> Self {
        Self {
            interpreter,
            templates: None,
            corrections: None,
            template_threshold: DEFAULT_TEMPLATE_THRESHOLD,
        }
    }

    /// Source of `matchTemplate` images
    pub fn with_templates(mut self, templates: TemplateStorage) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Corrections replayed on failed checkpoints
    pub fn with_corrections(mut self, corrections: CorrectionStorage) -> Self {
        self.corrections = Some(corrections);
        self
    }

    pub fn with_template_threshold(mut self, threshold: f32) -> Self {
        self.template_threshold = threshold;
        self
    }

    /// Score a `matchTemplate` checkpoint needs to pass
    pub fn template_threshold(&self) -> f32 {
        self.template_threshold
    }

    /// Parse and run `source`
    pub async fn run(
        &self,
        source: &str,
        token: &CancellationToken,
    ) -> Result<ScriptOutcome, MacroError> {
        self.run_statements(&parse_script(source), token).await
    }

    /// Run parsed statements in order
    pub async fn run_statements(
        &self,
        statements: &[ScriptStatement],
        token: &CancellationToken,
    ) -> Result<ScriptOutcome, MacroError> {
        let actions = script_actions(statements);
        let mut action_index = 0;
        let mut dispatched = 0;

        for statement in statements {
            if token.is_cancelled() {
                return Err(MacroError::Cancelled);
            }

            if let ScriptStatement::Action(_) = statement {
                dispatched += self
                    .interpreter
                    .run_at(&actions, action_index, token)
                    .await?;
                action_index += 1;
                continue;
            }

            if !self.checkpoint(statement, token).await? {
                let reason = statement.pause_reason();
                info!("Script paused: {}", reason);
                return Ok(ScriptOutcome::Paused { reason });
            }
        }

        Ok(ScriptOutcome::Completed {
            actions: dispatched,
        })
    }

    /// Check a checkpoint, replaying its stored correction once on failure
    async fn checkpoint(
        &self,
        statement: &ScriptStatement,
        token: &CancellationToken,
    ) -> Result<bool, MacroError> {
        if self.check(statement).await? {
            return Ok(true);
        }

        let Some(key) = statement.interruption_key() else {
            return Ok(false);
        };
        let correction = match self.corrections.as_ref().map(|c| c.get(&key)) {
            Some(Ok(found)) => found,
            Some(Err(e)) => {
                warn!("Could not read corrections: {}", e);
                None
            }
            None => None,
        };
        let Some(correction) = correction else {
            return Ok(false);
        };

        info!(
            "Replaying correction for '{}' ({} actions)",
            key,
            correction.actions.len()
        );
        self.interpreter
            .run_actions(&correction.actions, token)
            .await?;
        self.check(statement).await
    }

    async fn check(&self, statement: &ScriptStatement) -> Result<bool, MacroError> {
        let frame = self.interpreter.frames().frame().await?;
        let detectors = self.interpreter.detectors();

        let passed = match statement {
            ScriptStatement::Action(_) => true,
            ScriptStatement::RecognizeText(literal) => detectors
                .ocr
                .recognize(&frame, None)
                .contains(literal.as_str()),
            ScriptStatement::MatchTemplate(name) => {
                let Some(templates) = &self.templates else {
                    warn!("No template storage for matchTemplate(\"{}\")", name);
                    return Ok(false);
                };
                match templates.load(name) {
                    Ok(template) => {
                        match detectors
                            .matcher
                            .match_multi_scale(&frame, &template, detectors.scales)
                        {
                            Ok(found) => found.score >= self.template_threshold,
                            Err(e) => {
                                warn!("Template '{}' match failed: {}", name, e);
                                false
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Template '{}' unavailable: {}", name, e);
                        false
                    }
                }
            }
        };
        Ok(passed)
    }
}
