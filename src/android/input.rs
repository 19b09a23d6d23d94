//! Touch input
//!
//! Coordinate scaling between a reference resolution and the device screen,
//! plus the gesture sinks used outside the accessibility service: the shell
//! `input` command and a logging dry-run sink.

use std::process::Command;
use std::sync::Mutex;

use log::{debug, info};

use crate::clicker::ScreenEdge;
use crate::macros::{TapError, TapInterface};
use crate::vision::Point;

/// Maps coordinates between a reference resolution and the actual screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenCoordinates {
    /// Reference width
    pub ref_width: u32,
    /// Reference height
    pub ref_height: u32,
    /// Current screen width
    pub screen_width: u32,
    /// Current screen height
    pub screen_height: u32,
}

impl ScreenCoordinates {
    /// Coordinates for a screen, with the screen itself as reference
    pub fn new(screen_width: u32, screen_height: u32) -> Self {
        Self {
            ref_width: screen_width.max(1),
            ref_height: screen_height.max(1),
            screen_width,
            screen_height,
        }
    }

    /// Scale recorded coordinates from `ref_width` x `ref_height`
    pub fn with_reference(mut self, ref_width: u32, ref_height: u32) -> Self {
        self.ref_width = ref_width.max(1);
        self.ref_height = ref_height.max(1);
        self
    }

    /// Scale X coordinate from reference to actual screen
    pub fn scale_x(&self, x: i32) -> i32 {
        ((x as f32 * self.screen_width as f32) / self.ref_width as f32) as i32
    }

    /// Scale Y coordinate from reference to actual screen
    pub fn scale_y(&self, y: i32) -> i32 {
        ((y as f32 * self.screen_height as f32) / self.ref_height as f32) as i32
    }

    pub fn scale(&self, point: Point) -> Point {
        Point::new(self.scale_x(point.x), self.scale_y(point.y))
    }

    /// Screen point as fractions of the screen size
    pub fn normalize(&self, point: Point) -> (f32, f32) {
        (
            point.x as f32 / self.screen_width.max(1) as f32,
            point.y as f32 / self.screen_height.max(1) as f32,
        )
    }

    /// Fractions of the screen size back to a screen point
    pub fn denormalize(&self, nx: f32, ny: f32) -> Point {
        Point::new(
            (nx * self.screen_width as f32).round() as i32,
            (ny * self.screen_height as f32).round() as i32,
        )
    }

    /// Point inset from an edge by `offset` of the screen size
    pub fn edge_point(&self, edge: ScreenEdge, offset: f32) -> Point {
        edge.anchor(offset, self.screen_width, self.screen_height)
    }
}

impl Default for ScreenCoordinates {
    fn default() -> Self {
        Self::new(1080, 2400)
    }
}

/// Gesture sink running the Android `input` command
///
/// On the device the program is `input`; from a desktop it can be
/// `adb shell input`.
#[derive(Debug, Clone)]
pub struct ShellTapClient {
    program: Vec<String>,
}

impl ShellTapClient {
    /// Run `input` directly
    pub fn new() -> Self {
        Self::with_program(["input"])
    }

    /// Run through `adb shell`
    pub fn adb() -> Self {
        Self::with_program(["adb", "shell", "input"])
    }

    /// Use an arbitrary command prefix
    pub fn with_program<I, S>(program: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into_iter().map(Into::into).collect(),
        }
    }

    /// Full argument vector for an `input` subcommand
    pub fn command_line(&self, args: &[String]) -> Vec<String> {
        self.program.iter().chain(args).cloned().collect()
    }

    fn run(&self, args: Vec<String>) -> Result<(), TapError> {
        let line = self.command_line(&args);
        let Some((program, rest)) = line.split_first() else {
            return Err(TapError::Unavailable);
        };

        debug!("Running {}", line.join(" "));
        let status = Command::new(program).args(rest).status()?;
        if !status.success() {
            return Err(TapError::CommandFailed {
                command: line.join(" "),
                status: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }
}

impl Default for ShellTapClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TapInterface for ShellTapClient {
    fn tap(&self, x: i32, y: i32) -> Result<(), TapError> {
        self.run(vec!["tap".into(), x.to_string(), y.to_string()])
    }

    fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u32) -> Result<(), TapError> {
        self.run(vec![
            "swipe".into(),
            x1.to_string(),
            y1.to_string(),
            x2.to_string(),
            y2.to_string(),
            duration_ms.to_string(),
        ])
    }

    fn input_text(&self, text: &str) -> Result<(), TapError> {
        self.run(vec!["text".into(), encode_text(text)])
    }
}

/// `input text` treats `%s` as a space
pub fn encode_text(text: &str) -> String {
    text.replace(' ', "%s")
}

/// Gesture sink that only logs, for dry runs
#[derive(Debug, Default)]
pub struct LogTapClient {
    dispatched: Mutex<u64>,
}

impl LogTapClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gestures seen so far
    pub fn dispatched(&self) -> u64 {
        *self
            .dispatched
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn count(&self) {
        *self
            .dispatched
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) += 1;
    }
}

impl TapInterface for LogTapClient {
    fn tap(&self, x: i32, y: i32) -> Result<(), TapError> {
        self.count();
        info!("tap {} {}", x, y);
        Ok(())
    }

    fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u32) -> Result<(), TapError> {
        self.count();
        info!("swipe {} {} -> {} {} ({}ms)", x1, y1, x2, y2, duration_ms);
        Ok(())
    }

    fn input_text(&self, text: &str) -> Result<(), TapError> {
        self.count();
        info!("text {:?}", text);
        Ok(())
    }
}
