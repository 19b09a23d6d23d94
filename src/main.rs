//! AutoClicker CLI - desktop entry point
//!
//! Parses a script file and prints its actions as JSON. With `--dry-run` the
//! script is also run against a blank screen and a logging gesture sink, so
//! scripts can be checked without an Android device. Templates and
//! corrections come from the configured storage directory. `--save <name>`
//! stores the parsed actions there as a macro.
//!
//! Usage: `autoclicker <script-file> [--dry-run] [--save <name>] [--config <settings.json>]`

use std::process::ExitCode;
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use tokio_util::sync::CancellationToken;

use autoclicker_core::android::LogTapClient;
use autoclicker_core::config::Settings;
use autoclicker_core::macros::script::script_actions;
use autoclicker_core::macros::{parse_script, ScriptOutcome};
use autoclicker_core::vision::{ImageprocMatcher, NoOcr, ScreenCapture};

const USAGE: &str =
    "Usage: autoclicker <script-file> [--dry-run] [--save <name>] [--config <settings.json>]";

struct Args {
    script: String,
    dry_run: bool,
    save: Option<String>,
    config: Option<String>,
}

fn parse_args() -> Option<Args> {
    let mut script = None;
    let mut dry_run = false;
    let mut save = None;
    let mut config = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dry-run" => dry_run = true,
            "--save" => save = Some(args.next()?),
            "--config" => config = Some(args.next()?),
            _ if script.is_none() => script = Some(arg),
            _ => return None,
        }
    }

    Some(Args {
        script: script?,
        dry_run,
        save,
        config,
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Some(args) = parse_args() else {
        eprintln!("{}", USAGE);
        return ExitCode::from(2);
    };

    let settings = match &args.config {
        Some(path) => match Settings::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                log::error!("Failed to load settings from {}: {}", path, e);
                return ExitCode::FAILURE;
            }
        },
        None => Settings::default(),
    };

    let source = match std::fs::read_to_string(&args.script) {
        Ok(source) => source,
        Err(e) => {
            log::error!("Failed to read {}: {}", args.script, e);
            return ExitCode::FAILURE;
        }
    };

    let statements = parse_script(&source);
    let actions = script_actions(&statements);
    log::info!(
        "Parsed {} statements ({} actions) from {}",
        statements.len(),
        actions.len(),
        args.script
    );

    match serde_json::to_string_pretty(&actions) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            log::error!("Failed to serialize actions: {}", e);
            return ExitCode::FAILURE;
        }
    }

    if let Some(name) = &args.save {
        match settings.macro_storage().save(name, &actions) {
            Ok(path) => log::info!("Saved macro '{}' to {}", name, path.display()),
            Err(e) => {
                log::error!("Failed to save macro '{}': {}", name, e);
                return ExitCode::FAILURE;
            }
        }
    }

    if !args.dry_run {
        return ExitCode::SUCCESS;
    }

    let blank = RgbaImage::from_pixel(
        settings.screen.width.max(1),
        settings.screen.height.max(1),
        Rgba([0, 0, 0, 255]),
    );
    let frames = Arc::new(ScreenCapture::from_frame(blank));
    let tapper = Arc::new(LogTapClient::new());
    let detectors = settings.detectors(Arc::new(ImageprocMatcher::new()), Arc::new(NoOcr));
    let interpreter = Arc::new(settings.interpreter(frames, tapper.clone(), detectors));
    let runner = settings.script_runner(interpreter);

    match runner
        .run_statements(&statements, &CancellationToken::new())
        .await
    {
        Ok(ScriptOutcome::Completed { actions }) => {
            log::info!(
                "Dry run finished: {} actions, {} gestures",
                actions,
                tapper.dispatched()
            );
            ExitCode::SUCCESS
        }
        Ok(ScriptOutcome::Paused { reason }) => {
            log::warn!(
                "Dry run paused after {} gestures: {}",
                tapper.dispatched(),
                reason
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Dry run failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
