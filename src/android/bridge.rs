//! JNI function exports for Android integration
//!
//! These functions are called from Kotlin via JNI. The accessibility service
//! initializes the core once, pushes captured frames into it and asks it to
//! parse or run scripts. Everything else in the crate takes its collaborators
//! as arguments; only this module keeps global state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use jni::objects::{JByteArray, JClass, JObject, JString};
use jni::sys::{jboolean, jint, JNI_FALSE, JNI_TRUE};
use jni::JNIEnv;
use once_cell::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use super::ShellTapClient;
use crate::config::Settings;
use crate::macros::script::script_actions;
use crate::macros::{parse_script, MacroError, ScriptOutcome, TapInterface};
use crate::vision::{ImageprocMatcher, NoOcr, ScreenCapture};

/// State shared with the Android side
pub struct BridgeState {
    pub capture: Arc<ScreenCapture>,
    settings: RwLock<Settings>,
    /// Id and token of the script currently running
    running: Mutex<Option<(u64, CancellationToken)>>,
    next_run: AtomicU64,
}

impl BridgeState {
    fn new(settings: Settings) -> Self {
        Self {
            capture: Arc::new(ScreenCapture::new()),
            settings: RwLock::new(settings),
            running: Mutex::new(None),
            next_run: AtomicU64::new(0),
        }
    }

    /// Run a script against the pushed frames with the current settings
    ///
    /// Starting a script cancels the one already running.
    pub async fn run_script(
        &self,
        script: &str,
        tapper: Arc<dyn TapInterface>,
    ) -> Result<ScriptOutcome, MacroError> {
        let settings = self.settings();
        let detectors = settings.detectors(Arc::new(ImageprocMatcher::new()), Arc::new(NoOcr));
        let interpreter = Arc::new(settings.interpreter(self.capture.clone(), tapper, detectors));
        let runner = settings.script_runner(interpreter);

        let id = self.next_run.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        if let Some((_, previous)) = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace((id, token.clone()))
        {
            previous.cancel();
        }

        let result = runner.run(script, &token).await;

        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.as_ref().is_some_and(|(current, _)| *current == id) {
            *running = None;
        }
        result
    }

    /// Cancel the running script; false when none is running
    pub fn stop_script(&self) -> bool {
        match self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Current settings
    pub fn settings(&self) -> Settings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_settings(&self, settings: Settings) {
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }
}

static BRIDGE: OnceCell<BridgeState> = OnceCell::new();

/// Bridge state, once `init` has run
pub fn bridge() -> Option<&'static BridgeState> {
    BRIDGE.get()
}

/// Settings from an optional JSON string, falling back to defaults
fn settings_from_json(json: Option<&str>) -> Settings {
    match json {
        None => Settings::default(),
        Some(json) => Settings::from_json(json).unwrap_or_else(|e| {
            log::error!("Invalid settings, using defaults: {}", e);
            Settings::default()
        }),
    }
}

/// JSON array of the actions in a script
fn script_to_json(script: &str) -> String {
    let actions = script_actions(&parse_script(script));
    serde_json::to_string(&actions).unwrap_or_else(|e| {
        log::error!("Failed to serialize actions: {}", e);
        "[]".to_string()
    })
}

/// Initialize the automation core
///
/// Called once when the Android service starts. Later calls keep the first
/// state but still apply the given settings.
#[no_mangle]
pub extern "system" fn Java_com_autoclicker_core_AutoClickerCore_init<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    config_json: JString<'local>,
) -> jboolean {
    #[cfg(target_os = "android")]
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Debug)
            .with_tag("AutoClicker"),
    );

    log::info!("Initializing automation core");

    let config: Option<String> = if config_json.is_null() {
        None
    } else {
        match env.get_string(&config_json) {
            Ok(s) => Some(s.into()),
            Err(e) => {
                log::error!("Failed to get config string: {}", e);
                None
            }
        }
    };
    let settings = settings_from_json(config.as_deref());

    match BRIDGE.get() {
        Some(state) => state.set_settings(settings),
        None => {
            let _ = BRIDGE.set(BridgeState::new(settings));
        }
    }

    log::info!("Automation core initialized");
    JNI_TRUE
}

/// Store a captured RGBA frame
#[no_mangle]
pub extern "system" fn Java_com_autoclicker_core_AutoClickerCore_pushFrame<'local>(
    env: JNIEnv<'local>,
    _class: JClass<'local>,
    frame_data: JByteArray<'local>,
    width: jint,
    height: jint,
) -> jboolean {
    let Some(state) = bridge() else {
        log::error!("Automation core not initialized");
        return JNI_FALSE;
    };

    let frame_bytes = match env.convert_byte_array(frame_data) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::error!("Failed to convert frame data: {}", e);
            return JNI_FALSE;
        }
    };

    let (Ok(width), Ok(height)) = (u32::try_from(width), u32::try_from(height)) else {
        log::error!("Invalid frame size {}x{}", width, height);
        return JNI_FALSE;
    };

    match state.capture.update(&frame_bytes, width, height) {
        Ok(()) => JNI_TRUE,
        Err(e) => {
            log::error!("Failed to store frame: {}", e);
            JNI_FALSE
        }
    }
}

/// Parse a script and return its actions as JSON
#[no_mangle]
pub extern "system" fn Java_com_autoclicker_core_AutoClickerCore_parseScript<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    script: JString<'local>,
) -> JString<'local> {
    let json = match env.get_string(&script) {
        Ok(s) => script_to_json(&String::from(s)),
        Err(e) => {
            log::error!("Failed to get script string: {}", e);
            "[]".to_string()
        }
    };

    env.new_string(json)
        .unwrap_or_else(|_| JObject::null().into())
}

/// Run a script on the calling thread until it completes or pauses
///
/// Gestures go through the device `input` command. Returns true only when
/// every statement ran.
#[no_mangle]
pub extern "system" fn Java_com_autoclicker_core_AutoClickerCore_runScript<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    script: JString<'local>,
) -> jboolean {
    let Some(state) = bridge() else {
        log::error!("Automation core not initialized");
        return JNI_FALSE;
    };

    let script: String = match env.get_string(&script) {
        Ok(s) => s.into(),
        Err(e) => {
            log::error!("Failed to get script string: {}", e);
            return JNI_FALSE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to start script runtime: {}", e);
            return JNI_FALSE;
        }
    };

    match runtime.block_on(state.run_script(&script, Arc::new(ShellTapClient::new()))) {
        Ok(ScriptOutcome::Completed { actions }) => {
            log::info!("Script completed ({} actions)", actions);
            JNI_TRUE
        }
        Ok(ScriptOutcome::Paused { reason }) => {
            log::warn!("Script paused: {}", reason);
            JNI_FALSE
        }
        Err(e) => {
            log::error!("Script failed: {}", e);
            JNI_FALSE
        }
    }
}

/// Cancel the script started by `runScript`
#[no_mangle]
pub extern "system" fn Java_com_autoclicker_core_AutoClickerCore_stopScript<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
) -> jboolean {
    match bridge() {
        Some(state) if state.stop_script() => JNI_TRUE,
        _ => JNI_FALSE,
    }
}

/// Replace the settings
#[no_mangle]
pub extern "system" fn Java_com_autoclicker_core_AutoClickerCore_updateSettings<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    settings_json: JString<'local>,
) -> jboolean {
    let Some(state) = bridge() else {
        return JNI_FALSE;
    };

    let settings_str: String = match env.get_string(&settings_json) {
        Ok(s) => s.into(),
        Err(_) => return JNI_FALSE,
    };

    match Settings::from_json(&settings_str) {
        Ok(settings) => {
            state.set_settings(settings);
            JNI_TRUE
        }
        Err(e) => {
            log::error!("Failed to parse settings: {}", e);
            JNI_FALSE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::testing::RecordingTapper;
    use crate::macros::Action;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_settings_from_json() {
        assert_eq!(settings_from_json(None), Settings::default());
        assert_eq!(settings_from_json(Some("garbage")), Settings::default());

        let settings = settings_from_json(Some(r#"{"engine":{"poll_interval_ms":75}}"#));
        assert_eq!(settings.engine.poll_interval_ms, 75);
    }

    #[test]
    fn test_script_to_json() {
        let json = script_to_json("tap(10, 20)\nrecognizeText(\"Ready\")\nwait(300)\n");
        let actions: Vec<Action> = serde_json::from_str(&json).unwrap();

        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0], Action::click(10, 20));
        assert_eq!(actions[1], Action::Wait { millis: 300 });
        assert_eq!(script_to_json(""), "[]");
    }

    #[test]
    fn test_bridge_state_settings() {
        let state = BridgeState::new(Settings::default());
        state.set_settings(Settings::fast_preset());
        assert_eq!(state.settings(), Settings::fast_preset());
        assert!(!state.capture.has_frame());
    }

    fn scratch_state(dir: &tempfile::TempDir) -> BridgeState {
        BridgeState::new(Settings {
            storage_dir: dir.path().to_path_buf(),
            ..Settings::fast_preset()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_script_uses_pushed_frames() {
        let dir = tempfile::tempdir().unwrap();
        let state = scratch_state(&dir);
        let tapper = Arc::new(RecordingTapper::default());

        let err = state
            .run_script("recognizeText(\"Ready\")", tapper.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, MacroError::Frame(_)));

        state
            .capture
            .set_frame(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255])));
        let outcome = state
            .run_script("tap(3, 4)\nwait(10)\nrecognizeText(\"Ready\")\ntap(5, 6)", tapper.clone())
            .await
            .unwrap();

        assert!(matches!(outcome, ScriptOutcome::Paused { .. }));
        assert_eq!(tapper.taps(), vec![(3, 4)]);
        assert!(!state.stop_script());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_script_cancels_run() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(scratch_state(&dir));
        state
            .capture
            .set_frame(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255])));
        let tapper = Arc::new(RecordingTapper::default());

        let run = tokio::spawn({
            let state = state.clone();
            let tapper = tapper.clone();
            async move { state.run_script("wait(60000)\ntap(1, 1)", tapper).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert!(state.stop_script());
        let result = run.await.unwrap();
        assert!(matches!(result, Err(MacroError::Cancelled)));
        assert!(tapper.taps().is_empty());
        assert!(!state.stop_script());
    }
}
