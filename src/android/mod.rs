//! Android integration
//!
//! JNI entry points used by the accessibility service, plus the coordinate
//! mapping and gesture sinks used when running outside of it.

pub mod bridge;
pub mod input;

pub use bridge::{bridge, BridgeState};
pub use input::{encode_text, LogTapClient, ScreenCoordinates, ShellTapClient};
