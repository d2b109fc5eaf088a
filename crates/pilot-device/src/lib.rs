//! # pilot-device
//!
//! Android device access over ADB (Android Debug Bridge): the screenshot
//! capture and input primitives the step executor consumes, plus device
//! listing for status commands.
//!
//! ADB must be installed and on PATH.

pub mod adb;

pub use adb::{adb_available, AdbBridge, AndroidDevice, ScreenshotSource};
