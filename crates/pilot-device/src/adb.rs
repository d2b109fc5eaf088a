use async_trait::async_trait;
use pilot_core::PilotError;
use tracing::debug;

/// Info about a connected Android device.
#[derive(Debug, Clone)]
pub struct AndroidDevice {
    pub serial: String,
    pub state: String,
    pub model: Option<String>,
}

/// Source of device screenshots, abstracted so the task runner can be
/// exercised without a physical device.
#[async_trait]
pub trait ScreenshotSource: Send + Sync {
    /// Capture the current screen as PNG bytes.
    async fn capture(&self) -> pilot_core::Result<Vec<u8>>;
}

/// Android Debug Bridge interface, optionally pinned to one device serial.
#[derive(Debug, Clone, Default)]
pub struct AdbBridge {
    device_id: Option<String>,
}

impl AdbBridge {
    pub fn new(device_id: Option<String>) -> Self {
        Self { device_id }
    }

    /// Run an ADB command and return raw stdout bytes.
    async fn adb(&self, args: &[&str]) -> pilot_core::Result<Vec<u8>> {
        let mut cmd = tokio::process::Command::new("adb");

        if let Some(ref serial) = self.device_id {
            cmd.arg("-s").arg(serial);
        }
        for arg in args {
            cmd.arg(arg);
        }

        let output = tokio::time::timeout(std::time::Duration::from_secs(30), cmd.output())
            .await
            .map_err(|_| PilotError::Device("adb command timed out".into()))?
            .map_err(|e| PilotError::Device(format!("adb not found or failed to start: {e}")))?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(PilotError::Device(format!("adb error: {}", stderr.trim())))
        }
    }

    async fn adb_text(&self, args: &[&str]) -> pilot_core::Result<String> {
        let out = self.adb(args).await?;
        Ok(String::from_utf8_lossy(&out).to_string())
    }

    /// Run a shell command on the device.
    async fn shell(&self, cmd: &str) -> pilot_core::Result<String> {
        self.adb_text(&["shell", cmd]).await
    }

    // ── Public API ─────────────────────────────────────────────

    /// List connected Android devices.
    pub async fn list_devices(&self) -> pilot_core::Result<Vec<AndroidDevice>> {
        let output = self.adb_text(&["devices", "-l"]).await?;
        Ok(parse_devices(&output))
    }

    /// Take a screenshot as PNG bytes. `exec-out` writes the image straight
    /// to stdout, so no file lands on the device.
    pub async fn screenshot(&self) -> pilot_core::Result<Vec<u8>> {
        let bytes = self.adb(&["exec-out", "screencap", "-p"]).await?;
        if bytes.is_empty() {
            return Err(PilotError::Device("screencap produced no data".into()));
        }
        debug!(bytes = bytes.len(), "captured device screenshot");
        Ok(bytes)
    }

    /// Tap at screen coordinates.
    pub async fn tap(&self, x: u32, y: u32) -> pilot_core::Result<()> {
        self.shell(&format!("input tap {x} {y}")).await?;
        Ok(())
    }

    /// Swipe from one point to another.
    pub async fn swipe(
        &self,
        x1: u32,
        y1: u32,
        x2: u32,
        y2: u32,
        duration_ms: u32,
    ) -> pilot_core::Result<()> {
        self.shell(&format!("input swipe {x1} {y1} {x2} {y2} {duration_ms}"))
            .await?;
        Ok(())
    }

    /// Type text on the device. ADB treats spaces specially.
    pub async fn type_text(&self, text: &str) -> pilot_core::Result<()> {
        let escaped = text
            .replace(' ', "%s")
            .replace('&', "\\&")
            .replace('\'', "\\'");
        self.shell(&format!("input text '{escaped}'")).await?;
        Ok(())
    }

    /// Press a named key (back, home, enter, ...).
    pub async fn press_key(&self, key: &str) -> pilot_core::Result<()> {
        let keycode = match key.to_lowercase().as_str() {
            "home" => "KEYCODE_HOME",
            "back" => "KEYCODE_BACK",
            "enter" | "return" => "KEYCODE_ENTER",
            "delete" | "backspace" => "KEYCODE_DEL",
            other => return Err(PilotError::Device(format!("unknown key: {other}"))),
        };
        self.shell(&format!("input keyevent {keycode}")).await?;
        Ok(())
    }

    /// Launch an app by package name.
    pub async fn launch_app(&self, package: &str) -> pilot_core::Result<()> {
        self.shell(&format!(
            "monkey -p {package} -c android.intent.category.LAUNCHER 1"
        ))
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ScreenshotSource for AdbBridge {
    async fn capture(&self) -> pilot_core::Result<Vec<u8>> {
        self.screenshot().await
    }
}

/// Check if ADB is available on the system.
pub async fn adb_available() -> bool {
    tokio::process::Command::new("adb")
        .arg("version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Parse `adb devices -l` output (first line is the header).
fn parse_devices(output: &str) -> Vec<AndroidDevice> {
    let mut devices = Vec::new();
    for line in output.lines().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 2 {
            let model = parts
                .iter()
                .find(|p| p.starts_with("model:"))
                .map(|p| p.strip_prefix("model:").unwrap_or("").to_string());
            devices.push(AndroidDevice {
                serial: parts[0].to_string(),
                state: parts[1].to_string(),
                model,
            });
        }
    }
    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_devices() {
        let output = "List of devices attached\n\
                      emulator-5554          device product:sdk_gphone64 model:sdk_gphone64_x86_64 device:emu64x\n\
                      R58M123ABC     unauthorized usb:1-1\n";
        let devices = parse_devices(output);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].serial, "emulator-5554");
        assert_eq!(devices[0].state, "device");
        assert_eq!(devices[0].model.as_deref(), Some("sdk_gphone64_x86_64"));
        assert_eq!(devices[1].serial, "R58M123ABC");
        assert_eq!(devices[1].state, "unauthorized");
        assert!(devices[1].model.is_none());
    }

    #[test]
    fn test_parse_devices_empty() {
        assert!(parse_devices("List of devices attached\n").is_empty());
    }
}
