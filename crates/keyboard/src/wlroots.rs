//! wlroots text-input back end (spec §4.7): whole-string injection via
//! the external `wtype` tool, with a 30-second watchdog.

use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

use crate::{error::KeyboardError, KeyboardBackend};

const WATCHDOG: Duration = Duration::from_secs(30);

pub struct WlrootsTextInputBackend {
    tool: String,
}

impl Default for WlrootsTextInputBackend {
    fn default() -> Self {
        Self { tool: "wtype".to_string() }
    }
}

impl WlrootsTextInputBackend {
    pub fn with_tool(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }
}

impl KeyboardBackend for WlrootsTextInputBackend {
    fn type_text(&mut self, text: &str) -> Result<(), KeyboardError> {
        let tool = self.tool.clone();
        let text = text.to_string();
        let (tx, rx) = mpsc::channel();

        let mut child = Command::new(&tool)
            .arg(&text)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| KeyboardError::WlrootsToolFailed(e.to_string()))?;

        std::thread::spawn(move || {
            let result = child.wait_with_output();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(WATCHDOG) {
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => Err(KeyboardError::WlrootsToolFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            )),
            Ok(Err(e)) => Err(KeyboardError::WlrootsToolFailed(e.to_string())),
            Err(_) => Err(KeyboardError::WlrootsTimeout(WATCHDOG)),
        }
    }
}
