//! Wires a loaded [`crate::config::AppConfig`] into a running
//! [`pipeline::PipelineManager`] plus a platform-appropriate hotkey
//! listener. Kept separate from `main` so the construction steps are
//! unit-testable without a real display server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use pipeline::{CompletionLatch, PipelineExecutor, PipelineManager, StageRegistry, TriggerEvent};
use platform::{DirectGrabListener, HotkeyListener, OnPress, OnRelease, PlatformDetector, PlatformInfo, PortalHotkeyListener};

use crate::config::AppConfig;

pub fn build_registry() -> anyhow::Result<Arc<StageRegistry>> {
    let mut registry = StageRegistry::new();
    stages::register_builtin_stages(&mut registry, stages::StageDependencies::default())?;
    Ok(Arc::new(registry))
}

pub fn build_manager(
    registry: Arc<StageRegistry>,
    config: &AppConfig,
    max_workers: usize,
) -> anyhow::Result<PipelineManager> {
    let executor = PipelineExecutor::new(max_workers);
    let mut manager = PipelineManager::new(registry, executor);
    manager.load(&config.pipeline_configs(), &config.stage_configs())?;
    Ok(manager)
}

/// Bridges a platform hotkey listener's press/release callbacks into
/// `PipelineManager::trigger_by_hotkey`, completing the trigger's latch
/// on release (spec §4.6 "both receive the hotkey string").
struct HotkeyBridge {
    manager: Arc<PipelineManager>,
    pending: Arc<Mutex<HashMap<String, CompletionLatch>>>,
}

impl HotkeyBridge {
    fn on_press(&self, hotkey: &str) {
        let trigger = TriggerEvent::hotkey(hotkey);
        self.pending.lock().unwrap().insert(hotkey.to_string(), trigger.latch().clone());
        if let Err(e) = self.manager.trigger_by_hotkey(hotkey, Some(trigger)) {
            tracing::error!(hotkey, error = %e, "failed to dispatch pipeline for hotkey");
        }
    }

    fn on_release(&self, hotkey: &str) {
        if let Some(latch) = self.pending.lock().unwrap().remove(hotkey) {
            latch.complete();
        }
    }
}

/// Builds and starts a hotkey listener registered with every enabled
/// pipeline's hotkey, dispatching through `manager` (spec §4.6, §4.7
/// dispatch table §4.7's platform selection reused for listener choice).
pub fn start_hotkey_listener(manager: Arc<PipelineManager>, info: &PlatformInfo) -> anyhow::Result<Box<dyn HotkeyListener>> {
    let bridge = Arc::new(HotkeyBridge {
        manager: Arc::clone(&manager),
        pending: Arc::new(Mutex::new(HashMap::new())),
    });

    let press_bridge = Arc::clone(&bridge);
    let on_press: OnPress = Arc::new(move |hotkey| press_bridge.on_press(hotkey));
    let release_bridge = Arc::clone(&bridge);
    let on_release: OnRelease = Arc::new(move |hotkey| release_bridge.on_release(hotkey));

    let mut listener: Box<dyn HotkeyListener> = if info.display_server == platform::DisplayServer::Wayland
        && info.portal_global_shortcuts_available
    {
        Box::new(PortalHotkeyListener::new(on_press, on_release))
    } else {
        Box::new(DirectGrabListener::new(on_press, on_release))
    };

    for pipeline in manager.list_enabled_pipelines() {
        listener.add_hotkey(&pipeline.hotkey, Some(&pipeline.name))?;
    }
    listener.start()?;
    Ok(listener)
}

pub fn detect_platform() -> PlatformInfo {
    PlatformDetector::detect()
}
