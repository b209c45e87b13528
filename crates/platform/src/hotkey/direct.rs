//! Direct-keyboard-grab listener for X11/Windows/macOS (spec §4.6).
//!
//! Grounded on the dedicated-OS-thread-owning-`rdev::listen` pattern: the
//! thread is spawned once at `start()` and is never interrupted (rdev has
//! no graceful shutdown API); `stop()` sets a flag the callback checks on
//! every event so it silently stops forwarding.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use super::grammar::{parse_hotkey, HotkeyToken};
use super::{HotkeyListener, OnPress, OnRelease};

fn token_to_rdev_key(tok: &HotkeyToken) -> Option<rdev::Key> {
    use rdev::Key as K;
    Some(match tok {
        HotkeyToken::Char(c) => match c.to_ascii_lowercase() {
            'a' => K::KeyA, 'b' => K::KeyB, 'c' => K::KeyC, 'd' => K::KeyD,
            'e' => K::KeyE, 'f' => K::KeyF, 'g' => K::KeyG, 'h' => K::KeyH,
            'i' => K::KeyI, 'j' => K::KeyJ, 'k' => K::KeyK, 'l' => K::KeyL,
            'm' => K::KeyM, 'n' => K::KeyN, 'o' => K::KeyO, 'p' => K::KeyP,
            'q' => K::KeyQ, 'r' => K::KeyR, 's' => K::KeyS, 't' => K::KeyT,
            'u' => K::KeyU, 'v' => K::KeyV, 'w' => K::KeyW, 'x' => K::KeyX,
            'y' => K::KeyY, 'z' => K::KeyZ,
            '0' => K::Num0, '1' => K::Num1, '2' => K::Num2, '3' => K::Num3,
            '4' => K::Num4, '5' => K::Num5, '6' => K::Num6, '7' => K::Num7,
            '8' => K::Num8, '9' => K::Num9,
            _ => return None,
        },
        HotkeyToken::Special(name) => match name.as_str() {
            "ctrl" | "control" => K::ControlLeft,
            "alt" => K::Alt,
            "shift" => K::ShiftLeft,
            "super" | "cmd" | "meta" => K::MetaLeft,
            "pause" => K::Pause,
            "tab" => K::Tab,
            "esc" | "escape" => K::Escape,
            "space" => K::Space,
            "enter" | "return" => K::Return,
            "backspace" => K::Backspace,
            "delete" => K::Delete,
            "up" => K::UpArrow,
            "down" => K::DownArrow,
            "left" => K::LeftArrow,
            "right" => K::RightArrow,
            "f1" => K::F1, "f2" => K::F2, "f3" => K::F3, "f4" => K::F4,
            "f5" => K::F5, "f6" => K::F6, "f7" => K::F7, "f8" => K::F8,
            "f9" => K::F9, "f10" => K::F10, "f11" => K::F11, "f12" => K::F12,
            _ => return None,
        },
    })
}

struct Combination {
    hotkey: String,
    keys: HashSet<rdev::Key>,
    latched: bool,
}

struct SharedState {
    pressed: HashSet<rdev::Key>,
    combinations: Vec<Combination>,
}

/// Maintains a pressed-key set and, per registered combination, a
/// "combination satisfied" latch (spec §4.6 "Direct-grab listener").
pub struct DirectGrabListener {
    state: Arc<Mutex<SharedState>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    on_press: OnPress,
    on_release: OnRelease,
    // kept so hotkeys added before start() are not lost
    pending_labels: HashMap<String, Option<String>>,
}

impl DirectGrabListener {
    pub fn new(on_press: OnPress, on_release: OnRelease) -> Self {
        Self {
            state: Arc::new(Mutex::new(SharedState {
                pressed: HashSet::new(),
                combinations: Vec::new(),
            })),
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
            on_press,
            on_release,
            pending_labels: HashMap::new(),
        }
    }
}

impl HotkeyListener for DirectGrabListener {
    fn add_hotkey(&mut self, hotkey: &str, label: Option<&str>) -> anyhow::Result<()> {
        let tokens = parse_hotkey(hotkey);
        let keys: HashSet<rdev::Key> = tokens
            .iter()
            .filter_map(token_to_rdev_key)
            .collect();
        if keys.is_empty() || keys.len() != tokens.len() {
            anyhow::bail!("unrecognized key in hotkey string '{hotkey}'");
        }
        self.pending_labels.insert(hotkey.to_string(), label.map(str::to_string));
        self.state.lock().unwrap().combinations.push(Combination {
            hotkey: hotkey.to_string(),
            keys,
            latched: false,
        });
        Ok(())
    }

    fn clear_hotkeys(&mut self) {
        self.pending_labels.clear();
        self.state.lock().unwrap().combinations.clear();
    }

    fn start(&mut self) -> anyhow::Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }
        let state = Arc::clone(&self.state);
        let stop = Arc::clone(&self.stop);
        let on_press = Arc::clone(&self.on_press);
        let on_release = Arc::clone(&self.on_release);

        let handle = std::thread::Builder::new()
            .name("hotkey-listener".into())
            .spawn(move || {
                let result = rdev::listen(move |event| {
                    if stop.load(Ordering::Relaxed) {
                        return;
                    }
                    let mut state = state.lock().unwrap();
                    match event.event_type {
                        rdev::EventType::KeyPress(key) => {
                            state.pressed.insert(key);
                            let pressed = state.pressed.clone();
                            for combo in state.combinations.iter_mut() {
                                if !combo.latched && combo.keys.is_subset(&pressed) {
                                    combo.latched = true;
                                    on_press(&combo.hotkey);
                                }
                            }
                        }
                        rdev::EventType::KeyRelease(key) => {
                            state.pressed.remove(&key);
                            let pressed = state.pressed.clone();
                            for combo in state.combinations.iter_mut() {
                                if combo.latched
                                    && combo.keys.contains(&key)
                                    && combo.keys.is_disjoint(&pressed)
                                {
                                    combo.latched = false;
                                    on_release(&combo.hotkey);
                                }
                            }
                        }
                        _ => {}
                    }
                });
                if let Err(e) = result {
                    tracing::error!(error = ?e, "direct-grab listener exited with error");
                }
            })
            .expect("failed to spawn hotkey-listener thread");

        self.thread = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // The OS thread cannot be interrupted inside `rdev::listen`; it is
        // left to exit with the process, matching the upstream caveat.
        self.thread = None;
    }
}
