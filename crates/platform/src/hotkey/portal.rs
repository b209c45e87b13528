//! XDG Desktop Portal `GlobalShortcuts` listener (spec §4.6), grounded on
//! `original_source/voicetype/hotkey_listener/portal_hotkey_listener.py`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use zbus::blocking::Connection;
use zbus::zvariant::{ObjectPath, Value};

use super::grammar::to_portal_string;
use super::{HotkeyListener, OnPress, OnRelease};

const BUS_NAME: &str = "org.freedesktop.portal.Desktop";
const OBJECT_PATH: &str = "/org/freedesktop/portal/desktop";
const SHORTCUTS_IFACE: &str = "org.freedesktop.portal.GlobalShortcuts";
const REQUEST_IFACE: &str = "org.freedesktop.portal.Request";

/// Tunable debounce window for key-repeat suppression (spec §4.6, §9 open
/// question: no diagnostic-tool output is available in this build, so a
/// conservative default is used — see DESIGN.md).
const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(150);

struct PendingHotkey {
    id: String,
    hotkey: String,
}

struct SessionState {
    last_deactivated_at: HashMap<String, Instant>,
    press_open: HashMap<String, bool>,
}

/// Speaks `GlobalShortcuts` over the session bus. Runs its own dedicated
/// event-loop thread (bus client libraries are frequently not
/// thread-safe), forwarding activations to the manager via the
/// on-press/on-release callbacks.
pub struct PortalHotkeyListener {
    pending: Vec<PendingHotkey>,
    on_press: OnPress,
    on_release: OnRelease,
    debounce: Duration,
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl PortalHotkeyListener {
    pub fn new(on_press: OnPress, on_release: OnRelease) -> Self {
        Self {
            pending: Vec::new(),
            on_press,
            on_release,
            debounce: DEFAULT_DEBOUNCE,
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

impl HotkeyListener for PortalHotkeyListener {
    fn add_hotkey(&mut self, hotkey: &str, label: Option<&str>) -> anyhow::Result<()> {
        let id = label.unwrap_or(hotkey).to_string();
        self.pending.push(PendingHotkey {
            id,
            hotkey: hotkey.to_string(),
        });
        Ok(())
    }

    fn clear_hotkeys(&mut self) {
        self.pending.clear();
    }

    fn start(&mut self) -> anyhow::Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }
        let shortcuts: Vec<(String, String)> = self
            .pending
            .iter()
            .map(|p| (p.id.clone(), to_portal_string(&p.hotkey)))
            .collect();
        let id_to_hotkey: HashMap<String, String> = self
            .pending
            .iter()
            .map(|p| (p.id.clone(), p.hotkey.clone()))
            .collect();

        let stop = Arc::clone(&self.stop);
        let on_press = Arc::clone(&self.on_press);
        let on_release = Arc::clone(&self.on_release);
        let debounce = self.debounce;

        let handle = std::thread::Builder::new()
            .name("portal-dbus".into())
            .spawn(move || {
                if let Err(e) = run_portal_loop(shortcuts, id_to_hotkey, stop, on_press, on_release, debounce) {
                    tracing::error!(error = %e, "portal hotkey listener exited with error");
                }
            })
            .expect("failed to spawn portal-dbus thread");

        self.thread = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.thread = None;
    }
}

fn run_portal_loop(
    shortcuts: Vec<(String, String)>,
    id_to_hotkey: HashMap<String, String>,
    stop: Arc<AtomicBool>,
    on_press: OnPress,
    on_release: OnRelease,
    debounce: Duration,
) -> anyhow::Result<()> {
    let connection = Connection::session()?;
    let session_handle = create_session(&connection)?;
    bind_shortcuts(&connection, &session_handle, &shortcuts)?;

    let state = Arc::new(Mutex::new(SessionState {
        last_deactivated_at: HashMap::new(),
        press_open: HashMap::new(),
    }));

    let proxy = zbus::blocking::Proxy::new(&connection, BUS_NAME, OBJECT_PATH, SHORTCUTS_IFACE)?;
    let mut activated = proxy.receive_signal("Activated")?;
    let mut deactivated = proxy.receive_signal("Deactivated")?;

    while !stop.load(Ordering::Relaxed) {
        if let Ok(Some(msg)) = activated.next_timeout(Duration::from_millis(200)) {
            if let Ok((_session, id, _timestamp, _opts)) =
                msg.body().deserialize::<(String, String, u64, HashMap<String, Value>)>()
            {
                if let Some(hotkey) = id_to_hotkey.get(&id) {
                    let mut st = state.lock().unwrap();
                    let was_within_debounce = st
                        .last_deactivated_at
                        .get(&id)
                        .map(|t| t.elapsed() < debounce)
                        .unwrap_or(false);
                    let already_open = st.press_open.get(&id).copied().unwrap_or(false);
                    if !already_open {
                        st.press_open.insert(id.clone(), true);
                        drop(st);
                        if !was_within_debounce {
                            on_press(hotkey);
                        }
                    }
                }
            }
        }
        if let Ok(Some(msg)) = deactivated.next_timeout(Duration::from_millis(1)) {
            if let Ok((_session, id, _timestamp, _opts)) =
                msg.body().deserialize::<(String, String, u64, HashMap<String, Value>)>()
            {
                if let Some(hotkey) = id_to_hotkey.get(&id) {
                    let mut st = state.lock().unwrap();
                    st.last_deactivated_at.insert(id.clone(), Instant::now());
                    let hotkey = hotkey.clone();
                    drop(st);

                    let st2 = Arc::clone(&state);
                    let stop2 = Arc::clone(&stop);
                    let on_release2 = Arc::clone(&on_release);
                    let id2 = id.clone();
                    std::thread::spawn(move || {
                        std::thread::sleep(debounce);
                        if stop2.load(Ordering::Relaxed) {
                            return;
                        }
                        let mut st = st2.lock().unwrap();
                        let still_undebounced = st
                            .last_deactivated_at
                            .get(&id2)
                            .map(|t| t.elapsed() >= debounce)
                            .unwrap_or(false);
                        if still_undebounced {
                            st.press_open.insert(id2, false);
                            drop(st);
                            on_release2(&hotkey);
                        }
                    });
                }
            }
        }
    }

    Ok(())
}

/// Computes the `Request` object path the portal will use for a call made
/// with `handle_token`, per the portal spec: derivable in advance from the
/// caller's own unique bus name. Subscribing on this path before issuing
/// the call (spec §4.6 step 1) closes the race where the portal emits
/// `Response` before we start listening.
fn predict_request_path(connection: &Connection, handle_token: &str) -> anyhow::Result<ObjectPath<'static>> {
    let unique_name = connection
        .unique_name()
        .ok_or_else(|| anyhow::anyhow!("session bus connection has no unique name yet"))?;
    let sender = unique_name.as_str().trim_start_matches(':').replace('.', "_");
    Ok(ObjectPath::try_from(format!(
        "/org/freedesktop/portal/desktop/request/{sender}/{handle_token}"
    ))?)
}

fn create_session(connection: &Connection) -> anyhow::Result<ObjectPath<'static>> {
    let handle_token = format!("voicepipeline_req_{}", uuid::Uuid::new_v4().simple());
    let session_token = format!("voicepipeline_sess_{}", uuid::Uuid::new_v4().simple());

    let proxy = zbus::blocking::Proxy::new(connection, BUS_NAME, OBJECT_PATH, SHORTCUTS_IFACE)?;

    let mut options = HashMap::new();
    options.insert("handle_token", Value::from(handle_token.clone()));
    options.insert("session_handle_token", Value::from(session_token));

    let predicted_path = predict_request_path(connection, &handle_token)?;
    let mut response = zbus::blocking::Proxy::new(connection, BUS_NAME, predicted_path.clone(), REQUEST_IFACE)?
        .receive_signal("Response")?;

    let request_path: ObjectPath = proxy.call("CreateSession", &(options))?;
    if request_path != predicted_path {
        tracing::warn!(
            predicted = %predicted_path,
            actual = %request_path,
            "portal request path differed from prediction, falling back to late subscription"
        );
        response = zbus::blocking::Proxy::new(connection, BUS_NAME, request_path, REQUEST_IFACE)?
            .receive_signal("Response")?;
    }

    let msg = response
        .next_timeout(Duration::from_secs(10))?
        .ok_or_else(|| anyhow::anyhow!("timed out waiting for CreateSession response"))?;
    let (code, results): (u32, HashMap<String, Value>) = msg.body().deserialize()?;

    if !matches!(code, 0 | 2) {
        anyhow::bail!("portal CreateSession was declined (code {code})");
    }

    let session_handle = results
        .get("session_handle")
        .and_then(|v| v.downcast_ref::<&str>().ok())
        .ok_or_else(|| anyhow::anyhow!("CreateSession response missing session_handle"))?;

    Ok(ObjectPath::try_from(session_handle.to_string())?)
}

fn bind_shortcuts(
    connection: &Connection,
    session: &ObjectPath<'_>,
    shortcuts: &[(String, String)],
) -> anyhow::Result<()> {
    let proxy = zbus::blocking::Proxy::new(connection, BUS_NAME, OBJECT_PATH, SHORTCUTS_IFACE)?;

    let entries: Vec<(String, HashMap<String, Value>)> = shortcuts
        .iter()
        .map(|(id, trigger)| {
            let mut description = HashMap::new();
            description.insert("description".to_string(), Value::from(id.clone()));
            description.insert("preferred_trigger".to_string(), Value::from(trigger.clone()));
            (id.clone(), description)
        })
        .collect();

    let handle_token = format!("voicepipeline_bind_{}", uuid::Uuid::new_v4().simple());
    let mut options = HashMap::new();
    options.insert("handle_token", Value::from(handle_token.clone()));

    let predicted_path = predict_request_path(connection, &handle_token)?;
    let mut response = zbus::blocking::Proxy::new(connection, BUS_NAME, predicted_path.clone(), REQUEST_IFACE)?
        .receive_signal("Response")?;

    let request_path: ObjectPath =
        proxy.call("BindShortcuts", &(session, entries, "", options))?;
    if request_path != predicted_path {
        tracing::warn!(
            predicted = %predicted_path,
            actual = %request_path,
            "portal request path differed from prediction, falling back to late subscription"
        );
        response = zbus::blocking::Proxy::new(connection, BUS_NAME, request_path, REQUEST_IFACE)?
            .receive_signal("Response")?;
    }
    let msg = response
        .next_timeout(Duration::from_secs(10))?
        .ok_or_else(|| anyhow::anyhow!("timed out waiting for BindShortcuts response"))?;
    let (code, _results): (u32, HashMap<String, Value>) = msg.body().deserialize()?;

    if code == 1 {
        anyhow::bail!("user declined the global-shortcuts prompt");
    }
    if !matches!(code, 0 | 2) {
        anyhow::bail!("portal BindShortcuts failed (code {code})");
    }
    Ok(())
}
