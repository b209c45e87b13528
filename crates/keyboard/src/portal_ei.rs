//! Extended Input (EI) portal back end (spec §4.7), grounded on
//! `original_source/voicetype/pipeline/stages/keyboard_backends/eitype_backend.py`.
//!
//! Holds a process-wide cached session. The first call opens the session,
//! requesting permanent persistence and supplying any saved restore
//! token; the newly issued token is persisted for reuse on subsequent
//! launches. On a typed-text failure the back end closes the cached
//! session, sleeps briefly, reopens, and retries once.

use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use zbus::blocking::Connection;
use zbus::zvariant::Value;
use std::collections::HashMap;

use crate::{error::KeyboardError, KeyboardBackend};

const TOKEN_FILE: &str = "eitype_token";
const RECONNECT_SLEEP: Duration = Duration::from_millis(100);

struct EiSession {
    connection: Connection,
    session_path: zbus::zvariant::OwnedObjectPath,
}

static CACHED_SESSION: OnceLock<Mutex<Option<EiSession>>> = OnceLock::new();

fn cache() -> &'static Mutex<Option<EiSession>> {
    CACHED_SESSION.get_or_init(|| Mutex::new(None))
}

/// Explicitly closes and drops the cached session. Used by tests and by
/// the reliability-retry path.
pub fn clear_cached_connection() {
    let mut guard = cache().lock().unwrap();
    *guard = None;
}

fn token_path() -> Option<std::path::PathBuf> {
    dirs::data_dir().map(|d| d.join("voice-pipeline").join(TOKEN_FILE))
}

fn load_token() -> Option<String> {
    let path = token_path()?;
    std::fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn save_token(token: &str) {
    if let Some(path) = token_path() {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = std::fs::write(path, token);
    }
}

/// Computes the `Request` object path the portal will use for a call made
/// with `handle_token` (derivable in advance from our own unique bus
/// name), and subscribes to it before the call is issued so there is no
/// window where the portal could emit `Response` before we are listening.
fn predict_request_path(connection: &Connection, handle_token: &str) -> anyhow::Result<zbus::zvariant::ObjectPath<'static>> {
    let unique_name = connection
        .unique_name()
        .ok_or_else(|| anyhow::anyhow!("session bus connection has no unique name yet"))?;
    let sender = unique_name.as_str().trim_start_matches(':').replace('.', "_");
    Ok(zbus::zvariant::ObjectPath::try_from(format!(
        "/org/freedesktop/portal/desktop/request/{sender}/{handle_token}"
    ))?)
}

fn open_session() -> anyhow::Result<EiSession> {
    let connection = Connection::session()?;
    let proxy = zbus::blocking::Proxy::new(
        &connection,
        "org.freedesktop.portal.Desktop",
        "/org/freedesktop/portal/desktop",
        "org.freedesktop.portal.RemoteDesktop",
    )?;

    let handle_token = format!("eitype_{}", uuid::Uuid::new_v4().simple());
    let mut options: HashMap<&str, Value> = HashMap::new();
    options.insert("handle_token", Value::from(handle_token.clone()));
    options.insert("session_handle_token", Value::from(format!("eitype_sess_{}", uuid::Uuid::new_v4().simple())));
    if let Some(token) = load_token() {
        options.insert("restore_token", Value::from(token));
    }
    options.insert("persist_mode", Value::from(2u32));

    let predicted_path = predict_request_path(&connection, &handle_token)?;
    let mut response = zbus::blocking::Proxy::new(
        &connection,
        "org.freedesktop.portal.Desktop",
        predicted_path.clone(),
        "org.freedesktop.portal.Request",
    )?
    .receive_signal("Response")?;

    let request_path: zbus::zvariant::ObjectPath = proxy.call("CreateSession", &(options))?;
    if request_path != predicted_path {
        tracing::warn!(
            predicted = %predicted_path,
            actual = %request_path,
            "portal request path differed from prediction, falling back to late subscription"
        );
        response = zbus::blocking::Proxy::new(
            &connection,
            "org.freedesktop.portal.Desktop",
            request_path,
            "org.freedesktop.portal.Request",
        )?
        .receive_signal("Response")?;
    }
    let msg = response
        .next()
        .ok_or_else(|| anyhow::anyhow!("portal did not respond to CreateSession"))?;
    let (code, results): (u32, HashMap<String, Value>) = msg.body().deserialize()?;
    if !matches!(code, 0 | 2) {
        anyhow::bail!("RemoteDesktop CreateSession declined (code {code})");
    }

    if let Some(restore_token) = results.get("restore_token").and_then(|v| v.downcast_ref::<&str>().ok()) {
        save_token(restore_token);
    }

    let session_handle = results
        .get("session_handle")
        .and_then(|v| v.downcast_ref::<&str>().ok())
        .ok_or_else(|| anyhow::anyhow!("CreateSession response missing session_handle"))?;

    Ok(EiSession {
        connection,
        session_path: zbus::zvariant::OwnedObjectPath::try_from(session_handle.to_string())?,
    })
}

fn type_via_session(session: &EiSession, text: &str) -> anyhow::Result<()> {
    let proxy = zbus::blocking::Proxy::new(
        &session.connection,
        "org.freedesktop.portal.Desktop",
        "/org/freedesktop/portal/desktop",
        "org.freedesktop.portal.RemoteDesktop",
    )?;
    let options: HashMap<&str, Value> = HashMap::new();
    let _: () = proxy.call(
        "NotifyKeyboardText",
        &(&session.session_path, options, text),
    )?;
    Ok(())
}

fn type_text_once(text: &str) -> anyhow::Result<()> {
    let mut guard = cache().lock().unwrap();
    if guard.is_none() {
        *guard = Some(open_session()?);
    }
    let session = guard.as_ref().unwrap();
    type_via_session(session, text)
}

/// Reliability protocol (spec §4.7): on failure, close the cached
/// session, sleep briefly, open a fresh one, and retry once. A second
/// failure is a hard error.
pub fn type_text_with_retry(text: &str) -> Result<(), KeyboardError> {
    match type_text_once(text) {
        Ok(()) => Ok(()),
        Err(first_err) => {
            tracing::warn!(error = %first_err, "EI-portal type_text failed, retrying once");
            clear_cached_connection();
            std::thread::sleep(RECONNECT_SLEEP);
            type_text_once(text).map_err(|e| KeyboardError::EiPortalRetryFailed(e.to_string()))
        }
    }
}

#[derive(Default)]
pub struct EiPortalBackend;

impl KeyboardBackend for EiPortalBackend {
    fn type_text(&mut self, text: &str) -> Result<(), KeyboardError> {
        type_text_with_retry(text)
    }
}
