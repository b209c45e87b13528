//! Core definitions for pipeline stages: the `Stage` trait, the per-run
//! context it executes in, and the trigger that started the run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::value::PipelineValue;

/// Icon states the application surfaces while a pipeline runs. Out of
/// scope: the tray UI itself — this is just the shared state a stage
/// writes to and the surrounding application reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconState {
    Idle,
    Recording,
    Processing,
    Disabled,
}

/// Handle a stage uses to report user-visible status. Cheap to clone,
/// backed by a single atomic-ish cell so stages never need to know who,
/// if anyone, is listening.
#[derive(Clone)]
pub struct IconController {
    state: Arc<Mutex<IconState>>,
}

impl Default for IconController {
    fn default() -> Self {
        Self::new(IconState::Idle)
    }
}

impl IconController {
    pub fn new(initial: IconState) -> Self {
        Self {
            state: Arc::new(Mutex::new(initial)),
        }
    }

    pub fn set(&self, state: IconState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn get(&self) -> IconState {
        *self.state.lock().unwrap()
    }
}

/// What caused a pipeline run to start, and the one-shot latch that
/// signals the run may stop waiting for more input (spec §3 `TriggerEvent`).
#[derive(Clone)]
pub enum TriggerEvent {
    Hotkey {
        hotkey: String,
        pressed_at: Instant,
        latch: CompletionLatch,
    },
    Programmatic {
        latch: CompletionLatch,
    },
    Timer {
        duration: Duration,
        latch: CompletionLatch,
    },
}

impl TriggerEvent {
    pub fn hotkey(hotkey: impl Into<String>) -> Self {
        let latch = CompletionLatch::new();
        TriggerEvent::Hotkey {
            hotkey: hotkey.into(),
            pressed_at: Instant::now(),
            latch,
        }
    }

    pub fn programmatic() -> Self {
        let latch = CompletionLatch::new();
        latch.complete();
        TriggerEvent::Programmatic { latch }
    }

    pub fn timer(duration: Duration) -> Self {
        let latch = CompletionLatch::new();
        TriggerEvent::Timer { duration, latch }
    }

    pub fn latch(&self) -> &CompletionLatch {
        match self {
            TriggerEvent::Hotkey { latch, .. } => latch,
            TriggerEvent::Programmatic { latch } => latch,
            TriggerEvent::Timer { latch, .. } => latch,
        }
    }

    /// Blocks until the trigger's completion latch fires or `timeout`
    /// elapses, whichever comes first. Used by `RecordAudio` (spec §4.5.1).
    pub fn wait_for_completion(&self, timeout: Duration) -> bool {
        match self {
            TriggerEvent::Timer { duration, latch } => {
                latch.wait(std::cmp::min(*duration, timeout))
            }
            _ => self.latch().wait(timeout),
        }
    }
}

/// A false-to-true-exactly-once latch, shared between the trigger source
/// (e.g. the hotkey listener, on key-release) and a waiting stage.
#[derive(Clone)]
pub struct CompletionLatch {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Default for CompletionLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionLatch {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Transitions false -> true. A second call is a no-op.
    pub fn complete(&self) {
        let (lock, cvar) = &*self.inner;
        let mut done = lock.lock().unwrap();
        if !*done {
            *done = true;
            cvar.notify_all();
        }
    }

    pub fn is_complete(&self) -> bool {
        *self.inner.0.lock().unwrap()
    }

    /// Waits up to `timeout` for completion. Returns whether it completed.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap();
        if *guard {
            return true;
        }
        let (guard, _) = cvar.wait_timeout(guard, timeout).unwrap();
        *guard
    }
}

/// Shared cooperative cancellation flag for one run (spec §5 "Cancellation
/// semantics"). False -> true exactly once.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-run context visible to every stage instance in that run
/// (spec §3 `PipelineContext`).
#[derive(Clone)]
pub struct PipelineContext {
    pub config: HashMap<String, serde_json::Value>,
    pub icon: IconController,
    pub trigger_event: Option<TriggerEvent>,
    pub cancel: CancelFlag,
    pub metadata: Arc<Mutex<HashMap<String, String>>>,
}

impl PipelineContext {
    pub fn new(icon: IconController, trigger_event: Option<TriggerEvent>, cancel: CancelFlag) -> Self {
        Self {
            config: HashMap::new(),
            icon,
            trigger_event,
            cancel,
            metadata: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.is_set()
    }
}

/// The core trait every stage class implements. `execute` is the only
/// required method; `cleanup` defaults to a no-op so stages that own no
/// temporaries need not override it.
pub trait Stage: Send {
    fn execute(
        &mut self,
        input: PipelineValue,
        ctx: &mut PipelineContext,
    ) -> anyhow::Result<PipelineValue>;

    /// Called exactly once, in reverse order of instantiation, regardless
    /// of how the run ended (spec §4.4 step 4).
    fn cleanup(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
