//! The pipeline executor: runs pipelines concurrently on a bounded worker
//! pool without blocking the trigger thread (spec §4.4).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::error::{PipelineError, StageError};
use crate::manager::PipelineDefinition;
use crate::registry::StageRegistry;
use crate::resource::{ResourceArbiter, RunId};
use crate::stage::{CancelFlag, IconController, IconState, PipelineContext, Stage, TriggerEvent};
use crate::value::PipelineValue;

struct RunHandle {
    cancel: CancelFlag,
    done_rx: flume::Receiver<()>,
}

/// Runs pipelines concurrently on a bounded worker pool. `execute` never
/// blocks the caller: resources are acquired synchronously (cheap), then
/// a worker thread is spawned and the call returns immediately.
pub struct PipelineExecutor {
    arbiter: Arc<ResourceArbiter>,
    icon: IconController,
    max_workers: usize,
    inflight: Arc<AtomicUsize>,
    active: Arc<Mutex<HashMap<RunId, RunHandle>>>,
    shutting_down: Arc<AtomicBool>,
}

impl PipelineExecutor {
    pub fn new(max_workers: usize) -> Self {
        Self {
            arbiter: Arc::new(ResourceArbiter::new()),
            icon: IconController::default(),
            max_workers,
            inflight: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(Mutex::new(HashMap::new())),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn arbiter(&self) -> &Arc<ResourceArbiter> {
        &self.arbiter
    }

    pub fn icon(&self) -> &IconController {
        &self.icon
    }

    pub fn active_run_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    /// Non-blocking: returns `None` if the arbiter refuses resources, or
    /// the pool is already saturated, or the executor is shutting down.
    /// Otherwise spawns a worker and returns immediately with a fresh id.
    pub fn execute(
        &self,
        registry: &Arc<StageRegistry>,
        pipeline: &PipelineDefinition,
        trigger_event: Option<TriggerEvent>,
    ) -> Result<Option<RunId>, PipelineError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Ok(None);
        }
        if self.inflight.load(Ordering::SeqCst) >= self.max_workers {
            warn!(pipeline = %pipeline.name, "executor saturated, refusing dispatch");
            return Ok(None);
        }

        let stage_classes = pipeline.stage_class_names();
        let required = registry.required_resources(&stage_classes)?;
        let run_id = Uuid::new_v4();

        if !self.arbiter.acquire(run_id, &required) {
            let blocked = self.arbiter.blocked_by(&required);
            warn!(
                pipeline = %pipeline.name,
                resources = ?blocked,
                "resource contention, run not started"
            );
            return Ok(None);
        }

        let cancel = CancelFlag::new();
        let (done_tx, done_rx) = flume::bounded(1);

        self.active.lock().unwrap().insert(
            run_id,
            RunHandle {
                cancel: cancel.clone(),
                done_rx,
            },
        );
        self.inflight.fetch_add(1, Ordering::SeqCst);

        let registry = Arc::clone(registry);
        let arbiter = Arc::clone(&self.arbiter);
        let icon = self.icon.clone();
        let active = Arc::clone(&self.active);
        let inflight = Arc::clone(&self.inflight);
        let name = pipeline.name.clone();
        let stages = pipeline.stages.clone();

        thread::Builder::new()
            .name(format!("pipeline-{name}"))
            .spawn(move || {
                run_worker(
                    run_id,
                    &name,
                    &stages,
                    &registry,
                    icon,
                    trigger_event,
                    cancel,
                );
                arbiter.release(run_id);
                active.lock().unwrap().remove(&run_id);
                inflight.fetch_sub(1, Ordering::SeqCst);
                let _ = done_tx.send(());
            })
            .expect("failed to spawn pipeline worker thread");

        Ok(Some(run_id))
    }

    pub fn cancel(&self, run_id: RunId) {
        if let Some(handle) = self.active.lock().unwrap().get(&run_id) {
            handle.cancel.set();
        }
    }

    pub fn cancel_all(&self) {
        for handle in self.active.lock().unwrap().values() {
            handle.cancel.set();
        }
    }

    /// Sets a process-wide shutdown flag, cancels all active runs, and
    /// waits up to `timeout` for the workers to finish. The deadline is a
    /// single shared budget, not `timeout` per run. Remaining workers are
    /// orphaned rather than aborted.
    pub fn shutdown(&self, timeout: Duration) -> Result<(), PipelineError> {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.cancel_all();

        let deadline = Instant::now() + timeout;
        let receivers: Vec<flume::Receiver<()>> = self
            .active
            .lock()
            .unwrap()
            .values()
            .map(|h| h.done_rx.clone())
            .collect();

        let mut outstanding = receivers.len();
        for rx in receivers {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if rx.recv_timeout(remaining).is_ok() {
                outstanding -= 1;
            }
        }

        if outstanding > 0 {
            warn!(outstanding, "shutdown timed out, workers left to drain");
            return Err(PipelineError::ShutdownTimeout(outstanding));
        }
        Ok(())
    }
}

/// The per-run worker algorithm (spec §4.4).
fn run_worker(
    run_id: RunId,
    pipeline_name: &str,
    stages: &[crate::manager::ResolvedStage],
    registry: &StageRegistry,
    icon: IconController,
    trigger_event: Option<TriggerEvent>,
    cancel: CancelFlag,
) {
    let pipeline_span = info_span!(
        "pipeline",
        id = %run_id,
        name = pipeline_name,
        stage_count = stages.len(),
    );
    let _guard = pipeline_span.enter();

    let mut ctx = PipelineContext::new(icon.clone(), trigger_event, cancel.clone());
    let mut live_stages: Vec<Box<dyn Stage>> = Vec::new();
    let mut value = PipelineValue::Unit;
    let mut failure: Option<StageError> = None;
    let mut cancelled = false;

    for (index, resolved) in stages.iter().enumerate() {
        if cancel.is_set() {
            warn!(pipeline = pipeline_name, index, "run cancelled before stage start");
            cancelled = true;
            break;
        }

        let stage_span = info_span!(
            "stage",
            class = %resolved.stage_class,
            id = %run_id,
            name = pipeline_name,
            index,
        );
        let _stage_guard = stage_span.enter();
        for (k, v) in &resolved.config {
            tracing::debug!(key = %format!("stage.config.{k}"), value = %v, "stage config");
        }

        let mut stage = match registry.lookup(&resolved.stage_class).and_then(|def| {
            def.create(resolved.config.clone())
                .map_err(|e| crate::error::RegistryError::UnknownStageClass(e.to_string()))
        }) {
            Ok(s) => s,
            Err(e) => {
                error!(stage = %resolved.stage_class, error = %e, "failed to instantiate stage");
                failure = Some(StageError::Failed {
                    stage: resolved.stage_class.clone(),
                    source: anyhow::anyhow!(e),
                });
                break;
            }
        };

        ctx.config = resolved
            .config
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let start = Instant::now();
        let result = stage.execute(value, &mut ctx);
        let elapsed_ms = start.elapsed().as_millis();

        live_stages.push(stage);

        match result {
            Ok(out) => {
                info!(stage = %resolved.stage_class, duration_ms = elapsed_ms, "stage OK");
                value = out;
            }
            Err(e) => {
                error!(stage = %resolved.stage_class, duration_ms = elapsed_ms, error = %e, "stage failed");
                failure = Some(StageError::Failed {
                    stage: resolved.stage_class.clone(),
                    source: e,
                });
                break;
            }
        }
    }

    if failure.is_none() && !cancelled {
        info!(pipeline = pipeline_name, "pipeline OK");
    }

    // Guaranteed finalizer: cleanup in reverse order, swallowing and
    // logging each cleanup's errors individually.
    for stage in live_stages.iter_mut().rev() {
        if let Err(e) = stage.cleanup() {
            error!(pipeline = pipeline_name, error = %e, "stage cleanup failed");
        }
    }

    icon.set(IconState::Idle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ResolvedStage;
    use crate::registry::StageFactory;
    use crate::resource::Resource;
    use crate::value::StageType;
    use std::collections::HashSet;

    static CLEANUP_ORDER: Mutex<Vec<&str>> = Mutex::new(Vec::new());

    struct RecordingStage {
        label: &'static str,
        out: PipelineValue,
    }
    impl Stage for RecordingStage {
        fn execute(&mut self, _input: PipelineValue, _ctx: &mut PipelineContext) -> anyhow::Result<PipelineValue> {
            Ok(self.out.clone())
        }
        fn cleanup(&mut self) -> anyhow::Result<()> {
            CLEANUP_ORDER.lock().unwrap().push(self.label);
            Ok(())
        }
    }

    struct RecordingFactory {
        label: &'static str,
        input: StageType,
        output: StageType,
    }
    impl StageFactory for RecordingFactory {
        fn input_type(&self) -> StageType {
            self.input
        }
        fn output_type(&self) -> StageType {
            self.output
        }
        fn required_resources(&self) -> HashSet<Resource> {
            HashSet::new()
        }
        fn create(&self, _config: serde_json::Map<String, serde_json::Value>) -> anyhow::Result<Box<dyn Stage>> {
            let out = match self.output {
                StageType::Unit => PipelineValue::Unit,
                StageType::OptionalPath => PipelineValue::OptionalPath(None),
                StageType::OptionalString => PipelineValue::OptionalString(Some("x".into())),
            };
            Ok(Box::new(RecordingStage { label: self.label, out }))
        }
    }

    fn registry() -> Arc<StageRegistry> {
        let mut reg = StageRegistry::new();
        reg.register(
            "A",
            StageType::Unit,
            StageType::OptionalString,
            HashSet::new(),
            Box::new(RecordingFactory { label: "A", input: StageType::Unit, output: StageType::OptionalString }),
        )
        .unwrap();
        reg.register(
            "B",
            StageType::OptionalString,
            StageType::OptionalString,
            HashSet::new(),
            Box::new(RecordingFactory { label: "B", input: StageType::OptionalString, output: StageType::OptionalString }),
        )
        .unwrap();
        Arc::new(reg)
    }

    fn pipeline() -> PipelineDefinition {
        PipelineDefinition {
            name: "p".into(),
            enabled: true,
            hotkey: "<f9>".into(),
            stages: vec![
                ResolvedStage { stage_class: "A".into(), config: serde_json::Map::new() },
                ResolvedStage { stage_class: "B".into(), config: serde_json::Map::new() },
            ],
        }
    }

    #[test]
    fn cleanup_runs_in_reverse_order() {
        CLEANUP_ORDER.lock().unwrap().clear();
        let reg = registry();
        let exec = PipelineExecutor::new(4);
        let run_id = exec.execute(&reg, &pipeline(), None).unwrap().unwrap();
        exec.shutdown(Duration::from_secs(2)).unwrap();
        assert_eq!(*CLEANUP_ORDER.lock().unwrap(), vec!["B", "A"]);
        assert!(exec.arbiter().holds_nothing(run_id));
        assert_eq!(exec.active_run_count(), 0);
    }

    #[test]
    fn resource_contention_refuses_second_dispatch() {
        let mut reg_inner = StageRegistry::new();
        reg_inner
            .register(
                "Keyed",
                StageType::Unit,
                StageType::Unit,
                [Resource::Keyboard].into_iter().collect(),
                Box::new(RecordingFactory { label: "Keyed", input: StageType::Unit, output: StageType::Unit }),
            )
            .unwrap();
        let reg = Arc::new(reg_inner);
        let exec = PipelineExecutor::new(4);
        let pipeline_def = PipelineDefinition {
            name: "keyed".into(),
            enabled: true,
            hotkey: "<f9>".into(),
            stages: vec![ResolvedStage { stage_class: "Keyed".into(), config: serde_json::Map::new() }],
        };

        let run_id = Uuid::new_v4();
        assert!(exec.arbiter().acquire(run_id, &[Resource::Keyboard].into_iter().collect()));

        let second = exec.execute(&reg, &pipeline_def, None).unwrap();
        assert!(second.is_none());

        exec.arbiter().release(run_id);
    }
}
