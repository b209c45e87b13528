//! Error types for the pipeline runtime.

use thiserror::Error;

use crate::value::StageType;

/// Errors raised while registering stage classes or validating pipelines.
///
/// These are all "configuration error" per the error-kind taxonomy: fatal
/// at load, before any run is dispatched.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("stage class '{0}' is already registered")]
    DuplicateStageClass(String),

    #[error("stage class '{0}' is not registered")]
    UnknownStageClass(String),

    #[error("factory for '{name}' declares input type {declared:?} but registration declared {expected:?}")]
    FactoryInputTypeMismatch {
        name: String,
        declared: StageType,
        expected: StageType,
    },

    #[error("factory for '{name}' declares output type {declared:?} but registration declared {expected:?}")]
    FactoryOutputTypeMismatch {
        name: String,
        declared: StageType,
        expected: StageType,
    },

    #[error("cannot validate an empty pipeline")]
    EmptyPipeline,

    #[error("stage '{index}' ({class}) output type {output:?} does not match stage {next_index} ({next_class}) input type {input:?}")]
    TypeMismatch {
        index: usize,
        class: String,
        output: StageType,
        next_index: usize,
        next_class: String,
        input: StageType,
    },
}

/// Errors raised while loading pipeline definitions (`PipelineManager::load`).
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("pipeline name '{0}' is used more than once")]
    DuplicatePipelineName(String),

    #[error("hotkey '{hotkey}' is bound to both '{first}' and '{second}'")]
    DuplicateHotkey {
        hotkey: String,
        first: String,
        second: String,
    },

    #[error("stage reference '{stage_ref}' in pipeline '{pipeline}' sets both 'class' and 'stage_class'")]
    AmbiguousStageClassKey { pipeline: String, stage_ref: String },

    #[error("stage reference '{0}' is not a string")]
    NonStringStageReference(String),
}

/// Errors surfaced by the executor's worker, wrapping a failure from a
/// specific stage in a specific run.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("stage '{stage}' failed: {source}")]
    Failed {
        stage: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Errors raised by `PipelineExecutor`/`PipelineManager` dispatch calls.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("pipeline '{0}' is not defined")]
    UnknownPipeline(String),

    #[error("pipeline '{0}' is disabled")]
    Disabled(String),

    #[error("resources unavailable for pipeline '{0}'")]
    ResourceContention(String),

    #[error("shutdown timed out with {0} run(s) still outstanding")]
    ShutdownTimeout(usize),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
