//! Pipeline runtime: a configurable, typed, resource-locked, concurrent
//! stage executor. No knowledge of hotkeys, keyboards, or any concrete
//! stage lives here — those are provided by the `platform`, `keyboard`,
//! and `stages` crates and wired together by `app`.

pub mod error;
pub mod executor;
pub mod manager;
pub mod registry;
pub mod resource;
pub mod stage;
pub mod value;

#[cfg(test)]
mod tests;

pub use error::*;
pub use executor::PipelineExecutor;
pub use manager::{
    PipelineDefinition, PipelineManager, RawPipelineConfig, ResolvedStage, StageConfigEntry,
};
pub use registry::{StageDefinition, StageFactory, StageRegistry};
pub use resource::{Resource, ResourceArbiter, RunId};
pub use stage::{
    CancelFlag, CompletionLatch, IconController, IconState, PipelineContext, Stage, TriggerEvent,
};
pub use value::{PipelineValue, StageType};
