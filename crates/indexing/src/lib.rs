pub mod orchestrator;
pub mod processor;
pub mod worker;

pub use orchestrator::{
  IncrementalChange, IndexingStatus, Orchestrator, RebuildOutcome, RunPhase, RunStatus, SchedulerPhase,
  SchedulerStatus, WorkerPhase, WorkerStatus,
};
pub use processor::{IndexOutcome, Processor};
pub use worker::{NoopWorkerEvents, ReconcileHook, RunOnceStats, WorkerEvents, WorkerPool};
